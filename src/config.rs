//! Dashcam configuration
//!
//! All track parameters are fixed inputs to a recording; nothing here is
//! negotiated with the encoder at runtime. Every field has a default so a
//! partial JSON file is enough.

use crate::utils::error::{AppError, AppResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Environment variable naming the config file used by the binary
pub const CONFIG_ENV_VAR: &str = "RACEMASTER_CONFIG";

/// Top-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DashcamConfig {
    /// Video track parameters
    pub video: VideoTrackConfig,

    /// Audio track parameters
    pub audio: AudioTrackConfig,

    /// Telemetry overlay parameters
    pub overlay: OverlayConfig,

    /// Speed fusion parameters
    pub fusion: FusionConfig,

    /// Capture worker parameters
    pub capture: CaptureConfig,

    /// Directory the encoder writes in-progress recordings to
    pub output_dir: PathBuf,

    /// Directory finished recordings are moved into
    pub library_dir: PathBuf,
}

impl Default for DashcamConfig {
    fn default() -> Self {
        Self {
            video: VideoTrackConfig::default(),
            audio: AudioTrackConfig::default(),
            overlay: OverlayConfig::default(),
            fusion: FusionConfig::default(),
            capture: CaptureConfig::default(),
            output_dir: PathBuf::from("racemaster_recordings/tmp"),
            library_dir: PathBuf::from("racemaster_recordings"),
        }
    }
}

impl DashcamConfig {
    /// Load a configuration file (JSON)
    pub fn load(path: &Path) -> AppResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: DashcamConfig = serde_json::from_str(&content)?;
        config.validate()?;
        tracing::debug!("Loaded configuration from {:?}", path);
        Ok(config)
    }

    /// Load a configuration file, falling back to defaults when it does not exist
    pub fn load_or_default(path: &Path) -> AppResult<Self> {
        if !path.exists() {
            tracing::info!("No configuration at {:?}, using defaults", path);
            return Ok(Self::default());
        }
        Self::load(path)
    }

    /// Check the invariants the pipeline relies on
    pub fn validate(&self) -> AppResult<()> {
        if self.video.width == 0 || self.video.height == 0 {
            return Err(AppError::Config("video resolution must be non-zero".to_string()));
        }
        if self.video.fps == 0 {
            return Err(AppError::Config("video fps must be non-zero".to_string()));
        }
        if self.audio.channels == 0 || self.audio.sample_rate == 0 {
            return Err(AppError::Config(
                "audio channels and sample rate must be non-zero".to_string(),
            ));
        }
        if self.overlay.render_hz == 0 {
            return Err(AppError::Config("overlay render rate must be non-zero".to_string()));
        }
        // Sizes come straight from the config file and may be near u32::MAX
        let margins = self.overlay.margin.saturating_mul(2);
        if self.overlay.width.saturating_add(margins) > self.video.width
            || self.overlay.height.saturating_add(margins) > self.video.height
        {
            return Err(AppError::Config(format!(
                "overlay {}x{} (margin {}) does not fit in {}x{} frames",
                self.overlay.width,
                self.overlay.height,
                self.overlay.margin,
                self.video.width,
                self.video.height
            )));
        }
        if !(self.fusion.sample_interval_secs > 0.0) || !(self.fusion.gravity > 0.0) {
            return Err(AppError::Config(
                "fusion sample interval and gravity must be positive".to_string(),
            ));
        }
        if self.capture.video_queue_depth == 0 || self.capture.audio_queue_depth == 0 {
            return Err(AppError::Config("capture queue depths must be non-zero".to_string()));
        }
        Ok(())
    }
}

/// Video codec used for the output track
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VideoCodec {
    H264,
    Hevc,
}

impl VideoCodec {
    /// FFmpeg encoder name for this codec
    pub fn ffmpeg_encoder(&self) -> &'static str {
        match self {
            VideoCodec::H264 => "libx264",
            VideoCodec::Hevc => "libx265",
        }
    }
}

/// Video track parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct VideoTrackConfig {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub bitrate_kbps: u32,
    pub codec: VideoCodec,
}

impl Default for VideoTrackConfig {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
            fps: 30,
            bitrate_kbps: 8_000,
            codec: VideoCodec::H264,
        }
    }
}

/// Audio track parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AudioTrackConfig {
    pub channels: u16,
    pub sample_rate: u32,
    pub bitrate_kbps: u32,
}

impl Default for AudioTrackConfig {
    fn default() -> Self {
        Self {
            channels: 1,
            sample_rate: 44_100,
            bitrate_kbps: 128,
        }
    }
}

/// Frame corner the overlay is anchored to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum OverlayAnchor {
    TopLeft,
    TopRight,
    BottomLeft,
    BottomRight,
}

/// Telemetry overlay parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct OverlayConfig {
    /// Overlay surface width in pixels
    pub width: u32,

    /// Overlay surface height in pixels
    pub height: u32,

    /// Snapshot cadence in Hz
    pub render_hz: u32,

    /// Corner of the frame the overlay is drawn into
    pub anchor: OverlayAnchor,

    /// Distance from the frame edges in pixels
    pub margin: u32,

    /// Track outline (KML or JSON) used for the mini-map
    pub track_map: Option<PathBuf>,
}

impl Default for OverlayConfig {
    fn default() -> Self {
        Self {
            width: 480,
            height: 200,
            render_hz: 30,
            anchor: OverlayAnchor::BottomLeft,
            margin: 24,
            track_map: None,
        }
    }
}

/// Speed fusion parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FusionConfig {
    /// Nominal interval between acceleration samples (seconds)
    pub sample_interval_secs: f64,

    /// Gravity constant used to scale accelerometer readings (m/s²)
    pub gravity: f64,
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            sample_interval_secs: 1.0 / 30.0,
            gravity: 9.81,
        }
    }
}

/// Capture worker parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CaptureConfig {
    /// Frames allowed in flight between the camera callback and the video worker
    pub video_queue_depth: usize,

    /// Buffers allowed in flight between the audio callback and the audio worker
    pub audio_queue_depth: usize,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            video_queue_depth: 2,
            audio_queue_depth: 8,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_defaults_are_valid() {
        let config = DashcamConfig::default();
        config.validate().unwrap();
        assert!((config.fusion.sample_interval_secs - 1.0 / 30.0).abs() < 1e-12);
        assert_eq!(config.video.codec.ffmpeg_encoder(), "libx264");
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(
            &path,
            r#"{ "video": { "width": 1920, "height": 1080 }, "overlay": { "anchor": "topRight" } }"#,
        )
        .unwrap();

        let config = DashcamConfig::load(&path).unwrap();
        assert_eq!(config.video.width, 1920);
        assert_eq!(config.video.fps, 30);
        assert_eq!(config.overlay.anchor, OverlayAnchor::TopRight);
        assert_eq!(config.overlay.render_hz, 30);
    }

    #[test]
    fn test_missing_file_falls_back() {
        let dir = tempdir().unwrap();
        let config = DashcamConfig::load_or_default(&dir.path().join("absent.json")).unwrap();
        assert_eq!(config.audio.sample_rate, 44_100);
    }

    #[test]
    fn test_overlay_must_fit() {
        let mut config = DashcamConfig::default();
        config.overlay.width = config.video.width;
        assert!(matches!(config.validate(), Err(AppError::Config(_))));
    }

    #[test]
    fn test_huge_overlay_sizes_are_rejected() {
        let mut config = DashcamConfig::default();
        config.overlay.margin = u32::MAX / 2 + 1;
        assert!(matches!(config.validate(), Err(AppError::Config(_))));

        let mut config = DashcamConfig::default();
        config.overlay.width = u32::MAX;
        config.overlay.margin = 1;
        assert!(matches!(config.validate(), Err(AppError::Config(_))));

        let json = format!(r#"{{"overlay": {{"height": {}, "margin": {}}}}}"#, u32::MAX - 1, u32::MAX);
        let config: DashcamConfig = serde_json::from_str(&json).unwrap();
        assert!(matches!(config.validate(), Err(AppError::Config(_))));
    }
}
