//! Encoder interface
//!
//! The session only ever talks to a [`MediaEncoder`]: it asks for readiness
//! before every append and finalizes once. Encoders are created per recording
//! by an [`EncoderFactory`].

use crate::capture::{AudioBuffer, CameraFrame, PixelFormat};
use crate::config::{AudioTrackConfig, VideoTrackConfig};
use async_trait::async_trait;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EncoderError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to start encoder: {0}")]
    Spawn(String),

    #[error("Failed to write {track} data: {message}")]
    Write { track: &'static str, message: String },

    #[error("Encoder process failed: {0}")]
    Process(String),

    #[error("Buffer does not match the track: {0}")]
    Mismatch(String),

    #[error("Encoder is in the failed state")]
    Failed,
}

/// Encoder lifecycle as seen by the session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncoderStatus {
    Writing,
    Completed,
    Failed,
}

/// Fixed track parameters of one recording
#[derive(Debug, Clone)]
pub struct EncoderSettings {
    pub video: VideoTrackConfig,
    pub audio: AudioTrackConfig,
    /// Layout of the frames that will be appended
    pub pixel_format: PixelFormat,
    /// Container the encoder writes
    pub output_path: PathBuf,
}

#[async_trait]
pub trait MediaEncoder: Send {
    fn status(&self) -> EncoderStatus;

    fn is_ready_for_video(&self) -> bool;

    fn is_ready_for_audio(&self) -> bool;

    /// Append a frame at `pts` seconds from the recording origin
    fn append_video(&mut self, frame: &CameraFrame, pts: f64) -> Result<(), EncoderError>;

    /// Append PCM at `pts` seconds from the recording origin
    fn append_audio(&mut self, buffer: &AudioBuffer, pts: f64) -> Result<(), EncoderError>;

    /// Flush everything and close the container, returning its path
    async fn finish(self: Box<Self>) -> Result<PathBuf, EncoderError>;
}

pub trait EncoderFactory: Send + Sync {
    fn create(&self, settings: &EncoderSettings) -> Result<Box<dyn MediaEncoder>, EncoderError>;
}
