//! Simulated drive
//!
//! Feeds a scripted drive, a test-pattern camera and a tone through the full
//! pipeline and records the result with FFmpeg.
//!
//! Usage: `racemaster [seconds]`. `RACEMASTER_CONFIG` names the config file.

use anyhow::{bail, Context};
use racemaster_lib::capture::{PixelFormat, TestPatternCamera, ToneGenerator};
use racemaster_lib::clock::MediaClock;
use racemaster_lib::config::CONFIG_ENV_VAR;
use racemaster_lib::recorder::{FfmpegEncoderFactory, LibraryStore, RecordingEvent};
use racemaster_lib::telemetry::SimulatedDrive;
use racemaster_lib::{init_tracing, Dashcam, DashcamConfig};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

const DEFAULT_CONFIG: &str = "racemaster.json";
const DEFAULT_SECONDS: f64 = 10.0;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    tracing::info!("Starting RaceMaster v{}", env!("CARGO_PKG_VERSION"));

    let config_path = std::env::var_os(CONFIG_ENV_VAR)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG));
    let config = DashcamConfig::load_or_default(&config_path)
        .with_context(|| format!("loading {}", config_path.display()))?;

    let seconds = match std::env::args().nth(1) {
        Some(arg) => arg
            .parse::<f64>()
            .with_context(|| format!("invalid duration {:?}", arg))?,
        None => DEFAULT_SECONDS,
    };
    if !(seconds > 0.0) {
        bail!("duration must be positive");
    }
    let duration = Duration::from_secs_f64(seconds);

    let factory = FfmpegEncoderFactory::new();
    if !factory.is_available() {
        bail!("ffmpeg was not found; install it or put it on PATH");
    }

    let clock = MediaClock::new();
    let format = PixelFormat::Rgba8;
    let store = LibraryStore::new(&config.library_dir);
    let dashcam = Dashcam::new(config.clone(), Arc::new(factory), Arc::new(store), format, clock)?;
    let mut events = dashcam.subscribe();

    let id = dashcam.start()?;
    tracing::info!("Recording {} for {:.1}s", id, seconds);

    let drive = SimulatedDrive::demo();
    let camera = TestPatternCamera::new(config.video.width, config.video.height, config.video.fps, format);
    let tone = ToneGenerator::new(config.audio.channels, config.audio.sample_rate, 440.0);
    // 20 ms buffers
    let frames_per_buffer = (config.audio.sample_rate / 50).max(1) as usize;

    let (sensor_events, frames, buffers) = tokio::join!(
        drive.run(dashcam.sensor_sender(), duration, clock),
        camera.run(dashcam.video_sender(), clock, duration),
        tone.run(dashcam.audio_sender(), clock, duration, frames_per_buffer),
    );
    tracing::info!(
        "Drive finished: {} sensor events, {} frames, {} audio buffers, {:.1} km/h",
        sensor_events,
        frames,
        buffers,
        dashcam.telemetry().speed.value
    );

    std::fs::create_dir_all(&config.library_dir)?;
    let overlay_path = config.library_dir.join(format!("{}-overlay.png", id));
    if dashcam.save_overlay_png(&overlay_path)? {
        tracing::info!("Last overlay written to {:?}", overlay_path);
    }

    dashcam.stop()?;
    let saved = loop {
        match events.recv().await {
            Ok(RecordingEvent::Saved(result)) if result.id == id => break result,
            Ok(RecordingEvent::Failed(reason)) => bail!("recording failed: {}", reason),
            Ok(_) => {}
            Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                tracing::warn!("Missed {} recording events", n);
            }
            Err(e) => bail!("recording events closed: {}", e),
        }
    };

    let stats = dashcam.shutdown().await;
    println!("Saved {}", saved.path.display());
    if let Some(metadata_path) = &saved.metadata_path {
        println!("Metadata {}", metadata_path.display());
    }
    println!(
        "{} video / {} audio appended, {} frames dropped by capture, {} not ready",
        saved.metadata.stats.video_appended,
        saved.metadata.stats.audio_appended,
        stats.video.dropped,
        saved.metadata.stats.video_dropped_not_ready
    );
    Ok(())
}
