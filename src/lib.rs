//! RaceMaster - dashcam recording with a live telemetry overlay.
//!
//! GPS fixes and accelerometer samples are fused into a speed estimate, drawn
//! into an overlay at a fixed rate, burned into every camera frame and written
//! to an MP4 alongside the microphone track.

pub mod capture;
pub mod clock;
pub mod compositor;
pub mod config;
pub mod dashcam;
pub mod overlay;
pub mod recorder;
pub mod telemetry;
pub mod utils;

pub use config::DashcamConfig;
pub use dashcam::{Dashcam, DashcamStats};
pub use utils::error::{AppError, AppResult};

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize tracing/logging
///
/// `RUST_LOG` overrides the default `racemaster=debug` filter.
pub fn init_tracing() {
    let _ = tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "racemaster=debug,racemaster_lib=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .try_init();
}
