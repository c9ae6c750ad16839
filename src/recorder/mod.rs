//! Recording system module
//!
//! - [`RecordingSession`] owns the Idle/Writing/Finishing state machine
//! - [`MediaEncoder`] is the seam to the container writer, FFmpeg by default
//! - [`RecordingStore`] receives finalized containers

pub mod encoder;
pub mod ffmpeg;
pub mod session;
pub mod state;
pub mod store;

#[cfg(test)]
pub mod testing;

pub use encoder::{EncoderError, EncoderFactory, EncoderSettings, EncoderStatus, MediaEncoder};
pub use ffmpeg::FfmpegEncoderFactory;
pub use session::{AppendOutcome, FinalizeHandle, RecordingError, RecordingSession, SessionSettings};
pub use state::{RecordingEvent, RecordingMetadata, RecordingResult, SessionState, SessionStats};
pub use store::{LibraryStore, RecordingStore, StoreError, StoredRecording};
