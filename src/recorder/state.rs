//! Recording state and results
//!
//! Defines the session state machine, its counters and the events it emits.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use uuid::Uuid;

/// Current state of the recording session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    /// No recording in progress
    #[default]
    Idle,
    /// Buffers are being appended to the encoder
    Writing,
    /// Stopped, container being finalized
    Finishing,
}

/// Per-recording counters, monotonically increasing while Writing
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStats {
    pub video_appended: u64,
    pub audio_appended: u64,
    /// Dropped because the encoder was not ready
    pub video_dropped_not_ready: u64,
    pub audio_dropped_not_ready: u64,
    /// Dropped because they preceded the origin or the previous buffer of their track
    pub dropped_out_of_order: u64,
    /// Camera frames whose buffer was too short for their dimensions
    #[serde(default)]
    pub dropped_malformed: u64,
    /// Media clock time the recording timeline starts at
    pub origin: Option<f64>,
    /// Seconds from the origin to the end of the last appended buffer
    pub duration_secs: f64,
}

/// Description of a finished recording, written next to the file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordingMetadata {
    pub id: Uuid,
    pub file_name: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub audio_channels: u16,
    pub audio_sample_rate: u32,
    pub stats: SessionStats,
}

/// Result of a completed recording
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordingResult {
    pub id: Uuid,
    /// Final location of the container
    pub path: PathBuf,
    /// Metadata sidecar, when the store wrote one
    pub metadata_path: Option<PathBuf>,
    pub metadata: RecordingMetadata,
}

/// Events emitted by the recording session
#[derive(Debug, Clone)]
pub enum RecordingEvent {
    /// Encoder created, accepting buffers
    Started(Uuid),
    /// No longer accepting buffers, finalizing
    Stopped(Uuid),
    /// Container finalized and handed to the store
    Saved(RecordingResult),
    /// Recording lost or could not be saved
    Failed(String),
}
