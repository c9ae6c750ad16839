//! Recording session
//!
//! Owns the encoder for exactly one recording at a time and routes composited
//! video and raw audio into it.
//!
//! State machine: `Idle -> Writing` on start, `Writing -> Finishing` on stop,
//! `Finishing -> Idle` once the container is finalized and stored. An encoder
//! failure while Writing goes straight back to Idle and discards whatever was
//! in flight.
//!
//! The timeline origin is the timestamp of the first buffer (video or audio)
//! seen after start. Buffers are only appended when the encoder says it is
//! ready for that track; otherwise they are dropped, never queued. A frame
//! whose buffer does not cover its dimensions is dropped before it can set the
//! origin, and the recording carries on.

use super::encoder::{EncoderError, EncoderFactory, EncoderSettings, EncoderStatus, MediaEncoder};
use super::state::{RecordingEvent, RecordingMetadata, RecordingResult, SessionState, SessionStats};
use super::store::{RecordingStore, StoreError};
use crate::capture::{AudioBuffer, PixelFormat};
use crate::compositor::CompositeFrame;
use crate::config::{AudioTrackConfig, VideoTrackConfig};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tokio::runtime::Handle;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum RecordingError {
    #[error("Recording already in progress")]
    AlreadyRecording,

    #[error("No recording in progress")]
    NotRecording,

    #[error("Encoder failed: {0}")]
    EncoderFailed(#[from] EncoderError),

    #[error("Failed to save recording: {0}")]
    Store(#[from] StoreError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Finalize task failed: {0}")]
    Finalize(String),
}

pub type RecordingResultOf<T> = Result<T, RecordingError>;

/// Fixed parameters shared by every recording of a session
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub video: VideoTrackConfig,
    pub audio: AudioTrackConfig,
    pub pixel_format: PixelFormat,
    /// Directory in-progress containers are written to
    pub output_dir: PathBuf,
}

/// What happened to an appended buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    Appended,
    /// Session is not Writing
    NotRecording,
    /// Encoder not ready for this track, buffer dropped
    NotReady,
    /// Before the origin or not after the previous buffer of the track
    OutOfOrder,
    /// Frame buffer too short for its dimensions, dropped
    Malformed,
    /// The encoder failed; the recording has been abandoned
    Failed,
}

struct ActiveRecording {
    id: Uuid,
    started_at: DateTime<Utc>,
    origin: Option<f64>,
    last_video_pts: Option<f64>,
    last_audio_pts: Option<f64>,
    stats: SessionStats,
}

impl ActiveRecording {
    /// Relative timestamp for a buffer, or None when it is out of order
    fn place(&mut self, pts: f64, last: Option<f64>) -> Option<f64> {
        let origin = *self.origin.get_or_insert_with(|| {
            tracing::debug!("Recording {} time origin set at {:.3}s", self.id, pts);
            pts
        });
        self.stats.origin = Some(origin);
        if pts < origin || last.map_or(false, |l| pts <= l) {
            self.stats.dropped_out_of_order += 1;
            return None;
        }
        Some(pts - origin)
    }
}

#[derive(Default)]
struct SessionCore {
    state: SessionState,
    encoder: Option<Box<dyn MediaEncoder>>,
    active: Option<ActiveRecording>,
}

struct Shared {
    factory: Arc<dyn EncoderFactory>,
    store: Arc<dyn RecordingStore>,
    settings: SessionSettings,
    core: Mutex<SessionCore>,
    events: broadcast::Sender<RecordingEvent>,
    runtime: Handle,
}

/// Cloneable handle to the recording state machine
#[derive(Clone)]
pub struct RecordingSession {
    shared: Arc<Shared>,
}

/// Pending finalization of a stopped recording
pub struct FinalizeHandle {
    pub id: Uuid,
    task: JoinHandle<RecordingResultOf<RecordingResult>>,
}

impl FinalizeHandle {
    /// Wait for the container to be finalized and stored
    pub async fn wait(self) -> RecordingResultOf<RecordingResult> {
        self.task
            .await
            .map_err(|e| RecordingError::Finalize(e.to_string()))?
    }
}

impl RecordingSession {
    pub fn new(
        factory: Arc<dyn EncoderFactory>,
        store: Arc<dyn RecordingStore>,
        settings: SessionSettings,
        runtime: Handle,
    ) -> Self {
        let (events, _) = broadcast::channel(100);
        Self {
            shared: Arc::new(Shared {
                factory,
                store,
                settings,
                core: Mutex::new(SessionCore::default()),
                events,
                runtime,
            }),
        }
    }

    pub fn state(&self) -> SessionState {
        self.shared.core.lock().state
    }

    /// Subscribe to recording events
    pub fn subscribe(&self) -> broadcast::Receiver<RecordingEvent> {
        self.shared.events.subscribe()
    }

    /// Counters of the recording in progress
    pub fn stats(&self) -> Option<SessionStats> {
        self.shared.core.lock().active.as_ref().map(|a| a.stats)
    }

    /// Id of the recording in progress
    pub fn recording_id(&self) -> Option<Uuid> {
        self.shared.core.lock().active.as_ref().map(|a| a.id)
    }

    /// Start a recording
    ///
    /// Returns `Ok(None)` without doing anything unless the session is Idle.
    pub fn start(&self) -> RecordingResultOf<Option<Uuid>> {
        let mut core = self.shared.core.lock();
        if core.state != SessionState::Idle {
            tracing::debug!("Ignoring start while {:?}", core.state);
            return Ok(None);
        }

        let settings = &self.shared.settings;
        std::fs::create_dir_all(&settings.output_dir)?;

        let id = Uuid::new_v4();
        let started_at = Utc::now();
        let file_name = format!(
            "drive-{}-{}.mp4",
            started_at.format("%Y%m%d-%H%M%S"),
            &id.simple().to_string()[..8]
        );
        let encoder = self.shared.factory.create(&EncoderSettings {
            video: settings.video.clone(),
            audio: settings.audio.clone(),
            pixel_format: settings.pixel_format,
            output_path: settings.output_dir.join(file_name),
        })?;

        core.encoder = Some(encoder);
        core.active = Some(ActiveRecording {
            id,
            started_at,
            origin: None,
            last_video_pts: None,
            last_audio_pts: None,
            stats: SessionStats::default(),
        });
        core.state = SessionState::Writing;
        drop(core);

        tracing::info!(
            "Recording {} started: {}x{} @ {}fps, audio {}ch @ {}Hz",
            id,
            settings.video.width,
            settings.video.height,
            settings.video.fps,
            settings.audio.channels,
            settings.audio.sample_rate
        );
        let _ = self.shared.events.send(RecordingEvent::Started(id));
        Ok(Some(id))
    }

    /// Append a composited frame if the encoder is ready for video
    pub fn append_video(&self, frame: &CompositeFrame) -> AppendOutcome {
        let mut guard = self.shared.core.lock();
        let core = &mut *guard;
        if core.state != SessionState::Writing {
            return AppendOutcome::NotRecording;
        }
        let (Some(active), Some(encoder)) = (core.active.as_mut(), core.encoder.as_mut()) else {
            return AppendOutcome::NotRecording;
        };

        if !frame.frame.is_valid() {
            active.stats.dropped_malformed += 1;
            tracing::warn!(
                "Dropping malformed {}x{} frame: {} bytes at stride {}",
                frame.frame.width,
                frame.frame.height,
                frame.frame.data.len(),
                frame.frame.stride
            );
            return AppendOutcome::Malformed;
        }

        let pts = frame.pts();
        let Some(relative) = active.place(pts, active.last_video_pts) else {
            return AppendOutcome::OutOfOrder;
        };

        let result = if encoder.status() == EncoderStatus::Failed {
            Err(EncoderError::Failed)
        } else if !encoder.is_ready_for_video() {
            active.stats.video_dropped_not_ready += 1;
            return AppendOutcome::NotReady;
        } else {
            encoder.append_video(&frame.frame, relative)
        };

        match result {
            Ok(()) => {
                active.stats.video_appended += 1;
                active.last_video_pts = Some(pts);
                let end = relative + 1.0 / self.shared.settings.video.fps.max(1) as f64;
                active.stats.duration_secs = active.stats.duration_secs.max(end);
                AppendOutcome::Appended
            }
            Err(e) => {
                self.abandon(core, format!("video encoder failed: {}", e));
                AppendOutcome::Failed
            }
        }
    }

    /// Append raw audio if the encoder is ready for audio
    pub fn append_audio(&self, buffer: &AudioBuffer) -> AppendOutcome {
        let mut guard = self.shared.core.lock();
        let core = &mut *guard;
        if core.state != SessionState::Writing {
            return AppendOutcome::NotRecording;
        }
        let (Some(active), Some(encoder)) = (core.active.as_mut(), core.encoder.as_mut()) else {
            return AppendOutcome::NotRecording;
        };

        let Some(relative) = active.place(buffer.pts, active.last_audio_pts) else {
            return AppendOutcome::OutOfOrder;
        };

        let result = if encoder.status() == EncoderStatus::Failed {
            Err(EncoderError::Failed)
        } else if !encoder.is_ready_for_audio() {
            active.stats.audio_dropped_not_ready += 1;
            return AppendOutcome::NotReady;
        } else {
            encoder.append_audio(buffer, relative)
        };

        match result {
            Ok(()) => {
                active.stats.audio_appended += 1;
                active.last_audio_pts = Some(buffer.pts);
                let end = relative + buffer.duration_secs();
                active.stats.duration_secs = active.stats.duration_secs.max(end);
                AppendOutcome::Appended
            }
            Err(e) => {
                self.abandon(core, format!("audio encoder failed: {}", e));
                AppendOutcome::Failed
            }
        }
    }

    /// Stop accepting buffers and finalize in the background
    ///
    /// Returns `None` without doing anything unless the session is Writing.
    pub fn stop(&self) -> Option<FinalizeHandle> {
        let mut core = self.shared.core.lock();
        if core.state != SessionState::Writing {
            tracing::debug!("Ignoring stop while {:?}", core.state);
            return None;
        }
        let (Some(encoder), Some(active)) = (core.encoder.take(), core.active.take()) else {
            core.state = SessionState::Idle;
            return None;
        };
        core.state = SessionState::Finishing;
        drop(core);

        let id = active.id;
        tracing::info!(
            "Recording {} stopped: {} video / {} audio appended, {} not-ready drops",
            id,
            active.stats.video_appended,
            active.stats.audio_appended,
            active.stats.video_dropped_not_ready + active.stats.audio_dropped_not_ready
        );
        let _ = self.shared.events.send(RecordingEvent::Stopped(id));

        let shared = Arc::clone(&self.shared);
        let task = self
            .shared
            .runtime
            .spawn(async move { shared.finalize(encoder, active).await });
        Some(FinalizeHandle { id, task })
    }

    /// Drop the encoder and everything in flight, back to Idle
    fn abandon(&self, core: &mut SessionCore, reason: String) {
        let id = core.active.take().map(|a| a.id);
        core.encoder = None;
        core.state = SessionState::Idle;
        tracing::error!("Recording {:?} abandoned: {}", id, reason);
        let _ = self.shared.events.send(RecordingEvent::Failed(reason));
    }
}

impl Shared {
    async fn finalize(
        &self,
        encoder: Box<dyn MediaEncoder>,
        active: ActiveRecording,
    ) -> RecordingResultOf<RecordingResult> {
        let id = active.id;
        let result = self.finish_and_store(encoder, active).await;

        self.core.lock().state = SessionState::Idle;
        match &result {
            Ok(saved) => {
                tracing::info!("Recording {} saved to {:?}", id, saved.path);
                let _ = self.events.send(RecordingEvent::Saved(saved.clone()));
            }
            Err(e) => {
                tracing::error!("Recording {} could not be saved: {}", id, e);
                let _ = self
                    .events
                    .send(RecordingEvent::Failed(format!("recording {} could not be saved: {}", id, e)));
            }
        }
        result
    }

    async fn finish_and_store(
        &self,
        encoder: Box<dyn MediaEncoder>,
        active: ActiveRecording,
    ) -> RecordingResultOf<RecordingResult> {
        let path = encoder.finish().await?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| format!("{}.mp4", active.id));

        let metadata = RecordingMetadata {
            id: active.id,
            file_name,
            started_at: active.started_at,
            ended_at: Utc::now(),
            width: self.settings.video.width,
            height: self.settings.video.height,
            fps: self.settings.video.fps,
            audio_channels: self.settings.audio.channels,
            audio_sample_rate: self.settings.audio.sample_rate,
            stats: active.stats,
        };
        let stored = self.store.save(&path, &metadata).await?;

        Ok(RecordingResult {
            id: active.id,
            path: stored.path,
            metadata_path: stored.metadata_path,
            metadata,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::CameraFrame;
    use crate::recorder::store::LibraryStore;
    use crate::recorder::testing::FakeFactory;
    use std::sync::Arc;
    use tempfile::{tempdir, TempDir};
    use tokio::sync::Notify;

    struct Harness {
        session: RecordingSession,
        factory: FakeFactory,
        events: broadcast::Receiver<RecordingEvent>,
        _dir: TempDir,
        library: PathBuf,
    }

    fn harness() -> Harness {
        let dir = tempdir().unwrap();
        let library = dir.path().join("library");
        let factory = FakeFactory::new();
        let settings = SessionSettings {
            video: VideoTrackConfig {
                width: 4,
                height: 4,
                ..VideoTrackConfig::default()
            },
            audio: AudioTrackConfig::default(),
            pixel_format: PixelFormat::Rgba8,
            output_dir: dir.path().join("tmp"),
        };
        let session = RecordingSession::new(
            Arc::new(factory.clone()),
            Arc::new(LibraryStore::new(&library)),
            settings,
            Handle::current(),
        );
        let events = session.subscribe();
        Harness {
            session,
            factory,
            events,
            _dir: dir,
            library,
        }
    }

    fn frame(pts: f64) -> CompositeFrame {
        CompositeFrame {
            frame: CameraFrame::new(4, 4, PixelFormat::Rgba8, pts),
            overlay_sequence: None,
        }
    }

    fn audio(pts: f64) -> AudioBuffer {
        AudioBuffer {
            samples: vec![0; 441],
            channels: 1,
            sample_rate: 44_100,
            pts,
        }
    }

    #[tokio::test]
    async fn test_alternating_readiness_appends_only_ready_frames() {
        let h = harness();
        h.factory.state.lock().video_readiness = (0..10).map(|i| i % 2 == 0).collect();
        h.session.start().unwrap().unwrap();

        let outcomes: Vec<_> = (0..10)
            .map(|i| h.session.append_video(&frame(10.0 + i as f64 / 30.0)))
            .collect();

        for (i, outcome) in outcomes.iter().enumerate() {
            let expected = if i % 2 == 0 {
                AppendOutcome::Appended
            } else {
                AppendOutcome::NotReady
            };
            assert_eq!(*outcome, expected);
        }

        let appended: Vec<f64> = h.factory.state.lock().video.iter().map(|(_, pts)| *pts).collect();
        let expected: Vec<f64> = (0..10).step_by(2).map(|i| 10.0 + i as f64 / 30.0).collect();
        assert_eq!(appended, expected);

        let stats = h.session.stats().unwrap();
        assert_eq!(stats.video_appended, 5);
        assert_eq!(stats.video_dropped_not_ready, 5);
    }

    #[tokio::test]
    async fn test_never_appends_while_not_ready() {
        let h = harness();
        h.factory.state.lock().video_readiness = std::iter::repeat(false).take(20).collect();
        h.factory.state.lock().audio_ready = false;
        h.session.start().unwrap();

        for i in 0..20 {
            let t = i as f64 * 0.01;
            assert_eq!(h.session.append_video(&frame(t)), AppendOutcome::NotReady);
            assert_eq!(h.session.append_audio(&audio(t + 0.001)), AppendOutcome::NotReady);
        }
        let state = h.factory.state.lock();
        assert!(state.video.is_empty());
        assert!(state.audio.is_empty());
    }

    #[tokio::test]
    async fn test_origin_is_first_buffer_of_either_track() {
        let h = harness();
        h.session.start().unwrap();

        assert_eq!(h.session.append_audio(&audio(5.0)), AppendOutcome::Appended);
        assert_eq!(h.session.append_video(&frame(4.9)), AppendOutcome::OutOfOrder);
        assert_eq!(h.session.append_video(&frame(5.1)), AppendOutcome::Appended);

        let state = h.factory.state.lock();
        assert_eq!(state.audio[0].0, 0.0);
        assert!((state.video[0].0 - 0.1).abs() < 1e-9);
        drop(state);

        let stats = h.session.stats().unwrap();
        assert_eq!(stats.origin, Some(5.0));
        assert_eq!(stats.dropped_out_of_order, 1);
    }

    #[tokio::test]
    async fn test_each_track_stays_ordered() {
        let h = harness();
        h.session.start().unwrap();

        assert_eq!(h.session.append_video(&frame(1.0)), AppendOutcome::Appended);
        assert_eq!(h.session.append_video(&frame(1.2)), AppendOutcome::Appended);
        assert_eq!(h.session.append_video(&frame(1.1)), AppendOutcome::OutOfOrder);
        assert_eq!(h.session.append_video(&frame(1.2)), AppendOutcome::OutOfOrder);
        // Audio has its own ordering
        assert_eq!(h.session.append_audio(&audio(1.05)), AppendOutcome::Appended);
        assert_eq!(h.factory.state.lock().video.len(), 2);
    }

    #[tokio::test]
    async fn test_stop_twice_finalizes_once() {
        let mut h = harness();
        let id = h.session.start().unwrap().unwrap();
        h.session.append_video(&frame(0.0));

        let handle = h.session.stop().expect("first stop finalizes");
        assert!(h.session.stop().is_none());
        assert_eq!(h.session.append_video(&frame(0.5)), AppendOutcome::NotRecording);

        let result = handle.wait().await.unwrap();
        assert_eq!(result.id, id);
        assert!(result.path.starts_with(&h.library));
        assert!(result.path.exists());
        assert_eq!(result.metadata.stats.video_appended, 1);

        assert_eq!(h.factory.state.lock().finish_calls, 1);
        assert_eq!(h.session.state(), SessionState::Idle);
        assert!(h.session.stop().is_none());

        assert!(matches!(h.events.recv().await.unwrap(), RecordingEvent::Started(e) if e == id));
        assert!(matches!(h.events.recv().await.unwrap(), RecordingEvent::Stopped(e) if e == id));
        assert!(matches!(h.events.recv().await.unwrap(), RecordingEvent::Saved(r) if r.id == id));
    }

    #[tokio::test]
    async fn test_start_is_ignored_unless_idle() {
        let h = harness();
        let gate = Arc::new(Notify::new());
        h.factory.state.lock().finish_gate = Some(gate.clone());

        let first = h.session.start().unwrap().unwrap();
        assert_eq!(h.session.start().unwrap(), None);

        let handle = h.session.stop().unwrap();
        assert_eq!(h.session.state(), SessionState::Finishing);
        assert_eq!(h.session.start().unwrap(), None);
        assert_eq!(h.factory.state.lock().created, 1);

        gate.notify_one();
        assert_eq!(handle.wait().await.unwrap().id, first);

        h.factory.state.lock().finish_gate = None;
        let second = h.session.start().unwrap().unwrap();
        assert_ne!(first, second);
        assert_eq!(h.factory.state.lock().created, 2);
    }

    #[tokio::test]
    async fn test_encoder_failure_returns_to_idle() {
        let mut h = harness();
        h.session.start().unwrap();
        assert_eq!(h.session.append_video(&frame(0.0)), AppendOutcome::Appended);

        h.factory.state.lock().fail_next_video = true;
        assert_eq!(h.session.append_video(&frame(0.1)), AppendOutcome::Failed);
        assert_eq!(h.session.state(), SessionState::Idle);
        assert!(h.session.stats().is_none());
        assert_eq!(h.session.append_video(&frame(0.2)), AppendOutcome::NotRecording);
        assert!(h.session.stop().is_none());

        assert!(matches!(h.events.recv().await.unwrap(), RecordingEvent::Started(_)));
        match h.events.recv().await.unwrap() {
            RecordingEvent::Failed(reason) => assert!(reason.contains("disk full")),
            other => panic!("expected Failed, got {:?}", other),
        }

        // A new recording can follow
        assert!(h.session.start().unwrap().is_some());
        assert_eq!(h.session.append_video(&frame(3.0)), AppendOutcome::Appended);
        assert_eq!(h.factory.state.lock().finish_calls, 0);
    }

    #[tokio::test]
    async fn test_encoder_status_failure_abandons_video() {
        let mut h = harness();
        h.session.start().unwrap();
        assert_eq!(h.session.append_video(&frame(0.0)), AppendOutcome::Appended);

        // The encoder gives up on its own, no append error
        h.factory.state.lock().fail_status = true;
        assert_eq!(h.session.append_video(&frame(0.1)), AppendOutcome::Failed);
        assert_eq!(h.session.state(), SessionState::Idle);
        assert_eq!(h.factory.state.lock().video.len(), 1);

        assert!(matches!(h.events.recv().await.unwrap(), RecordingEvent::Started(_)));
        assert!(matches!(h.events.recv().await.unwrap(), RecordingEvent::Failed(_)));
    }

    #[tokio::test]
    async fn test_encoder_status_failure_abandons_audio() {
        let mut h = harness();
        h.session.start().unwrap();
        h.factory.state.lock().fail_status = true;

        assert_eq!(h.session.append_audio(&audio(2.0)), AppendOutcome::Failed);
        assert_eq!(h.session.state(), SessionState::Idle);
        assert!(h.factory.state.lock().audio.is_empty());
        assert!(h.session.stop().is_none());

        assert!(matches!(h.events.recv().await.unwrap(), RecordingEvent::Started(_)));
        match h.events.recv().await.unwrap() {
            RecordingEvent::Failed(reason) => assert!(reason.contains("audio")),
            other => panic!("expected Failed, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_malformed_frame_is_dropped_without_failing() {
        let h = harness();
        h.session.start().unwrap();

        let mut short = frame(1.0);
        short.frame.data.truncate(10);
        assert_eq!(h.session.append_video(&short), AppendOutcome::Malformed);

        let mut narrow = frame(1.1);
        narrow.frame.stride = 2;
        assert_eq!(h.session.append_video(&narrow), AppendOutcome::Malformed);

        assert_eq!(h.session.state(), SessionState::Writing);
        // Malformed frames never set the origin
        assert_eq!(h.session.append_video(&frame(2.0)), AppendOutcome::Appended);

        let stats = h.session.stats().unwrap();
        assert_eq!(stats.dropped_malformed, 2);
        assert_eq!(stats.video_appended, 1);
        assert_eq!(stats.origin, Some(2.0));
        assert_eq!(h.factory.state.lock().video, vec![(0.0, 2.0)]);
    }

    #[tokio::test]
    async fn test_save_failure_is_reported() {
        let mut h = harness();
        h.factory.state.lock().skip_output = true;
        h.session.start().unwrap();
        h.session.append_video(&frame(0.0));

        let result = h.session.stop().unwrap().wait().await;
        assert!(matches!(result, Err(RecordingError::Store(StoreError::MissingFile(_)))));
        assert_eq!(h.session.state(), SessionState::Idle);

        let mut saw_failed = false;
        while let Ok(event) = h.events.try_recv() {
            if let RecordingEvent::Failed(reason) = event {
                assert!(reason.contains("could not be saved"));
                saw_failed = true;
            }
        }
        assert!(saw_failed);
    }
}
