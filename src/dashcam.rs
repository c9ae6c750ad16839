//! Dashcam
//!
//! Wires the pipeline together: sensor events feed the estimator, the overlay
//! renderer publishes snapshots on its own interval, the video worker burns the
//! latest snapshot into every camera frame and hands it to the session, and the
//! audio worker hands raw PCM straight to the session.
//!
//! Capture callbacks only ever call [`Dashcam::on_camera_frame`],
//! [`Dashcam::on_audio`] and [`Dashcam::on_sensor`]; none of them block.

use crate::capture::{AudioBuffer, CameraFrame, CaptureWorker, PixelFormat, WorkerSender, WorkerStats};
use crate::clock::MediaClock;
use crate::compositor::{CompositorStats, FrameCompositor, Placement};
use crate::config::DashcamConfig;
use crate::overlay::{OverlayRenderer, RendererHandle, SnapshotSlot, SoftwareSurface, TrackMap};
use crate::recorder::{
    EncoderFactory, FinalizeHandle, RecordingError, RecordingEvent, RecordingResult, RecordingSession,
    RecordingStore, SessionSettings, SessionState,
};
use crate::telemetry::{spawn_ingest, FusionHandle, IngestStats, SensorEvent};
use crate::telemetry::TelemetryState;
use crate::utils::error::{AppError, AppResult};
use parking_lot::Mutex;
use std::path::Path;
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use uuid::Uuid;

/// Sensor events allowed in flight before new ones are dropped
const SENSOR_QUEUE_DEPTH: usize = 256;

/// What the pipeline did over its lifetime
#[derive(Debug, Clone, Default)]
pub struct DashcamStats {
    pub video: WorkerStats,
    pub audio: WorkerStats,
    pub compositor: CompositorStats,
    pub snapshots: u64,
    pub sensors: IngestStats,
    /// Recording that was still in progress at shutdown, once saved
    pub saved: Option<RecordingResult>,
}

pub struct Dashcam {
    clock: MediaClock,
    fusion: FusionHandle,
    slot: Arc<SnapshotSlot>,
    session: RecordingSession,
    renderer: RendererHandle,
    video: CaptureWorker<CameraFrame>,
    audio: CaptureWorker<AudioBuffer>,
    compositor_stats: Arc<Mutex<CompositorStats>>,
    sensors: mpsc::Sender<SensorEvent>,
    ingest: JoinHandle<IngestStats>,
}

impl Dashcam {
    /// Build and start the pipeline; must be called inside a tokio runtime
    ///
    /// Nothing is recorded until [`Dashcam::start`], but the estimator and the
    /// overlay run from here on.
    pub fn new(
        config: DashcamConfig,
        factory: Arc<dyn EncoderFactory>,
        store: Arc<dyn RecordingStore>,
        pixel_format: PixelFormat,
        clock: MediaClock,
    ) -> AppResult<Self> {
        config.validate()?;
        let runtime = Handle::try_current()
            .map_err(|e| AppError::Config(format!("dashcam needs a tokio runtime: {}", e)))?;

        let track = match &config.overlay.track_map {
            Some(path) => {
                let map = TrackMap::load(path)?;
                tracing::info!("Loaded track map {:?} ({} points)", path, map.points().len());
                Some(map)
            }
            None => None,
        };

        let fusion = FusionHandle::new(config.fusion.clone());
        let slot = Arc::new(SnapshotSlot::new());

        let surface = SoftwareSurface::new(config.overlay.width, config.overlay.height, track);
        let renderer = OverlayRenderer::new(Box::new(surface), fusion.clone(), Arc::clone(&slot), clock)
            .spawn(config.overlay.render_hz);

        let session = RecordingSession::new(
            factory,
            store,
            SessionSettings {
                video: config.video.clone(),
                audio: config.audio.clone(),
                pixel_format,
                output_dir: config.output_dir.clone(),
            },
            runtime,
        );

        let compositor_stats = Arc::new(Mutex::new(CompositorStats::default()));
        let video = {
            let mut compositor = FrameCompositor::new(Arc::clone(&slot), Placement::from_config(&config.overlay));
            let session = session.clone();
            let stats = Arc::clone(&compositor_stats);
            CaptureWorker::spawn("video", config.capture.video_queue_depth, move |frame: CameraFrame| {
                let composite = compositor.composite(frame);
                *stats.lock() = compositor.stats();
                session.append_video(&composite);
            })?
        };
        let audio = {
            let session = session.clone();
            CaptureWorker::spawn("audio", config.capture.audio_queue_depth, move |buffer: AudioBuffer| {
                session.append_audio(&buffer);
            })?
        };

        let (sensors, rx) = mpsc::channel(SENSOR_QUEUE_DEPTH);
        let ingest = spawn_ingest(fusion.clone(), rx);

        tracing::info!(
            "Dashcam ready: {}x{} @ {}fps {:?}, overlay {}x{} @ {}Hz",
            config.video.width,
            config.video.height,
            config.video.fps,
            pixel_format,
            config.overlay.width,
            config.overlay.height,
            config.overlay.render_hz
        );

        Ok(Self {
            clock,
            fusion,
            slot,
            session,
            renderer,
            video,
            audio,
            compositor_stats,
            sensors,
            ingest,
        })
    }

    pub fn clock(&self) -> MediaClock {
        self.clock
    }

    pub fn fusion(&self) -> &FusionHandle {
        &self.fusion
    }

    pub fn snapshots(&self) -> &Arc<SnapshotSlot> {
        &self.slot
    }

    pub fn session(&self) -> &RecordingSession {
        &self.session
    }

    pub fn state(&self) -> SessionState {
        self.session.state()
    }

    pub fn telemetry(&self) -> TelemetryState {
        self.fusion.telemetry()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RecordingEvent> {
        self.session.subscribe()
    }

    /// Hand a camera frame to the video worker; false if it was dropped
    pub fn on_camera_frame(&self, frame: CameraFrame) -> bool {
        self.video.submit(frame)
    }

    /// Hand an audio buffer to the audio worker; false if it was dropped
    pub fn on_audio(&self, buffer: AudioBuffer) -> bool {
        self.audio.submit(buffer)
    }

    /// Queue a sensor event for the estimator; false if it was dropped
    pub fn on_sensor(&self, event: SensorEvent) -> bool {
        self.sensors.try_send(event).is_ok()
    }

    /// Sender for a camera callback living on another thread
    pub fn video_sender(&self) -> WorkerSender<CameraFrame> {
        self.video.sender()
    }

    pub fn audio_sender(&self) -> WorkerSender<AudioBuffer> {
        self.audio.sender()
    }

    pub fn sensor_sender(&self) -> mpsc::Sender<SensorEvent> {
        self.sensors.clone()
    }

    /// Start a recording
    pub fn start(&self) -> Result<Uuid, RecordingError> {
        self.session.start()?.ok_or(RecordingError::AlreadyRecording)
    }

    /// Stop the recording; the file is ready once the handle resolves
    pub fn stop(&self) -> Result<FinalizeHandle, RecordingError> {
        self.session.stop().ok_or(RecordingError::NotRecording)
    }

    /// Write the current overlay snapshot as PNG; false when none exists yet
    pub fn save_overlay_png(&self, path: &Path) -> AppResult<bool> {
        match self.slot.current() {
            Some(snapshot) => {
                snapshot.bitmap.save_png(path)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub fn compositor_stats(&self) -> CompositorStats {
        *self.compositor_stats.lock()
    }

    /// Drain the capture workers, finish any recording and stop the background tasks
    pub async fn shutdown(self) -> DashcamStats {
        let Dashcam {
            session,
            renderer,
            video,
            audio,
            compositor_stats,
            sensors,
            ingest,
            ..
        } = self;

        let (video, audio) = match tokio::task::spawn_blocking(move || (video.shutdown(), audio.shutdown())).await {
            Ok(stats) => stats,
            Err(e) => {
                tracing::error!("Capture worker shutdown failed: {}", e);
                (WorkerStats::default(), WorkerStats::default())
            }
        };

        let saved = match session.stop() {
            Some(handle) => match handle.wait().await {
                Ok(result) => Some(result),
                Err(e) => {
                    tracing::error!("Recording in progress at shutdown was lost: {}", e);
                    None
                }
            },
            None => None,
        };

        let snapshots = renderer.stop().await;

        drop(sensors);
        let sensors = match ingest.await {
            Ok(stats) => stats,
            Err(e) => {
                tracing::error!("Sensor ingest task failed: {}", e);
                IngestStats::default()
            }
        };

        let compositor = *compositor_stats.lock();
        tracing::info!(
            "Dashcam shut down: {} frames composited, {} passed through, {} snapshots",
            compositor.composited,
            compositor.passed_through,
            snapshots
        );

        DashcamStats {
            video,
            audio,
            compositor,
            snapshots,
            sensors,
            saved,
        }
    }
}
