//! Scriptable in-memory encoder for session and dashcam tests

use super::encoder::{EncoderError, EncoderFactory, EncoderSettings, EncoderStatus, MediaEncoder};
use crate::capture::{AudioBuffer, CameraFrame};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Notify;

#[derive(Default)]
pub struct FakeState {
    /// Answers to successive video readiness queries; `true` once exhausted
    pub video_readiness: VecDeque<bool>,
    pub audio_ready: bool,
    /// Make the next video append fail
    pub fail_next_video: bool,
    /// Report Failed from `status` without any append failing
    pub fail_status: bool,
    /// Skip writing the output file on finish
    pub skip_output: bool,
    /// When set, finish waits for a notification
    pub finish_gate: Option<Arc<Notify>>,

    pub created: u32,
    pub finish_calls: u32,
    /// (pts relative to origin, capture pts) of appended frames
    pub video: Vec<(f64, f64)>,
    pub audio: Vec<(f64, f64)>,
    pub last_settings: Option<EncoderSettings>,
    last_video_ready: bool,
}

#[derive(Clone, Default)]
pub struct FakeFactory {
    pub state: Arc<Mutex<FakeState>>,
}

impl FakeFactory {
    pub fn new() -> Self {
        let factory = Self::default();
        factory.state.lock().audio_ready = true;
        factory
    }
}

impl EncoderFactory for FakeFactory {
    fn create(&self, settings: &EncoderSettings) -> Result<Box<dyn MediaEncoder>, EncoderError> {
        let mut state = self.state.lock();
        state.created += 1;
        state.last_settings = Some(settings.clone());
        Ok(Box::new(FakeEncoder {
            state: self.state.clone(),
            output: settings.output_path.clone(),
            failed: false,
        }))
    }
}

pub struct FakeEncoder {
    state: Arc<Mutex<FakeState>>,
    output: PathBuf,
    failed: bool,
}

#[async_trait]
impl MediaEncoder for FakeEncoder {
    fn status(&self) -> EncoderStatus {
        if self.failed || self.state.lock().fail_status {
            EncoderStatus::Failed
        } else {
            EncoderStatus::Writing
        }
    }

    fn is_ready_for_video(&self) -> bool {
        let mut state = self.state.lock();
        let ready = state.video_readiness.pop_front().unwrap_or(true);
        state.last_video_ready = ready;
        ready
    }

    fn is_ready_for_audio(&self) -> bool {
        self.state.lock().audio_ready
    }

    fn append_video(&mut self, frame: &CameraFrame, pts: f64) -> Result<(), EncoderError> {
        let mut state = self.state.lock();
        assert!(state.last_video_ready, "video appended while the encoder was not ready");
        state.last_video_ready = false;
        if state.fail_next_video {
            state.fail_next_video = false;
            self.failed = true;
            return Err(EncoderError::Write {
                track: "video",
                message: "disk full".to_string(),
            });
        }
        state.video.push((pts, frame.pts));
        Ok(())
    }

    fn append_audio(&mut self, buffer: &AudioBuffer, pts: f64) -> Result<(), EncoderError> {
        let mut state = self.state.lock();
        assert!(state.audio_ready, "audio appended while the encoder was not ready");
        state.audio.push((pts, buffer.pts));
        Ok(())
    }

    async fn finish(self: Box<Self>) -> Result<PathBuf, EncoderError> {
        let (gate, skip) = {
            let mut state = self.state.lock();
            state.finish_calls += 1;
            (state.finish_gate.clone(), state.skip_output)
        };
        if let Some(gate) = gate {
            gate.notified().await;
        }
        if !skip {
            tokio::fs::write(&self.output, b"fake container").await?;
        }
        Ok(self.output.clone())
    }
}
