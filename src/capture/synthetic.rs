//! Synthetic camera and microphone
//!
//! Stand-ins for device capture used by the demo binary and tests. Both run
//! on a tokio interval and hand buffers to a [`WorkerSender`] exactly like a
//! device callback would.

use super::frame::{AudioBuffer, CameraFrame, PixelFormat};
use super::worker::WorkerSender;
use crate::clock::MediaClock;
use std::f64::consts::PI;
use tokio::time::{interval, Duration, Instant, MissedTickBehavior};

/// Moving colour bars
#[derive(Debug, Clone)]
pub struct TestPatternCamera {
    width: u32,
    height: u32,
    format: PixelFormat,
    fps: u32,
    frame_index: u64,
}

impl TestPatternCamera {
    pub fn new(width: u32, height: u32, fps: u32, format: PixelFormat) -> Self {
        Self {
            width,
            height,
            format,
            fps: fps.max(1),
            frame_index: 0,
        }
    }

    pub fn next_frame(&mut self, pts: f64) -> CameraFrame {
        let mut frame = CameraFrame::new(self.width, self.height, self.format, pts);
        let [ri, gi, bi, _] = self.format.channel_order();
        let shift = (self.frame_index * 4) as u32;
        let bar_width = (self.width / 8).max(1);

        for y in 0..self.height {
            let row = y as usize * frame.stride;
            let shade = (y * 160 / self.height.max(1)) as u8;
            for x in 0..self.width {
                let idx = row + x as usize * 4;
                let bar = ((x + shift) / bar_width) % 8;
                frame.data[idx + ri] = if bar & 1 != 0 { 200 } else { shade };
                frame.data[idx + gi] = if bar & 2 != 0 { 200 } else { shade };
                frame.data[idx + bi] = if bar & 4 != 0 { 200 } else { shade };
            }
        }
        self.frame_index += 1;
        frame
    }

    /// Produce frames at the camera rate for `duration`, returning how many were made
    pub async fn run(mut self, sender: WorkerSender<CameraFrame>, clock: MediaClock, duration: Duration) -> u64 {
        let mut ticker = interval(Duration::from_secs_f64(1.0 / self.fps as f64));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let deadline = Instant::now() + duration;
        let mut produced = 0;

        while Instant::now() < deadline {
            ticker.tick().await;
            let frame = self.next_frame(clock.now_secs());
            sender.submit(frame);
            produced += 1;
        }
        tracing::debug!("[camera] produced {} frames, {} dropped", produced, sender.dropped());
        produced
    }
}

/// Sine tone in fixed-size buffers
#[derive(Debug, Clone)]
pub struct ToneGenerator {
    channels: u16,
    sample_rate: u32,
    frequency: f64,
    amplitude: f64,
    phase: f64,
}

impl ToneGenerator {
    pub fn new(channels: u16, sample_rate: u32, frequency: f64) -> Self {
        Self {
            channels: channels.max(1),
            sample_rate: sample_rate.max(1),
            frequency,
            amplitude: 0.2,
            phase: 0.0,
        }
    }

    pub fn next_buffer(&mut self, frames: usize, pts: f64) -> AudioBuffer {
        let step = 2.0 * PI * self.frequency / self.sample_rate as f64;
        let mut samples = Vec::with_capacity(frames * self.channels as usize);
        for _ in 0..frames {
            let value = (self.phase.sin() * self.amplitude * i16::MAX as f64) as i16;
            for _ in 0..self.channels {
                samples.push(value);
            }
            self.phase = (self.phase + step) % (2.0 * PI);
        }
        AudioBuffer {
            samples,
            channels: self.channels,
            sample_rate: self.sample_rate,
            pts,
        }
    }

    /// Produce `frames_per_buffer` sized buffers in real time for `duration`
    pub async fn run(
        mut self,
        sender: WorkerSender<AudioBuffer>,
        clock: MediaClock,
        duration: Duration,
        frames_per_buffer: usize,
    ) -> u64 {
        let period = frames_per_buffer as f64 / self.sample_rate as f64;
        let mut ticker = interval(Duration::from_secs_f64(period));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let deadline = Instant::now() + duration;
        let mut produced = 0;

        while Instant::now() < deadline {
            ticker.tick().await;
            let buffer = self.next_buffer(frames_per_buffer, clock.now_secs());
            sender.submit(buffer);
            produced += 1;
        }
        tracing::debug!("[microphone] produced {} buffers, {} dropped", produced, sender.dropped());
        produced
    }
}
