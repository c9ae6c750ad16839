//! Shared media clock
//!
//! Camera, audio, sensor and overlay timestamps are all seconds on this one
//! monotonic clock.

use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy)]
pub struct MediaClock {
    origin: Instant,
}

impl MediaClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }

    /// Seconds since the clock was created
    pub fn now_secs(&self) -> f64 {
        self.origin.elapsed().as_secs_f64()
    }

    pub fn elapsed(&self) -> Duration {
        self.origin.elapsed()
    }
}

impl Default for MediaClock {
    fn default() -> Self {
        Self::new()
    }
}
