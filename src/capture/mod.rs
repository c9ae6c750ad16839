//! Camera and microphone capture plumbing
//!
//! Device access lives outside this crate; capture callbacks hand their
//! buffers to a [`CaptureWorker`] and return immediately.

pub mod frame;
pub mod synthetic;
pub mod worker;

pub use frame::{AudioBuffer, CameraFrame, PixelFormat};
pub use synthetic::{TestPatternCamera, ToneGenerator};
pub use worker::{CaptureWorker, WorkerSender, WorkerStats};
