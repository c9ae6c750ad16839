//! Frame compositing
//!
//! Burns the current overlay snapshot into each camera frame in place. Runs on
//! the video capture worker, one frame at a time in arrival order.

pub mod blit;

pub use blit::{alpha_blit, BlitTarget, Rect};

use crate::capture::CameraFrame;
use crate::config::{OverlayAnchor, OverlayConfig};
use crate::overlay::SnapshotSlot;
use std::sync::Arc;

/// Where the overlay lands in the frame
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Placement {
    /// Snapshot drawn at its own size, `margin` pixels in from a corner
    Anchored { anchor: OverlayAnchor, margin: u32 },
    /// Snapshot scaled into a fixed rectangle
    Fixed(Rect),
}

impl Placement {
    pub fn from_config(config: &OverlayConfig) -> Self {
        Placement::Anchored {
            anchor: config.anchor,
            margin: config.margin,
        }
    }

    fn rect(&self, frame: &CameraFrame, overlay_width: u32, overlay_height: u32) -> Rect {
        match *self {
            Placement::Anchored { anchor, margin } => Rect::anchored(
                frame.width,
                frame.height,
                overlay_width,
                overlay_height,
                anchor,
                margin,
            ),
            Placement::Fixed(rect) => rect,
        }
    }
}

/// Camera frame after compositing
#[derive(Debug, Clone)]
pub struct CompositeFrame {
    pub frame: CameraFrame,
    /// Sequence of the snapshot drawn into the frame, `None` when passed through
    pub overlay_sequence: Option<u64>,
}

impl CompositeFrame {
    pub fn pts(&self) -> f64 {
        self.frame.pts
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CompositorStats {
    pub frames: u64,
    pub composited: u64,
    pub passed_through: u64,
}

pub struct FrameCompositor {
    slot: Arc<SnapshotSlot>,
    placement: Placement,
    stats: CompositorStats,
}

impl FrameCompositor {
    pub fn new(slot: Arc<SnapshotSlot>, placement: Placement) -> Self {
        Self {
            slot,
            placement,
            stats: CompositorStats::default(),
        }
    }

    /// Draw the current snapshot into `frame`
    ///
    /// Without a snapshot, or with a malformed frame, the frame passes
    /// through unchanged.
    pub fn composite(&mut self, mut frame: CameraFrame) -> CompositeFrame {
        self.stats.frames += 1;

        let Some(snapshot) = self.slot.current() else {
            self.stats.passed_through += 1;
            return CompositeFrame {
                frame,
                overlay_sequence: None,
            };
        };

        if !frame.is_valid() {
            if self.stats.passed_through == 0 {
                tracing::warn!(
                    "Passing through malformed {}x{} frame ({} bytes, stride {})",
                    frame.width,
                    frame.height,
                    frame.data.len(),
                    frame.stride
                );
            }
            self.stats.passed_through += 1;
            return CompositeFrame {
                frame,
                overlay_sequence: None,
            };
        }

        let rect = self
            .placement
            .rect(&frame, snapshot.bitmap.width(), snapshot.bitmap.height());
        let target = BlitTarget {
            width: frame.width,
            height: frame.height,
            stride: frame.stride,
            format: frame.format,
            data: &mut frame.data,
        };
        alpha_blit(target, &snapshot.bitmap, rect);
        self.stats.composited += 1;

        CompositeFrame {
            frame,
            overlay_sequence: Some(snapshot.sequence),
        }
    }

    pub fn stats(&self) -> CompositorStats {
        self.stats
    }
}
