//! Straight-alpha blit of an RGBA bitmap into a camera buffer

use crate::capture::PixelFormat;
use crate::config::OverlayAnchor;
use crate::overlay::Bitmap;
use serde::{Deserialize, Serialize};

/// Destination rectangle in frame pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl Rect {
    pub fn new(x: i32, y: i32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// A `width` x `height` rectangle `margin` pixels in from a frame corner
    pub fn anchored(
        frame_width: u32,
        frame_height: u32,
        width: u32,
        height: u32,
        anchor: OverlayAnchor,
        margin: u32,
    ) -> Self {
        let left = margin as i32;
        let top = margin as i32;
        let right = frame_width as i32 - width as i32 - margin as i32;
        let bottom = frame_height as i32 - height as i32 - margin as i32;
        let (x, y) = match anchor {
            OverlayAnchor::TopLeft => (left, top),
            OverlayAnchor::TopRight => (right, top),
            OverlayAnchor::BottomLeft => (left, bottom),
            OverlayAnchor::BottomRight => (right, bottom),
        };
        Self::new(x, y, width, height)
    }
}

/// Target buffer of a blit
pub struct BlitTarget<'a> {
    pub data: &'a mut [u8],
    pub width: u32,
    pub height: u32,
    pub stride: usize,
    pub format: PixelFormat,
}

/// Composite `src` over the target at `rect`, clipped to the target
///
/// The bitmap is scaled nearest-neighbour when `rect` differs from its size.
/// Destination alpha is left untouched. Returns the number of pixels changed.
pub fn alpha_blit(target: BlitTarget<'_>, src: &Bitmap, rect: Rect) -> usize {
    if rect.width == 0 || rect.height == 0 || src.width() == 0 || src.height() == 0 {
        return 0;
    }

    let x0 = rect.x.max(0);
    let y0 = rect.y.max(0);
    let x1 = (rect.x + rect.width as i32).min(target.width as i32);
    let y1 = (rect.y + rect.height as i32).min(target.height as i32);
    if x0 >= x1 || y0 >= y1 {
        return 0;
    }

    let [ri, gi, bi, _] = target.format.channel_order();
    let pixels = src.pixels();
    let src_width = src.width() as usize;
    let mut changed = 0;

    for fy in y0..y1 {
        let dy = (fy - rect.y) as u64;
        let sy = ((dy * src.height() as u64 / rect.height as u64) as usize).min(src.height() as usize - 1);
        let row = fy as usize * target.stride;

        for fx in x0..x1 {
            let dx = (fx - rect.x) as u64;
            let sx = ((dx * src.width() as u64 / rect.width as u64) as usize).min(src_width - 1);

            let src_idx = (sy * src_width + sx) * 4;
            let dst_idx = row + fx as usize * 4;
            if src_idx + 3 >= pixels.len() || dst_idx + 3 >= target.data.len() {
                continue;
            }

            let src_a = pixels[src_idx + 3] as f32 / 255.0;
            if src_a < 0.01 {
                continue;
            }

            for (s, d) in [(0, ri), (1, gi), (2, bi)] {
                let src_c = pixels[src_idx + s] as f32;
                let dst_c = target.data[dst_idx + d] as f32;
                let out = src_c * src_a + dst_c * (1.0 - src_a);
                target.data[dst_idx + d] = out.round().clamp(0.0, 255.0) as u8;
            }
            changed += 1;
        }
    }
    changed
}
