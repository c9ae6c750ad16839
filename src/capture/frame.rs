//! Raw capture buffers

use serde::{Deserialize, Serialize};
use std::borrow::Cow;

/// Camera pixel layouts the pipeline accepts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PixelFormat {
    Rgba8,
    Bgra8,
}

impl PixelFormat {
    pub fn bytes_per_pixel(&self) -> usize {
        4
    }

    /// Byte offsets of (r, g, b, a) within a pixel
    pub fn channel_order(&self) -> [usize; 4] {
        match self {
            PixelFormat::Rgba8 => [0, 1, 2, 3],
            PixelFormat::Bgra8 => [2, 1, 0, 3],
        }
    }

    /// FFmpeg `-pixel_format` name
    pub fn ffmpeg_name(&self) -> &'static str {
        match self {
            PixelFormat::Rgba8 => "rgba",
            PixelFormat::Bgra8 => "bgra",
        }
    }
}

/// One camera frame
#[derive(Debug, Clone, PartialEq)]
pub struct CameraFrame {
    pub width: u32,
    pub height: u32,
    /// Bytes per row, at least `width * 4`
    pub stride: usize,
    pub format: PixelFormat,
    pub data: Vec<u8>,
    /// Presentation timestamp, media clock seconds
    pub pts: f64,
}

impl CameraFrame {
    /// Black, opaque, tightly packed frame
    pub fn new(width: u32, height: u32, format: PixelFormat, pts: f64) -> Self {
        let stride = width as usize * format.bytes_per_pixel();
        let mut data = vec![0u8; stride * height as usize];
        let alpha = format.channel_order()[3];
        for px in data.chunks_mut(4) {
            px[alpha] = 255;
        }
        Self {
            width,
            height,
            stride,
            format,
            data,
            pts,
        }
    }

    /// Whether `data` is large enough for the declared geometry
    pub fn is_valid(&self) -> bool {
        self.stride >= self.width as usize * self.format.bytes_per_pixel()
            && self.data.len() >= self.stride * self.height as usize
    }

    /// Pixel rows without stride padding, or None when `data` is too short
    pub fn packed(&self) -> Option<Cow<'_, [u8]>> {
        if !self.is_valid() {
            return None;
        }
        let row = self.width as usize * self.format.bytes_per_pixel();
        if self.stride == row {
            return Some(Cow::Borrowed(&self.data[..row * self.height as usize]));
        }
        let mut out = Vec::with_capacity(row * self.height as usize);
        for y in 0..self.height as usize {
            out.extend_from_slice(&self.data[y * self.stride..y * self.stride + row]);
        }
        Some(Cow::Owned(out))
    }

    /// (r, g, b, a) at a pixel, regardless of layout
    pub fn rgba_at(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let idx = y as usize * self.stride + x as usize * 4;
        let px = self.data.get(idx..idx + 4)?;
        let [r, g, b, a] = self.format.channel_order();
        Some([px[r], px[g], px[b], px[a]])
    }
}

/// Interleaved signed 16-bit PCM
#[derive(Debug, Clone, PartialEq)]
pub struct AudioBuffer {
    pub samples: Vec<i16>,
    pub channels: u16,
    pub sample_rate: u32,
    /// Presentation timestamp of the first frame, media clock seconds
    pub pts: f64,
}

impl AudioBuffer {
    /// Frames (samples per channel)
    pub fn frames(&self) -> usize {
        self.samples.len() / self.channels.max(1) as usize
    }

    pub fn duration_secs(&self) -> f64 {
        self.frames() as f64 / self.sample_rate.max(1) as f64
    }

    pub fn to_le_bytes(&self) -> Vec<u8> {
        self.samples.iter().flat_map(|s| s.to_le_bytes()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bgra_channel_order() {
        let mut frame = CameraFrame::new(2, 1, PixelFormat::Bgra8, 0.0);
        frame.data[0..4].copy_from_slice(&[10, 20, 30, 255]);
        assert_eq!(frame.rgba_at(0, 0), Some([30, 20, 10, 255]));
        assert_eq!(frame.rgba_at(1, 0), Some([0, 0, 0, 255]));
        assert_eq!(frame.rgba_at(2, 0), None);
    }

    #[test]
    fn test_packed_strips_row_padding() {
        let frame = CameraFrame {
            width: 1,
            height: 2,
            stride: 8,
            format: PixelFormat::Rgba8,
            data: vec![1, 2, 3, 4, 0, 0, 0, 0, 5, 6, 7, 8, 0, 0, 0, 0],
            pts: 0.0,
        };
        assert!(frame.is_valid());
        assert_eq!(frame.packed().unwrap().as_ref(), &[1, 2, 3, 4, 5, 6, 7, 8]);
    }

    #[test]
    fn test_short_frame_has_no_packed_rows() {
        let mut frame = CameraFrame::new(4, 4, PixelFormat::Rgba8, 0.0);
        frame.data.truncate(10);
        assert!(!frame.is_valid());
        assert!(frame.packed().is_none());

        let mut narrow = CameraFrame::new(4, 4, PixelFormat::Rgba8, 0.0);
        narrow.stride = 8;
        assert!(narrow.packed().is_none());
    }

    #[test]
    fn test_audio_duration() {
        let buffer = AudioBuffer {
            samples: vec![0; 44_100 * 2],
            channels: 2,
            sample_rate: 44_100,
            pts: 0.0,
        };
        assert_eq!(buffer.frames(), 44_100);
        assert!((buffer.duration_secs() - 1.0).abs() < 1e-12);
        assert_eq!(buffer.to_le_bytes().len(), 44_100 * 4);
    }
}
