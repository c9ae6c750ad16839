//! RGBA bitmaps
//!
//! Straight (non-premultiplied) alpha, row-major, 4 bytes per pixel with no
//! row padding. PNG load/save goes through the `png` crate.

use std::fs::File;
use std::io::BufWriter;
use std::path::Path;
use thiserror::Error;

/// Bitmap and PNG errors
#[derive(Error, Debug)]
pub enum ImageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("PNG decode error: {0}")]
    Decode(String),

    #[error("PNG encode error: {0}")]
    Encode(String),

    #[error("Unsupported PNG color type: {0}")]
    UnsupportedColor(String),

    #[error("Buffer of {len} bytes does not hold a {width}x{height} RGBA image")]
    InvalidDimensions { width: u32, height: u32, len: usize },
}

/// RGBA color, straight alpha
pub type Rgba = [u8; 4];

pub const TRANSPARENT: Rgba = [0, 0, 0, 0];
pub const WHITE: Rgba = [255, 255, 255, 255];
pub const BLACK: Rgba = [0, 0, 0, 255];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bitmap {
    width: u32,
    height: u32,
    data: Vec<u8>,
}

impl Bitmap {
    /// Fully transparent bitmap
    pub fn new(width: u32, height: u32) -> Self {
        Self::filled(width, height, TRANSPARENT)
    }

    pub fn filled(width: u32, height: u32, color: Rgba) -> Self {
        let mut data = Vec::with_capacity(width as usize * height as usize * 4);
        for _ in 0..(width as usize * height as usize) {
            data.extend_from_slice(&color);
        }
        Self {
            width,
            height,
            data,
        }
    }

    pub fn from_rgba(width: u32, height: u32, data: Vec<u8>) -> Result<Self, ImageError> {
        if data.len() != width as usize * height as usize * 4 {
            return Err(ImageError::InvalidDimensions {
                width,
                height,
                len: data.len(),
            });
        }
        Ok(Self {
            width,
            height,
            data,
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn pixels(&self) -> &[u8] {
        &self.data
    }

    fn index(&self, x: i32, y: i32) -> Option<usize> {
        if x < 0 || y < 0 || x >= self.width as i32 || y >= self.height as i32 {
            return None;
        }
        Some((y as usize * self.width as usize + x as usize) * 4)
    }

    pub fn pixel(&self, x: u32, y: u32) -> Option<Rgba> {
        let idx = self.index(x as i32, y as i32)?;
        Some([
            self.data[idx],
            self.data[idx + 1],
            self.data[idx + 2],
            self.data[idx + 3],
        ])
    }

    /// Overwrite a pixel; out-of-bounds writes are ignored
    pub fn put_pixel(&mut self, x: i32, y: i32, color: Rgba) {
        if let Some(idx) = self.index(x, y) {
            self.data[idx..idx + 4].copy_from_slice(&color);
        }
    }

    /// Source-over a pixel; out-of-bounds writes are ignored
    pub fn blend_pixel(&mut self, x: i32, y: i32, color: Rgba) {
        let Some(idx) = self.index(x, y) else {
            return;
        };

        let src_a = color[3] as f32 / 255.0;
        if src_a < 0.01 {
            return;
        }
        let dst_a = self.data[idx + 3] as f32 / 255.0;
        let out_a = src_a + dst_a * (1.0 - src_a);

        for c in 0..3 {
            let src = color[c] as f32;
            let dst = self.data[idx + c] as f32;
            let out = (src * src_a + dst * dst_a * (1.0 - src_a)) / out_a;
            self.data[idx + c] = out.round().clamp(0.0, 255.0) as u8;
        }
        self.data[idx + 3] = (out_a * 255.0).round().clamp(0.0, 255.0) as u8;
    }

    pub fn fill_rect(&mut self, x: i32, y: i32, width: u32, height: u32, color: Rgba) {
        for py in y..y + height as i32 {
            for px in x..x + width as i32 {
                self.blend_pixel(px, py, color);
            }
        }
    }

    pub fn fill_circle(&mut self, cx: f32, cy: f32, radius: f32, color: Rgba) {
        let r2 = radius * radius;
        let x0 = (cx - radius).floor() as i32;
        let x1 = (cx + radius).ceil() as i32;
        let y0 = (cy - radius).floor() as i32;
        let y1 = (cy + radius).ceil() as i32;
        for py in y0..=y1 {
            for px in x0..=x1 {
                let dx = px as f32 + 0.5 - cx;
                let dy = py as f32 + 0.5 - cy;
                if dx * dx + dy * dy <= r2 {
                    self.blend_pixel(px, py, color);
                }
            }
        }
    }

    /// Ring of the given thickness centred on `radius`
    pub fn stroke_circle(&mut self, cx: f32, cy: f32, radius: f32, thickness: f32, color: Rgba) {
        let outer = radius + thickness / 2.0;
        let inner = (radius - thickness / 2.0).max(0.0);
        let x0 = (cx - outer).floor() as i32;
        let x1 = (cx + outer).ceil() as i32;
        let y0 = (cy - outer).floor() as i32;
        let y1 = (cy + outer).ceil() as i32;
        for py in y0..=y1 {
            for px in x0..=x1 {
                let dx = px as f32 + 0.5 - cx;
                let dy = py as f32 + 0.5 - cy;
                let d2 = dx * dx + dy * dy;
                if d2 <= outer * outer && d2 >= inner * inner {
                    self.blend_pixel(px, py, color);
                }
            }
        }
    }

    /// Line of `width` pixels with round caps, written opaquely (no blending
    /// between overlapping stamps)
    pub fn draw_line(&mut self, from: (f32, f32), to: (f32, f32), width: f32, color: Rgba) {
        let radius = (width / 2.0).max(0.5);
        let (dx, dy) = (to.0 - from.0, to.1 - from.1);
        let len2 = dx * dx + dy * dy;

        let x0 = (from.0.min(to.0) - radius).floor() as i32;
        let x1 = (from.0.max(to.0) + radius).ceil() as i32;
        let y0 = (from.1.min(to.1) - radius).floor() as i32;
        let y1 = (from.1.max(to.1) + radius).ceil() as i32;

        for py in y0..=y1 {
            for px in x0..=x1 {
                let (fx, fy) = (px as f32 + 0.5, py as f32 + 0.5);
                let t = if len2 > 0.0 {
                    (((fx - from.0) * dx + (fy - from.1) * dy) / len2).clamp(0.0, 1.0)
                } else {
                    0.0
                };
                let (nx, ny) = (from.0 + t * dx - fx, from.1 + t * dy - fy);
                if nx * nx + ny * ny <= radius * radius {
                    self.put_pixel(px, py, color);
                }
            }
        }
    }

    /// Source-over another bitmap at (x, y), clipped to this bitmap
    pub fn draw_bitmap(&mut self, src: &Bitmap, x: i32, y: i32) {
        for sy in 0..src.height as i32 {
            for sx in 0..src.width as i32 {
                let idx = (sy as usize * src.width as usize + sx as usize) * 4;
                let color = [
                    src.data[idx],
                    src.data[idx + 1],
                    src.data[idx + 2],
                    src.data[idx + 3],
                ];
                self.blend_pixel(x + sx, y + sy, color);
            }
        }
    }

    /// Write as an 8-bit RGBA PNG
    pub fn save_png(&self, path: &Path) -> Result<(), ImageError> {
        let file = File::create(path)?;
        let mut encoder = png::Encoder::new(BufWriter::new(file), self.width, self.height);
        encoder.set_color(png::ColorType::Rgba);
        encoder.set_depth(png::BitDepth::Eight);

        let mut writer = encoder
            .write_header()
            .map_err(|e| ImageError::Encode(e.to_string()))?;
        writer
            .write_image_data(&self.data)
            .map_err(|e| ImageError::Encode(e.to_string()))?;
        Ok(())
    }

    /// Load a PNG, converting RGB and grayscale to RGBA
    pub fn load_png(path: &Path) -> Result<Self, ImageError> {
        let file = File::open(path)?;
        let mut decoder = png::Decoder::new(file);
        decoder.set_transformations(png::Transformations::EXPAND | png::Transformations::STRIP_16);
        let mut reader = decoder
            .read_info()
            .map_err(|e| ImageError::Decode(e.to_string()))?;

        let mut buf = vec![0; reader.output_buffer_size()];
        let info = reader
            .next_frame(&mut buf)
            .map_err(|e| ImageError::Decode(e.to_string()))?;
        let raw = &buf[..info.buffer_size()];

        let data = match info.color_type {
            png::ColorType::Rgba => raw.to_vec(),
            png::ColorType::Rgb => {
                let mut rgba = Vec::with_capacity(raw.len() / 3 * 4);
                for chunk in raw.chunks(3) {
                    rgba.extend_from_slice(chunk);
                    rgba.push(255);
                }
                rgba
            }
            png::ColorType::Grayscale => raw.iter().flat_map(|&v| [v, v, v, 255]).collect(),
            png::ColorType::GrayscaleAlpha => raw
                .chunks(2)
                .flat_map(|c| [c[0], c[0], c[0], c[1]])
                .collect(),
            other => return Err(ImageError::UnsupportedColor(format!("{:?}", other))),
        };

        Self::from_rgba(info.width, info.height, data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_from_rgba_checks_length() {
        assert!(Bitmap::from_rgba(2, 2, vec![0; 16]).is_ok());
        assert!(matches!(
            Bitmap::from_rgba(2, 2, vec![0; 15]),
            Err(ImageError::InvalidDimensions { .. })
        ));
    }

    #[test]
    fn test_blend_onto_transparent_keeps_source() {
        let mut bitmap = Bitmap::new(1, 1);
        bitmap.blend_pixel(0, 0, [200, 100, 50, 128]);
        assert_eq!(bitmap.pixel(0, 0), Some([200, 100, 50, 128]));
    }

    #[test]
    fn test_blend_half_over_opaque() {
        let mut bitmap = Bitmap::filled(1, 1, [0, 0, 0, 255]);
        bitmap.blend_pixel(0, 0, [255, 255, 255, 127]);
        let [r, _, _, a] = bitmap.pixel(0, 0).unwrap();
        assert_eq!(a, 255);
        assert!((r as i32 - 127).abs() <= 1);
    }

    #[test]
    fn test_out_of_bounds_is_ignored() {
        let mut bitmap = Bitmap::new(4, 4);
        bitmap.put_pixel(-1, 0, WHITE);
        bitmap.put_pixel(4, 4, WHITE);
        bitmap.fill_rect(2, 2, 10, 10, WHITE);
        assert_eq!(bitmap.pixel(3, 3), Some(WHITE));
        assert_eq!(bitmap.pixel(1, 1), Some(TRANSPARENT));
    }

    #[test]
    fn test_draw_line_covers_endpoints() {
        let mut bitmap = Bitmap::new(20, 20);
        bitmap.draw_line((2.5, 10.5), (17.5, 10.5), 3.0, WHITE);
        assert_eq!(bitmap.pixel(2, 10), Some(WHITE));
        assert_eq!(bitmap.pixel(10, 10), Some(WHITE));
        assert_eq!(bitmap.pixel(17, 10), Some(WHITE));
        assert_eq!(bitmap.pixel(10, 2), Some(TRANSPARENT));
    }

    #[test]
    fn test_png_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("overlay.png");

        let mut bitmap = Bitmap::filled(8, 4, [255, 255, 255, 150]);
        bitmap.put_pixel(3, 2, [10, 20, 30, 255]);
        bitmap.save_png(&path).unwrap();

        let loaded = Bitmap::load_png(&path).unwrap();
        assert_eq!(loaded, bitmap);
    }
}
