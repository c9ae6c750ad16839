//! Telemetry surface drawing
//!
//! The overlay renderer only needs "give me a complete bitmap for this
//! telemetry". [`SoftwareSurface`] is the built-in CPU implementation: a
//! translucent panel with seven-segment speed digits, the coordinates, a
//! g-meter and, when a track is configured, the mini-map with a position
//! marker.

use super::image::{Bitmap, Rgba};
use super::track::TrackMap;
use crate::telemetry::TelemetryState;

const PANEL: Rgba = [0, 0, 0, 140];
const DIGIT: Rgba = [255, 255, 255, 255];
const DIM: Rgba = [190, 190, 190, 255];
const G_RING: Rgba = [255, 255, 255, 200];
const G_DOT: Rgba = [255, 200, 0, 255];
const MARKER: Rgba = [230, 30, 30, 255];

/// g shown at the edge of the g-meter ring
pub const G_METER_RANGE: f64 = 1.5;

/// Anything that can turn the telemetry state into an overlay bitmap
pub trait TelemetrySurface: Send {
    /// Bitmap size in pixels
    fn size(&self) -> (u32, u32);

    /// Draw a complete, self-contained bitmap
    fn draw(&mut self, telemetry: &TelemetryState) -> Bitmap;
}

/// Where each element of the software surface goes
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SurfaceLayout {
    /// Top-left of the speed digits and their height
    pub speed: (i32, i32, u32),
    /// Top-left of the coordinate line and its digit height
    pub coordinates: (i32, i32, u32),
    /// g-meter centre and radius
    pub g_meter: (f32, f32, f32),
    /// Top-left and side of the mini-map
    pub map: Option<(i32, i32, u32)>,
}

pub struct SoftwareSurface {
    width: u32,
    height: u32,
    track: Option<(TrackMap, Bitmap)>,
    layout: SurfaceLayout,
}

impl SoftwareSurface {
    pub fn new(width: u32, height: u32, track: Option<TrackMap>) -> Self {
        let pad = (height / 10).max(2);
        let map_side = if track.is_some() {
            height.saturating_sub(2 * pad)
        } else {
            0
        };
        let radius = height as f32 * 0.25;

        let map = track
            .as_ref()
            .map(|_| (width.saturating_sub(pad + map_side) as i32, pad as i32, map_side));
        let map_left = map.map(|(x, _, _)| x as f32).unwrap_or(width as f32);
        let g_meter = (
            map_left - pad as f32 - radius,
            height as f32 / 2.0,
            radius,
        );

        let layout = SurfaceLayout {
            speed: (pad as i32, pad as i32, (height as f32 * 0.45) as u32),
            coordinates: (
                pad as i32,
                (height as f32 * 0.72) as i32,
                (height as f32 * 0.12).max(5.0) as u32,
            ),
            g_meter,
            map,
        };

        let track = track.map(|t| {
            let bitmap = t.render_at(map_side.max(1));
            (t, bitmap)
        });

        Self {
            width,
            height,
            track,
            layout,
        }
    }

    pub fn layout(&self) -> SurfaceLayout {
        self.layout
    }

    fn draw_speed(&self, bitmap: &mut Bitmap, kmh: f64) {
        let (x, y, h) = self.layout.speed;
        let shown = kmh.round().clamp(0.0, 999.0) as u32;
        let next = draw_text(bitmap, &format!("{:3}", shown), x, y, h, DIGIT);
        // km/h marker: a short bar under the last digit
        let bar = (h / 10).max(1);
        bitmap.fill_rect(next, y + h as i32 - bar as i32, h / 3, bar, DIM);
    }

    fn draw_coordinates(&self, bitmap: &mut Bitmap, telemetry: &TelemetryState) {
        let (x, y, h) = self.layout.coordinates;
        let text = match telemetry.fix {
            Some(fix) => format!("{:.5} {:.5}", fix.latitude, fix.longitude),
            None => "--.----- ---.-----".to_string(),
        };
        draw_text(bitmap, &text, x, y, h, DIM);
    }

    fn draw_g_meter(&self, bitmap: &mut Bitmap, g: f64) {
        let (cx, cy, r) = self.layout.g_meter;
        bitmap.stroke_circle(cx, cy, r, 2.0, G_RING);
        bitmap.stroke_circle(cx, cy, r / 2.0, 1.0, G_RING);
        // Braking pushes the dot down, accelerating pulls it up
        let offset = (g / G_METER_RANGE).clamp(-1.0, 1.0) as f32 * r;
        bitmap.fill_circle(cx, cy + offset, (r / 8.0).max(2.0), G_DOT);
    }

    fn draw_map(&self, bitmap: &mut Bitmap, telemetry: &TelemetryState) {
        let (Some((track, map_bitmap)), Some((x, y, side))) = (&self.track, self.layout.map) else {
            return;
        };
        bitmap.draw_bitmap(map_bitmap, x, y);
        if let Some(fix) = telemetry.fix {
            let (mx, my) = track.project_scaled(fix.latitude, fix.longitude, side);
            bitmap.fill_circle(
                x as f32 + mx as f32,
                y as f32 + my as f32,
                (side as f32 / 30.0).max(3.0),
                MARKER,
            );
        }
    }
}

impl TelemetrySurface for SoftwareSurface {
    fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn draw(&mut self, telemetry: &TelemetryState) -> Bitmap {
        let mut bitmap = Bitmap::filled(self.width, self.height, PANEL);
        self.draw_speed(&mut bitmap, telemetry.speed.value);
        self.draw_coordinates(&mut bitmap, telemetry);
        self.draw_g_meter(&mut bitmap, telemetry.g_force);
        self.draw_map(&mut bitmap, telemetry);
        bitmap
    }
}

// Segment bits: a=top b=upper right c=lower right d=bottom e=lower left f=upper left g=middle
fn segments(c: char) -> Option<u8> {
    let mask = match c {
        '0' => 0b0111111,
        '1' => 0b0000110,
        '2' => 0b1011011,
        '3' => 0b1001111,
        '4' => 0b1100110,
        '5' => 0b1101101,
        '6' => 0b1111101,
        '7' => 0b0000111,
        '8' => 0b1111111,
        '9' => 0b1101111,
        '-' => 0b1000000,
        _ => return None,
    };
    Some(mask)
}

fn draw_digit(bitmap: &mut Bitmap, mask: u8, x: i32, y: i32, w: u32, h: u32, color: Rgba) {
    let t = (h / 8).max(1);
    let half = h / 2;
    let (wi, ti, hi, halfi) = (w as i32, t as i32, h as i32, half as i32);
    let rects = [
        (x, y, w, t),
        (x + wi - ti, y, t, half),
        (x + wi - ti, y + halfi, t, h - half),
        (x, y + hi - ti, w, t),
        (x, y + halfi, t, h - half),
        (x, y, t, half),
        (x, y + halfi - ti / 2, w, t),
    ];
    for (bit, (rx, ry, rw, rh)) in rects.into_iter().enumerate() {
        if mask & (1 << bit) != 0 {
            bitmap.fill_rect(rx, ry, rw, rh, color);
        }
    }
}

/// Seven-segment text; returns the x just past the last glyph
fn draw_text(bitmap: &mut Bitmap, text: &str, x: i32, y: i32, h: u32, color: Rgba) -> i32 {
    let w = (h / 2).max(1);
    let gap = (h / 5).max(1) as i32;
    let t = (h / 8).max(1);
    let mut cursor = x;
    for c in text.chars() {
        match c {
            '.' => {
                bitmap.fill_rect(cursor, y + h as i32 - t as i32, t, t, color);
                cursor += t as i32 + gap;
            }
            ' ' => cursor += w as i32 + gap,
            _ => {
                if let Some(mask) = segments(c) {
                    draw_digit(bitmap, mask, cursor, y, w, h, color);
                }
                cursor += w as i32 + gap;
            }
        }
    }
    cursor
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::overlay::track::TrackPoint;
    use crate::telemetry::{LocationFix, SpeedEstimate};

    fn telemetry(kmh: f64, g: f64, fix: Option<LocationFix>) -> TelemetryState {
        TelemetryState {
            speed: SpeedEstimate {
                value: kmh,
                timestamp: 0.0,
            },
            fix,
            g_force: g,
            peak_g: g.abs(),
            inertial_available: true,
        }
    }

    fn track() -> TrackMap {
        TrackMap::from_points(vec![
            TrackPoint { latitude: 0.0, longitude: 0.0 },
            TrackPoint { latitude: 0.0, longitude: 0.01 },
            TrackPoint { latitude: 0.01, longitude: 0.01 },
            TrackPoint { latitude: 0.01, longitude: 0.0 },
        ])
        .unwrap()
    }

    #[test]
    fn test_bitmap_matches_surface_size() {
        let mut surface = SoftwareSurface::new(480, 200, None);
        let bitmap = surface.draw(&TelemetryState::default());
        assert_eq!((bitmap.width(), bitmap.height()), surface.size());
        assert!(surface.layout().map.is_none());
    }

    #[test]
    fn test_speed_digits_change_the_bitmap() {
        let mut surface = SoftwareSurface::new(480, 200, None);
        let slow = surface.draw(&telemetry(0.0, 0.0, None));
        let fast = surface.draw(&telemetry(188.0, 0.0, None));
        assert_ne!(slow, fast);

        // The middle segment of the leading "1" column is lit only for 188
        let (x, y, h) = surface.layout().speed;
        let mid_y = (y + h as i32 / 2) as u32;
        let w = h / 2;
        let first_digit_centre = (x + w as i32 / 2) as u32;
        assert_eq!(slow.pixel(first_digit_centre, mid_y), Some(PANEL));
        assert_eq!(fast.pixel(first_digit_centre, mid_y), Some(PANEL));
        let second_digit_centre = first_digit_centre + w + (h / 5).max(1);
        assert_eq!(fast.pixel(second_digit_centre, mid_y), Some(DIGIT));
    }

    #[test]
    fn test_g_dot_moves_with_braking() {
        let mut surface = SoftwareSurface::new(480, 200, None);
        let (cx, cy, r) = surface.layout().g_meter;
        let braking = surface.draw(&telemetry(50.0, G_METER_RANGE / 2.0, None));
        let below = (cy + r / 2.0) as u32;
        assert_eq!(braking.pixel(cx as u32, below), Some(G_DOT));
        assert_ne!(braking.pixel(cx as u32, cy as u32), Some(G_DOT));
    }

    #[test]
    fn test_map_marker_follows_fix() {
        let mut surface = SoftwareSurface::new(480, 200, Some(track()));
        let (x, y, side) = surface.layout().map.unwrap();

        let fix = LocationFix::new(1.0, 0.005, 0.0, 10.0, 0.0);
        let bitmap = surface.draw(&telemetry(36.0, 0.0, Some(fix)));

        let (mx, my) = track().project_scaled(0.005, 0.0, side);
        let px = (x as f64 + mx) as u32;
        let py = (y as f64 + my) as u32;
        assert_eq!(bitmap.pixel(px, py), Some(MARKER));
    }
}
