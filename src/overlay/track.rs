//! Track mini-map
//!
//! A track outline is projected into a square map: the longer of the two
//! geographic spans gets `TRACK_WIDTH` pixels (the other is scaled by the
//! span ratio), a padding of 1/20 of the longer side is added all round, and
//! the shorter side is centred. The outline is drawn as a closed polyline.

use super::image::{Bitmap, ImageError, Rgba, WHITE};
use quick_xml::events::Event;
use quick_xml::Reader;
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// Pixel width of the track's longitude span before padding
pub const TRACK_WIDTH: f64 = 500.0;

/// Map background, translucent white
pub const MAP_FILL: Rgba = [255, 255, 255, 150];

#[derive(Error, Debug)]
pub enum TrackMapError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Could not parse track outline: {0}")]
    Parse(String),

    #[error("A track needs at least 2 points, got {0}")]
    TooFewPoints(usize),

    #[error("Track has zero extent in latitude or longitude")]
    Degenerate,

    #[error(transparent)]
    Image(#[from] ImageError),
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrackPoint {
    pub latitude: f64,
    pub longitude: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackBounds {
    pub min_latitude: f64,
    pub max_latitude: f64,
    pub min_longitude: f64,
    pub max_longitude: f64,
}

impl TrackBounds {
    fn of(points: &[TrackPoint]) -> Self {
        let mut bounds = TrackBounds {
            min_latitude: f64::INFINITY,
            max_latitude: f64::NEG_INFINITY,
            min_longitude: f64::INFINITY,
            max_longitude: f64::NEG_INFINITY,
        };
        for p in points {
            bounds.min_latitude = bounds.min_latitude.min(p.latitude);
            bounds.max_latitude = bounds.max_latitude.max(p.latitude);
            bounds.min_longitude = bounds.min_longitude.min(p.longitude);
            bounds.max_longitude = bounds.max_longitude.max(p.longitude);
        }
        bounds
    }

    pub fn latitude_span(&self) -> f64 {
        self.max_latitude - self.min_latitude
    }

    pub fn longitude_span(&self) -> f64 {
        self.max_longitude - self.min_longitude
    }
}

/// Projected point as stored in the coordinates file
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectedPoint {
    pub latitude: f64,
    pub longitude: f64,
    /// Fraction of the track width, 0 at the western edge
    pub offset_x_scale: f64,
    /// Fraction of the track height, 0 at the northern edge
    pub offset_y_scale: f64,
}

/// On-disk coordinates file written next to a rendered map
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackCoordinates {
    pub coordinates: Vec<ProjectedPoint>,
    pub track_width_padding: f64,
    pub track_height_padding: f64,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum TrackFile {
    Coordinates(TrackCoordinates),
    Points(Vec<TrackPoint>),
}

#[derive(Debug, Clone)]
pub struct TrackMap {
    points: Vec<TrackPoint>,
    bounds: TrackBounds,
    track_width: f64,
    track_height: f64,
    width_padding: f64,
    height_padding: f64,
    map_size: u32,
    line_width: f32,
}

impl TrackMap {
    pub fn from_points(points: Vec<TrackPoint>) -> Result<Self, TrackMapError> {
        if points.len() < 2 {
            return Err(TrackMapError::TooFewPoints(points.len()));
        }
        let bounds = TrackBounds::of(&points);
        let lat_span = bounds.latitude_span();
        let lon_span = bounds.longitude_span();
        if !(lat_span > 0.0 && lon_span > 0.0) || !(lat_span.is_finite() && lon_span.is_finite()) {
            return Err(TrackMapError::Degenerate);
        }

        let track_width = TRACK_WIDTH;
        let track_height = (track_width * lat_span / lon_span).round();
        let padding = track_width.max(track_height) / 20.0;
        let mut width_padding = padding;
        let mut height_padding = padding;

        let (map_size, line_width) = if track_width >= track_height {
            height_padding += (track_width - track_height) / 2.0;
            (track_width + padding * 2.0, (track_width / 50.0).floor())
        } else {
            width_padding += (track_height - track_width) / 2.0;
            (track_height + padding * 2.0, (track_height / 50.0).floor())
        };

        tracing::debug!(
            "Track map: {} points, {}x{} track, {}px square map",
            points.len(),
            track_width,
            track_height,
            map_size
        );

        Ok(Self {
            points,
            bounds,
            track_width,
            track_height,
            width_padding,
            height_padding,
            map_size: map_size as u32,
            line_width: line_width.max(1.0) as f32,
        })
    }

    /// Parse the first `coordinates` element of a KML document
    ///
    /// KML tuples are `longitude,latitude[,altitude]` separated by whitespace.
    /// The element is matched by local name, so `<kml:coordinates>` works too.
    pub fn from_kml(kml: &str) -> Result<Self, TrackMapError> {
        let body = kml_coordinates(kml)?
            .ok_or_else(|| TrackMapError::Parse("no <coordinates> element".to_string()))?;

        let mut points = Vec::new();
        for tuple in body.split_whitespace() {
            let mut parts = tuple.split(',');
            let (Some(lon), Some(lat)) = (parts.next(), parts.next()) else {
                return Err(TrackMapError::Parse(format!("bad coordinate tuple {:?}", tuple)));
            };
            let longitude: f64 = lon
                .trim()
                .parse()
                .map_err(|_| TrackMapError::Parse(format!("bad longitude {:?}", lon)))?;
            let latitude: f64 = lat
                .trim()
                .parse()
                .map_err(|_| TrackMapError::Parse(format!("bad latitude {:?}", lat)))?;
            points.push(TrackPoint {
                latitude,
                longitude,
            });
        }
        Self::from_points(points)
    }

    /// Load a `.kml` outline, or a JSON coordinates file / point list
    pub fn load(path: &Path) -> Result<Self, TrackMapError> {
        let content = std::fs::read_to_string(path)?;
        let is_kml = path
            .extension()
            .map(|ext| ext.eq_ignore_ascii_case("kml"))
            .unwrap_or(false);
        if is_kml {
            return Self::from_kml(&content);
        }

        let points = match serde_json::from_str::<TrackFile>(&content)? {
            TrackFile::Coordinates(file) => file
                .coordinates
                .into_iter()
                .map(|p| TrackPoint {
                    latitude: p.latitude,
                    longitude: p.longitude,
                })
                .collect(),
            TrackFile::Points(points) => points,
        };
        Self::from_points(points)
    }

    pub fn points(&self) -> &[TrackPoint] {
        &self.points
    }

    pub fn bounds(&self) -> TrackBounds {
        self.bounds
    }

    /// Side length of the square map in pixels
    pub fn map_size(&self) -> u32 {
        self.map_size
    }

    pub fn line_width(&self) -> f32 {
        self.line_width
    }

    pub fn paddings(&self) -> (f64, f64) {
        (self.width_padding, self.height_padding)
    }

    fn offset_scales(&self, latitude: f64, longitude: f64) -> (f64, f64) {
        let x = (longitude - self.bounds.min_longitude).abs() / self.bounds.longitude_span();
        let y = (latitude - self.bounds.max_latitude).abs() / self.bounds.latitude_span();
        (x, y)
    }

    /// Pixel position of a coordinate on the full-size map
    pub fn project(&self, latitude: f64, longitude: f64) -> (f64, f64) {
        let (x, y) = self.offset_scales(latitude, longitude);
        (
            x * self.track_width + self.width_padding,
            y * self.track_height + self.height_padding,
        )
    }

    /// Pixel position on a map rendered at `size` pixels
    pub fn project_scaled(&self, latitude: f64, longitude: f64, size: u32) -> (f64, f64) {
        let scale = size as f64 / self.map_size as f64;
        let (x, y) = self.project(latitude, longitude);
        (x * scale, y * scale)
    }

    /// Full-size map
    pub fn render(&self) -> Bitmap {
        self.render_at(self.map_size)
    }

    /// Map scaled to `size` x `size` pixels
    pub fn render_at(&self, size: u32) -> Bitmap {
        let scale = size as f64 / self.map_size as f64;
        let width = (self.line_width * scale as f32).max(1.5);
        let mut bitmap = Bitmap::filled(size, size, MAP_FILL);

        let n = self.points.len();
        for i in 0..n {
            let a = self.points[i];
            let b = self.points[(i + 1) % n];
            let (ax, ay) = self.project_scaled(a.latitude, a.longitude, size);
            let (bx, by) = self.project_scaled(b.latitude, b.longitude, size);
            bitmap.draw_line((ax as f32, ay as f32), (bx as f32, by as f32), width, WHITE);
        }
        bitmap
    }

    pub fn coordinates(&self) -> TrackCoordinates {
        TrackCoordinates {
            coordinates: self
                .points
                .iter()
                .map(|p| {
                    let (x, y) = self.offset_scales(p.latitude, p.longitude);
                    ProjectedPoint {
                        latitude: p.latitude,
                        longitude: p.longitude,
                        offset_x_scale: x,
                        offset_y_scale: y,
                    }
                })
                .collect(),
            track_width_padding: self.width_padding,
            track_height_padding: self.height_padding,
        }
    }

    pub fn save_png(&self, path: &Path) -> Result<(), TrackMapError> {
        self.render().save_png(path)?;
        Ok(())
    }

    pub fn save_coordinates(&self, path: &Path) -> Result<(), TrackMapError> {
        let json = serde_json::to_string_pretty(&self.coordinates())?;
        std::fs::write(path, json)?;
        Ok(())
    }
}

/// Text of the first `coordinates` element, if any
fn kml_coordinates(kml: &str) -> Result<Option<String>, TrackMapError> {
    let mut reader = Reader::from_str(kml);
    reader.config_mut().trim_text(true);

    let mut inside = false;
    let mut body = String::new();
    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) if e.local_name().as_ref() == b"coordinates" => inside = true,
            Ok(Event::Empty(e)) if e.local_name().as_ref() == b"coordinates" => return Ok(Some(body)),
            Ok(Event::Text(t)) if inside => {
                let text = t
                    .unescape()
                    .map_err(|e| TrackMapError::Parse(format!("bad coordinates text: {}", e)))?;
                body.push_str(&text);
                body.push(' ');
            }
            Ok(Event::CData(c)) if inside => {
                body.push_str(&String::from_utf8_lossy(&c.into_inner()));
                body.push(' ');
            }
            Ok(Event::End(e)) if inside && e.local_name().as_ref() == b"coordinates" => return Ok(Some(body)),
            Ok(Event::Eof) => {
                return if inside {
                    Err(TrackMapError::Parse("missing </coordinates>".to_string()))
                } else {
                    Ok(None)
                };
            }
            Err(e) => {
                return Err(TrackMapError::Parse(format!(
                    "invalid KML at byte {}: {}",
                    reader.buffer_position(),
                    e
                )))
            }
            _ => {}
        }
    }
}
