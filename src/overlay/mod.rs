//! Telemetry overlay: drawing, track mini-map and snapshot publication

pub mod image;
pub mod renderer;
pub mod snapshot;
pub mod surface;
pub mod track;

pub use image::{Bitmap, ImageError};
pub use renderer::{OverlayRenderer, RendererHandle};
pub use snapshot::{OverlaySnapshot, SnapshotSlot};
pub use surface::{SoftwareSurface, TelemetrySurface};
pub use track::{TrackMap, TrackMapError, TrackPoint};
