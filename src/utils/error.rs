//! Error types and handling
//!
//! Common error types used across the dashcam core.

use crate::overlay::image::ImageError;
use crate::overlay::track::TrackMapError;
use crate::recorder::encoder::EncoderError;
use crate::recorder::session::RecordingError;
use crate::recorder::store::StoreError;
use thiserror::Error;

/// Application-wide error type
#[derive(Error, Debug)]
pub enum AppError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Recording error: {0}")]
    Recording(#[from] RecordingError),

    #[error("Encoder error: {0}")]
    Encoder(#[from] EncoderError),

    #[error("Storage error: {0}")]
    Store(#[from] StoreError),

    #[error("Track map error: {0}")]
    Track(#[from] TrackMapError),

    #[error("Image error: {0}")]
    Image(#[from] ImageError),
}

/// Result type alias using AppError
pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages_name_the_source() {
        let err = AppError::Config("bad fps".to_string());
        assert_eq!(err.to_string(), "Configuration error: bad fps");

        let io = AppError::from(std::io::Error::new(std::io::ErrorKind::Other, "disk"));
        assert!(matches!(io, AppError::Io(_)));
        assert_eq!(io.to_string(), "IO error: disk");
    }
}
