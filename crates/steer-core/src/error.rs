//! Error types for the steering classifier.

use std::path::PathBuf;

use thiserror::Error;

use crate::types::Direction;

/// Main error type for the steering classifier.
#[derive(Error, Debug)]
pub enum Error {
    /// A raw frame did not have the expected geometry or channel count
    #[error("Invalid frame: {0}")]
    InvalidFrame(String),

    /// A class directory yielded no usable samples
    #[error("Class '{class}' has no usable samples in {}", dir.display())]
    EmptyClass { class: Direction, dir: PathBuf },

    /// The loss became NaN or infinite
    #[error("Loss diverged at epoch {epoch} during {phase}: {value}")]
    Divergence {
        epoch: usize,
        phase: &'static str,
        value: f64,
    },

    /// Best weights or their metadata could not be persisted or restored
    #[error("Checkpoint I/O error at {}: {reason}", path.display())]
    CheckpointIo { path: PathBuf, reason: String },

    /// IO error occurred
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Image decoding or encoding error
    #[error("Image processing error: {0}")]
    Image(String),

    /// Model construction error
    #[error("Model error: {0}")]
    Model(String),

    /// Dataset error
    #[error("Dataset error: {0}")]
    Dataset(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Not found error
    #[error("Not found: {0}")]
    NotFound(String),
}

impl Error {
    /// Build a checkpoint error from anything printable.
    pub fn checkpoint(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        Error::CheckpointIo {
            path: path.into(),
            reason: reason.to_string(),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

impl From<image::ImageError> for Error {
    fn from(err: image::ImageError) -> Self {
        Error::Image(err.to_string())
    }
}

/// Specialized Result type for steering operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::InvalidFrame("expected 1500x1000, got 640x480".to_string());
        assert_eq!(
            err.to_string(),
            "Invalid frame: expected 1500x1000, got 640x480"
        );
    }

    #[test]
    fn test_empty_class_display() {
        let err = Error::EmptyClass {
            class: Direction::Left,
            dir: PathBuf::from("data/left"),
        };
        assert_eq!(
            err.to_string(),
            "Class 'left' has no usable samples in data/left"
        );
    }

    #[test]
    fn test_divergence_display() {
        let err = Error::Divergence {
            epoch: 7,
            phase: "training",
            value: f64::NAN,
        };
        assert!(err.to_string().contains("epoch 7"));
        assert!(err.to_string().contains("NaN"));
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
    }
}
