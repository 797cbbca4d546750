//! Core type definitions for the steering classifier.

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Side length of a preprocessed sample.
pub const SAMPLE_SIZE: usize = 64;
/// Channels per sample pixel.
pub const SAMPLE_CHANNELS: usize = 3;
/// Number of `f32` values held by one sample.
pub const SAMPLE_LEN: usize = SAMPLE_SIZE * SAMPLE_SIZE * SAMPLE_CHANNELS;

/// Steering decision, doubling as the class label.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Go,
    Left,
    Right,
}

impl Direction {
    /// All classes in label order.
    pub const ALL: [Direction; 3] = [Direction::Go, Direction::Left, Direction::Right];

    /// Number of classes.
    pub const COUNT: usize = 3;

    /// Integer label used by the model.
    pub fn label(self) -> usize {
        match self {
            Direction::Go => 0,
            Direction::Left => 1,
            Direction::Right => 2,
        }
    }

    pub fn from_label(label: usize) -> Option<Self> {
        Self::ALL.get(label).copied()
    }

    /// Name of the class directory on disk.
    pub fn dir_name(self) -> &'static str {
        match self {
            Direction::Go => "go",
            Direction::Left => "left",
            Direction::Right => "right",
        }
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.dir_name())
    }
}

/// Byte order of the colour channels in a frame.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ChannelOrder {
    /// Camera capture order
    Bgr,
    /// Order expected by the model
    Rgb,
}

/// A preprocessed training example: 64x64x3 HWC pixels in [-1, 1] plus its label.
///
/// Samples are immutable once built; the pixel buffer is only ever read.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pixels: Vec<f32>,
    label: Direction,
}

impl Sample {
    /// Wrap a pixel buffer, checking that it holds exactly one 64x64x3 image.
    pub fn new(pixels: Vec<f32>, label: Direction) -> Result<Self> {
        if pixels.len() != SAMPLE_LEN {
            return Err(Error::Dataset(format!(
                "sample buffer holds {} values, expected {}",
                pixels.len(),
                SAMPLE_LEN
            )));
        }
        Ok(Self { pixels, label })
    }

    /// Pixels in HWC order.
    pub fn pixels(&self) -> &[f32] {
        &self.pixels
    }

    pub fn label(&self) -> Direction {
        self.label
    }

    /// Shape of the pixel buffer as (height, width, channels).
    pub fn shape(&self) -> (usize, usize, usize) {
        (SAMPLE_SIZE, SAMPLE_SIZE, SAMPLE_CHANNELS)
    }
}

/// Data split type
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum DataSplit {
    /// Training data
    Train,
    /// Validation data
    Validation,
}

impl std::fmt::Display for DataSplit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DataSplit::Train => write!(f, "train"),
            DataSplit::Validation => write!(f, "validation"),
        }
    }
}

/// Image dimensions
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct ImageDimensions {
    /// Image width in pixels
    pub width: u32,
    /// Image height in pixels
    pub height: u32,
    /// Number of channels (e.g., 3 for BGR)
    pub channels: u32,
}

impl ImageDimensions {
    pub fn new(width: u32, height: u32, channels: u32) -> Self {
        Self {
            width,
            height,
            channels,
        }
    }
}

impl std::fmt::Display for ImageDimensions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}x{}", self.width, self.height, self.channels)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_direction_labels() {
        for (i, dir) in Direction::ALL.iter().enumerate() {
            assert_eq!(dir.label(), i);
            assert_eq!(Direction::from_label(i), Some(*dir));
        }
        assert_eq!(Direction::from_label(3), None);
        assert_eq!(Direction::Right.to_string(), "right");
    }

    #[test]
    fn test_sample_rejects_wrong_length() {
        assert!(Sample::new(vec![0.0; 10], Direction::Go).is_err());

        let sample = Sample::new(vec![0.0; SAMPLE_LEN], Direction::Left).unwrap();
        assert_eq!(sample.shape(), (64, 64, 3));
        assert_eq!(sample.label(), Direction::Left);
    }

    #[test]
    fn test_dimensions_display() {
        assert_eq!(ImageDimensions::new(1500, 1000, 3).to_string(), "1500x1000x3");
    }
}
