//! Deterministic raw frame to sample transform.
//!
//! Order matters and is fixed: rotate 180 degrees to undo the camera
//! mounting, resize to a square, drop the top rows (sky and background),
//! resize the remaining region to 64x64, reorder channels, then scale bytes
//! into [-1, 1].

use image::imageops::{self, FilterType};
use image::RgbImage;
use steer_core::{Direction, Error, PreprocessConfig, Result, Sample};

use crate::frame::RawFrame;

/// Turns raw frames into training samples.
#[derive(Debug, Clone)]
pub struct Preprocessor {
    config: PreprocessConfig,
}

impl Default for Preprocessor {
    fn default() -> Self {
        Self {
            config: PreprocessConfig::default(),
        }
    }
}

impl Preprocessor {
    pub fn new(config: PreprocessConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &PreprocessConfig {
        &self.config
    }

    /// Preprocess one frame into a labelled sample.
    pub fn preprocess(&self, frame: &RawFrame, label: Direction) -> Result<Sample> {
        let image = self.pixel_space(frame)?;
        let pixels = image.pixels().flat_map(|p| p.0).map(scale_to_unit).collect();
        Sample::new(pixels, label)
    }

    /// Steps up to and including the channel reorder, still as bytes.
    pub fn pixel_space(&self, frame: &RawFrame) -> Result<RgbImage> {
        let cfg = &self.config;
        let dims = frame.dimensions();
        if dims.channels != 3 {
            return Err(Error::InvalidFrame(format!(
                "expected 3 channels, got {}",
                dims.channels
            )));
        }
        if dims.width != cfg.frame_width || dims.height != cfg.frame_height {
            return Err(Error::InvalidFrame(format!(
                "expected {}x{}, got {}x{}",
                cfg.frame_width, cfg.frame_height, dims.width, dims.height
            )));
        }

        // Channel order is carried through the geometric steps untouched.
        let raw = RgbImage::from_raw(dims.width, dims.height, frame.data().to_vec())
            .ok_or_else(|| Error::InvalidFrame(format!("buffer does not match {dims}")))?;

        let flipped = imageops::rotate180(&raw);
        let square = imageops::resize(
            &flipped,
            cfg.intermediate_size,
            cfg.intermediate_size,
            FilterType::Triangle,
        );
        let roi = imageops::crop_imm(
            &square,
            0,
            cfg.crop_top,
            cfg.intermediate_size,
            cfg.intermediate_size - cfg.crop_top,
        )
        .to_image();
        let mut small = imageops::resize(&roi, cfg.output_size, cfg.output_size, FilterType::Triangle);

        if frame.order() != cfg.target_order {
            swap_red_blue(&mut small);
        }
        Ok(small)
    }
}

fn swap_red_blue(image: &mut RgbImage) {
    for pixel in image.pixels_mut() {
        pixel.0.swap(0, 2);
    }
}

#[inline]
fn scale_to_unit(byte: u8) -> f32 {
    byte as f32 / 127.5 - 1.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use steer_core::{ChannelOrder, SAMPLE_LEN};

    fn small_config() -> PreprocessConfig {
        PreprocessConfig {
            frame_width: 150,
            frame_height: 100,
            ..PreprocessConfig::default()
        }
    }

    fn uniform_bgr(width: u32, height: u32, bgr: [u8; 3]) -> RawFrame {
        let data = (0..width * height).flat_map(|_| bgr).collect();
        RawFrame::from_bgr(width, height, data).unwrap()
    }

    #[test]
    fn test_output_shape_and_range() {
        let pre = Preprocessor::new(small_config()).unwrap();
        let data = (0..150 * 100 * 3).map(|i| (i % 256) as u8).collect();
        let frame = RawFrame::from_bgr(150, 100, data).unwrap();

        let sample = pre.preprocess(&frame, Direction::Go).unwrap();
        assert_eq!(sample.shape(), (64, 64, 3));
        assert_eq!(sample.pixels().len(), SAMPLE_LEN);
        assert!(sample.pixels().iter().all(|v| (-1.0..=1.0).contains(v)));
    }

    #[test]
    fn test_default_geometry_accepts_full_frame() {
        let pre = Preprocessor::default();
        let frame = uniform_bgr(1500, 1000, [10, 20, 30]);
        let sample = pre.preprocess(&frame, Direction::Right).unwrap();
        assert_eq!(sample.pixels().len(), SAMPLE_LEN);
    }

    #[test]
    fn test_wrong_dimensions_rejected() {
        let pre = Preprocessor::default();
        let frame = uniform_bgr(640, 480, [0, 0, 0]);
        let err = pre.preprocess(&frame, Direction::Go).unwrap_err();
        assert!(matches!(err, Error::InvalidFrame(_)));
    }

    #[test]
    fn test_wrong_channel_count_rejected() {
        let pre = Preprocessor::new(small_config()).unwrap();
        let frame = RawFrame::new(150, 100, 4, ChannelOrder::Rgb, vec![0; 150 * 100 * 4]).unwrap();
        let err = pre.preprocess(&frame, Direction::Go).unwrap_err();
        assert!(matches!(err, Error::InvalidFrame(_)));
    }

    #[test]
    fn test_bgr_is_converted_to_rgb() {
        let pre = Preprocessor::new(small_config()).unwrap();
        let frame = uniform_bgr(150, 100, [255, 0, 0]);
        let sample = pre.preprocess(&frame, Direction::Left).unwrap();

        let first = &sample.pixels()[..3];
        assert_eq!(first, &[-1.0, -1.0, 1.0]);
    }

    #[test]
    fn test_frame_is_flipped_before_crop() {
        // Raw frame: white top half, black bottom half. After the 180 degree
        // flip the white half sits at the bottom of the region of interest.
        let pre = Preprocessor::new(small_config()).unwrap();
        let data = (0..100u32)
            .flat_map(|y| {
                let v = if y < 50 { 255u8 } else { 0 };
                std::iter::repeat(v).take(150 * 3)
            })
            .collect();
        let frame = RawFrame::from_bgr(150, 100, data).unwrap();
        let sample = pre.preprocess(&frame, Direction::Go).unwrap();

        let row = |y: usize| &sample.pixels()[y * 64 * 3..(y + 1) * 64 * 3];
        assert!(row(0).iter().all(|v| *v == -1.0));
        assert!(row(63).iter().all(|v| *v == 1.0));
    }
}
