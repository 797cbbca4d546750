//! Raw captured frames.

use image::DynamicImage;
use steer_core::{ChannelOrder, Error, ImageDimensions, Result};

/// An interleaved 8-bit frame as produced by the camera or decoded from disk.
///
/// The buffer is `width * height * channels` bytes, row-major. The frame does
/// not check its geometry against what the preprocessor expects; that happens
/// in [`crate::Preprocessor::preprocess`].
#[derive(Debug, Clone)]
pub struct RawFrame {
    width: u32,
    height: u32,
    channels: u32,
    order: ChannelOrder,
    data: Vec<u8>,
}

impl RawFrame {
    pub fn new(
        width: u32,
        height: u32,
        channels: u32,
        order: ChannelOrder,
        data: Vec<u8>,
    ) -> Result<Self> {
        let expected = width as usize * height as usize * channels as usize;
        if data.len() != expected {
            return Err(Error::InvalidFrame(format!(
                "buffer holds {} bytes, {}x{}x{} needs {}",
                data.len(),
                width,
                height,
                channels,
                expected
            )));
        }
        Ok(Self {
            width,
            height,
            channels,
            order,
            data,
        })
    }

    /// Camera frame: interleaved BGR bytes.
    pub fn from_bgr(width: u32, height: u32, data: Vec<u8>) -> Result<Self> {
        Self::new(width, height, 3, ChannelOrder::Bgr, data)
    }

    /// Wrap a decoded image, keeping its channel count so that grey or
    /// alpha images are rejected later instead of silently converted.
    pub fn from_image(image: &DynamicImage) -> Self {
        let (width, height) = (image.width(), image.height());
        let channels = image.color().channel_count() as u32;
        let data = match channels {
            1 => image.to_luma8().into_raw(),
            2 => image.to_luma_alpha8().into_raw(),
            4 => image.to_rgba8().into_raw(),
            _ => image.to_rgb8().into_raw(),
        };
        let channels = if matches!(channels, 1 | 2 | 4) { channels } else { 3 };

        Self {
            width,
            height,
            channels,
            order: ChannelOrder::Rgb,
            data,
        }
    }

    pub fn dimensions(&self) -> ImageDimensions {
        ImageDimensions::new(self.width, self.height, self.channels)
    }

    pub fn order(&self) -> ChannelOrder {
        self.order
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn into_data(self) -> Vec<u8> {
        self.data
    }
}
