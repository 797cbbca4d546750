//! Training-time augmentation.
//!
//! A sample enters pixel space (bytes), passes through an ordered list of
//! [`Transform`]s, then leaves as a normalized CHW float buffer. Validation
//! samples skip the pixel-space stage and go straight through the
//! [`Normalizer`].
//!
//! Randomness comes from a caller-supplied RNG. The dataset adapter seeds one
//! per (seed, epoch, sample index), so results do not depend on how many
//! threads fetch samples.

use image::imageops::{self, FilterType};
use image::{Rgb, RgbImage};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use steer_core::{AugmentationConfig, Sample, SAMPLE_SIZE};

const CROP_ATTEMPTS: usize = 10;

/// One stochastic pixel-space step.
pub trait Transform: Send + Sync {
    fn name(&self) -> &'static str;

    fn apply(&self, image: RgbImage, rng: &mut ChaCha8Rng) -> RgbImage;
}

/// RNG for one fetch of one sample.
pub fn sample_rng(seed: u64, epoch: usize, index: usize) -> ChaCha8Rng {
    let mut key = [0u8; 32];
    key[..8].copy_from_slice(&seed.to_le_bytes());
    key[8..16].copy_from_slice(&(epoch as u64).to_le_bytes());
    key[16..24].copy_from_slice(&(index as u64).to_le_bytes());
    ChaCha8Rng::from_seed(key)
}

/// Map a [-1, 1] sample back to bytes. Values are clipped then truncated.
pub fn denormalize(sample: &Sample) -> RgbImage {
    let size = SAMPLE_SIZE as u32;
    let bytes = sample
        .pixels()
        .iter()
        .map(|v| ((v + 1.0) * 127.5).clamp(0.0, 255.0) as u8)
        .collect();
    // Sample guarantees a 64x64x3 buffer.
    RgbImage::from_raw(size, size, bytes).unwrap_or_else(|| RgbImage::new(size, size))
}

/// Rotation by an angle drawn uniformly from [-max_degrees, max_degrees]
/// around the image centre. Nearest-neighbour sampling, black fill.
#[derive(Debug, Clone)]
pub struct RandomRotation {
    pub max_degrees: f32,
}

impl Transform for RandomRotation {
    fn name(&self) -> &'static str {
        "random_rotation"
    }

    fn apply(&self, image: RgbImage, rng: &mut ChaCha8Rng) -> RgbImage {
        let angle = rng.gen_range(-self.max_degrees..=self.max_degrees);
        rotate(&image, angle)
    }
}

fn rotate(img: &RgbImage, angle_degrees: f32) -> RgbImage {
    let (width, height) = img.dimensions();
    let cx = (width as f32 - 1.0) / 2.0;
    let cy = (height as f32 - 1.0) / 2.0;
    let (sin_a, cos_a) = angle_degrees.to_radians().sin_cos();

    RgbImage::from_fn(width, height, |x, y| {
        let dx = x as f32 - cx;
        let dy = y as f32 - cy;
        let src_x = (cx + dx * cos_a + dy * sin_a).round();
        let src_y = (cy - dx * sin_a + dy * cos_a).round();
        if src_x < 0.0 || src_y < 0.0 || src_x >= width as f32 || src_y >= height as f32 {
            Rgb([0, 0, 0])
        } else {
            *img.get_pixel(src_x as u32, src_y as u32)
        }
    })
}

/// Integer shift of up to `max_fraction` of each extent, black fill.
#[derive(Debug, Clone)]
pub struct RandomTranslate {
    pub max_fraction: (f32, f32),
}

impl Transform for RandomTranslate {
    fn name(&self) -> &'static str {
        "random_translate"
    }

    fn apply(&self, image: RgbImage, rng: &mut ChaCha8Rng) -> RgbImage {
        let (width, height) = image.dimensions();
        let max_dx = self.max_fraction.0 * width as f32;
        let max_dy = self.max_fraction.1 * height as f32;
        let tx = rng.gen_range(-max_dx..=max_dx).round() as i64;
        let ty = rng.gen_range(-max_dy..=max_dy).round() as i64;
        translate(&image, tx, ty)
    }
}

fn translate(img: &RgbImage, tx: i64, ty: i64) -> RgbImage {
    let (width, height) = img.dimensions();
    RgbImage::from_fn(width, height, |x, y| {
        let sx = x as i64 - tx;
        let sy = y as i64 - ty;
        if sx < 0 || sy < 0 || sx >= width as i64 || sy >= height as i64 {
            Rgb([0, 0, 0])
        } else {
            *img.get_pixel(sx as u32, sy as u32)
        }
    })
}

/// Crop a random region covering `scale` of the area with an aspect ratio
/// in `ratio`, then resize it to `size` x `size`.
#[derive(Debug, Clone)]
pub struct RandomResizedCrop {
    pub size: u32,
    pub scale: (f32, f32),
    pub ratio: (f32, f32),
}

impl RandomResizedCrop {
    /// Crop window as (x, y, width, height).
    pub fn window(&self, width: u32, height: u32, rng: &mut ChaCha8Rng) -> (u32, u32, u32, u32) {
        let area = (width * height) as f32;
        let log_ratio = (self.ratio.0.ln(), self.ratio.1.ln());

        for _ in 0..CROP_ATTEMPTS {
            let target_area = area * rng.gen_range(self.scale.0..=self.scale.1);
            let aspect = rng.gen_range(log_ratio.0..=log_ratio.1).exp();
            let w = (target_area * aspect).sqrt().round() as u32;
            let h = (target_area / aspect).sqrt().round() as u32;
            if w > 0 && h > 0 && w <= width && h <= height {
                let y = rng.gen_range(0..=height - h);
                let x = rng.gen_range(0..=width - w);
                return (x, y, w, h);
            }
        }

        // Centre crop clamped to the ratio bounds.
        let in_ratio = width as f32 / height as f32;
        let (w, h) = if in_ratio < self.ratio.0 {
            (width, ((width as f32 / self.ratio.0).round() as u32).min(height))
        } else if in_ratio > self.ratio.1 {
            (((height as f32 * self.ratio.1).round() as u32).min(width), height)
        } else {
            (width, height)
        };
        ((width - w) / 2, (height - h) / 2, w, h)
    }
}

impl Transform for RandomResizedCrop {
    fn name(&self) -> &'static str {
        "random_resized_crop"
    }

    fn apply(&self, image: RgbImage, rng: &mut ChaCha8Rng) -> RgbImage {
        let (width, height) = image.dimensions();
        let (x, y, w, h) = self.window(width, height, rng);
        let crop = imageops::crop_imm(&image, x, y, w, h).to_image();
        imageops::resize(&crop, self.size, self.size, FilterType::Triangle)
    }
}

/// Bytes or [-1, 1] samples to normalized CHW floats.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Normalizer {
    pub mean: [f32; 3],
    pub std: [f32; 3],
}

impl Normalizer {
    pub fn new(mean: [f32; 3], std: [f32; 3]) -> Self {
        Self { mean, std }
    }

    /// Scale bytes to [0, 1] and normalize per channel.
    pub fn from_image(&self, image: &RgbImage) -> Vec<f32> {
        let (width, height) = image.dimensions();
        let plane = (width * height) as usize;
        let mut out = vec![0.0f32; plane * 3];
        for (i, pixel) in image.pixels().enumerate() {
            for c in 0..3 {
                let v = pixel[c] as f32 / 255.0;
                out[c * plane + i] = (v - self.mean[c]) / self.std[c];
            }
        }
        out
    }

    /// Map [-1, 1] to [0, 1] and normalize per channel.
    pub fn from_sample(&self, sample: &Sample) -> Vec<f32> {
        let plane = SAMPLE_SIZE * SAMPLE_SIZE;
        let mut out = vec![0.0f32; plane * 3];
        for (i, pixel) in sample.pixels().chunks_exact(3).enumerate() {
            for c in 0..3 {
                let v = (pixel[c] + 1.0) / 2.0;
                out[c * plane + i] = (v - self.mean[c]) / self.std[c];
            }
        }
        out
    }
}

impl From<&AugmentationConfig> for Normalizer {
    fn from(config: &AugmentationConfig) -> Self {
        Self::new(config.mean, config.std)
    }
}

/// Ordered chain of pixel-space transforms between denormalization and
/// normalization.
pub struct AugmentationPipeline {
    transforms: Vec<Box<dyn Transform>>,
    normalizer: Normalizer,
}

impl AugmentationPipeline {
    /// Empty pipeline: only range conversion and normalization.
    pub fn new(normalizer: Normalizer) -> Self {
        Self {
            transforms: Vec::new(),
            normalizer,
        }
    }

    /// Rotation, then translation, then resized crop.
    pub fn from_config(config: &AugmentationConfig) -> Self {
        Self::new(Normalizer::from(config))
            .with_transform(RandomRotation {
                max_degrees: config.rotation_degrees,
            })
            .with_transform(RandomTranslate {
                max_fraction: config.translate,
            })
            .with_transform(RandomResizedCrop {
                size: SAMPLE_SIZE as u32,
                scale: config.crop_scale,
                ratio: config.crop_ratio,
            })
    }

    pub fn with_transform(mut self, transform: impl Transform + 'static) -> Self {
        self.transforms.push(Box::new(transform));
        self
    }

    pub fn transform_names(&self) -> Vec<&'static str> {
        self.transforms.iter().map(|t| t.name()).collect()
    }

    pub fn normalizer(&self) -> &Normalizer {
        &self.normalizer
    }

    /// Augment one sample into a normalized CHW buffer.
    pub fn augment(&self, sample: &Sample, rng: &mut ChaCha8Rng) -> Vec<f32> {
        let image = self
            .transforms
            .iter()
            .fold(denormalize(sample), |img, t| t.apply(img, rng));
        self.normalizer.from_image(&image)
    }
}

impl std::fmt::Debug for AugmentationPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AugmentationPipeline")
            .field("transforms", &self.transform_names())
            .field("normalizer", &self.normalizer)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use steer_core::{Direction, SAMPLE_LEN};

    fn gradient_sample() -> Sample {
        let pixels = (0..SAMPLE_LEN)
            .map(|i| (i % 251) as f32 / 125.0 - 1.0)
            .collect();
        Sample::new(pixels, Direction::Go).unwrap()
    }

    fn constant_sample(v: f32) -> Sample {
        Sample::new(vec![v; SAMPLE_LEN], Direction::Go).unwrap()
    }

    #[test]
    fn test_denormalize_truncates() {
        assert!(denormalize(&constant_sample(-1.0)).pixels().all(|p| p.0 == [0, 0, 0]));
        assert!(denormalize(&constant_sample(1.0)).pixels().all(|p| p.0 == [255, 255, 255]));
        assert!(denormalize(&constant_sample(0.0)).pixels().all(|p| p.0 == [127, 127, 127]));
        assert!(denormalize(&constant_sample(3.0)).pixels().all(|p| p.0 == [255, 255, 255]));
    }

    #[test]
    fn test_zero_rotation_is_identity() {
        let img = denormalize(&gradient_sample());
        assert_eq!(rotate(&img, 0.0), img);
    }

    #[test]
    fn test_rotation_fills_corners_black() {
        let img = denormalize(&constant_sample(1.0));
        let rotated = rotate(&img, 45.0);
        assert_eq!(rotated.get_pixel(0, 0).0, [0, 0, 0]);
        assert_eq!(rotated.get_pixel(32, 32).0, [255, 255, 255]);
    }

    #[test]
    fn test_translate_shifts_content() {
        let img = denormalize(&gradient_sample());
        let shifted = translate(&img, 3, -2);
        assert_eq!(shifted.get_pixel(10, 10), img.get_pixel(7, 12));
        assert_eq!(shifted.get_pixel(0, 0).0, [0, 0, 0]);
        assert_eq!(shifted.get_pixel(63, 63).0, [0, 0, 0]);
    }

    #[test]
    fn test_crop_window_within_bounds() {
        let crop = RandomResizedCrop {
            size: 64,
            scale: (0.9, 1.0),
            ratio: (3.0 / 4.0, 4.0 / 3.0),
        };
        let mut rng = ChaCha8Rng::seed_from_u64(42);
        for _ in 0..200 {
            let (x, y, w, h) = crop.window(64, 64, &mut rng);
            assert!(x + w <= 64 && y + h <= 64);
            let area = (w * h) as f32 / (64.0 * 64.0);
            assert!(area > 0.8, "area fraction {area}");
        }
    }

    #[test]
    fn test_crop_fallback_is_centred() {
        let crop = RandomResizedCrop {
            size: 8,
            scale: (4.0, 4.0),
            ratio: (1.0, 1.0),
        };
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        assert_eq!(crop.window(20, 10, &mut rng), (5, 0, 10, 10));
    }

    #[test]
    fn test_augment_shape_and_stochasticity() {
        let pipeline = AugmentationPipeline::from_config(&AugmentationConfig::default());
        let sample = gradient_sample();

        let first = pipeline.augment(&sample, &mut sample_rng(42, 0, 3));
        let again = pipeline.augment(&sample, &mut sample_rng(42, 0, 3));
        let next_epoch = pipeline.augment(&sample, &mut sample_rng(42, 1, 3));

        assert_eq!(first.len(), SAMPLE_LEN);
        assert_eq!(next_epoch.len(), SAMPLE_LEN);
        assert_eq!(first, again);
        assert_ne!(first, next_epoch);
    }

    #[test]
    fn test_pipeline_order() {
        let pipeline = AugmentationPipeline::from_config(&AugmentationConfig::default());
        assert_eq!(
            pipeline.transform_names(),
            vec!["random_rotation", "random_translate", "random_resized_crop"]
        );
    }

    #[test]
    fn test_plain_normalization() {
        let normalizer = Normalizer::from(&AugmentationConfig::default());
        let out = normalizer.from_sample(&constant_sample(1.0));
        let plane = SAMPLE_SIZE * SAMPLE_SIZE;

        assert_eq!(out.len(), SAMPLE_LEN);
        assert!((out[0] - (1.0 - 0.485) / 0.229).abs() < 1e-6);
        assert!((out[plane] - (1.0 - 0.456) / 0.224).abs() < 1e-6);
        assert!((out[2 * plane] - (1.0 - 0.406) / 0.225).abs() < 1e-6);
    }

    #[test]
    fn test_empty_pipeline_matches_plain_path_at_extremes() {
        let pipeline = AugmentationPipeline::new(Normalizer::from(&AugmentationConfig::default()));
        let sample = constant_sample(-1.0);
        let mut rng = sample_rng(0, 0, 0);
        assert_eq!(
            pipeline.augment(&sample, &mut rng),
            pipeline.normalizer().from_sample(&sample)
        );
    }
}
