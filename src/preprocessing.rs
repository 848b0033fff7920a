//! Converts decoded images into normalized model input tensors.

use image::imageops::FilterType;
use image::DynamicImage;
use ndarray::Array3;

use crate::config::{Interpolation, PreprocessingConfig};
use crate::dataset::ImageRecord;
use crate::error::Result;

/// A preprocessed image ready for the extractor: a channel-first f32 tensor
/// with values in [0, 1], together with the image's native resolution.
pub struct PreprocessedSample {
    pub name: String,
    pub tensor: Array3<f32>,
    pub original_size: (u32, u32),
}

impl PreprocessedSample {
    /// Spatial size of the tensor as `(width, height)`.
    pub fn size(&self) -> (usize, usize) {
        let (_, height, width) = self.tensor.dim();
        (width, height)
    }
}

pub fn preprocess(record: ImageRecord, conf: &PreprocessingConfig) -> Result<PreprocessedSample> {
    let ImageRecord {
        name,
        image,
        original_size,
    } = record;

    let (width, height) = original_size;
    let longer = width.max(height);
    let image = match conf.resize_max {
        Some(resize_max) if conf.resize_force || longer > resize_max => {
            let scale = f64::from(resize_max) / f64::from(longer);
            let new_width = (f64::from(width) * scale).round() as u32;
            let new_height = (f64::from(height) * scale).round() as u32;
            resize(image, new_width, new_height, conf.interpolation)
        }
        _ => image,
    };

    let tensor = if conf.grayscale {
        gray_tensor(&image)
    } else {
        rgb_tensor(&image)
    };

    Ok(PreprocessedSample {
        name,
        tensor,
        original_size,
    })
}

fn resize(image: DynamicImage, width: u32, height: u32, interp: Interpolation) -> DynamicImage {
    match interp {
        Interpolation::Area => {
            // Area resampling degenerates when enlarging; fall back to
            // linear, the way OpenCV treats INTER_AREA upsampling.
            if width > image.width() || height > image.height() {
                image.resize_exact(width, height, FilterType::Triangle)
            } else {
                image.thumbnail_exact(width, height)
            }
        }
        Interpolation::Nearest => image.resize_exact(width, height, FilterType::Nearest),
        Interpolation::Linear => image.resize_exact(width, height, FilterType::Triangle),
        Interpolation::Cubic => image.resize_exact(width, height, FilterType::CatmullRom),
        Interpolation::Lanczos => image.resize_exact(width, height, FilterType::Lanczos3),
    }
}

fn gray_tensor(image: &DynamicImage) -> Array3<f32> {
    let gray = image.to_luma8();
    let (width, height) = gray.dimensions();
    let mut tensor = Array3::zeros((1, height as usize, width as usize));
    for (x, y, pixel) in gray.enumerate_pixels() {
        tensor[[0, y as usize, x as usize]] = f32::from(pixel.0[0]) / 255.;
    }
    tensor
}

fn rgb_tensor(image: &DynamicImage) -> Array3<f32> {
    let rgb = image.to_rgb8();
    let (width, height) = rgb.dimensions();
    let mut tensor = Array3::zeros((3, height as usize, width as usize));
    for (x, y, pixel) in rgb.enumerate_pixels() {
        let [r, g, b] = pixel.0;
        tensor[[0, y as usize, x as usize]] = f32::from(r) / 255.;
        tensor[[1, y as usize, x as usize]] = f32::from(g) / 255.;
        tensor[[2, y as usize, x as usize]] = f32::from(b) / 255.;
    }
    tensor
}

#[cfg(test)]
mod tests {
    use image::RgbImage;

    use super::*;

    fn record(width: u32, height: u32) -> ImageRecord {
        let image = RgbImage::from_pixel(width, height, image::Rgb([255, 0, 128]));
        ImageRecord {
            name: "test.jpg".to_string(),
            image: DynamicImage::ImageRgb8(image),
            original_size: (width, height),
        }
    }

    fn conf(resize_max: Option<u32>, resize_force: bool, grayscale: bool) -> PreprocessingConfig {
        PreprocessingConfig {
            grayscale,
            resize_max,
            resize_force,
            ..PreprocessingConfig::default()
        }
    }

    #[test]
    fn resize_bounds_longer_side() {
        let sample = preprocess(record(20, 10), &conf(Some(8), false, false)).unwrap();
        assert_eq!(sample.size(), (8, 4));
        assert_eq!(sample.original_size, (20, 10));
    }

    #[test]
    fn resize_rounds_per_axis() {
        // 15x10 scaled by 8/15 gives (8, round(5.33)) = (8, 5).
        let sample = preprocess(record(15, 10), &conf(Some(8), false, false)).unwrap();
        assert_eq!(sample.size(), (8, 5));
    }

    #[test]
    fn small_images_are_left_alone_without_force() {
        let sample = preprocess(record(6, 4), &conf(Some(8), false, false)).unwrap();
        assert_eq!(sample.size(), (6, 4));
    }

    #[test]
    fn force_resize_enlarges_to_bound() {
        let sample = preprocess(record(4, 2), &conf(Some(8), true, false)).unwrap();
        assert_eq!(sample.size(), (8, 4));
    }

    #[test]
    fn grayscale_has_single_leading_channel() {
        let sample = preprocess(record(5, 3), &conf(None, false, true)).unwrap();
        assert_eq!(sample.tensor.dim(), (1, 3, 5));
    }

    #[test]
    fn color_is_channel_first() {
        let sample = preprocess(record(5, 3), &conf(None, false, false)).unwrap();
        assert_eq!(sample.tensor.dim(), (3, 3, 5));
    }

    #[test]
    fn values_are_scaled_to_unit_range() {
        let sample = preprocess(record(4, 4), &conf(None, false, false)).unwrap();
        assert!(sample.tensor.iter().all(|&v| (0. ..=1.).contains(&v)));
        // Red channel of a (255, 0, 128) image.
        assert_eq!(sample.tensor[[0, 0, 0]], 1.);
        assert_eq!(sample.tensor[[1, 0, 0]], 0.);
    }
}
