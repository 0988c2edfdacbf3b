//! Image preprocessing for the leaf classifier.
//!
//! The classifier is a MobileNetV2 fine-tune and expects:
//! - Input size: 224×224, resized without preserving aspect ratio
//! - Channel order: RGB
//! - Normalization: `x / 127.5 - 1.0`, i.e. pixels scaled to [-1, 1]
//! - A leading batch dimension of 1
//!
//! Getting the normalization wrong does not fail, it silently skews predictions.

use image::RgbImage;
use image::imageops::{self, FilterType};
use ndarray::Array4;

use crate::config::TensorLayout;
use crate::imaging::PixelBuffer;

use super::InferenceError;

const CHANNELS: usize = 3;
const SCALE: f32 = 127.5;
const SHIFT: f32 = 1.0;

/// Builds a `[1, S, S, 3]` (NHWC) or `[1, 3, S, S]` (NCHW) batch from a buffer.
pub fn preprocess(
    buffer: &PixelBuffer,
    image_size: u32,
    layout: TensorLayout,
) -> Result<Array4<f32>, InferenceError> {
    let rgb = to_three_channels(buffer)?;
    let resized = imageops::resize(&rgb, image_size, image_size, FilterType::CatmullRom);
    Ok(to_batch(&resized, layout))
}

fn to_three_channels(buffer: &PixelBuffer) -> Result<RgbImage, InferenceError> {
    if buffer.is_empty() {
        return Err(InferenceError::UnsupportedFormat(format!(
            "cannot normalize a {}x{} image",
            buffer.width(),
            buffer.height()
        )));
    }
    Ok(buffer.to_rgb())
}

fn to_batch(rgb: &RgbImage, layout: TensorLayout) -> Array4<f32> {
    let (w, h) = (rgb.width() as usize, rgb.height() as usize);
    let mut tensor = match layout {
        TensorLayout::Nhwc => Array4::<f32>::zeros((1, h, w, CHANNELS)),
        TensorLayout::Nchw => Array4::<f32>::zeros((1, CHANNELS, h, w)),
    };
    for (x, y, pixel) in rgb.enumerate_pixels() {
        let (x, y) = (x as usize, y as usize);
        for (c, &value) in pixel.0.iter().enumerate() {
            let scaled = value as f32 / SCALE - SHIFT;
            match layout {
                TensorLayout::Nhwc => tensor[[0, y, x, c]] = scaled,
                TensorLayout::Nchw => tensor[[0, c, y, x]] = scaled,
            }
        }
    }
    tensor
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GrayImage, Luma, Rgb};

    #[test]
    fn test_shape_nhwc() {
        let img = PixelBuffer::Color(RgbImage::new(640, 480));
        let tensor = preprocess(&img, 224, TensorLayout::Nhwc).unwrap();
        assert_eq!(tensor.shape(), &[1, 224, 224, 3]);
    }

    #[test]
    fn test_shape_nchw() {
        let img = PixelBuffer::Color(RgbImage::new(100, 300));
        let tensor = preprocess(&img, 224, TensorLayout::Nchw).unwrap();
        assert_eq!(tensor.shape(), &[1, 3, 224, 224]);
    }

    #[test]
    fn test_normalization_range() {
        let white = PixelBuffer::Color(RgbImage::from_pixel(8, 8, Rgb([255, 255, 255])));
        let tensor = preprocess(&white, 16, TensorLayout::Nhwc).unwrap();
        assert!(tensor.iter().all(|&v| (v - 1.0).abs() < 0.01));

        let black = PixelBuffer::Color(RgbImage::new(8, 8));
        let tensor = preprocess(&black, 16, TensorLayout::Nhwc).unwrap();
        assert!(tensor.iter().all(|&v| (v + 1.0).abs() < 0.01));
    }

    #[test]
    fn test_channel_placement() {
        let img = PixelBuffer::Color(RgbImage::from_pixel(4, 4, Rgb([255, 0, 255])));
        let nhwc = preprocess(&img, 4, TensorLayout::Nhwc).unwrap();
        assert!((nhwc[[0, 2, 1, 0]] - 1.0).abs() < 0.01);
        assert!((nhwc[[0, 2, 1, 1]] + 1.0).abs() < 0.01);
        let nchw = preprocess(&img, 4, TensorLayout::Nchw).unwrap();
        assert!((nchw[[0, 1, 3, 3]] + 1.0).abs() < 0.01);
        assert!((nchw[[0, 2, 3, 3]] - 1.0).abs() < 0.01);
    }

    #[test]
    fn test_gray_input_is_expanded() {
        let img = PixelBuffer::Gray(GrayImage::from_pixel(5, 5, Luma([0])));
        let tensor = preprocess(&img, 8, TensorLayout::Nhwc).unwrap();
        assert_eq!(tensor.shape(), &[1, 8, 8, 3]);
    }

    #[test]
    fn test_empty_image_is_unsupported() {
        let img = PixelBuffer::Color(RgbImage::new(0, 10));
        assert!(matches!(
            preprocess(&img, 224, TensorLayout::Nhwc),
            Err(InferenceError::UnsupportedFormat(_))
        ));
    }
}
