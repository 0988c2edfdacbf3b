//! Deterministic image transforms applied to decoded uploads.

use image::{GrayImage, Luma, imageops};
use imageproc::edges::canny;
use shared::FilterType;

use super::PixelBuffer;

pub const DEFAULT_THRESHOLD: u8 = 128;

/// Canny hysteresis thresholds.
const EDGE_LOW: f32 = 100.0;
const EDGE_HIGH: f32 = 200.0;

pub fn grayscale(buffer: &PixelBuffer) -> PixelBuffer {
    PixelBuffer::Gray(luma(buffer))
}

/// Binarizes the luma channel: samples `>= cutoff` become 255, the rest 0.
pub fn threshold(buffer: &PixelBuffer, cutoff: u8) -> PixelBuffer {
    let mut gray = luma(buffer);
    for Luma([value]) in gray.pixels_mut() {
        *value = if *value >= cutoff { u8::MAX } else { u8::MIN };
    }
    PixelBuffer::Gray(gray)
}

pub fn edge(buffer: &PixelBuffer) -> PixelBuffer {
    let gray = luma(buffer);
    if gray.width() == 0 || gray.height() == 0 {
        return PixelBuffer::Gray(gray);
    }
    PixelBuffer::Gray(canny(&gray, EDGE_LOW, EDGE_HIGH))
}

/// Bitwise complement of every channel; keeps the buffer's color model.
pub fn invert(buffer: &PixelBuffer) -> PixelBuffer {
    let mut inverted = buffer.clone();
    match &mut inverted {
        PixelBuffer::Gray(img) => imageops::invert(img),
        PixelBuffer::Color(img) => imageops::invert(img),
    }
    inverted
}

/// Applies a single filter. `Original` hands back an untouched copy.
pub fn apply(buffer: &PixelBuffer, filter: FilterType, cutoff: u8) -> PixelBuffer {
    match filter {
        FilterType::Original => buffer.clone(),
        FilterType::Grayscale => grayscale(buffer),
        FilterType::Threshold => threshold(buffer, cutoff),
        FilterType::Edge => edge(buffer),
        FilterType::Invert => invert(buffer),
    }
}

/// BT.601 luma (0.299 R + 0.587 G + 0.114 B), rounded to nearest.
fn luma(buffer: &PixelBuffer) -> GrayImage {
    match buffer {
        PixelBuffer::Gray(img) => img.clone(),
        PixelBuffer::Color(img) => GrayImage::from_fn(img.width(), img.height(), |x, y| {
            let [r, g, b] = img.get_pixel(x, y).0;
            let weighted = 299 * u32::from(r) + 587 * u32::from(g) + 114 * u32::from(b);
            Luma([((weighted + 500) / 1000) as u8])
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    fn gradient(width: u32, height: u32) -> PixelBuffer {
        PixelBuffer::Color(RgbImage::from_fn(width, height, |x, y| {
            Rgb([(x * 7 % 256) as u8, (y * 13 % 256) as u8, ((x + y) * 3 % 256) as u8])
        }))
    }

    fn gray_values(buffer: &PixelBuffer) -> Vec<u8> {
        match buffer {
            PixelBuffer::Gray(img) => img.as_raw().clone(),
            PixelBuffer::Color(_) => panic!("expected a gray buffer"),
        }
    }

    #[test]
    fn test_grayscale_is_single_channel() {
        let out = grayscale(&gradient(16, 8));
        assert!(matches!(out, PixelBuffer::Gray(_)));
        assert_eq!((out.width(), out.height()), (16, 8));
    }

    #[test]
    fn test_grayscale_of_white_is_white() {
        let white = PixelBuffer::Color(RgbImage::from_pixel(3, 3, Rgb([255, 255, 255])));
        assert!(gray_values(&grayscale(&white)).iter().all(|&v| v == 255));
    }

    #[test]
    fn test_grayscale_uses_bt601_weights() {
        let img = RgbImage::from_fn(3, 1, |x, _| match x {
            0 => Rgb([255, 0, 0]),
            1 => Rgb([0, 255, 0]),
            _ => Rgb([0, 0, 255]),
        });
        assert_eq!(gray_values(&grayscale(&PixelBuffer::Color(img))), vec![76, 150, 29]);
    }

    #[test]
    fn test_threshold_follows_bt601_luma() {
        // 0.587 * 170 = 99.8, below the default cutoff.
        let green = PixelBuffer::Color(RgbImage::from_pixel(2, 2, Rgb([0, 170, 0])));
        let out = threshold(&green, DEFAULT_THRESHOLD);
        assert!(gray_values(&out).iter().all(|&v| v == 0));
    }

    #[test]
    fn test_threshold_zero_saturates_everything() {
        let out = threshold(&gradient(32, 32), 0);
        assert!(gray_values(&out).iter().all(|&v| v == 255));
    }

    #[test]
    fn test_threshold_max_keeps_only_full_white() {
        let mut img = RgbImage::from_pixel(4, 4, Rgb([254, 254, 254]));
        img.put_pixel(1, 2, Rgb([255, 255, 255]));
        let out = threshold(&PixelBuffer::Color(img), 255);
        let values = gray_values(&out);
        assert_eq!(values.iter().filter(|&&v| v == 255).count(), 1);
        assert!(values.iter().all(|&v| v == 0 || v == 255));
        if let PixelBuffer::Gray(gray) = &out {
            assert_eq!(gray.get_pixel(1, 2), &Luma([255]));
        }
    }

    #[test]
    fn test_threshold_is_inclusive_at_cutoff() {
        let gray = PixelBuffer::Gray(GrayImage::from_raw(3, 1, vec![127, 128, 129]).unwrap());
        assert_eq!(gray_values(&threshold(&gray, 128)), vec![0, 255, 255]);
    }

    #[test]
    fn test_invert_is_self_inverse() {
        let original = gradient(20, 11);
        assert_ne!(invert(&original), original);
        assert_eq!(invert(&invert(&original)), original);
    }

    #[test]
    fn test_invert_keeps_color() {
        let img = PixelBuffer::Color(RgbImage::from_pixel(1, 1, Rgb([0, 100, 255])));
        match invert(&img) {
            PixelBuffer::Color(out) => assert_eq!(out.get_pixel(0, 0), &Rgb([255, 155, 0])),
            PixelBuffer::Gray(_) => panic!("invert must not drop channels"),
        }
    }

    #[test]
    fn test_edge_on_flat_image_is_empty() {
        let flat = PixelBuffer::Color(RgbImage::from_pixel(24, 24, Rgb([90, 140, 60])));
        assert!(gray_values(&edge(&flat)).iter().all(|&v| v == 0));
    }

    #[test]
    fn test_edge_finds_step() {
        let step = PixelBuffer::Gray(GrayImage::from_fn(32, 32, |x, _| {
            Luma([if x < 16 { 0 } else { 255 }])
        }));
        let out = edge(&step);
        assert_eq!((out.width(), out.height()), (32, 32));
        assert!(gray_values(&out).iter().any(|&v| v == 255));
    }

    #[test]
    fn test_apply_original_is_identity() {
        let img = gradient(5, 5);
        assert_eq!(apply(&img, FilterType::Original, DEFAULT_THRESHOLD), img);
    }
}
