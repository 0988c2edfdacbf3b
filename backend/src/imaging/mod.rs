pub mod decode;
pub mod filters;

use std::io::Cursor;

use image::{DynamicImage, GrayImage, ImageFormat, RgbImage};

/// 8-bit image held in memory between pipeline stages.
#[derive(Debug, Clone, PartialEq)]
pub enum PixelBuffer {
    Gray(GrayImage),
    Color(RgbImage),
}

impl PixelBuffer {
    pub fn width(&self) -> u32 {
        match self {
            PixelBuffer::Gray(img) => img.width(),
            PixelBuffer::Color(img) => img.width(),
        }
    }

    pub fn height(&self) -> u32 {
        match self {
            PixelBuffer::Gray(img) => img.height(),
            PixelBuffer::Color(img) => img.height(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.width() == 0 || self.height() == 0
    }

    pub fn to_dynamic(&self) -> DynamicImage {
        match self {
            PixelBuffer::Gray(img) => DynamicImage::ImageLuma8(img.clone()),
            PixelBuffer::Color(img) => DynamicImage::ImageRgb8(img.clone()),
        }
    }

    /// Expands gray buffers to three identical channels.
    pub fn to_rgb(&self) -> RgbImage {
        match self {
            PixelBuffer::Gray(img) => DynamicImage::ImageLuma8(img.clone()).to_rgb8(),
            PixelBuffer::Color(img) => img.clone(),
        }
    }

    pub fn encode_png(&self) -> image::ImageResult<Vec<u8>> {
        let mut bytes = Vec::new();
        self.to_dynamic()
            .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)?;
        Ok(bytes)
    }
}

impl From<DynamicImage> for PixelBuffer {
    fn from(image: DynamicImage) -> Self {
        match image {
            DynamicImage::ImageLuma8(gray) => PixelBuffer::Gray(gray),
            other => PixelBuffer::Color(other.to_rgb8()),
        }
    }
}
