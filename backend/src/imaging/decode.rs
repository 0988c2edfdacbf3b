//! Upload bytes to pixels.

use image::DynamicImage;
use log::debug;

use super::PixelBuffer;

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("Invalid file type. Only images allowed")]
    NotAnImage,
    #[error("Empty upload")]
    Empty,
    #[error("Invalid image file: {0}")]
    Malformed(#[from] image::ImageError),
}

/// Decodes an uploaded image into a color buffer in RGB channel order.
///
/// The declared content type must start with `image/`; the payload itself is
/// sniffed, so a mislabeled but valid image still decodes.
pub fn decode_upload(bytes: &[u8], content_type: Option<&str>) -> Result<PixelBuffer, DecodeError> {
    match content_type {
        Some(mime) if mime.trim().to_ascii_lowercase().starts_with("image/") => {}
        _ => return Err(DecodeError::NotAnImage),
    }
    let image = decode_bytes(bytes)?;
    Ok(PixelBuffer::Color(image.to_rgb8()))
}

pub fn decode_bytes(bytes: &[u8]) -> Result<DynamicImage, DecodeError> {
    if bytes.is_empty() {
        return Err(DecodeError::Empty);
    }
    let image = image::load_from_memory(bytes)?;
    debug!(
        "Decoded {}x{} image ({:?}) from {} bytes",
        image.width(),
        image.height(),
        image.color(),
        bytes.len()
    );
    Ok(image)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GrayImage, Luma, Rgb, RgbImage};

    fn png_bytes(buffer: PixelBuffer) -> Vec<u8> {
        buffer.encode_png().unwrap()
    }

    #[test]
    fn test_decode_color_png() {
        let img = RgbImage::from_pixel(4, 3, Rgb([10, 20, 30]));
        let decoded = decode_upload(&png_bytes(PixelBuffer::Color(img.clone())), Some("image/png"))
            .unwrap();
        assert_eq!(decoded, PixelBuffer::Color(img));
    }

    #[test]
    fn test_gray_input_becomes_color() {
        let img = GrayImage::from_pixel(2, 2, Luma([77]));
        let decoded = decode_upload(&png_bytes(PixelBuffer::Gray(img)), Some("image/png")).unwrap();
        match decoded {
            PixelBuffer::Color(rgb) => assert_eq!(rgb.get_pixel(1, 1), &Rgb([77, 77, 77])),
            PixelBuffer::Gray(_) => panic!("expected a color buffer"),
        }
    }

    #[test]
    fn test_rejects_non_image_content_type() {
        let bytes = png_bytes(PixelBuffer::Color(RgbImage::new(1, 1)));
        assert!(matches!(
            decode_upload(&bytes, Some("text/plain")),
            Err(DecodeError::NotAnImage)
        ));
        assert!(matches!(decode_upload(&bytes, None), Err(DecodeError::NotAnImage)));
    }

    #[test]
    fn test_rejects_corrupt_bytes() {
        let result = decode_upload(b"definitely not a jpeg", Some("image/jpeg"));
        assert!(matches!(result, Err(DecodeError::Malformed(_))));
        assert!(matches!(decode_upload(&[], Some("image/jpeg")), Err(DecodeError::Empty)));
    }
}
