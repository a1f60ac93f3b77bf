//! Image input handling: base64 data URLs, byte decoding, and face crops.
//!
//! Everything that leaves this module is 8-bit RGB, the channel order both
//! ONNX models are fed.

use base64::Engine;
use image::{ImageReader, RgbImage};
use std::io::Cursor;
use thiserror::Error;

use crate::types::FaceBox;

#[derive(Error, Debug)]
pub enum ImageInputError {
    #[error("image data missing")]
    Missing,
    #[error("invalid base64 payload: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("could not decode image: {0}")]
    Decode(#[from] image::ImageError),
    #[error("could not read image: {0}")]
    Io(#[from] std::io::Error),
    #[error("image has zero size ({width}x{height})")]
    Empty { width: u32, height: u32 },
}

/// Decode a `data:<mime>;base64,<payload>` URL, or a bare base64 string.
pub fn decode_data_url(data: &str) -> Result<RgbImage, ImageInputError> {
    let data = data.trim();
    let payload = match data.split_once(',') {
        Some((header, payload)) if header.starts_with("data:") => payload,
        _ => data,
    };
    if payload.is_empty() {
        return Err(ImageInputError::Missing);
    }

    let bytes = base64::engine::general_purpose::STANDARD.decode(payload)?;
    decode_image_bytes(&bytes)
}

/// Decode an encoded image (format guessed from content) into RGB.
pub fn decode_image_bytes(bytes: &[u8]) -> Result<RgbImage, ImageInputError> {
    if bytes.is_empty() {
        return Err(ImageInputError::Missing);
    }

    let image = ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()?
        .decode()?
        .to_rgb8();
    ensure_not_empty(&image)?;

    tracing::debug!(
        width = image.width(),
        height = image.height(),
        "decoded input image"
    );
    Ok(image)
}

/// Encode raw bytes as a `data:` URL with the given MIME type.
pub fn encode_data_url(mime: &str, bytes: &[u8]) -> String {
    let payload = base64::engine::general_purpose::STANDARD.encode(bytes);
    format!("data:{mime};base64,{payload}")
}

pub(crate) fn ensure_not_empty(image: &RgbImage) -> Result<(), ImageInputError> {
    if image.width() == 0 || image.height() == 0 {
        return Err(ImageInputError::Empty {
            width: image.width(),
            height: image.height(),
        });
    }
    Ok(())
}

/// Copy the region under `bbox` out of `image`. `bbox` must already be clamped.
pub fn crop(image: &RgbImage, bbox: &FaceBox) -> RgbImage {
    image::imageops::crop_imm(image, bbox.x, bbox.y, bbox.width, bbox.height).to_image()
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageFormat, Rgb};

    fn png_bytes(width: u32, height: u32) -> Vec<u8> {
        let img = RgbImage::from_fn(width, height, |x, y| Rgb([x as u8, y as u8, 200]));
        let mut out = Cursor::new(Vec::new());
        img.write_to(&mut out, ImageFormat::Png).unwrap();
        out.into_inner()
    }

    #[test]
    fn test_decode_data_url_with_prefix() {
        let url = encode_data_url("image/png", &png_bytes(8, 6));
        assert!(url.starts_with("data:image/png;base64,"));
        let img = decode_data_url(&url).unwrap();
        assert_eq!(img.dimensions(), (8, 6));
        assert_eq!(img.get_pixel(3, 2), &Rgb([3, 2, 200]));
    }

    #[test]
    fn test_decode_bare_base64() {
        let payload = base64::engine::general_purpose::STANDARD.encode(png_bytes(4, 4));
        let img = decode_data_url(&payload).unwrap();
        assert_eq!(img.dimensions(), (4, 4));
    }

    #[test]
    fn test_decode_missing() {
        assert!(matches!(decode_data_url(""), Err(ImageInputError::Missing)));
        assert!(matches!(
            decode_data_url("data:image/jpeg;base64,"),
            Err(ImageInputError::Missing)
        ));
    }

    #[test]
    fn test_decode_bad_base64() {
        assert!(matches!(
            decode_data_url("data:image/png;base64,@@not base64@@"),
            Err(ImageInputError::Base64(_))
        ));
    }

    #[test]
    fn test_decode_garbage_bytes() {
        assert!(decode_image_bytes(b"definitely not an image").is_err());
    }

    #[test]
    fn test_crop_region() {
        let img = RgbImage::from_fn(10, 10, |x, y| Rgb([x as u8, y as u8, 0]));
        let face = crop(&img, &FaceBox { x: 2, y: 3, width: 4, height: 5 });
        assert_eq!(face.dimensions(), (4, 5));
        assert_eq!(face.get_pixel(0, 0), &Rgb([2, 3, 0]));
        assert_eq!(face.get_pixel(3, 4), &Rgb([5, 7, 0]));
    }
}
