//! JPEG decode/encode and frame geometry helpers.

use base64::Engine;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{ColorType, RgbImage};
use sv_models::BoundingBox;

use crate::error::{VisionError, VisionResult};

/// Quality used for every JPEG the pipeline writes.
pub const JPEG_QUALITY: u8 = 95;

/// Decode stored frame bytes into an RGB image.
pub fn decode_frame(bytes: &[u8]) -> VisionResult<RgbImage> {
    if bytes.is_empty() {
        return Err(VisionError::decode("empty frame payload"));
    }

    image::load_from_memory(bytes)
        .map(|img| img.to_rgb8())
        .map_err(|e| VisionError::decode(e.to_string()))
}

/// Encode an RGB image as JPEG.
pub fn encode_jpeg(image: &RgbImage, quality: u8) -> VisionResult<Vec<u8>> {
    let mut buf = Vec::new();
    JpegEncoder::new_with_quality(&mut buf, quality)
        .encode(image.as_raw(), image.width(), image.height(), ColorType::Rgb8)
        .map_err(|e| VisionError::encode(e.to_string()))?;
    Ok(buf)
}

/// Standard base64 of arbitrary bytes (alert evidence payloads).
pub fn encode_base64(bytes: &[u8]) -> String {
    base64::engine::general_purpose::STANDARD.encode(bytes)
}

/// Resize to exact model input dimensions. No-op when already that size.
pub fn resize_frame(image: &RgbImage, width: u32, height: u32) -> RgbImage {
    if image.width() == width && image.height() == height {
        return image.clone();
    }
    image::imageops::resize(image, width, height, FilterType::Triangle)
}

/// Crop `bbox` grown by `margin` pixels, clamped to the image.
///
/// Returns `None` when the clamped region is empty.
pub fn crop_with_margin(image: &RgbImage, bbox: &BoundingBox, margin: f32) -> Option<RgbImage> {
    let region = bbox.expand(margin).clamp(image.width(), image.height());

    let x = region.x1.floor() as u32;
    let y = region.y1.floor() as u32;
    let x2 = (region.x2.ceil() as u32).min(image.width());
    let y2 = (region.y2.ceil() as u32).min(image.height());

    if x2 <= x || y2 <= y {
        return None;
    }

    Some(image::imageops::crop_imm(image, x, y, x2 - x, y2 - y).to_image())
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    fn sample(width: u32, height: u32) -> RgbImage {
        RgbImage::from_fn(width, height, |x, y| Rgb([(x % 256) as u8, (y % 256) as u8, 128]))
    }

    #[test]
    fn test_encode_then_decode_keeps_dimensions() {
        let jpeg = encode_jpeg(&sample(64, 48), JPEG_QUALITY).unwrap();
        assert_eq!(&jpeg[..2], &[0xFF, 0xD8]);

        let decoded = decode_frame(&jpeg).unwrap();
        assert_eq!(decoded.dimensions(), (64, 48));
    }

    #[test]
    fn test_garbage_fails_to_decode() {
        assert!(decode_frame(b"not a jpeg at all").is_err());
        assert!(decode_frame(&[]).is_err());
    }

    #[test]
    fn test_resize_to_model_input() {
        let resized = resize_frame(&sample(1280, 720), 640, 384);
        assert_eq!(resized.dimensions(), (640, 384));
    }

    #[test]
    fn test_crop_is_clamped_to_frame() {
        let img = sample(100, 50);
        let crop = crop_with_margin(&img, &BoundingBox::new(2.0, 10.0, 60.0, 48.0), 5.0).unwrap();
        // x: 0..65, y: 5..50
        assert_eq!(crop.dimensions(), (65, 45));
    }

    #[test]
    fn test_crop_outside_frame_is_none() {
        let img = sample(100, 50);
        assert!(crop_with_margin(&img, &BoundingBox::new(200.0, 200.0, 260.0, 240.0), 5.0).is_none());
    }

    #[test]
    fn test_base64() {
        assert_eq!(encode_base64(b"hi"), "aGk=");
    }
}
