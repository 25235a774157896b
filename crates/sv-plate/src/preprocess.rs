//! OCR input variants for a plate crop.

use image::imageops::FilterType;
use image::{GrayImage, RgbImage};
use imageproc::contrast::{adaptive_threshold, otsu_level, threshold};

use crate::corruption;

/// Crops narrower than this are upscaled before OCR.
pub const MIN_OCR_WIDTH: u32 = 200;

const ADAPTIVE_BLOCK_RADIUS: u32 = 15;

/// Preprocessed crop ready for OCR.
#[derive(Debug, Clone)]
pub struct PreparedCrop {
    /// Named variants: grayscale, Otsu, adaptive and the inversion of each
    pub variants: Vec<(&'static str, GrayImage)>,
    pub corrupted: bool,
}

/// Upscale narrow crops, keeping the aspect ratio.
pub fn upscale(image: &RgbImage) -> RgbImage {
    let (w, h) = image.dimensions();
    if w == 0 || w >= MIN_OCR_WIDTH {
        return image.clone();
    }
    let scale = MIN_OCR_WIDTH as f32 / w as f32;
    let new_h = ((h as f32 * scale).round() as u32).max(1);
    image::imageops::resize(image, MIN_OCR_WIDTH, new_h, FilterType::CatmullRom)
}

fn inverted(image: &GrayImage) -> GrayImage {
    let mut out = image.clone();
    image::imageops::invert(&mut out);
    out
}

/// Build every OCR variant for a crop.
pub fn prepare(crop: &RgbImage) -> PreparedCrop {
    let scaled = upscale(crop);
    let mut gray = image::imageops::grayscale(&scaled);

    let corrupted = corruption::is_corrupted(&gray);
    if corrupted {
        gray = corruption::repair(&gray);
    }

    let otsu = threshold(&gray, otsu_level(&gray));
    let adaptive = adaptive_threshold(&gray, ADAPTIVE_BLOCK_RADIUS);

    let variants = vec![
        ("gray_inv", inverted(&gray)),
        ("otsu_inv", inverted(&otsu)),
        ("adaptive_inv", inverted(&adaptive)),
        ("gray", gray),
        ("otsu", otsu),
        ("adaptive", adaptive),
    ];

    PreparedCrop {
        variants,
        corrupted,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn test_narrow_crop_is_upscaled_with_aspect() {
        let crop = RgbImage::from_pixel(100, 30, Rgb([200, 200, 200]));
        assert_eq!(upscale(&crop).dimensions(), (200, 60));
    }

    #[test]
    fn test_wide_crop_is_untouched() {
        let crop = RgbImage::from_pixel(320, 80, Rgb([10, 10, 10]));
        assert_eq!(upscale(&crop).dimensions(), (320, 80));
    }

    #[test]
    fn test_six_variants() {
        let crop = RgbImage::from_fn(120, 40, |x, _| {
            let v = if (x / 10) % 2 == 0 { 30 } else { 220 };
            Rgb([v, v, v])
        });
        let prepared = prepare(&crop);

        let names: Vec<&str> = prepared.variants.iter().map(|(n, _)| *n).collect();
        assert_eq!(names.len(), 6);
        assert!(names.contains(&"otsu") && names.contains(&"adaptive_inv"));
        for (_, img) in &prepared.variants {
            assert_eq!(img.dimensions(), (200, 67));
        }
    }
}
