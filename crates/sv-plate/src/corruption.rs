//! Compression-corruption detection and repair for plate crops.
//!
//! Heavily compressed or glitched crops show up as large flat blocks or as
//! blocks saturated with edges. Such crops get an edge-preserving smooth, a
//! percentile contrast stretch and a gamma lift before OCR.

use image::GrayImage;
use imageproc::contrast::stretch_contrast;
use imageproc::edges::canny;
use imageproc::filter::bilateral_filter;

const BLOCK_SIZE: u32 = 16;
const FLAT_STD_MAX: f32 = 4.0;
const EDGE_DENSITY_MAX: f32 = 0.35;
const CORRUPTED_BLOCK_RATIO: f32 = 0.30;

const CANNY_LOW: f32 = 50.0;
const CANNY_HIGH: f32 = 150.0;

const GAMMA: f32 = 0.8;
const STRETCH_LOW_PERCENTILE: f32 = 0.02;
const STRETCH_HIGH_PERCENTILE: f32 = 0.98;

/// Fraction of 16×16 blocks that are near-uniform or edge-dense.
pub fn suspicious_block_ratio(gray: &GrayImage) -> f32 {
    let (w, h) = gray.dimensions();
    if w < BLOCK_SIZE || h < BLOCK_SIZE {
        return 0.0;
    }

    let edges = canny(gray, CANNY_LOW, CANNY_HIGH);
    let mut total = 0u32;
    let mut suspicious = 0u32;

    for by in (0..=h - BLOCK_SIZE).step_by(BLOCK_SIZE as usize) {
        for bx in (0..=w - BLOCK_SIZE).step_by(BLOCK_SIZE as usize) {
            total += 1;

            let mut sum = 0f64;
            let mut sum_sq = 0f64;
            let mut edge_pixels = 0u32;
            for y in by..by + BLOCK_SIZE {
                for x in bx..bx + BLOCK_SIZE {
                    let v = gray.get_pixel(x, y)[0] as f64;
                    sum += v;
                    sum_sq += v * v;
                    if edges.get_pixel(x, y)[0] > 0 {
                        edge_pixels += 1;
                    }
                }
            }

            let n = (BLOCK_SIZE * BLOCK_SIZE) as f64;
            let mean = sum / n;
            let std = (sum_sq / n - mean * mean).max(0.0).sqrt() as f32;
            let edge_density = edge_pixels as f32 / n as f32;

            if std < FLAT_STD_MAX || edge_density > EDGE_DENSITY_MAX {
                suspicious += 1;
            }
        }
    }

    suspicious as f32 / total as f32
}

/// Whether the crop looks compression-corrupted.
pub fn is_corrupted(gray: &GrayImage) -> bool {
    suspicious_block_ratio(gray) > CORRUPTED_BLOCK_RATIO
}

fn percentile(gray: &GrayImage, p: f32) -> u8 {
    let mut histogram = [0u32; 256];
    for pixel in gray.pixels() {
        histogram[pixel[0] as usize] += 1;
    }

    let target = (p * (gray.width() * gray.height()) as f32).ceil() as u32;
    let mut seen = 0u32;
    for (value, count) in histogram.iter().enumerate() {
        seen += count;
        if seen >= target.max(1) {
            return value as u8;
        }
    }
    255
}

fn apply_gamma(gray: &mut GrayImage, gamma: f32) {
    let lut: Vec<u8> = (0..256)
        .map(|v| ((v as f32 / 255.0).powf(gamma) * 255.0).round().clamp(0.0, 255.0) as u8)
        .collect();
    for pixel in gray.pixels_mut() {
        pixel[0] = lut[pixel[0] as usize];
    }
}

/// Smooth, stretch and brighten a corrupted crop.
pub fn repair(gray: &GrayImage) -> GrayImage {
    let smoothed = bilateral_filter(gray, 9, 75.0, 75.0);

    let low = percentile(&smoothed, STRETCH_LOW_PERCENTILE);
    let high = percentile(&smoothed, STRETCH_HIGH_PERCENTILE);
    let mut stretched = if high > low {
        stretch_contrast(&smoothed, low, high)
    } else {
        smoothed
    };

    apply_gamma(&mut stretched, GAMMA);
    stretched
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    /// Gentle diagonal gradient: neither flat nor edge-dense.
    fn textured(width: u32, height: u32) -> GrayImage {
        GrayImage::from_fn(width, height, |x, y| Luma([(40 + x + 2 * y) as u8]))
    }

    #[test]
    fn test_flat_image_is_corrupted() {
        let flat = GrayImage::from_pixel(64, 32, Luma([128]));
        assert!((suspicious_block_ratio(&flat) - 1.0).abs() < 1e-6);
        assert!(is_corrupted(&flat));
    }

    #[test]
    fn test_textured_image_is_clean() {
        assert!(!is_corrupted(&textured(64, 32)));
    }

    #[test]
    fn test_tiny_crop_is_not_judged() {
        assert_eq!(suspicious_block_ratio(&GrayImage::new(10, 10)), 0.0);
    }

    #[test]
    fn test_percentile() {
        let img = GrayImage::from_fn(10, 10, |x, y| Luma([(y * 10 + x) as u8]));
        assert_eq!(percentile(&img, 0.25), 24);
        assert_eq!(percentile(&img, 0.75), 74);
    }

    #[test]
    fn test_gamma_brightens_midtones() {
        let mut img = GrayImage::from_pixel(2, 2, Luma([100]));
        apply_gamma(&mut img, GAMMA);
        assert!(img.get_pixel(0, 0)[0] > 100);
    }

    #[test]
    fn test_repair_keeps_dimensions() {
        let img = textured(40, 20);
        assert_eq!(repair(&img).dimensions(), (40, 20));
    }
}
