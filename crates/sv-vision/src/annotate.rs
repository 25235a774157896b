//! Frame annotation.

use image::{Rgb, RgbImage};
use imageproc::drawing::{
    draw_filled_circle_mut, draw_filled_rect_mut, draw_hollow_rect_mut, draw_line_segment_mut,
};
use imageproc::rect::Rect;
use sv_models::{Detection, PoseClass, PoseKeypoints};

use crate::font::{draw_text, text_width, GLYPH_HEIGHT};

const KEYPOINT_FLOOR: f32 = 0.3;

/// Caption band: glyph height plus a one-pixel margin above and below.
const CAPTION_HEIGHT: u32 = GLYPH_HEIGHT + 2;
const CAPTION_TEXT: Rgb<u8> = Rgb([0, 0, 0]);

/// COCO limb pairs drawn between keypoints.
const SKELETON: [(usize, usize); 12] = [
    (5, 6),
    (5, 7),
    (7, 9),
    (6, 8),
    (8, 10),
    (5, 11),
    (6, 12),
    (11, 12),
    (11, 13),
    (13, 15),
    (12, 14),
    (14, 16),
];

fn color_for(detection: &Detection) -> Rgb<u8> {
    if detection.keypoints.is_some() {
        return match detection.class_name.as_str() {
            s if s == PoseClass::Fallen.as_str() => Rgb([255, 0, 0]),
            s if s == PoseClass::Aggression.as_str() => Rgb([255, 0, 255]),
            _ => Rgb([0, 255, 0]),
        };
    }

    match detection.class_name.to_ascii_lowercase().as_str() {
        "fire" => Rgb([255, 0, 0]),
        "smoke" => Rgb([0, 255, 255]),
        _ => match detection.model.as_str() {
            "plate" => Rgb([0, 255, 0]),
            "object" => Rgb([0, 128, 255]),
            _ => Rgb([255, 255, 0]),
        },
    }
}

/// Returns `false` when the clamped box is too small to draw.
fn draw_box(canvas: &mut RgbImage, detection: &Detection, color: Rgb<u8>) -> bool {
    let b = detection.bbox.clamp(canvas.width(), canvas.height());
    let (w, h) = (b.width() as u32, b.height() as u32);
    if w < 2 || h < 2 {
        return false;
    }

    // Two nested outlines for a 2px border.
    draw_hollow_rect_mut(canvas, Rect::at(b.x1 as i32, b.y1 as i32).of_size(w, h), color);
    draw_hollow_rect_mut(
        canvas,
        Rect::at(b.x1 as i32 + 1, b.y1 as i32 + 1).of_size(w - 2, h - 2),
        color,
    );
    true
}

/// `"{class} {confidence}"` on a filled band above the box, or just inside
/// its top edge when there is no room above.
fn draw_caption(canvas: &mut RgbImage, detection: &Detection, color: Rgb<u8>) {
    let b = detection.bbox.clamp(canvas.width(), canvas.height());
    let text = format!("{} {:.2}", detection.class_name, detection.confidence);

    let (x, top) = (b.x1 as i32, b.y1 as i32);
    let top = if top >= CAPTION_HEIGHT as i32 {
        top - CAPTION_HEIGHT as i32
    } else {
        top
    };

    draw_filled_rect_mut(
        canvas,
        Rect::at(x, top).of_size(text_width(&text) + 2, CAPTION_HEIGHT),
        color,
    );
    draw_text(canvas, x + 1, top + 1, &text, CAPTION_TEXT);
}

fn draw_pose(canvas: &mut RgbImage, pose: &PoseKeypoints, color: Rgb<u8>) {
    for &(a, b) in &SKELETON {
        if let (Some(ka), Some(kb)) = (pose.get(a, KEYPOINT_FLOOR), pose.get(b, KEYPOINT_FLOOR)) {
            draw_line_segment_mut(canvas, (ka.x, ka.y), (kb.x, kb.y), color);
        }
    }
    for k in pose.visible(KEYPOINT_FLOOR) {
        draw_filled_circle_mut(canvas, (k.x as i32, k.y as i32), 3, color);
    }
}

/// Draw every detection box with its class and confidence caption (the pose
/// class for pose detections), plus keypoints, onto a copy of `frame`.
pub fn annotate(frame: &RgbImage, detections: &[Detection]) -> RgbImage {
    let mut canvas = frame.clone();
    for detection in detections {
        let color = color_for(detection);
        if !draw_box(&mut canvas, detection, color) {
            continue;
        }
        draw_caption(&mut canvas, detection, color);
        if let Some(pose) = &detection.keypoints {
            draw_pose(&mut canvas, pose, color);
        }
    }
    canvas
}

#[cfg(test)]
mod tests {
    use super::*;
    use sv_models::{BoundingBox, Keypoint, KEYPOINT_COUNT};

    #[test]
    fn test_box_is_drawn_and_source_untouched() {
        let frame = RgbImage::new(100, 60);
        let det = Detection::new("plate", BoundingBox::new(10.0, 10.0, 50.0, 30.0), 0.9, "plate");

        let out = annotate(&frame, &[det]);

        assert_eq!(*out.get_pixel(10, 10), Rgb([0, 255, 0]));
        assert_eq!(*out.get_pixel(30, 20), Rgb([0, 0, 0]));
        assert_eq!(*frame.get_pixel(10, 10), Rgb([0, 0, 0]));
    }

    #[test]
    fn test_fallen_pose_uses_alert_color() {
        let frame = RgbImage::new(100, 100);
        let mut points = vec![Keypoint::new(0.0, 0.0, 0.0); KEYPOINT_COUNT];
        points[0] = Keypoint::new(50.0, 50.0, 0.9);
        let det = Detection::new("pose", BoundingBox::new(20.0, 20.0, 80.0, 80.0), 0.8, "Fallen")
            .with_keypoints(PoseKeypoints::new(points));

        let out = annotate(&frame, &[det]);

        assert_eq!(*out.get_pixel(20, 20), Rgb([255, 0, 0]));
        assert_eq!(*out.get_pixel(50, 50), Rgb([255, 0, 0]));
    }

    #[test]
    fn test_caption_is_drawn_above_box() {
        let frame = RgbImage::new(120, 60);
        let det = Detection::new("fire", BoundingBox::new(20.0, 30.0, 100.0, 55.0), 0.91, "fire");

        let out = annotate(&frame, &[det]);

        // Band spans rows 21..30 from the box's left edge, text is
        // "fire 0.91" in black on the box color.
        let band: Vec<Rgb<u8>> = (21..30)
            .flat_map(|y| (20..20 + text_width("fire 0.91") + 2).map(move |x| (x, y)))
            .map(|(x, y)| *out.get_pixel(x, y))
            .collect();
        let filled = band.iter().filter(|p| **p == Rgb([255, 0, 0])).count();
        let glyphs = band.iter().filter(|p| **p == CAPTION_TEXT).count();
        assert!(filled > 0 && glyphs > 0);
        assert_eq!(filled + glyphs, band.len());

        // Nothing drawn above the band or to its right.
        assert_eq!(*out.get_pixel(20, 20), Rgb([0, 0, 0]));
        assert_eq!(*out.get_pixel(90, 25), Rgb([0, 0, 0]));
    }

    #[test]
    fn test_caption_moves_inside_box_at_top_edge() {
        let frame = RgbImage::new(100, 60);
        let det = Detection::new("plate", BoundingBox::new(10.0, 2.0, 90.0, 50.0), 0.5, "plate");

        let out = annotate(&frame, &[det]);

        // Band covers rows 2..=10 from the box's top edge; the box interior
        // below it stays clear.
        assert_eq!(*out.get_pixel(40, 10), Rgb([0, 255, 0]));
        assert_eq!(*out.get_pixel(40, 11), Rgb([0, 0, 0]));
    }

    #[test]
    fn test_degenerate_box_is_skipped() {
        let frame = RgbImage::new(10, 10);
        let det = Detection::new("object", BoundingBox::new(5.0, 5.0, 5.5, 9.0), 0.9, "box");
        assert_eq!(annotate(&frame, &[det]), frame);
    }
}
