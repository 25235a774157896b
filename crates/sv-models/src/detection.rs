//! Detection records produced by the model ensemble.

use serde::{Deserialize, Serialize};

/// Number of COCO body keypoints produced by the pose estimator.
pub const KEYPOINT_COUNT: usize = 17;

/// Axis-aligned bounding box in pixel coordinates of the analysed frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl BoundingBox {
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    /// Build from center format (cx, cy, w, h).
    pub fn from_center(cx: f32, cy: f32, w: f32, h: f32) -> Self {
        Self {
            x1: cx - w / 2.0,
            y1: cy - h / 2.0,
            x2: cx + w / 2.0,
            y2: cy + h / 2.0,
        }
    }

    pub fn width(&self) -> f32 {
        (self.x2 - self.x1).max(0.0)
    }

    pub fn height(&self) -> f32 {
        (self.y2 - self.y1).max(0.0)
    }

    pub fn area(&self) -> f32 {
        self.width() * self.height()
    }

    pub fn center(&self) -> (f32, f32) {
        ((self.x1 + self.x2) / 2.0, (self.y1 + self.y2) / 2.0)
    }

    /// Clamp the box to a frame of the given size.
    pub fn clamp(&self, frame_width: u32, frame_height: u32) -> Self {
        let w = frame_width as f32;
        let h = frame_height as f32;
        Self {
            x1: self.x1.clamp(0.0, w),
            y1: self.y1.clamp(0.0, h),
            x2: self.x2.clamp(0.0, w),
            y2: self.y2.clamp(0.0, h),
        }
    }

    /// Grow the box by `margin` pixels on each side.
    pub fn expand(&self, margin: f32) -> Self {
        Self {
            x1: self.x1 - margin,
            y1: self.y1 - margin,
            x2: self.x2 + margin,
            y2: self.y2 + margin,
        }
    }

    /// Intersection over union with another box.
    pub fn iou(&self, other: &BoundingBox) -> f32 {
        let x1 = self.x1.max(other.x1);
        let y1 = self.y1.max(other.y1);
        let x2 = self.x2.min(other.x2);
        let y2 = self.y2.min(other.y2);

        let intersection = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
        let union = self.area() + other.area() - intersection;

        if union > 0.0 {
            intersection / union
        } else {
            0.0
        }
    }
}

/// Model family a detector belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectorRole {
    /// License plate / box detector; accepted boxes go to OCR
    Plate,
    /// Secondary object detector; annotation only
    Object,
    /// Human pose estimator
    Pose,
    /// Fire / smoke classifier
    Fire,
}

impl DetectorRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            DetectorRole::Plate => "plate",
            DetectorRole::Object => "object",
            DetectorRole::Pose => "pose",
            DetectorRole::Fire => "fire",
        }
    }
}

/// A single 2-D body landmark.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Keypoint {
    pub x: f32,
    pub y: f32,
    pub confidence: f32,
}

impl Keypoint {
    pub fn new(x: f32, y: f32, confidence: f32) -> Self {
        Self { x, y, confidence }
    }

    pub fn distance(&self, other: &Keypoint) -> f32 {
        ((self.x - other.x).powi(2) + (self.y - other.y).powi(2)).sqrt()
    }
}

/// Keypoint set for one person, in COCO order
/// (nose, eyes, ears, shoulders, elbows, wrists, hips, knees, ankles).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoseKeypoints {
    pub points: Vec<Keypoint>,
}

impl PoseKeypoints {
    pub const NOSE: usize = 0;
    pub const LEFT_SHOULDER: usize = 5;
    pub const RIGHT_SHOULDER: usize = 6;
    pub const LEFT_ELBOW: usize = 7;
    pub const RIGHT_ELBOW: usize = 8;
    pub const LEFT_WRIST: usize = 9;
    pub const RIGHT_WRIST: usize = 10;
    pub const LEFT_HIP: usize = 11;
    pub const RIGHT_HIP: usize = 12;

    pub fn new(points: Vec<Keypoint>) -> Self {
        Self { points }
    }

    /// Keypoint at `index` if present and at least `min_confidence`.
    pub fn get(&self, index: usize, min_confidence: f32) -> Option<&Keypoint> {
        self.points
            .get(index)
            .filter(|k| k.confidence >= min_confidence)
    }

    /// All keypoints at or above `min_confidence`.
    pub fn visible(&self, min_confidence: f32) -> impl Iterator<Item = &Keypoint> {
        self.points
            .iter()
            .filter(move |k| k.confidence >= min_confidence)
    }
}

/// Per-person pose classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PoseClass {
    Normal,
    Fallen,
    Aggression,
}

impl PoseClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            PoseClass::Normal => "Normal",
            PoseClass::Fallen => "Fallen",
            PoseClass::Aggression => "Aggression",
        }
    }

    pub fn is_incident(&self) -> bool {
        !matches!(self, PoseClass::Normal)
    }
}

/// Uniform detection record returned by every detector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    /// Model that produced the detection
    pub model: String,
    pub bbox: BoundingBox,
    pub confidence: f32,
    pub class_name: String,
    /// Present for pose-family detections
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keypoints: Option<PoseKeypoints>,
}

impl Detection {
    pub fn new(
        model: impl Into<String>,
        bbox: BoundingBox,
        confidence: f32,
        class_name: impl Into<String>,
    ) -> Self {
        Self {
            model: model.into(),
            bbox,
            confidence,
            class_name: class_name.into(),
            keypoints: None,
        }
    }

    pub fn with_keypoints(mut self, keypoints: PoseKeypoints) -> Self {
        self.keypoints = Some(keypoints);
        self
    }

    /// Whether the box meets the minimum size (in pixels).
    pub fn meets_min_size(&self, min_width: f32, min_height: f32) -> bool {
        self.bbox.width() >= min_width && self.bbox.height() >= min_height
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bbox_geometry() {
        let b = BoundingBox::from_center(50.0, 40.0, 20.0, 10.0);
        assert!((b.x1 - 40.0).abs() < 1e-4);
        assert!((b.y2 - 45.0).abs() < 1e-4);
        assert!((b.area() - 200.0).abs() < 1e-3);
        assert_eq!(b.center(), (50.0, 40.0));
    }

    #[test]
    fn test_bbox_clamp_and_expand() {
        let b = BoundingBox::new(2.0, 3.0, 98.0, 60.0).expand(5.0).clamp(100, 62);
        assert_eq!(b, BoundingBox::new(0.0, 0.0, 100.0, 62.0));
    }

    #[test]
    fn test_iou_identical_and_disjoint() {
        let a = BoundingBox::new(0.0, 0.0, 10.0, 10.0);
        let b = BoundingBox::new(20.0, 20.0, 30.0, 30.0);
        assert!((a.iou(&a) - 1.0).abs() < 1e-6);
        assert_eq!(a.iou(&b), 0.0);
    }

    #[test]
    fn test_min_size_filter() {
        let plate = Detection::new("plate", BoundingBox::new(0.0, 0.0, 80.0, 25.0), 0.9, "plate");
        let noise = Detection::new("plate", BoundingBox::new(0.0, 0.0, 30.0, 25.0), 0.9, "plate");
        assert!(plate.meets_min_size(50.0, 20.0));
        assert!(!noise.meets_min_size(50.0, 20.0));
    }

    #[test]
    fn test_low_confidence_keypoint_is_missing() {
        let mut points = vec![Keypoint::new(0.0, 0.0, 0.9); KEYPOINT_COUNT];
        points[PoseKeypoints::LEFT_WRIST] = Keypoint::new(5.0, 5.0, 0.1);
        let pose = PoseKeypoints::new(points);
        assert!(pose.get(PoseKeypoints::LEFT_WRIST, 0.3).is_none());
        assert!(pose.get(PoseKeypoints::NOSE, 0.3).is_some());
        assert_eq!(pose.visible(0.3).count(), KEYPOINT_COUNT - 1);
    }
}
