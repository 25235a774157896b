//! YOLOv8-style box detector.
//!
//! Used for the plate/box detector, the secondary object detector and the
//! fire/smoke classifier; they differ only in weights and class names.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use image::RgbImage;
use ndarray::Array;
use ort::session::Session;
use serde::{Deserialize, Serialize};
use sv_models::{BoundingBox, Detection, DetectorRole};
use tracing::{debug, info};

use crate::codec::resize_frame;
use crate::detector::Detector;
use crate::error::{VisionError, VisionResult};
use crate::onnx::{create_session, nchw_tensor, run_single_output};

/// Configuration for a box detector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct YoloConfig {
    /// Model name (logs, metrics, annotation)
    pub name: String,
    pub role: DetectorRole,
    pub model_path: PathBuf,
    /// Class names in model output order
    pub class_names: Vec<String>,
    pub confidence_threshold: f32,
    pub nms_threshold: f32,
    pub input_width: u32,
    pub input_height: u32,
    /// Output tensor name
    pub output_name: String,
}

impl YoloConfig {
    pub fn new(
        name: impl Into<String>,
        role: DetectorRole,
        model_path: impl Into<PathBuf>,
        class_names: Vec<String>,
    ) -> Self {
        Self {
            name: name.into(),
            role,
            model_path: model_path.into(),
            class_names,
            confidence_threshold: 0.25,
            nms_threshold: 0.45,
            input_width: 640,
            input_height: 384,
            output_name: "output0".to_string(),
        }
    }

    /// Single-class license plate detector.
    pub fn plate(model_path: impl Into<PathBuf>) -> Self {
        Self::new("plate", DetectorRole::Plate, model_path, vec!["plate".to_string()])
    }

    /// Fire/smoke classifier.
    pub fn fire(model_path: impl Into<PathBuf>) -> Self {
        Self::new(
            "fire",
            DetectorRole::Fire,
            model_path,
            vec!["fire".to_string(), "smoke".to_string()],
        )
    }
}

/// Raw candidate before NMS.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub bbox: BoundingBox,
    pub class_id: usize,
    pub confidence: f32,
}

/// Decode a `[1, 4 + C, N]` output into candidates above `threshold`.
///
/// Boxes are scaled by `(scale_x, scale_y)` from model input to image pixels.
pub fn decode_boxes(
    output: &[f32],
    num_classes: usize,
    threshold: f32,
    scale_x: f32,
    scale_y: f32,
) -> VisionResult<Vec<Candidate>> {
    let num_features = 4 + num_classes;
    if num_classes == 0 || output.len() % num_features != 0 {
        return Err(VisionError::invalid_output(
            "yolo",
            format!(
                "output length {} is not a multiple of {} features",
                output.len(),
                num_features
            ),
        ));
    }
    let num_boxes = output.len() / num_features;

    // [features, boxes] -> [boxes, features]
    let output_array = Array::from_shape_vec((num_features, num_boxes), output.to_vec())
        .map_err(|e| VisionError::invalid_output("yolo", e.to_string()))?;
    let transposed = output_array.t();

    let mut candidates = Vec::new();
    for i in 0..num_boxes {
        let (best_class, best_score) = (0..num_classes)
            .map(|c| (c, transposed[[i, 4 + c]]))
            .fold((0, f32::MIN), |best, cur| if cur.1 > best.1 { cur } else { best });

        if best_score < threshold {
            continue;
        }

        let cx = transposed[[i, 0]] * scale_x;
        let cy = transposed[[i, 1]] * scale_y;
        let w = transposed[[i, 2]] * scale_x;
        let h = transposed[[i, 3]] * scale_y;

        candidates.push(Candidate {
            bbox: BoundingBox::from_center(cx, cy, w, h),
            class_id: best_class,
            confidence: best_score,
        });
    }

    Ok(candidates)
}

/// Per-class non-maximum suppression.
pub fn non_maximum_suppression(mut candidates: Vec<Candidate>, iou_threshold: f32) -> Vec<Candidate> {
    candidates.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let mut keep: Vec<Candidate> = Vec::new();
    for candidate in candidates {
        let overlaps = keep.iter().any(|k| {
            k.class_id == candidate.class_id && k.bbox.iou(&candidate.bbox) > iou_threshold
        });
        if !overlaps {
            keep.push(candidate);
        }
    }
    keep
}

/// Box detector backed by an ONNX session.
pub struct YoloDetector {
    session: Mutex<Session>,
    config: YoloConfig,
}

impl YoloDetector {
    /// Load the model. Fails if the file is missing or cannot be parsed.
    pub fn new(config: YoloConfig) -> VisionResult<Self> {
        let session = Mutex::new(create_session(Path::new(&config.model_path))?);
        info!(
            model = %config.name,
            model_path = %config.model_path.display(),
            classes = config.class_names.len(),
            "Detector initialized"
        );
        Ok(Self { session, config })
    }

    pub fn config(&self) -> &YoloConfig {
        &self.config
    }
}

impl Detector for YoloDetector {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn role(&self) -> DetectorRole {
        self.config.role
    }

    fn detect(&self, image: &RgbImage) -> VisionResult<Vec<Detection>> {
        let cfg = &self.config;
        let input = resize_frame(image, cfg.input_width, cfg.input_height);
        let tensor = nchw_tensor(&input, [0.0; 3], [1.0; 3])?;
        let output = run_single_output(&self.session, &cfg.name, tensor, &cfg.output_name)?;

        let scale_x = image.width() as f32 / cfg.input_width as f32;
        let scale_y = image.height() as f32 / cfg.input_height as f32;
        let candidates = decode_boxes(
            &output,
            cfg.class_names.len(),
            cfg.confidence_threshold,
            scale_x,
            scale_y,
        )
        .map_err(|e| VisionError::invalid_output(&cfg.name, e.to_string()))?;

        let detections: Vec<Detection> = non_maximum_suppression(candidates, cfg.nms_threshold)
            .into_iter()
            .map(|c| {
                let class_name = cfg
                    .class_names
                    .get(c.class_id)
                    .cloned()
                    .unwrap_or_else(|| c.class_id.to_string());
                Detection::new(
                    cfg.name.clone(),
                    c.bbox.clamp(image.width(), image.height()),
                    c.confidence,
                    class_name,
                )
            })
            .collect();

        debug!(model = %cfg.name, count = detections.len(), "Detection completed");
        Ok(detections)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Build a `[4 + C, N]` feature-major buffer from per-box rows.
    fn feature_major(rows: &[Vec<f32>]) -> Vec<f32> {
        let features = rows[0].len();
        (0..features)
            .flat_map(|f| rows.iter().map(move |r| r[f]))
            .collect()
    }

    #[test]
    fn test_decode_picks_best_class_and_scales() {
        let rows = vec![
            vec![100.0, 50.0, 40.0, 20.0, 0.1, 0.9],
            vec![10.0, 10.0, 4.0, 4.0, 0.05, 0.1],
        ];
        let out = decode_boxes(&feature_major(&rows), 2, 0.25, 2.0, 1.0).unwrap();

        assert_eq!(out.len(), 1);
        assert_eq!(out[0].class_id, 1);
        assert!((out[0].confidence - 0.9).abs() < 1e-6);
        assert_eq!(out[0].bbox, BoundingBox::new(160.0, 40.0, 240.0, 60.0));
    }

    #[test]
    fn test_decode_rejects_wrong_length() {
        assert!(decode_boxes(&[0.0; 7], 2, 0.25, 1.0, 1.0).is_err());
    }

    #[test]
    fn test_nms_suppresses_same_class_overlap_only() {
        let a = Candidate {
            bbox: BoundingBox::new(0.0, 0.0, 10.0, 10.0),
            class_id: 0,
            confidence: 0.9,
        };
        let b = Candidate {
            bbox: BoundingBox::new(1.0, 1.0, 10.0, 10.0),
            class_id: 0,
            confidence: 0.8,
        };
        let c = Candidate {
            bbox: BoundingBox::new(1.0, 1.0, 10.0, 10.0),
            class_id: 1,
            confidence: 0.7,
        };

        let kept = non_maximum_suppression(vec![b, c, a.clone()], 0.45);
        assert_eq!(kept.len(), 2);
        assert_eq!(kept[0], a);
        assert_eq!(kept[1].class_id, 1);
    }

    #[test]
    fn test_preset_configs() {
        let plate = YoloConfig::plate("models/plate.onnx");
        assert_eq!(plate.role, DetectorRole::Plate);
        assert_eq!((plate.input_width, plate.input_height), (640, 384));

        let fire = YoloConfig::fire("models/fire.onnx");
        assert_eq!(fire.class_names, vec!["fire", "smoke"]);
    }

    #[test]
    fn test_missing_model_is_reported() {
        let err = YoloDetector::new(YoloConfig::plate("/nonexistent/plate.onnx")).err().unwrap();
        assert!(matches!(err, VisionError::ModelNotFound(_)));
    }
}
