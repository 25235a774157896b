//! Human pose estimation and geometric incident rules.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use image::RgbImage;
use ndarray::Array;
use ort::session::Session;
use serde::{Deserialize, Serialize};
use sv_models::{
    BoundingBox, Detection, DetectorRole, Keypoint, PoseClass, PoseKeypoints, KEYPOINT_COUNT,
};
use tracing::{debug, info};

use crate::codec::resize_frame;
use crate::detector::Detector;
use crate::error::{VisionError, VisionResult};
use crate::onnx::{create_session, nchw_tensor, run_single_output};
use crate::yolo::{non_maximum_suppression, Candidate};

/// Thresholds for the fallen / aggression rules.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoseRules {
    /// Max deviation of the torso from horizontal for a fall (degrees)
    pub fall_angle_tolerance: f32,
    /// Mean keypoint height must be below this fraction of the frame
    pub lower_band_start: f32,
    /// Wrist-to-head and wrist-to-shoulder distance for a raised fist (px)
    pub wrist_proximity_px: f32,
    /// Elbow angle below which the arm counts as bent (degrees)
    pub elbow_bend_max: f32,
    /// Torso angle range considered upright (degrees)
    pub upright_min: f32,
    pub upright_max: f32,
    /// Landmarks below this confidence are treated as missing
    pub min_keypoint_confidence: f32,
}

impl Default for PoseRules {
    fn default() -> Self {
        Self {
            fall_angle_tolerance: 30.0,
            lower_band_start: 0.6,
            wrist_proximity_px: 60.0,
            elbow_bend_max: 120.0,
            upright_min: 70.0,
            upright_max: 110.0,
            min_keypoint_confidence: 0.3,
        }
    }
}

fn midpoint(a: Option<&Keypoint>, b: Option<&Keypoint>) -> Option<(f32, f32)> {
    match (a, b) {
        (Some(a), Some(b)) => Some(((a.x + b.x) / 2.0, (a.y + b.y) / 2.0)),
        (Some(k), None) | (None, Some(k)) => Some((k.x, k.y)),
        (None, None) => None,
    }
}

/// Torso angle relative to horizontal, in `[0, 180)` degrees.
///
/// Measured from the shoulder midpoint to the hip midpoint; 90 is upright.
pub fn torso_angle(pose: &PoseKeypoints, min_confidence: f32) -> Option<f32> {
    let shoulders = midpoint(
        pose.get(PoseKeypoints::LEFT_SHOULDER, min_confidence),
        pose.get(PoseKeypoints::RIGHT_SHOULDER, min_confidence),
    )?;
    let hips = midpoint(
        pose.get(PoseKeypoints::LEFT_HIP, min_confidence),
        pose.get(PoseKeypoints::RIGHT_HIP, min_confidence),
    )?;

    let dx = hips.0 - shoulders.0;
    let dy = hips.1 - shoulders.1;
    if dx == 0.0 && dy == 0.0 {
        return None;
    }

    Some(dy.atan2(dx).to_degrees().rem_euclid(180.0))
}

/// Interior angle at `b` of the path a-b-c, in degrees.
fn joint_angle(a: &Keypoint, b: &Keypoint, c: &Keypoint) -> Option<f32> {
    let (v1x, v1y) = (a.x - b.x, a.y - b.y);
    let (v2x, v2y) = (c.x - b.x, c.y - b.y);
    let norm = (v1x.hypot(v1y)) * (v2x.hypot(v2y));
    if norm == 0.0 {
        return None;
    }
    let cos = ((v1x * v2x + v1y * v2y) / norm).clamp(-1.0, 1.0);
    Some(cos.acos().to_degrees())
}

fn is_fallen(pose: &PoseKeypoints, frame_height: u32, rules: &PoseRules) -> bool {
    let min_conf = rules.min_keypoint_confidence;
    let Some(angle) = torso_angle(pose, min_conf) else {
        return false;
    };
    let horizontal =
        angle <= rules.fall_angle_tolerance || angle >= 180.0 - rules.fall_angle_tolerance;
    if !horizontal {
        return false;
    }

    let visible: Vec<&Keypoint> = pose.visible(min_conf).collect();
    if visible.len() < 2 {
        return false;
    }

    let (mut min_x, mut max_x) = (f32::MAX, f32::MIN);
    let (mut min_y, mut max_y) = (f32::MAX, f32::MIN);
    for k in &visible {
        min_x = min_x.min(k.x);
        max_x = max_x.max(k.x);
        min_y = min_y.min(k.y);
        max_y = max_y.max(k.y);
    }
    let wider_than_tall = (max_x - min_x) > (max_y - min_y);

    let mean_y = visible.iter().map(|k| k.y).sum::<f32>() / visible.len() as f32;
    let low_in_frame = mean_y >= frame_height as f32 * rules.lower_band_start;

    wider_than_tall && low_in_frame
}

fn is_aggressive(pose: &PoseKeypoints, rules: &PoseRules) -> bool {
    let min_conf = rules.min_keypoint_confidence;
    let Some(angle) = torso_angle(pose, min_conf) else {
        return false;
    };
    if angle < rules.upright_min || angle > rules.upright_max {
        return false;
    }
    let Some(head) = pose.get(PoseKeypoints::NOSE, min_conf) else {
        return false;
    };

    let sides = [
        (
            PoseKeypoints::LEFT_SHOULDER,
            PoseKeypoints::LEFT_ELBOW,
            PoseKeypoints::LEFT_WRIST,
        ),
        (
            PoseKeypoints::RIGHT_SHOULDER,
            PoseKeypoints::RIGHT_ELBOW,
            PoseKeypoints::RIGHT_WRIST,
        ),
    ];

    sides.iter().any(|&(s, e, w)| {
        let (Some(shoulder), Some(elbow), Some(wrist)) = (
            pose.get(s, min_conf),
            pose.get(e, min_conf),
            pose.get(w, min_conf),
        ) else {
            return false;
        };

        wrist.distance(head) < rules.wrist_proximity_px
            && wrist.distance(shoulder) < rules.wrist_proximity_px
            && joint_angle(shoulder, elbow, wrist).is_some_and(|a| a < rules.elbow_bend_max)
    })
}

/// Classify one person's keypoints. Fallen takes precedence over aggression.
pub fn classify_pose(pose: &PoseKeypoints, frame_height: u32, rules: &PoseRules) -> PoseClass {
    if is_fallen(pose, frame_height, rules) {
        PoseClass::Fallen
    } else if is_aggressive(pose, rules) {
        PoseClass::Aggression
    } else {
        PoseClass::Normal
    }
}

/// Configuration for the pose estimator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct YoloPoseConfig {
    pub name: String,
    pub model_path: PathBuf,
    pub confidence_threshold: f32,
    pub nms_threshold: f32,
    pub input_width: u32,
    pub input_height: u32,
    pub output_name: String,
    pub rules: PoseRules,
}

impl YoloPoseConfig {
    pub fn new(model_path: impl Into<PathBuf>) -> Self {
        Self {
            name: "pose".to_string(),
            model_path: model_path.into(),
            confidence_threshold: 0.25,
            nms_threshold: 0.45,
            input_width: 640,
            input_height: 384,
            output_name: "output0".to_string(),
            rules: PoseRules::default(),
        }
    }
}

/// Decode a `[1, 5 + 17*3, N]` pose output into person boxes with keypoints.
pub fn decode_poses(
    output: &[f32],
    threshold: f32,
    scale_x: f32,
    scale_y: f32,
) -> VisionResult<Vec<(Candidate, PoseKeypoints)>> {
    let num_features = 5 + KEYPOINT_COUNT * 3;
    if output.len() % num_features != 0 {
        return Err(VisionError::invalid_output(
            "pose",
            format!("output length {} is not a multiple of {}", output.len(), num_features),
        ));
    }
    let num_boxes = output.len() / num_features;

    let output_array = Array::from_shape_vec((num_features, num_boxes), output.to_vec())
        .map_err(|e| VisionError::invalid_output("pose", e.to_string()))?;
    let rows = output_array.t();

    let mut people = Vec::new();
    for i in 0..num_boxes {
        let confidence = rows[[i, 4]];
        if confidence < threshold {
            continue;
        }

        let bbox = BoundingBox::from_center(
            rows[[i, 0]] * scale_x,
            rows[[i, 1]] * scale_y,
            rows[[i, 2]] * scale_x,
            rows[[i, 3]] * scale_y,
        );
        let points = (0..KEYPOINT_COUNT)
            .map(|k| {
                let base = 5 + k * 3;
                Keypoint::new(
                    rows[[i, base]] * scale_x,
                    rows[[i, base + 1]] * scale_y,
                    rows[[i, base + 2]],
                )
            })
            .collect();

        people.push((
            Candidate {
                bbox,
                class_id: 0,
                confidence,
            },
            PoseKeypoints::new(points),
        ));
    }

    Ok(people)
}

/// Pose estimator that labels each person with its [`PoseClass`].
pub struct YoloPoseDetector {
    session: Mutex<Session>,
    config: YoloPoseConfig,
}

impl YoloPoseDetector {
    pub fn new(config: YoloPoseConfig) -> VisionResult<Self> {
        let session = Mutex::new(create_session(Path::new(&config.model_path))?);
        info!(
            model = %config.name,
            model_path = %config.model_path.display(),
            "Pose estimator initialized"
        );
        Ok(Self { session, config })
    }
}

impl Detector for YoloPoseDetector {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn role(&self) -> DetectorRole {
        DetectorRole::Pose
    }

    fn detect(&self, image: &RgbImage) -> VisionResult<Vec<Detection>> {
        let cfg = &self.config;
        let input = resize_frame(image, cfg.input_width, cfg.input_height);
        let tensor = nchw_tensor(&input, [0.0; 3], [1.0; 3])?;
        let output = run_single_output(&self.session, &cfg.name, tensor, &cfg.output_name)?;

        let scale_x = image.width() as f32 / cfg.input_width as f32;
        let scale_y = image.height() as f32 / cfg.input_height as f32;
        let people = decode_poses(&output, cfg.confidence_threshold, scale_x, scale_y)?;

        // NMS on the boxes, then re-attach keypoints by box identity.
        let kept = non_maximum_suppression(
            people.iter().map(|(c, _)| c.clone()).collect(),
            cfg.nms_threshold,
        );

        let detections: Vec<Detection> = people
            .into_iter()
            .filter(|(c, _)| kept.iter().any(|k| k == c))
            .map(|(c, keypoints)| {
                let class = classify_pose(&keypoints, image.height(), &cfg.rules);
                Detection::new(
                    cfg.name.clone(),
                    c.bbox.clamp(image.width(), image.height()),
                    c.confidence,
                    class.as_str(),
                )
                .with_keypoints(keypoints)
            })
            .collect();

        debug!(model = %cfg.name, people = detections.len(), "Pose estimation completed");
        Ok(detections)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pose_from(points: &[(usize, f32, f32)]) -> PoseKeypoints {
        let mut all = vec![Keypoint::new(0.0, 0.0, 0.0); KEYPOINT_COUNT];
        for &(idx, x, y) in points {
            all[idx] = Keypoint::new(x, y, 0.9);
        }
        PoseKeypoints::new(all)
    }

    /// Person lying across the bottom of a 640x384 frame.
    fn lying_person() -> PoseKeypoints {
        pose_from(&[
            (PoseKeypoints::NOSE, 200.0, 320.0),
            (PoseKeypoints::LEFT_SHOULDER, 240.0, 310.0),
            (PoseKeypoints::RIGHT_SHOULDER, 240.0, 330.0),
            (PoseKeypoints::LEFT_HIP, 340.0, 315.0),
            (PoseKeypoints::RIGHT_HIP, 340.0, 335.0),
            (13, 400.0, 318.0),
            (14, 400.0, 338.0),
            (15, 460.0, 320.0),
            (16, 460.0, 340.0),
        ])
    }

    /// Person standing centered.
    fn standing_person() -> PoseKeypoints {
        pose_from(&[
            (PoseKeypoints::NOSE, 320.0, 80.0),
            (PoseKeypoints::LEFT_SHOULDER, 300.0, 120.0),
            (PoseKeypoints::RIGHT_SHOULDER, 340.0, 120.0),
            (PoseKeypoints::LEFT_ELBOW, 295.0, 170.0),
            (PoseKeypoints::RIGHT_ELBOW, 345.0, 170.0),
            (PoseKeypoints::LEFT_WRIST, 293.0, 215.0),
            (PoseKeypoints::RIGHT_WRIST, 347.0, 215.0),
            (PoseKeypoints::LEFT_HIP, 305.0, 220.0),
            (PoseKeypoints::RIGHT_HIP, 335.0, 220.0),
            (15, 305.0, 330.0),
            (16, 335.0, 330.0),
        ])
    }

    #[test]
    fn test_torso_angle() {
        let standing = torso_angle(&standing_person(), 0.3).unwrap();
        assert!((standing - 90.0).abs() < 1e-3);

        let lying = torso_angle(&lying_person(), 0.3).unwrap();
        assert!(lying < 10.0 || lying > 170.0);
    }

    #[test]
    fn test_lying_low_wide_person_is_fallen() {
        let rules = PoseRules::default();
        assert_eq!(classify_pose(&lying_person(), 384, &rules), PoseClass::Fallen);
    }

    #[test]
    fn test_standing_centered_person_is_normal() {
        let rules = PoseRules::default();
        assert_eq!(classify_pose(&standing_person(), 384, &rules), PoseClass::Normal);
    }

    #[test]
    fn test_lying_person_high_in_frame_is_not_fallen() {
        // Same pose, shifted into the top half (e.g. a bed seen from above).
        let mut pose = lying_person();
        for k in &mut pose.points {
            k.y -= 250.0;
        }
        assert_ne!(classify_pose(&pose, 384, &PoseRules::default()), PoseClass::Fallen);
    }

    #[test]
    fn test_raised_fist_is_aggression() {
        let mut pose = standing_person();
        // Right forearm folded up beside the head.
        pose.points[PoseKeypoints::RIGHT_ELBOW] = Keypoint::new(380.0, 140.0, 0.9);
        pose.points[PoseKeypoints::RIGHT_WRIST] = Keypoint::new(350.0, 95.0, 0.9);

        assert_eq!(
            classify_pose(&pose, 384, &PoseRules::default()),
            PoseClass::Aggression
        );
    }

    #[test]
    fn test_missing_landmark_does_not_fire_rule() {
        let mut pose = standing_person();
        pose.points[PoseKeypoints::RIGHT_ELBOW] = Keypoint::new(380.0, 140.0, 0.9);
        pose.points[PoseKeypoints::RIGHT_WRIST] = Keypoint::new(350.0, 95.0, 0.9);
        // Head below the confidence floor
        pose.points[PoseKeypoints::NOSE].confidence = 0.1;

        assert_eq!(
            classify_pose(&pose, 384, &PoseRules::default()),
            PoseClass::Normal
        );
    }

    #[test]
    fn test_decode_poses_scales_keypoints() {
        let features = 5 + KEYPOINT_COUNT * 3;
        let mut row = vec![0.0f32; features];
        row[..5].copy_from_slice(&[100.0, 100.0, 20.0, 40.0, 0.8]);
        row[5] = 10.0;
        row[6] = 20.0;
        row[7] = 0.9;

        // Single box: feature-major equals row-major.
        let people = decode_poses(&row, 0.25, 2.0, 0.5).unwrap();
        assert_eq!(people.len(), 1);
        let (candidate, keypoints) = &people[0];
        assert_eq!(candidate.bbox, BoundingBox::new(180.0, 40.0, 220.0, 60.0));
        assert_eq!(keypoints.points[0], Keypoint::new(20.0, 10.0, 0.9));
    }
}
