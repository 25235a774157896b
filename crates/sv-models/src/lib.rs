//! Shared data models for the SmartVision pipeline.
//!
//! This crate provides Serde-serializable types for:
//! - Cameras and their health state
//! - Detections, bounding boxes and pose keypoints
//! - Plate candidates and extraction results
//! - Alert messages
//! - The shared store key space

pub mod alert;
pub mod camera;
pub mod detection;
pub mod keys;
pub mod plate;
pub mod run;

pub use alert::{Alert, AlertPriority, AlertType};
pub use camera::{CameraHealth, CameraId, CameraStream, HealthState, ZoneId};
pub use detection::{
    BoundingBox, Detection, DetectorRole, Keypoint, PoseClass, PoseKeypoints, KEYPOINT_COUNT,
};
pub use plate::{DetectionId, PlateCandidate, PlateExtractionResult};
pub use run::{RunStatus, RunSummary, StopReason};
