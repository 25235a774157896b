//! Vision layer for the SmartVision pipeline.
//!
//! This crate provides:
//! - Camera stream capture through an FFmpeg MJPEG pipe
//! - JPEG decode/encode, resize and crop helpers
//! - ONNX Runtime detectors behind one `Detector` trait
//!   (box detectors, pose estimator, fire/smoke classifier)
//! - Geometric pose classification (fallen / aggression)
//! - Optional CLIP-style phrase ranking for fire context
//! - Frame annotation with captioned boxes and the live-view publish gate

pub mod annotate;
pub mod clip;
pub mod codec;
pub mod detector;
pub mod ensemble;
pub mod error;
pub mod fire;
pub mod font;
pub mod gate;
pub mod onnx;
pub mod pose;
pub mod source;
pub mod yolo;

pub use annotate::annotate;
pub use clip::{ClipConfig, ClipDescriber};
pub use codec::{crop_with_margin, decode_frame, encode_base64, encode_jpeg, resize_frame};
pub use detector::Detector;
pub use ensemble::{EnsembleConfig, ModelEnsemble};
pub use error::{VisionError, VisionResult};
pub use fire::{fire_probability, FIRE_THRESHOLD};
pub use gate::PublishGate;
pub use pose::{classify_pose, torso_angle, PoseRules, YoloPoseDetector, YoloPoseConfig};
pub use source::{FfmpegOpener, FfmpegSourceConfig, FrameSource, MjpegSplitter, StreamOpener};
pub use yolo::{YoloConfig, YoloDetector};
