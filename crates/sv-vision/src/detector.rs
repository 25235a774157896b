//! Detector capability shared by every model family.

use image::RgbImage;
use sv_models::{Detection, DetectorRole};

use crate::error::VisionResult;

/// A loaded model producing uniform detection records.
///
/// Calls are synchronous and may block on a shared device; callers run them
/// on the blocking pool under a timeout. Boxes are in pixel coordinates of
/// the image passed in.
pub trait Detector: Send + Sync {
    /// Model name used in logs, metrics and annotation colors.
    fn name(&self) -> &str;

    fn role(&self) -> DetectorRole;

    fn detect(&self, image: &RgbImage) -> VisionResult<Vec<Detection>>;
}
