//! Fire/smoke scoring over classifier detections.

use sv_models::Detection;

/// Probability above which a frame is fire-suspected.
pub const FIRE_THRESHOLD: f32 = 0.5;

const FIRE_CLASSES: [&str; 2] = ["fire", "smoke"];

/// Max confidence over fire and smoke detections; 0.0 when there are none.
pub fn fire_probability(detections: &[Detection]) -> f32 {
    detections
        .iter()
        .filter(|d| {
            FIRE_CLASSES
                .iter()
                .any(|c| d.class_name.eq_ignore_ascii_case(c))
        })
        .map(|d| d.confidence)
        .fold(0.0, f32::max)
}

/// Up to `limit` detections of the `fire` class, strongest first. These are
/// the regions cropped for the describer.
pub fn strongest_fires(detections: &[Detection], limit: usize) -> Vec<&Detection> {
    let mut fires: Vec<&Detection> = detections
        .iter()
        .filter(|d| d.class_name.eq_ignore_ascii_case("fire"))
        .collect();
    fires.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
    fires.truncate(limit);
    fires
}
