//! Store key space and notification channel names.

use crate::camera::CameraId;

/// Latest raw frame written by the ingestor.
pub fn camera_frame(id: CameraId) -> String {
    format!("camera:{}:frame", id)
}

/// Lease guarding the single active ingestor for a camera.
pub fn ingest_lease(id: CameraId) -> String {
    format!("camera:{}:ingest_lease", id)
}

/// Lease guarding the single active orchestrator for a camera.
pub fn detect_lease(id: CameraId) -> String {
    format!("camera:{}:detect_lease", id)
}

/// Annotated live-view frame.
pub fn annotated_frame(id: CameraId) -> String {
    format!("frame:{}:annotated", id)
}

/// Annotated frame from the fire classifier.
pub fn fire_frame(id: CameraId) -> String {
    format!("frame:{}:fire", id)
}

/// Fire classification result JSON.
pub fn fire_result(id: CameraId) -> String {
    format!("result:{}:fire", id)
}

/// Last health state written by the monitor.
pub fn camera_status(id: CameraId) -> String {
    format!("camera:{}:status", id)
}

/// Audit record for an unauthorized-plate alert.
pub fn alert_record(id: CameraId, unix_seconds: i64) -> String {
    format!("alert:{}:{}", id, unix_seconds)
}

/// Channel names.
pub mod channels {
    use crate::camera::CameraId;

    pub const ALERTS: &str = "alerts";
    pub const NOTIFICATIONS: &str = "notifications";
    pub const CAMERA_STATUS: &str = "camera_status";

    pub fn camera_alerts(id: CameraId) -> String {
        format!("camera_{}_alerts", id)
    }

    pub fn camera_live(id: CameraId) -> String {
        format!("camera_{}_live", id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_formats() {
        let id = CameraId(12);
        assert_eq!(camera_frame(id), "camera:12:frame");
        assert_eq!(ingest_lease(id), "camera:12:ingest_lease");
        assert_eq!(fire_result(id), "result:12:fire");
        assert_eq!(alert_record(id, 1_700_000_000), "alert:12:1700000000");
        assert_eq!(channels::camera_alerts(id), "camera_12_alerts");
        assert_eq!(channels::camera_live(id), "camera_12_live");
    }
}
