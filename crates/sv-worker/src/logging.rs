//! Structured per-camera logging.
//!
//! Every long-lived task logs its lifecycle through a `CameraLogger` so the
//! `camera_id` and `role` fields are always present.

use sv_models::CameraId;
use tracing::{error, info, warn, Span};

/// Task role attached to camera logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskRole {
    Ingest,
    Detect,
    Plate,
    Health,
}

impl TaskRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskRole::Ingest => "ingest",
            TaskRole::Detect => "detect",
            TaskRole::Plate => "plate",
            TaskRole::Health => "health",
        }
    }
}

#[derive(Debug, Clone)]
pub struct CameraLogger {
    camera_id: CameraId,
    role: TaskRole,
}

impl CameraLogger {
    pub fn new(camera_id: CameraId, role: TaskRole) -> Self {
        Self { camera_id, role }
    }

    pub fn log_start(&self, message: &str) {
        info!(
            camera_id = %self.camera_id,
            role = self.role.as_str(),
            "Task started: {}", message
        );
    }

    pub fn log_progress(&self, message: &str) {
        info!(
            camera_id = %self.camera_id,
            role = self.role.as_str(),
            "{}", message
        );
    }

    pub fn log_warning(&self, message: &str) {
        warn!(
            camera_id = %self.camera_id,
            role = self.role.as_str(),
            "Task warning: {}", message
        );
    }

    pub fn log_error(&self, message: &str) {
        error!(
            camera_id = %self.camera_id,
            role = self.role.as_str(),
            "Task error: {}", message
        );
    }

    pub fn log_completion(&self, message: &str) {
        info!(
            camera_id = %self.camera_id,
            role = self.role.as_str(),
            "Task stopped: {}", message
        );
    }

    pub fn camera_id(&self) -> CameraId {
        self.camera_id
    }

    pub fn role(&self) -> TaskRole {
        self.role
    }

    /// Span carrying the camera and role, for instrumenting the task future.
    pub fn create_span(&self) -> Span {
        tracing::info_span!(
            "camera_task",
            camera_id = %self.camera_id,
            role = self.role.as_str()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_camera_logger() {
        let logger = CameraLogger::new(CameraId(7), TaskRole::Detect);
        assert_eq!(logger.camera_id(), CameraId(7));
        assert_eq!(logger.role().as_str(), "detect");
    }
}
