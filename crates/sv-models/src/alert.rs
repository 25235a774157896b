//! Alert messages fanned out to live subscribers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::camera::{CameraId, CameraStream};

/// Alert type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertType {
    UnauthorizedPlate,
    AuthorizedPlate,
    HumanBoxes,
    Fallen,
    Aggression,
    Fire,
    CameraOffline,
    CameraOnline,
    System,
}

impl AlertType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertType::UnauthorizedPlate => "unauthorized_plate",
            AlertType::AuthorizedPlate => "authorized_plate",
            AlertType::HumanBoxes => "human_boxes",
            AlertType::Fallen => "fallen",
            AlertType::Aggression => "aggression",
            AlertType::Fire => "fire",
            AlertType::CameraOffline => "camera_offline",
            AlertType::CameraOnline => "camera_online",
            AlertType::System => "system",
        }
    }

    /// Default priority for this alert type.
    pub fn default_priority(&self) -> AlertPriority {
        match self {
            AlertType::UnauthorizedPlate
            | AlertType::Fallen
            | AlertType::Aggression
            | AlertType::Fire => AlertPriority::High,
            AlertType::HumanBoxes | AlertType::CameraOffline | AlertType::System => {
                AlertPriority::Medium
            }
            AlertType::AuthorizedPlate | AlertType::CameraOnline => AlertPriority::Low,
        }
    }

    /// Incident types produced by the detection loop (subject to cooldown).
    pub fn is_incident(&self) -> bool {
        matches!(
            self,
            AlertType::HumanBoxes | AlertType::Fallen | AlertType::Aggression | AlertType::Fire
        )
    }
}

impl std::fmt::Display for AlertType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Alert priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertPriority {
    Low,
    Medium,
    High,
}

/// Structured alert message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    #[serde(rename = "type")]
    pub alert_type: AlertType,
    pub camera_id: CameraId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub camera_name: Option<String>,
    /// Plate text for plate alerts
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub matricule: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f32>,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<AlertPriority>,
    /// Base64-encoded JPEG evidence
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_base64: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl Alert {
    /// Create a bare alert with the type's default priority.
    pub fn new(alert_type: AlertType, camera_id: CameraId, message: impl Into<String>) -> Self {
        Self {
            alert_type,
            camera_id,
            camera_name: None,
            matricule: None,
            location: None,
            confidence: None,
            message: message.into(),
            timestamp: Utc::now(),
            priority: Some(alert_type.default_priority()),
            image_base64: None,
            details: None,
        }
    }

    /// Plate alert; `image_base64` is attached for unauthorized plates only.
    pub fn plate(
        camera: &CameraStream,
        plate: impl Into<String>,
        confidence: f32,
        authorized: bool,
        image_base64: Option<String>,
    ) -> Self {
        let plate = plate.into();
        let (alert_type, message) = if authorized {
            (
                AlertType::AuthorizedPlate,
                format!("Authorized vehicle {} detected", plate),
            )
        } else {
            (
                AlertType::UnauthorizedPlate,
                format!("Unauthorized vehicle {} detected", plate),
            )
        };

        let mut alert = Self::new(alert_type, camera.id, message)
            .with_camera(camera)
            .with_confidence(confidence);
        alert.matricule = Some(plate);
        if !authorized {
            alert.image_base64 = image_base64;
        }
        alert
    }

    /// Incident alert raised by the detection loop.
    pub fn incident(camera: &CameraStream, alert_type: AlertType, message: impl Into<String>) -> Self {
        Self::new(alert_type, camera.id, message).with_camera(camera)
    }

    /// Camera connectivity transition.
    pub fn camera_status(camera: &CameraStream, online: bool) -> Self {
        let (alert_type, message) = if online {
            (
                AlertType::CameraOnline,
                format!("{} is back online", camera.display_name()),
            )
        } else {
            (
                AlertType::CameraOffline,
                format!("{} is offline", camera.display_name()),
            )
        };
        Self::new(alert_type, camera.id, message).with_camera(camera)
    }

    /// System-level alert about a camera's pipeline.
    pub fn system(camera_id: CameraId, message: impl Into<String>) -> Self {
        Self::new(AlertType::System, camera_id, message)
    }

    pub fn with_camera(mut self, camera: &CameraStream) -> Self {
        self.camera_name = Some(camera.display_name());
        self.location = Some(camera.display_location());
        self
    }

    pub fn with_confidence(mut self, confidence: f32) -> Self {
        self.confidence = Some(confidence);
        self
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn with_image(mut self, image_base64: String) -> Self {
        self.image_base64 = Some(image_base64);
        self
    }
}
