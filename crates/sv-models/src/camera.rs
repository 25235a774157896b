//! Camera definitions and health state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Unique identifier for a camera.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CameraId(pub u64);

impl CameraId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn value(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for CameraId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for CameraId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

/// Reference to the zone a camera is assigned to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ZoneId(pub String);

impl ZoneId {
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ZoneId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

fn default_sample_fps() -> f32 {
    5.0
}

/// A registered camera stream.
///
/// Read-only to the pipeline; one ingestor and one orchestrator run per camera.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CameraStream {
    /// Camera ID
    pub id: CameraId,
    /// Display name
    #[serde(default)]
    pub name: Option<String>,
    /// Stream URI (rtsp://, http://, or a local file path)
    pub source_uri: String,
    /// Zone the camera belongs to (authorization scope)
    #[serde(default)]
    pub zone: Option<ZoneId>,
    /// Human-readable location label
    #[serde(default)]
    pub location: Option<String>,
    /// Desired sample rate (frames per second written to the store)
    #[serde(default = "default_sample_fps")]
    pub sample_fps: f32,
}

impl CameraStream {
    /// Create a camera with default sample rate and no zone.
    pub fn new(id: impl Into<CameraId>, source_uri: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: None,
            source_uri: source_uri.into(),
            zone: None,
            location: None,
            sample_fps: default_sample_fps(),
        }
    }

    pub fn with_zone(mut self, zone: impl Into<String>) -> Self {
        self.zone = Some(ZoneId::from_string(zone));
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }

    pub fn with_sample_fps(mut self, fps: f32) -> Self {
        self.sample_fps = fps;
        self
    }

    /// Name used in alerts; falls back to "Camera {id}".
    pub fn display_name(&self) -> String {
        self.name
            .clone()
            .unwrap_or_else(|| format!("Camera {}", self.id))
    }

    /// Location used in alerts; falls back to "Undefined".
    pub fn display_location(&self) -> String {
        self.location
            .clone()
            .unwrap_or_else(|| "Undefined".to_string())
    }

    /// Whether the source URI is an RTSP stream.
    pub fn is_rtsp(&self) -> bool {
        url::Url::parse(&self.source_uri)
            .map(|u| u.scheme().eq_ignore_ascii_case("rtsp"))
            .unwrap_or(false)
    }
}

/// Camera connection state as seen by the health monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum HealthState {
    /// Never swept
    #[default]
    Unknown,
    /// Fresh frame present in the store
    Online,
    /// Frame absent or expired
    Offline,
}

impl HealthState {
    pub fn as_str(&self) -> &'static str {
        match self {
            HealthState::Unknown => "unknown",
            HealthState::Online => "online",
            HealthState::Offline => "offline",
        }
    }
}

/// Health record for a single camera.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CameraHealth {
    pub camera_id: CameraId,
    pub state: HealthState,
    /// Last sweep that observed a fresh frame
    pub last_seen: Option<DateTime<Utc>>,
}

impl CameraHealth {
    pub fn unknown(camera_id: CameraId) -> Self {
        Self {
            camera_id,
            state: HealthState::Unknown,
            last_seen: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_camera_defaults_from_json() {
        let camera: CameraStream =
            serde_json::from_str(r#"{"id": 3, "source_uri": "rtsp://10.0.0.3/stream"}"#).unwrap();
        assert_eq!(camera.id, CameraId(3));
        assert!((camera.sample_fps - 5.0).abs() < f32::EPSILON);
        assert!(camera.zone.is_none());
        assert!(camera.is_rtsp());
        assert_eq!(camera.display_name(), "Camera 3");
    }

    #[test]
    fn test_file_source_is_not_rtsp() {
        let camera = CameraStream::new(1, "/var/lib/video/gate.mp4");
        assert!(!camera.is_rtsp());
    }

    #[test]
    fn test_health_state_serialization() {
        assert_eq!(
            serde_json::to_string(&HealthState::Offline).unwrap(),
            "\"offline\""
        );
        assert_eq!(HealthState::default(), HealthState::Unknown);
    }
}
