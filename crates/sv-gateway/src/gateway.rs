//! Authorization and persistence gateway.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Mutex;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sv_models::{CameraId, DetectionId, ZoneId};
use tracing::{debug, info};

use crate::error::GatewayResult;

/// Decides whether a plate may enter a zone and records every detection.
#[async_trait]
pub trait AuthorizationGateway: Send + Sync {
    async fn is_authorized(&self, plate: &str, zone: Option<&ZoneId>) -> GatewayResult<bool>;

    async fn record_detection(
        &self,
        plate: &str,
        camera_id: CameraId,
        authorized: bool,
        image: Option<&[u8]>,
    ) -> GatewayResult<DetectionId>;
}

/// Collapse whitespace so `"179  تونس 911"` and `"179 تونس 911"` compare equal.
pub fn normalize_plate(plate: &str) -> String {
    plate.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// One allow-list entry. An empty `zones` list authorizes every zone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorizedPlate {
    pub plate: String,
    #[serde(default)]
    pub zones: Vec<ZoneId>,
}

/// A detection recorded by [`AllowListGateway`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedDetection {
    pub id: DetectionId,
    pub plate: String,
    pub camera_id: CameraId,
    pub authorized: bool,
    pub has_image: bool,
}

/// In-memory allow-list. Detections are kept in memory.
#[derive(Debug, Default)]
pub struct AllowListGateway {
    /// plate → zones (`None` means every zone)
    plates: HashMap<String, Option<HashSet<ZoneId>>>,
    recorded: Mutex<Vec<RecordedDetection>>,
}

impl AllowListGateway {
    pub fn new(entries: impl IntoIterator<Item = AuthorizedPlate>) -> Self {
        let mut plates: HashMap<String, Option<HashSet<ZoneId>>> = HashMap::new();
        for entry in entries {
            let key = normalize_plate(&entry.plate);
            if entry.zones.is_empty() {
                plates.insert(key, None);
                continue;
            }
            if let Some(zones) = plates.entry(key).or_insert_with(|| Some(HashSet::new())) {
                zones.extend(entry.zones);
            }
        }
        Self {
            plates,
            recorded: Mutex::new(Vec::new()),
        }
    }

    /// Load a JSON array of [`AuthorizedPlate`] entries.
    pub fn from_file(path: &Path) -> GatewayResult<Self> {
        let text = std::fs::read_to_string(path)?;
        let entries: Vec<AuthorizedPlate> = serde_json::from_str(&text)?;
        info!(path = %path.display(), plates = entries.len(), "Loaded authorized plates");
        Ok(Self::new(entries))
    }

    /// Detections recorded so far, oldest first.
    pub fn recorded(&self) -> Vec<RecordedDetection> {
        self.recorded
            .lock()
            .map(|r| r.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl AuthorizationGateway for AllowListGateway {
    async fn is_authorized(&self, plate: &str, zone: Option<&ZoneId>) -> GatewayResult<bool> {
        let authorized = match self.plates.get(&normalize_plate(plate)) {
            Some(None) => true,
            Some(Some(zones)) => zone.is_some_and(|z| zones.contains(z)),
            None => false,
        };
        Ok(authorized)
    }

    async fn record_detection(
        &self,
        plate: &str,
        camera_id: CameraId,
        authorized: bool,
        image: Option<&[u8]>,
    ) -> GatewayResult<DetectionId> {
        let id = DetectionId::new();
        debug!(camera_id = %camera_id, plate = %plate, authorized, "Recording detection");

        if let Ok(mut recorded) = self.recorded.lock() {
            recorded.push(RecordedDetection {
                id: id.clone(),
                plate: plate.to_string(),
                camera_id,
                authorized,
                has_image: image.is_some_and(|i| !i.is_empty()),
            });
        }
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn zone(z: &str) -> ZoneId {
        ZoneId::from_string(z)
    }

    #[tokio::test]
    async fn test_global_and_zoned_entries() {
        let gateway = AllowListGateway::new(vec![
            AuthorizedPlate {
                plate: "179 تونس 911".to_string(),
                zones: vec![],
            },
            AuthorizedPlate {
                plate: "045 تونس 332".to_string(),
                zones: vec![zone("north")],
            },
        ]);

        assert!(gateway.is_authorized("179  تونس 911", None).await.unwrap());
        assert!(gateway.is_authorized("179 تونس 911", Some(&zone("south"))).await.unwrap());
        assert!(gateway.is_authorized("045 تونس 332", Some(&zone("north"))).await.unwrap());
        assert!(!gateway.is_authorized("045 تونس 332", Some(&zone("south"))).await.unwrap());
        assert!(!gateway.is_authorized("045 تونس 332", None).await.unwrap());
        assert!(!gateway.is_authorized("12 تونس 3456", None).await.unwrap());
    }

    #[tokio::test]
    async fn test_record_detection_returns_distinct_ids() {
        let gateway = AllowListGateway::default();
        let a = gateway
            .record_detection("045 تونس 332", CameraId(7), false, Some(b"jpeg"))
            .await
            .unwrap();
        let b = gateway
            .record_detection("045 تونس 332", CameraId(7), false, None)
            .await
            .unwrap();

        assert_ne!(a, b);
        let recorded = gateway.recorded();
        assert_eq!(recorded.len(), 2);
        assert!(recorded[0].has_image);
        assert!(!recorded[1].has_image);
    }

    #[tokio::test]
    async fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"[{{"plate": "179 تونس 911"}}, {{"plate": "1 تونس 2", "zones": ["gate"]}}]"#
        )
        .unwrap();

        let gateway = AllowListGateway::from_file(file.path()).unwrap();
        assert!(gateway.is_authorized("179 تونس 911", None).await.unwrap());
        assert!(gateway.is_authorized("1 تونس 2", Some(&zone("gate"))).await.unwrap());
    }
}
