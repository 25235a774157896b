//! Notification dispatcher.
//!
//! Fans alerts out to named channels on the alert bus. A channel failure is
//! logged and does not stop delivery to the others.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use sv_models::keys::{self, channels};
use sv_models::{Alert, AlertType, CameraId};
use sv_store::{AlertBus, FrameStore};
use tracing::{debug, warn};

use crate::error::{WorkerError, WorkerResult};
use crate::metrics::record_alert;

/// Channels an alert is published on.
pub fn channels_for(alert: &Alert) -> Vec<String> {
    let camera = channels::camera_alerts(alert.camera_id);
    match alert.alert_type {
        AlertType::UnauthorizedPlate => vec![
            channels::ALERTS.to_string(),
            channels::NOTIFICATIONS.to_string(),
            camera,
        ],
        AlertType::AuthorizedPlate => vec![channels::NOTIFICATIONS.to_string()],
        AlertType::Fallen | AlertType::Aggression | AlertType::Fire | AlertType::HumanBoxes => {
            vec![channels::ALERTS.to_string(), camera]
        }
        AlertType::CameraOffline | AlertType::CameraOnline => vec![
            channels::ALERTS.to_string(),
            channels::CAMERA_STATUS.to_string(),
        ],
        AlertType::System => vec![channels::ALERTS.to_string()],
    }
}

/// Outcome of one `publish` call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchReport {
    /// Channels the alert was handed to
    pub delivered: Vec<String>,
    /// Channels that failed
    pub failed: Vec<String>,
}

impl DispatchReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

#[derive(Debug, Serialize)]
struct LiveNotice {
    camera_id: CameraId,
    timestamp: chrono::DateTime<chrono::Utc>,
}

pub struct Dispatcher {
    bus: Arc<dyn AlertBus>,
    store: Arc<dyn FrameStore>,
    audit_ttl: Duration,
}

impl Dispatcher {
    pub fn new(bus: Arc<dyn AlertBus>, store: Arc<dyn FrameStore>, audit_ttl: Duration) -> Self {
        Self {
            bus,
            store,
            audit_ttl,
        }
    }

    /// Publish an alert to every channel of its type.
    ///
    /// Unauthorized-plate alerts also get an audit record in the store.
    pub async fn publish(&self, alert: &Alert) -> WorkerResult<DispatchReport> {
        let payload = serde_json::to_string(alert)?;
        let mut report = DispatchReport::default();

        for channel in channels_for(alert) {
            match self.bus.publish(&channel, &payload).await {
                Ok(receivers) => {
                    debug!(
                        camera_id = %alert.camera_id,
                        alert_type = alert.alert_type.as_str(),
                        channel = %channel,
                        receivers,
                        "Alert published"
                    );
                    report.delivered.push(channel);
                }
                Err(e) => {
                    warn!(
                        camera_id = %alert.camera_id,
                        alert_type = alert.alert_type.as_str(),
                        channel = %channel,
                        "Failed to publish alert: {}", e
                    );
                    report.failed.push(channel);
                }
            }
        }

        if alert.alert_type == AlertType::UnauthorizedPlate {
            if let Err(e) = self.write_audit_record(alert).await {
                warn!(camera_id = %alert.camera_id, "Failed to write alert audit record: {}", e);
            }
        }

        if !report.delivered.is_empty() {
            record_alert(alert.alert_type.as_str());
        }
        Ok(report)
    }

    /// `alert:{camera_id}:{unix_seconds}` → `UNAUTHORIZED:{plate}:{camera}:{location}`
    async fn write_audit_record(&self, alert: &Alert) -> WorkerResult<()> {
        let key = keys::alert_record(alert.camera_id, alert.timestamp.timestamp());
        let record = format!(
            "UNAUTHORIZED:{}:{}:{}",
            alert.matricule.as_deref().unwrap_or_default(),
            alert
                .camera_name
                .clone()
                .unwrap_or_else(|| alert.camera_id.to_string()),
            alert.location.as_deref().unwrap_or("Undefined"),
        );
        self.store.set(&key, record.as_bytes(), self.audit_ttl).await?;
        Ok(())
    }

    /// Announce a new live-view frame on `camera_{id}_live`.
    pub async fn publish_live(&self, camera_id: CameraId) -> WorkerResult<usize> {
        let notice = LiveNotice {
            camera_id,
            timestamp: chrono::Utc::now(),
        };
        let payload = serde_json::to_string(&notice)?;
        self.bus
            .publish(&channels::camera_live(camera_id), &payload)
            .await
            .map_err(WorkerError::from)
    }

    /// Publish a raw JSON payload on one channel.
    pub async fn publish_json<T: Serialize>(&self, channel: &str, value: &T) -> WorkerResult<usize> {
        let payload = serde_json::to_string(value)?;
        Ok(self.bus.publish(channel, &payload).await?)
    }
}
