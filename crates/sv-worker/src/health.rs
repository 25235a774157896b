//! Camera health monitor.
//!
//! A camera is online while its latest frame key is present with a positive
//! remaining TTL. Transitions are reported as `camera_offline` and
//! `camera_online` alerts; the first sighting of a live camera is silent.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use sv_models::keys::{self, channels};
use sv_models::{Alert, CameraHealth, CameraId, CameraStream, HealthState};
use sv_store::FrameStore;
use tracing::{debug, info, warn};

use crate::dispatcher::Dispatcher;
use crate::metrics::record_health_transition;

/// Counts published on `camera_status` after each sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthSummary {
    pub total: usize,
    pub online: usize,
    pub offline: usize,
}

pub struct HealthMonitor {
    store: Arc<dyn FrameStore>,
    dispatcher: Arc<Dispatcher>,
    status_ttl: Duration,
    cameras: HashMap<CameraId, CameraHealth>,
}

impl HealthMonitor {
    pub fn new(store: Arc<dyn FrameStore>, dispatcher: Arc<Dispatcher>, status_ttl: Duration) -> Self {
        Self {
            store,
            dispatcher,
            status_ttl,
            cameras: HashMap::new(),
        }
    }

    /// Last known state of a camera.
    pub fn state(&self, camera_id: CameraId) -> HealthState {
        self.cameras
            .get(&camera_id)
            .map(|h| h.state)
            .unwrap_or_default()
    }

    /// Check every camera once and report transitions.
    ///
    /// Cameras whose frame key cannot be read keep their previous state and
    /// are left out of the counts.
    pub async fn sweep(&mut self, cameras: &[CameraStream]) -> HealthSummary {
        self.cameras
            .retain(|id, _| cameras.iter().any(|c| c.id == *id));

        let mut summary = HealthSummary::default();

        for camera in cameras {
            let online = match self.store.ttl_remaining(&keys::camera_frame(camera.id)).await {
                Ok(ttl) => ttl.is_some_and(|d| !d.is_zero()),
                Err(e) => {
                    warn!(camera_id = %camera.id, "Health check failed: {}", e);
                    continue;
                }
            };

            summary.total += 1;
            if online {
                summary.online += 1;
            } else {
                summary.offline += 1;
            }

            self.observe(camera, online).await;
        }

        if let Err(e) = self
            .dispatcher
            .publish_json(channels::CAMERA_STATUS, &summary)
            .await
        {
            warn!("Failed to publish health summary: {}", e);
        }

        debug!(
            total = summary.total,
            online = summary.online,
            offline = summary.offline,
            "Health sweep complete"
        );
        summary
    }

    async fn observe(&mut self, camera: &CameraStream, online: bool) {
        let health = self
            .cameras
            .entry(camera.id)
            .or_insert_with(|| CameraHealth::unknown(camera.id));

        let previous = health.state;
        let next = if online {
            HealthState::Online
        } else {
            HealthState::Offline
        };
        health.state = next;
        if online {
            health.last_seen = Some(chrono::Utc::now());
        }

        let notify = match (previous, next) {
            (HealthState::Offline, HealthState::Online) => true,
            (HealthState::Unknown | HealthState::Online, HealthState::Offline) => true,
            _ => false,
        };

        if let Err(e) = self
            .store
            .set(&keys::camera_status(camera.id), next.as_str().as_bytes(), self.status_ttl)
            .await
        {
            warn!(camera_id = %camera.id, "Failed to write camera status: {}", e);
        }

        if previous != next {
            record_health_transition(next.as_str());
        }

        if notify {
            info!(
                camera_id = %camera.id,
                from = previous.as_str(),
                to = next.as_str(),
                "Camera health changed"
            );
            if let Err(e) = self
                .dispatcher
                .publish(&Alert::camera_status(camera, online))
                .await
            {
                warn!(camera_id = %camera.id, "Failed to publish camera status alert: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;
    use sv_models::AlertType;
    use sv_store::{AlertBus, LocalAlertBus, MemoryFrameStore, MessageStream};

    fn monitor() -> (HealthMonitor, Arc<MemoryFrameStore>, Arc<LocalAlertBus>) {
        let store = Arc::new(MemoryFrameStore::new());
        let bus = Arc::new(LocalAlertBus::new());
        let dispatcher = Arc::new(Dispatcher::new(
            bus.clone(),
            store.clone(),
            Duration::from_secs(3600),
        ));
        (
            HealthMonitor::new(store.clone(), dispatcher, Duration::from_secs(300)),
            store,
            bus,
        )
    }

    async fn next_alert(stream: &mut MessageStream) -> Alert {
        serde_json::from_str(&stream.next().await.unwrap()).unwrap()
    }

    #[tokio::test]
    async fn test_first_online_sighting_is_silent() {
        let (mut monitor, store, bus) = monitor();
        let camera = CameraStream::new(1, "rtsp://cam1");
        store
            .set(&keys::camera_frame(camera.id), b"jpeg", Duration::from_secs(5))
            .await
            .unwrap();
        let mut alerts = bus.subscribe("alerts").await.unwrap();

        let summary = monitor.sweep(std::slice::from_ref(&camera)).await;
        assert_eq!(summary, HealthSummary { total: 1, online: 1, offline: 0 });
        assert_eq!(monitor.state(camera.id), HealthState::Online);
        assert_eq!(
            store.get(&keys::camera_status(camera.id)).await.unwrap().as_deref(),
            Some(&b"online"[..])
        );

        // Only the offline transition below reaches the alerts channel.
        store.set(&keys::camera_frame(camera.id), b"jpeg", Duration::ZERO).await.unwrap();
        monitor.sweep(std::slice::from_ref(&camera)).await;
        let alert = next_alert(&mut alerts).await;
        assert_eq!(alert.alert_type, AlertType::CameraOffline);
    }

    #[tokio::test]
    async fn test_offline_then_back_online() {
        let (mut monitor, store, bus) = monitor();
        let camera = CameraStream::new(2, "rtsp://cam2");
        let mut status = bus.subscribe("camera_status").await.unwrap();
        let cameras = std::slice::from_ref(&camera);

        // Unknown -> offline is reported.
        let summary = monitor.sweep(cameras).await;
        assert_eq!(summary.offline, 1);
        assert_eq!(next_alert(&mut status).await.alert_type, AlertType::CameraOffline);
        let counts: HealthSummary = serde_json::from_str(&status.next().await.unwrap()).unwrap();
        assert_eq!(counts, HealthSummary { total: 1, online: 0, offline: 1 });

        // Offline -> online is reported.
        store
            .set(&keys::camera_frame(camera.id), b"jpeg", Duration::from_secs(5))
            .await
            .unwrap();
        monitor.sweep(cameras).await;
        assert_eq!(next_alert(&mut status).await.alert_type, AlertType::CameraOnline);
    }

    #[tokio::test]
    async fn test_removed_cameras_are_forgotten() {
        let (mut monitor, _store, _bus) = monitor();
        let camera = CameraStream::new(3, "rtsp://cam3");
        monitor.sweep(std::slice::from_ref(&camera)).await;
        assert_eq!(monitor.state(camera.id), HealthState::Offline);

        monitor.sweep(&[]).await;
        assert_eq!(monitor.state(camera.id), HealthState::Unknown);
    }
}
