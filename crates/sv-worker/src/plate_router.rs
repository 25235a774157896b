//! Plate router: crop → extraction → authorization → persistence and alert.

use std::sync::Arc;

use sv_gateway::AuthorizationGateway;
use sv_models::{Alert, CameraStream, PlateExtractionResult};
use sv_plate::PlateReader;
use sv_vision::encode_base64;
use tracing::{debug, info, warn};

use crate::dispatcher::Dispatcher;
use crate::metrics::record_plate_accepted;

pub struct PlateRouter {
    reader: Arc<dyn PlateReader>,
    gateway: Arc<dyn AuthorizationGateway>,
    dispatcher: Arc<Dispatcher>,
}

impl PlateRouter {
    pub fn new(
        reader: Arc<dyn PlateReader>,
        gateway: Arc<dyn AuthorizationGateway>,
        dispatcher: Arc<Dispatcher>,
    ) -> Self {
        Self {
            reader,
            gateway,
            dispatcher,
        }
    }

    /// Handle one JPEG plate crop from `camera`.
    ///
    /// Persistence and dispatch run concurrently and fail independently.
    pub async fn handle(&self, camera: &CameraStream, crop: Vec<u8>) -> PlateExtractionResult {
        let candidate = match self.reader.read_plate(&crop).await {
            Ok(Some(candidate)) => candidate,
            Ok(None) => {
                debug!(camera_id = %camera.id, "No plate read from crop");
                return PlateExtractionResult::failure("no_plate");
            }
            Err(e) => {
                warn!(camera_id = %camera.id, "Plate extraction failed: {}", e);
                return PlateExtractionResult::failure(e.to_string());
            }
        };

        let authorized = match self
            .gateway
            .is_authorized(&candidate.plate, camera.zone.as_ref())
            .await
        {
            Ok(authorized) => authorized,
            Err(e) => {
                warn!(
                    camera_id = %camera.id,
                    plate = %candidate.plate,
                    "Authorization check failed, treating plate as unauthorized: {}", e
                );
                false
            }
        };

        info!(
            camera_id = %camera.id,
            plate = %candidate.plate,
            score = candidate.score,
            authorized,
            "Plate detected"
        );
        record_plate_accepted(authorized);

        let image = (!authorized).then(|| encode_base64(&crop));
        let alert = Alert::plate(
            camera,
            candidate.plate.clone(),
            candidate.score as f32,
            authorized,
            image,
        );

        let (recorded, published) = tokio::join!(
            self.gateway
                .record_detection(&candidate.plate, camera.id, authorized, Some(&crop)),
            self.dispatcher.publish(&alert),
        );

        let detection_id = match recorded {
            Ok(id) => Some(id),
            Err(e) => {
                warn!(camera_id = %camera.id, plate = %candidate.plate, "Failed to record detection: {}", e);
                None
            }
        };
        if let Err(e) = published {
            warn!(camera_id = %camera.id, plate = %candidate.plate, "Failed to dispatch plate alert: {}", e);
        }

        PlateExtractionResult::accepted(&candidate, authorized, detection_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use futures_util::StreamExt;
    use std::time::Duration;
    use sv_gateway::{AllowListGateway, AuthorizedPlate, GatewayError, GatewayResult};
    use sv_models::{CameraId, DetectionId, PlateCandidate, ZoneId};
    use sv_plate::PlateResult;
    use sv_store::{AlertBus, LocalAlertBus, MemoryFrameStore};

    struct FixedReader(Option<PlateCandidate>);

    #[async_trait]
    impl PlateReader for FixedReader {
        async fn read_plate(&self, _jpeg: &[u8]) -> PlateResult<Option<PlateCandidate>> {
            Ok(self.0.clone())
        }
    }

    struct DownGateway;

    #[async_trait]
    impl AuthorizationGateway for DownGateway {
        async fn is_authorized(&self, _plate: &str, _zone: Option<&ZoneId>) -> GatewayResult<bool> {
            Err(GatewayError::from_http_status(503, "unavailable"))
        }

        async fn record_detection(
            &self,
            _plate: &str,
            _camera_id: CameraId,
            _authorized: bool,
            _image: Option<&[u8]>,
        ) -> GatewayResult<DetectionId> {
            Err(GatewayError::from_http_status(503, "unavailable"))
        }
    }

    fn candidate(plate: &str, score: u32) -> PlateCandidate {
        let mut groups = plate.split(' ');
        PlateCandidate {
            raw_texts: vec![plate.to_string()],
            left: groups.next().unwrap_or_default().to_string(),
            marker: "تونس".to_string(),
            right: groups.last().unwrap_or_default().to_string(),
            plate: plate.to_string(),
            score,
            marker_detected: true,
            corrupted: false,
        }
    }

    fn router(
        reader: FixedReader,
        gateway: Arc<dyn AuthorizationGateway>,
    ) -> (PlateRouter, Arc<LocalAlertBus>) {
        let bus = Arc::new(LocalAlertBus::new());
        let dispatcher = Arc::new(Dispatcher::new(
            bus.clone(),
            Arc::new(MemoryFrameStore::new()),
            Duration::from_secs(3600),
        ));
        (PlateRouter::new(Arc::new(reader), gateway, dispatcher), bus)
    }

    #[tokio::test]
    async fn test_no_plate() {
        let (router, _) = router(FixedReader(None), Arc::new(AllowListGateway::default()));
        let result = router.handle(&CameraStream::new(1, "rtsp://cam1"), vec![1, 2, 3]).await;
        assert_eq!(result, PlateExtractionResult::failure("no_plate"));
    }

    #[tokio::test]
    async fn test_authorized_plate_is_recorded_and_notified() {
        let gateway = Arc::new(AllowListGateway::new(vec![AuthorizedPlate {
            plate: "179 تونس 911".to_string(),
            zones: vec![],
        }]));
        let (router, bus) = router(FixedReader(Some(candidate("179 تونس 911", 86))), gateway.clone());
        let mut notifications = bus.subscribe("notifications").await.unwrap();

        let result = router
            .handle(&CameraStream::new(3, "rtsp://cam3"), b"jpeg".to_vec())
            .await;
        assert!(result.success);
        assert_eq!(result.is_authorized, Some(true));
        assert_eq!(result.confidence_score, Some(86.0));
        assert!(result.detection_id.is_some());

        let alert: Alert = serde_json::from_str(&notifications.next().await.unwrap()).unwrap();
        assert_eq!(alert.alert_type, sv_models::AlertType::AuthorizedPlate);
        assert!(alert.image_base64.is_none());
        assert_eq!(gateway.recorded().len(), 1);
    }

    #[tokio::test]
    async fn test_gateway_outage_still_alerts() {
        let (router, bus) = router(
            FixedReader(Some(candidate("045 تونس 332", 78))),
            Arc::new(DownGateway),
        );
        let mut alerts = bus.subscribe("alerts").await.unwrap();

        let result = router
            .handle(&CameraStream::new(7, "rtsp://cam7"), b"jpeg".to_vec())
            .await;
        assert!(result.success);
        assert_eq!(result.is_authorized, Some(false));
        assert!(result.detection_id.is_none());

        let alert: Alert = serde_json::from_str(&alerts.next().await.unwrap()).unwrap();
        assert_eq!(alert.camera_id, CameraId(7));
        assert_eq!(alert.image_base64.as_deref(), Some("anBlZw=="));
    }
}
