//! Worker tests against a live Redis.
//!
//! Run with: `REDIS_URL=redis://127.0.0.1:6379 cargo test -p sv-worker -- --ignored`

use std::sync::Arc;
use std::time::Duration;

use sv_models::{keys, CameraStream};
use sv_store::{FrameStore, RedisFrameStore};
use sv_vision::{FrameSource, StreamOpener, VisionError, VisionResult};
use sv_worker::config::IngestConfig;
use sv_worker::Ingestor;
use tokio::sync::watch;

fn redis_url() -> String {
    std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string())
}

struct Offline;

#[async_trait::async_trait]
impl StreamOpener for Offline {
    async fn open(&self, uri: &str, _sample_fps: f32) -> VisionResult<Box<dyn FrameSource>> {
        Err(VisionError::source_unavailable(uri, "offline"))
    }
}

#[tokio::test]
#[ignore = "requires Redis"]
async fn ingest_lease_is_exclusive_across_workers() {
    let camera = CameraStream::new(9_000 + std::process::id() as u64 % 1000, "rtsp://offline");
    let config = IngestConfig {
        retry_delay: Duration::from_millis(50),
        ..Default::default()
    };

    let store_a: Arc<dyn FrameStore> = Arc::new(RedisFrameStore::new(&redis_url()).unwrap());
    let store_b: Arc<dyn FrameStore> = Arc::new(RedisFrameStore::new(&redis_url()).unwrap());
    let worker_a = Arc::new(Ingestor::new(store_a.clone(), Arc::new(Offline), config.clone()));
    let worker_b = Arc::new(Ingestor::new(store_b, Arc::new(Offline), config));
    let (tx, rx) = watch::channel(false);

    let a = worker_a.start(camera.clone(), rx.clone()).await.unwrap();
    let b = worker_b.start(camera.clone(), rx).await.unwrap();
    assert!(a.is_started());
    assert!(!b.is_started());

    tx.send_replace(true);
    a.into_handle().unwrap().await.unwrap();
    assert!(store_a
        .get(&keys::ingest_lease(camera.id))
        .await
        .unwrap()
        .is_none());
}
