//! Frame ingestor.
//!
//! One task per camera reads JPEG frames from the stream source, rate-limits
//! them to the camera's sample rate, re-encodes each kept frame and writes it
//! to `camera:{id}:frame`. A store lease keeps a single active ingestor per
//! camera across workers.

use std::sync::Arc;
use std::time::Duration;

use sv_models::{keys, CameraStream};
use sv_store::{FrameStore, Lease};
use sv_vision::codec::JPEG_QUALITY;
use sv_vision::{decode_frame, encode_jpeg, FrameSource, StreamOpener};
use tokio::sync::watch;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, Instrument};

use crate::config::IngestConfig;
use crate::error::{WorkerError, WorkerResult};
use crate::logging::{CameraLogger, TaskRole};
use crate::metrics::{record_frame_ingested, record_frame_rate_limited, record_source_failure};
use crate::retry::FailureTracker;
use crate::task::StartOutcome;

/// Why an ingestor stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestExit {
    Shutdown,
    LeaseLost,
}

/// Keeps one frame per sampling interval and drops the rest.
#[derive(Debug)]
pub struct RateLimiter {
    interval: Duration,
    last: Option<Instant>,
}

impl RateLimiter {
    pub fn new(fps: f32) -> Self {
        let interval = if fps > 0.0 && fps.is_finite() {
            Duration::from_secs_f32(1.0 / fps)
        } else {
            Duration::ZERO
        };
        Self {
            interval,
            last: None,
        }
    }

    /// Whether a frame arriving at `now` should be kept.
    pub fn admit(&mut self, now: Instant) -> bool {
        match self.last {
            Some(last) if now.saturating_duration_since(last) < self.interval => false,
            _ => {
                self.last = Some(now);
                true
            }
        }
    }
}

/// Ways one capture session can end.
enum SessionEnd {
    Exit(IngestExit),
    Retry(String),
}

pub struct Ingestor {
    store: Arc<dyn FrameStore>,
    opener: Arc<dyn StreamOpener>,
    config: IngestConfig,
}

impl Ingestor {
    pub fn new(store: Arc<dyn FrameStore>, opener: Arc<dyn StreamOpener>, config: IngestConfig) -> Self {
        Self {
            store,
            opener,
            config,
        }
    }

    /// Begin capture for `camera`. A no-op when another ingestor holds the
    /// camera's lease.
    pub async fn start(
        self: &Arc<Self>,
        camera: CameraStream,
        shutdown: watch::Receiver<bool>,
    ) -> WorkerResult<StartOutcome<IngestExit>> {
        let lease = Lease::acquire(
            self.store.clone(),
            keys::ingest_lease(camera.id),
            self.config.lease_ttl,
        )
        .await?;

        let Some(lease) = lease else {
            return Ok(StartOutcome::AlreadyRunning);
        };

        let logger = CameraLogger::new(camera.id, TaskRole::Ingest);
        let span = logger.create_span();
        let this = Arc::clone(self);
        let handle = tokio::spawn(
            async move {
                logger.log_start(&camera.source_uri);
                let exit = this.capture(&camera, &lease, shutdown, &logger).await;
                if let Err(e) = lease.release().await {
                    logger.log_warning(&format!("failed to release lease: {}", e));
                }
                logger.log_completion(match exit {
                    IngestExit::Shutdown => "shutdown",
                    IngestExit::LeaseLost => "lease lost",
                });
                exit
            }
            .instrument(span),
        );

        Ok(StartOutcome::Started(handle))
    }

    fn sample_fps(&self, camera: &CameraStream) -> f32 {
        if camera.sample_fps > 0.0 {
            camera.sample_fps
        } else {
            self.config.default_sample_fps
        }
    }

    async fn capture(
        &self,
        camera: &CameraStream,
        lease: &Lease,
        mut shutdown: watch::Receiver<bool>,
        logger: &CameraLogger,
    ) -> IngestExit {
        let fps = self.sample_fps(camera);
        let mut failures = FailureTracker::new(self.config.max_logged_failures);

        loop {
            if *shutdown.borrow() {
                return IngestExit::Shutdown;
            }

            let reason = match self.opener.open(&camera.source_uri, fps).await {
                Ok(mut source) => {
                    let end = self
                        .pump(camera, source.as_mut(), lease, &mut shutdown, fps, &mut failures)
                        .await;
                    source.close().await;
                    match end {
                        SessionEnd::Exit(exit) => return exit,
                        SessionEnd::Retry(reason) => reason,
                    }
                }
                Err(e) => e.to_string(),
            };

            record_source_failure();
            if failures.record_failure() {
                logger.log_warning(&format!(
                    "stream unavailable, retrying in {:?}: {}",
                    self.config.retry_delay, reason
                ));
            }

            tokio::select! {
                _ = tokio::time::sleep(self.config.retry_delay) => {}
                _ = shutdown.changed() => return IngestExit::Shutdown,
            }

            match lease.renew().await {
                Ok(true) => {}
                Ok(false) => return IngestExit::LeaseLost,
                Err(e) => logger.log_warning(&format!("lease renewal failed: {}", e)),
            }
        }
    }

    /// Read frames until the source ends, fails, or the task must stop.
    ///
    /// The lease is renewed on a timer, independent of frame arrival, so a
    /// slow sample rate or a stalled read does not let it lapse. A pending
    /// read survives renewals; its read timeout keeps running.
    async fn pump(
        &self,
        camera: &CameraStream,
        source: &mut dyn FrameSource,
        lease: &Lease,
        shutdown: &mut watch::Receiver<bool>,
        fps: f32,
        failures: &mut FailureTracker,
    ) -> SessionEnd {
        let key = keys::camera_frame(camera.id);
        let mut limiter = RateLimiter::new(fps);
        let renew_every = self.config.lease_ttl / 3;
        let mut renewal = tokio::time::interval_at(Instant::now() + renew_every, renew_every);
        renewal.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let next = source.next_frame();
            tokio::pin!(next);
            let frame = loop {
                tokio::select! {
                    frame = &mut next => break frame,
                    _ = renewal.tick() => match lease.renew().await {
                        Ok(true) => {}
                        Ok(false) => return SessionEnd::Exit(IngestExit::LeaseLost),
                        Err(e) => return SessionEnd::Retry(e.to_string()),
                    },
                    _ = shutdown.changed() => return SessionEnd::Exit(IngestExit::Shutdown),
                }
            };

            let jpeg = match frame {
                Ok(Some(jpeg)) => jpeg,
                Ok(None) => return SessionEnd::Retry("stream ended".to_string()),
                Err(e) => return SessionEnd::Retry(e.to_string()),
            };

            if !limiter.admit(Instant::now()) {
                record_frame_rate_limited();
                continue;
            }

            let encoded = match reencode(&jpeg).await {
                Ok(encoded) => encoded,
                Err(e) => {
                    debug!(camera_id = %camera.id, "Dropping undecodable frame: {}", e);
                    continue;
                }
            };

            if let Err(e) = self.store.set(&key, &encoded, self.config.frame_ttl).await {
                return SessionEnd::Retry(e.to_string());
            }
            record_frame_ingested();
            failures.record_success();
        }
    }
}

/// Decode and re-encode at the store's JPEG quality.
async fn reencode(jpeg: &[u8]) -> WorkerResult<Vec<u8>> {
    let jpeg = jpeg.to_vec();
    let encoded = tokio::task::spawn_blocking(move || {
        let image = decode_frame(&jpeg)?;
        encode_jpeg(&image, JPEG_QUALITY)
    })
    .await
    .map_err(|e| WorkerError::task_failed(e.to_string()))??;
    Ok(encoded)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use image::{Rgb, RgbImage};
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use sv_models::CameraId;
    use sv_store::MemoryFrameStore;
    use sv_vision::{VisionError, VisionResult};

    fn jpeg() -> Vec<u8> {
        let image = RgbImage::from_pixel(32, 24, Rgb([90, 120, 200]));
        encode_jpeg(&image, 80).unwrap()
    }

    /// Yields its frames, then blocks until closed.
    struct ScriptedSource {
        frames: VecDeque<Vec<u8>>,
        closed: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl FrameSource for ScriptedSource {
        async fn next_frame(&mut self) -> VisionResult<Option<Vec<u8>>> {
            match self.frames.pop_front() {
                Some(frame) => Ok(Some(frame)),
                None => std::future::pending().await,
            }
        }

        async fn close(&mut self) {
            self.closed.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[derive(Default)]
    struct ScriptedOpener {
        frames: Mutex<Vec<Vec<u8>>>,
        fail: bool,
        opens: AtomicUsize,
        closed: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl StreamOpener for ScriptedOpener {
        async fn open(&self, uri: &str, _sample_fps: f32) -> VisionResult<Box<dyn FrameSource>> {
            self.opens.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(VisionError::source_unavailable(uri, "connection refused"));
            }
            let frames = std::mem::take(&mut *self.frames.lock().unwrap());
            Ok(Box::new(ScriptedSource {
                frames: frames.into(),
                closed: self.closed.clone(),
            }))
        }
    }

    fn config() -> IngestConfig {
        IngestConfig {
            retry_delay: Duration::from_millis(10),
            ..Default::default()
        }
    }

    #[test]
    fn test_rate_limiter_drops_excess_frames() {
        let mut limiter = RateLimiter::new(5.0);
        let t0 = Instant::now();
        assert!(limiter.admit(t0));
        assert!(!limiter.admit(t0 + Duration::from_millis(100)));
        assert!(limiter.admit(t0 + Duration::from_millis(200)));
        assert!(!limiter.admit(t0 + Duration::from_millis(399)));
    }

    #[tokio::test]
    async fn test_concurrent_starts_capture_once() {
        let store: Arc<dyn FrameStore> = Arc::new(MemoryFrameStore::new());
        let opener = Arc::new(ScriptedOpener {
            frames: Mutex::new(vec![jpeg()]),
            ..Default::default()
        });
        let ingestor = Arc::new(Ingestor::new(store.clone(), opener.clone(), config()));
        let (tx, rx) = watch::channel(false);
        let camera = CameraStream::new(4, "rtsp://cam4");

        let (a, b) = tokio::join!(
            ingestor.start(camera.clone(), rx.clone()),
            ingestor.start(camera.clone(), rx.clone()),
        );
        let outcomes = [a.unwrap(), b.unwrap()];
        assert_eq!(outcomes.iter().filter(|o| o.is_started()).count(), 1);

        // Wait for the single frame to land.
        let key = keys::camera_frame(CameraId(4));
        for _ in 0..100 {
            if store.get(&key).await.unwrap().is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(store.get(&key).await.unwrap().is_some());
        assert_eq!(opener.opens.load(Ordering::SeqCst), 1);

        tx.send(true).unwrap();
        let [a, b] = outcomes;
        let handle = a.into_handle().or(b.into_handle()).unwrap();
        assert_eq!(handle.await.unwrap(), IngestExit::Shutdown);
        assert_eq!(opener.closed.load(Ordering::SeqCst), 1);

        // Lease released on shutdown.
        assert!(store.get(&keys::ingest_lease(CameraId(4))).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_lease_outlives_slow_sample_rate() {
        let store: Arc<dyn FrameStore> = Arc::new(MemoryFrameStore::new());
        let opener = Arc::new(ScriptedOpener {
            frames: Mutex::new(vec![jpeg(), jpeg(), jpeg()]),
            ..Default::default()
        });
        let config = IngestConfig {
            lease_ttl: Duration::from_millis(60),
            ..config()
        };
        let ingestor = Arc::new(Ingestor::new(store.clone(), opener.clone(), config));
        let (tx, rx) = watch::channel(false);
        // One frame every two seconds, far longer than the lease TTL.
        let camera = CameraStream::new(11, "rtsp://cam11").with_sample_fps(0.5);

        let handle = ingestor
            .start(camera.clone(), rx.clone())
            .await
            .unwrap()
            .into_handle()
            .unwrap();

        tokio::time::sleep(Duration::from_millis(250)).await;
        let second = ingestor.start(camera, rx).await.unwrap();
        assert!(!second.is_started());
        assert!(store.get(&keys::ingest_lease(CameraId(11))).await.unwrap().is_some());
        assert_eq!(opener.opens.load(Ordering::SeqCst), 1);

        tx.send(true).unwrap();
        assert_eq!(handle.await.unwrap(), IngestExit::Shutdown);
    }

    #[tokio::test]
    async fn test_unopenable_source_is_retried() {
        let store: Arc<dyn FrameStore> = Arc::new(MemoryFrameStore::new());
        let opener = Arc::new(ScriptedOpener {
            fail: true,
            ..Default::default()
        });
        let ingestor = Arc::new(Ingestor::new(store.clone(), opener.clone(), config()));
        let (tx, rx) = watch::channel(false);

        let handle = ingestor
            .start(CameraStream::new(5, "rtsp://cam5"), rx)
            .await
            .unwrap()
            .into_handle()
            .unwrap();

        for _ in 0..100 {
            if opener.opens.load(Ordering::SeqCst) >= 3 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(opener.opens.load(Ordering::SeqCst) >= 3);

        tx.send(true).unwrap();
        assert_eq!(handle.await.unwrap(), IngestExit::Shutdown);
    }

    #[tokio::test]
    async fn test_stolen_lease_stops_ingestor() {
        let store: Arc<dyn FrameStore> = Arc::new(MemoryFrameStore::new());
        let opener = Arc::new(ScriptedOpener {
            fail: true,
            ..Default::default()
        });
        let ingestor = Arc::new(Ingestor::new(store.clone(), opener, config()));
        let (_tx, rx) = watch::channel(false);

        let handle = ingestor
            .start(CameraStream::new(6, "rtsp://cam6"), rx)
            .await
            .unwrap()
            .into_handle()
            .unwrap();

        // Another worker takes over the key.
        let key = keys::ingest_lease(CameraId(6));
        store.set(&key, b"worker:other", Duration::from_secs(15)).await.unwrap();

        assert_eq!(handle.await.unwrap(), IngestExit::LeaseLost);
    }
}
