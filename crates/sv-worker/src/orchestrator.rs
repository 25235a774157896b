//! Detection orchestrator.
//!
//! One loop per camera polls the latest frame from the store, runs every
//! model of the shared ensemble, hands plate crops to the plate router,
//! raises incident alerts and publishes the annotated live view. A store
//! lease keeps a single orchestrator per camera across workers.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use image::RgbImage;
use serde::Serialize;
use serde_json::json;
use sv_models::{
    keys, Alert, AlertType, CameraStream, Detection, DetectorRole, PoseClass, RunSummary,
    StopReason,
};
use sv_store::{FrameStore, Lease};
use sv_vision::codec::JPEG_QUALITY;
use sv_vision::fire::strongest_fires;
use sv_vision::{
    annotate, crop_with_margin, decode_frame, encode_jpeg, fire_probability, resize_frame,
    Detector, ModelEnsemble, PublishGate, VisionResult, FIRE_THRESHOLD,
};
use tokio::sync::{watch, Semaphore};
use tokio::time::Instant;
use tracing::{debug, warn, Instrument};

use crate::config::DetectConfig;
use crate::dispatcher::Dispatcher;
use crate::error::WorkerResult;
use crate::logging::{CameraLogger, TaskRole};
use crate::metrics::{
    record_decode_failure, record_inference, record_model_failure, record_plate_crop,
};
use crate::plate_router::PlateRouter;
use crate::task::StartOutcome;

/// Padding around each fire box handed to the describer.
const FIRE_CROP_PADDING: f32 = 10.0;

/// Fire boxes described per frame, strongest first.
const MAX_FIRE_DESCRIPTIONS: usize = 3;

/// Output of one model for one frame.
struct ModelOutput {
    role: DetectorRole,
    /// `None` when the model failed, panicked, timed out or was still busy
    detections: Option<Vec<Detection>>,
}

#[derive(Debug, Serialize)]
struct FireResult {
    fire_detected: bool,
    descriptions: Vec<String>,
}

/// Per-type cooldown for incident alerts.
#[derive(Debug)]
pub struct IncidentGate {
    cooldown: Duration,
    last_raised: HashMap<AlertType, Instant>,
}

impl IncidentGate {
    pub fn new(cooldown: Duration) -> Self {
        Self {
            cooldown,
            last_raised: HashMap::new(),
        }
    }

    /// Whether an alert of `alert_type` may be raised at `now`, recording it if so.
    pub fn try_raise(&mut self, alert_type: AlertType, now: Instant) -> bool {
        match self.last_raised.get(&alert_type) {
            Some(at) if now.saturating_duration_since(*at) < self.cooldown => false,
            _ => {
                self.last_raised.insert(alert_type, now);
                true
            }
        }
    }
}

/// Mutable state owned by one camera's loop.
struct LoopState {
    incidents: IncidentGate,
    live_gate: PublishGate,
    crops_in_flight: Arc<Semaphore>,
    /// One permit per ensemble detector, held by the blocking call until it
    /// returns, even after its timeout fired.
    model_slots: Vec<Arc<Semaphore>>,
    describer_slot: Arc<Semaphore>,
}

impl LoopState {
    fn new(config: &DetectConfig, detectors: usize) -> Self {
        Self {
            incidents: IncidentGate::new(config.incident_cooldown),
            live_gate: PublishGate::new(config.live_min_interval),
            crops_in_flight: Arc::new(Semaphore::new(config.max_crops_in_flight)),
            model_slots: (0..detectors).map(|_| Arc::new(Semaphore::new(1))).collect(),
            describer_slot: Arc::new(Semaphore::new(1)),
        }
    }
}

pub struct Orchestrator {
    store: Arc<dyn FrameStore>,
    ensemble: Arc<ModelEnsemble>,
    router: Arc<PlateRouter>,
    dispatcher: Arc<Dispatcher>,
    config: DetectConfig,
}

impl Orchestrator {
    pub fn new(
        store: Arc<dyn FrameStore>,
        ensemble: Arc<ModelEnsemble>,
        router: Arc<PlateRouter>,
        dispatcher: Arc<Dispatcher>,
        config: DetectConfig,
    ) -> Self {
        Self {
            store,
            ensemble,
            router,
            dispatcher,
            config,
        }
    }

    /// Spawn the detection loop for `camera`. A no-op when another
    /// orchestrator holds the camera's lease.
    pub async fn start(
        self: &Arc<Self>,
        camera: CameraStream,
        max_iterations: Option<u64>,
        shutdown: watch::Receiver<bool>,
    ) -> WorkerResult<StartOutcome<RunSummary>> {
        let Some(lease) = self.acquire(&camera).await? else {
            return Ok(StartOutcome::AlreadyRunning);
        };

        let this = Arc::clone(self);
        let handle = tokio::spawn(async move {
            this.run_leased(&camera, max_iterations, shutdown, lease).await
        });
        Ok(StartOutcome::Started(handle))
    }

    /// Run the detection loop on the current task until shutdown, the
    /// iteration limit or the decode-failure ceiling.
    ///
    /// Returns immediately with `lease_lost` when another orchestrator owns
    /// the camera.
    pub async fn run(
        &self,
        camera: &CameraStream,
        max_iterations: Option<u64>,
        shutdown: watch::Receiver<bool>,
    ) -> WorkerResult<RunSummary> {
        match self.acquire(camera).await? {
            Some(lease) => Ok(self.run_leased(camera, max_iterations, shutdown, lease).await),
            None => Ok(RunSummary::completed(camera.id, 0, StopReason::LeaseLost)),
        }
    }

    async fn acquire(&self, camera: &CameraStream) -> WorkerResult<Option<Lease>> {
        Ok(Lease::acquire(
            self.store.clone(),
            keys::detect_lease(camera.id),
            self.config.lease_ttl,
        )
        .await?)
    }

    async fn run_leased(
        &self,
        camera: &CameraStream,
        max_iterations: Option<u64>,
        shutdown: watch::Receiver<bool>,
        lease: Lease,
    ) -> RunSummary {
        let logger = CameraLogger::new(camera.id, TaskRole::Detect);
        let span = logger.create_span();

        let summary = async {
            logger.log_start(&format!(
                "{} detectors, max_iterations={:?}",
                self.ensemble.detectors().len(),
                max_iterations
            ));
            let summary = self
                .detect_loop(camera, max_iterations, shutdown, &lease, &logger)
                .await;
            logger.log_completion(&format!(
                "{} after {} iterations",
                summary.stop_reason.as_str(),
                summary.iterations_completed
            ));
            summary
        }
        .instrument(span)
        .await;

        if let Err(e) = lease.release().await {
            warn!(camera_id = %camera.id, "Failed to release detect lease: {}", e);
        }
        summary
    }

    async fn detect_loop(
        &self,
        camera: &CameraStream,
        max_iterations: Option<u64>,
        mut shutdown: watch::Receiver<bool>,
        lease: &Lease,
        logger: &CameraLogger,
    ) -> RunSummary {
        let frame_key = keys::camera_frame(camera.id);
        let renew_every = self.config.lease_ttl / 3;
        let mut last_renewal = Instant::now();
        let mut iterations = 0u64;
        let mut decode_failures = 0u32;
        let mut state = LoopState::new(&self.config, self.ensemble.detectors().len());

        let stop = |reason: StopReason, iterations: u64| {
            RunSummary::completed(camera.id, iterations, reason)
        };

        loop {
            if *shutdown.borrow() {
                return stop(StopReason::Shutdown, iterations);
            }
            if max_iterations.is_some_and(|max| iterations >= max) {
                return stop(StopReason::IterationLimit, iterations);
            }

            if last_renewal.elapsed() >= renew_every {
                match lease.renew().await {
                    Ok(true) => last_renewal = Instant::now(),
                    Ok(false) => return stop(StopReason::LeaseLost, iterations),
                    Err(e) => logger.log_warning(&format!("lease renewal failed: {}", e)),
                }
            }

            let bytes = match self.store.get(&frame_key).await {
                Ok(Some(bytes)) => bytes,
                Ok(None) => {
                    if !pause(&mut shutdown, self.config.poll_interval).await {
                        return stop(StopReason::Shutdown, iterations);
                    }
                    continue;
                }
                Err(e) => {
                    logger.log_warning(&format!(
                        "frame store unavailable, backing off {:?}: {}",
                        self.config.transient_backoff, e
                    ));
                    if !pause(&mut shutdown, self.config.transient_backoff).await {
                        return stop(StopReason::Shutdown, iterations);
                    }
                    continue;
                }
            };

            let (width, height) = (self.config.input_width, self.config.input_height);
            let decoded = tokio::task::spawn_blocking(move || {
                decode_frame(&bytes).map(|image| resize_frame(&image, width, height))
            })
            .await;

            let decoded = match decoded {
                Ok(result) => result.map_err(|e| e.to_string()),
                Err(e) => Err(e.to_string()),
            };

            let frame = match decoded {
                Ok(frame) => {
                    decode_failures = 0;
                    frame
                }
                Err(e) => {
                    decode_failures += 1;
                    record_decode_failure();
                    debug!(camera_id = %camera.id, decode_failures, "Undecodable frame: {}", e);
                    if decode_failures >= self.config.max_decode_failures {
                        logger.log_error(&format!(
                            "{} consecutive undecodable frames, stopping",
                            decode_failures
                        ));
                        return stop(StopReason::DecodeFailures, iterations);
                    }
                    if !pause(&mut shutdown, self.config.idle_interval).await {
                        return stop(StopReason::Shutdown, iterations);
                    }
                    continue;
                }
            };

            self.process_frame(camera, Arc::new(frame), &mut state).await;
            iterations += 1;

            if !pause(&mut shutdown, self.config.idle_interval).await {
                return stop(StopReason::Shutdown, iterations);
            }
        }
    }

    /// Run one decoded frame through the ensemble and every downstream step.
    /// Inference buffers are dropped when this returns.
    async fn process_frame(&self, camera: &CameraStream, frame: Arc<RgbImage>, state: &mut LoopState) {
        let outputs = self.run_models(camera, &frame, &state.model_slots).await;

        let mut all = Vec::new();
        let mut plates = Vec::new();
        let mut objects = Vec::new();
        let mut poses = Vec::new();
        let mut fire: Option<Vec<Detection>> = None;

        for output in outputs {
            let Some(detections) = output.detections else {
                continue;
            };
            all.extend(detections.iter().cloned());
            match output.role {
                DetectorRole::Plate => plates.extend(detections.into_iter().filter(|d| {
                    d.meets_min_size(self.config.min_plate_width, self.config.min_plate_height)
                })),
                DetectorRole::Object => objects.extend(detections),
                DetectorRole::Pose => poses.extend(detections),
                DetectorRole::Fire => fire.get_or_insert_with(Vec::new).extend(detections),
            }
        }

        self.dispatch_plate_crops(camera, &frame, plates, state).await;
        self.raise_object_incidents(camera, &objects, state);
        self.raise_pose_incidents(camera, &poses, state);
        if let Some(fire) = fire {
            self.handle_fire(camera, &frame, &fire, state).await;
        }
        self.publish_live(camera, &frame, all, state).await;
    }

    /// Every model runs on the blocking pool under its own timeout. A failed
    /// model contributes `None` and does not affect the others.
    ///
    /// A timed-out call keeps running on the blocking pool until it returns;
    /// its slot stays taken until then and the model is skipped as busy.
    async fn run_models(
        &self,
        camera: &CameraStream,
        frame: &Arc<RgbImage>,
        slots: &[Arc<Semaphore>],
    ) -> Vec<ModelOutput> {
        let calls = self.ensemble.detectors().iter().zip(slots).map(|(detector, slot)| {
            let detector: Arc<dyn Detector> = Arc::clone(detector);
            let slot = Arc::clone(slot);
            let frame = Arc::clone(frame);
            let timeout = self.config.model_timeout;
            async move {
                let name = detector.name().to_string();
                let role = detector.role();

                let Ok(permit) = slot.try_acquire_owned() else {
                    debug!(camera_id = %camera.id, model = %name, "Model busy with an earlier frame, skipped");
                    record_model_failure(&name, "busy");
                    return ModelOutput { role, detections: None };
                };

                let started = Instant::now();
                let task = tokio::task::spawn_blocking(move || {
                    let _permit = permit;
                    detector.detect(&frame)
                });

                let detections = match tokio::time::timeout(timeout, task).await {
                    Ok(Ok(Ok(detections))) => {
                        record_inference(&name, started.elapsed().as_secs_f64());
                        Some(detections)
                    }
                    Ok(Ok(Err(e))) => {
                        warn!(camera_id = %camera.id, model = %name, "Model failed: {}", e);
                        record_model_failure(&name, "error");
                        None
                    }
                    Ok(Err(e)) => {
                        warn!(camera_id = %camera.id, model = %name, "Model task panicked: {}", e);
                        record_model_failure(&name, "panic");
                        None
                    }
                    Err(_) => {
                        warn!(camera_id = %camera.id, model = %name, ?timeout, "Model timed out");
                        record_model_failure(&name, "timeout");
                        None
                    }
                };

                ModelOutput { role, detections }
            }
        });

        join_all(calls).await
    }

    /// Crop accepted plates and hand each to the router without waiting.
    async fn dispatch_plate_crops(
        &self,
        camera: &CameraStream,
        frame: &Arc<RgbImage>,
        plates: Vec<Detection>,
        state: &LoopState,
    ) {
        if plates.is_empty() {
            return;
        }

        let frame = Arc::clone(frame);
        let margin = self.config.crop_margin;
        let crops = tokio::task::spawn_blocking(move || {
            plates
                .iter()
                .filter_map(|d| crop_with_margin(&frame, &d.bbox, margin))
                .filter_map(|crop| encode_jpeg(&crop, JPEG_QUALITY).ok())
                .collect::<Vec<_>>()
        })
        .await;

        let crops = match crops {
            Ok(crops) => crops,
            Err(e) => {
                warn!(camera_id = %camera.id, "Plate crop task failed: {}", e);
                return;
            }
        };

        for crop in crops {
            let Ok(permit) = Arc::clone(&state.crops_in_flight).try_acquire_owned() else {
                debug!(camera_id = %camera.id, "Plate crop dropped, router busy");
                record_plate_crop(false);
                continue;
            };
            record_plate_crop(true);

            let router = Arc::clone(&self.router);
            let camera = camera.clone();
            tokio::spawn(async move {
                let result = router.handle(&camera, crop).await;
                debug!(camera_id = %camera.id, success = result.success, "Plate crop handled");
                drop(permit);
            });
        }
    }

    fn raise_object_incidents(&self, camera: &CameraStream, objects: &[Detection], state: &mut LoopState) {
        let carrying: Vec<&Detection> = objects
            .iter()
            .filter(|d| {
                self.config
                    .human_box_classes
                    .iter()
                    .any(|c| c.eq_ignore_ascii_case(&d.class_name))
            })
            .collect();

        if let Some(confidence) = max_confidence(carrying.iter().copied()) {
            let alert = Alert::incident(camera, AlertType::HumanBoxes, "Person carrying a box detected")
                .with_confidence(confidence)
                .with_details(json!({ "count": carrying.len() }));
            self.raise(alert, state);
        }
    }

    fn raise_pose_incidents(&self, camera: &CameraStream, poses: &[Detection], state: &mut LoopState) {
        for (class, alert_type, message) in [
            (PoseClass::Fallen, AlertType::Fallen, "Fallen person detected"),
            (PoseClass::Aggression, AlertType::Aggression, "Aggressive behaviour detected"),
        ] {
            let matching: Vec<&Detection> = poses
                .iter()
                .filter(|d| d.class_name == class.as_str())
                .collect();

            if let Some(confidence) = max_confidence(matching.iter().copied()) {
                let alert = Alert::incident(camera, alert_type, message)
                    .with_confidence(confidence)
                    .with_details(json!({ "persons": matching.len() }));
                self.raise(alert, state);
            }
        }
    }

    /// Store the fire view and result, describe the scene, and alert on suspicion.
    async fn handle_fire(
        &self,
        camera: &CameraStream,
        frame: &Arc<RgbImage>,
        fire: &[Detection],
        state: &mut LoopState,
    ) {
        let probability = fire_probability(fire);
        let fire_detected = probability > FIRE_THRESHOLD;
        let descriptions = self.describe_fire(frame, fire, fire_detected, state).await;

        let view = {
            let frame = Arc::clone(frame);
            let fire = fire.to_vec();
            tokio::task::spawn_blocking(move || encode_jpeg(&annotate(&frame, &fire), JPEG_QUALITY))
                .await
        };
        match view {
            Ok(Ok(jpeg)) => {
                if let Err(e) = self
                    .store
                    .set(&keys::fire_frame(camera.id), &jpeg, self.config.derived_frame_ttl)
                    .await
                {
                    warn!(camera_id = %camera.id, "Failed to store fire frame: {}", e);
                }
            }
            Ok(Err(e)) => warn!(camera_id = %camera.id, "Failed to encode fire frame: {}", e),
            Err(e) => warn!(camera_id = %camera.id, "Fire frame task failed: {}", e),
        }

        let result = FireResult {
            fire_detected,
            descriptions: descriptions.clone(),
        };
        if let Err(e) = self.store_json(&keys::fire_result(camera.id), &result).await {
            warn!(camera_id = %camera.id, "Failed to store fire result: {}", e);
        }

        if fire_detected {
            let alert = Alert::incident(camera, AlertType::Fire, "Fire or smoke suspected")
                .with_confidence(probability)
                .with_details(json!({ "probability": probability, "descriptions": descriptions }));
            self.raise(alert, state);
        }
    }

    /// Describe each fire crop (strongest first, capped), or the whole frame
    /// when no fire is suspected. Empty without a describer, while an earlier
    /// description is still running, or when description fails.
    async fn describe_fire(
        &self,
        frame: &Arc<RgbImage>,
        fire: &[Detection],
        fire_detected: bool,
        state: &LoopState,
    ) -> Vec<String> {
        let Some(describer) = self.ensemble.describer().cloned() else {
            return Vec::new();
        };
        let Ok(permit) = Arc::clone(&state.describer_slot).try_acquire_owned() else {
            record_model_failure("clip", "busy");
            return Vec::new();
        };

        let regions: Vec<_> = if fire_detected {
            strongest_fires(fire, MAX_FIRE_DESCRIPTIONS)
                .into_iter()
                .map(|d| d.bbox)
                .collect()
        } else {
            Vec::new()
        };
        let timeout = self.config.model_timeout * regions.len().max(1) as u32;

        let frame = Arc::clone(frame);
        let task = tokio::task::spawn_blocking(move || {
            let _permit = permit;
            let mut targets: Vec<RgbImage> = regions
                .iter()
                .filter_map(|bbox| crop_with_margin(&frame, bbox, FIRE_CROP_PADDING))
                .collect();
            if targets.is_empty() {
                targets.push((*frame).clone());
            }
            targets
                .iter()
                .map(|target| describer.describe(target))
                .collect::<VisionResult<Vec<String>>>()
        });

        match tokio::time::timeout(timeout, task).await {
            Ok(Ok(Ok(descriptions))) => descriptions,
            Ok(Ok(Err(e))) => {
                record_model_failure("clip", "error");
                debug!("Fire description failed: {}", e);
                Vec::new()
            }
            Ok(Err(_)) => {
                record_model_failure("clip", "panic");
                Vec::new()
            }
            Err(_) => {
                record_model_failure("clip", "timeout");
                Vec::new()
            }
        }
    }

    /// Publish an incident alert unless its type is cooling down.
    fn raise(&self, alert: Alert, state: &mut LoopState) {
        if !state.incidents.try_raise(alert.alert_type, Instant::now()) {
            debug!(
                camera_id = %alert.camera_id,
                alert_type = alert.alert_type.as_str(),
                "Incident alert suppressed by cooldown"
            );
            return;
        }

        let dispatcher = Arc::clone(&self.dispatcher);
        tokio::spawn(async move {
            if let Err(e) = dispatcher.publish(&alert).await {
                warn!(
                    camera_id = %alert.camera_id,
                    alert_type = alert.alert_type.as_str(),
                    "Failed to dispatch incident alert: {}", e
                );
            }
        });
    }

    /// Annotate and publish the live view when the gate allows it.
    async fn publish_live(
        &self,
        camera: &CameraStream,
        frame: &Arc<RgbImage>,
        detections: Vec<Detection>,
        state: &mut LoopState,
    ) {
        let frame = Arc::clone(frame);
        let encoded = tokio::task::spawn_blocking(move || {
            encode_jpeg(&annotate(&frame, &detections), JPEG_QUALITY)
        })
        .await;

        let jpeg = match encoded {
            Ok(Ok(jpeg)) => jpeg,
            Ok(Err(e)) => {
                warn!(camera_id = %camera.id, "Failed to encode annotated frame: {}", e);
                return;
            }
            Err(e) => {
                warn!(camera_id = %camera.id, "Annotation task failed: {}", e);
                return;
            }
        };

        if !state.live_gate.should_publish(&jpeg) {
            return;
        }

        if let Err(e) = self
            .store
            .set(&keys::annotated_frame(camera.id), &jpeg, self.config.derived_frame_ttl)
            .await
        {
            warn!(camera_id = %camera.id, "Failed to store annotated frame: {}", e);
            return;
        }
        if let Err(e) = self.dispatcher.publish_live(camera.id).await {
            warn!(camera_id = %camera.id, "Failed to publish live notice: {}", e);
        }
    }

    async fn store_json<T: Serialize>(&self, key: &str, value: &T) -> WorkerResult<()> {
        let bytes = serde_json::to_vec(value)?;
        self.store.set(key, &bytes, self.config.fire_result_ttl).await?;
        Ok(())
    }
}

fn max_confidence<'a>(detections: impl Iterator<Item = &'a Detection>) -> Option<f32> {
    detections.map(|d| d.confidence).reduce(f32::max)
}

/// Sleep unless shutdown is signalled first. Returns `false` on shutdown.
async fn pause(shutdown: &mut watch::Receiver<bool>, duration: Duration) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(duration) => true,
        changed = shutdown.changed() => changed.is_ok() && !*shutdown.borrow(),
    }
}
