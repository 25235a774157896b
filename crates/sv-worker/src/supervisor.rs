//! Camera supervisor.
//!
//! Keeps an ingestor and an orchestrator running for every registered
//! camera, restarts tasks that stopped, stops tasks for cameras that left
//! the registry and runs the health monitor on its own interval.

use std::collections::HashMap;
use std::sync::Arc;

use futures_util::future::join_all;
use sv_gateway::CameraRegistry;
use sv_models::{Alert, CameraId, CameraStream, RunSummary, StopReason};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::config::SupervisorConfig;
use crate::dispatcher::Dispatcher;
use crate::health::HealthMonitor;
use crate::ingestor::{IngestExit, Ingestor};
use crate::orchestrator::Orchestrator;
use crate::retry::{retry_async, RetryConfig};
use crate::task::StartOutcome;

/// Tasks this worker runs for one camera.
struct CameraTasks {
    stop: watch::Sender<bool>,
    ingest: Option<JoinHandle<IngestExit>>,
    detect: Option<JoinHandle<RunSummary>>,
}

impl CameraTasks {
    fn new() -> Self {
        Self {
            stop: watch::channel(false).0,
            ingest: None,
            detect: None,
        }
    }
}

pub struct Supervisor {
    registry: Arc<dyn CameraRegistry>,
    ingestor: Arc<Ingestor>,
    orchestrator: Arc<Orchestrator>,
    dispatcher: Arc<Dispatcher>,
    health: HealthMonitor,
    config: SupervisorConfig,
    cameras: Vec<CameraStream>,
    tasks: HashMap<CameraId, CameraTasks>,
}

impl Supervisor {
    pub fn new(
        registry: Arc<dyn CameraRegistry>,
        ingestor: Arc<Ingestor>,
        orchestrator: Arc<Orchestrator>,
        dispatcher: Arc<Dispatcher>,
        health: HealthMonitor,
        config: SupervisorConfig,
    ) -> Self {
        Self {
            registry,
            ingestor,
            orchestrator,
            dispatcher,
            health,
            config,
            cameras: Vec::new(),
            tasks: HashMap::new(),
        }
    }

    /// Cameras from the last successful registry listing.
    pub fn cameras(&self) -> &[CameraStream] {
        &self.cameras
    }

    /// Number of cameras with at least one task running on this worker.
    pub fn active_cameras(&self) -> usize {
        self.tasks
            .values()
            .filter(|t| t.ingest.is_some() || t.detect.is_some())
            .count()
    }

    /// Supervise until `shutdown` is signalled, then stop every task.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        let mut refresh = tokio::time::interval(self.config.refresh_interval);
        refresh.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut health = tokio::time::interval(self.config.health_interval);
        health.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            refresh_secs = self.config.refresh_interval.as_secs(),
            health_secs = self.config.health_interval.as_secs(),
            "Supervisor started"
        );

        loop {
            tokio::select! {
                _ = refresh.tick() => self.refresh().await,
                _ = health.tick() => {
                    self.health.sweep(&self.cameras).await;
                }
                _ = shutdown.changed() => break,
            }
        }

        self.shutdown().await;
    }

    /// Reap stopped tasks, reload the camera list and start missing tasks.
    pub async fn refresh(&mut self) {
        self.reap().await;

        let retry = RetryConfig::new("list_cameras");
        match retry_async(&retry, || self.registry.list_cameras()).await {
            Ok(cameras) => {
                if cameras.len() != self.cameras.len() {
                    info!(cameras = cameras.len(), "Camera list updated");
                }
                self.cameras = cameras;
            }
            Err(e) => warn!(
                cameras = self.cameras.len(),
                "Camera registry unavailable, keeping last known list: {}", e
            ),
        }

        self.stop_removed();

        for camera in self.cameras.clone() {
            self.ensure_running(camera).await;
        }
    }

    async fn ensure_running(&mut self, camera: CameraStream) {
        let tasks = self.tasks.entry(camera.id).or_insert_with(CameraTasks::new);
        if *tasks.stop.borrow() {
            // Re-added after removal: wait for the old tasks to be reaped.
            if tasks.ingest.is_some() || tasks.detect.is_some() {
                return;
            }
            *tasks = CameraTasks::new();
        }

        if tasks.ingest.is_none() {
            match self.ingestor.start(camera.clone(), tasks.stop.subscribe()).await {
                Ok(StartOutcome::Started(handle)) => tasks.ingest = Some(handle),
                Ok(StartOutcome::AlreadyRunning) => {
                    debug!(camera_id = %camera.id, "Ingestor owned by another worker")
                }
                Err(e) => warn!(camera_id = %camera.id, "Failed to start ingestor: {}", e),
            }
        }

        if tasks.detect.is_none() {
            match self
                .orchestrator
                .start(camera.clone(), None, tasks.stop.subscribe())
                .await
            {
                Ok(StartOutcome::Started(handle)) => tasks.detect = Some(handle),
                Ok(StartOutcome::AlreadyRunning) => {
                    debug!(camera_id = %camera.id, "Orchestrator owned by another worker")
                }
                Err(e) => warn!(camera_id = %camera.id, "Failed to start orchestrator: {}", e),
            }
        }
    }

    /// Signal tasks of cameras no longer in the registry. They are reaped
    /// on a later refresh once stopped.
    fn stop_removed(&mut self) {
        for (id, tasks) in &self.tasks {
            if !self.cameras.iter().any(|c| c.id == *id) && !*tasks.stop.borrow() {
                info!(camera_id = %id, "Camera removed from registry, stopping tasks");
                tasks.stop.send_replace(true);
            }
        }
    }

    /// Collect finished tasks so the next refresh can restart them.
    async fn reap(&mut self) {
        let mut stopped = Vec::new();

        for (id, tasks) in self.tasks.iter_mut() {
            if tasks.ingest.as_ref().is_some_and(|h| h.is_finished()) {
                if let Some(handle) = tasks.ingest.take() {
                    match handle.await {
                        Ok(exit) => debug!(camera_id = %id, ?exit, "Ingestor stopped"),
                        Err(e) => error!(camera_id = %id, "Ingestor task failed: {}", e),
                    }
                }
            }

            if tasks.detect.as_ref().is_some_and(|h| h.is_finished()) {
                if let Some(handle) = tasks.detect.take() {
                    match handle.await {
                        Ok(summary) => stopped.push(summary),
                        Err(e) => error!(camera_id = %id, "Orchestrator task failed: {}", e),
                    }
                }
            }
        }

        self.tasks
            .retain(|_, t| !*t.stop.borrow() || t.ingest.is_some() || t.detect.is_some());

        for summary in stopped {
            self.report_stop(&summary).await;
        }
    }

    async fn report_stop(&self, summary: &RunSummary) {
        info!(
            camera_id = %summary.camera_id,
            stop_reason = summary.stop_reason.as_str(),
            iterations = summary.iterations_completed,
            "Orchestrator stopped"
        );

        if summary.stop_reason != StopReason::DecodeFailures {
            return;
        }

        let mut alert = Alert::system(
            summary.camera_id,
            format!(
                "Detection stopped after repeated undecodable frames ({} iterations completed)",
                summary.iterations_completed
            ),
        );
        if let Ok(details) = serde_json::to_value(summary) {
            alert = alert.with_details(details);
        }
        if let Some(camera) = self.cameras.iter().find(|c| c.id == summary.camera_id) {
            alert = alert.with_camera(camera);
        }

        if let Err(e) = self.dispatcher.publish(&alert).await {
            warn!(camera_id = %summary.camera_id, "Failed to publish system alert: {}", e);
        }
    }

    /// Signal every task and wait up to the grace period; stragglers are aborted.
    pub async fn shutdown(mut self) {
        info!(cameras = self.tasks.len(), "Supervisor shutting down");

        let mut ingest = Vec::new();
        let mut detect = Vec::new();
        for tasks in self.tasks.values_mut() {
            tasks.stop.send_replace(true);
            ingest.extend(tasks.ingest.take());
            detect.extend(tasks.detect.take());
        }

        let aborts: Vec<_> = ingest
            .iter()
            .map(|h| h.abort_handle())
            .chain(detect.iter().map(|h| h.abort_handle()))
            .collect();

        let drained = tokio::time::timeout(self.config.shutdown_grace, async {
            tokio::join!(join_all(ingest), join_all(detect))
        })
        .await;

        if drained.is_err() {
            warn!(
                grace_secs = self.config.shutdown_grace.as_secs(),
                "Tasks still running after grace period, aborting"
            );
            for handle in aborts {
                handle.abort();
            }
        }
    }
}
