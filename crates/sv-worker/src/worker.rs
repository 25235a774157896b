//! Worker assembly: builds every component from `WorkerConfig`.

use std::sync::Arc;

use sv_gateway::{
    AllowListGateway, AuthorizationGateway, CameraRegistry, FileCameraRegistry,
    HttpCameraRegistry, HttpConfig, HttpGateway,
};
use sv_plate::{PlateExtractor, PlateFormat, TesseractEngine};
use sv_store::{AlertBus, FrameStore, LocalAlertBus, MemoryFrameStore, RedisAlertBus, RedisFrameStore};
use sv_vision::{FfmpegOpener, FfmpegSourceConfig, ModelEnsemble};
use tokio::sync::watch;
use tracing::{info, warn};

use crate::config::{GatewaySource, RegistrySource, StoreBackend, WorkerConfig};
use crate::dispatcher::Dispatcher;
use crate::error::{WorkerError, WorkerResult};
use crate::health::HealthMonitor;
use crate::ingestor::Ingestor;
use crate::orchestrator::Orchestrator;
use crate::plate_router::PlateRouter;
use crate::supervisor::Supervisor;

/// A fully wired worker.
pub struct Worker {
    supervisor: Supervisor,
}

impl Worker {
    /// Connect to the store, load models and build the pipeline.
    pub async fn from_config(config: &WorkerConfig) -> WorkerResult<Self> {
        let (store, bus) = build_store(config)?;

        let ensemble_config = config
            .models
            .ensemble(config.detect.input_width, config.detect.input_height);
        let ensemble = tokio::task::spawn_blocking(move || ModelEnsemble::load(&ensemble_config))
            .await
            .map_err(|e| WorkerError::task_failed(format!("model loading: {}", e)))?;
        if ensemble.is_empty() {
            warn!("No detection models loaded; frames will only be annotated and relayed");
        }

        let format = match &config.plate_format_path {
            Some(path) => PlateFormat::from_file(path)?,
            None => PlateFormat::default(),
        };
        let engine = TesseractEngine::new(config.tesseract_timeout)?;
        let extractor = PlateExtractor::new(Arc::new(engine), format);

        let dispatcher = Arc::new(Dispatcher::new(bus, store.clone(), config.audit_ttl));
        let router = Arc::new(PlateRouter::new(
            Arc::new(extractor),
            build_gateway(&config.gateway)?,
            dispatcher.clone(),
        ));

        let opener = FfmpegOpener::new(FfmpegSourceConfig {
            read_timeout: config.ingest.read_timeout,
            ..Default::default()
        });
        let ingestor = Arc::new(Ingestor::new(
            store.clone(),
            Arc::new(opener),
            config.ingest.clone(),
        ));
        let orchestrator = Arc::new(Orchestrator::new(
            store.clone(),
            Arc::new(ensemble),
            router,
            dispatcher.clone(),
            config.detect.clone(),
        ));
        let health = HealthMonitor::new(store, dispatcher.clone(), config.supervisor.status_ttl);

        let supervisor = Supervisor::new(
            build_registry(&config.registry)?,
            ingestor,
            orchestrator,
            dispatcher,
            health,
            config.supervisor.clone(),
        );

        Ok(Self { supervisor })
    }

    /// Supervise cameras until `shutdown` is signalled.
    pub async fn run(self, shutdown: watch::Receiver<bool>) {
        self.supervisor.run(shutdown).await;
    }
}

fn build_store(config: &WorkerConfig) -> WorkerResult<(Arc<dyn FrameStore>, Arc<dyn AlertBus>)> {
    let (store, bus): (Arc<dyn FrameStore>, Arc<dyn AlertBus>) = match config.store_backend {
        StoreBackend::Redis => {
            info!(redis_url = %config.redis_url, "Using Redis frame store");
            (
                Arc::new(RedisFrameStore::new(&config.redis_url)?),
                Arc::new(RedisAlertBus::new(&config.redis_url)?),
            )
        }
        StoreBackend::Memory => {
            info!("Using in-process frame store");
            (Arc::new(MemoryFrameStore::new()), Arc::new(LocalAlertBus::new()))
        }
    };
    Ok((store, bus))
}

fn build_gateway(source: &GatewaySource) -> WorkerResult<Arc<dyn AuthorizationGateway>> {
    let gateway: Arc<dyn AuthorizationGateway> = match source {
        GatewaySource::Http(url) => {
            info!(base_url = %url, "Using HTTP authorization gateway");
            Arc::new(HttpGateway::new(HttpConfig::new(url)?)?)
        }
        GatewaySource::AllowList(path) => {
            info!(path = %path.display(), "Using allow-list authorization");
            Arc::new(AllowListGateway::from_file(path)?)
        }
        GatewaySource::Empty => {
            warn!("No authorization source configured; every plate is unauthorized");
            Arc::new(AllowListGateway::default())
        }
    };
    Ok(gateway)
}

fn build_registry(source: &RegistrySource) -> WorkerResult<Arc<dyn CameraRegistry>> {
    let registry: Arc<dyn CameraRegistry> = match source {
        RegistrySource::Http(url) => {
            info!(base_url = %url, "Using HTTP camera registry");
            Arc::new(HttpCameraRegistry::new(HttpConfig::new(url)?)?)
        }
        RegistrySource::File(path) => {
            info!(path = %path.display(), "Using camera file registry");
            Arc::new(FileCameraRegistry::new(path.clone()))
        }
    };
    Ok(registry)
}
