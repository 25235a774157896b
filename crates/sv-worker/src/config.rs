//! Worker configuration.
//!
//! Every struct has a `Default` and a `from_env()`; unset or unparsable
//! variables fall back to the default.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use sv_vision::{ClipConfig, EnsembleConfig, YoloConfig, YoloPoseConfig};
use sv_models::DetectorRole;

use crate::error::{WorkerError, WorkerResult};

fn env_parse<T: FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(default)
}

fn env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|s| !s.trim().is_empty())
}

fn env_path(name: &str) -> Option<PathBuf> {
    env_string(name).map(PathBuf::from)
}

fn env_list(name: &str, default: &[&str]) -> Vec<String> {
    match env_string(name) {
        Some(s) => s
            .split(',')
            .map(|p| p.trim().to_string())
            .filter(|p| !p.is_empty())
            .collect(),
        None => default.iter().map(|s| s.to_string()).collect(),
    }
}

/// Which Frame Store implementation to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Redis,
    Memory,
}

impl FromStr for StoreBackend {
    type Err = WorkerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "redis" => Ok(Self::Redis),
            "memory" => Ok(Self::Memory),
            other => Err(WorkerError::config_error(format!(
                "unknown STORE_BACKEND '{}' (expected redis or memory)",
                other
            ))),
        }
    }
}

/// Frame ingestor settings.
#[derive(Debug, Clone)]
pub struct IngestConfig {
    /// Expiry of `camera:{id}:frame`
    pub frame_ttl: Duration,
    /// Used when a camera does not set its own rate
    pub default_sample_fps: f32,
    /// Wait after a read failure or unopenable source
    pub retry_delay: Duration,
    /// Longest wait for the next decoded frame
    pub read_timeout: Duration,
    pub lease_ttl: Duration,
    /// Identical failures logged before suppression
    pub max_logged_failures: u32,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            frame_ttl: Duration::from_secs(5),
            default_sample_fps: 5.0,
            retry_delay: Duration::from_secs(5),
            read_timeout: Duration::from_secs(10),
            lease_ttl: Duration::from_secs(15),
            max_logged_failures: 3,
        }
    }
}

impl IngestConfig {
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            frame_ttl: Duration::from_secs(env_parse("FRAME_TTL_SECS", 5)),
            default_sample_fps: env_parse("INGEST_SAMPLE_FPS", d.default_sample_fps),
            retry_delay: Duration::from_secs(env_parse("INGEST_RETRY_SECS", 5)),
            read_timeout: Duration::from_secs(env_parse("INGEST_READ_TIMEOUT_SECS", 10)),
            lease_ttl: Duration::from_secs(env_parse("LEASE_TTL_SECS", 15)),
            max_logged_failures: d.max_logged_failures,
        }
    }
}

/// Detection orchestrator settings.
#[derive(Debug, Clone)]
pub struct DetectConfig {
    /// Sleep when no frame is available
    pub poll_interval: Duration,
    /// Sleep between iterations
    pub idle_interval: Duration,
    /// Sleep after a store error
    pub transient_backoff: Duration,
    pub max_decode_failures: u32,
    pub input_width: u32,
    pub input_height: u32,
    /// Per-model call timeout
    pub model_timeout: Duration,
    pub min_plate_width: f32,
    pub min_plate_height: f32,
    pub crop_margin: f32,
    /// Plate crops in flight per camera
    pub max_crops_in_flight: usize,
    /// Per-camera, per-type gate for incident alerts
    pub incident_cooldown: Duration,
    /// Live-view republish interval for unchanged frames
    pub live_min_interval: Duration,
    /// Object classes that raise `human_boxes`
    pub human_box_classes: Vec<String>,
    pub lease_ttl: Duration,
    /// TTL of annotated and fire frames
    pub derived_frame_ttl: Duration,
    /// TTL of `result:{id}:fire`
    pub fire_result_ttl: Duration,
}

impl Default for DetectConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(500),
            idle_interval: Duration::from_millis(100),
            transient_backoff: Duration::from_secs(5),
            max_decode_failures: 10,
            input_width: 640,
            input_height: 384,
            model_timeout: Duration::from_secs(5),
            min_plate_width: 50.0,
            min_plate_height: 20.0,
            crop_margin: 5.0,
            max_crops_in_flight: 4,
            incident_cooldown: Duration::from_secs(30),
            live_min_interval: Duration::from_secs(1),
            human_box_classes: vec!["person_with_box".to_string()],
            lease_ttl: Duration::from_secs(15),
            derived_frame_ttl: Duration::from_secs(5),
            fire_result_ttl: Duration::from_secs(10),
        }
    }
}

impl DetectConfig {
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            poll_interval: Duration::from_millis(env_parse("DETECT_POLL_MS", 500)),
            idle_interval: Duration::from_millis(env_parse("DETECT_IDLE_MS", 100)),
            transient_backoff: Duration::from_secs(env_parse("DETECT_BACKOFF_SECS", 5)),
            max_decode_failures: env_parse("DETECT_MAX_DECODE_FAILURES", d.max_decode_failures),
            input_width: env_parse("DETECT_INPUT_WIDTH", d.input_width),
            input_height: env_parse("DETECT_INPUT_HEIGHT", d.input_height),
            model_timeout: Duration::from_millis(env_parse("MODEL_TIMEOUT_MS", 5000)),
            max_crops_in_flight: env_parse("DETECT_MAX_CROPS_IN_FLIGHT", d.max_crops_in_flight),
            incident_cooldown: Duration::from_secs(env_parse("INCIDENT_COOLDOWN_SECS", 30)),
            human_box_classes: env_list("DETECT_HUMAN_BOX_CLASSES", &["person_with_box"]),
            lease_ttl: Duration::from_secs(env_parse("LEASE_TTL_SECS", 15)),
            ..d
        }
    }
}

/// Model file locations. Unset paths leave that model out.
#[derive(Debug, Clone, Default)]
pub struct ModelPaths {
    pub plate: Option<PathBuf>,
    pub object: Option<PathBuf>,
    pub object_classes: Vec<String>,
    pub pose: Option<PathBuf>,
    pub fire: Option<PathBuf>,
    pub clip: Option<PathBuf>,
    pub clip_phrases: Option<PathBuf>,
}

impl ModelPaths {
    pub fn from_env() -> Self {
        Self {
            plate: env_path("PLATE_MODEL_PATH"),
            object: env_path("OBJECT_MODEL_PATH"),
            object_classes: env_list("OBJECT_CLASSES", &["person", "box", "person_with_box"]),
            pose: env_path("POSE_MODEL_PATH"),
            fire: env_path("FIRE_MODEL_PATH"),
            clip: env_path("CLIP_MODEL_PATH"),
            clip_phrases: env_path("CLIP_PHRASES_PATH"),
        }
    }

    /// Ensemble description for the configured paths at the given input size.
    pub fn ensemble(&self, input_width: u32, input_height: u32) -> EnsembleConfig {
        let sized = |mut c: YoloConfig| {
            c.input_width = input_width;
            c.input_height = input_height;
            c
        };

        EnsembleConfig {
            plate: self.plate.clone().map(|p| sized(YoloConfig::plate(p))),
            object: self.object.clone().map(|p| {
                sized(YoloConfig::new(
                    "object",
                    DetectorRole::Object,
                    p,
                    self.object_classes.clone(),
                ))
            }),
            pose: self.pose.clone().map(|p| {
                let mut pose = YoloPoseConfig::new(p);
                pose.input_width = input_width;
                pose.input_height = input_height;
                pose
            }),
            fire: self.fire.clone().map(|p| sized(YoloConfig::fire(p))),
            clip: match (&self.clip, &self.clip_phrases) {
                (Some(model), Some(phrases)) => Some(ClipConfig::new(model, phrases)),
                _ => None,
            },
        }
    }
}

/// Where plate authorization decisions come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewaySource {
    Http(String),
    AllowList(PathBuf),
    /// No allow-list: every plate is unauthorized
    Empty,
}

/// Where the camera list comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistrySource {
    Http(String),
    File(PathBuf),
}

/// Camera supervisor settings.
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    pub refresh_interval: Duration,
    pub health_interval: Duration,
    /// Time allowed for tasks to stop after shutdown is signalled
    pub shutdown_grace: Duration,
    /// Expiry of `camera:{id}:status`
    pub status_ttl: Duration,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            refresh_interval: Duration::from_secs(30),
            health_interval: Duration::from_secs(15),
            shutdown_grace: Duration::from_secs(10),
            status_ttl: Duration::from_secs(300),
        }
    }
}

impl SupervisorConfig {
    pub fn from_env() -> Self {
        Self {
            refresh_interval: Duration::from_secs(env_parse("SUPERVISOR_REFRESH_SECS", 30)),
            health_interval: Duration::from_secs(env_parse("HEALTH_SWEEP_SECS", 15)),
            shutdown_grace: Duration::from_secs(env_parse("SHUTDOWN_GRACE_SECS", 10)),
            ..Default::default()
        }
    }
}

/// Top-level worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub redis_url: String,
    pub store_backend: StoreBackend,
    pub ingest: IngestConfig,
    pub detect: DetectConfig,
    pub supervisor: SupervisorConfig,
    pub models: ModelPaths,
    /// JSON `PlateFormat`; defaults apply when unset
    pub plate_format_path: Option<PathBuf>,
    pub tesseract_timeout: Duration,
    pub gateway: GatewaySource,
    pub registry: RegistrySource,
    /// Expiry of `alert:{id}:{ts}` audit records
    pub audit_ttl: Duration,
    pub metrics_enabled: bool,
    pub metrics_addr: SocketAddr,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            redis_url: "redis://127.0.0.1:6379".to_string(),
            store_backend: StoreBackend::Redis,
            ingest: IngestConfig::default(),
            detect: DetectConfig::default(),
            supervisor: SupervisorConfig::default(),
            models: ModelPaths::default(),
            plate_format_path: None,
            tesseract_timeout: Duration::from_secs(10),
            gateway: GatewaySource::Empty,
            registry: RegistrySource::File(PathBuf::from("cameras.json")),
            audit_ttl: Duration::from_secs(3600),
            metrics_enabled: false,
            metrics_addr: SocketAddr::from(([0, 0, 0, 0], 9100)),
        }
    }
}

impl WorkerConfig {
    /// Create config from environment variables.
    pub fn from_env() -> WorkerResult<Self> {
        let d = Self::default();

        let store_backend = match env_string("STORE_BACKEND") {
            Some(s) => s.parse()?,
            None => d.store_backend,
        };

        let gateway = match (env_string("GATEWAY_URL"), env_path("AUTHORIZED_PLATES_PATH")) {
            (Some(url), _) => GatewaySource::Http(url),
            (None, Some(path)) => GatewaySource::AllowList(path),
            (None, None) => GatewaySource::Empty,
        };

        let registry = match (env_string("CAMERA_REGISTRY_URL"), env_path("CAMERAS_PATH")) {
            (Some(url), _) => RegistrySource::Http(url),
            (None, Some(path)) => RegistrySource::File(path),
            (None, None) => d.registry,
        };

        let metrics_addr = match env_string("METRICS_ADDR") {
            Some(addr) => addr.parse().map_err(|e| {
                WorkerError::config_error(format!("invalid METRICS_ADDR '{}': {}", addr, e))
            })?,
            None => d.metrics_addr,
        };

        Ok(Self {
            redis_url: env_string("REDIS_URL").unwrap_or(d.redis_url),
            store_backend,
            ingest: IngestConfig::from_env(),
            detect: DetectConfig::from_env(),
            supervisor: SupervisorConfig::from_env(),
            models: ModelPaths::from_env(),
            plate_format_path: env_path("PLATE_FORMAT_PATH"),
            tesseract_timeout: Duration::from_secs(env_parse("TESSERACT_TIMEOUT_SECS", 10)),
            gateway,
            registry,
            audit_ttl: d.audit_ttl,
            metrics_enabled: env_parse("METRICS_ENABLED", false),
            metrics_addr,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = WorkerConfig::default();
        assert_eq!(config.ingest.frame_ttl, Duration::from_secs(5));
        assert_eq!(config.detect.max_decode_failures, 10);
        assert_eq!(config.detect.poll_interval, Duration::from_millis(500));
        assert_eq!((config.detect.input_width, config.detect.input_height), (640, 384));
        assert_eq!(config.supervisor.refresh_interval, Duration::from_secs(30));
        assert_eq!(config.supervisor.status_ttl, Duration::from_secs(300));
        assert_eq!(config.audit_ttl, Duration::from_secs(3600));
    }

    #[test]
    fn test_store_backend_parse() {
        assert_eq!("Redis".parse::<StoreBackend>().unwrap(), StoreBackend::Redis);
        assert_eq!(" memory ".parse::<StoreBackend>().unwrap(), StoreBackend::Memory);
        assert!("sqlite".parse::<StoreBackend>().is_err());
    }

    #[test]
    fn test_ensemble_from_paths() {
        let paths = ModelPaths {
            plate: Some(PathBuf::from("/models/plate.onnx")),
            pose: Some(PathBuf::from("/models/pose.onnx")),
            clip: Some(PathBuf::from("/models/clip.onnx")),
            ..Default::default()
        };
        let ensemble = paths.ensemble(320, 192);

        let plate = ensemble.plate.unwrap();
        assert_eq!((plate.input_width, plate.input_height), (320, 192));
        assert_eq!(ensemble.pose.unwrap().input_width, 320);
        assert!(ensemble.object.is_none());
        // The describer needs both the model and its phrase table.
        assert!(ensemble.clip.is_none());
    }
}
