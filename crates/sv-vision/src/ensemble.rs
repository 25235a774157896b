//! The model ensemble shared by every orchestrator in a worker.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use sv_models::DetectorRole;
use tracing::{error, info};

use crate::clip::{ClipConfig, ClipDescriber};
use crate::detector::Detector;
use crate::pose::{YoloPoseConfig, YoloPoseDetector};
use crate::yolo::{YoloConfig, YoloDetector};

/// Which models to load. Absent entries are simply not run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EnsembleConfig {
    pub plate: Option<YoloConfig>,
    pub object: Option<YoloConfig>,
    pub pose: Option<YoloPoseConfig>,
    pub fire: Option<YoloConfig>,
    pub clip: Option<ClipConfig>,
}

/// Loaded models. Sessions are released when the last handle is dropped.
#[derive(Clone, Default)]
pub struct ModelEnsemble {
    detectors: Vec<Arc<dyn Detector>>,
    describer: Option<Arc<ClipDescriber>>,
}

impl ModelEnsemble {
    pub fn new(detectors: Vec<Arc<dyn Detector>>, describer: Option<Arc<ClipDescriber>>) -> Self {
        Self {
            detectors,
            describer,
        }
    }

    /// Load every configured model once.
    ///
    /// A model that fails to load is logged and left out; the remaining
    /// models still run.
    pub fn load(config: &EnsembleConfig) -> Self {
        let mut detectors: Vec<Arc<dyn Detector>> = Vec::new();

        for yolo in [&config.plate, &config.object, &config.fire].into_iter().flatten() {
            match YoloDetector::new(yolo.clone()) {
                Ok(d) => detectors.push(Arc::new(d)),
                Err(e) => error!(model = %yolo.name, "Failed to load model: {}", e),
            }
        }

        if let Some(pose) = &config.pose {
            match YoloPoseDetector::new(pose.clone()) {
                Ok(d) => detectors.push(Arc::new(d)),
                Err(e) => error!(model = %pose.name, "Failed to load model: {}", e),
            }
        }

        let describer = config.clip.as_ref().and_then(|clip| {
            ClipDescriber::new(clip.clone())
                .map(Arc::new)
                .map_err(|e| error!("Failed to load phrase describer: {}", e))
                .ok()
        });

        info!(
            detectors = detectors.len(),
            describer = describer.is_some(),
            "Model ensemble loaded"
        );

        Self::new(detectors, describer)
    }

    pub fn detectors(&self) -> &[Arc<dyn Detector>] {
        &self.detectors
    }

    pub fn by_role(&self, role: DetectorRole) -> impl Iterator<Item = &Arc<dyn Detector>> {
        self.detectors.iter().filter(move |d| d.role() == role)
    }

    pub fn describer(&self) -> Option<&Arc<ClipDescriber>> {
        self.describer.as_ref()
    }

    pub fn is_empty(&self) -> bool {
        self.detectors.is_empty()
    }
}
