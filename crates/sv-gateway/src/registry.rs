//! Camera registry bindings.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use sv_models::CameraStream;
use tracing::debug;

use crate::error::GatewayResult;

/// Source of the cameras the worker should run.
#[async_trait]
pub trait CameraRegistry: Send + Sync {
    async fn list_cameras(&self) -> GatewayResult<Vec<CameraStream>>;
}

/// Reads a JSON array of cameras on every call, so edits apply on the next
/// supervisor refresh.
#[derive(Debug, Clone)]
pub struct FileCameraRegistry {
    path: PathBuf,
}

impl FileCameraRegistry {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl CameraRegistry for FileCameraRegistry {
    async fn list_cameras(&self) -> GatewayResult<Vec<CameraStream>> {
        let text = tokio::fs::read_to_string(&self.path).await?;
        let cameras: Vec<CameraStream> = serde_json::from_str(&text)?;
        debug!(path = %self.path.display(), cameras = cameras.len(), "Read camera list");
        Ok(cameras)
    }
}

/// Fixed camera list.
#[derive(Debug, Clone, Default)]
pub struct StaticCameraRegistry {
    cameras: Vec<CameraStream>,
}

impl StaticCameraRegistry {
    pub fn new(cameras: Vec<CameraStream>) -> Self {
        Self { cameras }
    }
}

#[async_trait]
impl CameraRegistry for StaticCameraRegistry {
    async fn list_cameras(&self) -> GatewayResult<Vec<CameraStream>> {
        Ok(self.cameras.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::GatewayError;
    use std::io::Write;
    use sv_models::CameraId;

    #[tokio::test]
    async fn test_file_registry() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"[
                {{"id": 1, "source_uri": "rtsp://10.0.0.5/stream1", "zone": "north", "name": "Gate"}},
                {{"id": 2, "source_uri": "/data/lot.mp4", "sample_fps": 2.0}}
            ]"#
        )
        .unwrap();

        let cameras = FileCameraRegistry::new(file.path()).list_cameras().await.unwrap();
        assert_eq!(cameras.len(), 2);
        assert_eq!(cameras[0].id, CameraId(1));
        assert!(cameras[0].is_rtsp());
        assert_eq!(cameras[0].zone.as_ref().map(|z| z.as_str()), Some("north"));
        assert_eq!(cameras[1].sample_fps, 2.0);
        assert_eq!(cameras[1].display_name(), "Camera 2");
    }

    #[tokio::test]
    async fn test_missing_file_is_an_error() {
        let registry = FileCameraRegistry::new("/nonexistent/cameras.json");
        assert!(matches!(
            registry.list_cameras().await,
            Err(GatewayError::Io(_))
        ));
    }
}
