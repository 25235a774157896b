//! Worker error types.

use thiserror::Error;

pub type WorkerResult<T> = Result<T, WorkerError>;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Dispatch failed: {0}")]
    DispatchFailed(String),

    #[error("Task failed: {0}")]
    TaskFailed(String),

    #[error("Store error: {0}")]
    Store(#[from] sv_store::StoreError),

    #[error("Vision error: {0}")]
    Vision(#[from] sv_vision::VisionError),

    #[error("Plate error: {0}")]
    Plate(#[from] sv_plate::PlateError),

    #[error("Gateway error: {0}")]
    Gateway(#[from] sv_gateway::GatewayError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl WorkerError {
    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::ConfigError(msg.into())
    }

    pub fn dispatch_failed(msg: impl Into<String>) -> Self {
        Self::DispatchFailed(msg.into())
    }

    pub fn task_failed(msg: impl Into<String>) -> Self {
        Self::TaskFailed(msg.into())
    }

    /// Failures that clear up on their own: store disconnects, stream
    /// hiccups and retryable gateway errors.
    pub fn is_transient(&self) -> bool {
        match self {
            WorkerError::Store(e) => e.is_transient(),
            WorkerError::Vision(e) => e.is_transient(),
            WorkerError::Gateway(e) => e.is_retryable(),
            WorkerError::Io(_) => true,
            _ => false,
        }
    }
}
