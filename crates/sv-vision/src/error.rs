//! Error types for vision operations.

use std::time::Duration;
use thiserror::Error;

/// Result type for vision operations.
pub type VisionResult<T> = Result<T, VisionError>;

/// Errors that can occur while capturing or analysing frames.
#[derive(Debug, Error)]
pub enum VisionError {
    #[error("FFmpeg not found in PATH")]
    FfmpegNotFound,

    #[error("Stream unavailable ({uri}): {reason}")]
    SourceUnavailable { uri: String, reason: String },

    #[error("No frame received within {0:?}")]
    ReadTimeout(Duration),

    #[error("Frame decode failed: {0}")]
    Decode(String),

    #[error("Frame encode failed: {0}")]
    Encode(String),

    #[error("Model not found: {0}")]
    ModelNotFound(String),

    #[error("Inference failed ({model}): {message}")]
    Inference { model: String, message: String },

    #[error("Invalid model output ({model}): {message}")]
    InvalidOutput { model: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl VisionError {
    pub fn source_unavailable(uri: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::SourceUnavailable {
            uri: uri.into(),
            reason: reason.into(),
        }
    }

    pub fn decode(message: impl Into<String>) -> Self {
        Self::Decode(message.into())
    }

    pub fn encode(message: impl Into<String>) -> Self {
        Self::Encode(message.into())
    }

    pub fn model_not_found(path: impl Into<String>) -> Self {
        Self::ModelNotFound(path.into())
    }

    pub fn inference(model: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Inference {
            model: model.into(),
            message: message.into(),
        }
    }

    pub fn invalid_output(model: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidOutput {
            model: model.into(),
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Capture-side failures the ingestor retries after a delay.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            VisionError::SourceUnavailable { .. } | VisionError::ReadTimeout(_) | VisionError::Io(_)
        )
    }
}
