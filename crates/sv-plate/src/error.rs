//! Plate extraction error types.

use std::time::Duration;
use thiserror::Error;

pub type PlateResult<T> = Result<T, PlateError>;

#[derive(Debug, Error)]
pub enum PlateError {
    #[error("tesseract not found in PATH")]
    TesseractNotFound,

    #[error("OCR failed: {0}")]
    OcrFailed(String),

    #[error("OCR timed out after {0:?}")]
    OcrTimeout(Duration),

    #[error("Crop decode failed: {0}")]
    Decode(String),

    #[error("Invalid plate format: {0}")]
    InvalidFormat(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("Task join error: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl PlateError {
    pub fn ocr_failed(message: impl Into<String>) -> Self {
        Self::OcrFailed(message.into())
    }

    pub fn decode(message: impl Into<String>) -> Self {
        Self::Decode(message.into())
    }

    pub fn invalid_format(message: impl Into<String>) -> Self {
        Self::InvalidFormat(message.into())
    }
}
