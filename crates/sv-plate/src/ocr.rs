//! OCR engine contract and the Tesseract CLI binding.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use image::GrayImage;
use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tracing::debug;

use crate::error::{PlateError, PlateResult};

const DIGITS: &str = "0123456789";

/// One OCR pass configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OcrProfile {
    /// Tesseract page segmentation mode
    pub psm: u8,
    /// Language/script hint (`ara`, `ara+eng`, ...)
    pub lang: Option<String>,
    pub whitelist: Option<String>,
}

impl OcrProfile {
    pub fn new(psm: u8) -> Self {
        Self {
            psm,
            lang: None,
            whitelist: None,
        }
    }

    pub fn with_lang(mut self, lang: impl Into<String>) -> Self {
        self.lang = Some(lang.into());
        self
    }

    pub fn with_whitelist(mut self, whitelist: impl Into<String>) -> Self {
        self.whitelist = Some(whitelist.into());
        self
    }

    /// Profiles run against every variant of a crop.
    pub fn defaults() -> Vec<Self> {
        vec![
            Self::new(8).with_whitelist(DIGITS),
            Self::new(7).with_whitelist(DIGITS),
            Self::new(6).with_lang("ara"),
            Self::new(8).with_lang("ara"),
            Self::new(7).with_lang("ara"),
            Self::new(6).with_lang("ara+eng"),
            Self::new(8),
        ]
    }

    /// Command-line arguments after the input and output base.
    pub fn args(&self) -> Vec<String> {
        let mut args = vec!["--psm".to_string(), self.psm.to_string()];
        if let Some(lang) = &self.lang {
            args.extend(["-l".to_string(), lang.clone()]);
        }
        if let Some(whitelist) = &self.whitelist {
            args.extend([
                "-c".to_string(),
                format!("tessedit_char_whitelist={}", whitelist),
            ]);
        }
        args
    }
}

/// Recognizes text in a grayscale image.
#[async_trait]
pub trait OcrEngine: Send + Sync {
    async fn recognize(&self, image: &GrayImage, profile: &OcrProfile) -> PlateResult<String>;
}

/// Runs the `tesseract` binary once per call.
#[derive(Debug, Clone)]
pub struct TesseractEngine {
    binary: PathBuf,
    timeout: Duration,
}

impl TesseractEngine {
    /// Locate `tesseract` in PATH.
    pub fn new(timeout: Duration) -> PlateResult<Self> {
        let binary = which::which("tesseract").map_err(|_| PlateError::TesseractNotFound)?;
        Ok(Self { binary, timeout })
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

#[async_trait]
impl OcrEngine for TesseractEngine {
    async fn recognize(&self, image: &GrayImage, profile: &OcrProfile) -> PlateResult<String> {
        let file = tempfile::Builder::new()
            .prefix("plate-")
            .suffix(".png")
            .tempfile()?;
        image.save_with_format(file.path(), image::ImageFormat::Png)?;

        let mut cmd = Command::new(&self.binary);
        cmd.arg(file.path())
            .arg("stdout")
            .args(profile.args())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = tokio::time::timeout(self.timeout, cmd.output())
            .await
            .map_err(|_| PlateError::OcrTimeout(self.timeout))??;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(PlateError::ocr_failed(format!(
                "tesseract exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }

        let text = String::from_utf8_lossy(&output.stdout).trim().to_string();
        debug!(psm = profile.psm, lang = ?profile.lang, text = %text, "OCR pass");
        Ok(text)
    }
}
