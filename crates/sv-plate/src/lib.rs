//! License plate extraction.
//!
//! This crate provides:
//! - The OCR engine contract and a Tesseract CLI binding
//! - Crop preprocessing (upscale, threshold variants, corruption repair)
//! - Plate text reconstruction and scoring driven by a configurable format
//! - `PlateExtractor`, which turns a crop into a scored `PlateCandidate`

pub mod corruption;
pub mod error;
pub mod extractor;
pub mod format;
pub mod ocr;
pub mod preprocess;
pub mod reconstruct;

pub use error::{PlateError, PlateResult};
pub use extractor::{PlateExtractor, PlateReader};
pub use format::{PlateFormat, RepairRule};
pub use ocr::{OcrEngine, OcrProfile, TesseractEngine};
pub use reconstruct::{reconstruct, score_groups, Reconstruction};
