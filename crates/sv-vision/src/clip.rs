//! Phrase ranking with a CLIP image encoder.
//!
//! The text side is precomputed: a JSON file holds each candidate phrase with
//! its text embedding. At runtime only the image encoder runs, and phrases
//! are ranked by softmax over scaled cosine similarity.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use image::RgbImage;
use ort::session::Session;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::codec::resize_frame;
use crate::error::{VisionError, VisionResult};
use crate::onnx::{create_session, nchw_tensor, run_single_output};

const CLIP_MEAN: [f32; 3] = [0.481_454_66, 0.457_827_5, 0.408_210_73];
const CLIP_STD: [f32; 3] = [0.268_629_54, 0.261_302_6, 0.275_777_1];

/// Temperature applied to cosine similarity before softmax.
const LOGIT_SCALE: f32 = 100.0;

/// Default candidate phrases for fire context.
pub const FIRE_PHRASES: [&str; 6] = [
    "A photo showing fire",
    "Smoke and fire are visible",
    "Flames and smoke in the image",
    "A photo of burning fire",
    "No fire in the image",
    "No flames or smoke",
];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhraseEmbedding {
    pub phrase: String,
    pub embedding: Vec<f32>,
}

/// Configuration for the describer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClipConfig {
    /// Image encoder ONNX file
    pub model_path: PathBuf,
    /// JSON array of `{phrase, embedding}`
    pub phrases_path: PathBuf,
    pub input_size: u32,
    pub output_name: String,
}

impl ClipConfig {
    pub fn new(model_path: impl Into<PathBuf>, phrases_path: impl Into<PathBuf>) -> Self {
        Self {
            model_path: model_path.into(),
            phrases_path: phrases_path.into(),
            input_size: 224,
            output_name: "image_embeds".to_string(),
        }
    }
}

fn normalize(v: &[f32]) -> Vec<f32> {
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm == 0.0 {
        return v.to_vec();
    }
    v.iter().map(|x| x / norm).collect()
}

/// Rank phrases for an image embedding. Returns `(index, probability)` of the best.
pub fn rank_phrases(image_embedding: &[f32], phrases: &[PhraseEmbedding]) -> Option<(usize, f32)> {
    if phrases.is_empty() {
        return None;
    }

    let image = normalize(image_embedding);
    let logits: Vec<f32> = phrases
        .iter()
        .map(|p| {
            let text = normalize(&p.embedding);
            LOGIT_SCALE * image.iter().zip(&text).map(|(a, b)| a * b).sum::<f32>()
        })
        .collect();

    let max = logits.iter().copied().fold(f32::MIN, f32::max);
    let exps: Vec<f32> = logits.iter().map(|l| (l - max).exp()).collect();
    let total: f32 = exps.iter().sum();

    exps.iter()
        .enumerate()
        .max_by(|a, b| a.1.total_cmp(b.1))
        .map(|(i, e)| (i, e / total))
}

/// Scores candidate phrases against an image.
pub struct ClipDescriber {
    session: Mutex<Session>,
    phrases: Vec<PhraseEmbedding>,
    config: ClipConfig,
}

impl ClipDescriber {
    pub fn new(config: ClipConfig) -> VisionResult<Self> {
        let phrases = load_phrases(&config.phrases_path)?;
        let session = Mutex::new(create_session(Path::new(&config.model_path))?);
        info!(
            model_path = %config.model_path.display(),
            phrases = phrases.len(),
            "Phrase describer initialized"
        );
        Ok(Self {
            session,
            phrases,
            config,
        })
    }

    /// Best phrase with its confidence, formatted for alert context.
    pub fn describe(&self, image: &RgbImage) -> VisionResult<String> {
        let size = self.config.input_size;
        let input = resize_frame(image, size, size);
        let tensor = nchw_tensor(&input, CLIP_MEAN, CLIP_STD)?;
        let embedding = run_single_output(&self.session, "clip", tensor, &self.config.output_name)?;

        let (idx, confidence) = rank_phrases(&embedding, &self.phrases)
            .ok_or_else(|| VisionError::internal("No phrases configured"))?;

        Ok(format!("{} (confidence={:.2})", self.phrases[idx].phrase, confidence))
    }
}

fn load_phrases(path: &Path) -> VisionResult<Vec<PhraseEmbedding>> {
    let text = std::fs::read_to_string(path)?;
    let phrases: Vec<PhraseEmbedding> = serde_json::from_str(&text)?;
    if phrases.is_empty() {
        return Err(VisionError::internal(format!(
            "{} contains no phrases",
            path.display()
        )));
    }
    Ok(phrases)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn phrase(text: &str, embedding: Vec<f32>) -> PhraseEmbedding {
        PhraseEmbedding {
            phrase: text.to_string(),
            embedding,
        }
    }

    #[test]
    fn test_rank_picks_most_similar() {
        let phrases = vec![
            phrase(FIRE_PHRASES[0], vec![1.0, 0.0, 0.0]),
            phrase(FIRE_PHRASES[4], vec![0.0, 1.0, 0.0]),
        ];
        let (idx, p) = rank_phrases(&[0.9, 0.1, 0.0], &phrases).unwrap();
        assert_eq!(idx, 0);
        assert!(p > 0.99);
    }

    #[test]
    fn test_rank_empty() {
        assert!(rank_phrases(&[1.0], &[]).is_none());
    }

    #[test]
    fn test_load_phrases_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"[{{"phrase": "A photo showing fire", "embedding": [0.1, 0.2]}}]"#
        )
        .unwrap();

        let phrases = load_phrases(file.path()).unwrap();
        assert_eq!(phrases.len(), 1);
        assert_eq!(phrases[0].phrase, "A photo showing fire");
    }

    #[test]
    fn test_empty_phrase_file_is_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "[]").unwrap();
        assert!(load_phrases(file.path()).is_err());
    }
}
