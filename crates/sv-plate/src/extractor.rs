//! Crop → `PlateCandidate`.

use std::sync::Arc;

use async_trait::async_trait;
use futures_util::stream::{self, StreamExt};
use image::RgbImage;
use sv_models::PlateCandidate;
use tracing::{debug, warn};

use crate::error::{PlateError, PlateResult};
use crate::format::PlateFormat;
use crate::ocr::{OcrEngine, OcrProfile};
use crate::preprocess;
use crate::reconstruct::{reconstruct, Reconstruction};

/// Reads a plate from an encoded crop.
#[async_trait]
pub trait PlateReader: Send + Sync {
    /// `Ok(None)` when no reading reaches the acceptance threshold.
    async fn read_plate(&self, jpeg: &[u8]) -> PlateResult<Option<PlateCandidate>>;
}

/// Runs every OCR profile over every preprocessed variant and keeps the
/// best-scoring reconstruction.
#[derive(Clone)]
pub struct PlateExtractor {
    engine: Arc<dyn OcrEngine>,
    format: PlateFormat,
    profiles: Vec<OcrProfile>,
    concurrency: usize,
}

impl PlateExtractor {
    pub fn new(engine: Arc<dyn OcrEngine>, format: PlateFormat) -> Self {
        Self {
            engine,
            format,
            profiles: OcrProfile::defaults(),
            concurrency: 4,
        }
    }

    pub fn with_profiles(mut self, profiles: Vec<OcrProfile>) -> Self {
        self.profiles = profiles;
        self
    }

    /// Maximum OCR calls in flight for one crop.
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn format(&self) -> &PlateFormat {
        &self.format
    }

    pub async fn extract(&self, crop: &RgbImage) -> PlateResult<Option<PlateCandidate>> {
        let crop = crop.clone();
        let prepared = tokio::task::spawn_blocking(move || preprocess::prepare(&crop)).await?;

        let jobs: Vec<_> = prepared
            .variants
            .iter()
            .flat_map(|(name, image)| self.profiles.iter().map(move |p| (*name, image, p)))
            .collect();

        let texts: Vec<String> = stream::iter(jobs)
            .map(|(variant, image, profile)| async move {
                match self.engine.recognize(image, profile).await {
                    Ok(text) => Some(text),
                    Err(e) => {
                        debug!(variant, psm = profile.psm, "OCR pass failed: {}", e);
                        None
                    }
                }
            })
            .buffered(self.concurrency)
            .boxed()
            .filter_map(|text| async move { text.filter(|t| !t.trim().is_empty()) })
            .collect()
            .await;

        Ok(self.select(texts, prepared.corrupted))
    }

    /// Pick the best reconstruction across raw texts. Ties keep the earliest.
    fn select(&self, texts: Vec<String>, corrupted: bool) -> Option<PlateCandidate> {
        let mut best: Option<Reconstruction> = None;
        for text in &texts {
            if let Some(r) = reconstruct(text, &self.format) {
                if best.as_ref().map_or(true, |b| r.score > b.score) {
                    best = Some(r);
                }
            }
        }

        let best = best?;
        let threshold = self.format.threshold(corrupted);
        if best.score < threshold {
            debug!(
                plate = %best.plate,
                score = best.score,
                threshold,
                "Best plate reading below threshold"
            );
            return None;
        }

        let raw_texts = texts
            .into_iter()
            .filter(|t| reconstruct(t, &self.format).is_some_and(|r| r.plate == best.plate))
            .collect();

        Some(PlateCandidate {
            raw_texts,
            left: best.left,
            marker: self.format.marker.clone(),
            right: best.right,
            plate: best.plate,
            score: best.score,
            marker_detected: best.marker_detected,
            corrupted,
        })
    }
}

#[async_trait]
impl PlateReader for PlateExtractor {
    async fn read_plate(&self, jpeg: &[u8]) -> PlateResult<Option<PlateCandidate>> {
        let crop = image::load_from_memory(jpeg)
            .map_err(|e| PlateError::decode(e.to_string()))?
            .to_rgb8();
        if crop.width() == 0 || crop.height() == 0 {
            warn!("Empty plate crop");
            return Ok(None);
        }
        self.extract(&crop).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GrayImage, Rgb};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Answers by profile: digit-whitelist passes, Arabic passes, the rest.
    struct ScriptedOcr {
        /// `None` fails the pass
        digits: Option<&'static str>,
        arabic: &'static str,
        other: &'static str,
        calls: AtomicUsize,
    }

    impl ScriptedOcr {
        fn uniform(text: &'static str) -> Self {
            Self {
                digits: Some(text),
                arabic: text,
                other: text,
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl OcrEngine for ScriptedOcr {
        async fn recognize(&self, _image: &GrayImage, profile: &OcrProfile) -> PlateResult<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if profile.whitelist.is_some() {
                return self
                    .digits
                    .map(str::to_string)
                    .ok_or_else(|| PlateError::ocr_failed("scripted"));
            }
            if profile.lang.is_some() {
                return Ok(self.arabic.to_string());
            }
            Ok(self.other.to_string())
        }
    }

    fn crop() -> RgbImage {
        RgbImage::from_fn(120, 40, |x, y| {
            let v = ((x * 7 + y * 13) % 200 + 20) as u8;
            Rgb([v, v, v])
        })
    }

    fn extractor(engine: ScriptedOcr) -> (PlateExtractor, Arc<ScriptedOcr>) {
        let engine = Arc::new(engine);
        (
            PlateExtractor::new(engine.clone(), PlateFormat::default()),
            engine,
        )
    }

    #[tokio::test]
    async fn test_every_variant_and_profile_runs() {
        let (extractor, engine) = extractor(ScriptedOcr::uniform("045 تونس 332"));
        let candidate = extractor.extract(&crop()).await.unwrap().unwrap();

        assert_eq!(engine.calls.load(Ordering::SeqCst), 6 * 7);
        assert_eq!(candidate.plate, "045 تونس 332");
        assert_eq!(candidate.score, 90);
        assert!(candidate.marker_detected);
        assert_eq!(candidate.raw_texts.len(), 42);
    }

    #[tokio::test]
    async fn test_best_score_wins() {
        let (extractor, _) = extractor(ScriptedOcr {
            digits: Some("12 3456"),
            arabic: "045 تونس 332",
            other: "",
            calls: AtomicUsize::new(0),
        });
        let candidate = extractor.extract(&crop()).await.unwrap().unwrap();

        assert_eq!(candidate.plate, "045 تونس 332");
        assert_eq!((candidate.left.as_str(), candidate.right.as_str()), ("045", "332"));
        assert!(candidate.raw_texts.iter().all(|t| t == "045 تونس 332"));
    }

    #[tokio::test]
    async fn test_failed_passes_contribute_nothing() {
        let (extractor, _) = extractor(ScriptedOcr {
            digits: None,
            arabic: "",
            other: "1799 911",
            calls: AtomicUsize::new(0),
        });
        let candidate = extractor.extract(&crop()).await.unwrap().unwrap();
        assert_eq!(candidate.plate, "179 تونس 911");
        assert!(!candidate.marker_detected);
    }

    #[tokio::test]
    async fn test_low_score_is_rejected() {
        // 40 + one distinct digit, no length bonuses
        let (extractor, _) = extractor(ScriptedOcr::uniform("1111 1111"));
        assert!(extractor.extract(&crop()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_no_text_is_inconclusive() {
        let (extractor, _) = extractor(ScriptedOcr::uniform("   "));
        assert!(extractor.extract(&crop()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_read_plate_rejects_garbage_bytes() {
        let (extractor, _) = extractor(ScriptedOcr::uniform("045 تونس 332"));
        let err = extractor.read_plate(b"not a jpeg").await.unwrap_err();
        assert!(matches!(err, PlateError::Decode(_)));
    }
}
