//! Plate extraction types.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier returned by the persistence gateway for a recorded detection.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DetectionId(pub String);

impl DetectionId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for DetectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for DetectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A reconstructed, scored plate reading.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlateCandidate {
    /// Raw OCR outputs that produced this reading
    pub raw_texts: Vec<String>,
    /// Left numeric group
    pub left: String,
    /// Country-script marker token
    pub marker: String,
    /// Right numeric group
    pub right: String,
    /// Canonical plate string: "{left} {marker} {right}"
    pub plate: String,
    /// Heuristic score (0-100)
    pub score: u32,
    /// Whether the marker (or a fragment of it) was actually read
    pub marker_detected: bool,
    /// Whether the source crop was flagged as compression-corrupted
    pub corrupted: bool,
}

/// Plate extraction result reported for each crop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlateExtractionResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub license_plate: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence_score: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_authorized: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detection_id: Option<DetectionId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl PlateExtractionResult {
    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            license_plate: None,
            confidence_score: None,
            is_authorized: None,
            detection_id: None,
            error: Some(error.into()),
        }
    }

    pub fn accepted(
        candidate: &PlateCandidate,
        is_authorized: bool,
        detection_id: Option<DetectionId>,
    ) -> Self {
        Self {
            success: true,
            license_plate: Some(candidate.plate.clone()),
            confidence_score: Some(candidate.score as f32),
            is_authorized: Some(is_authorized),
            detection_id,
            error: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_result_omits_empty_fields() {
        let json = serde_json::to_value(PlateExtractionResult::failure("no_plate")).unwrap();
        assert_eq!(json["success"], false);
        assert_eq!(json["error"], "no_plate");
        assert!(json.get("license_plate").is_none());
    }

    #[test]
    fn test_accepted_result() {
        let candidate = PlateCandidate {
            raw_texts: vec!["045 332".to_string()],
            left: "045".to_string(),
            marker: "تونس".to_string(),
            right: "332".to_string(),
            plate: "045 تونس 332".to_string(),
            score: 78,
            marker_detected: false,
            corrupted: false,
        };
        let result =
            PlateExtractionResult::accepted(&candidate, false, Some(DetectionId::from_string("d-1")));
        assert!(result.success);
        assert_eq!(result.license_plate.as_deref(), Some("045 تونس 332"));
        assert_eq!(result.confidence_score, Some(78.0));
        assert_eq!(result.is_authorized, Some(false));
    }
}
