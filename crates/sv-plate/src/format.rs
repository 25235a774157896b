//! Plate format: marker token, repair rules and acceptance thresholds.
//!
//! The defaults describe the two-group plate with an Arabic country marker
//! (`NNN تونس NNNN`) and the digit-run repairs observed on those plates.
//! Everything here can be overridden from a JSON file.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{PlateError, PlateResult};

/// Repair applied to a digit run of an exact length.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RepairRule {
    /// Split into two equal halves (`179911` → `179`, `911`).
    SplitHalves { length: usize },

    /// Split a run that carries a known anchor plus one stray digit
    /// (`1799911` → `179`, `911`).
    SplitAnchored {
        length: usize,
        prefixes: Vec<String>,
        suffixes: Vec<String>,
    },

    /// Trim a run with one stray digit down to a known anchor
    /// (`1799` → `179`, `2911` → `911`).
    TrimToAnchor {
        length: usize,
        prefixes: Vec<String>,
        suffixes: Vec<String>,
    },
}

impl RepairRule {
    /// Apply to `run`. `None` when the rule does not match.
    pub fn apply(&self, run: &str) -> Option<Vec<String>> {
        match self {
            RepairRule::SplitHalves { length } => {
                if run.len() != *length || length % 2 != 0 {
                    return None;
                }
                let (left, right) = run.split_at(length / 2);
                Some(vec![left.to_string(), right.to_string()])
            }
            RepairRule::SplitAnchored {
                length,
                prefixes,
                suffixes,
            } => {
                if run.len() != *length {
                    return None;
                }
                if let Some(p) = prefixes.iter().find(|p| run.starts_with(p.as_str())) {
                    let tail = &run[run.len().saturating_sub(p.len())..];
                    return Some(vec![p.clone(), tail.to_string()]);
                }
                suffixes
                    .iter()
                    .find(|s| run.ends_with(s.as_str()))
                    .map(|s| vec![run[..s.len().min(run.len())].to_string(), s.clone()])
            }
            RepairRule::TrimToAnchor {
                length,
                prefixes,
                suffixes,
            } => {
                if run.len() != *length {
                    return None;
                }
                prefixes
                    .iter()
                    .find(|p| run.starts_with(p.as_str()))
                    .or_else(|| suffixes.iter().find(|s| run.ends_with(s.as_str())))
                    .map(|anchor| vec![anchor.clone()])
            }
        }
    }
}

/// Plate format configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlateFormat {
    /// Country-script marker placed between the two groups
    pub marker: String,
    /// Fragments that count as having read the marker
    pub partial_markers: Vec<String>,
    /// Digit runs shorter than this are OCR noise
    pub min_run_length: usize,
    /// Groups longer than this reject the reading
    pub max_group_length: usize,
    /// Applied in order; first match wins
    pub repair_rules: Vec<RepairRule>,
    pub acceptance_threshold: u32,
    /// Threshold used when the crop was flagged as corrupted
    pub corrupted_threshold: u32,
}

impl Default for PlateFormat {
    fn default() -> Self {
        let prefixes = vec!["179".to_string()];
        let suffixes = vec!["911".to_string()];
        Self {
            marker: "تونس".to_string(),
            partial_markers: vec!["تون".to_string(), "ونس".to_string()],
            min_run_length: 2,
            max_group_length: 5,
            repair_rules: vec![
                RepairRule::TrimToAnchor {
                    length: 4,
                    prefixes: prefixes.clone(),
                    suffixes: suffixes.clone(),
                },
                RepairRule::SplitAnchored {
                    length: 7,
                    prefixes,
                    suffixes,
                },
                RepairRule::SplitHalves { length: 6 },
            ],
            acceptance_threshold: 60,
            corrupted_threshold: 45,
        }
    }
}

impl PlateFormat {
    /// Load from a JSON file; missing fields take their defaults.
    pub fn from_file(path: &Path) -> PlateResult<Self> {
        let text = std::fs::read_to_string(path)?;
        let format: Self = serde_json::from_str(&text)?;
        format.validate()?;
        Ok(format)
    }

    pub fn validate(&self) -> PlateResult<()> {
        if self.marker.trim().is_empty() {
            return Err(PlateError::invalid_format("marker must not be empty"));
        }
        if self.max_group_length == 0 {
            return Err(PlateError::invalid_format("max_group_length must be positive"));
        }
        Ok(())
    }

    /// Acceptance threshold for a crop.
    pub fn threshold(&self, corrupted: bool) -> u32 {
        if corrupted {
            self.corrupted_threshold
        } else {
            self.acceptance_threshold
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_rules() {
        let format = PlateFormat::default();
        let apply = |run: &str| {
            format
                .repair_rules
                .iter()
                .find_map(|r| r.apply(run))
                .unwrap_or_else(|| vec![run.to_string()])
        };

        assert_eq!(apply("1799"), vec!["179"]);
        assert_eq!(apply("2911"), vec!["911"]);
        assert_eq!(apply("1799911"), vec!["179", "911"]);
        assert_eq!(apply("2345911"), vec!["234", "911"]);
        assert_eq!(apply("123456"), vec!["123", "456"]);
        assert_eq!(apply("1234"), vec!["1234"]);
    }

    #[test]
    fn test_threshold_for_corrupted_crop() {
        let format = PlateFormat::default();
        assert_eq!(format.threshold(false), 60);
        assert_eq!(format.threshold(true), 45);
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"acceptance_threshold": 70, "repair_rules": [{{"kind": "split_halves", "length": 8}}]}}"#
        )
        .unwrap();

        let format = PlateFormat::from_file(file.path()).unwrap();
        assert_eq!(format.acceptance_threshold, 70);
        assert_eq!(format.marker, "تونس");
        assert_eq!(format.repair_rules, vec![RepairRule::SplitHalves { length: 8 }]);
    }

    #[test]
    fn test_empty_marker_rejected() {
        let format = PlateFormat {
            marker: " ".to_string(),
            ..Default::default()
        };
        assert!(format.validate().is_err());
    }
}
