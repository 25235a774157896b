//! Plate text reconstruction and scoring.

use std::collections::HashSet;
use std::sync::OnceLock;

use regex::Regex;

use crate::format::PlateFormat;

const BASE_SCORE: u32 = 40;
const GROUP_LENGTH_BONUS: u32 = 15;
const DISTINCT_DIGIT_BONUS: u32 = 2;
const DISTINCT_DIGIT_CAP: u32 = 10;
const COMBINED_LENGTH_BONUS: u32 = 10;

/// A plate reading reconstructed from one raw OCR text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reconstruction {
    pub left: String,
    pub right: String,
    /// `"{left} {marker} {right}"`
    pub plate: String,
    pub marker_detected: bool,
    pub score: u32,
}

fn digit_runs() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[0-9]+").expect("valid digit regex"))
}

fn is_arabic_letter(c: char) -> bool {
    matches!(c, '\u{0600}'..='\u{06FF}' | '\u{0750}'..='\u{077F}')
        && !matches!(c, '\u{0660}'..='\u{0669}' | '\u{06F0}'..='\u{06F9}')
}

/// Map Arabic-Indic digits to ASCII and drop everything except ASCII digits,
/// Arabic letters and whitespace.
pub fn normalize(text: &str) -> String {
    text.chars()
        .filter_map(|c| match c {
            '\u{0660}'..='\u{0669}' => char::from_digit(c as u32 - 0x0660, 10),
            '\u{06F0}'..='\u{06F9}' => char::from_digit(c as u32 - 0x06F0, 10),
            c if c.is_ascii_digit() || c.is_whitespace() || is_arabic_letter(c) => Some(c),
            _ => Some(' '),
        })
        .collect()
}

/// Digit runs after noise filtering and repair.
pub fn repaired_runs(normalized: &str, format: &PlateFormat) -> Vec<String> {
    digit_runs()
        .find_iter(normalized)
        .map(|m| m.as_str())
        .filter(|run| run.len() >= format.min_run_length)
        .flat_map(|run| {
            format
                .repair_rules
                .iter()
                .find_map(|rule| rule.apply(run))
                .unwrap_or_else(|| vec![run.to_string()])
        })
        .collect()
}

/// Score a left/right pair. `None` when either group is empty or too long.
pub fn score_groups(left: &str, right: &str, format: &PlateFormat) -> Option<u32> {
    if left.is_empty()
        || right.is_empty()
        || left.len() > format.max_group_length
        || right.len() > format.max_group_length
    {
        return None;
    }

    let mut score = BASE_SCORE;
    for group in [left, right] {
        if (2..=3).contains(&group.len()) {
            score += GROUP_LENGTH_BONUS;
        }
    }

    let distinct: HashSet<char> = left.chars().chain(right.chars()).collect();
    score += (distinct.len() as u32 * DISTINCT_DIGIT_BONUS).min(DISTINCT_DIGIT_CAP);

    if (4..=6).contains(&(left.len() + right.len())) {
        score += COMBINED_LENGTH_BONUS;
    }

    Some(score)
}

/// Reconstruct a plate from one raw OCR text.
pub fn reconstruct(raw: &str, format: &PlateFormat) -> Option<Reconstruction> {
    let normalized = normalize(raw);
    let runs = repaired_runs(&normalized, format);
    if runs.len() < 2 {
        return None;
    }

    let left = runs.first()?.clone();
    let right = runs.last()?.clone();
    let score = score_groups(&left, &right, format)?;

    let marker_detected = normalized.contains(format.marker.as_str())
        || format
            .partial_markers
            .iter()
            .any(|p| !p.is_empty() && normalized.contains(p.as_str()));

    Some(Reconstruction {
        plate: format!("{} {} {}", left, format.marker, right),
        left,
        right,
        marker_detected,
        score,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean_plate_reading() {
        let format = PlateFormat::default();
        let r = reconstruct("179 تونس 911", &format).unwrap();

        assert_eq!(r.plate, "179 تونس 911");
        assert!(r.marker_detected);
        // 40 + 15 + 15 + 3 distinct * 2 + 10
        assert_eq!(r.score, 86);
        assert!(r.score >= format.acceptance_threshold);
    }

    #[test]
    fn test_stray_digit_is_trimmed() {
        let format = PlateFormat::default();
        assert_eq!(repaired_runs("1799 911", &format), vec!["179", "911"]);

        let r = reconstruct("1799 911", &format).unwrap();
        assert_eq!(r.plate, "179 تونس 911");
        assert!(!r.marker_detected);
    }

    #[test]
    fn test_merged_groups_are_split() {
        let format = PlateFormat::default();
        assert_eq!(reconstruct("1799911", &format).unwrap().plate, "179 تونس 911");
        assert_eq!(reconstruct("045332", &format).unwrap().plate, "045 تونس 332");
    }

    #[test]
    fn test_arabic_indic_digits_and_partial_marker() {
        let format = PlateFormat::default();
        let r = reconstruct("١٢٣ ونس ٤٥٦٧", &format).unwrap();
        assert_eq!(r.plate, "123 تونس 4567");
        assert!(r.marker_detected);
    }

    #[test]
    fn test_noise_is_stripped() {
        let format = PlateFormat::default();
        let r = reconstruct("|(204) تونس [7342].", &format).unwrap();
        assert_eq!((r.left.as_str(), r.right.as_str()), ("204", "7342"));
    }

    #[test]
    fn test_single_run_is_rejected() {
        let format = PlateFormat::default();
        assert!(reconstruct("تونس 1234", &format).is_none());
        assert!(reconstruct("", &format).is_none());
    }

    #[test]
    fn test_overlong_group_is_rejected() {
        let format = PlateFormat::default();
        assert!(reconstruct("12 تونس 12345678", &format).is_none());
    }

    #[test]
    fn test_scoring_rules() {
        let format = PlateFormat::default();
        // Both groups short: 40 + 30 + distinct(0,4,5,3,2)=10 + 10
        assert_eq!(score_groups("045", "332", &format), Some(90));
        // Long right group: 40 + 15 + distinct capped at 10 + 10
        assert_eq!(score_groups("12", "3456", &format), Some(75));
        // Single repeated digit: 40 + 15 + 15 + 2 + 10
        assert_eq!(score_groups("11", "111", &format), Some(82));
        assert_eq!(score_groups("", "111", &format), None);
    }
}
