//! Orchestrator run summary.

use serde::{Deserialize, Serialize};

use crate::camera::CameraId;

/// Terminal status of a detection run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Completed,
}

/// Why a detection run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// Reached the configured iteration count
    IterationLimit,
    /// Too many consecutive undecodable frames
    DecodeFailures,
    /// Shutdown requested
    Shutdown,
    /// Lease lost to another worker
    LeaseLost,
}

impl StopReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            StopReason::IterationLimit => "iteration_limit",
            StopReason::DecodeFailures => "decode_failures",
            StopReason::Shutdown => "shutdown",
            StopReason::LeaseLost => "lease_lost",
        }
    }
}

/// Result of `Orchestrator::run`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub camera_id: CameraId,
    pub iterations_completed: u64,
    pub status: RunStatus,
    pub stop_reason: StopReason,
}

impl RunSummary {
    pub fn completed(camera_id: CameraId, iterations_completed: u64, stop_reason: StopReason) -> Self {
        Self {
            camera_id,
            iterations_completed,
            status: RunStatus::Completed,
            stop_reason,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summary_serialization() {
        let summary = RunSummary::completed(CameraId(3), 11, StopReason::DecodeFailures);
        let json = serde_json::to_value(&summary).unwrap();
        assert_eq!(json["camera_id"], 3);
        assert_eq!(json["iterations_completed"], 11);
        assert_eq!(json["status"], "completed");
        assert_eq!(json["stop_reason"], "decode_failures");
    }
}
