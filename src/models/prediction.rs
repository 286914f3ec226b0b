use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One classified region from the vision model. Transient input; only the
/// ledger and aggregator consume these, they are never stored standalone.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Detection {
    pub class_name: String,
    pub confidence: f64,
}

impl Detection {
    pub fn new(class_name: impl Into<String>, confidence: f64) -> Self {
        Self {
            class_name: class_name.into(),
            confidence,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PredictionStatus {
    Accepted,
    Rejected,
}

impl PredictionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PredictionStatus::Accepted => "ACCEPTED",
            PredictionStatus::Rejected => "REJECTED",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "ACCEPTED" => Some(PredictionStatus::Accepted),
            "REJECTED" => Some(PredictionStatus::Rejected),
            _ => None,
        }
    }
}

/// Confidence statistics over every detection in a batch, accepted or not.
/// An empty batch reports 0.0 across the board.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfidenceStats {
    pub avg: f64,
    pub max: f64,
    pub min: f64,
}

impl ConfidenceStats {
    pub const ZERO: ConfidenceStats = ConfidenceStats {
        avg: 0.0,
        max: 0.0,
        min: 0.0,
    };
}

/// Immutable ledger row, one per `record` call. Created once, never mutated,
/// deleted only by a successful flush.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventRow {
    pub prediction_id: String,
    pub session_id: String,
    pub timestamp: DateTime<Utc>,
    pub roller_type: String,
    pub employee_id: String,
    pub status: PredictionStatus,
    pub total_detections: u64,
    /// Nonzero tallies only, keyed by the component vocabulary.
    pub defect_counts: BTreeMap<String, u64>,
    pub avg_confidence: f64,
    pub max_confidence: f64,
    pub min_confidence: f64,
    /// JSON array of the raw detections, kept verbatim for audit.
    pub raw_detections: String,
}

/// What `record` hands back to the producer for display.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PredictionSummary {
    pub prediction_id: String,
    pub status: PredictionStatus,
    pub defect_counts: BTreeMap<String, u64>,
    pub total_detections: u64,
    pub confidence: ConfidenceStats,
}
