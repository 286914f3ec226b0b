//! Accept/reject classification shared by the ledger and the aggregator.
//!
//! Both call sites run this independently on the same detection batch; the
//! aggregator must not assume the ledger has already recorded the event.

use std::collections::BTreeMap;

use crate::models::{Component, ConfidenceStats, Detection, PredictionStatus};

/// Lowercase, spaces to underscores. The vision model's class labels are
/// hand-entered during training and arrive with inconsistent casing.
pub fn normalize_class(raw: &str) -> String {
    raw.trim().to_lowercase().replace(' ', "_")
}

/// Tally detections against the component's vocabulary. Unrecognized class
/// names are dropped from the tally; callers still count them in
/// `total_detections`.
pub fn tally(component: Component, detections: &[Detection]) -> BTreeMap<String, u64> {
    let vocabulary = component.defect_classes();
    let mut counts = BTreeMap::new();

    for detection in detections {
        let class = normalize_class(&detection.class_name);
        if vocabulary.contains(&class.as_str()) {
            *counts.entry(class).or_insert(0) += 1;
        }
    }

    counts
}

/// A part is accepted iff the model saw the roller itself and nothing else:
/// no non-roller tallies and at least one `roller` detection. Zero
/// detections therefore reject.
pub fn classify(defect_counts: &BTreeMap<String, u64>) -> PredictionStatus {
    let roller = defect_counts.get("roller").copied().unwrap_or(0);
    let non_roller: u64 = defect_counts
        .iter()
        .filter(|(class, _)| class.as_str() != "roller")
        .map(|(_, count)| *count)
        .sum();

    if non_roller == 0 && roller >= 1 {
        PredictionStatus::Accepted
    } else {
        PredictionStatus::Rejected
    }
}

/// Confidence statistics over the whole batch, rejected detections included.
pub fn confidence_stats(detections: &[Detection]) -> ConfidenceStats {
    if detections.is_empty() {
        return ConfidenceStats::ZERO;
    }

    let mut sum = 0.0;
    let mut max = f64::MIN;
    let mut min = f64::MAX;
    for detection in detections {
        sum += detection.confidence;
        max = max.max(detection.confidence);
        min = min.min(detection.confidence);
    }

    ConfidenceStats {
        avg: sum / detections.len() as f64,
        max,
        min,
    }
}
