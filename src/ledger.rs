//! The immutable event ledger: one appended row per inference call.

use std::sync::Arc;

use chrono::Utc;
use log::debug;
use uuid::Uuid;

use crate::classify;
use crate::error::{CoreError, CoreResult};
use crate::models::{Component, Detection, EventRow, PredictionSummary};
use crate::store::DurableStore;

pub struct PredictionLedger {
    store: Arc<DurableStore>,
}

impl PredictionLedger {
    pub fn new(store: Arc<DurableStore>) -> Self {
        Self { store }
    }

    /// Classifies one batch of detections and durably appends the event.
    ///
    /// Confidence values arrive trusted from the producer and are not
    /// re-validated. On an I/O failure nothing partial is visible and the
    /// caller decides whether to retry or drop the event.
    pub fn record(
        &self,
        component: Component,
        detections: &[Detection],
        session_id: &str,
        roller_type: &str,
        employee_id: &str,
    ) -> CoreResult<PredictionSummary> {
        if session_id.is_empty() {
            return Err(CoreError::Validation("empty session id".to_string()));
        }

        let defect_counts = classify::tally(component, detections);
        let status = classify::classify(&defect_counts);
        let confidence = classify::confidence_stats(detections);
        let raw_detections = serde_json::to_string(detections)?;

        let row = EventRow {
            prediction_id: Uuid::new_v4().to_string(),
            session_id: session_id.to_string(),
            timestamp: Utc::now(),
            roller_type: roller_type.to_string(),
            employee_id: employee_id.to_string(),
            status,
            total_detections: detections.len() as u64,
            defect_counts: defect_counts.clone(),
            avg_confidence: confidence.avg,
            max_confidence: confidence.max,
            min_confidence: confidence.min,
            raw_detections,
        };

        self.store.append_event(component, &row)?;
        debug!(
            "recorded {} prediction {} for session {session_id}: {}",
            component,
            row.prediction_id,
            status.as_str()
        );

        Ok(PredictionSummary {
            prediction_id: row.prediction_id,
            status,
            defect_counts,
            total_detections: row.total_detections,
            confidence,
        })
    }
}
