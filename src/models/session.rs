use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::component::Component;

/// Lifecycle of a session row as the aggregator sees it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SessionState {
    Created,
    Open,
    Closed,
    Transferred,
}

/// Mutable per-session aggregate, one row per (session, component).
/// Every `update` routed to the session mutates this row in place via a
/// locked read-modify-rewrite of its table file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRow {
    pub session_id: String,
    pub start_of_session: DateTime<Utc>,
    pub end_of_session: Option<DateTime<Utc>>,
    pub total_inspected: u64,
    pub total_accepted: u64,
    pub total_rejected: u64,
    /// Cumulative counts keyed by the component vocabulary; every vocabulary
    /// class is present, zero-valued classes included.
    pub defect_totals: BTreeMap<String, u64>,
}

impl SessionRow {
    /// Fresh zero-valued row, stamped with the session start time.
    pub fn open(component: Component, session_id: &str, started_at: DateTime<Utc>) -> Self {
        let defect_totals = component
            .defect_classes()
            .iter()
            .map(|class| (class.to_string(), 0u64))
            .collect();

        Self {
            session_id: session_id.to_string(),
            start_of_session: started_at,
            end_of_session: None,
            total_inspected: 0,
            total_accepted: 0,
            total_rejected: 0,
            defect_totals,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.end_of_session.is_some()
    }
}

/// Aggregate statistics over every durable session row of one component.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComponentStats {
    pub sessions: u64,
    pub total_inspected: u64,
    pub total_accepted: u64,
    pub total_rejected: u64,
    /// accepted / inspected, 0.0 when nothing has been inspected.
    pub acceptance_rate: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Stats {
    pub od: ComponentStats,
    pub bf: ComponentStats,
}
