//! Per-session running totals, one mutable row per (session, component).
//!
//! The aggregator re-runs the same classification as the ledger on purpose:
//! both are invoked by the caller for each inference and neither may assume
//! the other has already run.

use std::sync::Arc;

use chrono::Utc;
use log::{info, warn};

use crate::classify;
use crate::error::{CoreError, CoreResult};
use crate::models::{
    Component, ComponentStats, Detection, PredictionStatus, SessionRow, SessionState, Stats,
};
use crate::store::{DurableStore, SessionsGuard};

pub struct SessionAggregator {
    store: Arc<DurableStore>,
}

impl SessionAggregator {
    pub fn new(store: Arc<DurableStore>) -> Self {
        Self { store }
    }

    /// Creates a fresh zero-valued row on both components, stamped with the
    /// current time, as one logical step: both session-file locks are held
    /// throughout and the OD write is rolled back if the BF write fails, so
    /// a session is never left half-started. Fails with an integrity error
    /// if a row with this id already exists on either component.
    pub fn start_session(&self, session_id: &str) -> CoreResult<()> {
        if session_id.is_empty() {
            return Err(CoreError::Validation("empty session id".to_string()));
        }

        let started_at = Utc::now();
        let guard = self.store.lock_sessions();

        let mut od_rows = guard.read_sessions(Component::Od)?;
        let mut bf_rows = guard.read_sessions(Component::Bf)?;

        // Validate both components before touching either file.
        for (component, rows) in [(Component::Od, &od_rows), (Component::Bf, &bf_rows)] {
            if let Some(row) = rows.iter().find(|row| row.session_id == session_id) {
                return Err(if row.is_closed() {
                    CoreError::Integrity(format!(
                        "session '{session_id}' already ran on {component} (ended {})",
                        row.end_of_session
                            .map(|dt| dt.to_rfc3339())
                            .unwrap_or_default()
                    ))
                } else {
                    CoreError::Integrity(format!(
                        "session '{session_id}' is already open on {component}"
                    ))
                });
            }
        }

        let od_original = od_rows.clone();
        od_rows.push(SessionRow::open(Component::Od, session_id, started_at));
        bf_rows.push(SessionRow::open(Component::Bf, session_id, started_at));

        commit_session_step(&guard, &od_rows, &od_original, &bf_rows)?;
        info!("session {session_id} started");
        Ok(())
    }

    /// Classifies the batch and applies a monotonic increment to the
    /// session's counters: `total_inspected`, exactly one of
    /// accepted/rejected, and each matching defect tally.
    pub fn update(
        &self,
        session_id: &str,
        component: Component,
        detections: &[Detection],
    ) -> CoreResult<SessionRow> {
        let defect_counts = classify::tally(component, detections);
        let status = classify::classify(&defect_counts);

        self.store
            .upsert_session_row(component, session_id, move |existing| {
                let mut row = existing.ok_or_else(|| {
                    CoreError::Integrity(format!(
                        "session '{session_id}' has no {component} row; was it started?"
                    ))
                })?;

                row.total_inspected += 1;
                match status {
                    PredictionStatus::Accepted => row.total_accepted += 1,
                    PredictionStatus::Rejected => row.total_rejected += 1,
                }
                for (class, count) in &defect_counts {
                    *row.defect_totals.entry(class.clone()).or_insert(0) += count;
                }
                Ok(row)
            })
    }

    /// Stamps `end_of_session` on both components' rows, under the same
    /// two-file lock and rollback discipline as `start_session`. Idempotent:
    /// a second call overwrites the timestamp rather than failing.
    pub fn end_session(&self, session_id: &str) -> CoreResult<()> {
        let ended_at = Utc::now();
        let guard = self.store.lock_sessions();

        let mut od_rows = guard.read_sessions(Component::Od)?;
        let mut bf_rows = guard.read_sessions(Component::Bf)?;

        // Locate the row on both components before writing either file.
        let mut positions = Vec::with_capacity(2);
        for (component, rows) in [(Component::Od, &od_rows), (Component::Bf, &bf_rows)] {
            let position = rows
                .iter()
                .position(|row| row.session_id == session_id)
                .ok_or_else(|| {
                    CoreError::Integrity(format!(
                        "session '{session_id}' has no {component} row to end"
                    ))
                })?;
            positions.push(position);
        }

        let od_original = od_rows.clone();
        od_rows[positions[0]].end_of_session = Some(ended_at);
        bf_rows[positions[1]].end_of_session = Some(ended_at);

        commit_session_step(&guard, &od_rows, &od_original, &bf_rows)?;
        info!("session {session_id} ended");
        Ok(())
    }

    /// Lifecycle of a session as the durable rows tell it, considering both
    /// components: the most-open component wins, so a lopsided pair (which
    /// should not occur, but could be hand-edited on disk) still reports
    /// live. A purged (flushed) id is indistinguishable from one never
    /// started, so ids with no durable row report `Created`.
    pub fn session_state(&self, session_id: &str) -> CoreResult<SessionState> {
        let guard = self.store.lock_sessions();
        let od = guard.read_session_row(Component::Od, session_id)?;
        let bf = guard.read_session_row(Component::Bf, session_id)?;

        let state_of = |row: &Option<SessionRow>| match row {
            Some(row) if row.is_closed() => SessionState::Closed,
            Some(_) => SessionState::Open,
            None => SessionState::Created,
        };

        Ok(match (state_of(&od), state_of(&bf)) {
            (SessionState::Open, _) | (_, SessionState::Open) => SessionState::Open,
            (SessionState::Closed, _) | (_, SessionState::Closed) => SessionState::Closed,
            _ => SessionState::Created,
        })
    }

    /// Consistent per-component snapshot over every durable session row,
    /// taken under the same locks as the upserts.
    pub fn stats(&self) -> CoreResult<Stats> {
        Ok(Stats {
            od: self.component_stats(Component::Od)?,
            bf: self.component_stats(Component::Bf)?,
        })
    }

    fn component_stats(&self, component: Component) -> CoreResult<ComponentStats> {
        let rows = self.store.read_sessions(component)?;

        let mut stats = ComponentStats {
            sessions: rows.len() as u64,
            total_inspected: 0,
            total_accepted: 0,
            total_rejected: 0,
            acceptance_rate: 0.0,
        };
        for row in &rows {
            stats.total_inspected += row.total_inspected;
            stats.total_accepted += row.total_accepted;
            stats.total_rejected += row.total_rejected;
        }
        if stats.total_inspected > 0 {
            stats.acceptance_rate = stats.total_accepted as f64 / stats.total_inspected as f64;
        }
        Ok(stats)
    }
}

/// Writes both session files in the fixed order (OD then BF) under an
/// already-held [`SessionsGuard`]. If the BF write fails, the OD file is
/// restored to the content read under this same lock acquisition so the
/// step is all-or-nothing.
fn commit_session_step(
    guard: &SessionsGuard<'_>,
    od_rows: &[SessionRow],
    od_original: &[SessionRow],
    bf_rows: &[SessionRow],
) -> CoreResult<()> {
    guard.write_sessions(Component::Od, od_rows)?;
    if let Err(err) = guard.write_sessions(Component::Bf, bf_rows) {
        if let Err(rollback_err) = guard.write_sessions(Component::Od, od_original) {
            warn!("failed to restore od sessions after aborted step: {rollback_err}");
        }
        return Err(err);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::TableKind;

    fn aggregator() -> (tempfile::TempDir, Arc<DurableStore>, SessionAggregator) {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(DurableStore::open(dir.path()).unwrap());
        let aggregator = SessionAggregator::new(store.clone());
        (dir, store, aggregator)
    }

    #[test]
    fn start_creates_zero_rows_on_both_components() {
        let (_dir, store, aggregator) = aggregator();
        aggregator.start_session("s1").unwrap();

        for component in Component::ALL {
            let row = store.read_session_row(component, "s1").unwrap().unwrap();
            assert_eq!(row.total_inspected, 0);
            assert!(row.end_of_session.is_none());
            assert_eq!(row.defect_totals.len(), component.defect_classes().len());
        }
        assert_eq!(
            aggregator.session_state("s1").unwrap(),
            SessionState::Open
        );
    }

    #[test]
    fn double_start_is_an_integrity_error() {
        let (_dir, _store, aggregator) = aggregator();
        aggregator.start_session("s1").unwrap();
        assert!(matches!(
            aggregator.start_session("s1"),
            Err(CoreError::Integrity(_))
        ));
    }

    #[test]
    fn update_keeps_the_counter_invariant() {
        let (_dir, store, aggregator) = aggregator();
        aggregator.start_session("s1").unwrap();

        aggregator
            .update("s1", Component::Bf, &[Detection::new("roller", 0.9)])
            .unwrap();
        aggregator
            .update(
                "s1",
                Component::Bf,
                &[Detection::new("roller", 0.8), Detection::new("rust", 0.6)],
            )
            .unwrap();
        let row = aggregator
            .update("s1", Component::Bf, &[])
            .unwrap();

        assert_eq!(row.total_inspected, 3);
        assert_eq!(row.total_accepted, 1);
        assert_eq!(row.total_rejected, 2);
        assert_eq!(
            row.total_inspected,
            row.total_accepted + row.total_rejected
        );
        assert_eq!(row.defect_totals["rust"], 1);
        assert_eq!(row.defect_totals["roller"], 2);

        // The OD partition never moved.
        let od = store.read_session_row(Component::Od, "s1").unwrap().unwrap();
        assert_eq!(od.total_inspected, 0);
    }

    #[test]
    fn update_without_start_is_an_integrity_error() {
        let (_dir, _store, aggregator) = aggregator();
        assert!(matches!(
            aggregator.update("ghost", Component::Od, &[]),
            Err(CoreError::Integrity(_))
        ));
    }

    #[test]
    fn end_session_is_idempotent() {
        let (_dir, store, aggregator) = aggregator();
        aggregator.start_session("s1").unwrap();
        aggregator.end_session("s1").unwrap();
        let first_end = store
            .read_session_row(Component::Od, "s1")
            .unwrap()
            .unwrap()
            .end_of_session;
        assert!(first_end.is_some());

        aggregator.end_session("s1").unwrap();
        assert_eq!(
            aggregator.session_state("s1").unwrap(),
            SessionState::Closed
        );
    }

    #[test]
    fn failed_start_leaves_no_half_started_session() {
        let (dir, store, aggregator) = aggregator();

        // Replace the BF sessions file with a directory so only the BF
        // write of the start step can fail.
        let bf_path = dir.path().join("bf_inspection_sessions.csv");
        std::fs::remove_file(&bf_path).unwrap();
        std::fs::create_dir(&bf_path).unwrap();

        let err = aggregator.start_session("s1").unwrap_err();
        assert!(matches!(err, CoreError::Io { .. }));
        // The OD write was rolled back; nothing is half-started.
        assert_eq!(
            store.count_rows(Component::Od, TableKind::Sessions).unwrap(),
            0
        );

        // Heal the file and retry: the session starts cleanly on both
        // components instead of being refused as already open.
        std::fs::remove_dir(&bf_path).unwrap();
        let _ = DurableStore::open(dir.path()).unwrap();
        aggregator.start_session("s1").unwrap();
        for component in Component::ALL {
            assert!(store.read_session_row(component, "s1").unwrap().is_some());
        }
    }

    #[test]
    fn failed_end_leaves_both_rows_open() {
        let (dir, store, aggregator) = aggregator();
        aggregator.start_session("s1").unwrap();

        let bf_path = dir.path().join("bf_inspection_sessions.csv");
        std::fs::remove_file(&bf_path).unwrap();
        std::fs::create_dir(&bf_path).unwrap();

        assert!(matches!(
            aggregator.end_session("s1"),
            Err(CoreError::Io { .. })
        ));
        // The OD row was not closed on its own.
        let od = store.read_session_row(Component::Od, "s1").unwrap().unwrap();
        assert!(od.end_of_session.is_none());
    }

    #[test]
    fn session_state_considers_both_components() {
        let (_dir, store, aggregator) = aggregator();
        let started = Utc::now();

        // A BF-only row (hand-edited on disk, never produced by the
        // aggregator itself) still reports the session as live.
        store
            .upsert_session_row(Component::Bf, "s1", |_| {
                Ok(SessionRow::open(Component::Bf, "s1", started))
            })
            .unwrap();
        assert_eq!(aggregator.session_state("s1").unwrap(), SessionState::Open);

        store
            .upsert_session_row(Component::Bf, "s1", |existing| {
                let mut row = existing.unwrap();
                row.end_of_session = Some(Utc::now());
                Ok(row)
            })
            .unwrap();
        assert_eq!(
            aggregator.session_state("s1").unwrap(),
            SessionState::Closed
        );
    }

    #[test]
    fn stats_aggregate_across_sessions() {
        let (_dir, _store, aggregator) = aggregator();
        aggregator.start_session("s1").unwrap();
        aggregator.start_session("s2").unwrap();

        aggregator
            .update("s1", Component::Od, &[Detection::new("roller", 0.9)])
            .unwrap();
        aggregator
            .update("s2", Component::Od, &[Detection::new("crack", 0.7)])
            .unwrap();

        let stats = aggregator.stats().unwrap();
        assert_eq!(stats.od.sessions, 2);
        assert_eq!(stats.od.total_inspected, 2);
        assert_eq!(stats.od.total_accepted, 1);
        assert_eq!(stats.od.total_rejected, 1);
        assert!((stats.od.acceptance_rate - 0.5).abs() < 1e-9);
        assert_eq!(stats.bf.total_inspected, 0);
        assert_eq!(stats.bf.acceptance_rate, 0.0);
    }
}
