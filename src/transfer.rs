//! Migration of the durable tier into the relational store.
//!
//! This module owns the only legitimate path that deletes durable rows: the
//! files are cleared exclusively after every single row across all four
//! tables inserted successfully.

use std::sync::Arc;

use log::{info, warn};
use serde::Serialize;

use crate::db::Database;
use crate::error::CoreResult;
use crate::models::Component;
use crate::store::{DurableStore, StoreGuard, TableKind};

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FlushCounts {
    pub component: Component,
    pub kind: String,
    pub attempted: u64,
    pub inserted: u64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FlushReport {
    pub ok: bool,
    pub message: String,
    pub counts: Vec<FlushCounts>,
}

impl FlushReport {
    pub fn total_attempted(&self) -> u64 {
        self.counts.iter().map(|c| c.attempted).sum()
    }

    pub fn total_inserted(&self) -> u64 {
        self.counts.iter().map(|c| c.inserted).sum()
    }
}

pub struct TransferCoordinator {
    store: Arc<DurableStore>,
    db: Database,
}

impl TransferCoordinator {
    pub fn new(store: Arc<DurableStore>, db: Database) -> Self {
        Self { store, db }
    }

    /// Migrates every durable row into SQLite, then truncates the files —
    /// but only if every insert across all four tables succeeded. All four
    /// file locks are held for the whole read → insert → clear span, so no
    /// append or upsert can land in between.
    ///
    /// A retried flush after a partial failure re-attempts every surviving
    /// row; rows that did make it last time fail their unique-key check and
    /// keep `ok` false, which in turn keeps the files intact. Durability is
    /// never traded for convenience here.
    pub fn flush(&self) -> CoreResult<FlushReport> {
        for component in Component::ALL {
            self.db.ensure_tables(component)?;
        }

        let guard = self.store.lock_all();

        let mut counts = Vec::with_capacity(4);
        let mut first_failure: Option<String> = None;

        for component in Component::ALL {
            counts.push(self.transfer_events(&guard, component, &mut first_failure)?);
        }
        for component in Component::ALL {
            counts.push(self.transfer_sessions(&guard, component, &mut first_failure)?);
        }

        let report = match first_failure {
            None => {
                guard.clear_all()?;
                let total: u64 = counts.iter().map(|c| c.inserted).sum();
                info!("flush complete: {total} rows transferred, durable files cleared");
                FlushReport {
                    ok: true,
                    message: format!("transferred {total} rows; durable files cleared"),
                    counts,
                }
            }
            Some(failure) => {
                let attempted: u64 = counts.iter().map(|c| c.attempted).sum();
                let inserted: u64 = counts.iter().map(|c| c.inserted).sum();
                warn!(
                    "flush incomplete: {inserted}/{attempted} rows inserted, durable files preserved ({failure})"
                );
                FlushReport {
                    ok: false,
                    message: format!(
                        "transfer incomplete ({inserted}/{attempted} rows inserted): {failure}; \
                         durable files preserved, run flush again"
                    ),
                    counts,
                }
            }
        };
        Ok(report)
    }

    fn transfer_events(
        &self,
        guard: &StoreGuard<'_>,
        component: Component,
        first_failure: &mut Option<String>,
    ) -> CoreResult<FlushCounts> {
        let rows = guard.read_events(component)?;
        let mut counts = FlushCounts {
            component,
            kind: TableKind::Events.as_str().to_string(),
            attempted: rows.len() as u64,
            inserted: 0,
        };

        for row in &rows {
            match self.db.insert_event_row(component, row) {
                Ok(()) => counts.inserted += 1,
                Err(err) => {
                    first_failure.get_or_insert(err.to_string());
                }
            }
        }
        Ok(counts)
    }

    fn transfer_sessions(
        &self,
        guard: &StoreGuard<'_>,
        component: Component,
        first_failure: &mut Option<String>,
    ) -> CoreResult<FlushCounts> {
        let rows = guard.read_sessions(component)?;
        let mut counts = FlushCounts {
            component,
            kind: TableKind::Sessions.as_str().to_string(),
            attempted: rows.len() as u64,
            inserted: 0,
        };

        for row in &rows {
            match self.db.insert_session_row(component, row) {
                Ok(()) => counts.inserted += 1,
                Err(err) => {
                    first_failure.get_or_insert(err.to_string());
                }
            }
        }
        Ok(counts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregator::SessionAggregator;
    use crate::ledger::PredictionLedger;
    use crate::models::Detection;

    struct Fixture {
        _dir: tempfile::TempDir,
        store: Arc<DurableStore>,
        db: Database,
        ledger: PredictionLedger,
        aggregator: SessionAggregator,
        transfer: TransferCoordinator,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(DurableStore::open(dir.path().join("durable").as_path()).unwrap());
        let db = Database::open(dir.path().join("inspection.sqlite3")).unwrap();
        Fixture {
            store: store.clone(),
            db: db.clone(),
            ledger: PredictionLedger::new(store.clone()),
            aggregator: SessionAggregator::new(store.clone()),
            transfer: TransferCoordinator::new(store, db),
            _dir: dir,
        }
    }

    #[test]
    fn flush_moves_rows_and_clears_files() {
        let f = fixture();
        f.aggregator.start_session("s1").unwrap();
        f.ledger
            .record(
                Component::Bf,
                &[Detection::new("roller", 0.9)],
                "s1",
                "TRB-32",
                "emp-1",
            )
            .unwrap();
        f.aggregator
            .update("s1", Component::Bf, &[Detection::new("roller", 0.9)])
            .unwrap();
        f.aggregator.end_session("s1").unwrap();

        let report = f.transfer.flush().unwrap();
        assert!(report.ok, "{}", report.message);
        // 1 event + 2 session rows (one per component).
        assert_eq!(report.total_inserted(), 3);

        assert_eq!(f.db.count_event_rows(Component::Bf).unwrap(), 1);
        assert_eq!(f.db.count_session_rows(Component::Bf).unwrap(), 1);
        for component in Component::ALL {
            for kind in [TableKind::Events, TableKind::Sessions] {
                assert_eq!(f.store.count_rows(component, kind).unwrap(), 0);
            }
        }
    }

    #[test]
    fn flush_twice_is_idempotent() {
        let f = fixture();
        f.aggregator.start_session("s1").unwrap();
        f.aggregator.end_session("s1").unwrap();

        let first = f.transfer.flush().unwrap();
        assert!(first.ok);
        let relational_after_first = f.db.count_session_rows(Component::Od).unwrap();

        let second = f.transfer.flush().unwrap();
        assert!(second.ok);
        assert_eq!(second.total_attempted(), 0);
        assert_eq!(
            f.db.count_session_rows(Component::Od).unwrap(),
            relational_after_first
        );
    }

    #[test]
    fn failed_insert_preserves_every_durable_file() {
        let f = fixture();
        f.aggregator.start_session("s1").unwrap();
        f.aggregator.end_session("s1").unwrap();

        // Pre-seed the relational row so the flush hits a unique-key
        // violation on one of the four tables.
        f.db.ensure_tables(Component::Od).unwrap();
        let row = f
            .store
            .read_session_row(Component::Od, "s1")
            .unwrap()
            .unwrap();
        f.db.insert_session_row(Component::Od, &row).unwrap();

        let report = f.transfer.flush().unwrap();
        assert!(!report.ok);
        assert!(report.message.contains("run flush again"));

        // Nothing was cleared, the OD session row included.
        assert_eq!(
            f.store.count_rows(Component::Od, TableKind::Sessions).unwrap(),
            1
        );
        assert_eq!(
            f.store.count_rows(Component::Bf, TableKind::Sessions).unwrap(),
            1
        );
    }

    #[test]
    fn flushing_an_open_session_is_permitted() {
        let f = fixture();
        f.aggregator.start_session("s1").unwrap();
        // No end_session: mid-inspection transfer is allowed.
        let report = f.transfer.flush().unwrap();
        assert!(report.ok);
        assert_eq!(f.db.count_session_rows(Component::Bf).unwrap(), 1);
    }
}
