//! Inspection session and prediction ledger for the OD/BF roller
//! inspection stations.
//!
//! The core durably records every detection event, classifies it
//! accept/reject, rolls events up into per-session counters, and migrates
//! both tiers into SQLite through an atomic transfer-and-purge flush that
//! gates application shutdown.

mod aggregator;
mod classify;
mod config;
mod db;
mod error;
mod exit_gate;
mod ledger;
mod models;
mod store;
mod transfer;

use std::sync::Arc;

use log::info;

pub use aggregator::SessionAggregator;
pub use config::CoreConfig;
pub use db::Database;
pub use error::{CoreError, CoreResult};
pub use exit_gate::ExitGate;
pub use ledger::PredictionLedger;
pub use models::{
    Component, ComponentStats, ConfidenceStats, Detection, EventRow, PredictionStatus,
    PredictionSummary, SessionRow, SessionState, Stats, BF_DEFECT_CLASSES, OD_DEFECT_CLASSES,
};
pub use store::{DurableStore, TableKind};
pub use transfer::{FlushCounts, FlushReport, TransferCoordinator};

/// One fully wired core instance. Everything is constructor-injected off a
/// shared [`DurableStore`]; there is no process-wide state, so tests and
/// tools can run as many isolated instances as they like.
pub struct InspectionCore {
    store: Arc<DurableStore>,
    db: Database,
    ledger: PredictionLedger,
    aggregator: SessionAggregator,
    transfer: TransferCoordinator,
    exit_gate: ExitGate,
}

impl InspectionCore {
    pub fn open(config: &CoreConfig) -> CoreResult<Self> {
        let store = Arc::new(DurableStore::open(&config.data_dir)?);
        let db = Database::open(config.db_path.clone())?;

        let core = Self {
            ledger: PredictionLedger::new(store.clone()),
            aggregator: SessionAggregator::new(store.clone()),
            transfer: TransferCoordinator::new(store.clone(), db.clone()),
            exit_gate: ExitGate::new(store.clone()),
            store,
            db,
        };
        info!("inspection core ready");
        Ok(core)
    }

    /// The producer entry point: records the event in the ledger and rolls
    /// it into the session counters. The two run the same classification
    /// independently; a ledger I/O failure surfaces before the counters
    /// move.
    pub fn record(
        &self,
        component: Component,
        detections: &[Detection],
        session_id: &str,
        roller_type: &str,
        employee_id: &str,
    ) -> CoreResult<PredictionSummary> {
        let summary = self
            .ledger
            .record(component, detections, session_id, roller_type, employee_id)?;
        self.aggregator.update(session_id, component, detections)?;
        Ok(summary)
    }

    pub fn start_session(&self, session_id: &str) -> CoreResult<()> {
        self.aggregator.start_session(session_id)
    }

    pub fn end_session(&self, session_id: &str) -> CoreResult<()> {
        self.aggregator.end_session(session_id)
    }

    pub fn session_state(&self, session_id: &str) -> CoreResult<SessionState> {
        self.aggregator.session_state(session_id)
    }

    pub fn stats(&self) -> CoreResult<Stats> {
        self.aggregator.stats()
    }

    pub fn flush(&self) -> CoreResult<FlushReport> {
        self.transfer.flush()
    }

    pub fn has_unflushed_records(&self) -> CoreResult<bool> {
        self.exit_gate.has_unflushed_records()
    }

    pub fn unflushed_count(&self) -> CoreResult<u64> {
        self.exit_gate.unflushed_count()
    }

    pub fn ledger(&self) -> &PredictionLedger {
        &self.ledger
    }

    pub fn aggregator(&self) -> &SessionAggregator {
        &self.aggregator
    }

    pub fn store(&self) -> &Arc<DurableStore> {
        &self.store
    }

    pub fn database(&self) -> &Database {
        &self.db
    }
}
