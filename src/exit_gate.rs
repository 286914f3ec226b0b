//! Shutdown safety check: the application may not discard state while any
//! durable row has not been transferred.

use std::sync::Arc;

use crate::error::CoreResult;
use crate::models::Component;
use crate::store::{DurableStore, TableKind};

pub struct ExitGate {
    store: Arc<DurableStore>,
}

impl ExitGate {
    pub fn new(store: Arc<DurableStore>) -> Self {
        Self { store }
    }

    /// Point-in-time check over all four files. A `true` may already be
    /// stale by the time the caller acts on it (a flush can complete just
    /// after), but a `false` is always safe: every row counted here was
    /// really durable at the moment of observation.
    pub fn has_unflushed_records(&self) -> CoreResult<bool> {
        Ok(self.unflushed_count()? > 0)
    }

    /// Total unflushed rows across all four files, surfaced to the operator
    /// as "N records will be lost if you proceed". The sanctioned
    /// remediation is running a flush, not proceeding.
    pub fn unflushed_count(&self) -> CoreResult<u64> {
        let mut total = 0u64;
        for component in Component::ALL {
            for kind in [TableKind::Events, TableKind::Sessions] {
                total += self.store.count_rows(component, kind)? as u64;
            }
        }
        Ok(total)
    }
}
