//! The durable tier: four delimited table files (component × kind), each
//! behind its own mutex. Rows live here from the moment an inspection event
//! is recorded until a flush migrates them into the relational store.

mod rows;
mod table;

use std::{
    fs,
    path::Path,
    sync::{Mutex, MutexGuard},
};

use log::info;

use crate::error::{CoreError, CoreResult};
use crate::models::{Component, EventRow, SessionRow};

use table::TableFile;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableKind {
    Events,
    Sessions,
}

impl TableKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TableKind::Events => "events",
            TableKind::Sessions => "sessions",
        }
    }
}

impl std::fmt::Display for TableKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lock-protected durable tables. Each file has exactly one mutex; the row
/// order inside a file is the order callers won that mutex. Operations that
/// need more than one file go through [`DurableStore::lock_all`], which
/// acquires in a fixed global order (events before sessions, OD before BF).
pub struct DurableStore {
    od_events: Mutex<TableFile>,
    bf_events: Mutex<TableFile>,
    od_sessions: Mutex<TableFile>,
    bf_sessions: Mutex<TableFile>,
}

impl DurableStore {
    pub fn open(data_dir: &Path) -> CoreResult<Self> {
        fs::create_dir_all(data_dir).map_err(|err| CoreError::io(data_dir, err))?;

        let open_table = |component: Component, kind: TableKind| -> CoreResult<Mutex<TableFile>> {
            let header = match kind {
                TableKind::Events => rows::event_header(component),
                TableKind::Sessions => rows::session_header(component),
            };
            Ok(Mutex::new(TableFile::initialize(
                data_dir, component, kind, header,
            )?))
        };

        let store = Self {
            od_events: open_table(Component::Od, TableKind::Events)?,
            bf_events: open_table(Component::Bf, TableKind::Events)?,
            od_sessions: open_table(Component::Od, TableKind::Sessions)?,
            bf_sessions: open_table(Component::Bf, TableKind::Sessions)?,
        };
        info!("durable store ready at {}", data_dir.display());
        Ok(store)
    }

    fn table(&self, component: Component, kind: TableKind) -> &Mutex<TableFile> {
        match (component, kind) {
            (Component::Od, TableKind::Events) => &self.od_events,
            (Component::Bf, TableKind::Events) => &self.bf_events,
            (Component::Od, TableKind::Sessions) => &self.od_sessions,
            (Component::Bf, TableKind::Sessions) => &self.bf_sessions,
        }
    }

    fn lock(&self, component: Component, kind: TableKind) -> MutexGuard<'_, TableFile> {
        lock_table(self.table(component, kind))
    }

    /// Appends one immutable event row under the events-file lock.
    pub fn append_event(&self, component: Component, row: &EventRow) -> CoreResult<()> {
        let line = rows::encode_event(component, row);
        self.lock(component, TableKind::Events).append_line(&line)
    }

    /// Locked read-modify-rewrite of one session row. The backing format has
    /// no addressable offsets, so the whole file is read, the matching row
    /// (if any) is handed to `mutate`, and the file is rewritten under the
    /// same lock acquisition. `mutate` decides creation and integrity rules.
    pub fn upsert_session_row<F>(
        &self,
        component: Component,
        session_id: &str,
        mutate: F,
    ) -> CoreResult<SessionRow>
    where
        F: FnOnce(Option<SessionRow>) -> CoreResult<SessionRow>,
    {
        let guard = self.lock(component, TableKind::Sessions);

        let mut sessions = decode_sessions(component, &guard.read_lines()?)?;
        let position = sessions
            .iter()
            .position(|row| row.session_id == session_id);

        let existing = position.map(|index| sessions[index].clone());
        let replacement = mutate(existing)?;
        match position {
            Some(index) => sessions[index] = replacement.clone(),
            None => sessions.push(replacement.clone()),
        }

        let lines: Vec<String> = sessions
            .iter()
            .map(|row| rows::encode_session(component, row))
            .collect();
        guard.rewrite(&lines)?;
        Ok(replacement)
    }

    pub fn read_events(&self, component: Component) -> CoreResult<Vec<EventRow>> {
        let guard = self.lock(component, TableKind::Events);
        decode_events(component, &guard.read_lines()?)
    }

    pub fn read_sessions(&self, component: Component) -> CoreResult<Vec<SessionRow>> {
        let guard = self.lock(component, TableKind::Sessions);
        decode_sessions(component, &guard.read_lines()?)
    }

    pub fn read_session_row(
        &self,
        component: Component,
        session_id: &str,
    ) -> CoreResult<Option<SessionRow>> {
        Ok(self
            .read_sessions(component)?
            .into_iter()
            .find(|row| row.session_id == session_id))
    }

    pub fn count_rows(&self, component: Component, kind: TableKind) -> CoreResult<usize> {
        self.lock(component, kind).count()
    }

    /// Acquires all four file locks in the fixed global order and returns a
    /// guard giving exclusive access for the caller's lifetime. The transfer
    /// path holds this across its whole read → insert → clear span so no
    /// append or upsert can interleave.
    pub fn lock_all(&self) -> StoreGuard<'_> {
        StoreGuard {
            od_events: lock_table(&self.od_events),
            bf_events: lock_table(&self.bf_events),
            od_sessions: lock_table(&self.od_sessions),
            bf_sessions: lock_table(&self.bf_sessions),
        }
    }
}

impl DurableStore {
    /// Acquires both session-file locks (OD before BF, matching the global
    /// order) for logical steps that must touch the two components' session
    /// rows as one unit. While the guard is held no upsert or flush can
    /// interleave between the two files.
    pub fn lock_sessions(&self) -> SessionsGuard<'_> {
        SessionsGuard {
            od: lock_table(&self.od_sessions),
            bf: lock_table(&self.bf_sessions),
        }
    }
}

/// Exclusive view over the two session tables.
pub struct SessionsGuard<'a> {
    od: MutexGuard<'a, TableFile>,
    bf: MutexGuard<'a, TableFile>,
}

impl SessionsGuard<'_> {
    fn table(&self, component: Component) -> &TableFile {
        match component {
            Component::Od => &self.od,
            Component::Bf => &self.bf,
        }
    }

    pub fn read_sessions(&self, component: Component) -> CoreResult<Vec<SessionRow>> {
        decode_sessions(component, &self.table(component).read_lines()?)
    }

    pub fn read_session_row(
        &self,
        component: Component,
        session_id: &str,
    ) -> CoreResult<Option<SessionRow>> {
        Ok(self
            .read_sessions(component)?
            .into_iter()
            .find(|row| row.session_id == session_id))
    }

    /// Replaces one component's session rows wholesale, under the locks
    /// this guard already holds.
    pub fn write_sessions(&self, component: Component, records: &[SessionRow]) -> CoreResult<()> {
        let lines: Vec<String> = records
            .iter()
            .map(|row| rows::encode_session(component, row))
            .collect();
        self.table(component).rewrite(&lines)
    }
}

fn lock_table(table: &Mutex<TableFile>) -> MutexGuard<'_, TableFile> {
    // A poisoned lock means another thread panicked mid-operation; the file
    // itself is still consistent (rewrites are temp-file + rename), so
    // continuing with the inner value is sound.
    table.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn decode_events(component: Component, lines: &[String]) -> CoreResult<Vec<EventRow>> {
    lines
        .iter()
        .map(|line| rows::decode_event(component, line))
        .collect()
}

fn decode_sessions(component: Component, lines: &[String]) -> CoreResult<Vec<SessionRow>> {
    lines
        .iter()
        .map(|line| rows::decode_session(component, line))
        .collect()
}

/// Exclusive view over all four tables; only the transfer path and the exit
/// gate use it. Dropping the guard releases the locks in reverse order.
pub struct StoreGuard<'a> {
    od_events: MutexGuard<'a, TableFile>,
    bf_events: MutexGuard<'a, TableFile>,
    od_sessions: MutexGuard<'a, TableFile>,
    bf_sessions: MutexGuard<'a, TableFile>,
}

impl StoreGuard<'_> {
    fn table(&self, component: Component, kind: TableKind) -> &TableFile {
        match (component, kind) {
            (Component::Od, TableKind::Events) => &self.od_events,
            (Component::Bf, TableKind::Events) => &self.bf_events,
            (Component::Od, TableKind::Sessions) => &self.od_sessions,
            (Component::Bf, TableKind::Sessions) => &self.bf_sessions,
        }
    }

    pub fn read_events(&self, component: Component) -> CoreResult<Vec<EventRow>> {
        decode_events(component, &self.table(component, TableKind::Events).read_lines()?)
    }

    pub fn read_sessions(&self, component: Component) -> CoreResult<Vec<SessionRow>> {
        decode_sessions(
            component,
            &self.table(component, TableKind::Sessions).read_lines()?,
        )
    }

    pub fn count_rows(&self, component: Component, kind: TableKind) -> CoreResult<usize> {
        self.table(component, kind).count()
    }

    /// Truncates every table back to header-only. Callable only through this
    /// guard, so a clear always happens under all four locks.
    pub fn clear_all(&self) -> CoreResult<()> {
        for component in Component::ALL {
            for kind in [TableKind::Events, TableKind::Sessions] {
                let table = self.table(component, kind);
                table.clear()?;
                info!("cleared durable {} {} table", table.component(), table.kind());
            }
        }
        Ok(())
    }
}
