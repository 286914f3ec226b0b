//! The relational tier: SQLite behind a single worker thread.
//!
//! The connection lives on its own thread and every caller goes through a
//! command queue with a blocking reply channel, so all relational access is
//! serialized through one owner.

mod schema;

use std::{
    path::{Path, PathBuf},
    sync::{mpsc, Arc, Mutex},
    thread::{self, JoinHandle},
};

use log::{error, info};
use rusqlite::{params_from_iter, Connection};

use crate::error::{CoreError, CoreResult};
use crate::models::{Component, EventRow, SessionRow};

type DbTask = Box<dyn FnOnce(&mut Connection) + Send + 'static>;

enum DbCommand {
    Execute(DbTask),
    Shutdown,
}

struct DatabaseInner {
    sender: mpsc::Sender<DbCommand>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for DatabaseInner {
    fn drop(&mut self) {
        let mut guard = match self.worker.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        if let Some(handle) = guard.take() {
            if let Err(err) = self.sender.send(DbCommand::Shutdown) {
                error!("failed to send shutdown to database thread: {err}");
            }
            if let Err(join_err) = handle.join() {
                error!("failed to join database thread: {join_err:?}");
            }
        }
    }
}

#[derive(Clone)]
pub struct Database {
    inner: Arc<DatabaseInner>,
    db_path: Arc<PathBuf>,
}

impl Database {
    pub fn open(db_path: PathBuf) -> CoreResult<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).map_err(|err| CoreError::io(parent, err))?;
        }

        let (command_tx, command_rx) = mpsc::channel::<DbCommand>();
        let (ready_tx, ready_rx) = mpsc::channel();
        let path_for_thread = db_path.clone();

        let worker = thread::Builder::new()
            .name("rollinspect-db".into())
            .spawn(move || {
                let mut conn = match Connection::open(&path_for_thread) {
                    Ok(connection) => connection,
                    Err(err) => {
                        let _ = ready_tx.send(Err(CoreError::Connection(format!(
                            "failed to open SQLite database: {err}"
                        ))));
                        return;
                    }
                };

                if let Err(err) = conn.pragma_update(None, "journal_mode", "WAL") {
                    error!("failed to enable WAL mode: {err}");
                }
                if let Err(err) = conn.pragma_update(None, "foreign_keys", "ON") {
                    error!("failed to enable foreign keys: {err}");
                }

                if ready_tx.send(Ok(())).is_err() {
                    error!("database initialization receiver dropped before ready signal");
                    return;
                }

                while let Ok(command) = command_rx.recv() {
                    match command {
                        DbCommand::Execute(task) => task(&mut conn),
                        DbCommand::Shutdown => break,
                    }
                }

                info!("database thread shutting down");
            })
            .map_err(|err| CoreError::Connection(format!("failed to spawn database worker: {err}")))?;

        ready_rx.recv().map_err(|_| {
            CoreError::Connection("database worker exited before signaling readiness".to_string())
        })??;

        info!("relational store ready at {}", db_path.display());

        Ok(Self {
            inner: Arc::new(DatabaseInner {
                sender: command_tx,
                worker: Mutex::new(Some(worker)),
            }),
            db_path: Arc::new(db_path),
        })
    }

    pub fn path(&self) -> &Path {
        self.db_path.as_path()
    }

    /// Runs `task` on the database thread and blocks for its result.
    pub fn execute<F, T>(&self, task: F) -> CoreResult<T>
    where
        F: FnOnce(&mut Connection) -> CoreResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let (reply_tx, reply_rx) = mpsc::channel();

        let command = DbCommand::Execute(Box::new(move |conn| {
            let result = task(conn);
            if reply_tx.send(result).is_err() {
                error!("database caller dropped before receiving result");
            }
        }));

        self.inner
            .sender
            .send(command)
            .map_err(|err| CoreError::Connection(format!("failed to reach database thread: {err}")))?;

        reply_rx
            .recv()
            .map_err(|_| CoreError::Connection("database thread terminated unexpectedly".to_string()))?
    }

    /// Idempotent DDL for one component's event and session tables.
    pub fn ensure_tables(&self, component: Component) -> CoreResult<()> {
        self.execute(move |conn| {
            conn.execute_batch(&format!(
                "{};\n{};",
                schema::create_events_ddl(component),
                schema::create_sessions_ddl(component)
            ))
            .map_err(CoreError::from)
        })
    }

    /// Inserts one ledger row. A duplicate `prediction_id` surfaces as
    /// `CoreError::Integrity`.
    pub fn insert_event_row(&self, component: Component, row: &EventRow) -> CoreResult<()> {
        let params = schema::event_params(component, row)?;
        self.execute(move |conn| {
            conn.execute(&schema::insert_event_sql(component), params_from_iter(params))
                .map_err(CoreError::from)?;
            Ok(())
        })
    }

    pub fn insert_session_row(&self, component: Component, row: &SessionRow) -> CoreResult<()> {
        let params = schema::session_params(component, row)?;
        self.execute(move |conn| {
            conn.execute(
                &schema::insert_session_sql(component),
                params_from_iter(params),
            )
            .map_err(CoreError::from)?;
            Ok(())
        })
    }

    pub fn count_event_rows(&self, component: Component) -> CoreResult<u64> {
        self.count_table(schema::events_table(component))
    }

    pub fn count_session_rows(&self, component: Component) -> CoreResult<u64> {
        self.count_table(schema::sessions_table(component))
    }

    fn count_table(&self, table: String) -> CoreResult<u64> {
        self.execute(move |conn| {
            let count: i64 = conn
                .query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| {
                    row.get(0)
                })
                .map_err(CoreError::from)?;
            Ok(count as u64)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PredictionStatus;
    use chrono::Utc;
    use std::collections::BTreeMap;

    fn open_db() -> (tempfile::TempDir, Database) {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open(dir.path().join("inspection.sqlite3")).unwrap();
        (dir, db)
    }

    fn event(id: &str) -> EventRow {
        EventRow {
            prediction_id: id.to_string(),
            session_id: "s1".to_string(),
            timestamp: Utc::now(),
            roller_type: "TRB-32".to_string(),
            employee_id: "emp-1".to_string(),
            status: PredictionStatus::Rejected,
            total_detections: 1,
            defect_counts: BTreeMap::from([("rust".to_string(), 1)]),
            avg_confidence: 0.5,
            max_confidence: 0.5,
            min_confidence: 0.5,
            raw_detections: "[]".to_string(),
        }
    }

    #[test]
    fn ensure_tables_is_idempotent() {
        let (_dir, db) = open_db();
        db.ensure_tables(Component::Od).unwrap();
        db.ensure_tables(Component::Od).unwrap();
        assert_eq!(db.count_event_rows(Component::Od).unwrap(), 0);
    }

    #[test]
    fn duplicate_prediction_id_is_an_integrity_error() {
        let (_dir, db) = open_db();
        db.ensure_tables(Component::Bf).unwrap();

        db.insert_event_row(Component::Bf, &event("p1")).unwrap();
        let err = db.insert_event_row(Component::Bf, &event("p1")).unwrap_err();
        assert!(matches!(err, CoreError::Integrity(_)));
        assert_eq!(db.count_event_rows(Component::Bf).unwrap(), 1);
    }

    #[test]
    fn session_rows_insert_with_null_end() {
        let (_dir, db) = open_db();
        db.ensure_tables(Component::Bf).unwrap();

        let row = SessionRow::open(Component::Bf, "s1", Utc::now());
        db.insert_session_row(Component::Bf, &row).unwrap();
        assert_eq!(db.count_session_rows(Component::Bf).unwrap(), 1);
    }
}
