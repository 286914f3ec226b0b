use std::path::PathBuf;

use thiserror::Error;

/// Failure taxonomy for the inspection core.
///
/// `Io` covers the durable table files, `Connection` covers the relational
/// store being unreachable or broken, `Integrity` covers duplicate sessions
/// and unique-key violations, `Validation` covers malformed input or rows.
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("durable store I/O failure on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("relational store failure: {0}")]
    Connection(String),

    #[error("integrity failure: {0}")]
    Integrity(String),

    #[error("validation failure: {0}")]
    Validation(String),
}

pub type CoreResult<T> = Result<T, CoreError>;

impl CoreError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        CoreError::Io {
            path: path.into(),
            source,
        }
    }
}

impl From<rusqlite::Error> for CoreError {
    fn from(err: rusqlite::Error) -> Self {
        match &err {
            rusqlite::Error::SqliteFailure(code, _)
                if code.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                CoreError::Integrity(err.to_string())
            }
            _ => CoreError::Connection(err.to_string()),
        }
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        CoreError::Validation(format!("invalid JSON payload: {err}"))
    }
}
