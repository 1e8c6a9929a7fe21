//! Error types for the store.

use rusqlite::ErrorCode;
use thiserror::Error;

/// Result type for store operations.
pub type DbResult<T> = Result<T, DbError>;

/// Errors that can occur in store operations.
#[derive(Debug, Error)]
pub enum DbError {
    /// Database error from SQLite.
    #[error("database error: {0}")]
    Sqlite(rusqlite::Error),

    /// Another connection holds the write lock. Transient.
    #[error("database busy: {0}")]
    Busy(String),

    /// A unit kept hitting write conflicts until its retry budget ran out.
    #[error("write conflict persisted after {attempts} attempts")]
    Conflict { attempts: u32 },

    /// The caller's deadline passed; the unit was rolled back.
    #[error("deadline exceeded")]
    DeadlineExceeded,

    /// A CHECK, UNIQUE, foreign key or trigger constraint rejected a write.
    #[error("constraint violated: {0}")]
    Constraint(String),

    /// Migration error.
    #[error("migration error: {0}")]
    Migration(String),

    /// A thread panicked while holding the connection.
    #[error("connection lock poisoned")]
    LockPoisoned,
}

impl DbError {
    /// Returns true if retrying the same unit may succeed.
    #[must_use]
    pub fn is_busy(&self) -> bool {
        matches!(self, Self::Busy(_))
    }

    /// Returns true for constraint and trigger rejections.
    #[must_use]
    pub fn is_constraint(&self) -> bool {
        matches!(self, Self::Constraint(_))
    }
}

impl From<rusqlite::Error> for DbError {
    fn from(err: rusqlite::Error) -> Self {
        match &err {
            rusqlite::Error::SqliteFailure(e, msg) => match e.code {
                ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked => {
                    Self::Busy(msg.clone().unwrap_or_else(|| e.to_string()))
                }
                ErrorCode::ConstraintViolation => {
                    Self::Constraint(msg.clone().unwrap_or_else(|| e.to_string()))
                }
                _ => Self::Sqlite(err),
            },
            _ => Self::Sqlite(err),
        }
    }
}
