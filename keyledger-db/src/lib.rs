//! SQLite store for the key ledger.
//!
//! Provides the durable transactional store every ledger operation runs
//! against.
//!
//! # Architecture
//!
//! - A [`Database`] is a cloneable handle around one connection guarded by a
//!   mutex; clones share the connection and serialise in-process.
//! - Several handles (threads or processes) may open the same file. They
//!   serialise through `BEGIN IMMEDIATE` under WAL; a short busy timeout turns
//!   lock contention into a retryable [`DbError::Busy`].
//! - [`Database::unit`] runs a closure as one atomic unit: commit on `Ok`,
//!   rollback on `Err`, on a passed deadline, or on panic.
//! - Schema migrations are applied on open.

mod error;
mod schema;
mod unit;

pub use error::{DbError, DbResult};
pub use schema::{current_version, latest_version};
pub use unit::{Deadline, RetryPolicy, Unit, UnitError};

use rusqlite::{Connection, TransactionBehavior};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, warn};

/// Tuning for a store handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreOptions {
    /// How long SQLite waits on a locked database before reporting busy.
    pub busy_timeout_ms: u64,
    /// Retry policy for units that hit a busy database.
    pub retry: RetryPolicy,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            busy_timeout_ms: 50,
            retry: RetryPolicy::default(),
        }
    }
}

/// Handle to the ledger store.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
    retry: RetryPolicy,
}

impl Database {
    /// Opens (or creates) a store at the given path with default options.
    pub fn open(path: &Path) -> DbResult<Self> {
        Self::open_with_options(path, StoreOptions::default())
    }

    /// Opens (or creates) a store at the given path.
    pub fn open_with_options(path: &Path, options: StoreOptions) -> DbResult<Self> {
        let conn = Connection::open(path)?;
        let mode: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        debug!(path = %path.display(), journal_mode = %mode, "Opened ledger store");
        Self::init(conn, options)
    }

    /// Opens an in-memory store (for testing).
    pub fn open_in_memory() -> DbResult<Self> {
        Self::init(Connection::open_in_memory()?, StoreOptions::default())
    }

    fn init(mut conn: Connection, options: StoreOptions) -> DbResult<Self> {
        conn.busy_timeout(Duration::from_millis(options.busy_timeout_ms))?;
        conn.pragma_update(None, "foreign_keys", 1)?;
        schema::migrate(&mut conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            retry: RetryPolicy {
                max_attempts: options.retry.max_attempts.max(1),
                ..options.retry
            },
        })
    }

    /// Returns the retry policy units run under.
    #[must_use]
    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    /// Runs `body` as one atomic unit of work.
    ///
    /// Each attempt opens a `BEGIN IMMEDIATE` transaction, so the unit holds
    /// the database write lock for its whole duration and reads inside it are
    /// never stale. The transaction commits only if `body` returns `Ok` and
    /// the deadline has not passed; otherwise it rolls back. Retryable errors
    /// are retried with backoff until the policy's attempt budget is spent,
    /// after which [`DbError::Conflict`] is returned.
    pub fn unit<T, E, F>(&self, deadline: Deadline, mut body: F) -> Result<T, E>
    where
        E: UnitError,
        F: FnMut(&Unit<'_>) -> Result<T, E>,
    {
        let max_attempts = self.retry.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            deadline.check()?;
            let err = match self.attempt(deadline, attempt, &mut body) {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };
            if !err.is_retryable() {
                return Err(err);
            }
            if attempt >= max_attempts {
                warn!(attempts = attempt, "Unit of work gave up after repeated conflicts");
                return Err(DbError::Conflict { attempts: attempt }.into());
            }
            let mut backoff = self.retry.backoff(attempt);
            if let Some(remaining) = deadline.remaining() {
                backoff = backoff.min(remaining);
            }
            debug!(attempt, backoff_ms = backoff.as_millis() as u64, "Retrying unit of work");
            std::thread::sleep(backoff);
            attempt += 1;
        }
    }

    fn attempt<T, E, F>(&self, deadline: Deadline, attempt: u32, body: &mut F) -> Result<T, E>
    where
        E: UnitError,
        F: FnMut(&Unit<'_>) -> Result<T, E>,
    {
        let mut conn = self.lock()?;
        deadline.check()?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(DbError::from)?;
        let unit = Unit::new(tx, deadline, attempt);
        let value = body(&unit)?;
        unit.commit()?;
        Ok(value)
    }

    /// Runs read-only statements against the connection, outside any unit.
    pub fn read<T, E, F>(&self, body: F) -> Result<T, E>
    where
        E: From<DbError>,
        F: FnOnce(&Connection) -> Result<T, E>,
    {
        let conn = self.lock()?;
        body(&conn)
    }

    fn lock(&self) -> DbResult<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| DbError::LockPoisoned)
    }
}
