//! Atomic units of work: one `BEGIN IMMEDIATE` transaction per attempt,
//! bounded retries on write conflicts, and a caller deadline.

use crate::error::{DbError, DbResult};
use rand::Rng;
use rusqlite::Transaction;
use serde::{Deserialize, Serialize};
use std::ops::Deref;
use std::time::{Duration, Instant};

/// How many times a conflicting unit is retried, and how long to back off.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts including the first one. At least 1.
    pub max_attempts: u32,
    /// Backoff before the first retry, in milliseconds. Doubles per retry.
    pub base_backoff_ms: u64,
    /// Upper bound for a single backoff, in milliseconds.
    pub max_backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            base_backoff_ms: 5,
            max_backoff_ms: 200,
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    #[must_use]
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Backoff before retry number `retry` (1-based), with up to 50% jitter.
    #[must_use]
    pub fn backoff(&self, retry: u32) -> Duration {
        let exp = self
            .base_backoff_ms
            .saturating_mul(1u64 << retry.saturating_sub(1).min(16));
        let capped = exp.min(self.max_backoff_ms);
        let jitter = if capped > 1 {
            rand::thread_rng().gen_range(0..=capped / 2)
        } else {
            0
        };
        Duration::from_millis(capped.saturating_sub(jitter))
    }
}

/// A point in time after which a unit must abort.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Deadline(Option<Instant>);

impl Deadline {
    /// No deadline.
    #[must_use]
    pub const fn none() -> Self {
        Self(None)
    }

    /// Expires `timeout` from now.
    #[must_use]
    pub fn after(timeout: Duration) -> Self {
        Self(Instant::now().checked_add(timeout))
    }

    /// Expires at `instant`.
    #[must_use]
    pub const fn at(instant: Instant) -> Self {
        Self(Some(instant))
    }

    /// Returns true once the deadline has passed.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.0.is_some_and(|at| Instant::now() >= at)
    }

    /// Time left, or `None` when there is no deadline.
    #[must_use]
    pub fn remaining(&self) -> Option<Duration> {
        self.0.map(|at| at.saturating_duration_since(Instant::now()))
    }

    /// Fails with [`DbError::DeadlineExceeded`] once expired.
    pub fn check(&self) -> DbResult<()> {
        if self.is_expired() {
            Err(DbError::DeadlineExceeded)
        } else {
            Ok(())
        }
    }
}

/// Errors a unit body may return. The runner retries only retryable ones.
pub trait UnitError: From<DbError> {
    /// Returns true if running the unit again may succeed.
    fn is_retryable(&self) -> bool;
}

impl UnitError for DbError {
    fn is_retryable(&self) -> bool {
        self.is_busy()
    }
}

/// An open unit of work. Dereferences to the underlying transaction so the
/// body can run statements directly; dropped without commit means rollback.
pub struct Unit<'conn> {
    tx: Transaction<'conn>,
    deadline: Deadline,
    attempt: u32,
}

impl<'conn> Unit<'conn> {
    pub(crate) fn new(tx: Transaction<'conn>, deadline: Deadline, attempt: u32) -> Self {
        Self {
            tx,
            deadline,
            attempt,
        }
    }

    /// Fails if the caller's deadline has passed. Bodies call this between
    /// statements of long units.
    pub fn checkpoint(&self) -> DbResult<()> {
        self.deadline.check()
    }

    /// The deadline this unit runs under.
    #[must_use]
    pub fn deadline(&self) -> Deadline {
        self.deadline
    }

    /// 1-based attempt number.
    #[must_use]
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub(crate) fn commit(self) -> DbResult<()> {
        self.deadline.check()?;
        self.tx.commit()?;
        Ok(())
    }
}

impl<'conn> Deref for Unit<'conn> {
    type Target = Transaction<'conn>;

    fn deref(&self) -> &Self::Target {
        &self.tx
    }
}
