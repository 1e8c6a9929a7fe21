//! Error types for the ledger.

use keyledger_db::{DbError, UnitError};
use keyledger_types::{AccountId, Timestamp};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::error;

/// Ledger errors. Every variant guarantees the failed unit was rolled back.
#[derive(Debug, Error)]
pub enum LedgerError {
    /// Bad input shape or range: unknown tier, device limit out of bounds,
    /// malformed code.
    #[error("validation error: {0}")]
    Validation(String),

    /// The account does not exist.
    #[error("account not found: {0}")]
    AccountNotFound(AccountId),

    /// An account with this id already exists.
    #[error("account already exists: {0}")]
    AccountExists(AccountId),

    /// The account balance does not cover the debit.
    #[error("insufficient balance: required {required}, available {available}")]
    InsufficientBalance { required: i64, available: i64 },

    /// Unknown or revoked key.
    #[error("invalid or inactive key")]
    InvalidKey,

    /// The key passed its expiry.
    #[error("key expired at {0}")]
    KeyExpired(Timestamp),

    /// Every device slot of the key is taken by other devices.
    #[error("device limit reached (max {0} devices)")]
    DeviceLimitReached(u32),

    /// Unknown referral code.
    #[error("invalid referral code")]
    InvalidCode,

    /// The referral code passed its expiry.
    #[error("referral code expired at {0}")]
    CodeExpired(Timestamp),

    /// The referral code has no uses left.
    #[error("referral code has been fully redeemed")]
    CodeExhausted,

    /// The account already redeemed this code.
    #[error("referral code already redeemed by this account")]
    AlreadyRedeemed,

    /// Write conflict that outlived the retry budget. Safe to retry.
    #[error("write conflict, retry the request")]
    Conflict,

    /// The caller's deadline passed before the unit could commit.
    #[error("deadline exceeded")]
    DeadlineExceeded,

    /// No free code was found within the attempt budget.
    #[error("could not generate a unique code after {0} attempts")]
    GenerationExhausted(u32),

    /// Storage fault. Details are logged, never returned.
    #[error("storage error: {0}")]
    Storage(String),
}

/// Result type for ledger operations.
pub type LedgerResult<T> = Result<T, LedgerError>;

/// Stable, distinguishable error codes for the controller layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    ValidationError,
    AccountNotFound,
    AccountExists,
    InsufficientBalance,
    InvalidKey,
    KeyExpired,
    DeviceLimitReached,
    InvalidCode,
    CodeExpired,
    CodeExhausted,
    AlreadyRedeemed,
    Conflict,
    DeadlineExceeded,
    GenerationExhausted,
    StorageFault,
}

impl ErrorKind {
    /// The wire code, identical to the serde representation.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::ValidationError => "validation_error",
            Self::AccountNotFound => "account_not_found",
            Self::AccountExists => "account_exists",
            Self::InsufficientBalance => "insufficient_balance",
            Self::InvalidKey => "invalid_key",
            Self::KeyExpired => "key_expired",
            Self::DeviceLimitReached => "device_limit_reached",
            Self::InvalidCode => "invalid_code",
            Self::CodeExpired => "code_expired",
            Self::CodeExhausted => "code_exhausted",
            Self::AlreadyRedeemed => "already_redeemed",
            Self::Conflict => "conflict",
            Self::DeadlineExceeded => "deadline_exceeded",
            Self::GenerationExhausted => "generation_exhausted",
            Self::StorageFault => "storage_fault",
        }
    }

    /// Returns true if the caller may retry the same request unchanged.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Conflict | Self::DeadlineExceeded)
    }
}

impl LedgerError {
    /// Returns the stable kind of this error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) => ErrorKind::ValidationError,
            Self::AccountNotFound(_) => ErrorKind::AccountNotFound,
            Self::AccountExists(_) => ErrorKind::AccountExists,
            Self::InsufficientBalance { .. } => ErrorKind::InsufficientBalance,
            Self::InvalidKey => ErrorKind::InvalidKey,
            Self::KeyExpired(_) => ErrorKind::KeyExpired,
            Self::DeviceLimitReached(_) => ErrorKind::DeviceLimitReached,
            Self::InvalidCode => ErrorKind::InvalidCode,
            Self::CodeExpired(_) => ErrorKind::CodeExpired,
            Self::CodeExhausted => ErrorKind::CodeExhausted,
            Self::AlreadyRedeemed => ErrorKind::AlreadyRedeemed,
            Self::Conflict => ErrorKind::Conflict,
            Self::DeadlineExceeded => ErrorKind::DeadlineExceeded,
            Self::GenerationExhausted(_) => ErrorKind::GenerationExhausted,
            Self::Storage(_) => ErrorKind::StorageFault,
        }
    }

    /// Returns true for errors that end the request and deserve an
    /// error-level log line.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::GenerationExhausted(_) | Self::Storage(_))
    }
}

impl From<DbError> for LedgerError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::Busy(_) | DbError::Conflict { .. } => Self::Conflict,
            DbError::DeadlineExceeded => Self::DeadlineExceeded,
            other => {
                error!(error = %other, "Storage fault");
                Self::Storage("the ledger store failed to complete the operation".to_string())
            }
        }
    }
}

impl From<rusqlite::Error> for LedgerError {
    fn from(err: rusqlite::Error) -> Self {
        DbError::from(err).into()
    }
}

impl From<keyledger_types::Error> for LedgerError {
    fn from(err: keyledger_types::Error) -> Self {
        Self::Validation(err.to_string())
    }
}

impl UnitError for LedgerError {
    fn is_retryable(&self) -> bool {
        // Busy errors arrive here as Conflict.
        matches!(self, Self::Conflict)
    }
}

/// Errors from verifying a signed key token.
#[derive(Debug, Error)]
pub enum TokenError {
    /// Invalid token format.
    #[error("invalid key token format: {0}")]
    InvalidKeyFormat(String),

    /// Ed25519 signature verification failed.
    #[error("key token signature invalid")]
    InvalidSignature,

    /// Payload JSON is malformed or missing required fields.
    #[error("invalid key token payload: {0}")]
    InvalidPayload(String),
}
