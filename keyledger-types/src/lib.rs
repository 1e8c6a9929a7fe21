//! Core type definitions for the key ledger.
//!
//! This crate defines the leaf types shared by the store, the ledger core
//! and the HTTP adapter:
//! - Account and transaction identifiers (UUID v7)
//! - Key codes, device ids and referral codes (validated string newtypes)
//! - Millisecond timestamps and the injectable [`Clock`]
//! - The immutable [`PricingCatalog`]

mod ids;
mod pricing;
mod timestamp;

pub use ids::{AccountId, CodeValue, DeviceId, KeyCode, TransactionId};
pub use pricing::{PricingCatalog, PricingTier};
pub use timestamp::{Clock, ManualClock, SystemClock, Timestamp};

/// Result type alias using the crate's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in type operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid UUID: {0}")]
    InvalidUuid(#[from] uuid::Error),

    #[error("invalid {kind}: {reason}")]
    InvalidIdentifier { kind: &'static str, reason: String },

    #[error("invalid pricing catalog: {0}")]
    InvalidCatalog(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
