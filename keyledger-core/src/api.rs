//! Request and response shapes of the external contracts.
//!
//! Identifiers arrive as plain strings and are parsed by the ledger, so a
//! malformed id surfaces as a `validation_error` rather than a decoding
//! failure.

use crate::error::{ErrorKind, LedgerError};
use keyledger_types::{KeyCode, Timestamp};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IssueKeyRequest {
    pub account_id: String,
    pub tier_id: String,
    pub device_limit: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IssueKeyResponse {
    pub key_code: KeyCode,
    pub price: i64,
    pub device_limit: u32,
    pub expires_at: Timestamp,
    /// Signed token with the key's terms, verifiable offline.
    pub token: String,
    pub new_balance: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidateKeyRequest {
    pub key_code: String,
    pub device_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidateKeyResponse {
    pub expires_at: Timestamp,
    pub tier_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RedeemCodeRequest {
    pub account_id: String,
    pub code: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RedeemCodeResponse {
    pub amount_credited: i64,
    pub new_balance: i64,
}

/// Error payload: a stable kind plus a human-readable message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub kind: ErrorKind,
    pub message: String,
}

impl From<&LedgerError> for ErrorBody {
    fn from(err: &LedgerError) -> Self {
        Self {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}
