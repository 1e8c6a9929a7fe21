//! Identifier types used throughout the ledger.
//!
//! Accounts and transactions use UUID v7 for time-ordered, globally unique
//! identifiers. Key codes, device ids and referral codes are externally
//! supplied strings and are validated on construction.

use crate::Error;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Unique identifier for an account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccountId(Uuid);

impl AccountId {
    /// Creates a new account ID with the current timestamp.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Creates an account ID from an existing UUID.
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the underlying UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> Uuid {
        self.0
    }

    /// Parses an account ID from a string.
    pub fn parse(s: &str) -> Result<Self, uuid::Error> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

impl Default for AccountId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for AccountId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Unique identifier for a ledger transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransactionId(Uuid);

impl TransactionId {
    /// Creates a new transaction ID. UUID v7 keeps ids in creation order.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Returns the underlying UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> Uuid {
        self.0
    }

    /// Parses a transaction ID from a string.
    pub fn parse(s: &str) -> Result<Self, uuid::Error> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

impl Default for TransactionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for TransactionId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// The public code of an issued key.
///
/// Codes are uppercase hexadecimal, 16 to 64 characters. Input is trimmed
/// and uppercased before validation so lookups are case-insensitive.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct KeyCode(String);

impl KeyCode {
    /// Shortest accepted key code.
    pub const MIN_LEN: usize = 16;
    /// Longest accepted key code.
    pub const MAX_LEN: usize = 64;

    /// Parses and normalises a key code.
    pub fn parse(s: &str) -> Result<Self, Error> {
        let code = s.trim().to_ascii_uppercase();
        if !(Self::MIN_LEN..=Self::MAX_LEN).contains(&code.len()) {
            return Err(invalid(
                "key code",
                format!(
                    "length must be between {} and {}",
                    Self::MIN_LEN,
                    Self::MAX_LEN
                ),
            ));
        }
        if !code.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(invalid("key code", "must be hexadecimal".to_string()));
        }
        Ok(Self(code))
    }

    /// Returns the code as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Identifier a client device presents when validating a key.
///
/// Any non-empty string of up to 128 characters without whitespace or
/// control characters. Compared verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DeviceId(String);

impl DeviceId {
    /// Longest accepted device id, in characters.
    pub const MAX_LEN: usize = 128;

    /// Validates a device id.
    pub fn parse(s: &str) -> Result<Self, Error> {
        if s.is_empty() {
            return Err(invalid("device id", "must not be empty".to_string()));
        }
        if s.chars().count() > Self::MAX_LEN {
            return Err(invalid(
                "device id",
                format!("must be at most {} characters", Self::MAX_LEN),
            ));
        }
        if s.chars().any(|c| c.is_whitespace() || c.is_control()) {
            return Err(invalid(
                "device id",
                "must not contain whitespace or control characters".to_string(),
            ));
        }
        Ok(Self(s.to_string()))
    }

    /// Returns the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// A referral/credit code value: 6 to 32 characters of `[A-Z0-9]`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CodeValue(String);

impl CodeValue {
    /// Shortest accepted referral code.
    pub const MIN_LEN: usize = 6;
    /// Longest accepted referral code.
    pub const MAX_LEN: usize = 32;

    /// Parses and normalises a referral code.
    pub fn parse(s: &str) -> Result<Self, Error> {
        let code = s.trim().to_ascii_uppercase();
        if !(Self::MIN_LEN..=Self::MAX_LEN).contains(&code.len()) {
            return Err(invalid(
                "referral code",
                format!(
                    "length must be between {} and {}",
                    Self::MIN_LEN,
                    Self::MAX_LEN
                ),
            ));
        }
        if !code
            .bytes()
            .all(|b| b.is_ascii_uppercase() || b.is_ascii_digit())
        {
            return Err(invalid(
                "referral code",
                "must contain only letters and digits".to_string(),
            ));
        }
        Ok(Self(code))
    }

    /// Returns the code as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

macro_rules! string_id_impls {
    ($($ty:ident),*) => {$(
        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl FromStr for $ty {
            type Err = Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::parse(s)
            }
        }

        impl TryFrom<String> for $ty {
            type Error = Error;

            fn try_from(s: String) -> Result<Self, Self::Error> {
                Self::parse(&s)
            }
        }

        impl From<$ty> for String {
            fn from(id: $ty) -> Self {
                id.0
            }
        }

        impl AsRef<str> for $ty {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    )*};
}

string_id_impls!(KeyCode, DeviceId, CodeValue);

fn invalid(kind: &'static str, reason: String) -> Error {
    Error::InvalidIdentifier { kind, reason }
}
