//! Issued keys and their derived state.

use crate::device::{BoundDevice, load_devices};
use crate::sql;
use keyledger_types::{AccountId, DeviceId, KeyCode, Timestamp, TransactionId};
use rusqlite::{Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};

/// Smallest device limit a key may carry.
pub const MIN_DEVICE_LIMIT: u32 = 1;
/// Largest device limit a key may carry.
pub const MAX_DEVICE_LIMIT: u32 = 10;

pub(crate) const KEY_COLUMNS: &str = "code, account_id, tier_id, price, device_limit, issued_at, \
                                      expires_at, active, transaction_id, revoked_at";

/// A purchased license key.
///
/// Terms (`price`, `device_limit`, `expires_at`) are fixed at issuance. The
/// `active` flag only ever moves from true to false, either on first
/// validation past expiry or through an explicit deactivation, which also
/// stamps `revoked_at`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Key {
    pub code: KeyCode,
    pub account_id: AccountId,
    pub tier_id: String,
    pub price: i64,
    pub device_limit: u32,
    pub issued_at: Timestamp,
    pub expires_at: Timestamp,
    pub active: bool,
    /// The debit that paid for this key.
    pub transaction_id: TransactionId,
    #[serde(default)]
    pub revoked_at: Option<Timestamp>,
    /// Bound devices in binding order.
    pub bound_devices: Vec<BoundDevice>,
}

/// Observable state of a key, derived at read time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyState {
    Active,
    Expired,
    Revoked,
    /// Every slot is taken and the asking device holds none of them.
    LimitReached,
}

/// Filter for listing an account's keys.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyStatusFilter {
    #[default]
    All,
    /// Active and unexpired.
    Active,
    /// Past expiry or deactivated.
    Expired,
}

impl Key {
    pub(crate) fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            code: sql::parsed(row, 0)?,
            account_id: sql::parsed(row, 1)?,
            tier_id: row.get(2)?,
            price: row.get(3)?,
            device_limit: sql::count(row, 4)?,
            issued_at: Timestamp::from_millis(row.get(5)?),
            expires_at: Timestamp::from_millis(row.get(6)?),
            active: row.get(7)?,
            transaction_id: sql::parsed(row, 8)?,
            revoked_at: row.get::<_, Option<i64>>(9)?.map(Timestamp::from_millis),
            bound_devices: Vec::new(),
        })
    }

    /// Returns true once `now` has reached the expiry instant.
    #[must_use]
    pub fn is_expired_at(&self, now: Timestamp) -> bool {
        now >= self.expires_at
    }

    /// Returns true if `device` holds a slot on this key.
    #[must_use]
    pub fn is_bound(&self, device: &DeviceId) -> bool {
        self.bound_devices.iter().any(|d| &d.device_id == device)
    }

    /// Slots not yet claimed.
    #[must_use]
    pub fn free_slots(&self) -> u32 {
        self.device_limit
            .saturating_sub(u32::try_from(self.bound_devices.len()).unwrap_or(u32::MAX))
    }

    /// Returns true if the key was deactivated on request rather than by
    /// running out its term.
    #[must_use]
    pub fn is_revoked(&self) -> bool {
        self.revoked_at.is_some()
    }

    /// Derives the key's state at `now`, optionally from the point of view of
    /// one device. Revocation outranks expiry.
    #[must_use]
    pub fn state_at(&self, now: Timestamp, device: Option<&DeviceId>) -> KeyState {
        if self.is_revoked() {
            return KeyState::Revoked;
        }
        if self.is_expired_at(now) {
            return KeyState::Expired;
        }
        if !self.active {
            return KeyState::Revoked;
        }
        match device {
            Some(device) if self.free_slots() == 0 && !self.is_bound(device) => {
                KeyState::LimitReached
            }
            _ => KeyState::Active,
        }
    }
}

/// Loads a key with its bound devices.
pub(crate) fn load_key(conn: &Connection, code: &KeyCode) -> rusqlite::Result<Option<Key>> {
    let sql = format!("SELECT {KEY_COLUMNS} FROM keys WHERE code = ?1");
    let key = conn
        .query_row(&sql, [code.as_str()], Key::from_row)
        .optional()?;
    key.map(|mut key| {
        key.bound_devices = load_devices(conn, key.code.as_str())?;
        Ok(key)
    })
    .transpose()
}
