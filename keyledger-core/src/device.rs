//! Device bindings on a key.

use keyledger_types::{DeviceId, Timestamp};
use rusqlite::{Connection, Row};
use serde::{Deserialize, Serialize};

use crate::sql;

/// A device bound to a key. Bindings are never removed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BoundDevice {
    /// The device.
    pub device_id: DeviceId,
    /// When the device first claimed a slot.
    pub first_bound_at: Timestamp,
    /// Last successful validation from this device.
    pub last_seen_at: Timestamp,
}

impl BoundDevice {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            device_id: sql::parsed(row, 0)?,
            first_bound_at: Timestamp::from_millis(row.get(1)?),
            last_seen_at: Timestamp::from_millis(row.get(2)?),
        })
    }
}

/// How a successful validation treated the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BindOutcome {
    /// The device claimed a new slot.
    Bound,
    /// The device was already bound; its last-seen time was refreshed.
    Refreshed,
}

/// Loads the devices bound to a key, in binding order.
pub(crate) fn load_devices(conn: &Connection, key_code: &str) -> rusqlite::Result<Vec<BoundDevice>> {
    let mut stmt = conn.prepare_cached(
        "SELECT device_id, first_bound_at, last_seen_at
         FROM key_devices WHERE key_code = ?1 ORDER BY rowid",
    )?;
    let rows = stmt.query_map([key_code], BoundDevice::from_row)?;
    rows.collect()
}
