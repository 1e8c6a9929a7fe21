//! Key validation and device binding.
//!
//! A validation either refreshes an existing binding or claims a free slot
//! with a single conditional insert, so concurrent validations from distinct
//! devices can never bind more devices than the key allows.

use crate::device::{BindOutcome, BoundDevice, load_devices};
use crate::error::{LedgerError, LedgerResult};
use crate::key::{KeyState, load_key};
use crate::sql;
use keyledger_db::{Database, Deadline, Unit};
use keyledger_types::{Clock, DeviceId, KeyCode, Timestamp};
use rusqlite::{OptionalExtension, params};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};

/// A successful validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Validated {
    pub key_code: KeyCode,
    pub tier_id: String,
    pub expires_at: Timestamp,
    pub outcome: BindOutcome,
}

/// What a validation unit decided. Rejections still commit, so the expiry
/// flag written on the way survives.
enum Decision {
    Accept(Validated),
    Reject(LedgerError),
}

/// Validates keys and binds devices to them.
#[derive(Clone)]
pub struct KeyValidator {
    db: Database,
    clock: Arc<dyn Clock>,
}

impl KeyValidator {
    #[must_use]
    pub fn new(db: Database, clock: Arc<dyn Clock>) -> Self {
        Self { db, clock }
    }

    /// Validates `code` for `device`, binding the device if it holds no slot
    /// yet and one is free.
    ///
    /// # Errors
    ///
    /// - [`LedgerError::InvalidKey`] for unknown or revoked keys, whether or
    ///   not a revoked key has since passed its expiry
    /// - [`LedgerError::KeyExpired`] once the key has expired; the key is
    ///   marked inactive as a side effect
    /// - [`LedgerError::DeviceLimitReached`] when every slot is held by
    ///   other devices
    pub fn validate(
        &self,
        code: &KeyCode,
        device: &DeviceId,
        deadline: Deadline,
    ) -> LedgerResult<Validated> {
        let decision = self.db.unit(deadline, |unit| self.decide(unit, code, device))?;
        match decision {
            Decision::Accept(validated) => {
                match validated.outcome {
                    BindOutcome::Bound => {
                        info!(key_code = %code, device_id = %device, "Bound device to key");
                    }
                    BindOutcome::Refreshed => {
                        debug!(key_code = %code, device_id = %device, "Refreshed device binding");
                    }
                }
                Ok(validated)
            }
            Decision::Reject(err) => {
                debug!(key_code = %code, device_id = %device, error = %err, "Key validation rejected");
                Err(err)
            }
        }
    }

    fn decide(&self, unit: &Unit<'_>, code: &KeyCode, device: &DeviceId) -> LedgerResult<Decision> {
        let now = self.clock.now();
        let row = unit
            .query_row(
                "SELECT tier_id, device_limit, expires_at, active, revoked_at
                 FROM keys WHERE code = ?1",
                [code.as_str()],
                |r| {
                    Ok((
                        r.get::<_, String>(0)?,
                        sql::count(r, 1)?,
                        Timestamp::from_millis(r.get(2)?),
                        r.get::<_, bool>(3)?,
                        r.get::<_, Option<i64>>(4)?.is_some(),
                    ))
                },
            )
            .optional()?;
        let Some((tier_id, device_limit, expires_at, active, revoked)) = row else {
            return Ok(Decision::Reject(LedgerError::InvalidKey));
        };
        if revoked {
            return Ok(Decision::Reject(LedgerError::InvalidKey));
        }

        if now >= expires_at {
            if active {
                unit.execute(
                    "UPDATE keys SET active = 0 WHERE code = ?1 AND active = 1",
                    [code.as_str()],
                )?;
                info!(key_code = %code, "Key expired; marked inactive");
            }
            return Ok(Decision::Reject(LedgerError::KeyExpired(expires_at)));
        }
        if !active {
            return Ok(Decision::Reject(LedgerError::InvalidKey));
        }

        let refreshed = unit.execute(
            "UPDATE key_devices SET last_seen_at = MAX(last_seen_at, ?3)
             WHERE key_code = ?1 AND device_id = ?2",
            params![code.as_str(), device.as_str(), now.as_millis()],
        )?;
        let outcome = if refreshed == 1 {
            BindOutcome::Refreshed
        } else {
            let bound = unit.execute(
                "INSERT INTO key_devices (key_code, device_id, first_bound_at, last_seen_at)
                 SELECT ?1, ?2, ?3, ?3
                 WHERE (SELECT COUNT(*) FROM key_devices WHERE key_code = ?1) < ?4",
                params![code.as_str(), device.as_str(), now.as_millis(), device_limit],
            )?;
            if bound == 0 {
                return Ok(Decision::Reject(LedgerError::DeviceLimitReached(device_limit)));
            }
            BindOutcome::Bound
        };

        Ok(Decision::Accept(Validated {
            key_code: code.clone(),
            tier_id,
            expires_at,
            outcome,
        }))
    }

    /// Derives a key's state without changing anything.
    pub fn state(&self, code: &KeyCode, device: Option<&DeviceId>) -> LedgerResult<KeyState> {
        let now = self.clock.now();
        self.db.read(|conn| {
            let key = load_key(conn, code)?.ok_or(LedgerError::InvalidKey)?;
            Ok(key.state_at(now, device))
        })
    }

    /// Devices bound to a key, in binding order.
    pub fn devices(&self, code: &KeyCode) -> LedgerResult<Vec<BoundDevice>> {
        self.db.read(|conn| {
            let exists: bool = conn.query_row(
                "SELECT EXISTS(SELECT 1 FROM keys WHERE code = ?1)",
                [code.as_str()],
                |r| r.get(0),
            )?;
            if !exists {
                return Err(LedgerError::InvalidKey);
            }
            Ok(load_devices(conn, code.as_str())?)
        })
    }
}

impl std::fmt::Debug for KeyValidator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyValidator").finish_non_exhaustive()
    }
}
