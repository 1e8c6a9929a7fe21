//! Versioned schema migrations, tracked in `PRAGMA user_version`.
//!
//! The ledger invariants are duplicated here as constraints and triggers so
//! that no write path, including a buggy one, can leave the store in a state
//! the ledger would reject.

use crate::error::{DbError, DbResult};
use rusqlite::Connection;
use tracing::info;

/// Ordered migrations. Index + 1 is the schema version the entry produces.
const MIGRATIONS: &[&str] = &[
    // v1: accounts, append-only transaction log, keys, device bindings,
    // referral codes and their redemptions.
    r"
    CREATE TABLE accounts (
        id          TEXT PRIMARY KEY,
        balance     INTEGER NOT NULL DEFAULT 0 CHECK (balance >= 0),
        created_at  INTEGER NOT NULL
    );

    CREATE TABLE transactions (
        id              TEXT PRIMARY KEY,
        account_id      TEXT NOT NULL REFERENCES accounts(id),
        kind            TEXT NOT NULL CHECK (kind IN ('DEBIT', 'CREDIT')),
        amount          INTEGER NOT NULL CHECK (amount > 0),
        balance_before  INTEGER NOT NULL CHECK (balance_before >= 0),
        balance_after   INTEGER NOT NULL CHECK (balance_after >= 0),
        reason          TEXT NOT NULL,
        memo            TEXT NOT NULL DEFAULT '',
        reference_id    TEXT,
        created_at      INTEGER NOT NULL,
        CHECK ((kind = 'CREDIT' AND balance_after - balance_before = amount)
            OR (kind = 'DEBIT' AND balance_before - balance_after = amount))
    );
    CREATE INDEX idx_transactions_account ON transactions(account_id, created_at);

    CREATE TRIGGER transactions_no_update BEFORE UPDATE ON transactions
    BEGIN
        SELECT RAISE(ABORT, 'transactions are append-only');
    END;

    CREATE TRIGGER transactions_no_delete BEFORE DELETE ON transactions
    BEGIN
        SELECT RAISE(ABORT, 'transactions are append-only');
    END;

    CREATE TABLE keys (
        code            TEXT PRIMARY KEY,
        account_id      TEXT NOT NULL REFERENCES accounts(id),
        tier_id         TEXT NOT NULL,
        price           INTEGER NOT NULL CHECK (price > 0),
        device_limit    INTEGER NOT NULL CHECK (device_limit BETWEEN 1 AND 10),
        issued_at       INTEGER NOT NULL,
        expires_at      INTEGER NOT NULL CHECK (expires_at > issued_at),
        active          INTEGER NOT NULL DEFAULT 1 CHECK (active IN (0, 1)),
        transaction_id  TEXT NOT NULL UNIQUE REFERENCES transactions(id)
    );
    CREATE INDEX idx_keys_account ON keys(account_id, issued_at);

    CREATE TRIGGER keys_terms_immutable
    BEFORE UPDATE OF code, account_id, tier_id, price, device_limit,
                     issued_at, expires_at, transaction_id ON keys
    BEGIN
        SELECT RAISE(ABORT, 'key terms are immutable');
    END;

    CREATE TRIGGER keys_no_reactivation BEFORE UPDATE OF active ON keys
    WHEN OLD.active = 0 AND NEW.active = 1
    BEGIN
        SELECT RAISE(ABORT, 'inactive keys cannot be reactivated');
    END;

    CREATE TABLE key_devices (
        key_code        TEXT NOT NULL REFERENCES keys(code),
        device_id       TEXT NOT NULL,
        first_bound_at  INTEGER NOT NULL,
        last_seen_at    INTEGER NOT NULL,
        PRIMARY KEY (key_code, device_id)
    );

    CREATE TRIGGER key_devices_cap BEFORE INSERT ON key_devices
    WHEN (SELECT COUNT(*) FROM key_devices WHERE key_code = NEW.key_code)
       >= (SELECT device_limit FROM keys WHERE code = NEW.key_code)
    BEGIN
        SELECT RAISE(ABORT, 'device limit reached');
    END;

    CREATE TRIGGER key_devices_no_delete BEFORE DELETE ON key_devices
    BEGIN
        SELECT RAISE(ABORT, 'device bindings cannot be removed');
    END;

    CREATE TABLE referral_codes (
        code            TEXT PRIMARY KEY,
        amount          INTEGER NOT NULL CHECK (amount > 0),
        usage_limit     INTEGER NOT NULL CHECK (usage_limit >= 1),
        uses_consumed   INTEGER NOT NULL DEFAULT 0
                        CHECK (uses_consumed >= 0 AND uses_consumed <= usage_limit),
        expires_at      INTEGER,
        created_at      INTEGER NOT NULL,
        created_by      TEXT REFERENCES accounts(id)
    );

    CREATE TRIGGER referral_codes_terms_immutable
    BEFORE UPDATE OF code, amount, usage_limit, expires_at ON referral_codes
    BEGIN
        SELECT RAISE(ABORT, 'referral code terms are immutable');
    END;

    CREATE TRIGGER referral_codes_usage_monotonic BEFORE UPDATE OF uses_consumed ON referral_codes
    WHEN NEW.uses_consumed < OLD.uses_consumed
    BEGIN
        SELECT RAISE(ABORT, 'referral code usage cannot decrease');
    END;

    CREATE TABLE code_redemptions (
        code            TEXT NOT NULL REFERENCES referral_codes(code),
        account_id      TEXT NOT NULL REFERENCES accounts(id),
        transaction_id  TEXT NOT NULL UNIQUE REFERENCES transactions(id),
        redeemed_at     INTEGER NOT NULL
    );
    CREATE INDEX idx_code_redemptions_account ON code_redemptions(account_id, code);
    ",
    // v2: explicit revocation, kept apart from deactivation by expiry.
    r"
    ALTER TABLE keys ADD COLUMN revoked_at INTEGER;

    CREATE TRIGGER keys_revocation_final BEFORE UPDATE OF revoked_at ON keys
    WHEN OLD.revoked_at IS NOT NULL
    BEGIN
        SELECT RAISE(ABORT, 'key revocation is final');
    END;
    ",
];

/// Returns the schema version this build migrates to.
#[must_use]
pub fn latest_version() -> i64 {
    MIGRATIONS.len() as i64
}

/// Reads the schema version stored in the database.
pub fn current_version(conn: &Connection) -> DbResult<i64> {
    Ok(conn.pragma_query_value(None, "user_version", |row| row.get(0))?)
}

/// Applies every migration newer than the stored version, each in its own
/// transaction.
pub fn migrate(conn: &mut Connection) -> DbResult<()> {
    let current = current_version(conn)?;
    let latest = latest_version();
    if current > latest {
        return Err(DbError::Migration(format!(
            "database schema v{current} is newer than this build (v{latest})"
        )));
    }

    for (idx, sql) in MIGRATIONS.iter().enumerate().skip(current as usize) {
        let version = idx as i64 + 1;
        let tx = conn.transaction()?;
        tx.execute_batch(sql)
            .map_err(|e| DbError::Migration(format!("v{version}: {e}")))?;
        tx.pragma_update(None, "user_version", version)?;
        tx.commit()?;
        info!(version, "Applied schema migration");
    }
    Ok(())
}
