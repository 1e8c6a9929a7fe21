use keyledger_db::{
    current_version, latest_version, Database, DbError, Deadline, RetryPolicy, StoreOptions,
};
use rusqlite::params;
use std::time::Duration;

fn seed_account(db: &Database, id: &str, balance: i64) {
    db.unit(Deadline::none(), |u| {
        u.execute(
            "INSERT INTO accounts (id, balance, created_at) VALUES (?1, ?2, 0)",
            params![id, balance],
        )?;
        Ok::<_, DbError>(())
    })
    .unwrap();
}

fn balance_of(db: &Database, id: &str) -> i64 {
    db.read(|conn| {
        conn.query_row("SELECT balance FROM accounts WHERE id = ?1", [id], |r| r.get(0))
            .map_err(DbError::from)
    })
    .unwrap()
}

// ── Migrations ──────────────────────────────────────────────────

#[test]
fn open_in_memory_applies_all_migrations() {
    let db = Database::open_in_memory().unwrap();
    let version = db.read(|conn| current_version(conn)).unwrap();
    assert_eq!(version, latest_version());
}

#[test]
fn reopening_a_file_does_not_reapply_migrations() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("ledger.db");
    {
        let db = Database::open(&path).unwrap();
        seed_account(&db, "a", 10);
    }
    let db = Database::open(&path).unwrap();
    assert_eq!(balance_of(&db, "a"), 10);
}

// ── Units of work ───────────────────────────────────────────────

#[test]
fn unit_commits_on_ok() {
    let db = Database::open_in_memory().unwrap();
    seed_account(&db, "a", 5);
    assert_eq!(balance_of(&db, "a"), 5);
}

#[test]
fn unit_rolls_back_on_err() {
    let db = Database::open_in_memory().unwrap();
    seed_account(&db, "a", 5);

    let result: Result<(), DbError> = db.unit(Deadline::none(), |u| {
        u.execute("UPDATE accounts SET balance = 100 WHERE id = 'a'", [])?;
        Err(DbError::Migration("forced failure".into()))
    });
    assert!(result.is_err());
    assert_eq!(balance_of(&db, "a"), 5);
}

#[test]
fn expired_deadline_rolls_back_completed_body() {
    let db = Database::open_in_memory().unwrap();
    seed_account(&db, "a", 5);

    let result: Result<(), DbError> = db.unit(Deadline::after(Duration::from_millis(20)), |u| {
        u.execute("UPDATE accounts SET balance = 100 WHERE id = 'a'", [])?;
        std::thread::sleep(Duration::from_millis(40));
        Ok(())
    });
    assert!(matches!(result, Err(DbError::DeadlineExceeded)));
    assert_eq!(balance_of(&db, "a"), 5);
}

#[test]
fn checkpoint_aborts_mid_unit() {
    let db = Database::open_in_memory().unwrap();
    seed_account(&db, "a", 5);

    let result: Result<(), DbError> = db.unit(Deadline::after(Duration::from_millis(10)), |u| {
        u.execute("UPDATE accounts SET balance = 7 WHERE id = 'a'", [])?;
        std::thread::sleep(Duration::from_millis(20));
        u.checkpoint()?;
        u.execute("UPDATE accounts SET balance = 9 WHERE id = 'a'", [])?;
        Ok(())
    });
    assert!(matches!(result, Err(DbError::DeadlineExceeded)));
    assert_eq!(balance_of(&db, "a"), 5);
}

#[test]
fn already_expired_deadline_never_runs_body() {
    let db = Database::open_in_memory().unwrap();
    let mut ran = false;
    let result: Result<(), DbError> = db.unit(Deadline::after(Duration::ZERO), |_| {
        ran = true;
        Ok(())
    });
    assert!(matches!(result, Err(DbError::DeadlineExceeded)));
    assert!(!ran);
}

#[test]
fn busy_database_surfaces_conflict_after_retries() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("ledger.db");
    let options = StoreOptions {
        busy_timeout_ms: 1,
        retry: RetryPolicy {
            max_attempts: 3,
            base_backoff_ms: 1,
            max_backoff_ms: 2,
        },
    };
    let db = Database::open_with_options(&path, options).unwrap();
    seed_account(&db, "a", 5);

    // A second connection grabs the write lock and keeps it.
    let blocker = rusqlite::Connection::open(&path).unwrap();
    blocker.execute_batch("BEGIN IMMEDIATE").unwrap();

    let mut attempts = Vec::new();
    let result: Result<(), DbError> = db.unit(Deadline::none(), |u| {
        attempts.push(u.attempt());
        Ok(())
    });
    assert!(matches!(result, Err(DbError::Conflict { attempts: 3 })));
    // The lock is taken at BEGIN, so the body never ran.
    assert!(attempts.is_empty());

    blocker.execute_batch("ROLLBACK").unwrap();
    let ok: Result<(), DbError> = db.unit(Deadline::none(), |_| Ok(()));
    assert!(ok.is_ok());
}

#[test]
fn retry_policy_backoff_is_bounded() {
    let policy = RetryPolicy {
        max_attempts: 10,
        base_backoff_ms: 10,
        max_backoff_ms: 40,
    };
    for retry in 1..10 {
        assert!(policy.backoff(retry) <= Duration::from_millis(40));
    }
    assert_eq!(RetryPolicy::no_retry().max_attempts, 1);
}

// ── Schema-level invariants ─────────────────────────────────────

#[test]
fn negative_balance_is_rejected() {
    let db = Database::open_in_memory().unwrap();
    seed_account(&db, "a", 5);
    let result: Result<usize, DbError> = db.unit(Deadline::none(), |u| {
        Ok(u.execute("UPDATE accounts SET balance = balance - 6 WHERE id = 'a'", [])?)
    });
    assert!(result.unwrap_err().is_constraint());
    assert_eq!(balance_of(&db, "a"), 5);
}

fn seed_transaction(db: &Database) {
    db.unit(Deadline::none(), |u| {
        u.execute(
            "INSERT INTO transactions
                (id, account_id, kind, amount, balance_before, balance_after, reason, created_at)
             VALUES ('t1', 'a', 'CREDIT', 5, 0, 5, 'ADMIN_ADJUSTMENT', 0)",
            [],
        )?;
        Ok::<_, DbError>(())
    })
    .unwrap();
}

#[test]
fn transactions_are_append_only() {
    let db = Database::open_in_memory().unwrap();
    seed_account(&db, "a", 5);
    seed_transaction(&db);

    let update: Result<usize, DbError> = db.unit(Deadline::none(), |u| {
        Ok(u.execute("UPDATE transactions SET amount = 1 WHERE id = 't1'", [])?)
    });
    assert!(update.unwrap_err().is_constraint());

    let delete: Result<usize, DbError> = db.unit(Deadline::none(), |u| {
        Ok(u.execute("DELETE FROM transactions WHERE id = 't1'", [])?)
    });
    assert!(delete.unwrap_err().is_constraint());
}

#[test]
fn transaction_arithmetic_is_checked() {
    let db = Database::open_in_memory().unwrap();
    seed_account(&db, "a", 5);
    let result: Result<usize, DbError> = db.unit(Deadline::none(), |u| {
        Ok(u.execute(
            "INSERT INTO transactions
                (id, account_id, kind, amount, balance_before, balance_after, reason, created_at)
             VALUES ('t2', 'a', 'DEBIT', 5, 10, 4, 'KEY_PURCHASE', 0)",
            [],
        )?)
    });
    assert!(result.unwrap_err().is_constraint());
}

#[test]
fn device_cap_trigger_limits_bindings() {
    let db = Database::open_in_memory().unwrap();
    seed_account(&db, "a", 5);
    seed_transaction(&db);
    db.unit(Deadline::none(), |u| {
        u.execute(
            "INSERT INTO keys (code, account_id, tier_id, price, device_limit, issued_at, expires_at, transaction_id)
             VALUES ('K1', 'a', '1h', 5, 1, 0, 10, 't1')",
            [],
        )?;
        u.execute(
            "INSERT INTO key_devices (key_code, device_id, first_bound_at, last_seen_at) VALUES ('K1', 'd1', 0, 0)",
            [],
        )?;
        Ok::<_, DbError>(())
    })
    .unwrap();

    let second: Result<usize, DbError> = db.unit(Deadline::none(), |u| {
        Ok(u.execute(
            "INSERT INTO key_devices (key_code, device_id, first_bound_at, last_seen_at) VALUES ('K1', 'd2', 0, 0)",
            [],
        )?)
    });
    assert!(second.unwrap_err().is_constraint());

    let reactivate: Result<(), DbError> = db.unit(Deadline::none(), |u| {
        u.execute("UPDATE keys SET active = 0 WHERE code = 'K1'", [])?;
        u.execute("UPDATE keys SET active = 1 WHERE code = 'K1'", [])?;
        Ok(())
    });
    assert!(reactivate.unwrap_err().is_constraint());

    let reprice: Result<usize, DbError> = db.unit(Deadline::none(), |u| {
        Ok(u.execute("UPDATE keys SET price = 1 WHERE code = 'K1'", [])?)
    });
    assert!(reprice.unwrap_err().is_constraint());
}

#[test]
fn revocation_timestamp_is_write_once() {
    let db = Database::open_in_memory().unwrap();
    seed_account(&db, "a", 5);
    seed_transaction(&db);
    db.unit(Deadline::none(), |u| {
        u.execute(
            "INSERT INTO keys (code, account_id, tier_id, price, device_limit, issued_at, expires_at, transaction_id)
             VALUES ('K1', 'a', '1h', 5, 1, 0, 10, 't1')",
            [],
        )?;
        u.execute("UPDATE keys SET active = 0, revoked_at = 3 WHERE code = 'K1'", [])?;
        Ok::<_, DbError>(())
    })
    .unwrap();

    let rewrite: Result<usize, DbError> = db.unit(Deadline::none(), |u| {
        Ok(u.execute("UPDATE keys SET revoked_at = 7 WHERE code = 'K1'", [])?)
    });
    assert!(rewrite.unwrap_err().is_constraint());

    let revoked_at: Option<i64> = db
        .read(|conn| {
            conn.query_row("SELECT revoked_at FROM keys WHERE code = 'K1'", [], |r| r.get(0))
                .map_err(DbError::from)
        })
        .unwrap();
    assert_eq!(revoked_at, Some(3));
}
