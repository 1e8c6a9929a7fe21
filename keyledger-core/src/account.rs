//! Account balances and the append-only transaction log.
//!
//! Every balance change goes through [`AccountLedger::post_in`], which runs
//! inside a caller's unit of work and writes the guarded balance update and
//! its transaction record together.

use crate::error::{LedgerError, LedgerResult};
use crate::sql;
use keyledger_db::{Database, Deadline, Unit};
use keyledger_types::{AccountId, Clock, Timestamp, TransactionId};
use rusqlite::types::Value;
use rusqlite::{OptionalExtension, Row, params, params_from_iter};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, info};

const TRANSACTION_COLUMNS: &str = "id, account_id, kind, amount, balance_before, balance_after, \
                                   reason, memo, reference_id, created_at";

/// Direction of a balance movement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TransactionKind {
    Debit,
    Credit,
}

impl TransactionKind {
    /// Stored representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Debit => "DEBIT",
            Self::Credit => "CREDIT",
        }
    }
}

/// Why a balance moved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionReason {
    KeyPurchase,
    CodeRedemption,
    AdminAdjustment,
}

impl TransactionReason {
    /// Stored representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::KeyPurchase => "KEY_PURCHASE",
            Self::CodeRedemption => "CODE_REDEMPTION",
            Self::AdminAdjustment => "ADMIN_ADJUSTMENT",
        }
    }
}

/// Error for unrecognised stored enum values.
#[derive(Debug, thiserror::Error)]
#[error("unknown {kind}: {value}")]
pub struct UnknownVariant {
    kind: &'static str,
    value: String,
}

impl FromStr for TransactionKind {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "DEBIT" => Ok(Self::Debit),
            "CREDIT" => Ok(Self::Credit),
            other => Err(UnknownVariant {
                kind: "transaction kind",
                value: other.to_string(),
            }),
        }
    }
}

impl FromStr for TransactionReason {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "KEY_PURCHASE" => Ok(Self::KeyPurchase),
            "CODE_REDEMPTION" => Ok(Self::CodeRedemption),
            "ADMIN_ADJUSTMENT" => Ok(Self::AdminAdjustment),
            other => Err(UnknownVariant {
                kind: "transaction reason",
                value: other.to_string(),
            }),
        }
    }
}

impl fmt::Display for TransactionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A prepaid account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Account {
    pub id: AccountId,
    /// Balance in minor currency units. Never negative.
    pub balance: i64,
    pub created_at: Timestamp,
}

/// One immutable entry of the transaction log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    pub id: TransactionId,
    pub account_id: AccountId,
    pub kind: TransactionKind,
    /// Always positive.
    pub amount: i64,
    pub balance_before: i64,
    pub balance_after: i64,
    pub reason: TransactionReason,
    pub memo: String,
    /// Key code or referral code this entry paid for or came from.
    pub reference_id: Option<String>,
    pub created_at: Timestamp,
}

impl Transaction {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: sql::parsed(row, 0)?,
            account_id: sql::parsed(row, 1)?,
            kind: sql::parsed(row, 2)?,
            amount: row.get(3)?,
            balance_before: row.get(4)?,
            balance_after: row.get(5)?,
            reason: sql::parsed(row, 6)?,
            memo: row.get(7)?,
            reference_id: row.get(8)?,
            created_at: Timestamp::from_millis(row.get(9)?),
        })
    }
}

/// Description attached to a balance movement.
#[derive(Debug, Clone, Copy)]
pub struct Posting<'a> {
    pub reason: TransactionReason,
    pub memo: &'a str,
    pub reference_id: Option<&'a str>,
}

impl<'a> Posting<'a> {
    /// A posting with a memo and no reference.
    #[must_use]
    pub fn new(reason: TransactionReason, memo: &'a str) -> Self {
        Self {
            reason,
            memo,
            reference_id: None,
        }
    }

    /// Attaches the id of the key or code this posting relates to.
    #[must_use]
    pub fn referencing(mut self, reference_id: &'a str) -> Self {
        self.reference_id = Some(reference_id);
        self
    }
}

/// Query for [`AccountLedger::history`]. Newest entries come first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TransactionFilter {
    pub kind: Option<TransactionKind>,
    pub reason: Option<TransactionReason>,
    /// Inclusive lower bound on `created_at`.
    pub since: Option<Timestamp>,
    /// Exclusive upper bound on `created_at`.
    pub until: Option<Timestamp>,
    pub limit: u32,
    pub offset: u32,
}

impl TransactionFilter {
    /// Largest page a single query returns.
    pub const MAX_LIMIT: u32 = 100;
}

impl Default for TransactionFilter {
    fn default() -> Self {
        Self {
            kind: None,
            reason: None,
            since: None,
            until: None,
            limit: 20,
            offset: 0,
        }
    }
}

/// Reconciliation of an account's balance against its log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BalanceAudit {
    pub balance: i64,
    pub total_credits: i64,
    pub total_debits: i64,
    pub transactions: u64,
}

impl BalanceAudit {
    /// True when the balance equals credits minus debits.
    #[must_use]
    pub fn is_consistent(&self) -> bool {
        self.total_credits - self.total_debits == self.balance
    }
}

/// Owns account balances and the transaction log.
#[derive(Clone)]
pub struct AccountLedger {
    db: Database,
    clock: Arc<dyn Clock>,
}

impl AccountLedger {
    /// Creates a ledger over `db`.
    #[must_use]
    pub fn new(db: Database, clock: Arc<dyn Clock>) -> Self {
        Self { db, clock }
    }

    /// The store this ledger writes to.
    #[must_use]
    pub fn db(&self) -> &Database {
        &self.db
    }

    /// The clock used to stamp entries.
    #[must_use]
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Opens an account with a zero balance. A fresh id is assigned when
    /// `id` is `None`.
    pub fn open_account(&self, id: Option<AccountId>, deadline: Deadline) -> LedgerResult<Account> {
        let id = id.unwrap_or_default();
        let account = self.db.unit(deadline, |unit| {
            let exists: bool = unit.query_row(
                "SELECT EXISTS(SELECT 1 FROM accounts WHERE id = ?1)",
                [id.to_string()],
                |r| r.get(0),
            )?;
            if exists {
                return Err(LedgerError::AccountExists(id));
            }
            let now = self.clock.now();
            unit.execute(
                "INSERT INTO accounts (id, balance, created_at) VALUES (?1, 0, ?2)",
                params![id.to_string(), now.as_millis()],
            )?;
            Ok(Account {
                id,
                balance: 0,
                created_at: now,
            })
        })?;
        info!(account_id = %account.id, "Opened account");
        Ok(account)
    }

    /// Loads an account.
    pub fn account(&self, id: &AccountId) -> LedgerResult<Account> {
        self.db.read(|conn| {
            conn.query_row(
                "SELECT balance, created_at FROM accounts WHERE id = ?1",
                [id.to_string()],
                |r| {
                    Ok(Account {
                        id: *id,
                        balance: r.get(0)?,
                        created_at: Timestamp::from_millis(r.get(1)?),
                    })
                },
            )
            .optional()?
            .ok_or(LedgerError::AccountNotFound(*id))
        })
    }

    /// Current balance of an account.
    pub fn balance(&self, id: &AccountId) -> LedgerResult<i64> {
        Ok(self.account(id)?.balance)
    }

    /// Debits `amount` in its own unit of work.
    pub fn debit(
        &self,
        account: &AccountId,
        amount: i64,
        posting: Posting<'_>,
        deadline: Deadline,
    ) -> LedgerResult<Transaction> {
        self.db.unit(deadline, |unit| {
            let now = self.clock.now();
            self.debit_in(unit, account, amount, posting, now)
        })
    }

    /// Credits `amount` in its own unit of work.
    pub fn credit(
        &self,
        account: &AccountId,
        amount: i64,
        posting: Posting<'_>,
        deadline: Deadline,
    ) -> LedgerResult<Transaction> {
        self.db.unit(deadline, |unit| {
            let now = self.clock.now();
            self.credit_in(unit, account, amount, posting, now)
        })
    }

    /// Applies a signed administrative adjustment: positive credits,
    /// negative debits.
    pub fn adjust(
        &self,
        account: &AccountId,
        delta: i64,
        memo: &str,
        deadline: Deadline,
    ) -> LedgerResult<Transaction> {
        let (kind, amount) = match delta {
            0 => return Err(LedgerError::Validation("adjustment must be non-zero".into())),
            d if d > 0 => (TransactionKind::Credit, d),
            d => (
                TransactionKind::Debit,
                d.checked_neg()
                    .ok_or_else(|| LedgerError::Validation("adjustment out of range".into()))?,
            ),
        };
        let posting = Posting::new(TransactionReason::AdminAdjustment, memo);
        let tx = self.db.unit(deadline, |unit| {
            let now = self.clock.now();
            self.post_in(unit, account, kind, amount, posting, now)
        })?;
        info!(account_id = %account, delta, balance = tx.balance_after, "Applied balance adjustment");
        Ok(tx)
    }

    /// Debits inside an open unit of work.
    pub fn debit_in(
        &self,
        unit: &Unit<'_>,
        account: &AccountId,
        amount: i64,
        posting: Posting<'_>,
        now: Timestamp,
    ) -> LedgerResult<Transaction> {
        self.post_in(unit, account, TransactionKind::Debit, amount, posting, now)
    }

    /// Credits inside an open unit of work.
    pub fn credit_in(
        &self,
        unit: &Unit<'_>,
        account: &AccountId,
        amount: i64,
        posting: Posting<'_>,
        now: Timestamp,
    ) -> LedgerResult<Transaction> {
        self.post_in(unit, account, TransactionKind::Credit, amount, posting, now)
    }

    /// Moves the balance and appends the matching log entry.
    ///
    /// The debit update is guarded by `balance >= amount`, so it can never
    /// drive a balance negative even if the earlier read were stale.
    pub(crate) fn post_in(
        &self,
        unit: &Unit<'_>,
        account: &AccountId,
        kind: TransactionKind,
        amount: i64,
        posting: Posting<'_>,
        now: Timestamp,
    ) -> LedgerResult<Transaction> {
        if amount <= 0 {
            return Err(LedgerError::Validation(format!(
                "amount must be positive, got {amount}"
            )));
        }
        let account_key = account.to_string();
        let before: i64 = unit
            .query_row(
                "SELECT balance FROM accounts WHERE id = ?1",
                [&account_key],
                |r| r.get(0),
            )
            .optional()?
            .ok_or(LedgerError::AccountNotFound(*account))?;

        let (after, changed) = match kind {
            TransactionKind::Debit => {
                if before < amount {
                    return Err(LedgerError::InsufficientBalance {
                        required: amount,
                        available: before,
                    });
                }
                let changed = unit.execute(
                    "UPDATE accounts SET balance = balance - ?2 WHERE id = ?1 AND balance >= ?2",
                    params![account_key, amount],
                )?;
                (before - amount, changed)
            }
            TransactionKind::Credit => {
                let after = before
                    .checked_add(amount)
                    .ok_or_else(|| LedgerError::Validation("balance overflow".into()))?;
                let changed = unit.execute(
                    "UPDATE accounts SET balance = balance + ?2 WHERE id = ?1",
                    params![account_key, amount],
                )?;
                (after, changed)
            }
        };
        if changed != 1 {
            return Err(LedgerError::InsufficientBalance {
                required: amount,
                available: before,
            });
        }

        let tx = Transaction {
            id: TransactionId::new(),
            account_id: *account,
            kind,
            amount,
            balance_before: before,
            balance_after: after,
            reason: posting.reason,
            memo: posting.memo.to_string(),
            reference_id: posting.reference_id.map(str::to_string),
            created_at: now,
        };
        unit.execute(
            &format!("INSERT INTO transactions ({TRANSACTION_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)"),
            params![
                tx.id.to_string(),
                account_key,
                kind.as_str(),
                amount,
                before,
                after,
                tx.reason.as_str(),
                tx.memo,
                tx.reference_id,
                now.as_millis(),
            ],
        )?;
        debug!(
            account_id = %account,
            kind = kind.as_str(),
            amount,
            balance = after,
            reason = %tx.reason,
            "Posted transaction"
        );
        Ok(tx)
    }

    /// Lists an account's transactions, newest first.
    pub fn history(
        &self,
        account: &AccountId,
        filter: &TransactionFilter,
    ) -> LedgerResult<Vec<Transaction>> {
        let mut sql = format!("SELECT {TRANSACTION_COLUMNS} FROM transactions WHERE account_id = ?");
        let mut args = vec![Value::Text(account.to_string())];
        if let Some(kind) = filter.kind {
            sql.push_str(" AND kind = ?");
            args.push(Value::Text(kind.as_str().to_string()));
        }
        if let Some(reason) = filter.reason {
            sql.push_str(" AND reason = ?");
            args.push(Value::Text(reason.as_str().to_string()));
        }
        if let Some(since) = filter.since {
            sql.push_str(" AND created_at >= ?");
            args.push(Value::Integer(since.as_millis()));
        }
        if let Some(until) = filter.until {
            sql.push_str(" AND created_at < ?");
            args.push(Value::Integer(until.as_millis()));
        }
        sql.push_str(" ORDER BY created_at DESC, id DESC LIMIT ? OFFSET ?");
        args.push(Value::Integer(i64::from(
            filter.limit.clamp(1, TransactionFilter::MAX_LIMIT),
        )));
        args.push(Value::Integer(i64::from(filter.offset)));

        self.db.read(|conn| {
            self.ensure_exists(conn, account)?;
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(params_from_iter(args.iter()), Transaction::from_row)?;
            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        })
    }

    /// Reconciles the balance against the sum of the log.
    pub fn audit(&self, account: &AccountId) -> LedgerResult<BalanceAudit> {
        self.db.read(|conn| {
            let balance: i64 = conn
                .query_row(
                    "SELECT balance FROM accounts WHERE id = ?1",
                    [account.to_string()],
                    |r| r.get(0),
                )
                .optional()?
                .ok_or(LedgerError::AccountNotFound(*account))?;
            let (total_credits, total_debits, transactions): (i64, i64, i64) = conn.query_row(
                "SELECT
                    COALESCE(SUM(CASE WHEN kind = 'CREDIT' THEN amount END), 0),
                    COALESCE(SUM(CASE WHEN kind = 'DEBIT' THEN amount END), 0),
                    COUNT(*)
                 FROM transactions WHERE account_id = ?1",
                [account.to_string()],
                |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
            )?;
            Ok(BalanceAudit {
                balance,
                total_credits,
                total_debits,
                transactions: u64::try_from(transactions).unwrap_or_default(),
            })
        })
    }

    fn ensure_exists(&self, conn: &rusqlite::Connection, account: &AccountId) -> LedgerResult<()> {
        let exists: bool = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM accounts WHERE id = ?1)",
            [account.to_string()],
            |r| r.get(0),
        )?;
        if exists {
            Ok(())
        } else {
            Err(LedgerError::AccountNotFound(*account))
        }
    }
}

impl fmt::Debug for AccountLedger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccountLedger").finish_non_exhaustive()
    }
}
