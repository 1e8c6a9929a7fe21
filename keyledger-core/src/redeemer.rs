//! Referral codes: creation, listing and redemption for balance credit.

use crate::account::{AccountLedger, Posting, Transaction, TransactionKind, TransactionReason};
use crate::codegen::CodeGenerator;
use crate::error::{LedgerError, LedgerResult};
use crate::sql;
use keyledger_db::{Deadline, Unit};
use keyledger_types::{AccountId, CodeValue, Timestamp, TransactionId};
use rusqlite::{OptionalExtension, Row, params};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

const CODE_COLUMNS: &str =
    "code, amount, usage_limit, uses_consumed, expires_at, created_at, created_by";

/// Whether one account may redeem the same code more than once.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RedemptionPolicy {
    /// Each account redeems a given code at most once.
    #[default]
    OncePerAccount,
    /// Only the code's usage limit applies.
    Unrestricted,
}

/// A referral code granting balance credit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReferralCode {
    pub code: CodeValue,
    /// Credit granted per redemption.
    pub amount: i64,
    pub usage_limit: u32,
    pub uses_consumed: u32,
    pub expires_at: Option<Timestamp>,
    pub created_at: Timestamp,
    pub created_by: Option<AccountId>,
}

impl ReferralCode {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            code: sql::parsed(row, 0)?,
            amount: row.get(1)?,
            usage_limit: sql::count(row, 2)?,
            uses_consumed: sql::count(row, 3)?,
            expires_at: row.get::<_, Option<i64>>(4)?.map(Timestamp::from_millis),
            created_at: Timestamp::from_millis(row.get(5)?),
            created_by: sql::parsed_opt(row, 6)?,
        })
    }

    #[must_use]
    pub fn uses_remaining(&self) -> u32 {
        self.usage_limit.saturating_sub(self.uses_consumed)
    }

    #[must_use]
    pub fn is_exhausted(&self) -> bool {
        self.uses_consumed >= self.usage_limit
    }

    #[must_use]
    pub fn is_expired_at(&self, now: Timestamp) -> bool {
        self.expires_at.is_some_and(|at| now >= at)
    }
}

/// One recorded redemption.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Redemption {
    pub code: CodeValue,
    pub account_id: AccountId,
    pub transaction_id: TransactionId,
    pub amount: i64,
    pub redeemed_at: Timestamp,
}

/// Result of a successful redemption.
#[derive(Debug, Clone)]
pub struct Redeemed {
    pub code: CodeValue,
    pub amount_credited: i64,
    pub new_balance: i64,
    pub transaction: Transaction,
}

/// Terms for a new referral code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewCode {
    pub amount: i64,
    pub usage_limit: u32,
    #[serde(default)]
    pub expires_at: Option<Timestamp>,
    #[serde(default)]
    pub created_by: Option<AccountId>,
}

/// Redeems referral codes into account credit.
#[derive(Clone, Debug)]
pub struct CodeRedeemer {
    accounts: AccountLedger,
    generator: CodeGenerator,
    policy: RedemptionPolicy,
}

impl CodeRedeemer {
    #[must_use]
    pub fn new(accounts: AccountLedger, generator: CodeGenerator, policy: RedemptionPolicy) -> Self {
        Self {
            accounts,
            generator,
            policy,
        }
    }

    #[must_use]
    pub fn policy(&self) -> RedemptionPolicy {
        self.policy
    }

    /// Redeems `code` for `account`.
    ///
    /// The usage counter is incremented with a guarded update, so a code
    /// with usage limit M is redeemed exactly M times no matter how many
    /// callers race for it.
    pub fn redeem(
        &self,
        account: &AccountId,
        code: &CodeValue,
        deadline: Deadline,
    ) -> LedgerResult<Redeemed> {
        let result: LedgerResult<_> = self.accounts.db().unit(deadline, |unit| {
            let now = self.accounts.clock().now();
            let terms = unit
                .query_row(
                    "SELECT amount, expires_at FROM referral_codes WHERE code = ?1",
                    [code.as_str()],
                    |r| Ok((r.get::<_, i64>(0)?, r.get::<_, Option<i64>>(1)?)),
                )
                .optional()?;
            let Some((amount, expires_at)) = terms else {
                return Err(LedgerError::InvalidCode);
            };
            if let Some(at) = expires_at.map(Timestamp::from_millis) {
                if now >= at {
                    return Err(LedgerError::CodeExpired(at));
                }
            }

            let claimed = unit.execute(
                "UPDATE referral_codes SET uses_consumed = uses_consumed + 1
                 WHERE code = ?1 AND uses_consumed < usage_limit",
                [code.as_str()],
            )?;
            if claimed == 0 {
                return Err(LedgerError::CodeExhausted);
            }
            if self.policy == RedemptionPolicy::OncePerAccount
                && already_redeemed(unit, code, account)?
            {
                return Err(LedgerError::AlreadyRedeemed);
            }

            let memo = format!("Redeemed referral code {code}");
            let posting =
                Posting::new(TransactionReason::CodeRedemption, &memo).referencing(code.as_str());
            let transaction =
                self.accounts
                    .post_in(unit, account, TransactionKind::Credit, amount, posting, now)?;
            unit.execute(
                "INSERT INTO code_redemptions (code, account_id, transaction_id, redeemed_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    code.as_str(),
                    account.to_string(),
                    transaction.id.to_string(),
                    now.as_millis()
                ],
            )?;
            Ok(transaction)
        });

        match result {
            Ok(transaction) => {
                info!(
                    account_id = %account,
                    code = %code,
                    amount = transaction.amount,
                    balance = transaction.balance_after,
                    "Redeemed referral code"
                );
                Ok(Redeemed {
                    code: code.clone(),
                    amount_credited: transaction.amount,
                    new_balance: transaction.balance_after,
                    transaction,
                })
            }
            Err(err) => {
                if err.is_fatal() {
                    error!(account_id = %account, code = %code, error = %err, "Code redemption failed");
                } else {
                    debug!(account_id = %account, code = %code, error = %err, "Code redemption rejected");
                }
                Err(err)
            }
        }
    }

    /// Creates a referral code with a generated value.
    pub fn create_code(&self, terms: &NewCode, deadline: Deadline) -> LedgerResult<ReferralCode> {
        if terms.amount <= 0 {
            return Err(LedgerError::Validation(format!(
                "code amount must be positive, got {}",
                terms.amount
            )));
        }
        if terms.usage_limit == 0 {
            return Err(LedgerError::Validation("usage limit must be at least 1".into()));
        }

        let created = self.accounts.db().unit(deadline, |unit| {
            let now = self.accounts.clock().now();
            if terms.expires_at.is_some_and(|at| at <= now) {
                return Err(LedgerError::Validation("expiry must be in the future".into()));
            }
            if let Some(creator) = &terms.created_by {
                let exists: bool = unit.query_row(
                    "SELECT EXISTS(SELECT 1 FROM accounts WHERE id = ?1)",
                    [creator.to_string()],
                    |r| r.get(0),
                )?;
                if !exists {
                    return Err(LedgerError::AccountNotFound(*creator));
                }
            }
            let value = self
                .generator
                .generate_unique(|candidate| code_taken(unit, candidate))?;
            let code = CodeValue::parse(&value)?;
            unit.execute(
                &format!("INSERT INTO referral_codes ({CODE_COLUMNS}) VALUES (?1, ?2, ?3, 0, ?4, ?5, ?6)"),
                params![
                    code.as_str(),
                    terms.amount,
                    terms.usage_limit,
                    terms.expires_at.map(|at| at.as_millis()),
                    now.as_millis(),
                    terms.created_by.map(|id| id.to_string()),
                ],
            )?;
            Ok(ReferralCode {
                code,
                amount: terms.amount,
                usage_limit: terms.usage_limit,
                uses_consumed: 0,
                expires_at: terms.expires_at,
                created_at: now,
                created_by: terms.created_by,
            })
        })?;
        info!(
            code = %created.code,
            amount = created.amount,
            usage_limit = created.usage_limit,
            "Created referral code"
        );
        Ok(created)
    }

    /// Loads a referral code.
    pub fn code(&self, code: &CodeValue) -> LedgerResult<ReferralCode> {
        self.accounts.db().read(|conn| {
            conn.query_row(
                &format!("SELECT {CODE_COLUMNS} FROM referral_codes WHERE code = ?1"),
                [code.as_str()],
                ReferralCode::from_row,
            )
            .optional()?
            .ok_or(LedgerError::InvalidCode)
        })
    }

    /// Codes that can still be redeemed, optionally only those worth at
    /// least `min_amount`. Newest first.
    pub fn active_codes(&self, min_amount: Option<i64>) -> LedgerResult<Vec<ReferralCode>> {
        let now = self.accounts.clock().now().as_millis();
        self.accounts.db().read(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {CODE_COLUMNS} FROM referral_codes
                 WHERE uses_consumed < usage_limit
                   AND (expires_at IS NULL OR expires_at > ?1)
                   AND amount >= ?2
                 ORDER BY created_at DESC, rowid DESC"
            ))?;
            let rows = stmt.query_map(params![now, min_amount.unwrap_or(0)], ReferralCode::from_row)?;
            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        })
    }

    /// An account's redemptions, newest first.
    pub fn redemptions_for(&self, account: &AccountId) -> LedgerResult<Vec<Redemption>> {
        self.accounts.db().read(|conn| {
            let mut stmt = conn.prepare(
                "SELECT r.code, r.account_id, r.transaction_id, t.amount, r.redeemed_at
                 FROM code_redemptions r
                 JOIN transactions t ON t.id = r.transaction_id
                 WHERE r.account_id = ?1
                 ORDER BY r.redeemed_at DESC, r.rowid DESC",
            )?;
            let rows = stmt.query_map([account.to_string()], |r| {
                Ok(Redemption {
                    code: sql::parsed(r, 0)?,
                    account_id: sql::parsed(r, 1)?,
                    transaction_id: sql::parsed(r, 2)?,
                    amount: r.get(3)?,
                    redeemed_at: Timestamp::from_millis(r.get(4)?),
                })
            })?;
            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        })
    }
}

fn code_taken(unit: &Unit<'_>, candidate: &str) -> LedgerResult<bool> {
    Ok(unit.query_row(
        "SELECT EXISTS(SELECT 1 FROM referral_codes WHERE code = ?1)",
        [candidate],
        |r| r.get(0),
    )?)
}

fn already_redeemed(unit: &Unit<'_>, code: &CodeValue, account: &AccountId) -> LedgerResult<bool> {
    Ok(unit.query_row(
        "SELECT EXISTS(SELECT 1 FROM code_redemptions WHERE code = ?1 AND account_id = ?2)",
        params![code.as_str(), account.to_string()],
        |r| r.get(0),
    )?)
}
