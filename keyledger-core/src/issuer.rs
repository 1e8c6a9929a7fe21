//! Key issuance: price lookup, balance debit and key creation as one unit.

use crate::account::{AccountLedger, Posting, Transaction, TransactionKind, TransactionReason};
use crate::codegen::CodeGenerator;
use crate::error::{LedgerError, LedgerResult};
use crate::key::{KEY_COLUMNS, Key, KeyStatusFilter, MAX_DEVICE_LIMIT, MIN_DEVICE_LIMIT, load_key};
use crate::token::KeySigner;
use keyledger_db::{Deadline, Unit};
use keyledger_types::{AccountId, KeyCode, PricingCatalog};
use rusqlite::params;
use std::sync::Arc;
use tracing::{debug, error, info};

/// Result of a successful issuance.
#[derive(Debug, Clone)]
pub struct IssuedKey {
    pub key: Key,
    /// Signed token carrying the key's terms.
    pub token: String,
    /// The debit that paid for the key.
    pub transaction: Transaction,
}

/// Sells keys against account balances.
#[derive(Clone, Debug)]
pub struct KeyIssuer {
    accounts: AccountLedger,
    catalog: Arc<PricingCatalog>,
    generator: CodeGenerator,
    signer: Arc<KeySigner>,
}

impl KeyIssuer {
    #[must_use]
    pub fn new(
        accounts: AccountLedger,
        catalog: Arc<PricingCatalog>,
        generator: CodeGenerator,
        signer: Arc<KeySigner>,
    ) -> Self {
        Self {
            accounts,
            catalog,
            generator,
            signer,
        }
    }

    /// The catalog prices are read from.
    #[must_use]
    pub fn catalog(&self) -> &PricingCatalog {
        &self.catalog
    }

    /// Issues a key of `tier_id` to `account`, debiting the tier price.
    ///
    /// Either the debit, its transaction record and the key all exist
    /// afterwards, or none of them do.
    pub fn issue(
        &self,
        account: &AccountId,
        tier_id: &str,
        device_limit: u32,
        deadline: Deadline,
    ) -> LedgerResult<IssuedKey> {
        let tier = self
            .catalog
            .get(tier_id)
            .ok_or_else(|| LedgerError::Validation(format!("unknown pricing tier: {tier_id}")))?;
        if !(MIN_DEVICE_LIMIT..=MAX_DEVICE_LIMIT).contains(&device_limit) {
            return Err(LedgerError::Validation(format!(
                "device limit must be between {MIN_DEVICE_LIMIT} and {MAX_DEVICE_LIMIT}, got {device_limit}"
            )));
        }

        let result: LedgerResult<_> = self.accounts.db().unit(deadline, |unit| {
            let now = self.accounts.clock().now();
            let expires_at = now
                .checked_add_millis(tier.duration_millis)
                .ok_or_else(|| LedgerError::Validation("tier duration out of range".into()))?;
            let code = self
                .generator
                .generate_unique(|candidate| code_taken(unit, candidate))?;
            let code = KeyCode::parse(&code)?;
            unit.checkpoint()?;

            let memo = format!("Generated {} key", tier.id);
            let posting = Posting::new(TransactionReason::KeyPurchase, &memo)
                .referencing(code.as_str());
            let transaction =
                self.accounts
                    .post_in(unit, account, TransactionKind::Debit, tier.price, posting, now)?;

            unit.execute(
                &format!("INSERT INTO keys ({KEY_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 1, ?8, NULL)"),
                params![
                    code.as_str(),
                    account.to_string(),
                    tier.id,
                    tier.price,
                    device_limit,
                    now.as_millis(),
                    expires_at.as_millis(),
                    transaction.id.to_string(),
                ],
            )?;
            let key = Key {
                code,
                account_id: *account,
                tier_id: tier.id.clone(),
                price: tier.price,
                device_limit,
                issued_at: now,
                expires_at,
                active: true,
                transaction_id: transaction.id,
                revoked_at: None,
                bound_devices: Vec::new(),
            };
            Ok((key, transaction))
        });

        match result {
            Ok((key, transaction)) => {
                info!(
                    account_id = %account,
                    key_code = %key.code,
                    tier = %key.tier_id,
                    price = key.price,
                    balance = transaction.balance_after,
                    "Issued key"
                );
                let token = self.signer.sign(&key);
                Ok(IssuedKey {
                    key,
                    token,
                    transaction,
                })
            }
            Err(err) => {
                if err.is_fatal() {
                    error!(account_id = %account, tier = tier_id, error = %err, "Key issuance failed");
                } else {
                    debug!(account_id = %account, tier = tier_id, error = %err, "Key issuance rejected");
                }
                Err(err)
            }
        }
    }

    /// Loads a key with its bound devices.
    pub fn key(&self, code: &KeyCode) -> LedgerResult<Key> {
        self.accounts
            .db()
            .read(|conn| load_key(conn, code)?.ok_or(LedgerError::InvalidKey))
    }

    /// Lists an account's keys, newest first.
    pub fn keys_for(&self, account: &AccountId, filter: KeyStatusFilter) -> LedgerResult<Vec<Key>> {
        let now = self.accounts.clock().now().as_millis();
        let condition = match filter {
            KeyStatusFilter::All => "",
            KeyStatusFilter::Active => " AND active = 1 AND expires_at > ?2",
            KeyStatusFilter::Expired => " AND (active = 0 OR expires_at <= ?2)",
        };
        let sql = format!(
            "SELECT {KEY_COLUMNS} FROM keys WHERE account_id = ?1{condition} ORDER BY issued_at DESC, rowid DESC"
        );
        self.accounts.db().read(|conn| {
            let mut stmt = conn.prepare(&sql)?;
            let account_key = account.to_string();
            let rows = if matches!(filter, KeyStatusFilter::All) {
                stmt.query_map(params![account_key], Key::from_row)?
                    .collect::<rusqlite::Result<Vec<_>>>()?
            } else {
                stmt.query_map(params![account_key, now], Key::from_row)?
                    .collect::<rusqlite::Result<Vec<_>>>()?
            };
            rows.into_iter()
                .map(|mut key| -> LedgerResult<Key> {
                    key.bound_devices = crate::device::load_devices(conn, key.code.as_str())?;
                    Ok(key)
                })
                .collect()
        })
    }

    /// Revokes a key. When `owner` is given the key must belong to it.
    ///
    /// Revocation is permanent and stamps `revoked_at`, so validation keeps
    /// answering [`LedgerError::InvalidKey`] after the key's term runs out.
    /// A second call is a no-op returning the already inactive key.
    pub fn deactivate(
        &self,
        owner: Option<&AccountId>,
        code: &KeyCode,
        deadline: Deadline,
    ) -> LedgerResult<Key> {
        let key: LedgerResult<Key> = self.accounts.db().unit(deadline, |unit| {
            let key = load_key(unit, code)?.ok_or(LedgerError::InvalidKey)?;
            if owner.is_some_and(|owner| owner != &key.account_id) {
                return Err(LedgerError::InvalidKey);
            }
            let now = self.accounts.clock().now();
            let revoked = unit.execute(
                "UPDATE keys SET active = 0, revoked_at = ?2 WHERE code = ?1 AND active = 1",
                params![code.as_str(), now.as_millis()],
            )?;
            let revoked_at = if revoked == 1 { Some(now) } else { key.revoked_at };
            Ok(Key {
                active: false,
                revoked_at,
                ..key
            })
        });
        let key = key?;
        info!(key_code = %code, account_id = %key.account_id, "Deactivated key");
        Ok(key)
    }
}

fn code_taken(unit: &Unit<'_>, candidate: &str) -> LedgerResult<bool> {
    Ok(unit.query_row(
        "SELECT EXISTS(SELECT 1 FROM keys WHERE code = ?1)",
        [candidate],
        |r| r.get(0),
    )?)
}
