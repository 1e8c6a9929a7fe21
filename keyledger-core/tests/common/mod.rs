//! Shared test helpers for ledger tests.

#![allow(dead_code)]

use keyledger_core::{
    Account, Database, Deadline, KeyLedger, KeySigner, LedgerConfig, NewCode, OsRandom,
    RandomSource, ReferralCode,
};
use keyledger_types::{AccountId, ManualClock, PricingCatalog, PricingTier, Timestamp};
use std::sync::Arc;

pub const HOUR: i64 = 60 * 60 * 1000;
pub const START: i64 = 1_700_000_000_000;

/// Returns a deterministic signer from a fixed seed.
pub fn test_signer() -> KeySigner {
    let seed: [u8; 32] = [
        1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15, 16, 17, 18, 19, 20, 21, 22, 23, 24,
        25, 26, 27, 28, 29, 30, 31, 32,
    ];
    KeySigner::from_seed(seed)
}

/// A small catalog: `basic` costs 50 for one hour, `pro` costs 10 for a day.
pub fn test_catalog() -> PricingCatalog {
    PricingCatalog::new(vec![
        PricingTier::new("basic", 50, HOUR),
        PricingTier::new("pro", 10, 24 * HOUR),
    ])
    .unwrap()
}

/// Random source that always yields zero bytes, so every candidate code of
/// a given length is the same.
pub struct ZeroRandom;

impl RandomSource for ZeroRandom {
    fn fill(&self, buf: &mut [u8]) {
        buf.fill(0);
    }
}

/// A ledger over an in-memory store with a manual clock.
pub struct Harness {
    pub ledger: KeyLedger,
    pub clock: Arc<ManualClock>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(&LedgerConfig::default())
    }

    pub fn with_config(config: &LedgerConfig) -> Self {
        Self::build(Database::open_in_memory().unwrap(), config, Arc::new(OsRandom))
    }

    pub fn with_random(random: Arc<dyn RandomSource>) -> Self {
        Self::build(
            Database::open_in_memory().unwrap(),
            &LedgerConfig::default(),
            random,
        )
    }

    pub fn over(db: Database, config: &LedgerConfig) -> Self {
        Self::build(db, config, Arc::new(OsRandom))
    }

    fn build(db: Database, config: &LedgerConfig, random: Arc<dyn RandomSource>) -> Self {
        let clock = Arc::new(ManualClock::new(Timestamp::from_millis(START)));
        let ledger = KeyLedger::with_parts(
            db,
            test_catalog(),
            test_signer(),
            config,
            clock.clone(),
            random,
        );
        Self { ledger, clock }
    }

    /// Opens an account and credits it with `balance`.
    pub fn funded_account(&self, balance: i64) -> Account {
        let accounts = self.ledger.accounts();
        let account = accounts.open_account(None, Deadline::none()).unwrap();
        if balance > 0 {
            accounts
                .adjust(&account.id, balance, "test funding", Deadline::none())
                .unwrap();
        }
        accounts.account(&account.id).unwrap()
    }

    pub fn balance(&self, id: &AccountId) -> i64 {
        self.ledger.accounts().balance(id).unwrap()
    }

    /// Creates a code worth `amount` redeemable `usage_limit` times.
    pub fn code(&self, amount: i64, usage_limit: u32) -> ReferralCode {
        self.ledger
            .redeemer()
            .create_code(
                &NewCode {
                    amount,
                    usage_limit,
                    expires_at: None,
                    created_by: None,
                },
                Deadline::none(),
            )
            .unwrap()
    }
}
