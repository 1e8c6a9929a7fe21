//! Key issuance and redemption ledger.
//!
//! Accounts hold a prepaid balance. The ledger sells time-limited license
//! keys against that balance, binds keys to a bounded number of devices, and
//! credits balances from referral codes.
//!
//! # Guarantees
//!
//! - **Atomic units**: issuance, validation, redemption and every balance
//!   movement run as one SQLite transaction; on any error nothing is written
//! - **Non-negative balances**: debits are guarded updates, backed by a
//!   schema check
//! - **Append-only log**: every balance change has exactly one transaction
//!   record, and records are never updated or deleted
//! - **Bounded bindings**: a key never has more bound devices than its limit,
//!   and a code is never redeemed past its usage limit, under any
//!   concurrency
//!
//! # Key Tokens
//!
//! Issued keys come with a token formatted as
//! `base64url(payload).base64url(signature)`, an Ed25519-signed JSON object
//! carrying the key's terms.

mod account;
mod api;
mod codegen;
mod config;
mod device;
mod error;
mod issuer;
mod key;
mod ledger;
mod redeemer;
mod sql;
mod token;
mod validator;

pub use account::{
    Account, AccountLedger, BalanceAudit, Posting, Transaction, TransactionFilter, TransactionKind,
    TransactionReason, UnknownVariant,
};
pub use api::{
    ErrorBody, IssueKeyRequest, IssueKeyResponse, RedeemCodeRequest, RedeemCodeResponse,
    ValidateKeyRequest, ValidateKeyResponse,
};
pub use codegen::{Alphabet, CodeGenerator, OsRandom, RandomSource};
pub use config::LedgerConfig;
pub use device::{BindOutcome, BoundDevice};
pub use error::{ErrorKind, LedgerError, LedgerResult, TokenError};
pub use issuer::{IssuedKey, KeyIssuer};
pub use key::{Key, KeyState, KeyStatusFilter, MAX_DEVICE_LIMIT, MIN_DEVICE_LIMIT};
pub use ledger::KeyLedger;
pub use redeemer::{CodeRedeemer, NewCode, Redeemed, Redemption, RedemptionPolicy, ReferralCode};
pub use token::{KeySigner, KeyToken, KeyTokenPayload};
pub use validator::{KeyValidator, Validated};

pub use keyledger_db::{Database, Deadline, RetryPolicy, StoreOptions};
