//! The ledger facade wiring the components over one store.

use crate::account::AccountLedger;
use crate::api::{
    IssueKeyRequest, IssueKeyResponse, RedeemCodeRequest, RedeemCodeResponse, ValidateKeyRequest,
    ValidateKeyResponse,
};
use crate::codegen::{OsRandom, RandomSource};
use crate::config::LedgerConfig;
use crate::error::{LedgerError, LedgerResult};
use crate::issuer::KeyIssuer;
use crate::redeemer::CodeRedeemer;
use crate::token::KeySigner;
use crate::validator::KeyValidator;
use keyledger_db::{Database, Deadline};
use keyledger_types::{
    AccountId, Clock, CodeValue, DeviceId, KeyCode, PricingCatalog, PricingTier, SystemClock,
};
use std::path::Path;
use std::sync::Arc;

/// Entry point for the external contracts. Cheap to clone; clones share
/// the store.
#[derive(Clone, Debug)]
pub struct KeyLedger {
    accounts: AccountLedger,
    issuer: KeyIssuer,
    validator: KeyValidator,
    redeemer: CodeRedeemer,
    signer: Arc<KeySigner>,
}

impl KeyLedger {
    /// Opens the store at `path` and builds a ledger with the system clock
    /// and OS randomness.
    pub fn open(
        path: &Path,
        catalog: PricingCatalog,
        signer: KeySigner,
        config: &LedgerConfig,
    ) -> LedgerResult<Self> {
        config.validate()?;
        let db = Database::open_with_options(path, config.store)?;
        Ok(Self::new(db, catalog, signer, config))
    }

    /// Builds a ledger over an open store with the system clock and OS
    /// randomness.
    #[must_use]
    pub fn new(db: Database, catalog: PricingCatalog, signer: KeySigner, config: &LedgerConfig) -> Self {
        Self::with_parts(
            db,
            catalog,
            signer,
            config,
            Arc::new(SystemClock),
            Arc::new(OsRandom),
        )
    }

    /// Builds a ledger with explicit clock and random source.
    #[must_use]
    pub fn with_parts(
        db: Database,
        catalog: PricingCatalog,
        signer: KeySigner,
        config: &LedgerConfig,
        clock: Arc<dyn Clock>,
        random: Arc<dyn RandomSource>,
    ) -> Self {
        let signer = Arc::new(signer);
        let accounts = AccountLedger::new(db.clone(), Arc::clone(&clock));
        let issuer = KeyIssuer::new(
            accounts.clone(),
            Arc::new(catalog),
            config.key_generator(Arc::clone(&random)),
            Arc::clone(&signer),
        );
        let validator = KeyValidator::new(db, clock);
        let redeemer = CodeRedeemer::new(
            accounts.clone(),
            config.referral_generator(random),
            config.redemption_policy,
        );
        Self {
            accounts,
            issuer,
            validator,
            redeemer,
            signer,
        }
    }

    #[must_use]
    pub fn accounts(&self) -> &AccountLedger {
        &self.accounts
    }

    #[must_use]
    pub fn issuer(&self) -> &KeyIssuer {
        &self.issuer
    }

    #[must_use]
    pub fn validator(&self) -> &KeyValidator {
        &self.validator
    }

    #[must_use]
    pub fn redeemer(&self) -> &CodeRedeemer {
        &self.redeemer
    }

    /// Public key clients verify issued tokens with.
    #[must_use]
    pub fn public_key(&self) -> [u8; 32] {
        self.signer.public_key()
    }

    /// `IssueKey`.
    pub fn issue_key(&self, req: &IssueKeyRequest, deadline: Deadline) -> LedgerResult<IssueKeyResponse> {
        let account = parse_account(&req.account_id)?;
        let issued = self
            .issuer
            .issue(&account, &req.tier_id, req.device_limit, deadline)?;
        Ok(IssueKeyResponse {
            key_code: issued.key.code,
            price: issued.key.price,
            device_limit: issued.key.device_limit,
            expires_at: issued.key.expires_at,
            token: issued.token,
            new_balance: issued.transaction.balance_after,
        })
    }

    /// `ValidateKey`.
    pub fn validate_key(
        &self,
        req: &ValidateKeyRequest,
        deadline: Deadline,
    ) -> LedgerResult<ValidateKeyResponse> {
        let code = KeyCode::parse(&req.key_code)?;
        let device = DeviceId::parse(&req.device_id)?;
        let validated = self.validator.validate(&code, &device, deadline)?;
        Ok(ValidateKeyResponse {
            expires_at: validated.expires_at,
            tier_id: validated.tier_id,
        })
    }

    /// `RedeemCode`.
    pub fn redeem_code(
        &self,
        req: &RedeemCodeRequest,
        deadline: Deadline,
    ) -> LedgerResult<RedeemCodeResponse> {
        let account = parse_account(&req.account_id)?;
        let code = CodeValue::parse(&req.code)?;
        let redeemed = self.redeemer.redeem(&account, &code, deadline)?;
        Ok(RedeemCodeResponse {
            amount_credited: redeemed.amount_credited,
            new_balance: redeemed.new_balance,
        })
    }

    /// `GetPricing`: tiers in catalog order.
    #[must_use]
    pub fn pricing(&self) -> &[PricingTier] {
        self.issuer.catalog().tiers()
    }
}

fn parse_account(raw: &str) -> LedgerResult<AccountId> {
    AccountId::parse(raw.trim())
        .map_err(|e| LedgerError::Validation(format!("invalid account id: {e}")))
}
