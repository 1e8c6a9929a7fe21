//! Ledger configuration.

use crate::codegen::{Alphabet, CodeGenerator, RandomSource};
use crate::error::{LedgerError, LedgerResult};
use crate::redeemer::RedemptionPolicy;
use keyledger_db::StoreOptions;
use keyledger_types::{CodeValue, KeyCode};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;

/// Tunables for a [`crate::KeyLedger`]. Every field has a default, so an
/// empty JSON object is a valid configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    pub redemption_policy: RedemptionPolicy,
    pub key_code_len: usize,
    /// Length used once attempts at `key_code_len` all collided.
    pub key_code_widened_len: usize,
    pub referral_code_len: usize,
    pub referral_code_widened_len: usize,
    /// Generation attempts at each code length.
    pub generation_attempts: u32,
    pub store: StoreOptions,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            redemption_policy: RedemptionPolicy::default(),
            key_code_len: 16,
            key_code_widened_len: 24,
            referral_code_len: 10,
            referral_code_widened_len: 14,
            generation_attempts: CodeGenerator::DEFAULT_ATTEMPTS,
            store: StoreOptions::default(),
        }
    }
}

impl LedgerConfig {
    /// Parses and validates a JSON configuration.
    pub fn from_json(json: &str) -> LedgerResult<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| LedgerError::Validation(format!("invalid ledger config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Reads and validates a JSON configuration file.
    pub fn from_json_file(path: &Path) -> LedgerResult<Self> {
        let json = std::fs::read_to_string(path).map_err(|e| {
            LedgerError::Validation(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::from_json(&json)
    }

    /// Checks that generated codes will satisfy the identifier formats.
    pub fn validate(&self) -> LedgerResult<()> {
        check_lengths(
            "key code",
            self.key_code_len,
            self.key_code_widened_len,
            KeyCode::MIN_LEN,
            KeyCode::MAX_LEN,
        )?;
        check_lengths(
            "referral code",
            self.referral_code_len,
            self.referral_code_widened_len,
            CodeValue::MIN_LEN,
            CodeValue::MAX_LEN,
        )?;
        if self.generation_attempts == 0 {
            return Err(LedgerError::Validation(
                "generation attempts must be at least 1".into(),
            ));
        }
        Ok(())
    }

    pub(crate) fn key_generator(&self, source: Arc<dyn RandomSource>) -> CodeGenerator {
        CodeGenerator::new(source, Alphabet::Hex, self.key_code_len, self.key_code_widened_len)
            .with_attempts(self.generation_attempts)
    }

    pub(crate) fn referral_generator(&self, source: Arc<dyn RandomSource>) -> CodeGenerator {
        CodeGenerator::new(
            source,
            Alphabet::Alphanumeric,
            self.referral_code_len,
            self.referral_code_widened_len,
        )
        .with_attempts(self.generation_attempts)
    }
}

fn check_lengths(what: &str, base: usize, widened: usize, min: usize, max: usize) -> LedgerResult<()> {
    if !(min..=max).contains(&base) || !(min..=max).contains(&widened) {
        return Err(LedgerError::Validation(format!(
            "{what} lengths must be within {min}..={max}, got {base} and {widened}"
        )));
    }
    if widened < base {
        return Err(LedgerError::Validation(format!(
            "widened {what} length {widened} is shorter than {base}"
        )));
    }
    Ok(())
}
