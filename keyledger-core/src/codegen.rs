//! Random code generation with bounded collision retries.

use crate::error::{LedgerError, LedgerResult};
use rand::RngCore;
use rand::rngs::OsRng;
use std::sync::Arc;
use tracing::{debug, warn};

/// Source of random bytes for code generation.
pub trait RandomSource: Send + Sync {
    /// Fills `buf` with random bytes.
    fn fill(&self, buf: &mut [u8]);
}

/// Cryptographically secure OS randomness.
#[derive(Debug, Clone, Copy, Default)]
pub struct OsRandom;

impl RandomSource for OsRandom {
    fn fill(&self, buf: &mut [u8]) {
        OsRng.fill_bytes(buf);
    }
}

/// Characters a code is drawn from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Alphabet {
    /// `0-9A-F`
    Hex,
    /// `A-Z0-9`
    Alphanumeric,
}

impl Alphabet {
    fn symbols(self) -> &'static [u8] {
        match self {
            Self::Hex => b"0123456789ABCDEF",
            Self::Alphanumeric => b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789",
        }
    }
}

/// Generates random codes and retries on collision, widening the code once
/// the attempts at the base length are spent.
#[derive(Clone)]
pub struct CodeGenerator {
    source: Arc<dyn RandomSource>,
    alphabet: Alphabet,
    base_len: usize,
    widened_len: usize,
    attempts_per_len: u32,
}

impl CodeGenerator {
    /// Default attempts at each length.
    pub const DEFAULT_ATTEMPTS: u32 = 5;

    /// Generator for key codes: 16 hex characters, widened to 24.
    #[must_use]
    pub fn key_codes(source: Arc<dyn RandomSource>) -> Self {
        Self::new(source, Alphabet::Hex, 16, 24)
    }

    /// Generator for referral codes: 10 alphanumerics, widened to 14.
    #[must_use]
    pub fn referral_codes(source: Arc<dyn RandomSource>) -> Self {
        Self::new(source, Alphabet::Alphanumeric, 10, 14)
    }

    /// Creates a generator. `widened_len` is clamped to at least `base_len`.
    #[must_use]
    pub fn new(
        source: Arc<dyn RandomSource>,
        alphabet: Alphabet,
        base_len: usize,
        widened_len: usize,
    ) -> Self {
        Self {
            source,
            alphabet,
            base_len,
            widened_len: widened_len.max(base_len),
            attempts_per_len: Self::DEFAULT_ATTEMPTS,
        }
    }

    /// Sets the attempts made at each length.
    #[must_use]
    pub fn with_attempts(mut self, attempts_per_len: u32) -> Self {
        self.attempts_per_len = attempts_per_len.max(1);
        self
    }

    /// Total attempts before giving up.
    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.attempts_per_len * 2
    }

    /// Draws one uniformly distributed candidate of `len` characters.
    #[must_use]
    pub fn candidate(&self, len: usize) -> String {
        let symbols = self.alphabet.symbols();
        let n = symbols.len();
        // Largest multiple of n that fits in a byte; bytes above it are
        // rejected to keep the distribution uniform.
        let zone = 256 - (256 % n);
        let mut out = String::with_capacity(len);
        let mut buf = [0u8; 32];
        while out.len() < len {
            self.source.fill(&mut buf);
            for &b in &buf {
                if (b as usize) < zone {
                    out.push(symbols[b as usize % n] as char);
                    if out.len() == len {
                        break;
                    }
                }
            }
        }
        out
    }

    /// Generates a code for which `is_taken` returns false.
    ///
    /// `is_taken` runs inside the caller's unit of work, so a code reported
    /// free stays free until that unit commits.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::GenerationExhausted`] when every attempt
    /// collided, or any error `is_taken` returns.
    pub fn generate_unique<F>(&self, mut is_taken: F) -> LedgerResult<String>
    where
        F: FnMut(&str) -> LedgerResult<bool>,
    {
        let mut attempts = 0;
        for len in [self.base_len, self.widened_len] {
            for _ in 0..self.attempts_per_len {
                attempts += 1;
                let code = self.candidate(len);
                if !is_taken(&code)? {
                    return Ok(code);
                }
                debug!(attempt = attempts, len, "Generated code collided");
            }
            if len != self.widened_len {
                warn!(from = len, to = self.widened_len, "Widening generated codes after collisions");
            }
        }
        Err(LedgerError::GenerationExhausted(attempts))
    }
}

impl std::fmt::Debug for CodeGenerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CodeGenerator")
            .field("alphabet", &self.alphabet)
            .field("base_len", &self.base_len)
            .field("widened_len", &self.widened_len)
            .field("attempts_per_len", &self.attempts_per_len)
            .finish_non_exhaustive()
    }
}
