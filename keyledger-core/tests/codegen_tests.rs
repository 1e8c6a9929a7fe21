mod common;

use common::ZeroRandom;
use keyledger_core::{Alphabet, CodeGenerator, LedgerError, OsRandom, RandomSource};
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

/// Yields 255, 254, 253, ... so rejection sampling can be observed.
struct Descending(AtomicU8);

impl RandomSource for Descending {
    fn fill(&self, buf: &mut [u8]) {
        for b in buf {
            *b = 255 - self.0.fetch_add(1, Ordering::Relaxed);
        }
    }
}

#[test]
fn key_codes_are_uppercase_hex() {
    let generator = CodeGenerator::key_codes(Arc::new(OsRandom));
    for _ in 0..50 {
        let code = generator.candidate(16);
        assert_eq!(code.len(), 16);
        assert!(code.chars().all(|c| matches!(c, '0'..='9' | 'A'..='F')));
    }
}

#[test]
fn referral_codes_are_uppercase_alphanumeric() {
    let generator = CodeGenerator::referral_codes(Arc::new(OsRandom));
    let codes: HashSet<String> = (0..50).map(|_| generator.candidate(10)).collect();
    assert!(codes.len() > 45);
    for code in &codes {
        assert!(code.chars().all(|c| c.is_ascii_uppercase() || c.is_ascii_digit()));
    }
}

#[test]
fn biased_bytes_are_rejected() {
    // 256 % 36 == 4, so bytes 252..=255 are skipped.
    let generator = CodeGenerator::new(
        Arc::new(Descending(AtomicU8::new(0))),
        Alphabet::Alphanumeric,
        3,
        3,
    );
    // 251 % 36 == 35 -> '9', 250 -> '8', 249 -> '7'
    assert_eq!(generator.candidate(3), "987");
}

#[test]
fn first_free_candidate_wins() {
    let generator = CodeGenerator::key_codes(Arc::new(OsRandom));
    let mut calls = 0;
    let code = generator
        .generate_unique(|_| {
            calls += 1;
            Ok(calls < 3)
        })
        .unwrap();
    assert_eq!(calls, 3);
    assert_eq!(code.len(), 16);
}

#[test]
fn widens_after_base_attempts() {
    let generator = CodeGenerator::key_codes(Arc::new(ZeroRandom)).with_attempts(2);
    let mut seen = Vec::new();
    let code = generator
        .generate_unique(|candidate| {
            seen.push(candidate.len());
            Ok(candidate.len() == 16)
        })
        .unwrap();
    assert_eq!(seen, vec![16, 16, 24]);
    assert_eq!(code, "0".repeat(24));
}

#[test]
fn exhaustion_is_bounded() {
    let generator = CodeGenerator::referral_codes(Arc::new(OsRandom)).with_attempts(3);
    assert_eq!(generator.max_attempts(), 6);
    let mut calls = 0;
    let err = generator
        .generate_unique(|_| {
            calls += 1;
            Ok(true)
        })
        .unwrap_err();
    assert!(matches!(err, LedgerError::GenerationExhausted(6)));
    assert_eq!(calls, 6);
}

#[test]
fn lookup_errors_propagate() {
    let generator = CodeGenerator::key_codes(Arc::new(OsRandom));
    let err = generator
        .generate_unique(|_| Err(LedgerError::Conflict))
        .unwrap_err();
    assert!(matches!(err, LedgerError::Conflict));
}
