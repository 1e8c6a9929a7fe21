mod common;

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use common::{START, test_signer};
use ed25519_dalek::{Signer, SigningKey};
use keyledger_core::{Key, KeySigner, KeyToken, TokenError};
use keyledger_types::{AccountId, KeyCode, Timestamp, TransactionId};

fn sample_key() -> Key {
    Key {
        code: KeyCode::parse("00112233445566778899AABB").unwrap(),
        account_id: AccountId::new(),
        tier_id: "1d".to_string(),
        price: 15,
        device_limit: 3,
        issued_at: Timestamp::from_millis(START),
        expires_at: Timestamp::from_millis(START + 86_400_000),
        active: true,
        transaction_id: TransactionId::new(),
        revoked_at: None,
        bound_devices: Vec::new(),
    }
}

/// Signs an arbitrary payload string the same way the signer does.
fn sign_raw(seed: [u8; 32], payload_json: &str) -> String {
    let signing_key = SigningKey::from_bytes(&seed);
    let payload_b64 = URL_SAFE_NO_PAD.encode(payload_json.as_bytes());
    let signature = signing_key.sign(payload_b64.as_bytes());
    format!("{payload_b64}.{}", URL_SAFE_NO_PAD.encode(signature.to_bytes()))
}

// ── Parsing ──────────────────────────────────────────────────────

#[test]
fn signed_token_round_trips_terms() {
    let signer = test_signer();
    let key = sample_key();
    let token = KeyToken::parse_with_key(&signer.sign(&key), &signer.public_key()).unwrap();

    let payload = token.payload();
    assert_eq!(payload.code, "00112233445566778899AABB");
    assert_eq!(payload.sub, key.account_id.to_string());
    assert_eq!(payload.tier, "1d");
    assert_eq!(payload.dl, 3);
    assert_eq!(payload.iat, START);
    assert_eq!(token.expires_at(), key.expires_at);
    assert!(!token.is_expired_at(key.issued_at));
    assert!(token.is_expired_at(key.expires_at));
}

#[test]
fn surrounding_whitespace_is_ignored() {
    let signer = test_signer();
    let raw = format!("  {}\n", signer.sign(&sample_key()));
    let token = KeyToken::parse_with_key(&raw, &signer.public_key()).unwrap();
    assert_eq!(token.raw(), raw.trim());
}

#[test]
fn wrong_public_key_fails_signature() {
    let signer = test_signer();
    let other = KeySigner::from_seed([9; 32]);
    let result = KeyToken::parse_with_key(&signer.sign(&sample_key()), &other.public_key());
    assert!(matches!(result, Err(TokenError::InvalidSignature)));
}

#[test]
fn tampered_payload_fails_signature() {
    let signer = test_signer();
    let token = signer.sign(&sample_key());
    let (_, sig) = token.split_once('.').unwrap();
    let forged_payload = URL_SAFE_NO_PAD.encode(br#"{"code":"FFFFFFFFFFFFFFFF"}"#);
    let forged = format!("{forged_payload}.{sig}");
    assert!(matches!(
        KeyToken::parse_with_key(&forged, &signer.public_key()),
        Err(TokenError::InvalidSignature)
    ));
}

#[test]
fn malformed_tokens_are_format_errors() {
    let signer = test_signer();
    for bad in ["", "no-dot", "a.b.c", "abc.!!!", "abc.AAAA"] {
        assert!(
            matches!(
                KeyToken::parse_with_key(bad, &signer.public_key()),
                Err(TokenError::InvalidKeyFormat(_))
            ),
            "{bad:?} should be a format error"
        );
    }
}

#[test]
fn validly_signed_garbage_is_a_payload_error() {
    let seed = test_signer().seed();
    let token = sign_raw(seed, r#"{"code":"X"}"#);
    assert!(matches!(
        KeyToken::parse_with_key(&token, &test_signer().public_key()),
        Err(TokenError::InvalidPayload(_))
    ));
}

// ── Signer ───────────────────────────────────────────────────────

#[test]
fn signer_seed_round_trips() {
    let signer = KeySigner::generate();
    let restored = KeySigner::from_seed(signer.seed());
    assert_eq!(signer.public_key(), restored.public_key());
}

#[test]
fn signer_debug_hides_secret() {
    let signer = test_signer();
    let debug = format!("{signer:?}");
    assert!(debug.contains("public_key"));
    assert!(!debug.contains(&format!("{:?}", signer.seed())));
}

#[test]
fn token_error_display() {
    assert!(
        TokenError::InvalidKeyFormat("bad".into())
            .to_string()
            .contains("invalid key token format")
    );
    assert!(TokenError::InvalidSignature.to_string().contains("signature"));
    let msg = TokenError::InvalidPayload("missing field".into()).to_string();
    assert!(msg.contains("invalid key token payload"));
    assert!(msg.contains("missing field"));
}
