use keyledger_types::{AccountId, CodeValue, DeviceId, KeyCode, TransactionId};
use std::collections::HashSet;
use std::str::FromStr;

// ── AccountId ─────────────────────────────────────────────────────

#[test]
fn account_id_new_is_unique() {
    let a = AccountId::new();
    let b = AccountId::new();
    assert_ne!(a, b);
}

#[test]
fn account_id_display_and_parse() {
    let id = AccountId::new();
    let parsed = AccountId::parse(&id.to_string()).unwrap();
    assert_eq!(id, parsed);
}

#[test]
fn account_id_parse_invalid() {
    assert!(AccountId::parse("not-a-uuid").is_err());
    assert!(AccountId::from_str("garbage").is_err());
}

#[test]
fn account_id_serde_is_transparent() {
    let id = AccountId::new();
    let json = serde_json::to_string(&id).unwrap();
    assert_eq!(json, format!("\"{id}\""));
    let parsed: AccountId = serde_json::from_str(&json).unwrap();
    assert_eq!(parsed, id);
}

// ── TransactionId ─────────────────────────────────────────────────

#[test]
fn transaction_ids_are_time_ordered() {
    let ids: Vec<TransactionId> = (0..50).map(|_| TransactionId::new()).collect();
    let mut sorted = ids.clone();
    sorted.sort();
    assert_eq!(ids, sorted);
    let unique: HashSet<_> = ids.iter().collect();
    assert_eq!(unique.len(), 50);
}

// ── KeyCode ───────────────────────────────────────────────────────

#[test]
fn key_code_is_normalised_to_uppercase() {
    let code = KeyCode::parse("  0123456789abcdef ").unwrap();
    assert_eq!(code.as_str(), "0123456789ABCDEF");
}

#[test]
fn key_code_rejects_short_and_long() {
    assert!(KeyCode::parse("ABCDEF").is_err());
    assert!(KeyCode::parse(&"A".repeat(65)).is_err());
    assert!(KeyCode::parse(&"A".repeat(64)).is_ok());
}

#[test]
fn key_code_rejects_non_hex() {
    let err = KeyCode::parse("0123456789ABCDEZ").unwrap_err();
    assert!(format!("{err}").contains("hexadecimal"));
}

#[test]
fn key_code_deserialize_validates() {
    let ok: Result<KeyCode, _> = serde_json::from_str("\"00112233445566778899\"");
    assert!(ok.is_ok());
    let bad: Result<KeyCode, _> = serde_json::from_str("\"nope\"");
    assert!(bad.is_err());
}

// ── DeviceId ──────────────────────────────────────────────────────

#[test]
fn device_id_accepts_opaque_strings() {
    assert!(DeviceId::parse("device-A").is_ok());
    assert!(DeviceId::parse("3f2a:9b:android").is_ok());
}

#[test]
fn device_id_is_case_sensitive() {
    let a = DeviceId::parse("Phone").unwrap();
    let b = DeviceId::parse("phone").unwrap();
    assert_ne!(a, b);
}

#[test]
fn device_id_rejects_empty_whitespace_and_long() {
    assert!(DeviceId::parse("").is_err());
    assert!(DeviceId::parse("has space").is_err());
    assert!(DeviceId::parse("tab\there").is_err());
    assert!(DeviceId::parse(&"d".repeat(129)).is_err());
    assert!(DeviceId::parse(&"d".repeat(128)).is_ok());
}

// ── CodeValue ─────────────────────────────────────────────────────

#[test]
fn code_value_normalises_case() {
    let code = CodeValue::parse(" welcome20 ").unwrap();
    assert_eq!(code.as_str(), "WELCOME20");
}

#[test]
fn code_value_rejects_bad_shapes() {
    assert!(CodeValue::parse("ABC").is_err());
    assert!(CodeValue::parse("WITH-DASH").is_err());
    assert!(CodeValue::parse(&"X".repeat(33)).is_err());
}

#[test]
fn code_value_into_string() {
    let code = CodeValue::parse("PROMO2024").unwrap();
    let s: String = code.into();
    assert_eq!(s, "PROMO2024");
}

// ── Normalisation properties ─────────────────────────────────────

proptest::proptest! {
    #[test]
    fn key_code_parse_is_case_insensitive(raw in "[0-9a-fA-F]{16,64}") {
        let lower = KeyCode::parse(&raw.to_lowercase()).unwrap();
        let upper = KeyCode::parse(&raw.to_uppercase()).unwrap();
        proptest::prop_assert_eq!(&lower, &upper);
        proptest::prop_assert_eq!(lower.as_str(), raw.to_uppercase());
    }

    #[test]
    fn code_value_round_trips_through_display(raw in "[A-Za-z0-9]{6,32}") {
        let code = CodeValue::parse(&format!("  {raw} ")).unwrap();
        let again = CodeValue::parse(&code.to_string()).unwrap();
        proptest::prop_assert_eq!(code, again);
    }
}
