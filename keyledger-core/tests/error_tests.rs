use keyledger_core::{ErrorBody, ErrorKind, LedgerError};
use keyledger_db::{DbError, UnitError};
use keyledger_types::{AccountId, Timestamp};

#[test]
fn kinds_have_stable_codes() {
    let cases = [
        (LedgerError::Validation("x".into()), "validation_error"),
        (LedgerError::AccountNotFound(AccountId::new()), "account_not_found"),
        (LedgerError::AccountExists(AccountId::new()), "account_exists"),
        (
            LedgerError::InsufficientBalance {
                required: 2,
                available: 1,
            },
            "insufficient_balance",
        ),
        (LedgerError::InvalidKey, "invalid_key"),
        (LedgerError::KeyExpired(Timestamp::from_millis(0)), "key_expired"),
        (LedgerError::DeviceLimitReached(2), "device_limit_reached"),
        (LedgerError::InvalidCode, "invalid_code"),
        (LedgerError::CodeExpired(Timestamp::from_millis(0)), "code_expired"),
        (LedgerError::CodeExhausted, "code_exhausted"),
        (LedgerError::AlreadyRedeemed, "already_redeemed"),
        (LedgerError::Conflict, "conflict"),
        (LedgerError::DeadlineExceeded, "deadline_exceeded"),
        (LedgerError::GenerationExhausted(10), "generation_exhausted"),
        (LedgerError::Storage("x".into()), "storage_fault"),
    ];
    for (err, code) in cases {
        assert_eq!(err.kind().code(), code);
        // The serde form matches the code.
        assert_eq!(
            serde_json::to_string(&err.kind()).unwrap(),
            format!("\"{code}\"")
        );
    }
}

#[test]
fn error_display_insufficient_balance() {
    let err = LedgerError::InsufficientBalance {
        required: 50,
        available: 5,
    };
    let msg = err.to_string();
    assert!(msg.contains("insufficient balance"));
    assert!(msg.contains("50"));
    assert!(msg.contains('5'));
}

#[test]
fn error_display_device_limit() {
    let msg = LedgerError::DeviceLimitReached(3).to_string();
    assert!(msg.contains("device limit"));
    assert!(msg.contains('3'));
}

#[test]
fn busy_and_conflict_map_to_retryable_conflict() {
    let busy: LedgerError = DbError::Busy("database is locked".into()).into();
    assert!(matches!(busy, LedgerError::Conflict));
    assert!(busy.is_retryable());

    let conflict: LedgerError = DbError::Conflict { attempts: 4 }.into();
    assert!(matches!(conflict, LedgerError::Conflict));
    assert!(conflict.kind().is_transient());
}

#[test]
fn deadline_maps_through() {
    let err: LedgerError = DbError::DeadlineExceeded.into();
    assert!(matches!(err, LedgerError::DeadlineExceeded));
    assert!(!err.is_retryable());
}

#[test]
fn storage_detail_is_not_leaked() {
    let err: LedgerError = DbError::Migration("secret table layout".into()).into();
    assert!(matches!(err, LedgerError::Storage(_)));
    assert!(err.is_fatal());
    assert!(!err.to_string().contains("secret"));
}

#[test]
fn identifier_errors_are_validation() {
    let err: LedgerError = keyledger_types::KeyCode::parse("not hex!").unwrap_err().into();
    assert_eq!(err.kind(), ErrorKind::ValidationError);
}

#[test]
fn error_body_carries_kind_and_message() {
    let body = ErrorBody::from(&LedgerError::CodeExhausted);
    assert_eq!(body.kind, ErrorKind::CodeExhausted);
    let json = serde_json::to_value(&body).unwrap();
    assert_eq!(json["kind"], "code_exhausted");
    assert_eq!(json["message"], "referral code has been fully redeemed");
}
