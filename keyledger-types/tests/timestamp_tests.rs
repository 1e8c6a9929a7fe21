use keyledger_types::{Clock, ManualClock, SystemClock, Timestamp};

#[test]
fn now_is_after_epoch() {
    assert!(Timestamp::now().as_millis() > 0);
    assert!(SystemClock.now().as_millis() > 0);
}

#[test]
fn ordering_follows_millis() {
    let a = Timestamp::from_millis(100);
    let b = Timestamp::from_millis(200);
    assert!(a < b);
    assert_eq!(a.max(b), b);
}

#[test]
fn checked_add_detects_overflow() {
    let ts = Timestamp::from_millis(i64::MAX - 1);
    assert!(ts.checked_add_millis(10).is_none());
    assert_eq!(
        Timestamp::from_millis(5).checked_add_millis(10),
        Some(Timestamp::from_millis(15))
    );
}

#[test]
fn display_is_rfc3339() {
    let ts = Timestamp::from_millis(0);
    assert!(ts.to_string().starts_with("1970-01-01T00:00:00"));
}

#[test]
fn manual_clock_moves_only_when_told() {
    let clock = ManualClock::new(Timestamp::from_millis(1_000));
    assert_eq!(clock.now(), Timestamp::from_millis(1_000));
    clock.advance(500);
    assert_eq!(clock.now(), Timestamp::from_millis(1_500));
    clock.set(Timestamp::from_millis(10));
    assert_eq!(clock.now(), Timestamp::from_millis(10));
}

#[test]
fn serde_is_plain_millis() {
    let json = serde_json::to_string(&Timestamp::from_millis(42)).unwrap();
    assert_eq!(json, "42");
}
