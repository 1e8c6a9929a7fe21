use keyledger_server::load_or_generate_signer;
use std::fs;

#[test]
fn generated_seed_is_reloaded_on_next_start() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("signing.key");

    let first = load_or_generate_signer(&path).unwrap();
    assert_eq!(fs::read(&path).unwrap().len(), 32);

    let second = load_or_generate_signer(&path).unwrap();
    assert_eq!(first.public_key(), second.public_key());
}

#[cfg(unix)]
#[test]
fn generated_seed_is_owner_only() {
    use std::os::unix::fs::PermissionsExt;

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("signing.key");
    load_or_generate_signer(&path).unwrap();

    let mode = fs::metadata(&path).unwrap().permissions().mode();
    assert_eq!(mode & 0o777, 0o600);
}

#[test]
fn truncated_seed_file_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("signing.key");
    fs::write(&path, [1u8; 16]).unwrap();

    let err = load_or_generate_signer(&path).unwrap_err();
    assert!(err.to_string().contains("32-byte seed"));
}
