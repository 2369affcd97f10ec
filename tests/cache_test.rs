use chrono::{Duration, Utc};
use flaggate::client::{CachedCredential, CredentialCache};
use flaggate::error::FlagGateError;
use std::fs;
use tempfile::TempDir;

fn credential() -> CachedCredential {
    CachedCredential {
        access_token: "eyJ.access.sig".to_string(),
        refresh_token: "eyJ.refresh.sig".to_string(),
        expires_at: Utc::now().timestamp() + 3600,
    }
}

#[test]
fn test_save_then_load_round_trips() {
    let dir = TempDir::new().unwrap();
    let cache = CredentialCache::new(dir.path().join("featurectl"));
    let key = cache.ensure_key().unwrap();
    let saved = credential();

    cache.save(&key, &saved).unwrap();
    assert_eq!(cache.load().unwrap(), saved);
}

#[test]
fn test_ciphertext_does_not_contain_tokens() {
    let dir = TempDir::new().unwrap();
    let cache = CredentialCache::new(dir.path());
    let key = cache.ensure_key().unwrap();
    cache.save(&key, &credential()).unwrap();

    let on_disk = fs::read_to_string(dir.path().join("auth.json")).unwrap();
    assert!(on_disk.contains("\"credentials\""));
    assert!(!on_disk.contains("eyJ.access.sig"));
}

#[test]
fn test_ensure_key_is_stable() {
    let dir = TempDir::new().unwrap();
    let cache = CredentialCache::new(dir.path());
    let first = cache.ensure_key().unwrap();
    let second = cache.ensure_key().unwrap();
    assert_eq!(first, second);
    assert_eq!(fs::read(dir.path().join("key.bin")).unwrap().len(), 32);
}

#[cfg(unix)]
#[test]
fn test_cache_files_are_private() {
    use std::os::unix::fs::PermissionsExt;

    let dir = TempDir::new().unwrap();
    let cache = CredentialCache::new(dir.path());
    let key = cache.ensure_key().unwrap();
    cache.save(&key, &credential()).unwrap();

    for name in ["key.bin", "auth.json"] {
        let mode = fs::metadata(dir.path().join(name)).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600, "{}", name);
    }
}

#[test]
fn test_empty_cache_is_not_logged_in() {
    let dir = TempDir::new().unwrap();
    let cache = CredentialCache::new(dir.path().join("never-created"));
    assert!(matches!(cache.load(), Err(FlagGateError::NotLoggedIn)));
}

#[test]
fn test_key_without_credentials_is_not_logged_in() {
    let dir = TempDir::new().unwrap();
    let cache = CredentialCache::new(dir.path());
    cache.ensure_key().unwrap();
    assert!(matches!(cache.load(), Err(FlagGateError::NotLoggedIn)));
}

#[test]
fn test_credentials_without_key_is_not_logged_in() {
    let dir = TempDir::new().unwrap();
    let cache = CredentialCache::new(dir.path());
    let key = cache.ensure_key().unwrap();
    cache.save(&key, &credential()).unwrap();
    fs::remove_file(dir.path().join("key.bin")).unwrap();

    assert!(matches!(cache.load(), Err(FlagGateError::NotLoggedIn)));
}

#[test]
fn test_corrupt_ciphertext_clears_cache() {
    let dir = TempDir::new().unwrap();
    let cache = CredentialCache::new(dir.path());
    let key = cache.ensure_key().unwrap();
    cache.save(&key, &credential()).unwrap();

    let corrupt = [
        "{\"credentials\": \"AAAA\"}",
        "{\"credentials\": \"!!! not base64\"}",
        "not json at all",
        "",
    ];
    for contents in corrupt {
        let key = cache.ensure_key().unwrap();
        cache.save(&key, &credential()).unwrap();
        fs::write(dir.path().join("auth.json"), contents).unwrap();

        assert!(matches!(cache.load(), Err(FlagGateError::NotLoggedIn)), "{:?}", contents);
        assert!(!dir.path().join("auth.json").exists());
        assert!(!dir.path().join("key.bin").exists());
    }
}

#[test]
fn test_replaced_key_cannot_open_old_credentials() {
    let dir = TempDir::new().unwrap();
    let cache = CredentialCache::new(dir.path());
    let key = cache.ensure_key().unwrap();
    cache.save(&key, &credential()).unwrap();
    fs::write(dir.path().join("key.bin"), [7u8; 32]).unwrap();

    assert!(matches!(cache.load(), Err(FlagGateError::NotLoggedIn)));
}

#[test]
fn test_truncated_key_is_regenerated() {
    let dir = TempDir::new().unwrap();
    let cache = CredentialCache::new(dir.path());
    let key = cache.ensure_key().unwrap();
    cache.save(&key, &credential()).unwrap();
    fs::write(dir.path().join("key.bin"), [1u8; 5]).unwrap();

    let fresh = cache.ensure_key().unwrap();
    assert_ne!(fresh, key);
    assert!(matches!(cache.load(), Err(FlagGateError::NotLoggedIn)));
}

#[test]
fn test_clear_tolerates_missing_files() {
    let dir = TempDir::new().unwrap();
    let cache = CredentialCache::new(dir.path());
    cache.clear().unwrap();
    cache.ensure_key().unwrap();
    cache.clear().unwrap();
    assert!(!dir.path().join("key.bin").exists());
}

#[test]
fn test_freshness_uses_clock_skew() {
    let cache = CredentialCache::new("/unused").with_clock_skew(Duration::seconds(60));
    let mut cred = credential();
    assert!(cache.is_fresh(&cred));

    cred.expires_at = Utc::now().timestamp() + 30;
    assert!(!cache.is_fresh(&cred));
}

#[test]
fn test_unreadable_auth_file_is_not_logged_in() {
    let dir = TempDir::new().unwrap();
    let cache = CredentialCache::new(dir.path());
    cache.ensure_key().unwrap();
    fs::create_dir(dir.path().join("auth.json")).unwrap();

    assert!(matches!(cache.load(), Err(FlagGateError::NotLoggedIn)));
    // the key is removed even though auth.json could not be
    assert!(!dir.path().join("key.bin").exists());
}

#[test]
fn test_unreadable_key_file_is_not_logged_in() {
    let dir = TempDir::new().unwrap();
    let cache = CredentialCache::new(dir.path());
    fs::create_dir(dir.path().join("key.bin")).unwrap();

    assert!(matches!(cache.load(), Err(FlagGateError::NotLoggedIn)));
}
