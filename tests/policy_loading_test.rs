// tests/policy_loading_test.rs

use chrono::{TimeZone, Utc};
use skyupdate::settings::UpdaterSettings;
use skyupdate::updater::{FilePolicyStore, PolicyStore, VersionPolicy};
use std::path::PathBuf;
use tempfile::tempdir;

// Helper to create a temporary file with the given contents
fn create_temp_file(dir: &tempfile::TempDir, name: &str, content: &str) -> std::io::Result<PathBuf> {
    let path = dir.path().join(name);
    std::fs::write(&path, content)?;
    Ok(path)
}

#[test]
fn test_load_existing_policy_file() {
    let dir = tempdir().unwrap();
    let path = create_temp_file(
        &dir,
        "policy.toml",
        "current_version = \"1.0.0\"\nlast_checked_at = \"2026-10-01T12:00:00Z\"\nskipped_version = \"1.0.1\"\n",
    )
    .unwrap();

    let store = FilePolicyStore::open(&path).unwrap();
    let policy = store.load();
    assert_eq!(policy.current_version.as_deref(), Some("1.0.0"));
    assert_eq!(
        policy.last_checked_at,
        Some(Utc.with_ymd_and_hms(2026, 10, 1, 12, 0, 0).unwrap())
    );
    assert!(policy.is_skipped("1.0.1"));
    assert!(!policy.is_skipped("1.0.2"));
}

#[test]
fn test_missing_policy_file_starts_empty() {
    let dir = tempdir().unwrap();
    let store = FilePolicyStore::open(dir.path().join("policy.toml")).unwrap();
    assert_eq!(store.load(), VersionPolicy::default());
}

#[test]
fn test_malformed_policy_file_is_rejected() {
    let dir = tempdir().unwrap();
    let path = create_temp_file(&dir, "policy.toml", "skipped_version = [").unwrap();
    assert!(FilePolicyStore::open(&path).is_err());
}

#[test]
fn test_policy_store_persists_across_reopen() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("policy.toml");

    let store = FilePolicyStore::open(&path).unwrap();
    store
        .update(&mut |p| p.skipped_version = Some("2.0.0".into()))
        .unwrap();
    store
        .update(&mut |p| p.current_version = Some("1.0.0".into()))
        .unwrap();

    let reopened = FilePolicyStore::open(&path).unwrap();
    assert_eq!(reopened.load(), store.load());
    assert_eq!(reopened.load().skipped_version.as_deref(), Some("2.0.0"));
    assert_eq!(reopened.load().current_version.as_deref(), Some("1.0.0"));
}

#[test]
fn test_load_settings_file() {
    let dir = tempdir().unwrap();
    let path = create_temp_file(
        &dir,
        "skyupdate-settings.toml",
        "manifest_url = \"http://valid.url/latest.json\"\ncheck_interval_ms = 60000\ncache_dir = \"/tmp/updates\"\n",
    )
    .unwrap();

    let settings = UpdaterSettings::load_from(&path).unwrap();
    assert_eq!(settings.manifest_url, "http://valid.url/latest.json");
    assert_eq!(settings.check_interval_ms, 60_000);
    assert_eq!(settings.cache_dir, PathBuf::from("/tmp/updates"));

    let config = settings.backend_config().unwrap();
    assert_eq!(config.cache_dir, PathBuf::from("/tmp/updates"));
}

#[test]
fn test_zero_interval_is_rejected() {
    let settings = UpdaterSettings {
        manifest_url: "http://valid.url/latest.json".into(),
        check_interval_ms: 0,
        ..Default::default()
    };
    assert!(settings.backend_config().is_err());
}

#[test]
fn test_missing_settings_file_uses_defaults() {
    let dir = tempdir().unwrap();
    let settings = UpdaterSettings::load_from(&dir.path().join("absent.toml")).unwrap();
    assert_eq!(settings, UpdaterSettings::default());
}
