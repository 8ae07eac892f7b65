//! Integration tests for `grove config` and the config-to-arborist mapping.
//!
//! Tests config validation and effective values with real TOML files.

use std::fs;

use grove_arborist::ArboristConfig;
use grove_core::config::GroveConfig;
use grove_core::types::Severity;
use serial_test::serial;
use tempfile::TempDir;

#[tokio::test]
async fn test_config_validate_valid_toml() {
    // Given: A valid config file
    let temp_dir = TempDir::new().expect("should create temp dir");
    let config_path = temp_dir.path().join("grove.toml");

    let valid_config = r#"
[general]
log_level = "info"
log_format = "json"

[install]
lockfile_version = 2
prefer_dedupe = true

[reify]
concurrency = 4
dry_run = true

[audit]
min_severity = "high"
"#;
    fs::write(&config_path, valid_config).expect("should write config");

    // When: Loading the config
    let config = GroveConfig::from_file(&config_path)
        .await
        .expect("valid config should load");

    // Then: Values are taken from the file, the rest from defaults
    assert_eq!(config.install.lockfile_version, 2);
    assert!(config.install.prefer_dedupe);
    assert_eq!(config.reify.concurrency, 4);
    assert!(config.reify.dry_run);
    assert_eq!(config.install.save_prefix, "^");
}

#[tokio::test]
async fn test_config_validate_malformed_toml() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let config_path = temp_dir.path().join("bad.toml");
    fs::write(&config_path, "[install\nlockfile_version = 3\n").expect("should write");

    let result = GroveConfig::from_file(&config_path).await;
    assert!(result.is_err(), "malformed TOML should fail to load");
}

#[tokio::test]
async fn test_config_validate_out_of_range_value() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let config_path = temp_dir.path().join("grove.toml");
    fs::write(&config_path, "[install]\nlockfile_version = 4\n").expect("should write");

    let err = GroveConfig::from_file(&config_path)
        .await
        .expect_err("lockfile_version 4 is not supported");
    assert!(err.to_string().contains("install.lockfile_version"));
}

#[tokio::test]
async fn test_config_validate_missing_file() {
    let config_path = std::path::PathBuf::from("/nonexistent/grove.toml");

    let result = GroveConfig::from_file(&config_path).await;
    assert!(result.is_err(), "missing file should fail to load");
}

#[tokio::test]
async fn test_config_empty_file_uses_defaults() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let config_path = temp_dir.path().join("empty.toml");
    fs::write(&config_path, "").expect("should write empty file");

    let config = GroveConfig::from_file(&config_path)
        .await
        .expect("empty config should load");
    assert_eq!(config.install.lockfile_version, 3);
    assert!(config.install.package_lock);
}

#[tokio::test]
#[serial]
async fn test_env_override_wins_over_file() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let config_path = temp_dir.path().join("grove.toml");
    fs::write(&config_path, "[reify]\nconcurrency = 4\n").expect("should write");

    // SAFETY: serial 테스트에서만 환경변수를 변경
    unsafe {
        std::env::set_var("GROVE_REIFY_CONCURRENCY", "2");
        std::env::set_var("GROVE_AUDIT_MIN_SEVERITY", "critical");
    }
    let result = GroveConfig::load(&config_path).await;
    unsafe {
        std::env::remove_var("GROVE_REIFY_CONCURRENCY");
        std::env::remove_var("GROVE_AUDIT_MIN_SEVERITY");
    }

    let config = result.expect("config should load");
    assert_eq!(config.reify.concurrency, 2);
    assert_eq!(config.audit.min_severity, "critical");
}

#[tokio::test]
#[serial]
async fn test_missing_implicit_config_falls_back_to_defaults() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let config_path = temp_dir.path().join("grove.toml");

    let config = GroveConfig::load_or_default(&config_path)
        .await
        .expect("missing implicit config should fall back");
    assert_eq!(config.general.log_format, "pretty");
}

#[tokio::test]
async fn test_arborist_config_resolves_paths_against_project() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let config = GroveConfig::parse(
        r#"
[install]
registry_dir = "offline"

[reify]
cache_dir = "/var/cache/grove"

[audit]
advisory_db_path = "advisories.json"
min_severity = "moderate"
"#,
    )
    .expect("valid config");

    let arborist = ArboristConfig::from_core(&config, temp_dir.path());
    assert_eq!(arborist.path, temp_dir.path());
    assert_eq!(arborist.registry_dir, temp_dir.path().join("offline"));
    assert_eq!(
        arborist.cache_dir.as_deref(),
        Some(std::path::Path::new("/var/cache/grove"))
    );
    assert_eq!(
        arborist.advisory_db_path,
        temp_dir.path().join("advisories.json")
    );
    assert_eq!(arborist.min_severity, Severity::Medium);
    arborist.validate().expect("mapped config should validate");
}
