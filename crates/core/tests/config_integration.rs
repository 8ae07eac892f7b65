//! grove.toml 통합 설정 테스트
//!
//! - grove.toml.example 파싱 테스트
//! - 부분 설정 (일부 섹션만) 로딩 테스트
//! - 환경변수 우선순위 테스트
//! - 빈 파일 / 잘못된 형식 에러 테스트

use grove_core::config::GroveConfig;
use grove_core::error::{ConfigError, GroveError};

// =============================================================================
// grove.toml.example 파싱 테스트
// =============================================================================

#[test]
fn example_config_parses_and_validates() {
    let content = include_str!("../../../grove.toml.example");
    let config = GroveConfig::parse(content).expect("example config should parse");
    config
        .validate()
        .expect("example config should pass validation");

    assert_eq!(config.general.log_level, "warn");
    assert_eq!(config.install.lockfile_version, 3);
    assert_eq!(config.install.save_prefix, "^");
    assert_eq!(config.audit.min_severity, "low");
}

#[test]
fn example_config_matches_code_defaults() {
    let content = include_str!("../../../grove.toml.example");
    let from_file = GroveConfig::parse(content).expect("should parse");
    let from_code = GroveConfig::default();

    assert_eq!(from_file.general.log_level, from_code.general.log_level);
    assert_eq!(from_file.general.log_format, from_code.general.log_format);

    assert_eq!(from_file.install.registry_dir, from_code.install.registry_dir);
    assert_eq!(
        from_file.install.lockfile_version,
        from_code.install.lockfile_version
    );
    assert_eq!(from_file.install.prefer_dedupe, from_code.install.prefer_dedupe);
    assert_eq!(
        from_file.install.strict_peer_deps,
        from_code.install.strict_peer_deps
    );
    assert_eq!(from_file.install.node_version, from_code.install.node_version);
    assert_eq!(from_file.install.package_lock, from_code.install.package_lock);
    assert_eq!(
        from_file.install.workspaces_enabled,
        from_code.install.workspaces_enabled
    );

    assert_eq!(from_file.reify.concurrency, from_code.reify.concurrency);
    assert_eq!(
        from_file.reify.fetch_timeout_secs,
        from_code.reify.fetch_timeout_secs
    );
    assert_eq!(from_file.reify.fetch_retries, from_code.reify.fetch_retries);
    assert_eq!(from_file.reify.cache_dir, from_code.reify.cache_dir);
    assert_eq!(from_file.reify.trust_cache, from_code.reify.trust_cache);

    assert_eq!(
        from_file.audit.advisory_db_path,
        from_code.audit.advisory_db_path
    );
    assert_eq!(from_file.audit.min_severity, from_code.audit.min_severity);
}

// =============================================================================
// 부분 설정 로딩 테스트
// =============================================================================

#[test]
fn partial_config_install_only() {
    let toml = r#"
[install]
prefer_dedupe = true
lockfile_version = 1
"#;
    let config = GroveConfig::parse(toml).expect("should parse");
    config.validate().expect("should validate");

    assert!(config.install.prefer_dedupe);
    assert_eq!(config.install.lockfile_version, 1);
    // 나머지 섹션은 기본값
    assert_eq!(config.general.log_level, "warn");
    assert_eq!(config.reify.concurrency, 8);
}

#[test]
fn partial_config_reify_and_audit() {
    let toml = r#"
[reify]
concurrency = 2
cache_dir = "/tmp/grove-cache"

[audit]
min_severity = "moderate"
"#;
    let config = GroveConfig::parse(toml).expect("should parse");
    config.validate().expect("should validate");

    assert_eq!(config.reify.concurrency, 2);
    assert_eq!(config.reify.cache_dir, "/tmp/grove-cache");
    assert_eq!(config.audit.min_severity, "moderate");
    assert!(config.install.package_lock);
}

// =============================================================================
// 환경변수 오버라이드 테스트
// =============================================================================

#[test]
#[serial_test::serial]
fn env_override_takes_precedence_over_toml() {
    let toml = r#"
[install]
lockfile_version = 3
"#;

    let original = std::env::var("GROVE_INSTALL_LOCKFILE_VERSION").ok();
    // SAFETY: serial 테스트로 직렬화되어 환경변수 조작이 안전합니다.
    unsafe {
        std::env::set_var("GROVE_INSTALL_LOCKFILE_VERSION", "2");
    }

    let mut config = GroveConfig::parse(toml).expect("should parse");
    config.apply_env_overrides();
    let result = config.install.lockfile_version;

    // SAFETY: 테스트 정리
    unsafe {
        match original {
            Some(val) => std::env::set_var("GROVE_INSTALL_LOCKFILE_VERSION", val),
            None => std::env::remove_var("GROVE_INSTALL_LOCKFILE_VERSION"),
        }
    }

    assert_eq!(result, 2);
}

#[test]
#[serial_test::serial]
fn env_override_numeric_field_ignores_garbage() {
    let original = std::env::var("GROVE_REIFY_FETCH_RETRIES").ok();
    // SAFETY: serial 테스트로 직렬화되어 환경변수 조작이 안전합니다.
    unsafe {
        std::env::set_var("GROVE_REIFY_FETCH_RETRIES", "many");
    }

    let mut config = GroveConfig::default();
    config.apply_env_overrides();
    let result = config.reify.fetch_retries;

    // SAFETY: 테스트 정리
    unsafe {
        match original {
            Some(val) => std::env::set_var("GROVE_REIFY_FETCH_RETRIES", val),
            None => std::env::remove_var("GROVE_REIFY_FETCH_RETRIES"),
        }
    }

    assert_eq!(result, 2);
}

#[tokio::test]
#[serial_test::serial]
async fn load_applies_env_and_validates() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("grove.toml");
    std::fs::write(&path, "[reify]\nconcurrency = 4\n").expect("write config");

    // SAFETY: serial 테스트로 직렬화되어 환경변수 조작이 안전합니다.
    unsafe {
        std::env::set_var("GROVE_REIFY_CONCURRENCY", "0");
    }
    let result = GroveConfig::load(&path).await;
    // SAFETY: 테스트 정리
    unsafe {
        std::env::remove_var("GROVE_REIFY_CONCURRENCY");
    }

    let err = result.expect_err("zero concurrency must be rejected");
    assert!(matches!(
        err,
        GroveError::Config(ConfigError::InvalidValue { .. })
    ));
}

// =============================================================================
// 에러 케이스
// =============================================================================

#[test]
fn empty_string_parses_with_defaults() {
    let config = GroveConfig::parse("").expect("empty should parse");
    config.validate().expect("defaults should validate");
    assert_eq!(config.install.lockfile_version, 3);
}

#[test]
fn wrong_type_for_numeric_field() {
    let toml = r#"
[reify]
concurrency = "eight"
"#;
    let err = GroveConfig::parse(toml).unwrap_err();
    assert!(matches!(
        err,
        GroveError::Config(ConfigError::ParseFailed { .. })
    ));
}

#[test]
fn unknown_section_is_ignored() {
    let toml = r#"
[general]
log_level = "info"

[future_section]
key = "value"
"#;
    let config = GroveConfig::parse(toml).expect("unknown sections should be ignored");
    assert_eq!(config.general.log_level, "info");
}

#[tokio::test]
async fn from_file_nonexistent_returns_file_not_found() {
    let result = GroveConfig::from_file("/tmp/grove_test_nonexistent_12345.toml").await;
    assert!(matches!(
        result.unwrap_err(),
        GroveError::Config(ConfigError::FileNotFound { .. })
    ));
}

#[test]
fn example_config_serialize_roundtrip() {
    let content = include_str!("../../../grove.toml.example");
    let config = GroveConfig::parse(content).expect("should parse");
    let serialized = toml::to_string_pretty(&config).expect("should serialize");
    let reparsed = GroveConfig::parse(&serialized).expect("should reparse");
    reparsed.validate().expect("should validate");

    assert_eq!(config.install.save_prefix, reparsed.install.save_prefix);
    assert_eq!(config.reify.concurrency, reparsed.reify.concurrency);
}
