//! 설정 관리: grove.toml 파싱 및 런타임 설정
//!
//! [`GroveConfig`]는 모든 단계(install, reify, audit)의 설정을 담는 최상위 구조체입니다.
//!
//! # 설정 로딩 우선순위
//! 1. CLI 인자 (최고 우선)
//! 2. 환경변수 (`GROVE_INSTALL_LOCKFILE_VERSION=2` 형식)
//! 3. 설정 파일 (`grove.toml`)
//! 4. 기본값 (`Default` 구현)
//!
//! # 사용 예시
//! ```no_run
//! # async fn example() -> Result<(), grove_core::error::GroveError> {
//! use grove_core::config::GroveConfig;
//!
//! // 파일에서 로드 + 환경변수 오버라이드
//! let config = GroveConfig::load("grove.toml").await?;
//!
//! // TOML 문자열에서 직접 파싱
//! let config = GroveConfig::parse("[install]\nprefer_dedupe = true")?;
//! # Ok(())
//! # }
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{ConfigError, GroveError};

/// Grove 통합 설정
///
/// `grove.toml` 파일의 최상위 구조를 나타냅니다.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GroveConfig {
    /// 일반 설정
    #[serde(default)]
    pub general: GeneralConfig,
    /// 의존성 해석 설정
    #[serde(default)]
    pub install: InstallConfig,
    /// 파일시스템 반영 설정
    #[serde(default)]
    pub reify: ReifyConfig,
    /// 보안 감사 설정
    #[serde(default)]
    pub audit: AuditConfig,
}

impl GroveConfig {
    /// TOML 파일에서 설정을 로드하고 환경변수 오버라이드를 적용합니다.
    ///
    /// 설정 로딩 순서:
    /// 1. TOML 파일 파싱
    /// 2. 환경변수 오버라이드 적용
    /// 3. 유효성 검증
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, GroveError> {
        let mut config = Self::from_file(path).await?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// 파일이 없으면 기본값을 사용하는 로더입니다.
    ///
    /// CLI가 `--config`를 명시하지 않았을 때 사용합니다.
    pub async fn load_or_default(path: impl AsRef<Path>) -> Result<Self, GroveError> {
        let path = path.as_ref();
        let mut config = match Self::from_file(path).await {
            Ok(config) => config,
            Err(GroveError::Config(ConfigError::FileNotFound { .. })) => Self::default(),
            Err(e) => return Err(e),
        };
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// TOML 파일에서 설정을 로드합니다 (환경변수 오버라이드 없음).
    pub async fn from_file(path: impl AsRef<Path>) -> Result<Self, GroveError> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                GroveError::Config(ConfigError::FileNotFound {
                    path: path.display().to_string(),
                })
            } else {
                GroveError::Io(e)
            }
        })?;
        let config = Self::parse(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// TOML 문자열에서 설정을 파싱합니다.
    pub fn parse(toml_str: &str) -> Result<Self, GroveError> {
        toml::from_str(toml_str).map_err(|e| {
            GroveError::Config(ConfigError::ParseFailed {
                reason: e.to_string(),
            })
        })
    }

    /// 환경변수로 설정값을 오버라이드합니다.
    ///
    /// 환경변수 네이밍 규칙: `GROVE_{SECTION}_{FIELD}`
    /// 예: `GROVE_REIFY_CONCURRENCY=4`
    pub fn apply_env_overrides(&mut self) {
        // General
        override_string(&mut self.general.log_level, "GROVE_GENERAL_LOG_LEVEL");
        override_string(&mut self.general.log_format, "GROVE_GENERAL_LOG_FORMAT");

        // Install
        override_string(&mut self.install.registry_dir, "GROVE_INSTALL_REGISTRY_DIR");
        override_u32(
            &mut self.install.lockfile_version,
            "GROVE_INSTALL_LOCKFILE_VERSION",
        );
        override_bool(&mut self.install.prefer_dedupe, "GROVE_INSTALL_PREFER_DEDUPE");
        override_bool(
            &mut self.install.strict_peer_deps,
            "GROVE_INSTALL_STRICT_PEER_DEPS",
        );
        override_bool(
            &mut self.install.legacy_peer_deps,
            "GROVE_INSTALL_LEGACY_PEER_DEPS",
        );
        override_bool(&mut self.install.engine_strict, "GROVE_INSTALL_ENGINE_STRICT");
        override_string(&mut self.install.node_version, "GROVE_INSTALL_NODE_VERSION");
        override_string(&mut self.install.save_prefix, "GROVE_INSTALL_SAVE_PREFIX");
        override_bool(&mut self.install.package_lock, "GROVE_INSTALL_PACKAGE_LOCK");
        override_bool(
            &mut self.install.workspaces_enabled,
            "GROVE_INSTALL_WORKSPACES_ENABLED",
        );

        // Reify
        override_usize(&mut self.reify.concurrency, "GROVE_REIFY_CONCURRENCY");
        override_u64(
            &mut self.reify.fetch_timeout_secs,
            "GROVE_REIFY_FETCH_TIMEOUT_SECS",
        );
        override_u32(&mut self.reify.fetch_retries, "GROVE_REIFY_FETCH_RETRIES");
        override_string(&mut self.reify.cache_dir, "GROVE_REIFY_CACHE_DIR");
        override_bool(&mut self.reify.trust_cache, "GROVE_REIFY_TRUST_CACHE");
        override_bool(&mut self.reify.ignore_scripts, "GROVE_REIFY_IGNORE_SCRIPTS");
        override_bool(&mut self.reify.dry_run, "GROVE_REIFY_DRY_RUN");

        // Audit
        override_string(
            &mut self.audit.advisory_db_path,
            "GROVE_AUDIT_ADVISORY_DB_PATH",
        );
        override_string(&mut self.audit.min_severity, "GROVE_AUDIT_MIN_SEVERITY");
    }

    /// 설정값의 유효성을 검증합니다.
    pub fn validate(&self) -> Result<(), GroveError> {
        // log_level 검증
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.general.log_level.as_str()) {
            return Err(invalid(
                "general.log_level",
                format!("must be one of: {}", valid_levels.join(", ")),
            ));
        }

        // log_format 검증
        let valid_formats = ["json", "pretty"];
        if !valid_formats.contains(&self.general.log_format.as_str()) {
            return Err(invalid(
                "general.log_format",
                format!("must be one of: {}", valid_formats.join(", ")),
            ));
        }

        if !(1..=3).contains(&self.install.lockfile_version) {
            return Err(invalid("install.lockfile_version", "must be 1, 2 or 3"));
        }

        if self.install.strict_peer_deps && self.install.legacy_peer_deps {
            return Err(invalid(
                "install.strict_peer_deps",
                "cannot be combined with install.legacy_peer_deps",
            ));
        }

        let valid_prefixes = ["", "^", "~"];
        if !valid_prefixes.contains(&self.install.save_prefix.as_str()) {
            return Err(invalid(
                "install.save_prefix",
                "must be one of: \"\", \"^\", \"~\"",
            ));
        }

        if self.reify.concurrency == 0 || self.reify.concurrency > MAX_CONCURRENCY {
            return Err(invalid(
                "reify.concurrency",
                format!("must be 1-{MAX_CONCURRENCY}"),
            ));
        }

        if self.reify.fetch_timeout_secs == 0 || self.reify.fetch_timeout_secs > MAX_TIMEOUT_SECS {
            return Err(invalid(
                "reify.fetch_timeout_secs",
                format!("must be 1-{MAX_TIMEOUT_SECS}"),
            ));
        }

        if self.reify.fetch_retries > MAX_RETRIES {
            return Err(invalid(
                "reify.fetch_retries",
                format!("must be 0-{MAX_RETRIES}"),
            ));
        }

        // min_severity 검증
        let valid_severities = ["info", "low", "moderate", "medium", "high", "critical"];
        if !valid_severities.contains(&self.audit.min_severity.as_str()) {
            return Err(invalid(
                "audit.min_severity",
                format!("must be one of: {}", valid_severities.join(", ")),
            ));
        }

        Ok(())
    }
}

/// 설정 상한값 상수
const MAX_CONCURRENCY: usize = 256;
const MAX_TIMEOUT_SECS: u64 = 3_600;
const MAX_RETRIES: u32 = 10;

fn invalid(field: &str, reason: impl Into<String>) -> GroveError {
    ConfigError::InvalidValue {
        field: field.to_owned(),
        reason: reason.into(),
    }
    .into()
}

/// 일반 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// 로그 레벨 (trace, debug, info, warn, error)
    pub log_level: String,
    /// 로그 형식 (json, pretty)
    pub log_format: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: "warn".to_owned(),
            log_format: "pretty".to_owned(),
        }
    }
}

/// 의존성 해석 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InstallConfig {
    /// 오프라인 레지스트리 디렉토리 (`<name>.json` packument + tarball)
    pub registry_dir: String,
    /// 기록할 lockfile 버전 (1, 2, 3)
    pub lockfile_version: u32,
    /// 더 높은 위치의 호환 노드를 우선 재사용
    pub prefer_dedupe: bool,
    /// peer 충돌을 치명적 에러로 취급
    pub strict_peer_deps: bool,
    /// peer 의존성을 무시 (npm v6 방식)
    pub legacy_peer_deps: bool,
    /// `engines.node` 불일치를 치명적 에러로 취급
    pub engine_strict: bool,
    /// engines 검사에 사용할 Node.js 버전
    pub node_version: String,
    /// `package.json` 저장 시 버전 앞에 붙일 접두사
    pub save_prefix: String,
    /// lockfile 기록 여부
    pub package_lock: bool,
    /// 워크스페이스 지원 여부
    pub workspaces_enabled: bool,
}

impl Default for InstallConfig {
    fn default() -> Self {
        Self {
            registry_dir: "registry".to_owned(),
            lockfile_version: 3,
            prefer_dedupe: false,
            strict_peer_deps: false,
            legacy_peer_deps: false,
            engine_strict: false,
            node_version: "22.0.0".to_owned(),
            save_prefix: "^".to_owned(),
            package_lock: true,
            workspaces_enabled: true,
        }
    }
}

/// 파일시스템 반영 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReifyConfig {
    /// 동시에 처리할 최대 리프 수
    pub concurrency: usize,
    /// 아티팩트 조회 타임아웃 (초)
    pub fetch_timeout_secs: u64,
    /// 재시도 횟수 (첫 시도 제외)
    pub fetch_retries: u32,
    /// 아티팩트 캐시 디렉토리 (비어있으면 캐시 미사용)
    pub cache_dir: String,
    /// 캐시된 아티팩트를 재검증 없이 신뢰
    pub trust_cache: bool,
    /// 라이프사이클 스크립트 실행 생략
    pub ignore_scripts: bool,
    /// 파일시스템을 변경하지 않고 계획만 출력
    pub dry_run: bool,
}

impl Default for ReifyConfig {
    fn default() -> Self {
        Self {
            concurrency: 8,
            fetch_timeout_secs: 60,
            fetch_retries: 2,
            cache_dir: String::new(),
            trust_cache: false,
            ignore_scripts: false,
            dry_run: false,
        }
    }
}

/// 보안 감사 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditConfig {
    /// 권고 DB 경로 (파일 또는 디렉토리)
    pub advisory_db_path: String,
    /// 보고할 최소 심각도
    pub min_severity: String,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            advisory_db_path: "advisories.json".to_owned(),
            min_severity: "low".to_owned(),
        }
    }
}

// --- 환경변수 오버라이드 헬퍼 ---

fn override_string(target: &mut String, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        *target = val;
    }
}

fn override_bool(target: &mut bool, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        match val.parse::<bool>() {
            Ok(parsed) => *target = parsed,
            Err(_) => warn!(
                env_key,
                value = val.as_str(),
                "failed to parse bool from env var, ignoring"
            ),
        }
    }
}

fn override_usize(target: &mut usize, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        match val.parse::<usize>() {
            Ok(parsed) => *target = parsed,
            Err(_) => warn!(
                env_key,
                value = val.as_str(),
                "failed to parse usize from env var, ignoring"
            ),
        }
    }
}

fn override_u32(target: &mut u32, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        match val.parse::<u32>() {
            Ok(parsed) => *target = parsed,
            Err(_) => warn!(
                env_key,
                value = val.as_str(),
                "failed to parse u32 from env var, ignoring"
            ),
        }
    }
}

fn override_u64(target: &mut u64, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        match val.parse::<u64>() {
            Ok(parsed) => *target = parsed,
            Err(_) => warn!(
                env_key,
                value = val.as_str(),
                "failed to parse u64 from env var, ignoring"
            ),
        }
    }
}
