//! Arborist 설정
//!
//! [`ArboristConfig`]는 core의 [`GroveConfig`](grove_core::config::GroveConfig)의
//! install / reify / audit 섹션을 하나로 모으고, 프로젝트 경로와
//! 호출 단위 옵션(`package_lock_only` 등)을 추가합니다.
//!
//! # 사용 예시
//!
//! ```
//! use grove_arborist::ArboristConfigBuilder;
//!
//! let config = ArboristConfigBuilder::new()
//!     .path("/tmp/project")
//!     .prefer_dedupe(true)
//!     .concurrency(4)
//!     .build()
//!     .unwrap();
//! assert!(config.prefer_dedupe);
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use grove_core::config::GroveConfig;
use grove_core::types::Severity;

use crate::error::ArboristError;

/// Arborist 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArboristConfig {
    /// 프로젝트 루트 경로 (`package.json` 위치)
    pub path: PathBuf,
    /// 오프라인 레지스트리 디렉토리
    pub registry_dir: PathBuf,
    /// 기록할 lockfile 버전 (1, 2, 3)
    pub lockfile_version: u32,
    /// 더 높은 위치의 호환 노드를 우선 재사용
    pub prefer_dedupe: bool,
    /// peer 충돌을 치명적 에러로 승격
    pub strict_peer_deps: bool,
    /// peer 의존성을 무시
    pub legacy_peer_deps: bool,
    /// engines 불일치를 치명적 에러로 승격
    pub engine_strict: bool,
    /// engines 검사 기준 Node.js 버전
    pub node_version: String,
    /// 저장 시 버전 접두사
    pub save_prefix: String,
    /// lockfile 기록 여부
    pub package_lock: bool,
    /// lockfile만 갱신하고 node_modules는 건드리지 않음
    pub package_lock_only: bool,
    /// 워크스페이스 지원 여부
    pub workspaces_enabled: bool,

    /// 동시에 처리할 최대 리프 수
    pub concurrency: usize,
    /// 외부 조회 타임아웃 (초)
    pub fetch_timeout_secs: u64,
    /// 조회 재시도 횟수
    pub fetch_retries: u32,
    /// 아티팩트 캐시 디렉토리
    pub cache_dir: Option<PathBuf>,
    /// 캐시 아티팩트를 재검증 없이 신뢰
    pub trust_cache: bool,
    /// 라이프사이클 스크립트 생략
    pub ignore_scripts: bool,
    /// 계획만 세우고 반영하지 않음
    pub dry_run: bool,

    /// 권고 DB 경로
    pub advisory_db_path: PathBuf,
    /// 보고할 최소 심각도
    pub min_severity: Severity,
}

impl Default for ArboristConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("."),
            registry_dir: PathBuf::from("registry"),
            lockfile_version: 3,
            prefer_dedupe: false,
            strict_peer_deps: false,
            legacy_peer_deps: false,
            engine_strict: false,
            node_version: "22.0.0".to_owned(),
            save_prefix: "^".to_owned(),
            package_lock: true,
            package_lock_only: false,
            workspaces_enabled: true,
            concurrency: 8,
            fetch_timeout_secs: 60,
            fetch_retries: 2,
            cache_dir: None,
            trust_cache: false,
            ignore_scripts: false,
            dry_run: false,
            advisory_db_path: PathBuf::from("advisories.json"),
            min_severity: Severity::Low,
        }
    }
}

/// 설정 상한값 상수
const MAX_CONCURRENCY: usize = 256;
const MAX_TIMEOUT_SECS: u64 = 3_600;
const MAX_RETRIES: u32 = 10;

impl ArboristConfig {
    /// core 설정에서 Arborist 설정을 생성합니다.
    ///
    /// 상대 경로(`registry_dir`, `cache_dir`, `advisory_db_path`)는
    /// 프로젝트 경로 기준으로 해석합니다.
    pub fn from_core(core: &GroveConfig, project_path: impl AsRef<Path>) -> Self {
        let path = project_path.as_ref().to_path_buf();
        let relative = |p: &str| {
            let p = Path::new(p);
            if p.is_absolute() {
                p.to_path_buf()
            } else {
                path.join(p)
            }
        };

        Self {
            registry_dir: relative(&core.install.registry_dir),
            lockfile_version: core.install.lockfile_version,
            prefer_dedupe: core.install.prefer_dedupe,
            strict_peer_deps: core.install.strict_peer_deps,
            legacy_peer_deps: core.install.legacy_peer_deps,
            engine_strict: core.install.engine_strict,
            node_version: core.install.node_version.clone(),
            save_prefix: core.install.save_prefix.clone(),
            package_lock: core.install.package_lock,
            workspaces_enabled: core.install.workspaces_enabled,
            concurrency: core.reify.concurrency,
            fetch_timeout_secs: core.reify.fetch_timeout_secs,
            fetch_retries: core.reify.fetch_retries,
            cache_dir: (!core.reify.cache_dir.is_empty()).then(|| relative(&core.reify.cache_dir)),
            trust_cache: core.reify.trust_cache,
            ignore_scripts: core.reify.ignore_scripts,
            dry_run: core.reify.dry_run,
            advisory_db_path: relative(&core.audit.advisory_db_path),
            min_severity: Severity::from_str_loose(&core.audit.min_severity)
                .unwrap_or(Severity::Low),
            path,
            ..Self::default()
        }
    }

    /// 외부 조회 타임아웃을 반환합니다.
    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    /// 설정 값의 유효성을 검증합니다.
    ///
    /// # 검증 규칙
    ///
    /// - `lockfile_version`: 1-3
    /// - `concurrency`: 1-256
    /// - `fetch_timeout_secs`: 1-3600
    /// - `fetch_retries`: 0-10
    /// - `strict_peer_deps`와 `legacy_peer_deps`는 동시에 켤 수 없음
    /// - `node_version`: 유효한 semver
    pub fn validate(&self) -> Result<(), ArboristError> {
        if !(1..=3).contains(&self.lockfile_version) {
            return Err(config_err("lockfile_version", "must be 1, 2 or 3"));
        }

        if self.concurrency == 0 || self.concurrency > MAX_CONCURRENCY {
            return Err(config_err(
                "concurrency",
                format!("must be 1-{MAX_CONCURRENCY}"),
            ));
        }

        if self.fetch_timeout_secs == 0 || self.fetch_timeout_secs > MAX_TIMEOUT_SECS {
            return Err(config_err(
                "fetch_timeout_secs",
                format!("must be 1-{MAX_TIMEOUT_SECS}"),
            ));
        }

        if self.fetch_retries > MAX_RETRIES {
            return Err(config_err(
                "fetch_retries",
                format!("must be 0-{MAX_RETRIES}"),
            ));
        }

        if self.strict_peer_deps && self.legacy_peer_deps {
            return Err(config_err(
                "strict_peer_deps",
                "cannot be combined with legacy_peer_deps",
            ));
        }

        if semver::Version::parse(&self.node_version).is_err() {
            return Err(config_err(
                "node_version",
                format!("'{}' is not a valid version", self.node_version),
            ));
        }

        Ok(())
    }
}

fn config_err(field: &str, reason: impl Into<String>) -> ArboristError {
    ArboristError::Config {
        field: field.to_owned(),
        reason: reason.into(),
    }
}

/// [`ArboristConfig`] 빌더
///
/// 빌드 시 유효성 검증을 수행합니다.
#[derive(Default)]
pub struct ArboristConfigBuilder {
    config: ArboristConfig,
}

impl ArboristConfigBuilder {
    /// 기본값을 가진 새 빌더를 생성합니다.
    pub fn new() -> Self {
        Self::default()
    }

    /// 기존 설정에서 시작하는 빌더를 생성합니다.
    pub fn from_config(config: ArboristConfig) -> Self {
        Self { config }
    }

    /// 프로젝트 경로를 설정합니다.
    pub fn path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.path = path.into();
        self
    }

    /// 오프라인 레지스트리 디렉토리를 설정합니다.
    pub fn registry_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.registry_dir = dir.into();
        self
    }

    /// lockfile 버전을 설정합니다.
    pub fn lockfile_version(mut self, version: u32) -> Self {
        self.config.lockfile_version = version;
        self
    }

    /// dedup 우선 여부를 설정합니다.
    pub fn prefer_dedupe(mut self, prefer: bool) -> Self {
        self.config.prefer_dedupe = prefer;
        self
    }

    /// strict peer 모드를 설정합니다.
    pub fn strict_peer_deps(mut self, strict: bool) -> Self {
        self.config.strict_peer_deps = strict;
        self
    }

    /// legacy peer 모드를 설정합니다.
    pub fn legacy_peer_deps(mut self, legacy: bool) -> Self {
        self.config.legacy_peer_deps = legacy;
        self
    }

    /// engines strict 모드를 설정합니다.
    pub fn engine_strict(mut self, strict: bool) -> Self {
        self.config.engine_strict = strict;
        self
    }

    /// engines 검사 기준 Node.js 버전을 설정합니다.
    pub fn node_version(mut self, version: impl Into<String>) -> Self {
        self.config.node_version = version.into();
        self
    }

    /// 저장 접두사를 설정합니다.
    pub fn save_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.config.save_prefix = prefix.into();
        self
    }

    /// lockfile 기록 여부를 설정합니다.
    pub fn package_lock(mut self, enabled: bool) -> Self {
        self.config.package_lock = enabled;
        self
    }

    /// lockfile만 갱신할지 설정합니다.
    pub fn package_lock_only(mut self, only: bool) -> Self {
        self.config.package_lock_only = only;
        self
    }

    /// 워크스페이스 지원 여부를 설정합니다.
    pub fn workspaces_enabled(mut self, enabled: bool) -> Self {
        self.config.workspaces_enabled = enabled;
        self
    }

    /// 동시성 한도를 설정합니다.
    pub fn concurrency(mut self, concurrency: usize) -> Self {
        self.config.concurrency = concurrency;
        self
    }

    /// 조회 타임아웃(초)을 설정합니다.
    pub fn fetch_timeout_secs(mut self, secs: u64) -> Self {
        self.config.fetch_timeout_secs = secs;
        self
    }

    /// 조회 재시도 횟수를 설정합니다.
    pub fn fetch_retries(mut self, retries: u32) -> Self {
        self.config.fetch_retries = retries;
        self
    }

    /// 아티팩트 캐시 디렉토리를 설정합니다.
    pub fn cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.cache_dir = Some(dir.into());
        self
    }

    /// 캐시 신뢰 여부를 설정합니다.
    pub fn trust_cache(mut self, trust: bool) -> Self {
        self.config.trust_cache = trust;
        self
    }

    /// 스크립트 생략 여부를 설정합니다.
    pub fn ignore_scripts(mut self, ignore: bool) -> Self {
        self.config.ignore_scripts = ignore;
        self
    }

    /// dry-run 여부를 설정합니다.
    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.config.dry_run = dry_run;
        self
    }

    /// 권고 DB 경로를 설정합니다.
    pub fn advisory_db_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.advisory_db_path = path.into();
        self
    }

    /// 최소 심각도를 설정합니다.
    pub fn min_severity(mut self, severity: Severity) -> Self {
        self.config.min_severity = severity;
        self
    }

    /// 설정을 빌드합니다. 유효성 검증을 수행합니다.
    pub fn build(self) -> Result<ArboristConfig, ArboristError> {
        self.config.validate()?;
        Ok(self.config)
    }
}
