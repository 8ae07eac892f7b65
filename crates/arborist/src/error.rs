//! Arborist 에러 타입
//!
//! [`ArboristError`]는 의존성 해석, lockfile 처리, 파일시스템 반영 중 발생하는
//! 모든 치명적 에러를 나타냅니다. 엣지/노드 단위 문제는 에러가 아니라
//! 트리에 기록되며, 이 타입은 작업 자체를 중단해야 할 때만 사용됩니다.
//!
//! `From<ArboristError> for GroveError` 구현을 통해 `?` 연산자로
//! 상위 에러 타입으로 전파됩니다.
//!
//! # 에러 카테고리
//!
//! - **해석**: `Unsatisfiable`, `Conflict`, `PeerViolation`, `EngineMismatch`, `ConfigInvalid`
//! - **반영**: `IntegrityMismatch`, `FilesystemConflict`, `Cancelled`
//! - **파싱**: `LockfileParse`, `ManifestParse`, `SpecParse`
//! - **조회**: `Fetch`, `Timeout` (재시도 가능)
//! - **기타**: `Config`, `Io`

use grove_core::error::{AuditError, ConfigError, GroveError, ReifyError, ResolveError};

/// Arborist 도메인 에러
#[derive(Debug, thiserror::Error)]
pub enum ArboristError {
    /// 어떤 버전도 spec을 만족하지 않음
    #[error("no version of {name} satisfies {spec}")]
    Unsatisfiable {
        /// 패키지 이름
        name: String,
        /// 요구된 spec
        spec: String,
    },

    /// 두 요구사항이 어떤 배치로도 공존할 수 없음
    #[error("placement conflict for {name}: {reason}")]
    Conflict {
        /// 패키지 이름
        name: String,
        /// 충돌 사유
        reason: String,
    },

    /// peer 의존성 위반 (strict 모드에서 승격)
    #[error("peer dependency violation: {0}")]
    PeerViolation(String),

    /// `engines.node`가 현재 node 버전을 허용하지 않음 (engine-strict에서 승격)
    #[error("unsupported engine: {package} requires node {wanted}, current {current}")]
    EngineMismatch {
        /// `name@version`
        package: String,
        /// 요구 범위
        wanted: String,
        /// 설정된 node 버전
        current: String,
    },

    /// 가져온 아티팩트 해시가 기록된 값과 다름
    #[error("integrity mismatch at {location}: expected {expected}, got {actual}")]
    IntegrityMismatch {
        /// 트리 위치
        location: String,
        /// 기록된 integrity
        expected: String,
        /// 실제 계산된 integrity
        actual: String,
    },

    /// 예상하지 못한 기존 엔트리가 쓰기를 막음
    #[error("filesystem conflict at {path}: {reason}")]
    FilesystemConflict {
        /// 충돌 경로
        path: String,
        /// 사유
        reason: String,
    },

    /// 루트 override 규칙이 모순됨
    #[error("invalid override configuration: {0}")]
    ConfigInvalid(String),

    /// lockfile 파싱 실패
    #[error("lockfile parse error: {path}: {reason}")]
    LockfileParse {
        /// lockfile 경로
        path: String,
        /// 사유
        reason: String,
    },

    /// package.json 파싱 실패
    #[error("manifest parse error: {path}: {reason}")]
    ManifestParse {
        /// manifest 경로
        path: String,
        /// 사유
        reason: String,
    },

    /// 의존성 지정자 파싱 실패
    #[error("invalid spec '{spec}' for {name}: {reason}")]
    SpecParse {
        /// 패키지 이름
        name: String,
        /// 원본 spec 문자열
        spec: String,
        /// 사유
        reason: String,
    },

    /// 메타데이터/아티팩트 조회 실패
    #[error("fetch failed for {name}: {reason}")]
    Fetch {
        /// 패키지 이름
        name: String,
        /// 사유
        reason: String,
    },

    /// 외부 호출 타임아웃
    #[error("timed out after {secs}s: {what}")]
    Timeout {
        /// 대상 설명
        what: String,
        /// 타임아웃 (초)
        secs: u64,
    },

    /// 라이프사이클 스크립트 실패
    #[error("{event} script failed at {location}: {reason}")]
    Script {
        /// 트리 위치
        location: String,
        /// 이벤트 이름
        event: String,
        /// 사유
        reason: String,
    },

    /// 권고 DB를 읽거나 해석하지 못함
    #[error("advisory database {path}: {reason}")]
    AdvisoryDb {
        /// DB 경로
        path: String,
        /// 사유
        reason: String,
    },

    /// 호출자가 작업을 취소함
    #[error("operation cancelled")]
    Cancelled,

    /// 설정 에러
    #[error("config error: {field}: {reason}")]
    Config {
        /// 설정 필드명
        field: String,
        /// 에러 사유
        reason: String,
    },

    /// 파일 I/O 에러
    #[error("io error: {path}: {source}")]
    Io {
        /// 관련 파일 경로
        path: String,
        /// 원본 I/O 에러
        source: std::io::Error,
    },
}

impl ArboristError {
    /// 외부 조회 계층이 재시도해야 하는 에러인지 반환합니다.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::Fetch { .. })
    }

    /// 작업 전체를 중단시키는 에러인지 반환합니다.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::IntegrityMismatch { .. }
                | Self::ConfigInvalid(_)
                | Self::PeerViolation(_)
                | Self::EngineMismatch { .. }
                | Self::Cancelled
        )
    }

    pub(crate) fn io(path: impl AsRef<std::path::Path>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.as_ref().display().to_string(),
            source,
        }
    }
}

impl From<ArboristError> for GroveError {
    fn from(err: ArboristError) -> Self {
        match err {
            ArboristError::Unsatisfiable { name, spec } => GroveError::Resolve(
                ResolveError::Unsatisfiable(format!("{name}@{spec}")),
            ),
            ArboristError::Conflict { name, reason } => {
                GroveError::Resolve(ResolveError::Conflict(format!("{name}: {reason}")))
            }
            ArboristError::PeerViolation(msg) => {
                GroveError::Resolve(ResolveError::PeerViolation(msg))
            }
            err @ ArboristError::EngineMismatch { .. } => {
                GroveError::Resolve(ResolveError::EngineMismatch(err.to_string()))
            }
            ArboristError::ConfigInvalid(msg) => {
                GroveError::Resolve(ResolveError::ConfigInvalid(msg))
            }
            ArboristError::LockfileParse { path, reason } => GroveError::Resolve(
                ResolveError::Parse(format!("lockfile {path}: {reason}")),
            ),
            ArboristError::ManifestParse { path, reason } => GroveError::Resolve(
                ResolveError::Parse(format!("manifest {path}: {reason}")),
            ),
            ArboristError::SpecParse { name, spec, reason } => GroveError::Resolve(
                ResolveError::Parse(format!("spec {name}@{spec}: {reason}")),
            ),
            ArboristError::IntegrityMismatch {
                location,
                expected,
                actual,
            } => GroveError::Reify(ReifyError::IntegrityMismatch {
                location,
                expected,
                actual,
            }),
            ArboristError::FilesystemConflict { path, reason } => {
                GroveError::Reify(ReifyError::FilesystemConflict(format!("{path}: {reason}")))
            }
            ArboristError::Fetch { name, reason } => {
                GroveError::Reify(ReifyError::Fetch(format!("{name}: {reason}")))
            }
            ArboristError::Timeout { what, secs } => {
                GroveError::Reify(ReifyError::Fetch(format!("{what}: timed out after {secs}s")))
            }
            ArboristError::Script {
                location,
                event,
                reason,
            } => GroveError::Reify(ReifyError::Script(format!("{location} {event}: {reason}"))),
            ArboristError::AdvisoryDb { path, reason } => {
                GroveError::Audit(AuditError::DbLoad { path, reason })
            }
            ArboristError::Cancelled => GroveError::Reify(ReifyError::Cancelled),
            ArboristError::Config { field, reason } => {
                GroveError::Config(ConfigError::InvalidValue { field, reason })
            }
            ArboristError::Io { source, .. } => GroveError::Io(source),
        }
    }
}
