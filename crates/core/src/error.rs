//! 에러 타입: 도메인별 에러 정의
//!
//! [`GroveError`]는 워크스페이스 최상위 에러입니다. 각 도메인 크레이트는
//! 자신의 에러 타입을 정의하고 `From` 구현으로 이 타입으로 변환합니다.

/// Grove 최상위 에러 타입
#[derive(Debug, thiserror::Error)]
pub enum GroveError {
    /// 설정 관련 에러
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    /// 의존성 해석 에러 (ideal tree 구성)
    #[error("resolve error: {0}")]
    Resolve(#[from] ResolveError),

    /// 파일시스템 반영 에러 (reify)
    #[error("reify error: {0}")]
    Reify(#[from] ReifyError),

    /// 보안 감사 에러
    #[error("audit error: {0}")]
    Audit(#[from] AuditError),

    /// I/O 에러
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl GroveError {
    /// 작업 전체를 중단시킨 치명적 에러인지 반환합니다.
    ///
    /// 루트 override 충돌과 무결성 불일치만 치명적으로 취급합니다.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Resolve(ResolveError::ConfigInvalid(_))
                | Self::Resolve(ResolveError::PeerViolation(_))
                | Self::Resolve(ResolveError::EngineMismatch(_))
                | Self::Reify(ReifyError::IntegrityMismatch { .. })
        )
    }
}

/// 설정 관련 에러
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// 설정 파일을 찾을 수 없음
    #[error("config file not found: {path}")]
    FileNotFound { path: String },

    /// 설정 파싱 실패
    #[error("failed to parse config: {reason}")]
    ParseFailed { reason: String },

    /// 유효하지 않은 설정 값
    #[error("invalid config value for '{field}': {reason}")]
    InvalidValue { field: String, reason: String },
}

/// 의존성 해석 에러
#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    /// 어떤 버전도 spec을 만족하지 않음
    #[error("unsatisfiable: {0}")]
    Unsatisfiable(String),

    /// 배치 충돌
    #[error("conflict: {0}")]
    Conflict(String),

    /// peer 의존성 위반 (strict 모드)
    #[error("peer violation: {0}")]
    PeerViolation(String),

    /// 지원하지 않는 node 버전 (engine-strict)
    #[error("unsupported engine: {0}")]
    EngineMismatch(String),

    /// 루트 override 규칙 충돌
    #[error("invalid configuration: {0}")]
    ConfigInvalid(String),

    /// manifest / lockfile / spec 파싱 실패
    #[error("parse failed: {0}")]
    Parse(String),

    /// 레지스트리 메타데이터 조회 실패
    #[error("metadata fetch failed: {0}")]
    Fetch(String),
}

/// 파일시스템 반영 에러
#[derive(Debug, thiserror::Error)]
pub enum ReifyError {
    /// 아티팩트 해시 불일치
    #[error("integrity mismatch at {location}: expected {expected}, got {actual}")]
    IntegrityMismatch {
        location: String,
        expected: String,
        actual: String,
    },

    /// 예상하지 못한 기존 엔트리가 쓰기를 막음
    #[error("filesystem conflict at {0}")]
    FilesystemConflict(String),

    /// 재시도 후에도 아티팩트를 가져오지 못함
    #[error("fetch failed: {0}")]
    Fetch(String),

    /// 라이프사이클 스크립트 실패
    #[error("script failed: {0}")]
    Script(String),

    /// 호출자가 작업을 취소함
    #[error("operation cancelled")]
    Cancelled,
}

/// 보안 감사 에러
#[derive(Debug, thiserror::Error)]
pub enum AuditError {
    /// 권고(advisory) DB 로딩 실패
    #[error("advisory db load failed: {path}: {reason}")]
    DbLoad { path: String, reason: String },

    /// 권고 DB 파싱 실패
    #[error("advisory db parse failed: {0}")]
    DbParse(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_error_converts_to_grove_error() {
        let err: GroveError = ConfigError::InvalidValue {
            field: "install.lockfile_version".to_owned(),
            reason: "must be 1, 2 or 3".to_owned(),
        }
        .into();
        assert!(matches!(err, GroveError::Config(_)));
        assert!(err.to_string().contains("lockfile_version"));
    }

    #[test]
    fn integrity_mismatch_is_fatal() {
        let err: GroveError = ReifyError::IntegrityMismatch {
            location: "node_modules/dep".to_owned(),
            expected: "sha512-aaa".to_owned(),
            actual: "sha512-bbb".to_owned(),
        }
        .into();
        assert!(err.is_fatal());
        assert!(err.to_string().contains("node_modules/dep"));
    }

    #[test]
    fn config_invalid_is_fatal_but_conflict_is_not() {
        let fatal: GroveError = ResolveError::ConfigInvalid("override".to_owned()).into();
        let soft: GroveError = ResolveError::Conflict("dep".to_owned()).into();
        assert!(fatal.is_fatal());
        assert!(!soft.is_fatal());
    }

    #[test]
    fn io_error_display() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: GroveError = io.into();
        assert!(err.to_string().contains("gone"));
    }
}
