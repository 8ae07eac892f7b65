//! 도메인 타입: 워크스페이스 전역에서 사용되는 공통 타입
//!
//! 의존성 종류와 취약점 심각도처럼 여러 크레이트가 공유하는 작은 값 타입을 정의합니다.

use std::fmt;

use serde::{Deserialize, Serialize};

/// 심각도 레벨
///
/// 보안 권고의 심각도를 나타냅니다.
/// `Ord` 구현으로 심각도 비교가 가능합니다 (`Info < Low < Medium < High < Critical`).
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// 정보성 권고
    #[default]
    Info,
    /// 낮은 심각도
    Low,
    /// 중간 심각도 (npm 용어로 "moderate")
    #[serde(alias = "moderate")]
    Medium,
    /// 높은 심각도
    High,
    /// 치명적, 즉시 대응 필요
    Critical,
}

impl Severity {
    /// 문자열에서 심각도를 파싱합니다.
    ///
    /// 대소문자를 구분하지 않습니다.
    pub fn from_str_loose(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "info" | "informational" => Some(Self::Info),
            "low" => Some(Self::Low),
            "medium" | "med" | "moderate" => Some(Self::Medium),
            "high" => Some(Self::High),
            "critical" | "crit" => Some(Self::Critical),
            _ => None,
        }
    }

    /// 감사 보고서(JSON)에 쓰이는 npm 호환 이름을 반환합니다.
    pub fn as_report_str(&self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Low => "low",
            Self::Medium => "moderate",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Info => write!(f, "Info"),
            Self::Low => write!(f, "Low"),
            Self::Medium => write!(f, "Medium"),
            Self::High => write!(f, "High"),
            Self::Critical => write!(f, "Critical"),
        }
    }
}

/// 의존성 선언 종류
///
/// `package.json`의 어느 필드에서 선언되었는지를 나타냅니다.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DepType {
    /// `dependencies`
    Prod,
    /// `devDependencies`
    Dev,
    /// `optionalDependencies`
    Optional,
    /// `peerDependencies`
    Peer,
    /// `peerDependencies` + `peerDependenciesMeta.<name>.optional`
    PeerOptional,
    /// 루트의 `workspaces` 항목
    Workspace,
}

impl DepType {
    /// optional 계열인지 반환합니다.
    pub fn is_optional(&self) -> bool {
        matches!(self, Self::Optional | Self::PeerOptional)
    }

    /// peer 계열인지 반환합니다.
    pub fn is_peer(&self) -> bool {
        matches!(self, Self::Peer | Self::PeerOptional)
    }

    /// 문자열에서 의존성 종류를 파싱합니다 (CLI `--save-*` 플래그용).
    pub fn from_str_loose(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "prod" | "dependencies" => Some(Self::Prod),
            "dev" | "devdependencies" => Some(Self::Dev),
            "optional" | "optionaldependencies" => Some(Self::Optional),
            "peer" | "peerdependencies" => Some(Self::Peer),
            "peeroptional" => Some(Self::PeerOptional),
            "workspace" => Some(Self::Workspace),
            _ => None,
        }
    }
}

impl fmt::Display for DepType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Prod => write!(f, "prod"),
            Self::Dev => write!(f, "dev"),
            Self::Optional => write!(f, "optional"),
            Self::Peer => write!(f, "peer"),
            Self::PeerOptional => write!(f, "peerOptional"),
            Self::Workspace => write!(f, "workspace"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn severity_ordering() {
        assert!(Severity::Info < Severity::Low);
        assert!(Severity::Low < Severity::Medium);
        assert!(Severity::Medium < Severity::High);
        assert!(Severity::High < Severity::Critical);
    }

    #[test]
    fn severity_from_str_loose_accepts_moderate() {
        assert_eq!(Severity::from_str_loose("moderate"), Some(Severity::Medium));
        assert_eq!(Severity::from_str_loose("CRITICAL"), Some(Severity::Critical));
        assert_eq!(Severity::from_str_loose("nope"), None);
    }

    #[test]
    fn severity_deserializes_npm_names() {
        let sev: Severity = serde_json::from_str("\"moderate\"").unwrap();
        assert_eq!(sev, Severity::Medium);
        let sev: Severity = serde_json::from_str("\"high\"").unwrap();
        assert_eq!(sev, Severity::High);
    }

    #[test]
    fn severity_report_str() {
        assert_eq!(Severity::Medium.as_report_str(), "moderate");
        assert_eq!(Severity::Critical.as_report_str(), "critical");
    }

    #[test]
    fn dep_type_flags() {
        assert!(DepType::PeerOptional.is_optional());
        assert!(DepType::PeerOptional.is_peer());
        assert!(!DepType::Dev.is_optional());
        assert!(!DepType::Prod.is_peer());
    }

    #[test]
    fn dep_type_display_and_parse() {
        assert_eq!(DepType::PeerOptional.to_string(), "peerOptional");
        assert_eq!(DepType::from_str_loose("dev"), Some(DepType::Dev));
        assert_eq!(DepType::from_str_loose("unknown"), None);
    }
}
