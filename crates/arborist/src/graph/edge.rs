//! 의존성 엣지
//!
//! 엣지는 "from 노드가 name을 spec으로 요구한다"는 선언입니다.
//! `to`는 from 위치에서 이름을 해석한 결과이며, 유효성은
//! [`Tree::edge_error`](super::Tree::edge_error)가 계산합니다.

use std::fmt;

use serde::Serialize;

use grove_core::types::DepType;

use crate::overrides::OverrideId;

use super::NodeId;

/// 의존성 엣지
#[derive(Debug, Clone)]
pub struct Edge {
    pub(crate) from: Option<NodeId>,
    pub(crate) name: String,
    pub(crate) raw_spec: String,
    pub(crate) spec: String,
    pub(crate) accept: Option<String>,
    pub(crate) edge_type: DepType,
    pub(crate) to: Option<NodeId>,
    pub(crate) overrides: Option<OverrideId>,
}

impl Edge {
    /// 요구하는 노드 (분리된 엣지는 None)
    pub fn from(&self) -> Option<NodeId> {
        self.from
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// 매니페스트에 선언된 원본 spec
    pub fn raw_spec(&self) -> &str {
        &self.raw_spec
    }

    /// override 적용 후 유효 spec
    pub fn spec(&self) -> &str {
        &self.spec
    }

    pub fn accept(&self) -> Option<&str> {
        self.accept.as_deref()
    }

    pub fn edge_type(&self) -> DepType {
        self.edge_type
    }

    /// 해석된 대상 노드
    pub fn to(&self) -> Option<NodeId> {
        self.to
    }

    pub fn overrides(&self) -> Option<OverrideId> {
        self.overrides
    }

    pub fn is_dev(&self) -> bool {
        self.edge_type == DepType::Dev
    }

    pub fn is_optional(&self) -> bool {
        self.edge_type.is_optional()
    }

    pub fn is_peer(&self) -> bool {
        self.edge_type.is_peer()
    }

    pub fn is_workspace(&self) -> bool {
        self.edge_type == DepType::Workspace
    }
}

/// 엣지 상태 오류
///
/// 여러 조건이 겹치면 `Detached`, `Missing`, `PeerLocal`, `Invalid` 순으로 보고합니다.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DepError {
    /// from 노드가 없음
    Detached,
    /// 대상이 해석되지 않음 (optional 엣지는 해당 없음)
    Missing,
    /// peer 가 from 자신의 node_modules 안에만 있음
    PeerLocal,
    /// 대상이 spec을 만족하지 않음
    Invalid,
}

impl fmt::Display for DepError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Detached => "DETACHED",
            Self::Missing => "MISSING",
            Self::PeerLocal => "PEER LOCAL",
            Self::Invalid => "INVALID",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dep_error_display_matches_report_names() {
        assert_eq!(DepError::PeerLocal.to_string(), "PEER LOCAL");
        assert_eq!(DepError::Missing.to_string(), "MISSING");
    }

    #[test]
    fn dep_error_serializes_screaming() {
        let json = serde_json::to_string(&DepError::PeerLocal).unwrap();
        assert_eq!(json, "\"PEER_LOCAL\"");
    }

    #[test]
    fn edge_type_predicates() {
        let edge = Edge {
            from: None,
            name: "a".to_owned(),
            raw_spec: "^1".to_owned(),
            spec: "^1".to_owned(),
            accept: None,
            edge_type: DepType::PeerOptional,
            to: None,
            overrides: None,
        };
        assert!(edge.is_peer());
        assert!(edge.is_optional());
        assert!(!edge.is_dev());
    }
}
