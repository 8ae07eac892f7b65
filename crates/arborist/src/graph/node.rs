//! 트리 노드

use std::collections::{BTreeMap, BTreeSet};

use crate::manifest::Manifest;
use crate::overrides::OverrideId;

use super::{EdgeId, NodeId};

/// 패키지 인스턴스 하나 (또는 다른 노드를 가리키는 링크)
///
/// 구조 필드(부모, 자식, 엣지)는 [`Tree`](super::Tree)만 변경하며,
/// 플래그와 에러 목록은 외부에서 직접 갱신할 수 있습니다.
#[derive(Debug, Clone)]
pub struct Node {
    pub(crate) name: String,
    pub(crate) package: Manifest,
    pub(crate) resolved: Option<String>,
    pub(crate) integrity: Option<String>,
    pub(crate) link_target: Option<NodeId>,
    pub(crate) is_link: bool,
    pub(crate) parent: Option<NodeId>,
    pub(crate) fs_parent: Option<NodeId>,
    /// 부모가 없는 노드의 루트 기준 상대 경로
    pub(crate) fs_location: Option<String>,
    pub(crate) children: BTreeMap<String, NodeId>,
    pub(crate) fs_children: BTreeSet<NodeId>,
    pub(crate) edges_out: BTreeMap<String, EdgeId>,
    pub(crate) edges_in: BTreeSet<EdgeId>,
    pub(crate) links_in: BTreeSet<NodeId>,
    pub(crate) location: String,
    pub(crate) overrides: Option<OverrideId>,
    pub(crate) edges_loaded: bool,

    pub dev: bool,
    pub optional: bool,
    pub dev_optional: bool,
    pub peer: bool,
    pub extraneous: bool,
    /// lockfile에 기록된 `hasInstallScript`
    pub has_install_script: bool,
    /// 로딩 중 기록된 문제 (잘못된 package.json 등)
    pub errors: Vec<String>,
}

impl Node {
    pub(crate) fn new(
        name: &str,
        package: Manifest,
        resolved: Option<String>,
        integrity: Option<String>,
    ) -> Self {
        let has_install_script = package.has_install_script();
        Self {
            name: name.to_owned(),
            package,
            resolved,
            integrity,
            link_target: None,
            is_link: false,
            parent: None,
            fs_parent: None,
            fs_location: None,
            children: BTreeMap::new(),
            fs_children: BTreeSet::new(),
            edges_out: BTreeMap::new(),
            edges_in: BTreeSet::new(),
            links_in: BTreeSet::new(),
            location: String::new(),
            overrides: None,
            edges_loaded: false,
            dev: true,
            optional: true,
            dev_optional: true,
            peer: true,
            extraneous: true,
            has_install_script,
            errors: Vec::new(),
        }
    }

    /// 부모 디렉토리 안에서의 이름 (별칭이면 별칭 이름)
    pub fn name(&self) -> &str {
        &self.name
    }

    /// package.json 의 `name` (없으면 트리 이름)
    pub fn package_name(&self) -> &str {
        if self.package.name.is_empty() {
            &self.name
        } else {
            &self.package.name
        }
    }

    pub fn version(&self) -> &str {
        &self.package.version
    }

    pub fn package(&self) -> &Manifest {
        &self.package
    }

    pub fn resolved(&self) -> Option<&str> {
        self.resolved.as_deref()
    }

    pub fn integrity(&self) -> Option<&str> {
        self.integrity.as_deref()
    }

    /// 루트 기준 경로 (`node_modules/a/node_modules/b`)
    pub fn location(&self) -> &str {
        &self.location
    }

    pub fn is_link(&self) -> bool {
        self.is_link
    }

    pub fn link_target(&self) -> Option<NodeId> {
        self.link_target
    }

    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    pub fn fs_parent(&self) -> Option<NodeId> {
        self.fs_parent
    }

    /// 이름 → 자식 노드
    pub fn children(&self) -> &BTreeMap<String, NodeId> {
        &self.children
    }

    pub fn fs_children(&self) -> &BTreeSet<NodeId> {
        &self.fs_children
    }

    /// 이름 → 나가는 엣지
    pub fn edges_out(&self) -> &BTreeMap<String, EdgeId> {
        &self.edges_out
    }

    pub fn edges_in(&self) -> &BTreeSet<EdgeId> {
        &self.edges_in
    }

    pub fn links_in(&self) -> &BTreeSet<NodeId> {
        &self.links_in
    }

    pub fn overrides(&self) -> Option<OverrideId> {
        self.overrides
    }

    /// `name@version`
    pub fn id(&self) -> String {
        format!("{}@{}", self.package_name(), self.version())
    }

    pub(crate) fn clear_flags(&mut self) {
        self.dev = false;
        self.optional = false;
        self.dev_optional = false;
        self.peer = false;
        self.extraneous = false;
    }

    pub(crate) fn set_all_flags(&mut self) {
        self.dev = true;
        self.optional = true;
        self.dev_optional = true;
        self.peer = true;
        self.extraneous = true;
    }
}

/// 서로 다른 트리의 노드가 같은 패키지 인스턴스인지 판단합니다.
///
/// integrity → resolved → (이름, 버전) 순으로 비교합니다.
/// 링크 대상 비교는 [`Tree::matches`](super::Tree::matches)가 처리합니다.
pub fn same_package(a: &Node, b: &Node) -> bool {
    if a.name != b.name {
        return false;
    }
    if let (Some(x), Some(y)) = (&a.integrity, &b.integrity) {
        return x == y;
    }
    if let (Some(x), Some(y)) = (&a.resolved, &b.resolved) {
        return x == y;
    }
    !a.package_name().is_empty()
        && a.package_name() == b.package_name()
        && !a.version().is_empty()
        && a.version() == b.version()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(name: &str, version: &str) -> Node {
        let pkg = Manifest {
            name: name.to_owned(),
            version: version.to_owned(),
            ..Manifest::default()
        };
        Node::new(name, pkg, None, None)
    }

    #[test]
    fn new_node_has_all_flags_set() {
        let n = node("a", "1.0.0");
        assert!(n.dev && n.optional && n.dev_optional && n.peer && n.extraneous);
        assert_eq!(n.id(), "a@1.0.0");
    }

    #[test]
    fn same_package_prefers_integrity() {
        let mut a = node("a", "1.0.0");
        let mut b = node("a", "1.0.0");
        assert!(same_package(&a, &b));
        a.integrity = Some("sha512-x".to_owned());
        b.integrity = Some("sha512-y".to_owned());
        assert!(!same_package(&a, &b));
    }

    #[test]
    fn same_package_falls_back_to_resolved() {
        let mut a = node("a", "1.0.0");
        let mut b = node("a", "1.0.0");
        a.resolved = Some("https://r/a-1.0.0.tgz".to_owned());
        b.resolved = Some("https://mirror/a-1.0.0.tgz".to_owned());
        assert!(!same_package(&a, &b));
    }

    #[test]
    fn alias_keeps_tree_name_and_package_name() {
        let pkg = Manifest {
            name: "real".to_owned(),
            version: "2.0.0".to_owned(),
            ..Manifest::default()
        };
        let n = Node::new("alias", pkg, None, None);
        assert_eq!(n.name(), "alias");
        assert_eq!(n.package_name(), "real");
    }
}
