//! 의존성 그래프 모델
//!
//! [`Tree`]는 노드와 엣지를 arena(`Vec`)에 보관하고 [`NodeId`], [`EdgeId`]
//! 핸들로 서로를 참조합니다. 노드가 트리에서 제거되어도 arena 슬롯은 남으며,
//! 트리에 붙어 있는지는 [`Inventory`]가 판단합니다.
//!
//! # 불변식
//!
//! - 노드의 위치(location)는 부모 체인을 따라 계산된 경로와 항상 같습니다.
//! - 이름 해석은 자신의 자식, 그다음 부모(또는 fs 부모) 순으로 올라갑니다.
//! - 노드를 옮기거나 제거하면 그 이름을 해석하던 엣지가 즉시 재해석됩니다.
//! - `edge.to`가 있으면 대상 노드의 `edges_in`에 그 엣지가 들어 있습니다.

mod dep_flags;
mod edge;
mod inventory;
mod node;

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::fmt::Write as _;
use std::path::{Component, Path, PathBuf};

use serde::Serialize;

use grove_core::types::DepType;

use crate::error::ArboristError;
use crate::manifest::{Declaration, Manifest};
use crate::overrides::{OverrideId, OverrideSet};
use crate::spec::{Spec, SpecKind};

pub use dep_flags::calc_dep_flags;
pub use edge::{DepError, Edge};
pub use inventory::{Inventory, QueryKey};
pub use node::{Node, same_package};

use inventory::IndexKeys;

/// 노드 핸들
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

/// 엣지 핸들
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EdgeId(usize);

/// 트리 진단 항목 종류
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ProblemKind {
    /// 엣지 상태 오류
    Edge(DepError),
    /// 만족하는 버전 없음
    Unsatisfiable,
    /// 메타데이터 조회 실패
    FetchFailed,
    /// peer 배치 충돌
    PeerConflict,
    /// engines 불일치
    EngineMismatch,
    /// 지원하지 않는 지정자 종류
    UnsupportedSpec,
    /// 노드 로딩 문제
    Node,
}

/// 엣지 또는 노드 단위 문제
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Problem {
    /// 요구하는 쪽 노드 위치
    pub location: String,
    /// 의존성 이름
    pub name: String,
    /// 유효 spec
    pub spec: String,
    pub kind: ProblemKind,
    pub message: String,
}

/// 의존성 트리
#[derive(Debug, Clone)]
pub struct Tree {
    nodes: Vec<Node>,
    edges: Vec<Edge>,
    root: NodeId,
    inventory: Inventory,
    path: PathBuf,
    /// 루트 매니페스트에서 만든 override 규칙
    pub overrides: OverrideSet,
    legacy_peer_deps: bool,
}

impl Tree {
    /// 루트 매니페스트로 새 트리를 만듭니다.
    ///
    /// override 규칙이 잘못되었으면 `ConfigInvalid`를 반환합니다.
    pub fn new(
        path: impl Into<PathBuf>,
        package: Manifest,
        legacy_peer_deps: bool,
    ) -> Result<Self, ArboristError> {
        let path = path.into();
        let overrides = OverrideSet::from_manifest(&package)?;
        let name = if package.name.is_empty() {
            path.file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| "root".to_owned())
        } else {
            package.name.clone()
        };
        let mut root = Node::new(&name, package, None, None);
        root.clear_flags();
        root.overrides = Some(overrides.root());
        root.fs_location = Some(String::new());

        let mut tree = Self {
            nodes: vec![root],
            edges: Vec::new(),
            root: NodeId(0),
            inventory: Inventory::default(),
            path,
            overrides,
            legacy_peer_deps,
        };
        tree.index(tree.root);
        tree.load_edges(tree.root);
        Ok(tree)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn legacy_peer_deps(&self) -> bool {
        self.legacy_peer_deps
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.0]
    }

    /// 노드의 플래그/에러를 갱신할 때 사용합니다.
    pub fn node_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id.0]
    }

    pub fn edge(&self, id: EdgeId) -> &Edge {
        &self.edges[id.0]
    }

    pub fn inventory(&self) -> &Inventory {
        &self.inventory
    }

    /// 위치로 노드를 찾습니다.
    pub fn get(&self, location: &str) -> Option<NodeId> {
        self.inventory.get(location)
    }

    /// 노드가 트리에 붙어 있는지 반환합니다.
    pub fn contains(&self, id: NodeId) -> bool {
        self.inventory.contains(id)
    }

    /// 위치 순으로 조건에 맞는 노드를 반환합니다.
    pub fn filter<F>(&self, mut pred: F) -> Vec<NodeId>
    where
        F: FnMut(&Node) -> bool,
    {
        self.inventory
            .iter()
            .map(|(_, id)| id)
            .filter(|id| pred(&self.nodes[id.0]))
            .collect()
    }

    // ─── 구조 조회 ──────────────────────────────────────────────

    pub fn is_root(&self, id: NodeId) -> bool {
        id == self.root
    }

    /// 부모가 없는 노드 (루트, 워크스페이스 등 fs 전용 노드)
    pub fn is_top(&self, id: NodeId) -> bool {
        self.nodes[id.0].parent.is_none()
    }

    /// 이름 해석 시 다음으로 올라갈 노드
    pub fn resolve_parent(&self, id: NodeId) -> Option<NodeId> {
        let node = &self.nodes[id.0];
        node.parent.or(node.fs_parent)
    }

    /// top 노드까지의 부모 단계 수
    pub fn depth(&self, id: NodeId) -> usize {
        std::iter::successors(self.nodes[id.0].parent, |p| self.nodes[p.0].parent).count()
    }

    /// 부모 체인의 최상단 노드
    pub fn top(&self, id: NodeId) -> NodeId {
        let mut cur = id;
        while let Some(parent) = self.nodes[cur.0].parent {
            cur = parent;
        }
        cur
    }

    /// 링크면 대상, 아니면 자신
    pub fn target(&self, id: NodeId) -> NodeId {
        let node = &self.nodes[id.0];
        if node.is_link {
            node.link_target.unwrap_or(id)
        } else {
            id
        }
    }

    /// 노드의 실제 디렉토리 경로 (링크는 대상 경로)
    pub fn real_path(&self, id: NodeId) -> PathBuf {
        normalize_path(&self.path.join(&self.nodes[self.target(id).0].location))
    }

    /// 노드 위치의 디렉토리 경로 (링크는 링크 자신의 경로)
    pub fn node_path(&self, id: NodeId) -> PathBuf {
        self.path.join(&self.nodes[id.0].location)
    }

    /// 절대 경로를 루트 기준 위치 문자열로 바꿉니다.
    pub fn relative_location(&self, abs: &Path) -> String {
        relative_path(&normalize_path(&self.path), &normalize_path(abs))
    }

    /// `from`에서 이름을 해석합니다.
    pub fn resolve(&self, from: NodeId, name: &str) -> Option<NodeId> {
        let mut cur = Some(from);
        while let Some(id) = cur {
            let node = &self.nodes[id.0];
            if let Some(child) = node.children.get(name) {
                return Some(*child);
            }
            cur = node.parent.or(node.fs_parent);
        }
        None
    }

    /// 노드와 자식 서브트리 (부모가 먼저 오는 순서)
    pub fn subtree(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = vec![id];
        let mut i = 0;
        while i < out.len() {
            let cur = out[i];
            i += 1;
            out.extend(self.nodes[cur.0].children.values().copied());
        }
        out
    }

    /// 해석 경로가 `scope`를 지나는 노드들 (자식과 fs 자식을 모두 포함)
    fn scope_nodes(&self, scope: NodeId) -> Vec<NodeId> {
        let mut out = vec![scope];
        let mut seen = BTreeSet::from([scope]);
        let mut i = 0;
        while i < out.len() {
            let cur = &self.nodes[out[i].0];
            i += 1;
            for next in cur.children.values().chain(cur.fs_children.iter()) {
                if seen.insert(*next) {
                    out.push(*next);
                }
            }
        }
        out
    }

    fn edges_named_within(&self, scope: NodeId, name: &str) -> Vec<EdgeId> {
        self.scope_nodes(scope)
            .into_iter()
            .filter_map(|n| self.nodes[n.0].edges_out.get(name).copied())
            .collect()
    }

    /// 이름이 같은 엣지 중 트리에 붙어 있는 것 전부
    pub fn edges_named(&self, name: &str) -> Vec<EdgeId> {
        self.inventory
            .iter()
            .filter_map(|(_, id)| self.nodes[id.0].edges_out.get(name).copied())
            .collect()
    }

    /// `from`에서 출발한 해석이 `scope`를 거치는지 반환합니다.
    ///
    /// `scope`에 도달하기 전에 같은 이름의 자식을 만나면 false입니다.
    pub fn resolves_through(&self, from: NodeId, name: &str, scope: NodeId) -> bool {
        let mut cur = Some(from);
        while let Some(id) = cur {
            if id == scope {
                return true;
            }
            let node = &self.nodes[id.0];
            if node.children.contains_key(name) {
                return false;
            }
            cur = node.parent.or(node.fs_parent);
        }
        false
    }

    // ─── 인덱스 ────────────────────────────────────────────────

    fn index(&mut self, id: NodeId) {
        let node = &self.nodes[id.0];
        self.inventory.insert(
            id,
            &IndexKeys {
                location: &node.location,
                name: &node.name,
                package_name: node.package_name(),
                resolved: node.resolved.as_deref(),
            },
        );
    }

    fn unindex(&mut self, id: NodeId) {
        let node = &self.nodes[id.0];
        self.inventory.remove(
            id,
            &IndexKeys {
                location: &node.location,
                name: &node.name,
                package_name: node.package_name(),
                resolved: node.resolved.as_deref(),
            },
        );
    }

    fn compute_location(&self, id: NodeId) -> String {
        let node = &self.nodes[id.0];
        match node.parent {
            Some(parent) => {
                let base = &self.nodes[parent.0].location;
                if base.is_empty() {
                    format!("node_modules/{}", node.name)
                } else {
                    format!("{base}/node_modules/{}", node.name)
                }
            }
            None => node.fs_location.clone().unwrap_or_default(),
        }
    }

    // ─── 구조 변경 ─────────────────────────────────────────────

    /// 트리에 붙지 않은 노드를 만듭니다. 배치 후보 검사에 사용합니다.
    pub fn create_node(
        &mut self,
        name: &str,
        package: Manifest,
        resolved: Option<String>,
        integrity: Option<String>,
    ) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(Node::new(name, package, resolved, integrity));
        id
    }

    /// `parent` 아래에 새 자식 노드를 배치합니다.
    ///
    /// 같은 이름의 기존 자식은 제거됩니다.
    pub fn add_child(
        &mut self,
        parent: NodeId,
        name: &str,
        package: Manifest,
        resolved: Option<String>,
        integrity: Option<String>,
    ) -> NodeId {
        let id = self.create_node(name, package, resolved, integrity);
        self.attach(id, parent);
        id
    }

    /// 노드를 `parent` 아래로 붙이고, 아직 엣지가 없으면 로드합니다.
    pub fn attach(&mut self, id: NodeId, parent: NodeId) {
        self.relocate(id, parent);
        if !self.nodes[id.0].edges_loaded {
            self.load_edges(id);
        }
    }

    /// `parent` 아래에 `target`을 가리키는 링크를 만듭니다.
    pub fn add_link(&mut self, parent: NodeId, name: &str, target: NodeId) -> NodeId {
        let tnode = &self.nodes[target.0];
        let package = tnode.package.clone();
        let resolved = Some(format!("file:{}", tnode.location));
        let id = self.create_node(name, package, resolved, None);
        {
            let link = &mut self.nodes[id.0];
            link.is_link = true;
            link.link_target = Some(target);
            link.edges_loaded = true;
            link.has_install_script = false;
        }
        self.nodes[target.0].links_in.insert(id);
        self.relocate(id, parent);
        id
    }

    /// 부모 없이 경로로만 존재하는 노드(워크스페이스, 로컬 디렉토리)를 추가합니다.
    ///
    /// 해당 위치에 이미 노드가 있으면 그것을 반환합니다.
    pub fn add_fs_node(&mut self, fs_parent: NodeId, location: &str, package: Manifest) -> NodeId {
        if let Some(existing) = self.inventory.get(location) {
            return existing;
        }
        let name = if package.name.is_empty() {
            location
                .rsplit('/')
                .next()
                .unwrap_or(location)
                .to_owned()
        } else {
            package.name.clone()
        };
        let id = self.create_node(&name, package, None, None);
        {
            let node = &mut self.nodes[id.0];
            node.fs_parent = Some(fs_parent);
            node.fs_location = Some(location.to_owned());
            node.location = location.to_owned();
        }
        self.nodes[fs_parent.0].fs_children.insert(id);
        self.index(id);
        self.load_edges(id);
        id
    }

    /// 워크스페이스를 등록합니다: fs 노드, 루트 `node_modules` 링크, 루트 workspace 엣지.
    pub fn add_workspace(&mut self, location: &str, package: Manifest) -> NodeId {
        let root = self.root;
        let target = self.add_fs_node(root, location, package);
        let name = self.nodes[target.0].name.clone();
        let needs_link = match self.nodes[root.0].children.get(&name) {
            Some(existing) => self.target(*existing) != target,
            None => true,
        };
        if needs_link {
            self.add_link(root, &name, target);
        }
        self.add_workspace_edge(location, &name);
        target
    }

    /// 링크 없이 워크스페이스 디렉토리와 루트 엣지만 추가합니다.
    ///
    /// 디스크에서 읽는 트리는 `node_modules`에 실제 링크가 있을 때만 링크를 둡니다.
    pub fn declare_workspace(&mut self, location: &str, package: Manifest) -> NodeId {
        let target = self.add_fs_node(self.root, location, package);
        let name = self.nodes[target.0].name.clone();
        self.add_workspace_edge(location, &name);
        target
    }

    fn add_workspace_edge(&mut self, location: &str, name: &str) {
        let decl = Declaration {
            name: name.to_owned(),
            spec: format!("file:{location}"),
            dep_type: DepType::Workspace,
            accept: None,
        };
        self.add_edge(self.root, &decl);
    }

    /// 노드를 새 부모 아래로 옮깁니다.
    ///
    /// 서브트리 위치를 다시 계산하고, 옛 위치와 새 위치에서 이 이름을
    /// 해석하던 엣지와 서브트리 안의 엣지를 재해석합니다.
    pub fn relocate(&mut self, id: NodeId, new_parent: NodeId) {
        if id == self.root {
            return;
        }
        let subtree = self.subtree(id);
        if subtree.contains(&new_parent) {
            tracing::warn!(
                node = %self.nodes[id.0].location,
                "refusing to move a node beneath itself"
            );
            return;
        }
        let name = self.nodes[id.0].name.clone();
        if let Some(existing) = self.nodes[new_parent.0].children.get(&name).copied()
            && existing != id
        {
            self.remove(existing);
        }

        let old_parent = self.nodes[id.0].parent;
        let was_attached = self.inventory.contains(id);
        if was_attached {
            for n in &subtree {
                self.unindex(*n);
            }
        }
        if let Some(old) = old_parent {
            self.nodes[old.0].children.remove(&name);
        }
        self.nodes[id.0].parent = Some(new_parent);
        self.nodes[new_parent.0].children.insert(name.clone(), id);

        for n in &subtree {
            let location = self.compute_location(*n);
            self.nodes[n.0].location = location;
            self.index(*n);
        }

        let mut affected = BTreeSet::new();
        if let Some(old) = old_parent
            && self.inventory.contains(old)
        {
            affected.extend(self.edges_named_within(old, &name));
        }
        affected.extend(self.edges_named_within(new_parent, &name));
        for n in &subtree {
            affected.extend(self.nodes[n.0].edges_out.values().copied());
        }
        for eid in affected {
            self.reload_edge(eid);
        }
    }

    /// 노드와 그 자식 서브트리를 트리에서 제거합니다.
    ///
    /// 제거된 노드를 가리키던 엣지는 재해석되어 다른 노드로 가거나 MISSING이 됩니다.
    pub fn remove(&mut self, id: NodeId) {
        if id == self.root || !self.inventory.contains(id) {
            return;
        }
        let subtree = self.subtree(id);
        let name = self.nodes[id.0].name.clone();
        if let Some(parent) = self.nodes[id.0].parent.take() {
            self.nodes[parent.0].children.remove(&name);
        }
        if let Some(fs_parent) = self.nodes[id.0].fs_parent.take() {
            self.nodes[fs_parent.0].fs_children.remove(&id);
        }

        let mut dependents = BTreeSet::new();
        for n in &subtree {
            self.unindex(*n);
            dependents.extend(self.nodes[n.0].edges_in.iter().copied());
            let out: Vec<EdgeId> = self.nodes[n.0].edges_out.values().copied().collect();
            for eid in out {
                if let Some(to) = self.edges[eid.0].to.take() {
                    self.nodes[to.0].edges_in.remove(&eid);
                }
            }
            if let Some(target) = self.nodes[n.0].link_target
                && self.nodes[n.0].is_link
            {
                self.nodes[target.0].links_in.remove(n);
            }
        }
        for eid in dependents {
            match self.edges[eid.0].from {
                Some(from) if self.inventory.contains(from) => self.reload_edge(eid),
                _ => {}
            }
        }
    }

    /// resolved/integrity를 갱신합니다.
    pub fn set_resolved(&mut self, id: NodeId, resolved: Option<String>, integrity: Option<String>) {
        let attached = self.inventory.contains(id);
        let node = &mut self.nodes[id.0];
        let old = std::mem::replace(&mut node.resolved, resolved);
        node.integrity = integrity;
        if attached {
            let new = self.nodes[id.0].resolved.clone();
            self.inventory
                .set_resolved(id, old.as_deref(), new.as_deref());
        }
    }

    /// 매니페스트를 교체하고 나가는 엣지를 다시 만듭니다.
    pub fn set_package(&mut self, id: NodeId, package: Manifest) {
        let attached = self.inventory.contains(id);
        if attached {
            self.unindex(id);
        }
        let node = &mut self.nodes[id.0];
        node.has_install_script = node.has_install_script || package.has_install_script();
        node.package = package;
        if attached {
            self.index(id);
        }
        self.reload_edges_out(id);
    }

    // ─── 엣지 ──────────────────────────────────────────────────

    fn load_edges(&mut self, id: NodeId) {
        let node = &self.nodes[id.0];
        if node.is_link {
            self.nodes[id.0].edges_loaded = true;
            return;
        }
        let decls = node
            .package
            .declarations(node.parent.is_none(), self.legacy_peer_deps);
        self.nodes[id.0].edges_loaded = true;
        for decl in &decls {
            self.add_edge(id, decl);
        }
    }

    /// 나가는 엣지를 매니페스트에서 다시 만듭니다. workspace 엣지는 유지됩니다.
    pub fn reload_edges_out(&mut self, id: NodeId) {
        let old: Vec<EdgeId> = self.nodes[id.0].edges_out.values().copied().collect();
        let workspaces: Vec<Declaration> = old
            .iter()
            .map(|e| &self.edges[e.0])
            .filter(|e| e.is_workspace())
            .map(|e| Declaration {
                name: e.name.clone(),
                spec: e.raw_spec.clone(),
                dep_type: DepType::Workspace,
                accept: None,
            })
            .collect();
        for eid in old {
            self.detach_edge(eid);
        }
        self.nodes[id.0].edges_loaded = false;
        self.load_edges(id);
        for decl in &workspaces {
            self.add_edge(id, decl);
        }
    }

    fn override_scope(&self, id: NodeId) -> Option<OverrideId> {
        if self.overrides.is_empty() {
            None
        } else {
            Some(self.nodes[id.0].overrides.unwrap_or(self.overrides.root()))
        }
    }

    fn add_edge(&mut self, from: NodeId, decl: &Declaration) -> EdgeId {
        if let Some(old) = self.nodes[from.0].edges_out.get(&decl.name).copied() {
            self.detach_edge(old);
        }
        let (overrides, spec) = match self.override_scope(from) {
            Some(scope) => {
                let rule = self.overrides.edge_rule(scope, &decl.name, &decl.spec);
                let spec = self.overrides.effective_spec(rule, &decl.name, &decl.spec);
                (Some(rule), spec)
            }
            None => (None, decl.spec.clone()),
        };
        let eid = EdgeId(self.edges.len());
        self.edges.push(Edge {
            from: Some(from),
            name: decl.name.clone(),
            raw_spec: decl.spec.clone(),
            spec,
            accept: decl.accept.clone(),
            edge_type: decl.dep_type,
            to: None,
            overrides,
        });
        self.nodes[from.0].edges_out.insert(decl.name.clone(), eid);
        self.reload_edge(eid);
        eid
    }

    /// 엣지를 from/to 양쪽에서 분리합니다.
    pub fn detach_edge(&mut self, eid: EdgeId) {
        let edge = &mut self.edges[eid.0];
        let from = edge.from.take();
        let to = edge.to.take();
        let name = edge.name.clone();
        if let Some(to) = to {
            self.nodes[to.0].edges_in.remove(&eid);
        }
        if let Some(from) = from
            && self.nodes[from.0].edges_out.get(&name) == Some(&eid)
        {
            self.nodes[from.0].edges_out.remove(&name);
        }
    }

    /// from 위치에서 이름을 다시 해석해 `to`를 갱신합니다.
    pub fn reload_edge(&mut self, eid: EdgeId) {
        let edge = &self.edges[eid.0];
        let Some(from) = edge.from else {
            return;
        };
        let name = edge.name.clone();
        let old_to = edge.to;
        let new_to = self.resolve(from, &name);
        if new_to != old_to {
            if let Some(old) = old_to {
                self.nodes[old.0].edges_in.remove(&eid);
            }
            if let Some(new) = new_to {
                self.nodes[new.0].edges_in.insert(eid);
            }
            self.edges[eid.0].to = new_to;
        }
        if let (Some(to), Some(rule)) = (new_to, self.edges[eid.0].overrides) {
            self.propagate_overrides(to, rule);
        }
    }

    /// 엣지 규칙에 따라 대상 노드의 override 범위를 정하고 하위 엣지 spec에 반영합니다.
    fn propagate_overrides(&mut self, start: NodeId, rule: OverrideId) {
        let root_scope = self.overrides.root();
        let mut work = vec![(start, rule)];
        while let Some((id, edge_rule)) = work.pop() {
            let target = self.target(id);
            if target == self.root {
                continue;
            }
            let node = &self.nodes[target.0];
            let wanted = self.overrides.node_rule(
                edge_rule,
                &node.name,
                node.package.parsed_version().as_ref(),
            );
            let current = node.overrides;
            let replace = match current {
                None => true,
                Some(c) => c == root_scope && wanted != root_scope,
            };
            if !replace || current == Some(wanted) {
                continue;
            }
            self.nodes[target.0].overrides = Some(wanted);
            let out: Vec<EdgeId> = self.nodes[target.0].edges_out.values().copied().collect();
            for eid in out {
                let edge = &self.edges[eid.0];
                let r = self.overrides.edge_rule(wanted, &edge.name, &edge.raw_spec);
                let spec = self.overrides.effective_spec(r, &edge.name, &edge.raw_spec);
                let to = edge.to;
                let edge = &mut self.edges[eid.0];
                edge.overrides = Some(r);
                edge.spec = spec;
                if let Some(to) = to {
                    work.push((to, r));
                }
            }
        }
    }

    /// 엣지 상태 오류를 계산합니다. 유효하면 None.
    pub fn edge_error(&self, eid: EdgeId) -> Option<DepError> {
        let edge = &self.edges[eid.0];
        let Some(from) = edge.from else {
            return Some(DepError::Detached);
        };
        let Some(to) = edge.to else {
            return if edge.is_optional() {
                None
            } else {
                Some(DepError::Missing)
            };
        };
        if edge.is_peer() && self.nodes[to.0].parent == Some(from) && !self.is_top(from) {
            return Some(DepError::PeerLocal);
        }
        if !self.dep_valid(to, &edge.spec, edge.accept.as_deref(), from) {
            return Some(DepError::Invalid);
        }
        None
    }

    pub fn edge_valid(&self, eid: EdgeId) -> bool {
        self.edge_error(eid).is_none()
    }

    /// 노드가 엣지를 만족시킬 수 있는지 반환합니다 (위치와 무관).
    pub fn edge_satisfied_by(&self, eid: EdgeId, node: NodeId) -> bool {
        let edge = &self.edges[eid.0];
        let Some(from) = edge.from else {
            return false;
        };
        self.nodes[node.0].name == edge.name
            && self.dep_valid(node, &edge.spec, edge.accept.as_deref(), from)
    }

    /// 노드가 spec을 만족하는지 반환합니다. 디렉토리 spec은 루트 기준입니다.
    pub fn satisfies(&self, node: NodeId, spec: &str) -> bool {
        self.dep_valid(node, spec, None, self.root)
    }

    fn dep_valid(&self, child: NodeId, spec: &str, accept: Option<&str>, from: NodeId) -> bool {
        let name = &self.nodes[child.0].name;
        let check = |raw: &str| {
            Spec::parse(name, raw).is_ok_and(|parsed| self.spec_valid(child, &parsed, from))
        };
        check(spec) || accept.is_some_and(check)
    }

    fn spec_valid(&self, child: NodeId, spec: &Spec, from: NodeId) -> bool {
        let target = self.target(child);
        let tnode = &self.nodes[target.0];
        let cnode = &self.nodes[child.0];
        match &spec.kind {
            SpecKind::Range(r) if r.is_any() => true,
            SpecKind::Version(_) | SpecKind::Range(_) => tnode
                .package
                .parsed_version()
                .is_some_and(|v| spec.satisfied_by(&v)),
            SpecKind::Alias { name, sub } => {
                tnode.package_name() == name && self.spec_valid(child, sub, from)
            }
            SpecKind::Tag(_) => {
                !cnode.is_link && cnode.resolved.as_deref().is_none_or(is_registry_url)
            }
            SpecKind::Directory(dir) => {
                cnode.is_link && self.spec_path(from, dir) == self.real_path(target)
            }
            SpecKind::File(file) => cnode.resolved.as_deref().is_some_and(|r| {
                let resolved = r.strip_prefix("file:").unwrap_or(r);
                normalize_path(&self.path.join(resolved)) == self.spec_path(from, file)
            }),
            SpecKind::Git(url) | SpecKind::Remote(url) => cnode
                .resolved
                .as_deref()
                .is_some_and(|r| strip_committish(r) == strip_committish(url)),
        }
    }

    /// from 노드 디렉토리 기준으로 로컬 spec 경로를 해석합니다.
    pub fn spec_path(&self, from: NodeId, raw: &str) -> PathBuf {
        let rel = raw.strip_prefix("file:").unwrap_or(raw);
        normalize_path(&self.real_path(from).join(rel))
    }

    // ─── 교체/중복 제거 판단 ─────────────────────────────────────

    /// 두 노드가 같은 패키지 인스턴스인지 반환합니다.
    pub fn matches(&self, a: NodeId, b: NodeId) -> bool {
        if a == b {
            return true;
        }
        let (na, nb) = (&self.nodes[a.0], &self.nodes[b.0]);
        if na.name != nb.name {
            return false;
        }
        if na.is_link || nb.is_link {
            return na.is_link
                && nb.is_link
                && match (na.link_target, nb.link_target) {
                    (Some(x), Some(y)) => x == y || same_package(&self.nodes[x.0], &self.nodes[y.0]),
                    _ => false,
                };
        }
        same_package(na, nb)
    }

    /// `start`에서 도달 가능한 노드 중 외부에서 들어오는 엣지가 없는 집합
    pub fn gather_dep_set<F>(&self, start: &[NodeId], edge_filter: F) -> BTreeSet<NodeId>
    where
        F: Fn(EdgeId, &Edge) -> bool,
    {
        let mut deps: BTreeSet<NodeId> = start.iter().copied().collect();
        let mut order: Vec<NodeId> = start.to_vec();
        let mut i = 0;
        while i < order.len() {
            let cur = order[i];
            i += 1;
            for eid in self.nodes[cur.0].edges_out.values() {
                let edge = &self.edges[eid.0];
                if let Some(to) = edge.to
                    && edge_filter(*eid, edge)
                    && deps.insert(to)
                {
                    order.push(to);
                }
            }
        }

        let mut changed = true;
        while changed && !deps.is_empty() {
            changed = false;
            let snapshot: Vec<NodeId> = deps.iter().copied().collect();
            for dep in snapshot {
                let external = self.nodes[dep.0].edges_in.iter().any(|eid| {
                    self.edges[eid.0]
                        .from
                        .is_none_or(|from| !deps.contains(&from))
                });
                if external {
                    deps.remove(&dep);
                    changed = true;
                }
            }
        }
        deps
    }

    /// `node` 자리에 `other`를 넣어도 외부 의존자가 모두 만족되는지 반환합니다.
    ///
    /// `ignore_peers`에 있는 이름의 형제 노드에서 오는 peer 엣지는 무시합니다.
    pub fn can_replace_with(
        &self,
        node: NodeId,
        other: NodeId,
        ignore_peers: &BTreeSet<String>,
    ) -> bool {
        let (a, b) = (&self.nodes[node.0], &self.nodes[other.0]);
        if a.name != b.name || a.package_name() != b.package_name() {
            return false;
        }
        let root_scope = self.overrides.root();
        if a.overrides.unwrap_or(root_scope) != b.overrides.unwrap_or(root_scope) {
            return false;
        }
        let dep_set = self.gather_dep_set(&[node], |eid, edge| {
            edge.to != Some(node) && self.edge_valid(eid)
        });
        for eid in &a.edges_in {
            let edge = &self.edges[eid.0];
            let Some(from) = edge.from else {
                continue;
            };
            if !self.is_top(node)
                && self.nodes[from.0].parent == a.parent
                && edge.is_peer()
                && ignore_peers.contains(&self.nodes[from.0].name)
            {
                continue;
            }
            if !dep_set.contains(&from) && !self.edge_satisfied_by(*eid, other) {
                return false;
            }
        }
        true
    }

    /// 노드를 제거하고 상위의 같은 이름 노드로 대체할 수 있는지 반환합니다.
    pub fn can_dedupe(&self, node: NodeId, prefer_dedupe: bool, explicit_update: bool) -> bool {
        let Some(rp) = self.resolve_parent(node) else {
            return false;
        };
        let Some(rpp) = self.resolve_parent(rp) else {
            return false;
        };
        let n = &self.nodes[node.0];
        if n.edges_in.is_empty() {
            return true;
        }
        let Some(other) = self.resolve(rpp, &n.name) else {
            return false;
        };
        if self.matches(other, node) {
            return true;
        }
        if !self.can_replace_with(node, other, &BTreeSet::new()) {
            return false;
        }
        let mine = n.package.parsed_version();
        let theirs = self.nodes[other.0].package.parsed_version();
        if prefer_dedupe || mine == theirs {
            return true;
        }
        if !explicit_update {
            return false;
        }
        matches!((theirs, mine), (Some(t), Some(m)) if t > m)
    }

    // ─── 진단 ──────────────────────────────────────────────────

    /// 트리에 붙어 있는 노드의 엣지 오류와 노드 에러를 모읍니다.
    pub fn problems(&self) -> Vec<Problem> {
        let mut out = Vec::new();
        for (location, id) in self.inventory.iter() {
            let node = &self.nodes[id.0];
            for message in &node.errors {
                out.push(Problem {
                    location: location.to_owned(),
                    name: node.name.clone(),
                    spec: String::new(),
                    kind: ProblemKind::Node,
                    message: message.clone(),
                });
            }
            for eid in node.edges_out.values() {
                if let Some(err) = self.edge_error(*eid) {
                    let edge = &self.edges[eid.0];
                    out.push(Problem {
                        location: location.to_owned(),
                        name: edge.name.clone(),
                        spec: edge.spec.clone(),
                        kind: ProblemKind::Edge(err),
                        message: format!("{err}: {}@{}", edge.name, edge.spec),
                    });
                }
            }
        }
        out
    }

    /// 노드가 왜 트리에 있는지 의존 체인을 설명합니다.
    pub fn explain(&self, id: NodeId) -> String {
        let node = &self.nodes[id.0];
        let mut out = String::new();
        let _ = writeln!(out, "{}", node.id());
        if !node.location.is_empty() {
            let _ = writeln!(out, "{}", node.location);
        }
        let mut seen = BTreeSet::from([id]);
        self.explain_dependents(id, 1, &mut seen, &mut out);
        out
    }

    /// 엣지 하나를 한 줄로 설명합니다.
    pub fn explain_edge(&self, eid: EdgeId) -> String {
        let edge = &self.edges[eid.0];
        let from = match edge.from {
            Some(f) if f == self.root => "the root project".to_owned(),
            Some(f) => self.nodes[f.0].id(),
            None => "a detached node".to_owned(),
        };
        format!(
            "{}{}@\"{}\" from {from}",
            edge_type_prefix(edge.edge_type),
            edge.name,
            edge.spec
        )
    }

    fn explain_dependents(
        &self,
        id: NodeId,
        depth: usize,
        seen: &mut BTreeSet<NodeId>,
        out: &mut String,
    ) {
        let pad = "  ".repeat(depth);
        let node = &self.nodes[id.0];
        let mut incoming: Vec<EdgeId> = node.edges_in.iter().copied().collect();
        for link in &node.links_in {
            incoming.extend(self.nodes[link.0].edges_in.iter().copied());
        }
        for eid in incoming {
            let _ = writeln!(out, "{pad}{}", self.explain_edge(eid));
            let Some(from) = self.edges[eid.0].from else {
                continue;
            };
            if from == self.root || !seen.insert(from) {
                continue;
            }
            let from_node = &self.nodes[from.0];
            if !from_node.location.is_empty() {
                let _ = writeln!(out, "{pad}{}", from_node.location);
            }
            self.explain_dependents(from, depth + 1, seen, out);
        }
    }

    // ─── 워크스페이스 ───────────────────────────────────────────

    /// 루트 workspace 엣지가 가리키는 워크스페이스 노드 (이름이 비면 전부)
    pub fn workspace_nodes(&self, names: &[String]) -> Vec<NodeId> {
        self.nodes[self.root.0]
            .edges_out
            .values()
            .map(|eid| &self.edges[eid.0])
            .filter(|e| e.is_workspace())
            .filter(|e| names.is_empty() || names.iter().any(|n| n == &e.name))
            .filter_map(|e| e.to.map(|to| self.target(to)))
            .collect()
    }

    /// 워크스페이스에서 도달 가능한 모든 노드
    pub fn workspace_dependency_set(&self, names: &[String], include_dev: bool) -> BTreeSet<NodeId> {
        let mut set = BTreeSet::new();
        let mut queue: VecDeque<NodeId> = self.workspace_nodes(names).into();
        let mut visited: BTreeSet<NodeId> = queue.iter().copied().collect();
        for ws in &queue {
            set.insert(*ws);
            set.extend(self.nodes[ws.0].links_in.iter().copied());
        }
        while let Some(cur) = queue.pop_front() {
            for eid in self.nodes[cur.0].edges_out.values() {
                let edge = &self.edges[eid.0];
                if edge.is_dev() && !include_dev {
                    continue;
                }
                let Some(to) = edge.to else {
                    continue;
                };
                set.insert(to);
                let target = self.target(to);
                if visited.insert(target) {
                    set.insert(target);
                    queue.push_back(target);
                }
            }
        }
        set
    }

    /// 부모가 먼저 오는 순서의 모든 노드와 깊이
    pub fn walk(&self) -> Vec<(NodeId, usize)> {
        let mut ids: Vec<(NodeId, usize)> = self
            .inventory
            .iter()
            .map(|(_, id)| (id, self.depth(id)))
            .collect();
        ids.sort_by(|(a, da), (b, db)| {
            da.cmp(db)
                .then_with(|| self.nodes[a.0].location.cmp(&self.nodes[b.0].location))
        });
        ids
    }

    /// `location → id` 맵 (진단용)
    pub fn locations(&self) -> BTreeMap<String, NodeId> {
        self.inventory
            .iter()
            .map(|(l, id)| (l.to_owned(), id))
            .collect()
    }
}

fn edge_type_prefix(dep_type: DepType) -> &'static str {
    match dep_type {
        DepType::Prod => "",
        DepType::Dev => "dev ",
        DepType::Optional => "optional ",
        DepType::Peer => "peer ",
        DepType::PeerOptional => "peerOptional ",
        DepType::Workspace => "workspace ",
    }
}

fn is_registry_url(resolved: &str) -> bool {
    resolved.starts_with("https://") || resolved.starts_with("http://")
}

fn strip_committish(url: &str) -> &str {
    url.split('#').next().unwrap_or(url)
}

/// `.`과 `..`을 어휘적으로 정리합니다.
pub(crate) fn normalize_path(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// `base`에서 `target`으로 가는 `/` 구분 상대 경로
pub(crate) fn relative_path(base: &Path, target: &Path) -> String {
    let base: Vec<Component<'_>> = base.components().collect();
    let target: Vec<Component<'_>> = target.components().collect();
    let common = base
        .iter()
        .zip(target.iter())
        .take_while(|(a, b)| a == b)
        .count();
    let mut parts: Vec<String> = std::iter::repeat_n("..".to_owned(), base.len() - common).collect();
    parts.extend(
        target[common..]
            .iter()
            .map(|c| c.as_os_str().to_string_lossy().into_owned()),
    );
    parts.join("/")
}
