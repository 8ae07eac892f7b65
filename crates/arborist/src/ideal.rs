//! Ideal tree 구성
//!
//! 시작 트리(lockfile 기반 가상 트리, 실제 트리 또는 빈 트리)에서 문제가 있는
//! 엣지를 깊이 순서로 모아 하나씩 배치합니다.
//!
//! # 처리 흐름
//!
//! ```text
//! assert_root_overrides → 요청(add/rm/update) 반영
//!   → loop {
//!        문제 엣지 수집 (루트에서 도달 가능한 노드만)
//!        packument 동시 조회 (JoinSet + Semaphore)
//!        엣지마다 순차 배치 (그래프 변경은 단일 소유자)
//!     }
//!   → dedupe(prefer_dedupe) → extraneous 제거 → 플래그 계산 → 저장 spec 갱신
//! ```
//!
//! 배치는 시작 위치에서 루트 방향으로 올라가며 가능한 가장 높은 위치를 고릅니다.
//! 같은 이름의 노드가 있는 위치에서 멈추며, 충돌하면 그 아래 위치에 둡니다.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use grove_core::metrics as m;
use grove_core::types::DepType;

use crate::config::ArboristConfig;
use crate::error::ArboristError;
use crate::graph::{
    DepError, EdgeId, NodeId, Problem, ProblemKind, QueryKey, Tree, calc_dep_flags, same_package,
};
use crate::manifest::{Manifest, Packument};
use crate::overrides::assert_root_overrides;
use crate::registry::{MetadataProvider, fetch_with_retry, tarball_url};
use crate::spec::{Range, Spec, SpecKind, parse_version, pick_version_avoiding};

/// 무한 배치 방지용 상한
const MAX_WAVES: usize = 10_000;

/// 빌드 한 번에 허용하는 총 배치 수
const MAX_PLACEMENTS: u64 = 100_000;

/// 같은 엣지를 다시 배치하는 최대 횟수
const MAX_ATTEMPTS: u8 = 3;

/// `add` 요청
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddRequest {
    pub name: String,
    pub spec: String,
    pub dep_type: DepType,
}

impl AddRequest {
    /// `name@spec` 인자에서 요청을 만듭니다. spec이 없으면 `latest`.
    pub fn parse(arg: &str, dep_type: DepType) -> Self {
        let (name, spec) = Spec::split_arg(arg);
        Self {
            name,
            spec,
            dep_type,
        }
    }
}

/// `update` 요청
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum UpdateRequest {
    #[default]
    None,
    /// 잠긴 버전을 모두 무시
    All,
    /// 지정한 이름만 다시 해석
    Names(Vec<String>),
}

/// ideal tree 구성 옵션
#[derive(Debug, Clone)]
pub struct IdealOptions {
    pub add: Vec<AddRequest>,
    pub rm: Vec<String>,
    pub update: UpdateRequest,
    /// 이름 → 피해야 할 버전 범위 (audit fix)
    pub avoid: BTreeMap<String, Range>,
    pub prefer_dedupe: bool,
    pub strict_peer_deps: bool,
    pub engine_strict: bool,
    pub node_version: Option<String>,
    pub save_prefix: String,
    pub concurrency: usize,
    pub fetch_timeout: Duration,
    pub fetch_retries: u32,
}

impl Default for IdealOptions {
    fn default() -> Self {
        Self {
            add: Vec::new(),
            rm: Vec::new(),
            update: UpdateRequest::None,
            avoid: BTreeMap::new(),
            prefer_dedupe: false,
            strict_peer_deps: false,
            engine_strict: false,
            node_version: None,
            save_prefix: "^".to_owned(),
            concurrency: 8,
            fetch_timeout: Duration::from_secs(60),
            fetch_retries: 2,
        }
    }
}

impl IdealOptions {
    /// 설정값으로 옵션을 만듭니다. 요청 목록은 비어 있습니다.
    pub fn from_config(config: &ArboristConfig) -> Self {
        Self {
            prefer_dedupe: config.prefer_dedupe,
            strict_peer_deps: config.strict_peer_deps,
            engine_strict: config.engine_strict,
            node_version: Some(config.node_version.clone()).filter(|v| !v.is_empty()),
            save_prefix: config.save_prefix.clone(),
            concurrency: config.concurrency,
            fetch_timeout: config.fetch_timeout(),
            fetch_retries: config.fetch_retries,
            ..Self::default()
        }
    }
}

/// ideal tree 구성 결과
#[derive(Debug)]
pub struct IdealTreeOutcome {
    pub tree: Tree,
    /// 해결하지 못한 문제 (빈 목록이면 완전한 트리)
    pub problems: Vec<Problem>,
}

impl IdealTreeOutcome {
    pub fn is_complete(&self) -> bool {
        self.problems.is_empty()
    }
}

/// 배치 판정
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CanPlace {
    /// 비어 있는 위치에 배치
    Ok,
    /// 기존 노드 유지
    Keep,
    /// 기존 노드 교체
    Replace,
    /// 이 위치에는 둘 수 없음
    Conflict,
}

/// ideal tree 빌더
pub struct IdealTreeBuilder<R: MetadataProvider> {
    registry: Arc<R>,
    options: IdealOptions,
    packuments: HashMap<String, Arc<Packument>>,
    fetch_errors: HashMap<String, String>,
    problems: Vec<Problem>,
    attempts: BTreeMap<(NodeId, String, String), u8>,
    explicit: BTreeSet<String>,
    placed: u64,
}

impl<R: MetadataProvider> IdealTreeBuilder<R> {
    pub fn new(registry: Arc<R>, options: IdealOptions) -> Self {
        Self {
            registry,
            options,
            packuments: HashMap::new(),
            fetch_errors: HashMap::new(),
            problems: Vec::new(),
            attempts: BTreeMap::new(),
            explicit: BTreeSet::new(),
            placed: 0,
        }
    }

    /// 시작 트리에서 ideal tree를 만듭니다.
    ///
    /// 엣지 단위 문제는 결과의 `problems`에 모이며, 루트 override 오류와
    /// strict 모드에서 승격된 문제만 `Err`입니다.
    pub async fn build(mut self, mut tree: Tree) -> Result<IdealTreeOutcome, ArboristError> {
        let started = Instant::now();
        assert_root_overrides(&tree)?;
        self.apply_requests(&mut tree);

        let mut waves = 0;
        loop {
            let pending = self.pending_edges(&tree);
            if pending.is_empty() {
                break;
            }
            waves += 1;
            if waves > MAX_WAVES || self.placed >= MAX_PLACEMENTS {
                warn!(
                    waves,
                    placed = self.placed,
                    "giving up on placement, tree did not settle"
                );
                break;
            }
            debug!(wave = waves, edges = pending.len(), "placing dependencies");

            let names: BTreeSet<String> = pending
                .iter()
                .filter_map(|eid| registry_name(&tree, *eid))
                .filter(|n| !self.packuments.contains_key(n) && !self.fetch_errors.contains_key(n))
                .collect();
            self.prefetch(names).await;

            for eid in pending {
                self.place_edge(&mut tree, eid).await?;
            }
        }

        if self.options.prefer_dedupe {
            dedupe_pass(&mut tree);
        }
        prune_extraneous(&mut tree);
        calc_dep_flags(&mut tree);
        self.save_added_specs(&mut tree);

        let problems = self.collect_problems(&tree);
        if self.options.strict_peer_deps {
            check_strict_peers(&tree, &problems)?;
        }

        let elapsed = started.elapsed();
        metrics::gauge!(m::IDEAL_UNRESOLVED_EDGES).set(problems.len() as f64);
        metrics::histogram!(m::IDEAL_BUILD_DURATION_SECONDS).record(elapsed.as_secs_f64());
        info!(
            nodes = tree.inventory().len(),
            placed = self.placed,
            unresolved = problems.len(),
            elapsed_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
            "ideal tree built"
        );
        Ok(IdealTreeOutcome { tree, problems })
    }

    // ─── 요청 반영 ─────────────────────────────────────────────

    fn apply_requests(&mut self, tree: &mut Tree) {
        let root = tree.root();
        let mut package = tree.node(root).package().clone();
        let mut changed = false;
        for name in &self.options.rm {
            changed |= package.remove_dependency(name);
        }
        for add in &self.options.add {
            package.set_dependency(&add.name, &add.spec, add.dep_type);
            self.explicit.insert(add.name.clone());
            changed = true;
        }
        if changed {
            tree.set_package(root, package);
        }

        // 명시적으로 추가한 루트 의존성은 잠긴 버전을 버리고 다시 고름
        for add in &self.options.add {
            if let Some(&child) = tree.node(root).children().get(&add.name)
                && !tree.node(child).is_link()
            {
                tree.remove(child);
            }
        }

        match &self.options.update {
            UpdateRequest::None => {}
            UpdateRequest::All => {
                let tops: Vec<NodeId> = tree.filter(|n| n.parent().is_none());
                for top in tops {
                    let children: Vec<NodeId> =
                        tree.node(top).children().values().copied().collect();
                    for child in children {
                        if !tree.node(child).is_link() {
                            tree.remove(child);
                        }
                    }
                }
            }
            UpdateRequest::Names(names) => {
                for name in names {
                    self.explicit.insert(name.clone());
                    for id in tree.inventory().query(QueryKey::Name, name) {
                        if tree.contains(id) && !tree.node(id).is_link() {
                            tree.remove(id);
                        }
                    }
                }
            }
        }

        for (name, range) in &self.options.avoid {
            self.explicit.insert(name.clone());
            for id in tree.inventory().query(QueryKey::PackageName, name) {
                let vulnerable = tree
                    .node(id)
                    .package()
                    .parsed_version()
                    .is_some_and(|v| range.satisfied_by(&v));
                if vulnerable && tree.contains(id) {
                    tree.remove(id);
                }
            }
        }
    }

    // ─── 문제 엣지 수집 ─────────────────────────────────────────

    fn pending_edges(&self, tree: &Tree) -> Vec<EdgeId> {
        let live = reachable(tree);
        let mut out = Vec::new();
        for (id, _) in tree.walk() {
            if !live.contains(&id) {
                continue;
            }
            for eid in tree.node(id).edges_out().values() {
                if needs_placement(tree, *eid) && self.can_attempt(tree, *eid) {
                    out.push(*eid);
                }
            }
        }
        out
    }

    fn attempt_key(tree: &Tree, eid: EdgeId) -> Option<(NodeId, String, String)> {
        let edge = tree.edge(eid);
        edge.from()
            .map(|from| (from, edge.name().to_owned(), edge.spec().to_owned()))
    }

    fn can_attempt(&self, tree: &Tree, eid: EdgeId) -> bool {
        Self::attempt_key(tree, eid)
            .is_some_and(|key| self.attempts.get(&key).copied().unwrap_or(0) < MAX_ATTEMPTS)
    }

    // ─── 메타데이터 조회 ────────────────────────────────────────

    async fn prefetch(&mut self, names: BTreeSet<String>) {
        if names.is_empty() {
            return;
        }
        let semaphore = Arc::new(Semaphore::new(self.options.concurrency.max(1)));
        let mut set = JoinSet::new();
        for name in names {
            let registry = Arc::clone(&self.registry);
            let semaphore = Arc::clone(&semaphore);
            let timeout = self.options.fetch_timeout;
            let retries = self.options.fetch_retries;
            set.spawn(async move {
                let _permit = semaphore.acquire_owned().await;
                let result =
                    fetch_with_retry(&name, timeout, retries, || registry.packument(&name)).await;
                (name, result)
            });
        }
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((name, Ok(packument))) => {
                    metrics::counter!(m::IDEAL_PACKUMENTS_FETCHED_TOTAL).increment(1);
                    self.packuments.insert(name, Arc::new(packument));
                }
                Ok((name, Err(e))) => {
                    warn!(name = %name, error = %e, "packument fetch failed");
                    self.fetch_errors.insert(name, e.to_string());
                }
                Err(e) => warn!(error = %e, "packument fetch task failed"),
            }
        }
    }

    async fn packument(&mut self, name: &str) -> Result<Arc<Packument>, String> {
        if !self.packuments.contains_key(name) && !self.fetch_errors.contains_key(name) {
            self.prefetch(BTreeSet::from([name.to_owned()])).await;
        }
        match self.packuments.get(name) {
            Some(p) => Ok(Arc::clone(p)),
            None => Err(self
                .fetch_errors
                .get(name)
                .cloned()
                .unwrap_or_else(|| format!("no metadata for {name}"))),
        }
    }

    // ─── 배치 ──────────────────────────────────────────────────

    /// 엣지 하나와, 새로 배치된 노드의 peer 엣지를 이어서 배치합니다.
    async fn place_edge(&mut self, tree: &mut Tree, first: EdgeId) -> Result<(), ArboristError> {
        let mut stack = vec![first];
        while let Some(eid) = stack.pop() {
            if self.placed >= MAX_PLACEMENTS {
                return Ok(());
            }
            if !needs_placement(tree, eid) || !self.can_attempt(tree, eid) {
                continue;
            }
            let Some(key) = Self::attempt_key(tree, eid) else {
                continue;
            };
            *self.attempts.entry(key).or_insert(0) += 1;

            let Some(dep) = self.candidate(tree, eid).await? else {
                continue;
            };
            if let Some(placed) = self.place(tree, eid, dep) {
                let peers = tree
                    .node(placed)
                    .edges_out()
                    .values()
                    .copied()
                    .filter(|e| tree.edge(*e).is_peer());
                stack.extend(peers);
            }
        }
        Ok(())
    }

    /// 엣지를 만족시킬 후보 노드를 트리 밖에 만듭니다.
    async fn candidate(
        &mut self,
        tree: &mut Tree,
        eid: EdgeId,
    ) -> Result<Option<NodeId>, ArboristError> {
        let edge = tree.edge(eid);
        let Some(from) = edge.from() else {
            return Ok(None);
        };
        let name = edge.name().to_owned();
        let raw = edge.spec().to_owned();
        let optional = edge.is_optional();

        let spec = match Spec::parse(&name, &raw) {
            Ok(s) => s,
            Err(e) => {
                self.problem(tree, from, &name, &raw, ProblemKind::UnsupportedSpec, e.to_string());
                return Ok(None);
            }
        };
        match &spec.kind {
            SpecKind::Directory(dir) => {
                let dir = dir.clone();
                self.place_directory(tree, eid, from, &name, &dir).await;
                return Ok(None);
            }
            SpecKind::File(_) | SpecKind::Git(_) | SpecKind::Remote(_) => {
                self.problem(
                    tree,
                    from,
                    &name,
                    &raw,
                    ProblemKind::UnsupportedSpec,
                    format!("{name}@{raw} cannot be resolved from package metadata"),
                );
                return Ok(None);
            }
            _ => {}
        }

        let registry_name = spec.registry_name().to_owned();
        let packument = match self.packument(&registry_name).await {
            Ok(p) => p,
            Err(reason) => {
                if optional {
                    debug!(name = %name, reason = %reason, "skipping optional dependency");
                } else {
                    self.problem(tree, from, &name, &raw, ProblemKind::FetchFailed, reason);
                }
                return Ok(None);
            }
        };
        let avoid = self.options.avoid.get(&registry_name);
        let Some(manifest) = pick_version_avoiding(&packument, &spec, avoid) else {
            if !optional {
                self.problem(
                    tree,
                    from,
                    &name,
                    &raw,
                    ProblemKind::Unsatisfiable,
                    format!("no version of {registry_name} satisfies {raw}"),
                );
            }
            return Ok(None);
        };
        if let Some(message) = &manifest.deprecated {
            warn!(package = %manifest.id(), message = %message, "deprecated package");
        }
        if !self.engines_ok(tree, from, &name, manifest)? && optional {
            return Ok(None);
        }

        let mut package = manifest.clone();
        let dist = package.dist.take().unwrap_or_default();
        let resolved = dist
            .tarball
            .unwrap_or_else(|| tarball_url(&package.name, &package.version));
        let version = package.parsed_version();
        let dep = tree.create_node(&name, package, Some(resolved), dist.integrity);
        if let Some(rule) = tree.edge(eid).overrides() {
            let scope = tree.overrides.node_rule(rule, &name, version.as_ref());
            tree.node_mut(dep).overrides = Some(scope);
        }
        Ok(Some(dep))
    }

    /// `engines.node`를 검사합니다. 맞지 않으면 false (strict면 에러).
    fn engines_ok(
        &mut self,
        tree: &Tree,
        from: NodeId,
        name: &str,
        manifest: &Manifest,
    ) -> Result<bool, ArboristError> {
        let current = self.options.node_version.as_deref().and_then(parse_version);
        let (Some(current), Some(wanted)) = (current, manifest.engines.get("node")) else {
            return Ok(true);
        };
        let Ok(range) = Range::parse(wanted) else {
            return Ok(true);
        };
        if range.satisfied_by(&current) {
            return Ok(true);
        }
        let message = format!(
            "EBADENGINE: {} requires node {wanted}, current {current}",
            manifest.id()
        );
        if self.options.engine_strict {
            return Err(ArboristError::EngineMismatch {
                package: manifest.id(),
                wanted: wanted.clone(),
                current: current.to_string(),
            });
        }
        warn!(package = %manifest.id(), wanted = %wanted, current = %current, "unsupported engine");
        self.problem(tree, from, name, wanted, ProblemKind::EngineMismatch, message);
        Ok(false)
    }

    /// 후보를 배치합니다. 트리에 붙은 노드를 반환합니다.
    fn place(&mut self, tree: &mut Tree, eid: EdgeId, dep: NodeId) -> Option<NodeId> {
        let edge = tree.edge(eid);
        let from = edge.from()?;
        let name = edge.name().to_owned();
        let peer = edge.is_peer();
        let local = match tree.edge_error(eid) {
            Some(DepError::PeerLocal) => edge.to(),
            _ => None,
        };

        let (target, outcome) = self.find_target(tree, eid, dep);
        let placed = match outcome {
            CanPlace::Conflict => {
                let kind = if peer {
                    ProblemKind::PeerConflict
                } else {
                    ProblemKind::Unsatisfiable
                };
                let spec = tree.edge(eid).spec().to_owned();
                let message = format!(
                    "could not place {} for {}",
                    tree.node(dep).id(),
                    tree.explain_edge(eid)
                );
                debug!(name = %name, message = %message, "placement conflict");
                self.problem(tree, from, &name, &spec, kind, message);
                return None;
            }
            CanPlace::Keep => tree.node(target).children().get(&name).copied(),
            CanPlace::Ok | CanPlace::Replace => {
                // a1 → b1 → a2 → b2 → a1 처럼 버전이 엇갈린 순환은 끝없이 중첩되므로
                // 같은 name@version 조상이 있으면 그 조상을 가리키는 링크로 끊음
                if let Some(ancestor) = cycle_ancestor(tree, target, dep) {
                    let link = tree.add_link(target, &name, ancestor);
                    self.placed += 1;
                    debug!(
                        link = %tree.node(link).location(),
                        target = %tree.node(ancestor).location(),
                        "linked dependency cycle"
                    );
                    return Some(link);
                }
                tree.attach(dep, target);
                self.placed += 1;
                metrics::counter!(m::IDEAL_NODES_PLACED_TOTAL).increment(1);
                debug!(
                    package = %tree.node(dep).id(),
                    location = %tree.node(dep).location(),
                    replace = outcome == CanPlace::Replace,
                    "placed dependency"
                );
                self.prune_dedupable(tree, target, &name);
                Some(dep)
            }
        };

        // 상위에 배치한 peer가 로컬 사본에 가려지면 로컬 사본을 정리
        if let (Some(local), Some(placed)) = (local, placed)
            && tree.contains(local)
            && tree.edge(eid).to() == Some(local)
            && tree.can_replace_with(local, placed, &BTreeSet::new())
        {
            tree.remove(local);
        }
        placed.filter(|p| outcome != CanPlace::Keep || *p == dep)
    }

    /// 시작 위치에서 위로 올라가며 배치할 위치를 고릅니다.
    fn find_target(&self, tree: &Tree, eid: EdgeId, dep: NodeId) -> (NodeId, CanPlace) {
        let edge = tree.edge(eid);
        let Some(from) = edge.from() else {
            return (tree.root(), CanPlace::Conflict);
        };
        let name = edge.name();
        // peer는 의존하는 쪽의 부모 위치에서 해석됨
        let start = if edge.is_peer() && !tree.is_top(from) {
            tree.resolve_parent(from).unwrap_or(from)
        } else {
            from
        };

        let mut chosen = (start, CanPlace::Conflict);
        let mut cur = Some(start);
        while let Some(target) = cur {
            cur = tree.resolve_parent(target);
            if !tree.is_top(target)
                && target != start
                && tree
                    .node(target)
                    .edges_out()
                    .get(name)
                    .is_some_and(|te| tree.edge(*te).is_peer())
            {
                continue;
            }
            let outcome = self.can_place(tree, eid, dep, target, start);
            if outcome == CanPlace::Conflict {
                break;
            }
            chosen = (target, outcome);
            if outcome == CanPlace::Keep || tree.node(target).children().contains_key(name) {
                break;
            }
        }
        chosen
    }

    /// `target` 아래에 `dep`를 둘 수 있는지 판정합니다.
    pub fn can_place(
        &self,
        tree: &Tree,
        eid: EdgeId,
        dep: NodeId,
        target: NodeId,
        deepest: NodeId,
    ) -> CanPlace {
        let edge = tree.edge(eid);
        let name = edge.name();
        let target_edge = tree.node(target).edges_out().get(name).copied();
        if let Some(te) = target_edge
            && tree.edge(te).is_peer()
            && !tree.is_top(target)
            && te != eid
        {
            return CanPlace::Conflict;
        }
        let current = tree.node(target).children().get(name).copied();
        match current {
            Some(current) => self.can_place_current(tree, eid, dep, target, current, deepest),
            None => {
                if let Some(te) = target_edge
                    && te != eid
                    && !tree.edge_satisfied_by(te, dep)
                {
                    return CanPlace::Conflict;
                }
                can_place_no_current(tree, eid, dep, target)
            }
        }
    }

    fn can_place_current(
        &self,
        tree: &Tree,
        eid: EdgeId,
        dep: NodeId,
        target: NodeId,
        current: NodeId,
        deepest: NodeId,
    ) -> CanPlace {
        let edge = tree.edge(eid);
        let explicit = self.explicit.contains(edge.name());
        let prefer = self.options.prefer_dedupe;
        let no_peers = BTreeSet::new();

        if same_package(tree.node(dep), tree.node(current)) && tree.edge_satisfied_by(eid, current)
        {
            return if explicit {
                CanPlace::Replace
            } else {
                CanPlace::Keep
            };
        }
        let current_version = tree.node(current).package().parsed_version();
        let new_version = tree.node(dep).package().parsed_version();
        let try_replace =
            matches!((&new_version, &current_version), (Some(n), Some(c)) if n >= c);
        if try_replace && tree.can_replace_with(current, dep, &no_peers) {
            return CanPlace::Replace;
        }
        if tree.edge_satisfied_by(eid, current) && (!explicit || prefer) {
            return CanPlace::Keep;
        }
        if prefer && !try_replace && tree.can_replace_with(current, dep, &no_peers) {
            return CanPlace::Replace;
        }
        if target != deepest {
            return CanPlace::Conflict;
        }
        if !edge.is_peer() && edge.from() == Some(target) {
            return CanPlace::Replace;
        }
        CanPlace::Conflict
    }

    /// 새 노드 아래쪽에 있는 같은 이름의 중복 노드를 제거합니다.
    fn prune_dedupable(&self, tree: &mut Tree, target: NodeId, name: &str) {
        let explicit = self.explicit.contains(name);
        let candidates: Vec<NodeId> = tree
            .subtree(target)
            .into_iter()
            .filter(|id| tree.depth(*id) > tree.depth(target) + 1)
            .filter(|id| tree.node(*id).name() == name)
            .collect();
        for id in candidates {
            if tree.contains(id) && tree.can_dedupe(id, self.options.prefer_dedupe, explicit) {
                debug!(location = %tree.node(id).location(), "deduplicated");
                metrics::counter!(m::IDEAL_NODES_DEDUPED_TOTAL).increment(1);
                tree.remove(id);
            }
        }
    }

    /// `file:` 디렉토리 의존성을 fs 노드와 링크로 배치합니다.
    async fn place_directory(
        &mut self,
        tree: &mut Tree,
        eid: EdgeId,
        from: NodeId,
        name: &str,
        dir: &str,
    ) {
        let spec = tree.edge(eid).spec().to_owned();
        let abs = tree.spec_path(from, dir);
        let location = tree.relative_location(&abs);
        let existing = tree.get(&location).map(|id| tree.target(id));
        let target = match existing {
            Some(t) if t == tree.root() => {
                self.problem(
                    tree,
                    from,
                    name,
                    &spec,
                    ProblemKind::UnsupportedSpec,
                    "a package cannot depend on the project root".to_owned(),
                );
                return;
            }
            Some(t) => t,
            None => match Manifest::load(&abs).await {
                Ok(manifest) => {
                    let root = tree.root();
                    tree.add_fs_node(root, &location, manifest)
                }
                Err(e) => {
                    self.problem(tree, from, name, &spec, ProblemKind::FetchFailed, e.to_string());
                    return;
                }
            },
        };
        let link = tree.add_link(from, name, target);
        self.placed += 1;
        debug!(
            link = %tree.node(link).location(),
            target = %location,
            "linked local dependency"
        );
    }

    // ─── 마무리 ────────────────────────────────────────────────

    fn save_added_specs(&self, tree: &mut Tree) {
        let root = tree.root();
        let mut package = tree.node(root).package().clone();
        let mut changed = false;
        for add in &self.options.add {
            let Ok(spec) = Spec::parse(&add.name, &add.spec) else {
                continue;
            };
            if !matches!(spec.kind, SpecKind::Tag(_)) {
                continue;
            }
            let to = tree
                .node(root)
                .edges_out()
                .get(&add.name)
                .and_then(|e| tree.edge(*e).to());
            let Some(to) = to else {
                continue;
            };
            let version = tree.node(to).version();
            if version.is_empty() {
                continue;
            }
            let saved = format!("{}{version}", self.options.save_prefix);
            package.set_dependency(&add.name, &saved, add.dep_type);
            changed = true;
        }
        if changed {
            tree.set_package(root, package);
        }
    }

    fn problem(
        &mut self,
        tree: &Tree,
        from: NodeId,
        name: &str,
        spec: &str,
        kind: ProblemKind,
        message: String,
    ) {
        self.problems.push(Problem {
            location: tree.node(from).location().to_owned(),
            name: name.to_owned(),
            spec: spec.to_owned(),
            kind,
            message,
        });
    }

    fn collect_problems(&self, tree: &Tree) -> Vec<Problem> {
        let mut seen: BTreeSet<(String, String)> = BTreeSet::new();
        let mut out = Vec::new();
        for p in &self.problems {
            if seen.insert((p.location.clone(), p.name.clone())) {
                out.push(p.clone());
            }
        }
        for p in tree.problems() {
            if !seen.contains(&(p.location.clone(), p.name.clone())) {
                out.push(p);
            }
        }
        out
    }
}

/// `target`부터 루트 방향으로 `dep`와 같은 패키지인 조상을 찾습니다.
fn cycle_ancestor(tree: &Tree, target: NodeId, dep: NodeId) -> Option<NodeId> {
    std::iter::successors(Some(target), |id| tree.resolve_parent(*id)).find(|id| {
        !tree.is_top(*id)
            && !tree.node(*id).is_link()
            && same_package(tree.node(*id), tree.node(dep))
    })
}

fn registry_name(tree: &Tree, eid: EdgeId) -> Option<String> {
    let edge = tree.edge(eid);
    let spec = Spec::parse(edge.name(), edge.spec()).ok()?;
    spec.is_registry().then(|| spec.registry_name().to_owned())
}

/// 배치가 필요한 엣지인지 반환합니다. 빠진 optional 의존성도 설치 대상입니다.
fn needs_placement(tree: &Tree, eid: EdgeId) -> bool {
    let edge = tree.edge(eid);
    if edge.is_workspace() {
        return false;
    }
    match tree.edge_error(eid) {
        Some(DepError::Missing | DepError::Invalid | DepError::PeerLocal) => true,
        Some(DepError::Detached) => false,
        None => edge.to().is_none() && edge.edge_type() == DepType::Optional,
    }
}

fn can_place_no_current(tree: &Tree, eid: EdgeId, dep: NodeId, target: NodeId) -> CanPlace {
    let edge = tree.edge(eid);
    let name = edge.name();
    if edge.from() == Some(target) {
        return CanPlace::Ok;
    }
    let Some(current) = tree.resolve(target, name) else {
        return CanPlace::Ok;
    };
    // 여기에 두면 target 아래에서 current를 쓰던 엣지가 dep로 바뀜
    for ein in tree.node(current).edges_in() {
        if *ein == eid {
            continue;
        }
        let Some(other_from) = tree.edge(*ein).from() else {
            continue;
        };
        if tree.resolves_through(other_from, name, target)
            && tree.edge_valid(*ein)
            && !tree.edge_satisfied_by(*ein, dep)
        {
            return CanPlace::Conflict;
        }
    }
    CanPlace::Ok
}

/// 루트에서 엣지를 따라 도달 가능한 노드 (링크 대상 포함)
fn reachable(tree: &Tree) -> BTreeSet<NodeId> {
    let root = tree.root();
    let mut seen = BTreeSet::from([root]);
    let mut expanded = BTreeSet::from([root]);
    let mut queue = vec![root];
    while let Some(cur) = queue.pop() {
        for eid in tree.node(cur).edges_out().values() {
            let Some(to) = tree.edge(*eid).to() else {
                continue;
            };
            let target = tree.target(to);
            seen.insert(to);
            seen.insert(target);
            if expanded.insert(target) {
                queue.push(target);
            }
        }
    }
    seen
}

/// prefer_dedupe: 상위 노드로 대체 가능한 중첩 노드를 제거합니다.
pub fn dedupe_pass(tree: &mut Tree) -> usize {
    let mut removed = 0;
    loop {
        let candidates: Vec<NodeId> = tree
            .walk()
            .into_iter()
            .filter(|(id, depth)| *depth >= 2 && !tree.node(*id).is_link())
            .map(|(id, _)| id)
            .collect();
        let mut changed = false;
        for id in candidates {
            if tree.contains(id) && tree.can_dedupe(id, true, false) {
                debug!(location = %tree.node(id).location(), "deduplicated");
                metrics::counter!(m::IDEAL_NODES_DEDUPED_TOTAL).increment(1);
                tree.remove(id);
                removed += 1;
                changed = true;
            }
        }
        if !changed {
            break;
        }
    }
    removed
}

/// 어떤 엣지로도 도달하지 않는 노드를 제거합니다.
fn prune_extraneous(tree: &mut Tree) {
    calc_dep_flags(tree);
    let stale: Vec<NodeId> = tree.filter(|n| n.extraneous && n.parent().is_some());
    for id in stale {
        if tree.contains(id) {
            debug!(location = %tree.node(id).location(), "pruning extraneous node");
            tree.remove(id);
        }
    }
}

fn check_strict_peers(tree: &Tree, problems: &[Problem]) -> Result<(), ArboristError> {
    if let Some(p) = problems
        .iter()
        .find(|p| p.kind == ProblemKind::PeerConflict)
    {
        return Err(ArboristError::PeerViolation(p.message.clone()));
    }
    for (_, id) in tree.inventory().iter() {
        for eid in tree.node(id).edges_out().values() {
            let edge = tree.edge(*eid);
            if edge.is_peer()
                && let Some(err) = tree.edge_error(*eid)
            {
                return Err(ArboristError::PeerViolation(format!(
                    "{err}: {}",
                    tree.explain_edge(*eid)
                )));
            }
        }
    }
    Ok(())
}
