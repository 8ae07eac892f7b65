//! 디스크의 `node_modules` 에서 실제 트리 복원
//!
//! 각 패키지 디렉토리의 `package.json`을 읽어 트리를 만듭니다. 디스크에는
//! `resolved`/`integrity`가 없으므로 hidden lockfile과 프로젝트 lockfile에서
//! 가져오며, 디스크 버전과 일치하는 항목만 신뢰합니다.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info, warn};

use crate::error::ArboristError;
use crate::fs::{EntryKind, Filesystem};
use crate::graph::{NodeId, Tree, calc_dep_flags, normalize_path};
use crate::manifest::Manifest;
use crate::shrinkwrap::{HIDDEN_LOCKFILE, LOCKFILE_NAME, SHRINKWRAP_NAME, Shrinkwrap};

/// 실제 트리 로더
pub struct ActualLoader<F: Filesystem> {
    fs: Arc<F>,
    legacy_peer_deps: bool,
    workspaces_enabled: bool,
}

/// 위치별 resolved/integrity 출처
struct LockMeta {
    hidden: Option<Shrinkwrap>,
    project: Option<Shrinkwrap>,
}

impl LockMeta {
    fn lookup(&self, location: &str, version: &str) -> (Option<String>, Option<String>) {
        for lock in [&self.hidden, &self.project].into_iter().flatten() {
            if let Some(entry) = lock.get(location)
                && !entry.link
                && entry.version.as_deref() == Some(version)
            {
                return (entry.resolved.clone(), entry.integrity.clone());
            }
        }
        (None, None)
    }
}

impl<F: Filesystem> ActualLoader<F> {
    pub fn new(fs: Arc<F>) -> Self {
        Self {
            fs,
            legacy_peer_deps: false,
            workspaces_enabled: true,
        }
    }

    pub fn legacy_peer_deps(mut self, legacy: bool) -> Self {
        self.legacy_peer_deps = legacy;
        self
    }

    pub fn workspaces_enabled(mut self, enabled: bool) -> Self {
        self.workspaces_enabled = enabled;
        self
    }

    /// 프로젝트 디렉토리의 실제 트리를 읽습니다.
    ///
    /// `package.json`이 없으면 디렉토리 이름을 가진 빈 루트를 씁니다.
    /// 설치된 패키지의 매니페스트 오류는 노드 에러로 남깁니다.
    pub async fn load(&self, path: &Path) -> Result<Tree, ArboristError> {
        let started = Instant::now();
        let root_manifest = match self.read_manifest(path).await? {
            Some(m) => m,
            None => Manifest {
                name: path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default(),
                ..Manifest::default()
            },
        };
        let mut tree = Tree::new(path, root_manifest, self.legacy_peer_deps)?;
        let root = tree.root();

        let project = match self.read_lock(&path.join(SHRINKWRAP_NAME)).await {
            Some(lock) => Some(lock),
            None => self.read_lock(&path.join(LOCKFILE_NAME)).await,
        };
        let meta = LockMeta {
            hidden: self.read_lock(&path.join(HIDDEN_LOCKFILE)).await,
            project,
        };

        let mut pending: Vec<(NodeId, PathBuf)> = vec![(root, path.join("node_modules"))];
        if self.workspaces_enabled {
            let patterns = tree.node(root).package().workspaces.clone();
            for (location, manifest) in discover_workspaces(&*self.fs, path, &patterns).await? {
                let ws = tree.declare_workspace(&location, manifest);
                pending.push((ws, path.join(&location).join("node_modules")));
            }
        }

        while let Some((parent, dir)) = pending.pop() {
            for (name, kind) in self.list_packages(&dir).await? {
                let entry_path = dir.join(&name);
                match kind {
                    EntryKind::Dir => {
                        let id = self.load_package(&mut tree, parent, &name, &entry_path, &meta).await;
                        pending.push((id, entry_path.join("node_modules")));
                    }
                    EntryKind::Symlink => {
                        if let Some(target_dir) =
                            self.load_link(&mut tree, parent, &name, &entry_path).await?
                        {
                            pending.push(target_dir);
                        }
                    }
                    EntryKind::File => {
                        debug!(path = %entry_path.display(), "ignoring stray file in node_modules");
                    }
                }
            }
        }

        calc_dep_flags(&mut tree);
        let extraneous = tree.filter(|n| n.extraneous).len();
        info!(
            path = %path.display(),
            nodes = tree.inventory().len(),
            extraneous,
            elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
            "actual tree loaded"
        );
        Ok(tree)
    }

    async fn load_package(
        &self,
        tree: &mut Tree,
        parent: NodeId,
        name: &str,
        dir: &Path,
        meta: &LockMeta,
    ) -> NodeId {
        let named = || Manifest {
            name: name.to_owned(),
            ..Manifest::default()
        };
        let (manifest, error) = match self.read_manifest(dir).await {
            Ok(Some(m)) => (m, None),
            Ok(None) => (named(), Some("missing package.json".to_owned())),
            Err(e) => (named(), Some(e.to_string())),
        };
        let version = manifest.version.clone();
        let id = tree.add_child(parent, name, manifest, None, None);
        let (resolved, integrity) = meta.lookup(tree.node(id).location(), &version);
        if resolved.is_some() || integrity.is_some() {
            tree.set_resolved(id, resolved, integrity);
        }
        if let Some(error) = error {
            warn!(location = %tree.node(id).location(), error = %error, "invalid installed package");
            tree.node_mut(id).errors.push(error);
        }
        id
    }

    /// 심볼릭 링크를 링크 노드로 추가합니다.
    ///
    /// 대상이 새 fs 노드이면 그 `node_modules`를 이어서 읽도록 반환합니다.
    async fn load_link(
        &self,
        tree: &mut Tree,
        parent: NodeId,
        name: &str,
        link_path: &Path,
    ) -> Result<Option<(NodeId, PathBuf)>, ArboristError> {
        let raw = self.fs.read_link(link_path).await?;
        let base = link_path.parent().unwrap_or(link_path);
        let abs = normalize_path(&base.join(raw));
        let location = tree.relative_location(&abs);

        let mut walk_next = None;
        let target = match tree.get(&location) {
            Some(t) => tree.target(t),
            None if location.contains("node_modules/") => {
                warn!(link = %link_path.display(), target = %location, "link into node_modules ignored");
                return Ok(None);
            }
            None => {
                let manifest = self.read_manifest(&abs).await.ok().flatten().unwrap_or_else(|| {
                    Manifest {
                        name: name.to_owned(),
                        ..Manifest::default()
                    }
                });
                let root = tree.root();
                let t = tree.add_fs_node(root, &location, manifest);
                walk_next = Some((t, abs.join("node_modules")));
                t
            }
        };
        if target == tree.root() {
            warn!(link = %link_path.display(), "link to project root ignored");
            return Ok(None);
        }
        let linked = tree
            .node(parent)
            .children()
            .get(name)
            .is_some_and(|c| tree.target(*c) == target);
        if !linked {
            tree.add_link(parent, name, target);
        }
        Ok(walk_next)
    }

    /// `node_modules` 안의 패키지 이름 목록 (scope 디렉토리는 펼침)
    async fn list_packages(&self, dir: &Path) -> Result<Vec<(String, EntryKind)>, ArboristError> {
        let mut out = Vec::new();
        for entry in self.fs.read_dir(dir).await? {
            if entry.name.starts_with('.') {
                continue;
            }
            if entry.name.starts_with('@') && entry.kind == EntryKind::Dir {
                for scoped in self.fs.read_dir(&dir.join(&entry.name)).await? {
                    if !scoped.name.starts_with('.') {
                        out.push((format!("{}/{}", entry.name, scoped.name), scoped.kind));
                    }
                }
            } else {
                out.push((entry.name, entry.kind));
            }
        }
        Ok(out)
    }

    async fn read_manifest(&self, dir: &Path) -> Result<Option<Manifest>, ArboristError> {
        let path = dir.join("package.json");
        match self.fs.read_to_string(&path).await? {
            Some(content) => Manifest::from_json(&path.display().to_string(), &content).map(Some),
            None => Ok(None),
        }
    }

    async fn read_lock(&self, path: &Path) -> Option<Shrinkwrap> {
        let content = match self.fs.read_to_string(path).await {
            Ok(Some(c)) => c,
            Ok(None) => return None,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "cannot read lockfile");
                return None;
            }
        };
        match Shrinkwrap::from_json(&path.display().to_string(), &content) {
            Ok(lock) => Some(lock),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "ignoring unreadable lockfile");
                None
            }
        }
    }
}

// ─── 워크스페이스 ──────────────────────────────────────────────

/// 워크스페이스 패턴이 위치와 맞는지 반환합니다. `*`는 한 경로 구간입니다.
pub fn workspace_matches(pattern: &str, location: &str) -> bool {
    let pattern = pattern.trim_start_matches("./").trim_end_matches('/');
    let pat: Vec<&str> = pattern.split('/').collect();
    let loc: Vec<&str> = location.split('/').collect();
    pat.len() == loc.len()
        && pat
            .iter()
            .zip(&loc)
            .all(|(p, l)| *p == "*" || *p == "**" || p == l)
}

/// 루트 `workspaces` 패턴을 펼쳐 `package.json`이 있는 디렉토리를 찾습니다.
pub async fn discover_workspaces<F: Filesystem>(
    fs: &F,
    root: &Path,
    patterns: &[String],
) -> Result<Vec<(String, Manifest)>, ArboristError> {
    let mut found: BTreeMap<String, Manifest> = BTreeMap::new();
    for pattern in patterns {
        let pattern = pattern.trim_start_matches("./").trim_end_matches('/');
        let mut candidates = vec![String::new()];
        for segment in pattern.split('/') {
            let mut next = Vec::new();
            for prefix in &candidates {
                if segment == "*" || segment == "**" {
                    for entry in fs.read_dir(&root.join(prefix)).await? {
                        if entry.kind == EntryKind::Dir
                            && !entry.name.starts_with('.')
                            && entry.name != "node_modules"
                        {
                            next.push(join_location(prefix, &entry.name));
                        }
                    }
                } else {
                    next.push(join_location(prefix, segment));
                }
            }
            candidates = next;
        }

        for location in candidates {
            if location.is_empty() || found.contains_key(&location) {
                continue;
            }
            let path = root.join(&location).join("package.json");
            let Some(content) = fs.read_to_string(&path).await? else {
                continue;
            };
            let manifest = Manifest::from_json(&path.display().to_string(), &content)?;
            debug!(location = %location, name = %manifest.name, "workspace found");
            found.insert(location, manifest);
        }
    }
    Ok(found.into_iter().collect())
}

fn join_location(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        name.to_owned()
    } else {
        format!("{prefix}/{name}")
    }
}
