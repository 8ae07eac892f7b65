//! Lockfile (`package-lock.json`, `npm-shrinkwrap.json`) 모델
//!
//! 위치(location)를 키로 하는 `packages` 맵이 기준 표현입니다.
//! v1 lockfile의 중첩 `dependencies` 구조는 읽을 때 `packages`로 변환하고,
//! v1/v2로 쓸 때는 `packages`에서 다시 만들어 냅니다.
//!
//! `node_modules/.package-lock.json`(hidden lockfile)은 같은 형식이며
//! 루트 항목 없이 실제 설치 상태만 기록합니다.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

use crate::error::ArboristError;
use crate::graph::{NodeId, Tree};
use crate::manifest::{MAX_MANIFEST_SIZE, Manifest, PeerMeta};

/// 프로젝트 lockfile 이름
pub const LOCKFILE_NAME: &str = "package-lock.json";

/// 배포용 lockfile 이름 (있으면 우선)
pub const SHRINKWRAP_NAME: &str = "npm-shrinkwrap.json";

/// hidden lockfile 경로 (프로젝트 기준)
pub const HIDDEN_LOCKFILE: &str = "node_modules/.package-lock.json";

/// 기본 lockfile 버전
pub const DEFAULT_LOCKFILE_VERSION: u32 = 3;

/// lockfile 항목 하나
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LockEntry {
    /// 별칭/워크스페이스의 실제 패키지 이름
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub integrity: Option<String>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub link: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub dev: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub optional: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub dev_optional: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub peer: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub extraneous: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub has_install_script: bool,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub dependencies: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub dev_dependencies: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub optional_dependencies: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub peer_dependencies: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub peer_dependencies_meta: BTreeMap<String, PeerMeta>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub engines: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bin: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub license: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deprecated: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub workspaces: Vec<String>,
}

fn is_false(b: &bool) -> bool {
    !*b
}

impl LockEntry {
    /// 항목에서 매니페스트를 복원합니다 (스크립트 등 일부 필드는 없음).
    pub fn to_manifest(&self, tree_name: &str) -> Manifest {
        Manifest {
            name: self.name.clone().unwrap_or_else(|| tree_name.to_owned()),
            version: self.version.clone().unwrap_or_default(),
            dependencies: self.dependencies.clone(),
            dev_dependencies: self.dev_dependencies.clone(),
            optional_dependencies: self.optional_dependencies.clone(),
            peer_dependencies: self.peer_dependencies.clone(),
            peer_dependencies_meta: self.peer_dependencies_meta.clone(),
            engines: self.engines.clone(),
            bin: self.bin.clone(),
            license: self.license.clone(),
            deprecated: self.deprecated.clone(),
            workspaces: self.workspaces.clone(),
            ..Manifest::default()
        }
    }

    /// 트리 노드에서 항목을 만듭니다.
    pub fn from_node(tree: &Tree, id: NodeId) -> Self {
        let node = tree.node(id);
        if node.is_link() {
            let target = tree.target(id);
            return Self {
                resolved: Some(tree.node(target).location().to_owned()),
                link: true,
                ..Self::default()
            };
        }
        let pkg = node.package();
        let is_root = tree.is_root(id);
        let is_top = tree.is_top(id);
        let name = if is_top || node.package_name() != node.name() {
            Some(node.package_name().to_owned()).filter(|n| !n.is_empty())
        } else {
            None
        };
        Self {
            name,
            version: Some(pkg.version.clone()).filter(|v| !v.is_empty()),
            resolved: node.resolved().map(str::to_owned),
            integrity: node.integrity().map(str::to_owned),
            link: false,
            dev: !is_root && node.dev,
            optional: !is_root && node.optional,
            dev_optional: !is_root && node.dev_optional && !node.dev && !node.optional,
            peer: !is_root && node.peer,
            extraneous: !is_root && node.extraneous,
            has_install_script: node.has_install_script,
            dependencies: pkg.dependencies.clone(),
            dev_dependencies: if is_top {
                pkg.dev_dependencies.clone()
            } else {
                BTreeMap::new()
            },
            optional_dependencies: pkg.optional_dependencies.clone(),
            peer_dependencies: pkg.peer_dependencies.clone(),
            peer_dependencies_meta: pkg.peer_dependencies_meta.clone(),
            engines: pkg.engines.clone(),
            bin: pkg.bin.clone(),
            license: pkg.license.clone(),
            deprecated: pkg.deprecated.clone(),
            workspaces: if is_root {
                pkg.workspaces.clone()
            } else {
                Vec::new()
            },
        }
    }
}

/// 파싱된 lockfile
#[derive(Debug, Clone, PartialEq)]
pub struct Shrinkwrap {
    pub name: String,
    pub version: String,
    pub lockfile_version: u32,
    /// 위치 → 항목
    pub packages: BTreeMap<String, LockEntry>,
    /// hidden lockfile 여부 (루트 항목 없음)
    pub hidden: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawLockfile {
    #[serde(default)]
    name: String,
    #[serde(default)]
    version: String,
    #[serde(default)]
    lockfile_version: Option<u32>,
    #[serde(default)]
    packages: Option<BTreeMap<String, LockEntry>>,
    #[serde(default)]
    dependencies: Option<Map<String, Value>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LegacyEntry {
    #[serde(default)]
    version: Option<String>,
    #[serde(default)]
    resolved: Option<String>,
    #[serde(default)]
    integrity: Option<String>,
    #[serde(default)]
    dev: bool,
    #[serde(default)]
    optional: bool,
    #[serde(default)]
    requires: BTreeMap<String, String>,
    #[serde(default)]
    dependencies: Option<Map<String, Value>>,
}

impl Shrinkwrap {
    /// 빈 lockfile
    pub fn new(name: &str, version: &str, lockfile_version: u32) -> Self {
        Self {
            name: name.to_owned(),
            version: version.to_owned(),
            lockfile_version,
            packages: BTreeMap::new(),
            hidden: false,
        }
    }

    /// JSON 문자열에서 lockfile을 파싱합니다.
    ///
    /// `origin`은 에러 메시지에 표시할 경로입니다. 지원하지 않는 버전,
    /// 잘못된 위치 키는 `LockfileParse`로 거부합니다.
    pub fn from_json(origin: &str, content: &str) -> Result<Self, ArboristError> {
        let parse_err = |reason: String| ArboristError::LockfileParse {
            path: origin.to_owned(),
            reason,
        };
        if content.len() > MAX_MANIFEST_SIZE {
            return Err(parse_err(format!("file too large: {} bytes", content.len())));
        }
        let raw: RawLockfile =
            serde_json::from_str(content).map_err(|e| parse_err(e.to_string()))?;
        let lockfile_version = raw.lockfile_version.unwrap_or(1);
        if !(1..=3).contains(&lockfile_version) {
            return Err(parse_err(format!(
                "unsupported lockfileVersion {lockfile_version}"
            )));
        }

        let packages = match (raw.packages, raw.dependencies) {
            (Some(packages), _) => packages,
            (None, Some(deps)) => {
                let mut out = BTreeMap::new();
                flatten_legacy(&deps, "", &mut out).map_err(parse_err)?;
                out
            }
            (None, None) => BTreeMap::new(),
        };
        for location in packages.keys() {
            validate_location(location).map_err(parse_err)?;
        }

        debug!(
            path = origin,
            lockfile_version,
            entries = packages.len(),
            "lockfile parsed"
        );
        Ok(Self {
            name: raw.name,
            version: raw.version,
            lockfile_version,
            packages,
            hidden: false,
        })
    }

    /// 지정한 버전 형식으로 직렬화합니다 (2칸 들여쓰기, 끝 개행).
    pub fn to_json(&self, lockfile_version: u32) -> Result<String, ArboristError> {
        let mut doc = Map::new();
        doc.insert("name".to_owned(), Value::String(self.name.clone()));
        if !self.version.is_empty() {
            doc.insert("version".to_owned(), Value::String(self.version.clone()));
        }
        doc.insert("lockfileVersion".to_owned(), Value::from(lockfile_version));
        doc.insert("requires".to_owned(), Value::Bool(true));

        if lockfile_version >= 2 {
            let packages = serde_json::to_value(&self.packages).map_err(|e| {
                ArboristError::LockfileParse {
                    path: self.name.clone(),
                    reason: e.to_string(),
                }
            })?;
            doc.insert("packages".to_owned(), packages);
        }
        if lockfile_version <= 2 {
            doc.insert(
                "dependencies".to_owned(),
                Value::Object(self.legacy_dependencies()),
            );
        }

        let mut out = serde_json::to_string_pretty(&Value::Object(doc)).map_err(|e| {
            ArboristError::LockfileParse {
                path: self.name.clone(),
                reason: e.to_string(),
            }
        })?;
        out.push('\n');
        Ok(out)
    }

    /// 트리 전체를 lockfile로 만듭니다.
    pub fn from_tree(tree: &Tree, lockfile_version: u32) -> Self {
        let root = tree.node(tree.root());
        let mut sw = Self::new(root.package_name(), root.version(), lockfile_version);
        for (location, id) in tree.inventory().iter() {
            sw.packages
                .insert(location.to_owned(), LockEntry::from_node(tree, id));
        }
        sw
    }

    /// 실제 설치 상태를 기록하는 hidden lockfile을 만듭니다.
    pub fn hidden_from_tree(tree: &Tree) -> Self {
        let mut sw = Self::from_tree(tree, DEFAULT_LOCKFILE_VERSION);
        sw.packages.remove("");
        sw.packages.retain(|location, _| location.contains("node_modules/"));
        sw.hidden = true;
        sw
    }

    /// 위치의 항목
    pub fn get(&self, location: &str) -> Option<&LockEntry> {
        self.packages.get(location)
    }

    /// 노드의 현재 상태로 항목을 갱신합니다.
    pub fn set_from_node(&mut self, tree: &Tree, id: NodeId) {
        let location = tree.node(id).location().to_owned();
        self.packages
            .insert(location, LockEntry::from_node(tree, id));
    }

    /// 위치의 항목과 그 아래 중첩 항목을 제거합니다.
    pub fn remove(&mut self, location: &str) {
        let nested = format!("{location}/");
        self.packages
            .retain(|key, _| key != location && !key.starts_with(&nested));
    }

    /// 파일에서 lockfile을 읽습니다. 파일이 없으면 `Ok(None)`.
    pub async fn load(path: &Path) -> Result<Option<Self>, ArboristError> {
        let content = match tokio::fs::read_to_string(path).await {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(ArboristError::io(path, e)),
        };
        Self::from_json(&path.display().to_string(), &content).map(Some)
    }

    /// 프로젝트 lockfile을 찾습니다. `npm-shrinkwrap.json`이 우선입니다.
    pub async fn load_project(project: &Path) -> Result<Option<Self>, ArboristError> {
        if let Some(sw) = Self::load(&project.join(SHRINKWRAP_NAME)).await? {
            return Ok(Some(sw));
        }
        Self::load(&project.join(LOCKFILE_NAME)).await
    }

    /// hidden lockfile을 읽습니다.
    pub async fn load_hidden(project: &Path) -> Result<Option<Self>, ArboristError> {
        Ok(Self::load(&project.join(HIDDEN_LOCKFILE))
            .await?
            .map(|mut sw| {
                sw.hidden = true;
                sw
            }))
    }

    /// 프로젝트 lockfile 경로 (`npm-shrinkwrap.json`이 있으면 그것)
    pub fn project_path(project: &Path) -> PathBuf {
        let shrinkwrap = project.join(SHRINKWRAP_NAME);
        if shrinkwrap.exists() {
            shrinkwrap
        } else {
            project.join(LOCKFILE_NAME)
        }
    }

    /// 임시 파일에 쓴 뒤 rename 하여 원자적으로 저장합니다.
    pub async fn save(&self, path: &Path) -> Result<(), ArboristError> {
        let version = if self.hidden {
            DEFAULT_LOCKFILE_VERSION
        } else {
            self.lockfile_version
        };
        let content = self.to_json(version)?;
        write_atomic(path, content.as_bytes()).await
    }

    /// v1/v2 호환 `dependencies` 섹션을 만듭니다.
    fn legacy_dependencies(&self) -> Map<String, Value> {
        let mut root = Map::new();
        for (location, entry) in &self.packages {
            let Some(names) = legacy_path(location) else {
                continue;
            };
            insert_nested(&mut root, &names, legacy_entry(entry));
        }
        root
    }
}

/// 원자적 파일 쓰기 (같은 디렉토리의 임시 파일 → rename)
pub(crate) async fn write_atomic(path: &Path, data: &[u8]) -> Result<(), ArboristError> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| ArboristError::io(parent, e))?;
    }
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let tmp = path.with_file_name(format!(".{file_name}.{}", uuid::Uuid::new_v4()));
    tokio::fs::write(&tmp, data)
        .await
        .map_err(|e| ArboristError::io(&tmp, e))?;
    if let Err(e) = tokio::fs::rename(&tmp, path).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(ArboristError::io(path, e));
    }
    Ok(())
}

fn insert_nested(map: &mut Map<String, Value>, names: &[&str], value: Value) {
    match names {
        [] => {}
        [last] => {
            map.insert((*last).to_owned(), value);
        }
        [first, rest @ ..] => {
            // 부모 항목이 없으면 (순서가 어긋난 입력) 버림
            if let Some(Value::Object(parent)) = map.get_mut(*first)
                && let Value::Object(deps) = parent
                    .entry("dependencies")
                    .or_insert_with(|| Value::Object(Map::new()))
            {
                insert_nested(deps, rest, value);
            }
        }
    }
}

/// `node_modules/a/node_modules/@s/b` → `["a", "@s/b"]`
fn legacy_path(location: &str) -> Option<Vec<&str>> {
    let rest = location.strip_prefix("node_modules/")?;
    Some(rest.split("/node_modules/").collect())
}

fn legacy_entry(entry: &LockEntry) -> Value {
    let mut obj = Map::new();
    let version = if entry.link {
        entry.resolved.as_ref().map(|r| format!("file:{r}"))
    } else {
        match (&entry.name, &entry.version) {
            (Some(name), Some(v)) => Some(format!("npm:{name}@{v}")),
            (None, v) => v.clone(),
            (Some(_), None) => None,
        }
    };
    if let Some(v) = version {
        obj.insert("version".to_owned(), Value::String(v));
    }
    if !entry.link {
        if let Some(r) = &entry.resolved {
            obj.insert("resolved".to_owned(), Value::String(r.clone()));
        }
        if let Some(i) = &entry.integrity {
            obj.insert("integrity".to_owned(), Value::String(i.clone()));
        }
    }
    if entry.dev {
        obj.insert("dev".to_owned(), Value::Bool(true));
    }
    if entry.optional {
        obj.insert("optional".to_owned(), Value::Bool(true));
    }
    let mut requires: BTreeMap<&String, &String> = entry.dependencies.iter().collect();
    requires.extend(entry.optional_dependencies.iter());
    if !requires.is_empty() {
        let map: Map<String, Value> = requires
            .into_iter()
            .map(|(k, v)| (k.clone(), Value::String(v.clone())))
            .collect();
        obj.insert("requires".to_owned(), Value::Object(map));
    }
    Value::Object(obj)
}

fn flatten_legacy(
    deps: &Map<String, Value>,
    prefix: &str,
    out: &mut BTreeMap<String, LockEntry>,
) -> Result<(), String> {
    for (name, value) in deps {
        let legacy: LegacyEntry = serde_json::from_value(value.clone())
            .map_err(|e| format!("dependencies.{name}: {e}"))?;
        let location = if prefix.is_empty() {
            format!("node_modules/{name}")
        } else {
            format!("{prefix}/node_modules/{name}")
        };

        let mut entry = LockEntry {
            resolved: legacy.resolved,
            integrity: legacy.integrity,
            dev: legacy.dev,
            optional: legacy.optional,
            dependencies: legacy.requires,
            ..LockEntry::default()
        };
        match legacy.version {
            Some(v) if v.starts_with("file:") => {
                entry.link = true;
                entry.resolved = Some(v.trim_start_matches("file:").to_owned());
            }
            Some(v) if v.starts_with("npm:") => {
                let alias = &v["npm:".len()..];
                let search_from = usize::from(alias.starts_with('@'));
                if let Some(idx) = alias[search_from..].find('@') {
                    let at = idx + search_from;
                    entry.name = Some(alias[..at].to_owned());
                    entry.version = Some(alias[at + 1..].to_owned());
                }
            }
            v => entry.version = v,
        }
        out.insert(location.clone(), entry);
        if let Some(nested) = &legacy.dependencies {
            flatten_legacy(nested, &location, out)?;
        }
    }
    Ok(())
}

/// `node_modules` 아래 위치는 루트 밖으로 벗어날 수 없습니다.
fn validate_location(location: &str) -> Result<(), String> {
    if location.is_empty() {
        return Ok(());
    }
    if location.starts_with('/') || location.contains('\\') || location.contains('\0') {
        return Err(format!("invalid package location '{location}'"));
    }
    if let Some(idx) = location.find("node_modules/") {
        let tail = &location[idx..];
        if tail
            .split('/')
            .any(|seg| seg.is_empty() || seg == "." || seg == "..")
        {
            return Err(format!("invalid package location '{location}'"));
        }
    }
    Ok(())
}
