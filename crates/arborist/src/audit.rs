//! 보안 감사
//!
//! 설치된 패키지 버전을 권고(advisory) DB와 대조해 [`Vuln`]을 만듭니다.
//! 취약한 노드를 의존하는 패키지가 안전한 버전을 받을 수 없는 범위로
//! 고정하고 있으면, 그 패키지도 `via`로 연결된 취약점(metavuln)이 됩니다.
//!
//! # DB 형식
//!
//! npm bulk advisory 응답과 같은 형식입니다. 디렉토리를 지정하면 안의
//! 모든 `*.json` 파일을 합칩니다.
//!
//! ```json
//! {
//!   "minimist": [
//!     {
//!       "id": 1179,
//!       "title": "Prototype Pollution",
//!       "url": "https://github.com/advisories/GHSA-vh95-rmgr-6w4m",
//!       "severity": "moderate",
//!       "vulnerable_versions": "<0.2.1 || >=1.0.0 <1.2.3"
//!     }
//!   ]
//! }
//! ```

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use semver::Version;
use serde::{Deserialize, Serialize, Serializer};
use tracing::{debug, info, warn};

use grove_core::metrics as m;
use grove_core::types::Severity;

use crate::error::ArboristError;
use crate::graph::{NodeId, Tree};
use crate::manifest::{Manifest, Packument};
use crate::registry::{MetadataProvider, fetch_with_retry};
use crate::spec::{Range, Spec, parse_version};

/// DB 파일 최대 크기 (50 MB)
const MAX_ADVISORY_DB_SIZE: u64 = 50 * 1024 * 1024;

/// 감사 보고서 형식 버전
pub const AUDIT_REPORT_VERSION: u32 = 2;

// ─── 권고 DB ────────────────────────────────────────────────────

/// 보안 권고 하나
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Advisory {
    pub id: u64,
    /// 패키지 이름 (DB 키에서 채워짐)
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub url: String,
    pub severity: Severity,
    pub vulnerable_versions: String,
    #[serde(default)]
    pub cwe: Vec<String>,
}

/// 패키지 이름으로 인덱싱된 권고 DB
#[derive(Debug, Clone, Default)]
pub struct AdvisoryDb {
    by_name: BTreeMap<String, Vec<(Advisory, Range)>>,
}

impl AdvisoryDb {
    pub fn empty() -> Self {
        Self::default()
    }

    /// 권고 목록으로 DB를 만듭니다. 범위를 해석할 수 없는 권고는 건너뜁니다.
    pub fn from_advisories(advisories: impl IntoIterator<Item = Advisory>) -> Self {
        let mut db = Self::default();
        for advisory in advisories {
            db.insert(advisory);
        }
        db
    }

    fn insert(&mut self, advisory: Advisory) {
        match Range::parse(&advisory.vulnerable_versions) {
            Ok(range) => {
                let entries = self.by_name.entry(advisory.name.clone()).or_default();
                if !entries.iter().any(|(a, _)| a.id == advisory.id) {
                    entries.push((advisory, range));
                }
            }
            Err(reason) => warn!(
                id = advisory.id,
                name = %advisory.name,
                reason = %reason,
                "advisory has invalid vulnerable_versions, skipping"
            ),
        }
    }

    /// bulk advisory JSON을 파싱합니다.
    pub fn from_json(origin: &str, content: &str) -> Result<Self, ArboristError> {
        let mut db = Self::default();
        db.merge_json(origin, content)?;
        Ok(db)
    }

    fn merge_json(&mut self, origin: &str, content: &str) -> Result<(), ArboristError> {
        let parsed: BTreeMap<String, Vec<Advisory>> =
            serde_json::from_str(content).map_err(|e| ArboristError::AdvisoryDb {
                path: origin.to_owned(),
                reason: e.to_string(),
            })?;
        for (name, advisories) in parsed {
            for mut advisory in advisories {
                advisory.name.clone_from(&name);
                self.insert(advisory);
            }
        }
        Ok(())
    }

    /// 파일 또는 디렉토리에서 DB를 읽습니다.
    pub async fn load(path: &Path) -> Result<Self, ArboristError> {
        let db_err = |reason: String| ArboristError::AdvisoryDb {
            path: path.display().to_string(),
            reason,
        };
        let metadata = tokio::fs::metadata(path)
            .await
            .map_err(|e| db_err(e.to_string()))?;

        let mut files = Vec::new();
        if metadata.is_dir() {
            let mut entries = tokio::fs::read_dir(path)
                .await
                .map_err(|e| db_err(e.to_string()))?;
            while let Some(entry) = entries
                .next_entry()
                .await
                .map_err(|e| db_err(e.to_string()))?
            {
                let file = entry.path();
                if file.extension().is_some_and(|ext| ext == "json") {
                    files.push(file);
                }
            }
            files.sort();
        } else {
            files.push(path.to_path_buf());
        }

        let mut db = Self::default();
        for file in files {
            let size = tokio::fs::metadata(&file)
                .await
                .map_err(|e| db_err(e.to_string()))?
                .len();
            if size > MAX_ADVISORY_DB_SIZE {
                return Err(ArboristError::AdvisoryDb {
                    path: file.display().to_string(),
                    reason: format!(
                        "file size {size} bytes exceeds maximum {MAX_ADVISORY_DB_SIZE} bytes"
                    ),
                });
            }
            let content = tokio::fs::read_to_string(&file)
                .await
                .map_err(|e| ArboristError::AdvisoryDb {
                    path: file.display().to_string(),
                    reason: e.to_string(),
                })?;
            db.merge_json(&file.display().to_string(), &content)?;
        }
        debug!(path = %path.display(), advisories = db.len(), "advisory database loaded");
        Ok(db)
    }

    /// 이름에 대한 모든 권고
    pub fn advisories_for(&self, name: &str) -> impl Iterator<Item = &Advisory> {
        self.by_name
            .get(name)
            .into_iter()
            .flatten()
            .map(|(a, _)| a)
    }

    /// 버전에 해당하는 권고
    pub fn matching(&self, name: &str, version: &Version) -> Vec<&Advisory> {
        self.by_name
            .get(name)
            .into_iter()
            .flatten()
            .filter(|(_, range)| range.satisfied_by(version))
            .map(|(a, _)| a)
            .collect()
    }

    pub fn is_vulnerable(&self, name: &str, version: &Version) -> bool {
        self.by_name
            .get(name)
            .is_some_and(|entries| entries.iter().any(|(_, r)| r.satisfied_by(version)))
    }

    /// 이름의 모든 취약 범위를 합친 범위
    pub fn vulnerable_range(&self, name: &str) -> Option<Range> {
        let ranges: Vec<&str> = self
            .advisories_for(name)
            .map(|a| a.vulnerable_versions.as_str())
            .collect();
        if ranges.is_empty() {
            return None;
        }
        Range::parse(&ranges.join(" || ")).ok()
    }

    /// 권고 수
    pub fn len(&self) -> usize {
        self.by_name.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }
}

// ─── 보고서 타입 ────────────────────────────────────────────────

fn severity_str<S: Serializer>(severity: &Severity, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(severity.as_report_str())
}

/// 취약점의 원인
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum Via {
    Advisory(AdvisoryRef),
    /// 다른 취약 패키지를 통한 노출
    Vuln(String),
}

/// 보고서에 담기는 권고 요약
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AdvisoryRef {
    pub source: u64,
    pub name: String,
    pub dependency: String,
    pub title: String,
    pub url: String,
    #[serde(serialize_with = "severity_str")]
    pub severity: Severity,
    pub range: String,
}

/// 수정 가능 여부
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum FixAvailable {
    /// 선언 범위 안에서 수정 가능하면 `true`
    Bool(bool),
    /// 최상위 의존성의 범위를 벗어난 업그레이드가 필요
    Upgrade {
        name: String,
        version: String,
        #[serde(rename = "isSemVerMajor")]
        is_semver_major: bool,
    },
}

/// 패키지 하나의 취약점
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Vuln {
    pub name: String,
    #[serde(serialize_with = "severity_str")]
    pub severity: Severity,
    pub is_direct: bool,
    pub via: Vec<Via>,
    /// 이 취약점 때문에 취약해진 패키지
    pub effects: BTreeSet<String>,
    pub range: String,
    /// 영향받는 노드 위치
    pub nodes: Vec<String>,
    pub fix_available: FixAvailable,
}

impl Vuln {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_owned(),
            severity: Severity::Info,
            is_direct: false,
            via: Vec::new(),
            effects: BTreeSet::new(),
            range: String::new(),
            nodes: Vec::new(),
            fix_available: FixAvailable::Bool(false),
        }
    }

    fn add_advisory(&mut self, advisory: &Advisory) {
        let exists = self
            .via
            .iter()
            .any(|v| matches!(v, Via::Advisory(a) if a.source == advisory.id));
        if exists {
            return;
        }
        self.via.push(Via::Advisory(AdvisoryRef {
            source: advisory.id,
            name: advisory.name.clone(),
            dependency: advisory.name.clone(),
            title: advisory.title.clone(),
            url: advisory.url.clone(),
            severity: advisory.severity,
            range: advisory.vulnerable_versions.clone(),
        }));
        self.severity = self.severity.max(advisory.severity);
    }

    fn add_via_vuln(&mut self, name: &str) {
        if !self.via.iter().any(|v| matches!(v, Via::Vuln(n) if n == name)) {
            self.via.push(Via::Vuln(name.to_owned()));
        }
    }

    /// `via`의 다른 취약 패키지 이름
    pub fn via_names(&self) -> impl Iterator<Item = &str> {
        self.via.iter().filter_map(|v| match v {
            Via::Vuln(name) => Some(name.as_str()),
            Via::Advisory(_) => None,
        })
    }

    /// 권고에 직접 해당하는지 (metavuln이 아닌지) 반환합니다.
    pub fn has_advisory(&self) -> bool {
        self.via.iter().any(|v| matches!(v, Via::Advisory(_)))
    }
}

/// 심각도별 취약점 수
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SeverityCounts {
    pub info: usize,
    pub low: usize,
    pub moderate: usize,
    pub high: usize,
    pub critical: usize,
    pub total: usize,
}

impl SeverityCounts {
    fn add(&mut self, severity: Severity) {
        match severity {
            Severity::Info => self.info += 1,
            Severity::Low => self.low += 1,
            Severity::Medium => self.moderate += 1,
            Severity::High => self.high += 1,
            Severity::Critical => self.critical += 1,
        }
        self.total += 1;
    }
}

/// 의존성 종류별 설치 패키지 수
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DependencyCounts {
    pub prod: usize,
    pub dev: usize,
    pub optional: usize,
    pub peer: usize,
    pub peer_optional: usize,
    pub total: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AuditMetadata {
    pub vulnerabilities: SeverityCounts,
    pub dependencies: DependencyCounts,
}

/// `audit fix`가 ideal tree 구성에 넘길 요청
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuditFix {
    /// 선언 범위 안에서 다시 해석할 이름
    pub update: Vec<String>,
    /// 이름 → 피해야 할 취약 범위
    pub avoid: BTreeMap<String, Range>,
    /// 범위를 벗어나야 해서 자동으로 적용하지 않는 업그레이드 (이름 → 버전)
    pub breaking: BTreeMap<String, String>,
}

impl AuditFix {
    pub fn is_empty(&self) -> bool {
        self.update.is_empty()
    }
}

/// 감사 보고서 (`auditReportVersion: 2`)
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditReport {
    pub audit_report_version: u32,
    pub vulnerabilities: BTreeMap<String, Vuln>,
    pub metadata: AuditMetadata,
}

impl AuditReport {
    pub fn has_vulnerabilities(&self) -> bool {
        !self.vulnerabilities.is_empty()
    }

    /// 가장 높은 심각도
    pub fn max_severity(&self) -> Option<Severity> {
        self.vulnerabilities.values().map(|v| v.severity).max()
    }

    /// 보고서로부터 수정 요청을 만듭니다.
    pub fn fix_plan(&self, db: &AdvisoryDb) -> AuditFix {
        let mut fix = AuditFix::default();
        for vuln in self.vulnerabilities.values() {
            match &vuln.fix_available {
                FixAvailable::Bool(true) => fix.update.push(vuln.name.clone()),
                FixAvailable::Upgrade { name, version, .. } => {
                    fix.breaking.insert(name.clone(), version.clone());
                }
                FixAvailable::Bool(false) => {}
            }
            if vuln.has_advisory()
                && let Some(range) = db.vulnerable_range(&vuln.name)
            {
                fix.avoid.insert(vuln.name.clone(), range);
            }
        }
        fix
    }

    pub fn to_json_pretty(&self) -> Result<String, ArboristError> {
        serde_json::to_string_pretty(self).map_err(|e| ArboristError::AdvisoryDb {
            path: "audit report".to_owned(),
            reason: e.to_string(),
        })
    }
}

// ─── 감사 실행 ──────────────────────────────────────────────────

/// 감사 실행기
pub struct Auditor<R> {
    registry: Arc<R>,
    db: Arc<AdvisoryDb>,
    min_severity: Severity,
    fetch_timeout: Duration,
    fetch_retries: u32,
}

/// 이름 → packument (조회 실패 시 `None`)
type PackumentCache = HashMap<String, Option<Packument>>;

impl<R: MetadataProvider> Auditor<R> {
    pub fn new(registry: Arc<R>, db: Arc<AdvisoryDb>) -> Self {
        Self {
            registry,
            db,
            min_severity: Severity::Info,
            fetch_timeout: Duration::from_secs(60),
            fetch_retries: 2,
        }
    }

    /// 이 심각도 미만의 취약점은 보고서에서 뺍니다.
    pub fn min_severity(mut self, severity: Severity) -> Self {
        self.min_severity = severity;
        self
    }

    pub fn fetch_policy(mut self, timeout: Duration, retries: u32) -> Self {
        self.fetch_timeout = timeout;
        self.fetch_retries = retries;
        self
    }

    /// 트리를 감사합니다.
    ///
    /// packument 조회 실패는 감사를 중단하지 않고 해당 패키지의 수정
    /// 가능 여부를 알 수 없음(`false`)으로 둡니다.
    pub async fn audit(&self, tree: &Tree) -> Result<AuditReport, ArboristError> {
        let started = Instant::now();
        let installed: Vec<NodeId> = tree
            .walk()
            .into_iter()
            .map(|(id, _)| id)
            .filter(|&id| {
                let node = tree.node(id);
                !node.is_link() && node.parent().is_some()
            })
            .collect();

        let mut vulns: BTreeMap<String, Vuln> = BTreeMap::new();
        let mut vulnerable: BTreeSet<NodeId> = BTreeSet::new();
        let mut queue: VecDeque<NodeId> = VecDeque::new();

        for &id in &installed {
            let node = tree.node(id);
            let Some(version) = parse_version(node.version()) else {
                continue;
            };
            let hits = self.db.matching(node.package_name(), &version);
            if hits.is_empty() {
                continue;
            }
            let vuln = vulns
                .entry(node.package_name().to_owned())
                .or_insert_with(|| Vuln::new(node.package_name()));
            for advisory in hits {
                vuln.add_advisory(advisory);
            }
            vuln.nodes.push(node.location().to_owned());
            vulnerable.insert(id);
            queue.push_back(id);
        }

        // 의존하는 쪽으로 전파
        let mut packuments = PackumentCache::new();
        while let Some(id) = queue.pop_front() {
            let name = tree.node(id).package_name().to_owned();
            self.ensure_packument(&name, &mut packuments).await;

            for &eid in tree.node(id).edges_in() {
                let edge = tree.edge(eid);
                let Some(from) = edge.from() else {
                    continue;
                };
                let from_node = tree.node(from);
                if from_node.parent().is_none() || from_node.is_link() {
                    if let Some(v) = vulns.get_mut(&name) {
                        v.is_direct = true;
                    }
                    continue;
                }
                if self.admits_safe(&name, edge.spec(), &vulns, &packuments) != Some(false) {
                    continue;
                }

                let dependent = from_node.package_name().to_owned();
                if let Some(v) = vulns.get_mut(&name) {
                    v.effects.insert(dependent.clone());
                }
                let meta = vulns
                    .entry(dependent.clone())
                    .or_insert_with(|| Vuln::new(&dependent));
                meta.add_via_vuln(&name);
                if vulnerable.insert(from) {
                    meta.nodes.push(from_node.location().to_owned());
                    queue.push_back(from);
                }
            }
        }

        propagate_severity(&mut vulns);
        for name in vulns.keys().cloned().collect::<Vec<_>>() {
            self.ensure_packument(&name, &mut packuments).await;
        }
        self.compute_fixes(tree, &mut vulns, &packuments);
        for vuln in vulns.values_mut() {
            vuln.range = self.vuln_range(tree, vuln);
        }

        vulns.retain(|_, v| v.severity >= self.min_severity);
        let kept: BTreeSet<String> = vulns.keys().cloned().collect();
        for vuln in vulns.values_mut() {
            vuln.effects.retain(|e| kept.contains(e));
        }

        let mut metadata = AuditMetadata {
            dependencies: dependency_counts(tree, &installed),
            ..AuditMetadata::default()
        };
        for vuln in vulns.values() {
            metadata.vulnerabilities.add(vuln.severity);
            metrics::counter!(
                m::AUDIT_VULNS_FOUND_TOTAL,
                m::LABEL_SEVERITY => vuln.severity.as_report_str()
            )
            .increment(1);
        }

        let elapsed = started.elapsed();
        info!(
            dependencies = metadata.dependencies.total,
            vulnerabilities = metadata.vulnerabilities.total,
            critical = metadata.vulnerabilities.critical,
            high = metadata.vulnerabilities.high,
            elapsed_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
            "audit completed"
        );

        Ok(AuditReport {
            audit_report_version: AUDIT_REPORT_VERSION,
            vulnerabilities: vulns,
            metadata,
        })
    }

    async fn ensure_packument(&self, name: &str, cache: &mut PackumentCache) {
        if cache.contains_key(name) {
            return;
        }
        let what = format!("packument {name}");
        let fetched = fetch_with_retry(&what, self.fetch_timeout, self.fetch_retries, || {
            self.registry.packument(name)
        })
        .await;
        let packument = match fetched {
            Ok(p) => Some(p),
            Err(e) => {
                warn!(name, error = %e, "packument unavailable, fix information unknown");
                None
            }
        };
        cache.insert(name.to_owned(), packument);
    }

    /// 버전 하나가 안전한지 판정합니다.
    ///
    /// 권고에 해당하지 않고, metavuln이면 원인 패키지에 대한 선언이 안전한
    /// 버전을 허용해야 합니다.
    fn safe_manifest(
        &self,
        name: &str,
        manifest: &Manifest,
        vulns: &BTreeMap<String, Vuln>,
        packuments: &PackumentCache,
    ) -> bool {
        let Some(version) = manifest.parsed_version() else {
            return false;
        };
        if self.db.is_vulnerable(name, &version) {
            return false;
        }
        let Some(vuln) = vulns.get(name) else {
            return true;
        };
        vuln.via_names().all(|dep| match manifest.declared_spec(dep) {
            None => true,
            Some(raw) => self.admits_unadvised(dep, raw, packuments) != Some(false),
        })
    }

    /// spec이 안전한 버전을 허용하는지. packument가 없으면 `None`.
    fn admits_safe(
        &self,
        name: &str,
        raw: &str,
        vulns: &BTreeMap<String, Vuln>,
        packuments: &PackumentCache,
    ) -> Option<bool> {
        let spec = Spec::parse(name, raw).ok()?;
        let packument = packuments.get(name)?.as_ref()?;
        Some(safe_candidates(packument, &spec).any(|m| self.safe_manifest(name, m, vulns, packuments)))
    }

    /// 권고만 고려한 [`Self::admits_safe`]
    fn admits_unadvised(&self, name: &str, raw: &str, packuments: &PackumentCache) -> Option<bool> {
        let spec = Spec::parse(name, raw).ok()?;
        let packument = packuments.get(name)?.as_ref()?;
        Some(safe_candidates(packument, &spec).any(|m| {
            m.parsed_version()
                .is_some_and(|v| !self.db.is_vulnerable(name, &v))
        }))
    }

    /// 각 취약점의 `fixAvailable`을 계산합니다.
    ///
    /// 1단계: 모든 노드의 모든 선언이 안전한 버전을 허용하면 `true`.
    /// 2단계: 막고 있는 선언이 모두 1단계에서 수정 가능한 취약 패키지에서
    /// 온 것이면 `true`. 그래도 안 되고 최상위 의존성이면 범위 밖 업그레이드.
    fn compute_fixes(&self, tree: &Tree, vulns: &mut BTreeMap<String, Vuln>, packuments: &PackumentCache) {
        let mut blockers: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        let mut unfixable: BTreeSet<String> = BTreeSet::new();
        for (name, vuln) in vulns.iter() {
            for location in &vuln.nodes {
                let Some(id) = tree.get(location) else {
                    continue;
                };
                for &eid in tree.node(id).edges_in() {
                    let edge = tree.edge(eid);
                    if self.admits_safe(name, edge.spec(), vulns, packuments) == Some(true) {
                        continue;
                    }
                    match edge.from().map(|f| tree.node(f)) {
                        Some(from) if from.parent().is_some() && !from.is_link() => {
                            blockers
                                .entry(name.clone())
                                .or_default()
                                .insert(from.package_name().to_owned());
                        }
                        _ => {
                            unfixable.insert(name.clone());
                        }
                    }
                }
            }
        }

        let in_range: BTreeSet<String> = vulns
            .keys()
            .filter(|n| !unfixable.contains(*n) && !blockers.contains_key(*n))
            .cloned()
            .collect();

        let names: Vec<String> = vulns.keys().cloned().collect();
        for name in names {
            let fixable = in_range.contains(&name)
                || (!unfixable.contains(&name)
                    && blockers
                        .get(&name)
                        .is_some_and(|b| b.iter().all(|d| in_range.contains(d))));
            let fix = if fixable {
                FixAvailable::Bool(true)
            } else {
                self.upgrade_fix(tree, &name, vulns, packuments)
                    .unwrap_or(FixAvailable::Bool(false))
            };
            if let Some(vuln) = vulns.get_mut(&name) {
                vuln.fix_available = fix;
            }
        }
    }

    /// 최상위 의존성의 범위 밖 업그레이드 후보
    fn upgrade_fix(
        &self,
        tree: &Tree,
        name: &str,
        vulns: &BTreeMap<String, Vuln>,
        packuments: &PackumentCache,
    ) -> Option<FixAvailable> {
        let vuln = vulns.get(name)?;
        if !vuln.is_direct {
            return None;
        }
        let packument = packuments.get(name)?.as_ref()?;
        let best = packument
            .versions
            .values()
            .filter(|m| m.deprecated.is_none())
            .filter_map(|m| m.parsed_version().map(|v| (m, v)))
            .filter(|(_, v)| v.pre.is_empty())
            .filter(|(m, _)| self.safe_manifest(name, m, vulns, packuments))
            .max_by(|(_, a), (_, b)| a.cmp(b))?;
        let current_major = vuln
            .nodes
            .iter()
            .filter_map(|loc| tree.get(loc))
            .filter_map(|id| parse_version(tree.node(id).version()))
            .map(|v| v.major)
            .max();
        Some(FixAvailable::Upgrade {
            name: name.to_owned(),
            version: best.1.to_string(),
            is_semver_major: current_major.is_some_and(|major| major != best.1.major),
        })
    }

    fn vuln_range(&self, tree: &Tree, vuln: &Vuln) -> String {
        if vuln.has_advisory() {
            let mut ranges: Vec<&str> = Vec::new();
            for via in &vuln.via {
                if let Via::Advisory(a) = via
                    && !ranges.contains(&a.range.as_str())
                {
                    ranges.push(&a.range);
                }
            }
            return ranges.join(" || ");
        }
        let versions: BTreeSet<&str> = vuln
            .nodes
            .iter()
            .filter_map(|loc| tree.get(loc))
            .map(|id| tree.node(id).version())
            .collect();
        versions.into_iter().collect::<Vec<_>>().join(" || ")
    }
}

/// spec을 만족하는 버전
fn safe_candidates<'a>(packument: &'a Packument, spec: &'a Spec) -> impl Iterator<Item = &'a Manifest> {
    packument.versions.values().filter(move |m| {
        m.parsed_version()
            .is_some_and(|v| spec.satisfied_by(&v))
    })
}

/// 심각도를 `via` 방향으로 전파합니다 (원인의 최댓값).
fn propagate_severity(vulns: &mut BTreeMap<String, Vuln>) {
    for _ in 0..vulns.len() {
        let current: BTreeMap<String, Severity> = vulns
            .iter()
            .map(|(n, v)| (n.clone(), v.severity))
            .collect();
        let mut changed = false;
        for vuln in vulns.values_mut() {
            let inherited = vuln
                .via_names()
                .filter_map(|n| current.get(n).copied())
                .max();
            if let Some(s) = inherited
                && s > vuln.severity
            {
                vuln.severity = s;
                changed = true;
            }
        }
        if !changed {
            break;
        }
    }
}

fn dependency_counts(tree: &Tree, installed: &[NodeId]) -> DependencyCounts {
    let mut counts = DependencyCounts::default();
    for &id in installed {
        let node = tree.node(id);
        if node.dev {
            counts.dev += 1;
        }
        if node.optional && !node.peer {
            counts.optional += 1;
        }
        if node.peer && node.optional {
            counts.peer_optional += 1;
        } else if node.peer {
            counts.peer += 1;
        }
        if !node.dev && !node.optional && !node.dev_optional && !node.peer {
            counts.prod += 1;
        }
        counts.total += 1;
    }
    counts
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ideal::{IdealOptions, IdealTreeBuilder};
    use crate::registry::MemoryRegistry;

    fn advisory(id: u64, name: &str, range: &str, severity: Severity) -> Advisory {
        Advisory {
            id,
            name: name.to_owned(),
            title: format!("issue in {name}"),
            url: format!("https://example.invalid/advisories/{id}"),
            severity,
            vulnerable_versions: range.to_owned(),
            cwe: Vec::new(),
        }
    }

    fn root(deps: &[(&str, &str)]) -> Manifest {
        Manifest {
            name: "app".to_owned(),
            version: "1.0.0".to_owned(),
            dependencies: deps
                .iter()
                .map(|(n, s)| ((*n).to_owned(), (*s).to_owned()))
                .collect(),
            ..Manifest::default()
        }
    }

    async fn build(registry: &Arc<MemoryRegistry>, deps: &[(&str, &str)]) -> Tree {
        let start = Tree::new("/app", root(deps), false).unwrap();
        IdealTreeBuilder::new(Arc::clone(registry), IdealOptions::default())
            .build(start)
            .await
            .unwrap()
            .tree
    }

    #[test]
    fn parses_bulk_format() {
        let db = AdvisoryDb::from_json(
            "db.json",
            r#"{
              "minimist": [
                { "id": 1, "title": "pollution", "url": "u", "severity": "moderate", "vulnerable_versions": "<1.2.3" },
                { "id": 2, "severity": "high", "vulnerable_versions": "not a range !!" }
              ]
            }"#,
        )
        .unwrap();
        assert_eq!(db.len(), 1);
        let a = db.advisories_for("minimist").next().unwrap();
        assert_eq!(a.name, "minimist");
        assert_eq!(a.severity, Severity::Medium);
        assert!(db.is_vulnerable("minimist", &Version::new(1, 2, 2)));
        assert!(!db.is_vulnerable("minimist", &Version::new(1, 2, 3)));
    }

    #[test]
    fn rejects_malformed_db() {
        let err = AdvisoryDb::from_json("db.json", "[1, 2]").unwrap_err();
        assert!(matches!(err, ArboristError::AdvisoryDb { .. }));
    }

    #[tokio::test]
    async fn loads_directory_of_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("a.json"),
            r#"{"a":[{"id":1,"severity":"low","vulnerable_versions":"<2"}]}"#,
        )
        .unwrap();
        std::fs::write(
            dir.path().join("b.json"),
            r#"{"b":[{"id":2,"severity":"critical","vulnerable_versions":"*"}]}"#,
        )
        .unwrap();
        std::fs::write(dir.path().join("README.md"), "ignored").unwrap();

        let db = AdvisoryDb::load(dir.path()).await.unwrap();
        assert_eq!(db.len(), 2);

        let missing = AdvisoryDb::load(&dir.path().join("nope.json")).await;
        assert!(matches!(missing, Err(ArboristError::AdvisoryDb { .. })));
    }

    #[tokio::test]
    async fn direct_vulnerability_with_fix_in_range() {
        let registry = Arc::new(MemoryRegistry::new());
        registry.publish_simple("a", "1.0.0", &[]).unwrap();
        let tree = build(&registry, &[("a", "^1.0.0")]).await;
        registry.publish_simple("a", "1.0.1", &[]).unwrap();

        let db = AdvisoryDb::from_advisories([advisory(10, "a", "<1.0.1", Severity::High)]);
        let report = Auditor::new(Arc::clone(&registry), Arc::new(db))
            .audit(&tree)
            .await
            .unwrap();

        let vuln = &report.vulnerabilities["a"];
        assert!(vuln.is_direct);
        assert_eq!(vuln.severity, Severity::High);
        assert_eq!(vuln.nodes, vec!["node_modules/a"]);
        assert_eq!(vuln.range, "<1.0.1");
        assert_eq!(vuln.fix_available, FixAvailable::Bool(true));
        assert_eq!(report.metadata.vulnerabilities.high, 1);
        assert_eq!(report.metadata.dependencies.prod, 1);
        assert_eq!(report.max_severity(), Some(Severity::High));
    }

    #[tokio::test]
    async fn pinned_dependency_becomes_metavuln() {
        let registry = Arc::new(MemoryRegistry::new());
        registry.publish_simple("a", "1.0.0", &[]).unwrap();
        registry.publish_simple("b", "1.0.0", &[("a", "1.0.0")]).unwrap();
        let tree = build(&registry, &[("b", "^1.0.0")]).await;
        registry.publish_simple("a", "1.0.1", &[]).unwrap();
        registry.publish_simple("b", "1.1.0", &[("a", "^1.0.1")]).unwrap();

        let db = AdvisoryDb::from_advisories([advisory(10, "a", "<1.0.1", Severity::Critical)]);
        let report = Auditor::new(Arc::clone(&registry), Arc::new(db))
            .audit(&tree)
            .await
            .unwrap();

        let a = &report.vulnerabilities["a"];
        assert!(!a.is_direct);
        assert_eq!(a.effects, BTreeSet::from(["b".to_owned()]));
        assert_eq!(a.fix_available, FixAvailable::Bool(true));

        let b = &report.vulnerabilities["b"];
        assert!(b.is_direct);
        assert_eq!(b.via, vec![Via::Vuln("a".to_owned())]);
        assert_eq!(b.severity, Severity::Critical);
        assert_eq!(b.fix_available, FixAvailable::Bool(true));
        assert_eq!(b.range, "1.0.0");

        let fix = report.fix_plan(&AdvisoryDb::from_advisories([advisory(
            10,
            "a",
            "<1.0.1",
            Severity::Critical,
        )]));
        assert_eq!(fix.update, vec!["a".to_owned(), "b".to_owned()]);
        assert!(fix.avoid.contains_key("a"));
        assert!(!fix.avoid.contains_key("b"));
    }

    #[tokio::test]
    async fn out_of_range_fix_is_semver_major() {
        let registry = Arc::new(MemoryRegistry::new());
        registry.publish_simple("a", "1.4.0", &[]).unwrap();
        registry.publish_simple("a", "2.0.0", &[]).unwrap();
        let tree = build(&registry, &[("a", "^1.0.0")]).await;

        let db = AdvisoryDb::from_advisories([advisory(3, "a", ">=1.0.0 <2.0.0", Severity::Low)]);
        let report = Auditor::new(Arc::clone(&registry), Arc::new(db))
            .audit(&tree)
            .await
            .unwrap();

        assert_eq!(
            report.vulnerabilities["a"].fix_available,
            FixAvailable::Upgrade {
                name: "a".to_owned(),
                version: "2.0.0".to_owned(),
                is_semver_major: true,
            }
        );
    }

    #[tokio::test]
    async fn min_severity_filters_report() {
        let registry = Arc::new(MemoryRegistry::new());
        registry.publish_simple("a", "1.0.0", &[]).unwrap();
        registry.publish_simple("b", "1.0.0", &[]).unwrap();
        let tree = build(&registry, &[("a", "^1.0.0"), ("b", "^1.0.0")]).await;

        let db = AdvisoryDb::from_advisories([
            advisory(1, "a", "*", Severity::Low),
            advisory(2, "b", "*", Severity::High),
        ]);
        let report = Auditor::new(Arc::clone(&registry), Arc::new(db))
            .min_severity(Severity::Medium)
            .audit(&tree)
            .await
            .unwrap();

        assert_eq!(report.vulnerabilities.keys().collect::<Vec<_>>(), vec!["b"]);
        assert_eq!(report.metadata.vulnerabilities.total, 1);
        assert_eq!(report.metadata.dependencies.total, 2);
        assert_eq!(report.vulnerabilities["b"].fix_available, FixAvailable::Bool(false));
    }

    #[tokio::test]
    async fn report_json_shape() {
        let registry = Arc::new(MemoryRegistry::new());
        registry.publish_simple("a", "1.0.0", &[]).unwrap();
        let tree = build(&registry, &[("a", "^1.0.0")]).await;
        let db = AdvisoryDb::from_advisories([advisory(7, "a", "<2", Severity::Medium)]);
        let report = Auditor::new(Arc::clone(&registry), Arc::new(db))
            .audit(&tree)
            .await
            .unwrap();

        let json: serde_json::Value =
            serde_json::from_str(&report.to_json_pretty().unwrap()).unwrap();
        assert_eq!(json["auditReportVersion"], 2);
        assert_eq!(json["metadata"]["vulnerabilities"]["moderate"], 1);
        assert_eq!(json["vulnerabilities"]["a"]["severity"], "moderate");
        assert_eq!(json["vulnerabilities"]["a"]["via"][0]["source"], 7);
        assert_eq!(json["vulnerabilities"]["a"]["fixAvailable"], false);
        assert_eq!(json["vulnerabilities"]["a"]["isDirect"], true);
    }

    #[tokio::test]
    async fn clean_tree_has_no_vulnerabilities() {
        let registry = Arc::new(MemoryRegistry::new());
        registry.publish_simple("a", "1.0.0", &[]).unwrap();
        let tree = build(&registry, &[("a", "^1.0.0")]).await;
        let report = Auditor::new(Arc::clone(&registry), Arc::new(AdvisoryDb::empty()))
            .audit(&tree)
            .await
            .unwrap();
        assert!(!report.has_vulnerabilities());
        assert_eq!(report.metadata.dependencies.total, 1);
    }
}
