//! ideal tree를 파일시스템에 반영
//!
//! [`Diff`] leaf를 wave 단위로 적용합니다. REMOVE wave는 깊은 위치부터,
//! ADD/CHANGE wave는 얕은 위치부터 실행되며 같은 wave 안의 leaf는
//! `Semaphore`로 제한된 동시성으로 처리됩니다.
//!
//! # 실패 처리
//!
//! - 일반 실패: 해당 leaf를 `failed`에 기록하고 그 아래 위치는 건너뜁니다.
//! - integrity 불일치, 취소: 진행 중인 leaf가 끝난 뒤 hidden lockfile을
//!   기록하고 에러로 중단합니다. 이미 적용된 leaf는 되돌리지 않습니다.
//!
//! 매 wave가 끝날 때마다 hidden lockfile(`node_modules/.package-lock.json`)을
//! 갱신하므로, 중단 후 다시 실행하면 완료된 leaf는 diff에서 빠집니다.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use grove_core::metrics as m;

use crate::config::ArboristConfig;
use crate::diff::{Diff, DiffAction};
use crate::error::ArboristError;
use crate::fs::Filesystem;
use crate::graph::{NodeId, Tree, relative_path};
use crate::integrity;
use crate::manifest::{INSTALL_EVENTS, Manifest};
use crate::registry::{MetadataProvider, fetch_with_retry};
use crate::shrinkwrap::{DEFAULT_LOCKFILE_VERSION, HIDDEN_LOCKFILE, Shrinkwrap};

// ─── 라이프사이클 스크립트 ──────────────────────────────────────

/// 실행할 라이프사이클 스크립트 하나
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScriptCall {
    /// 트리 위치 (루트는 빈 문자열)
    pub location: String,
    /// `name@version`
    pub package: String,
    pub event: String,
    pub command: String,
    /// 실행 디렉토리
    #[serde(skip)]
    pub path: PathBuf,
}

/// 라이프사이클 스크립트 실행기
///
/// 프로세스 실행은 이 crate의 범위 밖이므로 호출자가 구현을 주입합니다.
pub trait ScriptRunner: Send + Sync + 'static {
    fn run(&self, call: &ScriptCall) -> impl Future<Output = Result<(), ArboristError>> + Send;
}

/// 스크립트를 실행하지 않고 로그만 남기는 실행기
#[derive(Debug, Clone, Copy, Default)]
pub struct LogScriptRunner;

impl ScriptRunner for LogScriptRunner {
    async fn run(&self, call: &ScriptCall) -> Result<(), ArboristError> {
        info!(
            location = %call.location,
            package = %call.package,
            event = %call.event,
            command = %call.command,
            "lifecycle script planned"
        );
        Ok(())
    }
}

// ─── 아티팩트 캐시 ──────────────────────────────────────────────

/// integrity를 키로 하는 tarball 캐시
#[derive(Debug, Clone)]
pub struct ArtifactCache {
    dir: PathBuf,
}

impl ArtifactCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, integrity: &str) -> PathBuf {
        let digest = Sha256::digest(integrity.trim().as_bytes());
        let hex: String = digest.iter().map(|b| format!("{b:02x}")).collect();
        self.dir
            .join("content-v2")
            .join(&hex[..2])
            .join(&hex[2..])
    }

    /// 캐시된 데이터. 없거나 읽을 수 없으면 `None`.
    pub async fn get(&self, integrity: &str) -> Option<Bytes> {
        tokio::fs::read(self.path_for(integrity))
            .await
            .ok()
            .map(Bytes::from)
    }

    pub async fn put(&self, integrity: &str, data: &[u8]) -> Result<(), ArboristError> {
        crate::shrinkwrap::write_atomic(&self.path_for(integrity), data).await
    }
}

// ─── 옵션과 결과 ────────────────────────────────────────────────

/// reify 옵션
#[derive(Debug, Clone)]
pub struct ReifyOptions {
    pub concurrency: usize,
    pub fetch_timeout: Duration,
    pub fetch_retries: u32,
    pub cache_dir: Option<PathBuf>,
    /// 캐시 적중 시 integrity 재검증 생략
    pub trust_cache: bool,
    pub ignore_scripts: bool,
    /// 계획만 계산하고 아무것도 쓰지 않음
    pub dry_run: bool,
    pub package_lock: bool,
    /// lockfile(과 package.json)만 쓰고 node_modules는 건드리지 않음
    pub package_lock_only: bool,
    pub lockfile_version: u32,
    /// 루트 `package.json` 저장 여부
    pub save_manifest: bool,
}

impl Default for ReifyOptions {
    fn default() -> Self {
        Self {
            concurrency: 8,
            fetch_timeout: Duration::from_secs(60),
            fetch_retries: 2,
            cache_dir: None,
            trust_cache: false,
            ignore_scripts: false,
            dry_run: false,
            package_lock: true,
            package_lock_only: false,
            lockfile_version: DEFAULT_LOCKFILE_VERSION,
            save_manifest: false,
        }
    }
}

impl ReifyOptions {
    pub fn from_config(config: &ArboristConfig) -> Self {
        Self {
            concurrency: config.concurrency,
            fetch_timeout: config.fetch_timeout(),
            fetch_retries: config.fetch_retries,
            cache_dir: config.cache_dir.clone(),
            trust_cache: config.trust_cache,
            ignore_scripts: config.ignore_scripts,
            dry_run: config.dry_run,
            package_lock: config.package_lock,
            package_lock_only: config.package_lock_only,
            lockfile_version: config.lockfile_version,
            save_manifest: false,
        }
    }
}

/// 실패한 leaf
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LeafFailure {
    pub location: String,
    /// 스크립트 실패는 `None`
    pub action: Option<DiffAction>,
    pub error: String,
}

/// reify 결과
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReifyReport {
    pub added: Vec<String>,
    pub removed: Vec<String>,
    pub changed: Vec<String>,
    pub failed: Vec<LeafFailure>,
    /// 조상 leaf가 실패해서 건너뛴 위치
    pub skipped: Vec<String>,
    pub scripts: Vec<ScriptCall>,
    pub fetched_bytes: u64,
    pub cache_hits: u64,
    pub dry_run: bool,
}

impl ReifyReport {
    /// 모든 leaf가 적용되었는지 반환합니다.
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty() && self.skipped.is_empty()
    }

    /// 적용된 (dry run이면 계획된) 변경 수
    pub fn total_changes(&self) -> usize {
        self.added.len() + self.removed.len() + self.changed.len()
    }

    fn record(&mut self, action: DiffAction, location: &str) {
        let list = match action {
            DiffAction::Add => &mut self.added,
            DiffAction::Remove => &mut self.removed,
            DiffAction::Change => &mut self.changed,
        };
        list.push(location.to_owned());
    }

    fn is_failed_or_skipped(&self, location: &str) -> bool {
        self.skipped.iter().any(|s| s == location)
            || self.failed.iter().any(|f| f.location == location)
    }
}

// ─── 작업 단위 ──────────────────────────────────────────────────

/// leaf 하나를 적용하는 데 필요한 소유 데이터
#[derive(Debug)]
struct Job {
    location: String,
    action: DiffAction,
    ideal: Option<NodeId>,
    kind: JobKind,
}

#[derive(Debug)]
enum JobKind {
    /// 트리 밖 디렉토리 (워크스페이스, `file:`): 파일시스템 작업 없음
    Noop,
    Remove {
        path: PathBuf,
    },
    Link {
        target: PathBuf,
        link: PathBuf,
    },
    Extract {
        name: String,
        version: String,
        resolved: Option<String>,
        integrity: Option<String>,
        dest: PathBuf,
        /// 기존 엔트리가 링크였음
        clear_first: bool,
    },
}

#[derive(Debug, Default)]
struct Done {
    /// 기록된 integrity가 없어서 새로 계산한 값
    computed_integrity: Option<String>,
    bytes: u64,
    cache_hit: bool,
}

/// 작업 태스크가 공유하는 컨텍스트
struct JobContext<R, F> {
    registry: Arc<R>,
    fs: Arc<F>,
    cache: Option<ArtifactCache>,
    fetch_timeout: Duration,
    fetch_retries: u32,
    trust_cache: bool,
    cancel: CancellationToken,
}

impl<R: MetadataProvider, F: Filesystem> JobContext<R, F> {
    async fn execute(&self, job: &Job) -> Result<Done, ArboristError> {
        if self.cancel.is_cancelled() {
            return Err(ArboristError::Cancelled);
        }
        match &job.kind {
            JobKind::Noop => Ok(Done::default()),
            JobKind::Remove { path } => {
                self.fs.remove_all(path).await?;
                Ok(Done::default())
            }
            JobKind::Link { target, link } => {
                let base = link.parent().unwrap_or(link);
                let relative = relative_path(base, target);
                self.fs.symlink(Path::new(&relative), link).await?;
                Ok(Done::default())
            }
            JobKind::Extract {
                name,
                version,
                resolved,
                integrity: expected,
                dest,
                clear_first,
            } => {
                let (data, cache_hit) = self
                    .artifact(&job.location, name, version, resolved.as_deref(), expected.as_deref())
                    .await?;
                let computed_integrity = match expected {
                    Some(expected) => {
                        integrity::verify(&data, expected).map_err(|mismatch| {
                            ArboristError::IntegrityMismatch {
                                location: job.location.clone(),
                                expected: mismatch.expected,
                                actual: mismatch.actual,
                            }
                        })?;
                        None
                    }
                    None => Some(integrity::sha512(&data)),
                };

                if *clear_first {
                    self.fs.remove_all(dest).await?;
                }
                self.fs.extract_package(data.clone(), dest).await?;

                if !cache_hit
                    && let Some(cache) = &self.cache
                    && let Some(key) = expected.as_ref().or(computed_integrity.as_ref())
                    && let Err(e) = cache.put(key, &data).await
                {
                    warn!(location = %job.location, error = %e, "failed to store artifact in cache");
                }

                Ok(Done {
                    computed_integrity,
                    bytes: data.len() as u64,
                    cache_hit,
                })
            }
        }
    }

    /// 캐시 또는 레지스트리에서 tarball을 가져옵니다.
    async fn artifact(
        &self,
        location: &str,
        name: &str,
        version: &str,
        resolved: Option<&str>,
        expected: Option<&str>,
    ) -> Result<(Bytes, bool), ArboristError> {
        if let (Some(cache), Some(expected)) = (&self.cache, expected)
            && let Some(data) = cache.get(expected).await
        {
            if self.trust_cache || integrity::verify(&data, expected).is_ok() {
                debug!(location, "artifact cache hit");
                return Ok((data, true));
            }
            warn!(location, "cached artifact failed verification, refetching");
        }

        let what = format!("tarball {name}@{version}");
        let data = fetch_with_retry(&what, self.fetch_timeout, self.fetch_retries, || {
            self.registry.tarball(name, version, resolved)
        })
        .await?;
        Ok((data, false))
    }
}

// ─── Reifier ────────────────────────────────────────────────────

/// diff를 파일시스템에 적용하는 실행기
pub struct Reifier<R, F, S> {
    registry: Arc<R>,
    fs: Arc<F>,
    scripts: Arc<S>,
    options: ReifyOptions,
    cancel: CancellationToken,
}

impl<R: MetadataProvider, F: Filesystem, S: ScriptRunner> Reifier<R, F, S> {
    pub fn new(registry: Arc<R>, fs: Arc<F>, scripts: Arc<S>, options: ReifyOptions) -> Self {
        Self {
            registry,
            fs,
            scripts,
            options,
            cancel: CancellationToken::new(),
        }
    }

    /// 외부 토큰으로 취소를 연결합니다.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// 진행 중인 reify를 취소하는 토큰
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// 실제 트리를 ideal tree와 같아지도록 바꿉니다.
    ///
    /// `ideal`은 새로 계산된 integrity를 기록하기 위해 수정될 수 있습니다.
    /// leaf 단위 실패는 보고서에 담기고 `Ok`로 반환됩니다.
    pub async fn reify(&self, actual: &Tree, ideal: &mut Tree) -> Result<ReifyReport, ArboristError> {
        let started = Instant::now();
        let diff = Diff::calculate(actual, ideal);
        let mut report = ReifyReport {
            dry_run: self.options.dry_run,
            ..ReifyReport::default()
        };

        if self.options.dry_run {
            for leaf in diff.leaves() {
                if let Some(action) = leaf.action {
                    report.record(action, &leaf.location);
                }
            }
            info!(
                add = report.added.len(),
                remove = report.removed.len(),
                change = report.changed.len(),
                "reify dry run"
            );
            return Ok(report);
        }

        if !self.options.package_lock_only {
            self.apply(&diff, actual, ideal, &mut report).await?;
            if !self.options.ignore_scripts {
                self.run_scripts(&diff, ideal, &mut report).await;
            }
        }
        self.save(ideal).await?;

        let elapsed = started.elapsed();
        metrics::histogram!(m::REIFY_DURATION_SECONDS).record(elapsed.as_secs_f64());
        metrics::counter!(m::REIFY_FETCHED_BYTES_TOTAL).increment(report.fetched_bytes);
        metrics::counter!(m::REIFY_CACHE_HITS_TOTAL).increment(report.cache_hits);
        info!(
            added = report.added.len(),
            removed = report.removed.len(),
            changed = report.changed.len(),
            failed = report.failed.len(),
            skipped = report.skipped.len(),
            fetched_bytes = report.fetched_bytes,
            elapsed_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
            "reify completed"
        );
        Ok(report)
    }

    async fn apply(
        &self,
        diff: &Diff,
        actual: &Tree,
        ideal: &mut Tree,
        report: &mut ReifyReport,
    ) -> Result<(), ArboristError> {
        let ctx = Arc::new(JobContext {
            registry: Arc::clone(&self.registry),
            fs: Arc::clone(&self.fs),
            cache: self.options.cache_dir.as_ref().map(ArtifactCache::new),
            fetch_timeout: self.options.fetch_timeout,
            fetch_retries: self.options.fetch_retries,
            trust_cache: self.options.trust_cache,
            cancel: self.cancel.clone(),
        });
        let hidden_path = ideal.path().join(HIDDEN_LOCKFILE);
        let mut hidden = Shrinkwrap::hidden_from_tree(actual);
        let mut failed: Vec<String> = Vec::new();

        for wave in waves(diff.leaves()) {
            if self.cancel.is_cancelled() {
                self.write_hidden(&hidden_path, &hidden).await?;
                return Err(ArboristError::Cancelled);
            }

            let mut jobs = Vec::with_capacity(wave.len());
            for leaf in wave {
                if failed.iter().any(|f| is_within(&leaf.location, f)) {
                    warn!(location = %leaf.location, "skipping leaf below a failed location");
                    report.skipped.push(leaf.location.clone());
                    continue;
                }
                if let Some(job) = build_job(leaf, actual, ideal) {
                    jobs.push(job);
                }
            }

            let mut fatal = None;
            for (job, result) in run_wave(&ctx, jobs, self.options.concurrency).await {
                let action_label = job.action.to_string();
                match result {
                    Ok(done) => {
                        match (job.action, job.ideal) {
                            (DiffAction::Remove, _) | (_, None) => hidden.remove(&job.location),
                            (_, Some(id)) => {
                                if let Some(computed) = done.computed_integrity {
                                    let resolved = ideal.node(id).resolved().map(str::to_owned);
                                    ideal.set_resolved(id, resolved, Some(computed));
                                }
                                hidden.set_from_node(ideal, id);
                            }
                        }
                        report.record(job.action, &job.location);
                        report.fetched_bytes += if done.cache_hit { 0 } else { done.bytes };
                        report.cache_hits += u64::from(done.cache_hit);
                        metrics::counter!(
                            m::REIFY_ACTIONS_TOTAL,
                            m::LABEL_ACTION => action_label,
                            m::LABEL_RESULT => "ok"
                        )
                        .increment(1);
                    }
                    Err(e) => {
                        if matches!(e, ArboristError::IntegrityMismatch { .. }) {
                            metrics::counter!(m::REIFY_INTEGRITY_FAILURES_TOTAL).increment(1);
                        }
                        metrics::counter!(
                            m::REIFY_ACTIONS_TOTAL,
                            m::LABEL_ACTION => action_label,
                            m::LABEL_RESULT => "error"
                        )
                        .increment(1);
                        error!(location = %job.location, action = %job.action, error = %e, "reify leaf failed");
                        report.failed.push(LeafFailure {
                            location: job.location.clone(),
                            action: Some(job.action),
                            error: e.to_string(),
                        });
                        failed.push(job.location);
                        if e.is_fatal() && fatal.is_none() {
                            fatal = Some(e);
                        }
                    }
                }
            }

            self.write_hidden(&hidden_path, &hidden).await?;
            if let Some(e) = fatal {
                return Err(e);
            }
        }

        if failed.is_empty() && report.skipped.is_empty() {
            hidden = Shrinkwrap::hidden_from_tree(ideal);
            self.write_hidden(&hidden_path, &hidden).await?;
        }
        Ok(())
    }

    async fn write_hidden(&self, path: &Path, hidden: &Shrinkwrap) -> Result<(), ArboristError> {
        let json = hidden.to_json(DEFAULT_LOCKFILE_VERSION)?;
        self.fs.write_atomic(path, Bytes::from(json)).await
    }

    /// 추가/변경된 노드의 설치 스크립트를 깊은 위치부터 실행합니다. 루트는 마지막.
    async fn run_scripts(&self, diff: &Diff, ideal: &Tree, report: &mut ReifyReport) {
        let mut targets: Vec<(usize, String, NodeId)> = diff
            .leaves()
            .into_iter()
            .filter(|d| matches!(d.action, Some(DiffAction::Add | DiffAction::Change)))
            .filter_map(|d| d.ideal.map(|id| (d.nesting(), d.location.clone(), id)))
            .filter(|(_, location, id)| {
                let node = ideal.node(*id);
                !node.is_link()
                    && node.parent().is_some()
                    && node.has_install_script
                    && !report.is_failed_or_skipped(location)
            })
            .collect();
        targets.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.cmp(&b.1)));

        let root = ideal.root();
        if !diff.is_empty() && ideal.node(root).package().has_install_script() {
            targets.push((0, String::new(), root));
        }

        for (_, location, id) in targets {
            let path = ideal.node_path(id);
            let manifest = self.installed_manifest(&path, ideal, id).await;
            for event in INSTALL_EVENTS {
                let Some(command) = manifest.scripts.get(event) else {
                    continue;
                };
                let call = ScriptCall {
                    location: location.clone(),
                    package: manifest.id(),
                    event: event.to_owned(),
                    command: command.clone(),
                    path: path.clone(),
                };
                match self.scripts.run(&call).await {
                    Ok(()) => report.scripts.push(call),
                    Err(e) => {
                        warn!(location = %location, event, error = %e, "lifecycle script failed");
                        report.failed.push(LeafFailure {
                            location: location.clone(),
                            action: None,
                            error: e.to_string(),
                        });
                        break;
                    }
                }
            }
        }
    }

    /// 디스크에 풀린 `package.json`. 읽을 수 없으면 트리의 값.
    async fn installed_manifest(&self, dir: &Path, ideal: &Tree, id: NodeId) -> Manifest {
        let path = dir.join("package.json");
        match self.fs.read_to_string(&path).await {
            Ok(Some(content)) => Manifest::from_json(&path.display().to_string(), &content)
                .unwrap_or_else(|_| ideal.node(id).package().clone()),
            _ => ideal.node(id).package().clone(),
        }
    }

    async fn save(&self, ideal: &Tree) -> Result<(), ArboristError> {
        if self.options.package_lock || self.options.package_lock_only {
            let lock = Shrinkwrap::from_tree(ideal, self.options.lockfile_version);
            let shrinkwrap = ideal.path().join(crate::shrinkwrap::SHRINKWRAP_NAME);
            let path = if self.fs.exists(&shrinkwrap).await {
                shrinkwrap
            } else {
                ideal.path().join(crate::shrinkwrap::LOCKFILE_NAME)
            };
            let json = lock.to_json(self.options.lockfile_version)?;
            self.fs.write_atomic(&path, Bytes::from(json)).await?;
            debug!(path = %path.display(), "lockfile saved");
        }
        if self.options.save_manifest {
            let content = ideal.node(ideal.root()).package().to_json_pretty()?;
            self.fs
                .write_atomic(&ideal.path().join("package.json"), Bytes::from(content))
                .await?;
        }
        Ok(())
    }
}

/// 연속된 같은 종류, 같은 깊이의 leaf를 하나의 wave로 묶습니다.
fn waves(leaves: Vec<&Diff>) -> Vec<Vec<&Diff>> {
    let mut out: Vec<Vec<&Diff>> = Vec::new();
    for leaf in leaves {
        let is_remove = leaf.action == Some(DiffAction::Remove);
        match out.last_mut() {
            Some(wave)
                if wave[0].nesting() == leaf.nesting()
                    && (wave[0].action == Some(DiffAction::Remove)) == is_remove =>
            {
                wave.push(leaf);
            }
            _ => out.push(vec![leaf]),
        }
    }
    out
}

/// `location`이 `ancestor`와 같거나 그 아래인지 반환합니다.
fn is_within(location: &str, ancestor: &str) -> bool {
    location == ancestor
        || location
            .strip_prefix(ancestor)
            .is_some_and(|rest| rest.starts_with('/'))
}

fn build_job(leaf: &Diff, actual: &Tree, ideal: &Tree) -> Option<Job> {
    let action = leaf.action?;
    let kind = match action {
        DiffAction::Remove => {
            let id = leaf.actual?;
            // 트리 밖 디렉토리는 지우지 않음
            if actual.node(id).parent().is_none() && !actual.node(id).is_link() {
                JobKind::Noop
            } else {
                JobKind::Remove {
                    path: actual.node_path(id),
                }
            }
        }
        DiffAction::Add | DiffAction::Change => {
            let id = leaf.ideal?;
            let node = ideal.node(id);
            if node.is_link() {
                JobKind::Link {
                    target: ideal.real_path(id),
                    link: ideal.node_path(id),
                }
            } else if node.parent().is_none() {
                JobKind::Noop
            } else {
                JobKind::Extract {
                    name: node.package_name().to_owned(),
                    version: node.version().to_owned(),
                    resolved: node.resolved().map(str::to_owned),
                    integrity: node.integrity().map(str::to_owned),
                    dest: ideal.node_path(id),
                    clear_first: leaf.actual.is_some_and(|a| actual.node(a).is_link()),
                }
            }
        }
    };
    Some(Job {
        location: leaf.location.clone(),
        action,
        ideal: leaf.ideal,
        kind,
    })
}

/// wave 하나의 작업을 동시에 실행합니다. 결과는 위치 순으로 정렬됩니다.
async fn run_wave<R: MetadataProvider, F: Filesystem>(
    ctx: &Arc<JobContext<R, F>>,
    jobs: Vec<Job>,
    concurrency: usize,
) -> Vec<(Job, Result<Done, ArboristError>)> {
    let semaphore = Arc::new(Semaphore::new(concurrency.max(1)));
    let mut set = JoinSet::new();
    for job in jobs {
        let ctx = Arc::clone(ctx);
        let semaphore = Arc::clone(&semaphore);
        set.spawn(async move {
            let _permit = semaphore.acquire_owned().await;
            let result = ctx.execute(&job).await;
            (job, result)
        });
    }

    let mut out = Vec::new();
    while let Some(joined) = set.join_next().await {
        match joined {
            Ok(result) => out.push(result),
            Err(e) => error!(error = %e, "reify task panicked"),
        }
    }
    out.sort_by(|(a, _), (b, _)| a.location.cmp(&b.location));
    out
}
