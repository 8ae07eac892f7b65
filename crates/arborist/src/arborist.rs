//! 프로젝트 단위 작업 조합
//!
//! [`Arborist`]는 로더, ideal tree 구성, reify, 감사를 한 프로젝트 경로에
//! 묶어 `install`/`uninstall`/`update`/`dedupe`/`audit` 작업으로 제공합니다.
//!
//! # 사용 예시
//!
//! ```ignore
//! let arborist = ArboristBuilder::new(config).build()?;
//! let outcome = arborist.install(vec![AddRequest::parse("left-pad@^1", DepType::Prod)]).await?;
//! if !outcome.is_complete() {
//!     // 해결하지 못한 의존성 또는 실패한 leaf
//! }
//! ```

use std::path::Path;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::actual::{ActualLoader, discover_workspaces};
use crate::audit::{AdvisoryDb, AuditFix, AuditReport, Auditor};
use crate::config::ArboristConfig;
use crate::error::ArboristError;
use crate::fs::{Filesystem, LocalFilesystem};
use crate::graph::{Problem, Tree};
use crate::ideal::{AddRequest, IdealOptions, IdealTreeBuilder, IdealTreeOutcome, UpdateRequest};
use crate::manifest::Manifest;
use crate::registry::{DirRegistry, MetadataProvider};
use crate::reify::{LogScriptRunner, ReifyOptions, ReifyReport, Reifier, ScriptRunner};
use crate::shrinkwrap::Shrinkwrap;
use crate::virtual_tree::load_virtual;

/// install 계열 작업 결과
#[derive(Debug)]
pub struct InstallOutcome {
    /// 반영된 ideal tree
    pub tree: Tree,
    /// 해결하지 못한 문제
    pub problems: Vec<Problem>,
    pub report: ReifyReport,
}

impl InstallOutcome {
    /// 모든 의존성이 해결되고 모든 leaf가 적용되었는지 반환합니다.
    pub fn is_complete(&self) -> bool {
        self.problems.is_empty() && self.report.is_complete()
    }
}

/// audit 작업 결과
#[derive(Debug)]
pub struct AuditOutcome {
    pub report: AuditReport,
    /// 수정 요청 (fix 모드에서만)
    pub plan: Option<AuditFix>,
    /// 수정 결과
    pub fix: Option<InstallOutcome>,
    /// 수정 후 다시 감사한 결과
    pub remaining: Option<AuditReport>,
}

/// 프로젝트 하나의 의존성 관리자
pub struct Arborist<R, F, S> {
    config: ArboristConfig,
    registry: Arc<R>,
    fs: Arc<F>,
    scripts: Arc<S>,
    cancel: CancellationToken,
}

impl<R: MetadataProvider, F: Filesystem, S: ScriptRunner> Arborist<R, F, S> {
    pub fn config(&self) -> &ArboristConfig {
        &self.config
    }

    pub fn path(&self) -> &Path {
        &self.config.path
    }

    /// 진행 중인 reify를 취소하는 토큰
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// 루트 `package.json`. 없으면 디렉토리 이름만 가진 매니페스트.
    pub async fn root_manifest(&self) -> Result<Manifest, ArboristError> {
        let path = self.path().join("package.json");
        match self.fs.read_to_string(&path).await? {
            Some(content) => Manifest::from_json(&path.display().to_string(), &content),
            None => Ok(Manifest {
                name: self
                    .path()
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default(),
                ..Manifest::default()
            }),
        }
    }

    /// 디스크의 `node_modules`에서 트리를 읽습니다.
    pub async fn load_actual(&self) -> Result<Tree, ArboristError> {
        ActualLoader::new(Arc::clone(&self.fs))
            .legacy_peer_deps(self.config.legacy_peer_deps)
            .workspaces_enabled(self.config.workspaces_enabled)
            .load(self.path())
            .await
    }

    /// lockfile에서 트리를 읽습니다. lockfile이 없으면 `None`.
    ///
    /// lockfile에 없는 새 워크스페이스는 추가됩니다.
    pub async fn load_virtual(&self) -> Result<Option<Tree>, ArboristError> {
        let Some(lock) = Shrinkwrap::load_project(self.path()).await? else {
            return Ok(None);
        };
        let root = self.root_manifest().await?;
        let patterns = root.workspaces.clone();
        let mut tree = load_virtual(self.path(), root, &lock, self.config.legacy_peer_deps)?;
        if self.config.workspaces_enabled {
            for (location, manifest) in discover_workspaces(&*self.fs, self.path(), &patterns).await? {
                if tree.get(&location).is_none() {
                    debug!(location = %location, "adding workspace missing from lockfile");
                    tree.add_workspace(&location, manifest);
                }
            }
        }
        Ok(Some(tree))
    }

    /// ideal tree를 계산합니다.
    ///
    /// lockfile이 있으면 그 트리에서, 없으면 설치된 트리에서 시작합니다.
    pub async fn build_ideal(&self, options: IdealOptions) -> Result<IdealTreeOutcome, ArboristError> {
        let start = match self.load_virtual().await? {
            Some(tree) => tree,
            None => self.load_actual().await?,
        };
        IdealTreeBuilder::new(Arc::clone(&self.registry), options)
            .build(start)
            .await
    }

    /// ideal tree를 디스크에 반영합니다.
    pub async fn reify(&self, ideal: &mut Tree, save_manifest: bool) -> Result<ReifyReport, ArboristError> {
        let actual = self.load_actual().await?;
        let options = ReifyOptions {
            save_manifest,
            ..ReifyOptions::from_config(&self.config)
        };
        Reifier::new(
            Arc::clone(&self.registry),
            Arc::clone(&self.fs),
            Arc::clone(&self.scripts),
            options,
        )
        .with_cancellation(self.cancel.clone())
        .reify(&actual, ideal)
        .await
    }

    /// ideal tree를 계산하고 반영합니다.
    pub async fn install_with(&self, options: IdealOptions) -> Result<InstallOutcome, ArboristError> {
        let save_manifest = !options.add.is_empty() || !options.rm.is_empty();
        let IdealTreeOutcome { mut tree, problems } = self.build_ideal(options).await?;
        let report = self.reify(&mut tree, save_manifest).await?;
        info!(
            path = %self.path().display(),
            problems = problems.len(),
            changes = report.total_changes(),
            failed = report.failed.len(),
            "install finished"
        );
        Ok(InstallOutcome {
            tree,
            problems,
            report,
        })
    }

    /// 의존성을 설치합니다. 요청이 있으면 `package.json`에 저장합니다.
    pub async fn install(&self, add: Vec<AddRequest>) -> Result<InstallOutcome, ArboristError> {
        self.install_with(IdealOptions {
            add,
            ..IdealOptions::from_config(&self.config)
        })
        .await
    }

    pub async fn uninstall(&self, names: Vec<String>) -> Result<InstallOutcome, ArboristError> {
        self.install_with(IdealOptions {
            rm: names,
            ..IdealOptions::from_config(&self.config)
        })
        .await
    }

    /// 잠긴 버전을 무시하고 선언 범위 안에서 다시 해석합니다.
    pub async fn update(&self, update: UpdateRequest) -> Result<InstallOutcome, ArboristError> {
        self.install_with(IdealOptions {
            update,
            ..IdealOptions::from_config(&self.config)
        })
        .await
    }

    /// 중복 설치를 줄입니다.
    pub async fn dedupe(&self) -> Result<InstallOutcome, ArboristError> {
        self.install_with(IdealOptions {
            prefer_dedupe: true,
            ..IdealOptions::from_config(&self.config)
        })
        .await
    }

    /// 트리를 감사하고, `fix`면 수정 가능한 취약점을 고칩니다.
    pub async fn audit(&self, fix: bool) -> Result<AuditOutcome, ArboristError> {
        let db = Arc::new(AdvisoryDb::load(&self.config.advisory_db_path).await?);
        let auditor = Auditor::new(Arc::clone(&self.registry), Arc::clone(&db))
            .min_severity(self.config.min_severity)
            .fetch_policy(self.config.fetch_timeout(), self.config.fetch_retries);

        let tree = match self.load_virtual().await? {
            Some(tree) => tree,
            None => self.load_actual().await?,
        };
        let report = auditor.audit(&tree).await?;
        if !fix {
            return Ok(AuditOutcome {
                report,
                plan: None,
                fix: None,
                remaining: None,
            });
        }

        let plan = report.fix_plan(&db);
        if plan.is_empty() {
            info!("no fixable vulnerabilities");
            return Ok(AuditOutcome {
                report,
                plan: Some(plan),
                fix: None,
                remaining: None,
            });
        }

        let outcome = self
            .install_with(IdealOptions {
                update: UpdateRequest::Names(plan.update.clone()),
                avoid: plan.avoid.clone(),
                ..IdealOptions::from_config(&self.config)
            })
            .await?;
        let remaining = auditor.audit(&outcome.tree).await?;
        info!(
            fixed = report.vulnerabilities.len().saturating_sub(remaining.vulnerabilities.len()),
            remaining = remaining.vulnerabilities.len(),
            "audit fix finished"
        );
        Ok(AuditOutcome {
            report,
            plan: Some(plan),
            fix: Some(outcome),
            remaining: Some(remaining),
        })
    }
}

/// [`Arborist`] 빌더
///
/// 기본값은 설정의 `registry_dir`을 쓰는 [`DirRegistry`], 로컬
/// 파일시스템, 로그만 남기는 스크립트 실행기입니다.
pub struct ArboristBuilder<R, F, S> {
    config: ArboristConfig,
    registry: Arc<R>,
    fs: Arc<F>,
    scripts: Arc<S>,
}

impl ArboristBuilder<DirRegistry, LocalFilesystem, LogScriptRunner> {
    pub fn new(config: ArboristConfig) -> Self {
        let registry = Arc::new(DirRegistry::new(config.registry_dir.clone()));
        Self {
            config,
            registry,
            fs: Arc::new(LocalFilesystem),
            scripts: Arc::new(LogScriptRunner),
        }
    }
}

impl<R, F, S> ArboristBuilder<R, F, S> {
    /// 메타데이터 제공자를 바꿉니다.
    pub fn registry<R2: MetadataProvider>(self, registry: Arc<R2>) -> ArboristBuilder<R2, F, S> {
        ArboristBuilder {
            config: self.config,
            registry,
            fs: self.fs,
            scripts: self.scripts,
        }
    }

    pub fn filesystem<F2: Filesystem>(self, fs: Arc<F2>) -> ArboristBuilder<R, F2, S> {
        ArboristBuilder {
            config: self.config,
            registry: self.registry,
            fs,
            scripts: self.scripts,
        }
    }

    pub fn script_runner<S2: ScriptRunner>(self, scripts: Arc<S2>) -> ArboristBuilder<R, F, S2> {
        ArboristBuilder {
            config: self.config,
            registry: self.registry,
            fs: self.fs,
            scripts,
        }
    }

    /// 설정을 검증하고 [`Arborist`]를 만듭니다.
    pub fn build(self) -> Result<Arborist<R, F, S>, ArboristError> {
        self.config.validate()?;
        Ok(Arborist {
            config: self.config,
            registry: self.registry,
            fs: self.fs,
            scripts: self.scripts,
            cancel: CancellationToken::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ArboristConfigBuilder;
    use crate::registry::MemoryRegistry;
    use grove_core::types::{DepType, Severity};

    fn write_root(dir: &Path, json: &str) {
        std::fs::write(dir.join("package.json"), json).unwrap();
    }

    fn arborist(
        dir: &Path,
        registry: &Arc<MemoryRegistry>,
    ) -> Arborist<MemoryRegistry, LocalFilesystem, LogScriptRunner> {
        let config = ArboristConfigBuilder::new()
            .path(dir)
            .advisory_db_path(dir.join("advisories.json"))
            .min_severity(Severity::Info)
            .build()
            .unwrap();
        ArboristBuilder::new(config)
            .registry(Arc::clone(registry))
            .build()
            .unwrap()
    }

    fn registry() -> Arc<MemoryRegistry> {
        let r = MemoryRegistry::new();
        r.publish_simple("a", "1.0.0", &[("b", "^1.0.0")]).unwrap();
        r.publish_simple("b", "1.0.0", &[]).unwrap();
        r.publish_simple("left-pad", "1.3.0", &[]).unwrap();
        Arc::new(r)
    }

    #[tokio::test]
    async fn install_from_package_json() {
        let dir = tempfile::tempdir().unwrap();
        write_root(dir.path(), r#"{"name":"app","version":"1.0.0","dependencies":{"a":"^1.0.0"}}"#);
        let registry = registry();
        let arb = arborist(dir.path(), &registry);

        let outcome = arb.install(Vec::new()).await.unwrap();
        assert!(outcome.is_complete());
        assert!(dir.path().join("node_modules/a/package.json").exists());
        assert!(dir.path().join("node_modules/b/package.json").exists());

        // 두 번째 실행은 변경 없음
        let again = arb.install(Vec::new()).await.unwrap();
        assert_eq!(again.report.total_changes(), 0);
    }

    #[tokio::test]
    async fn install_and_uninstall_save_manifest() {
        let dir = tempfile::tempdir().unwrap();
        write_root(dir.path(), r#"{"name":"app","version":"1.0.0"}"#);
        let registry = registry();
        let arb = arborist(dir.path(), &registry);

        arb.install(vec![AddRequest::parse("left-pad", DepType::Prod)])
            .await
            .unwrap();
        let saved = arb.root_manifest().await.unwrap();
        assert_eq!(saved.dependencies.get("left-pad").map(String::as_str), Some("^1.3.0"));
        assert!(dir.path().join("node_modules/left-pad").exists());

        arb.uninstall(vec!["left-pad".to_owned()]).await.unwrap();
        let saved = arb.root_manifest().await.unwrap();
        assert!(saved.dependencies.is_empty());
        assert!(!dir.path().join("node_modules/left-pad").exists());
        let lock = Shrinkwrap::load_project(dir.path()).await.unwrap().unwrap();
        assert!(lock.get("node_modules/left-pad").is_none());
    }

    #[tokio::test]
    async fn update_picks_newer_version_in_range() {
        let dir = tempfile::tempdir().unwrap();
        write_root(dir.path(), r#"{"name":"app","version":"1.0.0","dependencies":{"b":"^1.0.0"}}"#);
        let registry = registry();
        let arb = arborist(dir.path(), &registry);
        arb.install(Vec::new()).await.unwrap();

        registry.publish_simple("b", "1.1.0", &[]).unwrap();
        let locked = arb.install(Vec::new()).await.unwrap();
        assert_eq!(locked.report.total_changes(), 0);

        let updated = arb.update(UpdateRequest::All).await.unwrap();
        assert_eq!(updated.report.changed, vec!["node_modules/b"]);
        let b = updated.tree.get("node_modules/b").unwrap();
        assert_eq!(updated.tree.node(b).version(), "1.1.0");
    }

    #[tokio::test]
    async fn audit_fix_upgrades_vulnerable_package() {
        let dir = tempfile::tempdir().unwrap();
        write_root(dir.path(), r#"{"name":"app","version":"1.0.0","dependencies":{"b":"^1.0.0"}}"#);
        let registry = registry();
        let arb = arborist(dir.path(), &registry);
        arb.install(Vec::new()).await.unwrap();

        registry.publish_simple("b", "1.0.1", &[]).unwrap();
        std::fs::write(
            dir.path().join("advisories.json"),
            r#"{"b":[{"id":42,"title":"bad","severity":"high","vulnerable_versions":"<1.0.1"}]}"#,
        )
        .unwrap();

        let report = arb.audit(false).await.unwrap();
        assert!(report.report.has_vulnerabilities());
        assert!(report.fix.is_none());

        let fixed = arb.audit(true).await.unwrap();
        assert_eq!(fixed.plan.unwrap().update, vec!["b".to_owned()]);
        let remaining = fixed.remaining.unwrap();
        assert!(!remaining.has_vulnerabilities());
        let pkg = std::fs::read_to_string(dir.path().join("node_modules/b/package.json")).unwrap();
        assert!(pkg.contains("1.0.1"));
    }

    #[tokio::test]
    async fn missing_advisory_db_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        write_root(dir.path(), r#"{"name":"app","version":"1.0.0"}"#);
        let arb = arborist(dir.path(), &registry());
        let err = arb.audit(false).await.unwrap_err();
        assert!(matches!(err, ArboristError::AdvisoryDb { .. }));
    }

    #[tokio::test]
    async fn build_rejects_invalid_config() {
        let config = ArboristConfig {
            lockfile_version: 9,
            ..ArboristConfig::default()
        };
        assert!(ArboristBuilder::new(config).build().is_err());
    }
}
