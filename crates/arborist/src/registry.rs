//! 패키지 메타데이터/아티팩트 제공자
//!
//! 해석과 반영 로직은 [`MetadataProvider`] 트레이트만 사용하며,
//! 레지스트리 프로토콜은 알지 못합니다.
//!
//! - [`DirRegistry`]: 오프라인 레지스트리 디렉토리
//!   (`<name>.json` packument, `<name>/-/<base>-<version>.tgz` tarball)
//! - [`MemoryRegistry`]: 메모리 레지스트리 (테스트, 벤치마크, 미러 생성)
//!
//! 외부 호출은 [`fetch_with_retry`]로 감싸 타임아웃과 재시도 횟수를 제한합니다.

use std::collections::BTreeMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use bytes::Bytes;
use flate2::Compression;
use flate2::write::GzEncoder;
use tracing::{debug, warn};

use crate::error::ArboristError;
use crate::integrity;
use crate::manifest::{Dist, Manifest, Packument};
use crate::spec::parse_version;

/// resolved URL의 기본 접두사
pub const REGISTRY_URL: &str = "https://registry.npmjs.org";

/// 메타데이터/아티팩트 제공자
///
/// `Send + Sync + 'static`이므로 `Arc`로 감싸 여러 태스크에서 공유합니다.
pub trait MetadataProvider: Send + Sync + 'static {
    /// 패키지 이름의 전체 버전 문서를 가져옵니다.
    ///
    /// 존재하지 않는 패키지는 `ArboristError::Fetch`입니다.
    fn packument(
        &self,
        name: &str,
    ) -> impl Future<Output = Result<Packument, ArboristError>> + Send;

    /// 패키지 tarball 바이트를 가져옵니다.
    ///
    /// `resolved`가 있으면 그 위치를 우선합니다.
    fn tarball(
        &self,
        name: &str,
        version: &str,
        resolved: Option<&str>,
    ) -> impl Future<Output = Result<Bytes, ArboristError>> + Send;
}

/// 레지스트리 tarball URL
pub fn tarball_url(name: &str, version: &str) -> String {
    let base = name.rsplit('/').next().unwrap_or(name);
    format!("{REGISTRY_URL}/{name}/-/{base}-{version}.tgz")
}

/// 스코프 이름을 파일 이름으로 쓸 수 있게 바꿉니다 (`@s/n` → `@s%2fn`).
fn escape_name(name: &str) -> String {
    name.replace('/', "%2f")
}

/// 타임아웃과 선형 백오프 재시도로 외부 호출을 감쌉니다.
///
/// 재시도 대상은 [`ArboristError::is_retryable`]인 에러뿐이며,
/// 시도는 최대 `retries + 1`회입니다.
pub async fn fetch_with_retry<T, F, Fut>(
    what: &str,
    timeout: Duration,
    retries: u32,
    mut op: F,
) -> Result<T, ArboristError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ArboristError>>,
{
    let backoff_base = Duration::from_millis(100);
    let mut attempt = 0;
    loop {
        let result = match tokio::time::timeout(timeout, op()).await {
            Ok(r) => r,
            Err(_elapsed) => Err(ArboristError::Timeout {
                what: what.to_owned(),
                secs: timeout.as_secs(),
            }),
        };
        match result {
            Err(e) if e.is_retryable() && attempt < retries => {
                attempt += 1;
                let backoff = backoff_base * attempt;
                warn!(
                    what,
                    attempt,
                    backoff_ms = u64::try_from(backoff.as_millis()).unwrap_or(u64::MAX),
                    error = %e,
                    "retrying fetch"
                );
                tokio::time::sleep(backoff).await;
            }
            other => return other,
        }
    }
}

/// 매니페스트와 파일로 `package/` 접두사를 가진 tar.gz를 만듭니다.
pub fn pack(manifest: &Manifest, files: &[(&str, &[u8])]) -> Result<Bytes, ArboristError> {
    let pack_err = |e: std::io::Error| ArboristError::Io {
        path: manifest.id(),
        source: e,
    };
    let mut package = manifest.clone();
    package.dist = None;
    let package_json = package.to_json_pretty()?;

    let encoder = GzEncoder::new(Vec::new(), Compression::default());
    let mut builder = tar::Builder::new(encoder);
    let mut entries: Vec<(&str, &[u8])> = vec![("package.json", package_json.as_bytes())];
    entries.extend(files.iter().copied());
    for (path, data) in entries {
        let mut header = tar::Header::new_gnu();
        header.set_size(data.len() as u64);
        header.set_mode(0o644);
        header.set_entry_type(tar::EntryType::Regular);
        header.set_cksum();
        builder
            .append_data(&mut header, format!("package/{path}"), data)
            .map_err(pack_err)?;
    }
    let encoder = builder.into_inner().map_err(pack_err)?;
    let data = encoder.finish().map_err(pack_err)?;
    Ok(Bytes::from(data))
}

// ─── 메모리 레지스트리 ──────────────────────────────────────────

#[derive(Debug, Default)]
struct MemoryState {
    packuments: BTreeMap<String, Packument>,
    tarballs: BTreeMap<String, Bytes>,
}

/// 메모리 레지스트리
#[derive(Debug, Default)]
pub struct MemoryRegistry {
    state: Mutex<MemoryState>,
    packument_fetches: AtomicUsize,
    tarball_fetches: AtomicUsize,
    latency: Option<Duration>,
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 모든 응답에 지연을 추가합니다 (타임아웃 테스트용).
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    fn state(&self) -> std::sync::MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// 패키지 버전을 게시합니다.
    ///
    /// tarball을 만들고 `dist.tarball`/`dist.integrity`를 채운 뒤,
    /// `latest` 태그를 프리릴리스가 아닌 최고 버전으로 갱신합니다.
    /// 게시된 매니페스트를 반환합니다.
    pub fn publish(
        &self,
        manifest: Manifest,
        files: &[(&str, &[u8])],
    ) -> Result<Manifest, ArboristError> {
        if parse_version(&manifest.version).is_none() {
            return Err(ArboristError::ManifestParse {
                path: manifest.id(),
                reason: "invalid version".to_owned(),
            });
        }
        let data = pack(&manifest, files)?;
        let url = tarball_url(&manifest.name, &manifest.version);
        let mut published = manifest;
        published.dist = Some(Dist {
            tarball: Some(url.clone()),
            integrity: Some(integrity::sha512(&data)),
            shasum: None,
        });

        let mut state = self.state();
        state.tarballs.insert(url, data);
        let packument = state
            .packuments
            .entry(published.name.clone())
            .or_insert_with(|| Packument {
                name: published.name.clone(),
                ..Packument::default()
            });
        packument
            .versions
            .insert(published.version.clone(), published.clone());
        if let Some(latest) = packument
            .versions
            .keys()
            .filter_map(|v| parse_version(v))
            .filter(|v| v.pre.is_empty())
            .max()
        {
            packument
                .dist_tags
                .insert("latest".to_owned(), latest.to_string());
        }
        Ok(published)
    }

    /// 간단한 매니페스트로 게시합니다.
    pub fn publish_simple(
        &self,
        name: &str,
        version: &str,
        dependencies: &[(&str, &str)],
    ) -> Result<Manifest, ArboristError> {
        let manifest = Manifest {
            name: name.to_owned(),
            version: version.to_owned(),
            dependencies: dependencies
                .iter()
                .map(|(n, s)| ((*n).to_owned(), (*s).to_owned()))
                .collect(),
            ..Manifest::default()
        };
        let index = format!("module.exports = '{name}@{version}'\n");
        self.publish(manifest, &[("index.js", index.as_bytes())])
    }

    /// dist-tag를 설정합니다.
    pub fn tag(&self, name: &str, tag: &str, version: &str) {
        if let Some(p) = self.state().packuments.get_mut(name) {
            p.dist_tags.insert(tag.to_owned(), version.to_owned());
        }
    }

    /// 버전을 deprecated로 표시합니다.
    pub fn deprecate(&self, name: &str, version: &str, message: &str) {
        if let Some(m) = self
            .state()
            .packuments
            .get_mut(name)
            .and_then(|p| p.versions.get_mut(version))
        {
            m.deprecated = Some(message.to_owned());
        }
    }

    /// 저장된 tarball을 임의 바이트로 바꿉니다 (무결성 실패 재현용).
    pub fn corrupt_tarball(&self, name: &str, version: &str) {
        let url = tarball_url(name, version);
        self.state()
            .tarballs
            .insert(url, Bytes::from_static(b"corrupted"));
    }

    /// tarball을 제거합니다 (조회 실패 재현용).
    pub fn remove_tarball(&self, name: &str, version: &str) {
        let url = tarball_url(name, version);
        self.state().tarballs.remove(&url);
    }

    pub fn packument_fetches(&self) -> usize {
        self.packument_fetches.load(Ordering::SeqCst)
    }

    pub fn tarball_fetches(&self) -> usize {
        self.tarball_fetches.load(Ordering::SeqCst)
    }

    /// 오프라인 레지스트리 디렉토리로 내보냅니다.
    pub async fn write_to_dir(&self, dir: &Path) -> Result<(), ArboristError> {
        let (packuments, tarballs) = {
            let state = self.state();
            (state.packuments.clone(), state.tarballs.clone())
        };
        for (name, packument) in &packuments {
            let path = dir.join(format!("{}.json", escape_name(name)));
            let json = serde_json::to_string_pretty(packument).map_err(|e| {
                ArboristError::ManifestParse {
                    path: path.display().to_string(),
                    reason: e.to_string(),
                }
            })?;
            crate::shrinkwrap::write_atomic(&path, json.as_bytes()).await?;
        }
        for (url, data) in &tarballs {
            if let Some(path) = DirRegistry::url_to_path(dir, url) {
                crate::shrinkwrap::write_atomic(&path, data).await?;
            }
        }
        Ok(())
    }
}

impl MetadataProvider for MemoryRegistry {
    async fn packument(&self, name: &str) -> Result<Packument, ArboristError> {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        self.packument_fetches.fetch_add(1, Ordering::SeqCst);
        self.state()
            .packuments
            .get(name)
            .cloned()
            .ok_or_else(|| ArboristError::Fetch {
                name: name.to_owned(),
                reason: "package not found".to_owned(),
            })
    }

    async fn tarball(
        &self,
        name: &str,
        version: &str,
        resolved: Option<&str>,
    ) -> Result<Bytes, ArboristError> {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        self.tarball_fetches.fetch_add(1, Ordering::SeqCst);
        let url = resolved
            .map(str::to_owned)
            .unwrap_or_else(|| tarball_url(name, version));
        self.state()
            .tarballs
            .get(&url)
            .cloned()
            .ok_or_else(|| ArboristError::Fetch {
                name: format!("{name}@{version}"),
                reason: format!("tarball not found: {url}"),
            })
    }
}

// ─── 디렉토리 레지스트리 ────────────────────────────────────────

/// 오프라인 레지스트리 디렉토리
#[derive(Debug, Clone)]
pub struct DirRegistry {
    dir: PathBuf,
}

impl DirRegistry {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// 레지스트리 URL을 디렉토리 안의 경로로 바꿉니다.
    ///
    /// 접두사가 다르거나 `..` 구간이 있으면 None.
    fn url_to_path(dir: &Path, url: &str) -> Option<PathBuf> {
        let rest = url.strip_prefix(REGISTRY_URL)?.trim_start_matches('/');
        if rest.split('/').any(|seg| seg.is_empty() || seg == "..") {
            return None;
        }
        let (name, file) = rest.split_once("/-/")?;
        Some(dir.join(escape_name(name)).join("-").join(file))
    }
}

impl MetadataProvider for DirRegistry {
    async fn packument(&self, name: &str) -> Result<Packument, ArboristError> {
        let path = self.dir.join(format!("{}.json", escape_name(name)));
        let content = match tokio::fs::read_to_string(&path).await {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(ArboristError::Fetch {
                    name: name.to_owned(),
                    reason: "package not found".to_owned(),
                });
            }
            Err(e) => return Err(ArboristError::io(&path, e)),
        };
        debug!(name, path = %path.display(), "packument loaded");
        Packument::from_json(&path.display().to_string(), &content)
    }

    async fn tarball(
        &self,
        name: &str,
        version: &str,
        resolved: Option<&str>,
    ) -> Result<Bytes, ArboristError> {
        let url = resolved
            .filter(|r| r.starts_with(REGISTRY_URL))
            .map(str::to_owned)
            .unwrap_or_else(|| tarball_url(name, version));
        let path = Self::url_to_path(&self.dir, &url).ok_or_else(|| ArboristError::Fetch {
            name: format!("{name}@{version}"),
            reason: format!("unsupported tarball location: {url}"),
        })?;
        match tokio::fs::read(&path).await {
            Ok(data) => Ok(Bytes::from(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(ArboristError::Fetch {
                name: format!("{name}@{version}"),
                reason: format!("tarball not found: {}", path.display()),
            }),
            Err(e) => Err(ArboristError::io(&path, e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::AtomicU32;

    use super::*;

    #[tokio::test]
    async fn publish_sets_dist_and_latest() {
        let reg = MemoryRegistry::new();
        reg.publish_simple("dep", "1.0.0", &[]).unwrap();
        reg.publish_simple("dep", "2.0.0-beta.1", &[]).unwrap();
        let m = reg.publish_simple("dep", "1.2.0", &[]).unwrap();

        let dist = m.dist.clone().unwrap();
        assert_eq!(
            dist.tarball.as_deref(),
            Some("https://registry.npmjs.org/dep/-/dep-1.2.0.tgz")
        );
        let p = reg.packument("dep").await.unwrap();
        assert_eq!(p.dist_tags.get("latest").map(String::as_str), Some("1.2.0"));
        assert_eq!(p.versions.len(), 3);

        let data = reg.tarball("dep", "1.2.0", None).await.unwrap();
        assert!(integrity::verify(&data, dist.integrity.as_deref().unwrap()).is_ok());
        assert_eq!(reg.tarball_fetches(), 1);
    }

    #[tokio::test]
    async fn missing_package_is_fetch_error() {
        let reg = MemoryRegistry::new();
        let err = reg.packument("nope").await.unwrap_err();
        assert!(err.is_retryable());
    }

    #[test]
    fn scoped_tarball_url() {
        assert_eq!(
            tarball_url("@scope/pkg", "1.0.0"),
            "https://registry.npmjs.org/@scope/pkg/-/pkg-1.0.0.tgz"
        );
    }

    #[tokio::test]
    async fn dir_registry_reads_exported_files() {
        let reg = MemoryRegistry::new();
        reg.publish_simple("@scope/pkg", "1.0.0", &[("dep", "^1")])
            .unwrap();
        let dir = tempfile::tempdir().unwrap();
        reg.write_to_dir(dir.path()).await.unwrap();

        let disk = DirRegistry::new(dir.path());
        let p = disk.packument("@scope/pkg").await.unwrap();
        let m = p.versions.get("1.0.0").unwrap();
        assert_eq!(m.dependencies.get("dep").map(String::as_str), Some("^1"));
        let data = disk
            .tarball("@scope/pkg", "1.0.0", m.dist.as_ref().and_then(|d| d.tarball.as_deref()))
            .await
            .unwrap();
        let expected = m.dist.as_ref().and_then(|d| d.integrity.clone()).unwrap();
        assert!(integrity::verify(&data, &expected).is_ok());
    }

    #[test]
    fn url_to_path_rejects_traversal() {
        let dir = Path::new("/reg");
        assert!(DirRegistry::url_to_path(dir, "https://registry.npmjs.org/../x/-/x.tgz").is_none());
        assert!(DirRegistry::url_to_path(dir, "https://evil.example/x/-/x-1.0.0.tgz").is_none());
        assert_eq!(
            DirRegistry::url_to_path(dir, "https://registry.npmjs.org/x/-/x-1.0.0.tgz"),
            Some(PathBuf::from("/reg/x/-/x-1.0.0.tgz"))
        );
    }

    #[tokio::test]
    async fn retry_stops_after_limit() {
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&attempts);
        let result: Result<(), _> = fetch_with_retry("x", Duration::from_secs(1), 2, || {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(ArboristError::Fetch {
                    name: "x".to_owned(),
                    reason: "down".to_owned(),
                })
            }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn non_retryable_errors_return_immediately() {
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&attempts);
        let result: Result<(), _> = fetch_with_retry("x", Duration::from_secs(1), 5, || {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(ArboristError::Cancelled)
            }
        })
        .await;
        assert!(matches!(result, Err(ArboristError::Cancelled)));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_fetch_times_out() {
        let reg = MemoryRegistry::new().with_latency(Duration::from_secs(30));
        reg.publish_simple("dep", "1.0.0", &[]).unwrap();
        let err = fetch_with_retry("dep", Duration::from_secs(1), 0, || reg.packument("dep"))
            .await
            .unwrap_err();
        assert!(matches!(err, ArboristError::Timeout { secs: 1, .. }));
    }
}
