//! 파일시스템 제공자
//!
//! 실제 트리 로딩과 반영은 [`Filesystem`] 트레이트를 통해서만 디스크에 접근합니다.
//! [`LocalFilesystem`]은 `tokio::fs`를 사용하며, tarball 추출처럼 블로킹 작업은
//! `spawn_blocking`으로 넘깁니다.
//!
//! # 원자성
//!
//! - 패키지 추출: 같은 디렉토리의 임시 디렉토리에 풀고 rename 합니다.
//!   기존 디렉토리의 `node_modules`는 새 디렉토리로 옮겨 보존합니다.
//! - 심볼릭 링크: 임시 이름으로 만든 뒤 rename 으로 교체합니다.
//! - 파일 쓰기: 임시 파일에 쓴 뒤 rename 합니다.

use std::collections::HashSet;
use std::future::Future;
use std::io;
use std::path::{Component, Path, PathBuf};

use bytes::Bytes;
use flate2::read::GzDecoder;
use tar::{Archive, EntryType};
use tracing::debug;

use crate::error::ArboristError;

/// 디렉토리 엔트리 종류
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    Dir,
    File,
    Symlink,
}

/// 디렉토리 엔트리
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub name: String,
    pub kind: EntryKind,
}

/// 파일시스템 제공자
pub trait Filesystem: Send + Sync + 'static {
    /// 디렉토리 엔트리를 이름 순으로 반환합니다. 디렉토리가 없으면 빈 목록.
    fn read_dir(
        &self,
        path: &Path,
    ) -> impl Future<Output = Result<Vec<DirEntry>, ArboristError>> + Send;

    /// 파일 내용을 읽습니다. 파일이 없으면 `Ok(None)`.
    fn read_to_string(
        &self,
        path: &Path,
    ) -> impl Future<Output = Result<Option<String>, ArboristError>> + Send;

    /// 심볼릭 링크가 가리키는 경로 (링크 기준 상대 경로일 수 있음)
    fn read_link(&self, path: &Path) -> impl Future<Output = Result<PathBuf, ArboristError>> + Send;

    /// 파일을 원자적으로 씁니다.
    fn write_atomic(
        &self,
        path: &Path,
        data: Bytes,
    ) -> impl Future<Output = Result<(), ArboristError>> + Send;

    /// 패키지 tarball을 `dest`에 풀어 기존 내용을 교체합니다.
    ///
    /// tarball의 첫 경로 구간(`package/`)은 버립니다. 기존 `dest/node_modules`는 유지합니다.
    fn extract_package(
        &self,
        data: Bytes,
        dest: &Path,
    ) -> impl Future<Output = Result<(), ArboristError>> + Send;

    /// `link` 위치에 `target`을 가리키는 심볼릭 링크를 만들거나 교체합니다.
    fn symlink(
        &self,
        target: &Path,
        link: &Path,
    ) -> impl Future<Output = Result<(), ArboristError>> + Send;

    /// 파일/링크/디렉토리를 제거합니다. 없으면 성공입니다.
    fn remove_all(&self, path: &Path) -> impl Future<Output = Result<(), ArboristError>> + Send;

    /// 경로가 존재하는지 반환합니다 (링크 자체 기준).
    fn exists(&self, path: &Path) -> impl Future<Output = bool> + Send;
}

/// 로컬 디스크 파일시스템
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalFilesystem;

impl Filesystem for LocalFilesystem {
    async fn read_dir(&self, path: &Path) -> Result<Vec<DirEntry>, ArboristError> {
        let mut reader = match tokio::fs::read_dir(path).await {
            Ok(r) => r,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(ArboristError::io(path, e)),
        };
        let mut out = Vec::new();
        while let Some(entry) = reader
            .next_entry()
            .await
            .map_err(|e| ArboristError::io(path, e))?
        {
            let file_type = entry
                .file_type()
                .await
                .map_err(|e| ArboristError::io(entry.path(), e))?;
            let kind = if file_type.is_symlink() {
                EntryKind::Symlink
            } else if file_type.is_dir() {
                EntryKind::Dir
            } else {
                EntryKind::File
            };
            out.push(DirEntry {
                name: entry.file_name().to_string_lossy().into_owned(),
                kind,
            });
        }
        out.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(out)
    }

    async fn read_to_string(&self, path: &Path) -> Result<Option<String>, ArboristError> {
        match tokio::fs::read_to_string(path).await {
            Ok(c) => Ok(Some(c)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(ArboristError::io(path, e)),
        }
    }

    async fn read_link(&self, path: &Path) -> Result<PathBuf, ArboristError> {
        tokio::fs::read_link(path)
            .await
            .map_err(|e| ArboristError::io(path, e))
    }

    async fn write_atomic(&self, path: &Path, data: Bytes) -> Result<(), ArboristError> {
        crate::shrinkwrap::write_atomic(path, &data).await
    }

    async fn extract_package(&self, data: Bytes, dest: &Path) -> Result<(), ArboristError> {
        let dest = dest.to_path_buf();
        tokio::task::spawn_blocking(move || replace_with_tarball(&data, &dest))
            .await
            .map_err(|e| ArboristError::Io {
                path: "extract task".to_owned(),
                source: io::Error::other(e.to_string()),
            })?
    }

    async fn symlink(&self, target: &Path, link: &Path) -> Result<(), ArboristError> {
        let parent = link.parent().unwrap_or(Path::new("."));
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| ArboristError::io(parent, e))?;
        let tmp = sibling_temp(link);
        create_symlink(target, &tmp)
            .await
            .map_err(|e| ArboristError::io(&tmp, e))?;

        // 디렉토리 위로는 rename 할 수 없으므로 먼저 제거
        if let Ok(meta) = tokio::fs::symlink_metadata(link).await
            && meta.is_dir()
        {
            tokio::fs::remove_dir_all(link)
                .await
                .map_err(|e| ArboristError::io(link, e))?;
        }
        if let Err(e) = tokio::fs::rename(&tmp, link).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(ArboristError::io(link, e));
        }
        debug!(link = %link.display(), target = %target.display(), "symlink created");
        Ok(())
    }

    async fn remove_all(&self, path: &Path) -> Result<(), ArboristError> {
        let meta = match tokio::fs::symlink_metadata(path).await {
            Ok(m) => m,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(ArboristError::io(path, e)),
        };
        let result = if meta.is_dir() {
            tokio::fs::remove_dir_all(path).await
        } else {
            tokio::fs::remove_file(path).await
        };
        match result {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(ArboristError::io(path, e)),
        }
    }

    async fn exists(&self, path: &Path) -> bool {
        tokio::fs::symlink_metadata(path).await.is_ok()
    }
}

#[cfg(unix)]
async fn create_symlink(target: &Path, link: &Path) -> io::Result<()> {
    tokio::fs::symlink(target, link).await
}

#[cfg(windows)]
async fn create_symlink(target: &Path, link: &Path) -> io::Result<()> {
    tokio::fs::symlink_dir(target, link).await
}

fn sibling_temp(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!(".{name}-{}", uuid::Uuid::new_v4()))
}

/// tarball을 임시 디렉토리에 풀고 `dest`를 교체합니다.
fn replace_with_tarball(data: &[u8], dest: &Path) -> Result<(), ArboristError> {
    let parent = dest.parent().ok_or_else(|| ArboristError::FilesystemConflict {
        path: dest.display().to_string(),
        reason: "destination has no parent directory".to_owned(),
    })?;
    std::fs::create_dir_all(parent).map_err(|e| ArboristError::io(parent, e))?;

    let existing = std::fs::symlink_metadata(dest).ok();
    if let Some(meta) = &existing
        && meta.is_file()
    {
        return Err(ArboristError::FilesystemConflict {
            path: dest.display().to_string(),
            reason: "a regular file occupies the package directory".to_owned(),
        });
    }

    let staging = sibling_temp(dest);
    if let Err(e) = extract_tarball(data, &staging) {
        let _ = std::fs::remove_dir_all(&staging);
        return Err(e);
    }

    match existing {
        Some(meta) if meta.is_dir() => {
            let nested = dest.join("node_modules");
            if nested.is_dir() {
                let keep = staging.join("node_modules");
                let _ = std::fs::remove_dir_all(&keep);
                std::fs::rename(&nested, &keep).map_err(|e| ArboristError::io(&nested, e))?;
            }
            let trash = sibling_temp(dest);
            std::fs::rename(dest, &trash).map_err(|e| ArboristError::io(dest, e))?;
            std::fs::rename(&staging, dest).map_err(|e| ArboristError::io(dest, e))?;
            let _ = std::fs::remove_dir_all(&trash);
        }
        Some(_) => {
            std::fs::remove_file(dest).map_err(|e| ArboristError::io(dest, e))?;
            std::fs::rename(&staging, dest).map_err(|e| ArboristError::io(dest, e))?;
        }
        None => {
            std::fs::rename(&staging, dest).map_err(|e| ArboristError::io(dest, e))?;
        }
    }
    Ok(())
}

/// tar.gz를 `output`에 풉니다. 첫 경로 구간은 버리고, 출력 디렉토리 밖을
/// 가리키는 엔트리는 거부합니다. 일반 파일과 디렉토리만 만듭니다.
fn extract_tarball(data: &[u8], output: &Path) -> Result<(), ArboristError> {
    let io_err = |e: io::Error| ArboristError::io(output, e);
    std::fs::create_dir_all(output).map_err(io_err)?;
    let output = std::fs::canonicalize(output).map_err(io_err)?;
    let mut archive = Archive::new(GzDecoder::new(data));
    archive.set_overwrite(true);
    archive.set_preserve_permissions(true);
    let mut created_dirs = HashSet::new();

    for entry in archive.entries().map_err(io_err)? {
        let mut entry = entry.map_err(io_err)?;
        let path = entry.path().map_err(io_err)?.into_owned();
        let relative: PathBuf = path.components().skip(1).collect();
        if relative.as_os_str().is_empty() {
            continue;
        }
        if relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_)))
        {
            return Err(ArboristError::FilesystemConflict {
                path: path.display().to_string(),
                reason: "tarball entry escapes the package directory".to_owned(),
            });
        }
        let entry_type = entry.header().entry_type();
        let absolute = output.join(&relative);
        let dir = if entry_type == EntryType::Directory {
            absolute.clone()
        } else {
            absolute
                .parent()
                .map(Path::to_path_buf)
                .unwrap_or_else(|| output.clone())
        };
        if created_dirs.insert(dir.clone()) {
            std::fs::create_dir_all(&dir).map_err(io_err)?;
            let canonical = std::fs::canonicalize(&dir).map_err(io_err)?;
            if !canonical.starts_with(&output) {
                return Err(ArboristError::FilesystemConflict {
                    path: canonical.display().to_string(),
                    reason: "extracted directory is outside the package directory".to_owned(),
                });
            }
        }
        if entry_type == EntryType::Regular {
            entry.unpack(&absolute).map_err(io_err)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::Manifest;
    use crate::registry::pack;

    fn tarball(version: &str) -> Bytes {
        let m = Manifest {
            name: "pkg".to_owned(),
            version: version.to_owned(),
            ..Manifest::default()
        };
        pack(&m, &[("lib/index.js", b"exports.x = 1\n")]).unwrap()
    }

    #[tokio::test]
    async fn extract_strips_package_prefix() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("node_modules/pkg");
        LocalFilesystem
            .extract_package(tarball("1.0.0"), &dest)
            .await
            .unwrap();
        let m = Manifest::load(&dest).await.unwrap();
        assert_eq!(m.version, "1.0.0");
        assert!(dest.join("lib/index.js").is_file());
    }

    #[tokio::test]
    async fn extract_replaces_but_keeps_nested_node_modules() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("node_modules/pkg");
        let fs = LocalFilesystem;
        fs.extract_package(tarball("1.0.0"), &dest).await.unwrap();
        std::fs::write(dest.join("stale.txt"), "old").unwrap();
        std::fs::create_dir_all(dest.join("node_modules/child")).unwrap();

        fs.extract_package(tarball("2.0.0"), &dest).await.unwrap();
        assert_eq!(Manifest::load(&dest).await.unwrap().version, "2.0.0");
        assert!(!dest.join("stale.txt").exists());
        assert!(dest.join("node_modules/child").is_dir());
        // 임시 디렉토리가 남지 않음
        let leftovers: Vec<_> = std::fs::read_dir(dir.path().join("node_modules"))
            .unwrap()
            .filter_map(Result::ok)
            .filter(|e| e.file_name().to_string_lossy().starts_with('.'))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[tokio::test]
    async fn extract_rejects_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("node_modules/pkg");
        let err = LocalFilesystem
            .extract_package(Bytes::from_static(b"not a tarball"), &dest)
            .await;
        assert!(err.is_err());
        assert!(!dest.exists());
    }

    #[tokio::test]
    async fn regular_file_blocks_extract() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("node_modules/pkg");
        std::fs::create_dir_all(dest.parent().unwrap()).unwrap();
        std::fs::write(&dest, "file").unwrap();
        let err = LocalFilesystem
            .extract_package(tarball("1.0.0"), &dest)
            .await
            .unwrap_err();
        assert!(matches!(err, ArboristError::FilesystemConflict { .. }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn symlink_replaces_existing_entry() {
        let dir = tempfile::tempdir().unwrap();
        let fs = LocalFilesystem;
        std::fs::create_dir_all(dir.path().join("packages/a")).unwrap();
        std::fs::create_dir_all(dir.path().join("packages/b")).unwrap();
        let link = dir.path().join("node_modules/a");

        fs.symlink(Path::new("../packages/a"), &link).await.unwrap();
        assert_eq!(
            fs.read_link(&link).await.unwrap(),
            PathBuf::from("../packages/a")
        );
        fs.symlink(Path::new("../packages/b"), &link).await.unwrap();
        assert_eq!(
            fs.read_link(&link).await.unwrap(),
            PathBuf::from("../packages/b")
        );

        let entries = fs.read_dir(&dir.path().join("node_modules")).await.unwrap();
        assert_eq!(
            entries,
            vec![DirEntry {
                name: "a".to_owned(),
                kind: EntryKind::Symlink
            }]
        );
    }

    #[tokio::test]
    async fn remove_all_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let fs = LocalFilesystem;
        let target = dir.path().join("node_modules/x");
        std::fs::create_dir_all(target.join("deep")).unwrap();
        fs.remove_all(&target).await.unwrap();
        assert!(!fs.exists(&target).await);
        fs.remove_all(&target).await.unwrap();
        assert!(fs.read_dir(&target).await.unwrap().is_empty());
    }
}
