//! 디스크 반영 시나리오 통합 테스트

use std::path::Path;
use std::sync::Arc;

use grove_arborist::{
    ActualLoader, ArboristError, Diff, DiffAction, IdealOptions, IdealTreeBuilder,
    LocalFilesystem, LogScriptRunner, Manifest, MemoryRegistry, Reifier, ReifyOptions, Tree,
};

fn write_json(path: &Path, json: &str) {
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, json).unwrap();
}

async fn load_actual(dir: &Path) -> Tree {
    ActualLoader::new(Arc::new(LocalFilesystem))
        .load(dir)
        .await
        .unwrap()
}

async fn ideal_from_disk(registry: &Arc<MemoryRegistry>, dir: &Path) -> Tree {
    let start = load_actual(dir).await;
    IdealTreeBuilder::new(Arc::clone(registry), IdealOptions::default())
        .build(start)
        .await
        .unwrap()
        .tree
}

fn reifier(registry: &Arc<MemoryRegistry>) -> Reifier<MemoryRegistry, LocalFilesystem, LogScriptRunner> {
    Reifier::new(
        Arc::clone(registry),
        Arc::new(LocalFilesystem),
        Arc::new(LogScriptRunner),
        ReifyOptions {
            fetch_retries: 0,
            ..ReifyOptions::default()
        },
    )
}

#[tokio::test]
async fn extraneous_package_is_flagged_and_removed() {
    let dir = tempfile::tempdir().unwrap();
    write_json(
        &dir.path().join("package.json"),
        r#"{"name":"app","version":"1.0.0","dependencies":{"a":"^1.0.0"}}"#,
    );
    write_json(
        &dir.path().join("node_modules/a/package.json"),
        r#"{"name":"a","version":"1.0.0"}"#,
    );
    write_json(
        &dir.path().join("node_modules/left-pad/package.json"),
        r#"{"name":"left-pad","version":"1.3.0"}"#,
    );

    let actual = load_actual(dir.path()).await;
    let left_pad = actual.get("node_modules/left-pad").unwrap();
    assert!(actual.node(left_pad).extraneous);
    assert!(actual.node(left_pad).edges_in().is_empty());

    let registry = Arc::new(MemoryRegistry::new());
    registry.publish_simple("a", "1.0.0", &[]).unwrap();
    let mut ideal = ideal_from_disk(&registry, dir.path()).await;
    assert!(ideal.get("node_modules/left-pad").is_none());

    let diff = Diff::calculate(&actual, &ideal);
    let remove = diff
        .leaves()
        .into_iter()
        .find(|d| d.location == "node_modules/left-pad")
        .unwrap();
    assert_eq!(remove.action, Some(DiffAction::Remove));

    let report = reifier(&registry).reify(&actual, &mut ideal).await.unwrap();
    assert!(report.removed.contains(&"node_modules/left-pad".to_owned()));
    assert!(!dir.path().join("node_modules/left-pad").exists());
    assert!(dir.path().join("node_modules/a/package.json").exists());
}

#[tokio::test]
async fn integrity_mismatch_aborts_and_run_resumes() {
    let dir = tempfile::tempdir().unwrap();
    write_json(
        &dir.path().join("package.json"),
        r#"{"name":"app","version":"1.0.0","dependencies":{"good":"^1.0.0","bad":"^1.0.0"}}"#,
    );
    let registry = Arc::new(MemoryRegistry::new());
    registry.publish_simple("good", "1.0.0", &[]).unwrap();
    let bad = registry.publish_simple("bad", "1.0.0", &[]).unwrap();

    let mut ideal = ideal_from_disk(&registry, dir.path()).await;
    registry.corrupt_tarball("bad", "1.0.0");

    let actual = load_actual(dir.path()).await;
    let err = reifier(&registry)
        .reify(&actual, &mut ideal)
        .await
        .unwrap_err();
    assert!(matches!(err, ArboristError::IntegrityMismatch { .. }));
    assert!(dir.path().join("node_modules/good/package.json").exists());
    assert!(!dir.path().join("node_modules/bad").exists());

    // 다시 읽으면 완료된 leaf는 diff에서 빠짐
    let resumed = load_actual(dir.path()).await;
    let diff = Diff::calculate(&resumed, &ideal);
    let pending: Vec<&str> = diff.leaves().iter().map(|d| d.location.as_str()).collect();
    assert_eq!(pending, vec!["node_modules/bad"]);

    // 원래 tarball을 되돌리면 남은 leaf만 적용됨
    registry
        .publish(
            Manifest {
                dist: None,
                ..bad
            },
            &[],
        )
        .unwrap();
    let report = reifier(&registry)
        .reify(&resumed, &mut ideal)
        .await
        .unwrap();
    assert_eq!(report.added, vec!["node_modules/bad"]);
    assert!(report.is_complete());

    let done = load_actual(dir.path()).await;
    assert!(Diff::calculate(&done, &ideal).is_empty());
}

#[cfg(unix)]
#[tokio::test]
async fn workspace_members_are_linked_and_their_deps_hoisted() {
    let dir = tempfile::tempdir().unwrap();
    write_json(
        &dir.path().join("package.json"),
        r#"{"name":"mono","version":"1.0.0","workspaces":["packages/*"]}"#,
    );
    write_json(
        &dir.path().join("packages/util/package.json"),
        r#"{"name":"util","version":"0.1.0","dependencies":{"a":"^1.0.0"}}"#,
    );
    let registry = Arc::new(MemoryRegistry::new());
    registry.publish_simple("a", "1.0.0", &[]).unwrap();

    let mut ideal = ideal_from_disk(&registry, dir.path()).await;
    assert!(ideal.get("node_modules/a").is_some());

    let actual = load_actual(dir.path()).await;
    let report = reifier(&registry).reify(&actual, &mut ideal).await.unwrap();
    assert!(report.is_complete());

    let link = dir.path().join("node_modules/util");
    assert!(std::fs::symlink_metadata(&link).unwrap().file_type().is_symlink());
    assert!(link.join("package.json").exists());
    assert!(dir.path().join("node_modules/a/package.json").exists());

    let reloaded = load_actual(dir.path()).await;
    assert!(Diff::calculate(&reloaded, &ideal).is_empty());
}
