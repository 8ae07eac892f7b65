//! lockfile 에서 트리 복원
//!
//! 디스크를 보지 않고 lockfile 항목만으로 트리를 만듭니다. ideal tree
//! 구성의 시작점으로 쓰여 잠긴 버전이 유지됩니다.

use std::path::PathBuf;

use tracing::{debug, warn};

use crate::actual::workspace_matches;
use crate::error::ArboristError;
use crate::graph::Tree;
use crate::manifest::Manifest;
use crate::shrinkwrap::{LockEntry, Shrinkwrap};

/// lockfile 항목으로 트리를 복원합니다.
///
/// 루트 노드는 lockfile의 `""` 항목이 아니라 현재 `package.json`을 씁니다.
/// 선언이 바뀌었다면 해당 엣지가 문제로 드러나 ideal 단계에서 고쳐집니다.
pub fn load_virtual(
    path: impl Into<PathBuf>,
    root: Manifest,
    lock: &Shrinkwrap,
    legacy_peer_deps: bool,
) -> Result<Tree, ArboristError> {
    let mut tree = Tree::new(path, root, legacy_peer_deps)?;
    let root_id = tree.root();
    let patterns = tree.node(root_id).package().workspaces.clone();

    let mut entries: Vec<(&str, &LockEntry)> = lock
        .packages
        .iter()
        .filter(|(location, _)| !location.is_empty())
        .map(|(location, entry)| (location.as_str(), entry))
        .collect();
    entries.sort_by(|(a, _), (b, _)| nesting(a).cmp(&nesting(b)).then_with(|| a.cmp(b)));

    // node_modules 밖의 디렉토리 (워크스페이스, file: 의존성)
    for (location, entry) in &entries {
        if split_location(location).is_some() || entry.link {
            continue;
        }
        let manifest = entry.to_manifest(last_segment(location));
        if patterns.iter().any(|p| workspace_matches(p, location)) {
            tree.add_workspace(location, manifest);
        } else {
            tree.add_fs_node(root_id, location, manifest);
        }
    }

    for (location, entry) in &entries {
        let Some((parent_location, name)) = split_location(location) else {
            continue;
        };
        let Some(parent) = tree.get(parent_location) else {
            warn!(location = %location, "lockfile entry has no parent entry, skipping");
            continue;
        };

        if entry.link {
            let target_location = entry.resolved.as_deref().unwrap_or_default();
            let target = match tree.get(target_location) {
                Some(t) => tree.target(t),
                None => {
                    let manifest = Manifest {
                        name: name.to_owned(),
                        ..Manifest::default()
                    };
                    tree.add_fs_node(root_id, target_location, manifest)
                }
            };
            let linked = tree
                .node(parent)
                .children()
                .get(name)
                .is_some_and(|c| tree.target(*c) == target);
            if !linked {
                tree.add_link(parent, name, target);
            }
            continue;
        }

        let id = tree.add_child(
            parent,
            name,
            entry.to_manifest(name),
            entry.resolved.clone(),
            entry.integrity.clone(),
        );
        let node = tree.node_mut(id);
        node.dev = entry.dev;
        node.optional = entry.optional;
        node.dev_optional = entry.dev_optional || (entry.dev && entry.optional);
        node.peer = entry.peer;
        node.extraneous = entry.extraneous;
        node.has_install_script = entry.has_install_script;
    }

    debug!(
        nodes = tree.inventory().len(),
        lockfile_version = lock.lockfile_version,
        "virtual tree loaded"
    );
    Ok(tree)
}

/// 위치에 포함된 `node_modules` 단계 수
fn nesting(location: &str) -> usize {
    location.matches("node_modules/").count()
}

fn last_segment(location: &str) -> &str {
    location.rsplit('/').next().unwrap_or(location)
}

/// `…/node_modules/<name>` 위치를 부모 위치와 이름으로 나눕니다.
///
/// `node_modules` 밖의 위치이거나 이름이 잘못되었으면 `None`.
pub(crate) fn split_location(location: &str) -> Option<(&str, &str)> {
    const MARKER: &str = "node_modules/";
    let idx = location.rfind(MARKER)?;
    if idx > 0 && !location[..idx].ends_with('/') {
        return None;
    }
    let name = &location[idx + MARKER.len()..];
    let valid = match name.split_once('/') {
        Some((scope, rest)) => scope.starts_with('@') && !rest.is_empty() && !rest.contains('/'),
        None => !name.is_empty(),
    };
    if !valid {
        return None;
    }
    let parent = location[..idx].trim_end_matches('/');
    Some((parent, name))
}

#[cfg(test)]
mod tests {
    use super::*;

    const LOCK_V3: &str = r#"{
      "name": "app",
      "version": "1.0.0",
      "lockfileVersion": 3,
      "requires": true,
      "packages": {
        "": { "name": "app", "version": "1.0.0", "dependencies": { "a": "^1.0.0", "util": "^1.0.0" }, "workspaces": ["packages/*"] },
        "node_modules/a": { "version": "1.0.0", "resolved": "https://registry.npmjs.org/a/-/a-1.0.0.tgz", "integrity": "sha512-aaa", "dependencies": { "b": "^2.0.0" } },
        "node_modules/a/node_modules/b": { "version": "2.0.0", "resolved": "https://registry.npmjs.org/b/-/b-2.0.0.tgz" },
        "node_modules/b": { "version": "1.0.0", "dev": true },
        "node_modules/@scope/c": { "version": "3.1.0" },
        "node_modules/util": { "resolved": "packages/util", "link": true },
        "packages/util": { "name": "util", "version": "1.0.0" }
      }
    }"#;

    fn root_manifest() -> Manifest {
        Manifest::from_json(
            "package.json",
            r#"{"name":"app","version":"1.0.0","dependencies":{"a":"^1.0.0","util":"^1.0.0"},"workspaces":["packages/*"]}"#,
        )
        .unwrap()
    }

    #[test]
    fn restores_nested_scoped_and_linked_nodes() {
        let lock = Shrinkwrap::from_json("package-lock.json", LOCK_V3).unwrap();
        let tree = load_virtual("/app", root_manifest(), &lock, false).unwrap();

        let a = tree.get("node_modules/a").unwrap();
        assert_eq!(tree.node(a).version(), "1.0.0");
        assert_eq!(tree.node(a).integrity(), Some("sha512-aaa"));
        let nested = tree.get("node_modules/a/node_modules/b").unwrap();
        assert_eq!(tree.resolve(a, "b"), Some(nested));
        assert!(tree.get("node_modules/@scope/c").is_some());

        let b = tree.get("node_modules/b").unwrap();
        assert!(tree.node(b).dev);

        let link = tree.get("node_modules/util").unwrap();
        assert!(tree.node(link).is_link());
        let ws = tree.get("packages/util").unwrap();
        assert_eq!(tree.target(link), ws);
        assert_eq!(tree.workspace_nodes(&["util".to_owned()]), vec![ws]);

        let root_edges = tree.node(tree.root()).edges_out();
        assert!(tree.edge_valid(root_edges["a"]));
        assert!(tree.edge_valid(root_edges["util"]));
    }

    #[test]
    fn orphaned_entries_are_skipped() {
        let lock = Shrinkwrap::from_json(
            "package-lock.json",
            r#"{"lockfileVersion":3,"packages":{"":{},"node_modules/x/node_modules/y":{"version":"1.0.0"}}}"#,
        )
        .unwrap();
        let tree = load_virtual("/app", Manifest::default(), &lock, false).unwrap();
        assert_eq!(tree.inventory().len(), 1);
    }

    #[test]
    fn tree_survives_lockfile_round_trip() {
        let lock = Shrinkwrap::from_json("package-lock.json", LOCK_V3).unwrap();
        let tree = load_virtual("/app", root_manifest(), &lock, false).unwrap();
        let again = Shrinkwrap::from_tree(&tree, 3);
        let reloaded = load_virtual("/app", root_manifest(), &again, false).unwrap();
        assert_eq!(
            tree.locations().keys().collect::<Vec<_>>(),
            reloaded.locations().keys().collect::<Vec<_>>()
        );
        assert_eq!(Shrinkwrap::from_tree(&reloaded, 3), again);
    }

    #[test]
    fn split_location_handles_scopes_and_nesting() {
        assert_eq!(split_location("node_modules/a"), Some(("", "a")));
        assert_eq!(
            split_location("node_modules/a/node_modules/@s/b"),
            Some(("node_modules/a", "@s/b"))
        );
        assert_eq!(
            split_location("packages/x/node_modules/y"),
            Some(("packages/x", "y"))
        );
        assert_eq!(split_location("packages/x"), None);
        assert_eq!(split_location("foo_node_modules/x"), None);
        assert_eq!(split_location("node_modules/a/b"), None);
    }
}
