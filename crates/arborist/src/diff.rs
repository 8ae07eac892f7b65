//! 실제 트리와 ideal tree 비교
//!
//! 두 트리를 위치 기준으로 맞춰 `Diff` 트리를 만듭니다. 각 위치의 action은
//! 한쪽에만 있으면 ADD/REMOVE, 양쪽에 있지만 내용이 다르면 CHANGE 입니다.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::Serialize;

use crate::graph::{NodeId, Tree};
use crate::integrity;
use crate::virtual_tree::split_location;

/// 위치별 작업
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DiffAction {
    Add,
    Remove,
    Change,
}

impl fmt::Display for DiffAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Add => "ADD",
            Self::Remove => "REMOVE",
            Self::Change => "CHANGE",
        };
        f.write_str(s)
    }
}

/// 위치 하나의 비교 결과와 하위 위치
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diff {
    pub location: String,
    /// `None`이면 변경 없음
    pub action: Option<DiffAction>,
    /// 실제 트리의 노드
    pub actual: Option<NodeId>,
    /// ideal tree의 노드
    pub ideal: Option<NodeId>,
    pub children: Vec<Diff>,
}

/// 작업 종류별 개수
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DiffSummary {
    pub added: usize,
    pub removed: usize,
    pub changed: usize,
    pub unchanged: usize,
}

impl Diff {
    /// 두 트리의 diff를 계산합니다.
    pub fn calculate(actual: &Tree, ideal: &Tree) -> Self {
        let actual_locations = actual.locations();
        let ideal_locations = ideal.locations();
        let all: BTreeSet<&str> = actual_locations
            .keys()
            .chain(ideal_locations.keys())
            .map(String::as_str)
            .collect();

        let mut by_parent: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
        for &location in &all {
            if location.is_empty() {
                continue;
            }
            let parent = split_location(location)
                .map(|(p, _)| p)
                .filter(|p| all.contains(*p))
                .unwrap_or("");
            by_parent.entry(parent).or_default().push(location);
        }

        let sides = Sides {
            actual,
            ideal,
            actual_locations: &actual_locations,
            ideal_locations: &ideal_locations,
            by_parent: &by_parent,
        };
        sides.build("")
    }

    /// 변경이 있는 위치를 적용 순서대로 반환합니다.
    ///
    /// REMOVE는 깊은 위치부터, ADD/CHANGE는 얕은 위치부터 옵니다. 따라서
    /// 디렉토리는 하위 항목이 모두 지워진 뒤 지워지고, 부모가 만들어진 뒤
    /// 자식이 만들어집니다.
    pub fn leaves(&self) -> Vec<&Diff> {
        let mut removes = Vec::new();
        let mut writes = Vec::new();
        for d in self.iter() {
            match d.action {
                Some(DiffAction::Remove) => removes.push(d),
                Some(_) => writes.push(d),
                None => {}
            }
        }
        removes.sort_by(|a, b| {
            b.nesting()
                .cmp(&a.nesting())
                .then_with(|| a.location.cmp(&b.location))
        });
        writes.sort_by(|a, b| {
            a.nesting()
                .cmp(&b.nesting())
                .then_with(|| a.location.cmp(&b.location))
        });
        removes.extend(writes);
        removes
    }

    /// 부모가 먼저 오는 순서로 모든 diff 노드를 반환합니다.
    pub fn iter(&self) -> Vec<&Diff> {
        let mut out = vec![self];
        let mut i = 0;
        while i < out.len() {
            let cur = out[i];
            i += 1;
            out.extend(cur.children.iter());
        }
        out
    }

    /// 변경이 없는 위치 (루트 제외)
    pub fn unchanged(&self) -> Vec<&Diff> {
        self.iter()
            .into_iter()
            .filter(|d| d.action.is_none() && !d.location.is_empty())
            .collect()
    }

    pub fn summary(&self) -> DiffSummary {
        let mut summary = DiffSummary::default();
        for d in self.iter() {
            match d.action {
                Some(DiffAction::Add) => summary.added += 1,
                Some(DiffAction::Remove) => summary.removed += 1,
                Some(DiffAction::Change) => summary.changed += 1,
                None if !d.location.is_empty() => summary.unchanged += 1,
                None => {}
            }
        }
        summary
    }

    /// 적용할 작업이 없는지 반환합니다.
    pub fn is_empty(&self) -> bool {
        self.iter().iter().all(|d| d.action.is_none())
    }

    /// `node_modules` 중첩 단계
    pub fn nesting(&self) -> usize {
        self.location.matches("node_modules/").count()
    }
}

struct Sides<'a> {
    actual: &'a Tree,
    ideal: &'a Tree,
    actual_locations: &'a BTreeMap<String, NodeId>,
    ideal_locations: &'a BTreeMap<String, NodeId>,
    by_parent: &'a BTreeMap<&'a str, Vec<&'a str>>,
}

impl Sides<'_> {
    fn build(&self, location: &str) -> Diff {
        let actual = self.actual_locations.get(location).copied();
        let ideal = self.ideal_locations.get(location).copied();
        let action = match (actual, ideal) {
            (None, Some(_)) => Some(DiffAction::Add),
            (Some(_), None) => Some(DiffAction::Remove),
            (Some(a), Some(i)) if !location.is_empty() && self.changed(a, i) => {
                Some(DiffAction::Change)
            }
            _ => None,
        };
        let children = self
            .by_parent
            .get(location)
            .map(|locs| locs.iter().map(|l| self.build(l)).collect())
            .unwrap_or_default();
        Diff {
            location: location.to_owned(),
            action,
            actual,
            ideal,
            children,
        }
    }

    /// 같은 위치의 두 노드 내용이 다른지 판정합니다.
    ///
    /// 양쪽 모두 integrity가 없을 때만 resolved 비교로 같다고 볼 수 있고,
    /// 한쪽에만 integrity가 있으면 다시 설치합니다.
    fn changed(&self, a: NodeId, i: NodeId) -> bool {
        let (an, inode) = (self.actual.node(a), self.ideal.node(i));
        if an.is_link() != inode.is_link() {
            return true;
        }
        if an.is_link() {
            let at = self.actual.node(self.actual.target(a)).location();
            let it = self.ideal.node(self.ideal.target(i)).location();
            return at != it;
        }
        if !an.errors.is_empty()
            || an.version() != inode.version()
            || an.package_name() != inode.package_name()
        {
            return true;
        }
        // 트리 밖 디렉토리(워크스페이스, file:)는 설치 대상이 아님
        if an.parent().is_none() {
            return false;
        }
        match (an.integrity(), inode.integrity()) {
            (Some(x), Some(y)) => !integrity::same(x, y),
            (None, None) => match (an.resolved(), inode.resolved()) {
                (None, None) => false,
                (x, y) => x != y,
            },
            _ => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::Manifest;

    fn pkg(name: &str, version: &str, deps: &[(&str, &str)]) -> Manifest {
        Manifest {
            name: name.to_owned(),
            version: version.to_owned(),
            dependencies: deps
                .iter()
                .map(|(n, s)| ((*n).to_owned(), (*s).to_owned()))
                .collect(),
            ..Manifest::default()
        }
    }

    fn integrity(tag: &str) -> Option<String> {
        Some(format!("sha512-{tag}"))
    }

    fn sample() -> Tree {
        let mut t = Tree::new("/p", pkg("root", "1.0.0", &[("a", "^1"), ("b", "^1")]), false)
            .unwrap();
        let r = t.root();
        let a = t.add_child(r, "a", pkg("a", "1.0.0", &[("c", "^2")]), None, integrity("a1"));
        t.add_child(a, "c", pkg("c", "2.0.0", &[]), None, integrity("c2"));
        t.add_child(r, "b", pkg("b", "1.0.0", &[]), None, integrity("b1"));
        t
    }

    #[test]
    fn identical_trees_have_no_actions() {
        let t = sample();
        let diff = Diff::calculate(&t, &t.clone());
        assert!(diff.iter().iter().all(|d| d.action.is_none()));
        assert!(diff.is_empty());
        assert_eq!(diff.summary().unchanged, 3);
        assert_eq!(diff.unchanged().len(), 3);
    }

    #[test]
    fn extraneous_node_is_removed() {
        let mut actual = sample();
        let r = actual.root();
        actual.add_child(r, "left-pad", pkg("left-pad", "1.3.0", &[]), None, integrity("lp"));
        crate::graph::calc_dep_flags(&mut actual);
        let lp = actual.get("node_modules/left-pad").unwrap();
        assert!(actual.node(lp).extraneous);

        let diff = Diff::calculate(&actual, &sample());
        let leaves = diff.leaves();
        assert_eq!(leaves.len(), 1);
        assert_eq!(leaves[0].location, "node_modules/left-pad");
        assert_eq!(leaves[0].action, Some(DiffAction::Remove));
    }

    #[test]
    fn integrity_difference_is_change_even_with_same_version() {
        let actual = sample();
        let mut ideal = sample();
        let b = ideal.get("node_modules/b").unwrap();
        ideal.set_resolved(b, None, integrity("other"));

        let diff = Diff::calculate(&actual, &ideal);
        let leaves = diff.leaves();
        assert_eq!(leaves.len(), 1);
        assert_eq!(leaves[0].action, Some(DiffAction::Change));
        assert_eq!(leaves[0].location, "node_modules/b");
    }

    #[test]
    fn missing_integrity_on_one_side_is_change() {
        let mut actual = sample();
        let b = actual.get("node_modules/b").unwrap();
        actual.set_resolved(b, None, None);
        let diff = Diff::calculate(&actual, &sample());
        assert_eq!(diff.summary().changed, 1);
    }

    #[test]
    fn removes_run_deepest_first_and_adds_shallowest_first() {
        let empty = Tree::new("/p", pkg("root", "1.0.0", &[]), false).unwrap();
        let full = sample();

        let adds = Diff::calculate(&empty, &full);
        let order: Vec<&str> = adds.leaves().iter().map(|d| d.location.as_str()).collect();
        assert_eq!(
            order,
            vec!["node_modules/a", "node_modules/b", "node_modules/a/node_modules/c"]
        );

        let removes = Diff::calculate(&full, &empty);
        let order: Vec<&str> = removes.leaves().iter().map(|d| d.location.as_str()).collect();
        assert_eq!(
            order,
            vec!["node_modules/a/node_modules/c", "node_modules/a", "node_modules/b"]
        );
        assert!(
            removes
                .leaves()
                .iter()
                .all(|d| d.action == Some(DiffAction::Remove))
        );
    }

    #[test]
    fn nested_diff_follows_tree_shape() {
        let empty = Tree::new("/p", pkg("root", "1.0.0", &[]), false).unwrap();
        let diff = Diff::calculate(&empty, &sample());
        assert_eq!(diff.location, "");
        let a = diff
            .children
            .iter()
            .find(|d| d.location == "node_modules/a")
            .unwrap();
        assert_eq!(a.children.len(), 1);
        assert_eq!(a.children[0].location, "node_modules/a/node_modules/c");
    }

    #[test]
    fn link_retarget_is_change() {
        let make = |target: &str| {
            let mut t = Tree::new("/p", pkg("root", "1.0.0", &[]), false).unwrap();
            let r = t.root();
            let fs = t.add_fs_node(r, target, pkg("lib", "1.0.0", &[]));
            t.add_link(r, "lib", fs);
            t
        };
        let diff = Diff::calculate(&make("libs/one"), &make("libs/two"));
        let link = diff
            .iter()
            .into_iter()
            .find(|d| d.location == "node_modules/lib")
            .unwrap();
        assert_eq!(link.action, Some(DiffAction::Change));
    }
}
