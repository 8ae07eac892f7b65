//! dev / optional / devOptional / peer / extraneous 플래그 계산
//!
//! 루트를 제외한 모든 노드의 플래그를 켜 둔 상태에서 루트부터 엣지를 따라가며
//! 해제합니다. 플래그는 켜짐에서 꺼짐으로만 바뀌므로, 변화가 있던 노드만
//! 다시 방문하면 고정점에 도달합니다.

use std::collections::VecDeque;

use super::{NodeId, Tree};

#[derive(Debug, Clone, Copy)]
struct Flags {
    dev: bool,
    optional: bool,
    dev_optional: bool,
    peer: bool,
}

impl Flags {
    fn of(tree: &Tree, id: NodeId) -> Self {
        let n = tree.node(id);
        Self {
            dev: n.dev,
            optional: n.optional,
            dev_optional: n.dev_optional,
            peer: n.peer,
        }
    }
}

/// 트리 전체의 의존성 플래그를 다시 계산합니다.
///
/// 어떤 엣지로도 도달하지 못한 노드는 `extraneous`로 남고,
/// 나머지 플래그는 해제됩니다.
pub fn calc_dep_flags(tree: &mut Tree) {
    let root = tree.root();
    for id in tree.inventory().ids() {
        let node = tree.node_mut(id);
        if id == root {
            node.clear_flags();
        } else {
            node.set_all_flags();
        }
    }

    let mut queue = VecDeque::from([root]);
    while let Some(id) = queue.pop_front() {
        let flags = Flags::of(tree, id);

        if tree.node(id).is_link() {
            if let Some(target) = tree.node(id).link_target()
                && unset(tree, target, flags)
            {
                reset_parents(tree, target);
                queue.push_back(target);
            }
            continue;
        }

        let edges: Vec<_> = tree.node(id).edges_out().values().copied().collect();
        for eid in edges {
            let edge = tree.edge(eid);
            let Some(to) = edge.to() else {
                continue;
            };
            let (dev, optional, peer) = (edge.is_dev(), edge.is_optional(), edge.is_peer());

            let unset_dev_opt =
                !flags.dev_optional && !flags.dev && !flags.optional && !dev && !optional;
            let wanted = Flags {
                dev: !(unset_dev_opt || (!flags.dev && !dev)),
                optional: !(unset_dev_opt || (!flags.optional && !optional)),
                dev_optional: !unset_dev_opt,
                peer: flags.peer || peer,
            };
            if unset(tree, to, wanted) {
                reset_parents(tree, to);
                queue.push_back(to);
            }
        }
    }

    for id in tree.inventory().ids() {
        let node = tree.node_mut(id);
        if node.extraneous {
            node.dev = false;
            node.optional = false;
            node.dev_optional = false;
            node.peer = false;
        }
    }
}

/// `wanted`에서 꺼진 플래그를 노드에서 끕니다. 변화가 있으면 true.
fn unset(tree: &mut Tree, id: NodeId, wanted: Flags) -> bool {
    let node = tree.node_mut(id);
    let mut changed = false;
    let mut clear = |flag: &mut bool, keep: bool| {
        if *flag && !keep {
            *flag = false;
            changed = true;
        }
    };
    clear(&mut node.extraneous, false);
    clear(&mut node.dev, wanted.dev);
    clear(&mut node.optional, wanted.optional);
    clear(&mut node.dev_optional, wanted.dev_optional);
    clear(&mut node.peer, wanted.peer);
    changed
}

/// 플래그가 꺼진 노드를 담고 있는 상위 노드들도 같은 플래그를 끕니다.
fn reset_parents(tree: &mut Tree, id: NodeId) {
    let flags = Flags::of(tree, id);
    let extraneous = tree.node(id).extraneous;
    let mut cur = tree.resolve_parent(id);
    while let Some(p) = cur {
        let node = tree.node_mut(p);
        let mut touched = false;
        if !extraneous && node.extraneous {
            node.extraneous = false;
            touched = true;
        }
        if !flags.dev && node.dev {
            node.dev = false;
            touched = true;
        }
        if !flags.optional && node.optional {
            node.optional = false;
            touched = true;
        }
        if !flags.dev_optional && node.dev_optional {
            node.dev_optional = false;
            touched = true;
        }
        if !flags.peer && node.peer {
            node.peer = false;
            touched = true;
        }
        if !touched {
            break;
        }
        cur = tree.resolve_parent(p);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::Manifest;

    fn pkg(name: &str, deps: &[(&str, &str)]) -> Manifest {
        Manifest {
            name: name.to_owned(),
            version: "1.0.0".to_owned(),
            dependencies: deps
                .iter()
                .map(|(n, s)| ((*n).to_owned(), (*s).to_owned()))
                .collect(),
            ..Manifest::default()
        }
    }

    fn fixture() -> (Tree, [NodeId; 5]) {
        let mut root = pkg("root", &[("prod", "*")]);
        root.dev_dependencies.insert("devdep".to_owned(), "*".to_owned());
        root.optional_dependencies
            .insert("opt".to_owned(), "*".to_owned());
        let mut t = Tree::new("/p", root, false).unwrap();
        let r = t.root();
        let prod = t.add_child(r, "prod", pkg("prod", &[("shared", "*")]), None, None);
        let devdep = t.add_child(r, "devdep", pkg("devdep", &[("devonly", "*")]), None, None);
        let opt = t.add_child(r, "opt", pkg("opt", &[]), None, None);
        let devonly = t.add_child(r, "devonly", pkg("devonly", &[]), None, None);
        t.add_child(r, "shared", pkg("shared", &[]), None, None);
        let stray = t.add_child(r, "stray", pkg("stray", &[]), None, None);
        (t, [prod, devdep, opt, devonly, stray])
    }

    #[test]
    fn flags_follow_edge_types() {
        let (mut t, [prod, devdep, opt, devonly, stray]) = fixture();
        calc_dep_flags(&mut t);

        let root = t.node(t.root());
        assert!(!root.dev && !root.optional && !root.extraneous);

        let p = t.node(prod);
        assert!(!p.dev && !p.optional && !p.dev_optional && !p.extraneous);

        let d = t.node(devdep);
        assert!(d.dev && !d.optional && d.dev_optional);
        let d2 = t.node(devonly);
        assert!(d2.dev && !d2.extraneous);

        let o = t.node(opt);
        assert!(o.optional && !o.dev && o.dev_optional);

        let s = t.node(stray);
        assert!(s.extraneous);
        assert!(!s.dev && !s.optional);
    }

    #[test]
    fn prod_path_clears_dev_on_shared_dep() {
        let mut root = pkg("root", &[("a", "*")]);
        root.dev_dependencies.insert("b".to_owned(), "*".to_owned());
        let mut t = Tree::new("/p", root, false).unwrap();
        let r = t.root();
        t.add_child(r, "a", pkg("a", &[("c", "*")]), None, None);
        t.add_child(r, "b", pkg("b", &[("c", "*")]), None, None);
        let c = t.add_child(r, "c", pkg("c", &[]), None, None);
        calc_dep_flags(&mut t);
        let c = t.node(c);
        assert!(!c.dev && !c.optional && !c.extraneous);
    }

    #[test]
    fn peer_flag_kept_only_on_peer_paths() {
        let mut t = Tree::new("/p", pkg("root", &[("a", "*")]), false).unwrap();
        let r = t.root();
        let mut a_pkg = pkg("a", &[]);
        a_pkg.peer_dependencies.insert("p".to_owned(), "*".to_owned());
        let a = t.add_child(r, "a", a_pkg, None, None);
        let p = t.add_child(r, "p", pkg("p", &[]), None, None);
        calc_dep_flags(&mut t);
        assert!(!t.node(a).peer);
        assert!(t.node(p).peer);
        assert!(!t.node(p).extraneous && !t.node(p).dev);
    }

    #[test]
    fn link_flags_copy_to_target() {
        let mut root = pkg("root", &[]);
        root.workspaces = vec!["packages/w".to_owned()];
        let mut t = Tree::new("/p", root, false).unwrap();
        let ws = t.add_workspace("packages/w", pkg("w", &[]));
        calc_dep_flags(&mut t);
        let w = t.node(ws);
        assert!(!w.extraneous && !w.dev && !w.optional);
    }
}
