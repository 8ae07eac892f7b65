//! 트리 전체 노드 인덱스
//!
//! 위치(location)를 기본 키로, 이름/패키지 이름/resolved를 보조 키로 관리합니다.
//! 트리에 붙어 있는 노드만 인덱스에 존재합니다.

use std::collections::{BTreeMap, BTreeSet};

use super::NodeId;

/// 보조 키 종류
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryKey {
    /// 트리 이름
    Name,
    /// package.json 의 name
    PackageName,
    /// resolved URL/경로
    Resolved,
}

/// 노드 인덱스
#[derive(Debug, Clone, Default)]
pub struct Inventory {
    by_location: BTreeMap<String, NodeId>,
    locations: BTreeMap<NodeId, String>,
    by_name: BTreeMap<String, BTreeSet<NodeId>>,
    by_package_name: BTreeMap<String, BTreeSet<NodeId>>,
    by_resolved: BTreeMap<String, BTreeSet<NodeId>>,
}

/// 인덱스에 넣을 노드 키 묶음
pub(crate) struct IndexKeys<'a> {
    pub location: &'a str,
    pub name: &'a str,
    pub package_name: &'a str,
    pub resolved: Option<&'a str>,
}

impl Inventory {
    pub(crate) fn insert(&mut self, id: NodeId, keys: &IndexKeys<'_>) {
        self.by_location.insert(keys.location.to_owned(), id);
        self.locations.insert(id, keys.location.to_owned());
        self.by_name
            .entry(keys.name.to_owned())
            .or_default()
            .insert(id);
        self.by_package_name
            .entry(keys.package_name.to_owned())
            .or_default()
            .insert(id);
        if let Some(resolved) = keys.resolved {
            self.by_resolved
                .entry(resolved.to_owned())
                .or_default()
                .insert(id);
        }
    }

    pub(crate) fn remove(&mut self, id: NodeId, keys: &IndexKeys<'_>) {
        if self.by_location.get(keys.location) == Some(&id) {
            self.by_location.remove(keys.location);
        }
        self.locations.remove(&id);
        remove_from(&mut self.by_name, keys.name, id);
        remove_from(&mut self.by_package_name, keys.package_name, id);
        if let Some(resolved) = keys.resolved {
            remove_from(&mut self.by_resolved, resolved, id);
        }
    }

    pub(crate) fn set_resolved(&mut self, id: NodeId, old: Option<&str>, new: Option<&str>) {
        if let Some(old) = old {
            remove_from(&mut self.by_resolved, old, id);
        }
        if let Some(new) = new {
            self.by_resolved.entry(new.to_owned()).or_default().insert(id);
        }
    }

    /// 위치로 노드를 찾습니다.
    pub fn get(&self, location: &str) -> Option<NodeId> {
        self.by_location.get(location).copied()
    }

    /// 노드가 트리에 붙어 있는지 반환합니다.
    pub fn contains(&self, id: NodeId) -> bool {
        self.locations.contains_key(&id)
    }

    /// 노드의 인덱스된 위치
    pub fn location_of(&self, id: NodeId) -> Option<&str> {
        self.locations.get(&id).map(String::as_str)
    }

    /// 보조 키로 노드를 조회합니다. 결과는 위치 순입니다.
    pub fn query(&self, key: QueryKey, value: &str) -> Vec<NodeId> {
        let index = match key {
            QueryKey::Name => &self.by_name,
            QueryKey::PackageName => &self.by_package_name,
            QueryKey::Resolved => &self.by_resolved,
        };
        let mut ids: Vec<NodeId> = index
            .get(value)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default();
        ids.sort_by(|a, b| self.locations.get(a).cmp(&self.locations.get(b)));
        ids
    }

    /// 위치 순 (location, id) 순회
    pub fn iter(&self) -> impl Iterator<Item = (&str, NodeId)> {
        self.by_location.iter().map(|(l, id)| (l.as_str(), *id))
    }

    /// 위치 순 노드 목록
    pub fn ids(&self) -> Vec<NodeId> {
        self.by_location.values().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.by_location.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_location.is_empty()
    }
}

fn remove_from(index: &mut BTreeMap<String, BTreeSet<NodeId>>, key: &str, id: NodeId) {
    if let Some(set) = index.get_mut(key) {
        set.remove(&id);
        if set.is_empty() {
            index.remove(key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keys<'a>(location: &'a str, name: &'a str, resolved: Option<&'a str>) -> IndexKeys<'a> {
        IndexKeys {
            location,
            name,
            package_name: name,
            resolved,
        }
    }

    #[test]
    fn insert_and_query() {
        let mut inv = Inventory::default();
        inv.insert(NodeId(1), &keys("node_modules/a", "a", Some("https://r/a.tgz")));
        inv.insert(
            NodeId(2),
            &keys("node_modules/b/node_modules/a", "a", None),
        );
        inv.insert(NodeId(3), &keys("node_modules/b", "b", None));

        assert_eq!(inv.len(), 3);
        assert_eq!(inv.get("node_modules/b"), Some(NodeId(3)));
        assert_eq!(
            inv.query(QueryKey::Name, "a"),
            vec![NodeId(1), NodeId(2)]
        );
        assert_eq!(
            inv.query(QueryKey::Resolved, "https://r/a.tgz"),
            vec![NodeId(1)]
        );
        assert!(inv.query(QueryKey::PackageName, "zzz").is_empty());
    }

    #[test]
    fn remove_cleans_secondary_keys() {
        let mut inv = Inventory::default();
        let k = keys("node_modules/a", "a", Some("r"));
        inv.insert(NodeId(1), &k);
        inv.remove(NodeId(1), &k);
        assert!(inv.is_empty());
        assert!(!inv.contains(NodeId(1)));
        assert!(inv.query(QueryKey::Name, "a").is_empty());
        assert!(inv.query(QueryKey::Resolved, "r").is_empty());
    }

    #[test]
    fn set_resolved_moves_key() {
        let mut inv = Inventory::default();
        inv.insert(NodeId(1), &keys("node_modules/a", "a", Some("old")));
        inv.set_resolved(NodeId(1), Some("old"), Some("new"));
        assert!(inv.query(QueryKey::Resolved, "old").is_empty());
        assert_eq!(inv.query(QueryKey::Resolved, "new"), vec![NodeId(1)]);
    }
}
