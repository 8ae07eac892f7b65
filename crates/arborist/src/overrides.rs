//! Override 규칙 해석
//!
//! 루트 `package.json`의 `overrides` 필드를 의존성 중첩 구조를 따르는 규칙 트리로
//! 파싱합니다. 규칙은 arena([`OverrideSet`])에 저장되고 [`OverrideId`] 핸들로
//! 참조됩니다.
//!
//! ```json
//! {
//!   "overrides": {
//!     "foo": "1.0.0",
//!     "bar@^2": { ".": "2.1.0", "baz": "3.0.0" },
//!     "qux": "$qux"
//!   }
//! }
//! ```
//!
//! 조회는 노드의 규칙 위치에서 시작해 부모 규칙 방향으로 올라가며,
//! 같은 단계에서는 키 spec이 명시된 규칙이 와일드카드(`*`)보다 우선합니다.

use semver::Version;
use serde_json::Value;

use crate::error::ArboristError;
use crate::graph::Tree;
use crate::manifest::Manifest;
use crate::spec::Spec;

/// override 규칙 핸들
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OverrideId(usize);

/// override 규칙 하나
#[derive(Debug, Clone)]
pub struct OverrideRule {
    /// 원본 키 (`bar@^2`)
    pub key: String,
    /// 대상 패키지 이름
    pub name: String,
    /// 키 spec (`^2`, 없으면 `*`)
    pub key_spec: String,
    /// 강제할 spec (`$name` 참조는 파싱 시 해석됨)
    pub value: Option<String>,
    parent: Option<OverrideId>,
    children: Vec<OverrideId>,
}

/// override 규칙 arena
#[derive(Debug, Clone)]
pub struct OverrideSet {
    rules: Vec<OverrideRule>,
}

impl Default for OverrideSet {
    fn default() -> Self {
        Self::empty()
    }
}

impl OverrideSet {
    /// 루트 규칙만 있는 빈 집합
    pub fn empty() -> Self {
        Self {
            rules: vec![OverrideRule {
                key: String::new(),
                name: String::new(),
                key_spec: "*".to_owned(),
                value: None,
                parent: None,
                children: Vec::new(),
            }],
        }
    }

    /// 루트 매니페스트의 `overrides` 필드에서 규칙을 만듭니다.
    ///
    /// `$name` 값이 루트 의존성에서 해석되지 않거나 형식이 잘못되면
    /// `ConfigInvalid`를 반환합니다.
    pub fn from_manifest(root: &Manifest) -> Result<Self, ArboristError> {
        let mut set = Self::empty();
        match &root.overrides {
            None => {}
            Some(Value::Object(map)) => set.add_children(set.root(), map, root)?,
            Some(other) => {
                return Err(ArboristError::ConfigInvalid(format!(
                    "overrides must be an object, got {other}"
                )));
            }
        }
        Ok(set)
    }

    fn add_children(
        &mut self,
        parent: OverrideId,
        map: &serde_json::Map<String, Value>,
        root: &Manifest,
    ) -> Result<(), ArboristError> {
        for (key, value) in map {
            if key == "." {
                continue;
            }
            let (name, key_spec) = split_key(key);
            if Spec::parse(&name, &key_spec).is_err() {
                return Err(ArboristError::ConfigInvalid(format!(
                    "override key '{key}' has an invalid spec"
                )));
            }
            let (own_value, nested) = match value {
                Value::String(s) => (Some(resolve_reference(s, root)?), None),
                Value::Object(obj) => {
                    let own = match obj.get(".") {
                        Some(Value::String(s)) => Some(resolve_reference(s, root)?),
                        Some(_) => {
                            return Err(ArboristError::ConfigInvalid(format!(
                                "override '{key}.' must be a string"
                            )));
                        }
                        None => None,
                    };
                    (own, Some(obj))
                }
                _ => {
                    return Err(ArboristError::ConfigInvalid(format!(
                        "override '{key}' must be a string or an object"
                    )));
                }
            };

            let id = OverrideId(self.rules.len());
            self.rules.push(OverrideRule {
                key: key.clone(),
                name,
                key_spec,
                value: own_value,
                parent: Some(parent),
                children: Vec::new(),
            });
            self.rules[parent.0].children.push(id);
            if let Some(obj) = nested {
                self.add_children(id, obj, root)?;
            }
        }
        Ok(())
    }

    /// 루트 규칙 핸들
    pub fn root(&self) -> OverrideId {
        OverrideId(0)
    }

    /// 규칙이 하나도 없는지 반환합니다.
    pub fn is_empty(&self) -> bool {
        self.rules.len() == 1
    }

    /// 규칙을 조회합니다.
    pub fn rule(&self, id: OverrideId) -> &OverrideRule {
        &self.rules[id.0]
    }

    /// 자신부터 루트까지의 규칙 체인
    pub fn ancestry(&self, id: OverrideId) -> impl Iterator<Item = OverrideId> + '_ {
        std::iter::successors(Some(id), move |cur| self.rules[cur.0].parent)
    }

    /// 엣지에 적용할 규칙을 찾습니다.
    ///
    /// 가장 가까운 단계부터 올라가며, 같은 단계에서는
    /// 키 spec이 엣지 spec과 교차하는 규칙, 와일드카드 규칙,
    /// 단계 자신의 순서로 검사합니다. 일치하는 규칙이 없으면 `scope`를 그대로 반환합니다.
    pub fn edge_rule(&self, scope: OverrideId, name: &str, raw_spec: &str) -> OverrideId {
        self.find_rule(scope, name, |key_spec| {
            let (Ok(edge), Ok(key)) = (Spec::parse(name, raw_spec), Spec::parse(name, key_spec))
            else {
                return false;
            };
            edge.intersects(&key)
        })
        .unwrap_or(scope)
    }

    /// 노드에 적용할 규칙을 찾습니다. 키 spec은 노드 버전으로 검사합니다.
    pub fn node_rule(
        &self,
        scope: OverrideId,
        name: &str,
        version: Option<&Version>,
    ) -> OverrideId {
        self.find_rule(scope, name, |key_spec| {
            let Some(version) = version else {
                return false;
            };
            Spec::parse(name, key_spec).is_ok_and(|key| key.satisfied_by(version))
        })
        .unwrap_or(scope)
    }

    fn find_rule<F>(&self, scope: OverrideId, name: &str, key_matches: F) -> Option<OverrideId>
    where
        F: Fn(&str) -> bool,
    {
        for level in self.ancestry(scope) {
            let rule = &self.rules[level.0];
            let named = rule
                .children
                .iter()
                .copied()
                .filter(|c| self.rules[c.0].name == name);

            let mut wildcard = None;
            for child in named {
                let key_spec = &self.rules[child.0].key_spec;
                if key_spec == "*" {
                    wildcard.get_or_insert(child);
                } else if key_matches(key_spec) {
                    return Some(child);
                }
            }
            if wildcard.is_some() {
                return wildcard;
            }
            // 규칙은 같은 이름의 하위 의존성에도 적용됨
            if level != self.root()
                && rule.name == name
                && (rule.key_spec == "*" || key_matches(&rule.key_spec))
            {
                return Some(level);
            }
        }
        None
    }

    /// 규칙이 엣지 이름에 대해 강제하는 spec을 반환합니다. 없으면 원본 spec.
    pub fn effective_spec(&self, rule: OverrideId, name: &str, raw_spec: &str) -> String {
        let rule = &self.rules[rule.0];
        match &rule.value {
            Some(value) if rule.name == name && value != "*" && !value.is_empty() => {
                value.clone()
            }
            _ => raw_spec.to_owned(),
        }
    }
}

fn split_key(key: &str) -> (String, String) {
    let search_from = usize::from(key.starts_with('@'));
    match key[search_from..].find('@') {
        Some(idx) => {
            let at = idx + search_from;
            let spec = &key[at + 1..];
            let spec = if spec.is_empty() { "*" } else { spec };
            (key[..at].to_owned(), spec.to_owned())
        }
        None => (key.to_owned(), "*".to_owned()),
    }
}

fn resolve_reference(value: &str, root: &Manifest) -> Result<String, ArboristError> {
    match value.strip_prefix('$') {
        Some(reference) => root
            .declared_spec(reference)
            .map(str::to_owned)
            .ok_or_else(|| {
                ArboristError::ConfigInvalid(format!(
                    "unable to resolve reference ${reference}: not a direct dependency"
                ))
            }),
        None => Ok(value.to_owned()),
    }
}

/// 루트의 직접 의존성과 충돌하는 override가 있는지 검사합니다.
///
/// 루트가 직접 선언한 의존성에 다른 spec을 강제하는 override는
/// 엣지 단위 문제가 아니라 설정 오류입니다.
pub fn assert_root_overrides(tree: &Tree) -> Result<(), ArboristError> {
    if tree.overrides.is_empty() {
        return Ok(());
    }
    let root = tree.root();
    for eid in tree.node(root).edges_out().values() {
        let edge = tree.edge(*eid);
        if edge.spec() != edge.raw_spec() {
            return Err(ArboristError::ConfigInvalid(format!(
                "override for {}@{} conflicts with direct dependency (override spec {})",
                edge.name(),
                edge.raw_spec(),
                edge.spec()
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manifest(overrides: &str) -> Manifest {
        let json = format!(
            r#"{{"name":"root","version":"1.0.0","dependencies":{{"qux":"^4.0.0"}},"overrides":{overrides}}}"#
        );
        Manifest::from_json("package.json", &json).unwrap()
    }

    #[test]
    fn parses_flat_and_nested_rules() {
        let set = OverrideSet::from_manifest(&manifest(
            r#"{"foo":"1.0.0","bar@^2":{".":"2.1.0","baz":"3.0.0"}}"#,
        ))
        .unwrap();
        assert!(!set.is_empty());

        let root = set.root();
        let foo = set.edge_rule(root, "foo", "^1.2.0");
        assert_eq!(set.rule(foo).value.as_deref(), Some("1.0.0"));
        assert_eq!(set.effective_spec(foo, "foo", "^1.2.0"), "1.0.0");

        let bar = set.edge_rule(root, "bar", "^2.0.0");
        assert_eq!(set.rule(bar).key_spec, "^2");
        assert_eq!(set.effective_spec(bar, "bar", "^2.0.0"), "2.1.0");

        // bar 범위와 교차하지 않으면 적용되지 않음
        let bar1 = set.edge_rule(root, "bar", "^1.0.0");
        assert_eq!(bar1, root);

        // 중첩 규칙은 bar 아래에서만 보임
        let baz_under_bar = set.edge_rule(bar, "baz", "^1.0.0");
        assert_eq!(set.effective_spec(baz_under_bar, "baz", "^1.0.0"), "3.0.0");
        let baz_at_root = set.edge_rule(root, "baz", "^1.0.0");
        assert_eq!(set.effective_spec(baz_at_root, "baz", "^1.0.0"), "^1.0.0");
    }

    #[test]
    fn exact_key_beats_wildcard_at_same_level() {
        let set = OverrideSet::from_manifest(&manifest(
            r#"{"dep":"1.0.0","dep@^2":"2.5.0"}"#,
        ))
        .unwrap();
        let rule = set.edge_rule(set.root(), "dep", "^2.1.0");
        assert_eq!(set.effective_spec(rule, "dep", "^2.1.0"), "2.5.0");
        let rule = set.edge_rule(set.root(), "dep", "^3.0.0");
        assert_eq!(set.effective_spec(rule, "dep", "^3.0.0"), "1.0.0");
    }

    #[test]
    fn nearer_level_beats_inherited_rule() {
        let set = OverrideSet::from_manifest(&manifest(
            r#"{"baz":"1.0.0","bar":{"baz":"2.0.0"}}"#,
        ))
        .unwrap();
        let bar = set.edge_rule(set.root(), "bar", "*");
        let rule = set.edge_rule(bar, "baz", "^1");
        assert_eq!(set.effective_spec(rule, "baz", "^1"), "2.0.0");
    }

    #[test]
    fn reference_resolves_to_root_spec() {
        let set = OverrideSet::from_manifest(&manifest(r#"{"qux":"$qux"}"#)).unwrap();
        let rule = set.edge_rule(set.root(), "qux", "^3.0.0");
        assert_eq!(set.effective_spec(rule, "qux", "^3.0.0"), "^4.0.0");
    }

    #[test]
    fn unresolvable_reference_is_config_invalid() {
        let err = OverrideSet::from_manifest(&manifest(r#"{"nope":"$nope"}"#)).unwrap_err();
        assert!(matches!(err, ArboristError::ConfigInvalid(_)));
    }

    #[test]
    fn non_object_overrides_rejected() {
        let err = OverrideSet::from_manifest(&manifest(r#"["foo"]"#)).unwrap_err();
        assert!(matches!(err, ArboristError::ConfigInvalid(_)));
    }

    #[test]
    fn node_rule_matches_by_version() {
        let set = OverrideSet::from_manifest(&manifest(
            r#"{"bar@^2":{"baz":"3.0.0"}}"#,
        ))
        .unwrap();
        let v2 = Version::parse("2.3.0").unwrap();
        let v1 = Version::parse("1.0.0").unwrap();
        let hit = set.node_rule(set.root(), "bar", Some(&v2));
        assert_eq!(set.rule(hit).key, "bar@^2");
        let miss = set.node_rule(set.root(), "bar", Some(&v1));
        assert_eq!(miss, set.root());
    }

    #[test]
    fn split_key_handles_scopes() {
        assert_eq!(split_key("@s/pkg@^1"), ("@s/pkg".to_owned(), "^1".to_owned()));
        assert_eq!(split_key("@s/pkg"), ("@s/pkg".to_owned(), "*".to_owned()));
        assert_eq!(split_key("pkg"), ("pkg".to_owned(), "*".to_owned()));
    }
}
