//! 패키지 매니페스트 모델
//!
//! [`Manifest`]는 `package.json`에서 해석에 필요한 필드만 타입으로 꺼내고,
//! 나머지 필드는 `extra`에 그대로 보존하여 저장 시 손실이 없도록 합니다.
//! [`Packument`]는 레지스트리가 패키지 이름 하나에 대해 돌려주는 전체 버전 문서입니다.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use grove_core::types::DepType;

use crate::error::ArboristError;
use crate::spec;

/// lockfile 및 매니페스트 파일 최대 크기 (바이트)
pub const MAX_MANIFEST_SIZE: usize = 16 * 1024 * 1024;

/// 스크립트 실행이 필요한 라이프사이클 이벤트 (실행 순서)
pub const INSTALL_EVENTS: [&str; 3] = ["preinstall", "install", "postinstall"];

/// `package.json` 모델
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub version: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub dependencies: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub dev_dependencies: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub optional_dependencies: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub peer_dependencies: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub peer_dependencies_meta: BTreeMap<String, PeerMeta>,
    /// 해당 이름에 대해 추가로 허용하는 spec
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub accept_dependencies: BTreeMap<String, String>,
    #[serde(
        default,
        alias = "bundledDependencies",
        skip_serializing_if = "Option::is_none"
    )]
    pub bundle_dependencies: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bin: Option<Value>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub scripts: BTreeMap<String, String>,
    #[serde(
        default,
        deserialize_with = "lenient_workspaces",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub workspaces: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub overrides: Option<Value>,
    #[serde(
        default,
        deserialize_with = "lenient_string_map",
        skip_serializing_if = "BTreeMap::is_empty"
    )]
    pub engines: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub license: Option<String>,
    #[serde(
        default,
        deserialize_with = "lenient_deprecated",
        skip_serializing_if = "Option::is_none"
    )]
    pub deprecated: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dist: Option<Dist>,
    /// 모델링하지 않은 나머지 필드
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

/// `peerDependenciesMeta` 항목
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerMeta {
    #[serde(default)]
    pub optional: bool,
}

/// 레지스트리 배포 정보
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dist {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tarball: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub integrity: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shasum: Option<String>,
}

/// 선언된 의존성 하나
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Declaration {
    pub name: String,
    pub spec: String,
    pub dep_type: DepType,
    pub accept: Option<String>,
}

impl Manifest {
    /// JSON 문자열에서 매니페스트를 파싱합니다.
    ///
    /// `origin`은 에러 메시지에 표시할 경로입니다.
    pub fn from_json(origin: &str, content: &str) -> Result<Self, ArboristError> {
        if content.len() > MAX_MANIFEST_SIZE {
            return Err(ArboristError::ManifestParse {
                path: origin.to_owned(),
                reason: format!("file too large: {} bytes", content.len()),
            });
        }
        serde_json::from_str(content).map_err(|e| ArboristError::ManifestParse {
            path: origin.to_owned(),
            reason: e.to_string(),
        })
    }

    /// 디렉토리의 `package.json`을 읽습니다.
    pub async fn load(dir: &Path) -> Result<Self, ArboristError> {
        let path = dir.join("package.json");
        let content = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| ArboristError::io(&path, e))?;
        Self::from_json(&path.display().to_string(), &content)
    }

    /// `package.json` 형식(2칸 들여쓰기, 끝 개행)으로 직렬화합니다.
    pub fn to_json_pretty(&self) -> Result<String, ArboristError> {
        let mut out = serde_json::to_string_pretty(self).map_err(|e| {
            ArboristError::ManifestParse {
                path: self.name.clone(),
                reason: e.to_string(),
            }
        })?;
        out.push('\n');
        Ok(out)
    }

    /// 디렉토리에 `package.json`을 씁니다.
    pub async fn save(&self, dir: &Path) -> Result<(), ArboristError> {
        let path = dir.join("package.json");
        let content = self.to_json_pretty()?;
        tokio::fs::write(&path, content)
            .await
            .map_err(|e| ArboristError::io(&path, e))
    }

    /// `name@version` 식별자
    pub fn id(&self) -> String {
        format!("{}@{}", self.name, self.version)
    }

    /// 버전을 semver로 파싱합니다.
    pub fn parsed_version(&self) -> Option<semver::Version> {
        spec::parse_version(&self.version)
    }

    /// 설치 라이프사이클 스크립트가 있는지 반환합니다.
    pub fn has_install_script(&self) -> bool {
        INSTALL_EVENTS.iter().any(|e| self.scripts.contains_key(*e))
    }

    /// 선언된 의존성을 엣지 생성 순서대로 반환합니다.
    ///
    /// 같은 이름이 여러 필드에 있으면 뒤의 것이 이깁니다:
    /// peer → prod → optional → dev(top 노드만).
    pub fn declarations(&self, is_top: bool, legacy_peer_deps: bool) -> Vec<Declaration> {
        let mut out: BTreeMap<String, Declaration> = BTreeMap::new();
        let mut push = |name: &str, spec: &str, dep_type: DepType| {
            out.insert(
                name.to_owned(),
                Declaration {
                    name: name.to_owned(),
                    spec: spec.to_owned(),
                    dep_type,
                    accept: self.accept_dependencies.get(name).cloned(),
                },
            );
        };

        if !legacy_peer_deps {
            for (name, spec) in &self.peer_dependencies {
                let optional = self
                    .peer_dependencies_meta
                    .get(name)
                    .is_some_and(|m| m.optional);
                let dep_type = if optional {
                    DepType::PeerOptional
                } else {
                    DepType::Peer
                };
                push(name, spec, dep_type);
            }
        }
        for (name, spec) in &self.dependencies {
            push(name, spec, DepType::Prod);
        }
        for (name, spec) in &self.optional_dependencies {
            push(name, spec, DepType::Optional);
        }
        if is_top {
            for (name, spec) in &self.dev_dependencies {
                push(name, spec, DepType::Dev);
            }
        }
        out.into_values().collect()
    }

    /// 루트가 선언한 spec을 찾습니다 (override `$name` 참조용).
    pub fn declared_spec(&self, name: &str) -> Option<&str> {
        self.dependencies
            .get(name)
            .or_else(|| self.dev_dependencies.get(name))
            .or_else(|| self.optional_dependencies.get(name))
            .or_else(|| self.peer_dependencies.get(name))
            .map(String::as_str)
    }

    /// 의존성을 지정한 종류로 저장합니다. 다른 필드의 같은 이름은 제거합니다.
    pub fn set_dependency(&mut self, name: &str, spec: &str, dep_type: DepType) {
        self.remove_dependency(name);
        let target = match dep_type {
            DepType::Dev => &mut self.dev_dependencies,
            DepType::Optional => &mut self.optional_dependencies,
            DepType::Peer | DepType::PeerOptional => &mut self.peer_dependencies,
            DepType::Prod | DepType::Workspace => &mut self.dependencies,
        };
        target.insert(name.to_owned(), spec.to_owned());
        if dep_type == DepType::PeerOptional {
            self.peer_dependencies_meta
                .insert(name.to_owned(), PeerMeta { optional: true });
        }
    }

    /// 모든 의존성 필드에서 이름을 제거합니다. 제거된 것이 있으면 true.
    pub fn remove_dependency(&mut self, name: &str) -> bool {
        let mut removed = false;
        for map in [
            &mut self.dependencies,
            &mut self.dev_dependencies,
            &mut self.optional_dependencies,
            &mut self.peer_dependencies,
        ] {
            removed |= map.remove(name).is_some();
        }
        self.peer_dependencies_meta.remove(name);
        removed
    }

    /// `name`이 어느 필드에 선언되었는지 반환합니다.
    pub fn declared_type(&self, name: &str) -> Option<DepType> {
        if self.dev_dependencies.contains_key(name) {
            Some(DepType::Dev)
        } else if self.optional_dependencies.contains_key(name) {
            Some(DepType::Optional)
        } else if self.dependencies.contains_key(name) {
            Some(DepType::Prod)
        } else if self.peer_dependencies.contains_key(name) {
            Some(DepType::Peer)
        } else {
            None
        }
    }
}

/// 레지스트리 패키지 문서
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Packument {
    pub name: String,
    #[serde(default, rename = "dist-tags")]
    pub dist_tags: BTreeMap<String, String>,
    #[serde(default)]
    pub versions: BTreeMap<String, Manifest>,
}

impl Packument {
    /// JSON 문자열에서 packument를 파싱합니다.
    pub fn from_json(origin: &str, content: &str) -> Result<Self, ArboristError> {
        serde_json::from_str(content).map_err(|e| ArboristError::ManifestParse {
            path: origin.to_owned(),
            reason: e.to_string(),
        })
    }

    /// `latest` 태그가 가리키는 매니페스트
    pub fn latest(&self) -> Option<&Manifest> {
        self.dist_tags
            .get("latest")
            .and_then(|v| self.versions.get(v))
    }
}

fn lenient_workspaces<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    let list = match value {
        Value::Array(items) => items,
        Value::Object(mut map) => match map.remove("packages") {
            Some(Value::Array(items)) => items,
            _ => Vec::new(),
        },
        _ => Vec::new(),
    };
    Ok(list
        .into_iter()
        .filter_map(|v| v.as_str().map(str::to_owned))
        .collect())
}

fn lenient_string_map<'de, D>(deserializer: D) -> Result<BTreeMap<String, String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(match value {
        Value::Object(map) => map
            .into_iter()
            .filter_map(|(k, v)| v.as_str().map(|s| (k, s.to_owned())))
            .collect(),
        _ => BTreeMap::new(),
    })
}

fn lenient_deprecated<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(match value {
        Value::String(s) if !s.is_empty() => Some(s),
        _ => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const PKG: &str = r#"{
  "name": "app",
  "version": "1.0.0",
  "private": true,
  "dependencies": { "a": "^1.0.0", "b": "~2.1.0" },
  "devDependencies": { "b": "^2.0.0", "jest": "*" },
  "optionalDependencies": { "fsevents": "^2.0.0" },
  "peerDependencies": { "react": ">=17", "react-dom": ">=17" },
  "peerDependenciesMeta": { "react-dom": { "optional": true } },
  "workspaces": { "packages": ["packages/*"] },
  "engines": { "node": ">=18" },
  "scripts": { "postinstall": "node setup.js", "test": "jest" }
}"#;

    #[test]
    fn parses_known_and_extra_fields() {
        let m = Manifest::from_json("package.json", PKG).unwrap();
        assert_eq!(m.name, "app");
        assert_eq!(m.dependencies.len(), 2);
        assert_eq!(m.workspaces, vec!["packages/*"]);
        assert_eq!(m.engines.get("node").map(String::as_str), Some(">=18"));
        assert_eq!(m.extra.get("private"), Some(&Value::Bool(true)));
        assert!(m.has_install_script());
    }

    #[test]
    fn declarations_follow_override_order() {
        let m = Manifest::from_json("package.json", PKG).unwrap();
        let decls = m.declarations(true, false);
        let find = |n: &str| decls.iter().find(|d| d.name == n).map(|d| d.dep_type);
        // dev 가 prod 를 덮어씀
        assert_eq!(find("b"), Some(DepType::Dev));
        assert_eq!(find("fsevents"), Some(DepType::Optional));
        assert_eq!(find("react"), Some(DepType::Peer));
        assert_eq!(find("react-dom"), Some(DepType::PeerOptional));
    }

    #[test]
    fn declarations_skip_dev_for_non_top() {
        let m = Manifest::from_json("package.json", PKG).unwrap();
        let decls = m.declarations(false, false);
        assert!(decls.iter().all(|d| d.name != "jest"));
        let b = decls.iter().find(|d| d.name == "b").unwrap();
        assert_eq!(b.dep_type, DepType::Prod);
        assert_eq!(b.spec, "~2.1.0");
    }

    #[test]
    fn declarations_skip_peers_in_legacy_mode() {
        let m = Manifest::from_json("package.json", PKG).unwrap();
        let decls = m.declarations(true, true);
        assert!(decls.iter().all(|d| !d.dep_type.is_peer()));
    }

    #[test]
    fn set_and_remove_dependency() {
        let mut m = Manifest::from_json("package.json", PKG).unwrap();
        m.set_dependency("a", "^1.5.0", DepType::Dev);
        assert!(!m.dependencies.contains_key("a"));
        assert_eq!(m.dev_dependencies.get("a").map(String::as_str), Some("^1.5.0"));
        assert_eq!(m.declared_type("a"), Some(DepType::Dev));
        assert!(m.remove_dependency("a"));
        assert!(!m.remove_dependency("a"));
        assert_eq!(m.declared_type("a"), None);
    }

    #[test]
    fn lenient_fields_accept_odd_shapes() {
        let json = r#"{"name":"x","version":"1.0.0","engines":["node"],"deprecated":false,"workspaces":["a","b"]}"#;
        let m = Manifest::from_json("x", json).unwrap();
        assert!(m.engines.is_empty());
        assert!(m.deprecated.is_none());
        assert_eq!(m.workspaces.len(), 2);
    }

    #[test]
    fn pretty_output_preserves_extra_fields() {
        let m = Manifest::from_json("package.json", PKG).unwrap();
        let out = m.to_json_pretty().unwrap();
        assert!(out.ends_with('\n'));
        let back = Manifest::from_json("package.json", &out).unwrap();
        assert_eq!(back, m);
    }

    #[test]
    fn invalid_json_is_manifest_parse_error() {
        let err = Manifest::from_json("broken/package.json", "{ nope").unwrap_err();
        assert!(matches!(err, ArboristError::ManifestParse { .. }));
        assert!(err.to_string().contains("broken/package.json"));
    }

    #[test]
    fn packument_latest() {
        let json = r#"{
            "name": "dep",
            "dist-tags": { "latest": "1.2.0" },
            "versions": {
                "1.0.0": { "name": "dep", "version": "1.0.0" },
                "1.2.0": { "name": "dep", "version": "1.2.0" }
            }
        }"#;
        let p = Packument::from_json("dep", json).unwrap();
        assert_eq!(p.latest().map(|m| m.version.as_str()), Some("1.2.0"));
    }
}
