//! 의존성 지정자(spec) 파싱 및 버전 선택
//!
//! npm 스타일 지정자를 [`Spec`]으로 분류합니다:
//! 정확한 버전, 범위(`^`, `~`, `x`, 하이픈, `||`), dist-tag, 별칭(`npm:name@range`),
//! 디렉토리(`file:dir`), tarball 파일, git, 원격 URL.
//!
//! 범위 비교는 `semver` 크레이트의 [`VersionReq`]를 사용합니다. npm 범위 문법과
//! `semver` 문법의 차이(공백 구분 비교자, 하이픈 범위, 기본 연산자)는
//! [`Range::parse`]가 변환합니다.

use std::fmt;

use semver::{Comparator, Op, Prerelease, Version, VersionReq};

use crate::error::ArboristError;
use crate::manifest::{Manifest, Packument};

/// 파싱된 의존성 지정자
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Spec {
    /// 의존성 이름 (트리 상의 키)
    pub name: String,
    /// 원본 지정자 문자열
    pub raw: String,
    /// 분류 결과
    pub kind: SpecKind,
}

/// 지정자 종류
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpecKind {
    /// 정확한 버전 (`1.2.3`)
    Version(Version),
    /// 버전 범위 (`^1.0.0`, `1.x || >=2.1 <3`)
    Range(Range),
    /// dist-tag (`latest`, `next`)
    Tag(String),
    /// 별칭 (`npm:real-name@^1`)
    Alias { name: String, sub: Box<Spec> },
    /// 로컬 디렉토리 (`file:../lib`, `./lib`)
    Directory(String),
    /// 로컬 tarball (`file:pkg.tgz`)
    File(String),
    /// git 저장소 (`git+https://…`, `github:u/r`, `u/r`)
    Git(String),
    /// 원격 tarball URL
    Remote(String),
}

impl Spec {
    /// 이름과 원본 문자열에서 지정자를 파싱합니다.
    ///
    /// 빈 문자열은 `*`로 취급합니다.
    pub fn parse(name: &str, raw: &str) -> Result<Self, ArboristError> {
        let trimmed = raw.trim();
        let kind = classify(name, trimmed)?;
        Ok(Self {
            name: name.to_owned(),
            raw: trimmed.to_owned(),
            kind,
        })
    }

    /// `name@spec` 형태의 설치 인자를 (이름, spec)으로 나눕니다.
    ///
    /// spec이 없으면 `latest` 태그를 반환합니다.
    pub fn split_arg(arg: &str) -> (String, String) {
        let arg = arg.trim();
        // 스코프 패키지의 선두 '@'는 구분자가 아님
        let search_from = usize::from(arg.starts_with('@'));
        match arg[search_from..].find('@') {
            Some(idx) => {
                let at = idx + search_from;
                let spec = &arg[at + 1..];
                let spec = if spec.is_empty() { "latest" } else { spec };
                (arg[..at].to_owned(), spec.to_owned())
            }
            None => (arg.to_owned(), "latest".to_owned()),
        }
    }

    /// 별칭이면 내부 지정자를, 아니면 자신을 반환합니다.
    pub fn target(&self) -> &Spec {
        match &self.kind {
            SpecKind::Alias { sub, .. } => sub,
            _ => self,
        }
    }

    /// 레지스트리에서 해석되는 지정자인지 반환합니다.
    pub fn is_registry(&self) -> bool {
        matches!(
            self.target().kind,
            SpecKind::Version(_) | SpecKind::Range(_) | SpecKind::Tag(_)
        )
    }

    /// 레지스트리에서 조회할 실제 패키지 이름
    pub fn registry_name(&self) -> &str {
        match &self.kind {
            SpecKind::Alias { name, .. } => name,
            _ => &self.name,
        }
    }

    /// 버전이 이 지정자를 만족하는지 반환합니다.
    ///
    /// 태그와 비레지스트리 지정자는 버전만으로 판단할 수 없으므로 false입니다.
    pub fn satisfied_by(&self, version: &Version) -> bool {
        match &self.target().kind {
            SpecKind::Version(v) => v == version,
            SpecKind::Range(r) => r.satisfied_by(version),
            _ => false,
        }
    }

    /// 다른 지정자와 공통으로 만족하는 버전이 있을 수 있는지 반환합니다.
    ///
    /// 범위가 아닌 지정자는 비교할 수 없으므로 항상 true입니다.
    pub fn intersects(&self, other: &Spec) -> bool {
        match (self.target().as_range(), other.target().as_range()) {
            (Some(a), Some(b)) => a.intersects(&b),
            _ => true,
        }
    }

    fn as_range(&self) -> Option<Range> {
        match &self.kind {
            SpecKind::Range(r) => Some(r.clone()),
            SpecKind::Version(v) => Range::parse(&v.to_string()).ok(),
            _ => None,
        }
    }
}

impl fmt::Display for Spec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.name, self.raw)
    }
}

fn classify(name: &str, raw: &str) -> Result<SpecKind, ArboristError> {
    if raw.is_empty() || raw == "*" {
        return Ok(SpecKind::Range(Range::any()));
    }

    if let Some(rest) = raw.strip_prefix("npm:") {
        let has_range = rest[usize::from(rest.starts_with('@'))..].contains('@');
        let (real, sub_raw) = Spec::split_arg(rest);
        let sub_raw = if has_range { sub_raw.as_str() } else { "*" };
        let sub = Spec::parse(&real, sub_raw)?;
        if matches!(sub.kind, SpecKind::Alias { .. }) || !sub.is_registry() {
            return Err(spec_err(name, raw, "alias must point at a registry spec"));
        }
        return Ok(SpecKind::Alias {
            name: real,
            sub: Box::new(sub),
        });
    }

    if let Some(path) = raw.strip_prefix("file:") {
        return Ok(local_kind(path));
    }
    if raw.starts_with("./")
        || raw.starts_with("../")
        || raw.starts_with('/')
        || raw.starts_with("~/")
        || raw == "."
        || raw == ".."
    {
        return Ok(local_kind(raw));
    }

    const GIT_PREFIXES: [&str; 8] = [
        "git+", "git://", "github:", "gitlab:", "bitbucket:", "gist:", "git@", "ssh://",
    ];
    if GIT_PREFIXES.iter().any(|p| raw.starts_with(p)) || is_github_shorthand(raw) {
        return Ok(SpecKind::Git(raw.to_owned()));
    }

    if raw.starts_with("http://") || raw.starts_with("https://") {
        return Ok(SpecKind::Remote(raw.to_owned()));
    }

    if let Some(v) = parse_version(raw)
        && !raw.contains(' ')
        && exact_version_text(raw)
    {
        return Ok(SpecKind::Version(v));
    }

    match Range::parse(raw) {
        Ok(range) => Ok(SpecKind::Range(range)),
        Err(reason) => {
            if is_valid_tag(raw) {
                Ok(SpecKind::Tag(raw.to_owned()))
            } else {
                Err(spec_err(name, raw, &reason))
            }
        }
    }
}

fn local_kind(path: &str) -> SpecKind {
    let lower = path.to_ascii_lowercase();
    if lower.ends_with(".tgz") || lower.ends_with(".tar.gz") || lower.ends_with(".tar") {
        SpecKind::File(path.to_owned())
    } else {
        SpecKind::Directory(path.to_owned())
    }
}

fn is_github_shorthand(raw: &str) -> bool {
    if raw.starts_with('@') {
        return false;
    }
    let repo = raw.split('#').next().unwrap_or(raw);
    let mut parts = repo.split('/');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(user), Some(project), None) => {
            let ok = |s: &str| {
                !s.is_empty()
                    && s
                        .chars()
                        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
            };
            ok(user) && ok(project)
        }
        _ => false,
    }
}

fn exact_version_text(raw: &str) -> bool {
    let body = raw.trim_start_matches('=').trim_start_matches('v');
    body.split(['-', '+'])
        .next()
        .is_some_and(|core| core.split('.').count() == 3 && core.split('.').all(|p| p.parse::<u64>().is_ok()))
}

fn is_valid_tag(raw: &str) -> bool {
    !raw.is_empty()
        && !raw.starts_with(|c: char| c.is_ascii_digit())
        && raw
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}

fn spec_err(name: &str, raw: &str, reason: &str) -> ArboristError {
    ArboristError::SpecParse {
        name: name.to_owned(),
        spec: raw.to_owned(),
        reason: reason.to_owned(),
    }
}

/// 버전 문자열을 관대하게 파싱합니다 (`v1.2.3`, `=1.2.3` 허용).
pub fn parse_version(s: &str) -> Option<Version> {
    let s = s.trim().trim_start_matches('=').trim_start_matches('v').trim();
    Version::parse(s).ok()
}

/// npm 버전 범위
///
/// `||`로 구분된 비교자 집합 중 하나라도 만족하면 범위를 만족합니다.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Range {
    raw: String,
    sets: Vec<VersionReq>,
}

impl Range {
    /// 모든 버전을 허용하는 범위 (`*`)
    pub fn any() -> Self {
        Self {
            raw: "*".to_owned(),
            sets: vec![VersionReq::STAR],
        }
    }

    /// npm 범위 문자열을 파싱합니다.
    pub fn parse(raw: &str) -> Result<Self, String> {
        let mut sets = Vec::new();
        for part in raw.split("||") {
            sets.push(parse_comparator_set(part.trim())?);
        }
        Ok(Self {
            raw: raw.trim().to_owned(),
            sets,
        })
    }

    /// 원본 문자열
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// 모든 버전을 허용하는지 반환합니다.
    pub fn is_any(&self) -> bool {
        self.sets.iter().any(|r| r.comparators.is_empty())
    }

    /// 버전이 범위를 만족하는지 반환합니다.
    pub fn satisfied_by(&self, version: &Version) -> bool {
        self.sets.iter().any(|req| req.matches(version))
    }

    /// 두 범위가 공통 버전을 가질 수 있는지 반환합니다.
    ///
    /// 각 비교자의 경계 버전을 후보로 삼아 양쪽을 동시에 만족하는
    /// 후보가 있는지 확인합니다.
    pub fn intersects(&self, other: &Range) -> bool {
        if self.is_any() || other.is_any() {
            return true;
        }
        let mut candidates = vec![Version::new(0, 0, 0)];
        for req in self.sets.iter().chain(other.sets.iter()) {
            for cmp in &req.comparators {
                candidates.extend(boundary_candidates(cmp));
            }
        }
        candidates
            .iter()
            .any(|v| self.satisfied_by(v) && other.satisfied_by(v))
    }

    /// 만족하는 버전 중 가장 높은 것을 고릅니다.
    pub fn max_satisfying<'a, I>(&self, versions: I) -> Option<&'a Version>
    where
        I: IntoIterator<Item = &'a Version>,
    {
        versions
            .into_iter()
            .filter(|v| self.satisfied_by(v))
            .max()
    }
}

impl fmt::Display for Range {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

fn parse_comparator_set(part: &str) -> Result<VersionReq, String> {
    if part.is_empty() {
        return Ok(VersionReq::STAR);
    }

    // 하이픈 범위: "a - b" → ">=a, <=b"
    if let Some((lo, hi)) = part.split_once(" - ") {
        let lo = normalize_comparator(&format!(">={}", lo.trim()));
        let hi = normalize_comparator(&format!("<={}", hi.trim()));
        let joined: Vec<String> = [lo, hi].into_iter().flatten().collect();
        return build_req(&joined, part);
    }

    // 연산자와 버전 사이의 공백을 합침 (">= 1.2.3")
    let mut tokens: Vec<String> = Vec::new();
    let mut pending_op: Option<String> = None;
    for tok in part.split_whitespace() {
        if tok.chars().all(|c| matches!(c, '<' | '>' | '=' | '~' | '^')) {
            pending_op = Some(tok.to_owned());
            continue;
        }
        match pending_op.take() {
            Some(op) => tokens.push(format!("{op}{tok}")),
            None => tokens.push(tok.to_owned()),
        }
    }
    if let Some(op) = pending_op {
        return Err(format!("dangling operator '{op}'"));
    }

    let normalized: Vec<String> = tokens
        .iter()
        .filter_map(|t| normalize_comparator(t))
        .collect();
    build_req(&normalized, part)
}

fn build_req(comparators: &[String], original: &str) -> Result<VersionReq, String> {
    if comparators.is_empty() {
        return Ok(VersionReq::STAR);
    }
    VersionReq::parse(&comparators.join(", "))
        .map_err(|e| format!("invalid range '{original}': {e}"))
}

/// npm 비교자 하나를 `semver` 비교자 문법으로 바꿉니다.
///
/// 와일드카드만 남는 비교자(`*`, `x`, `>=*`)는 `None`을 반환합니다.
fn normalize_comparator(token: &str) -> Option<String> {
    const OPS: [&str; 9] = [">=", "<=", "~>", "~=", ">", "<", "=", "~", "^"];
    let (op, rest) = OPS
        .iter()
        .find_map(|op| token.strip_prefix(op).map(|rest| (*op, rest)))
        .unwrap_or(("", token));
    let rest = rest.trim_start_matches(['v', 'V', '=']).trim();

    let (core, tail) = match rest.find(['-', '+']) {
        Some(idx) => (&rest[..idx], &rest[idx..]),
        None => (rest, ""),
    };
    let parts: Vec<&str> = core.split('.').collect();
    let kept: Vec<&str> = parts
        .iter()
        .take_while(|p| !matches!(**p, "x" | "X" | "*" | ""))
        .copied()
        .collect();
    if kept.is_empty() {
        return None;
    }

    let mut version = kept.join(".");
    if kept.len() == parts.len() {
        version.push_str(tail);
    }
    let op = match op {
        "" => "=",
        "~>" | "~=" => "~",
        other => other,
    };
    Some(format!("{op}{version}"))
}

fn boundary_candidates(cmp: &Comparator) -> Vec<Version> {
    let minor = cmp.minor.unwrap_or(0);
    let patch = cmp.patch.unwrap_or(0);
    let mut base = Version::new(cmp.major, minor, patch);
    let mut out = Vec::with_capacity(4);
    if cmp.pre != Prerelease::EMPTY {
        let mut pre = base.clone();
        pre.pre = cmp.pre.clone();
        out.push(pre);
    }
    out.push(base.clone());
    match cmp.op {
        Op::Greater => {
            // 부분 버전은 다음 자리를 올린 값이 하한
            if cmp.minor.is_none() {
                out.push(Version::new(cmp.major + 1, 0, 0));
            } else if cmp.patch.is_none() {
                out.push(Version::new(cmp.major, minor + 1, 0));
            } else {
                out.push(Version::new(cmp.major, minor, patch + 1));
            }
        }
        Op::Less => {
            if patch > 0 {
                out.push(Version::new(cmp.major, minor, patch - 1));
            } else if minor > 0 {
                out.push(Version::new(cmp.major, minor - 1, u64::MAX));
            } else if cmp.major > 0 {
                out.push(Version::new(cmp.major - 1, u64::MAX, u64::MAX));
            }
        }
        _ => {
            base.patch = base.patch.saturating_add(1);
            out.push(base);
        }
    }
    out
}

/// packument에서 지정자에 맞는 매니페스트를 고릅니다.
///
/// - 태그: `dist-tags`가 가리키는 버전
/// - 정확한 버전: 해당 버전
/// - 범위: `latest`가 범위를 만족하면 그것, 아니면 deprecated가 아닌
///   버전 중 가장 높은 것 (모두 deprecated면 그중 가장 높은 것)
pub fn pick_version<'a>(packument: &'a Packument, spec: &Spec) -> Option<&'a Manifest> {
    pick_version_avoiding(packument, spec, None)
}

/// `avoid` 범위에 들지 않는 버전을 우선으로 고릅니다.
///
/// 피할 수 없으면 일반 선택 결과를 반환합니다.
pub fn pick_version_avoiding<'a>(
    packument: &'a Packument,
    spec: &Spec,
    avoid: Option<&Range>,
) -> Option<&'a Manifest> {
    let picked = pick_unfiltered(packument, spec)?;
    let Some(avoid) = avoid else {
        return Some(picked);
    };
    let avoided = |m: &Manifest| m.parsed_version().is_some_and(|v| avoid.satisfied_by(&v));
    if !avoided(picked) {
        return Some(picked);
    }
    let SpecKind::Range(range) = &spec.target().kind else {
        return Some(picked);
    };
    packument
        .versions
        .values()
        .filter(|m| !avoided(m))
        .filter_map(|m| m.parsed_version().map(|v| (m, v)))
        .filter(|(_, v)| range.satisfied_by(v))
        .max_by(|(_, va), (_, vb)| va.cmp(vb))
        .map(|(m, _)| m)
        .or(Some(picked))
}

fn pick_unfiltered<'a>(packument: &'a Packument, spec: &Spec) -> Option<&'a Manifest> {
    let target = spec.target();
    match &target.kind {
        SpecKind::Tag(tag) => packument
            .dist_tags
            .get(tag)
            .and_then(|v| packument.versions.get(v)),
        SpecKind::Version(wanted) => packument
            .versions
            .values()
            .find(|m| m.parsed_version().as_ref() == Some(wanted)),
        SpecKind::Range(range) => {
            if let Some(latest) = packument.latest()
                && let Some(v) = latest.parsed_version()
                && range.satisfied_by(&v)
            {
                return Some(latest);
            }
            packument
                .versions
                .values()
                .filter_map(|m| m.parsed_version().map(|v| (m, v)))
                .filter(|(_, v)| range.satisfied_by(v))
                .max_by(|(ma, va), (mb, vb)| {
                    let live_a = ma.deprecated.is_none();
                    let live_b = mb.deprecated.is_none();
                    live_a.cmp(&live_b).then_with(|| va.cmp(vb))
                })
                .map(|(m, _)| m)
        }
        _ => None,
    }
}
