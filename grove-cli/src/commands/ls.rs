//! `grove ls` command handler

use std::collections::BTreeSet;
use std::io::Write;

use serde::Serialize;
use tracing::info;

use grove_arborist::{DepError, EdgeId, NodeId, Tree};

use crate::cli::LsArgs;
use crate::commands::Context;
use crate::error::CliError;
use crate::output::{OutputWriter, Render};

/// Execute the `ls` command against the tree on disk.
pub async fn execute(args: LsArgs, ctx: &Context, writer: &OutputWriter) -> Result<(), CliError> {
    let arborist = ctx.arborist()?;
    let tree = arborist.load_actual().await?;
    info!(path = %ctx.project_path().display(), all = args.all, "listing tree");

    let report = LsReport::from_tree(&tree, args.all);
    writer.render(&report)?;

    let broken = report.count_flag("missing") + report.count_flag("invalid");
    if broken > 0 {
        return Err(CliError::Incomplete(format!(
            "{broken} missing or invalid dependencies"
        )));
    }
    Ok(())
}

/// Logical dependency listing rooted at the project.
#[derive(Debug, Serialize)]
pub struct LsReport {
    pub name: String,
    pub version: String,
    pub path: String,
    pub dependencies: Vec<LsEntry>,
}

/// One dependency in the listing.
#[derive(Debug, Serialize)]
pub struct LsEntry {
    pub name: String,
    /// Declared spec (empty for extraneous packages)
    pub spec: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub flags: Vec<&'static str>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub dependencies: Vec<LsEntry>,
}

impl LsReport {
    /// Build the listing. With `all`, descends through every resolved edge;
    /// a node already shown is marked `deduped` instead of repeated.
    pub fn from_tree(tree: &Tree, all: bool) -> Self {
        let root = tree.node(tree.root());
        let mut seen = BTreeSet::new();
        seen.insert(tree.root());

        let mut dependencies = entries_for(tree, tree.root(), all, &mut seen);

        // 어떤 엣지도 가리키지 않는 최상위 패키지
        for &child in root.children().values() {
            let node = tree.node(child);
            if node.extraneous && !seen.contains(&tree.target(child)) {
                dependencies.push(LsEntry {
                    name: node.name().to_owned(),
                    spec: String::new(),
                    version: Some(tree.node(tree.target(child)).version().to_owned()),
                    location: Some(node.location().to_owned()),
                    flags: vec!["extraneous"],
                    dependencies: Vec::new(),
                });
            }
        }

        Self {
            name: root.package_name().to_owned(),
            version: root.version().to_owned(),
            path: tree.path().display().to_string(),
            dependencies,
        }
    }

    /// Count entries carrying `flag`, at any depth.
    pub fn count_flag(&self, flag: &str) -> usize {
        fn count(entries: &[LsEntry], flag: &str) -> usize {
            entries
                .iter()
                .map(|e| {
                    usize::from(e.flags.iter().any(|f| *f == flag)) + count(&e.dependencies, flag)
                })
                .sum()
        }
        count(&self.dependencies, flag)
    }
}

fn entries_for(
    tree: &Tree,
    from: NodeId,
    all: bool,
    seen: &mut BTreeSet<NodeId>,
) -> Vec<LsEntry> {
    let node = tree.node(tree.target(from));

    // 형제 의존성을 먼저 표시해야 더 얕은 쪽이 원본이 됨
    let edges: Vec<(&String, EdgeId, bool)> = node
        .edges_out()
        .iter()
        .map(|(name, &eid)| {
            let first_visit = tree
                .edge(eid)
                .to()
                .is_some_and(|to| seen.insert(tree.target(to)));
            (name, eid, first_visit)
        })
        .collect();

    let mut entries = Vec::new();
    for (name, eid, first_visit) in edges {
        let edge = tree.edge(eid);
        let mut flags = Vec::new();
        match tree.edge_error(eid) {
            Some(DepError::Missing) => flags.push("missing"),
            Some(DepError::Invalid) => flags.push("invalid"),
            Some(DepError::PeerLocal) => flags.push("peer-local"),
            Some(DepError::Detached) | None => {}
        }

        let Some(to) = edge.to() else {
            if !flags.is_empty() {
                entries.push(LsEntry {
                    name: name.clone(),
                    spec: edge.spec().to_owned(),
                    version: None,
                    location: None,
                    flags,
                    dependencies: Vec::new(),
                });
            }
            continue;
        };

        let target = tree.target(to);
        let dep = tree.node(to);
        if dep.is_link() {
            flags.push("link");
        }
        if edge.is_dev() {
            flags.push("dev");
        }
        if edge.is_optional() {
            flags.push("optional");
        }
        if edge.is_peer() {
            flags.push("peer");
        }
        if all && !first_visit {
            flags.push("deduped");
        }
        let dependencies = if all && first_visit {
            entries_for(tree, to, all, seen)
        } else {
            Vec::new()
        };

        entries.push(LsEntry {
            name: name.clone(),
            spec: edge.spec().to_owned(),
            version: Some(tree.node(target).version().to_owned()),
            location: Some(dep.location().to_owned()),
            flags,
            dependencies,
        });
    }
    entries
}

impl Render for LsReport {
    fn render_text(&self, w: &mut dyn Write) -> std::io::Result<()> {
        use colored::Colorize;

        writeln!(w, "{}@{} {}", self.name, self.version, self.path.dimmed())?;
        render_entries(w, &self.dependencies, "")
    }
}

fn render_entries(w: &mut dyn Write, entries: &[LsEntry], indent: &str) -> std::io::Result<()> {
    use colored::Colorize;

    for (i, entry) in entries.iter().enumerate() {
        let last = i + 1 == entries.len();
        let branch = if last { "└── " } else { "├── " };
        let label = match &entry.version {
            Some(version) => format!("{}@{}", entry.name, version),
            None => format!("{}@{}", entry.name, entry.spec),
        };
        let flags = if entry.flags.is_empty() {
            String::new()
        } else {
            format!(" {}", entry.flags.join(" "))
        };
        let broken = entry.flags.iter().any(|f| matches!(*f, "missing" | "invalid"));
        if broken {
            writeln!(w, "{indent}{branch}{}{}", label.red(), flags.red())?;
        } else {
            writeln!(w, "{indent}{branch}{}{}", label, flags.dimmed())?;
        }

        let child_indent = format!("{indent}{}", if last { "    " } else { "│   " });
        render_entries(w, &entry.dependencies, &child_indent)?;
    }
    Ok(())
}
