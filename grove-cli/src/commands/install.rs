//! `grove install`, `uninstall`, `update` and `dedupe` command handlers
//!
//! All four build an ideal tree, reify it and print the same report.

use std::io::Write;

use serde::Serialize;
use tracing::info;

use grove_arborist::reify::LeafFailure;
use grove_arborist::{AddRequest, InstallOutcome, Problem, UpdateRequest};
use grove_core::types::DepType;

use crate::cli::{InstallArgs, UninstallArgs, UpdateArgs};
use crate::commands::Context;
use crate::error::CliError;
use crate::output::{OutputWriter, Render};

/// Execute the `install` command.
pub async fn execute_install(
    args: InstallArgs,
    ctx: &Context,
    writer: &OutputWriter,
) -> Result<(), CliError> {
    let dep_type = save_type(&args);
    let add: Vec<AddRequest> = args
        .packages
        .iter()
        .map(|arg| AddRequest::parse(arg, dep_type))
        .collect();
    info!(packages = add.len(), ?dep_type, "install");

    let outcome = ctx.arborist()?.install(add).await?;
    finish("install", outcome, writer)
}

/// Execute the `uninstall` command.
pub async fn execute_uninstall(
    args: UninstallArgs,
    ctx: &Context,
    writer: &OutputWriter,
) -> Result<(), CliError> {
    info!(packages = ?args.packages, "uninstall");
    let outcome = ctx.arborist()?.uninstall(args.packages).await?;
    finish("uninstall", outcome, writer)
}

/// Execute the `update` command.
pub async fn execute_update(
    args: UpdateArgs,
    ctx: &Context,
    writer: &OutputWriter,
) -> Result<(), CliError> {
    let request = if args.packages.is_empty() {
        UpdateRequest::All
    } else {
        UpdateRequest::Names(args.packages)
    };
    info!(?request, "update");
    let outcome = ctx.arborist()?.update(request).await?;
    finish("update", outcome, writer)
}

/// Execute the `dedupe` command.
pub async fn execute_dedupe(ctx: &Context, writer: &OutputWriter) -> Result<(), CliError> {
    let outcome = ctx.arborist()?.dedupe().await?;
    finish("dedupe", outcome, writer)
}

fn save_type(args: &InstallArgs) -> DepType {
    if args.save_dev {
        DepType::Dev
    } else if args.save_optional {
        DepType::Optional
    } else if args.save_peer {
        DepType::Peer
    } else {
        DepType::Prod
    }
}

/// Render the outcome and turn an incomplete run into exit code 3.
fn finish(command: &str, outcome: InstallOutcome, writer: &OutputWriter) -> Result<(), CliError> {
    let report = InstallReport::from_outcome(command, outcome);
    writer.render(&report)?;

    if !report.problems.is_empty() || !report.failed.is_empty() || !report.skipped.is_empty() {
        return Err(CliError::Incomplete(format!(
            "{} unresolved, {} failed, {} skipped",
            report.problems.len(),
            report.failed.len(),
            report.skipped.len()
        )));
    }
    Ok(())
}

/// Result of an install-family command.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InstallReport {
    pub command: String,
    pub dry_run: bool,
    /// Number of nodes in the resulting tree, root excluded
    pub packages: usize,
    pub added: Vec<String>,
    pub removed: Vec<String>,
    pub changed: Vec<String>,
    pub failed: Vec<LeafFailure>,
    pub skipped: Vec<String>,
    pub problems: Vec<Problem>,
    pub scripts: usize,
    pub fetched_bytes: u64,
    pub cache_hits: u64,
}

impl InstallReport {
    pub fn from_outcome(command: &str, outcome: InstallOutcome) -> Self {
        let InstallOutcome {
            tree,
            problems,
            report,
        } = outcome;
        Self {
            command: command.to_owned(),
            dry_run: report.dry_run,
            packages: tree.inventory().len().saturating_sub(1),
            added: report.added,
            removed: report.removed,
            changed: report.changed,
            failed: report.failed,
            skipped: report.skipped,
            problems,
            scripts: report.scripts.len(),
            fetched_bytes: report.fetched_bytes,
            cache_hits: report.cache_hits,
        }
    }

    fn has_changes(&self) -> bool {
        !(self.added.is_empty() && self.removed.is_empty() && self.changed.is_empty())
    }
}

impl Render for InstallReport {
    fn render_text(&self, w: &mut dyn Write) -> std::io::Result<()> {
        use colored::Colorize;

        if self.dry_run {
            writeln!(w, "{}", "(dry run: nothing was written)".dimmed())?;
        }
        for location in &self.added {
            writeln!(w, "  {} {}", "+".green(), location)?;
        }
        for location in &self.changed {
            writeln!(w, "  {} {}", "~".yellow(), location)?;
        }
        for location in &self.removed {
            writeln!(w, "  {} {}", "-".red(), location)?;
        }
        if self.has_changes() {
            writeln!(w)?;
        }

        writeln!(
            w,
            "{}: added {}, removed {}, changed {}; {} packages in tree",
            self.command.bold(),
            self.added.len(),
            self.removed.len(),
            self.changed.len(),
            self.packages
        )?;
        if self.fetched_bytes > 0 || self.cache_hits > 0 {
            writeln!(
                w,
                "  fetched {} bytes, {} cache hits",
                self.fetched_bytes, self.cache_hits
            )?;
        }
        if self.scripts > 0 {
            writeln!(w, "  ran {} lifecycle scripts", self.scripts)?;
        }

        for problem in &self.problems {
            let at = if problem.location.is_empty() {
                "(root)"
            } else {
                problem.location.as_str()
            };
            writeln!(
                w,
                "  {} {}@{} from {}: {}",
                "unresolved".red().bold(),
                problem.name,
                problem.spec,
                at,
                problem.message
            )?;
        }
        for failure in &self.failed {
            writeln!(
                w,
                "  {} {}: {}",
                "failed".red().bold(),
                failure.location,
                failure.error
            )?;
        }
        for location in &self.skipped {
            writeln!(w, "  {} {}", "skipped".yellow(), location)?;
        }

        Ok(())
    }
}
