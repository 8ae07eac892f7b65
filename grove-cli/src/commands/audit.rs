//! `grove audit` command handler

use std::collections::BTreeMap;
use std::io::Write;

use serde::Serialize;
use tracing::info;

use grove_arborist::audit::Via;
use grove_arborist::{AuditReport, FixAvailable};

use crate::cli::AuditArgs;
use crate::commands::Context;
use crate::commands::install::InstallReport;
use crate::error::CliError;
use crate::output::{OutputWriter, Render};

/// Execute the `audit` command.
///
/// Exits with code 4 while vulnerabilities remain after the (optional) fix.
pub async fn execute(args: AuditArgs, ctx: &Context, writer: &OutputWriter) -> Result<(), CliError> {
    let arborist = ctx.arborist()?;
    let outcome = arborist.audit(args.fix).await?;

    let fix = outcome.plan.map(|plan| FixSummary {
        updated: plan.update,
        breaking: plan.breaking,
        install: outcome
            .fix
            .map(|install| InstallReport::from_outcome("audit fix", install)),
    });
    let report = outcome.remaining.unwrap_or(outcome.report);
    info!(
        vulnerabilities = report.vulnerabilities.len(),
        fix = args.fix,
        "audit finished"
    );

    let view = AuditView { report, fix };
    writer.render(&view)?;

    let total = view.report.metadata.vulnerabilities.total;
    if total > 0 {
        return Err(CliError::Vulnerable(format!(
            "found {total} vulnerabilities"
        )));
    }
    Ok(())
}

/// Audit report plus what `--fix` did.
#[derive(Serialize)]
pub struct AuditView {
    #[serde(flatten)]
    pub report: AuditReport,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fix: Option<FixSummary>,
}

#[derive(Serialize)]
pub struct FixSummary {
    /// Packages re-resolved within their declared ranges
    pub updated: Vec<String>,
    /// Upgrades that need a range change and were left alone
    pub breaking: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub install: Option<InstallReport>,
}

impl Render for AuditView {
    fn render_text(&self, w: &mut dyn Write) -> std::io::Result<()> {
        use colored::Colorize;

        if let Some(fix) = &self.fix {
            if let Some(install) = &fix.install {
                install.render_text(w)?;
                writeln!(w)?;
            } else if fix.updated.is_empty() {
                writeln!(w, "no fixes available within declared ranges")?;
            }
            for (name, version) in &fix.breaking {
                writeln!(
                    w,
                    "  {} {}@{} is outside the declared range",
                    "manual".yellow().bold(),
                    name,
                    version
                )?;
            }
        }

        let counts = &self.report.metadata.vulnerabilities;
        if counts.total == 0 {
            writeln!(w, "found {} vulnerabilities", "0".green().bold())?;
            return Ok(());
        }

        for vuln in self.report.vulnerabilities.values() {
            let severity = vuln.severity.as_report_str();
            writeln!(w, "{}  {}", vuln.name.bold(), vuln.range)?;
            writeln!(w, "Severity: {}", severity.red())?;
            for via in &vuln.via {
                match via {
                    Via::Advisory(a) => writeln!(w, "  {} - {}", a.title, a.url)?,
                    Via::Vuln(name) => writeln!(w, "  depends on vulnerable versions of {name}")?,
                }
            }
            match &vuln.fix_available {
                FixAvailable::Bool(true) => {
                    writeln!(w, "  fix available via `grove audit --fix`")?;
                }
                FixAvailable::Bool(false) => writeln!(w, "  {}", "no fix available".dimmed())?,
                FixAvailable::Upgrade {
                    name,
                    version,
                    is_semver_major,
                } => {
                    let note = if *is_semver_major {
                        " (breaking change)"
                    } else {
                        ""
                    };
                    writeln!(w, "  fix available by upgrading {name} to {version}{note}")?;
                }
            }
            for location in &vuln.nodes {
                writeln!(w, "  {}", location.dimmed())?;
            }
            writeln!(w)?;
        }

        let breakdown: Vec<String> = [
            ("low", counts.low),
            ("moderate", counts.moderate),
            ("high", counts.high),
            ("critical", counts.critical),
        ]
        .into_iter()
        .filter(|(_, n)| *n > 0)
        .map(|(label, n)| format!("{n} {label}"))
        .collect();
        let breakdown = if breakdown.is_empty() {
            String::new()
        } else {
            format!(" ({})", breakdown.join(", "))
        };
        writeln!(
            w,
            "{} vulnerabilities{}",
            counts.total.to_string().red().bold(),
            breakdown
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use grove_arborist::audit::{AuditMetadata, SeverityCounts};

    fn empty_report() -> AuditReport {
        AuditReport {
            audit_report_version: 2,
            vulnerabilities: BTreeMap::new(),
            metadata: AuditMetadata::default(),
        }
    }

    fn render(view: &AuditView) -> String {
        colored::control::set_override(false);
        let mut buffer = Vec::new();
        view.render_text(&mut buffer)
            .expect("text rendering should succeed");
        String::from_utf8(buffer).expect("valid UTF-8")
    }

    #[test]
    fn test_clean_report_renders_zero() {
        let view = AuditView {
            report: empty_report(),
            fix: None,
        };
        assert!(render(&view).contains("found 0 vulnerabilities"));
    }

    #[test]
    fn test_summary_line_counts_by_severity() {
        let mut report = empty_report();
        report.metadata.vulnerabilities = SeverityCounts {
            high: 2,
            low: 1,
            total: 3,
            ..SeverityCounts::default()
        };
        let view = AuditView { report, fix: None };
        assert!(render(&view).contains("3 vulnerabilities (1 low, 2 high)"));
    }

    #[test]
    fn test_breaking_fixes_are_listed() {
        let view = AuditView {
            report: empty_report(),
            fix: Some(FixSummary {
                updated: Vec::new(),
                breaking: BTreeMap::from([("a".to_owned(), "2.0.0".to_owned())]),
                install: None,
            }),
        };
        let output = render(&view);
        assert!(output.contains("no fixes available"));
        assert!(output.contains("manual a@2.0.0 is outside the declared range"));
    }

    #[test]
    fn test_json_is_flattened_report() {
        let view = AuditView {
            report: empty_report(),
            fix: None,
        };
        let json = serde_json::to_value(&view).expect("serializable");
        assert_eq!(json["auditReportVersion"], 2);
        assert!(json["vulnerabilities"].as_object().is_some());
        assert_eq!(json["metadata"]["vulnerabilities"]["total"], 0);
        assert!(json.get("fix").is_none());
    }
}
