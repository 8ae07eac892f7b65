//! `grove config` command handler

use std::io::Write;
use std::path::Path;

use serde::Serialize;
use tracing::info;

use grove_core::config::GroveConfig;

use crate::cli::{ConfigAction, ConfigArgs};
use crate::error::CliError;
use crate::output::{OutputWriter, Render};

const SECTIONS: [&str; 4] = ["general", "install", "reify", "audit"];

/// Execute the `config` command.
pub async fn execute(
    args: ConfigArgs,
    config_path: &Path,
    explicit: bool,
    writer: &OutputWriter,
) -> Result<(), CliError> {
    match args.action {
        ConfigAction::Validate => execute_validate(config_path, explicit, writer).await,
        ConfigAction::Show { section } => {
            execute_show(config_path, explicit, section, writer).await
        }
    }
}

/// Load the effective configuration.
///
/// A missing file is an error only when the path was given explicitly.
pub async fn load(config_path: &Path, explicit: bool) -> Result<GroveConfig, CliError> {
    let config = if explicit {
        GroveConfig::load(config_path).await?
    } else {
        GroveConfig::load_or_default(config_path).await?
    };
    Ok(config)
}

/// Load and validate the configuration, reporting any error.
///
/// # Errors
///
/// Returns `CliError::Config` when the file fails to parse or validate.
async fn execute_validate(
    config_path: &Path,
    explicit: bool,
    writer: &OutputWriter,
) -> Result<(), CliError> {
    info!(path = %config_path.display(), "validating configuration");

    let report = match load(config_path, explicit).await {
        Ok(_) => ConfigValidationReport {
            source: config_path.display().to_string(),
            valid: true,
            errors: Vec::new(),
        },
        Err(e) => ConfigValidationReport {
            source: config_path.display().to_string(),
            valid: false,
            errors: vec![e.to_string()],
        },
    };

    writer.render(&report)?;

    if !report.valid {
        return Err(CliError::Config("configuration is invalid".to_owned()));
    }
    Ok(())
}

/// Show the effective configuration (file + env overrides + defaults).
async fn execute_show(
    config_path: &Path,
    explicit: bool,
    section: Option<String>,
    writer: &OutputWriter,
) -> Result<(), CliError> {
    info!(path = %config_path.display(), "loading configuration");
    let config = load(config_path, explicit).await?;
    let report = ConfigReport::build(config_path, &config, section.as_deref())?;
    writer.render(&report)
}

/// Configuration display report.
///
/// `config_toml` is only used for text rendering; JSON carries `config`.
#[derive(Serialize)]
pub struct ConfigReport {
    pub source: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub section: Option<String>,
    pub config: serde_json::Value,
    #[serde(skip)]
    pub config_toml: String,
}

impl ConfigReport {
    pub fn build(
        config_path: &Path,
        config: &GroveConfig,
        section: Option<&str>,
    ) -> Result<Self, CliError> {
        let (value, config_toml) = match section {
            None => (serde_json::to_value(config)?, to_toml(config)),
            Some("general") => (serde_json::to_value(&config.general)?, to_toml(&config.general)),
            Some("install") => (serde_json::to_value(&config.install)?, to_toml(&config.install)),
            Some("reify") => (serde_json::to_value(&config.reify)?, to_toml(&config.reify)),
            Some("audit") => (serde_json::to_value(&config.audit)?, to_toml(&config.audit)),
            Some(other) => {
                return Err(CliError::Command(format!(
                    "unknown section: {} (expected: {})",
                    other,
                    SECTIONS.join(", ")
                )));
            }
        };
        Ok(Self {
            source: config_path.display().to_string(),
            section: section.map(str::to_owned),
            config: value,
            config_toml,
        })
    }
}

fn to_toml<T: Serialize>(value: &T) -> String {
    toml::to_string_pretty(value).unwrap_or_else(|e| format!("(serialization error: {})", e))
}

impl Render for ConfigReport {
    fn render_text(&self, w: &mut dyn Write) -> std::io::Result<()> {
        use colored::Colorize;

        if let Some(ref section) = self.section {
            let section_label = format!("[{}]", section);
            writeln!(
                w,
                "Configuration {} (source: {})",
                section_label.bold(),
                self.source
            )?;
        } else {
            writeln!(w, "Configuration (source: {})", self.source.bold())?;
        }

        writeln!(w)?;
        write!(w, "{}", self.config_toml)
    }
}

/// Configuration validation report.
#[derive(Serialize)]
pub struct ConfigValidationReport {
    pub source: String,
    pub valid: bool,
    /// Empty when valid
    pub errors: Vec<String>,
}

impl Render for ConfigValidationReport {
    fn render_text(&self, w: &mut dyn Write) -> std::io::Result<()> {
        use colored::Colorize;

        writeln!(w, "Config Validation: {}", self.source.bold())?;

        if self.valid {
            writeln!(w, "  Result: {}", "VALID".green().bold())?;
        } else {
            writeln!(w, "  Result: {}", "INVALID".red().bold())?;
            for err in &self.errors {
                writeln!(w, "  Error: {}", err.red())?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn render<T: Render>(report: &T) -> String {
        colored::control::set_override(false);
        let mut buffer = Vec::new();
        report
            .render_text(&mut buffer)
            .expect("text rendering should succeed");
        String::from_utf8(buffer).expect("valid UTF-8")
    }

    #[test]
    fn test_config_report_full() {
        let config = GroveConfig::default();
        let report = ConfigReport::build(Path::new("grove.toml"), &config, None)
            .expect("full config should build");
        let output = render(&report);
        assert!(output.contains("Configuration (source: grove.toml)"));
        assert!(output.contains("[install]"));
        assert!(output.contains("lockfile_version = 3"));
    }

    #[test]
    fn test_config_report_section() {
        let config = GroveConfig::default();
        let report = ConfigReport::build(Path::new("grove.toml"), &config, Some("reify"))
            .expect("section should build");
        let output = render(&report);
        assert!(output.contains("[reify]"));
        assert!(output.contains("concurrency"));
        assert!(!output.contains("lockfile_version"));
        assert_eq!(report.config["concurrency"], 8);
    }

    #[test]
    fn test_config_report_unknown_section() {
        let config = GroveConfig::default();
        let err = ConfigReport::build(Path::new("grove.toml"), &config, Some("ebpf"))
            .err()
            .expect("unknown section should fail");
        assert!(err.to_string().contains("unknown section: ebpf"));
        assert_eq!(err.exit_code(), 1);
    }

    #[test]
    fn test_config_report_json_skips_toml() {
        let config = GroveConfig::default();
        let report = ConfigReport::build(Path::new("grove.toml"), &config, Some("audit"))
            .expect("section should build");
        let json = serde_json::to_value(&report).expect("serializable");
        assert_eq!(json["section"], "audit");
        assert!(json.get("config_toml").is_none());
        assert!(json["config"]["min_severity"].is_string());
    }

    #[test]
    fn test_validation_report_invalid() {
        let report = ConfigValidationReport {
            source: "bad.toml".to_owned(),
            valid: false,
            errors: vec!["invalid config value for 'reify.concurrency'".to_owned()],
        };
        let output = render(&report);
        assert!(output.contains("INVALID"));
        assert!(output.contains("reify.concurrency"));
    }

    #[tokio::test]
    async fn test_load_missing_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("grove.toml");

        let err = load(&path, true).await.err().expect("explicit path must exist");
        assert_eq!(err.exit_code(), 2);

        let config = load(&path, false).await.expect("implicit path falls back to defaults");
        assert_eq!(config.install.lockfile_version, 3);
    }
}
