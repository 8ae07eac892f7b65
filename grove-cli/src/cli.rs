//! CLI argument parsing using clap derive API
//!
//! Purely declarative: no I/O happens here.

use std::path::PathBuf;

use clap::{ArgGroup, Args, Parser, Subcommand, ValueEnum};

/// Grove -- npm-compatible dependency tree manager.
///
/// Use `grove <COMMAND> --help` for subcommand details.
#[derive(Parser, Debug)]
#[command(name = "grove", version, about, long_about = None)]
pub struct Cli {
    /// Path to the grove.toml configuration file.
    ///
    /// When omitted, `grove.toml` in the project directory is used if present.
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Project directory containing package.json.
    #[arg(short = 'C', long, global = true, default_value = ".")]
    pub prefix: PathBuf,

    /// Override log level (trace, debug, info, warn, error).
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    /// Output format.
    #[arg(long, global = true, default_value = "text")]
    pub output: OutputFormat,

    /// Compute and print the plan without touching the filesystem.
    #[arg(long, global = true)]
    pub dry_run: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Supported output formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text output.
    Text,
    /// Machine-readable JSON.
    Json,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Install dependencies, optionally adding new ones.
    #[command(visible_alias = "i")]
    Install(InstallArgs),

    /// Remove dependencies and save package.json.
    #[command(visible_aliases = ["rm", "remove"])]
    Uninstall(UninstallArgs),

    /// Re-resolve dependencies within their declared ranges.
    #[command(visible_alias = "up")]
    Update(UpdateArgs),

    /// Reduce duplicated packages in the tree.
    Dedupe,

    /// List installed packages.
    Ls(LsArgs),

    /// Report known vulnerabilities.
    Audit(AuditArgs),

    /// Manage configuration.
    Config(ConfigArgs),
}

// ---- install ----

#[derive(Args, Debug)]
#[command(group(ArgGroup::new("save").args(["save_dev", "save_optional", "save_peer"])))]
pub struct InstallArgs {
    /// Packages to add (`name`, `name@range`, `name@tag`).
    pub packages: Vec<String>,

    /// Save to devDependencies.
    #[arg(short = 'D', long)]
    pub save_dev: bool,

    /// Save to optionalDependencies.
    #[arg(short = 'O', long)]
    pub save_optional: bool,

    /// Save to peerDependencies.
    #[arg(long)]
    pub save_peer: bool,
}

// ---- uninstall ----

#[derive(Args, Debug)]
pub struct UninstallArgs {
    /// Package names to remove.
    #[arg(required = true)]
    pub packages: Vec<String>,
}

// ---- update ----

#[derive(Args, Debug)]
pub struct UpdateArgs {
    /// Packages to update (default: all).
    pub packages: Vec<String>,
}

// ---- ls ----

#[derive(Args, Debug)]
pub struct LsArgs {
    /// Show every node, not only the root's direct dependencies.
    #[arg(short, long)]
    pub all: bool,
}

// ---- audit ----

#[derive(Args, Debug)]
pub struct AuditArgs {
    /// Apply fixes that stay within declared ranges.
    #[arg(long)]
    pub fix: bool,
}

// ---- config ----

#[derive(Args, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub action: ConfigAction,
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Validate the configuration file and report errors.
    Validate,
    /// Show the effective configuration (file + env overrides + defaults).
    Show {
        /// Show only a specific section (general, install, reify, audit).
        #[arg(long)]
        section: Option<String>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_parse_install_without_packages() {
        let cli = Cli::try_parse_from(["grove", "install"]).expect("should parse install");
        match cli.command {
            Commands::Install(args) => {
                assert!(args.packages.is_empty());
                assert!(!args.save_dev);
            }
            _ => panic!("expected Install command"),
        }
        assert_eq!(cli.prefix, PathBuf::from("."));
        assert!(cli.config.is_none());
        assert!(!cli.dry_run);
    }

    #[test]
    fn test_cli_parse_install_save_dev() {
        let cli = Cli::try_parse_from(["grove", "i", "lodash@^4", "chalk", "-D"])
            .expect("should parse install alias");
        match cli.command {
            Commands::Install(args) => {
                assert_eq!(args.packages, vec!["lodash@^4", "chalk"]);
                assert!(args.save_dev);
            }
            _ => panic!("expected Install command"),
        }
    }

    #[test]
    fn test_cli_save_flags_are_exclusive() {
        let result =
            Cli::try_parse_from(["grove", "install", "x", "--save-dev", "--save-optional"]);
        assert!(result.is_err(), "save flags should conflict");
    }

    #[test]
    fn test_cli_uninstall_requires_package() {
        assert!(Cli::try_parse_from(["grove", "uninstall"]).is_err());
        let cli = Cli::try_parse_from(["grove", "rm", "a", "b"]).expect("should parse rm alias");
        match cli.command {
            Commands::Uninstall(args) => assert_eq!(args.packages, vec!["a", "b"]),
            _ => panic!("expected Uninstall command"),
        }
    }

    #[test]
    fn test_cli_parse_update_names() {
        let cli = Cli::try_parse_from(["grove", "update", "a"]).expect("should parse update");
        match cli.command {
            Commands::Update(args) => assert_eq!(args.packages, vec!["a"]),
            _ => panic!("expected Update command"),
        }
    }

    #[test]
    fn test_cli_parse_audit_fix() {
        let cli = Cli::try_parse_from(["grove", "audit", "--fix"]).expect("should parse audit");
        match cli.command {
            Commands::Audit(args) => assert!(args.fix),
            _ => panic!("expected Audit command"),
        }
    }

    #[test]
    fn test_cli_parse_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "grove",
            "ls",
            "--output",
            "json",
            "--dry-run",
            "--log-level",
            "debug",
            "-c",
            "/etc/grove.toml",
        ])
        .expect("global flags should be accepted after the subcommand");
        assert_eq!(cli.output, OutputFormat::Json);
        assert!(cli.dry_run);
        assert_eq!(cli.log_level.as_deref(), Some("debug"));
        assert_eq!(cli.config, Some(PathBuf::from("/etc/grove.toml")));
    }

    #[test]
    fn test_cli_parse_config_show_section() {
        let cli = Cli::try_parse_from(["grove", "config", "show", "--section", "reify"])
            .expect("should parse config show");
        match cli.command {
            Commands::Config(args) => match args.action {
                ConfigAction::Show { section } => assert_eq!(section.as_deref(), Some("reify")),
                ConfigAction::Validate => panic!("expected Show action"),
            },
            _ => panic!("expected Config command"),
        }
    }

    #[test]
    fn test_cli_parse_missing_command_fails() {
        assert!(Cli::try_parse_from(["grove"]).is_err());
    }

    #[test]
    fn test_cli_verify_command_structure() {
        let cmd = Cli::command();
        cmd.clone().debug_assert();
        assert_eq!(cmd.get_name(), "grove");

        let subcommands: Vec<_> = cmd.get_subcommands().map(|s| s.get_name()).collect();
        for name in ["install", "uninstall", "update", "dedupe", "ls", "audit", "config"] {
            assert!(subcommands.contains(&name), "should have '{name}' subcommand");
        }
    }
}
