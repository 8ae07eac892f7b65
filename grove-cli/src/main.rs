//! `grove` -- npm-compatible dependency tree manager

mod cli;
mod commands;
mod error;
mod logging;
mod output;

use std::path::PathBuf;

use clap::Parser;

use grove_core::config::GroveConfig;

use crate::cli::{Cli, Commands};
use crate::commands::Context;
use crate::error::CliError;
use crate::output::OutputWriter;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let code = match run(cli).await {
        Ok(()) => 0,
        Err(e) => {
            eprintln!("error: {e}");
            e.exit_code()
        }
    };
    std::process::exit(code);
}

async fn run(cli: Cli) -> Result<(), CliError> {
    let explicit = cli.config.is_some();
    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(|| cli.prefix.join("grove.toml"));

    // config 명령은 잘못된 설정도 보고해야 하므로 로딩 실패를 미룸
    let mut config = match commands::config::load(&config_path, explicit).await {
        Ok(config) => config,
        Err(_) if matches!(cli.command, Commands::Config(_)) => GroveConfig::default(),
        Err(e) => return Err(e),
    };
    if let Some(level) = &cli.log_level {
        config.general.log_level = level.clone();
    }
    logging::init_tracing(&config.general).map_err(|e| CliError::Config(e.to_string()))?;
    grove_core::metrics::describe_all();

    tracing::debug!(
        config = %config_path.display(),
        prefix = %cli.prefix.display(),
        "grove starting"
    );

    let writer = OutputWriter::new(cli.output);
    let ctx = Context {
        config,
        prefix: absolute(cli.prefix)?,
        dry_run: cli.dry_run,
    };

    match cli.command {
        Commands::Install(args) => commands::install::execute_install(args, &ctx, &writer).await,
        Commands::Uninstall(args) => {
            commands::install::execute_uninstall(args, &ctx, &writer).await
        }
        Commands::Update(args) => commands::install::execute_update(args, &ctx, &writer).await,
        Commands::Dedupe => commands::install::execute_dedupe(&ctx, &writer).await,
        Commands::Ls(args) => commands::ls::execute(args, &ctx, &writer).await,
        Commands::Audit(args) => commands::audit::execute(args, &ctx, &writer).await,
        Commands::Config(args) => {
            commands::config::execute(args, &config_path, explicit, &writer).await
        }
    }
}

fn absolute(path: PathBuf) -> Result<PathBuf, CliError> {
    if path.is_absolute() {
        Ok(path)
    } else {
        Ok(std::env::current_dir()?.join(path))
    }
}
