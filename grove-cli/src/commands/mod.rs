//! Command handlers -- one module per subcommand family

pub mod audit;
pub mod config;
pub mod install;
pub mod ls;

use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use grove_arborist::{
    Arborist, ArboristBuilder, ArboristConfig, ArboristConfigBuilder, DirRegistry,
    LocalFilesystem, LogScriptRunner,
};
use grove_core::config::GroveConfig;

use crate::error::CliError;

/// Arborist wired to the offline registry and the local filesystem.
pub type LocalArborist = Arborist<DirRegistry, LocalFilesystem, LogScriptRunner>;

/// Settings shared by every command that touches a project.
pub struct Context {
    pub config: GroveConfig,
    pub prefix: PathBuf,
    pub dry_run: bool,
}

impl Context {
    /// Arborist configuration for the project, with CLI flags applied last.
    pub fn arborist_config(&self) -> Result<ArboristConfig, CliError> {
        let base = ArboristConfig::from_core(&self.config, &self.prefix);
        let dry_run = base.dry_run || self.dry_run;
        Ok(ArboristConfigBuilder::from_config(base)
            .dry_run(dry_run)
            .build()?)
    }

    /// Build an [`Arborist`] for the project.
    ///
    /// Ctrl-C cancels in-flight work; leaves already committed stay on disk
    /// and are picked up from the hidden lockfile on the next run.
    pub fn arborist(&self) -> Result<LocalArborist, CliError> {
        let config = self.arborist_config()?;
        debug!(
            path = %config.path.display(),
            registry = %config.registry_dir.display(),
            dry_run = config.dry_run,
            "building arborist"
        );
        let arborist = ArboristBuilder::new(config).build()?;

        let token = arborist.cancellation_token();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupt received, cancelling");
                token.cancel();
            }
        });

        Ok(arborist)
    }

    pub fn project_path(&self) -> &Path {
        &self.prefix
    }
}
