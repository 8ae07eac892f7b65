//! CLI-specific error types and exit code mapping

use grove_arborist::ArboristError;
use grove_core::error::GroveError;

/// CLI-specific error type.
///
/// The `exit_code()` method maps errors to process exit codes.
#[derive(Debug, thiserror::Error)]
pub enum CliError {
    /// Configuration loading or validation failure.
    #[error("configuration error: {0}")]
    Config(String),

    /// A subcommand-specific operation failed.
    #[error("{0}")]
    Command(String),

    /// Some dependencies could not be resolved or some leaves were not applied.
    #[error("incomplete: {0}")]
    Incomplete(String),

    /// The audit reported vulnerabilities.
    #[error("audit: {0}")]
    Vulnerable(String),

    /// JSON serialisation failed during output rendering.
    #[error("json output error: {0}")]
    JsonSerialize(#[from] serde_json::Error),

    /// IO error (stdout write, etc.).
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Wrapped domain error from grove-core.
    #[error("{0}")]
    Core(#[from] GroveError),

    /// Wrapped tree manager error.
    #[error("{0}")]
    Arborist(#[from] ArboristError),
}

impl CliError {
    /// Map the error to a process exit code.
    ///
    /// | Code | Meaning                                          |
    /// |------|--------------------------------------------------|
    /// | 0    | Success                                          |
    /// | 1    | General / command error                          |
    /// | 2    | Configuration error                              |
    /// | 3    | Unresolved dependencies or partial reify         |
    /// | 4    | Audit found vulnerabilities                      |
    /// | 5    | Aborted: integrity, override, peer or engine     |
    /// | 10   | IO error                                         |
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Config(_) => 2,
            Self::Incomplete(_) => 3,
            Self::Vulnerable(_) => 4,
            Self::Io(_) => 10,
            Self::Core(e) if e.is_fatal() => 5,
            Self::Core(GroveError::Config(_)) => 2,
            Self::Core(GroveError::Io(_)) => 10,
            Self::Arborist(e) if e.is_fatal() => 5,
            Self::Arborist(ArboristError::Config { .. }) => 2,
            Self::Arborist(ArboristError::Io { .. }) => 10,
            Self::JsonSerialize(_) | Self::Command(_) | Self::Core(_) | Self::Arborist(_) => 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use grove_core::error::{ConfigError, ReifyError};

    #[test]
    fn test_exit_code_config_error() {
        let err = CliError::Config("bad".to_owned());
        assert_eq!(err.exit_code(), 2);

        let core = CliError::Core(GroveError::Config(ConfigError::FileNotFound {
            path: "grove.toml".to_owned(),
        }));
        assert_eq!(core.exit_code(), 2);

        let arborist = CliError::Arborist(ArboristError::Config {
            field: "concurrency".to_owned(),
            reason: "must be greater than 0".to_owned(),
        });
        assert_eq!(arborist.exit_code(), 2);
    }

    #[test]
    fn test_exit_code_incomplete() {
        let err = CliError::Incomplete("2 unresolved dependencies".to_owned());
        assert_eq!(err.exit_code(), 3);
    }

    #[test]
    fn test_exit_code_vulnerable() {
        let err = CliError::Vulnerable("found 3 vulnerabilities".to_owned());
        assert_eq!(err.exit_code(), 4);
    }

    #[test]
    fn test_exit_code_fatal_arborist_errors() {
        let integrity = CliError::Arborist(ArboristError::IntegrityMismatch {
            location: "node_modules/a".to_owned(),
            expected: "sha512-aaa".to_owned(),
            actual: "sha512-bbb".to_owned(),
        });
        assert_eq!(integrity.exit_code(), 5);

        let overrides = CliError::Arborist(ArboristError::ConfigInvalid(
            "override for a conflicts with direct dependency".to_owned(),
        ));
        assert_eq!(overrides.exit_code(), 5);

        let engine = CliError::Arborist(ArboristError::EngineMismatch {
            package: "modern@1.0.0".to_owned(),
            wanted: ">=30".to_owned(),
            current: "20.0.0".to_owned(),
        });
        assert_eq!(engine.exit_code(), 5);

        let core = CliError::Core(GroveError::Reify(ReifyError::IntegrityMismatch {
            location: "node_modules/a".to_owned(),
            expected: "sha512-aaa".to_owned(),
            actual: "sha512-bbb".to_owned(),
        }));
        assert_eq!(core.exit_code(), 5);
    }

    #[test]
    fn test_exit_code_io_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        assert_eq!(CliError::Io(io_err).exit_code(), 10);

        let arborist = CliError::Arborist(ArboristError::Io {
            path: "node_modules".to_owned(),
            source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        });
        assert_eq!(arborist.exit_code(), 10);
    }

    #[test]
    fn test_exit_code_general_errors() {
        assert_eq!(CliError::Command("x".to_owned()).exit_code(), 1);

        let fetch = CliError::Arborist(ArboristError::Fetch {
            name: "a".to_owned(),
            reason: "not found".to_owned(),
        });
        assert_eq!(fetch.exit_code(), 1);

        let json_err = serde_json::from_str::<serde_json::Value>("{invalid json")
            .expect_err("should fail parsing");
        assert_eq!(CliError::JsonSerialize(json_err).exit_code(), 1);
    }

    #[test]
    fn test_error_display_config() {
        let err = CliError::Config("invalid TOML syntax".to_owned());
        let display = err.to_string();
        assert!(display.contains("configuration error"));
        assert!(display.contains("invalid TOML syntax"));
    }

    #[test]
    fn test_from_arborist_error() {
        let err: CliError = ArboristError::Cancelled.into();
        assert!(matches!(err, CliError::Arborist(ArboristError::Cancelled)));
        assert_eq!(err.exit_code(), 5);
    }
}
