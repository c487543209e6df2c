use std::io;
use std::path::PathBuf;

use guardian_core::{ErrorClass, RunError};
use thiserror::Error;

/// Failures surfaced by the `guardian-run` binary.
#[derive(Debug, Error)]
pub enum CliError {
    /// The configuration file could not be read.
    #[error("failed to read {}: {source}", path.display())]
    Read {
        /// File that was requested.
        path: PathBuf,
        /// Underlying I/O failure.
        source: io::Error,
    },
    /// The configuration file is not a valid run configuration.
    #[error("invalid configuration {}: {source}", path.display())]
    Parse {
        /// File that was parsed.
        path: PathBuf,
        /// Underlying JSON failure.
        source: serde_json::Error,
    },
    /// Encoding the configuration as JSON failed.
    #[error("failed to encode configuration: {0}")]
    Encode(serde_json::Error),
    /// The orchestrated run failed.
    #[error(transparent)]
    Run(#[from] RunError),
}

impl CliError {
    /// Process exit code for this failure.
    ///
    /// `2` is reserved for usage and configuration-file errors; run failures
    /// map their error class onto `3..=7`.
    #[must_use]
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::Read { .. } | Self::Parse { .. } | Self::Encode(_) => 2,
            Self::Run(error) => match error.class() {
                ErrorClass::Configuration => 3,
                ErrorClass::Timeout => 4,
                ErrorClass::HardwareQuery => 5,
                ErrorClass::Lifecycle => 6,
                ErrorClass::Workload => 7,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io;
    use std::path::PathBuf;

    use guardian_core::{ConfigError, RunError};

    use super::CliError;

    #[test]
    fn file_errors_name_the_path() {
        let error = CliError::Read {
            path: PathBuf::from("missing.json"),
            source: io::Error::new(io::ErrorKind::NotFound, "no such file"),
        };
        assert_eq!(error.exit_code(), 2);
        assert!(error.to_string().contains("missing.json"));
    }

    #[test]
    fn run_errors_map_by_class() {
        let error = CliError::from(RunError::Config(ConfigError::EmptyMapper));
        assert_eq!(error.exit_code(), 3);
    }
}
