use std::fs;
use std::path::Path;

use guardian_core::{RunConfig, DEFAULT_BUFFER_CAPACITY};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::errors::CliError;

/// Load events produced when neither the file nor the command line says.
pub const DEFAULT_EVENTS: u64 = 1_000;

/// JSON configuration file accepted by `guardian-run --config`.
///
/// Every field is optional; missing fields take their defaults.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConfigFile {
    /// Accelerator and lifecycle configuration.
    pub run: RunConfig,
    /// Matched load events the synthetic workload produces.
    pub events: u64,
    /// Event buffer depth of the simulated accelerator.
    pub buffer_capacity: usize,
}

impl Default for ConfigFile {
    fn default() -> Self {
        Self {
            run: RunConfig::default(),
            events: DEFAULT_EVENTS,
            buffer_capacity: DEFAULT_BUFFER_CAPACITY,
        }
    }
}

impl ConfigFile {
    /// Reads and parses a configuration file.
    ///
    /// # Errors
    ///
    /// Returns [`CliError::Read`] or [`CliError::Parse`].
    pub fn load(path: &Path) -> Result<Self, CliError> {
        let text = fs::read_to_string(path).map_err(|source| CliError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::parse(&text).map_err(|source| CliError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        debug!(path = %path.display(), "configuration loaded");
        Ok(config)
    }

    /// Parses configuration JSON.
    ///
    /// # Errors
    ///
    /// Returns the JSON error for malformed input or unknown fields.
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    /// Pretty-printed JSON for this configuration.
    ///
    /// # Errors
    ///
    /// Returns [`CliError::Encode`] if serialization fails.
    pub fn to_json(&self) -> Result<String, CliError> {
        serde_json::to_string_pretty(self).map_err(CliError::Encode)
    }

    /// Applies command-line overrides.
    #[must_use]
    pub fn with_overrides(mut self, events: Option<u64>, checkers: Option<u8>) -> Self {
        if let Some(events) = events {
            self.events = events;
        }
        if let Some(checkers) = checkers {
            self.run.checkers = checkers;
        }
        self
    }
}
