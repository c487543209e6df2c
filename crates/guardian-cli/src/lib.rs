//! Command-line runner for the Guardian accelerator control plane.

/// JSON configuration file format and loading.
pub mod config;
/// CLI error taxonomy and exit codes.
pub mod errors;
/// Tracing subscriber setup.
pub mod logging;
/// Simulated run driver.
pub mod runner;
