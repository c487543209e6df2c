use guardian_core::{Orchestrator, RunReport, SimAccelerator, SyntheticLoads};
use tracing::info;

use crate::config::ConfigFile;
use crate::errors::CliError;

/// Runs the synthetic load workload against a fresh simulated accelerator.
///
/// # Errors
///
/// Returns [`CliError::Run`] when configuration or the run fails.
pub fn run_simulation(config: &ConfigFile) -> Result<RunReport, CliError> {
    let sim = SimAccelerator::with_capacity(config.buffer_capacity);
    info!(
        checkers = config.run.checkers,
        events = config.events,
        buffer_capacity = config.buffer_capacity,
        mode = ?config.run.mode,
        "starting simulated run"
    );

    let orchestrator = Orchestrator::new(&sim, config.run.clone());
    let mut workload = SyntheticLoads::new(&sim, config.events);
    Ok(orchestrator.run(&mut workload)?)
}

#[cfg(test)]
mod tests {
    use guardian_core::EntityRange;

    use super::run_simulation;
    use crate::config::ConfigFile;
    use crate::errors::CliError;

    #[test]
    fn default_configuration_services_every_event() {
        let config = ConfigFile::default().with_overrides(Some(64), Some(3));
        let report = run_simulation(&config).expect("run");
        assert_eq!(report.total_serviced(), 64);
        assert_eq!(report.workers.len(), 3);
    }

    #[test]
    fn invalid_topology_maps_to_configuration_exit_code() {
        let mut config = ConfigFile::default().with_overrides(Some(1), Some(2));
        config.run.entities = vec![EntityRange::new(1, 3)];
        let error = run_simulation(&config).expect_err("range exceeds checkers");
        assert!(matches!(error, CliError::Run(_)));
        assert_eq!(error.exit_code(), 3);
    }
}
