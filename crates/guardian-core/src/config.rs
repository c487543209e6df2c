//! Run configuration consumed by the orchestrator.

use crate::poll::PollPolicy;
use crate::{AnalysisMode, FilterRule, LOAD_FILTERS};

/// Number of checker cores used when no configuration says otherwise.
pub const DEFAULT_CHECKERS: u8 = 4;

/// Inclusive checker-core range of one scheduling entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct EntityRange {
    /// First checker core.
    pub start_core: u8,
    /// Last checker core.
    pub end_core: u8,
}

impl EntityRange {
    /// Creates a range covering `start_core..=end_core`.
    #[must_use]
    pub const fn new(start_core: u8, end_core: u8) -> Self {
        Self {
            start_core,
            end_core,
        }
    }
}

/// Everything the orchestrator needs to program and drive one run.
///
/// Entities are assigned ids in list order. An empty entity list yields a
/// single entity spanning every checker core.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct RunConfig {
    /// Number of checker cores, each served by one drain worker.
    pub checkers: u8,
    /// Analysis feature enabled during the measured region.
    pub mode: AnalysisMode,
    /// Core that aggregates checker results, if any.
    pub aggregator_core: Option<u8>,
    /// Filter width override.
    pub filter_width: Option<u8>,
    /// Filter rules programmed before the run.
    pub filters: Vec<FilterRule>,
    /// Scheduling entity ranges, in id order.
    pub entities: Vec<EntityRange>,
    /// Budget for workers to register.
    pub initialization: PollPolicy,
    /// Budget for each worker to observe Running.
    pub worker_start: PollPolicy,
    /// Budget for the accelerator to quiesce after stop.
    pub quiescence: PollPolicy,
    /// Budget for workers to deregister after quiescence.
    pub termination: PollPolicy,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            checkers: DEFAULT_CHECKERS,
            mode: AnalysisMode::default(),
            aggregator_core: None,
            filter_width: None,
            filters: LOAD_FILTERS.to_vec(),
            entities: Vec::new(),
            initialization: PollPolicy::default(),
            worker_start: PollPolicy::default(),
            quiescence: PollPolicy::default(),
            termination: PollPolicy::default(),
        }
    }
}

impl RunConfig {
    /// Default configuration for `checkers` checker cores.
    #[must_use]
    pub fn with_checkers(checkers: u8) -> Self {
        Self {
            checkers,
            ..Self::default()
        }
    }

    /// Entity ranges to program, after applying the single-entity default.
    #[must_use]
    pub fn entity_ranges(&self) -> Vec<EntityRange> {
        if self.entities.is_empty() {
            vec![EntityRange::new(1, self.checkers)]
        } else {
            self.entities.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{EntityRange, RunConfig, DEFAULT_CHECKERS};
    use crate::{AnalysisMode, LOAD_FILTERS};

    #[test]
    fn default_checks_loads_across_all_checkers() {
        let config = RunConfig::default();
        assert_eq!(config.checkers, DEFAULT_CHECKERS);
        assert_eq!(config.mode, AnalysisMode::FaultInjection);
        assert_eq!(config.filters.as_slice(), LOAD_FILTERS);
        assert_eq!(
            config.entity_ranges(),
            vec![EntityRange::new(1, DEFAULT_CHECKERS)]
        );
    }

    #[test]
    fn explicit_entities_are_kept_in_order() {
        let config = RunConfig {
            entities: vec![EntityRange::new(3, 3), EntityRange::new(1, 2)],
            ..RunConfig::with_checkers(3)
        };
        assert_eq!(
            config.entity_ranges(),
            vec![EntityRange::new(3, 3), EntityRange::new(1, 2)]
        );
    }
}
