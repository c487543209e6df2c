use thiserror::Error;

use crate::{CommandError, FilterRule};

/// Error classes used for reporting and failure policy decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorClass {
    /// Rejected filter, scheduling entity, or mapper configuration.
    Configuration,
    /// A bounded wait exhausted its budget.
    Timeout,
    /// The command interface reported a failure.
    HardwareQuery,
    /// A lifecycle transition was attempted out of order.
    Lifecycle,
    /// The measured workload failed.
    Workload,
}

/// Configuration failures surfaced while programming filters and scheduling.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// The rule's key is already registered in this run.
    #[error("duplicate filter rule {0}")]
    DuplicateRule(FilterRule),
    /// A rule field is outside the accelerator's valid range.
    #[error("filter field `{field}` value {value:#x} exceeds maximum {max:#x}")]
    InvalidOpcode {
        /// Name of the offending field.
        field: &'static str,
        /// Value supplied by the caller.
        value: u8,
        /// Largest accepted value.
        max: u8,
    },
    /// Filter width outside `1..=MAX_FILTER_WIDTH`.
    #[error("filter width {0} is not supported")]
    InvalidFilterWidth(u8),
    /// Checker count outside `1..=MAX_CHECKERS`.
    #[error("checker count {0} is not supported")]
    InvalidCheckerCount(u8),
    /// Scheduling entity range is empty or outside the checker cores.
    #[error("scheduling range [{start}, {end}] is invalid for {checkers} checkers")]
    InvalidRange {
        /// First checker core of the range.
        start: u8,
        /// Last checker core of the range.
        end: u8,
        /// Number of configured checker cores.
        checkers: u8,
    },
    /// Scheduling entity id cannot be represented in the mapper mask.
    #[error("scheduling entity id {0} is out of range")]
    InvalidEntityId(u8),
    /// Scheduling entity id was registered twice.
    #[error("scheduling entity {0} is already registered")]
    DuplicateEntity(u8),
    /// Mapper referenced scheduling entities that were never registered.
    #[error("mapper references unregistered scheduling entities (mask {0:#06b})")]
    UnknownEntity(u16),
    /// Mapper bound two scheduling entities whose core ranges overlap.
    #[error("scheduling entities {first} and {second} overlap")]
    OverlappingEntities {
        /// Lower entity id.
        first: u8,
        /// Higher entity id.
        second: u8,
    },
    /// Mapper masks must select at least one class group and one entity.
    #[error("mapper masks must not be empty")]
    EmptyMapper,
    /// Mapper was already set for this run.
    #[error("mapper is already configured for this run")]
    MapperAlreadySet,
    /// Aggregator core is not a valid core id.
    #[error("aggregator core {0} is out of range")]
    InvalidAggregator(u8),
    /// Forwarding to the accelerator failed.
    #[error(transparent)]
    Command(#[from] CommandError),
}

impl ConfigError {
    /// Returns the reporting class for this error.
    #[must_use]
    pub const fn class(&self) -> ErrorClass {
        match self {
            Self::Command(_) => ErrorClass::HardwareQuery,
            _ => ErrorClass::Configuration,
        }
    }
}
