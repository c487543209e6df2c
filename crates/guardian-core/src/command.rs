//! Accelerator command and privilege capability traits.
//!
//! Every interaction with the monitoring accelerator goes through
//! [`AcceleratorCommands`]. Implementations must be shareable between the
//! orchestrating core and all drain workers, so every method takes `&self`.

use thiserror::Error;
use tracing::warn;

use crate::{FilterRule, LifecycleState, SchedulingEntity};

/// Accelerator status value at or above which the event pipeline is quiesced.
pub const QUIESCED_STATUS: u64 = 0x1_FFFF;

/// Accelerator feature enabled for the duration of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
#[repr(u8)]
pub enum AnalysisMode {
    /// Front-end performance analysis (counters only).
    PerformanceAnalysis = 0x01,
    /// Fault-injection checking with events dispatched to checkers.
    #[default]
    FaultInjection = 0x02,
}

impl AnalysisMode {
    /// Returns the feature selector written with enable/disable commands.
    #[must_use]
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    /// Converts a feature selector back into a mode.
    #[must_use]
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x01 => Some(Self::PerformanceAnalysis),
            0x02 => Some(Self::FaultInjection),
            _ => None,
        }
    }
}

/// Hardware counters readable through the command interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CounterKind {
    /// Instructions merged into monitored events.
    MergedInstructions,
    /// Instructions committed by the monitored core.
    InstructionsCommitted,
    /// Global accelerator cycle counter.
    GlobalCycles,
}

/// Coarse event-buffer occupancy reported by the accelerator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BufferStatus {
    /// No events are pending.
    Empty,
    /// At least one event is pending.
    NonEmpty,
}

/// Failure reported by the command or privilege interface.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Error)]
pub enum CommandError {
    /// The accelerator did not answer a query or rejected a command.
    #[error("accelerator query `{operation}` failed")]
    HardwareQuery {
        /// Command that failed.
        operation: &'static str,
    },
    /// The accelerator refused a configuration command.
    #[error("accelerator rejected `{operation}`: {reason}")]
    Rejected {
        /// Command that was refused.
        operation: &'static str,
        /// Reason reported by the implementation.
        reason: String,
    },
    /// Privileged monitoring mode was entered twice.
    #[error("privileged monitoring mode is already held")]
    PrivilegeReentered,
    /// Privileged monitoring mode was exited without being held.
    #[error("privileged monitoring mode is not held")]
    PrivilegeNotHeld,
}

/// Opaque gateway to the monitoring accelerator.
///
/// All calls are synchronous and complete in bounded hardware time.
pub trait AcceleratorCommands: Send + Sync {
    /// Programs one filter rule.
    ///
    /// # Errors
    ///
    /// Returns [`CommandError`] when the accelerator refuses the rule.
    fn configure_filter(&self, rule: &FilterRule) -> Result<(), CommandError>;

    /// Programs one scheduling entity.
    ///
    /// # Errors
    ///
    /// Returns [`CommandError`] when the accelerator refuses the entity.
    fn configure_scheduling_entity(&self, entity: &SchedulingEntity) -> Result<(), CommandError>;

    /// Binds event class groups to scheduling entities.
    ///
    /// # Errors
    ///
    /// Returns [`CommandError`] when the accelerator refuses the mapping.
    fn configure_mapper(&self, class_group_mask: u16, se_mask: u16) -> Result<(), CommandError>;

    /// Sets the number of checker cores events may be dispatched to.
    ///
    /// # Errors
    ///
    /// Returns [`CommandError`] when the accelerator refuses the count.
    fn set_number_of_checkers(&self, count: u8) -> Result<(), CommandError>;

    /// Selects the core that aggregates checker results.
    ///
    /// # Errors
    ///
    /// Returns [`CommandError`] when the accelerator refuses the core id.
    fn configure_aggregator(&self, core: u8) -> Result<(), CommandError>;

    /// Sets the simulated event-filter width used for debugging.
    ///
    /// # Errors
    ///
    /// Returns [`CommandError`] when the accelerator refuses the width.
    fn set_filter_width(&self, width: u8) -> Result<(), CommandError>;

    /// Announces a lifecycle transition to the accelerator.
    ///
    /// # Errors
    ///
    /// Returns [`CommandError`] when the write fails.
    fn publish_state(&self, state: LifecycleState) -> Result<(), CommandError>;

    /// Enables an analysis feature.
    ///
    /// # Errors
    ///
    /// Returns [`CommandError`] when the write fails.
    fn enable(&self, mode: AnalysisMode) -> Result<(), CommandError>;

    /// Disables an analysis feature and freezes its counters.
    ///
    /// # Errors
    ///
    /// Returns [`CommandError`] when the write fails.
    fn disable(&self, mode: AnalysisMode) -> Result<(), CommandError>;

    /// Resets the accelerator performance counters.
    ///
    /// # Errors
    ///
    /// Returns [`CommandError`] when the write fails.
    fn reset_counters(&self) -> Result<(), CommandError>;

    /// Reads one hardware counter.
    ///
    /// # Errors
    ///
    /// Returns [`CommandError::HardwareQuery`] when the read fails.
    fn read_counter(&self, kind: CounterKind) -> Result<u64, CommandError>;

    /// Reads the last recorded detection latency of one checker.
    ///
    /// # Errors
    ///
    /// Returns [`CommandError::HardwareQuery`] when the read fails.
    fn read_detection_latency(&self, index: u8) -> Result<u64, CommandError>;

    /// Reads the accelerator status word.
    ///
    /// # Errors
    ///
    /// Returns [`CommandError::HardwareQuery`] when the read fails.
    fn status(&self) -> Result<u64, CommandError>;

    /// Reads the coarse event-buffer status.
    ///
    /// # Errors
    ///
    /// Returns [`CommandError::HardwareQuery`] when the read fails.
    fn buffer_status(&self) -> Result<BufferStatus, CommandError>;

    /// Reads the number of pending events.
    ///
    /// # Errors
    ///
    /// Returns [`CommandError::HardwareQuery`] when the read fails.
    fn buffer_depth(&self) -> Result<u32, CommandError>;

    /// Consumes exactly one pending event.
    ///
    /// Returns `false` when the buffer was already empty, which happens when
    /// another worker serviced the event first.
    ///
    /// # Errors
    ///
    /// Returns [`CommandError`] when the command cannot be issued.
    fn service_one_event(&self) -> Result<bool, CommandError>;
}

/// Paired, non-reentrant privileged monitoring mode.
pub trait PrivilegeControl: Send + Sync {
    /// Enters privileged monitoring mode.
    ///
    /// # Errors
    ///
    /// Returns [`CommandError::PrivilegeReentered`] if the mode is already held.
    fn enter_privileged_monitoring_mode(&self) -> Result<(), CommandError>;

    /// Leaves privileged monitoring mode.
    ///
    /// # Errors
    ///
    /// Returns [`CommandError::PrivilegeNotHeld`] if the mode is not held.
    fn exit_privileged_monitoring_mode(&self) -> Result<(), CommandError>;
}

/// Holds privileged monitoring mode until released or dropped.
#[derive(Debug)]
pub struct PrivilegeGuard<'a, P: PrivilegeControl + ?Sized> {
    control: &'a P,
    held: bool,
}

impl<'a, P: PrivilegeControl + ?Sized> PrivilegeGuard<'a, P> {
    /// Enters privileged mode and returns a guard that leaves it again.
    ///
    /// # Errors
    ///
    /// Propagates the failure of the enter command.
    pub fn acquire(control: &'a P) -> Result<Self, CommandError> {
        control.enter_privileged_monitoring_mode()?;
        Ok(Self {
            control,
            held: true,
        })
    }

    /// Leaves privileged mode, reporting any failure.
    ///
    /// # Errors
    ///
    /// Propagates the failure of the exit command.
    pub fn release(mut self) -> Result<(), CommandError> {
        self.held = false;
        self.control.exit_privileged_monitoring_mode()
    }
}

impl<P: PrivilegeControl + ?Sized> Drop for PrivilegeGuard<'_, P> {
    fn drop(&mut self) {
        if self.held {
            if let Err(error) = self.control.exit_privileged_monitoring_mode() {
                warn!(%error, "failed to leave privileged monitoring mode");
            }
        }
    }
}
