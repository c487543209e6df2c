//! Counter snapshots, detection latencies, and the end-of-run report.

use std::fmt;
use std::time::Duration;

use thiserror::Error;

use crate::{AcceleratorCommands, CommandError, CounterKind, DrainReport};

/// Failure while collecting report data.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReportError {
    /// Checker index outside `0..total`.
    #[error("checker index {index} is out of range (total {total})")]
    OutOfRange {
        /// Requested index.
        index: u8,
        /// Number of checkers.
        total: u8,
    },
    /// Reading from the accelerator failed.
    #[error(transparent)]
    Command(#[from] CommandError),
}

/// Accelerator counters read at one point in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct CounterSnapshot {
    /// Instructions merged into monitored events.
    pub merged_instructions: u64,
    /// Instructions committed by the monitored core.
    pub instructions_committed: u64,
    /// Global accelerator cycle counter.
    pub global_cycles: u64,
}

impl CounterSnapshot {
    /// Reads all three counters.
    ///
    /// Callers take snapshots only at reset points (after disable, after a
    /// counter reset) so the three reads are consistent.
    ///
    /// # Errors
    ///
    /// Returns the first failing counter read.
    pub fn read<C>(commands: &C) -> Result<Self, CommandError>
    where
        C: AcceleratorCommands + ?Sized,
    {
        Ok(Self {
            merged_instructions: commands.read_counter(CounterKind::MergedInstructions)?,
            instructions_committed: commands.read_counter(CounterKind::InstructionsCommitted)?,
            global_cycles: commands.read_counter(CounterKind::GlobalCycles)?,
        })
    }

    /// Counter growth from `earlier` to `self`, saturating at zero.
    #[must_use]
    pub const fn delta(&self, earlier: &Self) -> Self {
        Self {
            merged_instructions: self
                .merged_instructions
                .saturating_sub(earlier.merged_instructions),
            instructions_committed: self
                .instructions_committed
                .saturating_sub(earlier.instructions_committed),
            global_cycles: self.global_cycles.saturating_sub(earlier.global_cycles),
        }
    }

    /// True when every counter reads zero.
    #[must_use]
    pub const fn is_zero(&self) -> bool {
        self.merged_instructions == 0 && self.instructions_committed == 0 && self.global_cycles == 0
    }
}

/// Reads the last recorded detection latency of checker `index`.
///
/// # Errors
///
/// Returns [`ReportError::OutOfRange`] unless `index < total`, or the read
/// failure.
pub fn read_detection_latency<C>(commands: &C, index: u8, total: u8) -> Result<u64, ReportError>
where
    C: AcceleratorCommands + ?Sized,
{
    if index >= total {
        return Err(ReportError::OutOfRange { index, total });
    }
    Ok(commands.read_detection_latency(index)?)
}

/// Detection latencies of every checker, snapshotted once after the run.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DetectionLatencies {
    cycles: Vec<u64>,
}

impl DetectionLatencies {
    /// Reads latencies for checkers `0..total`.
    ///
    /// # Errors
    ///
    /// Returns the first failing read.
    pub fn read<C>(commands: &C, total: u8) -> Result<Self, ReportError>
    where
        C: AcceleratorCommands + ?Sized,
    {
        let cycles = (0..total)
            .map(|index| read_detection_latency(commands, index, total))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { cycles })
    }

    /// Latency of checker `index`.
    ///
    /// # Errors
    ///
    /// Returns [`ReportError::OutOfRange`] outside the snapshotted range.
    pub fn get(&self, index: u8) -> Result<u64, ReportError> {
        self.cycles
            .get(usize::from(index))
            .copied()
            .ok_or(ReportError::OutOfRange {
                index,
                total: u8::try_from(self.cycles.len()).unwrap_or(u8::MAX),
            })
    }

    /// Number of checkers covered.
    #[must_use]
    pub fn len(&self) -> usize {
        self.cycles.len()
    }

    /// True when no checkers were read.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.cycles.is_empty()
    }

    /// Latencies in checker order.
    #[must_use]
    pub fn as_slice(&self) -> &[u64] {
        &self.cycles
    }
}

/// Everything collected after a completed run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    /// Name of the measured workload.
    pub workload: String,
    /// Wall-clock time between Running and Stopping.
    pub elapsed: Duration,
    /// Accelerator status at quiescence.
    pub final_status: u64,
    /// Counters after the accelerator was disabled.
    pub before_reset: CounterSnapshot,
    /// Counters right after the counter reset.
    pub after_reset: CounterSnapshot,
    /// Per-worker drain results, ordered by core.
    pub workers: Vec<DrainReport>,
    /// Per-checker detection latencies.
    pub latencies: DetectionLatencies,
}

impl RunReport {
    /// Events serviced across all workers.
    #[must_use]
    pub fn total_serviced(&self) -> u64 {
        self.workers.iter().map(|worker| worker.serviced).sum()
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "==== {} ====", self.workload)?;
        writeln!(f, "Execution time: {:.6} seconds", self.elapsed.as_secs_f64())?;
        writeln!(f, "Final status: {:#x}", self.final_status)?;
        for (label, counters) in [("Before reset", &self.before_reset), ("After reset", &self.after_reset)] {
            writeln!(
                f,
                "{label}: m-counter {}, i-counter {}, g-counter {}",
                counters.merged_instructions, counters.instructions_committed, counters.global_cycles
            )?;
        }
        for worker in &self.workers {
            writeln!(
                f,
                "Worker C{}: serviced {} events in {} passes",
                worker.core, worker.serviced, worker.passes
            )?;
        }
        writeln!(f, "Total serviced: {}", self.total_serviced())?;
        writeln!(f, "[Detection latency (unit: cycles)]")?;
        for (index, cycles) in self.latencies.as_slice().iter().enumerate() {
            writeln!(f, "  checker {index}: {cycles}")?;
        }
        Ok(())
    }
}
