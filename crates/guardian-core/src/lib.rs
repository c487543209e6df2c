//! Control plane for a hardware-assisted runtime verification accelerator.
//!
//! The crate programs instruction filters and checker scheduling, drives the
//! `Idle -> Running -> Stopping -> Idle` run lifecycle across cores, drains
//! the accelerator's event buffer from worker cores, and collects counters
//! and detection latencies. The accelerator is reached through the
//! [`AcceleratorCommands`] and [`PrivilegeControl`] traits; [`SimAccelerator`]
//! implements both in software.

/// Accelerator command interface and privileged monitoring mode.
pub mod command;
pub use command::{
    AcceleratorCommands, AnalysisMode, BufferStatus, CommandError, CounterKind, PrivilegeControl,
    PrivilegeGuard, QUIESCED_STATUS,
};

/// Configuration error taxonomy.
pub mod error;
pub use error::{ConfigError, ErrorClass};

/// Instruction filter rules and the per-run filter table.
pub mod filter;
pub use filter::{
    FilterKey, FilterRule, FilterTable, CLASS_GROUP_COUNT, DATA_PATH_LOAD_QUEUE, LOAD_CLASS_GROUP,
    LOAD_FILTERS, MAX_COMPRESSED_MSB, MAX_COMPRESSED_OPCODE, MAX_DATA_PATH, MAX_FILTER_WIDTH,
    MAX_OPCODE, MAX_OPCODE_CLASS,
};

/// Checker count, scheduling entities, and the class-group mapper.
pub mod schedule;
pub use schedule::{
    Mapper, RoundRobinCursor, SchedulingEntity, SchedulingPolicy, SchedulingTable, MAX_CHECKERS,
    MAX_SCHEDULING_ENTITIES,
};

/// Bounded polling primitives.
pub mod poll;
pub use poll::{poll_until, PollPolicy, WaitError};

/// Run lifecycle state machine and barriers.
pub mod lifecycle;
pub use lifecycle::{
    InvalidTransition, LifecycleController, LifecycleError, LifecycleObserver, LifecycleState,
    WorkerTicket,
};

/// Event buffer drain workers.
pub mod drain;
pub use drain::{DrainError, DrainPass, DrainReport, DrainWorker, SERVICE_BATCH};

/// Counter snapshots, detection latencies, and run reports.
pub mod report;
pub use report::{
    read_detection_latency, CounterSnapshot, DetectionLatencies, ReportError, RunReport,
};

/// Run configuration.
pub mod config;
pub use config::{EntityRange, RunConfig, DEFAULT_CHECKERS};

/// End-to-end run orchestration.
pub mod orchestrator;
pub use orchestrator::{Orchestrator, RunError, Topology, Workload, WorkloadError};

/// Software accelerator model and synthetic workload.
pub mod sim;
pub use sim::{
    Instruction, Observation, SimAccelerator, SyntheticLoads, DEFAULT_BUFFER_CAPACITY, LOAD_WORD,
    STORE_WORD,
};

#[cfg(test)]
use proptest as _;
#[cfg(test)]
use rstest as _;
