//! End-to-end runs against the software accelerator.

#![allow(clippy::pedantic, clippy::nursery)]

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use guardian_core::{
    AcceleratorCommands, AnalysisMode, BufferStatus, CommandError, DrainError, EntityRange,
    ErrorClass, LifecycleState, Orchestrator, PollPolicy, RunConfig, RunError, SimAccelerator,
    SyntheticLoads, Workload, WorkloadError,
};
use proptest as _;
use rstest as _;
#[cfg(feature = "serde")]
use serde as _;
use thiserror as _;
use tracing as _;

fn six_checker_config() -> RunConfig {
    RunConfig {
        entities: vec![
            EntityRange::new(1, 2),
            EntityRange::new(3, 3),
            EntityRange::new(4, 6),
        ],
        ..RunConfig::with_checkers(6)
    }
}

#[test]
fn hundred_loads_across_three_entities_are_all_serviced() {
    let sim = SimAccelerator::default();
    let orchestrator = Orchestrator::new(&sim, six_checker_config());

    let report = orchestrator
        .run(&mut SyntheticLoads::new(&sim, 100))
        .expect("run completes");

    assert_eq!(report.total_serviced(), 100);
    assert_eq!(sim.serviced_events(), 100);
    assert_eq!(sim.buffer_depth_now(), 0);
    assert_eq!(sim.buffer_status(), Ok(BufferStatus::Empty));

    let cores: Vec<u8> = report.workers.iter().map(|worker| worker.core).collect();
    assert_eq!(cores, vec![1, 2, 3, 4, 5, 6]);

    // Entities alternate per event; each entity rotates over its own cores.
    let dispatched: Vec<u64> = (1..=6).map(|core| sim.dispatched_to(core)).collect();
    assert_eq!(dispatched, vec![17, 17, 33, 11, 11, 11]);

    assert_eq!(report.before_reset.merged_instructions, 100);
    assert_eq!(report.before_reset.instructions_committed, 200);
    assert!(report.before_reset.global_cycles > 0);
    assert!(report.after_reset.is_zero());
    assert_eq!(report.latencies.len(), 6);
    assert!(report.final_status >= guardian_core::QUIESCED_STATUS);
}

#[test]
fn run_leaves_the_accelerator_idle_and_unprivileged() {
    let sim = SimAccelerator::default();
    Orchestrator::new(&sim, six_checker_config())
        .run(&mut SyntheticLoads::new(&sim, 10))
        .expect("run completes");

    assert_eq!(sim.published_state(), LifecycleState::Idle);
    assert!(!sim.is_privileged());
    assert!(!sim.is_enabled(AnalysisMode::FaultInjection));
    for _ in 0..32 {
        assert_eq!(sim.buffer_status(), Ok(BufferStatus::Empty));
    }
}

#[test]
fn small_buffer_stalls_the_workload_until_workers_drain() {
    let sim = SimAccelerator::with_capacity(4);
    let report = Orchestrator::new(&sim, RunConfig::with_checkers(2))
        .run(&mut SyntheticLoads::new(&sim, 500))
        .expect("run completes");

    assert_eq!(report.total_serviced(), 500);
    assert_eq!(sim.buffer_depth_now(), 0);
}

#[test]
fn performance_analysis_counts_without_dispatching() {
    let sim = SimAccelerator::default();
    let config = RunConfig {
        mode: AnalysisMode::PerformanceAnalysis,
        ..RunConfig::with_checkers(2)
    };
    let report = Orchestrator::new(&sim, config)
        .run(&mut SyntheticLoads::new(&sim, 40))
        .expect("run completes");

    assert_eq!(report.total_serviced(), 0);
    assert_eq!(report.before_reset.merged_instructions, 40);
    assert!(!sim.is_enabled(AnalysisMode::PerformanceAnalysis));
}

#[test]
fn aggregator_and_filter_width_are_programmed() {
    let sim = SimAccelerator::default();
    let config = RunConfig {
        aggregator_core: Some(0),
        filter_width: Some(4),
        ..RunConfig::with_checkers(3)
    };
    Orchestrator::new(&sim, config)
        .run(&mut SyntheticLoads::new(&sim, 5))
        .expect("run completes");

    assert_eq!(sim.aggregator(), Some(0));
    assert_eq!(sim.filter_width(), Some(4));
    assert_eq!(sim.checkers(), 3);
}

struct Counting {
    calls: u32,
}

impl Workload for Counting {
    fn name(&self) -> &str {
        "counting"
    }

    fn run(&mut self) -> Result<(), WorkloadError> {
        self.calls += 1;
        Ok(())
    }
}

#[test]
fn custom_workload_runs_once_and_names_the_report() {
    let sim = SimAccelerator::default();
    let mut workload = Counting { calls: 0 };
    let report = Orchestrator::new(&sim, RunConfig::with_checkers(1))
        .run(&mut workload)
        .expect("run completes");

    assert_eq!(workload.calls, 1);
    assert_eq!(report.workload, "counting");
    assert_eq!(report.total_serviced(), 0);
    assert!(report.to_string().contains("==== counting ===="));
}

#[test]
fn depth_failure_in_a_worker_fails_the_run() {
    let sim = SimAccelerator::default();
    sim.fail_buffer_depth_after(0);
    let started = Instant::now();
    let error = Orchestrator::new(&sim, RunConfig::with_checkers(1))
        .run(&mut SyntheticLoads::new(&sim, 3))
        .expect_err("worker cannot query depth");

    assert_eq!(
        error,
        RunError::Worker(DrainError::Hardware {
            core: 1,
            source: CommandError::HardwareQuery {
                operation: "buffer_depth"
            },
        })
    );
    assert_eq!(error.class(), ErrorClass::HardwareQuery);
    // The buffered events have no worker left, so quiescence is abandoned
    // instead of running out the default budget.
    assert!(started.elapsed() < Duration::from_secs(4));
    assert!(!sim.is_privileged());
    assert!(!sim.is_enabled(AnalysisMode::FaultInjection));
}

#[test]
fn consecutive_runs_reuse_the_same_accelerator_state() {
    let sim = SimAccelerator::default();
    Orchestrator::new(&sim, RunConfig::with_checkers(2))
        .run(&mut SyntheticLoads::new(&sim, 8))
        .expect("first run");
    assert_eq!(sim.published_state(), LifecycleState::Idle);
    assert_eq!(sim.buffer_depth_now(), 0);
    assert_eq!(sim.serviced_events(), 8);

    let second = Orchestrator::new(&sim, RunConfig::with_checkers(2))
        .run(&mut SyntheticLoads::new(&sim, 8))
        .expect("second run");
    assert_eq!(second.total_serviced(), 8);
    assert_eq!(sim.published_state(), LifecycleState::Idle);
    assert_eq!(sim.buffer_depth_now(), 0);
    assert_eq!(sim.serviced_events(), 16);
}

/// Leaves the status word held on return and flushes events into the
/// buffer from another thread once the run is stopping.
struct LateFlush {
    sim: Arc<SimAccelerator>,
    flusher: Option<thread::JoinHandle<()>>,
}

impl Workload for LateFlush {
    fn name(&self) -> &str {
        "late flush"
    }

    fn run(&mut self) -> Result<(), WorkloadError> {
        self.sim.hold_quiescence(true);
        let sim = Arc::clone(&self.sim);
        self.flusher = Some(thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            sim.inject_events(5);
            sim.hold_quiescence(false);
        }));
        Ok(())
    }
}

#[test]
fn events_flushed_after_stop_are_drained_before_quiescence() {
    let sim = Arc::new(SimAccelerator::default());
    let mut workload = LateFlush {
        sim: Arc::clone(&sim),
        flusher: None,
    };
    let config = RunConfig {
        quiescence: PollPolicy::with_timeout(Duration::from_secs(5)),
        ..RunConfig::with_checkers(2)
    };

    let report = Orchestrator::new(&*sim, config)
        .run(&mut workload)
        .expect("late events are drained");
    workload
        .flusher
        .take()
        .expect("flusher started")
        .join()
        .expect("flusher thread");

    assert_eq!(report.total_serviced(), 5);
    assert_eq!(sim.buffer_depth_now(), 0);
    assert_eq!(sim.published_state(), LifecycleState::Idle);
}
