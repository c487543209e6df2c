//! End-to-end run orchestration on the control core.
//!
//! [`Orchestrator::run`] programs the accelerator, spawns one drain worker
//! per checker core, measures a [`Workload`] between Running and Stopping,
//! and tears everything down again in the reverse order: quiescence,
//! termination barrier, disable, counter snapshots, privilege release, Idle.

use std::thread;
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::poll::WaitError;
use crate::{
    AcceleratorCommands, CommandError, ConfigError, CounterSnapshot, DetectionLatencies,
    DrainError, DrainReport, DrainWorker, ErrorClass, FilterTable, LifecycleController,
    LifecycleError, LifecycleState, PrivilegeControl, PrivilegeGuard, ReportError, RunConfig,
    RunReport, SchedulingPolicy, SchedulingTable,
};

/// Failure reported by a measured workload.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WorkloadError {
    /// Instructions were presented while no analysis feature was enabled.
    #[error("monitoring is not enabled")]
    MonitoringDisabled,
    /// The instruction mix never produces a routed event.
    #[error("no instruction in the mix is routed to a checker")]
    NoMatchingInstructions,
    /// The event buffer stayed full past the stall budget.
    #[error(transparent)]
    Stalled(#[from] WaitError),
    /// Workload-specific failure.
    #[error("workload failed: {0}")]
    Failed(String),
}

/// Code measured between the Running and Stopping transitions.
pub trait Workload {
    /// Name shown in the run report.
    fn name(&self) -> &str;

    /// Executes the measured region.
    ///
    /// # Errors
    ///
    /// Returns [`WorkloadError`] when the workload cannot complete. The run
    /// is aborted and torn down.
    fn run(&mut self) -> Result<(), WorkloadError>;
}

/// Aggregated failure of one orchestrated run.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RunError {
    /// Programming filters or scheduling failed.
    #[error("configuration failed: {0}")]
    Config(#[from] ConfigError),
    /// A lifecycle transition was rejected.
    #[error("lifecycle error: {0}")]
    Lifecycle(#[from] LifecycleError),
    /// Workers did not register in time.
    #[error("initialization barrier: {0}")]
    InitializationTimeout(WaitError),
    /// The accelerator did not quiesce after stop.
    #[error("quiescence: {0}")]
    QuiescenceTimeout(WaitError),
    /// Workers did not deregister after quiescence.
    #[error("termination barrier: {0}")]
    TerminationTimeout(WaitError),
    /// A drain worker failed.
    #[error(transparent)]
    Worker(#[from] DrainError),
    /// A drain worker thread panicked.
    #[error("worker {core} panicked")]
    WorkerPanicked {
        /// Worker core.
        core: u8,
    },
    /// The measured workload failed.
    #[error(transparent)]
    Workload(#[from] WorkloadError),
    /// Collecting the report failed.
    #[error("report: {0}")]
    Report(#[from] ReportError),
    /// An accelerator command failed outside configuration.
    #[error(transparent)]
    Command(#[from] CommandError),
}

impl RunError {
    /// Returns the error class.
    #[must_use]
    pub const fn class(&self) -> ErrorClass {
        match self {
            Self::Config(error) => error.class(),
            Self::Lifecycle(_) | Self::WorkerPanicked { .. } => ErrorClass::Lifecycle,
            Self::InitializationTimeout(_)
            | Self::QuiescenceTimeout(_)
            | Self::TerminationTimeout(_) => ErrorClass::Timeout,
            Self::Worker(_) | Self::Report(_) | Self::Command(_) => ErrorClass::HardwareQuery,
            Self::Workload(_) => ErrorClass::Workload,
        }
    }
}

/// Filter and scheduling tables programmed for a run.
#[derive(Debug, Clone)]
pub struct Topology {
    /// Programmed filter rules.
    pub filters: FilterTable,
    /// Checker count, scheduling entities, and mapper.
    pub scheduling: SchedulingTable,
}

#[derive(Debug)]
struct Measurement {
    elapsed: Duration,
    final_status: u64,
    before_reset: CounterSnapshot,
    after_reset: CounterSnapshot,
    latencies: DetectionLatencies,
}

/// Drives configuration, lifecycle, workers, and reporting for one
/// accelerator.
#[derive(Debug)]
pub struct Orchestrator<'a, A: ?Sized> {
    accelerator: &'a A,
    config: RunConfig,
}

impl<'a, A> Orchestrator<'a, A>
where
    A: AcceleratorCommands + PrivilegeControl + ?Sized,
{
    /// Creates an orchestrator for `accelerator`.
    #[must_use]
    pub const fn new(accelerator: &'a A, config: RunConfig) -> Self {
        Self {
            accelerator,
            config,
        }
    }

    /// Configuration used for runs.
    #[must_use]
    pub const fn config(&self) -> &RunConfig {
        &self.config
    }

    /// Programs checkers, aggregator, filters, scheduling entities, and the
    /// mapper. The mapper binds every filtered class group to every entity.
    ///
    /// # Errors
    ///
    /// Returns the first rejected configuration step.
    pub fn configure(&self) -> Result<Topology, ConfigError> {
        let commands = self.accelerator;
        let mut scheduling = SchedulingTable::new();
        scheduling.set_number_of_checkers(commands, self.config.checkers)?;
        if let Some(core) = self.config.aggregator_core {
            scheduling.set_aggregator(commands, core)?;
        }

        let mut filters = FilterTable::new();
        filters.add_filters(commands, &self.config.filters)?;
        if let Some(width) = self.config.filter_width {
            filters.set_filter_width(commands, width)?;
        }

        let mut se_mask = 0u16;
        for (index, range) in self.config.entity_ranges().iter().enumerate() {
            let id = u8::try_from(index).map_err(|_| ConfigError::InvalidEntityId(u8::MAX))?;
            let entity = scheduling.add_scheduling_entity(
                commands,
                id,
                range.start_core,
                range.end_core,
                SchedulingPolicy::RoundRobin,
            )?;
            se_mask |= 1 << entity.id;
        }
        scheduling.set_mapper(commands, filters.class_group_mask(), se_mask)?;

        info!(
            checkers = scheduling.checkers(),
            filters = filters.rule_count(),
            entities = scheduling.entity_count(),
            "accelerator configured"
        );
        Ok(Topology {
            filters,
            scheduling,
        })
    }

    /// Configures the accelerator, then runs `workload` under monitoring
    /// with one drain worker per checker core.
    ///
    /// On any failure after configuration the run is cancelled, workers are
    /// joined, the analysis feature is disabled, and privileged mode is
    /// released before the error is returned. A failed worker's error takes
    /// precedence over a barrier or quiescence timeout it caused.
    ///
    /// # Errors
    ///
    /// Returns [`RunError`] describing the first failure.
    pub fn run<W>(&self, workload: &mut W) -> Result<RunReport, RunError>
    where
        W: Workload + ?Sized,
    {
        let topology = self.configure()?;
        let checkers = topology.scheduling.checkers();
        let mut controller = LifecycleController::new(usize::from(checkers));
        let observer = controller.observer();

        let (measured, joined) = thread::scope(|scope| {
            let handles: Vec<_> = (1..=checkers)
                .map(|core| {
                    let observer = observer.clone();
                    let worker = DrainWorker::new(self.accelerator, core)
                        .with_start_policy(self.config.worker_start);
                    (core, scope.spawn(move || worker.run(&observer)))
                })
                .collect();

            let measured = self.measure(&mut controller, workload);

            let joined: Vec<Result<DrainReport, RunError>> = handles
                .into_iter()
                .map(|(core, handle)| match handle.join() {
                    Ok(result) => result.map_err(RunError::from),
                    Err(_) => Err(RunError::WorkerPanicked { core }),
                })
                .collect();
            (measured, joined)
        });

        if controller.state() != LifecycleState::Idle {
            if let Err(error) = controller.finish(self.accelerator) {
                warn!(%error, "failed to return to idle");
                if measured.is_ok() {
                    return Err(error.into());
                }
            }
        }

        let workers = joined.into_iter().collect::<Result<Vec<_>, _>>();
        let (measurement, workers) = match (measured, workers) {
            (Ok(measurement), Ok(workers)) => (measurement, workers),
            (Err(error), Err(worker_error)) if error.class() == ErrorClass::Timeout => {
                warn!(%error, "measurement failed after a worker error");
                return Err(worker_error);
            }
            (Err(error), _) | (Ok(_), Err(error)) => return Err(error),
        };
        let report = RunReport {
            workload: workload.name().to_string(),
            elapsed: measurement.elapsed,
            final_status: measurement.final_status,
            before_reset: measurement.before_reset,
            after_reset: measurement.after_reset,
            workers,
            latencies: measurement.latencies,
        };
        info!(
            workload = %report.workload,
            serviced = report.total_serviced(),
            elapsed_us = u64::try_from(report.elapsed.as_micros()).unwrap_or(u64::MAX),
            "run complete"
        );
        Ok(report)
    }

    fn measure<W>(
        &self,
        controller: &mut LifecycleController,
        workload: &mut W,
    ) -> Result<Measurement, RunError>
    where
        W: Workload + ?Sized,
    {
        let commands = self.accelerator;
        if let Err(error) = controller.await_initialization(&self.config.initialization) {
            warn!(%error, "workers did not initialize");
            self.abort(controller);
            return Err(RunError::InitializationTimeout(error));
        }

        let guard = match PrivilegeGuard::acquire(commands) {
            Ok(guard) => guard,
            Err(error) => {
                self.abort(controller);
                return Err(error.into());
            }
        };

        let monitored = self.monitored(controller, workload);
        if monitored.is_err() {
            self.abort(controller);
        }
        let disabled = commands.disable(self.config.mode);
        let (elapsed, final_status) = match (monitored, disabled) {
            (Ok(timing), Ok(())) => timing,
            (Err(error), disabled) => {
                if let Err(disable_error) = disabled {
                    warn!(error = %disable_error, "failed to disable after aborted run");
                }
                return Err(error);
            }
            (Ok(_), Err(error)) => return Err(error.into()),
        };

        let before_reset = CounterSnapshot::read(commands)?;
        commands.reset_counters()?;
        let after_reset = CounterSnapshot::read(commands)?;
        let latencies = DetectionLatencies::read(commands, controller_checkers(controller))?;
        guard.release()?;
        debug!(?before_reset, ?after_reset, "counters collected");

        Ok(Measurement {
            elapsed,
            final_status,
            before_reset,
            after_reset,
            latencies,
        })
    }

    fn monitored<W>(
        &self,
        controller: &mut LifecycleController,
        workload: &mut W,
    ) -> Result<(Duration, u64), RunError>
    where
        W: Workload + ?Sized,
    {
        let commands = self.accelerator;
        commands.enable(self.config.mode)?;
        commands.reset_counters()?;
        controller.start(commands)?;

        let started = Instant::now();
        workload.run()?;
        let elapsed = started.elapsed();

        controller.request_stop(commands)?;
        let final_status = controller
            .wait_for_quiescence(commands, &self.config.quiescence)
            .map_err(RunError::QuiescenceTimeout)?;
        controller
            .wait_for_termination(&self.config.termination)
            .map_err(RunError::TerminationTimeout)?;
        Ok((elapsed, final_status))
    }

    fn abort(&self, controller: &mut LifecycleController) {
        if let Err(error) = controller.cancel(self.accelerator) {
            warn!(%error, "failed to cancel run");
        }
    }
}

fn controller_checkers(controller: &LifecycleController) -> u8 {
    u8::try_from(controller.expected_workers()).unwrap_or(u8::MAX)
}
