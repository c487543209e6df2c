//! Buffer-draining worker run on every non-orchestrating core.

use std::hint;

use thiserror::Error;
use tracing::{debug, trace};

use crate::poll::{PollPolicy, WaitError};
use crate::{
    AcceleratorCommands, CommandError, LifecycleObserver, LifecycleState, QUIESCED_STATUS,
};

/// Number of service commands issued per full batch, matching the
/// accelerator's internal buffer granularity.
pub const SERVICE_BATCH: u32 = 8;

/// Service commands issued during one drain pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct DrainPass {
    /// Full batches of [`SERVICE_BATCH`] commands.
    pub full_batches: u32,
    /// Trailing burst for a depth in `1..SERVICE_BATCH`.
    pub tail: u32,
    /// Commands that actually consumed an event. Lower than
    /// [`DrainPass::commands`] when another worker won the race.
    pub serviced: u64,
}

impl DrainPass {
    /// Service commands issued in this pass.
    #[must_use]
    pub const fn commands(&self) -> u64 {
        self.full_batches as u64 * SERVICE_BATCH as u64 + self.tail as u64
    }

    /// True when the pass observed an empty buffer and issued nothing.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.full_batches == 0 && self.tail == 0
    }
}

/// Outcome of one worker's drain loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct DrainReport {
    /// Worker core.
    pub core: u8,
    /// Cumulative serviced events.
    pub serviced: u64,
    /// Number of drain passes executed.
    pub passes: u64,
}

/// Failure that ended a worker's drain loop.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DrainError {
    /// A depth query or service command failed.
    #[error("worker {core}: {source}")]
    Hardware {
        /// Worker core.
        core: u8,
        /// Underlying command failure.
        source: CommandError,
    },
    /// Waiting for the run to start failed.
    #[error("worker {core}: {source}")]
    Wait {
        /// Worker core.
        core: u8,
        /// Underlying wait failure.
        source: WaitError,
    },
}

/// Drain loop bound to one worker core.
#[derive(Debug)]
pub struct DrainWorker<'a, C: ?Sized> {
    commands: &'a C,
    core: u8,
    start_policy: PollPolicy,
}

impl<'a, C> DrainWorker<'a, C>
where
    C: AcceleratorCommands + ?Sized,
{
    /// Creates a worker for `core`.
    #[must_use]
    pub fn new(commands: &'a C, core: u8) -> Self {
        Self {
            commands,
            core,
            start_policy: PollPolicy::default(),
        }
    }

    /// Overrides the budget for waiting on the Running state.
    #[must_use]
    pub const fn with_start_policy(mut self, policy: PollPolicy) -> Self {
        self.start_policy = policy;
        self
    }

    /// Worker core.
    #[must_use]
    pub const fn core(&self) -> u8 {
        self.core
    }

    /// Services the buffer once: full batches while the depth exceeds one
    /// batch, then a single burst equal to the remaining depth.
    ///
    /// # Errors
    ///
    /// Returns the first failing depth query or service command.
    pub fn drain_pass(&self) -> Result<DrainPass, CommandError> {
        let mut pass = DrainPass::default();
        let mut depth = self.commands.buffer_depth()?;

        while depth >= SERVICE_BATCH {
            pass.serviced += self.service(SERVICE_BATCH)?;
            pass.full_batches += 1;
            depth = self.commands.buffer_depth()?;
        }

        if depth > 0 {
            pass.serviced += self.service(depth)?;
            pass.tail = depth;
        }

        Ok(pass)
    }

    fn service(&self, count: u32) -> Result<u64, CommandError> {
        let mut consumed = 0;
        for _ in 0..count {
            if self.commands.service_one_event()? {
                consumed += 1;
            }
        }
        Ok(consumed)
    }

    /// Registers with the initialization barrier, waits for Running, and
    /// drains until the lifecycle has left Running, a pass finds the buffer
    /// empty, and the accelerator status reaches [`QUIESCED_STATUS`].
    ///
    /// After a cancellation the status is not consulted: the first empty
    /// pass ends the loop. A run cancelled before it starts yields a report
    /// with no serviced events. The ticket is released on every exit path.
    ///
    /// # Errors
    ///
    /// Returns [`DrainError::Hardware`] on the first failing command (the
    /// loop is not retried) or [`DrainError::Wait`] if the run never starts.
    pub fn run(&self, observer: &LifecycleObserver) -> Result<DrainReport, DrainError> {
        let _ticket = observer.register(self.core);
        let mut report = DrainReport {
            core: self.core,
            ..DrainReport::default()
        };

        match observer.wait_for_running(&self.start_policy) {
            Ok(_) => {}
            Err(WaitError::Cancelled(_)) => {
                debug!(core = self.core, "run cancelled before start");
                return Ok(report);
            }
            Err(source) => {
                return Err(DrainError::Wait {
                    core: self.core,
                    source,
                })
            }
        }

        loop {
            let running = observer.state() == LifecycleState::Running;
            let pass = self.drain_pass().map_err(|source| DrainError::Hardware {
                core: self.core,
                source,
            })?;
            report.passes += 1;
            report.serviced += pass.serviced;

            if pass.is_empty() {
                if !running && (observer.is_cancelled() || self.quiesced()?) {
                    break;
                }
                hint::spin_loop();
            } else {
                trace!(core = self.core, ?pass, "drain pass");
            }
        }

        debug!(core = self.core, serviced = report.serviced, "worker drained");
        Ok(report)
    }

    fn quiesced(&self) -> Result<bool, DrainError> {
        let status = self.commands.status().map_err(|source| DrainError::Hardware {
            core: self.core,
            source,
        })?;
        Ok(status >= QUIESCED_STATUS)
    }
}

#[cfg(test)]
mod tests {
    use std::thread;
    use std::time::Duration;

    use super::{DrainError, DrainPass, DrainWorker, SERVICE_BATCH};
    use crate::poll::PollPolicy;
    use crate::{CommandError, LifecycleController, SimAccelerator};

    #[test]
    fn batches_then_bursts_the_remaining_depth() {
        let sim = SimAccelerator::default();
        let worker = DrainWorker::new(&sim, 1);

        sim.inject_events(20);
        assert_eq!(
            worker.drain_pass(),
            Ok(DrainPass {
                full_batches: 2,
                tail: 4,
                serviced: 20,
            })
        );

        sim.inject_events(6);
        assert_eq!(
            worker.drain_pass(),
            Ok(DrainPass {
                full_batches: 0,
                tail: 6,
                serviced: 6,
            })
        );

        assert_eq!(worker.drain_pass(), Ok(DrainPass::default()));
        assert_eq!(sim.serviced_events(), 26);
        assert_eq!(sim.buffer_depth_now(), 0);
    }

    #[test]
    fn exactly_one_batch_has_no_tail() {
        let sim = SimAccelerator::default();
        sim.inject_events(u64::from(SERVICE_BATCH));
        let pass = DrainWorker::new(&sim, 1).drain_pass().expect("pass");
        assert_eq!(pass.full_batches, 1);
        assert_eq!(pass.tail, 0);
        assert_eq!(pass.commands(), 8);
        assert_eq!(pass.serviced, 8);
    }

    #[test]
    fn depth_query_failure_ends_the_loop() {
        let sim = SimAccelerator::default();
        let mut controller = LifecycleController::new(1);
        let observer = controller.observer();
        sim.fail_buffer_depth_after(3);

        let result = thread::scope(|scope| {
            let handle = scope.spawn(|| DrainWorker::new(&sim, 1).run(&observer));
            controller
                .await_initialization(&PollPolicy::unbounded())
                .expect("worker registers");
            controller.start(&sim).expect("start");
            handle.join().expect("worker thread")
        });

        assert_eq!(
            result,
            Err(DrainError::Hardware {
                core: 1,
                source: CommandError::HardwareQuery {
                    operation: "buffer_depth"
                }
            })
        );
        // The ticket was released despite the failure.
        controller
            .wait_for_termination(&PollPolicy::with_max_spins(1))
            .expect("worker released");
    }

    #[test]
    fn cancelled_run_services_nothing() {
        let sim = SimAccelerator::default();
        sim.inject_events(5);
        let mut controller = LifecycleController::new(1);
        let observer = controller.observer();

        let report = thread::scope(|scope| {
            let handle = scope.spawn(|| {
                DrainWorker::new(&sim, 2)
                    .with_start_policy(PollPolicy::unbounded())
                    .run(&observer)
            });
            controller
                .await_initialization(&PollPolicy::unbounded())
                .expect("worker registers");
            controller.cancel(&sim).expect("cancel");
            handle.join().expect("worker thread")
        })
        .expect("cancellation is not an error");

        assert_eq!(report.serviced, 0);
        assert_eq!(report.passes, 0);
        assert_eq!(sim.buffer_depth_now(), 5);
    }

    #[test]
    fn worker_keeps_draining_until_the_status_quiesces() {
        let sim = SimAccelerator::default();
        let mut controller = LifecycleController::new(1);
        let observer = controller.observer();

        let report = thread::scope(|scope| {
            let handle = scope.spawn(|| DrainWorker::new(&sim, 1).run(&observer));
            controller
                .await_initialization(&PollPolicy::unbounded())
                .expect("worker registers");
            controller.start(&sim).expect("start");
            sim.hold_quiescence(true);
            controller.request_stop(&sim).expect("stop");

            // Events flushed after stop, while the status is still held.
            thread::sleep(Duration::from_millis(20));
            sim.inject_events(5);
            sim.hold_quiescence(false);
            handle.join().expect("worker thread")
        })
        .expect("drain succeeds");

        assert_eq!(report.serviced, 5);
        assert_eq!(sim.buffer_depth_now(), 0);
    }

    #[test]
    fn cancelled_worker_exits_without_waiting_for_status() {
        let sim = SimAccelerator::default();
        sim.hold_quiescence(true);
        let mut controller = LifecycleController::new(1);
        let observer = controller.observer();

        let report = thread::scope(|scope| {
            let handle = scope.spawn(|| DrainWorker::new(&sim, 1).run(&observer));
            controller
                .await_initialization(&PollPolicy::unbounded())
                .expect("worker registers");
            controller.start(&sim).expect("start");
            sim.inject_events(3);
            controller.cancel(&sim).expect("cancel");
            handle.join().expect("worker thread")
        })
        .expect("drain succeeds");

        assert_eq!(report.serviced, 3);
    }

    #[test]
    fn worker_drains_remaining_events_after_stop() {
        let sim = SimAccelerator::default();
        let mut controller = LifecycleController::new(1);
        let observer = controller.observer();

        let report = thread::scope(|scope| {
            let handle = scope.spawn(|| DrainWorker::new(&sim, 1).run(&observer));
            controller
                .await_initialization(&PollPolicy::unbounded())
                .expect("worker registers");
            controller.start(&sim).expect("start");
            sim.inject_events(37);
            controller.request_stop(&sim).expect("stop");
            handle.join().expect("worker thread")
        })
        .expect("drain succeeds");

        assert_eq!(report.serviced, 37);
        assert_eq!(sim.buffer_depth_now(), 0);
    }
}
