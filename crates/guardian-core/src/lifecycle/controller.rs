use std::sync::atomic::{AtomicBool, AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, info, warn};

use super::state::{InvalidTransition, LifecycleState};
use crate::poll::{poll_until, PollPolicy, WaitError};
use crate::{AcceleratorCommands, BufferStatus, CommandError, QUIESCED_STATUS};

/// Failure while driving the lifecycle.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LifecycleError {
    /// The requested state does not follow the current one.
    #[error(transparent)]
    Transition(#[from] InvalidTransition),
    /// Running was requested before the initialization barrier completed.
    #[error("workers have not completed initialization")]
    NotInitialized,
    /// Idle was requested while workers are still registered.
    #[error("{active} workers are still active")]
    WorkersActive {
        /// Workers that have not released their ticket.
        active: usize,
    },
    /// Publishing the state to the accelerator failed.
    #[error(transparent)]
    Command(#[from] CommandError),
}

#[derive(Debug)]
struct SharedLifecycle {
    state: AtomicU8,
    initialized: AtomicBool,
    cancelled: AtomicBool,
    ready: AtomicUsize,
    released: AtomicUsize,
    workers: usize,
}

impl SharedLifecycle {
    fn state(&self) -> LifecycleState {
        LifecycleState::from_u8(self.state.load(Ordering::Acquire)).unwrap_or_default()
    }

    /// True once every expected worker has registered and released its
    /// ticket again.
    fn all_workers_left(&self) -> bool {
        self.ready.load(Ordering::Acquire) >= self.workers && self.active_workers() == 0
    }

    fn active_workers(&self) -> usize {
        let ready = self.ready.load(Ordering::Acquire);
        ready.saturating_sub(self.released.load(Ordering::Acquire))
    }
}

/// The single mutable lifecycle authority, held by the orchestrating core.
///
/// Not `Clone`: other cores get a [`LifecycleObserver`].
#[derive(Debug)]
pub struct LifecycleController {
    shared: Arc<SharedLifecycle>,
    state: LifecycleState,
}

impl LifecycleController {
    /// Creates an idle controller expecting `workers` drain workers.
    #[must_use]
    pub fn new(workers: usize) -> Self {
        Self {
            shared: Arc::new(SharedLifecycle {
                state: AtomicU8::new(LifecycleState::Idle.as_u8()),
                initialized: AtomicBool::new(false),
                cancelled: AtomicBool::new(false),
                ready: AtomicUsize::new(0),
                released: AtomicUsize::new(0),
                workers,
            }),
            state: LifecycleState::Idle,
        }
    }

    /// Current authoritative state.
    #[must_use]
    pub const fn state(&self) -> LifecycleState {
        self.state
    }

    /// Number of workers the barriers wait for.
    #[must_use]
    pub fn expected_workers(&self) -> usize {
        self.shared.workers
    }

    /// Read-only view for worker cores and workload code.
    #[must_use]
    pub fn observer(&self) -> LifecycleObserver {
        LifecycleObserver {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Waits until every expected worker has registered, then raises the
    /// initialization flag.
    ///
    /// # Errors
    ///
    /// Returns [`WaitError::Timeout`] when `policy` is exhausted first.
    pub fn await_initialization(&self, policy: &PollPolicy) -> Result<u64, WaitError> {
        let shared = &self.shared;
        let spins = poll_until(policy, "worker initialization", || {
            Ok(shared.ready.load(Ordering::Acquire) >= shared.workers)
        })?;
        shared.initialized.store(true, Ordering::Release);
        info!(workers = shared.workers, spins, "initialization barrier complete");
        Ok(spins)
    }

    /// Idle -> Running.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError::NotInitialized`] before the initialization
    /// barrier, or the transition/publish failure.
    pub fn start<C>(&mut self, commands: &C) -> Result<LifecycleState, LifecycleError>
    where
        C: AcceleratorCommands + ?Sized,
    {
        if !self.shared.initialized.load(Ordering::Acquire) {
            return Err(LifecycleError::NotInitialized);
        }
        self.transition(commands, LifecycleState::Running)
    }

    /// Running -> Stopping.
    ///
    /// # Errors
    ///
    /// Returns the transition or publish failure.
    pub fn request_stop<C>(&mut self, commands: &C) -> Result<LifecycleState, LifecycleError>
    where
        C: AcceleratorCommands + ?Sized,
    {
        self.transition(commands, LifecycleState::Stopping)
    }

    /// Stopping -> Idle, once every worker has left.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError::WorkersActive`] while tickets are held, or
    /// the transition/publish failure.
    pub fn finish<C>(&mut self, commands: &C) -> Result<LifecycleState, LifecycleError>
    where
        C: AcceleratorCommands + ?Sized,
    {
        let active = self.shared.active_workers();
        if active > 0 {
            return Err(LifecycleError::WorkersActive { active });
        }
        self.transition(commands, LifecycleState::Idle)
    }

    fn transition<C>(
        &mut self,
        commands: &C,
        next: LifecycleState,
    ) -> Result<LifecycleState, LifecycleError>
    where
        C: AcceleratorCommands + ?Sized,
    {
        let next = self.state.transition(next)?;
        commands.publish_state(next)?;
        self.shared.state.store(next.as_u8(), Ordering::Release);
        info!(from = ?self.state, to = ?next, "lifecycle transition");
        self.state = next;
        Ok(next)
    }

    /// Waits until the accelerator reports a quiesced status and an empty
    /// buffer. Both conditions must hold at the same poll.
    ///
    /// Gives up early when events are still buffered but every worker has
    /// already released its ticket.
    ///
    /// # Errors
    ///
    /// Returns [`WaitError::Timeout`], [`WaitError::Abandoned`], or the
    /// failing status query.
    pub fn wait_for_quiescence<C>(&self, commands: &C, policy: &PollPolicy) -> Result<u64, WaitError>
    where
        C: AcceleratorCommands + ?Sized,
    {
        let shared = &self.shared;
        let mut last_status = 0;
        poll_until(policy, "accelerator quiescence", || {
            last_status = commands.status()?;
            let empty = commands.buffer_status()? == BufferStatus::Empty;
            if !empty && shared.all_workers_left() {
                return Err(WaitError::Abandoned("accelerator quiescence"));
            }
            Ok(last_status >= QUIESCED_STATUS && empty)
        })?;
        debug!(status = last_status, "accelerator quiesced");
        Ok(last_status)
    }

    /// Termination barrier: waits until every registered worker has released
    /// its ticket, then lowers the initialization flag.
    ///
    /// # Errors
    ///
    /// Returns [`WaitError::Timeout`] when `policy` is exhausted first.
    pub fn wait_for_termination(&self, policy: &PollPolicy) -> Result<u64, WaitError> {
        let shared = &self.shared;
        let spins = poll_until(policy, "worker termination", || {
            Ok(shared.active_workers() == 0)
        })?;
        shared.initialized.store(false, Ordering::Release);
        debug!(spins, "termination barrier complete");
        Ok(spins)
    }

    /// Aborts the run.
    ///
    /// Workers still waiting for Running give up; a running lifecycle is
    /// forced to Stopping so workers drain and exit within one pass.
    ///
    /// # Errors
    ///
    /// Returns the publish failure when forcing Stopping.
    pub fn cancel<C>(&mut self, commands: &C) -> Result<(), LifecycleError>
    where
        C: AcceleratorCommands + ?Sized,
    {
        warn!(state = ?self.state, "cancelling run");
        self.shared.cancelled.store(true, Ordering::Release);
        if self.state == LifecycleState::Running {
            self.transition(commands, LifecycleState::Stopping)?;
        }
        Ok(())
    }
}

/// Read-only lifecycle view shared with worker cores.
#[derive(Debug, Clone)]
pub struct LifecycleObserver {
    shared: Arc<SharedLifecycle>,
}

impl LifecycleObserver {
    /// Last state published by the orchestrator.
    #[must_use]
    pub fn state(&self) -> LifecycleState {
        self.shared.state()
    }

    /// True between the initialization and termination barriers.
    #[must_use]
    pub fn initialization_flag(&self) -> bool {
        self.shared.initialized.load(Ordering::Acquire)
    }

    /// True once the orchestrator has aborted the run.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.shared.cancelled.load(Ordering::Acquire)
    }

    /// Publishes the ready signal for `core`.
    ///
    /// The returned ticket counts towards the termination barrier until it
    /// is dropped.
    #[must_use]
    pub fn register(&self, core: u8) -> WorkerTicket {
        self.shared.ready.fetch_add(1, Ordering::AcqRel);
        debug!(core, "worker ready");
        WorkerTicket {
            shared: Arc::clone(&self.shared),
            core,
        }
    }

    /// Waits until the lifecycle leaves Idle.
    ///
    /// # Errors
    ///
    /// Returns [`WaitError::Cancelled`] if the run is aborted before it
    /// starts, or [`WaitError::Timeout`].
    pub fn wait_for_running(&self, policy: &PollPolicy) -> Result<LifecycleState, WaitError> {
        let mut observed = LifecycleState::Idle;
        poll_until(policy, "running state", || {
            observed = self.state();
            if observed == LifecycleState::Idle && self.is_cancelled() {
                return Err(WaitError::Cancelled("running state"));
            }
            Ok(observed != LifecycleState::Idle)
        })?;
        Ok(observed)
    }

    /// Waits until the lifecycle is Idle.
    ///
    /// # Errors
    ///
    /// Returns [`WaitError::Timeout`] when `policy` is exhausted first.
    pub fn wait_for_idle(&self, policy: &PollPolicy) -> Result<(), WaitError> {
        poll_until(policy, "idle state", || Ok(self.state() == LifecycleState::Idle))?;
        Ok(())
    }
}

/// Registration of one worker core; releasing it signals termination.
#[derive(Debug)]
pub struct WorkerTicket {
    shared: Arc<SharedLifecycle>,
    core: u8,
}

impl WorkerTicket {
    /// Core the ticket was issued for.
    #[must_use]
    pub const fn core(&self) -> u8 {
        self.core
    }
}

impl Drop for WorkerTicket {
    fn drop(&mut self) {
        self.shared.released.fetch_add(1, Ordering::AcqRel);
        debug!(core = self.core, "worker released");
    }
}
