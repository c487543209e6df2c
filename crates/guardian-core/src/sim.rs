//! Software model of the monitoring accelerator.
//!
//! [`SimAccelerator`] implements the command and privilege interfaces
//! without hardware: it matches observed instructions against the
//! programmed filters, routes matches through the mapper and round-robin
//! scheduling entities, and holds them in a bounded FIFO until serviced.

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::thread;

use tracing::trace;

use crate::poll::{poll_until, PollPolicy, WaitError};
use crate::{
    AcceleratorCommands, AnalysisMode, BufferStatus, CommandError, CounterKind, FilterRule,
    LifecycleState, Mapper, PrivilegeControl, RoundRobinCursor, SchedulingEntity, Workload,
    WorkloadError, MAX_CHECKERS, QUIESCED_STATUS,
};

/// Event buffer depth used by [`SimAccelerator::default`].
pub const DEFAULT_BUFFER_CAPACITY: usize = 256;

/// A committed instruction presented to the accelerator's filters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Instruction {
    /// Instruction `func` field.
    pub func: u8,
    /// Major opcode, or quadrant for compressed encodings.
    pub opcode: u8,
    /// MSB discriminator of compressed encodings.
    pub compressed_msb: Option<u8>,
}

impl Instruction {
    /// A full-width instruction.
    #[must_use]
    pub const fn new(func: u8, opcode: u8) -> Self {
        Self {
            func,
            opcode,
            compressed_msb: None,
        }
    }

    /// A compressed instruction.
    #[must_use]
    pub const fn compressed(func: u8, quadrant: u8, msb: u8) -> Self {
        Self {
            func,
            opcode: quadrant,
            compressed_msb: Some(msb),
        }
    }

    fn matches(&self, rule: &FilterRule) -> bool {
        rule.opcode_class == self.func
            && rule.opcode == self.opcode
            && rule.compressed_msb == self.compressed_msb
    }
}

/// `lw` as seen by the load filters.
pub const LOAD_WORD: Instruction = Instruction::new(0x02, 0x03);
/// `sw`, which no load filter matches.
pub const STORE_WORD: Instruction = Instruction::new(0x02, 0x23);

/// What the accelerator did with one observed instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Observation {
    /// No analysis feature is enabled.
    Disabled,
    /// No filter matched, or the mapper does not bind the class group.
    Filtered,
    /// Matched and counted without dispatch (performance analysis).
    Counted,
    /// Matched and queued for the given checker core.
    Queued {
        /// Destination checker core.
        checker: u8,
    },
    /// Matched but the buffer is full; the instruction must be retried.
    Stalled,
}

#[derive(Debug, Clone, Copy)]
struct PendingEvent {
    checker: Option<u8>,
    enqueued_at: u64,
}

#[derive(Debug)]
struct SimState {
    filters: Vec<FilterRule>,
    cursors: BTreeMap<u8, RoundRobinCursor>,
    mapper: Option<Mapper>,
    next_entity: usize,
    checkers: u8,
    aggregator: Option<u8>,
    filter_width: Option<u8>,
    enabled: u8,
    published: LifecycleState,
    queue: VecDeque<PendingEvent>,
    capacity: usize,
    merged: u64,
    committed: u64,
    cycles: u64,
    latencies: Vec<u64>,
    dispatched: Vec<u64>,
    serviced: u64,
    privileged: bool,
    depth_queries_left: Option<u64>,
    hold_status: bool,
}

impl SimState {
    fn new(capacity: usize) -> Self {
        Self {
            filters: Vec::new(),
            cursors: BTreeMap::new(),
            mapper: None,
            next_entity: 0,
            checkers: 0,
            aggregator: None,
            filter_width: None,
            enabled: 0,
            published: LifecycleState::Idle,
            queue: VecDeque::with_capacity(capacity),
            capacity,
            merged: 0,
            committed: 0,
            cycles: 0,
            latencies: vec![0; usize::from(MAX_CHECKERS)],
            dispatched: vec![0; usize::from(MAX_CHECKERS)],
            serviced: 0,
            privileged: false,
            depth_queries_left: None,
            hold_status: false,
        }
    }

    fn tick(&mut self) {
        self.cycles = self.cycles.wrapping_add(1);
    }

    fn is_enabled(&self, mode: AnalysisMode) -> bool {
        self.enabled & mode.as_u8() != 0
    }

    fn route(&mut self, class_group: u8) -> Option<u8> {
        let mapper = self.mapper.filter(|mapper| mapper.binds(class_group))?;
        let eligible: Vec<u8> = mapper
            .entity_ids()
            .filter(|id| self.cursors.contains_key(id))
            .collect();
        if eligible.is_empty() {
            return None;
        }
        let id = eligible[self.next_entity % eligible.len()];
        self.next_entity = self.next_entity.wrapping_add(1);
        self.cursors.get_mut(&id).and_then(RoundRobinCursor::next_core)
    }

    fn observe(&mut self, instruction: Instruction) -> Observation {
        if self.enabled == 0 {
            return Observation::Disabled;
        }
        let checking = self.is_enabled(AnalysisMode::FaultInjection);
        if checking && self.queue.len() >= self.capacity {
            return Observation::Stalled;
        }

        self.tick();
        self.committed += 1;
        let Some(rule) = self.filters.iter().find(|rule| instruction.matches(rule)) else {
            return Observation::Filtered;
        };
        let class_group = rule.class_group;
        if !checking {
            self.merged += 1;
            return Observation::Counted;
        }
        let Some(checker) = self.route(class_group) else {
            return Observation::Filtered;
        };

        self.merged += 1;
        if let Some(count) = checker
            .checked_sub(1)
            .and_then(|index| self.dispatched.get_mut(usize::from(index)))
        {
            *count += 1;
        }
        self.queue.push_back(PendingEvent {
            checker: Some(checker),
            enqueued_at: self.cycles,
        });
        Observation::Queued { checker }
    }
}

/// Thread-safe software double for the accelerator.
#[derive(Debug)]
pub struct SimAccelerator {
    state: Mutex<SimState>,
}

impl Default for SimAccelerator {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_BUFFER_CAPACITY)
    }
}

impl SimAccelerator {
    /// Creates a model whose event buffer holds `capacity` events.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            state: Mutex::new(SimState::new(capacity.max(1))),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Presents one committed instruction to the filters.
    pub fn observe(&self, instruction: Instruction) -> Observation {
        let observation = self.lock().observe(instruction);
        trace!(?instruction, ?observation, "instruction observed");
        observation
    }

    /// Enqueues `count` events that bypass filtering and routing.
    pub fn inject_events(&self, count: u64) {
        let mut state = self.lock();
        for _ in 0..count {
            let enqueued_at = state.cycles;
            state.queue.push_back(PendingEvent {
                checker: None,
                enqueued_at,
            });
        }
    }

    /// Makes every depth query after the next `successes` fail.
    pub fn fail_buffer_depth_after(&self, successes: u64) {
        self.lock().depth_queries_left = Some(successes);
    }

    /// Keeps the status word below the quiesced threshold while `hold` is set.
    pub fn hold_quiescence(&self, hold: bool) {
        self.lock().hold_status = hold;
    }

    /// Number of filter rules programmed.
    #[must_use]
    pub fn filter_count(&self) -> usize {
        self.lock().filters.len()
    }

    /// Number of scheduling entities programmed.
    #[must_use]
    pub fn entity_count(&self) -> usize {
        self.lock().cursors.len()
    }

    /// Programmed mapper, if any.
    #[must_use]
    pub fn mapper(&self) -> Option<Mapper> {
        self.lock().mapper
    }

    /// Programmed checker count.
    #[must_use]
    pub fn checkers(&self) -> u8 {
        self.lock().checkers
    }

    /// Programmed aggregator core.
    #[must_use]
    pub fn aggregator(&self) -> Option<u8> {
        self.lock().aggregator
    }

    /// Programmed filter width.
    #[must_use]
    pub fn filter_width(&self) -> Option<u8> {
        self.lock().filter_width
    }

    /// Last lifecycle state published by the orchestrator.
    #[must_use]
    pub fn published_state(&self) -> LifecycleState {
        self.lock().published
    }

    /// True while `mode` is enabled.
    #[must_use]
    pub fn is_enabled(&self, mode: AnalysisMode) -> bool {
        self.lock().is_enabled(mode)
    }

    /// True while privileged monitoring mode is held.
    #[must_use]
    pub fn is_privileged(&self) -> bool {
        self.lock().privileged
    }

    /// Pending events, read without going through the command interface.
    #[must_use]
    pub fn buffer_depth_now(&self) -> usize {
        self.lock().queue.len()
    }

    /// Events consumed by service commands since construction.
    #[must_use]
    pub fn serviced_events(&self) -> u64 {
        self.lock().serviced
    }

    /// Events routed to checker `core` since construction.
    #[must_use]
    pub fn dispatched_to(&self, core: u8) -> u64 {
        let state = self.lock();
        core.checked_sub(1)
            .and_then(|index| state.dispatched.get(usize::from(index)).copied())
            .unwrap_or(0)
    }
}

impl AcceleratorCommands for SimAccelerator {
    fn configure_filter(&self, rule: &FilterRule) -> Result<(), CommandError> {
        let mut state = self.lock();
        state.tick();
        state.filters.push(*rule);
        Ok(())
    }

    fn configure_scheduling_entity(&self, entity: &SchedulingEntity) -> Result<(), CommandError> {
        let mut state = self.lock();
        state.tick();
        state.cursors.insert(entity.id, RoundRobinCursor::new(*entity));
        Ok(())
    }

    fn configure_mapper(&self, class_group_mask: u16, se_mask: u16) -> Result<(), CommandError> {
        let mut state = self.lock();
        state.tick();
        state.mapper = Some(Mapper {
            class_group_mask,
            se_mask,
        });
        Ok(())
    }

    fn set_number_of_checkers(&self, count: u8) -> Result<(), CommandError> {
        if count > MAX_CHECKERS {
            return Err(CommandError::Rejected {
                operation: "set_number_of_checkers",
                reason: format!("{count} exceeds {MAX_CHECKERS}"),
            });
        }
        let mut state = self.lock();
        state.tick();
        state.checkers = count;
        Ok(())
    }

    fn configure_aggregator(&self, core: u8) -> Result<(), CommandError> {
        let mut state = self.lock();
        state.tick();
        state.aggregator = Some(core);
        Ok(())
    }

    fn set_filter_width(&self, width: u8) -> Result<(), CommandError> {
        let mut state = self.lock();
        state.tick();
        state.filter_width = Some(width);
        Ok(())
    }

    fn publish_state(&self, lifecycle: LifecycleState) -> Result<(), CommandError> {
        let mut state = self.lock();
        state.tick();
        state.published = lifecycle;
        Ok(())
    }

    fn enable(&self, mode: AnalysisMode) -> Result<(), CommandError> {
        let mut state = self.lock();
        state.tick();
        state.enabled |= mode.as_u8();
        Ok(())
    }

    fn disable(&self, mode: AnalysisMode) -> Result<(), CommandError> {
        let mut state = self.lock();
        state.tick();
        state.enabled &= !mode.as_u8();
        Ok(())
    }

    fn reset_counters(&self) -> Result<(), CommandError> {
        let mut state = self.lock();
        state.merged = 0;
        state.committed = 0;
        state.cycles = 0;
        Ok(())
    }

    fn read_counter(&self, kind: CounterKind) -> Result<u64, CommandError> {
        let state = self.lock();
        Ok(match kind {
            CounterKind::MergedInstructions => state.merged,
            CounterKind::InstructionsCommitted => state.committed,
            CounterKind::GlobalCycles => state.cycles,
        })
    }

    fn read_detection_latency(&self, index: u8) -> Result<u64, CommandError> {
        self.lock()
            .latencies
            .get(usize::from(index))
            .copied()
            .ok_or(CommandError::HardwareQuery {
                operation: "read_detection_latency",
            })
    }

    fn status(&self) -> Result<u64, CommandError> {
        let state = self.lock();
        Ok(match state.published {
            LifecycleState::Stopping if state.queue.is_empty() && !state.hold_status => {
                QUIESCED_STATUS
            }
            published => u64::from(published.as_u8()),
        })
    }

    fn buffer_status(&self) -> Result<BufferStatus, CommandError> {
        Ok(if self.lock().queue.is_empty() {
            BufferStatus::Empty
        } else {
            BufferStatus::NonEmpty
        })
    }

    fn buffer_depth(&self) -> Result<u32, CommandError> {
        let mut state = self.lock();
        if let Some(left) = state.depth_queries_left.as_mut() {
            if *left == 0 {
                return Err(CommandError::HardwareQuery {
                    operation: "buffer_depth",
                });
            }
            *left -= 1;
        }
        Ok(u32::try_from(state.queue.len()).unwrap_or(u32::MAX))
    }

    fn service_one_event(&self) -> Result<bool, CommandError> {
        let mut state = self.lock();
        state.tick();
        let Some(event) = state.queue.pop_front() else {
            return Ok(false);
        };
        state.serviced += 1;
        if let Some(checker) = event.checker {
            let latency = state.cycles.saturating_sub(event.enqueued_at);
            if let Some(slot) = checker
                .checked_sub(1)
                .and_then(|index| state.latencies.get_mut(usize::from(index)))
            {
                *slot = latency;
            }
        }
        Ok(true)
    }
}

impl PrivilegeControl for SimAccelerator {
    fn enter_privileged_monitoring_mode(&self) -> Result<(), CommandError> {
        let mut state = self.lock();
        if state.privileged {
            return Err(CommandError::PrivilegeReentered);
        }
        state.privileged = true;
        Ok(())
    }

    fn exit_privileged_monitoring_mode(&self) -> Result<(), CommandError> {
        let mut state = self.lock();
        if !state.privileged {
            return Err(CommandError::PrivilegeNotHeld);
        }
        state.privileged = false;
        Ok(())
    }
}

/// Workload that replays a fixed instruction mix through the simulator.
///
/// Instructions are presented in order, cycling through `mix`, until
/// `loads` of them have matched a filter and been queued or counted.
#[derive(Debug)]
pub struct SyntheticLoads<'a> {
    sim: &'a SimAccelerator,
    loads: u64,
    mix: Vec<Instruction>,
    stall_policy: PollPolicy,
}

impl<'a> SyntheticLoads<'a> {
    /// Produces `loads` matched load events interleaved with stores.
    #[must_use]
    pub fn new(sim: &'a SimAccelerator, loads: u64) -> Self {
        Self {
            sim,
            loads,
            mix: vec![STORE_WORD, LOAD_WORD],
            stall_policy: PollPolicy::default(),
        }
    }

    /// Replaces the instruction mix; it must contain at least one
    /// instruction the configured filters route to a checker.
    #[must_use]
    pub fn with_mix(mut self, mix: Vec<Instruction>) -> Self {
        self.mix = mix;
        self
    }

    /// Budget for waiting on a full event buffer.
    #[must_use]
    pub fn with_stall_policy(mut self, policy: PollPolicy) -> Self {
        self.stall_policy = policy;
        self
    }

    fn present(&self, instruction: Instruction) -> Result<Observation, WaitError> {
        let mut observation = Observation::Stalled;
        poll_until(&self.stall_policy, "event buffer space", || {
            observation = self.sim.observe(instruction);
            if observation == Observation::Stalled {
                thread::yield_now();
                return Ok(false);
            }
            Ok(true)
        })?;
        Ok(observation)
    }
}

impl Workload for SyntheticLoads<'_> {
    fn name(&self) -> &str {
        "synthetic loads"
    }

    fn run(&mut self) -> Result<(), WorkloadError> {
        if self.loads == 0 {
            return Ok(());
        }
        let mut matched = 0;
        let mut unproductive = 0;
        for instruction in self.mix.iter().copied().cycle() {
            match self.present(instruction)? {
                Observation::Queued { .. } | Observation::Counted => {
                    matched += 1;
                    unproductive = 0;
                    if matched == self.loads {
                        return Ok(());
                    }
                }
                Observation::Disabled => return Err(WorkloadError::MonitoringDisabled),
                _ => {
                    unproductive += 1;
                    if unproductive > self.mix.len() {
                        return Err(WorkloadError::NoMatchingInstructions);
                    }
                }
            }
        }
        Err(WorkloadError::NoMatchingInstructions)
    }
}
