//! Scheduling entities, the class-group mapper, and round-robin routing.

use std::collections::BTreeMap;

use tracing::debug;

use crate::{AcceleratorCommands, ConfigError, CLASS_GROUP_COUNT};

/// Largest number of checker cores the accelerator can address.
pub const MAX_CHECKERS: u8 = 63;
/// Number of scheduling entities addressable by the mapper mask.
pub const MAX_SCHEDULING_ENTITIES: u8 = 16;

/// Policy used to distribute matched events among an entity's cores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
#[repr(u8)]
pub enum SchedulingPolicy {
    /// Cycle through the range in ascending core order.
    #[default]
    RoundRobin = 0x01,
}

/// A named group of contiguous checker cores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct SchedulingEntity {
    /// Entity id, used as a bit index in the mapper mask.
    pub id: u8,
    /// First checker core of the inclusive range.
    pub start_core: u8,
    /// Last checker core of the inclusive range.
    pub end_core: u8,
    /// Dispatch policy.
    pub policy: SchedulingPolicy,
}

impl SchedulingEntity {
    /// Number of cores in the range, or `None` when `end_core` precedes
    /// `start_core`.
    #[must_use]
    pub fn width(&self) -> Option<u16> {
        let span = self.end_core.checked_sub(self.start_core)?;
        Some(u16::from(span) + 1)
    }

    /// Core that receives the `k`-th event assigned to this entity.
    ///
    /// Returns `None` for an inverted range.
    #[must_use]
    pub fn route(&self, k: u64) -> Option<u8> {
        let width = self.width()?;
        match self.policy {
            SchedulingPolicy::RoundRobin => {
                let offset = k % u64::from(width);
                // start + offset <= end_core
                u8::try_from(u64::from(self.start_core) + offset).ok()
            }
        }
    }

    /// Returns true when the two core ranges share at least one core.
    #[must_use]
    pub const fn overlaps(&self, other: &Self) -> bool {
        self.start_core <= other.end_core && other.start_core <= self.end_core
    }
}

/// Binding from event class groups to the entities allowed to service them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct Mapper {
    /// Bit `g` set binds class group `g`.
    pub class_group_mask: u16,
    /// Bit `s` set allows scheduling entity `s`.
    pub se_mask: u16,
}

impl Mapper {
    /// Returns true when events of `class_group` are routed by this mapper.
    #[must_use]
    pub const fn binds(&self, class_group: u8) -> bool {
        class_group < CLASS_GROUP_COUNT && self.class_group_mask & (1 << class_group) != 0
    }

    /// Entity ids selected by the mapper, in ascending order.
    pub fn entity_ids(&self) -> impl Iterator<Item = u8> + '_ {
        (0..MAX_SCHEDULING_ENTITIES).filter(move |id| self.se_mask & (1 << id) != 0)
    }
}

/// Per-entity position in the round-robin sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoundRobinCursor {
    entity: SchedulingEntity,
    dispatched: u64,
}

impl RoundRobinCursor {
    /// Starts a cursor at the first core of `entity`.
    #[must_use]
    pub const fn new(entity: SchedulingEntity) -> Self {
        Self {
            entity,
            dispatched: 0,
        }
    }

    /// Returns the core for the next event and advances, or `None` without
    /// advancing when the entity's range is inverted.
    pub fn next_core(&mut self) -> Option<u8> {
        let core = self.entity.route(self.dispatched)?;
        self.dispatched = self.dispatched.wrapping_add(1);
        Some(core)
    }

    /// Number of events dispatched through this cursor.
    #[must_use]
    pub const fn dispatched(&self) -> u64 {
        self.dispatched
    }
}

/// Checker count, scheduling entities, and mapper for one run.
#[derive(Debug, Clone, Default)]
pub struct SchedulingTable {
    checkers: u8,
    entities: BTreeMap<u8, SchedulingEntity>,
    mapper: Option<Mapper>,
}

impl SchedulingTable {
    /// Creates an empty table with no checker cores.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the number of checker cores (ids `1..=count`).
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidCheckerCount`] outside `1..=MAX_CHECKERS`,
    /// or the forwarding failure.
    pub fn set_number_of_checkers<C>(&mut self, commands: &C, count: u8) -> Result<(), ConfigError>
    where
        C: AcceleratorCommands + ?Sized,
    {
        if count == 0 || count > MAX_CHECKERS {
            return Err(ConfigError::InvalidCheckerCount(count));
        }
        commands.set_number_of_checkers(count)?;
        debug!(count, "checker count configured");
        self.checkers = count;
        Ok(())
    }

    /// Selects the result-aggregating core.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidAggregator`] when `core` is not a core of
    /// this system, or the forwarding failure.
    pub fn set_aggregator<C>(&self, commands: &C, core: u8) -> Result<(), ConfigError>
    where
        C: AcceleratorCommands + ?Sized,
    {
        if core > MAX_CHECKERS {
            return Err(ConfigError::InvalidAggregator(core));
        }
        commands.configure_aggregator(core)?;
        debug!(core, "aggregator configured");
        Ok(())
    }

    /// Registers one scheduling entity.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidEntityId`], [`ConfigError::DuplicateEntity`],
    /// or [`ConfigError::InvalidRange`] when `end < start`, `start == 0`, or
    /// `end` exceeds the checker count.
    pub fn add_scheduling_entity<C>(
        &mut self,
        commands: &C,
        id: u8,
        start_core: u8,
        end_core: u8,
        policy: SchedulingPolicy,
    ) -> Result<SchedulingEntity, ConfigError>
    where
        C: AcceleratorCommands + ?Sized,
    {
        if id >= MAX_SCHEDULING_ENTITIES {
            return Err(ConfigError::InvalidEntityId(id));
        }
        if self.entities.contains_key(&id) {
            return Err(ConfigError::DuplicateEntity(id));
        }
        if start_core == 0 || end_core < start_core || end_core > self.checkers {
            return Err(ConfigError::InvalidRange {
                start: start_core,
                end: end_core,
                checkers: self.checkers,
            });
        }

        let entity = SchedulingEntity {
            id,
            start_core,
            end_core,
            policy,
        };
        commands.configure_scheduling_entity(&entity)?;
        debug!(id, start_core, end_core, ?policy, "scheduling entity configured");
        self.entities.insert(id, entity);
        Ok(entity)
    }

    /// Binds class groups to registered scheduling entities.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::EmptyMapper`], [`ConfigError::UnknownEntity`]
    /// naming the unregistered bits, [`ConfigError::OverlappingEntities`], or
    /// [`ConfigError::MapperAlreadySet`].
    pub fn set_mapper<C>(
        &mut self,
        commands: &C,
        class_group_mask: u16,
        se_mask: u16,
    ) -> Result<Mapper, ConfigError>
    where
        C: AcceleratorCommands + ?Sized,
    {
        if self.mapper.is_some() {
            return Err(ConfigError::MapperAlreadySet);
        }
        if class_group_mask == 0 || se_mask == 0 {
            return Err(ConfigError::EmptyMapper);
        }
        let registered = self
            .entities
            .keys()
            .fold(0u16, |mask, id| mask | (1 << id));
        let unknown = se_mask & !registered;
        if unknown != 0 {
            return Err(ConfigError::UnknownEntity(unknown));
        }

        let mapper = Mapper {
            class_group_mask,
            se_mask,
        };
        let selected: Vec<SchedulingEntity> = mapper
            .entity_ids()
            .filter_map(|id| self.entities.get(&id).copied())
            .collect();
        for (index, first) in selected.iter().enumerate() {
            if let Some(second) = selected[index + 1..].iter().find(|e| first.overlaps(e)) {
                return Err(ConfigError::OverlappingEntities {
                    first: first.id,
                    second: second.id,
                });
            }
        }

        commands.configure_mapper(class_group_mask, se_mask)?;
        debug!(class_group_mask, se_mask, "mapper configured");
        self.mapper = Some(mapper);
        Ok(mapper)
    }

    /// Configured checker count.
    #[must_use]
    pub const fn checkers(&self) -> u8 {
        self.checkers
    }

    /// Registered entity with `id`, if any.
    #[must_use]
    pub fn entity(&self, id: u8) -> Option<&SchedulingEntity> {
        self.entities.get(&id)
    }

    /// Number of registered entities.
    #[must_use]
    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }

    /// Mapper for this run, once set.
    #[must_use]
    pub const fn mapper(&self) -> Option<Mapper> {
        self.mapper
    }
}
