//! Filter rules selecting which committed instructions become events.

use std::collections::BTreeSet;
use std::fmt;

use tracing::debug;

use crate::{AcceleratorCommands, ConfigError};

/// Number of event class groups addressable by the mapper mask.
pub const CLASS_GROUP_COUNT: u8 = 16;
/// Largest `func` field value (3 bits).
pub const MAX_OPCODE_CLASS: u8 = 0x07;
/// Largest major opcode for full-width instructions (7 bits).
pub const MAX_OPCODE: u8 = 0x7F;
/// Largest quadrant opcode for compressed instructions (2 bits).
pub const MAX_COMPRESSED_OPCODE: u8 = 0x03;
/// Largest compressed MSB discriminator (1 bit).
pub const MAX_COMPRESSED_MSB: u8 = 0x01;
/// Largest data-path selector (2 bits).
pub const MAX_DATA_PATH: u8 = 0x03;
/// Widest event filter the accelerator can simulate.
pub const MAX_FILTER_WIDTH: u8 = 8;

/// Class group used for load-instruction events.
pub const LOAD_CLASS_GROUP: u8 = 0x01;
/// Data path routing events through the load queue.
pub const DATA_PATH_LOAD_QUEUE: u8 = 0x02;

/// One observable event pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct FilterRule {
    /// Event class group index the match is reported under.
    pub class_group: u8,
    /// Instruction `func` field.
    pub opcode_class: u8,
    /// Major opcode (quadrant for compressed encodings).
    pub opcode: u8,
    /// Data path the accelerator samples for this event.
    pub data_path: u8,
    /// Extra MSB discriminator, present only for compressed encodings.
    pub compressed_msb: Option<u8>,
}

/// Uniqueness key of a rule within one configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FilterKey {
    class_group: u8,
    opcode_class: u8,
    opcode: u8,
    compressed_msb: Option<u8>,
}

impl FilterRule {
    /// Creates a rule for a full-width instruction.
    #[must_use]
    pub const fn new(class_group: u8, opcode_class: u8, opcode: u8, data_path: u8) -> Self {
        Self {
            class_group,
            opcode_class,
            opcode,
            data_path,
            compressed_msb: None,
        }
    }

    /// Creates a rule for a compressed instruction.
    #[must_use]
    pub const fn compressed(
        class_group: u8,
        opcode_class: u8,
        opcode: u8,
        msb: u8,
        data_path: u8,
    ) -> Self {
        Self {
            class_group,
            opcode_class,
            opcode,
            data_path,
            compressed_msb: Some(msb),
        }
    }

    /// Returns true for compressed-instruction rules.
    #[must_use]
    pub const fn is_compressed(&self) -> bool {
        self.compressed_msb.is_some()
    }

    /// Returns the key used for duplicate detection.
    #[must_use]
    pub const fn key(&self) -> FilterKey {
        FilterKey {
            class_group: self.class_group,
            opcode_class: self.opcode_class,
            opcode: self.opcode,
            compressed_msb: self.compressed_msb,
        }
    }

    /// Checks every field against the accelerator's encodable range.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidOpcode`] naming the first offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let opcode_max = if self.is_compressed() {
            MAX_COMPRESSED_OPCODE
        } else {
            MAX_OPCODE
        };
        let msb = self.compressed_msb.unwrap_or(0);
        let checks = [
            ("class_group", self.class_group, CLASS_GROUP_COUNT - 1),
            ("opcode_class", self.opcode_class, MAX_OPCODE_CLASS),
            ("opcode", self.opcode, opcode_max),
            ("compressed_msb", msb, MAX_COMPRESSED_MSB),
            ("data_path", self.data_path, MAX_DATA_PATH),
        ];
        match checks.into_iter().find(|(_, value, max)| value > max) {
            Some((field, value, max)) => Err(ConfigError::InvalidOpcode { field, value, max }),
            None => Ok(()),
        }
    }
}

impl fmt::Display for FilterRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "(group {:#04x}, func {:#04x}, opcode {:#04x}",
            self.class_group, self.opcode_class, self.opcode
        )?;
        if let Some(msb) = self.compressed_msb {
            write!(f, ", msb {msb}")?;
        }
        write!(f, ", path {:#04x})", self.data_path)
    }
}

/// Load-instruction rules covering the base, floating-point, and compressed
/// load variants.
pub const LOAD_FILTERS: &[FilterRule] = &[
    FilterRule::new(LOAD_CLASS_GROUP, 0x00, 0x03, DATA_PATH_LOAD_QUEUE), // lb
    FilterRule::new(LOAD_CLASS_GROUP, 0x01, 0x03, DATA_PATH_LOAD_QUEUE), // lh
    FilterRule::new(LOAD_CLASS_GROUP, 0x02, 0x03, DATA_PATH_LOAD_QUEUE), // lw
    FilterRule::new(LOAD_CLASS_GROUP, 0x03, 0x03, DATA_PATH_LOAD_QUEUE), // ld
    FilterRule::new(LOAD_CLASS_GROUP, 0x04, 0x03, DATA_PATH_LOAD_QUEUE), // lbu
    FilterRule::new(LOAD_CLASS_GROUP, 0x05, 0x03, DATA_PATH_LOAD_QUEUE), // lhu
    FilterRule::new(LOAD_CLASS_GROUP, 0x02, 0x07, DATA_PATH_LOAD_QUEUE), // flw
    FilterRule::new(LOAD_CLASS_GROUP, 0x03, 0x07, DATA_PATH_LOAD_QUEUE), // fld
    FilterRule::new(LOAD_CLASS_GROUP, 0x04, 0x07, DATA_PATH_LOAD_QUEUE), // flq
    FilterRule::compressed(LOAD_CLASS_GROUP, 0x02, 0x00, 0x00, DATA_PATH_LOAD_QUEUE), // c.fld, c.lq
    FilterRule::compressed(LOAD_CLASS_GROUP, 0x03, 0x00, 0x00, DATA_PATH_LOAD_QUEUE), // c.fld, c.lq
    FilterRule::compressed(LOAD_CLASS_GROUP, 0x04, 0x00, 0x00, DATA_PATH_LOAD_QUEUE), // c.lw
    FilterRule::compressed(LOAD_CLASS_GROUP, 0x05, 0x00, 0x00, DATA_PATH_LOAD_QUEUE), // c.lw
    FilterRule::compressed(LOAD_CLASS_GROUP, 0x06, 0x00, 0x00, DATA_PATH_LOAD_QUEUE), // c.flw, c.ld
    FilterRule::compressed(LOAD_CLASS_GROUP, 0x07, 0x00, 0x00, DATA_PATH_LOAD_QUEUE), // c.flw, c.ld
];

/// Write-once set of filter rules for a single run.
///
/// Only rule keys are retained locally; the rules themselves live in the
/// accelerator.
#[derive(Debug, Clone, Default)]
pub struct FilterTable {
    keys: BTreeSet<FilterKey>,
    class_groups: u16,
    filter_width: Option<u8>,
}

impl FilterTable {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Validates a rule and forwards it to the accelerator.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidOpcode`] for out-of-range fields,
    /// [`ConfigError::DuplicateRule`] when the key is already registered, or
    /// [`ConfigError::Command`] when forwarding fails. The table is unchanged
    /// on every error path.
    pub fn add_filter<C>(&mut self, commands: &C, rule: FilterRule) -> Result<(), ConfigError>
    where
        C: AcceleratorCommands + ?Sized,
    {
        rule.validate()?;
        let key = rule.key();
        if self.keys.contains(&key) {
            return Err(ConfigError::DuplicateRule(rule));
        }
        commands.configure_filter(&rule)?;
        debug!(%rule, "filter configured");
        self.keys.insert(key);
        self.class_groups |= 1 << rule.class_group;
        Ok(())
    }

    /// Registers every rule in order, stopping at the first failure.
    ///
    /// # Errors
    ///
    /// Propagates the first [`FilterTable::add_filter`] failure.
    pub fn add_filters<C>(&mut self, commands: &C, rules: &[FilterRule]) -> Result<(), ConfigError>
    where
        C: AcceleratorCommands + ?Sized,
    {
        rules
            .iter()
            .try_for_each(|rule| self.add_filter(commands, *rule))
    }

    /// Configures the simulated N-wide event filter.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidFilterWidth`] outside
    /// `1..=MAX_FILTER_WIDTH`, or the forwarding failure.
    pub fn set_filter_width<C>(&mut self, commands: &C, width: u8) -> Result<(), ConfigError>
    where
        C: AcceleratorCommands + ?Sized,
    {
        if width == 0 || width > MAX_FILTER_WIDTH {
            return Err(ConfigError::InvalidFilterWidth(width));
        }
        commands.set_filter_width(width)?;
        debug!(width, "filter width configured");
        self.filter_width = Some(width);
        Ok(())
    }

    /// Number of registered rules.
    #[must_use]
    pub fn rule_count(&self) -> usize {
        self.keys.len()
    }

    /// Returns true when the key of `rule` is registered.
    #[must_use]
    pub fn contains(&self, rule: &FilterRule) -> bool {
        self.keys.contains(&rule.key())
    }

    /// Bitmask of class groups with at least one rule.
    #[must_use]
    pub const fn class_group_mask(&self) -> u16 {
        self.class_groups
    }

    /// Configured filter width, when one was set.
    #[must_use]
    pub const fn filter_width(&self) -> Option<u8> {
        self.filter_width
    }
}
