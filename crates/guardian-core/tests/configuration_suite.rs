//! Filter and scheduling configuration through the public API.

#![allow(clippy::pedantic, clippy::nursery)]

use guardian_core::{
    AcceleratorCommands, AnalysisMode, ConfigError, EntityRange, FilterRule, FilterTable,
    Instruction, Observation, Orchestrator, RunConfig, RunError, SchedulingPolicy,
    SchedulingTable, SimAccelerator, LOAD_CLASS_GROUP, LOAD_FILTERS, LOAD_WORD,
};
use proptest::prelude::*;
use rstest::rstest;
#[cfg(feature = "serde")]
use serde as _;
use thiserror as _;
use tracing as _;

#[rstest]
#[case::class_group(FilterRule::new(16, 0, 0x03, 2), "class_group")]
#[case::func(FilterRule::new(1, 8, 0x03, 2), "opcode_class")]
#[case::opcode(FilterRule::new(1, 2, 0x80, 2), "opcode")]
#[case::compressed_quadrant(FilterRule::compressed(1, 2, 0x04, 0, 2), "opcode")]
#[case::compressed_msb(FilterRule::compressed(1, 2, 0x00, 2, 2), "compressed_msb")]
#[case::data_path(FilterRule::new(1, 2, 0x03, 4), "data_path")]
fn out_of_range_fields_are_rejected_before_forwarding(
    #[case] rule: FilterRule,
    #[case] expected_field: &str,
) {
    let sim = SimAccelerator::default();
    let mut filters = FilterTable::new();
    match filters.add_filter(&sim, rule) {
        Err(ConfigError::InvalidOpcode { field, .. }) => assert_eq!(field, expected_field),
        other => panic!("unexpected result {other:?}"),
    }
    assert_eq!(sim.filter_count(), 0);
    assert_eq!(filters.rule_count(), 0);
}

#[test]
fn duplicate_rule_leaves_the_table_unchanged() {
    let sim = SimAccelerator::default();
    let mut filters = FilterTable::new();
    filters.add_filters(&sim, LOAD_FILTERS).expect("preset");
    let before = filters.rule_count();

    let error = filters
        .add_filter(&sim, LOAD_FILTERS[0])
        .expect_err("duplicate");
    assert_eq!(error, ConfigError::DuplicateRule(LOAD_FILTERS[0]));
    assert_eq!(filters.rule_count(), before);
    assert_eq!(sim.filter_count(), before);
    assert_eq!(filters.class_group_mask(), 1 << LOAD_CLASS_GROUP);
}

#[rstest]
#[case::zero_start(0, 2)]
#[case::reversed(3, 2)]
#[case::past_last_checker(5, 7)]
fn invalid_entity_ranges_are_rejected(#[case] start: u8, #[case] end: u8) {
    let sim = SimAccelerator::default();
    let mut scheduling = SchedulingTable::new();
    scheduling.set_number_of_checkers(&sim, 6).expect("checkers");
    assert_eq!(
        scheduling.add_scheduling_entity(&sim, 0, start, end, SchedulingPolicy::RoundRobin),
        Err(ConfigError::InvalidRange {
            start,
            end,
            checkers: 6,
        })
    );
    assert_eq!(sim.entity_count(), 0);
}

#[test]
fn mapper_rejects_unregistered_and_overlapping_entities() {
    let sim = SimAccelerator::default();
    let mut scheduling = SchedulingTable::new();
    scheduling.set_number_of_checkers(&sim, 6).expect("checkers");
    scheduling
        .add_scheduling_entity(&sim, 0, 1, 3, SchedulingPolicy::RoundRobin)
        .expect("entity 0");
    scheduling
        .add_scheduling_entity(&sim, 1, 3, 4, SchedulingPolicy::RoundRobin)
        .expect("entity 1");

    assert_eq!(
        scheduling.set_mapper(&sim, 0b10, 0b100),
        Err(ConfigError::UnknownEntity(0b100))
    );
    assert_eq!(
        scheduling.set_mapper(&sim, 0b10, 0b11),
        Err(ConfigError::OverlappingEntities {
            first: 0,
            second: 1
        })
    );
    assert_eq!(sim.mapper(), None);

    scheduling.set_mapper(&sim, 0b10, 0b01).expect("single entity");
    assert_eq!(
        scheduling.set_mapper(&sim, 0b10, 0b10),
        Err(ConfigError::MapperAlreadySet)
    );
}

#[test]
fn orchestrator_rejects_overlapping_configured_entities() {
    let sim = SimAccelerator::default();
    let config = RunConfig {
        entities: vec![EntityRange::new(1, 2), EntityRange::new(2, 3)],
        ..RunConfig::with_checkers(3)
    };
    let error = Orchestrator::new(&sim, config)
        .configure()
        .expect_err("overlap");
    assert_eq!(
        error,
        ConfigError::OverlappingEntities {
            first: 0,
            second: 1
        }
    );
    assert!(matches!(RunError::from(error), RunError::Config(_)));
}

#[test]
fn unmapped_class_groups_are_not_dispatched() {
    let sim = SimAccelerator::default();
    let mut filters = FilterTable::new();
    filters
        .add_filter(&sim, FilterRule::new(3, 2, 0x23, 1))
        .expect("store rule");
    filters.add_filters(&sim, LOAD_FILTERS).expect("loads");
    let mut scheduling = SchedulingTable::new();
    scheduling.set_number_of_checkers(&sim, 2).expect("checkers");
    scheduling
        .add_scheduling_entity(&sim, 0, 1, 2, SchedulingPolicy::RoundRobin)
        .expect("entity");
    scheduling
        .set_mapper(&sim, 1 << LOAD_CLASS_GROUP, 0b1)
        .expect("mapper");
    sim.enable(AnalysisMode::FaultInjection).expect("enable");

    assert_eq!(
        sim.observe(Instruction::new(2, 0x23)),
        Observation::Filtered
    );
    assert_eq!(sim.observe(LOAD_WORD), Observation::Queued { checker: 1 });
}

proptest! {
    #[test]
    fn in_range_full_width_rules_always_validate(
        class_group in 0u8..16,
        func in 0u8..=7,
        opcode in 0u8..=0x7F,
        data_path in 0u8..=3,
    ) {
        prop_assert!(FilterRule::new(class_group, func, opcode, data_path).validate().is_ok());
    }

    #[test]
    fn checker_count_outside_supported_range_is_rejected(count in 64u8..) {
        let sim = SimAccelerator::default();
        let mut scheduling = SchedulingTable::new();
        prop_assert_eq!(
            scheduling.set_number_of_checkers(&sim, count),
            Err(ConfigError::InvalidCheckerCount(count))
        );
        prop_assert_eq!(sim.checkers(), 0);
    }
}
