//! Integration tests for experiment selection (Sprint 50)
//!
//! # Test Coverage
//!
//! - ✅ Every cycle runs each delay level once plus one null trial
//! - ✅ Locations retire after the configured number of cycles
//! - ✅ Independent experiments share one selector without interfering
//! - ✅ Seeded selectors are reproducible

use causalprof::selector::{Experiment, ExperimentSelector, Trial};
use proptest::prelude::*;
use std::collections::BTreeMap;

fn drain(selector: &mut ExperimentSelector, experiment: &mut Experiment) -> Vec<u32> {
    let mut trials = Vec::new();
    while let Trial::Delay { percent } = selector.next(experiment) {
        trials.push(percent);
    }
    trials
}

#[test]
fn test_default_protocol_runs_fifty_trials() {
    let mut selector = ExperimentSelector::seeded(1, 10, 5);
    let mut experiment = Experiment::new();
    let trials = drain(&mut selector, &mut experiment);

    assert_eq!(trials.len(), 50);
    let mut counts: BTreeMap<u32, usize> = BTreeMap::new();
    for percent in trials {
        *counts.entry(percent).or_default() += 1;
    }
    let expected: BTreeMap<u32, usize> = (0..10).map(|level| (level * 10, 5)).collect();
    assert_eq!(counts, expected);
}

#[test]
fn test_retired_location_stays_retired() {
    let mut selector = ExperimentSelector::seeded(2, 10, 1);
    let mut experiment = Experiment::new();
    assert_eq!(drain(&mut selector, &mut experiment).len(), 10);
    for _ in 0..3 {
        assert_eq!(selector.next(&mut experiment), Trial::Retired);
    }
    assert_eq!(experiment.trials_run(), 1);
}

#[test]
fn test_interleaved_locations_keep_separate_cycles() {
    let mut selector = ExperimentSelector::seeded(3, 10, 2);
    let mut hot = Experiment::new();
    let mut cold = Experiment::new();
    let mut hot_trials = Vec::new();
    let mut cold_trials = Vec::new();

    for step in 0..60 {
        let (experiment, trials) = if step % 3 == 0 {
            (&mut cold, &mut cold_trials)
        } else {
            (&mut hot, &mut hot_trials)
        };
        if let Trial::Delay { percent } = selector.next(experiment) {
            trials.push(percent);
        }
    }

    assert_eq!(hot_trials.len(), 20);
    assert_eq!(cold_trials.len(), 20);
    for cycle in hot_trials.chunks(10) {
        assert_eq!(cycle.iter().filter(|&&p| p == 0).count(), 1);
    }
}

#[test]
fn test_same_seed_same_schedule() {
    let schedule = |seed| {
        let mut selector = ExperimentSelector::seeded(seed, 10, 3);
        drain(&mut selector, &mut Experiment::new())
    };
    assert_eq!(schedule(99), schedule(99));
    assert_ne!(schedule(99), schedule(100));
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_each_cycle_is_a_permutation_with_one_null(
        seed in any::<u64>(),
        resolution in prop::sample::select(vec![5u32, 10, 20, 25, 50]),
        max_trials in 1u32..6,
    ) {
        let mut selector = ExperimentSelector::seeded(seed, resolution, max_trials);
        let mut experiment = Experiment::new();
        let trials = drain(&mut selector, &mut experiment);

        let per_cycle = (100 / resolution) as usize;
        prop_assert_eq!(trials.len(), per_cycle * max_trials as usize);

        let expected: Vec<u32> = (0..per_cycle as u32).map(|level| level * resolution).collect();
        for cycle in trials.chunks(per_cycle) {
            let mut sorted = cycle.to_vec();
            sorted.sort_unstable();
            prop_assert_eq!(sorted, expected.clone());
        }
        prop_assert_eq!(selector.next(&mut experiment), Trial::Retired);
    }
}
