//! Experiment selection per sampled location
//!
//! Each location runs up to `max_trials_per_experiment` cycles. A cycle tests
//! every non-zero delay level once, in a fresh random order, plus exactly one
//! null (zero-delay) trial. The null trial lands at a random point within the
//! cycle so that time-varying system load cannot line up with trial order.
//! Once the last cycle is exhausted the location is retired for good.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};

/// Outcome of asking the selector for the next trial
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trial {
    /// Run an experiment at this virtual speedup percentage (0 = baseline)
    Delay { percent: u32 },
    /// The location has used its whole budget
    Retired,
}

/// Selection state of one location
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Experiment {
    trials_run: u32,
    null_trial_done: bool,
    remaining: Vec<u32>,
}

impl Default for Experiment {
    fn default() -> Self {
        Self::new()
    }
}

impl Experiment {
    pub fn new() -> Self {
        // No cycle started yet: reads as exhausted so the first call opens cycle 1
        Self {
            trials_run: 0,
            null_trial_done: true,
            remaining: Vec::new(),
        }
    }

    /// Cycles started so far
    pub fn trials_run(&self) -> u32 {
        self.trials_run
    }

    /// Whether the null trial of the current cycle has been handed out
    pub fn has_null_trial(&self) -> bool {
        self.null_trial_done
    }

    /// Delay levels still pending in the current cycle
    pub fn remaining(&self) -> &[u32] {
        &self.remaining
    }

    fn cycle_exhausted(&self) -> bool {
        self.null_trial_done && self.remaining.is_empty()
    }
}

/// Chooses the next delay level for a location
#[derive(Debug)]
pub struct ExperimentSelector {
    rng: StdRng,
    levels: u32,
    resolution: u32,
    max_trials: u32,
}

impl ExperimentSelector {
    /// Selector drawing from `rng`
    ///
    /// `resolution` is the step between levels in percent; levels run from
    /// `resolution` to `100 - resolution`. A step above 50 leaves no delay
    /// levels, so every cycle is a lone null trial.
    pub fn new(rng: StdRng, resolution: u32, max_trials: u32) -> Self {
        Self {
            rng,
            levels: (100 / resolution.max(1)).saturating_sub(1),
            resolution,
            max_trials,
        }
    }

    /// Reproducible selector for a given seed
    ///
    /// # Example
    /// ```
    /// use causalprof::selector::{Experiment, ExperimentSelector, Trial};
    ///
    /// let mut selector = ExperimentSelector::seeded(42, 10, 5);
    /// let mut experiment = Experiment::new();
    /// let mut trials = 0;
    /// while let Trial::Delay { .. } = selector.next(&mut experiment) {
    ///     trials += 1;
    /// }
    /// assert_eq!(trials, 5 * 10);
    /// ```
    pub fn seeded(seed: u64, resolution: u32, max_trials: u32) -> Self {
        Self::new(StdRng::seed_from_u64(seed), resolution, max_trials)
    }

    /// Selector seeded from OS entropy
    pub fn from_entropy(resolution: u32, max_trials: u32) -> Self {
        Self::new(StdRng::from_entropy(), resolution, max_trials)
    }

    /// Pick the next trial for `experiment`, advancing its state
    pub fn next(&mut self, experiment: &mut Experiment) -> Trial {
        if experiment.cycle_exhausted() {
            if experiment.trials_run >= self.max_trials {
                return Trial::Retired;
            }
            experiment.trials_run += 1;
            experiment.null_trial_done = false;
            let mut order: Vec<u32> = (1..=self.levels).collect();
            order.shuffle(&mut self.rng);
            experiment.remaining = order;
        }

        if !experiment.null_trial_done
            && (experiment.remaining.is_empty() || self.rng.gen_bool(0.5))
        {
            experiment.null_trial_done = true;
            return Trial::Delay { percent: 0 };
        }

        let level = experiment.remaining.remove(0);
        Trial::Delay {
            percent: level * self.resolution,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn cycle(selector: &mut ExperimentSelector, experiment: &mut Experiment) -> Vec<u32> {
        (0..10)
            .map(|_| match selector.next(experiment) {
                Trial::Delay { percent } => percent,
                Trial::Retired => panic!("retired mid-cycle"),
            })
            .collect()
    }

    #[test]
    fn test_first_call_opens_cycle_one() {
        let mut selector = ExperimentSelector::seeded(1, 10, 5);
        let mut experiment = Experiment::new();
        assert_eq!(experiment.trials_run(), 0);

        selector.next(&mut experiment);
        assert_eq!(experiment.trials_run(), 1);
    }

    #[test]
    fn test_cycle_covers_every_level_once_plus_null() {
        let mut selector = ExperimentSelector::seeded(7, 10, 5);
        let mut experiment = Experiment::new();

        let mut trials = cycle(&mut selector, &mut experiment);
        trials.sort_unstable();
        assert_eq!(trials, vec![0, 10, 20, 30, 40, 50, 60, 70, 80, 90]);
    }

    #[test]
    fn test_retired_after_max_cycles_forever() {
        let mut selector = ExperimentSelector::seeded(3, 10, 5);
        let mut experiment = Experiment::new();
        for _ in 0..5 {
            cycle(&mut selector, &mut experiment);
        }
        assert_eq!(experiment.trials_run(), 5);
        for _ in 0..20 {
            assert_eq!(selector.next(&mut experiment), Trial::Retired);
        }
    }

    #[test]
    fn test_null_position_varies_across_cycles() {
        let mut selector = ExperimentSelector::seeded(11, 10, 50);
        let mut experiment = Experiment::new();
        let positions: HashSet<usize> = (0..50)
            .map(|_| {
                cycle(&mut selector, &mut experiment)
                    .iter()
                    .position(|&p| p == 0)
                    .unwrap()
            })
            .collect();
        assert!(positions.len() > 1, "null trial always at the same slot");
    }

    #[test]
    fn test_same_seed_same_sequence() {
        let run = |seed| {
            let mut selector = ExperimentSelector::seeded(seed, 10, 2);
            let mut experiment = Experiment::new();
            (0..21).map(|_| selector.next(&mut experiment)).collect::<Vec<_>>()
        };
        assert_eq!(run(99), run(99));
    }

    #[test]
    fn test_coarser_resolution() {
        let mut selector = ExperimentSelector::seeded(5, 25, 1);
        let mut experiment = Experiment::new();
        let mut trials: Vec<u32> = (0..4)
            .map(|_| match selector.next(&mut experiment) {
                Trial::Delay { percent } => percent,
                Trial::Retired => panic!("retired early"),
            })
            .collect();
        trials.sort_unstable();
        assert_eq!(trials, vec![0, 25, 50, 75]);
        assert_eq!(selector.next(&mut experiment), Trial::Retired);
    }

    #[test]
    fn test_zero_budget_retires_immediately() {
        let mut selector = ExperimentSelector::seeded(5, 10, 0);
        let mut experiment = Experiment::new();
        assert_eq!(selector.next(&mut experiment), Trial::Retired);
    }

    #[test]
    fn test_oversized_resolution_runs_null_trials_only() {
        let mut selector = ExperimentSelector::seeded(6, 150, 2);
        let mut experiment = Experiment::new();
        assert_eq!(selector.next(&mut experiment), Trial::Delay { percent: 0 });
        assert_eq!(selector.next(&mut experiment), Trial::Delay { percent: 0 });
        assert_eq!(selector.next(&mut experiment), Trial::Retired);
    }
}
