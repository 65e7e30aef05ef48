//! Adaptive measurement window sizing
//!
//! Windows are measured in sampling periods. After each recorded experiment
//! the window grows or shrinks so that it catches roughly
//! `progress_per_experiment` progress intervals, whatever rate the
//! application reports progress at.
//!
//! | observed intervals        | window multiple |
//! |---------------------------|-----------------|
//! | `< target / 2`            | ×2              |
//! | `> target × 2`            | ÷2              |
//! | otherwise                 | unchanged       |

use crate::config::ProfilerConfig;
use std::time::Duration;

/// Feedback controller for the window multiple
#[derive(Debug, Clone)]
pub struct WindowPacer {
    multiple: u64,
    target: u64,
    min: u64,
    max: u64,
    cooldown_divisor: u64,
    period_ns: u64,
}

impl WindowPacer {
    pub fn new(config: &ProfilerConfig) -> Self {
        let min = config.min_window_multiple.max(1);
        let max = config.max_window_multiple.max(min);
        Self {
            multiple: config.initial_window_multiple.clamp(min, max),
            target: config.progress_per_experiment,
            min,
            max,
            cooldown_divisor: config.cooldown_divisor.max(1),
            period_ns: config.sampling_period_ns(),
        }
    }

    /// Current window length in sampling periods
    pub fn multiple(&self) -> u64 {
        self.multiple
    }

    /// Length of the next measurement window
    pub fn window(&self) -> Duration {
        Duration::from_nanos(self.multiple.saturating_mul(self.period_ns))
    }

    /// Pause between experiments, scaled from the current window
    pub fn cooldown(&self) -> Duration {
        Duration::from_nanos((self.multiple / self.cooldown_divisor).saturating_mul(self.period_ns))
    }

    /// Feed back the interval count of a finished window; returns the new multiple
    pub fn adjust(&mut self, observed: u64) -> u64 {
        if observed.saturating_mul(2) < self.target {
            self.multiple = self.multiple.saturating_mul(2);
        } else if observed > self.target.saturating_mul(2) {
            self.multiple /= 2;
        }
        self.multiple = self.multiple.clamp(self.min, self.max);
        self.multiple
    }
}
