//! Causal profile report rendering
//!
//! Text layout, one block per surviving location:
//!
//! ```text
//! 0x4011a0 src/queue.rs:77
//!   0%	1000ns
//!  20%	920ns	-8.00%	1.50%
//!  40%	870ns	-13.00%	3.10%
//!
//! ```
//!
//! Columns after the baseline line: virtual speedup, net ns per progress
//! interval, change against the baseline, and the speedup scaled by the share
//! of samples that hit the location.

use crate::aggregate::MergedSample;
use crate::symbolize::SourceLocation;
use serde::Serialize;
use std::fmt;

/// One non-baseline trial compared against its baseline
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrialEstimate {
    pub delay_percent: u32,
    pub ns_per_op: i64,
    /// `(ns_per_op - baseline) / baseline * 100`
    pub percent_change: f64,
    /// `delay_percent * delay_samples / total_samples`
    pub contribution: f64,
    pub trials_merged: u64,
}

/// Everything reported for one location
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LocationReport {
    pub location: u64,
    pub source: Option<SourceLocation>,
    pub baseline: MergedSample,
    pub trials: Vec<TrialEstimate>,
}

/// Aggregated causal profile
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Report {
    pub locations: Vec<LocationReport>,
}

impl Report {
    pub fn new(locations: Vec<LocationReport>) -> Self {
        Self { locations }
    }

    /// True when no location survived filtering
    pub fn is_empty(&self) -> bool {
        self.locations.is_empty()
    }

    /// Pretty-printed JSON rendering
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

impl fmt::Display for LocationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.source {
            Some(source) => writeln!(f, "{:#x} {}", self.location, source)?,
            None => writeln!(f, "{:#x}", self.location)?,
        }
        writeln!(
            f,
            "{:3}%\t{}ns",
            self.baseline.delay_percent,
            self.baseline.rounded_ns_per_op()
        )?;
        for trial in &self.trials {
            writeln!(
                f,
                "{:3}%\t{}ns\t{:+.2}%\t{:.2}%",
                trial.delay_percent, trial.ns_per_op, trial.percent_change, trial.contribution
            )?;
        }
        writeln!(f)
    }
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return writeln!(f, "not enough data");
        }
        for location in &self.locations {
            write!(f, "{}", location)?;
        }
        Ok(())
    }
}
