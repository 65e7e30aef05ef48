//! Offline aggregation of experiment logs
//!
//! Turns the flat record stream written by the coordinator into per-location
//! speedup estimates:
//!
//! 1. group records by location
//! 2. drop locations with fewer than `min_trials` records
//! 3. stable-sort each group by delay percent and merge equal percents
//! 4. split off the zero-delay baseline (per location, or pooled)
//! 5. compare every remaining trial against the baseline
//!
//! Merging keeps a running count-weighted mean of `ns_per_op`, so a sample
//! that already stands for three trials weighs three times as much as a
//! single one.

use crate::config::{AggregateConfig, BaselinePolicy};
use crate::record::{ExperimentRecord, Profile, RecordError};
use crate::report::{LocationReport, Report, TrialEstimate};
use crate::symbolize::Symbolizer;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use thiserror::Error;
use tracing::debug;

/// Errors that abort an aggregation
#[derive(Error, Debug)]
pub enum AggregateError {
    #[error("failed to open causal profile {path}: {source}")]
    Open {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Record(#[from] RecordError),
}

/// One or more trials at the same (location, delay percent)
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MergedSample {
    pub location: u64,
    pub delay_percent: u32,
    /// Count-weighted mean over `trials_merged`
    pub ns_per_op: f64,
    pub trials_merged: u64,
    pub delay_samples: i64,
    pub total_samples: i64,
}

impl From<&ExperimentRecord> for MergedSample {
    fn from(record: &ExperimentRecord) -> Self {
        Self {
            location: record.location,
            delay_percent: record.delay_percent,
            ns_per_op: record.ns_per_op as f64,
            trials_merged: 1,
            delay_samples: record.delay_samples,
            total_samples: record.total_samples,
        }
    }
}

impl MergedSample {
    /// Fold `other` into `self`
    ///
    /// # Example
    /// ```
    /// use causalprof::aggregate::MergedSample;
    ///
    /// let mut a = MergedSample {
    ///     location: 0x10, delay_percent: 20, ns_per_op: 100.0,
    ///     trials_merged: 1, delay_samples: 1, total_samples: 10,
    /// };
    /// let b = MergedSample { ns_per_op: 300.0, trials_merged: 3, ..a.clone() };
    /// a.merge(&b);
    /// assert_eq!(a.ns_per_op, 250.0);
    /// assert_eq!(a.trials_merged, 4);
    /// ```
    pub fn merge(&mut self, other: &MergedSample) {
        let merged = self.trials_merged + other.trials_merged;
        if merged > 0 {
            self.ns_per_op = (self.ns_per_op * self.trials_merged as f64
                + other.ns_per_op * other.trials_merged as f64)
                / merged as f64;
        }
        self.trials_merged = merged;
        self.delay_samples = self.delay_samples.saturating_add(other.delay_samples);
        self.total_samples = self.total_samples.saturating_add(other.total_samples);
    }

    /// `ns_per_op` rounded to whole nanoseconds
    pub fn rounded_ns_per_op(&self) -> i64 {
        self.ns_per_op.round() as i64
    }

    /// Delay percent scaled by the share of samples that hit the target
    pub fn contribution(&self) -> f64 {
        if self.total_samples <= 0 {
            return 0.0;
        }
        f64::from(self.delay_percent) * (self.delay_samples as f64 / self.total_samples as f64)
    }
}

struct Group {
    raw_records: usize,
    samples: Vec<MergedSample>,
}

/// Builds a [`Report`] from experiment records
pub struct Aggregator<'a> {
    config: AggregateConfig,
    symbolizer: &'a dyn Symbolizer,
}

impl<'a> Aggregator<'a> {
    pub fn new(config: AggregateConfig, symbolizer: &'a dyn Symbolizer) -> Self {
        Self { config, symbolizer }
    }

    /// Parse and aggregate a log file; any corrupt line aborts the whole file
    pub fn aggregate_file(&self, path: &Path) -> Result<Report, AggregateError> {
        Ok(self.aggregate(&load_profile(path)?.records))
    }

    /// Parse and aggregate a log stream
    pub fn aggregate_log<R: BufRead>(&self, reader: R) -> Result<Report, AggregateError> {
        let records = ExperimentRecord::parse_log(reader)?;
        Ok(self.aggregate(&records))
    }

    /// Aggregate already-parsed records
    pub fn aggregate(&self, records: &[ExperimentRecord]) -> Report {
        let mut groups: BTreeMap<u64, Group> = BTreeMap::new();
        for record in records {
            let group = groups.entry(record.location).or_insert_with(|| Group {
                raw_records: 0,
                samples: Vec::new(),
            });
            group.raw_records += 1;
            group.samples.push(MergedSample::from(record));
        }

        let mut merged: BTreeMap<u64, (Option<MergedSample>, Vec<MergedSample>)> = BTreeMap::new();
        for (location, group) in groups {
            if group.raw_records < self.config.min_trials {
                debug!(
                    "dropping {:#x}: {} records, need {}",
                    location, group.raw_records, self.config.min_trials
                );
                continue;
            }
            let mut samples = merge_by_percent(group.samples);
            let baseline = if samples.first().is_some_and(|s| s.delay_percent == 0) {
                Some(samples.remove(0))
            } else {
                None
            };
            merged.insert(location, (baseline, samples));
        }

        let pooled = match self.config.baseline {
            BaselinePolicy::PerLocation => None,
            BaselinePolicy::Pooled => merged.values().filter_map(|(b, _)| b.as_ref()).fold(
                None,
                |pool: Option<MergedSample>, baseline| match pool {
                    None => Some(MergedSample {
                        location: 0,
                        ..baseline.clone()
                    }),
                    Some(mut pool) => {
                        pool.merge(baseline);
                        Some(pool)
                    }
                },
            ),
        };

        let mut locations = Vec::new();
        for (location, (own_baseline, trials)) in merged {
            let baseline = match (&pooled, own_baseline) {
                (Some(pool), _) => pool.clone(),
                (None, Some(own)) => own,
                (None, None) => {
                    debug!("dropping {:#x}: no baseline trial", location);
                    continue;
                }
            };
            if baseline.ns_per_op <= 0.0 {
                debug!("dropping {:#x}: zero baseline", location);
                continue;
            }

            let trials = trials
                .iter()
                .map(|trial| TrialEstimate {
                    delay_percent: trial.delay_percent,
                    ns_per_op: trial.rounded_ns_per_op(),
                    percent_change: (trial.ns_per_op - baseline.ns_per_op) / baseline.ns_per_op
                        * 100.0,
                    contribution: trial.contribution(),
                    trials_merged: trial.trials_merged,
                })
                .collect();

            locations.push(LocationReport {
                location,
                source: self.symbolizer.resolve(location),
                baseline,
                trials,
            });
        }

        Report::new(locations)
    }
}

/// Read and parse a log file, including its load-bias annotation
pub fn load_profile(path: &Path) -> Result<Profile, AggregateError> {
    let file = File::open(path).map_err(|source| AggregateError::Open {
        path: path.display().to_string(),
        source,
    })?;
    Ok(Profile::parse(BufReader::new(file))?)
}

/// Sort by delay percent (stable) and merge runs of equal percent
fn merge_by_percent(mut samples: Vec<MergedSample>) -> Vec<MergedSample> {
    samples.sort_by_key(|s| s.delay_percent);
    let mut merged: Vec<MergedSample> = Vec::with_capacity(samples.len());
    for sample in samples {
        match merged.last_mut() {
            Some(last) if last.delay_percent == sample.delay_percent => last.merge(&sample),
            _ => merged.push(sample),
        }
    }
    merged
}
