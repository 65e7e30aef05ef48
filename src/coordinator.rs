//! Experiment coordinator: the online control loop
//!
//! One coordinator runs on a dedicated thread for the lifetime of a profiling
//! session. Each iteration:
//!
//! ```text
//! candidate ─▶ select trial ─▶ reset progress ─▶ install delay
//!     ▲                                              │
//!     │                                      wait window (or stop)
//!     │                                              │
//! cool-down ◀─ adapt window ◀─ record ◀─ snapshot ◀─ remove delay
//! ```
//!
//! Nothing that happens to a single candidate or window ends the loop; only
//! the stop channel or the sampler reporting it has stopped does.

use crate::config::{ConfigError, ProfilerConfig};
use crate::pacing::WindowPacer;
use crate::progress::ProgressTracker;
use crate::record::{ExperimentRecord, Recorder};
use crate::sampler::SamplingSource;
use crate::selector::{Experiment, ExperimentSelector, Trial};
use crossbeam::channel::{after, Receiver, TryRecvError};
use crossbeam::select;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace, warn};

/// Counters describing what a coordinator run did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    /// Experiments written to the log
    pub recorded: u64,
    /// Windows that saw no progress and were dropped
    pub discarded: u64,
    /// Candidates skipped because their location was already retired
    pub retired_hits: u64,
    /// Candidates without a usable address
    pub unresolved: u64,
    /// Records the sink refused
    pub write_errors: u64,
}

enum Step {
    Recorded { intervals: u64 },
    Discarded,
    Retired,
    Stopped,
}

/// Owns all experiment state of one profiling session
pub struct Coordinator {
    config: ProfilerConfig,
    sampler: Arc<dyn SamplingSource>,
    progress: Arc<ProgressTracker>,
    selector: ExperimentSelector,
    pacer: WindowPacer,
    recorder: Recorder,
    experiments: HashMap<u64, Experiment>,
    summary: RunSummary,
}

impl Coordinator {
    /// Fails if `config` does not pass [`ProfilerConfig::validate`]
    pub fn new(
        config: ProfilerConfig,
        sampler: Arc<dyn SamplingSource>,
        progress: Arc<ProgressTracker>,
        recorder: Recorder,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let selector = match config.seed {
            Some(seed) => ExperimentSelector::seeded(
                seed,
                config.percentile_resolution,
                config.max_trials_per_experiment,
            ),
            None => ExperimentSelector::from_entropy(
                config.percentile_resolution,
                config.max_trials_per_experiment,
            ),
        };
        let pacer = WindowPacer::new(&config);
        Ok(Self {
            config,
            sampler,
            progress,
            selector,
            pacer,
            recorder,
            experiments: HashMap::new(),
            summary: RunSummary::default(),
        })
    }

    /// Run experiments until `stop` fires or disconnects, or sampling ends
    pub fn run(mut self, stop: Receiver<()>) -> RunSummary {
        debug!("coordinator started");
        loop {
            if stop_requested(&stop) {
                break;
            }
            let Some(location) = self.sampler.next_candidate() else {
                debug!("sampler stopped, coordinator exiting");
                break;
            };
            if location == 0 {
                self.summary.unresolved += 1;
                trace!("skipping candidate without a stable address");
                continue;
            }

            match self.run_experiment(location, &stop) {
                Step::Stopped => break,
                Step::Retired => {
                    self.summary.retired_hits += 1;
                    continue;
                }
                Step::Discarded => {
                    self.summary.discarded += 1;
                    continue;
                }
                Step::Recorded { intervals } => {
                    self.summary.recorded += 1;
                    let multiple = self.pacer.adjust(intervals);
                    trace!("window multiple now {}", multiple);
                    if wait_or_stop(&stop, self.pacer.cooldown()) {
                        break;
                    }
                }
            }
        }
        debug!(
            "coordinator finished: {} recorded, {} discarded",
            self.summary.recorded, self.summary.discarded
        );
        self.summary
    }

    fn run_experiment(&mut self, location: u64, stop: &Receiver<()>) -> Step {
        let experiment = self.experiments.entry(location).or_default();
        let percent = match self.selector.next(experiment) {
            Trial::Delay { percent } => percent,
            Trial::Retired => {
                self.sampler.install_delay(0);
                return Step::Retired;
            }
        };
        let delay_per_sample = u64::from(percent) * self.config.delay_per_percent_ns();

        self.progress.reset();
        self.sampler.install_delay(delay_per_sample);
        let stopped = wait_or_stop(stop, self.pacer.window());
        self.sampler.install_delay(0);
        if stopped {
            return Step::Stopped;
        }

        let snapshot = self.progress.take_snapshot();
        let Some(ns_per_op) = snapshot.ns_per_op() else {
            debug!(
                "no progress during {}% window at {:#x}, discarding",
                percent, location
            );
            return Step::Discarded;
        };

        let stats = self.sampler.sample_stats();
        let record = ExperimentRecord {
            location,
            delay_percent: percent,
            ns_per_op: to_i64(ns_per_op),
            delay_samples: to_i64(stats.delay_samples),
            total_samples: to_i64(stats.total_samples),
        };
        if let Err(e) = self.recorder.record(&record, snapshot.intervals) {
            self.summary.write_errors += 1;
            warn!("failed to write experiment record: {}", e);
        }
        Step::Recorded {
            intervals: snapshot.intervals,
        }
    }
}

fn to_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

fn stop_requested(stop: &Receiver<()>) -> bool {
    !matches!(stop.try_recv(), Err(TryRecvError::Empty))
}

/// Sleep for `timeout`; returns `true` if a stop arrived first
fn wait_or_stop(stop: &Receiver<()>, timeout: Duration) -> bool {
    select! {
        recv(stop) -> _ => true,
        recv(after(timeout)) -> _ => false,
    }
}
