//! Deterministic in-memory sampling source

use super::{SampleStats, SamplerError, SamplingSource};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Condvar, Mutex};

#[derive(Debug, Default)]
struct Script {
    candidates: VecDeque<u64>,
    installed: Vec<u64>,
    stopped: bool,
}

/// Sampling source replaying a fixed list of candidate locations
///
/// Every installed non-zero delay adds `simulated_delay_ns` to the injected
/// total, which lets tests observe how the progress tracker subtracts delay.
///
/// # Example
/// ```
/// use causalprof::sampler::{SampleStats, SamplingSource, ScriptedSampler};
///
/// let sampler = ScriptedSampler::new([0x10, 0x20]).with_stats(SampleStats {
///     delay_samples: 3,
///     total_samples: 10,
/// });
/// sampler.start(1000).unwrap();
/// assert_eq!(sampler.next_candidate(), Some(0x10));
/// assert_eq!(sampler.next_candidate(), Some(0x20));
/// assert_eq!(sampler.next_candidate(), None);
/// assert_eq!(sampler.sample_stats().total_samples, 10);
/// ```
#[derive(Debug, Default)]
pub struct ScriptedSampler {
    script: Mutex<Script>,
    wake: Condvar,
    hold_open: bool,
    running: AtomicBool,
    busy: bool,
    stats: SampleStats,
    simulated_delay_ns: u64,
    injected_total: AtomicU64,
}

impl ScriptedSampler {
    /// Replay `candidates` in order, then report sampling stopped
    pub fn new(candidates: impl IntoIterator<Item = u64>) -> Self {
        Self {
            script: Mutex::new(Script {
                candidates: candidates.into_iter().collect(),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    /// Block in `next_candidate` once the script is exhausted, until stopped
    pub fn hold_open(mut self) -> Self {
        self.hold_open = true;
        self
    }

    /// Stats reported for every window
    pub fn with_stats(mut self, stats: SampleStats) -> Self {
        self.stats = stats;
        self
    }

    /// Delay credited to the injected total per non-zero install
    pub fn with_simulated_delay(mut self, ns: u64) -> Self {
        self.simulated_delay_ns = ns;
        self
    }

    /// Make `start` fail as if another sampler owned the timer
    pub fn busy(mut self) -> Self {
        self.busy = true;
        self
    }

    /// Queue another candidate, waking a blocked `next_candidate`
    pub fn push_candidate(&self, location: u64) {
        if let Ok(mut script) = self.script.lock() {
            script.candidates.push_back(location);
        }
        self.wake.notify_all();
    }

    /// Credit delay directly to the injected total
    pub fn inject(&self, ns: u64) {
        self.injected_total.fetch_add(ns, Ordering::SeqCst);
    }

    /// Every delay passed to `install_delay`, in call order
    pub fn installed_delays(&self) -> Vec<u64> {
        self.script
            .lock()
            .map(|script| script.installed.clone())
            .unwrap_or_default()
    }

    /// Whether `start` has been called without a matching stop
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

impl SamplingSource for ScriptedSampler {
    fn start(&self, _sampling_hz: u32) -> Result<(), SamplerError> {
        if self.busy {
            return Err(SamplerError::Busy("scripted sampler marked busy".into()));
        }
        if let Ok(mut script) = self.script.lock() {
            script.stopped = false;
        }
        self.running.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn next_candidate(&self) -> Option<u64> {
        let mut script = self.script.lock().ok()?;
        loop {
            if script.stopped {
                return None;
            }
            if let Some(location) = script.candidates.pop_front() {
                return Some(location);
            }
            if !self.hold_open {
                return None;
            }
            script = self.wake.wait(script).ok()?;
        }
    }

    fn install_delay(&self, ns_per_sample: u64) {
        if let Ok(mut script) = self.script.lock() {
            script.installed.push(ns_per_sample);
        }
        if ns_per_sample > 0 {
            self.inject(self.simulated_delay_ns);
        }
    }

    fn injected_delay_total(&self) -> u64 {
        self.injected_total.load(Ordering::SeqCst)
    }

    fn sample_stats(&self) -> SampleStats {
        self.stats
    }

    fn stop_sampling(&self) {
        if let Ok(mut script) = self.script.lock() {
            script.stopped = true;
        }
        self.running.store(false, Ordering::SeqCst);
        self.wake.notify_all();
    }
}
