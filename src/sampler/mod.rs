//! Sampling and delay-injection sources
//!
//! The coordinator never touches signals or timers directly. It talks to a
//! [`SamplingSource`], which picks candidate program counters, injects the
//! configured delay into every sample that lands off the current target, and
//! counts samples per measurement window.
//!
//! Two implementations ship with the crate:
//! - [`ScriptedSampler`]: deterministic, in-memory; drives tests and benches
//! - [`ItimerSampler`]: `ITIMER_PROF` + `SIGPROF` on Linux

mod scripted;

#[cfg(target_os = "linux")]
mod itimer;

pub use scripted::ScriptedSampler;

#[cfg(target_os = "linux")]
pub use itimer::ItimerSampler;

use thiserror::Error;

/// Errors raised when a sampling source cannot be started
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SamplerError {
    /// Another profiler already owns the sampling timer or signal
    #[error("sampling source busy: {0}")]
    Busy(String),

    /// The platform refused to install the handler or timer
    #[error("failed to install sampler: {0}")]
    Install(String),
}

/// Sample counts for the current measurement window
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SampleStats {
    /// Samples that landed on the targeted location
    pub delay_samples: u64,
    /// All samples taken while the target was armed
    pub total_samples: u64,
}

/// A source of candidate locations that can inject delay into samples
///
/// Implementations are shared between the coordinator thread and every
/// application thread reading [`SamplingSource::injected_delay_total`], so
/// all methods take `&self`.
pub trait SamplingSource: Send + Sync {
    /// Begin sampling at `sampling_hz`
    ///
    /// Fails with [`SamplerError::Busy`] when a conflicting sampler is active.
    fn start(&self, sampling_hz: u32) -> Result<(), SamplerError>;

    /// Block until the next candidate location is sampled
    ///
    /// Returns `None` once sampling has been stopped. Returning a candidate
    /// also starts a fresh sample-count window targeting it.
    fn next_candidate(&self) -> Option<u64>;

    /// Delay, in nanoseconds, added to every off-target sample (0 disables)
    fn install_delay(&self, ns_per_sample: u64);

    /// Total delay injected since sampling started, in nanoseconds
    fn injected_delay_total(&self) -> u64;

    /// Targeted and total sample counts for the current window
    fn sample_stats(&self) -> SampleStats;

    /// Stop sampling and wake any blocked [`SamplingSource::next_candidate`]
    fn stop_sampling(&self);
}
