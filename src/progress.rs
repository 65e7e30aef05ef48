//! Progress point accounting
//!
//! Application threads bracket each unit of work (a request, an iteration)
//! with [`ProgressTracker::begin`] and [`ProgressTracker::end`]. The tracker
//! accumulates the net duration of every interval, wall time minus the delay
//! the sampler injected while it ran, into one shared accumulator that the
//! coordinator snapshots at the end of each measurement window.
//!
//! # Generations
//!
//! Every window reset bumps a generation counter. A token remembers the
//! generation it started in, and `end` drops the interval if the counter moved
//! in between: such an interval straddled two experiment configurations and
//! cannot be attributed to either. Dropping is the expected outcome under
//! concurrent load, not an error.
//!
//! ```text
//! gen 7 │ begin ───── end │           counted
//! gen 7 │ begin ──────────┼── end     gen 8, dropped
//! ```

use crate::sampler::SamplingSource;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

/// Opaque start marker returned by [`ProgressTracker::begin`]
#[derive(Debug, Clone, Copy)]
#[must_use = "a progress token does nothing unless passed to end()"]
pub struct ProgressToken {
    start: Option<TokenStart>,
}

#[derive(Debug, Clone, Copy)]
struct TokenStart {
    at: Instant,
    injected_delay: u64,
    generation: u64,
}

impl ProgressToken {
    /// Token that `end` ignores; handed out while profiling is inactive
    pub const fn inert() -> Self {
        Self { start: None }
    }

    /// Whether this token will be ignored by `end`
    pub fn is_inert(&self) -> bool {
        self.start.is_none()
    }
}

/// Progress accumulated since the last reset
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProgressSnapshot {
    /// Completed intervals attributed to the window
    pub intervals: u64,
    /// Sum of their net durations in nanoseconds
    pub net_time_ns: u64,
}

impl ProgressSnapshot {
    /// Mean net nanoseconds per interval, `None` when nothing completed
    pub fn ns_per_op(&self) -> Option<u64> {
        if self.intervals == 0 {
            None
        } else {
            Some(self.net_time_ns / self.intervals)
        }
    }
}

/// Shared accumulator for application progress intervals
///
/// Cheap to share behind an `Arc`; `begin` is lock-free and `end` holds the
/// accumulator lock only for a compare-and-add.
pub struct ProgressTracker {
    sampler: Arc<dyn SamplingSource>,
    active: AtomicBool,
    generation: AtomicU64,
    accumulator: Mutex<ProgressSnapshot>,
}

impl std::fmt::Debug for ProgressTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressTracker")
            .field("active", &self.active.load(Ordering::Relaxed))
            .field("generation", &self.generation.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl ProgressTracker {
    /// Create an inactive tracker reading injected delay from `sampler`
    pub fn new(sampler: Arc<dyn SamplingSource>) -> Self {
        Self {
            sampler,
            active: AtomicBool::new(false),
            generation: AtomicU64::new(0),
            accumulator: Mutex::new(ProgressSnapshot::default()),
        }
    }

    /// Enable or disable measurement; disabling also invalidates open tokens
    pub fn set_active(&self, active: bool) {
        self.active.store(active, Ordering::SeqCst);
        if !active {
            self.reset();
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Current generation counter
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Mark the start of a progress interval
    pub fn begin(&self) -> ProgressToken {
        if !self.active.load(Ordering::Acquire) {
            return ProgressToken::inert();
        }
        ProgressToken {
            start: Some(TokenStart {
                at: Instant::now(),
                injected_delay: self.sampler.injected_delay_total(),
                generation: self.generation.load(Ordering::Acquire),
            }),
        }
    }

    /// Mark the end of the interval started by `token`
    pub fn end(&self, token: ProgressToken) {
        let Some(start) = token.start else {
            return;
        };
        let elapsed = u64::try_from(start.at.elapsed().as_nanos()).unwrap_or(u64::MAX);
        let injected = self
            .sampler
            .injected_delay_total()
            .saturating_sub(start.injected_delay);
        let net = elapsed.saturating_sub(injected);

        let Ok(mut acc) = self.accumulator.lock() else {
            return;
        };
        if self.generation.load(Ordering::Acquire) != start.generation {
            return;
        }
        acc.intervals += 1;
        acc.net_time_ns = acc.net_time_ns.saturating_add(net);
    }

    /// Run `f` as one progress interval
    pub fn measure<F, R>(&self, f: F) -> R
    where
        F: FnOnce() -> R,
    {
        let token = self.begin();
        let result = f();
        self.end(token);
        result
    }

    /// Clear the accumulator and start a new generation
    pub fn reset(&self) {
        if let Ok(mut acc) = self.accumulator.lock() {
            *acc = ProgressSnapshot::default();
            self.generation.fetch_add(1, Ordering::AcqRel);
        }
    }

    /// Read and clear the accumulator in one step, starting a new generation
    pub fn take_snapshot(&self) -> ProgressSnapshot {
        match self.accumulator.lock() {
            Ok(mut acc) => {
                let snapshot = std::mem::take(&mut *acc);
                self.generation.fetch_add(1, Ordering::AcqRel);
                snapshot
            }
            Err(_) => ProgressSnapshot::default(),
        }
    }
}

/// RAII progress interval: ends when dropped
///
/// # Example
/// ```
/// use causalprof::progress::{ProgressGuard, ProgressTracker};
/// use causalprof::sampler::ScriptedSampler;
/// use std::sync::Arc;
///
/// let tracker = ProgressTracker::new(Arc::new(ScriptedSampler::new(Vec::<u64>::new())));
/// tracker.set_active(true);
/// {
///     let _guard = ProgressGuard::new(&tracker);
///     // one unit of work
/// }
/// assert_eq!(tracker.take_snapshot().intervals, 1);
/// ```
pub struct ProgressGuard<'a> {
    tracker: &'a ProgressTracker,
    token: ProgressToken,
}

impl<'a> ProgressGuard<'a> {
    pub fn new(tracker: &'a ProgressTracker) -> Self {
        Self {
            token: tracker.begin(),
            tracker,
        }
    }
}

impl Drop for ProgressGuard<'_> {
    fn drop(&mut self) {
        self.tracker.end(self.token);
    }
}
