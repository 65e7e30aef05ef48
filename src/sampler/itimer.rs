//! `ITIMER_PROF` sampling source (Linux)
//!
//! The kernel delivers `SIGPROF` to whichever thread is consuming CPU every
//! sampling period. The handler reads the interrupted program counter from
//! the signal `ucontext` and:
//!
//! ```text
//! armed, no target yet   → first non-zero PC becomes the candidate
//! target set, PC == tgt  → count a targeted sample
//! target set, PC != tgt  → sleep for the installed delay, add it to the total
//! ```
//!
//! Signal handlers cannot carry a context pointer, so the handler state lives
//! in one process-wide [`SignalState`]. Only one `ItimerSampler` may own it at
//! a time; a second `start` fails with [`SamplerError::Busy`].

use super::{SampleStats, SamplerError, SamplingSource};
use nix::sys::signal::{sigaction, SaFlags, SigAction, SigHandler, SigSet, Signal};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;
use std::thread;
use std::time::Duration;
use tracing::{debug, warn};

/// Poll interval while waiting for the handler to pick a candidate
const CANDIDATE_POLL: Duration = Duration::from_millis(1);

struct SignalState {
    owned: AtomicBool,
    want_candidate: AtomicBool,
    candidate: AtomicU64,
    target: AtomicU64,
    delay_ns: AtomicU64,
    injected_total: AtomicU64,
    delay_samples: AtomicU64,
    total_samples: AtomicU64,
}

static STATE: SignalState = SignalState {
    owned: AtomicBool::new(false),
    want_candidate: AtomicBool::new(false),
    candidate: AtomicU64::new(0),
    target: AtomicU64::new(0),
    delay_ns: AtomicU64::new(0),
    injected_total: AtomicU64::new(0),
    delay_samples: AtomicU64::new(0),
    total_samples: AtomicU64::new(0),
};

/// Sampling source backed by the process CPU-time interval timer
///
/// # Example
///
/// ```no_run
/// use causalprof::sampler::{ItimerSampler, SamplingSource};
///
/// let sampler = ItimerSampler::new();
/// sampler.start(1000).unwrap();
/// let candidate = sampler.next_candidate();
/// sampler.stop_sampling();
/// # let _ = candidate;
/// ```
#[derive(Debug, Default)]
pub struct ItimerSampler {
    running: AtomicBool,
    previous: Mutex<Option<SigAction>>,
}

impl ItimerSampler {
    pub fn new() -> Self {
        Self::default()
    }

    fn release(&self) {
        disarm_timer();
        if let Ok(mut previous) = self.previous.lock() {
            if let Some(mut action) = previous.take() {
                // A SIGPROF still pending after disarm must not terminate the process
                if action.handler() == SigHandler::SigDfl {
                    action = SigAction::new(SigHandler::SigIgn, SaFlags::empty(), SigSet::empty());
                }
                // SAFETY: restoring the disposition that was active before start
                if let Err(e) = unsafe { sigaction(Signal::SIGPROF, &action) } {
                    warn!("failed to restore SIGPROF handler: {}", e);
                }
            }
        }
        STATE.target.store(0, Ordering::SeqCst);
        STATE.delay_ns.store(0, Ordering::SeqCst);
        STATE.want_candidate.store(false, Ordering::SeqCst);
        STATE.owned.store(false, Ordering::SeqCst);
    }
}

impl SamplingSource for ItimerSampler {
    fn start(&self, sampling_hz: u32) -> Result<(), SamplerError> {
        if sampling_hz == 0 || sampling_hz > 1_000_000 {
            return Err(SamplerError::Install(format!(
                "unsupported sampling rate {} Hz",
                sampling_hz
            )));
        }
        if STATE
            .owned
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(SamplerError::Busy("SIGPROF handler already owned".into()));
        }
        if timer_armed() {
            STATE.owned.store(false, Ordering::SeqCst);
            return Err(SamplerError::Busy("ITIMER_PROF already armed".into()));
        }

        STATE.want_candidate.store(false, Ordering::SeqCst);
        STATE.candidate.store(0, Ordering::SeqCst);
        STATE.target.store(0, Ordering::SeqCst);
        STATE.delay_ns.store(0, Ordering::SeqCst);
        STATE.delay_samples.store(0, Ordering::SeqCst);
        STATE.total_samples.store(0, Ordering::SeqCst);

        let action = SigAction::new(
            SigHandler::SigAction(on_sigprof),
            SaFlags::SA_RESTART | SaFlags::SA_SIGINFO,
            SigSet::empty(),
        );
        // SAFETY: the handler only touches atomics and async-signal-safe libc calls
        let previous = match unsafe { sigaction(Signal::SIGPROF, &action) } {
            Ok(previous) => previous,
            Err(e) => {
                STATE.owned.store(false, Ordering::SeqCst);
                return Err(SamplerError::Install(e.to_string()));
            }
        };
        if let Ok(mut slot) = self.previous.lock() {
            *slot = Some(previous);
        }

        let period = timer_period(sampling_hz);
        let timer = libc::itimerval {
            it_interval: period,
            it_value: period,
        };
        // SAFETY: valid itimerval, old value not requested
        let rc = unsafe { libc::setitimer(libc::ITIMER_PROF, &timer, std::ptr::null_mut()) };
        if rc != 0 {
            let err = std::io::Error::last_os_error();
            self.release();
            return Err(SamplerError::Install(format!("setitimer: {}", err)));
        }

        self.running.store(true, Ordering::SeqCst);
        debug!("ITIMER_PROF armed at {} Hz", sampling_hz);
        Ok(())
    }

    fn next_candidate(&self) -> Option<u64> {
        // The handler state belongs to whichever sampler is running
        if !self.running.load(Ordering::SeqCst) {
            return None;
        }
        STATE.target.store(0, Ordering::SeqCst);
        STATE.candidate.store(0, Ordering::SeqCst);
        STATE.want_candidate.store(true, Ordering::SeqCst);

        while self.running.load(Ordering::SeqCst) {
            let candidate = STATE.candidate.load(Ordering::SeqCst);
            if candidate != 0 {
                STATE.delay_samples.store(0, Ordering::SeqCst);
                STATE.total_samples.store(0, Ordering::SeqCst);
                STATE.target.store(candidate, Ordering::SeqCst);
                return Some(candidate);
            }
            thread::sleep(CANDIDATE_POLL);
        }
        None
    }

    fn install_delay(&self, ns_per_sample: u64) {
        if !self.running.load(Ordering::SeqCst) {
            return;
        }
        STATE.delay_ns.store(ns_per_sample, Ordering::SeqCst);
    }

    fn injected_delay_total(&self) -> u64 {
        STATE.injected_total.load(Ordering::SeqCst)
    }

    fn sample_stats(&self) -> SampleStats {
        SampleStats {
            delay_samples: STATE.delay_samples.load(Ordering::SeqCst),
            total_samples: STATE.total_samples.load(Ordering::SeqCst),
        }
    }

    fn stop_sampling(&self) {
        if self.running.swap(false, Ordering::SeqCst) {
            self.release();
            debug!("ITIMER_PROF disarmed");
        }
    }
}

impl Drop for ItimerSampler {
    fn drop(&mut self) {
        self.stop_sampling();
    }
}

/// One sampling period, with microseconds kept below one second
fn timer_period(sampling_hz: u32) -> libc::timeval {
    let period_us = 1_000_000 / u64::from(sampling_hz.max(1));
    libc::timeval {
        tv_sec: (period_us / 1_000_000) as libc::time_t,
        tv_usec: (period_us % 1_000_000) as libc::suseconds_t,
    }
}

fn timer_armed() -> bool {
    let mut current = libc::itimerval {
        it_interval: libc::timeval { tv_sec: 0, tv_usec: 0 },
        it_value: libc::timeval { tv_sec: 0, tv_usec: 0 },
    };
    // SAFETY: `current` is a valid out-pointer
    let rc = unsafe { libc::getitimer(libc::ITIMER_PROF, &mut current) };
    rc == 0
        && (current.it_value.tv_sec != 0
            || current.it_value.tv_usec != 0
            || current.it_interval.tv_sec != 0
            || current.it_interval.tv_usec != 0)
}

fn disarm_timer() {
    let zero = libc::itimerval {
        it_interval: libc::timeval { tv_sec: 0, tv_usec: 0 },
        it_value: libc::timeval { tv_sec: 0, tv_usec: 0 },
    };
    // SAFETY: valid itimerval, old value not requested
    unsafe {
        libc::setitimer(libc::ITIMER_PROF, &zero, std::ptr::null_mut());
    }
}

extern "C" fn on_sigprof(_signal: libc::c_int, _info: *mut libc::siginfo_t, context: *mut libc::c_void) {
    // SAFETY: the kernel passes a valid ucontext_t for SA_SIGINFO handlers
    let pc = unsafe { interrupted_pc(context) };

    if STATE.want_candidate.load(Ordering::Acquire) {
        if pc != 0
            && STATE
                .candidate
                .compare_exchange(0, pc, Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
        {
            STATE.want_candidate.store(false, Ordering::Release);
        }
        return;
    }

    let target = STATE.target.load(Ordering::Acquire);
    if target == 0 {
        return;
    }
    STATE.total_samples.fetch_add(1, Ordering::Relaxed);
    if pc == target {
        STATE.delay_samples.fetch_add(1, Ordering::Relaxed);
        return;
    }

    let delay = STATE.delay_ns.load(Ordering::Acquire);
    if delay > 0 {
        let pause = libc::timespec {
            tv_sec: (delay / 1_000_000_000) as libc::time_t,
            tv_nsec: (delay % 1_000_000_000) as libc::c_long,
        };
        // SAFETY: nanosleep is async-signal-safe; an early wake-up only shortens the pause
        unsafe {
            libc::nanosleep(&pause, std::ptr::null_mut());
        }
        STATE.injected_total.fetch_add(delay, Ordering::Relaxed);
    }
}

#[cfg(all(target_arch = "x86_64", target_env = "gnu"))]
unsafe fn interrupted_pc(context: *mut libc::c_void) -> u64 {
    if context.is_null() {
        return 0;
    }
    let uc = context as *const libc::ucontext_t;
    // SAFETY: caller guarantees `context` points at a ucontext_t
    unsafe { (*uc).uc_mcontext.gregs[libc::REG_RIP as usize] as u64 }
}

#[cfg(all(target_arch = "aarch64", target_env = "gnu"))]
unsafe fn interrupted_pc(context: *mut libc::c_void) -> u64 {
    if context.is_null() {
        return 0;
    }
    let uc = context as *const libc::ucontext_t;
    // SAFETY: caller guarantees `context` points at a ucontext_t
    unsafe { (*uc).uc_mcontext.pc }
}

#[cfg(not(any(
    all(target_arch = "x86_64", target_env = "gnu"),
    all(target_arch = "aarch64", target_env = "gnu")
)))]
unsafe fn interrupted_pc(_context: *mut libc::c_void) -> u64 {
    0
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_second_sampler_is_busy() {
        let first = ItimerSampler::new();
        first.start(1000).unwrap();

        let second = ItimerSampler::new();
        assert!(matches!(second.start(1000), Err(SamplerError::Busy(_))));

        first.stop_sampling();
        assert!(second.start(1000).is_ok());
        second.stop_sampling();
    }

    #[test]
    #[serial]
    fn test_stop_is_idempotent() {
        let sampler = ItimerSampler::new();
        sampler.stop_sampling();
        sampler.start(1000).unwrap();
        sampler.stop_sampling();
        sampler.stop_sampling();
        assert_eq!(sampler.next_candidate(), None);
    }

    #[test]
    fn test_zero_rate_rejected() {
        let sampler = ItimerSampler::new();
        assert!(matches!(sampler.start(0), Err(SamplerError::Install(_))));
    }

    #[test]
    #[serial]
    fn test_busy_loop_yields_candidate() {
        let sampler = std::sync::Arc::new(ItimerSampler::new());
        sampler.start(1000).unwrap();

        let waiter = {
            let sampler = sampler.clone();
            thread::spawn(move || sampler.next_candidate())
        };

        let mut acc = 0u64;
        let deadline = std::time::Instant::now() + Duration::from_millis(500);
        while std::time::Instant::now() < deadline {
            acc = acc.wrapping_mul(6364136223846793005).wrapping_add(1);
        }
        std::hint::black_box(acc);

        sampler.stop_sampling();
        let candidate = waiter.join().unwrap();

        if cfg!(all(
            any(target_arch = "x86_64", target_arch = "aarch64"),
            target_env = "gnu"
        )) {
            assert!(candidate.is_some());
        }
    }

    #[test]
    fn test_timer_period_splits_seconds() {
        let one_hz = timer_period(1);
        assert_eq!((one_hz.tv_sec, one_hz.tv_usec), (1, 0));
        let khz = timer_period(1000);
        assert_eq!((khz.tv_sec, khz.tv_usec), (0, 1000));
        let max = timer_period(1_000_000);
        assert_eq!((max.tv_sec, max.tv_usec), (0, 1));
    }

    #[test]
    #[serial]
    fn test_one_hz_arms_timer() {
        let sampler = ItimerSampler::new();
        assert!(sampler.start(1).is_ok());
        assert!(timer_armed());
        sampler.stop_sampling();
        assert!(!timer_armed());
    }

    #[test]
    #[serial]
    fn test_idle_sampler_leaves_running_state_alone() {
        let owner = ItimerSampler::new();
        owner.start(1000).unwrap();
        owner.install_delay(5_000);

        let idle = ItimerSampler::new();
        idle.install_delay(0);
        assert_eq!(idle.next_candidate(), None);

        assert_eq!(STATE.delay_ns.load(Ordering::SeqCst), 5_000);
        assert!(!STATE.want_candidate.load(Ordering::SeqCst));
        owner.stop_sampling();
    }

    /// Burn CPU so SIGPROF fires on this thread until `until` holds or time runs out
    fn spin(until: impl Fn() -> bool, limit: Duration) {
        let deadline = std::time::Instant::now() + limit;
        let mut acc = 0u64;
        while !until() && std::time::Instant::now() < deadline {
            acc = acc.wrapping_mul(6364136223846793005).wrapping_add(1);
        }
        std::hint::black_box(acc);
    }

    #[cfg(all(any(target_arch = "x86_64", target_arch = "aarch64"), target_env = "gnu"))]
    #[test]
    #[serial]
    fn test_off_target_samples_are_delayed() {
        let sampler = std::sync::Arc::new(ItimerSampler::new());
        sampler.start(1000).unwrap();

        let waiter = {
            let sampler = sampler.clone();
            thread::spawn(move || sampler.next_candidate())
        };
        spin(|| waiter.is_finished(), Duration::from_secs(5));
        let candidate = waiter.join().unwrap();
        assert!(candidate.is_some());

        let before = sampler.injected_delay_total();
        sampler.install_delay(100_000);
        spin(|| false, Duration::from_millis(200));
        let stats = sampler.sample_stats();
        let injected = sampler.injected_delay_total() - before;
        assert!(stats.total_samples > 0);
        assert!(stats.delay_samples <= stats.total_samples);
        assert!(injected > 0);
        assert_eq!(injected % 100_000, 0);

        sampler.install_delay(0);
        // Let a handler that already read the old delay finish its pause
        thread::sleep(Duration::from_millis(20));
        let settled = sampler.injected_delay_total();
        spin(|| false, Duration::from_millis(100));
        assert_eq!(sampler.injected_delay_total(), settled);
        assert!(sampler.sample_stats().total_samples > stats.total_samples);

        sampler.stop_sampling();
    }
}
