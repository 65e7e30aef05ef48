//! Public control surface for causal profiling
//!
//! A [`CausalProfiler`] owns the sampling source, the progress tracker and,
//! while a session is running, the coordinator thread. Applications hold it
//! (or the [`ProgressTracker`] it hands out) and bracket units of work with
//! `begin_progress` / `end_progress`.
//!
//! # Example
//!
//! ```
//! use causalprof::config::ProfilerConfig;
//! use causalprof::profiler::CausalProfiler;
//! use causalprof::sampler::ScriptedSampler;
//! use std::sync::Arc;
//!
//! let sampler = Arc::new(ScriptedSampler::new(Vec::<u64>::new()).hold_open());
//! let profiler = CausalProfiler::new(sampler, ProfilerConfig::default()).unwrap();
//!
//! profiler.start(Box::new(std::io::sink())).unwrap();
//! let token = profiler.begin_progress();
//! // ... one request ...
//! profiler.end_progress(token);
//! profiler.stop();
//! profiler.stop(); // no-op
//! ```

use crate::config::{ConfigError, ProfilerConfig};
use crate::coordinator::{Coordinator, RunSummary};
use crate::progress::{ProgressToken, ProgressTracker};
use crate::record::Recorder;
use crate::sampler::{SamplerError, SamplingSource};
use crate::symbolize::{executable_load_bias, ProcessSymbolizer, Symbolizer};
use crossbeam::channel::{bounded, Sender};
use std::io::Write;
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use thiserror::Error;
use tracing::{info, warn};

/// Errors reported synchronously by [`CausalProfiler::start`]
#[derive(Error, Debug)]
pub enum ProfilerError {
    #[error("causal profiling already in use")]
    AlreadyActive,

    #[error(transparent)]
    Sampler(#[from] SamplerError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("failed to spawn coordinator thread: {0}")]
    Spawn(#[source] std::io::Error),
}

struct Session {
    stop: Sender<()>,
    handle: JoinHandle<RunSummary>,
}

/// Causal profiling session manager
pub struct CausalProfiler {
    config: ProfilerConfig,
    sampler: Arc<dyn SamplingSource>,
    progress: Arc<ProgressTracker>,
    session: Mutex<Option<Session>>,
}

impl CausalProfiler {
    /// Create an idle profiler; rejects invalid configuration
    pub fn new(
        sampler: Arc<dyn SamplingSource>,
        config: ProfilerConfig,
    ) -> Result<Self, ProfilerError> {
        config.validate()?;
        Ok(Self {
            progress: Arc::new(ProgressTracker::new(sampler.clone())),
            config,
            sampler,
            session: Mutex::new(None),
        })
    }

    /// Start profiling, annotating records with in-process symbols
    pub fn start(&self, sink: Box<dyn Write + Send>) -> Result<(), ProfilerError> {
        self.start_with_symbolizer(sink, Box::new(ProcessSymbolizer))
    }

    /// Start profiling with an explicit symbolizer for record annotations
    ///
    /// Fails with [`ProfilerError::AlreadyActive`] if a session is running, or
    /// with [`ProfilerError::Sampler`] if the sampling source is busy.
    pub fn start_with_symbolizer(
        &self,
        sink: Box<dyn Write + Send>,
        symbolizer: Box<dyn Symbolizer + Send>,
    ) -> Result<(), ProfilerError> {
        let mut session = self.lock_session();
        if session.is_some() {
            return Err(ProfilerError::AlreadyActive);
        }

        self.sampler.start(self.config.sampling_hz)?;
        self.progress.set_active(true);

        let recorder = Recorder::new(sink, symbolizer).with_load_bias(executable_load_bias());
        let coordinator = match Coordinator::new(
            self.config.clone(),
            self.sampler.clone(),
            self.progress.clone(),
            recorder,
        ) {
            Ok(coordinator) => coordinator,
            Err(e) => {
                self.progress.set_active(false);
                self.sampler.stop_sampling();
                return Err(e.into());
            }
        };
        let (stop, stop_rx) = bounded::<()>(1);
        let spawned = thread::Builder::new()
            .name("causalprof-coordinator".into())
            .spawn(move || coordinator.run(stop_rx));

        match spawned {
            Ok(handle) => {
                *session = Some(Session { stop, handle });
                info!("causal profiling started at {} Hz", self.config.sampling_hz);
                Ok(())
            }
            Err(e) => {
                self.progress.set_active(false);
                self.sampler.stop_sampling();
                Err(ProfilerError::Spawn(e))
            }
        }
    }

    /// Stop profiling, abandoning any experiment in flight
    ///
    /// Blocks until the coordinator thread exits. Returns its summary, or
    /// `None` if no session was running.
    pub fn stop(&self) -> Option<RunSummary> {
        let mut slot = self.lock_session();
        let session = slot.take()?;

        self.progress.set_active(false);
        self.sampler.stop_sampling();
        drop(session.stop);

        match session.handle.join() {
            Ok(summary) => {
                info!(
                    "causal profiling stopped: {} experiments recorded",
                    summary.recorded
                );
                Some(summary)
            }
            Err(_) => {
                warn!("coordinator thread panicked");
                None
            }
        }
    }

    /// Whether a session is running
    pub fn is_active(&self) -> bool {
        self.lock_session().is_some()
    }

    /// Mark the start of a progress interval
    pub fn begin_progress(&self) -> ProgressToken {
        self.progress.begin()
    }

    /// Mark the end of the interval started by `token`
    pub fn end_progress(&self, token: ProgressToken) {
        self.progress.end(token);
    }

    /// Shared tracker for application threads
    pub fn progress(&self) -> Arc<ProgressTracker> {
        self.progress.clone()
    }

    pub fn config(&self) -> &ProfilerConfig {
        &self.config
    }

    fn lock_session(&self) -> std::sync::MutexGuard<'_, Option<Session>> {
        self.session
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Drop for CausalProfiler {
    fn drop(&mut self) {
        self.stop();
    }
}
