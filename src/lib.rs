//! causalprof - Causal profiler for Rust programs
//!
//! A causal profiler answers "how much faster would the program get if this
//! line were faster?" It cannot speed code up, so it slows everything else
//! down: while an experiment targets a location, every sample that lands
//! elsewhere is charged a delay. Progress points report throughput, and the
//! offline analyzer turns the recorded experiments into per-location speedup
//! estimates.
//!
//! The online half is [`profiler::CausalProfiler`], driven by a
//! [`sampler::SamplingSource`]; the offline half is [`aggregate::Aggregator`].

pub mod aggregate;
pub mod cli;
pub mod config;
pub mod coordinator;
pub mod pacing;
pub mod profiler;
pub mod progress;
pub mod record;
pub mod report;
pub mod sampler;
pub mod selector;
pub mod symbolize;
