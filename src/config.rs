//! Configuration for the causal profiler and the offline analyzer
//!
//! Both halves carry the tuning knobs of the experiment protocol. Defaults
//! reproduce the classic causal profiling parameters (1 kHz sampling, 10%
//! delay steps, five permutation cycles per location).

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// Errors raised while loading or validating configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Online experiment parameters
///
/// # Example
/// ```
/// use causalprof::config::ProfilerConfig;
///
/// let config = ProfilerConfig::default();
/// assert_eq!(config.sampling_hz, 1000);
/// assert_eq!(config.delay_per_percent_ns(), 10_000);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProfilerConfig {
    /// Sampling interrupt frequency in Hz
    pub sampling_hz: u32,

    /// Step between tested delay levels, in percent (10 → 10%, 20%, ... 90%)
    pub percentile_resolution: u32,

    /// Progress intervals each measurement window aims to observe
    pub progress_per_experiment: u64,

    /// Full permutation cycles run per location before it is retired
    pub max_trials_per_experiment: u32,

    /// Starting measurement window, in sampling periods
    pub initial_window_multiple: u64,

    /// Lower clamp for the adaptive window multiple
    pub min_window_multiple: u64,

    /// Upper clamp for the adaptive window multiple
    pub max_window_multiple: u64,

    /// Cool-down lasts `window_multiple / cooldown_divisor` sampling periods
    pub cooldown_divisor: u64,

    /// Seed for the experiment selector; `None` seeds from entropy
    pub seed: Option<u64>,
}

impl Default for ProfilerConfig {
    fn default() -> Self {
        Self {
            sampling_hz: 1000,
            percentile_resolution: 10,
            progress_per_experiment: 100,
            max_trials_per_experiment: 5,
            initial_window_multiple: 200,
            min_window_multiple: 1,
            max_window_multiple: 100_000,
            cooldown_divisor: 5,
            seed: None,
        }
    }
}

impl ProfilerConfig {
    /// Load from a TOML file; missing keys keep their defaults
    pub fn from_toml_file(path: &Path) -> Result<Self, ConfigError> {
        let text = read_config(path)?;
        let config: Self = toml::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject parameter combinations the experiment protocol cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sampling_hz == 0 {
            return Err(ConfigError::Invalid("sampling_hz must be > 0".into()));
        }
        if self.percentile_resolution == 0
            || self.percentile_resolution >= 100
            || 100 % self.percentile_resolution != 0
        {
            return Err(ConfigError::Invalid(format!(
                "percentile_resolution must divide 100, got {}",
                self.percentile_resolution
            )));
        }
        if self.cooldown_divisor == 0 {
            return Err(ConfigError::Invalid("cooldown_divisor must be > 0".into()));
        }
        if self.min_window_multiple == 0 || self.min_window_multiple > self.max_window_multiple {
            return Err(ConfigError::Invalid(format!(
                "window multiple bounds invalid: [{}, {}]",
                self.min_window_multiple, self.max_window_multiple
            )));
        }
        Ok(())
    }

    /// Length of one sampling period in nanoseconds
    pub fn sampling_period_ns(&self) -> u64 {
        1_000_000_000 / u64::from(self.sampling_hz.max(1))
    }

    /// Delay per sample that corresponds to one percent of virtual speedup
    ///
    /// A 100% level cancels one full sampling period per off-target sample.
    pub fn delay_per_percent_ns(&self) -> u64 {
        self.sampling_period_ns() / 100
    }
}

/// How the analyzer picks the zero-delay reference for each location
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum BaselinePolicy {
    /// Each location is compared against its own merged null trials
    #[default]
    PerLocation,
    /// Null trials of all surviving locations are merged into one baseline
    Pooled,
}

/// Offline aggregation parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregateConfig {
    /// Minimum raw records (baseline plus trials) a location needs to be reported
    pub min_trials: usize,

    /// Baseline selection policy
    pub baseline: BaselinePolicy,
}

impl Default for AggregateConfig {
    fn default() -> Self {
        Self {
            min_trials: 5,
            baseline: BaselinePolicy::PerLocation,
        }
    }
}

impl AggregateConfig {
    /// Load from a TOML file; missing keys keep their defaults
    pub fn from_toml_file(path: &Path) -> Result<Self, ConfigError> {
        let text = read_config(path)?;
        Ok(toml::from_str(&text)?)
    }
}

fn read_config(path: &Path) -> Result<String, ConfigError> {
    std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.display().to_string(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_derived_values() {
        let config = ProfilerConfig::default();
        assert_eq!(config.sampling_period_ns(), 1_000_000);
        assert_eq!(config.delay_per_percent_ns(), 10_000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_resolution_must_divide_100() {
        let config = ProfilerConfig {
            percentile_resolution: 30,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_zero_hz_rejected() {
        let config = ProfilerConfig {
            sampling_hz: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "sampling_hz = 500\nseed = 7").unwrap();

        let config = ProfilerConfig::from_toml_file(file.path()).unwrap();
        assert_eq!(config.sampling_hz, 500);
        assert_eq!(config.seed, Some(7));
        assert_eq!(config.percentile_resolution, 10);
        assert_eq!(config.delay_per_percent_ns(), 20_000);
    }

    #[test]
    fn test_aggregate_config_baseline_policy() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "min_trials = 20\nbaseline = \"pooled\"").unwrap();

        let config = AggregateConfig::from_toml_file(file.path()).unwrap();
        assert_eq!(config.min_trials, 20);
        assert_eq!(config.baseline, BaselinePolicy::Pooled);
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let err = AggregateConfig::from_toml_file(Path::new("/nonexistent/causal.toml"));
        assert!(matches!(err, Err(ConfigError::Io { .. })));
    }
}
