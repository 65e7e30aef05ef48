//! CLI argument parsing for causalprof

use crate::config::BaselinePolicy;
use crate::record::parse_address;
use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Output format for reports
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text format (default)
    Text,
    /// JSON format for machine parsing
    Json,
}

#[derive(Parser, Debug)]
#[command(name = "causalprof")]
#[command(version)]
#[command(about = "Causal profiler: estimate the impact of speeding up each call site", long_about = None)]
pub struct Cli {
    /// Enable debug tracing output to stderr
    #[arg(long, global = true)]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Aggregate a causal profile log into per-location speedup estimates
    Report(ReportArgs),
    /// Profile a built-in workload and write a causal profile log (Linux)
    Demo(DemoArgs),
}

#[derive(Args, Debug)]
pub struct ReportArgs {
    /// Causal profile log written during profiling
    pub profile: PathBuf,

    /// Profiled binary, for file:line resolution via DWARF
    pub binary: Option<PathBuf>,

    /// Output format
    #[arg(long = "format", value_enum, default_value = "text")]
    pub format: OutputFormat,

    /// Minimum records a location needs to be reported (overrides config)
    #[arg(long = "min-trials", value_name = "N")]
    pub min_trials: Option<usize>,

    /// Baseline policy (overrides config)
    #[arg(long = "baseline", value_enum)]
    pub baseline: Option<BaselinePolicy>,

    /// Load offset of a PIE binary, subtracted before DWARF lookup
    /// (defaults to the `# load-bias` recorded in the profile)
    #[arg(long = "load-bias", value_name = "ADDR", value_parser = parse_bias)]
    pub load_bias: Option<u64>,

    /// TOML file with aggregation settings
    #[arg(long = "config", value_name = "FILE")]
    pub config: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct DemoArgs {
    /// Where to write the causal profile log
    #[arg(short, long, default_value = "causal.prof")]
    pub output: PathBuf,

    /// How long to profile, in seconds
    #[arg(long, default_value = "10")]
    pub seconds: u64,

    /// Worker threads running the workload
    #[arg(long, default_value = "4")]
    pub workers: usize,

    /// TOML file with profiler settings
    #[arg(long = "config", value_name = "FILE")]
    pub config: Option<PathBuf>,
}

fn parse_bias(value: &str) -> Result<u64, String> {
    parse_address(value).ok_or_else(|| format!("invalid address: {}", value))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses_report() {
        let cli = Cli::parse_from(["causalprof", "report", "causal.prof", "./server"]);
        let Command::Report(args) = cli.command else {
            panic!("expected report subcommand");
        };
        assert_eq!(args.profile, PathBuf::from("causal.prof"));
        assert_eq!(args.binary, Some(PathBuf::from("./server")));
        assert_eq!(args.format, OutputFormat::Text);
        assert!(args.min_trials.is_none());
        assert!(!cli.debug);
    }

    #[test]
    fn test_cli_report_overrides() {
        let cli = Cli::parse_from([
            "causalprof",
            "--debug",
            "report",
            "p.prof",
            "--min-trials",
            "20",
            "--baseline",
            "pooled",
            "--load-bias",
            "0x555555554000",
            "--format",
            "json",
        ]);
        assert!(cli.debug);
        let Command::Report(args) = cli.command else {
            panic!("expected report subcommand");
        };
        assert_eq!(args.min_trials, Some(20));
        assert_eq!(args.baseline, Some(BaselinePolicy::Pooled));
        assert_eq!(args.load_bias, Some(0x555555554000));
        assert_eq!(args.format, OutputFormat::Json);
        assert!(args.binary.is_none());
    }

    #[test]
    fn test_cli_rejects_bad_bias() {
        let result = Cli::try_parse_from(["causalprof", "report", "p.prof", "--load-bias", "zz"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_cli_demo_defaults() {
        let cli = Cli::parse_from(["causalprof", "demo"]);
        let Command::Demo(args) = cli.command else {
            panic!("expected demo subcommand");
        };
        assert_eq!(args.output, PathBuf::from("causal.prof"));
        assert_eq!(args.seconds, 10);
        assert_eq!(args.workers, 4);
    }

    #[test]
    fn test_cli_requires_subcommand() {
        assert!(Cli::try_parse_from(["causalprof"]).is_err());
    }
}
