use anyhow::{Context, Result};
use causalprof::aggregate::{load_profile, Aggregator};
use causalprof::cli::{Cli, Command, DemoArgs, OutputFormat, ReportArgs};
use causalprof::config::AggregateConfig;
use causalprof::symbolize::{DwarfSymbolizer, NoSymbols, Symbolizer};
use clap::Parser;
use tracing_subscriber::EnvFilter;

/// Initialize tracing subscriber for debug output
fn init_tracing(debug: bool) {
    if debug {
        tracing_subscriber::fmt()
            .with_env_filter(
                EnvFilter::from_default_env().add_directive(tracing::Level::TRACE.into()),
            )
            .with_writer(std::io::stderr)
            .init();
    }
}

fn run_report(args: ReportArgs) -> Result<()> {
    let mut config = match &args.config {
        Some(path) => AggregateConfig::from_toml_file(path)?,
        None => AggregateConfig::default(),
    };
    if let Some(min_trials) = args.min_trials {
        config.min_trials = min_trials;
    }
    if let Some(baseline) = args.baseline {
        config.baseline = baseline;
    }

    let profile = load_profile(&args.profile)
        .with_context(|| format!("failed to aggregate {}", args.profile.display()))?;

    let symbolizer: Box<dyn Symbolizer> = match &args.binary {
        Some(binary) => {
            let dwarf = DwarfSymbolizer::load(binary)
                .with_context(|| format!("failed to load debug info from {}", binary.display()))?;
            // An explicit --load-bias wins over the one recorded in the log
            let bias = args.load_bias.or(profile.load_bias).unwrap_or(0);
            tracing::debug!("resolving against {} with load bias {:#x}", binary.display(), bias);
            Box::new(dwarf.with_load_bias(bias))
        }
        None => Box::new(NoSymbols),
    };

    let report = Aggregator::new(config, symbolizer.as_ref()).aggregate(&profile.records);

    match args.format {
        OutputFormat::Text => print!("{}", report),
        OutputFormat::Json => println!("{}", report.to_json()?),
    }
    Ok(())
}

#[cfg(target_os = "linux")]
fn run_demo(args: DemoArgs) -> Result<()> {
    use causalprof::config::ProfilerConfig;
    use causalprof::profiler::CausalProfiler;
    use causalprof::sampler::ItimerSampler;
    use std::fs::File;
    use std::io::BufWriter;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    let config = match &args.config {
        Some(path) => ProfilerConfig::from_toml_file(path)?,
        None => ProfilerConfig::default(),
    };
    let sink = File::create(&args.output)
        .with_context(|| format!("failed to create {}", args.output.display()))?;

    let profiler = CausalProfiler::new(Arc::new(ItimerSampler::new()), config)?;
    profiler.start(Box::new(BufWriter::new(sink)))?;

    let done = Arc::new(AtomicBool::new(false));
    let workers: Vec<_> = (0..args.workers.max(1))
        .map(|id| {
            let progress = profiler.progress();
            let done = done.clone();
            thread::spawn(move || {
                let mut state = id as u64 + 1;
                while !done.load(Ordering::Relaxed) {
                    state = progress.measure(|| demo_request(state));
                }
            })
        })
        .collect();

    thread::sleep(Duration::from_secs(args.seconds));
    done.store(true, Ordering::Relaxed);
    let summary = profiler.stop();
    for worker in workers {
        let _ = worker.join();
    }

    if let Some(summary) = summary {
        eprintln!(
            "causalprof: {} experiments recorded, {} discarded, written to {}",
            summary.recorded,
            summary.discarded,
            args.output.display()
        );
    }
    Ok(())
}

#[cfg(not(target_os = "linux"))]
fn run_demo(_args: DemoArgs) -> Result<()> {
    anyhow::bail!("the demo workload needs the Linux interval-timer sampler")
}

/// One unit of demo work: a cheap parse step and an expensive hash step
#[cfg(target_os = "linux")]
#[inline(never)]
fn demo_request(seed: u64) -> u64 {
    let parsed = demo_parse(seed);
    demo_hash(parsed)
}

#[cfg(target_os = "linux")]
#[inline(never)]
fn demo_parse(seed: u64) -> u64 {
    (0..2_000u64).fold(seed, |acc, i| acc.rotate_left(3) ^ i)
}

#[cfg(target_os = "linux")]
#[inline(never)]
fn demo_hash(seed: u64) -> u64 {
    (0..20_000u64).fold(seed, |acc, i| {
        acc.wrapping_mul(0x100_0000_01b3).wrapping_add(i)
    })
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing if --debug flag is set
    init_tracing(cli.debug);

    match cli.command {
        Command::Report(args) => run_report(args),
        Command::Demo(args) => run_demo(args),
    }
}
