#![no_main]

use causalprof::aggregate::Aggregator;
use causalprof::config::AggregateConfig;
use causalprof::record::ExperimentRecord;
use causalprof::symbolize::NoSymbols;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // Arbitrary profile text must parse or fail cleanly, never panic
    if let Ok(records) = ExperimentRecord::parse_log(data) {
        let config = AggregateConfig {
            min_trials: 1,
            ..Default::default()
        };
        let report = Aggregator::new(config, &NoSymbols).aggregate(&records);
        let _ = report.to_string();
    }
});
