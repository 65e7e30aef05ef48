//! Integration tests for offline aggregation and reporting (Sprint 53)
//!
//! # Test Coverage
//!
//! - ✅ Profile files with annotations aggregate into the text report
//! - ✅ Corrupt files abort with the offending line number
//! - ✅ JSON report mirrors the text report
//! - ✅ Merged means stay within the merged values (property)

use causalprof::aggregate::{AggregateError, Aggregator, MergedSample};
use causalprof::config::{AggregateConfig, BaselinePolicy};
use causalprof::record::{ExperimentRecord, RecordError};
use causalprof::symbolize::NoSymbols;
use proptest::prelude::*;
use std::io::Write;
use std::path::Path;
use tempfile::NamedTempFile;

const PROFILE: &str = "\
# worker::step src/worker.rs:40
# speedup 0%
# count 120
# 1000ns/op
0x401000 0 1000 0 2000
# speedup 20%
0x401000 20 900 400 2000
# speedup 0%
0x401000 0 1000 0 2000

0x401000 40 760 400 2000
0x401000 20 940 400 2000
0x402000 0 500 0 2000
0x402000 10 495 20 2000
";

fn write_profile(text: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(text.as_bytes()).unwrap();
    file
}

fn aggregate(path: &Path, min_trials: usize) -> Result<causalprof::report::Report, AggregateError> {
    let config = AggregateConfig {
        min_trials,
        baseline: BaselinePolicy::PerLocation,
    };
    Aggregator::new(config, &NoSymbols).aggregate_file(path)
}

#[test]
fn test_profile_file_to_text_report() {
    let file = write_profile(PROFILE);
    let report = aggregate(file.path(), 5).unwrap();

    assert_eq!(
        report.to_string(),
        "0x401000\n  0%\t1000ns\n 20%\t920ns\t-8.00%\t4.00%\n 40%\t760ns\t-24.00%\t8.00%\n\n"
    );
}

#[test]
fn test_lower_threshold_keeps_sparse_location() {
    let file = write_profile(PROFILE);
    let report = aggregate(file.path(), 2).unwrap();

    assert_eq!(report.locations.len(), 2);
    let sparse = &report.locations[1];
    assert_eq!(sparse.location, 0x402000);
    assert!((sparse.trials[0].percent_change - -1.0).abs() < 1e-9);
}

#[test]
fn test_corrupt_line_aborts_whole_file() {
    let file = write_profile("0x10 0 100 0 1000\n# note\n0x10 20 ninety 0 1000\n");
    match aggregate(file.path(), 1) {
        Err(AggregateError::Record(RecordError::InvalidField { line, field, .. })) => {
            assert_eq!(line, 3);
            assert_eq!(field, "ns/op");
        }
        other => panic!("expected corrupt record, got {:?}", other.map(|r| r.to_string())),
    }
}

#[test]
fn test_missing_profile_is_open_error() {
    let err = aggregate(Path::new("/nonexistent/causal.prof"), 1).unwrap_err();
    assert!(matches!(err, AggregateError::Open { .. }));
    assert!(err.to_string().contains("/nonexistent/causal.prof"));
}

#[test]
fn test_zero_baseline_location_dropped() {
    let file = write_profile("0x10 0 0 0 100\n0x10 50 10 5 100\n");
    assert!(aggregate(file.path(), 1).unwrap().is_empty());
}

#[test]
fn test_json_report_structure() {
    let file = write_profile(PROFILE);
    let report = aggregate(file.path(), 5).unwrap();
    let json: serde_json::Value = serde_json::from_str(&report.to_json().unwrap()).unwrap();

    let locations = json["locations"].as_array().unwrap();
    assert_eq!(locations.len(), 1);
    assert_eq!(locations[0]["location"], 0x401000);
    assert!(locations[0]["source"].is_null());
    assert_eq!(locations[0]["baseline"]["ns_per_op"], 1000.0);
    assert_eq!(locations[0]["trials"][0]["trials_merged"], 2);
    assert_eq!(locations[0]["trials"][1]["ns_per_op"], 760);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    #[test]
    fn prop_merged_mean_within_bounds(values in prop::collection::vec(1i64..1_000_000, 1..20)) {
        let records: Vec<ExperimentRecord> = values
            .iter()
            .map(|&ns| ExperimentRecord {
                location: 0x10,
                delay_percent: 30,
                ns_per_op: ns,
                delay_samples: 1,
                total_samples: 10,
            })
            .collect();

        let mut merged = MergedSample::from(&records[0]);
        for record in &records[1..] {
            merged.merge(&MergedSample::from(record));
        }

        let min = *values.iter().min().unwrap() as f64;
        let max = *values.iter().max().unwrap() as f64;
        prop_assert!(merged.ns_per_op >= min - 1e-6 && merged.ns_per_op <= max + 1e-6);
        prop_assert_eq!(merged.trials_merged, values.len() as u64);
        prop_assert_eq!(merged.total_samples, 10 * values.len() as i64);
    }

    #[test]
    fn prop_written_record_parses_back(
        location in 1u64..u64::MAX,
        delay_percent in 0u32..100,
        ns_per_op in any::<i64>(),
        delay_samples in 0i64..1_000_000,
        total_samples in 0i64..1_000_000,
    ) {
        let record = ExperimentRecord { location, delay_percent, ns_per_op, delay_samples, total_samples };
        let parsed: ExperimentRecord = record.to_string().parse().unwrap();
        prop_assert_eq!(parsed, record);
    }
}
