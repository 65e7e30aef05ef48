//! Experiment log format
//!
//! The coordinator appends one block per recorded experiment; the offline
//! analyzer reads them back. Lines starting with `#` are annotations for
//! humans and are skipped by the parser. Every other non-empty line carries
//! exactly five whitespace-separated fields:
//!
//! ```text
//! # process_request src/server.rs:118
//! # speedup 30%
//! # count 97
//! # 10412ns/op
//! 0x55d0c3a1f2b4 30 10412 112 1043
//! ```
//!
//! Fields: location (hex with `0x`, or decimal), delay percent, net
//! nanoseconds per progress interval, samples on the target, all samples.
//!
//! One annotation is machine-read: `# load-bias 0x...`, written once before
//! the first block, carries the main executable's load offset so that
//! runtime addresses can be resolved against the binary later.

use crate::symbolize::Symbolizer;
use std::fmt;
use std::io::{self, BufRead, Write};
use std::str::FromStr;
use thiserror::Error;
use tracing::trace;

/// Errors raised while parsing an experiment log
#[derive(Error, Debug)]
pub enum RecordError {
    #[error("corrupt causal profile at line {line}: had {found} fields, expected 5")]
    FieldCount { line: usize, found: usize },

    #[error("corrupt causal profile at line {line}: invalid {field} {value:?}")]
    InvalidField {
        line: usize,
        field: &'static str,
        value: String,
    },

    #[error("failed to read causal profile: {0}")]
    Io(#[from] io::Error),
}

/// One persisted experiment result
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct ExperimentRecord {
    /// Sampled program counter the experiment targeted
    pub location: u64,
    /// Virtual speedup percentage; 0 is the baseline
    pub delay_percent: u32,
    /// Mean net nanoseconds per progress interval
    pub ns_per_op: i64,
    /// Samples that landed on the target during the window
    pub delay_samples: i64,
    /// All samples during the window
    pub total_samples: i64,
}

impl ExperimentRecord {
    /// Whether this is a zero-delay (null) trial
    pub fn is_baseline(&self) -> bool {
        self.delay_percent == 0
    }

    /// Parse one data line; `line_no` is only used for error reporting
    pub fn parse_line(line: &str, line_no: usize) -> Result<Self, RecordError> {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() != 5 {
            return Err(RecordError::FieldCount {
                line: line_no,
                found: fields.len(),
            });
        }

        let invalid = |field: &'static str, value: &str| RecordError::InvalidField {
            line: line_no,
            field,
            value: value.to_string(),
        };

        let location = parse_address(fields[0]).ok_or_else(|| invalid("location", fields[0]))?;
        let delay_percent = fields[1]
            .parse::<u32>()
            .map_err(|_| invalid("delay percent", fields[1]))?;
        let ns_per_op = fields[2]
            .parse::<i64>()
            .map_err(|_| invalid("ns/op", fields[2]))?;
        let delay_samples = fields[3]
            .parse::<i64>()
            .map_err(|_| invalid("delay sample count", fields[3]))?;
        let total_samples = fields[4]
            .parse::<i64>()
            .map_err(|_| invalid("total sample count", fields[4]))?;

        Ok(Self {
            location,
            delay_percent,
            ns_per_op,
            delay_samples,
            total_samples,
        })
    }

    /// Parse a whole log, failing on the first corrupt line
    ///
    /// # Example
    /// ```
    /// use causalprof::record::ExperimentRecord;
    ///
    /// let log = "# speedup 0%\n0x10 0 100 0 1000\n\n0x10 30 70 300 1000\n";
    /// let records = ExperimentRecord::parse_log(log.as_bytes()).unwrap();
    /// assert_eq!(records.len(), 2);
    /// assert_eq!(records[1].delay_percent, 30);
    /// ```
    pub fn parse_log<R: BufRead>(reader: R) -> Result<Vec<Self>, RecordError> {
        Ok(Profile::parse(reader)?.records)
    }
}

/// Contents of one experiment log
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Profile {
    /// Load offset of the profiled executable, if the log recorded one
    pub load_bias: Option<u64>,
    pub records: Vec<ExperimentRecord>,
}

impl Profile {
    /// Parse a log, failing on the first corrupt line
    pub fn parse<R: BufRead>(reader: R) -> Result<Self, RecordError> {
        let mut profile = Self::default();
        for (index, line) in reader.lines().enumerate() {
            let line = line?;
            let trimmed = line.trim();
            if let Some(annotation) = trimmed.strip_prefix('#') {
                if let Some(value) = annotation.trim().strip_prefix(LOAD_BIAS_TAG) {
                    let value = value.trim();
                    let bias = parse_address(value).ok_or_else(|| RecordError::InvalidField {
                        line: index + 1,
                        field: "load bias",
                        value: value.to_string(),
                    })?;
                    profile.load_bias = Some(bias);
                }
                continue;
            }
            if trimmed.is_empty() {
                continue;
            }
            profile
                .records
                .push(ExperimentRecord::parse_line(trimmed, index + 1)?);
        }
        trace!("parsed {} experiment records", profile.records.len());
        Ok(profile)
    }
}

const LOAD_BIAS_TAG: &str = "load-bias ";

impl fmt::Display for ExperimentRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:#x} {} {} {} {}",
            self.location, self.delay_percent, self.ns_per_op, self.delay_samples, self.total_samples
        )
    }
}

impl FromStr for ExperimentRecord {
    type Err = RecordError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse_line(s, 1)
    }
}

/// Parse an address written as `0x` hex or plain decimal
pub fn parse_address(field: &str) -> Option<u64> {
    match field.strip_prefix("0x").or_else(|| field.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16).ok(),
        None => field.parse().ok(),
    }
}

/// Appends experiment blocks to a sink
pub struct Recorder {
    sink: Box<dyn Write + Send>,
    symbolizer: Box<dyn Symbolizer + Send>,
    load_bias: Option<u64>,
    started: bool,
}

impl Recorder {
    pub fn new(sink: Box<dyn Write + Send>, symbolizer: Box<dyn Symbolizer + Send>) -> Self {
        Self {
            sink,
            symbolizer,
            load_bias: None,
            started: false,
        }
    }

    /// Announce the executable's load offset ahead of the first block
    pub fn with_load_bias(mut self, bias: Option<u64>) -> Self {
        self.load_bias = bias;
        self
    }

    /// Write the annotation lines and the data line for one experiment
    ///
    /// `intervals` is the number of progress intervals behind `ns_per_op`.
    pub fn record(&mut self, record: &ExperimentRecord, intervals: u64) -> io::Result<()> {
        if !self.started {
            if let Some(bias) = self.load_bias {
                writeln!(self.sink, "# {}{:#x}", LOAD_BIAS_TAG, bias)?;
            }
            self.started = true;
        }
        match self.symbolizer.resolve(record.location) {
            Some(source) => writeln!(
                self.sink,
                "# {} {}",
                source.function.as_deref().unwrap_or("?"),
                source
            )?,
            None => writeln!(self.sink, "# {:#x}", record.location)?,
        }
        writeln!(self.sink, "# speedup {}%", record.delay_percent)?;
        writeln!(self.sink, "# count {}", intervals)?;
        writeln!(self.sink, "# {}ns/op", record.ns_per_op)?;
        writeln!(self.sink, "{}", record)?;
        self.sink.flush()
    }
}
