//! Error taxonomy for the pipeline.
//!
//! Fatal conditions are variants of [`Error`]. Conditions that only degrade a
//! single sample (no mapped reads, a failed aligner run) are reported as
//! [`SampleWarning`] values alongside that sample's results instead.

use std::fmt;
use std::path::Path;

pub type Result<T> = std::result::Result<T, Error>;

/// Stop a stage once this fraction of its records were malformed.
pub const MALFORMED_RATE_LIMIT: f64 = 0.1;

/// Below this many malformed records the rate limit is not applied.
pub const MALFORMED_MIN_COUNT: usize = 10;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("Configuration error in {context}: {reason}")]
    Configuration { context: String, reason: String },

    #[error("[{stage}] malformed record {record} in \"{file}\": {reason}")]
    InputFormat {
        stage: Stage,
        file: String,
        record: String,
        reason: String,
    },

    #[error("[{stage}] {malformed} of {total} records in \"{file}\" were malformed; refusing to continue")]
    MalformedRateExceeded {
        stage: Stage,
        file: String,
        malformed: usize,
        total: usize,
    },

    #[error("[align] {tool} failed for sample \"{sample}\": {reason}")]
    ExternalTool {
        tool: String,
        sample: String,
        reason: String,
    },

    #[error("Error reading or writing \"{file}\": {source}")]
    FileIo {
        file: String,
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

impl Error {
    pub fn config(context: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::Configuration { context: context.into(), reason: reason.into() }
    }

    pub fn io(file: impl AsRef<Path>, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        Error::FileIo { file: file.as_ref().display().to_string(), source: Box::new(source) }
    }
}

/// Pipeline stage a record-level error originated from.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Stage {
    Registry,
    Demux,
    Trim,
    Sites,
    Features,
    Genome,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Stage::Registry => "registry",
            Stage::Demux => "demux",
            Stage::Trim => "trim",
            Stage::Sites => "sites",
            Stage::Features => "features",
            Stage::Genome => "genome",
        };
        f.write_str(s)
    }
}

/// Escalate a per-record error count to a fatal error when it crosses the sanity threshold.
pub fn check_malformed_rate(stage: Stage, file: impl AsRef<Path>, malformed: usize, total: usize) -> Result<()> {
    if malformed >= MALFORMED_MIN_COUNT && total > 0 && (malformed as f64 / total as f64) > MALFORMED_RATE_LIMIT {
        return Err(Error::MalformedRateExceeded {
            stage,
            file: file.as_ref().display().to_string(),
            malformed,
            total,
        });
    }
    Ok(())
}

/// Non-fatal quality condition attached to one sample's results.
#[derive(Clone, Debug, PartialEq)]
pub enum SampleWarning {
    /// Demultiplexing assigned no reads to the sample.
    NoAssignedReads,
    /// The aligner produced no mapped reads; normalized counts are all zero.
    NoMappedReads,
    /// The aligner failed for this sample; its columns are zero-filled.
    AlignmentFailed(String),
}

impl fmt::Display for SampleWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SampleWarning::NoAssignedReads => f.write_str("no_assigned_reads"),
            SampleWarning::NoMappedReads => f.write_str("no_mapped_reads"),
            SampleWarning::AlignmentFailed(reason) => write!(f, "alignment_failed: {reason}"),
        }
    }
}
