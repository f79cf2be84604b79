//! Barcode / adapter trimming of one sample's reads.
//!
//! Output is plain four-line FASTQ, ready for the aligner. Records without
//! qualities (FASTA input) get a constant `I` quality string.
use std::path::Path;

use log::{info, warn};

use crate::errors::{check_malformed_rate, Result, Stage};
use crate::seqio::{self, FastqWriter};

/// What to cut from every read.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TrimOptions {
    /// Leading bases removed (the barcode); `0` when barcodes were removed upstream.
    pub barcode_length: usize,
    /// Trailing fixed-length adapter bases removed from the 3' end.
    pub adapter_length: usize,
}

impl TrimOptions {
    pub fn new(barcode_length: usize) -> Self {
        Self { barcode_length, adapter_length: 0 }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TrimStats {
    pub total: usize,
    pub written: usize,
    /// Reads with nothing left after trimming; dropped, not fatal.
    pub too_short: usize,
    /// Damaged input records that were skipped.
    pub malformed: usize,
}

/// The retained `[start, end)` window of a read of length `len`, or `None` if nothing remains.
#[inline]
pub fn trim_window(len: usize, opts: &TrimOptions) -> Option<(usize, usize)> {
    let start = opts.barcode_length;
    let end = len.checked_sub(opts.adapter_length)?;
    (end > start).then_some((start, end))
}

/// Trim every read of `input` into `output`.
pub fn trim<P: AsRef<Path>, Q: AsRef<Path>>(input: P, output: Q, sample: &str, opts: &TrimOptions) -> Result<TrimStats> {
    let input = input.as_ref();
    let mut out = FastqWriter::create(output.as_ref())?;
    let mut stats = TrimStats::default();
    let mut fallback_qual: Vec<u8> = Vec::new();

    let counts = seqio::for_each_read(input, Stage::Trim, |r| {
        let Some((start, end)) = trim_window(r.seq.len(), opts) else {
            stats.too_short += 1;
            return Ok(());
        };
        let qual = match r.qual {
            Some(q) => q,
            None => {
                fallback_qual.resize(r.seq.len(), b'I');
                &fallback_qual[..r.seq.len()]
            }
        };
        out.write(r.id, &r.seq[start..end], &qual[start..end])?;
        stats.written += 1;
        Ok(())
    })?;
    stats.total = counts.total();
    stats.malformed = counts.malformed;
    out.finish()?;

    if stats.malformed > 0 {
        warn!("trim: sample \"{}\": skipped {} malformed record(s)", sample, stats.malformed);
    }
    check_malformed_rate(Stage::Trim, input, stats.malformed, stats.total)?;

    if stats.too_short > 0 {
        warn!("trim: sample \"{}\": dropped {} read(s) with no bases left after trimming", sample, stats.too_short);
    }
    info!(
        "trim: sample \"{}\" | barcode={} adapter={} | reads={} written={}",
        sample, opts.barcode_length, opts.adapter_length, stats.total, stats.written
    );
    Ok(stats)
}
