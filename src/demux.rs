//! Barcode demultiplexing of a pooled read file.
//!
//! One streaming pass: the leading `barcode_length` bases of every read are
//! classified by a [`BarcodeMatcher`] and the untouched record is appended to
//! its sample's output stream. All sample streams are opened before the pass
//! starts and finished after it ends.
use std::fs;
use std::path::Path;

use log::{info, warn};

use crate::detect::{BarcodeMatch, BarcodeMatcher};
use crate::errors::{check_malformed_rate, Error, Result, Stage};
use crate::sample::SampleRegistry;
use crate::seqio::{self, FastqWriter};

/// Read accounting for one demultiplexing run.
///
/// `assigned() + ambiguous + unassigned + malformed == total` always holds.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DemuxStats {
    pub total: usize,
    /// Reads written per sample, in registry order.
    pub per_sample: Vec<usize>,
    /// Assigned reads that needed mismatch correction (included in `per_sample`).
    pub corrected: usize,
    pub ambiguous: usize,
    pub unassigned: usize,
    pub malformed: usize,
}

impl DemuxStats {
    fn new(n_samples: usize) -> Self {
        Self { per_sample: vec![0; n_samples], ..Self::default() }
    }

    pub fn assigned(&self) -> usize { self.per_sample.iter().sum() }

    pub fn is_conserved(&self) -> bool {
        self.assigned() + self.ambiguous + self.unassigned + self.malformed == self.total
    }
}

/// Split `pooled` into one FASTQ per sample at each sample's `demultiplexed_path`.
///
/// `max_mismatches` is the substitution tolerance used when no barcode matches
/// exactly; pass `0` for exact matching only.
pub fn run<P: AsRef<Path>>(pooled: P, registry: &SampleRegistry, max_mismatches: usize) -> Result<DemuxStats> {
    let pooled = pooled.as_ref();
    let bc_len = registry.barcode_length();
    if bc_len == 0 {
        return Err(Error::config("demultiplexing", "barcode length is 0; reads are already demultiplexed"));
    }

    let barcodes: Vec<&str> = registry.iter().map(|s| s.barcode.as_str()).collect();
    let mut matcher = BarcodeMatcher::new(&barcodes, max_mismatches);
    let mut writers = registry
        .iter()
        .map(|s| FastqWriter::create(&s.demultiplexed_path))
        .collect::<Result<Vec<_>>>()?;
    let mut stats = DemuxStats::new(registry.len());

    info!("demux: {} | samples={} | barcode_length={} | max_mismatches={}", pooled.display(), registry.len(), bc_len, max_mismatches);

    let counts = seqio::for_each_read(pooled, Stage::Demux, |r| {
        let qual = match r.qual {
            Some(q) if r.seq.len() >= bc_len => q,
            _ => {
                stats.malformed += 1;
                return Ok(());
            }
        };
        match matcher.classify(&r.seq[..bc_len]) {
            BarcodeMatch::Exact(i) => {
                writers[i].write(r.id, r.seq, qual)?;
                stats.per_sample[i] += 1;
            }
            BarcodeMatch::Corrected(i) => {
                writers[i].write(r.id, r.seq, qual)?;
                stats.per_sample[i] += 1;
                stats.corrected += 1;
            }
            BarcodeMatch::Ambiguous => stats.ambiguous += 1,
            BarcodeMatch::Unassigned => stats.unassigned += 1,
        }
        Ok(())
    })?;
    stats.total = counts.total();
    stats.malformed += counts.malformed;

    for w in writers {
        w.finish()?;
    }

    if stats.malformed > 0 {
        warn!("demux: skipped {} malformed read(s) (damaged record, missing quality or shorter than the barcode)", stats.malformed);
    }
    check_malformed_rate(Stage::Demux, pooled, stats.malformed, stats.total)?;

    info!(
        "demux: total={} assigned={} (corrected={}) ambiguous={} unassigned={} malformed={}",
        stats.total, stats.assigned(), stats.corrected, stats.ambiguous, stats.unassigned, stats.malformed
    );
    for (s, n) in registry.iter().zip(&stats.per_sample) {
        if *n == 0 {
            warn!("demux: no reads assigned to sample \"{}\" (barcode {})", s.name, s.barcode);
        }
    }
    Ok(stats)
}

/// Bring in reads that were demultiplexed upstream: `{dir}/{sample}.fastq.gz`
/// is copied to each sample's `demultiplexed_path` and its records counted.
pub fn import_demultiplexed<P: AsRef<Path>>(dir: P, registry: &SampleRegistry) -> Result<DemuxStats> {
    let dir = dir.as_ref();
    let mut stats = DemuxStats::new(registry.len());
    for (i, s) in registry.iter().enumerate() {
        let src = dir.join(format!("{}.fastq.gz", s.name));
        if !src.is_file() {
            return Err(Error::config(
                format!("sample \"{}\"", s.name),
                format!("expected reads file {} not found", src.display()),
            ));
        }
        fs::copy(&src, &s.demultiplexed_path).map_err(|e| Error::io(&src, e))?;
        let counts = seqio::for_each_read(&s.demultiplexed_path, Stage::Demux, |_| Ok(()))?;
        check_malformed_rate(Stage::Demux, &src, counts.malformed, counts.total())?;
        stats.per_sample[i] = counts.records;
        stats.malformed += counts.malformed;
        stats.total += counts.total();
        info!("import: {} -> {} ({} reads)", src.display(), s.demultiplexed_path.display(), counts.records);
    }
    Ok(stats)
}

/// Write per-sample and unassigned read counts as TSV.
pub fn write_stats<P: AsRef<Path>>(path: P, registry: &SampleRegistry, stats: &DemuxStats) -> Result<()> {
    let p = path.as_ref();
    let mut w = csv::WriterBuilder::new().delimiter(b'\t').from_path(p).map_err(|e| Error::io(p, e))?;
    let mut rows: Vec<[String; 3]> = vec![["category".into(), "barcode".into(), "reads".into()]];
    for (s, n) in registry.iter().zip(&stats.per_sample) {
        rows.push([s.name.clone(), s.barcode.clone(), n.to_string()]);
    }
    rows.push(["corrected".into(), String::new(), stats.corrected.to_string()]);
    rows.push(["ambiguous".into(), String::new(), stats.ambiguous.to_string()]);
    rows.push(["unassigned".into(), String::new(), stats.unassigned.to_string()]);
    rows.push(["malformed".into(), String::new(), stats.malformed.to_string()]);
    rows.push(["total".into(), String::new(), stats.total.to_string()]);
    for row in &rows {
        w.write_record(row).map_err(|e| Error::io(p, e))?;
    }
    w.flush().map_err(|e| Error::io(p, e))
}
