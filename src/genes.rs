//! Gene-level aggregation of insertion sites.
//!
//! Each gene only counts insertions within the first `fraction` of its
//! length, read in the gene's own orientation: `[start, start + w)` on the
//! forward strand, `[end - w, end)` on the reverse strand, with
//! `w = floor(len * fraction)`. Overlapping genes each receive the full count
//! of a shared site. Normalisation is counts-per-million over all mapped reads
//! of the sample, including reads outside every gene.
use std::path::Path;

use log::{info, warn};

use crate::errors::{Error, Result, SampleWarning};
use crate::features::{FeatureTable, GeneFeature};
use crate::sites::{SiteCounts, Strand};

/// Fail unless `fraction` is within `[0, 1]`.
pub fn validate_fraction(fraction: f64) -> Result<()> {
    if !(0.0..=1.0).contains(&fraction) {
        return Err(Error::config("disruption fraction", format!("{fraction} is outside [0.0, 1.0]")));
    }
    Ok(())
}

/// Resolution of the disruption fraction; finer digits are rounded away.
const FRACTION_SCALE: u128 = 1_000_000_000;

/// Half-open reference interval of `feature` in which insertions count as disruptive.
///
/// The width is computed in integer parts-per-billion so that fractions such as
/// `0.29` give `29` bases of a 100 bp gene rather than the `28` a plain float
/// floor would produce.
pub fn disruption_window(feature: &GeneFeature, fraction: f64) -> (u64, u64) {
    let scaled = (fraction.clamp(0.0, 1.0) * FRACTION_SCALE as f64).round() as u128;
    let w = (feature.len() as u128 * scaled / FRACTION_SCALE) as u64;
    let w = w.min(feature.len());
    match feature.strand {
        Strand::Forward => (feature.start, feature.start + w),
        Strand::Reverse => (feature.end - w, feature.end),
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct GeneCount {
    pub gene: String,
    pub contig: String,
    pub raw: u64,
    /// Counts per million mapped reads.
    pub cpm: f64,
}

/// One sample's per-gene counts, in feature-table order.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct GeneCounts {
    pub genes: Vec<GeneCount>,
    pub total_mapped: u64,
    pub warning: Option<SampleWarning>,
}

impl GeneCounts {
    pub fn get(&self, contig: &str, gene: &str) -> Option<&GeneCount> {
        self.genes.iter().find(|g| g.gene == gene && g.contig == contig)
    }

    pub fn is_low_quality(&self) -> bool { self.warning.is_some() }
}

#[inline]
fn cpm(raw: u64, total: u64) -> f64 {
    if total == 0 { 0.0 } else { raw as f64 * 1_000_000.0 / total as f64 }
}

/// Count disruptive insertions per gene for one sample.
///
/// A sample with no mapped reads yields all-zero counts flagged with
/// [`SampleWarning::NoMappedReads`].
pub fn map_genes(features: &FeatureTable, sites: &SiteCounts, fraction: f64) -> Result<GeneCounts> {
    validate_fraction(fraction)?;
    let by_contig = sites.by_contig();
    let total = sites.total_reads();

    let genes = features
        .iter()
        .map(|f| {
            let (lo, hi) = disruption_window(f, fraction);
            let raw = match by_contig.get(f.contig.as_str()) {
                Some(positions) if hi > lo => positions.range(lo..hi).map(|(_, n)| n).sum::<u64>(),
                _ => 0,
            };
            GeneCount { gene: f.name.clone(), contig: f.contig.clone(), raw, cpm: cpm(raw, total) }
        })
        .collect::<Vec<_>>();

    let warning = (total == 0).then_some(SampleWarning::NoMappedReads);
    if warning.is_some() {
        warn!("genes: no mapped reads; all normalized counts are zero");
    } else {
        let in_genes: u64 = genes.iter().map(|g| g.raw).sum();
        info!("genes: genes={} mapped={} counted_in_windows={} fraction={}", genes.len(), total, in_genes, fraction);
    }
    Ok(GeneCounts { genes, total_mapped: total, warning })
}

/// Write one sample's gene counts as TSV (`gene, contig, raw, cpm`).
pub fn write_gene_counts<P: AsRef<Path>>(path: P, counts: &GeneCounts) -> Result<()> {
    let p = path.as_ref();
    let mut w = csv::WriterBuilder::new().delimiter(b'\t').from_path(p).map_err(|e| Error::io(p, e))?;
    w.write_record(["gene", "contig", "raw", "cpm"]).map_err(|e| Error::io(p, e))?;
    for g in &counts.genes {
        w.write_record([g.gene.clone(), g.contig.clone(), g.raw.to_string(), format!("{:.3}", g.cpm)])
            .map_err(|e| Error::io(p, e))?;
    }
    w.flush().map_err(|e| Error::io(p, e))
}
