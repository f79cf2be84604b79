//! Cross-sample gene table and per-sample summary.
//!
//! Columns follow registry order regardless of how the per-sample results
//! were collected. Rows are genes in first-seen order; a gene missing from a
//! sample's results is filled with `(0, 0.0)`.
use std::collections::{HashMap, HashSet};
use std::path::Path;

use log::{info, warn};

use crate::errors::{Error, Result, SampleWarning};
use crate::genes::GeneCounts;
use crate::sample::SampleRegistry;

#[derive(Clone, Debug, PartialEq)]
pub struct GeneRow {
    pub gene: String,
    pub contig: String,
    /// `(raw, cpm)` per sample, in column order.
    pub values: Vec<(u64, f64)>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct GeneTable {
    pub samples: Vec<String>,
    pub rows: Vec<GeneRow>,
}

impl GeneTable {
    /// Two numeric columns (raw, cpm) per sample.
    pub fn numeric_columns(&self) -> usize { 2 * self.samples.len() }

    pub fn row(&self, contig: &str, gene: &str) -> Option<&GeneRow> {
        self.rows.iter().find(|r| r.gene == gene && r.contig == contig)
    }

    pub fn column(&self, sample: &str) -> Option<usize> { self.samples.iter().position(|s| s == sample) }
}

/// Merge per-sample gene counts into one table with columns in registry order.
///
/// Samples with no entry in `results` keep zero-filled columns.
pub fn build(results: &HashMap<String, GeneCounts>, registry: &SampleRegistry) -> GeneTable {
    for name in results.keys() {
        if registry.get(name).is_none() {
            warn!("table: ignoring results for unknown sample \"{}\"", name);
        }
    }
    let samples: Vec<String> = registry.iter().map(|s| s.name.clone()).collect();
    let n = samples.len();

    let mut rows: Vec<GeneRow> = Vec::new();
    let mut row_of: HashMap<(String, String), usize> = HashMap::new();
    for (col, name) in samples.iter().enumerate() {
        let Some(counts) = results.get(name) else { continue };
        for g in &counts.genes {
            let key = (g.contig.clone(), g.gene.clone());
            let idx = *row_of.entry(key).or_insert_with(|| {
                rows.push(GeneRow { gene: g.gene.clone(), contig: g.contig.clone(), values: vec![(0, 0.0); n] });
                rows.len() - 1
            });
            rows[idx].values[col] = (g.raw, g.cpm);
        }
    }
    info!("table: genes={} samples={}", rows.len(), n);
    GeneTable { samples, rows }
}

/// Write the table as TSV: `gene, contig, {sample}_raw, {sample}_cpm, ...`.
pub fn write_table<P: AsRef<Path>>(path: P, table: &GeneTable) -> Result<()> {
    let p = path.as_ref();
    let mut w = csv::WriterBuilder::new().delimiter(b'\t').from_path(p).map_err(|e| Error::io(p, e))?;
    let mut header = vec!["gene".to_string(), "contig".to_string()];
    for s in &table.samples {
        header.push(format!("{s}_raw"));
        header.push(format!("{s}_cpm"));
    }
    w.write_record(&header).map_err(|e| Error::io(p, e))?;
    for row in &table.rows {
        let mut rec = Vec::with_capacity(2 + table.numeric_columns());
        rec.push(row.gene.clone());
        rec.push(row.contig.clone());
        for (raw, cpm) in &row.values {
            rec.push(raw.to_string());
            rec.push(format!("{cpm:.3}"));
        }
        w.write_record(&rec).map_err(|e| Error::io(p, e))?;
    }
    w.flush().map_err(|e| Error::io(p, e))
}

/// One sample's row in the run summary.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SampleSummary {
    pub name: String,
    pub barcode: String,
    pub demux_reads: usize,
    pub trimmed_reads: usize,
    pub too_short: usize,
    pub mapped_reads: u64,
    pub warnings: Vec<SampleWarning>,
}

impl SampleSummary {
    pub fn status(&self) -> String {
        if self.warnings.is_empty() {
            return "ok".to_string();
        }
        let mut seen = HashSet::new();
        self.warnings
            .iter()
            .map(|w| w.to_string())
            .filter(|w| seen.insert(w.clone()))
            .collect::<Vec<_>>()
            .join(";")
    }
}

pub const SUMMARY_COLUMNS: [&str; 7] =
    ["sample", "barcode", "demux_reads", "trimmed_reads", "too_short", "mapped_reads", "status"];

pub fn write_summary<P: AsRef<Path>>(path: P, rows: &[SampleSummary]) -> Result<()> {
    let p = path.as_ref();
    let mut w = csv::WriterBuilder::new().delimiter(b'\t').from_path(p).map_err(|e| Error::io(p, e))?;
    w.write_record(SUMMARY_COLUMNS).map_err(|e| Error::io(p, e))?;
    for r in rows {
        w.write_record([
            r.name.clone(),
            r.barcode.clone(),
            r.demux_reads.to_string(),
            r.trimmed_reads.to_string(),
            r.too_short.to_string(),
            r.mapped_reads.to_string(),
            r.status(),
        ])
        .map_err(|e| Error::io(p, e))?;
    }
    w.flush().map_err(|e| Error::io(p, e))
}

#[cfg(test)]
mod table_tests {
    use super::*;
    use crate::genes::GeneCount;
    use crate::layout::ExperimentLayout;
    use crate::sample::BarcodePolicy;

    fn registry(text: &str) -> SampleRegistry {
        let layout = ExperimentLayout::new("/tmp/out", "exp").unwrap();
        SampleRegistry::parse(text, "samples", &layout, &BarcodePolicy::default()).unwrap()
    }

    fn counts(rows: &[(&str, u64, f64)]) -> GeneCounts {
        GeneCounts {
            genes: rows.iter().map(|&(g, raw, cpm)| GeneCount { gene: g.into(), contig: "chr1".into(), raw, cpm }).collect(),
            total_mapped: rows.iter().map(|r| r.1).sum(),
            warning: None,
        }
    }

    #[test]
    fn columns_follow_registry_order_and_missing_cells_are_zero() {
        let reg = registry("zeta ACGT\nalpha TTTT\nmid GCGA\n");
        let mut results = HashMap::new();
        results.insert("alpha".to_string(), counts(&[("g1", 1, 10.0), ("g2", 2, 20.0)]));
        results.insert("zeta".to_string(), counts(&[("g2", 5, 50.0), ("g3", 6, 60.0)]));
        results.insert("mid".to_string(), counts(&[("g1", 7, 70.0)]));

        let t = build(&results, &reg);
        assert_eq!(t.samples, vec!["zeta", "alpha", "mid"]);
        assert_eq!(t.numeric_columns(), 6);
        assert_eq!(t.rows.len(), 3);
        let names: Vec<&str> = t.rows.iter().map(|r| r.gene.as_str()).collect();
        assert_eq!(names, vec!["g2", "g3", "g1"]);
        assert_eq!(t.row("chr1", "g1").unwrap().values, vec![(0, 0.0), (1, 10.0), (7, 70.0)]);
        assert_eq!(t.row("chr1", "g3").unwrap().values, vec![(6, 60.0), (0, 0.0), (0, 0.0)]);
    }

    #[test]
    fn failed_sample_keeps_zero_columns() {
        let reg = registry("A ACGT\nB TTTT\n");
        let mut results = HashMap::new();
        results.insert("A".to_string(), counts(&[("g1", 4, 1.0)]));
        results.insert("ghost".to_string(), counts(&[("g9", 4, 1.0)]));
        let t = build(&results, &reg);
        assert_eq!(t.samples.len(), 2);
        assert_eq!(t.rows.len(), 1);
        assert_eq!(t.rows[0].values[1], (0, 0.0));
    }

    #[test]
    fn writes_header_and_pairs() {
        let reg = registry("A ACGT\nB TTTT\n");
        let mut results = HashMap::new();
        results.insert("A".to_string(), counts(&[("g1", 3, 1500.0)]));
        results.insert("B".to_string(), counts(&[("g1", 0, 0.0)]));
        let tmp = tempfile::TempDir::new().unwrap();
        let p = tmp.path().join("genes.tsv");
        write_table(&p, &build(&results, &reg)).unwrap();
        let text = std::fs::read_to_string(&p).unwrap();
        assert_eq!(text, "gene\tcontig\tA_raw\tA_cpm\tB_raw\tB_cpm\ng1\tchr1\t3\t1500.000\t0\t0.000\n");
    }

    #[test]
    fn summary_status_lists_distinct_warnings() {
        let mut s = SampleSummary { name: "A".into(), ..SampleSummary::default() };
        assert_eq!(s.status(), "ok");
        s.warnings = vec![SampleWarning::NoAssignedReads, SampleWarning::NoMappedReads, SampleWarning::NoMappedReads];
        assert_eq!(s.status(), "no_assigned_reads;no_mapped_reads");
        let tmp = tempfile::TempDir::new().unwrap();
        let p = tmp.path().join("summary.tsv");
        write_summary(&p, &[s]).unwrap();
        let text = std::fs::read_to_string(&p).unwrap();
        assert!(text.starts_with("sample\tbarcode\tdemux_reads"));
        assert!(text.contains("A\t\t0\t0\t0\t0\tno_assigned_reads;no_mapped_reads"));
    }
}
