//! End-to-end experiment orchestration.
//!
//! Registry → demultiplex (or import) → index → per sample
//! (trim → align → sites → genes) → gene table.
//!
//! Samples are independent once demultiplexing is done. With `threads > 1`
//! they run on a rayon pool and the table is built only after every sample
//! has finished. A trimmed-read file lives only as long as its sample's
//! alignment step and is removed even when that step fails.
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Instant;

use log::{error, info, warn};
use rayon::prelude::*;
use rayon::ThreadPoolBuilder;
use tempfile::TempPath;

use crate::align::Aligner;
use crate::clean::{self, TrimOptions};
use crate::demux::{self, DemuxStats};
use crate::errors::{Error, Result, SampleWarning};
use crate::features::{self, FeatureTable};
use crate::genbank;
use crate::genes::{self, GeneCounts};
use crate::layout::{self, ExperimentLayout};
use crate::sample::{BarcodePolicy, Sample, SampleRegistry};
use crate::sites::{self, SiteCounts};
use crate::table::{self, GeneTable, SampleSummary};

/// Where the reads come from.
#[derive(Clone, Debug, PartialEq)]
pub enum ReadsInput {
    /// One pooled FASTQ(.gz) with in-line barcodes.
    Pooled(PathBuf),
    /// A directory of `{sample}.fastq.gz` files with barcodes already removed.
    Demultiplexed(PathBuf),
}

/// Where the reference genome comes from.
#[derive(Clone, Debug, PartialEq)]
pub enum GenomeInput {
    /// A GenBank file; sequence and feature table are extracted into `genome_lookup/`.
    GenBank(PathBuf),
    /// A FASTA sequence plus a ready-made feature table.
    Prepared { fasta: PathBuf, features: PathBuf },
}

impl GenomeInput {
    /// The file the genome sequence is read from.
    pub fn sequence_path(&self) -> &Path {
        match self {
            GenomeInput::GenBank(p) => p,
            GenomeInput::Prepared { fasta, .. } => fasta,
        }
    }

    /// The file the gene annotation is read from.
    pub fn annotation_path(&self) -> &Path {
        match self {
            GenomeInput::GenBank(p) => p,
            GenomeInput::Prepared { features, .. } => features,
        }
    }
}

/// Complete configuration of one run.
#[derive(Clone, Debug)]
pub struct ExperimentConfig {
    pub experiment: String,
    pub out_dir: PathBuf,
    pub samples: PathBuf,
    pub reads: ReadsInput,
    pub genome: GenomeInput,
    /// Fraction of each gene, from its start, in which insertions are counted.
    pub disruption: f64,
    pub barcodes: BarcodePolicy,
    /// Fixed-length 3' adapter removed by the trimmer.
    pub adapter_length: usize,
    /// Samples processed concurrently; `0` means all cores.
    pub threads: usize,
}

impl ExperimentConfig {
    pub fn new(experiment: impl Into<String>, samples: PathBuf, reads: ReadsInput, genome: GenomeInput) -> Self {
        let barcodes = match reads {
            ReadsInput::Pooled(_) => BarcodePolicy::default(),
            ReadsInput::Demultiplexed(_) => BarcodePolicy::pre_demultiplexed(),
        };
        Self {
            experiment: experiment.into(),
            out_dir: PathBuf::from("."),
            samples,
            reads,
            genome,
            disruption: 1.0,
            barcodes,
            adapter_length: 0,
            threads: 1,
        }
    }

    /// Reject anything that would fail later, before any sample is touched.
    pub fn validate(&self) -> Result<()> {
        genes::validate_fraction(self.disruption)?;
        ExperimentLayout::new(&self.out_dir, &self.experiment)?;
        let inputs = [
            ("sample list", self.samples.as_path()),
            ("genome sequence", self.genome.sequence_path()),
            ("feature table", self.genome.annotation_path()),
        ];
        for (what, p) in inputs {
            if !p.is_file() {
                return Err(Error::config(what, format!("{} is not a file", p.display())));
            }
        }
        match &self.reads {
            ReadsInput::Pooled(p) => {
                if !p.is_file() {
                    return Err(Error::config("reads", format!("{} is not a file", p.display())));
                }
                if self.barcodes.length == 0 {
                    return Err(Error::config("barcodes", "pooled reads need a barcode length greater than 0"));
                }
            }
            ReadsInput::Demultiplexed(d) => {
                if !d.is_dir() {
                    return Err(Error::config("reads", format!("{} is not a directory", d.display())));
                }
                if self.barcodes.length != 0 {
                    return Err(Error::config("barcodes", "pre-demultiplexed reads must use barcode length 0"));
                }
            }
        }
        Ok(())
    }

    pub fn trim_options(&self) -> TrimOptions {
        TrimOptions { barcode_length: self.barcodes.length, adapter_length: self.adapter_length }
    }
}

/// Everything a finished run produced.
#[derive(Debug)]
pub struct ExperimentReport {
    pub layout: ExperimentLayout,
    pub demux: DemuxStats,
    pub summaries: Vec<SampleSummary>,
    pub table: GeneTable,
}

impl ExperimentReport {
    pub fn failed_samples(&self) -> Vec<&str> {
        self.summaries
            .iter()
            .filter(|s| s.warnings.iter().any(|w| matches!(w, SampleWarning::AlignmentFailed(_))))
            .map(|s| s.name.as_str())
            .collect()
    }
}

/// Result of the per-sample stages.
#[derive(Debug)]
pub struct SampleOutcome {
    pub summary: SampleSummary,
    /// `None` when the aligner failed for this sample.
    pub counts: Option<GeneCounts>,
}

/// Shared, read-only inputs of the per-sample stages.
pub struct SampleContext<'a> {
    pub layout: &'a ExperimentLayout,
    pub features: &'a FeatureTable,
    pub aligner: &'a dyn Aligner,
    pub trim: TrimOptions,
    pub disruption: f64,
}

/// Trim, align, map sites and genes for one sample.
///
/// An aligner failure is returned as an outcome with
/// [`SampleWarning::AlignmentFailed`]; any other error is returned as is.
pub fn process_sample(sample: &Sample, demux_reads: usize, ctx: &SampleContext<'_>) -> Result<SampleOutcome> {
    let mut summary = SampleSummary {
        name: sample.name.clone(),
        barcode: sample.barcode.clone(),
        demux_reads,
        ..SampleSummary::default()
    };
    if demux_reads == 0 {
        summary.warnings.push(SampleWarning::NoAssignedReads);
    }

    let site_counts = if demux_reads == 0 {
        SiteCounts::default()
    } else {
        let report = ctx.layout.alignment_path(&sample.name);
        let trimmed = TempPath::from_path(&sample.trimmed_path);
        let trim_stats = clean::trim(&sample.demultiplexed_path, &trimmed, &sample.name, &ctx.trim)?;
        summary.trimmed_reads = trim_stats.written;
        summary.too_short = trim_stats.too_short;

        layout::remove_stale(&report)?;
        let aligned = ctx.aligner.align(&ctx.layout.index_prefix(), &trimmed, &report, &sample.name).and_then(|()| {
            if report.is_file() {
                Ok(())
            } else {
                Err(Error::ExternalTool {
                    tool: ctx.aligner.name().to_string(),
                    sample: sample.name.clone(),
                    reason: format!("no report written to {}", report.display()),
                })
            }
        });
        drop(trimmed);
        match aligned {
            Ok(()) => {}
            Err(Error::ExternalTool { tool, sample: name, reason }) => {
                error!("{} failed for sample \"{}\": {}; continuing with the remaining samples", tool, name, reason);
                summary.warnings.push(SampleWarning::AlignmentFailed(reason));
                return Ok(SampleOutcome { summary, counts: None });
            }
            Err(e) => return Err(e),
        }
        let s = sites::map_sites(&report)?;
        sites::write_sites(ctx.layout.sites_path(&sample.name), &s)?;
        s
    };

    let counts = genes::map_genes(ctx.features, &site_counts, ctx.disruption)?;
    genes::write_gene_counts(ctx.layout.sample_genes_path(&sample.name), &counts)?;
    summary.mapped_reads = counts.total_mapped;
    if let Some(w) = &counts.warning {
        warn!("sample \"{}\": {}", sample.name, w);
        summary.warnings.push(w.clone());
    }
    Ok(SampleOutcome { summary, counts: Some(counts) })
}

/// Run the whole experiment described by `cfg`.
pub fn run_experiment(cfg: &ExperimentConfig, aligner: &dyn Aligner) -> Result<ExperimentReport> {
    let started = Instant::now();
    cfg.validate()?;
    let layout = ExperimentLayout::new(&cfg.out_dir, &cfg.experiment)?;
    let registry = SampleRegistry::load(&cfg.samples, &layout, &cfg.barcodes)?;
    let (genbank_genome, feature_table) = match &cfg.genome {
        GenomeInput::GenBank(p) => {
            let g = genbank::load(p)?;
            let table = g.features.clone();
            (Some(g), table)
        }
        GenomeInput::Prepared { features: f, .. } => (None, features::load(f)?),
    };
    if feature_table.is_empty() {
        return Err(Error::config("feature table", format!("{} lists no genes", cfg.genome.annotation_path().display())));
    }
    layout.create()?;
    let genome_fasta = match genbank_genome {
        Some(g) => {
            g.write(layout.genome_fasta_path(), layout.genome_features_path())?;
            info!("genome: extracted {} contig(s) to {}", g.contigs.len(), layout.genome_fasta_path().display());
            layout.genome_fasta_path()
        }
        None => cfg.genome.sequence_path().to_path_buf(),
    };
    info!("experiment \"{}\" | samples={} | genes={} | output={}", layout.name, registry.len(), feature_table.len(), layout.root.display());

    let demux_stats = match &cfg.reads {
        ReadsInput::Pooled(p) => demux::run(p, &registry, cfg.barcodes.effective_mismatches())?,
        ReadsInput::Demultiplexed(d) => demux::import_demultiplexed(d, &registry)?,
    };
    demux::write_stats(layout.demux_stats_path(), &registry, &demux_stats)?;

    aligner.build_index(&genome_fasta, &layout.index_prefix())?;

    let ctx = SampleContext {
        layout: &layout,
        features: &feature_table,
        aligner,
        trim: cfg.trim_options(),
        disruption: cfg.disruption,
    };
    let jobs: Vec<(&Sample, usize)> = registry.iter().zip(demux_stats.per_sample.iter().copied()).collect();
    let threads = if cfg.threads == 0 { num_cpus::get().max(1) } else { cfg.threads };
    let outcomes: Vec<Result<SampleOutcome>> = if threads > 1 && jobs.len() > 1 {
        let pool = ThreadPoolBuilder::new()
            .num_threads(threads)
            .build()
            .map_err(|e| Error::config("threads", e.to_string()))?;
        pool.install(|| jobs.par_iter().map(|(s, n)| process_sample(s, *n, &ctx)).collect())
    } else {
        jobs.iter().map(|(s, n)| process_sample(s, *n, &ctx)).collect()
    };

    let mut summaries = Vec::with_capacity(outcomes.len());
    let mut results: HashMap<String, GeneCounts> = HashMap::new();
    for outcome in outcomes {
        let SampleOutcome { summary, counts } = outcome?;
        if let Some(c) = counts {
            results.insert(summary.name.clone(), c);
        }
        summaries.push(summary);
    }

    let gene_table = table::build(&results, &registry);
    table::write_table(layout.gene_table_path(), &gene_table)?;
    table::write_summary(layout.summary_path(), &summaries)?;

    let report = ExperimentReport { layout, demux: demux_stats, summaries, table: gene_table };
    let failed = report.failed_samples();
    if !failed.is_empty() {
        warn!("alignment failed for {} sample(s): {}", failed.len(), failed.join(", "));
    }
    info!(
        "done in {:.1}s | gene table: {}",
        started.elapsed().as_secs_f64(),
        report.layout.gene_table_path().display()
    );
    Ok(report)
}

#[cfg(test)]
mod pipeline_tests {
    use super::*;
    use tempfile::TempDir;

    fn touch(dir: &TempDir, name: &str) -> PathBuf {
        let p = dir.path().join(name);
        std::fs::write(&p, "x\n").unwrap();
        p
    }

    #[test]
    fn validate_rejects_bad_fraction_and_paths() {
        let tmp = TempDir::new().unwrap();
        let mut cfg = ExperimentConfig::new(
            "exp",
            touch(&tmp, "samples.txt"),
            ReadsInput::Pooled(touch(&tmp, "reads.fastq")),
            GenomeInput::Prepared { fasta: touch(&tmp, "genome.fna"), features: touch(&tmp, "genome.features.tsv") },
        );
        cfg.out_dir = tmp.path().to_path_buf();
        assert!(cfg.validate().is_ok());

        cfg.disruption = 1.2;
        assert!(matches!(cfg.validate(), Err(Error::Configuration { .. })));
        cfg.disruption = 0.5;

        cfg.barcodes.length = 0;
        assert!(cfg.validate().is_err());
        cfg.barcodes = BarcodePolicy::default();

        cfg.reads = ReadsInput::Demultiplexed(tmp.path().to_path_buf());
        assert!(cfg.validate().is_err(), "pre-demultiplexed reads need barcode length 0");
        cfg.barcodes = BarcodePolicy::pre_demultiplexed();
        assert!(cfg.validate().is_ok());

        cfg.genome = GenomeInput::Prepared { fasta: tmp.path().join("missing.fna"), features: tmp.path().join("genome.features.tsv") };
        assert!(cfg.validate().is_err());

        cfg.genome = GenomeInput::GenBank(touch(&tmp, "genome.gbk"));
        assert!(cfg.validate().is_ok());
        cfg.genome = GenomeInput::GenBank(tmp.path().join("missing.gbk"));
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn trim_options_follow_barcode_policy() {
        let cfg = ExperimentConfig::new(
            "e",
            PathBuf::from("s"),
            ReadsInput::Demultiplexed(PathBuf::from("d")),
            GenomeInput::GenBank(PathBuf::from("g.gbk")),
        );
        assert_eq!(cfg.trim_options(), TrimOptions::new(0));
    }
}
