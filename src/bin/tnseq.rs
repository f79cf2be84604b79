use std::path::PathBuf;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use env_logger::Env;
use log::info;
use polars::prelude::*;

use tnseq::align::Bowtie;
use tnseq::clean::{self, TrimOptions};
use tnseq::errors::Stage;
use tnseq::layout::ExperimentLayout;
use tnseq::pipeline::{self, ExperimentConfig, GenomeInput, ReadsInput};
use tnseq::sample::{BarcodePolicy, SampleRegistry, DEFAULT_BARCODE_LENGTH};
use tnseq::table::SampleSummary;
use tnseq::{demux, features, genbank, genes, sites};

/// tnseq CLI
#[derive(Parser)]
#[command(name = "tnseq")]
#[command(version)]
#[command(about = "Tn-seq demultiplexing, insertion-site mapping and gene counting", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Clone)]
struct BarcodeArgs {
    /// Barcode length at the start of every pooled read
    #[arg(long, default_value_t = DEFAULT_BARCODE_LENGTH)]
    barcode_length: usize,
    /// Substitutions tolerated when no barcode matches exactly
    #[arg(long, default_value_t = 1)]
    max_mismatches: usize,
    /// Minimum edit distance required between any two barcodes
    #[arg(long, default_value_t = 2)]
    min_barcode_distance: usize,
    /// Skip barcode checks and match exactly only
    #[arg(long)]
    no_barcode_qc: bool,
}

impl BarcodeArgs {
    fn policy(&self) -> BarcodePolicy {
        BarcodePolicy {
            length: self.barcode_length,
            validate: !self.no_barcode_qc,
            max_mismatches: self.max_mismatches,
            min_distance: self.min_barcode_distance,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Run the full pipeline: demultiplex, trim, align, map sites and genes, build the table
    Run {
        /// Pooled reads (FASTQ/FASTQ.GZ), or a directory of {sample}.fastq.gz with --nobarcodes
        #[arg(short, long)]
        input: PathBuf,
        /// Sample list: one "name barcode" pair per line
        #[arg(short, long)]
        samples: PathBuf,
        /// Experiment name (made filename-safe)
        #[arg(short, long)]
        experiment: String,
        /// Genome: a GenBank file, or a FASTA sequence when --features is given
        #[arg(short, long)]
        genome: PathBuf,
        /// Gene feature table (TSV: gene, contig, start, end, strand) for a FASTA genome
        #[arg(short, long)]
        features: Option<PathBuf>,
        /// Fraction of each gene, from its start, in which insertions count (0.0-1.0)
        #[arg(short, long, default_value_t = 1.0)]
        disruption: f64,
        /// Reads were already demultiplexed and have no barcodes
        #[arg(long)]
        nobarcodes: bool,
        #[command(flatten)]
        barcodes: BarcodeArgs,
        /// Fixed-length 3' adapter to remove from every read
        #[arg(long, default_value_t = 0)]
        adapter_length: usize,
        /// Samples processed concurrently (0 = all cores)
        #[arg(long, default_value_t = 1)]
        threads: usize,
        /// Threads handed to each aligner run
        #[arg(long, default_value_t = 1)]
        aligner_threads: usize,
        /// Output root directory
        #[arg(short, long, default_value = ".")]
        out: PathBuf,
        /// bowtie executable
        #[arg(long, default_value = "bowtie")]
        bowtie: PathBuf,
        /// bowtie-build executable
        #[arg(long, default_value = "bowtie-build")]
        bowtie_build: PathBuf,
    },

    /// Demultiplex a pooled read file into per-sample FASTQ.GZ files
    Demux {
        #[arg(short, long)]
        input: PathBuf,
        #[arg(short, long)]
        samples: PathBuf,
        #[arg(short, long)]
        experiment: String,
        #[command(flatten)]
        barcodes: BarcodeArgs,
        #[arg(short, long, default_value = ".")]
        out: PathBuf,
    },

    /// Extract the sequence (FASTA) and gene feature table from a GenBank genome
    Genome {
        input: PathBuf,
        /// Output prefix; writes {prefix}.fna and {prefix}.features.tsv
        #[arg(short, long, default_value = "genome")]
        output: PathBuf,
    },

    /// Trim barcode (and adapter) bases from one sample's reads
    Trim {
        input: PathBuf,
        output: PathBuf,
        #[arg(long, default_value_t = DEFAULT_BARCODE_LENGTH)]
        barcode_length: usize,
        #[arg(long, default_value_t = 0)]
        adapter_length: usize,
        /// Sample name used in log messages
        #[arg(long, default_value = "sample")]
        sample: String,
    },

    /// Count insertion sites in an aligner report (bowtie text, SAM or BAM)
    Sites {
        report: PathBuf,
        /// Output TSV
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Count disruptive insertions per gene for one aligner report
    Genes {
        report: PathBuf,
        #[arg(short, long)]
        features: PathBuf,
        #[arg(short, long, default_value_t = 1.0)]
        disruption: f64,
        #[arg(short, long)]
        output: PathBuf,
    },
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            input, samples, experiment, genome, features, disruption, nobarcodes, barcodes,
            adapter_length, threads, aligner_threads, out, bowtie, bowtie_build,
        } => {
            let reads = if nobarcodes { ReadsInput::Demultiplexed(input) } else { ReadsInput::Pooled(input) };
            let genome = match features {
                Some(features) => GenomeInput::Prepared { fasta: genome, features },
                None => GenomeInput::GenBank(genome),
            };
            let mut cfg = ExperimentConfig::new(experiment, samples, reads, genome);
            cfg.out_dir = out;
            cfg.disruption = disruption;
            if !nobarcodes {
                cfg.barcodes = barcodes.policy();
            }
            cfg.adapter_length = adapter_length;
            cfg.threads = threads;
            let aligner = Bowtie { build_bin: bowtie_build, align_bin: bowtie, threads: aligner_threads };

            let report = pipeline::run_experiment(&cfg, &aligner)?;
            print_summary(&report.summaries)?;
            if !report.failed_samples().is_empty() {
                eprintln!("alignment failed for: {}", report.failed_samples().join(", "));
            }
        }

        Commands::Demux { input, samples, experiment, barcodes, out } => {
            let policy = barcodes.policy();
            let layout = ExperimentLayout::new(&out, &experiment)?;
            let registry = SampleRegistry::load(&samples, &layout, &policy)?;
            layout.create()?;
            let stats = demux::run(&input, &registry, policy.effective_mismatches())?;
            demux::write_stats(layout.demux_stats_path(), &registry, &stats)?;
            info!("demux stats written to {}", layout.demux_stats_path().display());
        }

        Commands::Genome { input, output } => {
            let genome = genbank::load(&input)?;
            let mut fna = output.clone().into_os_string();
            fna.push(".fna");
            let mut tsv = output.into_os_string();
            tsv.push(".features.tsv");
            genome.write(&fna, &tsv)?;
            info!("genome: {} contig(s), {} gene(s) written to {:?} and {:?}", genome.contigs.len(), genome.features.len(), fna, tsv);
        }

        Commands::Trim { input, output, barcode_length, adapter_length, sample } => {
            let opts = TrimOptions { barcode_length, adapter_length };
            let stats = clean::trim(&input, &output, &sample, &opts)?;
            println!(
                "reads={}\twritten={}\ttoo_short={}\tmalformed={}",
                stats.total, stats.written, stats.too_short, stats.malformed
            );
        }

        Commands::Sites { report, output } => {
            let s = sites::map_sites(&report)?;
            sites::write_sites(&output, &s)?;
        }

        Commands::Genes { report, features: feature_path, disruption, output } => {
            let table = features::load(&feature_path)
                .with_context(|| format!("[{}] {}", Stage::Features, feature_path.display()))?;
            let s = sites::map_sites(&report)?;
            let counts = genes::map_genes(&table, &s, disruption)?;
            genes::write_gene_counts(&output, &counts)?;
        }
    }

    Ok(())
}

fn print_summary(rows: &[SampleSummary]) -> PolarsResult<()> {
    let df = df!(
        "sample"        => rows.iter().map(|r| r.name.clone()).collect::<Vec<_>>(),
        "barcode"       => rows.iter().map(|r| r.barcode.clone()).collect::<Vec<_>>(),
        "demux_reads"   => rows.iter().map(|r| r.demux_reads as u64).collect::<Vec<_>>(),
        "trimmed_reads" => rows.iter().map(|r| r.trimmed_reads as u64).collect::<Vec<_>>(),
        "too_short"     => rows.iter().map(|r| r.too_short as u64).collect::<Vec<_>>(),
        "mapped_reads"  => rows.iter().map(|r| r.mapped_reads).collect::<Vec<_>>(),
        "status"        => rows.iter().map(|r| r.status()).collect::<Vec<_>>(),
    )?;

    std::env::set_var("POLARS_FMT_MAX_ROWS", "1000000");
    std::env::set_var("POLARS_FMT_STR_LEN", "200");
    println!("{}", df);
    Ok(())
}
