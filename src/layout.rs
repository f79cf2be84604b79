//! On-disk layout of one experiment.
//!
//! ```text
//! {out}/{experiment}/
//!     raw_data/{sample}.fastq.gz      demultiplexed reads
//!     genome_lookup/genome.*          aligner index
//!     {sample}_bowtie.txt             aligner report
//!     {sample}_sites.tsv              insertion-site counts
//!     {sample}_genes.tsv              per-gene counts
//!     {experiment}_genes.tsv          merged gene table
//!     summary.tsv, demux_stats.tsv
//! ```
//!
//! Every path handed out is absolute when the output root is, so no stage
//! ever needs to change the process working directory.

use std::fs;
use std::path::{Path, PathBuf};

use crate::errors::{Error, Result};

/// Basename of the aligner index inside `genome_lookup/`.
pub const INDEX_PREFIX: &str = "genome";

/// Reduce an experiment name to characters that are safe in a path component.
///
/// Whitespace becomes `_`; anything other than ASCII alphanumerics, `-`, `_`
/// and `.` is dropped.
///
/// # Examples
/// ```
/// assert_eq!(tnseq::layout::sanitize_name("my exp #1"), "my_exp_1");
/// ```
pub fn sanitize_name(name: &str) -> String {
    name.trim()
        .chars()
        .filter_map(|c| {
            if c.is_whitespace() {
                Some('_')
            } else if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                Some(c)
            } else {
                None
            }
        })
        .collect()
}

#[derive(Clone, Debug)]
pub struct ExperimentLayout {
    pub name: String,
    pub root: PathBuf,
}

impl ExperimentLayout {
    /// Layout for `experiment` under `out_dir`. Fails if the sanitised name is empty.
    pub fn new(out_dir: impl AsRef<Path>, experiment: &str) -> Result<Self> {
        let name = sanitize_name(experiment);
        if name.is_empty() || name.chars().all(|c| c == '.') {
            return Err(Error::config(
                "experiment name",
                format!("\"{experiment}\" contains no filename-safe characters"),
            ));
        }
        let out_dir = out_dir.as_ref();
        let out_dir = if out_dir.is_absolute() {
            out_dir.to_path_buf()
        } else {
            std::env::current_dir().map_err(|e| Error::io(out_dir, e))?.join(out_dir)
        };
        Ok(Self { root: out_dir.join(&name), name })
    }

    pub fn raw_data_dir(&self) -> PathBuf { self.root.join("raw_data") }
    pub fn genome_dir(&self) -> PathBuf { self.root.join("genome_lookup") }
    pub fn index_prefix(&self) -> PathBuf { self.genome_dir().join(INDEX_PREFIX) }
    /// Sequence extracted from a GenBank genome.
    pub fn genome_fasta_path(&self) -> PathBuf { self.genome_dir().join(format!("{INDEX_PREFIX}.fna")) }
    /// Feature table extracted from a GenBank genome.
    pub fn genome_features_path(&self) -> PathBuf { self.genome_dir().join(format!("{INDEX_PREFIX}.features.tsv")) }

    pub fn demultiplexed_path(&self, sample: &str) -> PathBuf {
        self.raw_data_dir().join(format!("{sample}.fastq.gz"))
    }

    pub fn trimmed_path(&self, sample: &str) -> PathBuf {
        self.root.join(format!("{sample}_trimmed.fastq"))
    }

    pub fn alignment_path(&self, sample: &str) -> PathBuf {
        self.root.join(format!("{sample}_bowtie.txt"))
    }

    pub fn sites_path(&self, sample: &str) -> PathBuf {
        self.root.join(format!("{sample}_sites.tsv"))
    }

    pub fn sample_genes_path(&self, sample: &str) -> PathBuf {
        self.root.join(format!("{sample}_genes.tsv"))
    }

    pub fn gene_table_path(&self) -> PathBuf {
        self.root.join(format!("{}_genes.tsv", self.name))
    }

    pub fn summary_path(&self) -> PathBuf { self.root.join("summary.tsv") }
    pub fn demux_stats_path(&self) -> PathBuf { self.root.join("demux_stats.tsv") }

    /// Create the experiment, raw-data and genome directories.
    pub fn create(&self) -> Result<()> {
        for dir in [self.root.clone(), self.raw_data_dir(), self.genome_dir()] {
            fs::create_dir_all(&dir).map_err(|e| Error::io(&dir, e))?;
        }
        Ok(())
    }
}

/// Delete a file left by an earlier run; a missing file is fine.
pub fn remove_stale<P: AsRef<Path>>(path: P) -> Result<()> {
    let p = path.as_ref();
    match fs::remove_file(p) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(Error::io(p, e)),
    }
}
