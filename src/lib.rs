#![forbid(unsafe_code)]
//! # tnseq
//!
//! Transposon-insertion sequencing (**Tn-seq / INSeq**) read processing: split a
//! pooled run into samples by in-line **barcodes**, trim reads for the
//! aligner, collapse alignments into **insertion sites**, and aggregate sites
//! into a per-gene, per-sample count table.
//!
//! ## Stages
//! 1. [`sample`]: ordered sample registry with barcode checks.
//! 2. [`demux`]: one streaming pass over the pooled reads.
//! 3. [`clean`]: barcode / adapter trimming.
//! 4. [`align`]: the external aligner, behind the [`align::Aligner`] trait.
//! 5. [`sites`]: insertion-site counts from the aligner report.
//! 6. [`genes`]: disruption-window gene counts and counts-per-million.
//! 7. [`table`]: the merged gene table, columns in registry order.
//!
//! A GenBank genome is converted to a sequence and feature table by
//! [`genbank`]. [`pipeline::run_experiment`] drives all of them.
//!
//! ## Examples
//! ```rust
//! use tnseq::features::{FeatureTable, GeneFeature};
//! use tnseq::sites::{SiteCounts, Strand};
//!
//! let genes = FeatureTable::new(vec![GeneFeature {
//!     name: "lacZ".into(), contig: "chr1".into(), start: 100, end: 200, strand: Strand::Forward,
//! }]);
//! let mut sites = SiteCounts::default();
//! sites.add("chr1", 120, Strand::Forward, 3);
//! sites.add("chr1", 160, Strand::Reverse, 1);
//! let counts = tnseq::map_genes(&genes, &sites, 0.5).unwrap();
//! assert_eq!(counts.genes[0].raw, 3);
//! assert_eq!(counts.genes[0].cpm, 750_000.0);
//! ```

pub mod align;
pub mod clean;
pub mod demux;
pub mod detect;
pub mod errors;
pub mod features;
pub mod genbank;
pub mod genes;
pub mod layout;
pub mod pipeline;
pub mod sample;
pub mod seqio;
pub mod sites;
pub mod table;

pub use crate::errors::{Error, Result, SampleWarning};
pub use crate::genes::map_genes;
pub use crate::pipeline::{run_experiment, ExperimentConfig, GenomeInput, ReadsInput};
pub use crate::sample::{BarcodePolicy, Sample, SampleRegistry};
pub use crate::sites::map_sites;

/// Crate version string (from `CARGO_PKG_VERSION`).
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
