//! Core types for **samples**, the **sample registry** and the **barcode policy**.
//!
//! A sample list has one sample per line: a name and a barcode separated by
//! tabs or spaces. Blank lines and lines starting with `#` are skipped.
//!
//! ```text
//! # name   barcode
//! A        ACGT
//! B        TTTT
//! ```
//!
//! The registry keeps samples in file order. That order is the column order
//! of the final gene table.
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::detect;
use crate::errors::{Error, Result};
use crate::layout::{sanitize_name, ExperimentLayout};

/// Barcode length of the reference protocol.
pub const DEFAULT_BARCODE_LENGTH: usize = 4;

/// How barcodes are checked when the registry is built and matched during demultiplexing.
#[derive(Clone, Debug, PartialEq)]
pub struct BarcodePolicy {
    /// Fixed barcode length shared by the demultiplexer and the trimmer; `0` when
    /// reads arrive with barcodes already removed.
    pub length: usize,
    /// Enforce alphabet and pairwise-distance checks, and enable mismatch-tolerant matching.
    pub validate: bool,
    /// Substitutions tolerated when no barcode matches exactly (only with `validate`).
    pub max_mismatches: usize,
    /// Minimum Levenshtein distance between any two barcodes (only with `validate`).
    pub min_distance: usize,
}

impl Default for BarcodePolicy {
    fn default() -> Self {
        Self { length: DEFAULT_BARCODE_LENGTH, validate: true, max_mismatches: 1, min_distance: 2 }
    }
}

impl BarcodePolicy {
    /// Policy for reads whose barcodes were removed upstream.
    pub fn pre_demultiplexed() -> Self {
        Self { length: 0, validate: false, max_mismatches: 0, min_distance: 0 }
    }

    /// Mismatches actually tolerated by the matcher.
    pub fn effective_mismatches(&self) -> usize {
        if self.validate { self.max_mismatches } else { 0 }
    }
}

/// One sample of the experiment. Immutable once the registry is built.
#[derive(Clone, Debug, PartialEq)]
pub struct Sample {
    /// Filesystem-safe, unique name.
    pub name: String,
    /// Uppercase barcode of the registry's fixed length (empty when barcodes are pre-removed).
    pub barcode: String,
    /// Where the demultiplexer writes this sample's reads.
    pub demultiplexed_path: PathBuf,
    /// Where the trimmer writes alignment-ready reads.
    pub trimmed_path: PathBuf,
}

/// Ordered mapping of sample name to [`Sample`].
#[derive(Clone, Debug)]
pub struct SampleRegistry {
    samples: Vec<Sample>,
    index: HashMap<String, usize>,
    barcode_length: usize,
}

impl SampleRegistry {
    /// Read and validate a sample list file.
    pub fn load<P: AsRef<Path>>(path: P, layout: &ExperimentLayout, policy: &BarcodePolicy) -> Result<Self> {
        let p = path.as_ref();
        let text = fs::read_to_string(p).map_err(|e| Error::io(p, e))?;
        Self::parse(&text, &p.display().to_string(), layout, policy)
    }

    /// Parse sample-list text; `origin` names the source in error messages.
    pub fn parse(text: &str, origin: &str, layout: &ExperimentLayout, policy: &BarcodePolicy) -> Result<Self> {
        let mut samples: Vec<Sample> = Vec::new();
        let mut index = HashMap::new();
        let mut barcodes: HashMap<String, String> = HashMap::new();

        for (i, raw) in text.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let context = format!("{}:{} \"{}\"", origin, i + 1, line);
            let mut fields = line.split_whitespace();
            let name = fields.next().unwrap_or_default().to_string();
            let barcode = fields.next().unwrap_or_default().to_ascii_uppercase();

            if sanitize_name(&name) != name {
                return Err(Error::config(context, "sample name must contain only letters, digits, '-', '_' or '.'"));
            }
            if policy.length > 0 && barcode.len() != policy.length {
                return Err(Error::config(
                    context,
                    format!("barcode must be {} bases, found \"{}\"", policy.length, barcode),
                ));
            }
            if policy.validate {
                if let Some(bad) = barcode.chars().find(|c| !matches!(c, 'A' | 'C' | 'G' | 'T')) {
                    return Err(Error::config(context, format!("barcode contains '{bad}', expected only A/C/G/T")));
                }
            }
            if index.contains_key(&name) {
                return Err(Error::config(context, format!("duplicate sample name \"{name}\"")));
            }
            if policy.length > 0 {
                if let Some(other) = barcodes.insert(barcode.clone(), name.clone()) {
                    return Err(Error::config(context, format!("barcode {barcode} already used by sample \"{other}\"")));
                }
            }

            index.insert(name.clone(), samples.len());
            samples.push(Sample {
                demultiplexed_path: layout.demultiplexed_path(&name),
                trimmed_path: layout.trimmed_path(&name),
                name,
                barcode,
            });
        }

        if samples.is_empty() {
            return Err(Error::config(origin, "sample list contains no samples"));
        }
        if policy.validate && policy.length > 0 {
            check_pairwise_distance(&samples, policy.min_distance, origin)?;
        }

        Ok(Self { samples, index, barcode_length: policy.length })
    }

    pub fn get(&self, name: &str) -> Option<&Sample> {
        self.index.get(name).map(|&i| &self.samples[i])
    }

    /// Position of `name` in registry order.
    pub fn position(&self, name: &str) -> Option<usize> { self.index.get(name).copied() }

    /// Samples in registry order.
    pub fn iter(&self) -> std::slice::Iter<'_, Sample> { self.samples.iter() }

    pub fn samples(&self) -> &[Sample] { &self.samples }

    pub fn names(&self) -> Vec<&str> { self.samples.iter().map(|s| s.name.as_str()).collect() }

    pub fn len(&self) -> usize { self.samples.len() }

    pub fn is_empty(&self) -> bool { self.samples.is_empty() }

    pub fn barcode_length(&self) -> usize { self.barcode_length }
}

fn check_pairwise_distance(samples: &[Sample], min_distance: usize, origin: &str) -> Result<()> {
    for (i, a) in samples.iter().enumerate() {
        for b in &samples[i + 1..] {
            let d = detect::edit_distance(a.barcode.as_bytes(), b.barcode.as_bytes());
            if d < min_distance {
                return Err(Error::config(
                    origin,
                    format!(
                        "barcodes {} ({}) and {} ({}) are {} edit(s) apart; at least {} required",
                        a.barcode, a.name, b.barcode, b.name, d, min_distance
                    ),
                ));
            }
        }
    }
    Ok(())
}
