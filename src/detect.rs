//! Barcode detection (exact and mismatch-tolerant).
//!
//! Distances come from `bio`: Levenshtein for checking a barcode set,
//! Hamming for matching a read prefix against it (barcodes are fixed length
//! and sequencing errors in them are substitutions).
//!
//! # Examples
//! ```
//! use tnseq::detect::{edit_distance, BarcodeMatcher, BarcodeMatch};
//! assert_eq!(edit_distance(b"ACGT", b"ACGT"), 0);
//! let mut m = BarcodeMatcher::new(&["ACGT", "TTTT"], 1);
//! assert_eq!(m.classify(b"ACGA"), BarcodeMatch::Corrected(0));
//! ```
use std::collections::HashMap;

use bio::alignment::distance::{hamming, levenshtein};

/// Levenshtein distance between two sequences.
#[inline]
pub fn edit_distance(a: &[u8], b: &[u8]) -> usize {
    levenshtein(a, b) as usize
}

/// Number of substitutions between equal-length sequences; `None` if the lengths differ.
#[inline]
pub fn substitutions(a: &[u8], b: &[u8]) -> Option<usize> {
    (a.len() == b.len()).then(|| hamming(a, b) as usize)
}

/// Outcome of matching one read prefix against the sample barcodes.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum BarcodeMatch {
    /// Prefix equals the barcode of the sample at this index.
    Exact(usize),
    /// Exactly one sample is within the mismatch tolerance.
    Corrected(usize),
    /// Several samples are within the tolerance; the read goes to none of them.
    Ambiguous,
    /// No sample is within the tolerance.
    Unassigned,
}

impl BarcodeMatch {
    /// Sample index the read is assigned to, if any.
    pub fn sample(self) -> Option<usize> {
        match self {
            BarcodeMatch::Exact(i) | BarcodeMatch::Corrected(i) => Some(i),
            BarcodeMatch::Ambiguous | BarcodeMatch::Unassigned => None,
        }
    }
}

/// Assigns read prefixes to barcodes, indexed in the order they were supplied.
///
/// Outcomes are memoised per distinct prefix; barcodes are short, so the
/// number of distinct prefixes seen in a run stays small.
pub struct BarcodeMatcher {
    barcodes: Vec<Vec<u8>>,
    exact: HashMap<Vec<u8>, usize>,
    max_mismatches: usize,
    cache: HashMap<Vec<u8>, BarcodeMatch>,
}

impl BarcodeMatcher {
    pub fn new<S: AsRef<str>>(barcodes: &[S], max_mismatches: usize) -> Self {
        let barcodes: Vec<Vec<u8>> = barcodes.iter().map(|b| b.as_ref().to_ascii_uppercase().into_bytes()).collect();
        let exact = barcodes.iter().enumerate().map(|(i, b)| (b.clone(), i)).collect();
        Self { barcodes, exact, max_mismatches, cache: HashMap::new() }
    }

    pub fn max_mismatches(&self) -> usize { self.max_mismatches }

    /// Classify `prefix` (case-insensitive).
    pub fn classify(&mut self, prefix: &[u8]) -> BarcodeMatch {
        let key = prefix.to_ascii_uppercase();
        if let Some(&i) = self.exact.get(&key) {
            return BarcodeMatch::Exact(i);
        }
        if self.max_mismatches == 0 {
            return BarcodeMatch::Unassigned;
        }
        if let Some(&m) = self.cache.get(&key) {
            return m;
        }
        let mut hit: Option<usize> = None;
        let mut outcome = BarcodeMatch::Unassigned;
        for (i, b) in self.barcodes.iter().enumerate() {
            match substitutions(&key, b) {
                Some(d) if d <= self.max_mismatches => {
                    if hit.is_some() {
                        outcome = BarcodeMatch::Ambiguous;
                        break;
                    }
                    hit = Some(i);
                    outcome = BarcodeMatch::Corrected(i);
                }
                _ => {}
            }
        }
        self.cache.insert(key, outcome);
        outcome
    }
}
