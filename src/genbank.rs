//! Genome preparation from a GenBank file.
//!
//! Every record becomes one contig, named by its `VERSION` (falling back to
//! `ACCESSION`, then `LOCUS` name). Coding and RNA features become the gene
//! feature table; plain `gene` features are used only when a file has none of
//! those. Genes are named by `locus_tag`, then `gene`, then their location.
use std::collections::HashSet;
use std::path::Path;

use bio::io::fasta;
use gb_io::seq::{Feature, Location, Seq};
use log::{info, warn};

use crate::errors::{check_malformed_rate, Error, Result, Stage};
use crate::features::{self, FeatureTable, GeneFeature};
use crate::sites::Strand;

const GENE_KINDS: [&str; 5] = ["CDS", "tRNA", "rRNA", "tmRNA", "ncRNA"];

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Contig {
    pub name: String,
    pub seq: Vec<u8>,
}

/// Sequence and annotation of one GenBank genome.
#[derive(Clone, Debug, Default)]
pub struct Genome {
    pub contigs: Vec<Contig>,
    pub features: FeatureTable,
}

impl Genome {
    /// Write the contigs as FASTA and the genes as a feature table.
    pub fn write<P: AsRef<Path>, Q: AsRef<Path>>(&self, fasta_path: P, features_path: Q) -> Result<()> {
        let p = fasta_path.as_ref();
        let mut w = fasta::Writer::to_file(p).map_err(|e| Error::io(p, e))?;
        for c in &self.contigs {
            w.write(&c.name, None, &c.seq).map_err(|e| Error::io(p, e))?;
        }
        w.flush().map_err(|e| Error::io(p, e))?;
        features::write(features_path, &self.features)
    }
}

/// Parse a GenBank file into contigs and a gene feature table.
pub fn load<P: AsRef<Path>>(path: P) -> Result<Genome> {
    let p = path.as_ref();
    let records = gb_io::reader::parse_file(p).map_err(|e| Error::InputFormat {
        stage: Stage::Genome,
        file: p.display().to_string(),
        record: "#1".to_string(),
        reason: e.to_string(),
    })?;
    if records.is_empty() {
        return Err(Error::InputFormat {
            stage: Stage::Genome,
            file: p.display().to_string(),
            record: "#1".to_string(),
            reason: "no GenBank records found".to_string(),
        });
    }

    let mut genome = Genome::default();
    let mut names: HashSet<String> = HashSet::new();
    for (i, rec) in records.iter().enumerate() {
        let name = record_name(rec, i);
        if rec.seq.is_empty() {
            return Err(Error::InputFormat {
                stage: Stage::Genome,
                file: p.display().to_string(),
                record: format!("#{} ({name})", i + 1),
                reason: "record has no sequence".to_string(),
            });
        }
        if !names.insert(name.clone()) {
            return Err(Error::InputFormat {
                stage: Stage::Genome,
                file: p.display().to_string(),
                record: format!("#{} ({name})", i + 1),
                reason: "duplicate record name".to_string(),
            });
        }
        genome.contigs.push(Contig { name, seq: rec.seq.to_ascii_uppercase() });
    }

    let use_genes = !records.iter().flat_map(|r| &r.features).any(|f| is_kind(f, &GENE_KINDS));
    let mut seen: HashSet<(String, String)> = HashSet::new();
    let mut total = 0usize;
    for (rec, contig) in records.iter().zip(&genome.contigs) {
        for f in &rec.features {
            let wanted = if use_genes { is_kind(f, &["gene"]) } else { is_kind(f, &GENE_KINDS) };
            if !wanted {
                continue;
            }
            total += 1;
            match gene_feature(f, &contig.name, contig.seq.len() as u64) {
                Some(g) if seen.insert((g.contig.clone(), g.name.clone())) => genome.features.features.push(g),
                Some(g) => {
                    warn!("genome: {} duplicate gene \"{}\" on {}; keeping the first", p.display(), g.name, g.contig);
                    genome.features.malformed += 1;
                }
                None => {
                    warn!("genome: {} skipped {} feature with unusable location on {}", p.display(), f.kind, contig.name);
                    genome.features.malformed += 1;
                }
            }
        }
    }
    check_malformed_rate(Stage::Genome, p, genome.features.malformed, total)?;
    info!(
        "genome: {} | contigs={} genes={} skipped={}",
        p.display(),
        genome.contigs.len(),
        genome.features.len(),
        genome.features.malformed
    );
    Ok(genome)
}

fn record_name(rec: &Seq, index: usize) -> String {
    [&rec.version, &rec.accession, &rec.name]
        .into_iter()
        .flatten()
        .map(|v| v.trim())
        .find(|v| !v.is_empty())
        .and_then(|v| v.split_whitespace().next())
        .map(str::to_string)
        .unwrap_or_else(|| format!("record_{}", index + 1))
}

fn is_kind(f: &Feature, kinds: &[&str]) -> bool {
    let kind = f.kind.to_string();
    kinds.iter().any(|k| kind == *k)
}

fn is_reverse(loc: &Location) -> bool {
    match loc {
        Location::Complement(_) => true,
        Location::Join(parts) | Location::Order(parts) => !parts.is_empty() && parts.iter().all(is_reverse),
        _ => false,
    }
}

fn qualifier<'f>(f: &'f Feature, key: &str) -> Option<&'f str> {
    f.qualifiers
        .iter()
        .filter(|(k, _)| (**k).eq_ignore_ascii_case(key))
        .find_map(|(_, v)| v.as_deref().map(str::trim).filter(|v| !v.is_empty()))
}

fn gene_feature(f: &Feature, contig: &str, contig_len: u64) -> Option<GeneFeature> {
    let (from, to) = f.location.find_bounds().ok()?;
    let (start, end) = (u64::try_from(from.min(to)).ok()?, u64::try_from(from.max(to)).ok()?);
    if end <= start || end > contig_len {
        return None;
    }
    let name = qualifier(f, "locus_tag")
        .or_else(|| qualifier(f, "gene"))
        .map(str::to_string)
        .unwrap_or_else(|| format!("{contig}:{}-{end}", start + 1));
    let strand = if is_reverse(&f.location) { Strand::Reverse } else { Strand::Forward };
    Some(GeneFeature { name, contig: contig.to_string(), start, end, strand })
}
