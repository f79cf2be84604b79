//! Insertion-site mapping from aligner output.
//!
//! Every mapped read is collapsed to the 5'-most reference base it covers:
//! the leftmost aligned base for forward-strand hits, the rightmost for
//! reverse-strand hits. Reads landing on the same `(contig, position, strand)`
//! add up. Positions are 0-based.
//!
//! Two report formats are understood, chosen by file extension:
//! - `.sam` / `.bam`: parsed with `rust-htslib`; unmapped, secondary and
//!   supplementary records are ignored and the reverse-strand end comes from
//!   the CIGAR reference span.
//! - anything else: bowtie's default tab-separated report
//!   (`name, strand, reference, offset, sequence, qualities, ...`).
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use log::{info, warn};
use rust_htslib::bam::{self, Read};

use crate::errors::{check_malformed_rate, Error, Result, Stage};

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Strand {
    Forward,
    Reverse,
}

impl Strand {
    pub fn from_symbol(s: &str) -> Option<Self> {
        match s {
            "+" => Some(Strand::Forward),
            "-" => Some(Strand::Reverse),
            _ => None,
        }
    }

    pub fn symbol(self) -> &'static str {
        match self {
            Strand::Forward => "+",
            Strand::Reverse => "-",
        }
    }
}

impl fmt::Display for Strand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.symbol()) }
}

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct InsertionSite {
    pub contig: String,
    pub position: u64,
    pub strand: Strand,
}

/// Insertion position for a hit whose leftmost aligned base is `leftmost`
/// and which spans `ref_len` reference bases.
#[inline]
pub fn insertion_position(strand: Strand, leftmost: u64, ref_len: u64) -> u64 {
    match strand {
        Strand::Forward => leftmost,
        Strand::Reverse => leftmost + ref_len.max(1) - 1,
    }
}

/// Per-site read counts for one sample.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SiteCounts {
    pub counts: BTreeMap<InsertionSite, u64>,
    /// Report lines that could not be interpreted and were skipped.
    pub malformed: usize,
}

impl SiteCounts {
    pub fn add(&mut self, contig: &str, position: u64, strand: Strand, n: u64) {
        let key = InsertionSite { contig: contig.to_string(), position, strand };
        *self.counts.entry(key).or_insert(0) += n;
    }

    /// Total mapped reads across all sites.
    pub fn total_reads(&self) -> u64 { self.counts.values().sum() }

    pub fn len(&self) -> usize { self.counts.len() }

    pub fn is_empty(&self) -> bool { self.counts.is_empty() }

    /// Strand-merged counts per contig, keyed by position.
    pub fn by_contig(&self) -> HashMap<&str, BTreeMap<u64, u64>> {
        let mut out: HashMap<&str, BTreeMap<u64, u64>> = HashMap::new();
        for (site, n) in &self.counts {
            *out.entry(site.contig.as_str()).or_default().entry(site.position).or_insert(0) += n;
        }
        out
    }
}

/// Count insertion sites in one aligner report.
pub fn map_sites<P: AsRef<Path>>(path: P) -> Result<SiteCounts> {
    let p = path.as_ref();
    let ext = p.extension().and_then(|e| e.to_str()).unwrap_or("").to_ascii_lowercase();
    let (sites, records) = match ext.as_str() {
        "sam" | "bam" => map_sites_htslib(p)?,
        _ => map_sites_bowtie(p)?,
    };
    if sites.malformed > 0 {
        warn!("sites: skipped {} malformed record(s) in {}", sites.malformed, p.display());
    }
    check_malformed_rate(Stage::Sites, p, sites.malformed, records)?;
    info!("sites: {} | reads={} sites={}", p.display(), sites.total_reads(), sites.len());
    Ok(sites)
}

fn map_sites_bowtie(p: &Path) -> Result<(SiteCounts, usize)> {
    let reader = BufReader::new(File::open(p).map_err(|e| Error::io(p, e))?);
    let mut sites = SiteCounts::default();
    let mut records = 0usize;
    for (i, line) in reader.lines().enumerate() {
        let line = line.map_err(|e| Error::io(p, e))?;
        if line.trim().is_empty() {
            continue;
        }
        records += 1;
        match parse_bowtie_line(&line) {
            Some((contig, pos, strand)) => sites.add(contig, pos, strand, 1),
            None => {
                log::debug!("sites: {}:{} unparseable: {}", p.display(), i + 1, line);
                sites.malformed += 1;
            }
        }
    }
    Ok((sites, records))
}

/// `(contig, insertion position, strand)` from one bowtie report line.
///
/// The contig is the first word of the reference name.
pub fn parse_bowtie_line(line: &str) -> Option<(&str, u64, Strand)> {
    let mut f = line.split('\t');
    let _name = f.next()?;
    let strand = Strand::from_symbol(f.next()?)?;
    let contig = f.next()?.split_whitespace().next()?;
    let offset: u64 = f.next()?.trim().parse().ok()?;
    let len = f.next()?.trim().len() as u64;
    if len == 0 {
        return None;
    }
    Some((contig, insertion_position(strand, offset, len), strand))
}

fn map_sites_htslib(p: &Path) -> Result<(SiteCounts, usize)> {
    let mut reader = bam::Reader::from_path(p).map_err(|e| Error::io(p, e))?;
    let names: Vec<String> = reader
        .header()
        .target_names()
        .iter()
        .map(|n| String::from_utf8_lossy(n).into_owned())
        .collect();
    let mut sites = SiteCounts::default();
    let mut records = 0usize;
    for result in reader.records() {
        let rec = result.map_err(|e| Error::io(p, e))?;
        if rec.is_unmapped() || rec.is_secondary() || rec.is_supplementary() {
            continue;
        }
        records += 1;
        let contig = usize::try_from(rec.tid()).ok().and_then(|t| names.get(t));
        let (Some(contig), Ok(start)) = (contig, u64::try_from(rec.pos())) else {
            sites.malformed += 1;
            continue;
        };
        let end = u64::try_from(rec.cigar().end_pos()).unwrap_or(start);
        let strand = if rec.is_reverse() { Strand::Reverse } else { Strand::Forward };
        sites.add(contig, insertion_position(strand, start, end.saturating_sub(start)), strand, 1);
    }
    Ok((sites, records))
}

/// Write site counts as TSV (`contig, position, strand, count`) in sorted order.
pub fn write_sites<P: AsRef<Path>>(path: P, sites: &SiteCounts) -> Result<()> {
    let p = path.as_ref();
    let mut w = csv::WriterBuilder::new().delimiter(b'\t').from_path(p).map_err(|e| Error::io(p, e))?;
    w.write_record(["contig", "position", "strand", "count"]).map_err(|e| Error::io(p, e))?;
    for (site, n) in &sites.counts {
        w.write_record([site.contig.clone(), site.position.to_string(), site.strand.to_string(), n.to_string()])
            .map_err(|e| Error::io(p, e))?;
    }
    w.flush().map_err(|e| Error::io(p, e))
}

#[cfg(test)]
mod sites_tests {
    use super::*;
    use tempfile::TempDir;

    const BOWTIE: &str = "\
r1\t+\tchr1 Vibrio fischeri\t100\tACGTACGTACGTACGT\tIIIIIIIIIIIIIIII\t0\t
r2\t-\tchr1\t100\tACGTACGTACGTACGT\tIIIIIIIIIIIIIIII\t0\t
r3\t+\tchr1\t100\tACGTACGTACGTACGTA\tIIIIIIIIIIIIIIIII\t0\t
r4\t-\tchr2\t7\tACGT\tIIII\t0\t
";

    #[test]
    fn strand_asymmetry() {
        assert_eq!(insertion_position(Strand::Forward, 100, 16), 100);
        assert_eq!(insertion_position(Strand::Reverse, 100, 16), 115);
    }

    #[test]
    fn bowtie_report_collapses_to_sites() {
        let tmp = TempDir::new().unwrap();
        let p = tmp.path().join("A_bowtie.txt");
        std::fs::write(&p, BOWTIE).unwrap();
        let s = map_sites(&p).unwrap();
        assert_eq!(s.total_reads(), 4);
        assert_eq!(s.counts[&InsertionSite { contig: "chr1".into(), position: 100, strand: Strand::Forward }], 2);
        assert_eq!(s.counts[&InsertionSite { contig: "chr1".into(), position: 115, strand: Strand::Reverse }], 1);
        assert_eq!(s.counts[&InsertionSite { contig: "chr2".into(), position: 10, strand: Strand::Reverse }], 1);
        let merged = s.by_contig();
        assert_eq!(merged["chr1"].values().sum::<u64>(), 3);
    }

    #[test]
    fn mapping_twice_is_identical() {
        let tmp = TempDir::new().unwrap();
        let p = tmp.path().join("A_bowtie.txt");
        std::fs::write(&p, BOWTIE).unwrap();
        assert_eq!(map_sites(&p).unwrap(), map_sites(&p).unwrap());
    }

    #[test]
    fn bad_lines_are_counted_then_escalate() {
        let tmp = TempDir::new().unwrap();
        let p = tmp.path().join("B_bowtie.txt");
        std::fs::write(&p, format!("{BOWTIE}garbage line\n")).unwrap();
        let s = map_sites(&p).unwrap();
        assert_eq!(s.malformed, 1);
        assert_eq!(s.total_reads(), 4);

        let mut all_bad = String::new();
        for _ in 0..20 {
            all_bad.push_str("x\t?\tchr1\tnope\tAC\n");
        }
        std::fs::write(&p, all_bad).unwrap();
        assert!(matches!(map_sites(&p), Err(Error::MalformedRateExceeded { .. })));
    }

    #[test]
    fn sam_uses_cigar_span_for_reverse_hits() {
        let tmp = TempDir::new().unwrap();
        let p = tmp.path().join("A.sam");
        let sam = "\
@HD\tVN:1.6\tSO:unsorted
@SQ\tSN:chr1\tLN:1000
r1\t0\tchr1\t101\t42\t10M\t*\t0\t0\tACGTACGTAC\tIIIIIIIIII
r2\t16\tchr1\t101\t42\t5M2D5M\t*\t0\t0\tACGTACGTAC\tIIIIIIIIII
r3\t4\t*\t0\t0\t*\t*\t0\t0\tACGTACGTAC\tIIIIIIIIII
";
        std::fs::write(&p, sam).unwrap();
        let s = map_sites(&p).unwrap();
        assert_eq!(s.total_reads(), 2);
        assert_eq!(s.counts[&InsertionSite { contig: "chr1".into(), position: 100, strand: Strand::Forward }], 1);
        // 12 reference bases from 100 -> rightmost 111
        assert_eq!(s.counts[&InsertionSite { contig: "chr1".into(), position: 111, strand: Strand::Reverse }], 1);
    }

    #[test]
    fn sites_table_is_sorted() {
        let mut s = SiteCounts::default();
        s.add("chr2", 5, Strand::Forward, 1);
        s.add("chr1", 9, Strand::Reverse, 3);
        s.add("chr1", 9, Strand::Forward, 2);
        let tmp = TempDir::new().unwrap();
        let p = tmp.path().join("sites.tsv");
        write_sites(&p, &s).unwrap();
        let text = std::fs::read_to_string(&p).unwrap();
        assert_eq!(text, "contig\tposition\tstrand\tcount\nchr1\t9\t+\t2\nchr1\t9\t-\t3\nchr2\t5\t+\t1\n");
    }
}
