//! Gene feature table.
//!
//! Tab-separated with a header naming at least the columns `gene`, `contig`,
//! `start`, `end` and `strand` (any order, extra columns ignored). Coordinates
//! are 0-based half-open; strand is `+` or `-`. Lines starting with `#` are
//! comments.
//!
//! ```text
//! gene    contig  start   end     strand
//! lacZ    chr1    100     200     +
//! ```
use std::collections::HashSet;
use std::path::Path;

use log::{info, warn};

use crate::errors::{check_malformed_rate, Error, Result, Stage};
use crate::sites::Strand;

const COLUMNS: [&str; 5] = ["gene", "contig", "start", "end", "strand"];

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GeneFeature {
    pub name: String,
    pub contig: String,
    pub start: u64,
    pub end: u64,
    pub strand: Strand,
}

impl GeneFeature {
    pub fn len(&self) -> u64 { self.end - self.start }

    pub fn is_empty(&self) -> bool { self.end <= self.start }
}

/// Features in file order. Shared read-only by every sample.
#[derive(Clone, Debug, Default)]
pub struct FeatureTable {
    pub features: Vec<GeneFeature>,
    /// Rows skipped as unparseable or duplicated.
    pub malformed: usize,
}

impl FeatureTable {
    pub fn new(features: Vec<GeneFeature>) -> Self {
        Self { features, malformed: 0 }
    }

    pub fn len(&self) -> usize { self.features.len() }

    pub fn is_empty(&self) -> bool { self.features.is_empty() }

    pub fn iter(&self) -> std::slice::Iter<'_, GeneFeature> { self.features.iter() }
}

/// Load a feature table, skipping (and counting) malformed rows.
pub fn load<P: AsRef<Path>>(path: P) -> Result<FeatureTable> {
    let p = path.as_ref();
    let file = p.display().to_string();
    let mut rdr = csv::ReaderBuilder::new()
        .delimiter(b'\t')
        .comment(Some(b'#'))
        .flexible(true)
        .has_headers(true)
        .from_path(p)
        .map_err(|e| Error::io(p, e))?;

    let headers = rdr.headers().map_err(|e| Error::io(p, e))?.clone();
    let mut idx = [0usize; 5];
    for (slot, col) in idx.iter_mut().zip(COLUMNS) {
        *slot = headers.iter().position(|h| h.trim().eq_ignore_ascii_case(col)).ok_or_else(|| Error::InputFormat {
            stage: Stage::Features,
            file: file.clone(),
            record: "header".to_string(),
            reason: format!("missing column \"{col}\""),
        })?;
    }

    let mut table = FeatureTable::default();
    let mut seen: HashSet<(String, String)> = HashSet::new();
    let mut total = 0usize;
    for rec in rdr.byte_records() {
        let rec = rec.map_err(|e| Error::io(p, e))?;
        total += 1;
        let line = rec.position().map(|pos| pos.line()).unwrap_or(0);
        let parsed = (|| -> std::result::Result<GeneFeature, String> {
            let [name, contig, start, end, strand] = [0, 1, 2, 3, 4].map(|i| text_field(&rec, idx[i], COLUMNS[i]));
            let (name, contig, start, end, strand) = (name?, contig?, start?, end?, strand?);
            if name.is_empty() || contig.is_empty() {
                return Err("empty gene or contig name".to_string());
            }
            let start: u64 = start.parse().map_err(|_| format!("bad start \"{start}\""))?;
            let end: u64 = end.parse().map_err(|_| format!("bad end \"{end}\""))?;
            if end <= start {
                return Err(format!("end {end} is not after start {start}"));
            }
            let strand = Strand::from_symbol(strand).ok_or_else(|| format!("bad strand \"{strand}\""))?;
            Ok(GeneFeature { name: name.to_string(), contig: contig.to_string(), start, end, strand })
        })();

        match parsed {
            Ok(f) => {
                if !seen.insert((f.contig.clone(), f.name.clone())) {
                    warn!("features: {}:{} duplicate gene \"{}\" on {}; keeping the first", file, line, f.name, f.contig);
                    table.malformed += 1;
                    continue;
                }
                table.features.push(f);
            }
            Err(reason) => {
                warn!("features: {}:{} skipped: {}", file, line, reason);
                table.malformed += 1;
            }
        }
    }
    check_malformed_rate(Stage::Features, p, table.malformed, total)?;
    info!("features: {} | genes={} skipped={}", file, table.len(), table.malformed);
    Ok(table)
}

/// Write `table` in the format [`load`] reads.
pub fn write<P: AsRef<Path>>(path: P, table: &FeatureTable) -> Result<()> {
    let p = path.as_ref();
    let mut w = csv::WriterBuilder::new().delimiter(b'\t').from_path(p).map_err(|e| Error::io(p, e))?;
    w.write_record(COLUMNS).map_err(|e| Error::io(p, e))?;
    for f in table.iter() {
        w.write_record([f.name.as_str(), f.contig.as_str(), f.start.to_string().as_str(), f.end.to_string().as_str(), f.strand.symbol()])
            .map_err(|e| Error::io(p, e))?;
    }
    w.flush().map_err(|e| Error::io(p, e))
}

/// Column `i` of `rec` as trimmed text; absent columns read as empty.
fn text_field<'r>(rec: &'r csv::ByteRecord, i: usize, column: &str) -> std::result::Result<&'r str, String> {
    let raw = rec.get(i).unwrap_or(b"");
    std::str::from_utf8(raw).map(str::trim).map_err(|_| format!("column \"{column}\" is not valid UTF-8"))
}
