//! Streaming IO for **FASTQ / FASTQ.GZ** (and FASTA).
//!
//! ### Design
//! - Gzip input is recognised by its magic bytes, not its extension.
//! - FASTQ is read with `bio`'s line-oriented reader so that a damaged record
//!   can be skipped and reading resumes at the next record header.
//! - FASTA input (no qualities) goes through `needletail`.
//! - Writing goes through [`FastqWriter`]; paths ending in `.gz` are
//!   compressed with `flate2`, anything else is written as plain text.
//! - Records are visited one at a time and never collected, so memory use is
//!   independent of file size.
//!
//! ### Errors
//! A FASTQ record that is truncated, lacks its `@` header or has sequence and
//! quality strings of different lengths is skipped and counted in
//! [`ReadCounts::malformed`]; callers decide whether the rate is acceptable.
//! A file that is neither FASTQ nor FASTA is an
//! [`Error::InputFormat`](crate::errors::Error::InputFormat).
//! An empty file is not an error; it simply has no records.
//!
//! ### Example
//! ```no_run
//! use tnseq::errors::Stage;
//! use tnseq::seqio;
//! let counts = seqio::for_each_read("reads.fastq.gz", Stage::Demux, |r| {
//!     // r.id, r.seq, r.qual
//!     Ok(())
//! }).unwrap();
//! println!("processed {} records, skipped {}", counts.records, counts.malformed);
//! ```
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use bio::io::fastq::{self, FastqRead};
use flate2::read::MultiGzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use log::debug;
use needletail::errors::ParseErrorKind;
use needletail::parse_fastx_file;

use crate::errors::{Error, Result, Stage};

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// A borrowed view of one sequence record.
#[derive(Debug, Clone, Copy)]
pub struct ReadRef<'a> {
    /// Full header line without the leading `@`/`>`.
    pub id: &'a [u8],
    pub seq: &'a [u8],
    pub qual: Option<&'a [u8]>,
}

/// Record accounting for one pass over a read file.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ReadCounts {
    /// Well-formed records handed to the callback.
    pub records: usize,
    /// Damaged records that were skipped.
    pub malformed: usize,
}

impl ReadCounts {
    pub fn total(&self) -> usize { self.records + self.malformed }
}

/// Visit every well-formed record of `path` in file order.
pub fn for_each_read<P, F>(path: P, stage: Stage, mut on_record: F) -> Result<ReadCounts>
where
    P: AsRef<Path>,
    F: FnMut(ReadRef<'_>) -> Result<()>,
{
    let p = path.as_ref();
    let mut input = open_text(p)?;
    let first = match input.fill_buf().map_err(|e| Error::io(p, e))?.first() {
        Some(b) => *b,
        None => return Ok(ReadCounts::default()),
    };
    match first {
        b'@' => read_fastq(p, input, &mut on_record),
        b'>' => read_fasta(p, stage, &mut on_record),
        _ => Err(Error::InputFormat {
            stage,
            file: p.display().to_string(),
            record: "#1".into(),
            reason: "expected '@' (FASTQ) or '>' (FASTA) at the start of the file".into(),
        }),
    }
}

fn open_text(p: &Path) -> Result<Box<dyn BufRead>> {
    let fh = File::open(p).map_err(|e| Error::io(p, e))?;
    let mut reader = BufReader::new(fh);
    let gz = reader.fill_buf().map_err(|e| Error::io(p, e))?.starts_with(&GZIP_MAGIC);
    Ok(if gz { Box::new(BufReader::new(MultiGzDecoder::new(reader))) } else { Box::new(reader) })
}

fn read_fastq<F>(p: &Path, input: Box<dyn BufRead>, on_record: &mut F) -> Result<ReadCounts>
where
    F: FnMut(ReadRef<'_>) -> Result<()>,
{
    let mut reader = fastq::Reader::from_bufread(input);
    let mut record = fastq::Record::new();
    let mut header: Vec<u8> = Vec::new();
    let mut counts = ReadCounts::default();
    // consecutive lines without '@' belong to one damaged record
    let mut resyncing = false;

    loop {
        match reader.read(&mut record) {
            Ok(()) if record.is_empty() => break,
            Ok(()) => {
                resyncing = false;
                if let Err(reason) = record.check() {
                    counts.malformed += 1;
                    debug!("{}: skipping record #{}: {}", p.display(), counts.total(), reason);
                    continue;
                }
                header.clear();
                header.extend_from_slice(record.id().as_bytes());
                if let Some(desc) = record.desc() {
                    header.push(b' ');
                    header.extend_from_slice(desc.as_bytes());
                }
                on_record(ReadRef { id: &header, seq: record.seq(), qual: Some(record.qual()) })?;
                counts.records += 1;
            }
            Err(fastq::Error::ReadError(e)) => return Err(Error::io(p, e)),
            Err(fastq::Error::MissingAt) => {
                if !resyncing {
                    counts.malformed += 1;
                    debug!("{}: skipping record #{}: missing '@' header", p.display(), counts.total());
                }
                resyncing = true;
            }
            Err(e) => {
                resyncing = false;
                counts.malformed += 1;
                debug!("{}: skipping record #{}: {}", p.display(), counts.total(), e);
            }
        }
    }
    Ok(counts)
}

fn read_fasta<F>(p: &Path, stage: Stage, on_record: &mut F) -> Result<ReadCounts>
where
    F: FnMut(ReadRef<'_>) -> Result<()>,
{
    let mut reader = match parse_fastx_file(p) {
        Ok(r) => r,
        Err(e) if matches!(e.kind, ParseErrorKind::EmptyFile) => return Ok(ReadCounts::default()),
        Err(e) if matches!(e.kind, ParseErrorKind::Io) => return Err(Error::io(p, e)),
        Err(e) => return Err(format_error(stage, p, 1, e)),
    };

    let mut counts = ReadCounts::default();
    while let Some(record) = reader.next() {
        let rec = record.map_err(|e| format_error(stage, p, counts.records + 1, e))?;
        let seq = rec.seq();
        on_record(ReadRef { id: rec.id(), seq: &seq, qual: None })?;
        counts.records += 1;
    }
    Ok(counts)
}

fn format_error(stage: Stage, p: &Path, record: usize, e: needletail::errors::ParseError) -> Error {
    Error::InputFormat {
        stage,
        file: p.display().to_string(),
        record: format!("#{record}"),
        reason: e.to_string(),
    }
}

/// Write one four-line FASTQ record.
pub fn write_fastq_record<W: Write>(w: &mut W, id: &[u8], seq: &[u8], qual: &[u8]) -> std::io::Result<()> {
    w.write_all(b"@")?;
    w.write_all(id)?;
    w.write_all(b"\n")?;
    w.write_all(seq)?;
    w.write_all(b"\n+\n")?;
    w.write_all(qual)?;
    w.write_all(b"\n")?;
    Ok(())
}

enum Sink {
    Plain(BufWriter<File>),
    Gzip(GzEncoder<BufWriter<File>>),
}

/// FASTQ output stream, gzip-compressed when the path ends in `.gz`.
///
/// Call [`FastqWriter::finish`] to flush; dropping without it may lose the
/// gzip trailer.
pub struct FastqWriter {
    path: PathBuf,
    sink: Sink,
}

impl FastqWriter {
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let fh = File::create(&path).map_err(|e| Error::io(&path, e))?;
        let writer = BufWriter::new(fh);
        let gz = path.extension().map(|e| e.eq_ignore_ascii_case("gz")).unwrap_or(false);
        let sink = if gz { Sink::Gzip(GzEncoder::new(writer, Compression::default())) } else { Sink::Plain(writer) };
        Ok(Self { path, sink })
    }

    pub fn path(&self) -> &Path { &self.path }

    pub fn write(&mut self, id: &[u8], seq: &[u8], qual: &[u8]) -> Result<()> {
        let res = match &mut self.sink {
            Sink::Plain(w) => write_fastq_record(w, id, seq, qual),
            Sink::Gzip(w) => write_fastq_record(w, id, seq, qual),
        };
        res.map_err(|e| Error::io(&self.path, e))
    }

    pub fn finish(self) -> Result<()> {
        let path = self.path;
        let res = match self.sink {
            Sink::Plain(mut w) => w.flush(),
            Sink::Gzip(w) => w.finish().and_then(|mut inner| inner.flush()),
        };
        res.map_err(|e| Error::io(&path, e))
    }
}
