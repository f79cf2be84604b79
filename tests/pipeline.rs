use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use tempfile::TempDir;
use tnseq::align::Aligner;
use tnseq::errors::{Error, Result, SampleWarning, Stage};
use tnseq::pipeline::{run_experiment, ExperimentConfig, GenomeInput, ReadsInput};
use tnseq::seqio;

const CONTIG: &str = "chr1";

/// Deterministic pseudo-random genome.
fn genome(len: usize) -> String {
    let mut x: u64 = 0x9e37_79b9_7f4a_7c15;
    (0..len)
        .map(|_| {
            x ^= x << 13;
            x ^= x >> 7;
            x ^= x << 17;
            b"ACGT"[(x % 4) as usize] as char
        })
        .collect()
}

fn revcomp(s: &str) -> String {
    s.bytes()
        .rev()
        .map(|b| match b {
            b'A' => 'T',
            b'C' => 'G',
            b'G' => 'C',
            _ => 'A',
        })
        .collect()
}

/// Exact-match "aligner" writing bowtie-style reports.
struct FakeAligner {
    genome: String,
    fail_for: Option<&'static str>,
    /// Sample for which the aligner "succeeds" without writing a report.
    silent_for: Option<&'static str>,
}

impl Aligner for FakeAligner {
    fn name(&self) -> &str { "fake" }

    fn build_index(&self, _fasta: &Path, index_prefix: &Path) -> Result<()> {
        fs::write(index_prefix.with_extension("idx"), b"ok").map_err(|e| Error::io(index_prefix, e))
    }

    fn align(&self, index_prefix: &Path, reads: &Path, output: &Path, sample: &str) -> Result<()> {
        assert!(index_prefix.with_extension("idx").is_file());
        assert!(reads.is_absolute() && output.is_absolute());
        assert!(!output.exists(), "stale report at {}", output.display());
        if self.fail_for == Some(sample) {
            return Err(Error::ExternalTool { tool: "fake".into(), sample: sample.into(), reason: "boom".into() });
        }
        if self.silent_for == Some(sample) {
            return Ok(());
        }
        let mut out = fs::File::create(output).map_err(|e| Error::io(output, e))?;
        seqio::for_each_read(reads, Stage::Sites, |r| {
            let seq = String::from_utf8_lossy(r.seq).into_owned();
            let id = String::from_utf8_lossy(r.id).into_owned();
            let hit = match self.genome.find(&seq) {
                Some(off) => Some(('+', off, seq.clone())),
                None => self.genome.find(&revcomp(&seq)).map(|off| ('-', off, revcomp(&seq))),
            };
            if let Some((strand, off, s)) = hit {
                writeln!(out, "{id}\t{strand}\t{CONTIG}\t{off}\t{s}\t{}\t0\t", "I".repeat(s.len()))
                    .map_err(|e| Error::io(output, e))?;
            }
            Ok(())
        })?;
        Ok(())
    }
}

struct Fixture {
    tmp: TempDir,
    genome: String,
    cfg: ExperimentConfig,
}

fn write_fastq(path: &Path, seqs: &[String]) {
    let mut text = String::new();
    for (i, s) in seqs.iter().enumerate() {
        text.push_str(&format!("@read{i}\n{s}\n+\n{}\n", "F".repeat(s.len())));
    }
    fs::write(path, text).unwrap();
}

fn fixture() -> Fixture {
    let tmp = TempDir::new().unwrap();
    let g = genome(400);
    let p = |name: &str| -> PathBuf { tmp.path().join(name) };

    fs::write(p("samples.txt"), "# name barcode\nA\tACGT\nB\tTTTT\n").unwrap();
    fs::write(p("genome.fna"), format!(">{CONTIG}\n{g}\n")).unwrap();
    fs::write(
        p("genome.features.tsv"),
        format!("gene\tcontig\tstart\tend\tstrand\ng1\t{CONTIG}\t100\t200\t+\ng2\t{CONTIG}\t250\t350\t-\nempty\t{CONTIG}\t380\t390\t+\n"),
    )
    .unwrap();

    let reads = vec![
        format!("ACGT{}", &g[100..116]),          // A: g1 at 100
        format!("ACGT{}", &g[120..136]),          // A: g1 at 120
        format!("ACGT{}", &g[160..176]),          // A: outside the g1 half-window
        format!("TTTT{}", revcomp(&g[300..316])), // B: reverse hit -> 315, g2 window
        format!("GGGG{}", &g[10..26]),            // unassigned
    ];
    write_fastq(&p("pooled.fastq"), &reads);

    let mut cfg = ExperimentConfig::new(
        "my experiment",
        p("samples.txt"),
        ReadsInput::Pooled(p("pooled.fastq")),
        GenomeInput::Prepared { fasta: p("genome.fna"), features: p("genome.features.tsv") },
    );
    cfg.out_dir = tmp.path().join("out");
    cfg.disruption = 0.5;
    Fixture { tmp, genome: g, cfg }
}

#[test]
fn end_to_end_counts_per_gene_and_sample() {
    let f = fixture();
    let aligner = FakeAligner { genome: f.genome.clone(), fail_for: None, silent_for: None };
    let report = run_experiment(&f.cfg, &aligner).unwrap();

    assert_eq!(report.layout.name, "my_experiment");
    assert_eq!(report.demux.per_sample, vec![3, 1]);
    assert_eq!(report.demux.unassigned, 1);
    assert!(report.demux.is_conserved());

    let t = &report.table;
    assert_eq!(t.samples, vec!["A", "B"]);
    assert_eq!(t.numeric_columns(), 4);
    assert_eq!(t.rows.len(), 3);
    let g1 = t.row(CONTIG, "g1").unwrap();
    assert_eq!(g1.values[0].0, 2);
    assert!((g1.values[0].1 - 2.0 / 3.0 * 1_000_000.0).abs() < 1e-6);
    assert_eq!(g1.values[1], (0, 0.0));
    let g2 = t.row(CONTIG, "g2").unwrap();
    assert_eq!(g2.values[1], (1, 1_000_000.0));
    assert_eq!(t.row(CONTIG, "empty").unwrap().values, vec![(0, 0.0), (0, 0.0)]);

    // trimmed reads lost exactly the 4 barcode bases; temporary files are gone
    assert_eq!(report.summaries[0].trimmed_reads, 3);
    for s in ["A", "B"] {
        assert!(!report.layout.trimmed_path(s).exists());
        assert!(report.layout.sites_path(s).is_file());
        assert!(report.layout.sample_genes_path(s).is_file());
    }
    let report_a = fs::read_to_string(report.layout.alignment_path("A")).unwrap();
    assert!(report_a.lines().all(|l| l.split('\t').nth(4).unwrap().len() == 16));

    let table_text = fs::read_to_string(report.layout.gene_table_path()).unwrap();
    assert!(table_text.starts_with("gene\tcontig\tA_raw\tA_cpm\tB_raw\tB_cpm\n"));
    let summary = fs::read_to_string(report.layout.summary_path()).unwrap();
    assert!(summary.contains("A\tACGT\t3\t3\t0\t3\tok"));
    assert!(f.tmp.path().join("out/my_experiment/demux_stats.tsv").is_file());
}

#[test]
fn parallel_run_matches_sequential() {
    let f = fixture();
    let aligner = FakeAligner { genome: f.genome.clone(), fail_for: None, silent_for: None };
    let sequential = run_experiment(&f.cfg, &aligner).unwrap();
    let mut cfg = f.cfg.clone();
    cfg.threads = 4;
    let parallel = run_experiment(&cfg, &aligner).unwrap();
    assert_eq!(sequential.table, parallel.table);
    assert_eq!(sequential.summaries, parallel.summaries);
}

#[test]
fn failed_alignment_only_affects_that_sample() {
    let f = fixture();
    let aligner = FakeAligner { genome: f.genome.clone(), fail_for: Some("A"), silent_for: None };
    let report = run_experiment(&f.cfg, &aligner).unwrap();

    assert_eq!(report.failed_samples(), vec!["A"]);
    assert!(matches!(report.summaries[0].warnings[0], SampleWarning::AlignmentFailed(_)));
    assert!(!report.layout.trimmed_path("A").exists());
    let t = &report.table;
    assert_eq!(t.numeric_columns(), 4);
    assert_eq!(t.row(CONTIG, "g1").unwrap().values[0], (0, 0.0));
    assert_eq!(t.row(CONTIG, "g2").unwrap().values[1].0, 1);
}

#[test]
fn rerun_never_counts_a_previous_report() {
    let f = fixture();
    let first = run_experiment(&f.cfg, &FakeAligner { genome: f.genome.clone(), fail_for: None, silent_for: None }).unwrap();
    assert_eq!(first.table.row(CONTIG, "g1").unwrap().values[0].0, 2);
    assert!(first.layout.alignment_path("A").is_file());

    let aligner = FakeAligner { genome: f.genome.clone(), fail_for: None, silent_for: Some("A") };
    let second = run_experiment(&f.cfg, &aligner).unwrap();
    assert_eq!(second.failed_samples(), vec!["A"]);
    assert_eq!(second.table.row(CONTIG, "g1").unwrap().values[0], (0, 0.0));
    assert_eq!(second.table.row(CONTIG, "g2").unwrap().values[1].0, 1);
}

/// The fixture genome as a GenBank record with the same three genes.
fn genbank_record(genome: &str) -> String {
    let mut text = format!(
        "LOCUS       {CONTIG}                   {} bp    DNA     linear   BCT 01-JAN-2020\n\
         DEFINITION  Synthetic test chromosome.\n\
         ACCESSION   {CONTIG}\n\
         VERSION     {CONTIG}\n\
         FEATURES             Location/Qualifiers\n",
        genome.len()
    );
    for (range, tag) in [("101..200", "g1"), ("complement(251..350)", "g2"), ("381..390", "empty")] {
        text.push_str(&format!("     CDS             {range}\n                     /locus_tag=\"{tag}\"\n"));
    }
    text.push_str("ORIGIN\n");
    for (i, line) in genome.as_bytes().chunks(60).enumerate() {
        let groups: Vec<String> = line.chunks(10).map(|c| String::from_utf8_lossy(c).to_lowercase()).collect();
        text.push_str(&format!("{:>9} {}\n", i * 60 + 1, groups.join(" ")));
    }
    text.push_str("//\n");
    text
}

#[test]
fn genbank_genome_gives_the_same_table() {
    let f = fixture();
    let aligner = FakeAligner { genome: f.genome.clone(), fail_for: None, silent_for: None };
    let prepared = run_experiment(&f.cfg, &aligner).unwrap();

    let gbk = f.tmp.path().join("genome.gbk");
    fs::write(&gbk, genbank_record(&f.genome)).unwrap();
    let mut cfg = f.cfg.clone();
    cfg.genome = GenomeInput::GenBank(gbk);
    cfg.out_dir = f.tmp.path().join("out_gbk");
    let report = run_experiment(&cfg, &aligner).unwrap();

    assert_eq!(report.table, prepared.table);
    let fna = fs::read_to_string(report.layout.genome_fasta_path()).unwrap();
    assert_eq!(fna, format!(">{CONTIG}\n{}\n", f.genome));
    assert!(report.layout.genome_features_path().is_file());
}

#[test]
fn sample_without_reads_is_flagged() {
    let f = fixture();
    fs::write(&f.cfg.samples, "A\tACGT\nB\tTTTT\nC\tGCGC\n").unwrap();
    let aligner = FakeAligner { genome: f.genome.clone(), fail_for: None, silent_for: None };
    let report = run_experiment(&f.cfg, &aligner).unwrap();
    let c = &report.summaries[2];
    assert_eq!(c.name, "C");
    assert_eq!(c.warnings, vec![SampleWarning::NoAssignedReads, SampleWarning::NoMappedReads]);
    assert_eq!(report.table.numeric_columns(), 6);
}

#[test]
fn configuration_errors_stop_before_any_output() {
    let mut f = fixture();
    fs::write(&f.cfg.samples, "A\tACGT\nB\tACGT\n").unwrap();
    let aligner = FakeAligner { genome: f.genome.clone(), fail_for: None, silent_for: None };
    assert!(matches!(run_experiment(&f.cfg, &aligner), Err(Error::Configuration { .. })));
    assert!(!f.cfg.out_dir.exists());

    f.cfg.disruption = -0.5;
    assert!(matches!(run_experiment(&f.cfg, &aligner), Err(Error::Configuration { .. })));
}

#[test]
fn pre_demultiplexed_reads_skip_barcode_trimming() {
    let f = fixture();
    let reads_dir = f.tmp.path().join("by_sample");
    fs::create_dir(&reads_dir).unwrap();
    for (name, seqs) in [("A", vec![f.genome[100..116].to_string()]), ("B", vec![revcomp(&f.genome[300..316])])] {
        let mut w = seqio::FastqWriter::create(reads_dir.join(format!("{name}.fastq.gz"))).unwrap();
        for s in seqs {
            w.write(b"r", s.as_bytes(), &vec![b'F'; s.len()]).unwrap();
        }
        w.finish().unwrap();
    }
    fs::write(&f.cfg.samples, "A\nB\n").unwrap();
    let mut cfg = ExperimentConfig::new(
        "pre",
        f.cfg.samples.clone(),
        ReadsInput::Demultiplexed(reads_dir),
        f.cfg.genome.clone(),
    );
    cfg.out_dir = f.cfg.out_dir.clone();
    cfg.disruption = 0.5;
    let aligner = FakeAligner { genome: f.genome.clone(), fail_for: None, silent_for: None };
    let report = run_experiment(&cfg, &aligner).unwrap();
    assert_eq!(report.table.row(CONTIG, "g1").unwrap().values[0], (1, 1_000_000.0));
    assert_eq!(report.table.row(CONTIG, "g2").unwrap().values[1].0, 1);
}
