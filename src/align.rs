//! Process boundary to the external short-read aligner.
//!
//! Every path is passed to the aligner explicitly; the working directory of
//! this process is never changed, so samples can be aligned concurrently.
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use log::{debug, info};

use crate::errors::{Error, Result};
use crate::layout::remove_stale;

/// An aligner that can index a reference and report one best hit per read.
pub trait Aligner: Send + Sync {
    fn name(&self) -> &str;

    /// Build an index for `fasta` at `index_prefix`.
    fn build_index(&self, fasta: &Path, index_prefix: &Path) -> Result<()>;

    /// Align `reads` for `sample` against `index_prefix`, writing the report to `output`.
    /// Returns only after the aligner has exited.
    fn align(&self, index_prefix: &Path, reads: &Path, output: &Path, sample: &str) -> Result<()>;
}

/// Bowtie (v1) invoked as `bowtie-build` / `bowtie`.
#[derive(Clone, Debug)]
pub struct Bowtie {
    pub build_bin: PathBuf,
    pub align_bin: PathBuf,
    pub threads: usize,
}

impl Default for Bowtie {
    fn default() -> Self {
        Self { build_bin: PathBuf::from("bowtie-build"), align_bin: PathBuf::from("bowtie"), threads: 1 }
    }
}

/// Options for unique best hits of short reads: report reads with a single
/// best alignment, at most one seed mismatch, seed length 17.
pub const BOWTIE_ALIGN_ARGS: [&str; 10] = ["-m", "1", "--best", "--strata", "-a", "--fullref", "-n", "1", "-l", "17"];

fn run(tool: &str, sample: &str, cmd: &mut Command) -> Result<Output> {
    debug!("exec: {:?}", cmd);
    let out = cmd.output().map_err(|e| Error::ExternalTool {
        tool: tool.to_string(),
        sample: sample.to_string(),
        reason: format!("failed to start: {e}"),
    })?;
    if !out.status.success() {
        let stderr = String::from_utf8_lossy(&out.stderr);
        let tail: Vec<&str> = stderr.lines().rev().take(5).collect();
        return Err(Error::ExternalTool {
            tool: tool.to_string(),
            sample: sample.to_string(),
            reason: format!(
                "exited with {}: {}",
                out.status,
                tail.into_iter().rev().collect::<Vec<_>>().join(" | ")
            ),
        });
    }
    Ok(out)
}

impl Aligner for Bowtie {
    fn name(&self) -> &str { "bowtie" }

    fn build_index(&self, fasta: &Path, index_prefix: &Path) -> Result<()> {
        info!("align: building index {} from {}", index_prefix.display(), fasta.display());
        run(
            "bowtie-build",
            "-",
            Command::new(&self.build_bin).arg("-q").arg(fasta).arg(index_prefix),
        )?;
        Ok(())
    }

    fn align(&self, index_prefix: &Path, reads: &Path, output: &Path, sample: &str) -> Result<()> {
        remove_stale(output)?;
        let out = run(
            "bowtie",
            sample,
            Command::new(&self.align_bin)
                .args(BOWTIE_ALIGN_ARGS)
                .arg("-p")
                .arg(self.threads.max(1).to_string())
                .arg(index_prefix)
                .arg(reads)
                .arg(output),
        )?;
        // bowtie prints its alignment summary on stderr
        for line in String::from_utf8_lossy(&out.stderr).lines() {
            info!("align: [{}] {}", sample, line.trim());
        }
        if !output.is_file() {
            return Err(Error::ExternalTool {
                tool: "bowtie".to_string(),
                sample: sample.to_string(),
                reason: format!("no report written to {}", output.display()),
            });
        }
        Ok(())
    }
}
