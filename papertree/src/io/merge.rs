//! Concatenate generated text files into one output file.

use std::fs::{self, File};
use std::io::{BufWriter, ErrorKind, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{debug, instrument, warn};

/// Which files to merge, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeSources {
    List(Vec<String>),
    /// `{prefix}0.txt` through `{prefix}{count-1}.txt`.
    Prefixed { prefix: String, count: usize },
}

impl MergeSources {
    pub fn prefixed(prefix: impl Into<String>, count: usize) -> Self {
        MergeSources::Prefixed {
            prefix: prefix.into(),
            count,
        }
    }

    pub fn file_names(&self) -> Vec<String> {
        match self {
            MergeSources::List(names) => names.clone(),
            MergeSources::Prefixed { prefix, count } => {
                (0..*count).map(|i| format!("{prefix}{i}.txt")).collect()
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeReport {
    pub output_path: PathBuf,
    pub merged: Vec<String>,
    pub missing: Vec<PathBuf>,
}

/// Write each source's content followed by a newline to `dir/output`.
///
/// The output is truncated first. Missing sources are logged and skipped.
#[instrument(skip_all, fields(dir = %dir.display(), output = output))]
pub fn merge_files(dir: &Path, output: &str, sources: &MergeSources) -> Result<MergeReport> {
    let output_path = dir.join(output);
    let file = File::create(&output_path)
        .with_context(|| format!("create merge output {}", output_path.display()))?;
    let mut writer = BufWriter::new(file);
    let mut merged = Vec::new();
    let mut missing = Vec::new();

    for name in sources.file_names() {
        let path = dir.join(&name);
        let contents = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                warn!(path = %path.display(), "file not found, skipping");
                missing.push(path);
                continue;
            }
            Err(err) => return Err(err).with_context(|| format!("read {}", path.display())),
        };
        writer
            .write_all(&contents)
            .and_then(|()| writer.write_all(b"\n"))
            .with_context(|| format!("write {}", output_path.display()))?;
        merged.push(name);
    }

    writer
        .flush()
        .with_context(|| format!("flush {}", output_path.display()))?;
    debug!(merged = merged.len(), missing = missing.len(), "merge complete");
    Ok(MergeReport {
        output_path,
        merged,
        missing,
    })
}
