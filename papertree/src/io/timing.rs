//! Append-only wall-clock timing logs (`task-id, seconds` rows).

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use tracing::debug;

#[derive(Debug, Clone)]
pub struct TimingLog {
    path: PathBuf,
}

impl TimingLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn record(&self, task_id: &str, elapsed: Duration) -> Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("open timing log {}", self.path.display()))?;
        writeln!(file, "{}, {:.2}", task_id, elapsed.as_secs_f64())
            .with_context(|| format!("append timing log {}", self.path.display()))?;
        debug!(task_id, secs = elapsed.as_secs_f64(), "timing recorded");
        Ok(())
    }

    /// Run `f`, recording its latency only when it succeeds.
    pub fn time<T>(&self, task_id: &str, f: impl FnOnce() -> Result<T>) -> Result<T> {
        let start = Instant::now();
        let value = f()?;
        self.record(task_id, start.elapsed())?;
        Ok(value)
    }
}
