//! Run summary records.
//!
//! `processing_summary.json` is rewritten after every completion, so a
//! crash mid-run still leaves a valid partial document on disk.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::BatchError;

pub const SUMMARY_FILE: &str = "processing_summary.json";

/// Terminal classification of one attempted tilt series.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Succeeded,
    Failed,
    TimedOut,
    Skipped,
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        let text = match self {
            Outcome::Succeeded => "succeeded",
            Outcome::Failed => "failed",
            Outcome::TimedOut => "timed out",
            Outcome::Skipped => "skipped",
        };
        write!(f, "{}", text)
    }
}

/// Record of one AreTomo2 invocation (or skip) for one tilt series.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobResult {
    pub name: String,
    pub device: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub outcome: Outcome,
    pub log: PathBuf,
}

/// Aggregate outcome of one `align` run, keyed by series name.
#[derive(Debug, Serialize, Deserialize)]
pub struct RunSummary {
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub timed_out: usize,
    pub skipped: usize,
    /// The command line that produced this run.
    pub invocation: Vec<String>,
    /// In completion order; consumers must key on `name`, not position.
    pub results: Vec<JobResult>,
}

impl RunSummary {
    pub fn new(total: usize) -> Self {
        Self {
            started_at: Utc::now(),
            finished_at: None,
            total,
            succeeded: 0,
            failed: 0,
            timed_out: 0,
            skipped: 0,
            invocation: std::env::args().collect(),
            results: vec![],
        }
    }

    pub fn push(&mut self, result: JobResult) {
        match result.outcome {
            Outcome::Succeeded => self.succeeded += 1,
            Outcome::Failed => self.failed += 1,
            Outcome::TimedOut => self.timed_out += 1,
            Outcome::Skipped => self.skipped += 1,
        }
        self.results.push(result);
    }

    pub fn finalize(&mut self) {
        self.finished_at = Some(Utc::now());
    }

    /// True when every attempted series failed (timeouts included).
    /// This is the only per-series condition that flips the exit code.
    pub fn all_failed(&self) -> bool {
        !self.results.is_empty() && self.failed + self.timed_out == self.results.len()
    }

    pub fn write(&self, path: &Path) -> Result<(), BatchError> {
        write_json(self, path)
    }
}

/// Serializes `value` to `path` through a temporary file and rename, so a
/// torn write can never clobber the previous checkpoint.
pub fn write_json<T: Serialize>(value: &T, path: &Path) -> Result<(), BatchError> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    fs::write(&tmp, serde_json::to_vec_pretty(value)?)?;
    fs::rename(&tmp, path)?;
    Ok(())
}
