//! JSON file output
//!
//! Write jobs, the [`JobWriter`] seam used by the scheduler and the
//! partition builder, and the filesystem implementation of it.

use async_trait::async_trait;
use dme_common::{ExtractError, Result};
use serde::Serialize;
use serde_json::Value;
use std::path::{Path, PathBuf};

/// One pending file write: a directory, a file name inside it, and a body.
#[derive(Debug, Clone, PartialEq)]
pub struct WriteJob {
    dir: PathBuf,
    file_name: String,
    body: Value,
}

impl WriteJob {
    pub fn new(dir: impl Into<PathBuf>, file_name: impl Into<String>, body: Value) -> Self {
        Self {
            dir: dir.into(),
            file_name: file_name.into(),
            body,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    pub fn body(&self) -> &Value {
        &self.body
    }

    /// Full destination path
    pub fn path(&self) -> PathBuf {
        self.dir.join(&self.file_name)
    }
}

/// A write that did not make it to disk.
#[derive(Debug)]
pub struct JobFailure {
    pub path: PathBuf,
    pub error: ExtractError,
}

/// Aggregated outcome of a batch of writes.
#[derive(Debug, Default)]
pub struct WriteSummary {
    pub written: usize,
    pub failures: Vec<JobFailure>,
}

impl WriteSummary {
    /// Total number of jobs that reached a terminal state
    pub fn total(&self) -> usize {
        self.written + self.failures.len()
    }

    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn record(&mut self, path: PathBuf, outcome: Result<()>) {
        match outcome {
            Ok(()) => self.written += 1,
            Err(error) => self.failures.push(JobFailure { path, error }),
        }
    }

    /// Turn a summary with failures into [`ExtractError::WritesFailed`].
    pub fn into_result(self) -> Result<usize> {
        if self.failures.is_empty() {
            Ok(self.written)
        } else {
            Err(ExtractError::WritesFailed {
                failed: self.failures.len(),
                total: self.total(),
            })
        }
    }
}

/// Performs the physical write of a job.
#[async_trait]
pub trait JobWriter: Send + Sync {
    async fn write(&self, job: &WriteJob) -> Result<()>;
}

/// Writes job bodies as pretty-printed JSON files, creating the
/// destination directory first.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonFileWriter;

#[async_trait]
impl JobWriter for JsonFileWriter {
    async fn write(&self, job: &WriteJob) -> Result<()> {
        save_json(job.body(), job.dir(), job.file_name()).await?;
        Ok(())
    }
}

/// Serialize `body` as pretty JSON to `dir/file_name`, creating `dir` first.
pub async fn save_json<T>(body: &T, dir: &Path, file_name: &str) -> Result<PathBuf>
where
    T: Serialize + ?Sized,
{
    validate_file_name(file_name)?;
    let bytes = serde_json::to_vec_pretty(body)?;

    tokio::fs::create_dir_all(dir).await?;
    let path = dir.join(file_name);
    tokio::fs::write(&path, bytes).await?;

    Ok(path)
}

/// Reject names that would escape the destination directory.
fn validate_file_name(file_name: &str) -> Result<()> {
    let stem = file_name.strip_suffix(".json").unwrap_or(file_name);
    if stem.is_empty()
        || stem == "."
        || stem == ".."
        || file_name.contains(['/', '\\', '\0'])
    {
        return Err(ExtractError::InvalidPath(file_name.to_string()));
    }
    Ok(())
}
