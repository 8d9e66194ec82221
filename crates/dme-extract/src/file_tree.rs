//! One file per entry
//!
//! Every entry becomes `<root>/<language>/<table>/<identity>.json`, holding
//! the entry's payload. Writes go through a [`WriteScheduler`], so
//! [`FileTreeSink::accept`] returns immediately and [`FileTreeSink::finish`]
//! waits for the backlog to drain.

use crate::scheduler::WriteScheduler;
use crate::storage::{JobWriter, JsonFileWriter, WriteJob, WriteSummary};
use dme_common::types::ManifestEntry;
use dme_common::Result;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

pub struct FileTreeSink {
    root: PathBuf,
    scheduler: WriteScheduler,
}

impl FileTreeSink {
    /// Sink writing JSON files under `root`, at most `write_limit` at a time.
    pub fn new(root: impl Into<PathBuf>, write_limit: usize) -> Result<Self> {
        Self::with_writer(root, write_limit, Arc::new(JsonFileWriter))
    }

    pub fn with_writer(
        root: impl Into<PathBuf>,
        write_limit: usize,
        writer: Arc<dyn JobWriter>,
    ) -> Result<Self> {
        Ok(Self {
            root: root.into(),
            scheduler: WriteScheduler::new(write_limit, writer)?,
        })
    }

    /// Schedule the entry's file. Entries sharing a file key overwrite each
    /// other; whichever write lands last wins.
    pub fn accept(&self, entry: ManifestEntry) {
        self.scheduler.submit(job_for(&self.root, entry));
    }

    /// Wait for every scheduled write and report the outcomes.
    pub async fn finish(self) -> Result<WriteSummary> {
        let summary = self.scheduler.barrier().await?;
        info!(
            root = %self.root.display(),
            written = summary.written,
            failed = summary.failures.len(),
            "File tree written"
        );
        Ok(summary)
    }
}

/// Job placing `entry` at `<root>/<language>/<table>/<identity>.json`.
pub fn job_for(root: &Path, entry: ManifestEntry) -> WriteJob {
    let dir = root.join(entry.language()).join(entry.table());
    let file_name = format!("{}.json", entry.file_key());
    WriteJob::new(dir, file_name, entry.into_payload())
}
