//! Extraction run driver
//!
//! Reads every requested language's content database, normalizes each row
//! and feeds the entries to the configured sink.

use crate::config::{ExtractConfig, Topology};
use crate::entry;
use crate::file_tree::FileTreeSink;
use crate::partition::PartitionBuilder;
use crate::source::ContentDatabase;
use crate::storage::{JobFailure, JsonFileWriter, WriteSummary};
use dme_common::types::{ManifestEntry, RawRow};
use dme_common::{ExtractError, Result};
use std::ops::ControlFlow;
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;
use tracing::{debug, info, instrument, warn};

/// Rows buffered between the database reader and the sink
const READ_CHANNEL_CAPACITY: usize = 1024;

/// Counters and outcomes of one [`run`].
#[derive(Debug, Default)]
pub struct RunSummary {
    pub languages: usize,
    pub rows_read: usize,
    pub entries: usize,
    pub malformed_rows: usize,
    pub files_written: usize,
    pub failures: Vec<JobFailure>,
    /// Written by the partition topology only
    pub index_path: Option<PathBuf>,
    /// Subdividable entries whose category did not resolve (partition only)
    pub unsubdivided: usize,
}

impl RunSummary {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    /// Number of files written, or [`ExtractError::WritesFailed`] if any
    /// write failed.
    pub fn into_result(self) -> Result<usize> {
        WriteSummary {
            written: self.files_written,
            failures: self.failures,
        }
        .into_result()
    }
}

/// The consumer of the entry stream for one run.
pub enum Sink {
    FileTree(FileTreeSink),
    Partition {
        builder: PartitionBuilder,
        write_limit: usize,
    },
}

/// What a sink produced once finished
#[derive(Debug, Default)]
pub struct SinkOutcome {
    pub writes: WriteSummary,
    pub index_path: Option<PathBuf>,
    pub unsubdivided: usize,
}

impl Sink {
    pub fn for_config(config: &ExtractConfig) -> Result<Self> {
        match config.topology {
            Topology::FileTree => Ok(Sink::FileTree(FileTreeSink::new(
                &config.output_dir,
                config.write_limit,
            )?)),
            Topology::Partition => Ok(Sink::Partition {
                builder: PartitionBuilder::new(&config.output_dir, config.partition.clone()),
                write_limit: config.write_limit,
            }),
        }
    }

    pub fn accept(&mut self, entry: ManifestEntry) {
        match self {
            Sink::FileTree(sink) => sink.accept(entry),
            Sink::Partition { builder, .. } => builder.ingest(entry),
        }
    }

    pub async fn finish(self) -> Result<SinkOutcome> {
        match self {
            Sink::FileTree(sink) => Ok(SinkOutcome {
                writes: sink.finish().await?,
                ..SinkOutcome::default()
            }),
            Sink::Partition {
                builder,
                write_limit,
            } => {
                let report = builder.flush(&JsonFileWriter, write_limit).await?;
                Ok(SinkOutcome {
                    writes: report.writes,
                    index_path: Some(report.index_path),
                    unsubdivided: report.unsubdivided,
                })
            },
        }
    }
}

/// Run a full extraction.
///
/// Missing content databases and an output root that cannot be created are
/// fatal. Malformed rows and failed writes are counted in the summary.
#[instrument(
    skip(config),
    fields(topology = %config.topology, output = %config.output_dir.display())
)]
pub async fn run(config: &ExtractConfig) -> Result<RunSummary> {
    config.validate()?;

    let databases = locate_databases(config)?;
    tokio::fs::create_dir_all(&config.output_dir)
        .await
        .map_err(|source| ExtractError::OutputRoot {
            path: config.output_dir.clone(),
            source,
        })?;

    let mut sink = Sink::for_config(config)?;
    let mut summary = RunSummary::default();

    for (language, path) in databases {
        ingest_database(language, path, &mut sink, &mut summary).await?;
        summary.languages += 1;
    }

    let outcome = sink.finish().await?;
    summary.files_written = outcome.writes.written;
    summary.failures = outcome.writes.failures;
    summary.index_path = outcome.index_path;
    summary.unsubdivided = outcome.unsubdivided;

    info!(
        languages = summary.languages,
        rows = summary.rows_read,
        entries = summary.entries,
        malformed = summary.malformed_rows,
        written = summary.files_written,
        failed = summary.failures.len(),
        "Extraction finished"
    );

    Ok(summary)
}

/// Check every requested language has a database before reading any.
fn locate_databases(config: &ExtractConfig) -> Result<Vec<(String, PathBuf)>> {
    config
        .languages
        .iter()
        .map(|language| {
            let path = config.database_path(language);
            if path.is_file() {
                Ok((language.clone(), path))
            } else {
                Err(ExtractError::LanguageNotFound {
                    language: language.clone(),
                    path,
                })
            }
        })
        .collect()
}

#[instrument(skip(path, sink, summary))]
async fn ingest_database(
    language: String,
    path: PathBuf,
    sink: &mut Sink,
    summary: &mut RunSummary,
) -> Result<()> {
    let (tx, mut rx) = mpsc::channel::<Result<RawRow>>(READ_CHANNEL_CAPACITY);

    let reader = tokio::task::spawn_blocking(move || read_database(&path, &language, &tx));

    while let Some(row) = rx.recv().await {
        summary.rows_read += 1;
        match row.and_then(entry::normalize) {
            Ok(entry) => {
                summary.entries += 1;
                sink.accept(entry);
            },
            Err(e) if e.is_local() => {
                summary.malformed_rows += 1;
                warn!(error = %e, "Skipping malformed row");
            },
            Err(e) => return Err(e),
        }
    }

    reader
        .await
        .map_err(|e| ExtractError::Runtime(format!("Database reader failed: {}", e)))?
}

/// Blocking side of [`ingest_database`]. A table that cannot be read is
/// logged and skipped.
fn read_database(
    path: &Path,
    language: &str,
    tx: &mpsc::Sender<Result<RawRow>>,
) -> Result<()> {
    let db = ContentDatabase::open(path, language)?;
    let tables = db.table_names()?;
    debug!(language, tables = tables.len(), "Reading content database");

    for table in tables {
        let mut receiver_gone = false;
        let outcome = db.read_table(&table, |row| {
            if tx.blocking_send(row).is_err() {
                receiver_gone = true;
                return ControlFlow::Break(());
            }
            ControlFlow::Continue(())
        });

        match outcome {
            Ok(rows) => debug!(language, table = %table, rows, "Table read"),
            Err(e) => warn!(language, table = %table, error = %e, "Skipping unreadable table"),
        }

        if receiver_gone {
            break;
        }
    }

    Ok(())
}
