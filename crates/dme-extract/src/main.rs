//! DME Extract - Destiny manifest to JSON extraction tool

use anyhow::Result;
use clap::{Parser, Subcommand};
use dme_common::logging::{init_logging, LogConfig, LogLevel};
use dme_extract::config::{ExtractConfig, Topology};
use dme_extract::pipeline;
use std::path::PathBuf;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "dme-extract")]
#[command(author, version, about = "Extract Destiny content databases into JSON files")]
struct Cli {
    /// Output layout
    #[command(subcommand)]
    topology: TopologyCommand,

    /// Directory holding <language>.content.sqlite files
    #[arg(long, global = true, env = "DME_CONTENT_DIR")]
    content_dir: Option<PathBuf>,

    /// Output root directory
    #[arg(short, long, global = true, env = "DME_OUTPUT_DIR")]
    output: Option<PathBuf>,

    /// Language to extract (repeatable; defaults to every language)
    #[arg(short, long = "lang", global = true)]
    languages: Vec<String>,

    /// Maximum number of concurrent file writes
    #[arg(long, global = true, env = "DME_WRITE_LIMIT")]
    write_limit: Option<usize>,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum TopologyCommand {
    /// One file per entry: <output>/<language>/<table>/<identity>.json
    FileTree,

    /// One file per table, items split by bucket, plus index.json
    Partition,
}

impl From<&TopologyCommand> for Topology {
    fn from(command: &TopologyCommand) -> Self {
        match command {
            TopologyCommand::FileTree => Topology::FileTree,
            TopologyCommand::Partition => Topology::Partition,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let log_level = if cli.verbose {
        LogLevel::Debug
    } else {
        LogLevel::Info
    };

    let log_config = LogConfig::builder()
        .level(log_level)
        .log_file_prefix("dme-extract")
        .build()
        .merge_env()?;

    let _log_guard = init_logging(&log_config)?;

    let mut config = ExtractConfig::from_env()?;
    config.topology = Topology::from(&cli.topology);
    if let Some(dir) = cli.content_dir {
        config.content_dir = dir;
    }
    if let Some(dir) = cli.output {
        config.output_dir = dir;
    }
    if !cli.languages.is_empty() {
        config.languages = cli.languages;
    }
    if let Some(limit) = cli.write_limit {
        config.write_limit = limit;
    }

    info!(
        topology = %config.topology,
        languages = ?config.languages,
        output = %config.output_dir.display(),
        "Starting extraction"
    );

    let summary = pipeline::run(&config).await?;

    if let Some(index) = &summary.index_path {
        info!(index = %index.display(), "Index written");
    }

    for failure in &summary.failures {
        error!(path = %failure.path.display(), error = %failure.error, "Write failed");
    }

    let written = summary.into_result()?;
    info!(files = written, "Extraction complete");
    Ok(())
}
