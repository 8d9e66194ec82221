//! DME Extract Library
//!
//! Turns per-language Destiny content databases into JSON files.
//!
//! Every row is decoded into a [`ManifestEntry`](dme_common::types::ManifestEntry)
//! carrying its identity key, then handed to one of two sinks:
//!
//! - **File tree**: one file per entry, written through a bounded
//!   [`WriteScheduler`](scheduler::WriteScheduler).
//! - **Partition**: one file per table, the item table split by inventory
//!   bucket, and an `index.json` of every file written.
//!
//! # Example
//!
//! ```no_run
//! use dme_extract::config::{ExtractConfig, Topology};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = ExtractConfig::builder()
//!         .content_dir("./manifest-content")
//!         .languages(["en"])
//!         .topology(Topology::Partition)
//!         .build();
//!
//!     let summary = dme_extract::pipeline::run(&config).await?;
//!     println!("{} files written", summary.files_written);
//!     Ok(())
//! }
//! ```

#![deny(clippy::unwrap_used, clippy::expect_used)]

pub mod config;
pub mod entry;
pub mod file_tree;
pub mod identity;
pub mod partition;
pub mod pipeline;
pub mod scheduler;
pub mod source;
pub mod storage;
