//! DME Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared types, logging, and error handling for the DME workspace.
//!
//! # Overview
//!
//! - **Error Handling**: [`ExtractError`] and the [`Result`] alias
//! - **Logging**: tracing subscriber setup driven by [`logging::LogConfig`]
//! - **Types**: manifest entries, raw rows and identity keys
//!
//! # Example
//!
//! ```no_run
//! use dme_common::types::{IdentityKey, ManifestEntry};
//! use serde_json::json;
//!
//! let entry = ManifestEntry::new(
//!     "DestinyClassDefinition",
//!     "en",
//!     1,
//!     Some(IdentityKey::from(10)),
//!     json!({"classHash": 10, "name": "Titan"}),
//! );
//! assert_eq!(entry.file_key(), "10");
//! ```

pub mod error;
pub mod logging;
pub mod types;

// Re-export commonly used types
pub use error::{ExtractError, Result};
