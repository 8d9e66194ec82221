//! Extraction configuration
//!
//! Defaults, overridden by `DME_*` environment variables, overridden again
//! by command line flags in the binary.

use crate::scheduler::DEFAULT_WRITE_LIMIT;
use dme_common::{ExtractError, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

// ============================================================================
// Configuration Constants
// ============================================================================

/// Languages extracted when none are requested explicitly.
pub const DEFAULT_LANGUAGES: &[&str] = &["en", "fr", "es", "de", "it", "ja", "pt-br"];

pub const DEFAULT_CONTENT_DIR: &str = "./manifest-content";

pub const DEFAULT_OUTPUT_DIR: &str = "./manifest-json";

/// How entries are laid out on disk
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum Topology {
    /// One file per entry: `<root>/<language>/<table>/<identity>.json`
    #[default]
    FileTree,
    /// One file per table plus per-subtype item files and an index
    Partition,
}

impl std::str::FromStr for Topology {
    type Err = ExtractError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "file-tree" | "filetree" | "tree" => Ok(Topology::FileTree),
            "partition" | "plumbing" => Ok(Topology::Partition),
            _ => Err(ExtractError::config(format!("Unknown topology: {}", s))),
        }
    }
}

impl std::fmt::Display for Topology {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Topology::FileTree => write!(f, "file-tree"),
            Topology::Partition => write!(f, "partition"),
        }
    }
}

/// Which table gets split into per-category files, and how.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionLayout {
    /// Table whose entries are subdivided
    pub subdividable_table: String,

    /// Table whose entries define the categories
    pub category_table: String,

    /// Field on a subdividable entry holding its category identity
    pub category_field: String,

    /// Human readable name field on a category entry
    pub category_name_field: String,

    /// Field on a subdividable entry used as its key inside a subtype file
    pub subtype_key_field: String,
}

impl Default for PartitionLayout {
    fn default() -> Self {
        Self {
            subdividable_table: "DestinyInventoryItemDefinition".to_string(),
            category_table: "DestinyInventoryBucketDefinition".to_string(),
            category_field: "bucketTypeHash".to_string(),
            category_name_field: "bucketName".to_string(),
            subtype_key_field: "itemHash".to_string(),
        }
    }
}

impl PartitionLayout {
    fn validate(&self) -> Result<()> {
        let fields = [
            ("subdividable_table", &self.subdividable_table),
            ("category_table", &self.category_table),
            ("category_field", &self.category_field),
            ("category_name_field", &self.category_name_field),
            ("subtype_key_field", &self.subtype_key_field),
        ];

        match fields.iter().find(|(_, value)| value.is_empty()) {
            Some((name, _)) => Err(ExtractError::config(format!("partition {} is empty", name))),
            None => Ok(()),
        }
    }
}

/// Settings for one extraction run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractConfig {
    /// Directory holding `<language>.content.sqlite` databases
    pub content_dir: PathBuf,

    /// Root of the output tree
    pub output_dir: PathBuf,

    /// Languages to extract
    pub languages: Vec<String>,

    pub topology: Topology,

    /// Maximum number of concurrent file writes
    pub write_limit: usize,

    #[serde(default)]
    pub partition: PartitionLayout,
}

impl Default for ExtractConfig {
    fn default() -> Self {
        Self {
            content_dir: PathBuf::from(DEFAULT_CONTENT_DIR),
            output_dir: PathBuf::from(DEFAULT_OUTPUT_DIR),
            languages: DEFAULT_LANGUAGES.iter().map(ToString::to_string).collect(),
            topology: Topology::default(),
            write_limit: DEFAULT_WRITE_LIMIT,
            partition: PartitionLayout::default(),
        }
    }
}

impl ExtractConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load configuration from environment variables
    ///
    /// - `DME_CONTENT_DIR`: directory holding the content databases
    /// - `DME_OUTPUT_DIR`: output root
    /// - `DME_LANGUAGES`: comma separated language codes
    /// - `DME_WRITE_LIMIT`: maximum concurrent writes
    /// - `DME_TOPOLOGY`: `file-tree` or `partition`
    pub fn from_env() -> Result<Self> {
        Self::default().merge_env()
    }

    /// Override fields of `self` with any `DME_*` variables that are set.
    pub fn merge_env(mut self) -> Result<Self> {
        if let Ok(dir) = std::env::var("DME_CONTENT_DIR") {
            self.content_dir = PathBuf::from(dir);
        }

        if let Ok(dir) = std::env::var("DME_OUTPUT_DIR") {
            self.output_dir = PathBuf::from(dir);
        }

        if let Ok(languages) = std::env::var("DME_LANGUAGES") {
            self.languages = parse_languages(&languages);
        }

        if let Ok(limit) = std::env::var("DME_WRITE_LIMIT") {
            self.write_limit = limit.parse().map_err(|e| {
                ExtractError::config(format!("Invalid DME_WRITE_LIMIT '{}': {}", limit, e))
            })?;
        }

        if let Ok(topology) = std::env::var("DME_TOPOLOGY") {
            self.topology = topology.parse()?;
        }

        Ok(self)
    }

    /// Create a builder for fluent configuration
    pub fn builder() -> ExtractConfigBuilder {
        ExtractConfigBuilder::default()
    }

    /// Location of the content database for `language`
    pub fn database_path(&self, language: &str) -> PathBuf {
        self.content_dir.join(format!("{}.content.sqlite", language))
    }

    pub fn validate(&self) -> Result<()> {
        if self.write_limit == 0 {
            return Err(ExtractError::config("write limit must be at least 1"));
        }
        if self.languages.is_empty() {
            return Err(ExtractError::config("no languages requested"));
        }
        self.partition.validate()
    }
}

/// Split a comma separated language list, dropping blanks.
pub fn parse_languages(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|lang| !lang.is_empty())
        .map(ToString::to_string)
        .collect()
}

/// Builder for ExtractConfig
#[derive(Default)]
pub struct ExtractConfigBuilder {
    config: ExtractConfig,
}

impl ExtractConfigBuilder {
    pub fn content_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.content_dir = dir.into();
        self
    }

    pub fn output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.output_dir = dir.into();
        self
    }

    pub fn languages<I, S>(mut self, languages: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.languages = languages.into_iter().map(Into::into).collect();
        self
    }

    pub fn topology(mut self, topology: Topology) -> Self {
        self.config.topology = topology;
        self
    }

    pub fn write_limit(mut self, limit: usize) -> Self {
        self.config.write_limit = limit;
        self
    }

    pub fn partition(mut self, layout: PartitionLayout) -> Self {
        self.config.partition = layout;
        self
    }

    pub fn build(self) -> ExtractConfig {
        self.config
    }
}
