//! Per-table partition output
//!
//! [`PartitionBuilder`] collects every entry in memory, one bucket per
//! `(language, table)`, and on [`PartitionBuilder::flush`] writes:
//!
//! - `<root>/<language>/<table>.json` for every table,
//! - `<root>/<language>/items/<Subtype>.json` for the subdividable table,
//!   split by the display name of each entry's category,
//! - `<root>/index.json` listing where each of those files went.
//!
//! Index paths are relative to the output root and `/` separated
//! (`en/items/Ghost.json`), not prefixed with the root they were written
//! under, so an output tree stays valid after it is moved.
//!
//! Categories come from another table in the same stream, so subdivision
//! only happens in `flush`, after every entry has been ingested. `flush`
//! consumes the builder so nothing can be ingested afterwards.

use crate::config::PartitionLayout;
use crate::storage::{save_json, JobWriter, WriteJob, WriteSummary};
use convert_case::{Case, Casing};
use dme_common::types::{IdentityKey, ManifestEntry};
use dme_common::Result;
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use tracing::{debug, info, instrument, warn};

/// Directory (and index section) holding the subdivided tables.
pub const ITEMS_DIR: &str = "items";

pub const INDEX_FILE: &str = "index.json";

/// Entries of one output file, keyed by identity.
pub type TableBucket = Map<String, Value>;

/// Identifies one output file.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum BucketId {
    Raw { language: String, table: String },
    Subtype { language: String, subtype: String },
}

impl BucketId {
    pub fn language(&self) -> &str {
        match self {
            BucketId::Raw { language, .. } | BucketId::Subtype { language, .. } => language,
        }
    }

    /// Path of the bucket's file relative to the output root, `/` separated.
    pub fn relative_path(&self) -> String {
        match self {
            BucketId::Raw { language, table } => format!("{}/{}.json", language, table),
            BucketId::Subtype { language, subtype } => {
                format!("{}/{}/{}.json", language, ITEMS_DIR, subtype)
            },
        }
    }

    fn write_job(&self, root: &Path, entries: TableBucket) -> WriteJob {
        let (dir, name) = match self {
            BucketId::Raw { language, table } => (root.join(language), table),
            BucketId::Subtype { language, subtype } => {
                (root.join(language).join(ITEMS_DIR), subtype)
            },
        };
        WriteJob::new(dir, format!("{}.json", name), Value::Object(entries))
    }
}

/// Where each output file of a run landed, per language.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IndexDocument {
    languages: BTreeMap<String, LanguageIndex>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LanguageIndex {
    /// table name -> path
    pub raw: BTreeMap<String, String>,
    /// subtype name -> path
    pub items: BTreeMap<String, String>,
}

impl IndexDocument {
    pub fn record(&mut self, bucket: &BucketId) {
        let section = self.languages.entry(bucket.language().to_string()).or_default();
        match bucket {
            BucketId::Raw { table, .. } => {
                section.raw.insert(table.clone(), bucket.relative_path());
            },
            BucketId::Subtype { subtype, .. } => {
                section.items.insert(subtype.clone(), bucket.relative_path());
            },
        }
    }

    pub fn language(&self, language: &str) -> Option<&LanguageIndex> {
        self.languages.get(language)
    }

    /// Every recorded path
    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.languages
            .values()
            .flat_map(|section| section.raw.values().chain(section.items.values()))
            .map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.paths().count()
    }

    pub fn is_empty(&self) -> bool {
        self.languages.is_empty()
    }
}

/// Bucket contents ready to be written, in bucket order.
#[derive(Debug, Clone, PartialEq)]
pub struct PartitionPlan {
    pub root: PathBuf,
    pub buckets: BTreeMap<BucketId, TableBucket>,
    /// Subdividable entries left out of every subtype bucket
    pub unsubdivided: usize,
}

/// Result of [`PartitionBuilder::flush`]
#[derive(Debug)]
pub struct FlushReport {
    pub index: IndexDocument,
    pub index_path: PathBuf,
    pub writes: WriteSummary,
    pub unsubdivided: usize,
}

/// Normalize a category display name into a subtype (file) name.
///
/// `"Primary Weapons"` becomes `"PrimaryWeapons"`. Punctuation separates
/// words and is dropped.
pub fn subtype_name(display_name: &str) -> String {
    let words: String = display_name
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect();
    words.to_case(Case::Pascal)
}

pub struct PartitionBuilder {
    root: PathBuf,
    layout: PartitionLayout,
    raw: BTreeMap<BucketId, TableBucket>,
    /// (language, category identity) -> subtype name
    categories: HashMap<(String, IdentityKey), String>,
}

impl PartitionBuilder {
    pub fn new(root: impl Into<PathBuf>, layout: PartitionLayout) -> Self {
        Self {
            root: root.into(),
            layout,
            raw: BTreeMap::new(),
            categories: HashMap::new(),
        }
    }

    /// Number of raw table buckets collected so far
    pub fn bucket_count(&self) -> usize {
        self.raw.len()
    }

    /// Add an entry. A later entry with the same identity in the same
    /// `(language, table)` replaces the earlier one.
    pub fn ingest(&mut self, entry: ManifestEntry) {
        if entry.table() == self.layout.category_table {
            self.record_category(&entry);
        }

        let bucket = BucketId::Raw {
            language: entry.language().to_string(),
            table: entry.table().to_string(),
        };
        let key = entry.file_key();
        self.raw.entry(bucket).or_default().insert(key, entry.into_payload());
    }

    fn record_category(&mut self, entry: &ManifestEntry) {
        let Some(category) = entry.identity_key() else {
            debug!(row = entry.sql_row_id(), "Category entry without identity ignored");
            return;
        };

        let name = entry
            .payload()
            .get(&self.layout.category_name_field)
            .and_then(Value::as_str)
            .map(subtype_name)
            .filter(|name| !name.is_empty());

        match name {
            Some(name) => {
                self.categories
                    .insert((entry.language().to_string(), category.clone()), name);
            },
            None => debug!(
                category = %category,
                language = entry.language(),
                "Category has no display name; its entries will not be subdivided"
            ),
        }
    }

    /// Split the subdividable table into subtype buckets.
    fn subdivide(&self) -> (BTreeMap<BucketId, TableBucket>, usize) {
        let mut subtypes: BTreeMap<BucketId, TableBucket> = BTreeMap::new();
        let mut skipped = 0;

        let sources = self.raw.iter().filter_map(|(bucket, entries)| match bucket {
            BucketId::Raw { language, table } if *table == self.layout.subdividable_table => {
                Some((language, entries))
            },
            _ => None,
        });

        for (language, entries) in sources {
            for payload in entries.values() {
                let subtype = payload
                    .get(&self.layout.category_field)
                    .and_then(IdentityKey::from_value)
                    .and_then(|category| self.categories.get(&(language.clone(), category)));

                let Some(subtype) = subtype else {
                    skipped += 1;
                    continue;
                };

                let key = payload
                    .get(&self.layout.subtype_key_field)
                    .and_then(IdentityKey::from_value);

                subtypes
                    .entry(BucketId::Subtype {
                        language: language.clone(),
                        subtype: subtype.clone(),
                    })
                    .or_default()
                    .insert(IdentityKey::file_key(key.as_ref()), payload.clone());
            }
        }

        (subtypes, skipped)
    }

    /// Finish ingestion and compute every bucket's final contents.
    pub fn plan(self) -> PartitionPlan {
        let (subtypes, unsubdivided) = self.subdivide();
        if unsubdivided > 0 {
            info!(
                count = unsubdivided,
                table = %self.layout.subdividable_table,
                "Entries without a resolvable category were not subdivided"
            );
        }

        let mut buckets = self.raw;
        buckets.extend(subtypes);

        PartitionPlan {
            root: self.root,
            buckets,
            unsubdivided,
        }
    }

    /// Subdivide, write every bucket, then write the index.
    ///
    /// Bucket writes run up to `concurrency` at a time; a failed bucket is
    /// reported in [`FlushReport::writes`] and left out of the index. Failing
    /// to write the index itself is an error.
    #[instrument(skip_all, fields(root = %self.root.display()))]
    pub async fn flush(self, writer: &dyn JobWriter, concurrency: usize) -> Result<FlushReport> {
        let plan = self.plan();
        let root = plan.root;

        let jobs: Vec<(BucketId, WriteJob)> = plan
            .buckets
            .into_iter()
            .map(|(bucket, entries)| {
                let job = bucket.write_job(&root, entries);
                (bucket, job)
            })
            .collect();

        info!(buckets = jobs.len(), "Writing partition buckets");

        let outcomes: Vec<(BucketId, PathBuf, Result<()>)> = stream::iter(jobs)
            .map(|(bucket, job)| async move {
                let outcome = writer.write(&job).await;
                (bucket, job.path(), outcome)
            })
            .buffer_unordered(concurrency.max(1))
            .collect()
            .await;

        let mut index = IndexDocument::default();
        let mut writes = WriteSummary::default();
        for (bucket, path, outcome) in outcomes {
            match &outcome {
                Ok(()) => index.record(&bucket),
                Err(e) => warn!(path = %path.display(), error = %e, "Bucket write failed"),
            }
            writes.record(path, outcome);
        }

        let index_path = save_json(&index, &root, INDEX_FILE).await?;
        info!(
            written = writes.written,
            failed = writes.failures.len(),
            indexed = index.len(),
            index = %index_path.display(),
            "Partition flushed"
        );

        Ok(FlushReport {
            index,
            index_path,
            writes,
            unsubdivided: plan.unsubdivided,
        })
    }
}
