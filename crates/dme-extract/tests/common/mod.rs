//! Shared fixtures for dme-extract integration tests
//!
//! Builds small content databases shaped like the real ones: one table per
//! definition type, each `(id INTEGER PRIMARY KEY, json BLOB)`.

#![allow(dead_code)]

use dme_extract::config::{ExtractConfig, Topology};
use rusqlite::{params, Connection};
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Content directory and output root living in one temp dir
pub struct Workspace {
    pub temp: TempDir,
}

impl Workspace {
    pub fn new() -> Self {
        Self {
            temp: TempDir::new().expect("Failed to create temp dir"),
        }
    }

    pub fn content_dir(&self) -> PathBuf {
        self.temp.path().join("content")
    }

    pub fn output_dir(&self) -> PathBuf {
        self.temp.path().join("out")
    }

    pub fn config(&self, languages: &[&str], topology: Topology) -> ExtractConfig {
        ExtractConfig::builder()
            .content_dir(self.content_dir())
            .output_dir(self.output_dir())
            .languages(languages.iter().copied())
            .topology(topology)
            .write_limit(4)
            .build()
    }

    /// Create `<language>.content.sqlite` holding `rows` as
    /// `(table, id, json text)`.
    pub fn database(&self, language: &str, rows: &[(&str, i64, String)]) -> PathBuf {
        std::fs::create_dir_all(self.content_dir()).expect("Failed to create content dir");
        let path = self.content_dir().join(format!("{}.content.sqlite", language));
        let conn = Connection::open(&path).expect("Failed to create database");

        for (table, id, body) in rows {
            conn.execute(
                &format!(
                    "CREATE TABLE IF NOT EXISTS {} (id INTEGER PRIMARY KEY, json BLOB)",
                    table
                ),
                [],
            )
            .expect("Failed to create table");
            conn.execute(
                &format!("INSERT INTO {} (id, json) VALUES (?1, ?2)", table),
                params![id, body],
            )
            .expect("Failed to insert row");
        }

        path
    }
}

pub fn row(table: &'static str, id: i64, payload: Value) -> (&'static str, i64, String) {
    (table, id, payload.to_string())
}

pub fn bucket(hash: i64, name: Option<&str>) -> (&'static str, i64, String) {
    let mut payload = json!({"bucketHash": hash, "hash": hash});
    if let Some(name) = name {
        payload["bucketName"] = json!(name);
    }
    row("DestinyInventoryBucketDefinition", hash, payload)
}

pub fn item(hash: i64, bucket: i64, name: &str) -> (&'static str, i64, String) {
    row(
        "DestinyInventoryItemDefinition",
        hash,
        json!({"itemHash": hash, "bucketTypeHash": bucket, "itemName": name}),
    )
}

pub fn read_json(path: impl AsRef<Path>) -> Value {
    let path = path.as_ref();
    let bytes = std::fs::read(path)
        .unwrap_or_else(|e| panic!("Failed to read {}: {}", path.display(), e));
    serde_json::from_slice(&bytes).expect("Output is not valid JSON")
}
