//! Row normalization
//!
//! Turns raw content-database rows into [`ManifestEntry`] values.

use crate::identity;
use dme_common::types::{ManifestEntry, RawRow};
use dme_common::{ExtractError, Result};
use serde_json::Value;
use tracing::trace;

/// Decode a raw row and resolve its identity.
///
/// A payload that is not valid JSON fails this row only.
pub fn normalize(row: RawRow) -> Result<ManifestEntry> {
    if row.table.is_empty() {
        return Err(ExtractError::malformed(row.table, row.sql_row_id, "empty table name"));
    }

    let payload: Value = serde_json::from_slice(&row.raw_payload)
        .map_err(|e| ExtractError::malformed(&row.table, row.sql_row_id, e))?;

    Ok(from_payload(row.table, row.language, row.sql_row_id, payload))
}

/// Build an entry from an already decoded payload.
pub fn from_payload(
    table: impl Into<String>,
    language: impl Into<String>,
    sql_row_id: i64,
    payload: Value,
) -> ManifestEntry {
    let table = table.into();
    let identity_key = identity::resolve(&table, &payload);
    if identity_key.is_none() {
        trace!(table = %table, row = sql_row_id, "Entry has no identity key");
    }

    ManifestEntry::new(table, language, sql_row_id, identity_key, payload)
}
