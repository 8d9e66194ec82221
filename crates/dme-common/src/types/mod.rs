//! Common types used across DME

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Bucket/file key used for entries whose table has no identity field, or
/// whose identity field could not be found in the payload.
pub const UNRESOLVED_IDENTITY_KEY: &str = "undefined";

/// Domain identity of a manifest entry (the "hash key").
///
/// Other entries reference this one by this value, unlike the SQLite row id
/// which is only stable within a single content database.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum IdentityKey {
    Integer(i64),
    Text(String),
}

impl IdentityKey {
    /// Interpret a payload value as an identity key.
    ///
    /// Only integers and strings qualify; anything else is treated as
    /// unaddressable.
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Number(n) => n.as_i64().map(IdentityKey::Integer),
            Value::String(s) => Some(IdentityKey::Text(s.clone())),
            _ => None,
        }
    }

    /// The JSON value this key was read from.
    pub fn to_value(&self) -> Value {
        match self {
            IdentityKey::Integer(n) => Value::from(*n),
            IdentityKey::Text(s) => Value::from(s.as_str()),
        }
    }

    /// Key under which an entry is filed, falling back to
    /// [`UNRESOLVED_IDENTITY_KEY`] when there is no identity.
    pub fn file_key(key: Option<&IdentityKey>) -> String {
        key.map_or_else(|| UNRESOLVED_IDENTITY_KEY.to_string(), ToString::to_string)
    }
}

impl std::fmt::Display for IdentityKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IdentityKey::Integer(n) => write!(f, "{}", n),
            IdentityKey::Text(s) => write!(f, "{}", s),
        }
    }
}

impl From<i64> for IdentityKey {
    fn from(value: i64) -> Self {
        IdentityKey::Integer(value)
    }
}

impl From<&str> for IdentityKey {
    fn from(value: &str) -> Self {
        IdentityKey::Text(value.to_string())
    }
}

/// A physical row as read from a content database, before decoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawRow {
    pub table: String,
    pub language: String,
    pub sql_row_id: i64,
    pub raw_payload: Vec<u8>,
}

/// A normalized row from a content database.
///
/// This is the unit handed to every sink. It is immutable once built; use
/// [`ManifestEntry::into_payload`] to take the body out.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ManifestEntry {
    table: String,
    language: String,
    sql_row_id: i64,
    identity_key: Option<IdentityKey>,
    payload: Value,
}

impl ManifestEntry {
    pub fn new(
        table: impl Into<String>,
        language: impl Into<String>,
        sql_row_id: i64,
        identity_key: Option<IdentityKey>,
        payload: Value,
    ) -> Self {
        Self {
            table: table.into(),
            language: language.into(),
            sql_row_id,
            identity_key,
            payload,
        }
    }

    /// Name of the source table
    pub fn table(&self) -> &str {
        &self.table
    }

    /// Language of the content database the row came from
    pub fn language(&self) -> &str {
        &self.language
    }

    /// Row id inside the source database
    pub fn sql_row_id(&self) -> i64 {
        self.sql_row_id
    }

    pub fn identity_key(&self) -> Option<&IdentityKey> {
        self.identity_key.as_ref()
    }

    /// Identity key rendered for use as a file name or bucket key
    pub fn file_key(&self) -> String {
        IdentityKey::file_key(self.identity_key.as_ref())
    }

    pub fn payload(&self) -> &Value {
        &self.payload
    }

    pub fn into_payload(self) -> Value {
        self.payload
    }
}
