//! Content database reader
//!
//! Each language ships as one SQLite file holding one table per definition
//! type, every table shaped `(id INTEGER, json BLOB)`. Reading is
//! synchronous; the pipeline runs it on a blocking thread.

use dme_common::types::RawRow;
use dme_common::{ExtractError, Result};
use rusqlite::types::ValueRef;
use rusqlite::{Connection, OpenFlags};
use std::ops::ControlFlow;
use std::path::{Path, PathBuf};
use tracing::{debug, instrument};

pub struct ContentDatabase {
    conn: Connection,
    path: PathBuf,
    language: String,
}

impl ContentDatabase {
    /// Open `path` read-only as the content database for `language`.
    pub fn open(path: impl AsRef<Path>, language: impl Into<String>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let language = language.into();

        if !path.is_file() {
            return Err(ExtractError::LanguageNotFound { language, path });
        }

        let conn = Connection::open_with_flags(
            &path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .map_err(|e| {
            ExtractError::database(format!("Failed to open {}: {}", path.display(), e))
        })?;

        debug!(path = %path.display(), language = %language, "Opened content database");
        Ok(Self {
            conn,
            path,
            language,
        })
    }

    /// Names of every user table, sorted.
    pub fn table_names(&self) -> Result<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT name FROM sqlite_master \
                 WHERE type = 'table' AND name NOT LIKE 'sqlite_%' \
                 ORDER BY name",
            )
            .map_err(|e| self.error("list tables", e))?;

        let names = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .map_err(|e| self.error("list tables", e))?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| self.error("list tables", e))?;

        Ok(names)
    }

    /// Stream every row of `table` into `on_row`.
    ///
    /// A row whose id or json column has the wrong type is passed on as a
    /// [`ExtractError::MalformedPayload`]; the rest of the table is still
    /// read. Errors from the query itself fail the whole table. Returning
    /// [`ControlFlow::Break`] from `on_row` stops early. Returns the number
    /// of rows handed to `on_row`.
    #[instrument(skip(self, on_row), fields(language = %self.language))]
    pub fn read_table<F>(&self, table: &str, mut on_row: F) -> Result<usize>
    where
        F: FnMut(Result<RawRow>) -> ControlFlow<()>,
    {
        let sql = format!("SELECT id, json FROM {}", quote_identifier(table));
        let mut stmt = self
            .conn
            .prepare(&sql)
            .map_err(|e| self.error(&format!("read table {}", table), e))?;
        let mut rows = stmt
            .query([])
            .map_err(|e| self.error(&format!("read table {}", table), e))?;

        let mut count = 0;
        while let Some(row) = rows
            .next()
            .map_err(|e| self.error(&format!("read table {}", table), e))?
        {
            count += 1;
            if on_row(self.decode_row(table, row)).is_break() {
                debug!(table, rows = count, "Table read stopped early");
                break;
            }
        }

        Ok(count)
    }

    fn decode_row(&self, table: &str, row: &rusqlite::Row<'_>) -> Result<RawRow> {
        let sql_row_id = match row.get_ref(0) {
            Ok(ValueRef::Integer(id)) => id,
            Ok(other) => {
                return Err(ExtractError::malformed(
                    table,
                    -1,
                    format!("id column has type {}", other.data_type()),
                ))
            },
            Err(e) => return Err(ExtractError::malformed(table, -1, e)),
        };

        let raw_payload = match row.get_ref(1) {
            Ok(ValueRef::Text(bytes)) | Ok(ValueRef::Blob(bytes)) => bytes.to_vec(),
            Ok(other) => {
                return Err(ExtractError::malformed(
                    table,
                    sql_row_id,
                    format!("json column has type {}", other.data_type()),
                ))
            },
            Err(e) => return Err(ExtractError::malformed(table, sql_row_id, e)),
        };

        Ok(RawRow {
            table: table.to_string(),
            language: self.language.clone(),
            sql_row_id,
            raw_payload,
        })
    }

    fn error(&self, action: &str, e: rusqlite::Error) -> ExtractError {
        ExtractError::database(format!(
            "Failed to {} in {}: {}",
            action,
            self.path.display(),
            e
        ))
    }
}

/// Quote a table name for use in SQL.
fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn fixture(temp: &TempDir) -> PathBuf {
        let path = temp.path().join("en.content.sqlite");
        let conn = Connection::open(&path).unwrap();
        conn.execute_batch(
            r#"
            CREATE TABLE DestinyClassDefinition (id INTEGER PRIMARY KEY, json BLOB);
            INSERT INTO DestinyClassDefinition VALUES (1, '{"classHash":10,"name":"Titan"}');
            INSERT INTO DestinyClassDefinition VALUES (2, CAST('{"classHash":20}' AS BLOB));
            INSERT INTO DestinyClassDefinition VALUES (3, 42);
            CREATE TABLE DestinyRaceDefinition (id INTEGER PRIMARY KEY, json BLOB);
            "#,
        )
        .unwrap();
        path
    }

    #[test]
    fn test_missing_database() {
        let temp = TempDir::new().unwrap();
        let err = ContentDatabase::open(temp.path().join("xx.content.sqlite"), "xx")
            .err()
            .unwrap();
        assert!(matches!(
            err,
            ExtractError::LanguageNotFound { ref language, .. } if language == "xx"
        ));
    }

    #[test]
    fn test_table_names() {
        let temp = TempDir::new().unwrap();
        let db = ContentDatabase::open(fixture(&temp), "en").unwrap();
        assert_eq!(
            db.table_names().unwrap(),
            vec!["DestinyClassDefinition", "DestinyRaceDefinition"]
        );
    }

    #[test]
    fn test_read_table_reports_bad_rows_inline() {
        let temp = TempDir::new().unwrap();
        let db = ContentDatabase::open(fixture(&temp), "en").unwrap();

        let mut rows = Vec::new();
        let count = db
            .read_table("DestinyClassDefinition", |row| {
                rows.push(row);
                ControlFlow::Continue(())
            })
            .unwrap();

        assert_eq!(count, 3);
        let first = rows[0].as_ref().unwrap();
        assert_eq!(first.language, "en");
        assert_eq!(first.sql_row_id, 1);
        assert_eq!(first.raw_payload, br#"{"classHash":10,"name":"Titan"}"#.to_vec());
        assert_eq!(rows[1].as_ref().unwrap().raw_payload, br#"{"classHash":20}"#.to_vec());
        assert!(matches!(
            rows[2],
            Err(ExtractError::MalformedPayload { sql_row_id: 3, .. })
        ));
    }

    #[test]
    fn test_read_table_stops_on_break() {
        let temp = TempDir::new().unwrap();
        let db = ContentDatabase::open(fixture(&temp), "en").unwrap();
        let count = db
            .read_table("DestinyClassDefinition", |_| ControlFlow::Break(()))
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn test_unknown_table_is_database_error() {
        let temp = TempDir::new().unwrap();
        let db = ContentDatabase::open(fixture(&temp), "en").unwrap();
        let err = db.read_table("Nope", |_| ControlFlow::Continue(())).unwrap_err();
        assert!(matches!(err, ExtractError::Database(_)));
    }

    #[test]
    fn test_quote_identifier() {
        assert_eq!(quote_identifier("Destiny"), "\"Destiny\"");
        assert_eq!(quote_identifier("a\"b"), "\"a\"\"b\"");
    }
}
