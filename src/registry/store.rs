//! Persisted usage records (`cag_document_registry`).
//!
//! The workflow engine registers caches as documents are ingested; the bridge
//! reads the records and bumps usage counters. [`RegistryStore`] is the seam,
//! with a SQLite backend here and a PostgreSQL one in
//! [`crate::registry::postgres`]. Every operation opens its own connection, so
//! a database that appears or disappears while the bridge is running is picked
//! up on the next call.

use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDateTime, Utc};
use rusqlite::{params, Connection, OpenFlags, Row};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("Registry database not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("Failed to open registry at {}: {source}", path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: rusqlite::Error,
    },

    #[error("Registry query failed: {0}")]
    Query(#[from] rusqlite::Error),

    #[error("Failed to connect to registry at {target}: {source}")]
    Connect {
        target: String,
        #[source]
        source: postgres::Error,
    },

    #[error("Registry query failed: {0}")]
    Postgres(#[from] postgres::Error),

    #[error("Invalid timestamp in column {column}: {value:?}")]
    Timestamp { column: &'static str, value: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// One row of the registry, keyed by cache path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageRecord {
    pub cache_path: PathBuf,
    pub document_id: String,
    pub file_name: String,
    pub chunk_id: Option<String>,
    pub section_title: Option<String>,
    pub usage_count: u64,
    pub last_used: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Read/write access to usage records.
pub trait RegistryStore: Send + Sync {
    /// Every record that references a cache, in one read.
    fn load_all(&self) -> Result<Vec<UsageRecord>, RegistryError>;

    /// Bump the usage counter of `cache_path`; `false` when no record matches.
    fn record_usage(&self, cache_path: &Path, at: DateTime<Utc>) -> Result<bool, RegistryError>;
}

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS cag_document_registry (
    kv_cache_path TEXT PRIMARY KEY,
    document_id TEXT NOT NULL,
    file_name TEXT NOT NULL,
    chunk_id TEXT,
    last_used TEXT,
    usage_count INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    section_title TEXT
);

CREATE INDEX IF NOT EXISTS idx_registry_document
    ON cag_document_registry(document_id);
"#;

/// SQLite-backed registry.
#[derive(Debug, Clone)]
pub struct SqliteRegistry {
    path: PathBuf,
}

impl SqliteRegistry {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Create the database file and schema if they do not exist yet.
    pub fn initialize(&self) -> Result<(), RegistryError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(&self.path).map_err(|source| RegistryError::Open {
            path: self.path.clone(),
            source,
        })?;
        conn.execute_batch(SCHEMA)?;

        debug!(path = %self.path.display(), "Registry schema ready");
        Ok(())
    }

    /// Insert or replace the record for `record.cache_path`.
    pub fn upsert(&self, record: &UsageRecord) -> Result<(), RegistryError> {
        let conn = self.connect()?;
        conn.execute(
            r#"
            INSERT INTO cag_document_registry
                (kv_cache_path, document_id, file_name, chunk_id,
                 last_used, usage_count, created_at, section_title)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            ON CONFLICT(kv_cache_path) DO UPDATE SET
                document_id = excluded.document_id,
                file_name = excluded.file_name,
                chunk_id = excluded.chunk_id,
                last_used = excluded.last_used,
                usage_count = excluded.usage_count,
                created_at = excluded.created_at,
                section_title = excluded.section_title
            "#,
            params![
                record.cache_path.to_string_lossy(),
                record.document_id,
                record.file_name,
                record.chunk_id,
                record.last_used.map(|t| t.to_rfc3339()),
                record.usage_count as i64,
                record.created_at.to_rfc3339(),
                record.section_title,
            ],
        )?;
        Ok(())
    }

    /// Open an existing database. A missing file means the registry is unreachable.
    fn connect(&self) -> Result<Connection, RegistryError> {
        if !self.path.exists() {
            return Err(RegistryError::NotFound(self.path.clone()));
        }
        Connection::open_with_flags(
            &self.path,
            OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .map_err(|source| RegistryError::Open {
            path: self.path.clone(),
            source,
        })
    }
}

impl RegistryStore for SqliteRegistry {
    fn load_all(&self) -> Result<Vec<UsageRecord>, RegistryError> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT kv_cache_path, document_id, file_name, chunk_id,
                   last_used, usage_count, created_at, section_title
            FROM cag_document_registry
            WHERE kv_cache_path IS NOT NULL
            "#,
        )?;

        let rows = stmt.query_map([], RawRecord::from_row)?;
        let mut records = Vec::new();
        for row in rows {
            records.push(row?.into_record()?);
        }

        debug!(count = records.len(), "Loaded usage records");
        Ok(records)
    }

    fn record_usage(&self, cache_path: &Path, at: DateTime<Utc>) -> Result<bool, RegistryError> {
        let conn = self.connect()?;
        let updated = conn.execute(
            r#"
            UPDATE cag_document_registry
            SET usage_count = usage_count + 1, last_used = ?2
            WHERE kv_cache_path = ?1
            "#,
            params![cache_path.to_string_lossy(), at.to_rfc3339()],
        )?;
        Ok(updated > 0)
    }
}

/// Row as stored, before timestamp parsing. Shared by every backend.
pub(crate) struct RawRecord {
    pub(crate) cache_path: String,
    pub(crate) document_id: Option<String>,
    pub(crate) file_name: Option<String>,
    pub(crate) chunk_id: Option<String>,
    pub(crate) last_used: Option<String>,
    pub(crate) usage_count: Option<i64>,
    pub(crate) created_at: Option<String>,
    pub(crate) section_title: Option<String>,
}

impl RawRecord {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            cache_path: row.get(0)?,
            document_id: row.get(1)?,
            file_name: row.get(2)?,
            chunk_id: row.get(3)?,
            last_used: row.get(4)?,
            usage_count: row.get(5)?,
            created_at: row.get(6)?,
            section_title: row.get(7)?,
        })
    }

    pub(crate) fn into_record(self) -> Result<UsageRecord, RegistryError> {
        let last_used = self
            .last_used
            .as_deref()
            .map(|v| parse_timestamp("last_used", v))
            .transpose()?;
        let created_at = match self.created_at.as_deref() {
            Some(v) => parse_timestamp("created_at", v)?,
            None => DateTime::<Utc>::default(),
        };

        Ok(UsageRecord {
            cache_path: PathBuf::from(self.cache_path),
            document_id: self.document_id.unwrap_or_else(|| "unknown".to_string()),
            file_name: self.file_name.unwrap_or_else(|| "unknown".to_string()),
            chunk_id: self.chunk_id,
            section_title: self.section_title,
            usage_count: self.usage_count.unwrap_or(0).max(0) as u64,
            last_used,
            created_at,
        })
    }
}

/// Accepts RFC 3339, PostgreSQL's `YYYY-MM-DD HH:MM:SS[.fff]+HH[:MM]` text form,
/// and SQLite's `YYYY-MM-DD HH:MM:SS[.fff]` (read as UTC).
fn parse_timestamp(column: &'static str, value: &str) -> Result<DateTime<Utc>, RegistryError> {
    if let Ok(t) = DateTime::parse_from_rfc3339(value) {
        return Ok(t.with_timezone(&Utc));
    }
    if let Ok(t) = DateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S%.f%#z") {
        return Ok(t.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S%.f")
        .map(|naive| naive.and_utc())
        .map_err(|_| RegistryError::Timestamp {
            column,
            value: value.to_string(),
        })
}
