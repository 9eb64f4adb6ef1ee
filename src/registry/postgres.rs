//! PostgreSQL backend for the usage registry.
//!
//! The workflow engine owns `cag_document_registry`; the bridge only reads it
//! and bumps usage counters, so no schema is created here. Column types are
//! left to the engine: every value is read back as text and parsed the same
//! way as the SQLite backend.

use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, Utc};
use postgres::{Client, NoTls, Row};
use tracing::debug;

use crate::config::RegistryConfig;
use crate::registry::store::{RawRecord, RegistryError, RegistryStore, UsageRecord};

const LOAD_ALL: &str = r#"
    SELECT kv_cache_path::text, document_id::text, file_name::text, chunk_id::text,
           last_used::text, usage_count::bigint, created_at::text, section_title::text
    FROM cag_document_registry
    WHERE kv_cache_path IS NOT NULL
"#;

const RECORD_USAGE: &str = r#"
    UPDATE cag_document_registry
    SET usage_count = COALESCE(usage_count, 0) + 1,
        last_used = ($2::text)::timestamptz
    WHERE kv_cache_path = $1::text
"#;

#[derive(Debug, Clone)]
pub struct PostgresRegistry {
    config: postgres::Config,
    target: String,
}

impl PostgresRegistry {
    pub fn new(registry: &RegistryConfig) -> Self {
        let mut config = postgres::Config::new();
        config
            .host(&registry.host)
            .port(registry.port)
            .dbname(&registry.name)
            .user(&registry.user)
            .password(&registry.password)
            .connect_timeout(Duration::from_secs(registry.connect_timeout_secs.max(1)));

        Self {
            config,
            target: format!("{}:{}/{}", registry.host, registry.port, registry.name),
        }
    }

    /// `host:port/database`, without credentials.
    pub fn target(&self) -> &str {
        &self.target
    }

    fn connect(&self) -> Result<Client, RegistryError> {
        self.config
            .connect(NoTls)
            .map_err(|source| RegistryError::Connect {
                target: self.target.clone(),
                source,
            })
    }
}

impl RegistryStore for PostgresRegistry {
    fn load_all(&self) -> Result<Vec<UsageRecord>, RegistryError> {
        let mut client = self.connect()?;
        let rows = client.query(LOAD_ALL, &[])?;

        let mut records = Vec::with_capacity(rows.len());
        for row in &rows {
            records.push(raw_record(row)?.into_record()?);
        }

        debug!(count = records.len(), db = %self.target, "Loaded usage records");
        Ok(records)
    }

    fn record_usage(&self, cache_path: &Path, at: DateTime<Utc>) -> Result<bool, RegistryError> {
        let mut client = self.connect()?;
        let path = cache_path.to_string_lossy().into_owned();
        let updated = client.execute(RECORD_USAGE, &[&path, &at.to_rfc3339()])?;
        Ok(updated > 0)
    }
}

fn raw_record(row: &Row) -> Result<RawRecord, postgres::Error> {
    Ok(RawRecord {
        cache_path: row.try_get(0)?,
        document_id: row.try_get(1)?,
        file_name: row.try_get(2)?,
        chunk_id: row.try_get(3)?,
        last_used: row.try_get(4)?,
        usage_count: row.try_get(5)?,
        created_at: row.try_get(6)?,
        section_title: row.try_get(7)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unreachable() -> RegistryConfig {
        RegistryConfig {
            host: "127.0.0.1".to_string(),
            // Nothing listens on the discard port.
            port: 9,
            connect_timeout_secs: 1,
            ..RegistryConfig::default()
        }
    }

    #[test]
    fn test_target_hides_credentials() {
        let registry = PostgresRegistry::new(&RegistryConfig::default());
        assert_eq!(registry.target(), "localhost:5432/llamacag");
    }

    #[test]
    fn test_unreachable_server_is_connect_error() {
        let registry = PostgresRegistry::new(&unreachable());
        assert!(matches!(
            registry.load_all(),
            Err(RegistryError::Connect { .. })
        ));
        assert!(matches!(
            registry.record_usage(Path::new("/kv/a.bin"), Utc::now()),
            Err(RegistryError::Connect { .. })
        ));
    }
}
