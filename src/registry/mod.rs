//! Usage registry and cache inventory.
//!
//! - [`store`]: Usage records, the [`RegistryStore`] seam and the SQLite backend
//! - [`postgres`]: PostgreSQL backend (the workflow engine's database)
//! - [`reconciler`]: Joins cache files on disk with their records
//! - [`report`]: JSON and table renderings of a listing

pub mod postgres;
pub mod reconciler;
pub mod report;
pub mod store;

use std::sync::Arc;

use tracing::info;

use crate::config::{RegistryBackend, RegistryConfig};
use crate::registry::postgres::PostgresRegistry;
use crate::registry::store::{RegistryStore, SqliteRegistry};

/// Build the configured registry backend. Nothing is connected yet.
pub fn open_registry(config: &RegistryConfig) -> Arc<dyn RegistryStore> {
    match config.backend {
        RegistryBackend::Postgres => {
            let registry = PostgresRegistry::new(config);
            info!(db = registry.target(), "Using PostgreSQL usage registry");
            Arc::new(registry)
        }
        RegistryBackend::Sqlite => {
            info!(path = %config.database_path.display(), "Using SQLite usage registry");
            Arc::new(SqliteRegistry::new(&config.database_path))
        }
    }
}
