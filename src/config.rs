//! Runtime configuration for cag-bridge.
//!
//! Configuration is loaded once at startup from a JSON file, overlaid with the
//! environment variables the deployment scripts export, validated, and then
//! shared immutably (`Arc<Config>`) with every component.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};

use crate::cache::sizing::MIN_CONTEXT;
use crate::registry::reconciler::SortKey;

/// Command-line arguments.
#[derive(Parser, Debug, Clone)]
#[command(name = "cag-bridge", about = "KV-cache lifecycle manager and query bridge")]
pub struct Cli {
    /// Path to configuration file (JSON).
    #[arg(short, long, default_value = "config.json", global = true)]
    pub config: PathBuf,

    /// Enable verbose logging.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    pub log_json: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Run the HTTP bridge.
    Serve {
        /// HTTP listen address (overrides the config file).
        #[arg(long)]
        listen: Option<String>,
    },

    /// List KV caches on disk joined with their usage records.
    List {
        #[arg(long, value_enum, default_value_t = SortKey::Document)]
        sort: SortKey,

        /// Only show caches used within this many days.
        #[arg(long)]
        days: Option<u32>,

        /// Only show caches that have never been used.
        #[arg(long)]
        unused: bool,

        /// Output in JSON format.
        #[arg(long)]
        json: bool,
    },
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub inference: InferenceConfig,
    pub storage: StorageConfig,
    pub registry: RegistryConfig,
}

/// HTTP server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Listen address (e.g. "0.0.0.0:8000").
    pub listen: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: "0.0.0.0:8000".to_string(),
        }
    }
}

/// External model-execution settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InferenceConfig {
    /// Path to the GGUF model file.
    pub model_path: PathBuf,

    /// Script that answers a prompt against a saved KV cache.
    pub query_script: PathBuf,

    /// Script that processes a document and saves its KV cache.
    pub create_script: PathBuf,

    /// Largest context window a cache may be built with, in tokens.
    pub max_context: usize,

    pub threads: usize,

    pub batch_size: usize,

    /// Upper bound on a single script run in seconds (0 = wait forever).
    pub timeout_secs: u64,
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            model_path: PathBuf::from("/usr/local/llamacpp/models/gemma-4b.gguf"),
            query_script: PathBuf::from("/usr/local/bin/cag-scripts/query_kv_cache.sh"),
            create_script: PathBuf::from("/usr/local/bin/cag-scripts/create_kv_cache.sh"),
            max_context: 128_000,
            threads: 4,
            batch_size: 1024,
            timeout_secs: 1800,
        }
    }
}

/// Filesystem locations.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// The single well-known master cache slot.
    pub master_cache_path: PathBuf,

    /// Root directory holding all per-document caches.
    pub cache_dir: PathBuf,

    /// Where document chunks are staged before cache creation.
    pub temp_dir: PathBuf,

    /// Folder watched by the workflow engine for new documents.
    pub documents_folder: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            master_cache_path: PathBuf::from("/data/kv_caches/master_cache.bin"),
            cache_dir: PathBuf::from("/data/kv_caches"),
            temp_dir: PathBuf::from("/data/temp_chunks"),
            documents_folder: PathBuf::from("/data/cag_documents"),
        }
    }
}

/// Where usage records live.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RegistryBackend {
    /// The workflow engine's PostgreSQL database.
    #[default]
    Postgres,
    /// A local SQLite file.
    Sqlite,
}

impl std::str::FromStr for RegistryBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "postgres" | "postgresql" => Ok(Self::Postgres),
            "sqlite" => Ok(Self::Sqlite),
            other => bail!("unknown registry backend {other:?}"),
        }
    }
}

/// Usage registry settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    pub backend: RegistryBackend,

    /// SQLite database holding `cag_document_registry`.
    pub database_path: PathBuf,

    pub host: String,
    pub port: u16,
    /// PostgreSQL database name.
    pub name: String,
    pub user: String,
    #[serde(skip_serializing)]
    pub password: String,

    /// Give up on an unreachable PostgreSQL server after this many seconds.
    pub connect_timeout_secs: u64,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            backend: RegistryBackend::Postgres,
            database_path: PathBuf::from("/data/cag_registry.db"),
            host: "localhost".to_string(),
            port: 5432,
            name: "llamacag".to_string(),
            user: "llamacag".to_string(),
            password: "llamacag".to_string(),
            connect_timeout_secs: 5,
        }
    }
}

impl Config {
    /// Load configuration from a JSON file, falling back to defaults for missing fields.
    pub fn load(path: &std::path::Path) -> anyhow::Result<Self> {
        if path.exists() {
            let data = std::fs::read_to_string(path)
                .with_context(|| format!("reading {}", path.display()))?;
            let config: Config = serde_json::from_str(&data)
                .with_context(|| format!("parsing {}", path.display()))?;
            Ok(config)
        } else {
            tracing::warn!("Config file not found at {:?}, using defaults", path);
            Ok(Config::default())
        }
    }

    /// Overlay settings from the process environment.
    pub fn apply_env(&mut self) -> anyhow::Result<()> {
        self.apply_env_from(std::env::vars())
    }

    /// Overlay settings from `(name, value)` pairs using the deployment's variable names.
    pub fn apply_env_from<I>(&mut self, vars: I) -> anyhow::Result<()>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        for (key, value) in vars {
            match key.as_str() {
                "LLAMACPP_MODEL_PATH" => self.inference.model_path = value.into(),
                "MASTER_KV_CACHE" => self.storage.master_cache_path = value.into(),
                "CAG_QUERY_SCRIPT" => self.inference.query_script = value.into(),
                "CAG_CREATE_SCRIPT" => self.inference.create_script = value.into(),
                "LLAMACPP_MAX_CONTEXT" => self.inference.max_context = parse_var(&key, &value)?,
                "LLAMACPP_THREADS" => self.inference.threads = parse_var(&key, &value)?,
                "LLAMACPP_BATCH_SIZE" => self.inference.batch_size = parse_var(&key, &value)?,
                "CAG_INFERENCE_TIMEOUT_SECS" => {
                    self.inference.timeout_secs = parse_var(&key, &value)?
                }
                "LLAMACPP_KV_CACHE_DIR" => self.storage.cache_dir = value.into(),
                "LLAMACPP_TEMP_DIR" => self.storage.temp_dir = value.into(),
                "DOCUMENTS_FOLDER" => self.storage.documents_folder = value.into(),
                "CAG_REGISTRY_BACKEND" => self.registry.backend = parse_backend(&value)?,
                "CAG_REGISTRY_DB" => self.registry.database_path = value.into(),
                "DB_HOST" => self.registry.host = value,
                "DB_PORT" => self.registry.port = parse_var(&key, &value)?,
                "DB_NAME" => self.registry.name = value,
                "DB_USER" => self.registry.user = value,
                "DB_PASSWORD" => self.registry.password = value,
                "CAG_BRIDGE_PORT" => {
                    let port: u16 = parse_var(&key, &value)?;
                    let host = self
                        .server
                        .listen
                        .rsplit_once(':')
                        .map(|(host, _)| host.to_string())
                        .unwrap_or_else(|| "0.0.0.0".to_string());
                    self.server.listen = format!("{host}:{port}");
                }
                _ => {}
            }
        }
        Ok(())
    }

    /// Reject settings no request could ever succeed with.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.inference.max_context < MIN_CONTEXT {
            bail!(
                "inference.max_context must be at least {MIN_CONTEXT}, got {}",
                self.inference.max_context
            );
        }
        if self.inference.threads == 0 {
            bail!("inference.threads must be positive");
        }
        if self.inference.batch_size == 0 {
            bail!("inference.batch_size must be positive");
        }
        Ok(())
    }

    /// Bounded wait for one external command, `None` when disabled.
    pub fn invocation_timeout(&self) -> Option<Duration> {
        match self.inference.timeout_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }
}

fn parse_var<T>(key: &str, value: &str) -> anyhow::Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    value
        .trim()
        .parse()
        .with_context(|| format!("invalid value for {key}: {value:?}"))
}

fn parse_backend(value: &str) -> anyhow::Result<RegistryBackend> {
    value
        .trim()
        .parse()
        .context("invalid value for CAG_REGISTRY_BACKEND")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_default_config() {
        let cfg = Config::default();
        assert_eq!(cfg.inference.max_context, 128_000);
        assert_eq!(cfg.inference.threads, 4);
        assert_eq!(cfg.inference.batch_size, 1024);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let cfg: Config =
            serde_json::from_str(r#"{"inference": {"threads": 16}}"#).unwrap();
        assert_eq!(cfg.inference.threads, 16);
        assert_eq!(cfg.inference.batch_size, 1024);
        assert_eq!(
            cfg.storage.master_cache_path,
            PathBuf::from("/data/kv_caches/master_cache.bin")
        );
    }

    #[test]
    fn test_env_overlay() {
        let mut cfg = Config::default();
        cfg.apply_env_from(vars(&[
            ("LLAMACPP_MODEL_PATH", "/models/a.gguf"),
            ("LLAMACPP_MAX_CONTEXT", "32768"),
            ("CAG_BRIDGE_PORT", "9100"),
            ("UNRELATED", "x"),
        ]))
        .unwrap();

        assert_eq!(cfg.inference.model_path, PathBuf::from("/models/a.gguf"));
        assert_eq!(cfg.inference.max_context, 32768);
        assert_eq!(cfg.server.listen, "0.0.0.0:9100");
    }

    #[test]
    fn test_env_overlay_rejects_garbage() {
        let mut cfg = Config::default();
        let err = cfg
            .apply_env_from(vars(&[("LLAMACPP_THREADS", "four")]))
            .unwrap_err();
        assert!(err.to_string().contains("LLAMACPP_THREADS"));
    }

    #[test]
    fn test_env_overlay_registry_connection() {
        let mut cfg = Config::default();
        assert_eq!(cfg.registry.backend, RegistryBackend::Postgres);

        cfg.apply_env_from(vars(&[
            ("DB_HOST", "db.internal"),
            ("DB_PORT", "6543"),
            ("DB_NAME", "cag"),
            ("DB_USER", "bridge"),
            ("DB_PASSWORD", "s3cret"),
        ]))
        .unwrap();
        assert_eq!(cfg.registry.host, "db.internal");
        assert_eq!(cfg.registry.port, 6543);
        assert_eq!(cfg.registry.name, "cag");
        assert_eq!(cfg.registry.user, "bridge");
        assert_eq!(cfg.registry.password, "s3cret");

        cfg.apply_env_from(vars(&[("CAG_REGISTRY_BACKEND", "SQLite")]))
            .unwrap();
        assert_eq!(cfg.registry.backend, RegistryBackend::Sqlite);
        assert!(cfg
            .apply_env_from(vars(&[("CAG_REGISTRY_BACKEND", "mongo")]))
            .is_err());
    }

    #[test]
    fn test_password_is_not_serialized() {
        let json = serde_json::to_string(&Config::default()).unwrap();
        assert!(!json.contains("password"));
    }

    #[test]
    fn test_validate_small_context() {
        let mut cfg = Config::default();
        cfg.inference.max_context = 1024;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_timeout_zero_disables() {
        let mut cfg = Config::default();
        assert_eq!(cfg.invocation_timeout(), Some(Duration::from_secs(1800)));
        cfg.inference.timeout_secs = 0;
        assert_eq!(cfg.invocation_timeout(), None);
    }
}
