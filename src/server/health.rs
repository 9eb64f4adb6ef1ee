//! Health report for the bridge's external collaborators.
//!
//! The bridge is unhealthy when it cannot run any request: a script or the
//! model is missing. A missing master cache only degrades default queries and
//! is reported as a warning.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::config::Config;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Unhealthy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub issues: Vec<String>,
    pub warnings: Vec<String>,
    pub config: HealthConfig,
}

/// Effective settings echoed back for troubleshooting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthConfig {
    pub master_kv_cache: PathBuf,
    pub model_path: PathBuf,
    pub query_script: PathBuf,
    pub create_script: PathBuf,
    pub cache_dir: PathBuf,
    pub max_context: usize,
    pub threads: usize,
    pub batch_size: usize,
    pub timeout_secs: u64,
}

pub fn check_health(config: &Config) -> HealthReport {
    let inference = &config.inference;
    let storage = &config.storage;

    let mut issues = Vec::new();
    require(&mut issues, "Query script", &inference.query_script);
    require(&mut issues, "Create script", &inference.create_script);
    require(&mut issues, "Model", &inference.model_path);

    let mut warnings = Vec::new();
    if !storage.master_cache_path.exists() {
        warnings.push(format!(
            "Master KV cache not found at: {}. This is fine if you haven't created it yet.",
            storage.master_cache_path.display()
        ));
    }

    HealthReport {
        status: if issues.is_empty() {
            HealthStatus::Healthy
        } else {
            HealthStatus::Unhealthy
        },
        issues,
        warnings,
        config: HealthConfig {
            master_kv_cache: storage.master_cache_path.clone(),
            model_path: inference.model_path.clone(),
            query_script: inference.query_script.clone(),
            create_script: inference.create_script.clone(),
            cache_dir: storage.cache_dir.clone(),
            max_context: inference.max_context,
            threads: inference.threads,
            batch_size: inference.batch_size,
            timeout_secs: inference.timeout_secs,
        },
    }
}

fn require(issues: &mut Vec<String>, what: &str, path: &Path) {
    if !path.exists() {
        issues.push(format!("{what} not found at: {}", path.display()));
    }
}
