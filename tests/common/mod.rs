//! Shared fixtures for integration tests.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use cag_bridge::config::{Config, RegistryBackend};
use cag_bridge::error::{CagError, Result};
use cag_bridge::inference::invoker::{CommandSpec, InvocationOutput, Invoker};

/// What the fake external scripts do when invoked.
#[derive(Debug, Clone)]
pub enum Behavior {
    /// Create calls write these bytes to the output path; queries answer "answer".
    WriteCache(Vec<u8>),
    /// Every call returns this output without touching the filesystem.
    Exit(InvocationOutput),
    /// The binary cannot be launched.
    LaunchFailure,
    /// The binary never finishes.
    Timeout,
}

/// Records every command and replays a fixed behavior.
pub struct ScriptedInvoker {
    behavior: Behavior,
    calls: Mutex<Vec<CommandSpec>>,
}

impl ScriptedInvoker {
    pub fn new(behavior: Behavior) -> Self {
        Self {
            behavior,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn exit(code: i32, stdout: &str, stderr: &str) -> Self {
        Self::new(Behavior::Exit(InvocationOutput {
            exit_code: code,
            stdout: stdout.to_string(),
            stderr: stderr.to_string(),
        }))
    }

    pub fn calls(&self) -> Vec<CommandSpec> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Invoker for ScriptedInvoker {
    async fn invoke(&self, spec: &CommandSpec) -> Result<InvocationOutput> {
        self.calls.lock().unwrap().push(spec.clone());

        match &self.behavior {
            Behavior::WriteCache(bytes) => {
                // Create layout: model, input, output, context, threads, batch.
                if spec.args.len() == 6 {
                    let output = PathBuf::from(&spec.args[2]);
                    tokio::fs::write(&output, bytes).await?;
                    Ok(InvocationOutput {
                        exit_code: 0,
                        stdout: "KV cache saved".to_string(),
                        stderr: String::new(),
                    })
                } else {
                    Ok(InvocationOutput {
                        exit_code: 0,
                        stdout: "answer".to_string(),
                        stderr: String::new(),
                    })
                }
            }
            Behavior::Exit(output) => Ok(output.clone()),
            Behavior::LaunchFailure => Err(CagError::Invocation {
                program: spec.program.clone(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "no such file"),
            }),
            Behavior::Timeout => Err(CagError::Timeout {
                program: spec.program.clone(),
                timeout: Duration::from_secs(1),
            }),
        }
    }
}

/// Configuration rooted in a temporary directory.
pub fn test_config(root: &Path) -> Config {
    let mut config = Config::default();
    config.inference.model_path = root.join("models").join("gemma-4b.gguf");
    config.inference.query_script = root.join("scripts").join("query_kv_cache.sh");
    config.inference.create_script = root.join("scripts").join("create_kv_cache.sh");
    config.inference.max_context = 128_000;
    config.storage.master_cache_path = root.join("master").join("master_cache.bin");
    config.storage.cache_dir = root.join("kv_caches");
    config.storage.temp_dir = root.join("temp_chunks");
    config.registry.backend = RegistryBackend::Sqlite;
    config.registry.database_path = root.join("registry.db");
    config
}

/// Stage a document chunk for cache creation.
pub fn stage_input(root: &Path, name: &str) -> PathBuf {
    let dir = root.join("temp_chunks");
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join(name);
    std::fs::write(&path, "The quick brown fox jumps over the lazy dog.").unwrap();
    path
}
