//! Cache lifecycle manager: builds a KV cache from a staged document and
//! optionally promotes it to the master slot.
//!
//! A single creation moves through
//! `Validating → Sizing → Invoking → {Succeeded, Failed} → Promoting → CleaningUp → Done`.
//! Once the create script has been invoked, every path ends with the staged
//! input being removed. Promotion and cleanup problems are reported as
//! warnings on the result and never turn a created cache into a failure.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use tokio::fs;
use tracing::{error, info, warn};

use crate::cache::files::{atomic_copy, ensure_parent_dir, file_size, remove_if_exists};
use crate::cache::sizing::compute_context_size;
use crate::config::Config;
use crate::error::{CagError, Result};
use crate::inference::commands::create_cache_command;
use crate::inference::invoker::{InvocationOutput, Invoker};

/// Inputs for one cache creation.
#[derive(Debug, Clone)]
pub struct CreateCacheRequest {
    pub document_id: String,

    /// Staged document text; removed once the create script has run.
    pub input_path: PathBuf,

    pub output_path: PathBuf,

    pub estimated_tokens: i64,

    pub set_as_master: bool,
}

/// Outcome of a creation that got as far as running the create script.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct CacheCreationResult {
    pub success: bool,
    pub cache_path: PathBuf,
    pub cache_size_bytes: Option<u64>,
    pub context_size: usize,
    pub stdout: String,
    pub error: Option<String>,
    pub promoted_to_master: bool,

    /// Non-fatal problems (promotion, cleanup).
    pub warnings: Vec<String>,
}

pub struct CacheManager {
    config: Arc<Config>,
    invoker: Arc<dyn Invoker>,
}

impl CacheManager {
    pub fn new(config: Arc<Config>, invoker: Arc<dyn Invoker>) -> Self {
        Self { config, invoker }
    }

    /// Whether a cache for `document_id` should replace the master cache.
    pub fn wants_promotion(document_id: &str, set_as_master: bool) -> bool {
        set_as_master || document_id.to_lowercase().contains("master")
    }

    /// Create a cache for `request`.
    ///
    /// Validation and sizing errors are returned before anything is touched and
    /// leave the input in place. A non-zero exit from the create script is a
    /// failed result, not an error. A zero exit without an output file is
    /// [`CagError::Postcondition`].
    pub async fn create_cache(&self, request: &CreateCacheRequest) -> Result<CacheCreationResult> {
        let document_id = request.document_id.trim();
        if document_id.is_empty() {
            return Err(CagError::Validation("documentId is required".into()));
        }

        if !fs::try_exists(&request.input_path).await.unwrap_or(false) {
            warn!(
                document_id,
                input = %request.input_path.display(),
                "Input file not found"
            );
            return Err(CagError::MissingInput(request.input_path.clone()));
        }

        ensure_parent_dir(&request.output_path).await?;

        let context_size =
            compute_context_size(request.estimated_tokens, self.config.inference.max_context)?;

        let mut warnings = Vec::new();
        let outcome = self
            .build_and_promote(request, document_id, context_size, &mut warnings)
            .await;

        if let Err(e) = &outcome {
            error!(
                document_id,
                cache = %request.output_path.display(),
                kind = ?e.kind(),
                "KV cache creation failed: {e}"
            );
        }

        self.cleanup_input(&request.input_path, &mut warnings).await;

        outcome.map(|mut result| {
            result.warnings = warnings;
            result
        })
    }

    async fn build_and_promote(
        &self,
        request: &CreateCacheRequest,
        document_id: &str,
        context_size: usize,
        warnings: &mut Vec<String>,
    ) -> Result<CacheCreationResult> {
        let spec = create_cache_command(
            &self.config.inference,
            &request.input_path,
            &request.output_path,
            context_size,
        );

        info!(
            document_id,
            context_size,
            command = %spec.display(),
            "Creating KV cache"
        );

        let output = self.invoker.invoke(&spec).await?;

        info!(
            document_id,
            exit_code = output.exit_code,
            "KV cache creation completed"
        );
        if !output.stderr.is_empty() {
            warn!(document_id, stderr = %output.stderr.trim_end(), "KV cache stderr");
        }

        if !output.success() {
            return Ok(Self::failed(request, context_size, output));
        }

        let size = file_size(&request.output_path)
            .await?
            .ok_or_else(|| CagError::Postcondition(request.output_path.clone()))?;

        let promoted = if Self::wants_promotion(document_id, request.set_as_master) {
            self.promote(&request.output_path, document_id, warnings).await
        } else {
            false
        };

        Ok(CacheCreationResult {
            success: true,
            cache_path: request.output_path.clone(),
            cache_size_bytes: Some(size),
            context_size,
            stdout: output.stdout,
            error: None,
            promoted_to_master: promoted,
            warnings: Vec::new(),
        })
    }

    fn failed(
        request: &CreateCacheRequest,
        context_size: usize,
        output: InvocationOutput,
    ) -> CacheCreationResult {
        CacheCreationResult {
            success: false,
            cache_path: request.output_path.clone(),
            cache_size_bytes: None,
            context_size,
            stdout: output.stdout,
            error: Some(output.stderr),
            promoted_to_master: false,
            warnings: Vec::new(),
        }
    }

    async fn promote(&self, cache: &Path, document_id: &str, warnings: &mut Vec<String>) -> bool {
        let master = &self.config.storage.master_cache_path;
        match atomic_copy(cache, master).await {
            Ok(bytes) => {
                info!(
                    document_id,
                    cache = %cache.display(),
                    master = %master.display(),
                    bytes,
                    "Set as master KV cache"
                );
                true
            }
            Err(e) => {
                error!(
                    document_id,
                    cache = %cache.display(),
                    master = %master.display(),
                    "Failed to set as master KV cache: {e}"
                );
                warnings.push(format!("failed to set as master KV cache: {e}"));
                false
            }
        }
    }

    async fn cleanup_input(&self, input: &Path, warnings: &mut Vec<String>) {
        match remove_if_exists(input).await {
            Ok(true) => info!(input = %input.display(), "Cleaned up temp file"),
            Ok(false) => {}
            Err(e) => {
                warn!(input = %input.display(), "Failed to clean up temp file: {e}");
                warnings.push(format!("failed to clean up temp file: {e}"));
            }
        }
    }
}
