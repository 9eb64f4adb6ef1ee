//! Query bridge: answers a question against a saved KV cache.

use std::path::PathBuf;
use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn};

use crate::config::Config;
use crate::error::{CagError, Result};
use crate::inference::commands::query_command;
use crate::inference::invoker::Invoker;

pub const DEFAULT_MAX_TOKENS: u32 = 1024;
pub const DEFAULT_TEMPERATURE: f64 = 0.7;

/// Wrap the raw question in the fixed instruction template.
pub fn format_prompt(query: &str) -> String {
    format!("Answer this question based on your knowledge:\n\nQuestion: {query}\n\nAnswer:")
}

#[derive(Debug, Clone)]
pub struct QueryRequest {
    pub query: String,

    /// Cache to attach, used verbatim.
    pub cache_path: PathBuf,

    pub max_tokens: u32,

    /// `None` leaves sampling temperature to the engine.
    pub temperature: Option<f64>,
}

impl QueryRequest {
    pub fn new(query: impl Into<String>, cache_path: impl Into<PathBuf>) -> Self {
        Self {
            query: query.into(),
            cache_path: cache_path.into(),
            max_tokens: DEFAULT_MAX_TOKENS,
            temperature: Some(DEFAULT_TEMPERATURE),
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct QueryResult {
    pub success: bool,
    pub response: String,
    pub error: Option<String>,
    pub query: String,
}

pub struct QueryBridge {
    config: Arc<Config>,
    invoker: Arc<dyn Invoker>,
}

impl QueryBridge {
    pub fn new(config: Arc<Config>, invoker: Arc<dyn Invoker>) -> Self {
        Self { config, invoker }
    }

    /// Run one query. A failing script yields `success = false`, not an error;
    /// errors are reserved for bad input and launch failures.
    pub async fn query(&self, request: QueryRequest) -> Result<QueryResult> {
        if request.query.trim().is_empty() {
            return Err(CagError::Validation("query is required".into()));
        }
        if request.max_tokens == 0 {
            return Err(CagError::Validation("maxTokens must be positive".into()));
        }
        if let Some(t) = request.temperature {
            if !t.is_finite() || t < 0.0 {
                return Err(CagError::Validation(format!(
                    "temperature must be a non-negative number, got {t}"
                )));
            }
        }

        let prompt = format_prompt(&request.query);
        let spec = query_command(
            &self.config.inference,
            &request.cache_path,
            &prompt,
            request.max_tokens,
            request.temperature,
        );

        info!(
            cache = %request.cache_path.display(),
            max_tokens = request.max_tokens,
            temperature = ?request.temperature,
            "Executing query"
        );

        let output = self.invoker.invoke(&spec).await?;

        info!(exit_code = output.exit_code, "Query completed");
        if !output.stderr.is_empty() {
            warn!(stderr = %output.stderr.trim_end(), "Query stderr");
        }

        let success = output.success();
        Ok(QueryResult {
            success,
            response: output.stdout,
            error: (!success).then_some(output.stderr),
            query: request.query,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prompt_template() {
        assert_eq!(
            format_prompt("What is CAG?"),
            "Answer this question based on your knowledge:\n\nQuestion: What is CAG?\n\nAnswer:"
        );
    }

    #[test]
    fn test_request_defaults() {
        let req = QueryRequest::new("q", "/kv/master_cache.bin");
        assert_eq!(req.max_tokens, 1024);
        assert_eq!(req.temperature, Some(0.7));
    }
}
