//! Integration tests for the query bridge.

mod common;

use std::sync::Arc;

use cag_bridge::error::CagError;
use cag_bridge::inference::query::{format_prompt, QueryBridge, QueryRequest};
use tempfile::TempDir;

use common::{test_config, Behavior, ScriptedInvoker};

fn bridge(root: &std::path::Path, invoker: Arc<ScriptedInvoker>) -> QueryBridge {
    QueryBridge::new(Arc::new(test_config(root)), invoker)
}

#[tokio::test]
async fn test_query_command_layout() {
    let tmp = TempDir::new().unwrap();
    let invoker = Arc::new(ScriptedInvoker::exit(0, "Paris", ""));
    let bridge = bridge(tmp.path(), invoker.clone());
    let cache = tmp.path().join("kv_caches").join("geo.bin");

    let result = bridge
        .query(QueryRequest::new("Capital of France?", cache.clone()))
        .await
        .unwrap();

    assert!(result.success);
    assert_eq!(result.response, "Paris");
    assert_eq!(result.error, None);
    assert_eq!(result.query, "Capital of France?");

    let calls = invoker.calls();
    assert_eq!(calls.len(), 1);
    let spec = &calls[0];
    assert_eq!(spec.program, tmp.path().join("scripts").join("query_kv_cache.sh"));
    assert_eq!(spec.args[0].as_os_str(), tmp.path().join("models").join("gemma-4b.gguf").as_os_str());
    assert_eq!(spec.args[1].as_os_str(), cache.as_os_str());
    assert_eq!(spec.args[2], format_prompt("Capital of France?").as_str());
    assert_eq!(spec.args[3], "1024");
    assert_eq!(spec.args[4], "--temp");
    assert_eq!(spec.args[5], "0.7");
}

#[tokio::test]
async fn test_null_temperature_omits_flag() {
    let tmp = TempDir::new().unwrap();
    let invoker = Arc::new(ScriptedInvoker::exit(0, "ok", ""));
    let bridge = bridge(tmp.path(), invoker.clone());

    let mut request = QueryRequest::new("q", tmp.path().join("m.bin"));
    request.temperature = None;
    request.max_tokens = 64;
    bridge.query(request).await.unwrap();

    let spec = &invoker.calls()[0];
    assert!(!spec.has_arg("--temp"));
    assert_eq!(spec.args.len(), 4);
    assert_eq!(spec.args[3], "64");
}

#[tokio::test]
async fn test_shell_metacharacters_stay_one_argument() {
    let tmp = TempDir::new().unwrap();
    let invoker = Arc::new(ScriptedInvoker::exit(0, "ok", ""));
    let bridge = bridge(tmp.path(), invoker.clone());

    let hostile = "\"; rm -rf / ; echo \"$(whoami)` `";
    bridge
        .query(QueryRequest::new(hostile, tmp.path().join("m.bin")))
        .await
        .unwrap();

    let spec = &invoker.calls()[0];
    assert_eq!(spec.args.len(), 6);
    assert_eq!(spec.args[2], format_prompt(hostile).as_str());
}

#[tokio::test]
async fn test_non_zero_exit_is_unsuccessful_result() {
    let tmp = TempDir::new().unwrap();
    let invoker = Arc::new(ScriptedInvoker::exit(2, "half an ans", "failed to load cache"));
    let bridge = bridge(tmp.path(), invoker);

    let result = bridge
        .query(QueryRequest::new("q", tmp.path().join("m.bin")))
        .await
        .unwrap();

    assert!(!result.success);
    assert_eq!(result.response, "half an ans");
    assert_eq!(result.error.as_deref(), Some("failed to load cache"));
}

#[tokio::test]
async fn test_invalid_requests_are_rejected_before_invoking() {
    let tmp = TempDir::new().unwrap();
    let invoker = Arc::new(ScriptedInvoker::exit(0, "ok", ""));
    let bridge = bridge(tmp.path(), invoker.clone());

    let empty = QueryRequest::new("  ", tmp.path().join("m.bin"));
    assert!(matches!(bridge.query(empty).await, Err(CagError::Validation(_))));

    let mut zero = QueryRequest::new("q", tmp.path().join("m.bin"));
    zero.max_tokens = 0;
    assert!(matches!(bridge.query(zero).await, Err(CagError::Validation(_))));

    let mut negative = QueryRequest::new("q", tmp.path().join("m.bin"));
    negative.temperature = Some(-1.0);
    assert!(matches!(bridge.query(negative).await, Err(CagError::Validation(_))));

    assert!(invoker.calls().is_empty());
}

#[tokio::test]
async fn test_timeout_propagates() {
    let tmp = TempDir::new().unwrap();
    let invoker = Arc::new(ScriptedInvoker::new(Behavior::Timeout));
    let bridge = bridge(tmp.path(), invoker);

    let err = bridge
        .query(QueryRequest::new("q", tmp.path().join("m.bin")))
        .await
        .unwrap_err();
    assert!(matches!(err, CagError::Timeout { .. }));
}
