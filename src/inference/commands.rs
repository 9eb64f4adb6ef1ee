//! Argument layouts of the create and query scripts.

use std::path::Path;

use crate::config::InferenceConfig;
use crate::inference::invoker::CommandSpec;

/// `<create> <model> <input> <output> <context> <threads> <batch>`
pub fn create_cache_command(
    config: &InferenceConfig,
    input: &Path,
    output: &Path,
    context_size: usize,
) -> CommandSpec {
    CommandSpec::new(&config.create_script)
        .path_arg(&config.model_path)
        .path_arg(input)
        .path_arg(output)
        .arg(context_size.to_string())
        .arg(config.threads.to_string())
        .arg(config.batch_size.to_string())
}

/// `<query> <model> <cache> <prompt> <max_tokens> [--temp <t>]`
pub fn query_command(
    config: &InferenceConfig,
    cache: &Path,
    prompt: &str,
    max_tokens: u32,
    temperature: Option<f64>,
) -> CommandSpec {
    let spec = CommandSpec::new(&config.query_script)
        .path_arg(&config.model_path)
        .path_arg(cache)
        .arg(prompt)
        .arg(max_tokens.to_string());

    match temperature {
        Some(t) => spec.arg("--temp").arg(t.to_string()),
        None => spec,
    }
}

#[cfg(test)]
mod tests {
    use std::ffi::OsString;
    use std::path::PathBuf;

    use super::*;

    fn config() -> InferenceConfig {
        InferenceConfig {
            model_path: PathBuf::from("/models/gemma.gguf"),
            query_script: PathBuf::from("/scripts/query.sh"),
            create_script: PathBuf::from("/scripts/create.sh"),
            threads: 8,
            batch_size: 512,
            ..InferenceConfig::default()
        }
    }

    fn args(spec: &CommandSpec) -> Vec<OsString> {
        spec.args.clone()
    }

    #[test]
    fn test_create_layout() {
        let spec = create_cache_command(
            &config(),
            Path::new("/tmp/chunk.txt"),
            Path::new("/kv/doc/full.bin"),
            6144,
        );
        assert_eq!(spec.program, PathBuf::from("/scripts/create.sh"));
        assert_eq!(
            args(&spec),
            vec![
                OsString::from("/models/gemma.gguf"),
                "/tmp/chunk.txt".into(),
                "/kv/doc/full.bin".into(),
                "6144".into(),
                "8".into(),
                "512".into(),
            ]
        );
    }

    #[test]
    fn test_query_layout_with_temperature() {
        let spec = query_command(&config(), Path::new("/kv/m.bin"), "prompt", 256, Some(0.2));
        assert_eq!(
            args(&spec),
            vec![
                OsString::from("/models/gemma.gguf"),
                "/kv/m.bin".into(),
                "prompt".into(),
                "256".into(),
                "--temp".into(),
                "0.2".into(),
            ]
        );
    }

    #[test]
    fn test_query_without_temperature_has_no_flag() {
        let spec = query_command(&config(), Path::new("/kv/m.bin"), "p", 16, None);
        assert!(!spec.has_arg("--temp"));
        assert_eq!(spec.args.len(), 4);
    }
}
