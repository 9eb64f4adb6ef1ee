//! Deterministic cache file locations.

use std::path::{Path, PathBuf};

/// Extension of every saved KV cache file.
pub const CACHE_EXTENSION: &str = "bin";

/// File stem used when a cache covers the whole document.
const FULL_DOCUMENT_STEM: &str = "full";

/// Location of the cache for `document_id` (and optionally one of its chunks).
///
/// `<cache_dir>/<document>/<chunk or "full">.bin`
pub fn cache_path_for(cache_dir: &Path, document_id: &str, chunk_id: Option<&str>) -> PathBuf {
    let stem = chunk_id
        .filter(|c| !c.trim().is_empty())
        .map(sanitize_component)
        .unwrap_or_else(|| FULL_DOCUMENT_STEM.to_string());

    cache_dir
        .join(sanitize_component(document_id))
        .join(format!("{stem}.{CACHE_EXTENSION}"))
}

/// Whether `path` looks like a saved cache file.
pub fn is_cache_file(path: &Path) -> bool {
    path.extension().and_then(|e| e.to_str()) == Some(CACHE_EXTENSION)
}

/// Reduce an identifier to a single safe path component.
fn sanitize_component(raw: &str) -> String {
    let cleaned: String = raw
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect();

    // "." and ".." would escape the cache directory.
    if cleaned.chars().all(|c| c == '.') {
        cleaned.replace('.', "_")
    } else {
        cleaned
    }
}
