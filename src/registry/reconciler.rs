//! Cache inventory: on-disk cache files joined with their usage records.
//!
//! Files are the source of truth for what exists; the registry only enriches
//! them. Records whose file is gone are ignored, files without a record get
//! defaults, and an unreachable registry degrades the listing to
//! filesystem-only information instead of failing it.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Utc};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::cache::naming::is_cache_file;
use crate::error::CagError;
use crate::registry::store::{RegistryStore, UsageRecord};

const UNKNOWN: &str = "unknown";

/// Listing order. Ties are always broken by cache path.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortKey {
    /// Document id, then file name, ascending.
    #[default]
    Document,
    /// Largest first.
    Size,
    /// Newest first.
    Date,
    /// Most used first.
    Usage,
}

#[derive(Debug, Clone, Default)]
pub struct ListOptions {
    pub sort: SortKey,

    /// Keep only caches used within this many days.
    pub days: Option<u32>,

    /// Keep only caches that were never used.
    pub unused_only: bool,
}

/// One cache file with its registry metadata.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CacheEntry {
    pub cache_file: PathBuf,
    pub cache_name: String,
    pub document_id: String,
    pub file_name: String,
    pub section: String,
    pub size_bytes: u64,
    pub size_mb: f64,
    pub created_at: DateTime<Utc>,
    pub last_used: Option<DateTime<Utc>>,
    pub usage_count: u64,
    /// Whether a usage record was found for this file.
    pub registered: bool,
}

/// Reconciled, filtered and sorted listing of `cache_dir`.
pub fn list_caches(
    cache_dir: &Path,
    registry: &dyn RegistryStore,
    options: &ListOptions,
    now: DateTime<Utc>,
) -> Vec<CacheEntry> {
    let files = scan_cache_files(cache_dir);
    info!(count = files.len(), dir = %cache_dir.display(), "Found cache files");

    let records = match registry.load_all() {
        Ok(records) => records,
        Err(e) => {
            let e = CagError::from(e);
            warn!("{e}; showing filesystem information only");
            Vec::new()
        }
    };

    let index = RecordIndex::new(&records);
    let cutoff = options.days.map(|d| now - Duration::days(i64::from(d)));

    let mut entries: Vec<CacheEntry> = files
        .into_iter()
        .map(|file| {
            let record = index.lookup(&file.path);
            build_entry(file, record)
        })
        .filter(|entry| match cutoff {
            Some(cutoff) => entry.last_used.is_some_and(|t| t >= cutoff),
            None => true,
        })
        .filter(|entry| !options.unused_only || entry.usage_count == 0)
        .collect();

    sort_entries(&mut entries, options.sort);
    entries
}

/// Order `entries` by `key`, breaking ties by path so the order is total.
pub fn sort_entries(entries: &mut [CacheEntry], key: SortKey) {
    entries.sort_by(|a, b| {
        let primary = match key {
            SortKey::Document => a
                .document_id
                .cmp(&b.document_id)
                .then_with(|| a.file_name.cmp(&b.file_name)),
            SortKey::Size => b.size_bytes.cmp(&a.size_bytes),
            SortKey::Date => b.created_at.cmp(&a.created_at),
            SortKey::Usage => b.usage_count.cmp(&a.usage_count),
        };
        primary.then_with(|| a.cache_file.cmp(&b.cache_file))
    });
}

struct CacheFile {
    path: PathBuf,
    size_bytes: u64,
    modified: DateTime<Utc>,
}

fn scan_cache_files(cache_dir: &Path) -> Vec<CacheFile> {
    if !cache_dir.is_dir() {
        warn!(dir = %cache_dir.display(), "Cache directory not found");
        return Vec::new();
    }

    let mut files: Vec<CacheFile> = WalkDir::new(cache_dir)
        .into_iter()
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(e) => {
                warn!("Skipping unreadable cache entry: {e}");
                None
            }
        })
        .filter(|entry| entry.file_type().is_file() && is_cache_file(entry.path()))
        .filter_map(|entry| {
            let meta = match entry.metadata() {
                Ok(meta) => meta,
                Err(e) => {
                    warn!(path = %entry.path().display(), "Cannot stat cache file: {e}");
                    return None;
                }
            };
            let modified = meta
                .modified()
                .map(DateTime::<Utc>::from)
                .unwrap_or_default();
            Some(CacheFile {
                path: entry.into_path(),
                size_bytes: meta.len(),
                modified,
            })
        })
        .collect();

    files.sort_by(|a, b| a.path.cmp(&b.path));
    files
}

fn build_entry(file: CacheFile, record: Option<&UsageRecord>) -> CacheEntry {
    let cache_name = file
        .path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    let (document_id, file_name, section, usage_count, last_used, created_at) = match record {
        Some(r) => (
            r.document_id.clone(),
            r.file_name.clone(),
            r.section_title.clone().unwrap_or_default(),
            r.usage_count,
            r.last_used,
            r.created_at,
        ),
        None => (
            UNKNOWN.to_string(),
            UNKNOWN.to_string(),
            String::new(),
            0,
            None,
            file.modified,
        ),
    };

    CacheEntry {
        cache_file: file.path,
        cache_name,
        document_id,
        file_name,
        section,
        size_bytes: file.size_bytes,
        size_mb: file.size_bytes as f64 / (1024.0 * 1024.0),
        created_at,
        last_used,
        usage_count,
        registered: record.is_some(),
    }
}

/// Lookup of usage records by full path.
///
/// Records are matched by their stored path, then by canonical path. A record
/// whose path does not resolve is stale: it is reported and never joined, even
/// when a scanned file shares its file name.
struct RecordIndex<'a> {
    by_path: HashMap<PathBuf, &'a UsageRecord>,
    by_canonical: HashMap<PathBuf, &'a UsageRecord>,
}

impl<'a> RecordIndex<'a> {
    fn new(records: &'a [UsageRecord]) -> Self {
        let mut by_path = HashMap::new();
        let mut by_canonical = HashMap::new();
        let mut stale = 0usize;

        for record in records {
            by_path.insert(record.cache_path.clone(), record);
            match record.cache_path.canonicalize() {
                Ok(canonical) => {
                    by_canonical.insert(canonical, record);
                }
                Err(_) => {
                    stale += 1;
                    debug!(
                        cache = %record.cache_path.display(),
                        document_id = record.document_id,
                        "Registry record has no cache file"
                    );
                }
            }
        }

        if stale > 0 {
            warn!(stale, "Ignoring registry records whose cache file is gone");
        }

        Self {
            by_path,
            by_canonical,
        }
    }

    fn lookup(&self, path: &Path) -> Option<&'a UsageRecord> {
        if let Some(record) = self.by_path.get(path) {
            return Some(*record);
        }
        path.canonicalize()
            .ok()
            .and_then(|canonical| self.by_canonical.get(&canonical).copied())
    }
}
