//! Renderings of a cache listing.
//!
//! Both formats take the already filtered and sorted entries, so the JSON and
//! the table always describe the same sequence.

use crate::registry::reconciler::CacheEntry;

const RULE_WIDTH: usize = 120;

/// Machine-readable listing (pretty-printed JSON array).
pub fn render_json(entries: &[CacheEntry]) -> serde_json::Result<String> {
    serde_json::to_string_pretty(entries)
}

/// Fixed-column listing with a total line.
pub fn render_table(entries: &[CacheEntry]) -> String {
    let rule = "-".repeat(RULE_WIDTH);

    let mut out = format!(
        "{:30} {:30} {:20} {:>10} {:>5} {}\n",
        "Document", "File", "Section", "Size (MB)", "Usage", "Last Used"
    );
    out.push_str(&rule);
    out.push('\n');

    for entry in entries {
        let last_used = entry
            .last_used
            .map(|t| t.format("%Y-%m-%d").to_string())
            .unwrap_or_else(|| "Never".to_string());
        out.push_str(&format!(
            "{:30} {:30} {:20} {:>10} {:>5} {}\n",
            truncate(&entry.document_id, 30),
            truncate(&entry.file_name, 30),
            truncate(&entry.section, 20),
            format!("{:.2}MB", entry.size_mb),
            entry.usage_count,
            last_used
        ));
    }

    let total_mb: f64 = entries.iter().map(|e| e.size_mb).sum();
    out.push_str(&rule);
    out.push('\n');
    out.push_str(&format!(
        "Total caches: {} ({total_mb:.2}MB)\n",
        entries.len()
    ));
    out
}

fn truncate(s: &str, width: usize) -> &str {
    match s.char_indices().nth(width) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
