use std::path::Path;

use chrono::{DateTime, Utc};

/// Convert a display name to a URL-safe kebab-case slug.
///
/// Example: "Fix login flow" → "fix-login-flow"
pub fn slugify(name: &str) -> String {
    name.to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { '-' })
        .collect::<String>()
        .split('-')
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("-")
}

/// Write a string to `path` atomically: write to a sibling temp file, then
/// rename over the target. Readers never observe a half-written document.
pub fn atomic_write_str(path: &Path, content: &str) -> std::io::Result<()> {
    let tmp = path.with_extension("tmp~");
    std::fs::write(&tmp, content)?;
    std::fs::rename(&tmp, path)
}

/// Parse an ISO-8601 / RFC 3339 timestamp, tolerating a missing offset
/// (treated as UTC). Returns None rather than erroring; timestamps in
/// frontmatter are user-editable text.
pub fn parse_iso(value: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.with_timezone(&Utc));
    }
    // Bare "YYYY-MM-DDTHH:MM:SS" without offset
    chrono::NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S")
        .ok()
        .map(|naive| naive.and_utc())
}
