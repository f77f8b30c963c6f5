//! Structured-text parser: inline tags, the nested config section, and the
//! one-way body-to-description conversion.
//!
//! Two sources feed issue configuration. A document can carry a nested
//! `linear:` section inside its frontmatter (block config), and its body can
//! carry `@kind/value` tags (`@team/ENG`, `@assignee/Bob Smith`) plus
//! `#label` tags. Inline tags override block config; labels accumulate.
//!
//! Tags are whitespace-anchored: a token counts only at the start of a line
//! or after whitespace, so `bob@example.com` and `issue#42` are plain text.
//! An `@kind/` value runs to the end of its line or to the next anchored
//! tag, whichever comes first, and is trimmed. Labels are single tokens.

use std::sync::OnceLock;

use regex::Regex;

use crate::frontmatter;
use crate::note_config::NoteConfig;

/// Name of the nested frontmatter section holding block config.
const BLOCK_SECTION: &str = "linear:";

/// One recognized tag occurrence, in document order. Offsets are byte
/// positions into the scanned text and cover the whole token including its
/// value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InlineTag {
    /// Lowercased kind (`team`, `assignee`, ...); `label` for `#` tags.
    pub kind: String,
    pub value: String,
    pub start: usize,
    pub end: usize,
}

/// Folded view of a body's tags.
///
/// For `@kind/value` tags the last occurrence of a kind wins. Labels
/// accumulate in first-seen order with duplicates dropped. Unknown kinds
/// are stripped from cleaned text but set nothing here.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InlineTags {
    pub team: Option<String>,
    pub project: Option<String>,
    pub assignee: Option<String>,
    pub status: Option<String>,
    pub priority: Option<u8>,
    pub estimate: Option<f64>,
    pub labels: Vec<String>,
}

// Compile-once regex patterns via OnceLock.
fn re_config_tag() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^@([A-Za-z][A-Za-z0-9_-]*)/").unwrap())
}

fn re_label_tag() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^#([A-Za-z0-9][A-Za-z0-9_/-]*)").unwrap())
}

fn re_md_link() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\[[^\]]+\]\([^)]+\)$").unwrap())
}

fn re_wiki_alias() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\[\[[^\]\|]+\|([^\]]+)\]\]").unwrap())
}

fn re_wiki_link() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\[\[([^\]]+)\]\]").unwrap())
}

fn re_highlight() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"==([^=]+)==").unwrap())
}

fn re_callout() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(\s*)>\s*\[!([A-Za-z]+)\][-+]?\s*(.*)$").unwrap())
}

/// Scan one line for anchored tag tokens, left to right. Offsets are
/// relative to the line.
fn line_tags(line: &str) -> Vec<InlineTag> {
    let bytes = line.as_bytes();

    // First pass: anchored token starts. A config tag's value cannot be
    // sized until the following token (if any) is known.
    struct Raw {
        start: usize,
        kind: Option<String>, // None for labels
        value_start: usize,
        label: Option<(usize, String)>, // (end, name)
    }
    let mut raws: Vec<Raw> = Vec::new();
    for (i, b) in bytes.iter().enumerate() {
        if *b != b'@' && *b != b'#' {
            continue;
        }
        // Whitespace-anchored only.
        if i > 0 && !bytes[i - 1].is_ascii_whitespace() {
            continue;
        }
        let rest = &line[i..];
        if *b == b'@' {
            if let Some(caps) = re_config_tag().captures(rest) {
                raws.push(Raw {
                    start: i,
                    kind: Some(caps[1].to_lowercase()),
                    value_start: i + caps[0].len(),
                    label: None,
                });
            }
        } else if let Some(caps) = re_label_tag().captures(rest) {
            raws.push(Raw {
                start: i,
                kind: None,
                value_start: 0,
                label: Some((i + caps[0].len(), caps[1].to_string())),
            });
        }
    }

    let mut tags = Vec::with_capacity(raws.len());
    for (idx, raw) in raws.iter().enumerate() {
        match (&raw.kind, &raw.label) {
            (Some(kind), _) => {
                let until = raws.get(idx + 1).map(|r| r.start).unwrap_or(line.len());
                let value = line[raw.value_start..until].trim();
                tags.push(InlineTag {
                    kind: kind.clone(),
                    value: value.to_string(),
                    start: raw.start,
                    end: raw.value_start + line[raw.value_start..until].trim_end().len(),
                });
            }
            (None, Some((end, name))) => {
                tags.push(InlineTag {
                    kind: "label".to_string(),
                    value: name.clone(),
                    start: raw.start,
                    end: *end,
                });
            }
            (None, None) => {}
        }
    }
    tags
}

/// All tag occurrences in a body, in document order, with byte spans.
pub fn extract_inline_tags(text: &str) -> Vec<InlineTag> {
    let mut tags = Vec::new();
    let mut offset = 0;
    for segment in text.split_inclusive('\n') {
        for mut tag in line_tags(segment) {
            tag.start += offset;
            tag.end += offset;
            tags.push(tag);
        }
        offset += segment.len();
    }
    tags
}

/// Fold a body's tags into their effective values. Empty `@kind/` values
/// are ignored.
pub fn extract_tags(text: &str) -> InlineTags {
    let mut tags = InlineTags::default();
    for tag in extract_inline_tags(text) {
        if tag.kind == "label" {
            if !tags.labels.iter().any(|l| *l == tag.value) {
                tags.labels.push(tag.value);
            }
            continue;
        }
        if tag.value.is_empty() {
            continue;
        }
        match tag.kind.as_str() {
            "team" => tags.team = Some(tag.value),
            "project" => tags.project = Some(tag.value),
            "assignee" => tags.assignee = Some(tag.value),
            "status" => tags.status = Some(tag.value),
            "priority" => tags.priority = Some(parse_priority(&tag.value)),
            "estimate" => tags.estimate = tag.value.parse().ok(),
            _ => {}
        }
    }
    tags
}

/// Effective creation config for a document: nested frontmatter section
/// first, then inline tags on top.
///
/// Scalar kinds override; labels accumulate. Inline `status` and `estimate`
/// have no folder-config counterpart and are read via [`extract_tags`] by
/// the creation path instead.
pub fn extract_config(text: &str) -> NoteConfig {
    let mut config = block_config(text);
    let tags = extract_tags(frontmatter::strip_frontmatter(text));

    if tags.team.is_some() {
        config.team = tags.team;
    }
    if tags.project.is_some() {
        config.project = tags.project;
    }
    if tags.assignee.is_some() {
        config.assignee = tags.assignee;
    }
    if tags.priority.is_some() {
        config.priority = tags.priority;
    }
    if !tags.labels.is_empty() {
        let mut labels = config.labels.take().unwrap_or_default();
        for label in tags.labels {
            if !labels.contains(&label) {
                labels.push(label);
            }
        }
        config.labels = Some(labels);
    }
    config
}

/// Read the nested `linear:` section out of the frontmatter block.
///
/// The flat codec skips nested maps; this is the one reader that
/// understands them, and only to this fixed depth.
fn block_config(text: &str) -> NoteConfig {
    let Some(block) = frontmatter::raw_block(text) else {
        return NoteConfig::default();
    };

    let mut config = NoteConfig::default();
    let mut in_section = false;
    let mut seq_key: Option<String> = None;

    for line in block.lines() {
        if !line.starts_with(' ') && !line.starts_with('\t') {
            in_section = line.trim_end() == BLOCK_SECTION;
            seq_key = None;
            continue;
        }
        if !in_section {
            continue;
        }
        let trimmed = line.trim();
        if let Some(item) = trimmed.strip_prefix("- ") {
            if seq_key.as_deref() == Some("labels") {
                let label = unquote(item.trim());
                let labels = config.labels.get_or_insert_with(Vec::new);
                if !labels.contains(&label) {
                    labels.push(label);
                }
            }
            continue;
        }
        let Some((key, value)) = trimmed.split_once(':') else {
            continue;
        };
        let key = key.trim();
        let value = value.trim();
        if value.is_empty() {
            seq_key = Some(key.to_string());
            continue;
        }
        seq_key = None;
        match key {
            "workspace" => config.workspace = Some(unquote(value)),
            "team" => config.team = Some(unquote(value)),
            "project" => config.project = Some(unquote(value)),
            "assignee" => config.assignee = Some(unquote(value)),
            "priority" => config.priority = Some(parse_priority(&unquote(value))),
            "autoSync" => config.auto_sync = value.parse().ok(),
            "template" => config.template = Some(unquote(value)),
            _ => {}
        }
    }
    config
}

fn unquote(raw: &str) -> String {
    if raw.len() >= 2 {
        let bytes = raw.as_bytes();
        if (bytes[0] == b'"' && bytes[raw.len() - 1] == b'"')
            || (bytes[0] == b'\'' && bytes[raw.len() - 1] == b'\'')
        {
            return raw[1..raw.len() - 1].to_string();
        }
    }
    raw.to_string()
}

/// Map a priority word or digit to Linear's 0-4 scale.
///
/// Digits clamp into range. The word table is carried over from existing
/// vault data unchanged (critical sits with urgent at 1, not with high);
/// unrecognized words fall back to 3 (medium).
pub fn parse_priority(value: &str) -> u8 {
    let value = value.trim();
    if let Ok(n) = value.parse::<i64>() {
        return n.clamp(0, 4) as u8;
    }
    match value.to_lowercase().as_str() {
        "urgent" | "critical" => 1,
        "high" => 2,
        "medium" | "normal" => 3,
        "low" => 4,
        _ => 3,
    }
}

/// Remove all tag tokens from a body, keeping the prose.
///
/// Lines that carried only tags are dropped. Lines that had tags get their
/// remaining words re-joined with single spaces (leading indent preserved);
/// lines without tags pass through untouched.
pub fn clean_body(text: &str) -> String {
    let mut out: Vec<String> = Vec::new();
    for line in text.lines() {
        let tags = line_tags(line);
        if tags.is_empty() {
            out.push(line.to_string());
            continue;
        }
        let mut kept = String::new();
        let mut cursor = 0;
        for tag in &tags {
            if tag.start > cursor {
                kept.push_str(&line[cursor..tag.start]);
            }
            cursor = cursor.max(tag.end);
        }
        if cursor < line.len() {
            kept.push_str(&line[cursor..]);
        }
        if kept.trim().is_empty() {
            continue;
        }
        let indent_len = line.len() - line.trim_start().len();
        let rejoined = kept.split_whitespace().collect::<Vec<_>>().join(" ");
        out.push(format!("{}{}", &line[..indent_len], rejoined));
    }
    out.join("\n")
}

/// Text of the first level-1 heading, if any.
pub fn first_heading(text: &str) -> Option<String> {
    for line in text.lines() {
        if let Some(rest) = line.trim_start().strip_prefix("# ") {
            return Some(rest.trim().to_string());
        }
    }
    None
}

/// Strip the link trailer appended by the note template, when present.
///
/// The trailer is the last standalone `---` line whose first following
/// non-blank line is a markdown link. Horizontal rules elsewhere in the
/// body are left alone.
pub fn strip_trailer(body: &str) -> &str {
    let mut last_rule: Option<usize> = None;
    let mut offset = 0;
    for line in body.split_inclusive('\n') {
        if line.trim() == "---" {
            last_rule = Some(offset);
        }
        offset += line.len();
    }
    let Some(start) = last_rule else {
        return body;
    };
    let mut lines = body[start..].lines();
    lines.next(); // the --- line itself
    for line in lines {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        if re_md_link().is_match(trimmed) {
            return &body[..start];
        }
        break;
    }
    body
}

/// Body prepared for description comparison: trailer gone, leading title
/// heading gone, edges trimmed.
pub fn note_body_for_compare(body: &str) -> String {
    let without_trailer = strip_trailer(body);
    let mut out = String::with_capacity(without_trailer.len());
    let mut seen_content = false;
    for line in without_trailer.lines() {
        if !seen_content {
            if line.trim().is_empty() {
                out.push('\n');
                continue;
            }
            seen_content = true;
            // The title heading mirrors the remote title, not the description.
            if line.trim_start().starts_with("# ") {
                continue;
            }
        }
        out.push_str(line);
        out.push('\n');
    }
    out.trim().to_string()
}

/// Build a remote-facing description from a full document.
///
/// One-way and lossy: drops frontmatter, the title heading and link trailer
/// (both mirror dedicated fields), and every tag token, then rewrites
/// vault-only markdown for the remote renderer. There is no inverse.
pub fn generate_description(text: &str) -> String {
    let body = frontmatter::strip_frontmatter(text);
    let body = note_body_for_compare(body);
    let body = clean_body(&body);
    to_remote_markdown(&body).trim().to_string()
}

/// Collapse vault-only markdown: wiki-links become their display text,
/// highlights become bold, callout headers become plain quoted labels.
fn to_remote_markdown(text: &str) -> String {
    let text = re_wiki_alias().replace_all(text, "$1");
    let text = re_wiki_link().replace_all(&text, "$1");
    let text = re_highlight().replace_all(&text, "**$1**");

    let mut out: Vec<String> = Vec::new();
    for line in text.lines() {
        if let Some(caps) = re_callout().captures(line) {
            let kind = capitalize(&caps[2]);
            let title = caps[3].trim();
            if title.is_empty() {
                out.push(format!("{}> {}:", &caps[1], kind));
            } else {
                out.push(format!("{}> {}: {}", &caps[1], kind, title));
            }
        } else {
            out.push(line.to_string());
        }
    }
    out.join("\n")
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + &chars.as_str().to_lowercase(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_tags_basic() {
        let tags = extract_tags("@team/ENG @priority/high");
        assert_eq!(tags.team.as_deref(), Some("ENG"));
        assert_eq!(tags.priority, Some(2));
        assert!(tags.labels.is_empty());
    }

    #[test]
    fn multiword_value_terminates_at_next_tag() {
        let tags = extract_tags("@assignee/Bob Smith @priority/high");
        assert_eq!(tags.assignee.as_deref(), Some("Bob Smith"));
        assert_eq!(tags.priority, Some(2));
    }

    #[test]
    fn value_runs_to_end_of_line() {
        let tags = extract_tags("@status/In Progress\nmore prose here");
        assert_eq!(tags.status.as_deref(), Some("In Progress"));
    }

    #[test]
    fn label_terminates_config_value() {
        let tags = extract_tags("@assignee/Bob #bug");
        assert_eq!(tags.assignee.as_deref(), Some("Bob"));
        assert_eq!(tags.labels, vec!["bug"]);
    }

    #[test]
    fn labels_accumulate_and_dedup() {
        let tags = extract_tags("fix this #bug soon #bug #urgent");
        assert_eq!(tags.labels, vec!["bug", "urgent"]);
    }

    #[test]
    fn heading_is_not_a_label() {
        let text = "# My Title\n\nbody with #bug\n## Section\n";
        let tags = extract_tags(text);
        assert_eq!(tags.labels, vec!["bug"]);
        assert_eq!(first_heading(text).as_deref(), Some("My Title"));
    }

    #[test]
    fn unanchored_tokens_are_plain_text() {
        let tags = extract_tags("mail bob@example.com about issue#42");
        assert_eq!(tags, InlineTags::default());
    }

    #[test]
    fn last_config_tag_wins() {
        let tags = extract_tags("@team/ENG\nlater thoughts\n@team/OPS");
        assert_eq!(tags.team.as_deref(), Some("OPS"));
    }

    #[test]
    fn empty_value_ignored() {
        let tags = extract_tags("@team/");
        assert!(tags.team.is_none());
    }

    #[test]
    fn tag_spans_are_ordered_and_exact() {
        let text = "@team/ENG #bug done";
        let tags = extract_inline_tags(text);
        assert_eq!(tags.len(), 2);
        assert_eq!(tags[0].kind, "team");
        assert_eq!(tags[0].value, "ENG");
        assert_eq!((tags[0].start, tags[0].end), (0, 9));
        assert_eq!(tags[1].kind, "label");
        assert_eq!(tags[1].value, "bug");
        assert_eq!((tags[1].start, tags[1].end), (10, 14));
        assert_eq!(&text[tags[0].start..tags[0].end], "@team/ENG");
        assert_eq!(&text[tags[1].start..tags[1].end], "#bug");
    }

    #[test]
    fn tag_spans_across_lines() {
        let text = "first line\n#one\n#two\n";
        let tags = extract_inline_tags(text);
        assert_eq!(tags.len(), 2);
        assert!(tags[0].start < tags[1].start);
        assert_eq!(&text[tags[1].start..tags[1].end], "#two");
    }

    #[test]
    fn priority_vocabulary() {
        assert_eq!(parse_priority("urgent"), 1);
        assert_eq!(parse_priority("critical"), 1);
        assert_eq!(parse_priority("high"), 2);
        assert_eq!(parse_priority("medium"), 3);
        assert_eq!(parse_priority("normal"), 3);
        assert_eq!(parse_priority("low"), 4);
        assert_eq!(parse_priority("2"), 2);
        assert_eq!(parse_priority("7"), 4);
        assert_eq!(parse_priority("-1"), 0);
        assert_eq!(parse_priority("nonsense"), 3);
    }

    #[test]
    fn estimate_parses_numbers_only() {
        let tags = extract_tags("@estimate/3");
        assert_eq!(tags.estimate, Some(3.0));
        let tags = extract_tags("@estimate/xl");
        assert_eq!(tags.estimate, None);
    }

    #[test]
    fn block_config_from_nested_section() {
        let doc = "---\nlinear_id: abc\nlinear:\n  team: ENG\n  assignee: Alice\n  priority: high\n  autoSync: false\n  labels:\n    - bug\n    - backend\n---\nbody\n";
        let config = extract_config(doc);
        assert_eq!(config.team.as_deref(), Some("ENG"));
        assert_eq!(config.assignee.as_deref(), Some("Alice"));
        assert_eq!(config.priority, Some(2));
        assert_eq!(config.auto_sync, Some(false));
        assert_eq!(
            config.labels.as_deref(),
            Some(&["bug".to_string(), "backend".to_string()][..])
        );
    }

    #[test]
    fn inline_tag_overrides_block_config() {
        let doc = "---\nlinear:\n  assignee: Alice\n---\nWork notes @assignee/Bob\n";
        let config = extract_config(doc);
        assert_eq!(config.assignee.as_deref(), Some("Bob"));
    }

    #[test]
    fn labels_accumulate_across_sources() {
        let doc = "---\nlinear:\n  labels:\n    - bug\n---\nSee #bug and #urgent\n";
        let config = extract_config(doc);
        assert_eq!(
            config.labels.as_deref(),
            Some(&["bug".to_string(), "urgent".to_string()][..])
        );
    }

    #[test]
    fn keys_outside_section_ignored() {
        let doc = "---\nteam: NOPE\nlinear:\n  team: ENG\nother:\n  team: ALSO-NOPE\n---\n";
        let config = extract_config(doc);
        assert_eq!(config.team.as_deref(), Some("ENG"));
    }

    #[test]
    fn clean_body_strips_tags() {
        let cleaned = clean_body("Fix the flow @priority/high\n\nDetails #bug here");
        assert_eq!(cleaned, "Fix the flow\n\nDetails here");
    }

    #[test]
    fn clean_body_drops_tag_only_lines() {
        let cleaned = clean_body("Prose line\n@team/ENG #bug\nMore prose");
        assert_eq!(cleaned, "Prose line\nMore prose");
    }

    #[test]
    fn clean_body_preserves_list_indent() {
        let cleaned = clean_body("- top\n  - nested item #bug");
        assert_eq!(cleaned, "- top\n  - nested item");
    }

    #[test]
    fn clean_body_leaves_plain_lines_untouched() {
        let text = "No    tags  here\nplain";
        assert_eq!(clean_body(text), text);
    }

    #[test]
    fn trailer_stripped_when_link_follows() {
        let body = "# T\n\nHello\n\n---\n[View in Linear](https://linear.app/x)\n";
        assert_eq!(strip_trailer(body), "# T\n\nHello\n\n");
    }

    #[test]
    fn trailer_needs_a_link() {
        let body = "# T\n\nHello\n\n---\nJust an aside\n";
        assert_eq!(strip_trailer(body), body);
    }

    #[test]
    fn mid_document_rule_survives() {
        let body = "A\n\n---\n\nB\n\n---\n[View in Linear](https://linear.app/x)\n";
        assert_eq!(strip_trailer(body), "A\n\n---\n\nB\n\n");
    }

    #[test]
    fn compare_body_basic() {
        assert_eq!(note_body_for_compare("# T\nHello\n"), "Hello");
    }

    #[test]
    fn compare_body_strips_heading_and_trailer() {
        let body =
            "# Fix login\n\nUsers get logged out.\n\n---\n[View in Linear](https://linear.app/x)\n";
        assert_eq!(note_body_for_compare(body), "Users get logged out.");
    }

    #[test]
    fn compare_body_keeps_later_headings() {
        let body = "# Title\n\nIntro\n\n# Not the title\nMore\n";
        assert_eq!(note_body_for_compare(body), "Intro\n\n# Not the title\nMore");
    }

    #[test]
    fn compare_body_without_heading() {
        assert_eq!(note_body_for_compare("Just prose\n"), "Just prose");
    }

    #[test]
    fn description_drops_metadata_and_rewrites_links() {
        let doc = "---\nlinear_id: abc\n---\n# Title\n\nSee [[Roadmap|the roadmap]] and [[Notes]] #bug\n\n---\n[View in Linear](https://linear.app/x)\n";
        assert_eq!(
            generate_description(doc),
            "See the roadmap and Notes"
        );
    }

    #[test]
    fn description_normalizes_callouts_and_highlights() {
        let doc = "# T\n\n> [!warning] Check twice\n> details\n\nkeep ==this== text\n";
        assert_eq!(
            generate_description(doc),
            "> Warning: Check twice\n> details\n\nkeep **this** text"
        );
    }

    #[test]
    fn description_of_empty_body() {
        assert_eq!(generate_description("---\nlinear_id: abc\n---\n"), "");
    }
}
