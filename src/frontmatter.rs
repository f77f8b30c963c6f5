//! Frontmatter codec: a deliberately narrow YAML subset.
//!
//! Documents carry their sync projection in a leading `---`-delimited block.
//! The format is flat `key: value` scalars plus single-level `- item`
//! sequences of scalars, nothing else. This is NOT a YAML parser and must
//! not grow into one: existing vaults were written against exactly this
//! subset, and widening it would change how persisted documents read back.
//!
//! Decoding never fails. A missing or unterminated block is "no metadata
//! yet" (empty map); lines the subset does not recognize (nested maps such
//! as a `linear:` config subsection) are skipped, not fatal.

use std::sync::OnceLock;

use regex::Regex;

/// A frontmatter value. Sequences hold scalars only; nesting is outside the
/// supported subset.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Str(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    Seq(Vec<Value>),
}

impl Value {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_seq(&self) -> Option<&[Value]> {
        match self {
            Value::Seq(items) => Some(items),
            _ => None,
        }
    }

    /// Scalar rendered the way a human reads it (no quoting).
    pub fn display(&self) -> String {
        match self {
            Value::Str(s) => s.clone(),
            Value::Int(n) => n.to_string(),
            Value::Float(f) => format_float(*f),
            Value::Bool(b) => b.to_string(),
            Value::Seq(items) => items
                .iter()
                .map(Value::display)
                .collect::<Vec<_>>()
                .join(", "),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Int(n)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

/// Insertion-ordered key→value map. Order is preserved so `encode` output is
/// deterministic and a decode/encode round-trip does not shuffle keys under
/// the user's cursor.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FrontmatterMap {
    entries: Vec<(String, Value)>,
}

impl FrontmatterMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(Value::as_str)
    }

    pub fn get_int(&self, key: &str) -> Option<i64> {
        self.get(key).and_then(Value::as_int)
    }

    /// Insert or replace. Replacement keeps the key's original position.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        let key = key.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((key, value)),
        }
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        let idx = self.entries.iter().position(|(k, _)| k == key)?;
        Some(self.entries.remove(idx).1)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.iter().any(|(k, _)| k == key)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }
}

// Compile-once scalar-typing patterns via OnceLock.
fn re_int() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\d+$").unwrap())
}

fn re_float() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\d+\.\d+$").unwrap())
}

fn re_key_line() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    // Top-level only: first char must be non-whitespace. Key runs to the
    // first colon.
    RE.get_or_init(|| Regex::new(r"^(\S[^:]*):\s*(.*)$").unwrap())
}

fn re_seq_item() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\s+-\s+(.*)$").unwrap())
}

/// Byte offset just past the closing `---` line of a leading frontmatter
/// block, or None when the document has no well-formed block.
pub fn frontmatter_span(text: &str) -> Option<usize> {
    let mut offset = 0usize;
    let mut lines = text.split_inclusive('\n');

    let first = lines.next()?;
    if first.trim_end_matches(['\r', '\n']) != "---" {
        return None;
    }
    offset += first.len();

    for line in lines {
        offset += line.len();
        if line.trim_end_matches(['\r', '\n']) == "---" {
            return Some(offset);
        }
    }
    // Opening fence without a closing one: malformed, treated as no block.
    None
}

/// Document text with any leading frontmatter block removed.
pub fn strip_frontmatter(text: &str) -> &str {
    match frontmatter_span(text) {
        Some(end) => &text[end..],
        None => text,
    }
}

/// Inner text of the leading frontmatter block, fences excluded.
///
/// Gives callers that understand more than the flat subset (the nested
/// config section reader) access to the raw lines `decode` skips.
pub fn raw_block(text: &str) -> Option<&str> {
    let end = frontmatter_span(text)?;
    let block = &text[..end];
    let start = block.find('\n')? + 1;
    // The block's final line is the closing fence by construction.
    let trimmed = block.strip_suffix('\n').unwrap_or(block);
    let close = trimmed.rfind('\n').map(|i| i + 1).unwrap_or(0);
    if close < start {
        return Some("");
    }
    Some(&block[start..close])
}

/// Extract the leading frontmatter block as a typed map.
///
/// Missing or malformed block → empty map, never an error.
pub fn decode(text: &str) -> FrontmatterMap {
    let mut map = FrontmatterMap::new();
    let Some(end) = frontmatter_span(text) else {
        return map;
    };

    // Lines strictly between the two fences.
    let inner: Vec<&str> = text[..end]
        .lines()
        .skip(1)
        .take_while(|line| line.trim_end() != "---")
        .collect();

    let mut i = 0;
    while i < inner.len() {
        let line = inner[i];
        i += 1;

        let Some(caps) = re_key_line().captures(line) else {
            // Indented continuation (nested map child) or stray sequence
            // item: outside the subset, skipped.
            continue;
        };
        let key = caps[1].trim().to_string();
        let rest = caps[2].trim();

        if rest.is_empty() {
            // Bare `key:` is either a sequence header or a null/nested value.
            let mut items = Vec::new();
            while i < inner.len() {
                if let Some(item) = re_seq_item().captures(inner[i]) {
                    items.push(parse_scalar(item[1].trim()));
                    i += 1;
                } else {
                    break;
                }
            }
            if !items.is_empty() {
                map.insert(key, Value::Seq(items));
            }
            // Null values and nested maps are omitted, mirroring encode.
        } else {
            map.insert(key, parse_scalar(rest));
        }
    }

    map
}

/// Rewrite `text` so its leading frontmatter block is exactly the encoding
/// of `map`. An existing block is replaced; otherwise one is prepended.
/// Body bytes outside the block are never altered.
pub fn encode(text: &str, map: &FrontmatterMap) -> String {
    let block = encode_block(map);
    match frontmatter_span(text) {
        Some(end) => format!("{}{}", block, &text[end..]),
        None => format!("{}{}", block, text),
    }
}

fn encode_block(map: &FrontmatterMap) -> String {
    let mut out = String::from("---\n");
    for (key, value) in map.iter() {
        match value {
            Value::Seq(items) => {
                // An empty sequence reads back as nothing; omit it the same
                // way null values are omitted.
                if items.is_empty() {
                    continue;
                }
                out.push_str(key);
                out.push_str(":\n");
                for item in items {
                    out.push_str("  - ");
                    out.push_str(&encode_scalar(item));
                    out.push('\n');
                }
            }
            scalar => {
                out.push_str(key);
                out.push_str(": ");
                out.push_str(&encode_scalar(scalar));
                out.push('\n');
            }
        }
    }
    out.push_str("---\n");
    out
}

fn parse_scalar(raw: &str) -> Value {
    if raw.len() >= 2 {
        let bytes = raw.as_bytes();
        if (bytes[0] == b'"' && bytes[raw.len() - 1] == b'"')
            || (bytes[0] == b'\'' && bytes[raw.len() - 1] == b'\'')
        {
            return Value::Str(raw[1..raw.len() - 1].to_string());
        }
    }
    if re_int().is_match(raw) {
        if let Ok(n) = raw.parse::<i64>() {
            return Value::Int(n);
        }
        // Wider than i64: fall through to string.
        return Value::Str(raw.to_string());
    }
    if re_float().is_match(raw) {
        if let Ok(f) = raw.parse::<f64>() {
            return Value::Float(f);
        }
    }
    match raw {
        "true" => Value::Bool(true),
        "false" => Value::Bool(false),
        _ => Value::Str(raw.to_string()),
    }
}

fn encode_scalar(value: &Value) -> String {
    match value {
        Value::Str(s) => encode_string(s),
        Value::Int(n) => n.to_string(),
        Value::Float(f) => format_float(*f),
        Value::Bool(b) => b.to_string(),
        // Nested sequences are outside the subset; render flat so encode
        // never panics on a hand-built map.
        Value::Seq(items) => encode_string(
            &items
                .iter()
                .map(Value::display)
                .collect::<Vec<_>>()
                .join(", "),
        ),
    }
}

/// Quote strings that would re-type on read ("123", "true", "2.5"), are
/// empty, carry edge whitespace, or already look quoted. Everything else
/// stays bare so documents keep reading naturally.
fn encode_string(s: &str) -> String {
    let needs_quoting = s.is_empty()
        || s != s.trim()
        || re_int().is_match(s)
        || re_float().is_match(s)
        || s == "true"
        || s == "false";

    let looks_double_quoted = s.len() >= 2 && s.starts_with('"') && s.ends_with('"');
    let looks_single_quoted = s.len() >= 2 && s.starts_with('\'') && s.ends_with('\'');

    if looks_double_quoted {
        format!("'{}'", s)
    } else if looks_single_quoted || needs_quoting {
        format!("\"{}\"", s)
    } else {
        s.to_string()
    }
}

/// Floats must keep a decimal point or they would re-read as integers.
fn format_float(f: f64) -> String {
    if f.fract() == 0.0 {
        format!("{:.1}", f)
    } else {
        format!("{}", f)
    }
}
