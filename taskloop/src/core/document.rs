//! Task document model and metadata codec.
//!
//! A task is a UTF-8 markdown document: a `# ` title line, a metadata block
//! and a free-form body. Metadata is read from either an HTML comment block
//!
//! ```text
//! <!-- AGENT METADATA
//!   received_at : 2026-01-01 10:00:00
//!   source      : gmail
//! -->
//! ```
//!
//! or YAML-style frontmatter. When both are present the comment block wins.
//! Inside a block the first occurrence of a key wins. Rendering always emits
//! the comment block form right after the title. Keys and values that would
//! not survive the plain `key : value` form (colons in keys, surrounding
//! whitespace, line breaks, a leading quote) are written as JSON strings.

use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;

use crate::core::types::{Approval, RiskLevel, TaskStatus};

const BLOCK_OPEN: &str = "<!-- AGENT METADATA";
const BLOCK_CLOSE: &str = "-->";

static COMMENT_BLOCK_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)<!--\s*(?:AGENT\s+)?METADATA[ \t]*\r?\n(.*?)-->[ \t]*\r?\n?")
        .expect("metadata block regex should compile")
});

/// Ordered key/value metadata.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Metadata {
    entries: Vec<(String, String)>,
}

impl Metadata {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Set a value, keeping the key's position if it already exists.
    pub fn set(&mut self, key: &str, value: impl AsRef<str>) {
        let value = value.as_ref().to_string();
        match self.entries.iter_mut().find(|(k, _)| k == key) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((key.to_string(), value)),
        }
    }

    /// Set only if the key is absent or empty.
    pub fn set_default(&mut self, key: &str, value: impl AsRef<str>) {
        if self.get(key).is_none_or(str::is_empty) {
            self.set(key, value);
        }
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        let idx = self.entries.iter().position(|(k, _)| k == key)?;
        Some(self.entries.remove(idx).1)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn parse_typed<T: FromStr>(&self, key: &str) -> Option<T> {
        self.get(key).and_then(|v| v.parse().ok())
    }

    pub fn status(&self) -> Option<TaskStatus> {
        self.parse_typed("status")
    }

    pub fn approval(&self) -> Option<Approval> {
        self.parse_typed("approval")
    }

    pub fn risk_level(&self) -> Option<RiskLevel> {
        self.parse_typed("risk_level")
    }

    /// Retry counter; unparsable values count as zero.
    pub fn retries(&self) -> u32 {
        self.parse_typed("retries").unwrap_or(0)
    }

    pub fn source(&self) -> Option<&str> {
        self.get("source").filter(|s| !s.is_empty())
    }

    pub fn task_type(&self) -> Option<&str> {
        self.get("type").filter(|s| !s.is_empty())
    }

    /// Parse `key : value` lines, keeping the first occurrence of each key.
    fn from_lines<'a>(lines: impl Iterator<Item = &'a str>, unquote: bool) -> Self {
        let mut meta = Self::new();
        for line in lines {
            let Some((key, value)) = parse_line(line, unquote) else {
                continue;
            };
            if meta.get(&key).is_none() {
                meta.entries.push((key, value));
            }
        }
        meta
    }

    /// Render the canonical comment block (no trailing newline).
    pub fn render_block(&self) -> String {
        let rendered: Vec<(String, String)> = self
            .entries
            .iter()
            .map(|(k, v)| {
                let key = if key_needs_quoting(k) { quote(k) } else { k.clone() };
                let value = if value_needs_quoting(v) { quote(v) } else { v.clone() };
                (key, value)
            })
            .collect();
        let width = rendered.iter().map(|(k, _)| k.chars().count()).max().unwrap_or(0);
        let mut out = String::from(BLOCK_OPEN);
        out.push('\n');
        for (key, value) in &rendered {
            let line = format!("  {key:<width$} : {value}");
            out.push_str(line.trim_end());
            out.push('\n');
        }
        out.push_str(BLOCK_CLOSE);
        out
    }
}

/// Split one `key : value` line. Either side may be a JSON string.
fn parse_line(line: &str, unquote: bool) -> Option<(String, String)> {
    let line = line.trim_start();
    let (key, rest) = if line.starts_with('"') {
        let (key, used) = leading_json_string(line)?;
        (key, line[used..].trim_start().strip_prefix(':')?)
    } else {
        let (key, rest) = line.split_once(':')?;
        let key = key.trim();
        if key.is_empty() {
            return None;
        }
        (key.to_string(), rest)
    };
    let raw = rest.trim();
    let value = match leading_json_string(raw) {
        Some((value, used)) if used == raw.len() => value,
        _ if unquote => strip_quotes(raw).to_string(),
        _ => raw.to_string(),
    };
    Some((key, value))
}

/// Decode a JSON string at the start of `text`, returning it and the bytes consumed.
fn leading_json_string(text: &str) -> Option<(String, usize)> {
    if !text.starts_with('"') {
        return None;
    }
    let mut stream = serde_json::Deserializer::from_str(text).into_iter::<String>();
    match stream.next() {
        Some(Ok(decoded)) => Some((decoded, stream.byte_offset())),
        _ => None,
    }
}

fn quote(text: &str) -> String {
    serde_json::Value::String(text.to_string()).to_string()
}

fn has_edge_space_or_break(text: &str) -> bool {
    text != text.trim() || text.contains(['\r', '\n']) || text.starts_with('"')
}

fn key_needs_quoting(key: &str) -> bool {
    key.is_empty() || key.contains(':') || has_edge_space_or_break(key)
}

fn value_needs_quoting(value: &str) -> bool {
    has_edge_space_or_break(value)
}

fn strip_quotes(value: &str) -> &str {
    for quote in ['"', '\''] {
        if value.len() >= 2 && value.starts_with(quote) && value.ends_with(quote) {
            return &value[1..value.len() - 1];
        }
    }
    value
}

/// Parsed task document.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskDocument {
    /// Title text without the leading `# `.
    pub title: Option<String>,
    pub metadata: Metadata,
    /// Body after title and metadata, without leading blank lines.
    pub body: String,
}

impl TaskDocument {
    pub fn new(title: impl Into<String>, metadata: Metadata, body: impl Into<String>) -> Self {
        Self {
            title: Some(title.into()),
            metadata,
            body: normalize_body(&body.into()),
        }
    }

    pub fn parse(text: &str) -> Self {
        let (metadata, rest) = split_metadata(text);
        let rest = rest.trim_start_matches(['\n', '\r']);
        let (title, body) = match rest.split_once('\n') {
            Some((first, remainder)) if is_title(first) => (Some(first), remainder),
            None if is_title(rest) => (Some(rest), ""),
            _ => (None, rest),
        };
        let title = title.map(|t| t.trim_end()[2..].trim().to_string());
        Self {
            title,
            metadata,
            body: normalize_body(body),
        }
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        if let Some(title) = &self.title {
            out.push_str("# ");
            out.push_str(title);
            out.push_str("\n\n");
        }
        out.push_str(&self.metadata.render_block());
        out.push('\n');
        if !self.body.is_empty() {
            out.push('\n');
            out.push_str(&self.body);
            out.push('\n');
        }
        out
    }

    /// Title and body, the text that classification and step parsing read.
    pub fn content(&self) -> String {
        match &self.title {
            Some(title) => format!("{title}\n{}", self.body),
            None => self.body.clone(),
        }
    }

    /// Append a markdown section to the end of the body.
    pub fn append_section(&mut self, section: &str) {
        let section = section.trim();
        if section.is_empty() {
            return;
        }
        if self.body.is_empty() {
            self.body = section.to_string();
        } else {
            self.body = format!("{}\n\n{}", self.body, section);
        }
    }

    /// Append a single line to the end of the body, without a blank separator.
    pub fn append_line(&mut self, line: &str) {
        if self.body.is_empty() {
            self.body = line.trim().to_string();
        } else {
            self.body = format!("{}\n{}", self.body, line.trim());
        }
    }
}

fn is_title(line: &str) -> bool {
    line.starts_with("# ")
}

fn normalize_body(body: &str) -> String {
    body.trim_start_matches(['\n', '\r']).trim_end().to_string()
}

/// Extract metadata and return the remaining text with the block removed.
fn split_metadata(text: &str) -> (Metadata, String) {
    if let Some(caps) = COMMENT_BLOCK_RE.captures(text) {
        let whole = caps.get(0).map_or(0..0, |m| m.range());
        let inner = caps.get(1).map_or("", |m| m.as_str());
        let meta = Metadata::from_lines(inner.lines(), false);
        let mut rest = String::with_capacity(text.len());
        rest.push_str(&text[..whole.start]);
        rest.push_str(&text[whole.end..]);
        return (meta, rest);
    }
    if let Some((front, rest)) = split_frontmatter(text) {
        return (Metadata::from_lines(front.lines(), true), rest.to_string());
    }
    (Metadata::new(), text.to_string())
}

fn split_frontmatter(text: &str) -> Option<(&str, &str)> {
    let after_open = text
        .strip_prefix("---\n")
        .or_else(|| text.strip_prefix("---\r\n"))?;
    let mut offset = 0;
    for line in after_open.split_inclusive('\n') {
        if line.trim_end() == "---" {
            let front = &after_open[..offset];
            let rest = &after_open[offset + line.len()..];
            return Some((front, rest));
        }
        offset += line.len();
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_comment_block_after_title() {
        let text = "# Pay invoice\n\n<!-- AGENT METADATA\n  received_at : 2026-01-05 09:30:00\n  source      : gmail\n  risk_level  : high\n-->\n\nPlease pay invoice 42.\n";
        let doc = TaskDocument::parse(text);
        assert_eq!(doc.title.as_deref(), Some("Pay invoice"));
        assert_eq!(doc.metadata.get("received_at"), Some("2026-01-05 09:30:00"));
        assert_eq!(doc.metadata.get("source"), Some("gmail"));
        assert_eq!(doc.metadata.risk_level(), Some(RiskLevel::High));
        assert_eq!(doc.body, "Please pay invoice 42.");
    }

    #[test]
    fn parses_frontmatter() {
        let text = "---\nsource: \"whatsapp\"\npriority: high\n---\n# Reply to Sam\n\nSay hi.\n";
        let doc = TaskDocument::parse(text);
        assert_eq!(doc.metadata.get("source"), Some("whatsapp"));
        assert_eq!(doc.metadata.get("priority"), Some("high"));
        assert_eq!(doc.title.as_deref(), Some("Reply to Sam"));
        assert_eq!(doc.body, "Say hi.");
    }

    #[test]
    fn comment_block_wins_over_frontmatter() {
        let text = "---\nsource: frontmatter\n---\n# T\n<!-- AGENT METADATA\n  source : block\n-->\nbody\n";
        let doc = TaskDocument::parse(text);
        assert_eq!(doc.metadata.get("source"), Some("block"));
    }

    #[test]
    fn first_key_occurrence_wins() {
        let text = "# T\n<!-- AGENT METADATA\n  retries : 1\n  retries : 5\n-->\n";
        let doc = TaskDocument::parse(text);
        assert_eq!(doc.metadata.retries(), 1);
        assert_eq!(doc.metadata.len(), 1);
    }

    #[test]
    fn values_may_contain_colons() {
        let text = "# T\n<!-- AGENT METADATA\n  received_at : 2026-01-05 09:30:00\n  url : https://example.com/a\n-->\n";
        let doc = TaskDocument::parse(text);
        assert_eq!(doc.metadata.get("url"), Some("https://example.com/a"));
    }

    #[test]
    fn document_without_metadata_has_empty_block() {
        let doc = TaskDocument::parse("# Plain\n\nJust text.\n");
        assert!(doc.metadata.is_empty());
        assert_eq!(doc.body, "Just text.");
    }

    #[test]
    fn metadata_round_trips_through_render() {
        let mut meta = Metadata::new();
        meta.set("received_at", "2026-02-01 08:00:00");
        meta.set("source", "file drop: scanner #2");
        meta.set("risk_level", "medium");
        meta.set("note", "");
        meta.set("approval", "auto_approved");
        meta.set("retries", "0");
        let doc = TaskDocument::new("Title", meta.clone(), "## Steps\n- one\n");
        let reparsed = TaskDocument::parse(&doc.render());
        assert_eq!(reparsed.metadata, meta);
        assert_eq!(reparsed, doc);
    }

    #[test]
    fn set_keeps_position() {
        let mut meta = Metadata::new();
        meta.set("a", "1");
        meta.set("b", "2");
        meta.set("a", "x");
        let keys: Vec<_> = meta.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["a", "b"]);
        assert_eq!(meta.get("a"), Some("x"));
    }

    #[test]
    fn awkward_keys_and_values_survive_render() {
        let pairs = [
            ("due date", "2026-01-01"),
            ("source", "  padded  "),
            ("reason", "line one\nline two"),
            ("time:zone", "UTC"),
            (" lead", "x"),
            ("\"quoted\"", "\"kept\""),
            ("empty", ""),
            ("tab", "\tindented"),
            ("url", "https://example.com/a?b=c"),
            ("émoji ✓", "naïve"),
            ("brace", "{\"a\": 1}"),
            ("plain_key-2", "plain value"),
        ];
        let mut meta = Metadata::new();
        for (k, v) in pairs {
            meta.set(k, v);
        }
        let doc = TaskDocument::new("T", meta.clone(), "body");
        let reparsed = TaskDocument::parse(&doc.render());
        let got: Vec<_> = reparsed.metadata.iter().collect();
        assert_eq!(got, pairs.to_vec());
        assert_eq!(reparsed.metadata, meta);
    }

    #[test]
    fn quoted_values_in_hand_written_blocks_are_decoded() {
        let text = "# T\n<!-- AGENT METADATA\n  source : \"  gmail \"\n  note : \"a\" and \"b\"\n-->\n";
        let doc = TaskDocument::parse(text);
        assert_eq!(doc.metadata.get("source"), Some("  gmail "));
        assert_eq!(doc.metadata.get("note"), Some("\"a\" and \"b\""));
    }

    #[test]
    fn set_default_fills_only_missing() {
        let mut meta = Metadata::new();
        meta.set("source", "gmail");
        meta.set_default("source", "inbox");
        meta.set_default("retries", "0");
        assert_eq!(meta.get("source"), Some("gmail"));
        assert_eq!(meta.get("retries"), Some("0"));
    }

    #[test]
    fn append_section_separates_with_blank_line() {
        let mut doc = TaskDocument::parse("# T\n\nbody");
        doc.append_section("## Note\n\ntext\n");
        assert_eq!(doc.body, "body\n\n## Note\n\ntext");
    }
}
