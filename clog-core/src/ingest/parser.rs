//! Record parser for conversation JSONL logs
//!
//! Each line of a session log is one JSON object. [`parse_line`] turns a line
//! into an [`Event`] or discards it.
//!
//! # Error Handling
//!
//! Noise is expected in an append-only log written by another program:
//!
//! - **Malformed JSON lines**: discarded.
//! - **Unknown record types**: discarded.
//! - **User records with no text** (e.g. tool results echoed back as user
//!   turns): discarded.
//! - **System records with an unexpected shape**: kept with empty text.
//!
//! None of these are errors. Only failing to open or read the file is.

use crate::error::Result;
use crate::format::truncate_chars;
use crate::types::{Event, EventKind};
use serde::Deserialize;
use serde_json::Value;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

/// Tool result text is cut to this many characters.
pub const MAX_TOOL_RESULT_CHARS: usize = 200;

/// Record types that are recognized but carry no searchable content.
const MARKER_TYPES: &[&str] = &["progress", "queue-operation", "file-history-snapshot"];

// ============================================
// Raw JSONL record types (serde deserialization)
// ============================================

/// Common envelope of every record.
///
/// `message` stays untyped until the record type is known, so one bad
/// nested field only affects the record kinds that need it.
#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
struct RawRecord {
    #[serde(rename = "type")]
    record_type: Option<String>,
    uuid: Option<String>,
    timestamp: Option<String>,
    git_branch: Option<String>,
    cwd: Option<String>,
    message: Option<Value>,
    /// Some system records carry their text at the top level
    content: Option<Value>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct RawMessage {
    model: Option<String>,
    content: Option<Value>,
    usage: Option<RawUsage>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct RawUsage {
    input_tokens: Option<i64>,
    output_tokens: Option<i64>,
    cache_creation_input_tokens: Option<i64>,
    cache_read_input_tokens: Option<i64>,
}

impl RawUsage {
    /// Effective context size: base input plus both cache counters.
    /// Saturates, since the counters come straight from the log.
    fn effective_input(&self) -> i64 {
        self.input_tokens
            .unwrap_or(0)
            .saturating_add(self.cache_read_input_tokens.unwrap_or(0))
            .saturating_add(self.cache_creation_input_tokens.unwrap_or(0))
    }
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum ContentBlock {
    #[serde(rename = "text")]
    Text {
        #[serde(default)]
        text: Option<String>,
    },
    #[serde(rename = "tool_use")]
    ToolUse {
        #[serde(default)]
        name: Option<String>,
    },
    #[serde(rename = "tool_result")]
    ToolResult {
        #[serde(default)]
        content: Value,
    },
    // Catch-all for unknown block types
    #[serde(other)]
    Unknown,
}

// ============================================
// Parsing
// ============================================

/// Parse one raw log line. Returns `None` for anything that should be
/// discarded.
pub fn parse_line(line: &str) -> Option<Event> {
    let raw: RawRecord = serde_json::from_str(line).ok()?;
    let record_type = raw.record_type.clone()?;

    let kind = match record_type.as_str() {
        "user" => EventKind::User,
        "assistant" => EventKind::Assistant,
        "tool-result" => EventKind::ToolResult,
        "system" => EventKind::System,
        t if MARKER_TYPES.contains(&t) => EventKind::Other(record_type),
        _ => return None,
    };

    let mut event = Event::new(kind);
    event.uuid = raw.uuid.clone().unwrap_or_default();
    event.timestamp = raw.timestamp.clone().filter(|t| !t.is_empty());
    event.git_branch = raw.git_branch.clone().filter(|b| !b.is_empty());
    event.cwd = raw.cwd.clone().filter(|c| !c.is_empty());

    match event.kind {
        EventKind::User => parse_user(&raw, &mut event)?,
        EventKind::Assistant => parse_assistant(&raw, &mut event)?,
        EventKind::ToolResult => parse_tool_result(&raw, &mut event)?,
        EventKind::System => parse_system(&raw, &mut event),
        EventKind::Other(_) => {}
    }

    Some(event)
}

/// Parse every line of a log file.
///
/// Lines have no length limit. Lines that are not valid UTF-8 are discarded
/// like any other malformed record.
pub fn parse_file(path: &Path) -> Result<Vec<Event>> {
    let file = File::open(path)?;
    let mut reader = BufReader::new(file);
    let mut events = Vec::new();
    let mut buf = Vec::new();

    loop {
        buf.clear();
        if reader.read_until(b'\n', &mut buf)? == 0 {
            break;
        }

        let Ok(line) = std::str::from_utf8(&buf) else {
            continue;
        };
        let line = line.trim_end_matches(['\n', '\r']);
        if line.trim().is_empty() {
            continue;
        }

        if let Some(event) = parse_line(line) {
            events.push(event);
        }
    }

    Ok(events)
}

fn message_of(raw: &RawRecord) -> Option<RawMessage> {
    serde_json::from_value(raw.message.clone()?).ok()
}

fn parse_user(raw: &RawRecord, event: &mut Event) -> Option<()> {
    let message = message_of(raw)?;
    let text = message.content.as_ref().map(extract_text).unwrap_or_default();
    if text.is_empty() {
        return None;
    }
    event.text = text;
    Some(())
}

fn parse_assistant(raw: &RawRecord, event: &mut Event) -> Option<()> {
    let message = message_of(raw)?;
    let blocks = content_blocks(&message.content?)?;

    let mut parts = Vec::new();
    for block in blocks {
        match block {
            ContentBlock::Text { text: Some(text) } if !text.is_empty() => parts.push(text),
            ContentBlock::ToolUse { name: Some(name) } if !name.is_empty() => {
                event.tool_calls.push(name)
            }
            _ => {}
        }
    }

    event.text = parts.join("\n");
    event.model = message.model.filter(|m| !m.is_empty());
    if let Some(usage) = message.usage {
        event.input_tokens = usage.effective_input();
        event.output_tokens = usage.output_tokens.unwrap_or(0);
    }
    Some(())
}

fn parse_tool_result(raw: &RawRecord, event: &mut Event) -> Option<()> {
    let message = message_of(raw)?;
    event.text = message
        .content
        .and_then(|c| content_blocks(&c))
        .and_then(|blocks| first_tool_result_text(&blocks))
        .map(|text| truncate_chars(&text, MAX_TOOL_RESULT_CHARS))
        .unwrap_or_default();
    Some(())
}

fn parse_system(raw: &RawRecord, event: &mut Event) {
    let nested = raw
        .message
        .as_ref()
        .and_then(|m| m.get("content"))
        .and_then(Value::as_str);
    let top = raw.content.as_ref().and_then(Value::as_str);
    event.text = nested.or(top).unwrap_or_default().to_string();
}

/// Decode a content list block by block. Blocks that do not decode are
/// skipped; only a non-list yields `None`.
fn content_blocks(content: &Value) -> Option<Vec<ContentBlock>> {
    let items = content.as_array()?;
    Some(
        items
            .iter()
            .filter_map(|item| ContentBlock::deserialize(item).ok())
            .collect(),
    )
}

/// Text of a content field that is either a plain string or a list of
/// typed blocks. Only non-empty `text` blocks contribute.
fn extract_text(content: &Value) -> String {
    if let Some(s) = content.as_str() {
        return s.to_string();
    }
    let Some(blocks) = content_blocks(content) else {
        return String::new();
    };
    blocks
        .into_iter()
        .filter_map(|b| match b {
            ContentBlock::Text { text: Some(text) } if !text.is_empty() => Some(text),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// First usable payload among `tool_result` blocks: the block's string
/// content, or the first `text` segment nested inside it.
fn first_tool_result_text(blocks: &[ContentBlock]) -> Option<String> {
    blocks.iter().find_map(|block| {
        let ContentBlock::ToolResult { content } = block else {
            return None;
        };
        if let Some(s) = content.as_str() {
            return Some(s.to_string());
        }
        content_blocks(content)?.into_iter().find_map(|b| match b {
            ContentBlock::Text { text } => text,
            _ => None,
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_user_string_content() {
        let event = parse_line(
            r#"{"type":"user","uuid":"u1","timestamp":"2025-01-01T00:00:00Z","gitBranch":"main","cwd":"/dev/app","message":{"role":"user","content":"hello world"}}"#,
        )
        .unwrap();
        assert_eq!(event.kind, EventKind::User);
        assert_eq!(event.uuid, "u1");
        assert_eq!(event.text, "hello world");
        assert_eq!(event.timestamp.as_deref(), Some("2025-01-01T00:00:00Z"));
        assert_eq!(event.git_branch.as_deref(), Some("main"));
        assert_eq!(event.cwd.as_deref(), Some("/dev/app"));
    }

    #[test]
    fn test_user_block_content_joined() {
        let event = parse_line(
            r#"{"type":"user","message":{"content":[{"type":"text","text":"one"},{"type":"image","source":{}},{"type":"text","text":""},{"type":"text","text":"two"}]}}"#,
        )
        .unwrap();
        assert_eq!(event.text, "one\ntwo");
    }

    #[test]
    fn test_user_without_text_is_discarded() {
        assert!(parse_line(r#"{"type":"user","message":{"content":""}}"#).is_none());
        assert!(parse_line(
            r#"{"type":"user","message":{"content":[{"type":"tool_result","content":"x"}]}}"#
        )
        .is_none());
        assert!(parse_line(r#"{"type":"user"}"#).is_none());
    }

    #[test]
    fn test_assistant_tokens_and_tools() {
        let event = parse_line(
            r#"{"type":"assistant","uuid":"a1","timestamp":"2025-01-01T00:00:01Z","message":{"role":"assistant","model":"claude-3-5-sonnet-20241022","content":[{"type":"text","text":"I can help with that."},{"type":"tool_use","name":"Read","input":{"path":"foo.go"}}],"usage":{"input_tokens":100,"output_tokens":50,"cache_read_input_tokens":20,"cache_creation_input_tokens":10}}}"#,
        )
        .unwrap();
        assert_eq!(event.kind, EventKind::Assistant);
        assert_eq!(event.text, "I can help with that.");
        assert_eq!(event.tool_calls, vec!["Read"]);
        assert_eq!(event.model.as_deref(), Some("claude-3-5-sonnet-20241022"));
        assert_eq!(event.input_tokens, 130);
        assert_eq!(event.output_tokens, 50);
    }

    #[test]
    fn test_assistant_usage_saturates() {
        let event = parse_line(
            r#"{"type":"assistant","message":{"content":[{"type":"text","text":"big"}],"usage":{"input_tokens":9223372036854775807,"cache_read_input_tokens":5,"cache_creation_input_tokens":7,"output_tokens":3}}}"#,
        )
        .unwrap();
        assert_eq!(event.input_tokens, i64::MAX);
        assert_eq!(event.output_tokens, 3);
        assert_eq!(event.total_tokens(), i64::MAX);
    }

    #[test]
    fn test_odd_blocks_do_not_drop_the_message() {
        let untyped = parse_line(
            r#"{"type":"assistant","message":{"content":[{"type":"text","text":"hi"},{"text":"no type"}]}}"#,
        )
        .unwrap();
        assert_eq!(untyped.text, "hi");

        let null_text = parse_line(
            r#"{"type":"assistant","message":{"content":[{"type":"text","text":null},{"type":"text","text":"kept"}]}}"#,
        )
        .unwrap();
        assert_eq!(null_text.text, "kept");

        let null_tool = parse_line(
            r#"{"type":"assistant","message":{"content":[{"type":"tool_use","name":null},{"type":"tool_use","name":"Bash"},{"type":"text","text":"ran it"}]}}"#,
        )
        .unwrap();
        assert_eq!(null_tool.tool_calls, vec!["Bash".to_string()]);
        assert_eq!(null_tool.text, "ran it");

        let user = parse_line(
            r#"{"type":"user","message":{"content":[{"type":"text","text":"hello"},{"type":"text","text":null},42]}}"#,
        )
        .unwrap();
        assert_eq!(user.text, "hello");

        let result = parse_line(
            r#"{"type":"tool-result","message":{"content":[{"bogus":true},{"type":"tool_result","content":[{"type":"text","text":null},{"type":"text","text":"out"}]}]}}"#,
        )
        .unwrap();
        assert_eq!(result.text, "out");
    }

    #[test]
    fn test_assistant_tool_order_preserved() {
        let event = parse_line(
            r#"{"type":"assistant","message":{"model":"opus","content":[{"type":"tool_use","name":"Read","input":{}},{"type":"text","text":"middle"},{"type":"tool_use","name":"Write","input":{}}]}}"#,
        )
        .unwrap();
        assert_eq!(event.tool_calls, vec!["Read", "Write"]);
        assert_eq!(event.text, "middle");
        assert_eq!(event.input_tokens, 0);
    }

    #[test]
    fn test_assistant_string_content_is_discarded() {
        assert!(parse_line(r#"{"type":"assistant","message":{"content":"plain"}}"#).is_none());
    }

    #[test]
    fn test_tool_result_variants() {
        let flat = parse_line(
            r#"{"type":"tool-result","message":{"content":[{"type":"tool_result","content":"file contents here"}]}}"#,
        )
        .unwrap();
        assert_eq!(flat.kind, EventKind::ToolResult);
        assert_eq!(flat.text, "file contents here");

        let nested = parse_line(
            r#"{"type":"tool-result","message":{"content":[{"type":"tool_result","content":[{"type":"text","text":"nested output"}]}]}}"#,
        )
        .unwrap();
        assert_eq!(nested.text, "nested output");

        let empty = parse_line(r#"{"type":"tool-result","message":{"content":"odd"}}"#).unwrap();
        assert_eq!(empty.text, "");
    }

    #[test]
    fn test_tool_result_truncates_code_points() {
        let long = "ü".repeat(300);
        let line = format!(
            r#"{{"type":"tool-result","message":{{"content":[{{"type":"tool_result","content":"{}"}}]}}}}"#,
            long
        );
        let event = parse_line(&line).unwrap();
        assert!(event.text.ends_with("..."));
        assert_eq!(event.text.chars().count(), MAX_TOOL_RESULT_CHARS + 3);
    }

    #[test]
    fn test_system_is_lenient() {
        let nested =
            parse_line(r#"{"type":"system","message":{"content":"compacted"}}"#).unwrap();
        assert_eq!(nested.text, "compacted");

        let top = parse_line(r#"{"type":"system","content":"hook ran","subtype":"info"}"#).unwrap();
        assert_eq!(top.text, "hook ran");

        let odd = parse_line(r#"{"type":"system","message":{"content":[1,2,3]}}"#).unwrap();
        assert_eq!(odd.kind, EventKind::System);
        assert_eq!(odd.text, "");
    }

    #[test]
    fn test_markers_and_noise() {
        let marker = parse_line(r#"{"type":"progress","data":{}}"#).unwrap();
        assert_eq!(marker.kind, EventKind::Other("progress".to_string()));

        assert!(parse_line(r#"{"type":"summary","summary":"x"}"#).is_none());
        assert!(parse_line("not json").is_none());
        assert!(parse_line(r#"{"no_type":true}"#).is_none());
    }

    #[test]
    fn test_parse_file_tolerates_noise() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, r#"{{"type":"user","message":{{"content":"first"}}}}"#).unwrap();
        writeln!(file, "{{broken").unwrap();
        file.write_all(b"\xff\xfe\n").unwrap();
        writeln!(file).unwrap();
        write!(file, "{}\r\n", r#"{"type":"user","message":{"content":"crlf"}}"#).unwrap();
        write!(file, r#"{{"type":"user","message":{{"content":"no newline"}}}}"#).unwrap();

        let events = parse_file(file.path()).unwrap();
        let texts: Vec<&str> = events.iter().map(|e| e.text.as_str()).collect();
        assert_eq!(texts, vec!["first", "crlf", "no newline"]);
    }

    #[test]
    fn test_parse_file_long_line() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        let big = "x".repeat(11 * 1024 * 1024);
        writeln!(
            file,
            r#"{{"type":"user","message":{{"content":"{}"}}}}"#,
            big
        )
        .unwrap();

        let events = parse_file(file.path()).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].text.len(), big.len());
    }

    #[test]
    fn test_parse_file_missing() {
        assert!(parse_file(Path::new("/nonexistent/clog/missing.jsonl")).is_err());
    }
}
