//! Tool-output compression.
//!
//! Oversized tool results are shrunk before they reach the model. JSON
//! output that looks like a list of records is normalized to a compact
//! `{success, message, total, items}` object; other JSON is truncated
//! recursively; anything else keeps a head and a tail.

use crate::llm::{CompressionRecord, Content, Message, MessageMetadata};
use log::debug;
use serde::Serialize;
use serde_json::ser::Formatter;
use serde_json::{Map, Value, json};
use std::io;

use super::calculator::TokenCalculator;
use super::config::ContextConfig;

/// Nesting depth past which containers collapse to `"..."`.
pub const MAX_DEPTH: usize = 3;

const MAX_STRING_CHARS: usize = 100;
const MAX_OBJECT_KEYS: usize = 10;
const MAX_LIST_ITEMS: usize = 5;

/// Lists up to this length are kept whole.
const KEEP_ALL_ITEMS: usize = 4;
/// Items kept at each end of a longer list.
const KEEP_EDGE_ITEMS: usize = 2;

/// Fields that identify a record well enough for the model to refer back.
const KEY_FIELDS: &[&str] = &["id", "index", "title", "name", "type", "start", "status"];
const FALLBACK_FIELDS: usize = 3;
const FALLBACK_VALUE_CHARS: usize = 50;

/// Keys that hold the result list in scheduling tool responses.
const NAMED_LIST_KEYS: &[&str] = &["events", "todos", "reminders", "results", "groups"];

/// Shrinks tool-result messages that exceed a token limit.
#[derive(Clone, Debug)]
pub struct ToolMessageCompressor {
    max_tokens: usize,
    exclude_tools: Vec<String>,
    exclude_prefixes: Vec<String>,
}

impl ToolMessageCompressor {
    #[must_use]
    pub const fn new(max_tokens: usize) -> Self {
        Self {
            max_tokens,
            exclude_tools: Vec::new(),
            exclude_prefixes: Vec::new(),
        }
    }

    #[must_use]
    pub fn from_config(config: &ContextConfig) -> Self {
        Self {
            max_tokens: config.tool_output_max_tokens,
            exclude_tools: config.exclude_tools.clone(),
            exclude_prefixes: config.exclude_prefixes.clone(),
        }
    }

    #[must_use]
    pub fn with_exclude_tools(mut self, tools: Vec<String>) -> Self {
        self.exclude_tools = tools;
        self
    }

    #[must_use]
    pub fn with_exclude_prefixes(mut self, prefixes: Vec<String>) -> Self {
        self.exclude_prefixes = prefixes;
        self
    }

    #[must_use]
    pub const fn max_tokens(&self) -> usize {
        self.max_tokens
    }

    /// Whether output from `tool_name` must never be compressed.
    #[must_use]
    pub fn is_excluded(&self, tool_name: &str) -> bool {
        self.exclude_tools.iter().any(|tool| tool == tool_name)
            || self
                .exclude_prefixes
                .iter()
                .any(|prefix| tool_name.starts_with(prefix.as_str()))
    }

    /// Compress a tool-result message if it is over the limit.
    ///
    /// Non-tool messages, excluded tools and results within the limit come
    /// back unchanged. A compressed message keeps its `tool_call_id` and
    /// tool name and carries a [`CompressionRecord`].
    #[must_use]
    pub fn compress(&self, message: &Message, calculator: &TokenCalculator) -> Message {
        self.compress_with_name(message, message.name.as_deref(), calculator)
    }

    /// [`compress`](Self::compress) with the tool name resolved by the
    /// caller, for results that do not carry a `name` of their own.
    #[must_use]
    pub fn compress_with_name(
        &self,
        message: &Message,
        tool_name: Option<&str>,
        calculator: &TokenCalculator,
    ) -> Message {
        if !message.is_tool_result() || tool_name.is_some_and(|name| self.is_excluded(name)) {
            return message.clone();
        }

        let content = message.text();
        let original_tokens = calculator.calculate_text(&content);
        if original_tokens <= self.max_tokens {
            return message.clone();
        }

        let compressed = self.compress_content(&content);
        debug!(
            "Compressed tool output (tool={}, original_tokens={original_tokens}, chars={}->{})",
            tool_name.unwrap_or("unknown"),
            content.chars().count(),
            compressed.chars().count()
        );

        Message {
            role: message.role,
            content: Content::Text(compressed),
            tool_calls: message.tool_calls.clone(),
            tool_call_id: message.tool_call_id.clone(),
            name: message.name.clone(),
            metadata: MessageMetadata {
                usage: message.metadata.usage,
                compression: Some(CompressionRecord {
                    compressed: true,
                    original_tokens,
                }),
            },
        }
    }

    /// Compress raw tool output: structure-aware for JSON containers,
    /// head/tail truncation otherwise.
    #[must_use]
    pub fn compress_content(&self, content: &str) -> String {
        match serde_json::from_str::<Value>(content) {
            Ok(value @ (Value::Object(_) | Value::Array(_))) => {
                to_spaced_json(&compress_json(&value))
            }
            _ => truncate_text(content, self.max_chars()),
        }
    }

    /// Character budget matching `max_tokens` at 2.5 characters per token.
    const fn max_chars(&self) -> usize {
        self.max_tokens.saturating_mul(5) / 2
    }
}

/// A list found inside a tool response.
#[derive(Debug, Clone, PartialEq)]
pub struct ListShape<'a> {
    /// What the list holds, used in the summary message.
    pub label: &'static str,
    pub items: &'a [Value],
    /// Original item count.
    pub total: usize,
    pub success: bool,
}

/// One recognized response layout: a predicate and the matching extractor.
pub struct ShapeMatcher {
    pub name: &'static str,
    pub matches: fn(&Value) -> bool,
    pub extract: fn(&Value) -> Option<ListShape<'_>>,
}

/// Recognized layouts in priority order.
pub const SHAPE_MATCHERS: &[ShapeMatcher] = &[
    ShapeMatcher {
        name: "items",
        matches: |value| value.get("items").is_some_and(Value::is_array),
        extract: extract_items,
    },
    ShapeMatcher {
        name: "data",
        matches: |value| value.get("data").is_some_and(Value::is_array),
        extract: extract_data,
    },
    ShapeMatcher {
        name: "named_list",
        matches: |value| named_list_key(value).is_some(),
        extract: extract_named_list,
    },
    ShapeMatcher {
        name: "bare_list",
        matches: Value::is_array,
        extract: extract_bare_list,
    },
];

/// First matcher that recognizes `value`, with what it extracted.
#[must_use]
pub fn match_shape(value: &Value) -> Option<(&'static ShapeMatcher, ListShape<'_>)> {
    SHAPE_MATCHERS.iter().find_map(|matcher| {
        if (matcher.matches)(value) {
            (matcher.extract)(value).map(|shape| (matcher, shape))
        } else {
            None
        }
    })
}

fn success_flag(value: &Value) -> bool {
    value.get("success").and_then(Value::as_bool).unwrap_or(true)
}

fn extract_items(value: &Value) -> Option<ListShape<'_>> {
    let items = value.get("items")?.as_array()?;
    let reported = value
        .get("total")
        .and_then(Value::as_u64)
        .and_then(|total| usize::try_from(total).ok())
        .unwrap_or(0);
    Some(ListShape {
        label: "items",
        items,
        total: reported.max(items.len()),
        success: success_flag(value),
    })
}

fn extract_data(value: &Value) -> Option<ListShape<'_>> {
    let items = value.get("data")?.as_array()?;
    Some(ListShape {
        label: "items",
        items,
        total: items.len(),
        success: success_flag(value),
    })
}

fn named_list_key(value: &Value) -> Option<&'static str> {
    NAMED_LIST_KEYS
        .iter()
        .copied()
        .find(|key| value.get(key).is_some_and(Value::is_array))
}

fn extract_named_list(value: &Value) -> Option<ListShape<'_>> {
    let key = named_list_key(value)?;
    let items = value.get(key)?.as_array()?;
    Some(ListShape {
        label: key,
        items,
        total: items.len(),
        success: success_flag(value),
    })
}

fn extract_bare_list(value: &Value) -> Option<ListShape<'_>> {
    let items = value.as_array()?;
    Some(ListShape {
        label: "items",
        items,
        total: items.len(),
        success: true,
    })
}

/// Structure-aware compression of a parsed tool response.
#[must_use]
pub fn compress_json(value: &Value) -> Value {
    match match_shape(value) {
        Some((_, shape)) => compress_list(&shape),
        None => truncate_value(value, 0),
    }
}

fn compress_list(shape: &ListShape<'_>) -> Value {
    let count = shape.items.len();
    let items: Vec<Value> = if count <= KEEP_ALL_ITEMS {
        shape.items.iter().map(reduce_item).collect()
    } else {
        let omitted = count - 2 * KEEP_EDGE_ITEMS;
        shape.items[..KEEP_EDGE_ITEMS]
            .iter()
            .map(reduce_item)
            .chain(std::iter::once(Value::String(format!(
                "... {omitted} more items omitted ..."
            ))))
            .chain(shape.items[count - KEEP_EDGE_ITEMS..].iter().map(reduce_item))
            .collect()
    };

    let message = if count > KEEP_ALL_ITEMS {
        format!(
            "{} {} in total (total: {}); showing first {KEEP_EDGE_ITEMS} and last {KEEP_EDGE_ITEMS}",
            shape.total, shape.label, shape.total
        )
    } else {
        format!("{} {} in total (total: {})", shape.total, shape.label, shape.total)
    };

    json!({
        "success": shape.success,
        "message": message,
        "total": shape.total,
        "items": items,
    })
}

/// Cut a record down to its identifying fields.
fn reduce_item(item: &Value) -> Value {
    let Value::Object(record) = item else {
        return truncate_value(item, 1);
    };

    let key_fields: Map<String, Value> = KEY_FIELDS
        .iter()
        .filter_map(|key| {
            record
                .get(*key)
                .map(|value| ((*key).to_owned(), truncate_value(value, 1)))
        })
        .collect();
    if !key_fields.is_empty() {
        return Value::Object(key_fields);
    }

    Value::Object(
        record
            .iter()
            .take(FALLBACK_FIELDS)
            .map(|(key, value)| (key.clone(), shorten_value(value, FALLBACK_VALUE_CHARS)))
            .collect(),
    )
}

/// Strings cut to `max_chars`; other values replaced by their truncated
/// JSON text when that runs longer.
fn shorten_value(value: &Value, max_chars: usize) -> Value {
    match value {
        Value::String(text) => Value::String(truncate_str(text, max_chars)),
        Value::Null | Value::Bool(_) | Value::Number(_) => value.clone(),
        Value::Array(_) | Value::Object(_) => {
            let text = value.to_string();
            if text.chars().count() > max_chars {
                Value::String(truncate_str(&text, max_chars))
            } else {
                value.clone()
            }
        }
    }
}

/// Depth-capped truncation of arbitrary JSON.
#[must_use]
pub fn truncate_value(value: &Value, depth: usize) -> Value {
    match value {
        Value::String(text) => Value::String(truncate_str(text, MAX_STRING_CHARS)),
        Value::Array(_) | Value::Object(_) if depth >= MAX_DEPTH => Value::String("...".to_owned()),
        Value::Array(items) if items.len() > MAX_LIST_ITEMS => {
            let omitted = items.len() - 2;
            vec![
                truncate_value(&items[0], depth + 1),
                Value::String(format!("... {omitted} items omitted ...")),
                truncate_value(&items[items.len() - 1], depth + 1),
            ]
            .into()
        }
        Value::Array(items) => items
            .iter()
            .map(|item| truncate_value(item, depth + 1))
            .collect(),
        Value::Object(map) => {
            let mut out: Map<String, Value> = map
                .iter()
                .take(MAX_OBJECT_KEYS)
                .map(|(key, value)| (key.clone(), truncate_value(value, depth + 1)))
                .collect();
            if map.len() > MAX_OBJECT_KEYS {
                out.insert(
                    "...".to_owned(),
                    Value::String(format!("{} more keys omitted", map.len() - MAX_OBJECT_KEYS)),
                );
            }
            Value::Object(out)
        }
        Value::Null | Value::Bool(_) | Value::Number(_) => value.clone(),
    }
}

fn truncate_str(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((end, _)) => format!("{}...", &text[..end]),
        None => text.to_owned(),
    }
}

/// Keep the head and tail of `text` within `max_chars`, noting how much of
/// the middle was dropped.
#[must_use]
pub fn truncate_text(text: &str, max_chars: usize) -> String {
    let total = text.chars().count();
    if total <= max_chars {
        return text.to_owned();
    }

    let head_chars = max_chars / 2;
    let tail_chars = max_chars - head_chars;
    let elided = total - head_chars - tail_chars;

    let byte_at = |n: usize| text.char_indices().nth(n).map_or(text.len(), |(i, _)| i);
    let head = &text[..byte_at(head_chars)];
    let tail = &text[byte_at(total - tail_chars)..];

    format!("{head}\n\n... [{elided} characters omitted] ...\n\n{tail}")
}

/// JSON with `", "` and `": "` separators.
struct SpacedFormatter;

impl Formatter for SpacedFormatter {
    fn begin_array_value<W>(&mut self, writer: &mut W, first: bool) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        if first {
            Ok(())
        } else {
            writer.write_all(b", ")
        }
    }

    fn begin_object_key<W>(&mut self, writer: &mut W, first: bool) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        if first {
            Ok(())
        } else {
            writer.write_all(b", ")
        }
    }

    fn begin_object_value<W>(&mut self, writer: &mut W) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        writer.write_all(b": ")
    }
}

fn to_spaced_json(value: &Value) -> String {
    let mut out = Vec::new();
    let mut serializer = serde_json::Serializer::with_formatter(&mut out, SpacedFormatter);
    if value.serialize(&mut serializer).is_err() {
        return value.to_string();
    }
    String::from_utf8(out).unwrap_or_else(|_| value.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn calc() -> TokenCalculator {
        TokenCalculator::estimating()
    }

    fn tool(name: &str, content: impl Into<String>) -> Message {
        Message::tool_result("call_1", name, content)
    }

    fn compressed_json(message: &Message) -> anyhow::Result<Value> {
        Ok(serde_json::from_str(&message.text())?)
    }

    #[test]
    fn test_small_output_is_unchanged() {
        let compressor = ToolMessageCompressor::new(100);
        let message = tool("list_events", r#"{"events": []}"#);

        let out = compressor.compress(&message, &calc());
        assert_eq!(out, message);
        assert!(!out.is_compressed());
    }

    #[test]
    fn test_output_at_limit_is_unchanged() {
        // 10 chars -> exactly 4 tokens
        let compressor = ToolMessageCompressor::new(4);
        let message = tool("echo", "0123456789");
        assert_eq!(compressor.compress(&message, &calc()), message);
    }

    #[test]
    fn test_non_tool_messages_pass_through() {
        let compressor = ToolMessageCompressor::new(1);
        let message = Message::assistant("x".repeat(5_000));
        assert_eq!(compressor.compress(&message, &calc()), message);
    }

    #[test]
    fn test_excluded_tools_are_never_compressed() {
        let compressor = ToolMessageCompressor::new(1)
            .with_exclude_tools(vec!["get_event_ids".to_string()])
            .with_exclude_prefixes(vec!["mcp_".to_string()]);
        let big = "y".repeat(10_000);

        for name in ["get_event_ids", "mcp_calendar_sync"] {
            let message = tool(name, big.clone());
            assert_eq!(compressor.compress(&message, &calc()), message);
        }
        assert!(compressor.is_excluded("mcp_"));
        assert!(!compressor.is_excluded("get_event"));
    }

    #[test]
    fn test_resolved_name_applies_exclusion_to_unnamed_result() -> anyhow::Result<()> {
        let compressor = ToolMessageCompressor::new(1)
            .with_exclude_tools(vec!["get_event_ids".to_string()]);
        let message: Message = serde_json::from_value(serde_json::json!({
            "role": "tool",
            "content": "y".repeat(10_000),
            "tool_call_id": "c1",
        }))?;
        assert!(message.name.is_none());

        let kept = compressor.compress_with_name(&message, Some("get_event_ids"), &calc());
        assert_eq!(kept, message);

        let out = compressor.compress_with_name(&message, Some("list_events"), &calc());
        assert!(out.is_compressed());
        assert!(compressor.compress(&message, &calc()).is_compressed());
        Ok(())
    }

    #[test]
    fn test_items_shape_keeps_edges_and_true_total() -> anyhow::Result<()> {
        let compressor = ToolMessageCompressor::new(5);
        let message = tool("list_items", r#"{"items": [1,2,3,4,5,6], "total": 6}"#);

        let out = compressor.compress(&message, &calc());
        let value = compressed_json(&out)?;

        let items = value["items"].as_array().map(Vec::len);
        assert_eq!(items, Some(5));
        assert_eq!(value["items"][0], 1);
        assert_eq!(value["items"][4], 6);
        assert_eq!(value["total"], 6);
        assert_eq!(value["success"], true);
        assert!(out.text().contains(r#""total": 6"#));
        assert!(
            value["items"][2]
                .as_str()
                .is_some_and(|s| s.contains("2 more items omitted"))
        );
        Ok(())
    }

    #[test]
    fn test_compression_preserves_linkage_and_records_size() {
        let compressor = ToolMessageCompressor::new(5);
        let message = tool("list_items", r#"{"items": [1,2,3,4,5,6], "total": 6}"#);

        let out = compressor.compress(&message, &calc());
        assert_eq!(out.tool_call_id.as_deref(), Some("call_1"));
        assert_eq!(out.name.as_deref(), Some("list_items"));
        assert_eq!(
            out.metadata.compression,
            Some(CompressionRecord {
                compressed: true,
                original_tokens: calc().calculate_text(&message.text()),
            })
        );
    }

    #[test]
    fn test_items_total_uses_reported_count() {
        let value = json!({"items": [1, 2], "total": 40});
        let Some((matcher, shape)) = match_shape(&value) else {
            panic!("items shape should match");
        };
        assert_eq!(matcher.name, "items");
        assert_eq!(shape.total, 40);
    }

    #[test]
    fn test_data_shape_reduces_records_to_key_fields() -> anyhow::Result<()> {
        let records: Vec<Value> = (0..6)
            .map(|i| {
                json!({
                    "id": i,
                    "title": format!("Event {i}"),
                    "description": "long free text that the model does not need",
                    "start": "2026-10-14T09:00:00",
                })
            })
            .collect();
        let value = json!({"success": false, "data": records});

        let out = compress_json(&value);
        assert_eq!(out["success"], false);
        assert_eq!(out["total"], 6);
        assert_eq!(
            out["items"][0],
            json!({"id": 0, "title": "Event 0", "start": "2026-10-14T09:00:00"})
        );
        assert_eq!(out["items"][4]["id"], 5);
        Ok(())
    }

    #[test]
    fn test_named_list_shape_labels_message() {
        let value = json!({"reminders": [{"id": 1, "status": "pending", "note": "x"}]});

        let out = compress_json(&value);
        assert_eq!(out["items"], json!([{"id": 1, "status": "pending"}]));
        assert!(
            out["message"]
                .as_str()
                .is_some_and(|m| m.starts_with("1 reminders"))
        );
    }

    #[test]
    fn test_records_without_key_fields_keep_first_three_pairs() {
        let long = "z".repeat(80);
        let value = json!([{"a": long, "b": 2, "c": [1, 2], "d": "dropped"}]);

        let out = compress_json(&value);
        let item = &out["items"][0];
        assert_eq!(item.as_object().map(Map::len), Some(3));
        assert_eq!(item["a"], format!("{}...", "z".repeat(50)));
        assert_eq!(item["b"], 2);
        assert!(item.get("d").is_none());
    }

    #[test]
    fn test_matcher_priority() {
        let value = json!({"data": [1], "items": [1, 2], "events": [1, 2, 3]});
        let shape = match_shape(&value).map(|(matcher, _)| matcher.name);
        assert_eq!(shape, Some("items"));

        let value = json!({"results": [1], "groups": [1, 2]});
        let shape = match_shape(&value).map(|(_, shape)| shape.label);
        assert_eq!(shape, Some("results"));

        assert!(match_shape(&json!({"error": "nope"})).is_none());
    }

    #[test]
    fn test_generic_truncation() {
        let mut object = Map::new();
        for i in 0..12 {
            object.insert(format!("k{i}"), Value::from(i));
        }
        object.insert("text".to_string(), Value::String("w".repeat(150)));
        object.insert("list".to_string(), json!([1, 2, 3, 4, 5, 6, 7]));
        let value = json!({"status": "ok", "detail": Value::Object(object)});

        let out = truncate_value(&value, 0);
        let detail = out["detail"].as_object();
        // first 10 keys plus the omission marker
        assert_eq!(detail.map(Map::len), Some(11));
        assert_eq!(out["detail"]["..."], "4 more keys omitted");
        assert_eq!(out["status"], "ok");

        let list = truncate_value(&json!([1, 2, 3, 4, 5, 6, 7]), 0);
        assert_eq!(list, json!([1, "... 5 items omitted ...", 7]));

        let text = truncate_value(&Value::String("w".repeat(150)), 0);
        assert_eq!(text, Value::String(format!("{}...", "w".repeat(100))));
    }

    #[test]
    fn test_truncation_collapses_deep_nesting() {
        let mut value = json!("leaf");
        for _ in 0..500 {
            value = json!({ "n": value });
        }

        let out = truncate_value(&value, 0);
        assert_eq!(out, json!({"n": {"n": {"n": "..."}}}));
    }

    #[test]
    fn test_plain_text_keeps_head_and_tail() {
        let compressor = ToolMessageCompressor::new(10);
        let text = format!("{}{}{}", "a".repeat(100), "m".repeat(100), "z".repeat(100));

        let out = compressor.compress(&tool("read_note", text), &calc());
        let body = out.text();
        // 10 tokens -> 25 chars: 12 head, 13 tail
        assert!(body.starts_with(&"a".repeat(12)));
        assert!(body.ends_with(&"z".repeat(13)));
        assert!(body.contains("[275 characters omitted]"));
        assert!(out.is_compressed());
    }

    #[test]
    fn test_plain_text_truncation_is_unicode_safe() {
        let text = "日程".repeat(100);
        let out = truncate_text(&text, 9);
        assert!(out.starts_with("日程日程"));
        assert!(out.contains("[191 characters omitted]"));
    }

    #[test]
    fn test_json_scalars_use_text_truncation() {
        let compressor = ToolMessageCompressor::new(2);
        let out = compressor.compress_content(&format!("\"{}\"", "q".repeat(40)));
        assert!(out.contains("characters omitted"));
    }
}
