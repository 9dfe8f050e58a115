use serde::{Deserialize, Serialize};
use std::borrow::Cow;

#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub system: String,
    pub messages: Vec<Message>,
    pub max_tokens: u32,
}

/// A single conversation turn.
///
/// Messages are values: anything that shrinks or summarizes history builds
/// new messages and leaves its input untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: Content,
    /// Calls issued by an assistant turn.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    /// Links a tool-result message to the call that produced it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    /// Tool name on tool-result messages.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "MessageMetadata::is_empty")]
    pub metadata: MessageMetadata,
}

impl Message {
    #[must_use]
    pub fn new(role: Role, content: Content) -> Self {
        Self {
            role,
            content,
            tool_calls: Vec::new(),
            tool_call_id: None,
            name: None,
            metadata: MessageMetadata::default(),
        }
    }

    #[must_use]
    pub fn system(text: impl Into<String>) -> Self {
        Self::new(Role::System, Content::Text(text.into()))
    }

    #[must_use]
    pub fn user(text: impl Into<String>) -> Self {
        Self::new(Role::User, Content::Text(text.into()))
    }

    #[must_use]
    pub fn assistant(text: impl Into<String>) -> Self {
        Self::new(Role::Assistant, Content::Text(text.into()))
    }

    #[must_use]
    pub fn assistant_with_tool_calls(text: Option<String>, tool_calls: Vec<ToolCall>) -> Self {
        Self {
            tool_calls,
            ..Self::new(Role::Assistant, Content::Text(text.unwrap_or_default()))
        }
    }

    #[must_use]
    pub fn tool_result(
        tool_call_id: impl Into<String>,
        name: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            tool_call_id: Some(tool_call_id.into()),
            name: Some(name.into()),
            ..Self::new(Role::Tool, Content::Text(content.into()))
        }
    }

    /// Attach provider-reported usage.
    #[must_use]
    pub fn with_usage(mut self, usage: Usage) -> Self {
        self.metadata.usage = Some(usage);
        self
    }

    /// Flattened text view of the content.
    #[must_use]
    pub fn text(&self) -> Cow<'_, str> {
        self.content.as_text()
    }

    #[must_use]
    pub fn has_tool_calls(&self) -> bool {
        self.role == Role::Assistant && !self.tool_calls.is_empty()
    }

    #[must_use]
    pub fn is_tool_result(&self) -> bool {
        self.role == Role::Tool
    }

    #[must_use]
    pub fn is_compressed(&self) -> bool {
        self.metadata
            .compression
            .as_ref()
            .is_some_and(|record| record.compressed)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

impl Role {
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::System => "System",
            Self::User => "User",
            Self::Assistant => "Assistant",
            Self::Tool => "Tool",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Content {
    Text(String),
    Parts(Vec<ContentPart>),
}

impl Content {
    /// Text parts joined by newlines; non-text parts contribute nothing.
    #[must_use]
    pub fn as_text(&self) -> Cow<'_, str> {
        match self {
            Self::Text(text) => Cow::Borrowed(text),
            Self::Parts(parts) => {
                let texts: Vec<&str> = parts
                    .iter()
                    .filter_map(|part| match part {
                        ContentPart::Text { text } => Some(text.as_str()),
                        ContentPart::ImageUrl { .. } => None,
                    })
                    .collect();
                match texts.as_slice() {
                    [] => Cow::Borrowed(""),
                    [single] => Cow::Borrowed(single),
                    _ => Cow::Owned(texts.join("\n")),
                }
            }
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.as_text().is_empty()
    }
}

impl Default for Content {
    fn default() -> Self {
        Self::Text(String::new())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub arguments: serde_json::Value,
}

impl ToolCall {
    #[must_use]
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: serde_json::Value) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MessageMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compression: Option<CompressionRecord>,
}

impl MessageMetadata {
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.usage.is_none() && self.compression.is_none()
    }
}

/// Marks a tool message whose content was shrunk. Observability only: the
/// original content is not recoverable from it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompressionRecord {
    pub compressed: bool,
    pub original_tokens: usize,
}

#[derive(Debug, Clone)]
pub struct ChatResponse {
    pub id: String,
    pub text: Option<String>,
    pub tool_calls: Vec<ToolCall>,
    pub model: String,
    pub stop_reason: Option<StopReason>,
    pub usage: Usage,
}

impl ChatResponse {
    #[must_use]
    pub fn first_text(&self) -> Option<&str> {
        self.text.as_deref().filter(|text| !text.trim().is_empty())
    }
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    EndTurn,
    ToolUse,
    MaxTokens,
    StopSequence,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

#[derive(Debug)]
pub enum ChatOutcome {
    Success(ChatResponse),
    RateLimited,
    InvalidRequest(String),
    ServerError(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parts_text_view_skips_images() {
        let content = Content::Parts(vec![
            ContentPart::Text {
                text: "first".to_string(),
            },
            ContentPart::ImageUrl {
                image_url: "https://example.com/a.png".to_string(),
            },
            ContentPart::Text {
                text: "second".to_string(),
            },
        ]);

        assert_eq!(content.as_text(), "first\nsecond");
    }

    #[test]
    fn test_tool_result_constructor_links_call() {
        let message = Message::tool_result("call_1", "list_events", "[]");

        assert_eq!(message.role, Role::Tool);
        assert_eq!(message.tool_call_id.as_deref(), Some("call_1"));
        assert_eq!(message.name.as_deref(), Some("list_events"));
        assert!(message.is_tool_result());
        assert!(!message.is_compressed());
    }

    #[test]
    fn test_message_serialization_omits_empty_fields() -> anyhow::Result<()> {
        let json = serde_json::to_string(&Message::user("hi"))?;
        assert_eq!(json, r#"{"role":"user","content":"hi"}"#);
        Ok(())
    }

    #[test]
    fn test_message_deserialization_with_tool_calls() -> anyhow::Result<()> {
        let message: Message = serde_json::from_value(json!({
            "role": "assistant",
            "content": "",
            "tool_calls": [
                {"id": "call_1", "name": "create_event", "arguments": {"title": "Dentist"}}
            ]
        }))?;

        assert!(message.has_tool_calls());
        assert_eq!(message.tool_calls[0].name, "create_event");
        assert!(message.metadata.is_empty());
        Ok(())
    }

    #[test]
    fn test_first_text_ignores_blank_output() {
        let response = ChatResponse {
            id: "r".to_string(),
            text: Some("   ".to_string()),
            tool_calls: Vec::new(),
            model: "m".to_string(),
            stop_reason: None,
            usage: Usage::default(),
        };

        assert!(response.first_text().is_none());
    }
}
