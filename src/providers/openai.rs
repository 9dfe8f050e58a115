//! `OpenAI` API provider implementation.
//!
//! This module provides an implementation of `LlmProvider` for the `OpenAI`
//! Chat Completions API. It also supports `OpenAI`-compatible APIs (Ollama, vLLM, etc.)
//! via the `with_base_url` constructor.

use crate::llm::{
    ChatOutcome, ChatRequest, ChatResponse, Content, ContentPart, LlmProvider, Message, Role,
    StopReason, ToolCall, Usage,
};
use anyhow::Result;
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

pub const MODEL_GPT4O: &str = "gpt-4o";
pub const MODEL_GPT4O_MINI: &str = "gpt-4o-mini";
pub const MODEL_GPT41_MINI: &str = "gpt-4.1-mini";

/// `OpenAI` LLM provider using the Chat Completions API.
///
/// Also supports `OpenAI`-compatible APIs (Ollama, vLLM, Azure `OpenAI`, etc.)
/// via the `with_base_url` constructor.
#[derive(Clone)]
pub struct OpenAIProvider {
    client: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl OpenAIProvider {
    /// Create a new `OpenAI` provider with the specified API key and model.
    #[must_use]
    pub fn new(api_key: String, model: String) -> Self {
        Self::with_base_url(api_key, model, DEFAULT_BASE_URL.to_owned())
    }

    /// Create a new provider with a custom base URL for OpenAI-compatible APIs.
    #[must_use]
    pub fn with_base_url(api_key: String, model: String, base_url: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
            model,
            base_url: base_url.trim_end_matches('/').to_owned(),
        }
    }

    /// Create a provider using GPT-4o.
    #[must_use]
    pub fn gpt4o(api_key: String) -> Self {
        Self::new(api_key, MODEL_GPT4O.to_owned())
    }

    /// Create a provider using GPT-4o-mini, a cheap summarization backend.
    #[must_use]
    pub fn gpt4o_mini(api_key: String) -> Self {
        Self::new(api_key, MODEL_GPT4O_MINI.to_owned())
    }

    #[must_use]
    pub fn gpt41_mini(api_key: String) -> Self {
        Self::new(api_key, MODEL_GPT41_MINI.to_owned())
    }
}

#[async_trait]
impl LlmProvider for OpenAIProvider {
    async fn chat(&self, request: ChatRequest) -> Result<ChatOutcome> {
        let messages = build_api_messages(&request);

        let api_request = ApiChatRequest {
            model: &self.model,
            messages: &messages,
            max_completion_tokens: Some(request.max_tokens),
        };

        tracing::debug!(
            model = %self.model,
            max_tokens = request.max_tokens,
            message_count = messages.len(),
            "OpenAI LLM request"
        );

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Content-Type", "application/json")
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&api_request)
            .send()
            .await
            .map_err(|e| anyhow::anyhow!("request failed: {e}"))?;

        let status = response.status();
        let bytes = response
            .bytes()
            .await
            .map_err(|e| anyhow::anyhow!("failed to read response body: {e}"))?;

        tracing::debug!(
            status = %status,
            body_len = bytes.len(),
            "OpenAI LLM response"
        );

        if let Some(outcome) = classify_error(status, &bytes) {
            return Ok(outcome);
        }

        let api_response: ApiChatResponse = serde_json::from_slice(&bytes)
            .map_err(|e| anyhow::anyhow!("failed to parse response: {e}"))?;

        Ok(ChatOutcome::Success(convert_response(api_response)?))
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn provider(&self) -> &'static str {
        "openai"
    }
}

fn classify_error(status: StatusCode, body: &[u8]) -> Option<ChatOutcome> {
    if status == StatusCode::TOO_MANY_REQUESTS {
        tracing::warn!(status = %status, "OpenAI rate limited");
        return Some(ChatOutcome::RateLimited);
    }

    if status.is_server_error() {
        let body = String::from_utf8_lossy(body);
        tracing::error!(status = %status, body = %body, "OpenAI server error");
        return Some(ChatOutcome::ServerError(body.into_owned()));
    }

    if status.is_client_error() {
        let body = String::from_utf8_lossy(body);
        tracing::warn!(status = %status, body = %body, "OpenAI client error");
        return Some(ChatOutcome::InvalidRequest(body.into_owned()));
    }

    None
}

fn convert_response(api_response: ApiChatResponse) -> Result<ChatResponse> {
    let choice = api_response
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| anyhow::anyhow!("no choices in response"))?;

    let tool_calls = choice
        .message
        .tool_calls
        .unwrap_or_default()
        .into_iter()
        .map(|tc| {
            let arguments =
                serde_json::from_str(&tc.function.arguments).unwrap_or(serde_json::Value::Null);
            ToolCall::new(tc.id, tc.function.name, arguments)
        })
        .collect();

    let stop_reason = choice.finish_reason.map(|r| match r {
        ApiFinishReason::Stop => StopReason::EndTurn,
        ApiFinishReason::ToolCalls => StopReason::ToolUse,
        ApiFinishReason::Length => StopReason::MaxTokens,
        ApiFinishReason::ContentFilter => StopReason::StopSequence,
    });

    let usage = api_response.usage.unwrap_or_default();

    Ok(ChatResponse {
        id: api_response.id,
        text: choice.message.content,
        tool_calls,
        model: api_response.model,
        stop_reason,
        usage: Usage {
            input_tokens: usage.prompt_tokens,
            output_tokens: usage.completion_tokens,
        },
    })
}

fn build_api_messages(request: &ChatRequest) -> Vec<ApiMessage> {
    let mut messages = Vec::with_capacity(request.messages.len() + 1);

    // OpenAI takes the system prompt as a leading message
    if !request.system.is_empty() {
        messages.push(ApiMessage {
            role: ApiRole::System,
            content: Some(ApiContent::Text(request.system.clone())),
            tool_calls: None,
            tool_call_id: None,
        });
    }

    messages.extend(request.messages.iter().map(convert_message));
    messages
}

fn convert_message(msg: &Message) -> ApiMessage {
    let role = match msg.role {
        Role::System => ApiRole::System,
        Role::User => ApiRole::User,
        Role::Assistant => ApiRole::Assistant,
        Role::Tool => ApiRole::Tool,
    };

    let tool_calls: Vec<ApiToolCall> = msg
        .tool_calls
        .iter()
        .map(|call| ApiToolCall {
            id: call.id.clone(),
            r#type: "function".to_owned(),
            function: ApiFunctionCall {
                name: call.name.clone(),
                arguments: serde_json::to_string(&call.arguments)
                    .unwrap_or_else(|_| "{}".to_owned()),
            },
        })
        .collect();

    // An assistant turn that only calls tools carries no content
    let content = if !tool_calls.is_empty() && msg.content.is_empty() {
        None
    } else {
        Some(convert_content(&msg.content))
    };

    ApiMessage {
        role,
        content,
        tool_calls: (!tool_calls.is_empty()).then_some(tool_calls),
        tool_call_id: msg.tool_call_id.clone(),
    }
}

fn convert_content(content: &Content) -> ApiContent {
    match content {
        Content::Text(text) => ApiContent::Text(text.clone()),
        Content::Parts(parts) => ApiContent::Parts(
            parts
                .iter()
                .map(|part| match part {
                    ContentPart::Text { text } => ApiContentPart::Text { text: text.clone() },
                    ContentPart::ImageUrl { image_url } => ApiContentPart::ImageUrl {
                        image_url: ApiImageUrl {
                            url: image_url.clone(),
                        },
                    },
                })
                .collect(),
        ),
    }
}

// ============================================================================
// API Request Types
// ============================================================================

#[derive(Serialize)]
struct ApiChatRequest<'a> {
    model: &'a str,
    messages: &'a [ApiMessage],
    #[serde(skip_serializing_if = "Option::is_none")]
    max_completion_tokens: Option<u32>,
}

#[derive(Serialize)]
struct ApiMessage {
    role: ApiRole,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<ApiContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<ApiToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

#[derive(Debug, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
enum ApiRole {
    System,
    User,
    Assistant,
    Tool,
}

#[derive(Debug, Serialize, PartialEq, Eq)]
#[serde(untagged)]
enum ApiContent {
    Text(String),
    Parts(Vec<ApiContentPart>),
}

#[derive(Debug, Serialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ApiContentPart {
    Text { text: String },
    ImageUrl { image_url: ApiImageUrl },
}

#[derive(Debug, Serialize, PartialEq, Eq)]
struct ApiImageUrl {
    url: String,
}

#[derive(Serialize)]
struct ApiToolCall {
    id: String,
    r#type: String,
    function: ApiFunctionCall,
}

#[derive(Serialize)]
struct ApiFunctionCall {
    name: String,
    arguments: String,
}

// ============================================================================
// API Response Types
// ============================================================================

#[derive(Deserialize)]
struct ApiChatResponse {
    id: String,
    choices: Vec<ApiChoice>,
    model: String,
    usage: Option<ApiUsage>,
}

#[derive(Deserialize)]
struct ApiChoice {
    message: ApiResponseMessage,
    finish_reason: Option<ApiFinishReason>,
}

#[derive(Deserialize)]
struct ApiResponseMessage {
    content: Option<String>,
    tool_calls: Option<Vec<ApiResponseToolCall>>,
}

#[derive(Deserialize)]
struct ApiResponseToolCall {
    id: String,
    function: ApiResponseFunctionCall,
}

#[derive(Deserialize)]
struct ApiResponseFunctionCall {
    name: String,
    arguments: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "snake_case")]
enum ApiFinishReason {
    Stop,
    ToolCalls,
    Length,
    ContentFilter,
}

#[derive(Default, Deserialize)]
struct ApiUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
}
