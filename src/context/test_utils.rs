use crate::llm::{ChatOutcome, ChatRequest, ChatResponse, LlmProvider, Message, StopReason, Usage};
use anyhow::{Result, bail};
use async_trait::async_trait;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

// ===================
// Mock LLM Provider
// ===================

pub struct MockProvider {
    responses: Mutex<Vec<ChatOutcome>>,
    requests: Mutex<Vec<ChatRequest>>,
    call_count: AtomicUsize,
}

impl MockProvider {
    pub fn new(responses: Vec<ChatOutcome>) -> Self {
        Self {
            responses: Mutex::new(responses),
            requests: Mutex::new(Vec::new()),
            call_count: AtomicUsize::new(0),
        }
    }

    pub fn summary(text: &str) -> Self {
        Self::new(vec![Self::text_response(text)])
    }

    pub fn text_response(text: &str) -> ChatOutcome {
        Self::text_response_with_usage(
            text,
            Usage {
                input_tokens: 120,
                output_tokens: 30,
            },
        )
    }

    pub fn text_response_with_usage(text: &str, usage: Usage) -> ChatOutcome {
        ChatOutcome::Success(ChatResponse {
            id: "msg_1".to_string(),
            text: Some(text.to_string()),
            tool_calls: Vec::new(),
            model: "mock-model".to_string(),
            stop_reason: Some(StopReason::EndTurn),
            usage,
        })
    }

    pub fn calls(&self) -> usize {
        self.call_count.load(Ordering::SeqCst)
    }

    /// Text of the prompt sent on the `index`-th call.
    pub fn prompt(&self, index: usize) -> Option<String> {
        let requests = self.requests.lock().ok()?;
        requests
            .get(index)
            .and_then(|request| request.messages.first())
            .map(|message: &Message| message.text().into_owned())
    }
}

#[async_trait]
impl LlmProvider for MockProvider {
    async fn chat(&self, request: ChatRequest) -> Result<ChatOutcome> {
        self.call_count.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(request);
        }
        let mut responses = match self.responses.lock() {
            Ok(responses) => responses,
            Err(_) => bail!("lock poisoned"),
        };
        if responses.is_empty() {
            bail!("no more mock responses");
        }
        Ok(responses.remove(0))
    }

    fn model(&self) -> &'static str {
        "mock-model"
    }

    fn provider(&self) -> &'static str {
        "mock"
    }
}

/// Alternating user/assistant turns of `text`.
pub fn conversation(count: usize, text: &str) -> Vec<Message> {
    (0..count)
        .map(|i| {
            if i % 2 == 0 {
                Message::user(text)
            } else {
                Message::assistant(text)
            }
        })
        .collect()
}
