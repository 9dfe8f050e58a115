pub mod types;

pub use types::*;

use anyhow::Result;
use async_trait::async_trait;

/// A chat-completion backend. The summarizer is the only caller inside this
/// crate.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    async fn chat(&self, request: ChatRequest) -> Result<ChatOutcome>;
    fn model(&self) -> &str;
    fn provider(&self) -> &'static str;
}
