//! Context-budget management for long-running conversations.
//!
//! Every turn the whole history has to fit the model's context window. This
//! module keeps it there:
//!
//! 1. [`TokenCalculator`] counts tokens (exact tokenizer or a heuristic)
//! 2. [`ToolMessageCompressor`] shrinks oversized tool results
//! 3. [`ConversationSummarizer`] folds older turns into a running summary
//! 4. [`build_optimized_context`] assembles system prompt, summary and the
//!    recent messages
//!
//! [`ContextManager`] runs the whole pipeline against a
//! [`SummaryStore`](crate::stores::SummaryStore).
//!
//! # Example
//!
//! ```ignore
//! use agent_context::{ContextConfig, ContextManager, InMemoryStore, ThreadId};
//! use agent_context::providers::OpenAIProvider;
//! use std::sync::Arc;
//!
//! let manager = ContextManager::new(
//!     Arc::new(OpenAIProvider::gpt4o_mini(api_key)),
//!     Arc::new(InMemoryStore::new()),
//!     ContextConfig::default().with_context_window(32_000),
//! );
//!
//! let prepared = manager
//!     .prepare(&thread_id, "You are a scheduling assistant.", &history, Some("alice"))
//!     .await?;
//! let response = provider.chat(/* prepared.messages */).await?;
//! ```
//!
//! # Configuration
//!
//! Use [`ContextConfig`] to customize the budget:
//! - `context_window` and `target_usage_ratio`: how many tokens the assembled
//!   context may use
//! - `summary_token_ratio`: the share of that budget reserved for the summary
//! - `min_messages_before_summary`: how short a history stays unsummarized
//! - `tool_output_max_tokens`, `exclude_tools`, `exclude_prefixes`: tool
//!   output compression

mod assembler;
mod calculator;
mod compressor;
mod config;
mod manager;
mod summarizer;

#[cfg(test)]
mod test_utils;

pub use assembler::{SUMMARY_LABEL, build_full_context, build_optimized_context};
pub use calculator::{TokenCalculator, Tokenizer, TokenizerCache};
pub use compressor::{
    ListShape, MAX_DEPTH, SHAPE_MATCHERS, ShapeMatcher, ToolMessageCompressor, compress_json,
    match_shape, truncate_text, truncate_value,
};
pub use config::{ContextConfig, TokenBudget, TokenMethod};
pub use manager::{ContextManager, PreparedContext};
pub use summarizer::{ConversationSummarizer, SummaryMetadata, preserve_tool_adjacency};
