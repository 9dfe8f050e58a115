//! Agent Context - keeps LLM conversations inside their context window.
//!
//! This crate provides the building blocks for sending long conversations
//! to a model without overflowing its context:
//! - Token accounting with an exact tokenizer or a fast estimate
//! - Compression of oversized tool outputs
//! - Progressive summarization of older turns
//! - Assembly of the final system + summary + recent message list
//!
//! # Example
//!
//! ```ignore
//! use agent_context::{ContextConfig, ContextManager, InMemoryStore, ThreadId};
//! use agent_context::providers::OpenAIProvider;
//! use std::sync::Arc;
//!
//! let provider = Arc::new(OpenAIProvider::gpt4o_mini(api_key));
//! let store = Arc::new(InMemoryStore::new());
//! let manager = ContextManager::new(provider, store, ContextConfig::default());
//!
//! let thread_id = ThreadId::new();
//! let prepared = manager
//!     .prepare(&thread_id, "You are a scheduling assistant.", &history, None)
//!     .await?;
//!
//! for message in &prepared.messages {
//!     println!("{:?}: {}", message.role, message.text());
//! }
//! ```

#![forbid(unsafe_code)]

pub mod context;
pub mod llm;
pub mod providers;
pub mod stores;
pub mod types;
pub mod usage;

pub use context::{
    ContextConfig, ContextManager, ConversationSummarizer, PreparedContext, SummaryMetadata,
    TokenBudget, TokenCalculator, TokenMethod, ToolMessageCompressor, build_full_context,
    build_optimized_context,
};
pub use llm::LlmProvider;
pub use stores::{InMemoryStore, SummaryStore};
pub use types::ThreadId;
pub use usage::{InMemoryUsageRecorder, UsageRecord, UsageRecorder};
