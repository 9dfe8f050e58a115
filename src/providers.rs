//! LLM Provider implementations.
//!
//! This module contains implementations of the `LlmProvider` trait used as
//! summarization backends.

pub mod openai;

pub use openai::OpenAIProvider;
