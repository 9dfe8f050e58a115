//! Per-turn context preparation.

use crate::llm::{LlmProvider, Message};
use crate::stores::SummaryStore;
use crate::types::ThreadId;
use crate::usage::UsageRecorder;
use anyhow::{Context, Result};
use log::{debug, info};
use std::sync::Arc;

use super::assembler::{build_full_context, build_optimized_context};
use super::calculator::{TokenCalculator, TokenizerCache};
use super::compressor::ToolMessageCompressor;
use super::config::ContextConfig;
use super::summarizer::{ConversationSummarizer, SummaryMetadata};

/// The message list to send for a turn.
#[derive(Clone, Debug)]
pub struct PreparedContext {
    pub messages: Vec<Message>,
    /// The summary in effect, freshly made or loaded.
    pub summary: Option<SummaryMetadata>,
    /// True when this call produced a new summary.
    pub summarized: bool,
    pub estimated_tokens: usize,
}

/// Runs the summarize-then-assemble pipeline for a thread.
///
/// One caller per thread at a time; two concurrent `prepare` calls on the
/// same thread may both summarize.
pub struct ContextManager<P: LlmProvider, S: SummaryStore> {
    summarizer: ConversationSummarizer<P>,
    compressor: ToolMessageCompressor,
    store: Arc<S>,
}

impl<P: LlmProvider, S: SummaryStore> ContextManager<P, S> {
    #[must_use]
    pub fn new(provider: Arc<P>, store: Arc<S>, config: ContextConfig) -> Self {
        let compressor = ToolMessageCompressor::from_config(&config);
        Self {
            summarizer: ConversationSummarizer::new(provider, config),
            compressor,
            store,
        }
    }

    #[must_use]
    pub fn with_usage_recorder(mut self, recorder: Arc<dyn UsageRecorder>) -> Self {
        self.summarizer = self.summarizer.with_usage_recorder(recorder);
        self
    }

    /// Share exact tokenizers with other managers through `cache`.
    #[must_use]
    pub fn with_tokenizer_cache(mut self, cache: Arc<TokenizerCache>) -> Self {
        let config = self.summarizer.config();
        let calculator = TokenCalculator::with_cache(config.method, config.model.clone(), cache);
        self.summarizer = self.summarizer.with_calculator(calculator);
        self
    }

    #[must_use]
    pub const fn config(&self) -> &ContextConfig {
        self.summarizer.config()
    }

    #[must_use]
    pub const fn summarizer(&self) -> &ConversationSummarizer<P> {
        &self.summarizer
    }

    /// Build the message list for the next model call on `thread_id`.
    ///
    /// Summarizes and stores a new summary first when the history has
    /// outgrown the budget.
    ///
    /// # Errors
    /// Returns an error if the store fails or summarization fails. No
    /// summary is saved in either case.
    pub async fn prepare(
        &self,
        thread_id: &ThreadId,
        system_prompt: &str,
        messages: &[Message],
        user_id: Option<&str>,
    ) -> Result<PreparedContext> {
        let calculator = self.summarizer.calculator();
        let reported = TokenCalculator::reported_usage(messages);

        if !self.config().optimize {
            let messages = build_full_context(system_prompt, messages);
            let estimated_tokens = calculator.calculate_messages(&messages, reported.as_ref());
            return Ok(PreparedContext {
                messages,
                summary: None,
                summarized: false,
                estimated_tokens,
            });
        }

        let mut summary = self
            .store
            .load_summary(thread_id)
            .await
            .context("Failed to load summary")?;
        let mut summarized = false;

        if self.summarizer.should_summarize(messages, summary.as_ref()) {
            let (start, end) = self
                .summarizer
                .calculate_summarize_range(messages, summary.as_ref());

            if end > start {
                info!(
                    "Summarization triggered (thread_id={thread_id}, message_count={}, end={end})",
                    messages.len()
                );

                let fresh = self
                    .summarizer
                    .summarize(&messages[start..end], summary.as_ref(), user_id)
                    .await
                    .with_context(|| format!("Failed to summarize thread {thread_id}"))?;

                if let Some(fresh) = fresh {
                    self.store
                        .save_summary(thread_id, fresh.clone())
                        .await
                        .context("Failed to save summary")?;
                    summary = Some(fresh);
                    summarized = true;
                }
            }
        }

        let messages = build_optimized_context(
            system_prompt,
            messages,
            summary.as_ref(),
            calculator,
            &self.compressor,
        );
        // A reported prompt size only describes the unsummarized history
        let reported = reported.filter(|_| summary.is_none());
        let estimated_tokens = calculator.calculate_messages(&messages, reported.as_ref());

        debug!(
            "Context prepared (thread_id={thread_id}, messages={}, estimated_tokens={estimated_tokens}, summarized={summarized})",
            messages.len()
        );

        Ok(PreparedContext {
            messages,
            summary,
            summarized,
            estimated_tokens,
        })
    }
}
