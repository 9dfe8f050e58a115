//! Progressive conversation summarization.

use crate::llm::{ChatOutcome, ChatRequest, ChatResponse, LlmProvider, Message, Role};
use crate::usage::{UsageRecord, UsageRecorder};
use anyhow::{Context, Result, bail};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::fmt::Write;
use std::sync::Arc;
use time::OffsetDateTime;

use super::calculator::TokenCalculator;
use super::config::{ContextConfig, TokenBudget};

/// A refresh needs at least this many messages past the current summary.
const MIN_NEW_MESSAGES: usize = 5;

/// Messages longer than this are cut in the transcript.
const TRANSCRIPT_MESSAGE_CHARS: usize = 500;

const SUMMARIZER_SYSTEM_PROMPT: &str = "You are a precise summarizer for a personal scheduling assistant. You condense conversations into dense prose that lets the assistant continue without the original messages.";

/// A stored summary of the conversation prefix `[0, summarized_until)`.
///
/// Each summarization pass produces a complete replacement; summaries are
/// never merged in storage.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SummaryMetadata {
    pub summary: String,
    /// Number of leading messages the summary stands in for.
    pub summarized_until: usize,
    pub summary_tokens: usize,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    pub message_count: usize,
    /// Tokens of the messages the summary replaced.
    pub original_tokens: usize,
    /// `1 - summary_tokens / original_tokens`.
    pub compression_ratio: f64,
}

impl SummaryMetadata {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.summary.trim().is_empty()
    }
}

/// Decides when history must be condensed and asks the model to do it.
pub struct ConversationSummarizer<P: LlmProvider> {
    provider: Arc<P>,
    config: ContextConfig,
    calculator: TokenCalculator,
    usage: Option<Arc<dyn UsageRecorder>>,
}

impl<P: LlmProvider> ConversationSummarizer<P> {
    #[must_use]
    pub fn new(provider: Arc<P>, config: ContextConfig) -> Self {
        let calculator = TokenCalculator::from_config(&config);
        Self {
            provider,
            config,
            calculator,
            usage: None,
        }
    }

    /// Count with an existing calculator (and its tokenizer cache).
    #[must_use]
    pub fn with_calculator(mut self, calculator: TokenCalculator) -> Self {
        self.calculator = calculator;
        self
    }

    #[must_use]
    pub fn with_usage_recorder(mut self, recorder: Arc<dyn UsageRecorder>) -> Self {
        self.usage = Some(recorder);
        self
    }

    #[must_use]
    pub const fn config(&self) -> &ContextConfig {
        &self.config
    }

    #[must_use]
    pub const fn calculator(&self) -> &TokenCalculator {
        &self.calculator
    }

    #[must_use]
    pub fn budget(&self) -> TokenBudget {
        self.config.budget()
    }

    /// Whether the history needs a (new) summary.
    ///
    /// Short or within-budget histories never do. Without a prior summary a
    /// history over budget always does. With one, a refresh waits for at
    /// least five new messages whose size relative to the summary exceeds
    /// the trigger ratio.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn should_summarize(&self, messages: &[Message], summary: Option<&SummaryMetadata>) -> bool {
        if messages.len() < self.config.min_messages_before_summary {
            return false;
        }

        let reported = TokenCalculator::reported_usage(messages);
        let total_tokens = self.calculator.calculate_messages(messages, reported.as_ref());
        let max_tokens = self.budget().max_tokens;
        if total_tokens <= max_tokens {
            return false;
        }

        let Some(summary) = summary.filter(|summary| !summary.is_empty()) else {
            debug!("First summarization needed (tokens={total_tokens}, max={max_tokens})");
            return true;
        };

        let start = summary.summarized_until.min(messages.len());
        let new_messages = &messages[start..];
        if new_messages.len() < MIN_NEW_MESSAGES {
            return false;
        }

        if summary.summary_tokens == 0 {
            return true;
        }

        let new_tokens = self.calculator.calculate_messages(new_messages, None);
        let ratio = new_tokens as f64 / summary.summary_tokens as f64;
        debug!(
            "Summary refresh check (new_messages={}, new_tokens={new_tokens}, summary_tokens={}, ratio={ratio:.2})",
            new_messages.len(),
            summary.summary_tokens
        );
        ratio > self.config.summary_trigger_ratio
    }

    /// The prefix `[start, end)` to summarize; `start` is always 0 and
    /// `(0, 0)` means nothing to do.
    ///
    /// Recent messages are kept newest-first until the recent budget is
    /// spent and the minimum message count is kept. The cut never separates
    /// an assistant tool call from its results, and never moves behind what
    /// `summary` already covers.
    #[must_use]
    pub fn calculate_summarize_range(
        &self,
        messages: &[Message],
        summary: Option<&SummaryMetadata>,
    ) -> (usize, usize) {
        let len = messages.len();
        let budget = self.budget();
        let reported = TokenCalculator::reported_usage(messages);
        let total_tokens = self.calculator.calculate_messages(messages, reported.as_ref());
        if len == 0 || total_tokens <= budget.max_tokens {
            return (0, 0);
        }

        let min_keep = self.config.min_messages_before_summary.max(1);
        let mut kept_tokens = 0;
        let mut boundary = len;
        for (index, message) in messages.iter().enumerate().rev() {
            let tokens = self.calculator.calculate_message(message);
            if kept_tokens + tokens > budget.recent_budget && len - boundary >= min_keep {
                break;
            }
            kept_tokens += tokens;
            boundary = index;
        }

        let mut end = preserve_tool_adjacency(messages, boundary);
        if let Some(summary) = summary.filter(|summary| !summary.is_empty())
            && summary.summarized_until < len
        {
            end = end.max(summary.summarized_until);
        }

        debug!("Summarize range computed (end={end}, kept={}, kept_tokens~{kept_tokens})", len - end);
        (0, end)
    }

    /// Summarize `messages`, the prefix `[0, end)` of a conversation.
    ///
    /// With a `previous` summary only the messages after its
    /// `summarized_until` are sent, together with the previous summary
    /// text; the result still covers the whole prefix.
    ///
    /// Returns `Ok(None)` when there is nothing new to summarize.
    ///
    /// # Errors
    /// Returns an error if the model call fails or yields no text.
    #[allow(clippy::cast_precision_loss)]
    pub async fn summarize(
        &self,
        messages: &[Message],
        previous: Option<&SummaryMetadata>,
        user_id: Option<&str>,
    ) -> Result<Option<SummaryMetadata>> {
        if messages.is_empty() {
            return Ok(None);
        }

        let previous = previous.filter(|summary| !summary.is_empty());
        let start = previous.map_or(0, |summary| summary.summarized_until);
        if start >= messages.len() {
            debug!(
                "Previous summary already covers the range (summarized_until={start}, end={})",
                messages.len()
            );
            return Ok(None);
        }

        let transcript = Self::format_messages_for_summary(&messages[start..]);
        if transcript.trim().is_empty() {
            return Ok(None);
        }

        let target_tokens = self.config.target_summary_tokens;
        let prompt = match previous {
            Some(previous) => {
                Self::build_incremental_prompt(&previous.summary, &transcript, target_tokens)
            }
            None => Self::build_initial_prompt(&transcript, target_tokens),
        };

        let request = ChatRequest {
            system: SUMMARIZER_SYSTEM_PROMPT.to_string(),
            messages: vec![Message::user(prompt)],
            max_tokens: u32::try_from(target_tokens.saturating_mul(2)).unwrap_or(u32::MAX),
        };
        let prompt_tokens = self.calculator.calculate_messages(&request.messages, None)
            + self.calculator.calculate_text(&request.system);

        let outcome = self
            .provider
            .chat(request)
            .await
            .context("Failed to call LLM for summarization")?;

        let response = match outcome {
            ChatOutcome::Success(response) => response,
            ChatOutcome::RateLimited => bail!("Rate limited during summarization"),
            ChatOutcome::InvalidRequest(msg) => {
                bail!("Invalid request during summarization: {msg}")
            }
            ChatOutcome::ServerError(msg) => bail!("Server error during summarization: {msg}"),
        };

        let summary = response
            .first_text()
            .map(|text| text.trim().to_owned())
            .context("No text in summarization response")?;
        let summary_tokens = self.calculator.calculate_text(&summary);
        let original_tokens = self.calculator.calculate_messages(messages, None);
        let compression_ratio = if original_tokens == 0 {
            0.0
        } else {
            1.0 - summary_tokens as f64 / original_tokens as f64
        };

        self.record_usage(user_id, &response, prompt_tokens, summary_tokens)
            .await;

        info!(
            "Conversation summarized (messages={}, new_messages={}, original_tokens={original_tokens}, summary_tokens={summary_tokens}, ratio={compression_ratio:.2})",
            messages.len(),
            messages.len() - start
        );

        Ok(Some(SummaryMetadata {
            summary,
            summarized_until: messages.len(),
            summary_tokens,
            created_at: OffsetDateTime::now_utc(),
            message_count: messages.len(),
            original_tokens,
            compression_ratio,
        }))
    }

    /// Best-effort: failures are logged, never returned.
    async fn record_usage(
        &self,
        user_id: Option<&str>,
        response: &ChatResponse,
        prompt_tokens: usize,
        summary_tokens: usize,
    ) {
        let Some(recorder) = &self.usage else {
            return;
        };

        let reported = response.usage;
        let record = if reported.input_tokens > 0 || reported.output_tokens > 0 {
            UsageRecord::new(
                user_id,
                self.provider.model(),
                reported.input_tokens,
                reported.output_tokens,
                false,
            )
        } else {
            UsageRecord::new(
                user_id,
                self.provider.model(),
                u32::try_from(prompt_tokens).unwrap_or(u32::MAX),
                u32::try_from(summary_tokens).unwrap_or(u32::MAX),
                true,
            )
        };

        if let Err(error) = recorder.record(record).await {
            warn!("Failed to record summarization usage: {error}");
        }
    }

    /// Format messages for summarization.
    fn format_messages_for_summary(messages: &[Message]) -> String {
        let mut output = String::new();

        for message in messages {
            match message.role {
                Role::System => {}
                Role::Tool => {
                    let name = message.name.as_deref().unwrap_or("unknown");
                    let _ = writeln!(output, "[Tool result from {name}]");
                }
                Role::User | Role::Assistant => {
                    let role = message.role.label();
                    let text = message.text();
                    if !text.trim().is_empty() {
                        // Unicode-safe cut
                        let text = match text.char_indices().nth(TRANSCRIPT_MESSAGE_CHARS) {
                            Some((end, _)) => format!("{}... (truncated)", &text[..end]),
                            None => text.into_owned(),
                        };
                        let _ = writeln!(output, "{role}: {text}");
                    }
                    if message.has_tool_calls() {
                        let names: Vec<&str> =
                            message.tool_calls.iter().map(|call| call.name.as_str()).collect();
                        let _ = writeln!(output, "{role}: [Called tools: {}]", names.join(", "));
                    }
                }
            }
        }

        output
    }

    fn build_initial_prompt(transcript: &str, target_tokens: usize) -> String {
        format!(
            r"Summarize this conversation between a user and their scheduling assistant, preserving:
- Decisions reached and operations performed (events, todos and reminders created, changed or deleted)
- Key entities: dates, times, places and people
- The user's preferences and any pending requests or open questions

Describe tool calls by their outcome, not their mechanics. Write dense prose, no lists.

Conversation:
{transcript}
Write the summary in about {target_tokens} tokens:"
        )
    }

    fn build_incremental_prompt(previous: &str, transcript: &str, target_tokens: usize) -> String {
        format!(
            r"Below is the summary of an earlier part of a conversation between a user and their scheduling assistant, followed by the messages that came after it.

Produce one updated summary that replaces the existing one. Fold the new messages in, preserving:
- Decisions reached and operations performed (events, todos and reminders created, changed or deleted)
- Key entities: dates, times, places and people
- The user's preferences and any pending requests or open questions

Describe tool calls by their outcome, not their mechanics. Drop details the new messages made obsolete. Write dense prose, no lists.

Existing summary:
{previous}

New messages:
{transcript}
Write the updated summary in about {target_tokens} tokens:"
        )
    }
}

/// Move a cut point so no tool call is separated from its results.
///
/// A cut on a tool result moves forward past the whole run of results; if
/// that run reaches the end of the history the cut moves back to the
/// issuing assistant message instead. A cut right after an assistant
/// message with tool calls moves back to include it.
#[must_use]
pub fn preserve_tool_adjacency(messages: &[Message], boundary: usize) -> usize {
    let len = messages.len();
    let mut boundary = boundary.min(len);

    if boundary < len && messages[boundary].is_tool_result() {
        let mut forward = boundary;
        while forward < len && messages[forward].is_tool_result() {
            forward += 1;
        }
        if forward < len {
            boundary = forward;
        } else {
            while boundary > 0 && messages[boundary].is_tool_result() {
                boundary -= 1;
            }
        }
    }

    if boundary > 0 && messages[boundary - 1].has_tool_calls() {
        boundary -= 1;
    }

    boundary
}
