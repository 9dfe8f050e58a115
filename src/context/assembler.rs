//! Final message-list assembly.

use crate::llm::Message;
use log::debug;
use std::collections::HashMap;

use super::calculator::TokenCalculator;
use super::compressor::ToolMessageCompressor;
use super::summarizer::SummaryMetadata;

/// Label that opens the system message carrying a conversation summary.
pub const SUMMARY_LABEL: &str = "[Conversation summary]";

/// System prompt, optional summary, then every message the summary does not
/// cover with tool results compressed.
///
/// Nothing past the summary cutoff is dropped; keeping the tail bounded is
/// the summarizer's job.
#[must_use]
pub fn build_optimized_context(
    system_prompt: &str,
    messages: &[Message],
    summary: Option<&SummaryMetadata>,
    calculator: &TokenCalculator,
    compressor: &ToolMessageCompressor,
) -> Vec<Message> {
    let mut context = vec![Message::system(system_prompt)];
    let mut cursor = 0;

    if let Some(summary) = summary.filter(|summary| !summary.is_empty()) {
        context.push(summary_message(summary));
        cursor = summary.summarized_until.min(messages.len());
    }

    // Results without a `name` are attributed through their call id
    let tool_names: HashMap<&str, &str> = messages
        .iter()
        .flat_map(|message| &message.tool_calls)
        .map(|call| (call.id.as_str(), call.name.as_str()))
        .collect();

    let tail = &messages[cursor..];
    context.extend(tail.iter().map(|message| {
        if message.is_tool_result() {
            let name = message.name.as_deref().or_else(|| {
                message
                    .tool_call_id
                    .as_deref()
                    .and_then(|id| tool_names.get(id).copied())
            });
            compressor.compress_with_name(message, name, calculator)
        } else {
            message.clone()
        }
    }));

    debug!(
        "Context assembled (messages={}, summarized={cursor}, tail={})",
        context.len(),
        tail.len()
    );

    context
}

/// System prompt followed by the untouched history.
#[must_use]
pub fn build_full_context(system_prompt: &str, messages: &[Message]) -> Vec<Message> {
    let mut context = Vec::with_capacity(messages.len() + 1);
    context.push(Message::system(system_prompt));
    context.extend_from_slice(messages);
    context
}

fn summary_message(summary: &SummaryMetadata) -> Message {
    Message::system(format!("{SUMMARY_LABEL}\n{}", summary.summary))
}
