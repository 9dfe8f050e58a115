//! Summarize a long scheduling conversation.
//!
//! Builds a synthetic history that overflows a small context window, then
//! prepares the next turn twice: once summarizing, once reusing the stored
//! summary.
//!
//! # Running
//!
//! ```bash
//! OPENAI_API_KEY=your_key cargo run --example summarize_thread
//! ```
//!
//! To see debug logs from the pipeline:
//! ```bash
//! RUST_LOG=agent_context=debug OPENAI_API_KEY=your_key cargo run --example summarize_thread
//! ```

use agent_context::llm::{Message, ToolCall};
use agent_context::providers::OpenAIProvider;
use agent_context::{
    ContextConfig, ContextManager, InMemoryStore, InMemoryUsageRecorder, ThreadId, TokenMethod,
};
use anyhow::Context;
use serde_json::json;
use std::sync::Arc;

const SYSTEM_PROMPT: &str = "You are a scheduling assistant. You manage the user's events, todos and reminders.";

fn history() -> Vec<Message> {
    let mut messages = Vec::new();

    for day in ["Monday", "Tuesday", "Wednesday", "Thursday", "Friday"] {
        let call_id = format!("call_{}", day.to_lowercase());
        messages.push(Message::user(format!("What do I have on {day}?")));
        messages.push(Message::assistant_with_tool_calls(
            None,
            vec![ToolCall::new(&call_id, "list_events", json!({"day": day}))],
        ));

        let events: Vec<_> = (0..12)
            .map(|i| {
                json!({
                    "id": format!("{day}-{i}"),
                    "title": format!("Meeting {i}"),
                    "start": format!("{}:00", 8 + i),
                    "notes": "Agenda: quarterly planning, budget review and hiring updates.",
                })
            })
            .collect();
        messages.push(Message::tool_result(
            &call_id,
            "list_events",
            json!({"success": true, "events": events}).to_string(),
        ));
        messages.push(Message::assistant(format!(
            "You have 12 meetings on {day}, starting at 8:00 with Meeting 0."
        )));
        messages.push(Message::user(format!(
            "Move Meeting 3 on {day} to the afternoon and remind me an hour before."
        )));
        messages.push(Message::assistant(format!(
            "Done. Meeting 3 on {day} now starts at 14:00 and a reminder is set for 13:00."
        )));
    }

    messages
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging for debug output (the pipeline uses the `log` crate)
    env_logger::init();

    let api_key =
        std::env::var("OPENAI_API_KEY").context("OPENAI_API_KEY environment variable must be set")?;

    let config = ContextConfig::default()
        .with_method(TokenMethod::Tiktoken)
        .with_model("gpt-4o-mini")
        .with_context_window(4_000)
        .with_min_messages(10)
        .with_target_summary_tokens(200)
        .with_tool_output_max_tokens(150);

    let store = Arc::new(InMemoryStore::new());
    let recorder = Arc::new(InMemoryUsageRecorder::new());
    let manager = ContextManager::new(
        Arc::new(OpenAIProvider::gpt4o_mini(api_key)),
        Arc::clone(&store),
        config,
    )
    .with_usage_recorder(recorder.clone());

    let thread_id = ThreadId::new();
    let messages = history();
    println!("History: {} messages (thread: {thread_id})\n", messages.len());

    let prepared = manager
        .prepare(&thread_id, SYSTEM_PROMPT, &messages, Some("demo-user"))
        .await?;

    println!(
        "Prepared {} messages, ~{} tokens (summarized: {})",
        prepared.messages.len(),
        prepared.estimated_tokens,
        prepared.summarized
    );
    if let Some(summary) = &prepared.summary {
        println!(
            "\nSummary of the first {} messages ({} -> {} tokens, {:.0}% smaller):\n{}\n",
            summary.summarized_until,
            summary.original_tokens,
            summary.summary_tokens,
            summary.compression_ratio * 100.0,
            summary.summary
        );
    }

    let again = manager
        .prepare(&thread_id, SYSTEM_PROMPT, &messages, Some("demo-user"))
        .await?;
    println!(
        "Second turn: {} messages, summarized again: {}",
        again.messages.len(),
        again.summarized
    );

    let (input, output) = recorder.totals_for("demo-user");
    println!("Summarization usage: {input} input + {output} output tokens");

    Ok(())
}
