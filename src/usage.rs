//! Token-usage accounting.
//!
//! Summarization spends model tokens on behalf of a user. The summarizer
//! reports each call to a [`UsageRecorder`]; recording is best-effort and a
//! failing recorder never fails the summary.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::RwLock;
use time::OffsetDateTime;

/// Tokens consumed by one model call.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageRecord {
    pub user_id: Option<String>,
    pub model: String,
    pub input_tokens: u32,
    pub output_tokens: u32,
    /// True when the provider reported nothing and the counts are local
    /// estimates.
    pub estimated: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub recorded_at: OffsetDateTime,
}

impl UsageRecord {
    #[must_use]
    pub fn new(
        user_id: Option<&str>,
        model: impl Into<String>,
        input_tokens: u32,
        output_tokens: u32,
        estimated: bool,
    ) -> Self {
        Self {
            user_id: user_id.map(str::to_owned),
            model: model.into(),
            input_tokens,
            output_tokens,
            estimated,
            recorded_at: OffsetDateTime::now_utc(),
        }
    }
}

/// Sink for usage records, e.g. a per-user quota table.
#[async_trait]
pub trait UsageRecorder: Send + Sync {
    /// Record one call.
    ///
    /// # Errors
    /// Returns an error if the record cannot be stored.
    async fn record(&self, record: UsageRecord) -> Result<()>;
}

/// In-memory recorder. Useful for testing and single-process deployments.
#[derive(Default)]
pub struct InMemoryUsageRecorder {
    records: RwLock<Vec<UsageRecord>>,
}

impl InMemoryUsageRecorder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// All records so far, oldest first.
    #[must_use]
    pub fn records(&self) -> Vec<UsageRecord> {
        self.records
            .read()
            .map(|records| records.clone())
            .unwrap_or_default()
    }

    /// Summed `(input, output)` tokens for a user.
    #[must_use]
    pub fn totals_for(&self, user_id: &str) -> (u64, u64) {
        self.records()
            .iter()
            .filter(|record| record.user_id.as_deref() == Some(user_id))
            .fold((0, 0), |(input, output), record| {
                (
                    input + u64::from(record.input_tokens),
                    output + u64::from(record.output_tokens),
                )
            })
    }
}

#[async_trait]
impl UsageRecorder for InMemoryUsageRecorder {
    async fn record(&self, record: UsageRecord) -> Result<()> {
        self.records
            .write()
            .ok()
            .context("lock poisoned")?
            .push(record);
        Ok(())
    }
}
