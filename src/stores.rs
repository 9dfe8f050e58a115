//! Storage for conversation summaries.
//!
//! The context pipeline keeps one [`SummaryMetadata`] per thread. Each
//! summarization pass produces a full replacement, so stores only ever
//! overwrite; nothing is merged.
//!
//! # Built-in Implementation
//!
//! [`InMemoryStore`] is suitable for testing and single-process
//! deployments. For production, implement [`SummaryStore`] on top of the
//! session store the conversation history already lives in.

use crate::context::SummaryMetadata;
use crate::types::ThreadId;
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::RwLock;

/// Trait for storing and retrieving the summary of a thread.
#[async_trait]
pub trait SummaryStore: Send + Sync {
    /// Get the current summary for a thread, if any
    ///
    /// # Errors
    /// Returns an error if the summary cannot be retrieved.
    async fn load_summary(&self, thread_id: &ThreadId) -> Result<Option<SummaryMetadata>>;

    /// Replace the summary for a thread
    ///
    /// # Errors
    /// Returns an error if the summary cannot be stored.
    async fn save_summary(&self, thread_id: &ThreadId, summary: SummaryMetadata) -> Result<()>;

    /// Forget the summary for a thread
    ///
    /// # Errors
    /// Returns an error if the summary cannot be removed.
    async fn clear_summary(&self, thread_id: &ThreadId) -> Result<()>;
}

/// In-memory implementation of `SummaryStore`.
#[derive(Default)]
pub struct InMemoryStore {
    summaries: RwLock<HashMap<String, SummaryMetadata>>,
}

impl InMemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SummaryStore for InMemoryStore {
    async fn load_summary(&self, thread_id: &ThreadId) -> Result<Option<SummaryMetadata>> {
        let summaries = self.summaries.read().ok().context("lock poisoned")?;
        Ok(summaries.get(&thread_id.0).cloned())
    }

    async fn save_summary(&self, thread_id: &ThreadId, summary: SummaryMetadata) -> Result<()> {
        self.summaries
            .write()
            .ok()
            .context("lock poisoned")?
            .insert(thread_id.0.clone(), summary);
        Ok(())
    }

    async fn clear_summary(&self, thread_id: &ThreadId) -> Result<()> {
        self.summaries
            .write()
            .ok()
            .context("lock poisoned")?
            .remove(&thread_id.0);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::OffsetDateTime;

    fn summary(text: &str, summarized_until: usize) -> SummaryMetadata {
        SummaryMetadata {
            summary: text.to_string(),
            summarized_until,
            summary_tokens: 12,
            created_at: OffsetDateTime::now_utc(),
            message_count: summarized_until,
            original_tokens: 400,
            compression_ratio: 0.97,
        }
    }

    #[tokio::test]
    async fn test_in_memory_summary_store() -> Result<()> {
        let store = InMemoryStore::new();
        let thread_id = ThreadId::new();

        // Initially none
        assert!(store.load_summary(&thread_id).await?.is_none());

        store
            .save_summary(&thread_id, summary("Booked the dentist.", 10))
            .await?;
        let loaded = store.load_summary(&thread_id).await?;
        assert_eq!(loaded.map(|s| s.summarized_until), Some(10));

        // Clear
        store.clear_summary(&thread_id).await?;
        assert!(store.load_summary(&thread_id).await?.is_none());

        Ok(())
    }

    #[tokio::test]
    async fn test_save_replaces_wholesale() -> Result<()> {
        let store = InMemoryStore::new();
        let thread_id = ThreadId::from_string("thread-1");
        let other = ThreadId::from_string("thread-2");

        store.save_summary(&thread_id, summary("first", 10)).await?;
        store.save_summary(&thread_id, summary("second", 25)).await?;
        store.save_summary(&other, summary("unrelated", 3)).await?;

        let Some(loaded) = store.load_summary(&thread_id).await? else {
            panic!("summary should exist");
        };
        assert_eq!(loaded.summary, "second");
        assert_eq!(loaded.summarized_until, 25);

        store.clear_summary(&thread_id).await?;
        assert!(store.load_summary(&other).await?.is_some());

        Ok(())
    }
}
