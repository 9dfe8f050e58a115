//! Token accounting for text, messages and message lists.

use crate::llm::{Message, Usage};
use log::warn;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use super::config::{ContextConfig, TokenMethod};

/// Counts tokens with one of the [`TokenMethod`] strategies.
///
/// The estimate assumes ~2.5 characters per token, which holds up for
/// mixed-script text better than the usual English-centric 4.
#[derive(Clone)]
pub struct TokenCalculator {
    method: TokenMethod,
    model: String,
    cache: Arc<TokenizerCache>,
}

impl TokenCalculator {
    /// Overhead tokens per message (role, formatting).
    pub const MESSAGE_OVERHEAD: usize = 4;

    /// Overhead for framing a whole conversation.
    pub const CONVERSATION_OVERHEAD: usize = 3;

    #[must_use]
    pub fn new(method: TokenMethod, model: impl Into<String>) -> Self {
        Self::with_cache(method, model, Arc::new(TokenizerCache::new()))
    }

    /// Share tokenizers with other calculators through `cache`.
    #[must_use]
    pub fn with_cache(
        method: TokenMethod,
        model: impl Into<String>,
        cache: Arc<TokenizerCache>,
    ) -> Self {
        let model = model.into();
        let method = match method {
            TokenMethod::Actual | TokenMethod::Tiktoken if model.trim().is_empty() => {
                warn!("No model configured for {method:?} token counting, estimating instead");
                TokenMethod::Estimate
            }
            other => other,
        };
        Self {
            method,
            model,
            cache,
        }
    }

    #[must_use]
    pub fn from_config(config: &ContextConfig) -> Self {
        Self::new(config.method, config.model.clone())
    }

    /// Heuristic-only calculator, independent of any tokenizer.
    #[must_use]
    pub fn estimating() -> Self {
        Self::new(TokenMethod::Estimate, "")
    }

    #[must_use]
    pub const fn method(&self) -> TokenMethod {
        self.method
    }

    #[must_use]
    pub fn model(&self) -> &str {
        &self.model
    }

    /// Heuristic token count: `ceil(chars / 2.5)`.
    #[must_use]
    pub fn estimate_text(text: &str) -> usize {
        (text.chars().count() * 2).div_ceil(5)
    }

    /// Token count of a text fragment. Empty text costs nothing.
    #[must_use]
    pub fn calculate_text(&self, text: &str) -> usize {
        if text.is_empty() {
            return 0;
        }

        match self.method {
            TokenMethod::Estimate => Self::estimate_text(text),
            TokenMethod::Tiktoken | TokenMethod::Actual => self
                .cache
                .get_or_load(&self.model)
                .map_or_else(|| Self::estimate_text(text), |tokenizer| tokenizer.count(text)),
        }
    }

    /// Content, per-message overhead and any tool-call payload.
    #[must_use]
    pub fn calculate_message(&self, message: &Message) -> usize {
        let content_tokens = self.calculate_text(&message.text());

        let tool_call_tokens: usize = message
            .tool_calls
            .iter()
            .map(|call| {
                let arguments = serde_json::to_string(&call.arguments).unwrap_or_default();
                self.calculate_text(&call.name) + self.calculate_text(&arguments)
            })
            .sum();

        content_tokens + Self::MESSAGE_OVERHEAD + tool_call_tokens
    }

    /// Total for a conversation.
    ///
    /// In [`TokenMethod::Actual`] mode a non-zero provider-reported prompt
    /// size is authoritative; otherwise messages are counted one by one.
    #[must_use]
    pub fn calculate_messages(&self, messages: &[Message], usage: Option<&Usage>) -> usize {
        if self.method == TokenMethod::Actual
            && let Some(usage) = usage
            && usage.input_tokens > 0
        {
            return usage.input_tokens as usize;
        }

        if messages.is_empty() {
            return 0;
        }

        messages
            .iter()
            .map(|message| self.calculate_message(message))
            .sum::<usize>()
            + Self::CONVERSATION_OVERHEAD
    }

    /// The most recent non-zero prompt size a provider reported for
    /// `messages`, if any message carries one.
    #[must_use]
    pub fn reported_usage(messages: &[Message]) -> Option<Usage> {
        messages
            .iter()
            .rev()
            .filter_map(|message| message.metadata.usage)
            .find(|usage| usage.input_tokens > 0)
    }
}

impl std::fmt::Debug for TokenCalculator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenCalculator")
            .field("method", &self.method)
            .field("model", &self.model)
            .finish_non_exhaustive()
    }
}

/// Lazily loaded exact tokenizers keyed by model id.
///
/// Append-only: a model that fails to load is remembered as unavailable and
/// never retried.
#[derive(Default)]
pub struct TokenizerCache {
    tokenizers: RwLock<HashMap<String, Option<Arc<Tokenizer>>>>,
}

impl TokenizerCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up the tokenizer for `model`, loading it on first use.
    #[must_use]
    pub fn get_or_load(&self, model: &str) -> Option<Arc<Tokenizer>> {
        if let Some(entry) = self
            .tokenizers
            .read()
            .ok()
            .and_then(|map| map.get(model).cloned())
        {
            return entry;
        }

        // Build outside the lock; a concurrent loser's copy is discarded
        let loaded = match Tokenizer::load(model) {
            Ok(tokenizer) => Some(Arc::new(tokenizer)),
            Err(error) => {
                warn!("Exact tokenizer unavailable for model={model}, estimating instead: {error}");
                None
            }
        };

        let mut map = self.tokenizers.write().ok()?;
        map.entry(model.to_owned()).or_insert(loaded).clone()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.tokenizers.read().map(|map| map.len()).unwrap_or(0)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// An exact BPE tokenizer.
pub struct Tokenizer {
    #[cfg(feature = "tiktoken")]
    bpe: tiktoken_rs::CoreBPE,
}

impl Tokenizer {
    /// Load the encoding for `model`, falling back to `cl100k_base` for
    /// models tiktoken does not know.
    ///
    /// # Errors
    /// Returns an error if no encoding can be built.
    #[cfg(feature = "tiktoken")]
    pub fn load(model: &str) -> anyhow::Result<Self> {
        let bpe = match tiktoken_rs::get_bpe_from_model(model) {
            Ok(bpe) => bpe,
            Err(_) => tiktoken_rs::cl100k_base()?,
        };
        Ok(Self { bpe })
    }

    /// # Errors
    /// Always: exact tokenization is not compiled in.
    #[cfg(not(feature = "tiktoken"))]
    pub fn load(model: &str) -> anyhow::Result<Self> {
        anyhow::bail!("built without the `tiktoken` feature (model={model})")
    }

    #[must_use]
    pub fn count(&self, text: &str) -> usize {
        #[cfg(feature = "tiktoken")]
        {
            self.bpe.encode_with_special_tokens(text).len()
        }
        #[cfg(not(feature = "tiktoken"))]
        {
            TokenCalculator::estimate_text(text)
        }
    }
}
