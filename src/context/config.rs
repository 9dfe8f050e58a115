//! Configuration for context-window management.

use serde::{Deserialize, Serialize};

/// How token counts are obtained.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenMethod {
    /// Prefer provider-reported prompt usage; count messages otherwise.
    Actual,
    /// Exact BPE tokenization for the configured model.
    #[default]
    Tiktoken,
    /// Character heuristic (~2.5 characters per token).
    Estimate,
}

/// Configuration for context-window management.
///
/// Every option can be supplied from a config file; missing fields take
/// their defaults.
///
/// # Example
///
/// ```
/// use agent_context::context::{ContextConfig, TokenMethod};
///
/// let config = ContextConfig::default()
///     .with_method(TokenMethod::Estimate)
///     .with_context_window(32_000)
///     .with_min_messages(10);
/// assert_eq!(config.budget().max_tokens, 19_200);
/// ```
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextConfig {
    /// Token counting strategy.
    /// Default: `tiktoken`
    pub method: TokenMethod,

    /// Model identifier used to pick an exact tokenizer.
    /// Default: `gpt-4o`
    pub model: String,

    /// Context window of the target model, in tokens.
    /// Default: 128,000
    pub context_window: usize,

    /// Fraction of the context window the history is kept under.
    /// Default: 0.6
    pub target_usage_ratio: f64,

    /// Ratio of new-message tokens to summary tokens that forces a refresh.
    /// Default: 0.5
    pub summary_trigger_ratio: f64,

    /// Minimum messages before summarization is considered. Also the
    /// minimum number of recent messages kept raw when a summary is cut.
    /// Default: 20
    pub min_messages_before_summary: usize,

    /// Share of the token budget reserved for the summary itself.
    /// Default: 0.2
    pub summary_token_ratio: f64,

    /// Length the summarizer is asked to aim for.
    /// Default: 500
    pub target_summary_tokens: usize,

    /// Tool results above this size are compressed.
    /// Default: 1,000
    pub tool_output_max_tokens: usize,

    /// Tool names never compressed.
    pub exclude_tools: Vec<String>,

    /// Tool-name prefixes never compressed.
    pub exclude_prefixes: Vec<String>,

    /// When false, history is passed through without summary or compression.
    /// Default: true
    pub optimize: bool,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            method: TokenMethod::default(),
            model: String::from("gpt-4o"),
            context_window: 128_000,
            target_usage_ratio: 0.6,
            summary_trigger_ratio: 0.5,
            min_messages_before_summary: 20,
            summary_token_ratio: 0.2,
            target_summary_tokens: 500,
            tool_output_max_tokens: 1_000,
            exclude_tools: Vec::new(),
            exclude_prefixes: Vec::new(),
            optimize: true,
        }
    }
}

impl ContextConfig {
    /// Create a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub const fn with_method(mut self, method: TokenMethod) -> Self {
        self.method = method;
        self
    }

    #[must_use]
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    #[must_use]
    pub const fn with_context_window(mut self, tokens: usize) -> Self {
        self.context_window = tokens;
        self
    }

    #[must_use]
    pub const fn with_target_usage_ratio(mut self, ratio: f64) -> Self {
        self.target_usage_ratio = ratio;
        self
    }

    #[must_use]
    pub const fn with_summary_trigger_ratio(mut self, ratio: f64) -> Self {
        self.summary_trigger_ratio = ratio;
        self
    }

    #[must_use]
    pub const fn with_min_messages(mut self, count: usize) -> Self {
        self.min_messages_before_summary = count;
        self
    }

    #[must_use]
    pub const fn with_summary_token_ratio(mut self, ratio: f64) -> Self {
        self.summary_token_ratio = ratio;
        self
    }

    #[must_use]
    pub const fn with_target_summary_tokens(mut self, tokens: usize) -> Self {
        self.target_summary_tokens = tokens;
        self
    }

    #[must_use]
    pub const fn with_tool_output_max_tokens(mut self, tokens: usize) -> Self {
        self.tool_output_max_tokens = tokens;
        self
    }

    #[must_use]
    pub fn with_exclude_tools<I, S>(mut self, tools: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.exclude_tools = tools.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn with_exclude_prefixes<I, S>(mut self, prefixes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.exclude_prefixes = prefixes.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub const fn with_optimize(mut self, optimize: bool) -> Self {
        self.optimize = optimize;
        self
    }

    /// Token budget derived from the window and ratios.
    #[must_use]
    pub fn budget(&self) -> TokenBudget {
        TokenBudget::new(
            self.context_window,
            self.target_usage_ratio,
            self.summary_token_ratio,
        )
    }
}

/// Token budget derived from a context window. Never persisted.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TokenBudget {
    pub context_window: usize,
    /// Tokens the history is kept under.
    pub max_tokens: usize,
    /// Portion of `max_tokens` reserved for the summary.
    pub summary_budget: usize,
    /// Remainder available to raw recent messages.
    pub recent_budget: usize,
}

impl TokenBudget {
    #[must_use]
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_precision_loss
    )]
    pub fn new(context_window: usize, target_usage_ratio: f64, summary_token_ratio: f64) -> Self {
        let ratio = |value: f64| if value.is_finite() { value.clamp(0.0, 1.0) } else { 0.0 };
        let max_tokens = (context_window as f64 * ratio(target_usage_ratio)) as usize;
        let summary_budget = (max_tokens as f64 * ratio(summary_token_ratio)) as usize;
        Self {
            context_window,
            max_tokens,
            summary_budget,
            recent_budget: max_tokens.saturating_sub(summary_budget),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ContextConfig::default();
        assert_eq!(config.method, TokenMethod::Tiktoken);
        assert_eq!(config.context_window, 128_000);
        assert_eq!(config.min_messages_before_summary, 20);
        assert_eq!(config.tool_output_max_tokens, 1_000);
        assert!(config.exclude_tools.is_empty());
        assert!(config.optimize);
    }

    #[test]
    fn test_builder_pattern() {
        let config = ContextConfig::new()
            .with_method(TokenMethod::Estimate)
            .with_context_window(400)
            .with_min_messages(5)
            .with_exclude_tools(["get_time"])
            .with_exclude_prefixes(vec![String::from("mcp_")])
            .with_optimize(false);

        assert_eq!(config.method, TokenMethod::Estimate);
        assert_eq!(config.context_window, 400);
        assert_eq!(config.min_messages_before_summary, 5);
        assert_eq!(config.exclude_tools, vec!["get_time"]);
        assert_eq!(config.exclude_prefixes, vec!["mcp_"]);
        assert!(!config.optimize);
    }

    #[test]
    fn test_partial_config_from_json() -> anyhow::Result<()> {
        let config: ContextConfig = serde_json::from_str(
            r#"{"method": "actual", "context_window": 8000, "exclude_prefixes": ["list_"]}"#,
        )?;

        assert_eq!(config.method, TokenMethod::Actual);
        assert_eq!(config.context_window, 8_000);
        assert_eq!(config.exclude_prefixes, vec!["list_"]);
        assert_eq!(config.target_summary_tokens, 500);
        Ok(())
    }

    #[test]
    fn test_budget_derivation() {
        let budget = ContextConfig::default()
            .with_context_window(400)
            .with_target_usage_ratio(0.6)
            .budget();

        assert_eq!(budget.max_tokens, 240);
        assert_eq!(budget.summary_budget, 48);
        assert_eq!(budget.recent_budget, 192);
    }

    #[test]
    fn test_budget_clamps_bad_ratios() {
        let budget = TokenBudget::new(1_000, 1.5, f64::NAN);
        assert_eq!(budget.max_tokens, 1_000);
        assert_eq!(budget.summary_budget, 0);
        assert_eq!(budget.recent_budget, 1_000);
    }
}
