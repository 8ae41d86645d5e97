//! LLM Provider Strategy Pattern
//!
//! Defines a common interface for upstream model providers, allowing the
//! orchestrator to work with any backend without code changes.
//!
//! The orchestrator owns the transcript. A provider receives the full
//! accumulated history on every request and never hands history back; it
//! only yields fragments of the current model turn.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use agent_core::provider::{LlmProvider, ModelRequest};
//!
//! let provider = GeminiProvider::new(config)?;
//! let mut fragments = provider.stream(request).await?;
//! while let Some(fragment) = fragments.next().await { /* ... */ }
//! ```

use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};
use std::pin::Pin;

use crate::error::Result;
use crate::message::Turn;
use crate::tool::ToolSchema;

/// How much internal reasoning the model may spend
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReasoningMode {
    /// Answer directly, no thinking
    #[default]
    Fast,
    /// Dynamic thinking with thought summaries streamed back
    Deep,
}

impl ReasoningMode {
    /// Thinking token budget (`-1` lets the model decide)
    pub fn thinking_budget(self) -> i32 {
        match self {
            ReasoningMode::Fast => 0,
            ReasoningMode::Deep => -1,
        }
    }

    pub fn include_thoughts(self) -> bool {
        matches!(self, ReasoningMode::Deep)
    }
}

/// Configuration for model generation
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GenerationOptions {
    /// Model identifier (e.g., "gemini-2.5-flash")
    pub model: String,

    /// Temperature for sampling (0.0 = deterministic, 1.0 = creative)
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Maximum tokens to generate
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// Top-p nucleus sampling
    #[serde(default = "default_top_p")]
    pub top_p: f32,

    #[serde(default)]
    pub reasoning: ReasoningMode,
}

fn default_temperature() -> f32 {
    0.7
}
fn default_max_tokens() -> u32 {
    8192
}
fn default_top_p() -> f32 {
    0.95
}

impl Default for GenerationOptions {
    fn default() -> Self {
        Self {
            model: "gemini-2.5-flash".into(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            top_p: default_top_p(),
            reasoning: ReasoningMode::default(),
        }
    }
}

/// Everything a provider needs for one model round
#[derive(Clone, Debug, Default)]
pub struct ModelRequest {
    pub system_instruction: Option<String>,
    pub contents: Vec<Turn>,
    pub tools: Vec<ToolSchema>,
    pub options: GenerationOptions,
}

/// One classified piece of a streamed model turn
#[derive(Clone, Debug, PartialEq)]
pub enum ModelFragment {
    /// Internal reasoning; shown to the caller, never persisted
    Thought(String),
    /// Final answer text
    Text(String),
    /// A function call, captured raw
    ToolCall {
        name: String,
        args: serde_json::Value,
        continuation_token: Option<String>,
    },
}

/// Stream type for fragment streaming
pub type FragmentStream = Pin<Box<dyn Stream<Item = Result<ModelFragment>> + Send>>;

/// Response from a non-streaming completion
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Completion {
    /// The generated text
    pub content: String,

    /// Model that generated this response
    pub model: String,
}

/// Provider metadata
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProviderInfo {
    /// Provider name (e.g., "Gemini")
    pub name: String,

    /// Default model
    pub models: Vec<ModelInfo>,

    /// Whether tool/function calling is supported
    pub supports_tools: bool,
}

/// Information about a model
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ModelInfo {
    pub id: String,
    pub supports_vision: bool,
}

/// Strategy trait for model providers
///
/// Implement this trait to add support for new backends.
/// The orchestrator works exclusively through this interface.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Get provider information and capabilities
    fn info(&self) -> ProviderInfo;

    /// Check if the provider is available and configured correctly
    async fn health_check(&self) -> Result<bool>;

    /// Single-shot text completion (no tools)
    async fn complete(&self, request: ModelRequest) -> Result<Completion>;

    /// Stream one model turn as classified fragments
    async fn stream(&self, request: ModelRequest) -> Result<FragmentStream>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generation_options_defaults() {
        let opts = GenerationOptions::default();
        assert_eq!(opts.model, "gemini-2.5-flash");
        assert_eq!(opts.reasoning, ReasoningMode::Fast);
        assert_eq!(opts.max_tokens, 8192);
    }

    #[test]
    fn test_reasoning_mode_budgets() {
        assert_eq!(ReasoningMode::Fast.thinking_budget(), 0);
        assert!(!ReasoningMode::Fast.include_thoughts());
        assert_eq!(ReasoningMode::Deep.thinking_budget(), -1);
        let mode: ReasoningMode = serde_json::from_str("\"deep\"").unwrap();
        assert_eq!(mode, ReasoningMode::Deep);
    }
}
