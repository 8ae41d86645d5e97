//! # agent-runtime
//!
//! Upstream model providers for the card studio agent.
//!
//! ## Providers
//!
//! - **Gemini** (default): streaming function calling over the Gemini REST API
//!
//! ## Usage
//!
//! ```rust,ignore
//! use agent_runtime::GeminiProvider;
//!
//! let provider = GeminiProvider::from_env()?;
//! let orchestrator = TurnOrchestrator::builder()
//!     .provider(Arc::new(provider))
//!     .build()?;
//! ```

#[cfg(feature = "gemini")]
pub mod gemini;
#[cfg(feature = "gemini")]
pub mod types;

#[cfg(feature = "gemini")]
pub use gemini::{GeminiConfig, GeminiProvider};

// Re-export core types for convenience
pub use agent_core::{AgentError, LlmProvider, Result};
