//! Error Types

use thiserror::Error;

/// Result type alias for agent operations
pub type Result<T> = std::result::Result<T, AgentError>;

/// Agent error types
#[derive(Error, Debug)]
pub enum AgentError {
    /// Upstream model error (network, bad response, quota)
    #[error("Provider error: {0}")]
    Provider(String),

    /// Provider unavailable or not responding
    #[error("Provider unavailable: {0}")]
    ProviderUnavailable(String),

    /// Upstream model refused to answer (safety filter, blocked prompt)
    #[error("Response blocked: {0}")]
    SafetyBlocked(String),

    /// Tool not found in registry
    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    /// Tool validation failed
    #[error("Tool validation error: {0}")]
    ToolValidation(String),

    /// Tool execution failed
    #[error("Tool execution error: {0}")]
    ToolExecution(String),

    /// Maximum model rounds reached in the turn loop
    #[error("Maximum iterations ({0}) reached")]
    MaxIterations(usize),

    /// A single model round exceeded its time budget
    #[error("Model round timed out after {0} seconds")]
    Timeout(u64),

    /// Conversation id outside `[A-Za-z0-9_-]`
    #[error("Invalid conversation id: {0:?}")]
    InvalidConversationId(String),

    /// Conversation store failure
    #[error("Storage error: {0}")]
    Storage(String),

    /// An attachment could not be read or cached
    #[error("Attachment error: {0}")]
    Attachment(String),

    /// A transcript broke one of its replay invariants
    #[error("Invalid transcript: {0}")]
    InvalidTranscript(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Rate limited
    #[error("Rate limited: {0}")]
    RateLimited(String),

    /// Authentication failed
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// Generic IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Other/unknown error
    #[error("{0}")]
    Other(String),
}

impl AgentError {
    /// Check if error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AgentError::ProviderUnavailable(_)
                | AgentError::RateLimited(_)
                | AgentError::Timeout(_)
                | AgentError::Io(_)
        )
    }

    /// Convert to a user-friendly message
    pub fn user_message(&self) -> String {
        match self {
            AgentError::Provider(msg) => format!("The AI service encountered an error: {}", msg),
            AgentError::ProviderUnavailable(_) => "The AI service is currently unavailable. Please try again.".into(),
            AgentError::SafetyBlocked(msg) => format!("The AI service declined to answer: {}", msg),
            AgentError::ToolNotFound(name) => format!("The tool '{}' is not available.", name),
            AgentError::ToolValidation(msg) => format!("Invalid tool input: {}", msg),
            AgentError::ToolExecution(msg) => format!("Tool error: {}", msg),
            AgentError::MaxIterations(_) => "The request took too many steps to process. Please try a simpler request.".into(),
            AgentError::Timeout(_) => "The AI service took too long to respond. Please try again.".into(),
            AgentError::Storage(_) => "The conversation could not be saved.".into(),
            AgentError::RateLimited(_) => "You've made too many requests. Please wait a moment.".into(),
            AgentError::Auth(_) => "Authentication with the AI service failed. Please check your credentials.".into(),
            _ => "An unexpected error occurred.".into(),
        }
    }
}

impl From<anyhow::Error> for AgentError {
    fn from(err: anyhow::Error) -> Self {
        AgentError::Other(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(AgentError::RateLimited("slow down".into()).is_retryable());
        assert!(AgentError::Timeout(30).is_retryable());
        assert!(!AgentError::SafetyBlocked("SAFETY".into()).is_retryable());
        assert!(!AgentError::Storage("disk full".into()).is_retryable());
    }

    #[test]
    fn test_user_message_hides_internals() {
        let msg = AgentError::Storage("rename /tmp/x failed".into()).user_message();
        assert!(!msg.contains("/tmp"));
    }
}
