//! Error Types for Card Studio

use agent_core::AgentError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, StudioError>;

#[derive(Error, Debug)]
pub enum StudioError {
    #[error("Project not found: {0}")]
    ProjectNotFound(String),

    #[error("Card not found: {0}")]
    CardNotFound(String),

    #[error("Job not found: {0}")]
    JobNotFound(String),

    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<StudioError> for AgentError {
    fn from(err: StudioError) -> Self {
        match err {
            StudioError::InvalidInput(msg) => AgentError::ToolValidation(msg),
            StudioError::Storage(msg) => AgentError::Storage(msg),
            StudioError::Io(e) => AgentError::Io(e),
            StudioError::Serialization(e) => AgentError::Json(e),
            other => AgentError::ToolExecution(other.to_string()),
        }
    }
}
