//! # agent-core
//!
//! Conversational tool-augmented streaming loop with a provider-agnostic
//! model abstraction and an extensible tool system.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                       TurnOrchestrator                            │
//! │  ┌────────────┐  ┌─────────────┐  ┌──────────────┐  ┌──────────┐  │
//! │  │ Attachment │  │    Tool     │  │ LlmProvider  │  │  Event   │  │
//! │  │  Resolver  │──│  Registry   │──│  (Strategy)  │──│ Emitter  │  │
//! │  └────────────┘  └─────────────┘  └──────────────┘  └──────────┘  │
//! │                  ┌──────────────────────┐                         │
//! │                  │  ConversationStore   │                         │
//! │                  └──────────────────────┘                         │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The `LlmProvider` trait keeps the loop independent of the upstream model;
//! the `ContextProvider` and `ArtifactSource` traits keep it independent of
//! the domain.

pub mod attachment;
pub mod conversation;
pub mod error;
pub mod event;
pub mod message;
pub mod orchestrator;
pub mod provider;
pub mod tool;

#[cfg(test)]
pub(crate) mod test_helpers;

pub use attachment::{
    ArtifactSource, AttachmentKind, AttachmentRequest, AttachmentResolver, BlobCache,
    HistoricalReference, ManifestEntry, MemoryBlobCache,
};
pub use conversation::{
    Conversation, ConversationId, ConversationStore, ConversationSummary, FileConversationStore,
    MemoryConversationStore, delete_with_blobs,
};
pub use error::{AgentError, Result};
pub use event::{AgentEvent, EventEmitter};
pub use message::{BinaryData, Part, Role, Turn, validate_transcript};
pub use orchestrator::{
    ContextProvider, NoContext, OrchestratorConfig, TurnOrchestrator, TurnOutcome, TurnRequest,
};
pub use provider::{LlmProvider, ReasoningMode};
pub use tool::{
    DeferredAction, ParameterSchema, Tool, ToolCall, ToolContext, ToolOutput, ToolRegistry,
    ToolSchema,
};
