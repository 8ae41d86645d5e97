//! Application State

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use agent_core::{
    AttachmentResolver, BlobCache, ConversationStore, FileConversationStore, LlmProvider,
    ToolRegistry, TurnOrchestrator,
};
use card_studio::{
    FileBlobCache, FileProjectStore, FsArtifactStore, InMemoryJobTracker, JobTracker,
    ProjectStore, StudioContext,
};
use tokio_util::sync::CancellationToken;

use crate::config::ServerConfig;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub provider: Arc<dyn LlmProvider>,

    /// Turn loop with the studio tools registered
    pub orchestrator: TurnOrchestrator,

    pub projects: Arc<dyn ProjectStore>,

    pub jobs: Arc<dyn JobTracker>,

    /// Uploaded image cache
    pub blobs: Arc<dyn BlobCache>,

    /// Cancellation tokens of in-flight turns, by conversation id
    pub active: Arc<ActiveTurns>,
}

impl AppState {
    /// Wire the file-backed stores under `config.data_dir` to `provider`
    pub async fn build(config: &ServerConfig, provider: Arc<dyn LlmProvider>, model: &str) -> anyhow::Result<Self> {
        let conversations: Arc<dyn ConversationStore> =
            Arc::new(FileConversationStore::open(config.conversations_dir()).await?);
        let projects: Arc<dyn ProjectStore> =
            Arc::new(FileProjectStore::open(config.projects_dir()).await?);
        let blobs: Arc<dyn BlobCache> = Arc::new(FileBlobCache::open(config.blobs_dir()).await?);
        let artifacts = Arc::new(FsArtifactStore::open(config.images_dir(), projects.clone()).await?);
        let jobs: Arc<dyn JobTracker> = Arc::new(InMemoryJobTracker::new());

        let mut tools = ToolRegistry::new();
        card_studio::register_tools(&mut tools, &projects, &jobs, &artifacts);

        let orchestrator = TurnOrchestrator::builder()
            .provider(provider.clone())
            .tools(tools)
            .store(conversations)
            .resolver(Arc::new(AttachmentResolver::new(blobs.clone(), artifacts)))
            .context(Arc::new(StudioContext::new(projects.clone(), jobs.clone())))
            .config(config.orchestrator_config(model))
            .build()?;

        Ok(Self {
            provider,
            orchestrator,
            projects,
            jobs,
            blobs,
            active: Arc::new(ActiveTurns::default()),
        })
    }
}

/// Registry of running turns; one per conversation
#[derive(Default)]
pub struct ActiveTurns {
    tokens: Mutex<HashMap<String, CancellationToken>>,
}

impl ActiveTurns {
    /// Register a new turn; `None` if one is already running for `id`
    pub fn begin(&self, id: &str) -> Option<CancellationToken> {
        let mut tokens = self.tokens.lock().unwrap_or_else(PoisonError::into_inner);
        if tokens.contains_key(id) {
            return None;
        }
        let token = CancellationToken::new();
        tokens.insert(id.to_string(), token.clone());
        Some(token)
    }

    /// Cancel the running turn; returns whether there was one
    pub fn cancel(&self, id: &str) -> bool {
        let tokens = self.tokens.lock().unwrap_or_else(PoisonError::into_inner);
        match tokens.get(id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    pub fn finish(&self, id: &str) {
        self.tokens
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id);
    }

    pub fn is_running(&self, id: &str) -> bool {
        self.tokens
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(id)
    }
}

/// Removes its conversation from `ActiveTurns` when the turn task ends
pub struct TurnGuard {
    active: Arc<ActiveTurns>,
    id: String,
}

impl TurnGuard {
    pub fn new(active: Arc<ActiveTurns>, id: impl Into<String>) -> Self {
        Self {
            active,
            id: id.into(),
        }
    }
}

impl Drop for TurnGuard {
    fn drop(&mut self) {
        self.active.finish(&self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_one_turn_per_conversation() {
        let active = Arc::new(ActiveTurns::default());
        let token = active.begin("c1").unwrap();
        assert!(active.begin("c1").is_none());
        assert!(active.begin("c2").is_some());

        assert!(active.cancel("c1"));
        assert!(token.is_cancelled());
        assert!(!active.cancel("missing"));

        drop(TurnGuard::new(active.clone(), "c1"));
        assert!(!active.is_running("c1"));
        assert!(active.begin("c1").is_some());
    }
}
