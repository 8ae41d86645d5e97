//! Conversation Store
//!
//! Durable key -> record persistence for conversation transcripts.
//! The file store writes every record to a unique temp file in the target
//! directory and renames it into place, so a reader never observes a
//! half-written document and concurrent saves of one id cannot interleave.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::attachment::{BlobCache, referenced_blob_ids};
use crate::error::{AgentError, Result};
use crate::message::{Role, Turn};

/// Title given to conversations until one is generated
pub const DEFAULT_TITLE: &str = "New Conversation";

/// Attempts at writing the temp file before giving up on a save
const SAVE_ATTEMPTS: usize = 2;

/// Longest accepted conversation id
const MAX_ID_LEN: usize = 128;

/// Unique conversation identifier
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConversationId(String);

impl ConversationId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Accept a caller-supplied id. Ids map one-to-one onto file names, so
    /// only `[A-Za-z0-9_-]` is allowed.
    pub fn parse(s: impl Into<String>) -> Result<Self> {
        let id = Self(s.into());
        if id.is_valid() {
            Ok(id)
        } else {
            Err(AgentError::InvalidConversationId(id.0))
        }
    }

    pub fn is_valid(&self) -> bool {
        !self.0.is_empty()
            && self.0.len() <= MAX_ID_LEN
            && self
                .0
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ConversationId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConversationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A persisted conversation transcript
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    /// Unique identifier
    pub id: ConversationId,

    /// Optional grouping key (e.g. the project the chat belongs to)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_id: Option<String>,

    /// Display title (generated after the first exchange)
    pub title: String,

    /// Append-only transcript
    #[serde(default)]
    pub history: Vec<Turn>,

    /// Last write timestamp
    pub last_updated: DateTime<Utc>,
}

impl Conversation {
    pub fn new(id: ConversationId) -> Self {
        Self {
            id,
            group_id: None,
            title: DEFAULT_TITLE.into(),
            history: Vec::new(),
            last_updated: Utc::now(),
        }
    }

    /// Update the write timestamp
    pub fn touch(&mut self) {
        self.last_updated = Utc::now();
    }

    /// Whether the title is still the placeholder
    pub fn needs_title(&self) -> bool {
        self.title == DEFAULT_TITLE
    }

    /// Whether the model has answered with text at least once
    pub fn has_model_text(&self) -> bool {
        self.history
            .iter()
            .any(|t| t.role == Role::Model && !t.text().trim().is_empty())
    }

    pub fn summary(&self) -> ConversationSummary {
        ConversationSummary {
            id: self.id.clone(),
            group_id: self.group_id.clone(),
            title: self.title.clone(),
            last_updated: self.last_updated,
            turn_count: self.history.len(),
        }
    }
}

/// Listing view of a conversation (no transcript)
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationSummary {
    pub id: ConversationId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_id: Option<String>,
    pub title: String,
    pub last_updated: DateTime<Utc>,
    pub turn_count: usize,
}

/// Conversation store trait for persistence
#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// Load a conversation by ID
    async fn load(&self, id: &ConversationId) -> Result<Option<Conversation>>;

    /// Save a conversation, replacing any previous record atomically
    async fn save(&self, conversation: &Conversation) -> Result<()>;

    /// Delete a conversation; returns whether it existed
    async fn delete(&self, id: &ConversationId) -> Result<bool>;

    /// List conversations, most recently updated first
    async fn list(&self, group_id: Option<&str>, limit: usize) -> Result<Vec<ConversationSummary>>;

    /// Load a conversation, creating an empty one for an unknown id
    async fn load_or_create(&self, id: &ConversationId) -> Result<Conversation> {
        Ok(self
            .load(id)
            .await?
            .unwrap_or_else(|| Conversation::new(id.clone())))
    }
}

/// What a cascading delete removed
#[derive(Clone, Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeletionReport {
    pub deleted: bool,
    pub blobs_removed: Vec<String>,
}

/// Delete a conversation and every cached upload no other conversation still
/// references.
pub async fn delete_with_blobs(
    store: &dyn ConversationStore,
    blobs: &dyn BlobCache,
    id: &ConversationId,
) -> Result<DeletionReport> {
    let Some(conversation) = store.load(id).await? else {
        return Ok(DeletionReport::default());
    };

    let owned: HashSet<String> = referenced_blob_ids(&conversation.history).into_iter().collect();
    let deleted = store.delete(id).await?;

    let mut still_used = HashSet::new();
    if !owned.is_empty() {
        for summary in store.list(None, usize::MAX).await? {
            if let Some(other) = store.load(&summary.id).await? {
                still_used.extend(referenced_blob_ids(&other.history));
            }
        }
    }

    let mut blobs_removed = Vec::new();
    for blob_id in owned.difference(&still_used) {
        match blobs.delete(blob_id).await {
            Ok(()) => blobs_removed.push(blob_id.clone()),
            Err(e) => warn!(blob_id = %blob_id, error = %e, "Failed to delete orphaned blob"),
        }
    }

    info!(conversation_id = %id, blobs = blobs_removed.len(), "Deleted conversation");
    Ok(DeletionReport {
        deleted,
        blobs_removed,
    })
}

/// In-memory conversation store (for development/testing)
pub struct MemoryConversationStore {
    conversations: RwLock<HashMap<ConversationId, Conversation>>,
}

impl Default for MemoryConversationStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryConversationStore {
    pub fn new() -> Self {
        Self {
            conversations: RwLock::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl ConversationStore for MemoryConversationStore {
    async fn load(&self, id: &ConversationId) -> Result<Option<Conversation>> {
        Ok(self.conversations.read().await.get(id).cloned())
    }

    async fn save(&self, conversation: &Conversation) -> Result<()> {
        self.conversations
            .write()
            .await
            .insert(conversation.id.clone(), conversation.clone());
        Ok(())
    }

    async fn delete(&self, id: &ConversationId) -> Result<bool> {
        Ok(self.conversations.write().await.remove(id).is_some())
    }

    async fn list(&self, group_id: Option<&str>, limit: usize) -> Result<Vec<ConversationSummary>> {
        let conversations = self.conversations.read().await;
        let summaries = conversations
            .values()
            .filter(|c| group_id.is_none_or(|g| c.group_id.as_deref() == Some(g)))
            .map(Conversation::summary)
            .collect();
        Ok(sort_and_truncate(summaries, limit))
    }
}

/// One JSON document per conversation under a directory
pub struct FileConversationStore {
    dir: PathBuf,
}

impl FileConversationStore {
    /// Open (and create) the store directory
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir).await.map_err(|e| {
            AgentError::Storage(format!("Failed to create {}: {}", dir.display(), e))
        })?;
        debug!(dir = %dir.display(), "Conversation store opened");
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, id: &ConversationId) -> Result<PathBuf> {
        if !id.is_valid() {
            return Err(AgentError::InvalidConversationId(id.to_string()));
        }
        Ok(self.dir.join(format!("{id}.json")))
    }

    async fn write_temp(&self, tmp: &Path, bytes: &[u8]) -> Result<()> {
        let mut last_err = None;
        for attempt in 1..=SAVE_ATTEMPTS {
            match tokio::fs::write(tmp, bytes).await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    warn!(attempt, path = %tmp.display(), error = %e, "Temp write failed");
                    last_err = Some(e);
                }
            }
        }
        let _ = tokio::fs::remove_file(tmp).await;
        Err(AgentError::Storage(format!(
            "Failed to write {}: {}",
            tmp.display(),
            last_err.map(|e| e.to_string()).unwrap_or_default()
        )))
    }
}

#[async_trait]
impl ConversationStore for FileConversationStore {
    async fn load(&self, id: &ConversationId) -> Result<Option<Conversation>> {
        let path = self.path_for(id)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => {
                let conversation = serde_json::from_slice(&bytes).map_err(|e| {
                    AgentError::Storage(format!("Corrupt conversation {}: {}", id, e))
                })?;
                Ok(Some(conversation))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(AgentError::Storage(format!("Failed to read {}: {}", path.display(), e))),
        }
    }

    async fn save(&self, conversation: &Conversation) -> Result<()> {
        let path = self.path_for(&conversation.id)?;
        let bytes = serde_json::to_vec_pretty(conversation)?;
        let stem = path.file_stem().map(|s| s.to_string_lossy().into_owned()).unwrap_or_default();
        let tmp = self.dir.join(format!(".{}.{}.tmp", stem, Uuid::new_v4()));

        self.write_temp(&tmp, &bytes).await?;

        if let Err(e) = tokio::fs::rename(&tmp, &path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(AgentError::Storage(format!(
                "Failed to move {} into place: {}",
                path.display(),
                e
            )));
        }

        debug!(conversation_id = %conversation.id, turns = conversation.history.len(), "Conversation saved");
        Ok(())
    }

    async fn delete(&self, id: &ConversationId) -> Result<bool> {
        let path = self.path_for(id)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(AgentError::Storage(format!("Failed to delete {}: {}", path.display(), e))),
        }
    }

    async fn list(&self, group_id: Option<&str>, limit: usize) -> Result<Vec<ConversationSummary>> {
        let mut entries = tokio::fs::read_dir(&self.dir).await?;
        let mut summaries = Vec::new();

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let is_record = path.extension().is_some_and(|ext| ext == "json")
                && !entry.file_name().to_string_lossy().starts_with('.');
            if !is_record {
                continue;
            }

            let bytes = tokio::fs::read(&path).await?;
            match serde_json::from_slice::<Conversation>(&bytes) {
                Ok(c) if group_id.is_none_or(|g| c.group_id.as_deref() == Some(g)) => {
                    summaries.push(c.summary());
                }
                Ok(_) => {}
                Err(e) => warn!(path = %path.display(), error = %e, "Skipping corrupt conversation file"),
            }
        }

        Ok(sort_and_truncate(summaries, limit))
    }
}

fn sort_and_truncate(mut summaries: Vec<ConversationSummary>, limit: usize) -> Vec<ConversationSummary> {
    summaries.sort_by(|a, b| b.last_updated.cmp(&a.last_updated));
    summaries.truncate(limit);
    summaries
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attachment::MemoryBlobCache;
    use crate::message::Part;
    use std::sync::Arc;

    fn conversation_with(id: &str, text: &str) -> Conversation {
        let mut c = Conversation::new(ConversationId::from_string(id));
        c.history.push(Turn::user(vec![Part::text(text)]));
        c
    }

    #[tokio::test]
    async fn test_memory_store_lazy_create() {
        let store = MemoryConversationStore::new();
        let id = ConversationId::new();

        let conversation = store.load_or_create(&id).await.unwrap();
        assert_eq!(conversation.id, id);
        assert!(conversation.history.is_empty());
        assert!(conversation.needs_title());
        assert!(store.load(&id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_file_store_round_trip_and_list() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileConversationStore::open(dir.path()).await.unwrap();

        let mut first = conversation_with("first", "hello");
        first.group_id = Some("project-1".into());
        store.save(&first).await.unwrap();
        store.save(&conversation_with("second", "world")).await.unwrap();

        let loaded = store.load(&first.id).await.unwrap().unwrap();
        assert_eq!(loaded.history, first.history);
        assert_eq!(loaded.group_id.as_deref(), Some("project-1"));

        assert_eq!(store.list(None, 10).await.unwrap().len(), 2);
        let grouped = store.list(Some("project-1"), 10).await.unwrap();
        assert_eq!(grouped.len(), 1);
        assert_eq!(grouped[0].id, first.id);

        assert!(store.delete(&first.id).await.unwrap());
        assert!(!store.delete(&first.id).await.unwrap());
    }

    #[tokio::test]
    async fn test_file_store_leaves_no_temp_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(FileConversationStore::open(dir.path()).await.unwrap());

        let mut handles = Vec::new();
        for i in 0..8 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store.save(&conversation_with("shared", &format!("write {i}"))).await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let names: Vec<String> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["shared.json".to_string()]);

        let loaded = store.load(&ConversationId::from_string("shared")).await.unwrap().unwrap();
        assert!(loaded.history[0].text().starts_with("write "));
    }

    #[tokio::test]
    async fn test_file_store_rejects_unusable_ids() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileConversationStore::open(dir.path()).await.unwrap();
        let result = store.load(&ConversationId::from_string("../")).await;
        assert!(matches!(result, Err(AgentError::InvalidConversationId(_))));
    }

    #[tokio::test]
    async fn test_file_store_ids_never_alias() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileConversationStore::open(dir.path()).await.unwrap();

        let mut dotted = conversation_with("chat_1", "hello");
        dotted.id = ConversationId::from_string("chat.1");
        assert!(matches!(
            store.save(&dotted).await,
            Err(AgentError::InvalidConversationId(_))
        ));
        assert!(store.load(&ConversationId::from_string("chat_1")).await.unwrap().is_none());

        for raw in ["chat.1", "chat/1", "", "über"] {
            assert!(ConversationId::parse(raw).is_err(), "{raw:?} accepted");
        }
        assert!(ConversationId::parse("chat_1-A").is_ok());
        assert!(ConversationId::new().is_valid());
    }

    #[tokio::test]
    async fn test_delete_cascades_only_orphaned_blobs() {
        use crate::attachment::{AttachmentKind, AttachmentMetadata, ManifestEntry, render_manifest};

        let store = MemoryConversationStore::new();
        let blobs = MemoryBlobCache::new();
        let shared = blobs.put(&[1], "image/png").await.unwrap();
        let private = blobs.put(&[2], "image/png").await.unwrap();

        let manifest = |ids: &[&str]| {
            let entries: Vec<ManifestEntry> = ids
                .iter()
                .enumerate()
                .map(|(i, id)| ManifestEntry {
                    kind: AttachmentKind::Upload,
                    inline_index: i,
                    metadata: AttachmentMetadata {
                        blob_id: Some((*id).to_string()),
                        ..Default::default()
                    },
                })
                .collect();
            render_manifest("look", &entries)
        };

        let doomed = conversation_with("doomed", &manifest(&[&shared, &private]));
        let keeper = conversation_with("keeper", &manifest(&[&shared]));
        store.save(&doomed).await.unwrap();
        store.save(&keeper).await.unwrap();

        let report = delete_with_blobs(&store, &blobs, &doomed.id).await.unwrap();
        assert!(report.deleted);
        assert_eq!(report.blobs_removed, vec![private.clone()]);
        assert!(blobs.get(&shared).await.unwrap().is_some());
        assert!(blobs.get(&private).await.unwrap().is_none());
    }
}
