//! Attachment Resolution
//!
//! Turns uploads, generated artifacts and historical references into the
//! binary parts of a user turn, plus a textual manifest that records what each
//! binary part is. Binary parts carry no identifying metadata, so the
//! manifest is the only way to correlate them when a transcript is replayed.
//!
//! ```text
//! look at these
//!
//! [attachments]
//! {"kind":"upload","inlineIndex":0,"metadata":{"blobId":"..."}}
//! {"kind":"reference","inlineIndex":1,"metadata":{"entityId":"...","filename":"..."}}
//! [/attachments]
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::Result;
use crate::message::{BinaryData, Part, Role, Turn};

const MANIFEST_OPEN: &str = "[attachments]";
const MANIFEST_CLOSE: &str = "[/attachments]";

/// Semantic role of an inline binary part
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttachmentKind {
    /// Freshly uploaded by the user
    Upload,
    /// A previously generated artifact fed back for critique or iteration
    Generated,
    /// An artifact belonging to another domain entity
    Reference,
}

/// Identifiers needed to re-fetch an attachment later
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttachmentMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blob_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub item_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

/// One manifest line
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestEntry {
    pub kind: AttachmentKind,
    pub inline_index: usize,
    #[serde(default)]
    pub metadata: AttachmentMetadata,
}

/// Reference to an artifact owned by another entity
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoricalReference {
    pub entity_id: String,
    #[serde(default)]
    pub item_id: Option<String>,
    pub filename: String,
}

/// Attachments accompanying a new user message
#[derive(Clone, Debug, Default)]
pub struct AttachmentRequest {
    pub uploads: Vec<BinaryData>,
    pub generated: Vec<String>,
    pub references: Vec<HistoricalReference>,
}

impl AttachmentRequest {
    pub fn is_empty(&self) -> bool {
        self.uploads.is_empty() && self.generated.is_empty() && self.references.is_empty()
    }
}

/// An attachment after resolution, addressable by its inline index
#[derive(Clone, Debug)]
pub struct ResolvedAttachment {
    pub entry: ManifestEntry,
    pub data: BinaryData,
}

/// The caller's new turn plus the attachments it carries
#[derive(Clone, Debug)]
pub struct ResolvedTurn {
    pub turn: Turn,
    pub attachments: Vec<ResolvedAttachment>,
}

/// Content cache for uploaded images, keyed by generated id
#[async_trait]
pub trait BlobCache: Send + Sync {
    /// Store bytes, returning the new blob id
    async fn put(&self, data: &[u8], mime_type: &str) -> Result<String>;

    /// Fetch a blob; `None` when unknown
    async fn get(&self, id: &str) -> Result<Option<BinaryData>>;

    /// Remove a blob (unknown ids are not an error)
    async fn delete(&self, id: &str) -> Result<()>;
}

/// Read access to generated artifacts and other entities' artifacts
#[async_trait]
pub trait ArtifactSource: Send + Sync {
    async fn read_generated(&self, filename: &str) -> Result<BinaryData>;

    async fn read_reference(&self, reference: &HistoricalReference) -> Result<BinaryData>;
}

/// In-memory blob cache (for development/testing)
#[derive(Default)]
pub struct MemoryBlobCache {
    blobs: RwLock<HashMap<String, BinaryData>>,
}

impl MemoryBlobCache {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BlobCache for MemoryBlobCache {
    async fn put(&self, data: &[u8], mime_type: &str) -> Result<String> {
        let id = Uuid::new_v4().to_string();
        self.blobs
            .write()
            .await
            .insert(id.clone(), BinaryData::new(mime_type, data.to_vec()));
        Ok(id)
    }

    async fn get(&self, id: &str) -> Result<Option<BinaryData>> {
        Ok(self.blobs.read().await.get(id).cloned())
    }

    async fn delete(&self, id: &str) -> Result<()> {
        self.blobs.write().await.remove(id);
        Ok(())
    }
}

/// Builds user turns from a message and its attachments
pub struct AttachmentResolver {
    blobs: Arc<dyn BlobCache>,
    artifacts: Arc<dyn ArtifactSource>,
}

impl AttachmentResolver {
    pub fn new(blobs: Arc<dyn BlobCache>, artifacts: Arc<dyn ArtifactSource>) -> Self {
        Self { blobs, artifacts }
    }

    /// Resolve attachments in order: uploads, generated files, references.
    ///
    /// Unreadable generated files and references are logged and skipped.
    /// An upload the cache rejects is still sent inline, without a blob id.
    pub async fn resolve(&self, message: &str, request: AttachmentRequest) -> ResolvedTurn {
        let mut attachments: Vec<ResolvedAttachment> = Vec::new();

        for upload in request.uploads {
            let blob_id = match self.blobs.put(&upload.data, &upload.mime_type).await {
                Ok(id) => Some(id),
                Err(e) => {
                    warn!(error = %e, "Failed to cache upload; sending inline only");
                    None
                }
            };
            let entry = ManifestEntry {
                kind: AttachmentKind::Upload,
                inline_index: attachments.len(),
                metadata: AttachmentMetadata {
                    blob_id,
                    mime_type: Some(upload.mime_type.clone()),
                    ..Default::default()
                },
            };
            attachments.push(ResolvedAttachment { entry, data: upload });
        }

        for filename in request.generated {
            match self.artifacts.read_generated(&filename).await {
                Ok(data) => {
                    let entry = ManifestEntry {
                        kind: AttachmentKind::Generated,
                        inline_index: attachments.len(),
                        metadata: AttachmentMetadata {
                            filename: Some(filename),
                            mime_type: Some(data.mime_type.clone()),
                            ..Default::default()
                        },
                    };
                    attachments.push(ResolvedAttachment { entry, data });
                }
                Err(e) => warn!(filename = %filename, error = %e, "Skipping unreadable generated file"),
            }
        }

        for reference in request.references {
            match self.artifacts.read_reference(&reference).await {
                Ok(data) => {
                    let entry = ManifestEntry {
                        kind: AttachmentKind::Reference,
                        inline_index: attachments.len(),
                        metadata: AttachmentMetadata {
                            entity_id: Some(reference.entity_id),
                            item_id: reference.item_id,
                            filename: Some(reference.filename),
                            mime_type: Some(data.mime_type.clone()),
                            ..Default::default()
                        },
                    };
                    attachments.push(ResolvedAttachment { entry, data });
                }
                Err(e) => warn!(
                    entity_id = %reference.entity_id,
                    filename = %reference.filename,
                    error = %e,
                    "Skipping unreadable reference"
                ),
            }
        }

        let entries: Vec<ManifestEntry> = attachments.iter().map(|a| a.entry.clone()).collect();
        let text = render_manifest(message, &entries);

        let mut turn = Turn::new(Role::User);
        if !text.is_empty() {
            turn.push(Part::text(text));
        }
        for attachment in &attachments {
            turn.push(attachment.data.clone().into_part());
        }

        debug!(attachments = attachments.len(), "Resolved user turn");
        ResolvedTurn { turn, attachments }
    }
}

/// Append the manifest block to a message; no block without entries
pub fn render_manifest(message: &str, entries: &[ManifestEntry]) -> String {
    if entries.is_empty() {
        return message.to_string();
    }

    let mut text = String::from(message);
    if !text.is_empty() {
        text.push_str("\n\n");
    }
    text.push_str(MANIFEST_OPEN);
    text.push('\n');
    for entry in entries {
        // Serializing a plain struct of strings cannot fail
        text.push_str(&serde_json::to_string(entry).unwrap_or_default());
        text.push('\n');
    }
    text.push_str(MANIFEST_CLOSE);
    text
}

/// Split a user text part into the message and its manifest entries.
///
/// Only a block that closes the text counts as a manifest, so a message
/// quoting the markers is left intact.
pub fn parse_manifest(text: &str) -> (String, Vec<ManifestEntry>) {
    let trimmed = text.trim_end();
    let Some(block) = trimmed.strip_suffix(MANIFEST_CLOSE) else {
        return (text.to_string(), Vec::new());
    };
    let Some(start) = block.rfind(MANIFEST_OPEN) else {
        return (text.to_string(), Vec::new());
    };

    let entries = block[start + MANIFEST_OPEN.len()..]
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .filter_map(|line| match serde_json::from_str::<ManifestEntry>(line) {
            Ok(entry) => Some(entry),
            Err(e) => {
                warn!(error = %e, "Skipping malformed manifest line");
                None
            }
        })
        .collect();

    (block[..start].trim().to_string(), entries)
}

/// Blob ids of every upload recorded in a transcript's manifests
pub fn referenced_blob_ids(history: &[Turn]) -> Vec<String> {
    history
        .iter()
        .filter(|t| t.role == Role::User)
        .flat_map(|t| t.parts.iter().filter_map(Part::as_text))
        .flat_map(|text| parse_manifest(text).1)
        .filter(|e| e.kind == AttachmentKind::Upload)
        .filter_map(|e| e.metadata.blob_id)
        .collect()
}
