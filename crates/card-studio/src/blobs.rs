//! File-backed blob cache for uploaded images.
//!
//! Each blob is stored as `<id>.bin` with its mime type in `<id>.mime`.

use std::path::PathBuf;

use agent_core::{AgentError, BinaryData, BlobCache, Result as CoreResult};
use async_trait::async_trait;
use tracing::debug;
use uuid::Uuid;

use crate::error::Result;
use crate::fs::{validate_id, write_atomic};

pub struct FileBlobCache {
    dir: PathBuf,
}

impl FileBlobCache {
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir).await?;
        Ok(Self { dir })
    }

    fn paths(&self, id: &str) -> CoreResult<(PathBuf, PathBuf)> {
        let id = validate_id(id)?;
        Ok((
            self.dir.join(format!("{id}.bin")),
            self.dir.join(format!("{id}.mime")),
        ))
    }
}

#[async_trait]
impl BlobCache for FileBlobCache {
    async fn put(&self, data: &[u8], mime_type: &str) -> CoreResult<String> {
        let id = Uuid::new_v4().to_string();
        let (bin, mime) = self.paths(&id)?;

        write_atomic(&mime, mime_type.as_bytes()).await?;
        write_atomic(&bin, data).await?;

        debug!(blob_id = %id, bytes = data.len(), "Blob stored");
        Ok(id)
    }

    async fn get(&self, id: &str) -> CoreResult<Option<BinaryData>> {
        let Ok((bin, mime)) = self.paths(id) else {
            return Ok(None);
        };

        let data = match tokio::fs::read(&bin).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(AgentError::Attachment(format!("Failed to read blob {id}: {e}"))),
        };
        let mime_type = tokio::fs::read_to_string(&mime)
            .await
            .map(|m| m.trim().to_string())
            .unwrap_or_else(|_| "application/octet-stream".to_string());

        Ok(Some(BinaryData::new(mime_type, data)))
    }

    async fn delete(&self, id: &str) -> CoreResult<()> {
        let (bin, mime) = self.paths(id)?;
        for path in [bin, mime] {
            match tokio::fs::remove_file(&path).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(AgentError::Storage(format!("Failed to delete blob {id}: {e}"))),
            }
        }
        debug!(blob_id = %id, "Blob deleted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_put_get_delete() {
        let dir = tempfile::tempdir().unwrap();
        let cache = FileBlobCache::open(dir.path()).await.unwrap();

        let id = cache.put(&[1, 2, 3], "image/png").await.unwrap();
        let blob = cache.get(&id).await.unwrap().unwrap();
        assert_eq!(blob.mime_type, "image/png");
        assert_eq!(blob.data, vec![1, 2, 3]);

        cache.delete(&id).await.unwrap();
        assert!(cache.get(&id).await.unwrap().is_none());
        cache.delete(&id).await.unwrap();
    }

    #[tokio::test]
    async fn test_unknown_and_invalid_ids_are_absent() {
        let dir = tempfile::tempdir().unwrap();
        let cache = FileBlobCache::open(dir.path()).await.unwrap();
        assert!(cache.get("nope").await.unwrap().is_none());
        assert!(cache.get("../secrets").await.unwrap().is_none());
    }
}
