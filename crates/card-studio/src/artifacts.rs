//! Generated image files on disk.
//!
//! Generated files live flat in one images directory. References to
//! another project's images are checked against that project's cards
//! before the file is read.

use std::path::PathBuf;
use std::sync::Arc;

use agent_core::{AgentError, ArtifactSource, BinaryData, HistoricalReference, Result as CoreResult};
use async_trait::async_trait;

use crate::error::{Result, StudioError};
use crate::fs::{mime_for, validate_filename};
use crate::store::ProjectStore;

pub struct FsArtifactStore {
    images_dir: PathBuf,
    projects: Arc<dyn ProjectStore>,
}

impl FsArtifactStore {
    pub async fn open(images_dir: impl Into<PathBuf>, projects: Arc<dyn ProjectStore>) -> Result<Self> {
        let images_dir = images_dir.into();
        tokio::fs::create_dir_all(&images_dir).await?;
        Ok(Self {
            images_dir,
            projects,
        })
    }

    /// Read an image by file name
    pub async fn read_image(&self, filename: &str) -> Result<BinaryData> {
        let filename = validate_filename(filename)?;
        let path = self.images_dir.join(filename);
        match tokio::fs::read(&path).await {
            Ok(data) => Ok(BinaryData::new(mime_for(filename), data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StudioError::FileNotFound(filename.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn check_ownership(&self, reference: &HistoricalReference) -> Result<()> {
        let project = self.projects.require_project(&reference.entity_id).await?;
        let owned = match &reference.item_id {
            Some(card_id) => project
                .card(card_id)
                .ok_or_else(|| StudioError::CardNotFound(card_id.clone()))?
                .images
                .contains(&reference.filename),
            None => project.owns_file(&reference.filename),
        };
        if owned {
            Ok(())
        } else {
            Err(StudioError::FileNotFound(format!(
                "{} is not an image of project {}",
                reference.filename, reference.entity_id
            )))
        }
    }
}

#[async_trait]
impl ArtifactSource for FsArtifactStore {
    async fn read_generated(&self, filename: &str) -> CoreResult<BinaryData> {
        self.read_image(filename)
            .await
            .map_err(|e| AgentError::Attachment(e.to_string()))
    }

    async fn read_reference(&self, reference: &HistoricalReference) -> CoreResult<BinaryData> {
        let result = async {
            self.check_ownership(reference).await?;
            self.read_image(&reference.filename).await
        };
        result
            .await
            .map_err(|e| AgentError::Attachment(e.to_string()))
    }
}
