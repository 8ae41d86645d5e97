//! File-backed project store: one JSON document per project.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::{debug, warn};

use super::{ProjectFilter, ProjectStore};
use crate::error::Result;
use crate::fs::{validate_id, write_atomic};
use crate::model::Project;

pub struct FileProjectStore {
    dir: PathBuf,
}

impl FileProjectStore {
    /// Open a store rooted at `dir`, creating it if needed
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir).await?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, id: &str) -> Result<PathBuf> {
        Ok(self.dir.join(format!("{}.json", validate_id(id)?)))
    }
}

#[async_trait]
impl ProjectStore for FileProjectStore {
    async fn get_project(&self, id: &str) -> Result<Option<Project>> {
        let path = self.path_for(id)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn list_projects(&self, filter: &ProjectFilter) -> Result<Vec<Project>> {
        let mut projects = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.dir).await?;

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let is_doc = path.extension().is_some_and(|ext| ext == "json")
                && !entry.file_name().to_string_lossy().starts_with('.');
            if !is_doc {
                continue;
            }
            match tokio::fs::read(&path).await {
                Ok(bytes) => match serde_json::from_slice::<Project>(&bytes) {
                    Ok(project) => projects.push(project),
                    Err(e) => warn!(path = %path.display(), error = %e, "Skipping unreadable project"),
                },
                Err(e) => warn!(path = %path.display(), error = %e, "Skipping unreadable project"),
            }
        }

        Ok(filter.apply(projects))
    }

    async fn save_project(&self, project: &Project) -> Result<()> {
        let path = self.path_for(&project.id)?;
        let bytes = serde_json::to_vec_pretty(project)?;
        write_atomic(&path, &bytes).await?;
        debug!(project_id = %project.id, "Project saved");
        Ok(())
    }
}
