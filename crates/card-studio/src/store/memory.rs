//! In-memory project store (for development/testing)

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{ProjectFilter, ProjectStore};
use crate::error::Result;
use crate::model::Project;

#[derive(Default)]
pub struct MemoryProjectStore {
    projects: RwLock<HashMap<String, Project>>,
}

impl MemoryProjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the store with existing projects
    pub fn with_projects(projects: impl IntoIterator<Item = Project>) -> Self {
        Self {
            projects: RwLock::new(projects.into_iter().map(|p| (p.id.clone(), p)).collect()),
        }
    }
}

#[async_trait]
impl ProjectStore for MemoryProjectStore {
    async fn get_project(&self, id: &str) -> Result<Option<Project>> {
        Ok(self.projects.read().await.get(id).cloned())
    }

    async fn list_projects(&self, filter: &ProjectFilter) -> Result<Vec<Project>> {
        let projects = self.projects.read().await;
        Ok(filter.apply(projects.values().cloned()))
    }

    async fn save_project(&self, project: &Project) -> Result<()> {
        self.projects
            .write()
            .await
            .insert(project.id.clone(), project.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_save_and_list() {
        let store = MemoryProjectStore::new();
        let mut older = Project::new("Older", "");
        older.updated_at = older.updated_at - chrono::Duration::minutes(5);
        let newer = Project::new("Newer", "");
        store.save_project(&older).await.unwrap();
        store.save_project(&newer).await.unwrap();

        let listed = store.list_projects(&ProjectFilter::default()).await.unwrap();
        let names: Vec<_> = listed.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["Newer", "Older"]);

        assert!(store.require_project("missing").await.is_err());
    }
}
