//! Project Storage
//!
//! Abstractions and implementations for persisting projects and their cards.

mod file;
mod memory;

pub use file::FileProjectStore;
pub use memory::MemoryProjectStore;

use async_trait::async_trait;

use crate::error::{Result, StudioError};
use crate::model::Project;

/// Listing filter
#[derive(Clone, Debug, Default)]
pub struct ProjectFilter {
    /// Case-insensitive substring of the project name
    pub name_contains: Option<String>,
    pub limit: Option<usize>,
}

impl ProjectFilter {
    pub fn matches(&self, project: &Project) -> bool {
        self.name_contains.as_ref().is_none_or(|needle| {
            project
                .name
                .to_lowercase()
                .contains(&needle.to_lowercase())
        })
    }

    /// Filter, sort newest first, and truncate
    pub fn apply(&self, projects: impl IntoIterator<Item = Project>) -> Vec<Project> {
        let mut matched: Vec<Project> = projects.into_iter().filter(|p| self.matches(p)).collect();
        matched.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        if let Some(limit) = self.limit {
            matched.truncate(limit);
        }
        matched
    }
}

/// Project store trait (Strategy pattern)
#[async_trait]
pub trait ProjectStore: Send + Sync {
    /// Load a project; `None` when unknown
    async fn get_project(&self, id: &str) -> Result<Option<Project>>;

    /// Projects matching `filter`, most recently updated first
    async fn list_projects(&self, filter: &ProjectFilter) -> Result<Vec<Project>>;

    /// Insert or replace a project
    async fn save_project(&self, project: &Project) -> Result<()>;

    /// Load a project or fail with `ProjectNotFound`
    async fn require_project(&self, id: &str) -> Result<Project> {
        self.get_project(id)
            .await?
            .ok_or_else(|| StudioError::ProjectNotFound(id.to_string()))
    }
}
