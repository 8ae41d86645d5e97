//! Per-round context for the model: what the user has open, what else
//! exists, and how recent image jobs are going.

use std::fmt::Write as _;
use std::sync::Arc;

use agent_core::ContextProvider;
use async_trait::async_trait;
use tracing::warn;

use crate::jobs::JobTracker;
use crate::model::{JobStatus, Project};
use crate::store::{ProjectFilter, ProjectStore};

const OTHER_PROJECTS: usize = 10;
const RECENT_JOBS: usize = 5;

pub struct StudioContext {
    projects: Arc<dyn ProjectStore>,
    jobs: Arc<dyn JobTracker>,
}

impl StudioContext {
    pub fn new(projects: Arc<dyn ProjectStore>, jobs: Arc<dyn JobTracker>) -> Self {
        Self { projects, jobs }
    }
}

fn describe_project(out: &mut String, project: &Project) {
    let _ = writeln!(out, "Active project: {} (id: {})", project.name, project.id);
    if !project.description.is_empty() {
        let _ = writeln!(out, "Description: {}", project.description);
    }
    if let Some(style) = &project.style {
        let _ = writeln!(out, "Style: {style}");
    }
    if project.cards.is_empty() {
        out.push_str("Cards: none yet\n");
        return;
    }
    out.push_str("Cards:\n");
    for card in &project.cards {
        let image = card.current_image().unwrap_or("no image");
        let _ = writeln!(
            out,
            "- {} (id: {}, images: {}, current: {})",
            card.title,
            card.id,
            card.images.len(),
            image
        );
    }
}

#[async_trait]
impl ContextProvider for StudioContext {
    async fn build_context(&self, active_entity_id: Option<&str>) -> Option<String> {
        let mut out = String::new();

        if let Some(id) = active_entity_id {
            match self.projects.get_project(id).await {
                Ok(Some(project)) => describe_project(&mut out, &project),
                Ok(None) => {
                    let _ = writeln!(out, "Active project {id} does not exist.");
                }
                Err(e) => warn!(project_id = %id, error = %e, "Failed to load active project"),
            }
        }

        let filter = ProjectFilter {
            name_contains: None,
            limit: Some(OTHER_PROJECTS + 1),
        };
        match self.projects.list_projects(&filter).await {
            Ok(projects) => {
                let others: Vec<_> = projects
                    .iter()
                    .filter(|p| Some(p.id.as_str()) != active_entity_id)
                    .take(OTHER_PROJECTS)
                    .collect();
                if !others.is_empty() {
                    out.push_str("Other projects:\n");
                    for p in others {
                        let _ = writeln!(out, "- {} (id: {}, {} cards)", p.name, p.id, p.cards.len());
                    }
                }
            }
            Err(e) => warn!(error = %e, "Failed to list projects"),
        }

        match self.jobs.recent(RECENT_JOBS).await {
            Ok(jobs) if !jobs.is_empty() => {
                out.push_str("Recent image jobs:\n");
                for job in jobs {
                    let _ = write!(out, "- {} for card {}: {}", job.id, job.card_id, job.status);
                    match job.status {
                        JobStatus::Running => {
                            let _ = write!(out, " ({}%)", job.progress);
                        }
                        JobStatus::Completed => {
                            let _ = write!(out, " -> {}", job.result_files.join(", "));
                        }
                        JobStatus::Failed => {
                            let _ = write!(out, ": {}", job.error.as_deref().unwrap_or("unknown error"));
                        }
                        JobStatus::Queued => {}
                    }
                    out.push('\n');
                }
            }
            Ok(_) => {}
            Err(e) => warn!(error = %e, "Failed to read recent jobs"),
        }

        let out = out.trim_end().to_string();
        (!out.is_empty()).then_some(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::InMemoryJobTracker;
    use crate::model::{Card, JobParams};
    use crate::store::MemoryProjectStore;

    #[tokio::test]
    async fn test_empty_studio_has_no_context() {
        let ctx = StudioContext::new(
            Arc::new(MemoryProjectStore::new()),
            Arc::new(InMemoryJobTracker::new()),
        );
        assert!(ctx.build_context(None).await.is_none());
    }

    #[tokio::test]
    async fn test_context_lists_active_project_and_jobs() {
        let mut active = Project::new("Bestiary", "Monsters");
        active.cards.push(Card::new("Dragon", ""));
        let other = Project::new("Spellbook", "");
        let projects = Arc::new(MemoryProjectStore::with_projects([active.clone(), other]));

        let jobs = Arc::new(InMemoryJobTracker::new());
        jobs.start_job(&JobParams {
            project_id: active.id.clone(),
            card_id: active.cards[0].id.clone(),
            prompt: "dragon".into(),
            references: vec![],
        })
        .await
        .unwrap();

        let ctx = StudioContext::new(projects, jobs);
        let text = ctx.build_context(Some(&active.id)).await.unwrap();

        assert!(text.contains("Active project: Bestiary"));
        assert!(text.contains("- Dragon"));
        assert!(text.contains("Other projects:\n- Spellbook"));
        assert!(!text.contains("- Bestiary"));
        assert!(text.contains("queued"));
    }
}
