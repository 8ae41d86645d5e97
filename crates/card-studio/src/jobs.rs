//! Job Tracking
//!
//! Image generation runs in an external executor. This module records the
//! jobs it was asked to run and the progress it reports back. Finished
//! jobs beyond a retention cap are evicted oldest first.

use std::collections::{HashMap, VecDeque};

use agent_core::DeferredAction;
use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;
use tracing::{debug, info};
use uuid::Uuid;

use crate::GENERATE_IMAGE_ACTION;
use crate::error::{Result, StudioError};
use crate::model::{JobParams, JobRecord, JobStatus, JobUpdate};
use crate::store::ProjectStore;

/// Finished jobs kept for status queries
pub const DEFAULT_FINISHED_RETENTION: usize = 200;

/// Job subsystem contract
#[async_trait]
pub trait JobTracker: Send + Sync {
    /// Record a new queued job
    async fn start_job(&self, params: &JobParams) -> Result<JobRecord>;

    /// Apply a progress report from the executor
    async fn report(&self, job_id: &str, update: JobUpdate) -> Result<JobRecord>;

    async fn get(&self, job_id: &str) -> Result<Option<JobRecord>>;

    /// Most recently updated jobs first
    async fn recent(&self, limit: usize) -> Result<Vec<JobRecord>>;
}

/// In-memory job tracker
pub struct InMemoryJobTracker {
    state: RwLock<TrackerState>,
    finished_retention: usize,
}

#[derive(Default)]
struct TrackerState {
    jobs: HashMap<String, JobRecord>,
    /// Finished job ids, oldest first
    finished: VecDeque<String>,
}

impl TrackerState {
    fn evict_finished(&mut self, keep: usize) {
        while self.finished.len() > keep {
            if let Some(id) = self.finished.pop_front() {
                self.jobs.remove(&id);
                debug!(job_id = %id, "Evicted finished job");
            }
        }
    }
}

impl Default for InMemoryJobTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryJobTracker {
    pub fn new() -> Self {
        Self::with_retention(DEFAULT_FINISHED_RETENTION)
    }

    /// Keep at most `finished_retention` finished jobs; unfinished jobs are never evicted
    pub fn with_retention(finished_retention: usize) -> Self {
        Self {
            state: RwLock::new(TrackerState::default()),
            finished_retention,
        }
    }
}

#[async_trait]
impl JobTracker for InMemoryJobTracker {
    async fn start_job(&self, params: &JobParams) -> Result<JobRecord> {
        if params.prompt.trim().is_empty() {
            return Err(StudioError::InvalidInput("Job prompt is empty".into()));
        }

        let now = Utc::now();
        let record = JobRecord {
            id: Uuid::new_v4().to_string(),
            project_id: params.project_id.clone(),
            card_id: params.card_id.clone(),
            prompt: params.prompt.clone(),
            reference_count: params.references.len(),
            status: JobStatus::Queued,
            progress: 0,
            result_files: Vec::new(),
            error: None,
            created_at: now,
            updated_at: now,
        };

        self.state
            .write()
            .await
            .jobs
            .insert(record.id.clone(), record.clone());
        info!(job_id = %record.id, card_id = %record.card_id, "Job queued");
        Ok(record)
    }

    async fn report(&self, job_id: &str, update: JobUpdate) -> Result<JobRecord> {
        let mut state = self.state.write().await;
        let record = state
            .jobs
            .get_mut(job_id)
            .ok_or_else(|| StudioError::JobNotFound(job_id.to_string()))?;

        if record.status.is_finished() {
            return Err(StudioError::InvalidInput(format!(
                "Job {job_id} already {}",
                record.status
            )));
        }

        record.status = update.status;
        record.progress = match update.status {
            JobStatus::Completed => 100,
            _ => update.progress.unwrap_or(record.progress).min(100),
        };
        if !update.result_files.is_empty() {
            record.result_files = update.result_files;
        }
        record.error = update.error;
        record.updated_at = Utc::now();

        debug!(job_id = %job_id, status = %record.status, progress = record.progress, "Job updated");
        let record = record.clone();
        if record.status.is_finished() {
            state.finished.push_back(record.id.clone());
            state.evict_finished(self.finished_retention);
        }
        Ok(record)
    }

    async fn get(&self, job_id: &str) -> Result<Option<JobRecord>> {
        Ok(self.state.read().await.jobs.get(job_id).cloned())
    }

    async fn recent(&self, limit: usize) -> Result<Vec<JobRecord>> {
        let state = self.state.read().await;
        let mut records: Vec<JobRecord> = state.jobs.values().cloned().collect();
        records.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        records.truncate(limit);
        Ok(records)
    }
}

/// Start the job described by a `generate_image` deferred action.
///
/// Other action kinds are not jobs and yield `None`.
pub async fn start_from_action(
    tracker: &dyn JobTracker,
    action: &DeferredAction,
) -> Result<Option<JobRecord>> {
    if action.kind != GENERATE_IMAGE_ACTION {
        return Ok(None);
    }
    let params: JobParams = serde_json::from_value(action.payload.clone())?;
    tracker.start_job(&params).await.map(Some)
}

/// Attach a completed job's files to its card.
///
/// The first image a card receives becomes its selected image.
pub async fn apply_results(store: &dyn ProjectStore, job: &JobRecord) -> Result<()> {
    if job.status != JobStatus::Completed || job.result_files.is_empty() {
        return Ok(());
    }

    let mut project = store.require_project(&job.project_id).await?;
    let card = project
        .card_mut(&job.card_id)
        .ok_or_else(|| StudioError::CardNotFound(job.card_id.clone()))?;

    for file in &job.result_files {
        if !card.images.contains(file) {
            card.images.push(file.clone());
        }
    }
    if card.selected_image.is_none() {
        card.selected_image = job.result_files.first().cloned();
    }
    card.updated_at = Utc::now();
    project.touch();

    store.save_project(&project).await?;
    info!(job_id = %job.id, files = job.result_files.len(), "Job results attached to card");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Card, Project};
    use crate::store::MemoryProjectStore;
    use serde_json::json;

    fn params(project_id: &str, card_id: &str) -> JobParams {
        JobParams {
            project_id: project_id.into(),
            card_id: card_id.into(),
            prompt: "a red dragon".into(),
            references: Vec::new(),
        }
    }

    fn completed() -> JobUpdate {
        JobUpdate {
            status: JobStatus::Completed,
            progress: None,
            result_files: vec!["out.png".into()],
            error: None,
        }
    }

    #[tokio::test]
    async fn test_job_lifecycle() {
        let tracker = InMemoryJobTracker::new();

        let job = tracker.start_job(&params("p1", "c1")).await.unwrap();
        assert_eq!(job.status, JobStatus::Queued);

        let running = tracker
            .report(
                &job.id,
                JobUpdate {
                    status: JobStatus::Running,
                    progress: Some(40),
                    result_files: vec![],
                    error: None,
                },
            )
            .await
            .unwrap();
        assert_eq!(running.progress, 40);
        assert_eq!(tracker.get(&job.id).await.unwrap().unwrap().status, JobStatus::Running);

        let done = tracker
            .report(
                &job.id,
                JobUpdate {
                    status: JobStatus::Completed,
                    progress: None,
                    result_files: vec!["dragon-1.png".into()],
                    error: None,
                },
            )
            .await
            .unwrap();
        assert_eq!(done.progress, 100);

        let late = JobUpdate {
            status: JobStatus::Running,
            progress: Some(10),
            result_files: vec![],
            error: None,
        };
        assert!(tracker.report(&job.id, late).await.is_err());
    }

    #[tokio::test]
    async fn test_finished_jobs_evicted_beyond_retention() {
        let tracker = InMemoryJobTracker::with_retention(2);
        let running = tracker.start_job(&params("p1", "c0")).await.unwrap();

        let mut finished = Vec::new();
        for card in ["c1", "c2", "c3"] {
            let job = tracker.start_job(&params("p1", card)).await.unwrap();
            tracker.report(&job.id, completed()).await.unwrap();
            finished.push(job.id);
        }

        assert!(tracker.get(&finished[0]).await.unwrap().is_none());
        assert!(tracker.get(&finished[1]).await.unwrap().is_some());
        assert!(tracker.get(&finished[2]).await.unwrap().is_some());
        assert!(tracker.get(&running.id).await.unwrap().is_some());
        assert_eq!(tracker.recent(10).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_start_from_action_ignores_other_kinds() {
        let tracker = InMemoryJobTracker::new();
        let other = DeferredAction {
            kind: "open_editor".into(),
            payload: json!({}),
        };
        assert!(start_from_action(&tracker, &other).await.unwrap().is_none());

        let generate = DeferredAction {
            kind: GENERATE_IMAGE_ACTION.into(),
            payload: serde_json::to_value(params("p1", "c1")).unwrap(),
        };
        let job = start_from_action(&tracker, &generate).await.unwrap().unwrap();
        assert_eq!(tracker.recent(5).await.unwrap()[0].id, job.id);
    }

    #[tokio::test]
    async fn test_apply_results_selects_first_image() {
        let mut project = Project::new("Bestiary", "");
        let card = Card::new("Dragon", "");
        let card_id = card.id.clone();
        project.cards.push(card);
        let store = MemoryProjectStore::with_projects([project.clone()]);

        let mut job = InMemoryJobTracker::new()
            .start_job(&params(&project.id, &card_id))
            .await
            .unwrap();
        job.status = JobStatus::Completed;
        job.result_files = vec!["d-1.png".into(), "d-2.png".into()];

        apply_results(&store, &job).await.unwrap();
        apply_results(&store, &job).await.unwrap();

        let saved = store.require_project(&project.id).await.unwrap();
        let card = saved.card(&card_id).unwrap();
        assert_eq!(card.images, vec!["d-1.png", "d-2.png"]);
        assert_eq!(card.selected_image.as_deref(), Some("d-1.png"));
    }
}
