//! Job Status Tool

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;

use agent_core::{
    Result as CoreResult, Tool, ToolCall, ToolContext, ToolOutput, ToolSchema,
    tool::ParameterSchema,
};

use crate::error::StudioError;
use crate::jobs::JobTracker;

const RECENT_LIMIT: usize = 5;

pub struct JobStatusTool {
    jobs: Arc<dyn JobTracker>,
}

impl JobStatusTool {
    pub fn new(jobs: Arc<dyn JobTracker>) -> Self {
        Self { jobs }
    }
}

#[async_trait]
impl Tool for JobStatusTool {
    fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: "get_job_status".into(),
            description: "Check image generation jobs. Without a jobId, returns the most recent jobs.".into(),
            parameters: vec![
                ParameterSchema::string("jobId", "Job id"),
                ParameterSchema::string("cardId", "Only jobs for this card"),
            ],
        }
    }

    async fn execute(&self, call: &ToolCall, _ctx: &ToolContext) -> CoreResult<ToolOutput> {
        if let Some(job_id) = call.str_arg("jobId") {
            let job = self
                .jobs
                .get(job_id)
                .await?
                .ok_or_else(|| StudioError::JobNotFound(job_id.to_string()))?;
            return Ok(ToolOutput::json(serde_json::to_value(&job)?));
        }

        let card_id = call.str_arg("cardId");
        let jobs: Vec<_> = self
            .jobs
            .recent(RECENT_LIMIT * 4)
            .await?
            .into_iter()
            .filter(|j| card_id.is_none_or(|id| j.card_id == id))
            .take(RECENT_LIMIT)
            .collect();

        Ok(ToolOutput::json(json!({ "jobs": jobs })))
    }
}
