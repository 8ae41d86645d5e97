//! Card Image Viewer
//!
//! Lets the model look at a card's image. The image travels as binary
//! output, which the orchestrator relocates into a user turn.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;

use agent_core::{
    Result as CoreResult, Tool, ToolCall, ToolContext, ToolOutput, ToolSchema,
    tool::ParameterSchema,
};

use super::project_id;
use crate::artifacts::FsArtifactStore;
use crate::error::StudioError;
use crate::store::ProjectStore;

pub struct ViewCardImageTool {
    projects: Arc<dyn ProjectStore>,
    artifacts: Arc<FsArtifactStore>,
}

impl ViewCardImageTool {
    pub fn new(projects: Arc<dyn ProjectStore>, artifacts: Arc<FsArtifactStore>) -> Self {
        Self {
            projects,
            artifacts,
        }
    }
}

#[async_trait]
impl Tool for ViewCardImageTool {
    fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: "view_card_image".into(),
            description: "Look at one of a card's images. Defaults to the card's current image.".into(),
            parameters: vec![
                ParameterSchema::string("projectId", "Project id"),
                ParameterSchema::string("cardId", "Card id").required(),
                ParameterSchema::string("filename", "A specific image file name of this card"),
            ],
        }
    }

    async fn execute(&self, call: &ToolCall, ctx: &ToolContext) -> CoreResult<ToolOutput> {
        let project = self.projects.require_project(project_id(call, ctx)?).await?;
        let card_id = call.required_str("cardId")?;
        let card = project
            .card(card_id)
            .ok_or_else(|| StudioError::CardNotFound(card_id.to_string()))?;

        let filename = match call.str_arg("filename") {
            Some(name) if card.images.iter().any(|f| f == name) => name,
            Some(name) => {
                return Err(StudioError::FileNotFound(format!("{name} on card {card_id}")).into());
            }
            None => match card.current_image() {
                Some(name) => name,
                None => return Ok(ToolOutput::error("This card has no images yet")),
            },
        };

        let image = self.artifacts.read_image(filename).await?;
        Ok(ToolOutput::json(json!({
            "cardId": card_id,
            "filename": filename,
            "mimeType": image.mime_type,
        }))
        .with_binary(image))
    }
}
