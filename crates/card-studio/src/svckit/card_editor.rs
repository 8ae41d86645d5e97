//! Card Editor Tools
//!
//! Adding cards to a project and editing them.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;

use agent_core::{
    Result as CoreResult, Tool, ToolCall, ToolContext, ToolOutput, ToolSchema,
    tool::ParameterSchema,
};

use super::project_id;
use crate::error::StudioError;
use crate::model::Card;
use crate::store::ProjectStore;

/// Tool for adding a card to a project
pub struct CreateCardTool {
    projects: Arc<dyn ProjectStore>,
}

impl CreateCardTool {
    pub fn new(projects: Arc<dyn ProjectStore>) -> Self {
        Self { projects }
    }
}

#[async_trait]
impl Tool for CreateCardTool {
    fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: "create_card".into(),
            description: "Add a card to a project. Defaults to the project the user has open.".into(),
            parameters: vec![
                ParameterSchema::string("projectId", "Project id"),
                ParameterSchema::string("title", "Card title").required(),
                ParameterSchema::string("description", "What the card depicts"),
            ],
        }
    }

    async fn execute(&self, call: &ToolCall, ctx: &ToolContext) -> CoreResult<ToolOutput> {
        let mut project = self.projects.require_project(project_id(call, ctx)?).await?;
        let title = call.required_str("title")?.trim();
        let card = Card::new(title, call.str_arg("description").unwrap_or_default());
        let card_id = card.id.clone();

        project.cards.push(card);
        project.touch();
        self.projects.save_project(&project).await?;
        tracing::info!(project_id = %project.id, card_id = %card_id, "Card created");

        Ok(ToolOutput::json(json!({
            "projectId": project.id,
            "cardId": card_id,
            "title": title,
        })))
    }
}

/// Tool for editing a card's text or choosing its image
pub struct UpdateCardTool {
    projects: Arc<dyn ProjectStore>,
}

impl UpdateCardTool {
    pub fn new(projects: Arc<dyn ProjectStore>) -> Self {
        Self { projects }
    }
}

#[async_trait]
impl Tool for UpdateCardTool {
    fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: "update_card".into(),
            description: "Update a card's title, description or selected image. Omitted fields are left unchanged.".into(),
            parameters: vec![
                ParameterSchema::string("projectId", "Project id"),
                ParameterSchema::string("cardId", "Card id").required(),
                ParameterSchema::string("title", "New title"),
                ParameterSchema::string("description", "New description"),
                ParameterSchema::string("selectedImage", "One of the card's image file names"),
            ],
        }
    }

    async fn execute(&self, call: &ToolCall, ctx: &ToolContext) -> CoreResult<ToolOutput> {
        let mut project = self.projects.require_project(project_id(call, ctx)?).await?;
        let card_id = call.required_str("cardId")?;
        let card = project
            .card_mut(card_id)
            .ok_or_else(|| StudioError::CardNotFound(card_id.to_string()))?;

        let mut changed = Vec::new();
        if let Some(title) = call.str_arg("title").map(str::trim).filter(|t| !t.is_empty()) {
            card.title = title.to_string();
            changed.push("title");
        }
        if let Some(description) = call.str_arg("description") {
            card.description = description.to_string();
            changed.push("description");
        }
        if let Some(image) = call.str_arg("selectedImage") {
            if !card.images.iter().any(|f| f == image) {
                return Err(StudioError::InvalidInput(format!(
                    "{image} is not one of the card's images"
                ))
                .into());
            }
            card.selected_image = Some(image.to_string());
            changed.push("selectedImage");
        }

        if changed.is_empty() {
            return Ok(ToolOutput::error("Nothing to update"));
        }

        card.updated_at = Utc::now();
        project.touch();
        self.projects.save_project(&project).await?;

        Ok(ToolOutput::json(json!({
            "cardId": card_id,
            "updated": changed,
        })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::svckit::fixtures::{ctx_in, studio};

    #[tokio::test]
    async fn test_create_card_in_open_project() {
        let (store, project) = studio();
        let tool = CreateCardTool::new(store.clone());
        let output = tool
            .execute(
                &ToolCall::new("create_card", json!({"title": "Basilisk"}), None),
                &ctx_in(&project),
            )
            .await
            .unwrap();

        let saved = store.require_project(&project.id).await.unwrap();
        assert_eq!(saved.cards.len(), 3);
        assert_eq!(output.response["cardId"], saved.cards[2].id.as_str());
    }

    #[tokio::test]
    async fn test_update_card_selected_image_must_exist() {
        let (store, project) = studio();
        let card_id = project.cards[0].id.clone();
        let tool = UpdateCardTool::new(store.clone());
        let ctx = ctx_in(&project);

        let bad = ToolCall::new("update_card", json!({"cardId": card_id, "selectedImage": "other.png"}), None);
        assert!(tool.execute(&bad, &ctx).await.is_err());

        let good = ToolCall::new(
            "update_card",
            json!({"cardId": card_id, "title": "Elder Dragon", "selectedImage": "dragon-1.png"}),
            None,
        );
        let output = tool.execute(&good, &ctx).await.unwrap();
        assert_eq!(output.response["updated"], json!(["title", "selectedImage"]));

        let saved = store.require_project(&project.id).await.unwrap();
        assert_eq!(saved.cards[0].title, "Elder Dragon");
    }
}
