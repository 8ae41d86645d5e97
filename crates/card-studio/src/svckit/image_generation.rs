//! Card Image Generation Tool
//!
//! Image generation is not run here. The tool validates the target card,
//! gathers the selected reference images from the user's turn, and hands
//! a `generate_image` action back to the caller, which starts the job.

use std::sync::Arc;

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde_json::json;

use agent_core::{
    DeferredAction, Result as CoreResult, Tool, ToolCall, ToolContext, ToolOutput, ToolSchema,
    tool::ParameterSchema,
};

use super::project_id;
use crate::GENERATE_IMAGE_ACTION;
use crate::error::StudioError;
use crate::model::{JobParams, ReferenceImage};
use crate::store::ProjectStore;

pub struct GenerateCardImageTool {
    projects: Arc<dyn ProjectStore>,
}

impl GenerateCardImageTool {
    pub fn new(projects: Arc<dyn ProjectStore>) -> Self {
        Self { projects }
    }
}

#[async_trait]
impl Tool for GenerateCardImageTool {
    fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: "generate_card_image".into(),
            description: "Request a new image for a card. Generation runs in the background; \
                          check progress with get_job_status. To use images the user attached \
                          as references, pass their inline indices from the attachment manifest."
                .into(),
            parameters: vec![
                ParameterSchema::string("projectId", "Project id"),
                ParameterSchema::string("cardId", "Card id").required(),
                ParameterSchema::string("prompt", "Detailed description of the image").required(),
                ParameterSchema::array(
                    "referenceIndices",
                    "integer",
                    "Inline indices of attached images to use as references",
                ),
            ],
        }
    }

    async fn execute(&self, call: &ToolCall, ctx: &ToolContext) -> CoreResult<ToolOutput> {
        let project = self.projects.require_project(project_id(call, ctx)?).await?;
        let card_id = call.required_str("cardId")?;
        let card = project
            .card(card_id)
            .ok_or_else(|| StudioError::CardNotFound(card_id.to_string()))?;

        let mut references = Vec::new();
        for index in call.index_list("referenceIndices") {
            let attachment = ctx.attachment(index).ok_or_else(|| {
                StudioError::InvalidInput(format!("No attached image at inline index {index}"))
            })?;
            references.push(ReferenceImage {
                inline_index: index,
                mime_type: attachment.data.mime_type.clone(),
                data: BASE64.encode(&attachment.data.data),
            });
        }

        let mut prompt = call.required_str("prompt")?.trim().to_string();
        if let Some(style) = &project.style {
            prompt = format!("{prompt}\n\nStyle: {style}");
        }

        let params = JobParams {
            project_id: project.id.clone(),
            card_id: card.id.clone(),
            prompt,
            references,
        };
        tracing::info!(
            card_id = %params.card_id,
            references = params.references.len(),
            "Image generation requested"
        );

        let response = json!({
            "status": "requested",
            "cardId": params.card_id,
            "cardTitle": card.title,
            "referenceCount": params.references.len(),
        });
        let action = DeferredAction {
            kind: GENERATE_IMAGE_ACTION.into(),
            payload: serde_json::to_value(&params)?,
        };
        Ok(ToolOutput::json(response).with_deferred(action))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::svckit::fixtures::{ctx_in, studio};
    use agent_core::attachment::{AttachmentKind, AttachmentMetadata, ManifestEntry, ResolvedAttachment};
    use agent_core::BinaryData;

    fn upload(index: usize, bytes: &[u8]) -> ResolvedAttachment {
        ResolvedAttachment {
            entry: ManifestEntry {
                kind: AttachmentKind::Upload,
                inline_index: index,
                metadata: AttachmentMetadata::default(),
            },
            data: BinaryData::new("image/png", bytes.to_vec()),
        }
    }

    #[tokio::test]
    async fn test_forwards_selected_reference_images() {
        let (_, mut project) = studio();
        project.style = Some("woodcut".into());
        let store = Arc::new(crate::store::MemoryProjectStore::with_projects([project.clone()]));

        let mut ctx = ctx_in(&project);
        ctx.attachments = Arc::new(vec![upload(0, b"first"), upload(1, b"second")]);

        let tool = GenerateCardImageTool::new(store);
        let call = ToolCall::new(
            "generate_card_image",
            json!({"cardId": project.cards[0].id, "prompt": "breathing fire", "referenceIndices": [1]}),
            None,
        );
        let output = tool.execute(&call, &ctx).await.unwrap();

        let action = output.deferred.unwrap();
        assert_eq!(action.kind, GENERATE_IMAGE_ACTION);
        let params: JobParams = serde_json::from_value(action.payload).unwrap();
        assert_eq!(params.prompt, "breathing fire\n\nStyle: woodcut");
        assert_eq!(params.references.len(), 1);
        assert_eq!(params.references[0].inline_index, 1);
        assert_eq!(params.references[0].data, BASE64.encode(b"second"));
        assert_eq!(output.response["referenceCount"], 1);
    }

    #[tokio::test]
    async fn test_unknown_reference_index_fails() {
        let (store, project) = studio();
        let tool = GenerateCardImageTool::new(store);
        let call = ToolCall::new(
            "generate_card_image",
            json!({"cardId": project.cards[0].id, "prompt": "x", "referenceIndices": [3]}),
            None,
        );
        assert!(tool.execute(&call, &ctx_in(&project)).await.is_err());
    }
}
