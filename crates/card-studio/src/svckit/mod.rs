//! Service Kit - Agent Tools
//!
//! Domain-specific tools that implement `agent_core::Tool` for the card studio.

mod card_editor;
mod card_image;
mod image_generation;
mod job_status;
mod project_catalog;

pub use card_editor::{CreateCardTool, UpdateCardTool};
pub use card_image::ViewCardImageTool;
pub use image_generation::GenerateCardImageTool;
pub use job_status::JobStatusTool;
pub use project_catalog::{CreateProjectTool, GetProjectTool, ListProjectsTool};

use agent_core::{AgentError, Result as CoreResult, ToolCall, ToolContext};

/// `projectId` argument, falling back to the project the user has open
fn project_id<'a>(call: &'a ToolCall, ctx: &'a ToolContext) -> CoreResult<&'a str> {
    call.str_arg("projectId")
        .filter(|s| !s.trim().is_empty())
        .or(ctx.active_entity_id.as_deref())
        .ok_or_else(|| {
            AgentError::ToolValidation("projectId is required when no project is open".into())
        })
}


#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_project_id_falls_back_to_active_project() {
        let ctx = ToolContext {
            active_entity_id: Some("p-open".into()),
            ..Default::default()
        };
        let explicit = ToolCall::new("x", json!({"projectId": "p-arg"}), None);
        let implicit = ToolCall::new("x", json!({}), None);
        assert_eq!(project_id(&explicit, &ctx).unwrap(), "p-arg");
        assert_eq!(project_id(&implicit, &ctx).unwrap(), "p-open");
        assert!(project_id(&implicit, &ToolContext::default()).is_err());
    }
}
