//! Project Catalog Tools
//!
//! Listing, inspecting and creating projects.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;

use agent_core::{
    Result as CoreResult, Tool, ToolCall, ToolContext, ToolOutput, ToolSchema,
    tool::ParameterSchema,
};

use super::project_id;
use crate::model::Project;
use crate::store::{ProjectFilter, ProjectStore};

const DEFAULT_LIST_LIMIT: usize = 20;

/// Tool for listing projects
pub struct ListProjectsTool {
    projects: Arc<dyn ProjectStore>,
}

impl ListProjectsTool {
    pub fn new(projects: Arc<dyn ProjectStore>) -> Self {
        Self { projects }
    }
}

#[async_trait]
impl Tool for ListProjectsTool {
    fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: "list_projects".into(),
            description: "List card projects, most recently updated first.".into(),
            parameters: vec![
                ParameterSchema::string("query", "Only projects whose name contains this text"),
                ParameterSchema::integer("limit", "Maximum number of projects (default 20)"),
            ],
        }
    }

    async fn execute(&self, call: &ToolCall, _ctx: &ToolContext) -> CoreResult<ToolOutput> {
        let limit = call
            .arguments
            .get("limit")
            .and_then(serde_json::Value::as_u64)
            .and_then(|n| usize::try_from(n).ok())
            .unwrap_or(DEFAULT_LIST_LIMIT);
        let filter = ProjectFilter {
            name_contains: call.str_arg("query").map(str::to_string),
            limit: Some(limit),
        };

        let projects = self.projects.list_projects(&filter).await?;
        let summaries: Vec<_> = projects.iter().map(Project::summary).collect();
        Ok(ToolOutput::json(json!({
            "count": summaries.len(),
            "projects": summaries,
        })))
    }
}

/// Tool for reading one project with all its cards
pub struct GetProjectTool {
    projects: Arc<dyn ProjectStore>,
}

impl GetProjectTool {
    pub fn new(projects: Arc<dyn ProjectStore>) -> Self {
        Self { projects }
    }
}

#[async_trait]
impl Tool for GetProjectTool {
    fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: "get_project".into(),
            description: "Get a project's details and cards. Defaults to the project the user has open.".into(),
            parameters: vec![ParameterSchema::string("projectId", "Project id")],
        }
    }

    async fn execute(&self, call: &ToolCall, ctx: &ToolContext) -> CoreResult<ToolOutput> {
        let id = project_id(call, ctx)?;
        let project = self.projects.require_project(id).await?;
        Ok(ToolOutput::json(serde_json::to_value(&project)?))
    }
}

/// Tool for creating an empty project
pub struct CreateProjectTool {
    projects: Arc<dyn ProjectStore>,
}

impl CreateProjectTool {
    pub fn new(projects: Arc<dyn ProjectStore>) -> Self {
        Self { projects }
    }
}

#[async_trait]
impl Tool for CreateProjectTool {
    fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: "create_project".into(),
            description: "Create a new card project.".into(),
            parameters: vec![
                ParameterSchema::string("name", "Project name").required(),
                ParameterSchema::string("description", "What the project is about"),
                ParameterSchema::string("style", "Visual style applied to every card image"),
            ],
        }
    }

    async fn execute(&self, call: &ToolCall, _ctx: &ToolContext) -> CoreResult<ToolOutput> {
        let name = call.required_str("name")?.trim();
        let mut project = Project::new(name, call.str_arg("description").unwrap_or_default());
        project.style = call
            .str_arg("style")
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string);

        self.projects.save_project(&project).await?;
        tracing::info!(project_id = %project.id, "Project created");

        Ok(ToolOutput::json(json!({
            "projectId": project.id,
            "name": project.name,
        })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::svckit::fixtures::{ctx_in, studio};
    use agent_core::ToolRegistry;

    #[tokio::test]
    async fn test_list_and_get() {
        let (store, project) = studio();
        let list = ListProjectsTool::new(store.clone());
        let output = list
            .execute(&ToolCall::new("list_projects", json!({"query": "best"}), None), &ToolContext::default())
            .await
            .unwrap();
        assert_eq!(output.response["count"], 1);
        assert_eq!(output.response["projects"][0]["cardCount"], 2);

        let get = GetProjectTool::new(store);
        let output = get
            .execute(&ToolCall::new("get_project", json!({}), None), &ctx_in(&project))
            .await
            .unwrap();
        assert_eq!(output.response["name"], "Bestiary");
        assert_eq!(output.response["cards"].as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_create_project_persists() {
        let (store, _) = studio();
        let mut registry = ToolRegistry::new();
        registry.register(CreateProjectTool::new(store.clone()));

        let call = ToolCall::new("create_project", json!({"name": " Tarot ", "style": "art nouveau"}), None);
        let output = registry.dispatch(&call, &ToolContext::default()).await;
        let id = output.response["projectId"].as_str().unwrap();

        let saved = store.require_project(id).await.unwrap();
        assert_eq!(saved.name, "Tarot");
        assert_eq!(saved.style.as_deref(), Some("art nouveau"));

        let missing = registry
            .dispatch(&ToolCall::new("create_project", json!({}), None), &ToolContext::default())
            .await;
        assert!(missing.is_error());
    }
}
