//! Tool System
//!
//! Declarative tool catalog exposed to the model as callable functions, and
//! the dispatcher that runs a named call against domain collaborators.
//! Tools run sequentially in call order; the dispatcher never fails the
//! loop, it turns every failure into an `{"error": ...}` payload.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::attachment::ResolvedAttachment;
use crate::error::{AgentError, Result};
use crate::message::BinaryData;

/// Tool call request from the model
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCall {
    /// Tool identifier
    pub name: String,

    /// Arguments as key-value pairs
    pub arguments: Map<String, Value>,

    /// Opaque upstream token to echo on the matching result
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub continuation_token: Option<String>,
}

impl ToolCall {
    /// Build a call from raw model arguments; non-object args become empty
    pub fn new(name: impl Into<String>, args: Value, continuation_token: Option<String>) -> Self {
        let arguments = match args {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        Self {
            name: name.into(),
            arguments,
            continuation_token,
        }
    }

    pub fn str_arg(&self, key: &str) -> Option<&str> {
        self.arguments.get(key).and_then(Value::as_str)
    }

    pub fn required_str(&self, key: &str) -> Result<&str> {
        self.str_arg(key)
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| AgentError::ToolValidation(format!("Missing required parameter: {key}")))
    }

    /// Integer indices from an array argument; non-integers are ignored
    pub fn index_list(&self, key: &str) -> Vec<usize> {
        self.arguments
            .get(key)
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(Value::as_u64)
                    .filter_map(|i| usize::try_from(i).ok())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn args_value(&self) -> Value {
        Value::Object(self.arguments.clone())
    }
}

/// Effect the caller must hand to an external executor
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeferredAction {
    /// Action discriminator, e.g. `generate_image`
    pub kind: String,
    pub payload: Value,
}

/// Result of a tool execution.
///
/// `response` is what the model sees. `binary` is relocated by the
/// orchestrator into a follow-up user turn. `deferred` is forwarded to the
/// caller on the `tool_result` event.
#[derive(Clone, Debug, Default)]
pub struct ToolOutput {
    pub response: Value,
    pub binary: Option<BinaryData>,
    pub deferred: Option<DeferredAction>,
}

impl ToolOutput {
    pub fn json(response: Value) -> Self {
        Self {
            response,
            ..Default::default()
        }
    }

    pub fn error(message: impl std::fmt::Display) -> Self {
        Self::json(json!({ "error": message.to_string() }))
    }

    pub fn with_binary(mut self, binary: BinaryData) -> Self {
        self.binary = Some(binary);
        self
    }

    pub fn with_deferred(mut self, action: DeferredAction) -> Self {
        self.deferred = Some(action);
        self
    }

    pub fn is_error(&self) -> bool {
        self.response.get("error").is_some()
    }
}

/// Per-call execution context
#[derive(Clone, Debug, Default)]
pub struct ToolContext {
    pub conversation_id: String,

    /// Entity the user currently has open, if any
    pub active_entity_id: Option<String>,

    /// Attachments of the caller's new user turn, by inline index
    pub attachments: Arc<Vec<ResolvedAttachment>>,
}

impl ToolContext {
    pub fn attachment(&self, inline_index: usize) -> Option<&ResolvedAttachment> {
        self.attachments
            .iter()
            .find(|a| a.entry.inline_index == inline_index)
    }
}

/// Parameter definition for tool schema
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ParameterSchema {
    /// Parameter name
    pub name: String,

    /// JSON Schema type (string, integer, number, boolean, object, array)
    #[serde(rename = "type")]
    pub param_type: String,

    /// Human-readable description
    pub description: String,

    /// Whether this parameter is required
    #[serde(default)]
    pub required: bool,

    /// Enum of allowed values
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enum_values: Option<Vec<Value>>,

    /// Element type for arrays
    #[serde(skip_serializing_if = "Option::is_none")]
    pub items: Option<String>,
}

impl ParameterSchema {
    fn typed(name: &str, param_type: &str, description: &str) -> Self {
        Self {
            name: name.into(),
            param_type: param_type.into(),
            description: description.into(),
            required: false,
            enum_values: None,
            items: None,
        }
    }

    pub fn string(name: &str, description: &str) -> Self {
        Self::typed(name, "string", description)
    }

    pub fn integer(name: &str, description: &str) -> Self {
        Self::typed(name, "integer", description)
    }

    pub fn array(name: &str, items: &str, description: &str) -> Self {
        Self {
            items: Some(items.into()),
            ..Self::typed(name, "array", description)
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn one_of(mut self, values: &[&str]) -> Self {
        self.enum_values = Some(values.iter().map(|v| json!(v)).collect());
        self
    }

    fn json_schema(&self) -> Value {
        let mut schema = Map::new();
        schema.insert("type".into(), json!(self.param_type));
        schema.insert("description".into(), json!(self.description));
        if let Some(values) = &self.enum_values {
            schema.insert("enum".into(), Value::Array(values.clone()));
        }
        if let Some(items) = &self.items {
            schema.insert("items".into(), json!({ "type": items }));
        }
        Value::Object(schema)
    }
}

/// Tool definition schema (for model function calling)
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ToolSchema {
    /// Unique tool identifier
    pub name: String,

    /// Human-readable description (shown to the model)
    pub description: String,

    /// Parameter definitions
    pub parameters: Vec<ParameterSchema>,
}

impl ToolSchema {
    /// Parameters as a JSON Schema object
    pub fn parameters_json_schema(&self) -> Value {
        let properties: Map<String, Value> = self
            .parameters
            .iter()
            .map(|p| (p.name.clone(), p.json_schema()))
            .collect();
        let required: Vec<&str> = self
            .parameters
            .iter()
            .filter(|p| p.required)
            .map(|p| p.name.as_str())
            .collect();

        json!({
            "type": "object",
            "properties": properties,
            "required": required,
        })
    }
}

/// Tool trait - implement to add new capabilities
#[async_trait]
pub trait Tool: Send + Sync {
    /// Get the tool's schema for model function calling
    fn schema(&self) -> ToolSchema;

    /// Execute the tool with given arguments
    async fn execute(&self, call: &ToolCall, ctx: &ToolContext) -> Result<ToolOutput>;

    /// Validate arguments before execution
    fn validate(&self, call: &ToolCall) -> Result<()> {
        let schema = self.schema();

        for param in &schema.parameters {
            match call.arguments.get(&param.name) {
                None | Some(Value::Null) if param.required => {
                    return Err(AgentError::ToolValidation(format!(
                        "Missing required parameter: {}",
                        param.name
                    )));
                }
                Some(value) if !matches_type(value, &param.param_type) && !value.is_null() => {
                    return Err(AgentError::ToolValidation(format!(
                        "Parameter '{}' must be of type {}",
                        param.name, param.param_type
                    )));
                }
                _ => {}
            }
        }

        Ok(())
    }
}

fn matches_type(value: &Value, param_type: &str) -> bool {
    match param_type {
        "string" => value.is_string(),
        "integer" => value.is_i64() || value.is_u64(),
        "number" => value.is_number(),
        "boolean" => value.is_boolean(),
        "array" => value.is_array(),
        "object" => value.is_object(),
        _ => true,
    }
}

/// Registry for available tools
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    /// Register a new tool
    pub fn register<T: Tool + 'static>(&mut self, tool: T) {
        self.register_boxed(Arc::new(tool));
    }

    /// Register a shared tool
    pub fn register_boxed(&mut self, tool: Arc<dyn Tool>) {
        let schema = tool.schema();
        self.tools.insert(schema.name, tool);
    }

    /// Get a tool by name
    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    /// Execute a tool call, propagating failures
    pub async fn execute(&self, call: &ToolCall, ctx: &ToolContext) -> Result<ToolOutput> {
        let tool = self
            .get(&call.name)
            .ok_or_else(|| AgentError::ToolNotFound(call.name.clone()))?;

        tool.validate(call)?;
        tool.execute(call, ctx).await
    }

    /// Execute a tool call; failures become `{"error": message}`
    pub async fn dispatch(&self, call: &ToolCall, ctx: &ToolContext) -> ToolOutput {
        match self.execute(call, ctx).await {
            Ok(output) => {
                debug!(tool = %call.name, "Tool executed");
                output
            }
            Err(e) => {
                warn!(tool = %call.name, error = %e, "Tool failed");
                ToolOutput::error(e)
            }
        }
    }

    /// All tool schemas, sorted by name
    pub fn schemas(&self) -> Vec<ToolSchema> {
        let mut schemas: Vec<ToolSchema> = self.tools.values().map(|t| t.schema()).collect();
        schemas.sort_by(|a, b| a.name.cmp(&b.name));
        schemas
    }

    /// Get tool names
    pub fn names(&self) -> Vec<&str> {
        self.tools.keys().map(String::as_str).collect()
    }

    /// Number of registered tools
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        fn schema(&self) -> ToolSchema {
            ToolSchema {
                name: "echo".into(),
                description: "Echo a value".into(),
                parameters: vec![
                    ParameterSchema::string("value", "Value to echo").required(),
                    ParameterSchema::array("indices", "integer", "Inline indices"),
                ],
            }
        }

        async fn execute(&self, call: &ToolCall, ctx: &ToolContext) -> Result<ToolOutput> {
            Ok(ToolOutput::json(json!({
                "value": call.required_str("value")?,
                "conversation": ctx.conversation_id,
            })))
        }
    }

    struct FailingTool;

    #[async_trait]
    impl Tool for FailingTool {
        fn schema(&self) -> ToolSchema {
            ToolSchema {
                name: "fail".into(),
                description: "Always fails".into(),
                parameters: vec![],
            }
        }

        async fn execute(&self, _call: &ToolCall, _ctx: &ToolContext) -> Result<ToolOutput> {
            Err(AgentError::ToolExecution("disk on fire".into()))
        }
    }

    fn registry() -> ToolRegistry {
        let mut registry = ToolRegistry::new();
        registry.register(EchoTool);
        registry.register(FailingTool);
        registry
    }

    #[test]
    fn test_tool_registry() {
        let registry = registry();
        assert_eq!(registry.len(), 2);
        assert!(registry.get("echo").is_some());
        assert!(registry.get("unknown").is_none());

        let names: Vec<_> = registry.schemas().into_iter().map(|s| s.name).collect();
        assert_eq!(names, vec!["echo", "fail"]);
    }

    #[test]
    fn test_parameters_json_schema() {
        let schema = EchoTool.schema().parameters_json_schema();
        assert_eq!(schema["type"], "object");
        assert_eq!(schema["properties"]["value"]["type"], "string");
        assert_eq!(schema["properties"]["indices"]["items"]["type"], "integer");
        assert_eq!(schema["required"], json!(["value"]));
    }

    #[tokio::test]
    async fn test_dispatch_success() {
        let ctx = ToolContext {
            conversation_id: "c1".into(),
            ..Default::default()
        };
        let call = ToolCall::new("echo", json!({"value": "hi"}), None);
        let output = registry().dispatch(&call, &ctx).await;
        assert_eq!(output.response, json!({"value": "hi", "conversation": "c1"}));
        assert!(!output.is_error());
    }

    #[tokio::test]
    async fn test_dispatch_converts_failures_to_error_payloads() {
        let registry = registry();
        let ctx = ToolContext::default();

        let failed = registry.dispatch(&ToolCall::new("fail", json!({}), None), &ctx).await;
        assert!(failed.is_error());
        assert!(failed.response["error"].as_str().unwrap().contains("disk on fire"));

        let missing = registry.dispatch(&ToolCall::new("nope", json!({}), None), &ctx).await;
        assert!(missing.response["error"].as_str().unwrap().contains("nope"));

        let invalid = registry
            .dispatch(&ToolCall::new("echo", json!({"value": 3}), None), &ctx)
            .await;
        assert!(invalid.is_error());
    }

    #[test]
    fn test_index_list_ignores_non_integers() {
        let call = ToolCall::new("x", json!({"referenceIndices": [0, "a", 2, -1]}), None);
        assert_eq!(call.index_list("referenceIndices"), vec![0, 2]);
    }
}
