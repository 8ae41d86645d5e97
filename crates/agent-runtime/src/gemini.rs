//! Gemini LLM Provider
//!
//! Implementation of `LlmProvider` over the Gemini REST API. Turns are sent
//! as `contents`; tool turns go out as `user` content carrying
//! `functionResponse` parts. A `thoughtSignature` on a function call is the
//! continuation token and is echoed on the matching function response.

use std::time::Duration;

use agent_core::{
    error::{AgentError, Result},
    message::{Part, Role, Turn},
    provider::{
        Completion, FragmentStream, LlmProvider, ModelFragment, ModelInfo, ModelRequest,
        ProviderInfo,
    },
    tool::ToolSchema,
};
use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose::STANDARD};
use futures::StreamExt;
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, warn};

use crate::types::{
    ErrorBody, FunctionCall, FunctionDeclaration, FunctionResponse, GeminiContent, GeminiPart,
    GeminiTool, GenerateContentRequest, GenerateContentResponse, GenerationConfig, InlineData,
    SystemInstruction, ThinkingConfig,
};

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
const DEFAULT_MODEL: &str = "gemini-2.5-flash";

/// Finish reasons that mean the response was withheld
const BLOCKED_FINISH_REASONS: &[&str] = &["SAFETY", "PROHIBITED_CONTENT", "BLOCKLIST", "SPII", "RECITATION"];

/// Gemini provider configuration
#[derive(Clone, Debug)]
pub struct GeminiConfig {
    /// API key sent as `x-goog-api-key`
    pub api_key: String,

    /// API root, without trailing slash
    pub base_url: String,

    /// Model used when a request does not name one
    pub model: String,

    /// Connection timeout in seconds
    pub timeout_secs: u64,
}

impl GeminiConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: DEFAULT_BASE_URL.into(),
            model: DEFAULT_MODEL.into(),
            timeout_secs: 30,
        }
    }

    pub fn from_env() -> Result<Self> {
        let api_key = std::env::var("GEMINI_API_KEY")
            .map_err(|_| AgentError::Config("GEMINI_API_KEY is not set".into()))?;
        let base_url = std::env::var("GEMINI_BASE_URL")
            .map(|url| url.trim_end_matches('/').to_string())
            .unwrap_or_else(|_| DEFAULT_BASE_URL.into());
        let model = std::env::var("GEMINI_MODEL").unwrap_or_else(|_| DEFAULT_MODEL.into());
        let timeout_secs = std::env::var("GEMINI_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(30);

        Ok(Self {
            api_key,
            base_url,
            model,
            timeout_secs,
        })
    }
}

/// Gemini LLM provider
pub struct GeminiProvider {
    client: reqwest::Client,
    config: GeminiConfig,
}

impl GeminiProvider {
    /// Create from configuration
    pub fn new(config: GeminiConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| AgentError::Config(format!("HTTP client: {e}")))?;
        Ok(Self { client, config })
    }

    /// Create from environment variables
    pub fn from_env() -> Result<Self> {
        Self::new(GeminiConfig::from_env()?)
    }

    pub fn config(&self) -> &GeminiConfig {
        &self.config
    }

    fn endpoint(&self, model: &str, method: &str) -> String {
        let model = if model.is_empty() { &self.config.model } else { model };
        format!("{}/models/{}:{}", self.config.base_url, model, method)
    }

    async fn post(&self, url: &str, body: &GenerateContentRequest) -> Result<reqwest::Response> {
        let response = self
            .client
            .post(url)
            .header("x-goog-api-key", &self.config.api_key)
            .json(body)
            .send()
            .await
            .map_err(|e| AgentError::ProviderUnavailable(e.to_string()))?;

        let status = response.status().as_u16();
        if status != 200 {
            let body = response.text().await.unwrap_or_default();
            warn!(status, body = %body, "Gemini request failed");
            return Err(map_status(status, &body));
        }
        Ok(response)
    }
}

#[async_trait]
impl LlmProvider for GeminiProvider {
    fn info(&self) -> ProviderInfo {
        ProviderInfo {
            name: "Gemini".into(),
            models: vec![ModelInfo {
                id: self.config.model.clone(),
                supports_vision: true,
            }],
            supports_tools: true,
        }
    }

    async fn health_check(&self) -> Result<bool> {
        let url = format!("{}/models/{}", self.config.base_url, self.config.model);
        match self
            .client
            .get(&url)
            .header("x-goog-api-key", &self.config.api_key)
            .send()
            .await
        {
            Ok(response) => Ok(response.status().is_success()),
            Err(e) => {
                warn!("Gemini health check failed: {}", e);
                Ok(false)
            }
        }
    }

    async fn complete(&self, request: ModelRequest) -> Result<Completion> {
        let url = self.endpoint(&request.options.model, "generateContent");
        let body = build_request(&request);

        let response: GenerateContentResponse = self
            .post(&url, &body)
            .await?
            .json()
            .await
            .map_err(|e| AgentError::Provider(format!("Invalid response: {e}")))?;

        let mut content = String::new();
        for fragment in response_fragments(response) {
            if let ModelFragment::Text(text) = fragment? {
                content.push_str(&text);
            }
        }

        Ok(Completion {
            content,
            model: request.options.model,
        })
    }

    async fn stream(&self, request: ModelRequest) -> Result<FragmentStream> {
        let url = format!("{}?alt=sse", self.endpoint(&request.options.model, "streamGenerateContent"));
        let body = build_request(&request);

        debug!(
            model = %request.options.model,
            turns = body.contents.len(),
            tools = request.tools.len(),
            "Sending streaming request"
        );
        let response = self.post(&url, &body).await?;

        let (tx, rx) = mpsc::channel(64);

        // Read the SSE byte stream and forward parsed fragments
        tokio::spawn(async move {
            let mut bytes = response.bytes_stream();
            let mut parser = SseParser::default();

            while let Some(chunk) = bytes.next().await {
                let chunk = match chunk {
                    Ok(chunk) => chunk,
                    Err(e) => {
                        let _ = tx
                            .send(Err(AgentError::Provider(format!("Stream interrupted: {e}"))))
                            .await;
                        return;
                    }
                };

                for data in parser.push(&chunk) {
                    if !forward(&tx, &data).await {
                        return;
                    }
                }
            }

            if let Some(data) = parser.finish() {
                forward(&tx, &data).await;
            }
        });

        Ok(Box::pin(ReceiverStream::new(rx)))
    }
}

/// Send the fragments of one SSE payload; false once the stream should stop
async fn forward(tx: &mpsc::Sender<Result<ModelFragment>>, data: &str) -> bool {
    let fragments = match serde_json::from_str::<GenerateContentResponse>(data) {
        Ok(chunk) => response_fragments(chunk),
        Err(e) => vec![Err(AgentError::Provider(format!("Malformed stream chunk: {e}")))],
    };

    for fragment in fragments {
        let is_err = fragment.is_err();
        if tx.send(fragment).await.is_err() || is_err {
            return false;
        }
    }
    true
}

/// Classify the parts of one response (or streamed chunk)
pub fn response_fragments(response: GenerateContentResponse) -> Vec<Result<ModelFragment>> {
    if let Some(error) = response.error {
        return vec![Err(map_status(
            u16::try_from(error.code).unwrap_or(500),
            &error.message,
        ))];
    }
    if let Some(reason) = response.prompt_feedback.and_then(|f| f.block_reason) {
        return vec![Err(AgentError::SafetyBlocked(reason))];
    }

    let Some(candidate) = response.candidates.into_iter().next() else {
        return Vec::new();
    };

    let mut fragments: Vec<Result<ModelFragment>> = candidate
        .content
        .map(|c| c.parts)
        .unwrap_or_default()
        .into_iter()
        .filter_map(classify_part)
        .map(Ok)
        .collect();

    if let Some(reason) = candidate.finish_reason {
        if BLOCKED_FINISH_REASONS.contains(&reason.as_str()) {
            fragments.push(Err(AgentError::SafetyBlocked(reason)));
        }
    }
    fragments
}

fn classify_part(part: GeminiPart) -> Option<ModelFragment> {
    if let Some(call) = part.function_call {
        let args = if call.args.is_null() { json!({}) } else { call.args };
        return Some(ModelFragment::ToolCall {
            name: call.name,
            args,
            continuation_token: part.thought_signature,
        });
    }

    let text = part.text.filter(|t| !t.is_empty())?;
    if part.thought == Some(true) {
        Some(ModelFragment::Thought(text))
    } else {
        Some(ModelFragment::Text(text))
    }
}

/// Map an HTTP status (or in-stream error code) to an agent error
pub fn map_status(status: u16, body: &str) -> AgentError {
    let message = serde_json::from_str::<ErrorBody>(body)
        .map(|b| b.error.message)
        .unwrap_or_else(|_| body.to_string());

    match status {
        429 => AgentError::RateLimited(message),
        401 | 403 => AgentError::Auth(message),
        500..=599 => AgentError::ProviderUnavailable(format!("HTTP {status}: {message}")),
        _ => AgentError::Provider(format!("HTTP {status}: {message}")),
    }
}

/// Build the request body for one round
pub fn build_request(request: &ModelRequest) -> GenerateContentRequest {
    let tools = if request.tools.is_empty() {
        Vec::new()
    } else {
        vec![GeminiTool {
            function_declarations: request.tools.iter().map(function_declaration).collect(),
        }]
    };

    let reasoning = request.options.reasoning;

    GenerateContentRequest {
        contents: request.contents.iter().map(to_content).collect(),
        system_instruction: request.system_instruction.as_ref().map(|text| SystemInstruction {
            parts: vec![GeminiPart {
                text: Some(text.clone()),
                ..Default::default()
            }],
        }),
        tools,
        generation_config: Some(GenerationConfig {
            max_output_tokens: Some(request.options.max_tokens),
            temperature: Some(request.options.temperature),
            top_p: Some(request.options.top_p),
            thinking_config: Some(ThinkingConfig {
                thinking_budget: reasoning.thinking_budget(),
                include_thoughts: reasoning.include_thoughts().then_some(true),
            }),
        }),
    }
}

fn function_declaration(schema: &ToolSchema) -> FunctionDeclaration {
    let parameters = (!schema.parameters.is_empty()).then(|| {
        let mut params = schema.parameters_json_schema();
        if params["required"].as_array().is_some_and(Vec::is_empty) {
            if let Some(obj) = params.as_object_mut() {
                obj.remove("required");
            }
        }
        params
    });

    FunctionDeclaration {
        name: schema.name.clone(),
        description: schema.description.clone(),
        parameters,
    }
}

/// Convert a turn; tool turns are sent with the `user` role
pub fn to_content(turn: &Turn) -> GeminiContent {
    let role = match turn.role {
        Role::User | Role::Tool => "user",
        Role::Model => "model",
    };

    GeminiContent {
        role: Some(role.into()),
        parts: turn.parts.iter().map(to_part).collect(),
    }
}

fn to_part(part: &Part) -> GeminiPart {
    match part {
        Part::Text { text } => GeminiPart {
            text: Some(text.clone()),
            ..Default::default()
        },
        Part::Binary { mime_type, data } => GeminiPart {
            inline_data: Some(InlineData {
                mime_type: mime_type.clone(),
                data: STANDARD.encode(data),
            }),
            ..Default::default()
        },
        Part::ToolCall {
            name,
            args,
            continuation_token,
        } => GeminiPart {
            function_call: Some(FunctionCall {
                name: name.clone(),
                args: args.clone(),
            }),
            thought_signature: continuation_token.clone(),
            ..Default::default()
        },
        Part::ToolResult {
            name,
            response,
            continuation_token,
        } => GeminiPart {
            function_response: Some(FunctionResponse {
                name: name.clone(),
                response: as_response_object(response),
            }),
            thought_signature: continuation_token.clone(),
            ..Default::default()
        },
    }
}

/// Function responses must be JSON objects
fn as_response_object(value: &Value) -> Value {
    if value.is_object() {
        value.clone()
    } else {
        json!({ "result": value })
    }
}

/// Incremental `text/event-stream` parser.
///
/// Buffers raw bytes so multi-byte characters split across network chunks
/// decode correctly; yields the joined `data:` payload of each event.
#[derive(Default)]
pub struct SseParser {
    buffer: Vec<u8>,
    data: Vec<String>,
}

impl SseParser {
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(bytes);
        let mut events = Vec::new();

        while let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line);
            let line = line.trim_end_matches(['\n', '\r']);

            if line.is_empty() {
                if !self.data.is_empty() {
                    events.push(self.data.join("\n"));
                    self.data.clear();
                }
            } else if let Some(data) = line.strip_prefix("data:") {
                self.data.push(data.strip_prefix(' ').unwrap_or(data).to_string());
            }
            // Comments (`:`) and other fields are ignored
        }

        events
    }

    /// Flush a final event not followed by a blank line
    pub fn finish(&mut self) -> Option<String> {
        if !self.buffer.is_empty() {
            let rest = std::mem::take(&mut self.buffer);
            let line = String::from_utf8_lossy(&rest);
            if let Some(data) = line.trim_end_matches('\r').strip_prefix("data:") {
                self.data.push(data.trim_start().to_string());
            }
        }
        if self.data.is_empty() {
            None
        } else {
            Some(std::mem::take(&mut self.data).join("\n"))
        }
    }
}
