//! HTTP/SSE Handlers

use std::convert::Infallible;

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::{StatusCode, header},
    response::{
        IntoResponse, Response,
        sse::{Event, KeepAlive, Sse},
    },
    routing::{get, post},
};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;
use tokio_stream::wrappers::ReceiverStream;

use agent_core::{
    AgentError, AgentEvent, AttachmentRequest, BinaryData, BlobCache, ConversationId,
    ConversationStore, ConversationSummary, HistoricalReference, LlmProvider, ReasoningMode,
    TurnRequest, conversation::DeletionReport, delete_with_blobs,
};
use card_studio::{JobRecord, JobStatus, JobTracker, JobUpdate, StudioError, jobs};

use crate::state::{AppState, TurnGuard};

const DEFAULT_LIST_LIMIT: usize = 50;
const RECENT_JOBS: usize = 20;

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub provider: String,
    pub provider_connected: bool,
    pub tools: usize,
}

/// An uploaded image, base64-encoded
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadedImage {
    pub mime_type: String,
    pub data: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    /// Omitted for a new conversation
    #[serde(default)]
    pub conversation_id: Option<String>,
    #[serde(default)]
    pub group_id: Option<String>,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub active_entity_id: Option<String>,
    #[serde(default)]
    pub uploaded_images: Vec<UploadedImage>,
    #[serde(default)]
    pub historical_references: Vec<HistoricalReference>,
    #[serde(default)]
    pub generated_feedback_files: Vec<String>,
    #[serde(default)]
    pub reasoning_mode: ReasoningMode,
}

impl ChatRequest {
    fn is_empty(&self) -> bool {
        self.message.trim().is_empty()
            && self.uploaded_images.is_empty()
            && self.historical_references.is_empty()
            && self.generated_feedback_files.is_empty()
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListConversationsQuery {
    #[serde(default)]
    pub group_id: Option<String>,
    #[serde(default)]
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error(transparent)]
    Agent(#[from] AgentError),

    #[error(transparent)]
    Studio(#[from] StudioError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, error) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, "CONFLICT", msg),
            ApiError::Studio(
                e @ (StudioError::JobNotFound(_)
                | StudioError::ProjectNotFound(_)
                | StudioError::CardNotFound(_)),
            ) => (StatusCode::NOT_FOUND, "NOT_FOUND", e.to_string()),
            ApiError::Studio(e @ StudioError::InvalidInput(_)) => {
                (StatusCode::BAD_REQUEST, "BAD_REQUEST", e.to_string())
            }
            ApiError::Studio(e) => {
                tracing::error!(error = %e, "Studio error");
                (StatusCode::INTERNAL_SERVER_ERROR, "STUDIO_ERROR", "Internal error".into())
            }
            ApiError::Agent(e) => {
                tracing::error!(error = %e, "Agent error");
                (StatusCode::INTERNAL_SERVER_ERROR, "AGENT_ERROR", e.user_message())
            }
        };

        (
            status,
            Json(ErrorResponse {
                error,
                code: code.into(),
            }),
        )
            .into_response()
    }
}

// ============================================================================
// Router
// ============================================================================

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/api/chat/stream", post(chat_stream))
        .route("/api/conversations", get(list_conversations))
        .route(
            "/api/conversations/{id}",
            get(get_conversation).delete(delete_conversation),
        )
        .route("/api/conversations/{id}/cancel", post(cancel_turn))
        .route("/api/blobs/{id}", get(get_blob))
        .route("/api/jobs", get(list_jobs))
        .route("/api/jobs/{id}", get(get_job))
        .route("/api/jobs/{id}/progress", post(report_job_progress))
        .with_state(state)
}

// ============================================================================
// Handlers
// ============================================================================

/// Health check endpoint
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let provider_connected = state.provider.health_check().await.unwrap_or(false);

    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
        provider: state.provider.info().name,
        provider_connected,
        tools: state.orchestrator.tools().len(),
    })
}

/// Run one user turn, streaming its events as SSE.
///
/// Each SSE event is named after the event's `type`. A `generate_image`
/// action on a `tool_result` starts a tracked job whose id is added to the
/// action payload.
pub async fn chat_stream(
    State(state): State<AppState>,
    Json(payload): Json<ChatRequest>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    if payload.is_empty() {
        return Err(ApiError::BadRequest("Message or attachments required".into()));
    }

    let uploads = payload
        .uploaded_images
        .iter()
        .enumerate()
        .map(|(i, image)| {
            BASE64
                .decode(image.data.as_bytes())
                .map(|data| BinaryData::new(image.mime_type.clone(), data))
                .map_err(|e| ApiError::BadRequest(format!("uploadedImages[{i}] is not valid base64: {e}")))
        })
        .collect::<Result<Vec<_>, _>>()?;

    let conversation_id = match payload.conversation_id.filter(|id| !id.trim().is_empty()) {
        Some(id) => parse_conversation_id(id)?,
        None => ConversationId::new(),
    };

    let cancel = state.active.begin(conversation_id.as_str()).ok_or_else(|| {
        ApiError::Conflict(format!("Conversation {conversation_id} already has a turn running"))
    })?;
    let guard = TurnGuard::new(state.active.clone(), conversation_id.as_str());

    let request = TurnRequest {
        conversation_id: conversation_id.clone(),
        group_id: payload.group_id,
        message: payload.message,
        active_entity_id: payload.active_entity_id,
        attachments: AttachmentRequest {
            uploads,
            generated: payload.generated_feedback_files,
            references: payload.historical_references,
        },
        reasoning: payload.reasoning_mode,
    };

    tracing::info!(conversation_id = %conversation_id, "Chat turn started");
    let events = state.orchestrator.run_stream_holding(request, cancel, guard);
    let jobs = state.jobs.clone();

    let stream = ReceiverStream::new(events).then(move |event| {
        let jobs = jobs.clone();
        async move {
            let event = start_deferred_job(jobs.as_ref(), event).await;
            Ok::<_, Infallible>(sse_event(&event))
        }
    });

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

fn parse_conversation_id(raw: String) -> Result<ConversationId, ApiError> {
    ConversationId::parse(raw).map_err(|e| ApiError::BadRequest(e.to_string()))
}

fn sse_event(event: &AgentEvent) -> Event {
    let data = serde_json::to_string(event)
        .unwrap_or_else(|e| json!({"type": "error", "message": e.to_string()}).to_string());
    Event::default().event(event.event_type()).data(data)
}

/// Start the job behind a deferred `generate_image` action
async fn start_deferred_job(tracker: &dyn JobTracker, mut event: AgentEvent) -> AgentEvent {
    if let AgentEvent::ToolResult {
        deferred: Some(action),
        ..
    } = &mut event
    {
        match jobs::start_from_action(tracker, action).await {
            Ok(Some(job)) => {
                if let Some(payload) = action.payload.as_object_mut() {
                    payload.insert("jobId".into(), json!(job.id));
                }
            }
            Ok(None) => {}
            Err(e) => tracing::warn!(kind = %action.kind, error = %e, "Failed to start deferred job"),
        }
    }
    event
}

/// Cancel the running turn of a conversation
pub async fn cancel_turn(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let id = parse_conversation_id(id)?;
    let cancelled = state.active.cancel(id.as_str());
    tracing::info!(conversation_id = %id, cancelled, "Cancel requested");
    Ok(Json(json!({ "cancelled": cancelled })))
}

pub async fn list_conversations(
    State(state): State<AppState>,
    Query(query): Query<ListConversationsQuery>,
) -> Result<Json<Vec<ConversationSummary>>, ApiError> {
    let limit = query.limit.unwrap_or(DEFAULT_LIST_LIMIT);
    let summaries = state
        .orchestrator
        .store()
        .list(query.group_id.as_deref(), limit)
        .await?;
    Ok(Json(summaries))
}

pub async fn get_conversation(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    let id = parse_conversation_id(id)?;
    let conversation = state
        .orchestrator
        .store()
        .load(&id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Conversation {id} not found")))?;
    Ok(Json(conversation).into_response())
}

/// Delete a conversation and the uploads only it referenced
pub async fn delete_conversation(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<DeletionReport>, ApiError> {
    let id = parse_conversation_id(id)?;
    if state.active.is_running(id.as_str()) {
        return Err(ApiError::Conflict(format!("Conversation {id} has a turn running")));
    }

    let report = delete_with_blobs(state.orchestrator.store().as_ref(), state.blobs.as_ref(), &id).await?;

    if !report.deleted {
        return Err(ApiError::NotFound(format!("Conversation {id} not found")));
    }
    Ok(Json(report))
}

/// Re-serve an uploaded image
pub async fn get_blob(State(state): State<AppState>, Path(id): Path<String>) -> Result<Response, ApiError> {
    let blob = state
        .blobs
        .get(&id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Blob {id} not found")))?;

    Ok(([(header::CONTENT_TYPE, blob.mime_type)], blob.data).into_response())
}

pub async fn list_jobs(State(state): State<AppState>) -> Result<Json<Vec<JobRecord>>, ApiError> {
    Ok(Json(state.jobs.recent(RECENT_JOBS).await?))
}

pub async fn get_job(State(state): State<AppState>, Path(id): Path<String>) -> Result<Json<JobRecord>, ApiError> {
    let job = state
        .jobs
        .get(&id)
        .await?
        .ok_or(StudioError::JobNotFound(id))?;
    Ok(Json(job))
}

/// Progress report from the image executor
pub async fn report_job_progress(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(update): Json<JobUpdate>,
) -> Result<Json<JobRecord>, ApiError> {
    let job = state.jobs.report(&id, update).await?;

    if job.status == JobStatus::Completed {
        if let Err(e) = jobs::apply_results(state.projects.as_ref(), &job).await {
            tracing::warn!(job_id = %job.id, error = %e, "Failed to attach job results");
        }
    }
    Ok(Json(job))
}
