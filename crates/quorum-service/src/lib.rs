#![deny(unsafe_code)]

pub mod queue;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use quorum_adapters::{FixtureDirectory, FixtureError, TracingDispatchSink};
use quorum_core::{
    ApprovalEngine, ApprovalEngineConfig, CastVoteRequest, CreateWorkflowRequest, EngineError,
    EntityKind, EntityRef, Storage, StorageConfig, Vote, VoteKind, Workflow,
};
use queue::{RecalcQueue, ServiceDispatchSink};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub storage: StorageConfig,
    /// Directory fixture file standing in for the external group/template
    /// collaborators. Starts empty when absent.
    pub directory_path: Option<PathBuf>,
    pub default_expires_in_hours: i64,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            storage: StorageConfig::Memory,
            directory_path: None,
            default_expires_in_hours: 72,
        }
    }
}

#[derive(Clone)]
pub struct ServiceState {
    pub engine: Arc<ApprovalEngine>,
    pub directory: Arc<FixtureDirectory>,
    pub queue: Arc<RecalcQueue>,
    backend: &'static str,
}

impl ServiceState {
    pub async fn bootstrap(config: ServiceConfig) -> Result<Self, ServiceError> {
        let storage = Storage::bootstrap(config.storage).await?;
        let backend = storage.backend_label();

        let directory = match &config.directory_path {
            Some(path) => Arc::new(FixtureDirectory::load(path)?),
            None => Arc::new(FixtureDirectory::new()),
        };

        let (queue, rx) = RecalcQueue::new();
        let sink = Arc::new(ServiceDispatchSink::new(
            queue.clone(),
            Arc::new(TracingDispatchSink),
        ));
        let engine = Arc::new(ApprovalEngine::new(
            storage.workflows,
            storage.votes,
            directory.clone(),
            directory.clone(),
            sink,
            ApprovalEngineConfig {
                default_expires_in_hours: config.default_expires_in_hours,
            },
        ));
        RecalcQueue::spawn_worker(queue.clone(), rx, engine.clone());

        Ok(Self {
            engine,
            directory,
            queue,
            backend,
        })
    }

    pub fn backend_label(&self) -> &'static str {
        self.backend
    }
}

pub fn build_router(state: ServiceState) -> Router {
    Router::new()
        .route("/v1/health", get(health))
        .route("/v1/workflows", post(create_workflow))
        .route("/v1/workflows/:id", get(get_workflow))
        .route("/v1/workflows/:id/cancel", post(cancel_workflow))
        .route("/v1/workflows/:id/votes", post(cast_vote).get(list_votes))
        .route("/v1/workflows/:id/can-vote", get(can_vote))
        .with_state(state)
}

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("engine error: {0}")]
    Engine(#[from] EngineError),
    #[error("directory fixture error: {0}")]
    Fixture(#[from] FixtureError),
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{message}")]
    Http { status: StatusCode, message: String },
    #[error(transparent)]
    Engine(#[from] EngineError),
}

impl ApiError {
    fn not_found(message: impl Into<String>) -> Self {
        Self::Http {
            status: StatusCode::NOT_FOUND,
            message: message.into(),
        }
    }
}

fn engine_error_status(err: &EngineError) -> StatusCode {
    match err {
        EngineError::CantVote(_) | EngineError::TemplateNotActive(_) => {
            StatusCode::UNPROCESSABLE_ENTITY
        }
        EngineError::Rule(_) | EngineError::VotePayload(_) | EngineError::InvalidExpiry(_) => {
            StatusCode::BAD_REQUEST
        }
        EngineError::WorkflowNotFound(_) | EngineError::TemplateNotFound(_) => {
            StatusCode::NOT_FOUND
        }
        EngineError::Concurrency { .. }
        | EngineError::TerminalWorkflow { .. }
        | EngineError::DuplicateVote(_) => StatusCode::CONFLICT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::Http { status, message } => {
                (status, Json(serde_json::json!({ "error": message }))).into_response()
            }
            ApiError::Engine(err) => (
                engine_error_status(&err),
                Json(serde_json::json!({
                    "error": err.to_string(),
                    "code": err.code(),
                })),
            )
                .into_response(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
struct HealthResponse {
    status: &'static str,
    service: &'static str,
    storage_backend: &'static str,
}

async fn health(State(state): State<ServiceState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        service: "quorum-service",
        storage_backend: state.backend_label(),
    })
}

async fn create_workflow(
    State(state): State<ServiceState>,
    Json(request): Json<CreateWorkflowRequest>,
) -> Result<Json<Workflow>, ApiError> {
    Ok(Json(state.engine.create_workflow(request).await?))
}

async fn get_workflow(
    State(state): State<ServiceState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Workflow>, ApiError> {
    Ok(Json(state.engine.workflow(id).await?))
}

async fn cancel_workflow(
    State(state): State<ServiceState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Workflow>, ApiError> {
    Ok(Json(state.engine.cancel_workflow(id).await?))
}

/// Vote payload as posted by callers; the workflow id comes from the path.
#[derive(Debug, Clone, Deserialize)]
struct CastVoteBody {
    voter: EntityRef,
    kind: VoteKind,
    #[serde(default)]
    voted_for_groups: Vec<String>,
    reason: Option<String>,
}

async fn cast_vote(
    State(state): State<ServiceState>,
    Path(id): Path<Uuid>,
    Json(body): Json<CastVoteBody>,
) -> Result<Json<Vote>, ApiError> {
    let request = CastVoteRequest {
        workflow_id: id,
        voter: body.voter,
        kind: body.kind,
        voted_for_groups: body.voted_for_groups,
        reason: body.reason,
    };
    Ok(Json(state.engine.cast_vote(request).await?))
}

#[derive(Debug, Clone, Serialize)]
struct VotesResponse {
    items: Vec<Vote>,
}

async fn list_votes(
    State(state): State<ServiceState>,
    Path(id): Path<Uuid>,
) -> Result<Json<VotesResponse>, ApiError> {
    Ok(Json(VotesResponse {
        items: state.engine.votes_of(id).await?,
    }))
}

#[derive(Debug, Clone, Deserialize)]
struct CanVoteQuery {
    entity_kind: EntityKind,
    entity_id: Uuid,
}

#[derive(Debug, Clone, Serialize)]
struct CanVoteResponse {
    allowed: bool,
    reason: Option<&'static str>,
    message: Option<String>,
}

async fn can_vote(
    State(state): State<ServiceState>,
    Path(id): Path<Uuid>,
    Query(query): Query<CanVoteQuery>,
) -> Result<Json<CanVoteResponse>, ApiError> {
    let voter = EntityRef {
        kind: query.entity_kind,
        id: query.entity_id,
    };

    match state.engine.can_vote(id, &voter).await {
        Ok(()) => Ok(Json(CanVoteResponse {
            allowed: true,
            reason: None,
            message: None,
        })),
        Err(EngineError::CantVote(reason)) => Ok(Json(CanVoteResponse {
            allowed: false,
            reason: Some(reason.code()),
            message: Some(reason.to_string()),
        })),
        Err(EngineError::WorkflowNotFound(id)) => {
            Err(ApiError::not_found(format!("workflow '{id}' not found")))
        }
        Err(err) => Err(err.into()),
    }
}
