//! # Session API
//!
//! Session CRUD, the state-gated operations and read accessors.
//! Research, generation and iteration answer with an SSE stream whose
//! frames are `event: <type>` / `data: <json>`.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::sse::{Event, KeepAlive, Sse},
    routing::{get, post},
    Json, Router,
};
use futures::stream::{Stream, StreamExt};
use pressroom_core::memory::FindingsRecord;
use pressroom_core::skills::{ResearchPlan, Synthesis};
use pressroom_core::{
    AggregatedFindings, ContentVersion, EventStream, GenerationParameters, PublishReceipt,
    PublishTarget, Session,
};
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use utoipa::ToSchema;

use super::error::{ApiResult, ErrorResponse};
use crate::SharedState;

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateSessionRequest {
    pub topic: String,
    /// content_type, tone, audience_level, word_count, keywords, custom_instructions
    #[serde(default)]
    #[schema(value_type = Object)]
    pub parameters: GenerationParameters,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct IterateRequest {
    pub feedback: String,
}

/// Research view: aggregated findings plus the raw records
#[derive(Debug, Serialize)]
pub struct ResearchResponse {
    pub findings: AggregatedFindings,
    pub records: Vec<FindingsRecord>,
    pub plan: Option<ResearchPlan>,
}

pub fn session_routes() -> Router<SharedState> {
    Router::new()
        .route("/", get(list_sessions).post(create_session))
        .route("/:id", get(get_session).delete(delete_session))
        .route("/:id/research", get(get_research).post(start_research))
        .route("/:id/research/synthesis", get(get_synthesis))
        .route("/:id/generate", post(start_generation))
        .route("/:id/iterate", post(iterate))
        .route("/:id/versions", get(list_versions))
        .route("/:id/versions/:version", get(get_version))
        .route("/:id/content", get(get_content))
        .route("/:id/publish", post(publish))
}

/// Turn an engine event stream into SSE frames
fn sse(events: EventStream) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let frames = events.map(|event| {
        let frame = Event::default()
            .event(event.name())
            .json_data(&event)
            .unwrap_or_else(|e| Event::default().event("error").data(e.to_string()));
        Ok(frame)
    });
    Sse::new(frames).keep_alive(KeepAlive::default())
}

/// Create a session
#[utoipa::path(
    post,
    path = "/api/v1/sessions",
    tag = "sessions",
    request_body = CreateSessionRequest,
    responses(
        (status = 201, description = "Session created"),
        (status = 422, description = "Empty topic or invalid parameters", body = ErrorResponse)
    )
)]
pub async fn create_session(
    State(state): State<SharedState>,
    Json(req): Json<CreateSessionRequest>,
) -> ApiResult<(StatusCode, Json<Session>)> {
    let session = state.engine.create(&req.topic, req.parameters).await?;
    Ok((StatusCode::CREATED, Json(session)))
}

/// List sessions, oldest first
#[utoipa::path(
    get,
    path = "/api/v1/sessions",
    tag = "sessions",
    responses((status = 200, description = "All live sessions"))
)]
pub async fn list_sessions(State(state): State<SharedState>) -> ApiResult<Json<Vec<Session>>> {
    Ok(Json(state.engine.list_sessions()?))
}

/// Get one session
#[utoipa::path(
    get,
    path = "/api/v1/sessions/{id}",
    tag = "sessions",
    params(("id" = String, Path, description = "Session id")),
    responses(
        (status = 200, description = "The session"),
        (status = 404, description = "Unknown session", body = ErrorResponse)
    )
)]
pub async fn get_session(State(state): State<SharedState>, Path(id): Path<String>) -> ApiResult<Json<Session>> {
    Ok(Json(state.engine.get_session(&id)?))
}

/// Delete a session and everything stored for it
#[utoipa::path(
    delete,
    path = "/api/v1/sessions/{id}",
    tag = "sessions",
    params(("id" = String, Path, description = "Session id")),
    responses(
        (status = 204, description = "Deleted"),
        (status = 404, description = "Unknown session", body = ErrorResponse)
    )
)]
pub async fn delete_session(State(state): State<SharedState>, Path(id): Path<String>) -> ApiResult<StatusCode> {
    state.engine.delete(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Run research; streams events
#[utoipa::path(
    post,
    path = "/api/v1/sessions/{id}/research",
    tag = "operations",
    params(("id" = String, Path, description = "Session id")),
    responses(
        (status = 200, description = "Event stream", content_type = "text/event-stream"),
        (status = 409, description = "Session is not in created", body = ErrorResponse)
    )
)]
pub async fn start_research(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> ApiResult<Sse<impl Stream<Item = Result<Event, Infallible>>>> {
    Ok(sse(state.engine.start_research(&id).await?))
}

/// Aggregated research, raw records and plan
#[utoipa::path(
    get,
    path = "/api/v1/sessions/{id}/research",
    tag = "research",
    params(("id" = String, Path, description = "Session id")),
    responses(
        (status = 200, description = "Research results"),
        (status = 404, description = "Unknown session", body = ErrorResponse)
    )
)]
pub async fn get_research(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> ApiResult<Json<ResearchResponse>> {
    let findings = state.engine.research_results(&id).await?;
    let records = state.engine.findings(&id).await?;
    let plan = match state.engine.research_plan(&id).await {
        Ok(plan) => Some(plan),
        Err(e) if e.is_not_found() => None,
        Err(e) => return Err(e.into()),
    };
    Ok(Json(ResearchResponse {
        findings,
        records,
        plan,
    }))
}

/// The stored synthesis
#[utoipa::path(
    get,
    path = "/api/v1/sessions/{id}/research/synthesis",
    tag = "research",
    params(("id" = String, Path, description = "Session id")),
    responses(
        (status = 200, description = "Synthesis"),
        (status = 404, description = "No synthesis yet", body = ErrorResponse)
    )
)]
pub async fn get_synthesis(State(state): State<SharedState>, Path(id): Path<String>) -> ApiResult<Json<Synthesis>> {
    Ok(Json(state.engine.synthesis(&id).await?))
}

/// Generate version 1; streams events
#[utoipa::path(
    post,
    path = "/api/v1/sessions/{id}/generate",
    tag = "operations",
    params(("id" = String, Path, description = "Session id")),
    responses(
        (status = 200, description = "Event stream", content_type = "text/event-stream"),
        (status = 409, description = "Session is not ready for generation", body = ErrorResponse)
    )
)]
pub async fn start_generation(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> ApiResult<Sse<impl Stream<Item = Result<Event, Infallible>>>> {
    Ok(sse(state.engine.start_generation(&id).await?))
}

/// Apply feedback as a new version; streams events
#[utoipa::path(
    post,
    path = "/api/v1/sessions/{id}/iterate",
    tag = "operations",
    params(("id" = String, Path, description = "Session id")),
    request_body = IterateRequest,
    responses(
        (status = 200, description = "Event stream", content_type = "text/event-stream"),
        (status = 409, description = "Session is not ready for review", body = ErrorResponse),
        (status = 422, description = "Empty feedback", body = ErrorResponse)
    )
)]
pub async fn iterate(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    Json(req): Json<IterateRequest>,
) -> ApiResult<Sse<impl Stream<Item = Result<Event, Infallible>>>> {
    Ok(sse(state.engine.iterate(&id, &req.feedback).await?))
}

/// All versions, ascending
#[utoipa::path(
    get,
    path = "/api/v1/sessions/{id}/versions",
    tag = "content",
    params(("id" = String, Path, description = "Session id")),
    responses((status = 200, description = "Versions"))
)]
pub async fn list_versions(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Vec<ContentVersion>>> {
    Ok(Json(state.engine.versions(&id).await?))
}

/// One version
#[utoipa::path(
    get,
    path = "/api/v1/sessions/{id}/versions/{version}",
    tag = "content",
    params(
        ("id" = String, Path, description = "Session id"),
        ("version" = u32, Path, description = "Version number, from 1")
    ),
    responses(
        (status = 200, description = "The version"),
        (status = 404, description = "No such version", body = ErrorResponse)
    )
)]
pub async fn get_version(
    State(state): State<SharedState>,
    Path((id, version)): Path<(String, u32)>,
) -> ApiResult<Json<ContentVersion>> {
    Ok(Json(state.engine.version(&id, version).await?))
}

/// The latest version
#[utoipa::path(
    get,
    path = "/api/v1/sessions/{id}/content",
    tag = "content",
    params(("id" = String, Path, description = "Session id")),
    responses(
        (status = 200, description = "Latest version"),
        (status = 404, description = "Nothing generated yet", body = ErrorResponse)
    )
)]
pub async fn get_content(State(state): State<SharedState>, Path(id): Path<String>) -> ApiResult<Json<ContentVersion>> {
    Ok(Json(state.engine.latest_version(&id).await?))
}

/// Publish the latest version. Body is a target: `{"kind": "export"}` or
/// `{"kind": "wordpress", "site_url": .., "username": .., "app_password": ..}`
#[utoipa::path(
    post,
    path = "/api/v1/sessions/{id}/publish",
    tag = "operations",
    params(("id" = String, Path, description = "Session id")),
    request_body(content = Object, description = "Publish target", content_type = "application/json"),
    responses(
        (status = 200, description = "Publish receipt"),
        (status = 409, description = "Session is not ready for review", body = ErrorResponse),
        (status = 502, description = "Publishing sink failed", body = ErrorResponse)
    )
)]
pub async fn publish(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    Json(target): Json<PublishTarget>,
) -> ApiResult<Json<PublishReceipt>> {
    Ok(Json(state.engine.publish(&id, target).await?))
}
