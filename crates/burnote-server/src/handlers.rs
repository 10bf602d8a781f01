use axum::{
    body::Body,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use serde_json::json;
use tracing::info;
use uuid::Uuid;

use crate::{
    service::{CreateOutcome, CreateRequest, ReadOutcome, ReadRequest, ServiceError},
    AppState,
};

pub const HEADER_REMAINING_VIEWS: &str = "X-Burnote-Remaining-Views";
pub const HEADER_EXPIRES_AT: &str = "X-Burnote-Expires-At";
pub const HEADER_CREATED_AT: &str = "X-Burnote-Created-At";

// ── Health ────────────────────────────────────────────────────────────────────

pub async fn health() -> impl IntoResponse {
    Json(json!({"status": "ok"}))
}

// ── Create ────────────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
pub struct CreateResponse {
    pub id: Uuid,
    pub url: String,
}

pub async fn create_note(
    State(state): State<AppState>,
    Json(body): Json<CreateRequest>,
) -> Response {
    match state.service.create(body) {
        Ok(CreateOutcome::Created { id }) => {
            info!(id = %id, "note created");
            let url = state.note_url(id);
            (StatusCode::CREATED, Json(CreateResponse { id, url })).into_response()
        }
        Ok(CreateOutcome::Rejected { reasons }) => {
            (StatusCode::BAD_REQUEST, Json(json!({ "errors": reasons }))).into_response()
        }
        Err(e) => internal_error(e),
    }
}

// ── Read ──────────────────────────────────────────────────────────────────────

pub async fn read_note(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match state.service.read(ReadRequest { id }) {
        Ok(ReadOutcome::Delivered {
            id,
            content,
            remaining_views,
        }) => {
            info!(id = %id, remaining_views, "note delivered");
            Json(json!({
                "id": id,
                "content": content,
                "remaining_views": remaining_views,
            }))
            .into_response()
        }
        Ok(ReadOutcome::Gone { message }) => gone(message),
        Err(e) => internal_error(e),
    }
}

// ── Head ──────────────────────────────────────────────────────────────────────

/// Reports whether a note is still readable without spending a view.
pub async fn head_note(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match state.service.describe(&id) {
        Ok(Some(meta)) => Response::builder()
            .status(StatusCode::OK)
            .header(HEADER_REMAINING_VIEWS, meta.remaining_views.to_string())
            .header(HEADER_EXPIRES_AT, meta.expire_at.to_string())
            .header(HEADER_CREATED_AT, meta.created_at.to_string())
            .body(Body::empty())
            .unwrap_or_else(|e| {
                tracing::error!(error = %e, "build head response");
                StatusCode::INTERNAL_SERVER_ERROR.into_response()
            }),
        Ok(None) => StatusCode::NOT_FOUND.into_response(),
        Err(e) => internal_error(e),
    }
}

// ── Reap ──────────────────────────────────────────────────────────────────────

pub async fn reap_notes(State(state): State<AppState>) -> Response {
    match state.service.reap_expired() {
        Ok(reaped) => Json(json!({ "reaped": reaped })).into_response(),
        Err(e) => internal_error(e),
    }
}

// ── Helpers ───────────────────────────────────────────────────────────────────

fn gone(message: &str) -> Response {
    (StatusCode::NOT_FOUND, Json(json!({ "error": message }))).into_response()
}

fn internal_error(e: ServiceError) -> Response {
    tracing::error!(error = %e, "internal error");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({"error": "internal server error"})),
    )
        .into_response()
}
