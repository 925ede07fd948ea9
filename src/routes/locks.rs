//! Polling fallback for viewers without a live stream.
//!
//! Both endpoints tag their body with a SHA-256 `ETag` and honour `If-None-Match`.

use axum::{
    Router,
    extract::{Path, State},
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
    routing::get,
};
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::{
    dto::locks::{LockView, QuestionStatusResponse},
    error::{AppError, ServiceError},
    state::SharedState,
};

const CACHE_CONTROL: &str = "public, max-age=5";

#[utoipa::path(
    get,
    path = "/api/locked-questions",
    tag = "locks",
    responses(
        (status = 200, description = "Active question locks", body = [LockView]),
        (status = 304, description = "Unchanged since the supplied ETag"),
        (status = 503, description = "Storage is unavailable")
    )
)]
/// List every active lock.
pub async fn locked_questions(
    State(state): State<SharedState>,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    let locks: Vec<LockView> = state
        .locks()
        .list_locked()
        .await
        .map_err(ServiceError::from)?
        .into_iter()
        .map(Into::into)
        .collect();

    conditional_json(&headers, &locks)
}

#[utoipa::path(
    get,
    path = "/api/question-status/{id}",
    tag = "locks",
    params(("id" = i64, Path, description = "Question identifier")),
    responses(
        (status = 200, description = "Lock state of the question", body = QuestionStatusResponse),
        (status = 304, description = "Unchanged since the supplied ETag"),
        (status = 503, description = "Storage is unavailable")
    )
)]
/// Report whether a question is locked and by whom.
pub async fn question_status(
    State(state): State<SharedState>,
    Path(question_id): Path<i64>,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    let lock = state
        .locks()
        .is_locked(question_id)
        .await
        .map_err(ServiceError::from)?;

    conditional_json(&headers, &QuestionStatusResponse::from(lock))
}

/// Configure the lock polling routes.
pub fn router() -> Router<SharedState> {
    Router::<SharedState>::new()
        .route("/api/locked-questions", get(locked_questions))
        .route("/api/question-status/{id}", get(question_status))
}

/// Serialize `payload`, answering 304 when the client already holds the same body.
fn conditional_json<T: Serialize>(headers: &HeaderMap, payload: &T) -> Result<Response, AppError> {
    let body = serde_json::to_vec(payload)?;
    let etag = format!("\"{:x}\"", Sha256::digest(&body));

    if if_none_match(headers, &etag) {
        let cache_headers = [
            (header::ETAG, etag),
            (header::CACHE_CONTROL, CACHE_CONTROL.to_owned()),
        ];
        return Ok((StatusCode::NOT_MODIFIED, cache_headers).into_response());
    }

    let response_headers = [
        (header::ETAG, etag),
        (header::CACHE_CONTROL, CACHE_CONTROL.to_owned()),
        (header::CONTENT_TYPE, "application/json".to_owned()),
    ];
    Ok((StatusCode::OK, response_headers, body).into_response())
}

fn if_none_match(headers: &HeaderMap, etag: &str) -> bool {
    headers
        .get_all(header::IF_NONE_MATCH)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .map(str::trim)
        .any(|candidate| candidate == etag || candidate == "*")
}
