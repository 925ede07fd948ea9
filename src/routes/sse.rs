use std::convert::Infallible;

use axum::{Router, extract::State, response::sse::Sse, routing::get};
use futures::Stream;

use crate::{error::AppError, services::sse_service, state::SharedState};

#[utoipa::path(
    get,
    path = "/api/events",
    tag = "events",
    responses(
        (status = 200, description = "Live hunt events", content_type = "text/event-stream", body = String),
        (status = 503, description = "Viewer registry saturated")
    )
)]
/// Stream lock, solve and leaderboard events to a viewer.
pub async fn events_stream(
    State(state): State<SharedState>,
) -> Result<Sse<impl Stream<Item = Result<axum::response::sse::Event, Infallible>>>, AppError> {
    let receiver = sse_service::subscribe(&state).await?;
    Ok(sse_service::to_sse_stream(receiver))
}

/// Configure the SSE endpoint.
pub fn router() -> Router<SharedState> {
    Router::<SharedState>::new().route("/api/events", get(events_stream))
}
