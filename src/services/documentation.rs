use utoipa::OpenApi;

#[derive(OpenApi)]
/// Aggregated OpenAPI specification for the hunt coordinator.
#[openapi(
    paths(
        crate::routes::health::healthcheck,
        crate::routes::sse::events_stream,
        crate::routes::locks::locked_questions,
        crate::routes::locks::question_status,
    ),
    components(
        schemas(
            crate::dto::health::HealthResponse,
            crate::dto::locks::LockView,
            crate::dto::locks::QuestionStatusResponse,
            crate::dto::events::ConnectedEvent,
            crate::dto::events::LocksSnapshotEvent,
            crate::dto::events::QuestionLockedEvent,
            crate::dto::events::QuestionUnlockedEvent,
            crate::dto::events::QuestionSolvedEvent,
            crate::dto::events::LeaderboardUpdateEvent,
            crate::dto::events::HeartbeatEvent,
            crate::dto::events::UnlockReason,
        )
    ),
    tags(
        (name = "health", description = "Health check endpoints"),
        (name = "events", description = "Live event stream"),
        (name = "locks", description = "Question lock state"),
    )
)]
pub struct ApiDoc;
