use serde::Serialize;
use time::OffsetDateTime;
use utoipa::ToSchema;

/// Health payload returned by `/api/health`.
#[derive(Debug, Serialize, ToSchema)]
pub struct HealthResponse {
    /// "healthy" or "degraded".
    pub status: String,
    #[serde(with = "time::serde::rfc3339")]
    #[schema(value_type = String, format = DateTime)]
    pub timestamp: OffsetDateTime,
    /// "connected" or "unavailable".
    pub storage: String,
    /// Viewers currently registered with this instance's broadcaster.
    pub sse_connections: usize,
}

impl HealthResponse {
    /// Build a response from the storage check result.
    pub fn new(storage_ok: bool, timestamp: OffsetDateTime, sse_connections: usize) -> Self {
        let (status, storage) = if storage_ok {
            ("healthy", "connected")
        } else {
            ("degraded", "unavailable")
        };
        Self {
            status: status.to_string(),
            timestamp,
            storage: storage.to_string(),
            sse_connections,
        }
    }

    /// Whether the payload reports a healthy service.
    pub fn is_healthy(&self) -> bool {
        self.status == "healthy"
    }
}
