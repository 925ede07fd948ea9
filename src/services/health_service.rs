use tracing::warn;

use crate::{dto::health::HealthResponse, state::SharedState};

/// Check storage and report it with the live viewer count.
pub async fn health_status(state: &SharedState) -> HealthResponse {
    let storage_ok = match state.store().health_check().await {
        Ok(()) => !state.is_degraded(),
        Err(err) => {
            warn!(error = %err, "storage health check failed");
            false
        }
    };

    HealthResponse::new(
        storage_ok,
        state.clock().now(),
        state.broadcaster().client_count(),
    )
}
