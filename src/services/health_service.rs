use tracing::warn;

use crate::{dto::health::HealthResponse, state::SharedState};

/// Report whether a record store is installed, logging connectivity issues.
pub async fn health_status(state: &SharedState) -> HealthResponse {
    match state.require_session_store().await {
        Ok(store) => {
            if let Err(err) = store.health_check().await {
                warn!(error = %err, "record store health check failed");
            }
        }
        Err(_) => warn!("record store unavailable (degraded mode)"),
    }
    if let Err(err) = state.blob_store().health_check().await {
        warn!(error = %err, "blob store health check failed");
    }

    HealthResponse::new(state.is_degraded().await, state.sessions().len())
}
