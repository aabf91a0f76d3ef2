use std::convert::Infallible;

use axum::{
    Router,
    extract::{Path, State},
    response::sse::{Event, Sse},
    routing::get,
};
use futures::Stream;

use crate::{error::AppError, services::sse_service, state::SharedState};

/// Stream upload and game changes for one participant.
#[utoipa::path(
    get,
    path = "/sessions/{participant_id}/events",
    tag = "sse",
    params(("participant_id" = String, Path, description = "Participant identifier")),
    responses(
        (status = 200, description = "Session change stream", content_type = "text/event-stream", body = String),
        (status = 404, description = "No session for this participant")
    )
)]
pub async fn session_stream(
    State(state): State<SharedState>,
    Path(participant_id): Path<String>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, AppError> {
    let (handle, receiver) = sse_service::subscribe_session(&state, &participant_id).await?;
    let handshake = sse_service::handshake(&state, &handle).await;
    Ok(sse_service::to_sse_stream(receiver, handle, handshake))
}

/// Configure the SSE endpoints.
pub fn router() -> Router<SharedState> {
    Router::<SharedState>::new().route("/sessions/{participant_id}/events", get(session_stream))
}
