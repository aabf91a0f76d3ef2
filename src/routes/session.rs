use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    routing::get,
};

use crate::{
    dto::session::{ProfileResponse, SessionView},
    error::{AppError, ErrorBody},
    services::session_service,
    state::SharedState,
};

/// Login probe, session loading and logout.
pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/profiles/{participant_id}", get(profile_exists))
        .route(
            "/sessions/{participant_id}",
            get(load_session).delete(teardown),
        )
}

/// Tell whether a session exists for the participant.
#[utoipa::path(
    get,
    path = "/profiles/{participant_id}",
    tag = "session",
    params(("participant_id" = String, Path, description = "Participant identifier")),
    responses(
        (status = 200, description = "Whether a session exists", body = ProfileResponse),
        (status = 400, description = "Malformed participant id", body = ErrorBody),
        (status = 503, description = "Record store unavailable", body = ErrorBody)
    )
)]
pub async fn profile_exists(
    State(state): State<SharedState>,
    Path(participant_id): Path<String>,
) -> Result<Json<ProfileResponse>, AppError> {
    let response = session_service::profile_exists(&state, &participant_id).await?;
    Ok(Json(response))
}

/// Load the participant's game, catching up on scores produced while away.
#[utoipa::path(
    get,
    path = "/sessions/{participant_id}",
    tag = "session",
    params(("participant_id" = String, Path, description = "Participant identifier")),
    responses(
        (status = 200, description = "Session with reconciled uploads", body = SessionView),
        (status = 404, description = "No session for this participant", body = ErrorBody),
        (status = 503, description = "Record store unavailable", body = ErrorBody)
    )
)]
pub async fn load_session(
    State(state): State<SharedState>,
    Path(participant_id): Path<String>,
) -> Result<Json<SessionView>, AppError> {
    let view = session_service::load_session(&state, &participant_id).await?;
    Ok(Json(view))
}

/// Log out: stop background polling for the participant. Stored data is kept.
#[utoipa::path(
    delete,
    path = "/sessions/{participant_id}",
    tag = "session",
    params(("participant_id" = String, Path, description = "Participant identifier")),
    responses(
        (status = 204, description = "Live session released"),
        (status = 400, description = "Malformed participant id", body = ErrorBody)
    )
)]
pub async fn teardown(
    State(state): State<SharedState>,
    Path(participant_id): Path<String>,
) -> Result<StatusCode, AppError> {
    session_service::teardown(&state, &participant_id)?;
    Ok(StatusCode::NO_CONTENT)
}
