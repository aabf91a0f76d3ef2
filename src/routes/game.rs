use axum::{
    Json, Router,
    extract::{Path, State},
    routing::post,
};
use validator::Validate;

use crate::{
    dto::{
        game::{GuessOutcome, GuessRequest},
        poll::{PollRequest, PollResponse},
        session::GameStateView,
    },
    error::{AppError, ErrorBody},
    services::{game_service, reconciler},
    state::SharedState,
};

/// Guessing, reset and client-driven result polling.
pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/sessions/{participant_id}/guess", post(submit_guess))
        .route("/sessions/{participant_id}/reset", post(reset_game))
        .route("/sessions/{participant_id}/poll", post(poll_results))
}

/// Submit a guess for the hidden animal.
#[utoipa::path(
    post,
    path = "/sessions/{participant_id}/guess",
    tag = "game",
    params(("participant_id" = String, Path, description = "Participant identifier")),
    request_body = GuessRequest,
    responses(
        (status = 200, description = "Guess judged", body = GuessOutcome),
        (status = 400, description = "Blank or oversized guess", body = ErrorBody),
        (status = 404, description = "No session for this participant", body = ErrorBody),
        (status = 409, description = "Guessing is not open, or a concurrent update won", body = ErrorBody),
        (status = 503, description = "Record store unavailable", body = ErrorBody)
    )
)]
pub async fn submit_guess(
    State(state): State<SharedState>,
    Path(participant_id): Path<String>,
    Json(payload): Json<GuessRequest>,
) -> Result<Json<GuessOutcome>, AppError> {
    payload.validate()?;
    let outcome = game_service::submit_guess(&state, &participant_id, payload).await?;
    Ok(Json(outcome))
}

/// Start over: drop the uploads and scores of the current game.
#[utoipa::path(
    post,
    path = "/sessions/{participant_id}/reset",
    tag = "game",
    params(("participant_id" = String, Path, description = "Participant identifier")),
    responses(
        (status = 200, description = "Fresh game", body = GameStateView),
        (status = 404, description = "No session for this participant", body = ErrorBody),
        (status = 503, description = "Record store unavailable", body = ErrorBody)
    )
)]
pub async fn reset_game(
    State(state): State<SharedState>,
    Path(participant_id): Path<String>,
) -> Result<Json<GameStateView>, AppError> {
    let game = game_service::reset(&state, &participant_id).await?;
    Ok(Json(game))
}

/// Check whether the given pending uploads have been scored.
#[utoipa::path(
    post,
    path = "/sessions/{participant_id}/poll",
    tag = "game",
    params(("participant_id" = String, Path, description = "Participant identifier")),
    request_body = PollRequest,
    responses(
        (status = 200, description = "Poll outcome; storage failures are reported as `failed`", body = PollResponse),
        (status = 400, description = "Malformed request", body = ErrorBody),
        (status = 404, description = "No session for this participant", body = ErrorBody)
    )
)]
pub async fn poll_results(
    State(state): State<SharedState>,
    Path(participant_id): Path<String>,
    Json(payload): Json<PollRequest>,
) -> Result<Json<PollResponse>, AppError> {
    payload.validate()?;
    let response = reconciler::poll_results(&state, &participant_id, payload.pending).await?;
    Ok(Json(response))
}
