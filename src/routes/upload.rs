use axum::{
    Json, Router,
    extract::{DefaultBodyLimit, Multipart, Path, State},
    http::StatusCode,
    routing::post,
};

use crate::{
    dto::session::UploadView,
    error::{AppError, ErrorBody},
    multipart::read_file_field,
    services::upload_service,
    state::SharedState,
};

/// Room left for multipart boundaries and part headers on top of the file itself.
const MULTIPART_OVERHEAD: usize = 64 * 1024;

/// Image upload endpoint, with the body limit sized to the configured maximum.
pub fn router(max_upload_bytes: usize) -> Router<SharedState> {
    Router::new()
        .route("/sessions/{participant_id}/uploads", post(register_upload))
        .layer(DefaultBodyLimit::max(
            max_upload_bytes.saturating_add(MULTIPART_OVERHEAD),
        ))
}

/// Upload an image for the current game
///
/// Accepts multipart/form-data with a single **file** part. The image is
/// stored and registered as `processing`; its similarity score arrives later
/// through polling or the session event stream.
#[utoipa::path(
    post,
    path = "/sessions/{participant_id}/uploads",
    tag = "game",
    params(("participant_id" = String, Path, description = "Participant identifier")),
    request_body(
        content_type = "multipart/form-data",
        description = "Form with a single `file` part holding the image"
    ),
    responses(
        (status = 201, description = "Upload registered", body = UploadView),
        (status = 400, description = "Missing file, empty file or unsupported type", body = ErrorBody),
        (status = 404, description = "No session for this participant", body = ErrorBody),
        (status = 409, description = "Upload cap reached or game complete", body = ErrorBody),
        (status = 413, description = "File too large", body = ErrorBody),
        (status = 503, description = "Storage unavailable", body = ErrorBody)
    )
)]
pub async fn register_upload(
    State(state): State<SharedState>,
    Path(participant_id): Path<String>,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<UploadView>), AppError> {
    let file = read_file_field(&mut multipart, state.config().max_upload_bytes()).await?;
    let view = upload_service::register_upload(&state, &participant_id, file).await?;
    Ok((StatusCode::CREATED, Json(view)))
}
