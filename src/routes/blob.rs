use std::time::SystemTime;

use axum::{
    Router,
    extract::{Path, Query, State},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::get,
};
use serde::Deserialize;
use tracing::debug;
use utoipa::IntoParams;

use crate::{
    error::{AppError, ServiceError},
    state::SharedState,
};

/// Query string carried by signed read URLs.
#[derive(Debug, Deserialize, IntoParams)]
pub struct SignedQuery {
    /// Unix time (seconds) after which the URL is refused.
    pub expires: u64,
    /// Hex signature over the path and expiry.
    pub signature: String,
}

/// Serve uploaded images through time-limited signed URLs.
pub fn router() -> Router<SharedState> {
    Router::new().route("/blobs/{namespace}/{name}", get(read_blob))
}

/// Return the image bytes when the signature is valid and unexpired.
#[utoipa::path(
    get,
    path = "/blobs/{namespace}/{name}",
    tag = "blobs",
    params(
        ("namespace" = String, Path, description = "Participant namespace"),
        ("name" = String, Path, description = "Storage name"),
        SignedQuery
    ),
    responses(
        (status = 200, description = "Image bytes"),
        (status = 403, description = "Missing, invalid or expired signature"),
        (status = 404, description = "No such blob")
    )
)]
pub async fn read_blob(
    State(state): State<SharedState>,
    Path((namespace, name)): Path<(String, String)>,
    Query(query): Query<SignedQuery>,
) -> Result<Response, AppError> {
    let blobs = state.blob_store();
    let valid = blobs.signer().verify(
        &namespace,
        &name,
        query.expires,
        &query.signature,
        SystemTime::now(),
    );
    if !valid {
        debug!(namespace = %namespace, name = %name, "refused blob read with bad signature");
        return Ok((StatusCode::FORBIDDEN, "invalid or expired signature").into_response());
    }

    let Some(blob) = blobs
        .get_blob(&namespace, &name)
        .await
        .map_err(ServiceError::from)?
    else {
        return Err(AppError::NotFound(format!("blob `{namespace}/{name}`")));
    };

    Ok((
        [
            (header::CONTENT_TYPE, blob.content_type),
            (header::CACHE_CONTROL, "private, max-age=300".to_owned()),
        ],
        blob.bytes,
    )
        .into_response())
}
