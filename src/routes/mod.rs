use axum::Router;

use crate::state::SharedState;

pub mod blob;
pub mod docs;
pub mod game;
pub mod health;
pub mod session;
pub mod sse;
pub mod upload;

/// Compose all route trees, wiring in shared state and documentation routes.
pub fn router(state: SharedState) -> Router<()> {
    let api_router = health::router()
        .merge(session::router())
        .merge(upload::router(state.config().max_upload_bytes()))
        .merge(game::router())
        .merge(sse::router())
        .merge(blob::router());

    api_router.merge(docs::router()).with_state(state)
}
