use serde::Serialize;
use utoipa::ToSchema;

use crate::dto::session::{GameStateView, UploadView};

#[derive(Clone, Debug)]
/// Dispatched payload carried across SSE channels.
pub struct ServerEvent {
    pub event: Option<String>,
    pub data: String,
}

impl ServerEvent {
    /// Convenience wrapper that serialises `payload` into the SSE data field.
    pub fn json<E, T>(event: E, payload: &T) -> serde_json::Result<Self>
    where
        E: Into<Option<String>>,
        T: Serialize,
    {
        Ok(Self {
            event: event.into(),
            data: serde_json::to_string(payload)?,
        })
    }
}

#[derive(Debug, Serialize, ToSchema)]
/// First message sent on a session stream.
pub struct Handshake {
    pub participant_id: String,
    /// Whether the backend is running without a record store.
    pub degraded: bool,
}

#[derive(Debug, Serialize, ToSchema)]
/// Broadcast when a new upload was accepted.
pub struct UploadRegisteredEvent {
    pub upload: UploadView,
}

#[derive(Debug, Serialize, ToSchema)]
/// Broadcast when an upload received its similarity score.
pub struct UploadCompletedEvent {
    pub upload: UploadView,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(transparent)]
/// Broadcast after every guess.
pub struct GameUpdatedEvent(pub GameStateView);

#[derive(Debug, Serialize, ToSchema)]
/// Broadcast after a reset; clients should reload the session.
pub struct GameResetEvent {
    pub game: GameStateView,
}
