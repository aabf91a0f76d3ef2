use serde::Serialize;
use tracing::warn;

use crate::{
    dto::{
        session::{GameStateView, UploadView},
        sse::{
            GameResetEvent, GameUpdatedEvent, Handshake, ServerEvent, UploadCompletedEvent,
            UploadRegisteredEvent,
        },
    },
    state::SessionHandle,
};

pub const EVENT_HANDSHAKE: &str = "handshake";
const EVENT_UPLOAD_REGISTERED: &str = "upload.registered";
const EVENT_UPLOAD_COMPLETED: &str = "upload.completed";
const EVENT_GAME_UPDATED: &str = "game.updated";
const EVENT_GAME_RESET: &str = "game.reset";

/// Broadcast that a new upload was accepted and awaits scoring.
pub fn broadcast_upload_registered(handle: &SessionHandle, upload: UploadView) {
    send_session_event(handle, EVENT_UPLOAD_REGISTERED, &UploadRegisteredEvent { upload });
}

/// Broadcast that an upload received its similarity score.
pub fn broadcast_upload_completed(handle: &SessionHandle, upload: UploadView) {
    send_session_event(handle, EVENT_UPLOAD_COMPLETED, &UploadCompletedEvent { upload });
}

/// Broadcast the game state after a guess.
pub fn broadcast_game_updated(handle: &SessionHandle, game: GameStateView) {
    send_session_event(handle, EVENT_GAME_UPDATED, &GameUpdatedEvent(game));
}

/// Broadcast the fresh game after a reset.
pub fn broadcast_game_reset(handle: &SessionHandle, game: GameStateView) {
    send_session_event(handle, EVENT_GAME_RESET, &GameResetEvent { game });
}

/// Build the first event of a session stream.
pub fn handshake_event(participant_id: &str, degraded: bool) -> Option<ServerEvent> {
    let payload = Handshake {
        participant_id: participant_id.to_owned(),
        degraded,
    };
    match ServerEvent::json(Some(EVENT_HANDSHAKE.to_string()), &payload) {
        Ok(event) => Some(event),
        Err(err) => {
            warn!(error = %err, "failed to serialize SSE handshake");
            None
        }
    }
}

fn send_session_event(handle: &SessionHandle, event: &str, payload: &impl Serialize) {
    match ServerEvent::json(Some(event.to_string()), payload) {
        Ok(event) => handle.events().broadcast(event),
        Err(err) => warn!(
            event,
            participant = %handle.participant_id(),
            error = %err,
            "failed to serialize session SSE payload"
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::game::ParticipantId;

    #[tokio::test]
    async fn events_reach_session_subscribers() {
        let handle = SessionHandle::new(ParticipantId::parse("demo").unwrap(), 0);
        let mut rx = handle.events().subscribe();

        let upload = UploadView {
            storage_name: "1_a.png".into(),
            display_name: "a.png".into(),
            status: crate::dto::session::UploadStatusView::Completed,
            similarity: Some(42.0),
            content_type: "image/png".into(),
            size_bytes: 1,
            created_at: "1970-01-01T00:00:00Z".into(),
            image_url: "http://x/blobs/demo/1_a.png".into(),
        };
        broadcast_upload_completed(&handle, upload);

        let event = rx.recv().await.unwrap();
        assert_eq!(event.event.as_deref(), Some("upload.completed"));
        let data: serde_json::Value = serde_json::from_str(&event.data).unwrap();
        assert_eq!(data["upload"]["similarity"], 42.0);
    }
}
