use std::{convert::Infallible, sync::Arc, time::Duration};

use axum::response::sse::{Event, KeepAlive, Sse};
use futures::Stream;
use tokio::sync::{
    broadcast::{self, error::RecvError},
    mpsc,
};
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info};

use crate::{
    dto::sse::ServerEvent,
    error::ServiceError,
    services::{session_service, sse_events},
    state::{SessionHandle, SharedState, game::ParticipantId},
};

/// Subscribe to a participant's change stream.
///
/// The session must exist; its live handle is attached if needed so the
/// reconciler feeding the stream is running.
pub async fn subscribe_session(
    state: &SharedState,
    raw_participant_id: &str,
) -> Result<(Arc<SessionHandle>, broadcast::Receiver<ServerEvent>), ServiceError> {
    let participant_id = ParticipantId::parse(raw_participant_id)?;
    let handle = session_service::attach(state, &participant_id).await?;
    let receiver = handle.events().subscribe();
    info!(participant = %participant_id, subscribers = handle.events().subscriber_count(), "session stream connected");
    Ok((handle, receiver))
}

/// Convert a broadcast receiver into an SSE response, starting with `first`.
///
/// The handle is kept alive by the forwarder and touched on every event, so
/// an open stream keeps the session from being evicted as idle.
pub fn to_sse_stream(
    mut receiver: broadcast::Receiver<ServerEvent>,
    handle: Arc<SessionHandle>,
    first: Option<ServerEvent>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let (tx, rx) = mpsc::channel::<Result<Event, Infallible>>(8);

    tokio::spawn(async move {
        if let Some(first) = first {
            if tx.send(Ok(to_event(first))).await.is_err() {
                return;
            }
        }
        loop {
            tokio::select! {
                _ = tx.closed() => break,
                recv_result = receiver.recv() => {
                    match recv_result {
                        Ok(payload) => {
                            handle.touch();
                            if tx.send(Ok(to_event(payload))).await.is_err() {
                                break;
                            }
                        }
                        Err(RecvError::Closed) => break,
                        Err(RecvError::Lagged(skipped)) => {
                            debug!(participant = %handle.participant_id(), skipped, "session stream lagged");
                            continue;
                        }
                    }
                }
            }
        }
        info!(participant = %handle.participant_id(), "session stream disconnected");
    });

    let stream = ReceiverStream::new(rx);
    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keep-alive"),
    )
}

/// Handshake announcing the stream plus the current degraded flag.
pub async fn handshake(state: &SharedState, handle: &SessionHandle) -> Option<ServerEvent> {
    sse_events::handshake_event(handle.participant_id().as_str(), state.is_degraded().await)
}

fn to_event(payload: ServerEvent) -> Event {
    let event = Event::default().data(payload.data);
    match payload.event {
        Some(name) => event.event(name),
        None => event,
    }
}
