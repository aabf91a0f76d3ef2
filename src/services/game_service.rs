use std::{collections::BTreeSet, sync::Arc, time::SystemTime};

use tracing::{debug, info};

use crate::{
    dao::{
        models::{Revision, SessionEntity, Versioned},
        session_store::SessionStore,
    },
    dto::{
        game::{GuessOutcome, GuessRequest},
        session::GameStateView,
    },
    error::ServiceError,
    services::{
        session_service::{self, GameSnapshot, stamp},
        sse_events,
    },
    state::{
        SharedState,
        game::{ParticipantId, Session},
        state_machine::{GameEvent, is_correct_guess},
    },
};

/// Extra attempts granted after losing an optimistic concurrency race.
const CONFLICT_RETRIES: usize = 1;

/// Judge a guess and record the outcome.
///
/// Only accepted while guessing is open; the target is revealed in the
/// outcome once the game is complete.
pub async fn submit_guess(
    state: &SharedState,
    raw_participant_id: &str,
    request: GuessRequest,
) -> Result<GuessOutcome, ServiceError> {
    let participant_id = ParticipantId::parse(raw_participant_id)?;
    let guess = request.guess.trim();
    if guess.is_empty() {
        return Err(ServiceError::InvalidInput("guess must not be blank".into()));
    }

    let store = state.require_session_store().await?;
    let rules = *state.config().rules();
    let first = session_service::fetch_game(&store, &participant_id).await?;
    let handle = session_service::ensure_handle(state, &first).await;
    let _gate = handle.lock().await;

    let mut attempt = 0;
    let (session, upload_count, correct) = loop {
        let GameSnapshot {
            mut session,
            revision,
            uploads,
        } = session_service::fetch_game(&store, &participant_id).await?;

        if session.hidden_target.trim().is_empty() {
            return Err(ServiceError::InvalidState(format!(
                "session `{participant_id}` has no hidden target"
            )));
        }
        let correct = is_correct_guess(guess, &session.hidden_target);
        let next = session
            .progress(uploads.len())
            .plan(GameEvent::GuessSubmitted { correct }, &rules)?;

        session.apply_progress(&next);
        session.last_guess = Some(guess.to_owned());
        session.last_guess_at = Some(SystemTime::now());
        stamp(&mut session);

        if write_session(&store, &session, revision, &mut attempt).await? {
            break (session, uploads.len(), correct);
        }
    };

    info!(
        participant = %participant_id,
        correct,
        guesses_remaining = session.guesses_remaining,
        game_complete = session.game_complete,
        "guess recorded"
    );

    let game = GameStateView::new(&session, upload_count, &rules);
    let outcome = GuessOutcome::new(correct, &game);
    sse_events::broadcast_game_updated(&handle, game);
    Ok(outcome)
}

/// Start a fresh game for the participant.
///
/// Uploads and scoring records of the previous game are deleted, then the
/// fresh session is written with the next game epoch. Only once the store
/// agrees does the live handle move to the new epoch, which makes in-flight
/// polls drop their results. Runs under the session gate, so concurrent
/// uploads and polls see either the old game or the new one.
pub async fn reset(
    state: &SharedState,
    raw_participant_id: &str,
) -> Result<GameStateView, ServiceError> {
    let participant_id = ParticipantId::parse(raw_participant_id)?;
    let store = state.require_session_store().await?;
    let rules = *state.config().rules();
    let first = session_service::fetch_game(&store, &participant_id).await?;
    let handle = session_service::ensure_handle(state, &first).await;
    let _gate = handle.lock().await;

    let mut snapshot = session_service::fetch_game(&store, &participant_id).await?;
    store.delete_uploads(participant_id.as_str()).await?;
    // Uploads are gone; nothing is left to track even if a later step fails.
    handle.replace_pending(BTreeSet::new());
    store.delete_scoring_records(participant_id.as_str()).await?;

    let mut attempt = 0;
    let session = loop {
        let mut session = snapshot.session;
        let fresh = session
            .progress(snapshot.uploads.len())
            .plan(GameEvent::Reset, &rules)?;
        session.apply_progress(&fresh);
        session.last_guess = None;
        session.last_guess_at = None;
        session.game_epoch += 1;
        stamp(&mut session);

        if write_session(&store, &session, snapshot.revision, &mut attempt).await? {
            break session;
        }
        snapshot = session_service::fetch_game(&store, &participant_id).await?;
    };
    handle.set_epoch(session.game_epoch);

    info!(participant = %participant_id, game_epoch = session.game_epoch, "game reset");

    let game = GameStateView::new(&session, 0, &rules);
    sse_events::broadcast_game_reset(&handle, game.clone());
    Ok(game)
}

/// Persist `session` against `revision`.
///
/// Returns `Ok(false)` when the write lost a race and a retry is allowed;
/// once the retry budget is spent the conflict is surfaced.
async fn write_session(
    store: &Arc<dyn SessionStore>,
    session: &Session,
    revision: Revision,
    attempt: &mut usize,
) -> Result<bool, ServiceError> {
    let entity = SessionEntity::from(session.clone());
    match store.update_session(Versioned::new(entity, revision)).await {
        Ok(_) => Ok(true),
        Err(err) => match ServiceError::from(err) {
            ServiceError::Conflict(key) if *attempt < CONFLICT_RETRIES => {
                *attempt += 1;
                debug!(key = %key, attempt = *attempt, "session revision conflict; retrying");
                Ok(false)
            }
            other => Err(other),
        },
    }
}
