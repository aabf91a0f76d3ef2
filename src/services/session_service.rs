use std::{collections::BTreeSet, sync::Arc, time::SystemTime};

use tracing::{debug, info, warn};

use crate::{
    dao::{
        models::{Revision, SessionEntity},
        session_store::SessionStore,
        storage::StorageError,
    },
    dto::session::{GameStateView, LimitsView, ProfileResponse, SessionView, UploadView},
    error::ServiceError,
    services::reconciler,
    state::{
        SessionHandle, SharedState,
        game::{ParticipantId, ScoringRecord, Session, UploadRecord},
        state_machine::GameProgress,
    },
};

/// A session read from the store together with the uploads of its current game.
#[derive(Debug, Clone)]
pub struct GameSnapshot {
    pub session: Session,
    pub revision: Revision,
    pub uploads: Vec<UploadRecord>,
}

impl GameSnapshot {
    pub fn progress(&self) -> GameProgress {
        self.session.progress(self.uploads.len())
    }
}

/// Read the session and its uploads, failing with `NotFound` when absent.
pub async fn fetch_game(
    store: &Arc<dyn SessionStore>,
    participant_id: &ParticipantId,
) -> Result<GameSnapshot, ServiceError> {
    let Some(versioned) = store.find_session(participant_id.as_str()).await? else {
        return Err(ServiceError::NotFound(format!(
            "no session for participant `{participant_id}`"
        )));
    };
    let session = Session::try_from(versioned.value).map_err(|err| {
        ServiceError::Unavailable(StorageError::unavailable(
            format!("stored session for `{participant_id}` is corrupt"),
            err,
        ))
    })?;
    let uploads = store
        .list_uploads(participant_id.as_str())
        .await?
        .into_iter()
        .map(UploadRecord::from)
        .collect();

    Ok(GameSnapshot {
        session,
        revision: versioned.revision,
        uploads,
    })
}

/// Return the live handle for the snapshot's participant, creating it if needed.
///
/// A freshly created handle is seeded with the uploads of `snapshot` still
/// processing, unless a reset moved the game on in the meantime, and its
/// reconciler is started. This is the only place handles are created.
pub async fn ensure_handle(state: &SharedState, snapshot: &GameSnapshot) -> Arc<SessionHandle> {
    let participant_id = &snapshot.session.participant_id;
    let game_epoch = snapshot.session.game_epoch;
    let (handle, inserted) = state.sessions().get_or_insert_with(participant_id, || {
        SessionHandle::new(participant_id.clone(), game_epoch)
    });
    if inserted {
        let _gate = handle.lock().await;
        if handle.epoch() == game_epoch {
            handle.extend_pending(pending_names(&snapshot.uploads));
        }
        debug!(participant = %participant_id, pending = handle.pending().len(), "session handle attached");
    }
    handle.touch();
    ensure_reconciler(state, &handle);
    handle
}

/// Start the background reconciler for `handle` unless one is already running.
pub fn ensure_reconciler(state: &SharedState, handle: &Arc<SessionHandle>) {
    if !handle.has_reconciler() {
        handle.attach_reconciler(reconciler::spawn_reconciler(state, handle));
    }
}

/// Live handle for a participant, bootstrapping it from the store after an eviction.
pub async fn attach(
    state: &SharedState,
    participant_id: &ParticipantId,
) -> Result<Arc<SessionHandle>, ServiceError> {
    if let Some(handle) = state.sessions().get(participant_id) {
        handle.touch();
        return Ok(handle);
    }

    let store = state.require_session_store().await?;
    let snapshot = fetch_game(&store, participant_id).await?;
    Ok(ensure_handle(state, &snapshot).await)
}

/// Mint the view of an upload, with a fresh signed read URL.
pub fn upload_view(
    state: &SharedState,
    participant_id: &ParticipantId,
    record: &UploadRecord,
) -> UploadView {
    let image_url = state.blob_store().read_url(
        participant_id.as_str(),
        &record.storage_name,
        state.config().read_url_ttl(),
    );
    UploadView::new(record, image_url)
}

/// Load everything a client needs to render the participant's game.
///
/// Scoring records produced while the participant was away are reconciled
/// before the view is built, so the returned uploads are as fresh as the store.
pub async fn load_session(
    state: &SharedState,
    raw_participant_id: &str,
) -> Result<SessionView, ServiceError> {
    let participant_id = ParticipantId::parse(raw_participant_id)?;
    let store = state.require_session_store().await?;

    let first = fetch_game(&store, &participant_id).await?;
    let handle = ensure_handle(state, &first).await;

    let snapshot = {
        let _gate = handle.lock().await;
        // Re-read under the gate: a reset may have landed since the first read.
        let mut snapshot = fetch_game(&store, &participant_id).await?;
        handle.set_epoch(snapshot.session.game_epoch);

        let records: Vec<ScoringRecord> = store
            .list_scoring_records(participant_id.as_str(), None)
            .await?
            .into_iter()
            .map(ScoringRecord::from)
            .collect();
        let outcome = reconciler::reconcile(&mut snapshot.uploads, &records);
        for orphan in &outcome.orphaned {
            debug!(participant = %participant_id, record = %orphan, "ignoring scoring record without upload");
        }
        for storage_name in &outcome.completed {
            if let Some(similarity) = snapshot
                .uploads
                .iter()
                .find(|upload| &upload.storage_name == storage_name)
                .and_then(UploadRecord::similarity)
            {
                store
                    .mark_upload_completed(participant_id.as_str(), storage_name, similarity)
                    .await?;
            }
        }
        if !outcome.completed.is_empty() {
            info!(
                participant = %participant_id,
                completed = outcome.completed.len(),
                "reconciled uploads on load"
            );
        }

        handle.replace_pending(pending_names(&snapshot.uploads));
        snapshot
    };

    let rules = state.config().rules();
    let uploads = snapshot
        .uploads
        .iter()
        .map(|record| upload_view(state, &participant_id, record))
        .collect();

    Ok(SessionView {
        participant_id: participant_id.to_string(),
        game: GameStateView::new(&snapshot.session, snapshot.uploads.len(), rules),
        uploads,
        limits: LimitsView {
            upload_cap: rules.upload_cap,
            initial_guesses: rules.initial_guesses,
            max_upload_bytes: state.config().max_upload_bytes(),
            poll_interval_ms: u64::try_from(state.config().poll_interval().as_millis())
                .unwrap_or(u64::MAX),
        },
    })
}

/// Whether a session exists for the participant; used as the login probe.
pub async fn profile_exists(
    state: &SharedState,
    raw_participant_id: &str,
) -> Result<ProfileResponse, ServiceError> {
    let participant_id = ParticipantId::parse(raw_participant_id)?;
    let store = state.require_session_store().await?;
    let exists = store.session_exists(participant_id.as_str()).await?;
    Ok(ProfileResponse {
        participant_id: participant_id.to_string(),
        exists,
    })
}

/// Drop the participant's live handle, stopping its reconciler.
///
/// Stored data is untouched; returns whether a handle was live.
pub fn teardown(state: &SharedState, raw_participant_id: &str) -> Result<bool, ServiceError> {
    let participant_id = ParticipantId::parse(raw_participant_id)?;
    let detached = state.sessions().detach(&participant_id);
    if detached {
        info!(participant = %participant_id, "session torn down");
    }
    Ok(detached)
}

/// Insert the configured development profiles that do not exist yet.
pub async fn seed_sessions(state: &SharedState) -> Result<usize, ServiceError> {
    let store = state.require_session_store().await?;
    let rules = state.config().rules();
    let mut inserted = 0;

    for seed in state.config().seed_sessions() {
        let participant_id = match ParticipantId::parse(&seed.participant_id) {
            Ok(participant_id) => participant_id,
            Err(err) => {
                warn!(participant = %seed.participant_id, error = %err, "skipping invalid seed profile");
                continue;
            }
        };
        if store.session_exists(participant_id.as_str()).await? {
            continue;
        }
        let session = Session::new(
            participant_id,
            seed.hidden_target.clone(),
            seed.hidden_target_image_url.clone(),
            rules,
        );
        store.insert_session(SessionEntity::from(session)).await?;
        inserted += 1;
    }

    if inserted > 0 {
        info!(inserted, "seeded development profiles");
    }
    Ok(inserted)
}

/// Touch the session's `updated_at` stamp before a write.
pub(crate) fn stamp(session: &mut Session) {
    session.updated_at = SystemTime::now();
}

fn pending_names(uploads: &[UploadRecord]) -> BTreeSet<String> {
    uploads
        .iter()
        .filter(|upload| upload.is_pending())
        .map(|upload| upload.storage_name.clone())
        .collect()
}
