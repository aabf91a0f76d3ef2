//! Joins scoring records written by the inference worker to pending uploads.

use std::{
    collections::{BTreeSet, HashMap, HashSet},
    sync::{Arc, Weak},
};

use tokio::{
    task::JoinHandle,
    time::{Instant, MissedTickBehavior, interval_at},
};
use tracing::{debug, info, warn};

use crate::{
    dao::{session_store::SessionStore, storage::StorageResult},
    dto::{
        poll::{PollResponse, PollStatus},
        session::UploadView,
    },
    error::ServiceError,
    services::{session_service, sse_events},
    state::{
        AppState, SessionHandle, SharedState,
        game::{ParticipantId, ScoringRecord, UploadRecord, UploadStatus},
    },
};

const MIN_SIMILARITY: f64 = 0.0;
const MAX_SIMILARITY: f64 = 100.0;

/// Result of joining scoring records onto uploads.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Reconciliation {
    /// Storage names promoted to completed, in upload order.
    pub completed: Vec<String>,
    /// Ids of records whose filename matches no upload.
    pub orphaned: Vec<String>,
}

/// Fetch the scoring records for the given storage names.
///
/// An empty set issues no store request.
pub async fn poll_once(
    store: &dyn SessionStore,
    participant_id: &ParticipantId,
    pending: &BTreeSet<String>,
) -> StorageResult<Vec<ScoringRecord>> {
    if pending.is_empty() {
        return Ok(Vec::new());
    }
    let filter: HashSet<String> = pending.iter().cloned().collect();
    let records = store
        .list_scoring_records(participant_id.as_str(), Some(&filter))
        .await?;
    Ok(records.into_iter().map(ScoringRecord::from).collect())
}

/// Promote pending uploads that have a scoring record.
///
/// The join is exact equality between `storage_name` and the record's
/// filename. Uploads already completed are left alone, so applying the same
/// records twice changes nothing. Scores are clamped to 0-100; a record with a
/// non-finite score is ignored.
pub fn reconcile(uploads: &mut [UploadRecord], records: &[ScoringRecord]) -> Reconciliation {
    let index: HashMap<String, usize> = uploads
        .iter()
        .enumerate()
        .map(|(position, upload)| (upload.storage_name.clone(), position))
        .collect();

    let mut promoted = Vec::new();
    let mut orphaned = Vec::new();
    for record in records {
        let Some(&position) = index.get(record.matched_filename.as_str()) else {
            orphaned.push(record.id.clone());
            continue;
        };
        if !record.score.is_finite() {
            warn!(record = %record.id, "ignoring scoring record with non-finite score");
            continue;
        }
        let upload = &mut uploads[position];
        if upload.is_pending() {
            upload.status = UploadStatus::Completed {
                similarity: record.score.clamp(MIN_SIMILARITY, MAX_SIMILARITY),
            };
            promoted.push(position);
        }
    }

    promoted.sort_unstable();
    Reconciliation {
        completed: promoted
            .into_iter()
            .map(|position| uploads[position].storage_name.clone())
            .collect(),
        orphaned,
    }
}

/// Run one poll for the session and apply its results.
///
/// `requested` narrows the poll to names the caller still considers pending;
/// `None` polls the whole pending set. Failures are logged and reported in the
/// status, never returned.
pub async fn poll_and_reconcile(
    state: &SharedState,
    handle: &SessionHandle,
    requested: Option<&BTreeSet<String>>,
) -> PollResponse {
    let participant_id = handle.participant_id();
    let Some(_poll) = handle.try_begin_poll() else {
        debug!(participant = %participant_id, "poll already in flight; skipping");
        return response(PollStatus::Skipped, Vec::new(), handle);
    };

    let names: BTreeSet<String> = match requested {
        Some(requested) => handle.pending().intersection(requested).cloned().collect(),
        None => handle.pending(),
    };
    if names.is_empty() {
        return response(PollStatus::Idle, Vec::new(), handle);
    }

    match apply_poll(state, handle, &names).await {
        Ok(completed) => response(PollStatus::Fetched, completed, handle),
        Err(err) => {
            warn!(participant = %participant_id, error = %err, "scoring poll failed; retrying next tick");
            response(PollStatus::Failed, Vec::new(), handle)
        }
    }
}

async fn apply_poll(
    state: &SharedState,
    handle: &SessionHandle,
    names: &BTreeSet<String>,
) -> Result<Vec<UploadView>, ServiceError> {
    let participant_id = handle.participant_id();
    let epoch = handle.epoch();
    let store = state.require_session_store().await?;

    let records = poll_once(store.as_ref(), participant_id, names).await?;
    if records.is_empty() {
        return Ok(Vec::new());
    }

    let _gate = handle.lock().await;
    if handle.epoch() != epoch {
        debug!(participant = %participant_id, "game was reset during the poll; discarding results");
        return Ok(Vec::new());
    }

    let mut uploads: Vec<UploadRecord> = store
        .list_uploads(participant_id.as_str())
        .await?
        .into_iter()
        .map(UploadRecord::from)
        .filter(|upload| names.contains(&upload.storage_name))
        .collect();
    let outcome = reconcile(&mut uploads, &records);

    let mut completed = Vec::with_capacity(outcome.completed.len());
    for upload in uploads
        .iter()
        .filter(|upload| outcome.completed.contains(&upload.storage_name))
    {
        let Some(similarity) = upload.similarity() else {
            continue;
        };
        let updated = store
            .mark_upload_completed(participant_id.as_str(), &upload.storage_name, similarity)
            .await?;
        if updated {
            completed.push(upload);
        } else {
            debug!(participant = %participant_id, storage_name = %upload.storage_name, "upload vanished before completion");
        }
    }
    handle.remove_pending(completed.iter().map(|upload| upload.storage_name.as_str()));

    let views: Vec<_> = completed
        .into_iter()
        .map(|upload| session_service::upload_view(state, participant_id, upload))
        .collect();
    if !views.is_empty() {
        info!(participant = %participant_id, completed = views.len(), "uploads scored");
    }
    for view in &views {
        sse_events::broadcast_upload_completed(handle, view.clone());
    }
    Ok(views)
}

fn response(
    status: PollStatus,
    completed: Vec<UploadView>,
    handle: &SessionHandle,
) -> PollResponse {
    PollResponse {
        status,
        completed,
        pending: handle.pending().into_iter().collect(),
    }
}

/// Client-triggered poll; shares the single in-flight slot with the background task.
pub async fn poll_results(
    state: &SharedState,
    raw_participant_id: &str,
    pending: Vec<String>,
) -> Result<PollResponse, ServiceError> {
    let participant_id = ParticipantId::parse(raw_participant_id)?;
    let requested: BTreeSet<String> = pending.into_iter().collect();
    if requested.is_empty() {
        let pending = state
            .sessions()
            .get(&participant_id)
            .map(|handle| handle.pending().into_iter().collect())
            .unwrap_or_default();
        return Ok(PollResponse {
            status: PollStatus::Idle,
            completed: Vec::new(),
            pending,
        });
    }

    let handle = session_service::attach(state, &participant_id).await?;
    Ok(poll_and_reconcile(state, &handle, Some(&requested)).await)
}

/// Spawn the periodic reconciler bound to `handle`.
///
/// The task sleeps while the pending set is empty. Once it becomes non-empty
/// the first poll runs one period later, then every period until the set
/// drains. Ticks that fall behind are skipped rather than bunched up.
pub fn spawn_reconciler(state: &SharedState, handle: &Arc<SessionHandle>) -> JoinHandle<()> {
    let period = state.config().poll_interval();
    let state: Weak<AppState> = Arc::downgrade(state);
    let weak_handle = Arc::downgrade(handle);
    let mut pending = handle.watch_pending();

    tokio::spawn(async move {
        loop {
            if pending.wait_for(|names| !names.is_empty()).await.is_err() {
                return;
            }

            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                let (Some(state), Some(handle)) = (state.upgrade(), weak_handle.upgrade()) else {
                    return;
                };
                poll_and_reconcile(&state, &handle, None).await;
                if !handle.has_pending() {
                    break;
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::AppConfig,
        dao::{
            blob_store::{UrlSigner, memory::MemoryBlobStore},
            models::UploadEntity,
            session_store::memory::MemorySessionStore,
        },
        state::{game::Session, state_machine::GameRules},
    };
    use std::time::{Duration, SystemTime};

    fn upload(name: &str) -> UploadRecord {
        UploadRecord {
            storage_name: name.into(),
            display_name: name.into(),
            blob_uri: format!("mem://demo/{name}"),
            content_type: "image/png".into(),
            size_bytes: 1,
            created_at: SystemTime::UNIX_EPOCH,
            status: UploadStatus::Processing,
        }
    }

    fn record(id: &str, name: &str, score: f64) -> ScoringRecord {
        ScoringRecord {
            id: id.into(),
            matched_filename: name.into(),
            score,
            produced_at: SystemTime::UNIX_EPOCH,
            blob_uri: None,
        }
    }

    #[test]
    fn reconciliation_is_idempotent() {
        let mut uploads = vec![upload("1_a.png"), upload("2_b.png")];
        let records = vec![record("r1", "1_a.png", 87.5)];

        let first = reconcile(&mut uploads, &records);
        assert_eq!(first.completed, vec!["1_a.png".to_owned()]);
        let after_first = uploads.clone();

        let second = reconcile(&mut uploads, &records);
        assert!(second.completed.is_empty());
        assert_eq!(uploads, after_first);
        assert_eq!(uploads[0].similarity(), Some(87.5));
        assert!(uploads[1].is_pending());
    }

    #[test]
    fn join_is_exact_on_storage_name() {
        let mut uploads = vec![upload("1_cat.jpg")];
        let records = vec![
            record("r1", "cat.jpg", 50.0),
            record("r2", "1_CAT.jpg", 50.0),
            record("r3", "1_cat.jpg ", 50.0),
        ];
        let outcome = reconcile(&mut uploads, &records);
        assert!(outcome.completed.is_empty());
        assert_eq!(outcome.orphaned, vec!["r1", "r2", "r3"]);
        assert!(uploads[0].is_pending());
    }

    #[test]
    fn scores_are_clamped_and_nan_is_ignored() {
        let mut uploads = vec![upload("1_a.png"), upload("2_b.png"), upload("3_c.png")];
        let records = vec![
            record("r1", "1_a.png", 140.0),
            record("r2", "2_b.png", -3.0),
            record("r3", "3_c.png", f64::NAN),
        ];
        let outcome = reconcile(&mut uploads, &records);
        assert_eq!(outcome.completed.len(), 2);
        assert_eq!(uploads[0].similarity(), Some(100.0));
        assert_eq!(uploads[1].similarity(), Some(0.0));
        assert!(uploads[2].is_pending());
    }

    async fn fixture(
        poll_interval: Duration,
    ) -> (SharedState, MemorySessionStore, Arc<SessionHandle>) {
        let config = AppConfig::default().with_poll_interval(poll_interval);
        let blobs = Arc::new(MemoryBlobStore::new(UrlSigner::new(b"k", "http://x")));
        let state = AppState::new(config, blobs);
        let store = MemorySessionStore::new();
        state.install_session_store(Arc::new(store.clone())).await;

        let id = ParticipantId::parse("demo").unwrap();
        let session = Session::new(id.clone(), "lion", "/images/lion.jpg", &GameRules::default());
        store.insert_session(session.into()).await.unwrap();
        let handle = session_service::attach(&state, &id).await.unwrap();
        (state, store, handle)
    }

    #[tokio::test(start_paused = true)]
    async fn reconciler_is_silent_while_nothing_is_pending() {
        let (state, store, handle) = fixture(Duration::from_secs(3)).await;
        handle.attach_reconciler(spawn_reconciler(&state, &handle));

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(store.scoring_query_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn reconciler_polls_at_the_configured_cadence_until_drained() {
        let (state, store, handle) = fixture(Duration::from_secs(3)).await;
        let name = "1700000000000_cat.jpg";
        store
            .insert_upload("demo", UploadEntity::from(upload(name)))
            .await
            .unwrap();
        handle.attach_reconciler(spawn_reconciler(&state, &handle));
        handle.add_pending(name);

        // Ticks at 3s, 6s and 9s.
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(store.scoring_query_count(), 3);

        store.append_scoring_record("demo", name, 72.0);
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(store.scoring_query_count(), 4);
        assert!(!handle.has_pending());

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(store.scoring_query_count(), 4);

        let uploads = store.list_uploads("demo").await.unwrap();
        assert_eq!(uploads[0].similarity, Some(72.0));
    }

    #[tokio::test(start_paused = true)]
    async fn torn_down_sessions_stop_polling() {
        let (state, store, handle) = fixture(Duration::from_secs(3)).await;
        handle.attach_reconciler(spawn_reconciler(&state, &handle));
        handle.add_pending("1_a.png");

        tokio::time::sleep(Duration::from_secs(4)).await;
        assert_eq!(store.scoring_query_count(), 1);

        state
            .sessions()
            .detach(&ParticipantId::parse("demo").unwrap());
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(store.scoring_query_count(), 1);
    }

    #[tokio::test]
    async fn overlapping_polls_are_skipped() {
        let (state, store, handle) = fixture(Duration::from_secs(3)).await;
        handle.add_pending("1_a.png");

        let _in_flight = handle.try_begin_poll().unwrap();
        let response = poll_and_reconcile(&state, &handle, None).await;
        assert_eq!(response.status, PollStatus::Skipped);
        assert_eq!(store.scoring_query_count(), 0);
    }

    #[tokio::test]
    async fn poll_failures_are_reported_not_raised() {
        let (state, store, handle) = fixture(Duration::from_secs(3)).await;
        handle.add_pending("1_a.png");
        store.set_online(false);

        let response = poll_and_reconcile(&state, &handle, None).await;
        assert_eq!(response.status, PollStatus::Failed);
        assert_eq!(response.pending, vec!["1_a.png".to_owned()]);
    }

    #[tokio::test]
    async fn results_from_a_previous_game_are_discarded() {
        let (state, store, handle) = fixture(Duration::from_secs(3)).await;
        let name = "1_a.png";
        store
            .insert_upload("demo", UploadEntity::from(upload(name)))
            .await
            .unwrap();
        store.append_scoring_record("demo", name, 10.0);
        handle.add_pending(name);

        // Hold the gate so the poll fetches, then waits while the epoch moves on.
        let gate = handle.lock().await;
        let poll = tokio::spawn({
            let state = state.clone();
            let handle = handle.clone();
            async move { poll_and_reconcile(&state, &handle, None).await }
        });
        tokio::task::yield_now().await;
        handle.set_epoch(1);
        drop(gate);

        let response = poll.await.unwrap();
        assert!(response.completed.is_empty());
        let uploads = store.list_uploads("demo").await.unwrap();
        assert_eq!(uploads[0].similarity, None);
    }
}
