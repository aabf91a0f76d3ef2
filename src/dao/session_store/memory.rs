//! Process-local [`SessionStore`] used for development and tests.

use std::{
    collections::{HashMap, HashSet},
    sync::{
        Arc, PoisonError, RwLock,
        atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
    },
    time::SystemTime,
};

use futures::future::BoxFuture;
use thiserror::Error;

use crate::dao::{
    models::{
        Revision, ScoringRecordEntity, SessionEntity, UploadEntity, UploadStatusEntity, Versioned,
    },
    session_store::SessionStore,
    storage::{StorageError, StorageResult},
};

/// Failure injected when the store has been switched offline.
#[derive(Debug, Error)]
#[error("in-memory store is offline")]
pub struct MemoryStoreOffline;

#[derive(Default)]
struct Tables {
    sessions: HashMap<String, (SessionEntity, u64)>,
    uploads: HashMap<String, Vec<UploadEntity>>,
    predictions: HashMap<String, Vec<ScoringRecordEntity>>,
}

struct MemoryInner {
    tables: RwLock<Tables>,
    next_revision: AtomicU64,
    next_record: AtomicU64,
    online: AtomicBool,
    deletes_failing: AtomicBool,
    forced_conflicts: AtomicUsize,
    scoring_queries: AtomicUsize,
}

/// Record store keeping every participant namespace in a hash map.
///
/// Revisions are drawn from a process-wide counter so a stale revision can
/// never collide with a fresh one.
#[derive(Clone)]
pub struct MemorySessionStore {
    inner: Arc<MemoryInner>,
}

impl Default for MemorySessionStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemorySessionStore {
    /// Create an empty, online store.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(MemoryInner {
                tables: RwLock::new(Tables::default()),
                next_revision: AtomicU64::new(1),
                next_record: AtomicU64::new(1),
                online: AtomicBool::new(true),
                deletes_failing: AtomicBool::new(false),
                forced_conflicts: AtomicUsize::new(0),
                scoring_queries: AtomicUsize::new(0),
            }),
        }
    }

    /// Switch the store on or off; while off every operation fails as unavailable.
    pub fn set_online(&self, online: bool) {
        self.inner.online.store(online, Ordering::SeqCst);
    }

    /// Make upload and scoring record deletes fail as unavailable.
    pub fn set_deletes_failing(&self, failing: bool) {
        self.inner.deletes_failing.store(failing, Ordering::SeqCst);
    }

    /// Reject the next `count` session updates with a revision conflict.
    pub fn force_conflicts(&self, count: usize) {
        self.inner.forced_conflicts.store(count, Ordering::SeqCst);
    }

    /// Number of scoring record queries served so far.
    pub fn scoring_query_count(&self) -> usize {
        self.inner.scoring_queries.load(Ordering::SeqCst)
    }

    /// Append a scoring record the way the external inference worker does.
    ///
    /// Returns the generated record id.
    pub fn append_scoring_record(
        &self,
        participant_id: &str,
        matched_filename: &str,
        score: f64,
    ) -> String {
        let id = format!(
            "rec-{}",
            self.inner.next_record.fetch_add(1, Ordering::SeqCst)
        );
        let record = ScoringRecordEntity {
            id: id.clone(),
            participant_id: participant_id.to_owned(),
            matched_filename: matched_filename.to_owned(),
            score,
            produced_at: SystemTime::now(),
            blob_uri: None,
        };
        self.write()
            .predictions
            .entry(participant_id.to_owned())
            .or_default()
            .push(record);
        id
    }

    fn check_online(&self) -> StorageResult<()> {
        if self.inner.online.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StorageError::unavailable(
                "in-memory store switched offline".to_owned(),
                MemoryStoreOffline,
            ))
        }
    }

    fn check_deletes(&self) -> StorageResult<()> {
        if self.inner.deletes_failing.load(Ordering::SeqCst) {
            Err(StorageError::unavailable(
                "in-memory store refused the delete".to_owned(),
                MemoryStoreOffline,
            ))
        } else {
            Ok(())
        }
    }

    fn take_forced_conflict(&self) -> bool {
        self.inner
            .forced_conflicts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Tables> {
        self.inner.tables.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Tables> {
        self.inner
            .tables
            .write()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn bump_revision(&self) -> u64 {
        self.inner.next_revision.fetch_add(1, Ordering::SeqCst)
    }

    fn run<T, F>(&self, op: F) -> BoxFuture<'static, StorageResult<T>>
    where
        T: Send + 'static,
        F: FnOnce(&Self) -> StorageResult<T>,
    {
        let result = self.check_online().and_then(|_| op(self));
        Box::pin(async move { result })
    }
}

impl SessionStore for MemorySessionStore {
    fn session_exists(&self, participant_id: &str) -> BoxFuture<'static, StorageResult<bool>> {
        self.run(|store| Ok(store.read().sessions.contains_key(participant_id)))
    }

    fn find_session(
        &self,
        participant_id: &str,
    ) -> BoxFuture<'static, StorageResult<Option<Versioned<SessionEntity>>>> {
        self.run(|store| {
            Ok(store
                .read()
                .sessions
                .get(participant_id)
                .map(|(session, rev)| Versioned::new(session.clone(), rev.to_string())))
        })
    }

    fn update_session(
        &self,
        session: Versioned<SessionEntity>,
    ) -> BoxFuture<'static, StorageResult<Revision>> {
        self.run(move |store| {
            let key = session.value.participant_id.clone();
            let mut tables = store.write();
            let Some((current, rev)) = tables.sessions.get_mut(&key) else {
                return Err(StorageError::missing(key));
            };
            if rev.to_string() != session.revision || store.take_forced_conflict() {
                return Err(StorageError::conflict(key));
            }
            *current = session.value;
            *rev = store.bump_revision();
            Ok(rev.to_string())
        })
    }

    fn insert_session(&self, session: SessionEntity) -> BoxFuture<'static, StorageResult<()>> {
        self.run(move |store| {
            let rev = store.bump_revision();
            let mut tables = store.write();
            if tables.sessions.contains_key(&session.participant_id) {
                return Err(StorageError::conflict(session.participant_id));
            }
            tables
                .sessions
                .insert(session.participant_id.clone(), (session, rev));
            Ok(())
        })
    }

    fn list_uploads(
        &self,
        participant_id: &str,
    ) -> BoxFuture<'static, StorageResult<Vec<UploadEntity>>> {
        self.run(|store| {
            let mut uploads = store
                .read()
                .uploads
                .get(participant_id)
                .cloned()
                .unwrap_or_default();
            uploads.sort_by_key(|upload| upload.created_at);
            Ok(uploads)
        })
    }

    fn insert_upload(
        &self,
        participant_id: &str,
        upload: UploadEntity,
    ) -> BoxFuture<'static, StorageResult<()>> {
        self.run(|store| {
            let mut tables = store.write();
            let uploads = tables.uploads.entry(participant_id.to_owned()).or_default();
            if uploads
                .iter()
                .any(|existing| existing.storage_name == upload.storage_name)
            {
                return Err(StorageError::conflict(format!(
                    "{participant_id}/{}",
                    upload.storage_name
                )));
            }
            uploads.push(upload);
            Ok(())
        })
    }

    fn mark_upload_completed(
        &self,
        participant_id: &str,
        storage_name: &str,
        similarity: f64,
    ) -> BoxFuture<'static, StorageResult<bool>> {
        self.run(|store| {
            let mut tables = store.write();
            let upload = tables
                .uploads
                .get_mut(participant_id)
                .and_then(|uploads| {
                    uploads
                        .iter_mut()
                        .find(|upload| upload.storage_name == storage_name)
                });
            Ok(match upload {
                Some(upload) => {
                    upload.status = UploadStatusEntity::Completed;
                    upload.similarity = Some(similarity);
                    true
                }
                None => false,
            })
        })
    }

    fn delete_uploads(&self, participant_id: &str) -> BoxFuture<'static, StorageResult<()>> {
        self.run(|store| {
            store.check_deletes()?;
            store.write().uploads.remove(participant_id);
            Ok(())
        })
    }

    fn list_scoring_records(
        &self,
        participant_id: &str,
        filenames: Option<&HashSet<String>>,
    ) -> BoxFuture<'static, StorageResult<Vec<ScoringRecordEntity>>> {
        self.run(|store| {
            store.inner.scoring_queries.fetch_add(1, Ordering::SeqCst);
            let tables = store.read();
            let records = tables
                .predictions
                .get(participant_id)
                .map(|records| {
                    records
                        .iter()
                        .filter(|record| {
                            filenames.is_none_or(|names| names.contains(&record.matched_filename))
                        })
                        .cloned()
                        .collect()
                })
                .unwrap_or_default();
            Ok(records)
        })
    }

    fn delete_scoring_records(
        &self,
        participant_id: &str,
    ) -> BoxFuture<'static, StorageResult<()>> {
        self.run(|store| {
            store.check_deletes()?;
            store.write().predictions.remove(participant_id);
            Ok(())
        })
    }

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        self.run(|_| Ok(()))
    }

    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>> {
        self.run(|_| Ok(()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, UNIX_EPOCH};

    fn session(id: &str) -> SessionEntity {
        SessionEntity {
            participant_id: id.into(),
            guesses_remaining: 3,
            game_complete: false,
            won: false,
            hidden_target: "lion".into(),
            hidden_target_image_url: "https://example.test/lion.jpg".into(),
            last_guess: None,
            last_guess_at: None,
            game_epoch: 0,
            created_at: UNIX_EPOCH,
            updated_at: UNIX_EPOCH,
        }
    }

    fn upload(name: &str, at: u64) -> UploadEntity {
        UploadEntity {
            storage_name: name.into(),
            display_name: name.into(),
            blob_uri: format!("mem://demo/{name}"),
            content_type: "image/png".into(),
            size_bytes: 3,
            created_at: UNIX_EPOCH + Duration::from_millis(at),
            status: UploadStatusEntity::Processing,
            similarity: None,
        }
    }

    #[tokio::test]
    async fn stale_revision_is_rejected() {
        let store = MemorySessionStore::new();
        store.insert_session(session("demo")).await.unwrap();

        let first = store.find_session("demo").await.unwrap().unwrap();
        let second = first.clone();

        let mut updated = first;
        updated.value.guesses_remaining = 2;
        store.update_session(updated).await.unwrap();

        let mut stale = second;
        stale.value.guesses_remaining = 1;
        let err = store.update_session(stale).await.unwrap_err();
        assert!(matches!(err, StorageError::Conflict { .. }));

        let current = store.find_session("demo").await.unwrap().unwrap();
        assert_eq!(current.value.guesses_remaining, 2);
    }

    #[tokio::test]
    async fn updating_an_absent_session_reports_missing() {
        let store = MemorySessionStore::new();
        let err = store
            .update_session(Versioned::new(session("ghost"), "1"))
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::Missing { .. }));
    }

    #[tokio::test]
    async fn uploads_are_listed_in_creation_order() {
        let store = MemorySessionStore::new();
        store.insert_upload("demo", upload("b", 20)).await.unwrap();
        store.insert_upload("demo", upload("a", 10)).await.unwrap();

        let names: Vec<_> = store
            .list_uploads("demo")
            .await
            .unwrap()
            .into_iter()
            .map(|u| u.storage_name)
            .collect();
        assert_eq!(names, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn completing_a_deleted_upload_is_a_no_op() {
        let store = MemorySessionStore::new();
        store.insert_upload("demo", upload("a", 1)).await.unwrap();
        store.delete_uploads("demo").await.unwrap();

        assert!(!store.mark_upload_completed("demo", "a", 50.0).await.unwrap());
        assert!(store.list_uploads("demo").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn scoring_records_are_filtered_by_filename() {
        let store = MemorySessionStore::new();
        store.append_scoring_record("demo", "a", 10.0);
        store.append_scoring_record("demo", "b", 20.0);
        store.append_scoring_record("other", "a", 30.0);

        let filter: HashSet<String> = ["a".to_owned()].into();
        let records = store
            .list_scoring_records("demo", Some(&filter))
            .await
            .unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].score, 10.0);
        assert_eq!(store.scoring_query_count(), 1);
    }

    #[tokio::test]
    async fn forced_conflicts_are_consumed_one_update_at_a_time() {
        let store = MemorySessionStore::new();
        store.insert_session(session("demo")).await.unwrap();
        store.force_conflicts(1);

        let current = store.find_session("demo").await.unwrap().unwrap();
        let err = store.update_session(current.clone()).await.unwrap_err();
        assert!(matches!(err, StorageError::Conflict { .. }));
        store.update_session(current).await.unwrap();
    }

    #[tokio::test]
    async fn failing_deletes_keep_the_data() {
        let store = MemorySessionStore::new();
        store.insert_upload("demo", upload("a", 1)).await.unwrap();
        store.set_deletes_failing(true);

        assert!(store.delete_uploads("demo").await.is_err());
        assert!(store.delete_scoring_records("demo").await.is_err());
        assert_eq!(store.list_uploads("demo").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn offline_store_fails_every_call() {
        let store = MemorySessionStore::new();
        store.set_online(false);
        assert!(matches!(
            store.session_exists("demo").await,
            Err(StorageError::Unavailable { .. })
        ));
        store.set_online(true);
        assert!(!store.session_exists("demo").await.unwrap());
    }
}
