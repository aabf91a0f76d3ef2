#[cfg(feature = "couch-store")]
pub mod couchdb;
pub mod memory;
#[cfg(feature = "mongo-store")]
pub mod mongodb;

use std::collections::HashSet;

use crate::dao::models::{
    Revision, ScoringRecordEntity, SessionEntity, UploadEntity, Versioned,
};
use crate::dao::storage::StorageResult;
use futures::future::BoxFuture;

/// Abstraction over the record store holding participant sessions, their
/// uploads and the scoring records appended by the inference worker.
///
/// Every participant is an isolated namespace; no method touches more than one.
pub trait SessionStore: Send + Sync {
    /// Existence probe used before a session is considered loadable.
    fn session_exists(&self, participant_id: &str) -> BoxFuture<'static, StorageResult<bool>>;
    fn find_session(
        &self,
        participant_id: &str,
    ) -> BoxFuture<'static, StorageResult<Option<Versioned<SessionEntity>>>>;
    /// Replace the session if its revision still matches, returning the new revision.
    ///
    /// Fails with [`StorageError::Conflict`](crate::dao::storage::StorageError::Conflict)
    /// on a stale revision and `Missing` when the session is gone.
    fn update_session(
        &self,
        session: Versioned<SessionEntity>,
    ) -> BoxFuture<'static, StorageResult<Revision>>;
    /// Create a session document. Only used for seeding; sessions are created out of band.
    fn insert_session(&self, session: SessionEntity) -> BoxFuture<'static, StorageResult<()>>;
    fn list_uploads(&self, participant_id: &str)
    -> BoxFuture<'static, StorageResult<Vec<UploadEntity>>>;
    fn insert_upload(
        &self,
        participant_id: &str,
        upload: UploadEntity,
    ) -> BoxFuture<'static, StorageResult<()>>;
    /// Promote an upload to completed. Returns `false` when the upload no longer exists.
    fn mark_upload_completed(
        &self,
        participant_id: &str,
        storage_name: &str,
        similarity: f64,
    ) -> BoxFuture<'static, StorageResult<bool>>;
    fn delete_uploads(&self, participant_id: &str) -> BoxFuture<'static, StorageResult<()>>;
    /// List scoring records, optionally restricted to the given storage names.
    fn list_scoring_records(
        &self,
        participant_id: &str,
        filenames: Option<&HashSet<String>>,
    ) -> BoxFuture<'static, StorageResult<Vec<ScoringRecordEntity>>>;
    fn delete_scoring_records(&self, participant_id: &str)
    -> BoxFuture<'static, StorageResult<()>>;
    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>>;
    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>>;
}
