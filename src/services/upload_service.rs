use std::{
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use tracing::{debug, info};

use crate::{
    config::AppConfig,
    dao::{blob_store::BlobStore, models::UploadEntity},
    dto::session::UploadView,
    error::ServiceError,
    multipart::FileField,
    services::{session_service, sse_events},
    state::{
        SessionHandle, SharedState,
        game::{ParticipantId, UploadRecord, UploadStatus},
        state_machine::{GameEvent, GamePhase},
    },
};

/// Fallback stem used when sanitizing leaves nothing of the original name.
const FALLBACK_FILE_NAME: &str = "upload";
const MAX_FILE_NAME_CHARS: usize = 200;

/// Source of strictly increasing millisecond prefixes for storage names.
///
/// Two uploads within the same millisecond still get distinct prefixes: the
/// clock never hands out a value lower than or equal to the previous one.
#[derive(Debug, Default)]
pub struct StorageNameClock {
    last: AtomicU64,
}

impl StorageNameClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Next prefix, at least the current wall-clock time in milliseconds.
    pub fn next_millis(&self) -> u64 {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX))
            .unwrap_or_default();
        let mut last = self.last.load(Ordering::SeqCst);
        loop {
            let candidate = now.max(last.saturating_add(1));
            match self
                .last
                .compare_exchange(last, candidate, Ordering::SeqCst, Ordering::SeqCst)
            {
                Ok(_) => return candidate,
                Err(actual) => last = actual,
            }
        }
    }

    /// `<millis>_<sanitized original>`.
    pub fn storage_name(&self, original_name: &str) -> (String, u64) {
        let millis = self.next_millis();
        (
            format!("{millis}_{}", sanitize_file_name(original_name)),
            millis,
        )
    }
}

/// Keep the final path component and replace anything unsafe for a blob name.
pub fn sanitize_file_name(original_name: &str) -> String {
    let base = original_name
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default()
        .trim();
    let cleaned: String = base
        .chars()
        .take(MAX_FILE_NAME_CHARS)
        .map(|c| if c.is_control() || c == ':' { '_' } else { c })
        .collect();

    if cleaned.is_empty() || cleaned.chars().all(|c| c == '.') {
        FALLBACK_FILE_NAME.to_owned()
    } else {
        cleaned
    }
}

/// Validates an upload and writes it to blob storage.
///
/// Holds no session state: it is safe to run concurrently for the same
/// participant, every call producing a distinct storage name.
pub struct Registrar<'a> {
    config: &'a AppConfig,
    blobs: &'a dyn BlobStore,
    clock: &'a StorageNameClock,
}

impl<'a> Registrar<'a> {
    pub fn new(
        config: &'a AppConfig,
        blobs: &'a dyn BlobStore,
        clock: &'a StorageNameClock,
    ) -> Self {
        Self {
            config,
            blobs,
            clock,
        }
    }

    /// Check size and content type before anything is written.
    pub fn validate(
        &self,
        bytes: &[u8],
        content_type: Option<&str>,
    ) -> Result<String, ServiceError> {
        if bytes.is_empty() {
            return Err(ServiceError::InvalidInput("uploaded file is empty".into()));
        }
        let limit = self.config.max_upload_bytes();
        if bytes.len() > limit {
            return Err(ServiceError::PayloadTooLarge(format!(
                "file of {} bytes exceeds the {limit} byte limit",
                bytes.len()
            )));
        }
        match content_type.map(str::trim).filter(|ct| !ct.is_empty()) {
            Some(content_type) if self.config.is_allowed_content_type(content_type) => {
                Ok(content_type.to_ascii_lowercase())
            }
            Some(content_type) => Err(ServiceError::InvalidInput(format!(
                "unsupported content type `{content_type}`"
            ))),
            None => Err(ServiceError::InvalidInput(
                "missing content type on uploaded file".into(),
            )),
        }
    }

    /// Validate and store the blob, returning a `processing` record.
    ///
    /// The blob write is acknowledged before returning; scoring is never awaited.
    pub async fn register(
        &self,
        participant_id: &ParticipantId,
        bytes: Vec<u8>,
        original_name: &str,
        content_type: Option<&str>,
    ) -> Result<UploadRecord, ServiceError> {
        let content_type = self.validate(&bytes, content_type)?;
        let (storage_name, millis) = self.clock.storage_name(original_name);
        let size_bytes = bytes.len() as u64;

        let blob_uri = self
            .blobs
            .put_blob(participant_id.as_str(), &storage_name, bytes, &content_type)
            .await?;
        debug!(participant = %participant_id, storage_name = %storage_name, "blob stored");

        Ok(UploadRecord {
            storage_name,
            display_name: original_name.trim().to_owned(),
            blob_uri,
            content_type,
            size_bytes,
            created_at: UNIX_EPOCH + Duration::from_millis(millis),
            status: UploadStatus::Processing,
        })
    }
}

/// Accept an image for the participant's current game.
///
/// The phase and cap are checked before the blob write and again under the
/// session gate before the record is persisted.
pub async fn register_upload(
    state: &SharedState,
    raw_participant_id: &str,
    file: FileField,
) -> Result<UploadView, ServiceError> {
    let participant_id = ParticipantId::parse(raw_participant_id)?;
    let store = state.require_session_store().await?;
    let rules = *state.config().rules();

    let snapshot = session_service::fetch_game(&store, &participant_id).await?;
    snapshot.progress().plan(GameEvent::UploadRegistered, &rules)?;

    let registrar = Registrar::new(
        state.config(),
        state.blob_store().as_ref(),
        state.storage_names(),
    );
    let original_name = file
        .file_name
        .as_deref()
        .unwrap_or(FALLBACK_FILE_NAME)
        .to_owned();
    let record = registrar
        .register(
            &participant_id,
            file.data,
            &original_name,
            file.content_type.as_deref(),
        )
        .await?;

    let handle = session_service::ensure_handle(state, &snapshot).await;
    commit_upload(state, &handle, snapshot.session.game_epoch, record).await
}

/// Persist a registered upload into the game it was started in.
///
/// Runs under the session gate. The upload is refused when a reset moved the
/// session past `started_epoch` or the cap was reached meanwhile; its blob is
/// then left orphaned.
async fn commit_upload(
    state: &SharedState,
    handle: &Arc<SessionHandle>,
    started_epoch: u64,
    record: UploadRecord,
) -> Result<UploadView, ServiceError> {
    let participant_id = handle.participant_id();
    let store = state.require_session_store().await?;
    let rules = *state.config().rules();
    let _gate = handle.lock().await;

    let snapshot = session_service::fetch_game(&store, participant_id).await?;
    if snapshot.session.game_epoch != started_epoch {
        debug!(
            participant = %participant_id,
            storage_name = %record.storage_name,
            "game was reset during the upload; refusing it"
        );
        return Err(ServiceError::InvalidState(
            "the game was reset while the upload was in progress".into(),
        ));
    }
    let progress = snapshot.progress();
    if progress.phase(&rules) != GamePhase::Uploading {
        return Err(ServiceError::InvalidState(format!(
            "upload limit of {} reached",
            rules.upload_cap
        )));
    }
    progress.plan(GameEvent::UploadRegistered, &rules)?;

    store
        .insert_upload(participant_id.as_str(), UploadEntity::from(record.clone()))
        .await?;

    handle.touch();
    handle.add_pending(record.storage_name.clone());
    session_service::ensure_reconciler(state, handle);

    info!(
        participant = %participant_id,
        storage_name = %record.storage_name,
        upload_count = progress.upload_count + 1,
        "upload registered"
    );

    let view = session_service::upload_view(state, participant_id, &record);
    sse_events::broadcast_upload_registered(handle, view.clone());
    Ok(view)
}
