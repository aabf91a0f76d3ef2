pub mod game;
pub mod session;
mod sse;
pub mod state_machine;

use std::sync::Arc;

use tokio::sync::{RwLock, watch};

use crate::{
    config::AppConfig,
    dao::{blob_store::BlobStore, session_store::SessionStore},
    error::ServiceError,
    services::upload_service::StorageNameClock,
};

pub use self::session::{SessionHandle, SessionRegistry};
pub use self::sse::SseHub;

pub type SharedState = Arc<AppState>;

/// Central application state holding the storage handles and live sessions.
pub struct AppState {
    session_store: RwLock<Option<Arc<dyn SessionStore>>>,
    blob_store: Arc<dyn BlobStore>,
    config: AppConfig,
    sessions: SessionRegistry,
    storage_names: StorageNameClock,
    degraded: watch::Sender<bool>,
}

impl AppState {
    /// Construct a new [`AppState`] wrapped in an [`Arc`] so it can be cloned cheaply.
    ///
    /// The application starts in degraded mode until a record store is installed.
    pub fn new(config: AppConfig, blob_store: Arc<dyn BlobStore>) -> SharedState {
        let (degraded_tx, _rx) = watch::channel(true);
        Arc::new(Self {
            session_store: RwLock::new(None),
            blob_store,
            config,
            sessions: SessionRegistry::new(),
            storage_names: StorageNameClock::new(),
            degraded: degraded_tx,
        })
    }

    /// Obtain a handle to the current record store, if one is installed.
    pub async fn session_store(&self) -> Option<Arc<dyn SessionStore>> {
        let guard = self.session_store.read().await;
        guard.as_ref().cloned()
    }

    /// Obtain the record store or fail with [`ServiceError::Degraded`].
    pub async fn require_session_store(&self) -> Result<Arc<dyn SessionStore>, ServiceError> {
        self.session_store().await.ok_or(ServiceError::Degraded)
    }

    /// Install a new record store implementation and leave degraded mode.
    pub async fn install_session_store(&self, store: Arc<dyn SessionStore>) {
        {
            let mut guard = self.session_store.write().await;
            *guard = Some(store);
        }
        self.update_degraded(false);
    }

    /// Remove the current record store and enter degraded mode.
    pub async fn clear_session_store(&self) {
        {
            let mut guard = self.session_store.write().await;
            guard.take();
        }
        self.update_degraded(true);
    }

    /// Current degraded flag.
    pub async fn is_degraded(&self) -> bool {
        let guard = self.session_store.read().await;
        guard.is_none()
    }

    /// Subscribe to degraded mode updates.
    pub fn degraded_watcher(&self) -> watch::Receiver<bool> {
        self.degraded.subscribe()
    }

    pub fn blob_store(&self) -> &Arc<dyn BlobStore> {
        &self.blob_store
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Handles of the sessions live in this process.
    pub fn sessions(&self) -> &SessionRegistry {
        &self.sessions
    }

    /// Process-wide source of strictly increasing storage-name prefixes.
    pub fn storage_names(&self) -> &StorageNameClock {
        &self.storage_names
    }

    /// Update and broadcast the degraded flag when the value changes.
    fn update_degraded(&self, value: bool) {
        self.degraded.send_if_modified(|current| {
            if *current == value {
                false
            } else {
                *current = value;
                true
            }
        });
    }
}
