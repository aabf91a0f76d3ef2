use std::{future::Future, sync::Arc, time::Duration};

use tokio::time::sleep;
use tracing::{info, warn};

use crate::{
    dao::{session_store::SessionStore, storage::StorageError},
    state::SharedState,
};

const INITIAL_DELAY: Duration = Duration::from_millis(1_000);
const MAX_DELAY: Duration = Duration::from_secs(10);
const HEALTH_POLL_INTERVAL: Duration = Duration::from_secs(5);
const MAX_RECONNECT_ATTEMPTS: u32 = 3;

/// Keep a record store installed, falling back to degraded mode while it is unreachable.
///
/// `connect` is retried with exponential back-off until it yields a store; the
/// store is then health-checked periodically. A failed check uninstalls it and
/// tries to reconnect in place before starting over with a fresh connection.
pub async fn run<F, Fut>(state: SharedState, mut connect: F)
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = Result<Arc<dyn SessionStore>, StorageError>> + Send,
{
    let mut delay = INITIAL_DELAY;

    loop {
        match connect().await {
            Ok(store) => {
                state.install_session_store(store.clone()).await;
                info!("record store connected; leaving degraded mode");
                delay = INITIAL_DELAY;

                supervise(&state, &store).await;

                sleep(delay).await;
                delay = (delay * 2).min(MAX_DELAY);
            }
            Err(err) => {
                warn!(error = %err, "record store connection attempt failed");
                sleep(delay).await;
                delay = (delay * 2).min(MAX_DELAY);
            }
        }
    }
}

/// Health-check an installed store; returns once reconnecting in place gave up.
async fn supervise(state: &SharedState, store: &Arc<dyn SessionStore>) {
    loop {
        if store.health_check().await.is_ok() {
            sleep(HEALTH_POLL_INTERVAL).await;
            continue;
        }

        let mut reconnect_delay = INITIAL_DELAY;
        let mut reconnected = false;
        for attempt in 0..MAX_RECONNECT_ATTEMPTS {
            match store.try_reconnect().await {
                Ok(()) => {
                    reconnected = true;
                    break;
                }
                Err(err) => {
                    if attempt == 0 {
                        warn!(attempt, error = %err, "record store unreachable; entering degraded mode");
                        state.clear_session_store().await;
                    } else {
                        warn!(attempt, error = %err, "record store reconnect attempt failed");
                    }
                    sleep(reconnect_delay).await;
                    reconnect_delay = (reconnect_delay * 2).min(MAX_DELAY);
                }
            }
        }

        if !reconnected {
            warn!("exhausted record store reconnect attempts; staying in degraded mode");
            state.clear_session_store().await;
            return;
        }

        if state.is_degraded().await {
            info!("record store reconnected; leaving degraded mode");
            state.install_session_store(store.clone()).await;
        }
        sleep(HEALTH_POLL_INTERVAL).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::AppConfig,
        dao::{
            blob_store::{UrlSigner, memory::MemoryBlobStore},
            session_store::memory::MemorySessionStore,
        },
        state::AppState,
    };

    #[tokio::test(start_paused = true)]
    async fn outages_toggle_degraded_mode() {
        let blobs = Arc::new(MemoryBlobStore::new(UrlSigner::new(b"k", "http://x")));
        let state = AppState::new(AppConfig::default(), blobs);
        let store = MemorySessionStore::new();
        assert!(state.is_degraded().await);

        let connect_store = store.clone();
        tokio::spawn(run(state.clone(), move || {
            let store: Arc<dyn SessionStore> = Arc::new(connect_store.clone());
            async move { Ok(store) }
        }));
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!state.is_degraded().await);

        // Health check at 5s fails, first reconnect attempt fails at once.
        store.set_online(false);
        tokio::time::sleep(Duration::from_millis(5_500)).await;
        assert!(state.is_degraded().await);

        // Back online before the retry scheduled at 6s.
        store.set_online(true);
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert!(!state.is_degraded().await);
    }
}
