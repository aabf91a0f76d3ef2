//! Mystery Animal Back binary entrypoint wiring REST, SSE, record store and blob storage layers.

use std::{env, net::SocketAddr, sync::Arc, time::Duration};

use anyhow::{Context, bail};
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use mystery_animal_back::{
    build_router,
    config::AppConfig,
    dao::{
        blob_store::{BlobStore, UrlSigner, filesystem::FsBlobStore},
        session_store::{SessionStore, memory::MemorySessionStore},
        storage::StorageError,
    },
    services::{session_service, storage_supervisor},
    state::{AppState, SharedState},
};

const DEFAULT_PORT: u16 = 8080;
const DEFAULT_BLOB_ROOT: &str = "data/blobs";
const IDLE_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Record store selected through `STORE_BACKEND`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StoreBackend {
    Memory,
    #[cfg(feature = "couch-store")]
    Couch,
    #[cfg(feature = "mongo-store")]
    Mongo,
}

impl StoreBackend {
    fn from_env() -> anyhow::Result<Self> {
        let raw = env::var("STORE_BACKEND").unwrap_or_else(|_| "memory".into());
        match raw.trim().to_ascii_lowercase().as_str() {
            "" | "memory" => Ok(Self::Memory),
            #[cfg(feature = "couch-store")]
            "couch" | "couchdb" => Ok(Self::Couch),
            #[cfg(feature = "mongo-store")]
            "mongo" | "mongodb" => Ok(Self::Mongo),
            other => bail!("unsupported STORE_BACKEND `{other}`"),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = AppConfig::load();
    let port = env::var("PORT")
        .or_else(|_| env::var("SERVER_PORT"))
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(DEFAULT_PORT);

    let blob_store = build_blob_store(port);
    let app_state = AppState::new(config, blob_store);

    let backend = StoreBackend::from_env()?;
    info!(?backend, "selected record store backend");
    spawn_store_supervisor(app_state.clone(), backend);
    tokio::spawn(run_idle_sweeper(app_state.clone()));

    let app = build_router(app_state.clone());

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!(%addr, "starting server");

    let listener = TcpListener::bind(addr).await.context("binding server")?;
    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serving axum")?;

    app_state.sessions().shutdown_all();
    Ok(())
}

/// Filesystem blob store with read URLs signed by `BLOB_SIGNING_KEY`.
fn build_blob_store(port: u16) -> Arc<dyn BlobStore> {
    let root = env::var("BLOB_ROOT").unwrap_or_else(|_| DEFAULT_BLOB_ROOT.into());
    let public_base =
        env::var("BLOB_PUBLIC_URL").unwrap_or_else(|_| format!("http://localhost:{port}"));

    let signer = match env::var("BLOB_SIGNING_KEY") {
        Ok(key) if !key.is_empty() => UrlSigner::new(key, &public_base),
        _ => {
            warn!("BLOB_SIGNING_KEY not set; read URLs will not survive a restart");
            UrlSigner::ephemeral(&public_base)
        }
    };
    info!(root = %root, public_base = %public_base, "blob store ready");
    Arc::new(FsBlobStore::new(root, signer))
}

/// Run the storage supervisor for the selected backend.
///
/// The memory backend is seeded with the configured development profiles once installed.
fn spawn_store_supervisor(state: SharedState, backend: StoreBackend) {
    match backend {
        StoreBackend::Memory => {
            let store = MemorySessionStore::new();
            tokio::spawn(storage_supervisor::run(state.clone(), move || {
                let store: Arc<dyn SessionStore> = Arc::new(store.clone());
                async move { Ok::<_, StorageError>(store) }
            }));
            tokio::spawn(seed_when_ready(state));
        }
        #[cfg(feature = "couch-store")]
        StoreBackend::Couch => {
            use mystery_animal_back::dao::session_store::couchdb::{
                CouchConfig, CouchSessionStore,
            };
            tokio::spawn(storage_supervisor::run(state, || async {
                let config = CouchConfig::from_env()?;
                let store = CouchSessionStore::connect(config).await?;
                Ok::<Arc<dyn SessionStore>, StorageError>(Arc::new(store))
            }));
        }
        #[cfg(feature = "mongo-store")]
        StoreBackend::Mongo => {
            use mystery_animal_back::dao::session_store::mongodb::{
                MongoConfig, MongoSessionStore,
            };
            tokio::spawn(storage_supervisor::run(state, || async {
                let config = MongoConfig::from_env().await?;
                let store = MongoSessionStore::connect(config).await?;
                Ok::<Arc<dyn SessionStore>, StorageError>(Arc::new(store))
            }));
        }
    }
}

/// Insert the development profiles as soon as a store is installed.
async fn seed_when_ready(state: SharedState) {
    let mut degraded = state.degraded_watcher();
    if degraded.wait_for(|degraded| !degraded).await.is_err() {
        return;
    }
    if let Err(err) = session_service::seed_sessions(&state).await {
        warn!(error = %err, "failed to seed development profiles");
    }
}

/// Periodically drop session handles nobody used for `session_idle_timeout`.
async fn run_idle_sweeper(state: SharedState) {
    let timeout = state.config().session_idle_timeout();
    let mut ticker = tokio::time::interval(IDLE_SWEEP_INTERVAL);
    loop {
        ticker.tick().await;
        let evicted = state.sessions().evict_idle(timeout);
        if !evicted.is_empty() {
            info!(evicted = evicted.len(), "evicted idle sessions");
        }
    }
}

/// Configure tracing subscribers so logs include spans by default.
fn init_tracing() {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,tower_http=debug".into());
    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Wait for Ctrl+C or SIGTERM and shut the server down gracefully.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {},
                    _ = term.recv() => {},
                }
            }
            Err(err) => {
                warn!(error = %err, "failed to install SIGTERM handler; waiting for Ctrl+C only");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
