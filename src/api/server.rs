use axum::{
    routing::{get, post},
    Router,
};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use super::handlers::{
    add_user, create_stream, delete_stream, health_check, insert_data, list_streams,
    restamp_data, stats, stream_length, stream_range, time_to_index, AppState,
};
use crate::auth::Identity;
use crate::database::Database;
use crate::service::{PidLock, SyncWorker};
use crate::storage::PersistenceConfig;

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Unset keeps everything in memory
    pub data_dir: Option<PathBuf>,
    pub sync_interval_secs: u64,
    /// Fsync every insert before acknowledging it
    pub sync_on_append: bool,
    pub transform_cache_size: u64,
    /// Registered as the `admin` identity on startup when not already known
    pub admin_key: Option<String>,
    pub force_start: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            data_dir: None,
            sync_interval_secs: 10,
            sync_on_append: false,
            transform_cache_size: 1000,
            admin_key: None,
            force_start: false,
        }
    }
}

impl ServerConfig {
    /// Read `BROOK_*` environment variables over the defaults
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            host: std::env::var("BROOK_HOST").unwrap_or(defaults.host),
            port: env_parse("BROOK_PORT").unwrap_or(defaults.port),
            data_dir: std::env::var("BROOK_DATA_DIR")
                .ok()
                .filter(|d| !d.trim().is_empty())
                .map(PathBuf::from),
            sync_interval_secs: env_parse("BROOK_SYNC_INTERVAL_SECS")
                .unwrap_or(defaults.sync_interval_secs),
            sync_on_append: env_flag("BROOK_SYNC_ON_APPEND").unwrap_or(defaults.sync_on_append),
            transform_cache_size: env_parse("BROOK_TRANSFORM_CACHE_SIZE")
                .unwrap_or(defaults.transform_cache_size),
            admin_key: std::env::var("BROOK_ADMIN_KEY")
                .ok()
                .filter(|k| !k.trim().is_empty()),
            force_start: env_flag("BROOK_FORCE_START").unwrap_or(defaults.force_start),
        }
    }

    /// Backend settings, or `None` when running in memory
    pub fn persistence_config(&self) -> Option<PersistenceConfig> {
        self.data_dir
            .as_ref()
            .map(|dir| PersistenceConfig::new(dir).with_sync_on_append(self.sync_on_append))
    }

    /// Open the database this configuration describes
    pub fn open_database(&self) -> Result<Database, crate::storage::StorageError> {
        match self.persistence_config() {
            Some(persistence) => Database::open(persistence, self.transform_cache_size),
            None => Ok(Database::in_memory(self.transform_cache_size)),
        }
    }
}

fn env_flag(name: &str) -> Option<bool> {
    std::env::var(name)
        .ok()
        .map(|v| matches!(v.trim(), "1" | "true" | "yes"))
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.trim().parse().ok())
}

/// Build the application router
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        // Health check
        .route("/health", get(health_check))
        // Administration
        .route("/stats", get(stats))
        .route("/api/v1/users", post(add_user))
        // Stream management
        .route("/api/v1/streams", get(list_streams))
        .route(
            "/api/v1/streams/:owner/:device/:stream",
            post(create_stream).delete(delete_stream),
        )
        // Stream data
        .route(
            "/api/v1/streams/:owner/:device/:stream/length",
            get(stream_length),
        )
        .route(
            "/api/v1/streams/:owner/:device/:stream/data",
            get(stream_range).post(insert_data).put(restamp_data),
        )
        .route(
            "/api/v1/streams/:owner/:device/:stream/time2index",
            get(time_to_index),
        )
        // Middleware
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}

/// Run the HTTP server
pub async fn run_server(config: ServerConfig) -> Result<(), Box<dyn std::error::Error>> {
    let _lock = match &config.data_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)?;
            Some(PidLock::acquire(dir, config.force_start)?)
        }
        None => {
            tracing::info!("No data directory configured, running in memory");
            None
        }
    };

    let db = Arc::new(config.open_database()?);

    if let Some(key) = &config.admin_key {
        if db.users().add(key.clone(), Identity::admin("admin"))? {
            tracing::info!("Registered admin key from environment");
        }
    }
    if db.users().admins().is_empty() {
        tracing::warn!("No admin users exist; set BROOK_ADMIN_KEY to create one");
    }

    let sync_worker = Arc::new(SyncWorker::new(
        Arc::clone(db.registry()),
        Duration::from_secs(config.sync_interval_secs.max(1)),
    ));
    let sync_handle = config
        .data_dir
        .as_ref()
        .map(|_| Arc::clone(&sync_worker).start());

    let state = Arc::new(AppState::new(Arc::clone(&db)));
    let app = build_router(state);

    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    tracing::info!("Starting Brook server on {}", addr);

    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(Arc::clone(&sync_worker)))
        .await?;

    if let Some(handle) = sync_handle {
        handle.abort();
    }
    if let Err(e) = db.registry().sync() {
        tracing::error!("Final sync failed: {}", e);
    }

    tracing::info!("Brook server stopped");
    Ok(())
}

async fn shutdown_signal(sync_worker: Arc<SyncWorker>) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to install CTRL+C signal handler: {}", e);
        std::future::pending::<()>().await;
    }

    tracing::info!("Shutdown signal received, stopping workers...");
    sync_worker.stop();
}
