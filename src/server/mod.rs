//! HTTP surface of a content store.
//!
//! Routes:
//! - `GET /api/files` lists file records as JSON
//! - `GET|PUT|DELETE /api/files/{path}` reads, stores, or deletes one file
//! - `GET /api/tombstones` lists active tombstones (pruning expired ones)

pub mod auth;
pub mod rebuild;

use anyhow::Context;
use axum::body::Bytes;
use axum::extract::{DefaultBodyLimit, Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{middleware, Json, Router};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::config::ServerConfig;
use crate::error::Error;
use crate::fs::types::{FileRecord, Tombstone};
use crate::store::{ContentStore, StoreOptions};

pub use rebuild::{CommandRebuilder, NoopRebuilder, RebuildQueue, Rebuilder};

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<ContentStore>,
    /// Required bearer token. None disables authentication.
    pub token: Option<String>,
    pub rebuilds: Arc<RebuildQueue>,
}

impl AppState {
    pub fn new(store: Arc<ContentStore>, token: Option<String>) -> Self {
        Self {
            store,
            token,
            rebuilds: RebuildQueue::new(Arc::new(NoopRebuilder)),
        }
    }

    pub fn with_rebuilder(mut self, rebuilder: Arc<dyn Rebuilder>) -> Self {
        self.rebuilds = RebuildQueue::new(rebuilder);
        self
    }
}

/// Store errors as HTTP responses.
pub struct ApiError(Error);

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            Error::InvalidPath { .. } => StatusCode::BAD_REQUEST,
            Error::NotFound { .. } => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            warn!("request failed: {}", self.0);
        }
        (status, self.0.to_string()).into_response()
    }
}

/// Run a store operation on the blocking pool.
async fn blocking<T, F>(f: F) -> Result<T, ApiError>
where
    T: Send + 'static,
    F: FnOnce() -> crate::Result<T> + Send + 'static,
{
    match tokio::task::spawn_blocking(f).await {
        Ok(result) => result.map_err(ApiError::from),
        Err(e) => Err(ApiError(Error::io(
            "<store task>",
            std::io::Error::new(std::io::ErrorKind::Other, e),
        ))),
    }
}

fn trigger_rebuild(state: &AppState) {
    state.rebuilds.trigger();
}

async fn list_files(State(state): State<AppState>) -> Result<Json<Vec<FileRecord>>, ApiError> {
    let store = Arc::clone(&state.store);
    let records = blocking(move || store.list()).await?;
    Ok(Json(records))
}

async fn list_tombstones(State(state): State<AppState>) -> Result<Json<Vec<Tombstone>>, ApiError> {
    let store = Arc::clone(&state.store);
    let tombstones = blocking(move || store.list_tombstones()).await?;
    Ok(Json(tombstones))
}

async fn get_file(
    State(state): State<AppState>,
    Path(path): Path<String>,
) -> Result<Response, ApiError> {
    let store = Arc::clone(&state.store);
    let data = blocking(move || store.read(&path)).await?;
    Ok(([(header::CONTENT_TYPE, "application/octet-stream")], data).into_response())
}

async fn put_file(
    State(state): State<AppState>,
    Path(path): Path<String>,
    body: Bytes,
) -> Result<&'static str, ApiError> {
    let store = Arc::clone(&state.store);
    let rel = path.clone();
    let written = blocking(move || store.put(&rel, &mut body.as_ref())).await?;
    info!("stored {} ({})", path, humansize::format_size(written, humansize::DECIMAL));
    trigger_rebuild(&state);
    Ok("ok")
}

async fn delete_file(
    State(state): State<AppState>,
    Path(path): Path<String>,
) -> Result<&'static str, ApiError> {
    let store = Arc::clone(&state.store);
    let rel = path.clone();
    blocking(move || store.delete(&rel)).await?;
    info!("deleted {}", path);
    trigger_rebuild(&state);
    Ok("ok")
}

/// Build the API router.
pub fn router(state: AppState, max_upload_bytes: usize) -> Router {
    Router::new()
        .route("/api/files", get(list_files))
        .route(
            "/api/files/{*path}",
            get(get_file).put(put_file).delete(delete_file),
        )
        .route("/api/tombstones", get(list_tombstones))
        .route_layer(middleware::from_fn_with_state(state.clone(), auth::require_token))
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .with_state(state)
}

/// Serve the API on an already bound listener until the process exits.
pub async fn serve(listener: TcpListener, state: AppState, max_upload_bytes: usize) -> anyhow::Result<()> {
    let app = router(state, max_upload_bytes);
    axum::serve(listener, app).await?;
    Ok(())
}

/// Open the store, bind the port, and serve. Failures before serving starts
/// are fatal.
pub async fn run(config: &ServerConfig) -> anyhow::Result<()> {
    let options = StoreOptions {
        tombstones: config.tombstones,
        ..StoreOptions::default()
    };
    let store = ContentStore::open(&config.data, options)
        .with_context(|| format!("Failed to open data directory: {}", config.data.display()))?;
    let store = Arc::new(store);

    if config.token.is_none() {
        warn!("no API token configured (VAULTSYNC_TOKEN), the API is unauthenticated");
    }

    let rebuilder: Arc<dyn Rebuilder> = match &config.rebuild_command {
        Some(command) => Arc::new(CommandRebuilder::new(command.clone(), store.root())),
        None => Arc::new(NoopRebuilder),
    };
    let state = AppState::new(Arc::clone(&store), config.token.clone()).with_rebuilder(rebuilder);

    // Bring the rendered site in line with whatever is already stored
    if config.rebuild_command.is_some() {
        trigger_rebuild(&state);
    }

    let addr: SocketAddr = format!("{}:{}", config.bind, config.port)
        .parse()
        .with_context(|| format!("Invalid listen address {}:{}", config.bind, config.port))?;
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    info!("server listening on {}", addr);
    info!("data dir: {}", store.root().display());
    info!("tombstones: {}", if store.keeps_tombstones() { "enabled" } else { "disabled" });

    serve(listener, state, config.max_upload_bytes).await
}
