//! HTTP surface polled by the visualization host: `GET /report` and `POST /control`.

use std::{
    fs,
    future::Future,
    io,
    net::SocketAddr,
    os::unix::fs::{DirBuilderExt, FileTypeExt},
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use bytes::Bytes;
use chrono::Utc;
use netctl_tc::TrafficShaper;
use netctl_wire::{ControlRequest, ControlResponse};
use tokio::net::{TcpListener, UnixListener};

use crate::{
    dispatch::{self, Dispatcher},
    metrics::{self, MetricsSource},
    report::Assembler,
    store::{ContainerState, ContainerStore},
};

/// Shared state of the handlers.
pub struct AppState {
    store: Arc<dyn ContainerStore>,
    shaper: Arc<TrafficShaper>,
    dispatcher: Arc<Dispatcher>,
    metrics: Arc<dyn MetricsSource>,
    metrics_timeout: Duration,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("shaper", &self.shaper)
            .field("metrics_timeout", &self.metrics_timeout)
            .finish_non_exhaustive()
    }
}

impl AppState {
    pub fn new(store: Arc<dyn ContainerStore>, shaper: Arc<TrafficShaper>) -> Self {
        let dispatcher = Arc::new(Dispatcher::new(Arc::clone(&store), Arc::clone(&shaper)));
        Self {
            store,
            shaper,
            dispatcher,
            metrics: Arc::new(metrics::Disabled),
            metrics_timeout: Duration::from_millis(500),
        }
    }

    /// Enriches reports from `source`, giving each query at most `timeout`.
    pub fn with_metrics(mut self, source: Arc<dyn MetricsSource>, timeout: Duration) -> Self {
        self.metrics = source;
        self.metrics_timeout = timeout;
        self
    }
}

pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new().route("/report", get(report)).route("/control", post(control)).with_state(state)
}

async fn report(State(state): State<Arc<AppState>>) -> Response {
    let records = state.store.snapshot();
    let running: Vec<_> = records.iter().filter(|r| r.state == ContainerState::Running).cloned().collect();
    let enrichment = metrics::enrich(&state.metrics, &running, state.metrics_timeout).await;

    // Assembly resolves namespaces through procfs.
    let assembled = tokio::task::spawn_blocking(move || {
        let report = Assembler::new(state.shaper.cache(), state.shaper.resolver())
            .with_enrichment(&enrichment)
            .assemble(&records, Utc::now());
        serde_json::to_vec(&report)
    })
    .await;

    match assembled {
        Ok(Ok(body)) => ([(header::CONTENT_TYPE, "application/json")], body).into_response(),
        Ok(Err(e)) => {
            tracing::error!(?e, "failed to serialize report");
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
        Err(e) => {
            tracing::error!(?e, "report task failed");
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}

async fn control(State(state): State<Arc<AppState>>, body: Bytes) -> Response {
    let request: ControlRequest = match serde_json::from_slice(&body) {
        Ok(request) => request,
        Err(e) => {
            tracing::debug!(?e, "malformed control request");
            return (StatusCode::BAD_REQUEST, Json(ControlResponse::error(e))).into_response();
        }
    };

    // Shaping runs external commands inside the container namespace.
    let dispatcher = Arc::clone(&state.dispatcher);
    let outcome =
        tokio::task::spawn_blocking(move || dispatcher.dispatch(&request.node_id, &request.control)).await;

    match outcome {
        Ok(Ok(_)) => (StatusCode::OK, Json(ControlResponse::ok())).into_response(),
        Ok(Err(e @ dispatch::Error::MalformedNodeId(_))) => {
            (StatusCode::BAD_REQUEST, Json(ControlResponse::error(e))).into_response()
        }
        Ok(Err(e)) => {
            tracing::warn!(%e, "control failed");
            (StatusCode::OK, Json(ControlResponse::error(e))).into_response()
        }
        Err(e) => {
            tracing::error!(?e, "control task failed");
            (StatusCode::INTERNAL_SERVER_ERROR, Json(ControlResponse::error(e))).into_response()
        }
    }
}

/// Serves `router` over TCP until `shutdown` resolves.
pub async fn serve_tcp(
    addr: SocketAddr,
    router: Router,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> io::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    tracing::info!(addr = %listener.local_addr()?, "listening");
    axum::serve(listener, router).with_graceful_shutdown(shutdown).await
}

/// Serves `router` on the Unix socket at `path` until `shutdown` resolves, removing the socket
/// afterwards.
pub async fn serve_unix(
    path: &Path,
    router: Router,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> io::Result<()> {
    let (listener, _socket) = bind_unix(path)?;
    tracing::info!(path = %path.display(), "listening");
    axum::serve(listener, router).with_graceful_shutdown(shutdown).await
}

/// Removes the socket file and, if it was left empty, its directory once dropped.
#[derive(Debug)]
pub struct SocketFile {
    path: PathBuf,
}

impl Drop for SocketFile {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            tracing::debug!(path = %self.path.display(), ?e, "failed to remove socket");
        }
        if let Some(dir) = self.path.parent() {
            let _ = fs::remove_dir(dir);
        }
    }
}

/// Binds a Unix listener at `path`, creating its directory and replacing a stale socket.
pub fn bind_unix(path: &Path) -> io::Result<(UnixListener, SocketFile)> {
    if let Some(dir) = path.parent() {
        fs::DirBuilder::new().recursive(true).mode(0o700).create(dir)?;
    }

    match fs::symlink_metadata(path) {
        Ok(meta) if meta.file_type().is_socket() => fs::remove_file(path)?,
        Ok(_) => {
            return Err(io::Error::new(
                io::ErrorKind::AlreadyExists,
                format!("{} exists and is not a socket", path.display()),
            ))
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(e),
    }

    let listener = UnixListener::bind(path)?;
    Ok((listener, SocketFile { path: path.to_path_buf() }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn replaces_stale_socket() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plugins/network-control/network-control.sock");

        let (first, socket) = bind_unix(&path).unwrap();
        drop(first);
        std::mem::forget(socket);
        assert!(path.exists());

        let (_listener, socket) = bind_unix(&path).unwrap();
        drop(socket);
        assert!(!path.exists());
        assert!(!path.parent().unwrap().exists());
    }

    #[tokio::test]
    async fn refuses_to_replace_regular_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plugin.sock");
        fs::write(&path, b"not a socket").unwrap();

        let err = bind_unix(&path).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::AlreadyExists);
    }
}
