use std::net::SocketAddr;

use axum::body::Body;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use axum::Router;
use prometheus::{Encoder, TextEncoder};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;

use super::forward::{self, ProxyState};

/// One HTTP listener. `start_*` binds and serves on a background task;
/// `stop` triggers graceful shutdown through a oneshot.
pub struct Server {
    local_addr: SocketAddr,
    shutdown_tx: Option<oneshot::Sender<()>>,
}

impl Server {
    /// The proxy listener: every method and path lands in the signing
    /// director.
    pub async fn start_proxy(
        addr: &str,
        state: ProxyState,
    ) -> Result<(Self, JoinHandle<()>), String> {
        let app = Router::new()
            .fallback(forward::handle)
            .layer(TraceLayer::new_for_http())
            .with_state(state);
        Self::serve(addr, app).await
    }

    /// The management listener: health plus prometheus exposition at the
    /// configured metrics path.
    pub async fn start_mgmt(addr: &str, metrics_path: &str) -> Result<(Self, JoinHandle<()>), String> {
        let app = Router::new()
            .route("/status/health", get(health_handler))
            .route(metrics_path, get(metrics_handler))
            .layer(TraceLayer::new_for_http());
        Self::serve(addr, app).await
    }

    async fn serve(addr: &str, app: Router) -> Result<(Self, JoinHandle<()>), String> {
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .map_err(|e| format!("failed to bind {addr}: {e}"))?;
        let local_addr = listener
            .local_addr()
            .map_err(|e| format!("failed to read local addr: {e}"))?;

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let handle = tokio::spawn(async move {
            let server = axum::serve(listener, app).with_graceful_shutdown(async move {
                let _ = shutdown_rx.await;
            });
            if let Err(err) = server.await {
                tracing::error!(error = %err, "server terminated abnormally");
            }
        });

        Ok((
            Self {
                local_addr,
                shutdown_tx: Some(shutdown_tx),
            },
            handle,
        ))
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn stop(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

async fn health_handler() -> Response {
    Json(serde_json::json!({ "status": "ok" })).into_response()
}

async fn metrics_handler() -> Response {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    if let Err(err) = encoder.encode(&prometheus::gather(), &mut buffer) {
        tracing::error!(error = %err, "metrics encoding failed");
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, encoder.format_type())
        .body(Body::from(buffer))
        .unwrap_or_default()
}
