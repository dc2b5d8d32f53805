use crate::config::{ManagementConfig, ManagementEndpointConfig};
use crate::error::{Context, Result};
use crate::metrics::metrics as metrics_collector;
use crate::supervisor::NodeSnapshot;
use axum::http::{header::CONTENT_TYPE, StatusCode};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Extension, Json, Router};
use serde_json::json;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

/// Read-only view handed to request handlers.
#[derive(Clone)]
pub struct ManagementState {
    snapshots: watch::Receiver<Vec<NodeSnapshot>>,
}

impl ManagementState {
    pub fn new(snapshots: watch::Receiver<Vec<NodeSnapshot>>) -> Self {
        Self { snapshots }
    }
}

pub struct ManagementServer {
    addr: SocketAddr,
    live: Option<ManagementEndpointConfig>,
    status: Option<ManagementEndpointConfig>,
    metrics: Option<ManagementEndpointConfig>,
}

impl ManagementServer {
    pub fn build(config: &ManagementConfig) -> Result<Option<Self>> {
        if config.live.is_none() && config.status.is_none() && config.metrics.is_none() {
            return Ok(None);
        }

        let addr: SocketAddr = format!("{}:{}", config.host, config.port)
            .parse()
            .with_context(|| {
                format!(
                    "invalid management listen address {}:{}",
                    config.host, config.port
                )
            })?;

        Ok(Some(Self {
            addr,
            live: config.live.clone(),
            status: config.status.clone(),
            metrics: config.metrics.clone(),
        }))
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn router(&self, state: ManagementState) -> Router {
        let mut router = Router::new();

        if let Some(endpoint) = &self.live {
            router = router.route(endpoint.path.as_str(), get(live));
        }

        if let Some(endpoint) = &self.status {
            router = router.route(endpoint.path.as_str(), get(status_report));
        }

        if let Some(endpoint) = &self.metrics {
            router = router.route(endpoint.path.as_str(), get(metrics));
        }

        router.layer(Extension(state))
    }

    pub async fn serve(self, state: ManagementState, shutdown: CancellationToken) -> Result<()> {
        let listener = TcpListener::bind(self.addr)
            .await
            .with_context(|| format!("failed to bind management listener on {}", self.addr))?;
        self.serve_listener(listener, state, shutdown).await
    }

    pub async fn serve_listener(
        self,
        listener: TcpListener,
        state: ManagementState,
        shutdown: CancellationToken,
    ) -> Result<()> {
        let router = self.router(state);
        let local = listener.local_addr()?;

        tracing::info!("management server listening on {local}");

        axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                shutdown.cancelled().await;
            })
            .await
            .context("management server exited abnormally")?;

        Ok(())
    }
}

async fn live() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

async fn status_report(Extension(state): Extension<ManagementState>) -> impl IntoResponse {
    let nodes = state.snapshots.borrow().clone();
    (StatusCode::OK, Json(json!({ "nodes": nodes })))
}

async fn metrics() -> impl IntoResponse {
    (
        StatusCode::OK,
        [(CONTENT_TYPE, "text/plain; version=0.0.4")],
        metrics_collector().render_prometheus(),
    )
}
