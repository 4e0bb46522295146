//! Room-scoped signaling relay.
//!
//! Browser peers join `/{room_id}/{user_id}` over a WebSocket. Existing
//! occupants are told about each newcomer (`newParticipant`), and `offer` /
//! `answer` envelopes are forwarded to the addressed user in the same room
//! with the sender's id stamped on them. Media never passes through here.

pub mod cli;
pub mod config;
pub mod connection;
pub mod error;
pub mod handlers;
pub mod keepalive;
pub mod lifecycle;
pub mod presence;
pub mod registry;
pub mod relay;
pub mod signaling;
pub mod telemetry;
pub mod websocket;

use std::future::Future;
use std::net::SocketAddr;

use axum::{routing::get, Router};
use metrics_exporter_prometheus::PrometheusHandle;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::config::RelayConfig;
use crate::connection::CloseReason;
use crate::handlers::{health_check, metrics, stats};
use crate::registry::Registry;
use crate::websocket::websocket_handler;

/// Shared by every request handler. The registry is owned here rather than
/// held in any global.
#[derive(Clone)]
pub struct AppState {
    pub registry: Registry,
    pub relay: RelayConfig,
    pub metrics: Option<PrometheusHandle>,
}

impl AppState {
    pub fn new(relay: RelayConfig, metrics: Option<PrometheusHandle>) -> Self {
        Self {
            registry: Registry::new(relay.prune_empty_rooms),
            relay,
            metrics,
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(health_check))
        .route("/stats", get(stats))
        .route("/metrics", get(metrics))
        .route("/:room_id/:user_id", get(websocket_handler))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serves the relay on `listener` until `shutdown` resolves, then closes
/// every registered connection.
pub async fn serve<F>(listener: TcpListener, state: AppState, shutdown: F) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let registry = state.registry.clone();
    let app = router(state).into_make_service_with_connect_info::<SocketAddr>();

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown.await;
            let closed = registry.close_all(CloseReason::Shutdown);
            info!(closed, "shutdown requested; closing relay connections");
        })
        .await
}
