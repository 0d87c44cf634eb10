use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use axum::{
    extract::{ws::WebSocket, ConnectInfo, State, WebSocketUpgrade},
    response::IntoResponse,
    routing::get,
    Router,
};
use futures_util::StreamExt;
use metrics::{counter, gauge};
use metrics_exporter_prometheus::PrometheusHandle;
use tower_http::trace::TraceLayer;
use tracing::info;
use uuid::Uuid;

use crate::dispatcher::Dispatcher;
use crate::session::ConnectionSession;

/// Shared by the signaling and diagnostics routers.
pub struct AppState {
    pub dispatcher: Dispatcher,
    pub connections: Arc<ConnectionCounter>,
    pub metrics: Option<PrometheusHandle>,
}

impl AppState {
    pub fn new(dispatcher: Dispatcher, metrics: Option<PrometheusHandle>) -> Self {
        Self {
            dispatcher,
            connections: Arc::new(ConnectionCounter::default()),
            metrics,
        }
    }
}

/// Live connection count.
#[derive(Debug, Default)]
pub struct ConnectionCounter {
    active: AtomicUsize,
}

impl ConnectionCounter {
    pub fn open(self: &Arc<Self>) -> ConnectionGuard {
        let active = self.active.fetch_add(1, Ordering::Relaxed) + 1;
        gauge!("switchboard_connections_active", active as f64);
        counter!("switchboard_connections_total", 1);
        log_milestone(active);
        ConnectionGuard {
            counter: Arc::clone(self),
        }
    }

    pub fn active(&self) -> usize {
        self.active.load(Ordering::Relaxed)
    }

    fn close(&self) {
        let active = self.active.fetch_sub(1, Ordering::Relaxed).saturating_sub(1);
        gauge!("switchboard_connections_active", active as f64);
        log_milestone(active);
    }
}

/// Every hundredth connection, in either direction, including back to zero.
fn is_milestone(active: usize) -> bool {
    active % 100 == 0
}

fn log_milestone(active: usize) {
    if is_milestone(active) {
        info!(active_connections = active, "{active} connections");
    }
}

/// Decrements the connection count when dropped.
pub struct ConnectionGuard {
    counter: Arc<ConnectionCounter>,
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.counter.close();
    }
}

pub fn router(state: Arc<AppState>, ws_path: &str) -> Router {
    Router::new()
        .route(ws_path, get(ws_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn ws_handler(
    State(state): State<Arc<AppState>>,
    ConnectInfo(remote): ConnectInfo<SocketAddr>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_connection(socket, state, remote))
}

async fn handle_connection(socket: WebSocket, state: Arc<AppState>, remote: SocketAddr) {
    let connection_id = Uuid::new_v4();
    let _guard = state.connections.open();
    info!(connection_id = %connection_id, %remote, "connection established");

    let (ws_tx, ws_rx) = socket.split();
    let session = ConnectionSession::new(connection_id, state.dispatcher.clone(), ws_tx);
    let end = session.run(ws_rx).await;

    info!(
        connection_id = %connection_id,
        %remote,
        reason = end.metric_label(),
        "connection closed"
    );
}
