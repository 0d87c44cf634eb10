//! Rendezvous hub for WebRTC negotiation.
//!
//! Peers open a websocket, `register` an identity and then exchange `sdp` and
//! `candidate` envelopes addressed by identity. The hub routes envelopes
//! without reading their bodies.

pub mod config;
pub mod diagnostics;
pub mod dispatcher;
pub mod server;
pub mod session;
pub mod telemetry;
pub mod worker;

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use metrics_exporter_prometheus::PrometheusHandle;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{info, warn};

pub use config::{Cli, ServerConfig};
pub use dispatcher::{Dispatcher, DispatcherConfig, RouteId, SendOutcome};
pub use server::AppState;
pub use session::{ConnectionSession, SessionEnd};

/// Run the hub until ctrl-c.
pub async fn run(config: ServerConfig, metrics: Option<PrometheusHandle>) -> Result<()> {
    let listener = TcpListener::bind(config.listen_addr)
        .await
        .with_context(|| format!("failed to bind signaling listener on {}", config.listen_addr))?;
    let diagnostics = match config.diagnostics_addr {
        Some(addr) => Some(
            TcpListener::bind(addr)
                .await
                .with_context(|| format!("failed to bind diagnostics listener on {addr}"))?,
        ),
        None => None,
    };
    serve(config, listener, diagnostics, metrics, shutdown_signal()).await
}

/// Serve on already-bound listeners until `shutdown` resolves.
pub async fn serve<F>(
    config: ServerConfig,
    listener: TcpListener,
    diagnostics: Option<TcpListener>,
    metrics: Option<PrometheusHandle>,
    shutdown: F,
) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let dispatcher = Dispatcher::new(config.dispatcher.clone());
    let state = Arc::new(AppState::new(dispatcher, metrics));

    let diagnostics_task = match diagnostics {
        Some(listener) => {
            let addr = listener.local_addr().context("diagnostics local address")?;
            let router = diagnostics::router(state.clone());
            info!("diagnostics listening on {addr}");
            Some(tokio::spawn(async move {
                if let Err(err) = axum::serve(listener, router).await {
                    warn!(error = %err, "diagnostics listener stopped");
                }
            }))
        }
        None => None,
    };

    let addr = listener.local_addr().context("signaling local address")?;
    info!(
        ws_path = %config.ws_path,
        queue_capacity = config.dispatcher.queue_capacity,
        enqueue_timeout_ms = config.dispatcher.enqueue_timeout.as_millis() as u64,
        "switchboard listening on {addr}"
    );

    let router = server::router(state, &config.ws_path);
    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown)
    .await
    .context("server shutdown with error")?;

    if let Some(task) = diagnostics_task {
        task.abort();
    }
    info!("shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let _ = signal::ctrl_c().await;
    info!("shutdown signal received");
}
