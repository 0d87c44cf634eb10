//! WebRTC peer that negotiates a data channel through a switchboard hub.

pub mod adapter;
pub mod config;
pub mod demo;
pub mod engine;
pub mod runner;
pub mod signaling;

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{info, warn};

pub use adapter::{NegotiationAdapter, NegotiationError, PendingCandidates, Role};
pub use config::{Cli, PeerConfig};
pub use engine::{EngineError, EngineEvent, NegotiationEngine, PeerState, RtcEngine};
pub use runner::{drive, PeerExit};
pub use signaling::{EnvelopeSink, SignalingConnection, SignalingError};

/// Register with the hub, negotiate with the remote and keep the demo data
/// channel running until the connection fails or closes, or ctrl-c.
pub async fn run(config: PeerConfig) -> Result<PeerExit> {
    let SignalingConnection { outgoing, incoming } =
        SignalingConnection::connect(&config.server_url)
            .await
            .with_context(|| format!("failed to connect to {}", config.server_url))?;

    let (engine, events) = RtcEngine::new(engine::stun_servers(&config.stun_servers))
        .await
        .context("failed to create peer connection")?;
    let engine = Arc::new(engine);
    demo::attach(&engine.peer_connection(), config.role, config.send_interval)
        .await
        .context("failed to set up data channel")?;

    let adapter = NegotiationAdapter::new(
        Arc::clone(&engine),
        outgoing,
        config.identity.clone(),
        config.remote.clone(),
        config.role,
    )
    .with_login_marker(config.login_marker.clone());

    adapter.register().await?;
    if adapter.role() == Role::Offerer {
        tokio::time::sleep(config.offer_delay).await;
        adapter.start_offer().await?;
    } else {
        info!(remote = %config.remote, "waiting for offer");
    }

    let outcome = drive(&adapter, events, incoming, async {
        let _ = tokio::signal::ctrl_c().await;
    })
    .await;

    if let Err(err) = engine.close().await {
        warn!(error = %err, "cannot close peer connection");
    }
    let exit = outcome?;
    info!(?exit, "peer finished");
    Ok(exit)
}
