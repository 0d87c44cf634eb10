use anyhow::Result;
use clap::Parser;
use switchboard_peer::{Cli, PeerConfig, PeerExit};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,webrtc=warn")),
        )
        .with_target(false)
        .init();

    let config = PeerConfig::try_from(Cli::parse())?;
    info!(
        server = %config.server_url,
        identity = %config.identity,
        remote = %config.remote,
        role = ?config.role,
        "starting switchboard peer"
    );

    match switchboard_peer::run(config).await? {
        PeerExit::ConnectionFailed => info!("peer connection has gone to failed; exiting"),
        PeerExit::ConnectionClosed => info!("peer connection has gone to closed; exiting"),
        PeerExit::SignalingClosed => info!("switchboard went away; exiting"),
        PeerExit::Interrupted => info!("interrupted"),
    }
    Ok(())
}
