use anyhow::Result;
use clap::Parser;
use switchboard::{telemetry::Telemetry, Cli, ServerConfig};
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    let telemetry = Telemetry::init("info")?;

    let cli = Cli::parse();
    let config = ServerConfig::try_from(cli)?;
    info!(
        listen_addr = %config.listen_addr,
        diagnostics_addr = ?config.diagnostics_addr,
        "starting switchboard"
    );

    switchboard::run(config, Some(telemetry.metrics_handle())).await
}
