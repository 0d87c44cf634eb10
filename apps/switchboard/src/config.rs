use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::Parser;

use crate::dispatcher::DispatcherConfig;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub listen_addr: SocketAddr,
    pub ws_path: String,
    /// `None` when the diagnostics listener is disabled.
    pub diagnostics_addr: Option<SocketAddr>,
    pub dispatcher: DispatcherConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([0, 0, 0, 0], 8000)),
            ws_path: "/".to_string(),
            diagnostics_addr: Some(SocketAddr::from(([127, 0, 0, 1], 6060))),
            dispatcher: DispatcherConfig::default(),
        }
    }
}

#[derive(Debug, Parser)]
#[command(
    name = "switchboard",
    author,
    version,
    about = "Rendezvous hub relaying WebRTC negotiation between registered peers"
)]
pub struct Cli {
    /// Address to bind the signaling websocket listener to.
    #[arg(long, env = "SWITCHBOARD_LISTEN_ADDR", default_value = "0.0.0.0:8000")]
    pub listen_addr: String,

    /// Path the websocket upgrade is served on.
    #[arg(long, env = "SWITCHBOARD_WS_PATH", default_value = "/")]
    pub ws_path: String,

    /// Address for /healthz, /debug/stats and /metrics.
    #[arg(
        long,
        env = "SWITCHBOARD_DIAGNOSTICS_ADDR",
        default_value = "127.0.0.1:6060"
    )]
    pub diagnostics_addr: String,

    /// Do not start the diagnostics listener.
    #[arg(long, env = "SWITCHBOARD_DISABLE_DIAGNOSTICS", default_value_t = false)]
    pub disable_diagnostics: bool,

    /// Envelopes buffered per registered identity before senders wait.
    #[arg(long, env = "SWITCHBOARD_QUEUE_CAPACITY", default_value_t = 64)]
    pub queue_capacity: usize,

    /// How long a sender waits on a full recipient queue before dropping.
    #[arg(long, env = "SWITCHBOARD_ENQUEUE_TIMEOUT_MS", default_value_t = 2000)]
    pub enqueue_timeout_ms: u64,
}

impl TryFrom<Cli> for ServerConfig {
    type Error = anyhow::Error;

    fn try_from(cli: Cli) -> Result<Self, Self::Error> {
        let listen_addr: SocketAddr = cli
            .listen_addr
            .parse()
            .with_context(|| format!("invalid listen address: {}", cli.listen_addr))?;
        let diagnostics_addr = if cli.disable_diagnostics {
            None
        } else {
            Some(
                cli.diagnostics_addr
                    .parse()
                    .with_context(|| {
                        format!("invalid diagnostics address: {}", cli.diagnostics_addr)
                    })?,
            )
        };
        if !cli.ws_path.starts_with('/') {
            bail!("websocket path must start with '/': {}", cli.ws_path);
        }
        if cli.queue_capacity == 0 {
            bail!("queue capacity must be at least 1");
        }
        if cli.enqueue_timeout_ms == 0 {
            bail!("enqueue timeout must be at least 1ms");
        }

        Ok(ServerConfig {
            listen_addr,
            ws_path: cli.ws_path,
            diagnostics_addr,
            dispatcher: DispatcherConfig {
                queue_capacity: cli.queue_capacity,
                enqueue_timeout: Duration::from_millis(cli.enqueue_timeout_ms),
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> anyhow::Result<ServerConfig> {
        let cli = Cli::try_parse_from(std::iter::once("switchboard").chain(args.iter().copied()))?;
        ServerConfig::try_from(cli)
    }

    #[test_timeout::timeout]
    fn defaults_match_the_documented_listeners() {
        let config = parse(&[]).expect("defaults parse");
        assert_eq!(config.listen_addr, SocketAddr::from(([0, 0, 0, 0], 8000)));
        assert_eq!(config.ws_path, "/");
        assert_eq!(
            config.diagnostics_addr,
            Some(SocketAddr::from(([127, 0, 0, 1], 6060)))
        );
        assert_eq!(config.dispatcher.queue_capacity, 64);
        assert_eq!(config.dispatcher.enqueue_timeout, Duration::from_secs(2));
    }

    #[test_timeout::timeout]
    fn diagnostics_can_be_disabled() {
        let config = parse(&["--disable-diagnostics", "--diagnostics-addr", "nonsense"])
            .expect("disabled diagnostics skips address validation");
        assert_eq!(config.diagnostics_addr, None);
    }

    #[test_timeout::timeout]
    fn rejects_bad_values() {
        assert!(parse(&["--listen-addr", "localhost"]).is_err());
        assert!(parse(&["--ws-path", "signal"]).is_err());
        assert!(parse(&["--queue-capacity", "0"]).is_err());
        assert!(parse(&["--enqueue-timeout-ms", "0"]).is_err());
    }
}
