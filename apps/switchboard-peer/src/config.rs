use std::time::Duration;

use anyhow::bail;
use clap::Parser;
use switchboard_proto::{Identity, DEFAULT_LOGIN_MARKER};

use crate::adapter::Role;
use crate::demo::SEND_INTERVAL;
use crate::engine::DEFAULT_STUN_SERVER;

#[derive(Debug, Parser)]
#[command(
    name = "switchboard-peer",
    author,
    version,
    about = "WebRTC peer that negotiates through a switchboard hub"
)]
pub struct Cli {
    /// Websocket URL of the hub.
    #[arg(long, env = "SWITCHBOARD_URL", default_value = "ws://127.0.0.1:8000/")]
    pub server: String,

    /// Identity to register under.
    #[arg(long, env = "SWITCHBOARD_IDENTITY")]
    pub identity: String,

    /// Identity of the peer to negotiate with.
    #[arg(long, env = "SWITCHBOARD_REMOTE")]
    pub remote: String,

    #[arg(long, env = "SWITCHBOARD_ROLE", value_enum)]
    pub role: Role,

    /// STUN server URL; repeat for several. Pass an empty value for host-only.
    #[arg(
        long = "stun",
        env = "SWITCHBOARD_STUN",
        value_delimiter = ',',
        default_value = DEFAULT_STUN_SERVER
    )]
    pub stun: Vec<String>,

    /// `message` sent with the register envelope.
    #[arg(long, default_value = DEFAULT_LOGIN_MARKER)]
    pub login: String,

    /// Pause between registering and sending the offer, so the answerer has
    /// time to register.
    #[arg(long, default_value_t = 500)]
    pub offer_delay_ms: u64,

    /// Seconds between demo data channel messages.
    #[arg(long, default_value_t = SEND_INTERVAL.as_secs())]
    pub send_interval_secs: u64,
}

#[derive(Debug, Clone)]
pub struct PeerConfig {
    pub server_url: String,
    pub identity: Identity,
    pub remote: Identity,
    pub role: Role,
    pub stun_servers: Vec<String>,
    pub login_marker: String,
    pub offer_delay: Duration,
    pub send_interval: Duration,
}

impl TryFrom<Cli> for PeerConfig {
    type Error = anyhow::Error;

    fn try_from(cli: Cli) -> Result<Self, Self::Error> {
        if !(cli.server.starts_with("ws://") || cli.server.starts_with("wss://")) {
            bail!("server must be a ws:// or wss:// url: {}", cli.server);
        }
        if cli.identity == cli.remote {
            bail!("identity and remote must differ ({})", cli.identity);
        }
        if cli.send_interval_secs == 0 {
            bail!("send interval must be at least one second");
        }
        Ok(PeerConfig {
            server_url: cli.server,
            identity: Identity::from(cli.identity),
            remote: Identity::from(cli.remote),
            role: cli.role,
            stun_servers: cli.stun.into_iter().filter(|url| !url.is_empty()).collect(),
            login_marker: cli.login,
            offer_delay: Duration::from_millis(cli.offer_delay_ms),
            send_interval: Duration::from_secs(cli.send_interval_secs),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> anyhow::Result<PeerConfig> {
        let cli = Cli::try_parse_from(
            std::iter::once("switchboard-peer").chain(args.iter().copied()),
        )?;
        PeerConfig::try_from(cli)
    }

    #[test_timeout::timeout]
    fn parses_offerer_with_defaults() {
        let config = parse(&["--identity", "1001", "--remote", "1002", "--role", "offerer"])
            .expect("parse");
        assert_eq!(config.server_url, "ws://127.0.0.1:8000/");
        assert_eq!(config.role, Role::Offerer);
        assert_eq!(config.stun_servers, vec![DEFAULT_STUN_SERVER.to_string()]);
        assert_eq!(config.login_marker, "login");
        assert_eq!(config.send_interval, SEND_INTERVAL);
    }

    #[test_timeout::timeout]
    fn empty_stun_means_host_candidates_only() {
        let config = parse(&[
            "--identity", "1002", "--remote", "1001", "--role", "answerer", "--stun", "",
        ])
        .expect("parse");
        assert!(config.stun_servers.is_empty());
    }

    #[test_timeout::timeout]
    fn rejects_invalid_combinations() {
        assert!(parse(&["--identity", "1001", "--remote", "1001", "--role", "offerer"]).is_err());
        assert!(parse(&[
            "--server", "http://127.0.0.1:8000/", "--identity", "1001", "--remote", "1002",
            "--role", "offerer",
        ])
        .is_err());
        assert!(parse(&["--identity", "1001", "--remote", "1002"]).is_err());
    }
}
