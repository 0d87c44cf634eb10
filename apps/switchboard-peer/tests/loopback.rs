use std::net::SocketAddr;
use std::sync::{Arc, Once};
use std::time::Duration;

use switchboard::{DispatcherConfig, ServerConfig};
use switchboard_peer::{
    drive, NegotiationAdapter, NegotiationEngine, PeerExit, Role, RtcEngine, SignalingConnection,
};
use switchboard_proto::Identity;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot};
use tokio::time::timeout;
use tracing_subscriber::{fmt::SubscriberBuilder, EnvFilter};
use webrtc::api::setting_engine::SettingEngine;
use webrtc::data_channel::RTCDataChannel;

static TRACING: Once = Once::new();

fn init_tracing() {
    TRACING.call_once(|| {
        let _ = SubscriberBuilder::default()
            .with_env_filter(
                EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
            )
            .with_test_writer()
            .try_init();
    });
}

async fn start_hub() -> (SocketAddr, oneshot::Sender<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind hub");
    let addr = listener.local_addr().expect("hub addr");
    let config = ServerConfig {
        listen_addr: addr,
        ws_path: "/".into(),
        diagnostics_addr: None,
        dispatcher: DispatcherConfig::default(),
    };
    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    tokio::spawn(switchboard::serve(config, listener, None, None, async move {
        let _ = shutdown_rx.await;
    }));
    (addr, shutdown_tx)
}

/// Report the label of the first data channel that opens on either side.
fn notify_on_open(channel: Arc<RTCDataChannel>, opened: mpsc::UnboundedSender<String>) {
    let label = channel.label().to_string();
    channel.on_open(Box::new(move || {
        let _ = opened.send(label.clone());
        Box::pin(async {})
    }));
}

struct Peer {
    task: tokio::task::JoinHandle<Result<PeerExit, switchboard_peer::NegotiationError>>,
    stop: oneshot::Sender<()>,
}

async fn spawn_peer(
    hub: SocketAddr,
    local: &str,
    remote: &str,
    role: Role,
    opened: mpsc::UnboundedSender<String>,
) -> Peer {
    let connection = SignalingConnection::connect(&format!("ws://{hub}/"))
        .await
        .expect("connect to hub");
    let mut settings = SettingEngine::default();
    settings.set_include_loopback_candidate(true);
    let (engine, events) = RtcEngine::with_setting_engine(Vec::new(), settings)
        .await
        .expect("engine");
    let engine = Arc::new(engine);

    let pc = engine.peer_connection();
    match role {
        Role::Offerer => {
            let channel = pc.create_data_channel("data", None).await.expect("channel");
            notify_on_open(channel, opened);
        }
        Role::Answerer => {
            pc.on_data_channel(Box::new(move |channel: Arc<RTCDataChannel>| {
                notify_on_open(channel, opened.clone());
                Box::pin(async {})
            }));
        }
    }

    let adapter = NegotiationAdapter::new(
        engine,
        connection.outgoing,
        Identity::from(local),
        Identity::from(remote),
        role,
    );
    adapter.register().await.expect("register");

    let (stop, stop_rx) = oneshot::channel::<()>();
    let incoming = connection.incoming;
    let task = tokio::spawn(async move {
        if role == Role::Offerer {
            tokio::time::sleep(Duration::from_millis(200)).await;
            adapter.start_offer().await?;
        }
        let exit = drive(&adapter, events, incoming, async move {
            let _ = stop_rx.await;
        })
        .await;
        let _ = adapter.engine().close().await;
        exit
    });
    Peer { task, stop }
}

#[test_timeout::tokio_timeout_test(60, flavor = "multi_thread")]
async fn peers_open_a_data_channel_through_the_hub() {
    init_tracing();
    let (hub, _shutdown) = start_hub().await;
    let (opened_tx, mut opened_rx) = mpsc::unbounded_channel();

    let answerer = spawn_peer(hub, "1002", "1001", Role::Answerer, opened_tx.clone()).await;
    let offerer = spawn_peer(hub, "1001", "1002", Role::Offerer, opened_tx).await;

    for _ in 0..2 {
        let label = timeout(Duration::from_secs(30), opened_rx.recv())
            .await
            .expect("data channel did not open in time")
            .expect("open notification");
        assert_eq!(label, "data");
    }

    for peer in [offerer, answerer] {
        let _ = peer.stop.send(());
        let exit = peer.task.await.expect("peer task").expect("negotiation");
        assert!(
            matches!(
                exit,
                PeerExit::Interrupted | PeerExit::ConnectionClosed | PeerExit::ConnectionFailed
            ),
            "unexpected exit {exit:?}"
        );
    }
}
