//! Data channel used to show the negotiated session works: every few seconds
//! each side sends a random string and logs what it receives.

use std::sync::Arc;
use std::time::Duration;

use rand::distributions::Alphanumeric;
use rand::Rng;
use tracing::{info, warn};
use webrtc::data_channel::data_channel_message::DataChannelMessage;
use webrtc::data_channel::RTCDataChannel;
use webrtc::peer_connection::RTCPeerConnection;

use crate::adapter::Role;
use crate::engine::EngineError;

pub const DATA_CHANNEL_LABEL: &str = "data";
pub const SEND_INTERVAL: Duration = Duration::from_secs(5);
const MESSAGE_LEN: usize = 15;

/// The offerer opens the channel; the answerer adopts the one it is offered.
pub async fn attach(
    peer_connection: &Arc<RTCPeerConnection>,
    role: Role,
    interval: Duration,
) -> Result<(), EngineError> {
    match role {
        Role::Offerer => {
            let channel = peer_connection
                .create_data_channel(DATA_CHANNEL_LABEL, None)
                .await?;
            wire(channel, interval);
        }
        Role::Answerer => {
            peer_connection.on_data_channel(Box::new(move |channel: Arc<RTCDataChannel>| {
                Box::pin(async move {
                    info!(label = channel.label(), "new data channel");
                    wire(channel, interval);
                })
            }));
        }
    }
    Ok(())
}

fn wire(channel: Arc<RTCDataChannel>, interval: Duration) {
    let sender = Arc::clone(&channel);
    channel.on_open(Box::new(move || {
        let channel = Arc::clone(&sender);
        Box::pin(async move {
            info!(
                label = channel.label(),
                id = channel.id(),
                "data channel open; sending a random message every {}s",
                interval.as_secs()
            );
            tokio::spawn(send_loop(channel, interval));
        })
    }));

    let label = channel.label().to_string();
    channel.on_message(Box::new(move |message: DataChannelMessage| {
        let label = label.clone();
        Box::pin(async move {
            info!(
                label = %label,
                "message from data channel: {:?}",
                String::from_utf8_lossy(&message.data)
            );
        })
    }));
}

async fn send_loop(channel: Arc<RTCDataChannel>, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    ticker.tick().await;
    loop {
        ticker.tick().await;
        let message = random_message(MESSAGE_LEN);
        info!(%message, "sending");
        if let Err(err) = channel.send_text(message).await {
            warn!(error = %err, "data channel send failed; stopping");
            break;
        }
    }
}

pub fn random_message(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}
