use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use switchboard_proto::{decode, decode_bytes, encode, Envelope};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};

pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const OUTGOING_CAPACITY: usize = 64;
const INCOMING_CAPACITY: usize = 64;

#[derive(Debug, Error)]
pub enum SignalingError {
    #[error("timed out connecting to {0}")]
    ConnectTimeout(String),
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("signaling channel closed")]
    Closed,
}

/// Where the negotiation adapter writes outgoing envelopes.
#[async_trait]
pub trait EnvelopeSink: Send + Sync {
    async fn send_envelope(&self, envelope: Envelope) -> Result<(), SignalingError>;
}

#[async_trait]
impl EnvelopeSink for mpsc::Sender<Envelope> {
    async fn send_envelope(&self, envelope: Envelope) -> Result<(), SignalingError> {
        self.send(envelope).await.map_err(|_| SignalingError::Closed)
    }
}

/// Websocket to the hub, split into an outgoing queue and an incoming queue.
///
/// The socket closes once every clone of `outgoing` is dropped; `incoming`
/// ends when the hub closes the socket.
pub struct SignalingConnection {
    pub outgoing: mpsc::Sender<Envelope>,
    pub incoming: mpsc::Receiver<Envelope>,
}

impl SignalingConnection {
    pub async fn connect(url: &str) -> Result<Self, SignalingError> {
        Self::connect_with_timeout(url, CONNECT_TIMEOUT).await
    }

    pub async fn connect_with_timeout(
        url: &str,
        connect_timeout: Duration,
    ) -> Result<Self, SignalingError> {
        let (stream, _) = timeout(connect_timeout, connect_async(url))
            .await
            .map_err(|_| SignalingError::ConnectTimeout(url.to_string()))??;
        info!(url, "connected to switchboard");
        let (mut ws_tx, mut ws_rx) = stream.split();

        let (outgoing_tx, mut outgoing_rx) = mpsc::channel::<Envelope>(OUTGOING_CAPACITY);
        tokio::spawn(async move {
            while let Some(envelope) = outgoing_rx.recv().await {
                let text = match encode(&envelope) {
                    Ok(text) => text,
                    Err(err) => {
                        warn!(error = %err, "failed to encode envelope");
                        continue;
                    }
                };
                debug!(kind = %envelope.kind(), callee = %envelope.callee(), "client msg");
                if let Err(err) = ws_tx.send(Message::text(text)).await {
                    warn!(error = %err, "failed to write to switchboard");
                    break;
                }
            }
            let _ = ws_tx.send(Message::Close(None)).await;
        });

        let (incoming_tx, incoming_rx) = mpsc::channel::<Envelope>(INCOMING_CAPACITY);
        tokio::spawn(async move {
            while let Some(frame) = ws_rx.next().await {
                let decoded = match frame {
                    Ok(Message::Text(text)) => decode(text.as_str()),
                    Ok(Message::Binary(bytes)) => decode_bytes(&bytes),
                    Ok(Message::Close(_)) => break,
                    Ok(_) => continue,
                    Err(err) => {
                        warn!(error = %err, "failed to read from switchboard");
                        break;
                    }
                };
                match decoded {
                    Ok(envelope) => {
                        debug!(kind = %envelope.kind(), caller = %envelope.caller(), "server msg");
                        if incoming_tx.send(envelope).await.is_err() {
                            break;
                        }
                    }
                    Err(err) => warn!(error = %err, "error parsing message"),
                }
            }
            debug!("switchboard reader finished");
        });

        Ok(Self {
            outgoing: outgoing_tx,
            incoming: incoming_rx,
        })
    }
}
