use std::future::Future;

use switchboard_proto::Envelope;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::adapter::{NegotiationAdapter, NegotiationError};
use crate::engine::{EngineEvent, NegotiationEngine, PeerState};
use crate::signaling::EnvelopeSink;

/// How a peer run ended without a negotiation error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerExit {
    ConnectionFailed,
    ConnectionClosed,
    SignalingClosed,
    Interrupted,
}

/// Feed engine callbacks and hub envelopes into the adapter until the peer
/// connection fails or closes, the hub goes away, or `interrupt` resolves.
pub async fn drive<E, S, I>(
    adapter: &NegotiationAdapter<E, S>,
    mut events: mpsc::UnboundedReceiver<EngineEvent>,
    mut incoming: mpsc::Receiver<Envelope>,
    interrupt: I,
) -> Result<PeerExit, NegotiationError>
where
    E: NegotiationEngine,
    S: EnvelopeSink,
    I: Future<Output = ()>,
{
    tokio::pin!(interrupt);
    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(EngineEvent::LocalCandidate(candidate)) => {
                    adapter.on_local_candidate(candidate).await?;
                }
                Some(EngineEvent::StateChanged(state)) => {
                    info!(?state, "peer connection state");
                    if state.is_terminal() {
                        return Ok(match state {
                            PeerState::Failed => PeerExit::ConnectionFailed,
                            _ => PeerExit::ConnectionClosed,
                        });
                    }
                }
                None => return Ok(PeerExit::ConnectionClosed),
            },
            envelope = incoming.recv() => match envelope {
                Some(envelope) => adapter.on_envelope(&envelope).await?,
                None => {
                    warn!("switchboard connection closed");
                    return Ok(PeerExit::SignalingClosed);
                }
            },
            _ = &mut interrupt => return Ok(PeerExit::Interrupted),
        }
    }
}
