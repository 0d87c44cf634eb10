use std::sync::Arc;

use async_trait::async_trait;
use switchboard_proto::{CandidatePayload, DescriptionKind, SessionDescriptionPayload};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use webrtc::api::setting_engine::SettingEngine;
use webrtc::api::APIBuilder;
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;

pub const DEFAULT_STUN_SERVER: &str = "stun:stun.l.google.com:19302";

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("webrtc error: {0}")]
    Rtc(#[from] webrtc::Error),
    #[error("{0}")]
    Rejected(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

impl PeerState {
    /// Failed and Closed end the peer; nothing reconnects.
    pub fn is_terminal(&self) -> bool {
        matches!(self, PeerState::Failed | PeerState::Closed)
    }
}

impl From<RTCPeerConnectionState> for PeerState {
    fn from(state: RTCPeerConnectionState) -> Self {
        match state {
            RTCPeerConnectionState::Connecting => PeerState::Connecting,
            RTCPeerConnectionState::Connected => PeerState::Connected,
            RTCPeerConnectionState::Disconnected => PeerState::Disconnected,
            RTCPeerConnectionState::Failed => PeerState::Failed,
            RTCPeerConnectionState::Closed => PeerState::Closed,
            _ => PeerState::New,
        }
    }
}

/// Callbacks from the engine, delivered in the order the engine raised them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    LocalCandidate(CandidatePayload),
    StateChanged(PeerState),
}

/// The operations the negotiation adapter needs from a peer connection.
#[async_trait]
pub trait NegotiationEngine: Send + Sync {
    async fn create_offer(&self) -> Result<SessionDescriptionPayload, EngineError>;
    async fn create_answer(&self) -> Result<SessionDescriptionPayload, EngineError>;
    async fn set_local_description(
        &self,
        description: SessionDescriptionPayload,
    ) -> Result<(), EngineError>;
    async fn set_remote_description(
        &self,
        description: SessionDescriptionPayload,
    ) -> Result<(), EngineError>;
    async fn add_ice_candidate(&self, candidate: CandidatePayload) -> Result<(), EngineError>;
    async fn close(&self) -> Result<(), EngineError>;
}

pub fn stun_servers(urls: &[String]) -> Vec<RTCIceServer> {
    if urls.is_empty() {
        return Vec::new();
    }
    vec![RTCIceServer {
        urls: urls.to_vec(),
        ..Default::default()
    }]
}

/// [`NegotiationEngine`] over a `webrtc` peer connection.
pub struct RtcEngine {
    peer_connection: Arc<RTCPeerConnection>,
}

impl RtcEngine {
    pub async fn new(
        ice_servers: Vec<RTCIceServer>,
    ) -> Result<(Self, mpsc::UnboundedReceiver<EngineEvent>), EngineError> {
        Self::with_setting_engine(ice_servers, SettingEngine::default()).await
    }

    /// Like [`RtcEngine::new`] with custom transport settings, e.g. loopback
    /// candidates for same-host peers.
    pub async fn with_setting_engine(
        ice_servers: Vec<RTCIceServer>,
        settings: SettingEngine,
    ) -> Result<(Self, mpsc::UnboundedReceiver<EngineEvent>), EngineError> {
        let api = APIBuilder::new().with_setting_engine(settings).build();
        let rtc_config = RTCConfiguration {
            ice_servers,
            ..Default::default()
        };
        let peer_connection = Arc::new(api.new_peer_connection(rtc_config).await?);
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let candidate_tx = events_tx.clone();
        peer_connection.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
            let events = candidate_tx.clone();
            Box::pin(async move {
                // `None` marks the end of gathering.
                let Some(candidate) = candidate else {
                    debug!("ice gathering complete");
                    return;
                };
                match candidate.to_json() {
                    Ok(init) => {
                        let _ = events.send(EngineEvent::LocalCandidate(from_init(init)));
                    }
                    Err(err) => warn!(error = %err, "failed to serialise local candidate"),
                }
            })
        }));

        let state_tx = events_tx;
        peer_connection.on_peer_connection_state_change(Box::new(
            move |state: RTCPeerConnectionState| {
                let events = state_tx.clone();
                Box::pin(async move {
                    info!(state = %state, "peer connection state has changed");
                    let _ = events.send(EngineEvent::StateChanged(PeerState::from(state)));
                })
            },
        ));

        Ok((Self { peer_connection }, events_rx))
    }

    pub fn peer_connection(&self) -> Arc<RTCPeerConnection> {
        Arc::clone(&self.peer_connection)
    }
}

#[async_trait]
impl NegotiationEngine for RtcEngine {
    async fn create_offer(&self) -> Result<SessionDescriptionPayload, EngineError> {
        let offer = self.peer_connection.create_offer(None).await?;
        Ok(SessionDescriptionPayload {
            kind: DescriptionKind::Offer,
            sdp: offer.sdp,
        })
    }

    async fn create_answer(&self) -> Result<SessionDescriptionPayload, EngineError> {
        let answer = self.peer_connection.create_answer(None).await?;
        Ok(SessionDescriptionPayload {
            kind: DescriptionKind::Answer,
            sdp: answer.sdp,
        })
    }

    async fn set_local_description(
        &self,
        description: SessionDescriptionPayload,
    ) -> Result<(), EngineError> {
        self.peer_connection
            .set_local_description(to_rtc(description)?)
            .await?;
        Ok(())
    }

    async fn set_remote_description(
        &self,
        description: SessionDescriptionPayload,
    ) -> Result<(), EngineError> {
        self.peer_connection
            .set_remote_description(to_rtc(description)?)
            .await?;
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: CandidatePayload) -> Result<(), EngineError> {
        self.peer_connection
            .add_ice_candidate(RTCIceCandidateInit {
                candidate: candidate.candidate,
                sdp_mid: candidate.sdp_mid,
                sdp_mline_index: candidate.sdp_mline_index,
                username_fragment: candidate.username_fragment,
            })
            .await?;
        Ok(())
    }

    async fn close(&self) -> Result<(), EngineError> {
        self.peer_connection.close().await?;
        Ok(())
    }
}

fn to_rtc(description: SessionDescriptionPayload) -> Result<RTCSessionDescription, EngineError> {
    let rtc = match description.kind {
        DescriptionKind::Offer => RTCSessionDescription::offer(description.sdp)?,
        DescriptionKind::Answer => RTCSessionDescription::answer(description.sdp)?,
    };
    Ok(rtc)
}

fn from_init(init: RTCIceCandidateInit) -> CandidatePayload {
    CandidatePayload {
        candidate: init.candidate,
        sdp_mid: init.sdp_mid,
        sdp_mline_index: init.sdp_mline_index,
        username_fragment: init.username_fragment,
    }
}
