//! Glue between a [`NegotiationEngine`] and the switchboard.
//!
//! The engine can discover local candidates before the remote side's
//! description is known. Those are held in a [`PendingCandidates`] buffer and
//! flushed, in discovery order, right after the remote description is applied.
//! Candidates discovered later go straight out.

use std::collections::VecDeque;
use std::sync::Arc;

use clap::ValueEnum;
use switchboard_proto::{
    CandidatePayload, DescriptionKind, Envelope, EnvelopeKind, Identity, NegotiationPayload,
    PayloadError, DEFAULT_LOGIN_MARKER,
};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::engine::{EngineError, NegotiationEngine};
use crate::signaling::{EnvelopeSink, SignalingError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Role {
    /// Creates the offer and the data channel.
    Offerer,
    /// Waits for an offer and answers it.
    Answerer,
}

impl Role {
    /// Description kind this role receives from its remote.
    pub fn incoming(&self) -> DescriptionKind {
        match self {
            Role::Offerer => DescriptionKind::Answer,
            Role::Answerer => DescriptionKind::Offer,
        }
    }
}

#[derive(Debug, Error)]
pub enum NegotiationError {
    #[error("negotiation engine failed: {0}")]
    Engine(#[from] EngineError),
    #[error("candidate from {0} arrived before the remote description")]
    CandidateBeforeDescription(Identity),
    #[error("malformed negotiation payload: {0}")]
    Payload(#[from] PayloadError),
    #[error(transparent)]
    Signaling(#[from] SignalingError),
    #[error("only the offerer starts negotiation")]
    NotOfferer,
}

/// Local candidates waiting for the remote description.
#[derive(Debug, Default)]
pub struct PendingCandidates {
    remote_known: bool,
    queue: VecDeque<CandidatePayload>,
}

impl PendingCandidates {
    pub fn remote_known(&self) -> bool {
        self.remote_known
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    fn push(&mut self, candidate: CandidatePayload) {
        self.queue.push_back(candidate);
    }

    /// Hand back everything buffered and stop buffering.
    fn release(&mut self) -> Vec<CandidatePayload> {
        self.remote_known = true;
        self.queue.drain(..).collect()
    }
}

pub struct NegotiationAdapter<E, S> {
    engine: Arc<E>,
    sink: S,
    local: Identity,
    remote: Identity,
    role: Role,
    login_marker: String,
    pending: Mutex<PendingCandidates>,
}

impl<E, S> NegotiationAdapter<E, S>
where
    E: NegotiationEngine,
    S: EnvelopeSink,
{
    pub fn new(engine: Arc<E>, sink: S, local: Identity, remote: Identity, role: Role) -> Self {
        Self {
            engine,
            sink,
            local,
            remote,
            role,
            login_marker: DEFAULT_LOGIN_MARKER.to_string(),
            pending: Mutex::new(PendingCandidates::default()),
        }
    }

    pub fn with_login_marker(mut self, marker: impl Into<String>) -> Self {
        self.login_marker = marker.into();
        self
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn engine(&self) -> &Arc<E> {
        &self.engine
    }

    /// Announce the local identity. The hub never acknowledges this.
    pub async fn register(&self) -> Result<(), NegotiationError> {
        info!(identity = %self.local, "registering with switchboard");
        self.sink
            .send_envelope(Envelope::register(
                self.local.clone(),
                self.login_marker.clone(),
            ))
            .await?;
        Ok(())
    }

    /// Create the offer, apply it locally and send it to the remote.
    pub async fn start_offer(&self) -> Result<(), NegotiationError> {
        if self.role != Role::Offerer {
            return Err(NegotiationError::NotOfferer);
        }
        let offer = self.engine.create_offer().await?;
        self.engine.set_local_description(offer.clone()).await?;
        info!(remote = %self.remote, "sending offer");
        self.send_payload(NegotiationPayload::Description(offer))
            .await
    }

    pub async fn on_local_candidate(
        &self,
        candidate: CandidatePayload,
    ) -> Result<(), NegotiationError> {
        let mut pending = self.pending.lock().await;
        if !pending.remote_known() {
            debug!(candidate = %candidate.candidate, "buffering local candidate");
            pending.push(candidate);
            return Ok(());
        }
        self.send_payload(NegotiationPayload::Candidate(candidate))
            .await
    }

    pub async fn on_envelope(&self, envelope: &Envelope) -> Result<(), NegotiationError> {
        if envelope.kind() == EnvelopeKind::Register {
            debug!(caller = %envelope.caller(), "ignoring register envelope");
            return Ok(());
        }
        if envelope.caller() != &self.remote {
            warn!(
                caller = %envelope.caller(),
                expected = %self.remote,
                "negotiation message from unexpected peer"
            );
        }

        match NegotiationPayload::from_envelope(envelope, self.role.incoming())? {
            NegotiationPayload::Description(description) => {
                // Held across the whole exchange so no candidate slips out
                // ahead of the flushed backlog.
                let mut pending = self.pending.lock().await;
                info!(
                    caller = %envelope.caller(),
                    kind = ?description.kind,
                    "applying remote description"
                );
                self.engine.set_remote_description(description).await?;

                if self.role == Role::Answerer {
                    let answer = self.engine.create_answer().await?;
                    self.send_payload(NegotiationPayload::Description(answer.clone()))
                        .await?;
                    self.engine.set_local_description(answer).await?;
                }

                let backlog = pending.release();
                if !backlog.is_empty() {
                    debug!(count = backlog.len(), "flushing buffered candidates");
                }
                for candidate in backlog {
                    self.send_payload(NegotiationPayload::Candidate(candidate))
                        .await?;
                }
                Ok(())
            }
            NegotiationPayload::Candidate(candidate) => {
                if !self.pending.lock().await.remote_known() {
                    return Err(NegotiationError::CandidateBeforeDescription(
                        envelope.caller().clone(),
                    ));
                }
                self.engine.add_ice_candidate(candidate).await?;
                Ok(())
            }
        }
    }

    async fn send_payload(&self, payload: NegotiationPayload) -> Result<(), NegotiationError> {
        let envelope = payload.into_envelope(&self.local, &self.remote)?;
        self.sink.send_envelope(envelope).await?;
        Ok(())
    }
}
