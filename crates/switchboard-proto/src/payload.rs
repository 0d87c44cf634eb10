use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::envelope::{Envelope, EnvelopeKind, Identity};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DescriptionKind {
    Offer,
    Answer,
}

/// Session description carried verbatim in an `sdp` envelope.
///
/// The wire only carries the SDP text; which side of the exchange it belongs
/// to is known from the receiver's role.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionDescriptionPayload {
    pub kind: DescriptionKind,
    pub sdp: String,
}

/// ICE candidate descriptor, JSON encoded inside a `candidate` envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CandidatePayload {
    pub candidate: String,
    #[serde(default)]
    pub sdp_mid: Option<String>,
    #[serde(default, rename = "sdpMLineIndex")]
    pub sdp_mline_index: Option<u16>,
    #[serde(default)]
    pub username_fragment: Option<String>,
}

impl CandidatePayload {
    pub fn new(candidate: impl Into<String>) -> Self {
        Self {
            candidate: candidate.into(),
            sdp_mid: None,
            sdp_mline_index: None,
            username_fragment: None,
        }
    }

    /// Accepts the JSON object form, or a bare `candidate:` attribute line
    /// as older peers sent.
    pub fn parse(message: &str) -> Result<Self, PayloadError> {
        let trimmed = message.trim();
        if trimmed.starts_with('{') {
            return serde_json::from_str(trimmed).map_err(PayloadError::Candidate);
        }
        if trimmed.starts_with("candidate:") {
            return Ok(Self::new(trimmed));
        }
        Err(PayloadError::UnrecognisedCandidate(trimmed.to_string()))
    }

    pub fn to_message(&self) -> Result<String, PayloadError> {
        serde_json::to_string(self).map_err(PayloadError::Candidate)
    }
}

/// Typed view over an envelope body. Only peers decode this; the hub never does.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NegotiationPayload {
    Description(SessionDescriptionPayload),
    Candidate(CandidatePayload),
}

#[derive(Debug, Error)]
pub enum PayloadError {
    #[error("envelope of type {0} carries no negotiation payload")]
    NotNegotiation(EnvelopeKind),
    #[error("empty session description")]
    EmptyDescription,
    #[error("invalid candidate payload: {0}")]
    Candidate(#[source] serde_json::Error),
    #[error("unrecognised candidate payload: {0:?}")]
    UnrecognisedCandidate(String),
}

impl NegotiationPayload {
    /// Decode the body of a routed envelope. `incoming` names the description
    /// kind this receiver expects from its remote.
    pub fn from_envelope(
        envelope: &Envelope,
        incoming: DescriptionKind,
    ) -> Result<Self, PayloadError> {
        match envelope.kind() {
            EnvelopeKind::Sdp => {
                if envelope.message().trim().is_empty() {
                    return Err(PayloadError::EmptyDescription);
                }
                Ok(NegotiationPayload::Description(SessionDescriptionPayload {
                    kind: incoming,
                    sdp: envelope.message().to_string(),
                }))
            }
            EnvelopeKind::Candidate => Ok(NegotiationPayload::Candidate(CandidatePayload::parse(
                envelope.message(),
            )?)),
            other => Err(PayloadError::NotNegotiation(other)),
        }
    }

    pub fn into_envelope(
        self,
        caller: &Identity,
        callee: &Identity,
    ) -> Result<Envelope, PayloadError> {
        match self {
            NegotiationPayload::Description(description) => {
                Ok(Envelope::sdp(caller.clone(), callee.clone(), description.sdp))
            }
            NegotiationPayload::Candidate(candidate) => Ok(Envelope::candidate(
                caller.clone(),
                callee.clone(),
                candidate.to_message()?,
            )),
        }
    }
}
