use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Caller-chosen name a peer registers under. Never validated by the hub.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Identity(String);

impl Identity {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Identity {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for Identity {
    fn from(value: String) -> Self {
        Self(value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnvelopeKind {
    Register,
    Sdp,
    Candidate,
}

impl EnvelopeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EnvelopeKind::Register => "register",
            EnvelopeKind::Sdp => "sdp",
            EnvelopeKind::Candidate => "candidate",
        }
    }
}

impl fmt::Display for EnvelopeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One routed unit of signaling. Fields are read-only after construction.
///
/// `callee` and `message` decode as empty when absent; a `register` frame
/// needs neither.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    caller: Identity,
    #[serde(default)]
    callee: Identity,
    #[serde(default)]
    message: String,
    #[serde(rename = "type")]
    kind: EnvelopeKind,
}

impl Envelope {
    pub fn new(
        caller: impl Into<Identity>,
        callee: impl Into<Identity>,
        message: impl Into<String>,
        kind: EnvelopeKind,
    ) -> Self {
        Self {
            caller: caller.into(),
            callee: callee.into(),
            message: message.into(),
            kind,
        }
    }

    /// A `register` envelope; `callee` mirrors `caller` by convention.
    pub fn register(identity: impl Into<Identity>, marker: impl Into<String>) -> Self {
        let identity = identity.into();
        Self::new(identity.clone(), identity, marker, EnvelopeKind::Register)
    }

    pub fn sdp(
        caller: impl Into<Identity>,
        callee: impl Into<Identity>,
        description: impl Into<String>,
    ) -> Self {
        Self::new(caller, callee, description, EnvelopeKind::Sdp)
    }

    pub fn candidate(
        caller: impl Into<Identity>,
        callee: impl Into<Identity>,
        candidate: impl Into<String>,
    ) -> Self {
        Self::new(caller, callee, candidate, EnvelopeKind::Candidate)
    }

    pub fn caller(&self) -> &Identity {
        &self.caller
    }

    pub fn callee(&self) -> &Identity {
        &self.callee
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn kind(&self) -> EnvelopeKind {
        self.kind
    }

    /// Copy of this envelope with `caller` replaced by the sender's bound identity.
    pub fn with_caller(&self, caller: &Identity) -> Self {
        Self {
            caller: caller.clone(),
            callee: self.callee.clone(),
            message: self.message.clone(),
            kind: self.kind,
        }
    }
}

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("invalid envelope: {0}")]
    Json(#[from] serde_json::Error),
    #[error("binary frame is not valid utf-8")]
    NotUtf8(#[from] std::str::Utf8Error),
}

pub fn encode(envelope: &Envelope) -> Result<String, CodecError> {
    Ok(serde_json::to_string(envelope)?)
}

pub fn decode(text: &str) -> Result<Envelope, CodecError> {
    Ok(serde_json::from_str(text)?)
}

/// Decode a binary frame carrying the same JSON as a text frame.
pub fn decode_bytes(bytes: &[u8]) -> Result<Envelope, CodecError> {
    let text = std::str::from_utf8(bytes)?;
    decode(text)
}
