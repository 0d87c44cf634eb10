//! Wire types shared by the switchboard hub and its peers.
//!
//! Every frame on the signaling socket is one JSON [`Envelope`]. The hub only
//! reads the routing fields; the `message` body is decoded by peers through
//! [`NegotiationPayload`].

mod envelope;
mod payload;

pub use envelope::{decode, decode_bytes, encode, CodecError, Envelope, EnvelopeKind, Identity};
pub use payload::{
    CandidatePayload, DescriptionKind, NegotiationPayload, PayloadError, SessionDescriptionPayload,
};

/// Marker peers send in the `message` field of a `register` envelope.
pub const DEFAULT_LOGIN_MARKER: &str = "login";
