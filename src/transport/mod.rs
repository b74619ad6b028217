//! Transport adapter seam and loopback implementation
//!
//! The media engine (ICE, SDP negotiation, DTLS/SRTP, packet transport) is
//! an external collaborator. This module defines the narrow interface the
//! coordinator consumes — [`MediaTransport`] creates sessions,
//! [`TransportSession`] drives one of them — plus the opaque value types
//! that cross it and a recording [`loopback`] implementation for tests and
//! demos.

pub mod adapter;
pub mod loopback;

pub use adapter::{
    FeedHandle, IceCandidate, MediaTransport, SdpKind, SessionDescription, SessionEvent,
    TransportError, TransportSession,
};
pub use loopback::{LoopbackSession, LoopbackTransport};
