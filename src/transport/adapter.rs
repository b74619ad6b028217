//! Transport session adapter interface
//!
//! The coordinator never talks to a media engine directly; it drives an
//! implementation of [`MediaTransport`] supplied by the embedding
//! application. One [`TransportSession`] exists per directed media
//! relationship: a source's uplink, or one listener's downlink.
//!
//! Adapter-originated events (an inbound feed appearing, trickled ICE
//! candidates) are never delivered as callbacks into coordinator state.
//! The adapter writes [`SessionEvent`]s into the channel handed to
//! [`MediaTransport::create`]; the coordinator pumps that channel and
//! schedules the resulting work on its own serialized control path.

use std::any::Any;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// Kind of a session description in an offer/answer exchange
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpKind {
    /// Local or remote offer
    Offer,
    /// Local or remote answer
    Answer,
}

/// An SDP blob plus its role in the exchange
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    /// Offer or answer
    #[serde(rename = "type")]
    pub kind: SdpKind,
    /// The SDP payload
    pub sdp: String,
}

impl SessionDescription {
    /// Build an offer description
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpKind::Offer,
            sdp: sdp.into(),
        }
    }

    /// Build an answer description
    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpKind::Answer,
            sdp: sdp.into(),
        }
    }
}

/// A trickled ICE candidate
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceCandidate {
    /// Candidate line
    pub candidate: String,
    /// Media stream identification tag, if the engine provides one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,
    /// Media line index, if the engine provides one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp_mline_index: Option<u32>,
}

impl IceCandidate {
    /// Candidate with just a candidate line
    pub fn new(candidate: impl Into<String>) -> Self {
        Self {
            candidate: candidate.into(),
            sdp_mid: None,
            sdp_mline_index: None,
        }
    }
}

static NEXT_FEED_ID: AtomicU64 = AtomicU64::new(1);

/// Opaque handle to a relayed inbound audio feed
///
/// Cloning the handle shares the same underlying relay: the engine attaches
/// a non-re-encoded copy of the feed to each session the clone is given to.
/// Identity is by handle id, so the coordinator can tell a replaced feed
/// from the one it snapshotted before an await point.
#[derive(Clone)]
pub struct FeedHandle {
    id: u64,
    payload: Arc<dyn Any + Send + Sync>,
}

impl FeedHandle {
    /// Wrap an engine-specific feed object
    pub fn new(payload: impl Any + Send + Sync) -> Self {
        Self {
            id: NEXT_FEED_ID.fetch_add(1, Ordering::Relaxed),
            payload: Arc::new(payload),
        }
    }

    /// Stable identity of this feed registration
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Borrow the engine-specific payload, if it is of type `T`
    pub fn payload<T: Any>(&self) -> Option<&T> {
        self.payload.downcast_ref()
    }

    #[cfg(test)]
    pub(crate) fn for_tests() -> Self {
        Self::new(())
    }
}

impl PartialEq for FeedHandle {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for FeedHandle {}

impl std::fmt::Debug for FeedHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FeedHandle").field("id", &self.id).finish()
    }
}

/// Event emitted by a transport session
///
/// Delivered over the channel passed to [`MediaTransport::create`]; the
/// coordinator tags events with the owning connection when it pumps them.
#[derive(Debug)]
pub enum SessionEvent {
    /// The remote peer's audio feed arrived on this session
    InboundFeed(FeedHandle),
    /// The engine generated a local ICE candidate to trickle to the peer
    IceCandidate(IceCandidate),
}

/// Error type for transport adapter operations
#[derive(Debug, Clone)]
pub enum TransportError {
    /// The media engine failed internally
    Engine(String),
    /// A session description was rejected
    InvalidDescription(String),
    /// The session was already closed
    SessionClosed,
    /// The operation did not complete within the negotiation timeout
    Timeout,
}

impl std::fmt::Display for TransportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportError::Engine(msg) => write!(f, "Media engine error: {}", msg),
            TransportError::InvalidDescription(msg) => {
                write!(f, "Invalid session description: {}", msg)
            }
            TransportError::SessionClosed => write!(f, "Transport session is closed"),
            TransportError::Timeout => write!(f, "Transport operation timed out"),
        }
    }
}

impl std::error::Error for TransportError {}

/// Factory for transport sessions, implemented by the embedding application
#[async_trait]
pub trait MediaTransport: Send + Sync {
    /// Create a new session
    ///
    /// Events for the session's lifetime are written to `events`; the
    /// adapter must stop writing once the session is closed.
    async fn create(
        &self,
        events: mpsc::UnboundedSender<SessionEvent>,
    ) -> Result<Arc<dyn TransportSession>, TransportError>;
}

/// One negotiated peer connection for one directed media relationship
#[async_trait]
pub trait TransportSession: Send + Sync {
    /// Apply the remote peer's session description
    async fn set_remote_description(&self, desc: SessionDescription)
        -> Result<(), TransportError>;

    /// Produce a local offer describing this session
    async fn create_offer(&self) -> Result<SessionDescription, TransportError>;

    /// Produce a local answer to a previously applied remote offer
    async fn create_answer(&self) -> Result<SessionDescription, TransportError>;

    /// Apply a trickled remote ICE candidate
    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), TransportError>;

    /// Attach a relayed copy of a source feed as this session's outbound audio
    async fn attach_feed(&self, feed: FeedHandle) -> Result<(), TransportError>;

    /// Close the session and release engine resources; must be idempotent
    async fn close(&self);
}
