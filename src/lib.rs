//! Signaling and relay-session coordinator for live audio broadcast
//!
//! A stateful broker between broadcasting "sources" and subscribed
//! "listeners": it tracks who is live and who is listening, negotiates one
//! transport session per listener against a shared source feed, and keeps
//! that state consistent under concurrent joins, leaves, and disconnects.
//! The media engine itself (ICE, SDP, DTLS/SRTP, packets) sits behind the
//! [`transport::MediaTransport`] seam and is supplied by the embedding
//! application.
//!
//! # Architecture
//!
//! ```text
//!   source ──offer──► RelayCoordinator ◄──subscribe── listener
//!                      │  Registry: bindings, subscriptions, feeds
//!                      │  SessionTable: uplinks / downlinks
//!                      ▼
//!              MediaTransport adapter
//!        uplink session      one downlink session per listener
//!              │                       ▲
//!              └── inbound feed ── relayed copies (fan-out)
//! ```
//!
//! # Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use fieldcast_rs::{ClientMessage, RelayCoordinator, SourceId};
//! use fieldcast_rs::transport::LoopbackTransport;
//!
//! # async fn run() {
//! let transport = Arc::new(LoopbackTransport::new());
//! let coordinator = RelayCoordinator::new(transport);
//!
//! // One connection per participant; the embedding server drains the
//! // returned outbox onto its delivery channel.
//! let (listener, mut outbox) = coordinator.connect().await;
//! coordinator
//!     .handle_message(
//!         listener,
//!         ClientMessage::Subscribe {
//!             source_id: SourceId::new("agent-7"),
//!             info: Default::default(),
//!         },
//!     )
//!     .await;
//! let confirmation = outbox.recv().await;
//! # let _ = confirmation;
//! # }
//! ```

pub mod coordinator;
pub mod error;
pub mod registry;
pub mod session;
pub mod signal;
pub mod stats;
pub mod transport;

pub use coordinator::{CoordinatorConfig, RelayCoordinator};
pub use error::{Error, Result};
pub use registry::{ConnId, ParticipantInfo, SourceId};
pub use signal::{ClientMessage, ServerMessage};
pub use stats::{SourceStatus, StatusSnapshot};
pub use transport::{
    FeedHandle, IceCandidate, MediaTransport, SessionDescription, TransportSession,
};
