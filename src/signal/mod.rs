//! Signaling plane: wire messages and per-connection outboxes
//!
//! The coordinator assumes a reliable, ordered, per-connection duplex
//! channel (a WebSocket in the usual deployment). This module defines what
//! travels over it and the outbox registry that decouples the control path
//! from delivery.

pub mod message;
pub mod outbox;

pub use message::{ClientMessage, ServerMessage};
pub use outbox::OutboxRegistry;
