//! Session state: per-connection phase and the transport session table
//!
//! The phase machine tracks where each connection is in its interaction
//! with the coordinator; the table owns the adapter handles for every
//! active uplink and downlink, tagged with negotiation generations.

pub mod phase;
pub mod table;

pub use phase::ConnectionPhase;
pub use table::{Lane, SessionEntry, SessionTable};
