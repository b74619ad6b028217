//! Per-connection interaction phase
//!
//! Each signaling connection walks a small state machine from `Unbound`
//! through either the source or the listener path, ending in `Closed` on
//! disconnect. The router consults the phase for logging and the status
//! snapshot; the authoritative role check is the registry binding.

/// Interaction phase of one signaling connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionPhase {
    /// Connected, no role yet
    Unbound,
    /// Announced as a source, uplink offer/answer in flight
    SourceNegotiating,
    /// Source with a negotiated uplink
    SourceActive,
    /// Subscribed as a listener, no downlink yet
    ListenerRegistered,
    /// Downlink offer sent, waiting for the listener's answer
    ListenerNegotiating,
    /// Listener with a negotiated downlink
    ListenerActive,
    /// Disconnected
    Closed,
}

impl ConnectionPhase {
    /// Phase for a connection that just registered
    pub fn new() -> Self {
        ConnectionPhase::Unbound
    }

    /// Whether the connection is on the source path
    pub fn is_source(&self) -> bool {
        matches!(
            self,
            ConnectionPhase::SourceNegotiating | ConnectionPhase::SourceActive
        )
    }

    /// Whether the connection is on the listener path
    pub fn is_listener(&self) -> bool {
        matches!(
            self,
            ConnectionPhase::ListenerRegistered
                | ConnectionPhase::ListenerNegotiating
                | ConnectionPhase::ListenerActive
        )
    }

    /// Whether the connection has disconnected
    pub fn is_closed(&self) -> bool {
        *self == ConnectionPhase::Closed
    }

    /// Enter the source path (on announce)
    pub fn bind_source(&mut self) {
        if !self.is_closed() {
            *self = ConnectionPhase::SourceNegotiating;
        }
    }

    /// Uplink negotiated (feed may or may not have arrived yet)
    pub fn mark_source_active(&mut self) {
        if *self == ConnectionPhase::SourceNegotiating {
            *self = ConnectionPhase::SourceActive;
        }
    }

    /// Enter the listener path (on subscribe)
    pub fn bind_listener(&mut self) {
        if !self.is_closed() {
            *self = ConnectionPhase::ListenerRegistered;
        }
    }

    /// A downlink offer went out to this listener
    pub fn begin_listener_negotiation(&mut self) {
        if self.is_listener() {
            *self = ConnectionPhase::ListenerNegotiating;
        }
    }

    /// The listener answered its downlink offer
    pub fn mark_listener_active(&mut self) {
        if *self == ConnectionPhase::ListenerNegotiating {
            *self = ConnectionPhase::ListenerActive;
        }
    }

    /// Drop back to the registered state (downlink torn down, still subscribed)
    pub fn reset_listener(&mut self) {
        if self.is_listener() {
            *self = ConnectionPhase::ListenerRegistered;
        }
    }

    /// Unbind without disconnecting (unsubscribe, stop)
    pub fn unbind(&mut self) {
        if !self.is_closed() {
            *self = ConnectionPhase::Unbound;
        }
    }

    /// Terminal transition on disconnect
    pub fn close(&mut self) {
        *self = ConnectionPhase::Closed;
    }
}

impl Default for ConnectionPhase {
    fn default() -> Self {
        Self::new()
    }
}
