//! Coordinator configuration

use std::time::Duration;

/// Configuration options for the relay coordinator
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Capacity of each connection's outbound message channel
    pub outbox_capacity: usize,

    /// Maximum accepted SDP payload size in bytes
    pub max_sdp_bytes: usize,

    /// Maximum accepted ICE candidate payload size in bytes
    pub max_candidate_bytes: usize,

    /// Upper bound on any single transport adapter call; a stuck engine
    /// negotiation for one connection must not stall the rest
    pub negotiation_timeout: Duration,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            outbox_capacity: 128,
            max_sdp_bytes: 32 * 1024,
            max_candidate_bytes: 4096,
            negotiation_timeout: Duration::from_secs(10),
        }
    }
}

impl CoordinatorConfig {
    /// Set the outbox channel capacity
    pub fn outbox_capacity(mut self, capacity: usize) -> Self {
        self.outbox_capacity = capacity.max(1);
        self
    }

    /// Set the maximum SDP payload size
    pub fn max_sdp_bytes(mut self, bytes: usize) -> Self {
        self.max_sdp_bytes = bytes;
        self
    }

    /// Set the maximum ICE candidate payload size
    pub fn max_candidate_bytes(mut self, bytes: usize) -> Self {
        self.max_candidate_bytes = bytes;
        self
    }

    /// Set the adapter negotiation timeout
    pub fn negotiation_timeout(mut self, timeout: Duration) -> Self {
        self.negotiation_timeout = timeout;
        self
    }
}
