//! Transport session table
//!
//! One entry per active transport session, keyed by the owning connection:
//! uplinks for sources, downlinks for listeners. Entries carry a generation
//! tag allocated when their negotiation started; commits that lost a race
//! against a newer negotiation or a disconnect are refused so the caller
//! can discard and close the stale session instead of reinserting it.
//!
//! The table holds no lock of its own; it lives inside the coordinator
//! state alongside the registry, under the same mutex.

use std::collections::HashMap;
use std::sync::Arc;

use crate::registry::ConnId;
use crate::transport::TransportSession;

/// Which of the two directed-session tables a key lives in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lane {
    /// The source's own media-ingest session
    Uplink,
    /// One listener's relay session
    Downlink,
}

impl std::fmt::Display for Lane {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Lane::Uplink => f.write_str("uplink"),
            Lane::Downlink => f.write_str("downlink"),
        }
    }
}

/// A stored session plus the generation of the negotiation that created it
#[derive(Clone)]
pub struct SessionEntry {
    /// Adapter handle; closing it is the responsibility of whoever removes
    /// the entry from the table
    pub session: Arc<dyn TransportSession>,
    /// Generation tag allocated when the negotiation began
    pub generation: u64,
}

impl std::fmt::Debug for SessionEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionEntry")
            .field("generation", &self.generation)
            .finish_non_exhaustive()
    }
}

/// Session table for both lanes
#[derive(Default)]
pub struct SessionTable {
    uplinks: HashMap<ConnId, SessionEntry>,
    downlinks: HashMap<ConnId, SessionEntry>,
}

impl SessionTable {
    /// Create an empty table
    pub fn new() -> Self {
        Self::default()
    }

    fn lane(&self, lane: Lane) -> &HashMap<ConnId, SessionEntry> {
        match lane {
            Lane::Uplink => &self.uplinks,
            Lane::Downlink => &self.downlinks,
        }
    }

    fn lane_mut(&mut self, lane: Lane) -> &mut HashMap<ConnId, SessionEntry> {
        match lane {
            Lane::Uplink => &mut self.uplinks,
            Lane::Downlink => &mut self.downlinks,
        }
    }

    /// Insert an entry, returning the displaced one for the caller to close
    pub fn insert(&mut self, lane: Lane, conn: ConnId, entry: SessionEntry) -> Option<SessionEntry> {
        self.lane_mut(lane).insert(conn, entry)
    }

    /// Commit an entry only if no newer negotiation already holds the slot
    ///
    /// On success returns the displaced older entry, if any. On failure the
    /// rejected entry is handed back so the caller can close its session.
    pub fn insert_if_newer(
        &mut self,
        lane: Lane,
        conn: ConnId,
        entry: SessionEntry,
    ) -> Result<Option<SessionEntry>, SessionEntry> {
        let map = self.lane_mut(lane);
        match map.get(&conn) {
            Some(existing) if existing.generation > entry.generation => Err(entry),
            _ => Ok(map.insert(conn, entry)),
        }
    }

    /// Remove and return the entry for a connection
    pub fn take(&mut self, lane: Lane, conn: ConnId) -> Option<SessionEntry> {
        self.lane_mut(lane).remove(&conn)
    }

    /// Look up the entry for a connection
    pub fn get(&self, lane: Lane, conn: ConnId) -> Option<&SessionEntry> {
        self.lane(lane).get(&conn)
    }

    /// Generation of the stored entry, if one exists
    pub fn generation(&self, lane: Lane, conn: ConnId) -> Option<u64> {
        self.lane(lane).get(&conn).map(|e| e.generation)
    }

    /// Whether a connection owns a session in the given lane
    pub fn contains(&self, lane: Lane, conn: ConnId) -> bool {
        self.lane(lane).contains_key(&conn)
    }

    /// Number of sessions in a lane
    pub fn len(&self, lane: Lane) -> usize {
        self.lane(lane).len()
    }
}
