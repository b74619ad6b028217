//! Read-only status snapshot
//!
//! A pure read of the registry for status endpoints: how many sources are
//! live, how many listeners are connected, and per-source detail. No
//! mutation, no transport access.

use serde::Serialize;

use crate::registry::{Registry, SourceId};

/// Per-source status detail
#[derive(Debug, Clone, Serialize)]
pub struct SourceStatus {
    /// The source identifier
    pub source_id: SourceId,
    /// Listeners currently subscribed
    pub listener_count: usize,
    /// Whether an inbound feed is registered (audio is flowing)
    pub live: bool,
    /// Whether a connection is currently bound as this source
    pub connected: bool,
}

/// Coordinator-wide status snapshot
#[derive(Debug, Clone, Default, Serialize)]
pub struct StatusSnapshot {
    /// Sources with an active feed
    pub active_sources: usize,
    /// Total listeners across all sources
    pub total_listeners: usize,
    /// Per-source detail, sorted by source id
    pub sources: Vec<SourceStatus>,
}

impl StatusSnapshot {
    /// Capture the current registry state
    pub fn capture(registry: &Registry) -> Self {
        let mut sources: Vec<SourceStatus> = registry
            .known_sources()
            .map(|id| SourceStatus {
                source_id: id.clone(),
                listener_count: registry.listener_count(id),
                live: registry.feed(id).is_some(),
                connected: registry.source_conn(id).is_some(),
            })
            .collect();
        sources.sort_by(|a, b| a.source_id.as_str().cmp(b.source_id.as_str()));

        Self {
            active_sources: registry.active_source_count(),
            total_listeners: registry.total_listener_count(),
            sources,
        }
    }
}
