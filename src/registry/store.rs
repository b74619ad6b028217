//! Participant registry implementation
//!
//! The central index of who is live and who is listening to whom: role
//! bindings per connection, subscription sets per source, and the inbound
//! feed registration for each source that currently has media flowing.
//!
//! The registry is a pure state container. It performs no network I/O and
//! holds no locks of its own; the coordinator serializes access and carries
//! out the side effects (closing transport sessions, notifying listeners)
//! described by the [`ConnectionCleanup`] reports returned from mutating
//! operations. This keeps state transitions testable without any transport
//! in the picture.

use std::collections::{HashMap, HashSet};

use crate::transport::FeedHandle;

use super::error::RegistryError;
use super::participant::{ConnId, ParticipantInfo, RoleBinding, SourceId};

/// A listener whose source went away and whose downlink must be torn down
#[derive(Debug, Clone)]
pub struct OrphanedListener {
    /// The listener connection
    pub conn: ConnId,
    /// The source it was subscribed to
    pub source_id: SourceId,
}

/// Derived cleanups the caller must perform after a binding was released
///
/// The registry mutates only its own maps; everything listed here is the
/// coordinator's responsibility.
#[derive(Debug, Default)]
pub struct ConnectionCleanup {
    /// The binding that was dropped, if any
    pub binding: Option<RoleBinding>,

    /// Feed registrations cleared because their bound source went away
    pub cleared_feeds: Vec<FeedHandle>,

    /// Listeners still subscribed to a source that went away; their downlink
    /// sessions must be closed and they should be told the stream ended
    pub orphaned: Vec<OrphanedListener>,

    /// A connection that lost its source binding because a newer connection
    /// announced the same source id
    pub displaced_source: Option<ConnId>,
}

impl ConnectionCleanup {
    /// Whether the release left nothing for the caller to do
    pub fn is_empty(&self) -> bool {
        self.binding.is_none()
            && self.cleared_feeds.is_empty()
            && self.orphaned.is_empty()
            && self.displaced_source.is_none()
    }
}

/// Bidirectional index of live sources, feeds, and listener subscriptions
#[derive(Default)]
pub struct Registry {
    /// Role binding per connection (at most one)
    bindings: HashMap<ConnId, RoleBinding>,

    /// Listener connections interested in each source; empty sets are pruned
    subscriptions: HashMap<SourceId, HashSet<ConnId>>,

    /// Inbound feed handle per source with active media
    feeds: HashMap<SourceId, FeedHandle>,

    /// Connection currently bound as the source for each source id
    source_conns: HashMap<SourceId, ConnId>,
}

impl Registry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a connection as the source for `source_id`
    ///
    /// Re-announcing the same source id from the same connection only
    /// refreshes the descriptor. Any other previous binding for the
    /// connection is released first, and a different connection bound as
    /// this source is displaced — the newest announcement wins. The report
    /// describes every side effect the caller must carry out.
    pub fn register_source(
        &mut self,
        conn: ConnId,
        source_id: SourceId,
        info: ParticipantInfo,
    ) -> ConnectionCleanup {
        if let Some(RoleBinding::Source { source_id: bound, info: bound_info }) =
            self.bindings.get_mut(&conn)
        {
            if *bound == source_id {
                *bound_info = info;
                return ConnectionCleanup::default();
            }
        }

        let mut cleanup = self.release_binding(conn);

        if let Some(previous) = self.source_conns.get(&source_id).copied() {
            tracing::info!(
                source = %source_id,
                previous = %previous,
                conn = %conn,
                "Source binding displaced by newer announcement"
            );
            let displaced = self.release_binding(previous);
            cleanup.cleared_feeds.extend(displaced.cleared_feeds);
            cleanup.orphaned.extend(displaced.orphaned);
            cleanup.displaced_source = Some(previous);
        }

        self.bindings.insert(
            conn,
            RoleBinding::Source {
                source_id: source_id.clone(),
                info,
            },
        );
        self.source_conns.insert(source_id.clone(), conn);

        tracing::info!(
            conn = %conn,
            source = %source_id,
            listeners = self.listener_count(&source_id),
            "Source registered"
        );
        cleanup
    }

    /// Bind a connection as a listener of `source_id` and add it to the
    /// subscription set
    ///
    /// Membership is idempotent: re-subscribing to the same source only
    /// refreshes the descriptor. A connection bound as a source may not
    /// subscribe. Returns the resulting listener count alongside the
    /// release report for any previous binding.
    pub fn register_listener(
        &mut self,
        conn: ConnId,
        source_id: SourceId,
        info: ParticipantInfo,
    ) -> Result<(usize, ConnectionCleanup), RegistryError> {
        match self.bindings.get_mut(&conn) {
            Some(RoleBinding::Source { source_id: bound, .. }) => {
                return Err(RegistryError::BoundAsSource(bound.clone()));
            }
            Some(RoleBinding::Listener { source_id: bound, info: bound_info })
                if *bound == source_id =>
            {
                *bound_info = info;
                return Ok((self.listener_count(&source_id), ConnectionCleanup::default()));
            }
            _ => {}
        }

        let cleanup = self.release_binding(conn);

        self.bindings.insert(
            conn,
            RoleBinding::Listener {
                source_id: source_id.clone(),
                info,
            },
        );
        let set = self.subscriptions.entry(source_id.clone()).or_default();
        set.insert(conn);
        let count = set.len();

        tracing::info!(
            conn = %conn,
            source = %source_id,
            listeners = count,
            "Listener subscribed"
        );
        Ok((count, cleanup))
    }

    /// Remove a connection and every reference to it
    ///
    /// Idempotent: removing an unknown connection returns an empty report.
    pub fn remove_connection(&mut self, conn: ConnId) -> ConnectionCleanup {
        let cleanup = self.release_binding(conn);
        if cleanup.binding.is_some() {
            tracing::debug!(conn = %conn, "Connection removed from registry");
        }
        cleanup
    }

    /// Drop a listener binding for `source_id` if the connection holds one
    ///
    /// Always succeeds; unsubscribing a non-member is a no-op.
    pub fn unsubscribe(&mut self, conn: ConnId, source_id: &SourceId) {
        let is_match = matches!(
            self.bindings.get(&conn),
            Some(RoleBinding::Listener { source_id: bound, .. }) if bound == source_id
        );
        if is_match {
            self.bindings.remove(&conn);
        }
        if let Some(set) = self.subscriptions.get_mut(source_id) {
            if set.remove(&conn) {
                tracing::debug!(conn = %conn, source = %source_id, "Listener unsubscribed");
            }
            if set.is_empty() {
                self.subscriptions.remove(source_id);
            }
        }
    }

    /// Current role binding for a connection
    pub fn binding(&self, conn: ConnId) -> Option<&RoleBinding> {
        self.bindings.get(&conn)
    }

    /// Connection currently bound as the source for `source_id`
    pub fn source_conn(&self, source_id: &SourceId) -> Option<ConnId> {
        self.source_conns.get(source_id).copied()
    }

    /// The registered feed for a source, if media is flowing
    pub fn feed(&self, source_id: &SourceId) -> Option<&FeedHandle> {
        self.feeds.get(source_id)
    }

    /// Register the inbound feed for a source, returning any replaced handle
    pub fn set_feed(&mut self, source_id: SourceId, feed: FeedHandle) -> Option<FeedHandle> {
        tracing::info!(source = %source_id, feed = feed.id(), "Feed registered");
        self.feeds.insert(source_id, feed)
    }

    /// Clear the feed registration for a source, returning the old handle
    ///
    /// The subscription set is untouched: listeners stay subscribed across
    /// transient feed loss.
    pub fn clear_feed(&mut self, source_id: &SourceId) -> Option<FeedHandle> {
        let old = self.feeds.remove(source_id);
        if old.is_some() {
            tracing::info!(source = %source_id, "Feed cleared");
        }
        old
    }

    /// Snapshot of the listeners subscribed to a source
    ///
    /// A snapshot, not a borrow, so callers can iterate while the set
    /// changes underneath them.
    pub fn listeners(&self, source_id: &SourceId) -> Vec<ConnId> {
        self.subscriptions
            .get(source_id)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Number of listeners subscribed to a source
    pub fn listener_count(&self, source_id: &SourceId) -> usize {
        self.subscriptions.get(source_id).map_or(0, HashSet::len)
    }

    /// Number of sources with an active feed
    pub fn active_source_count(&self) -> usize {
        self.feeds.len()
    }

    /// Total listener count across all sources
    pub fn total_listener_count(&self) -> usize {
        self.subscriptions.values().map(HashSet::len).sum()
    }

    /// Iterate every source id with subscribers, a live feed, or a bound
    /// source connection
    pub fn known_sources(&self) -> impl Iterator<Item = &SourceId> {
        let mut seen: HashSet<&SourceId> = HashSet::new();
        self.subscriptions
            .keys()
            .chain(self.feeds.keys())
            .chain(self.source_conns.keys())
            .filter(move |id| seen.insert(*id))
    }

    /// Drop the binding for `conn` and undo its registry entries
    fn release_binding(&mut self, conn: ConnId) -> ConnectionCleanup {
        let Some(binding) = self.bindings.remove(&conn) else {
            return ConnectionCleanup::default();
        };

        let mut cleanup = ConnectionCleanup::default();
        match &binding {
            RoleBinding::Listener { source_id, .. } => {
                if let Some(set) = self.subscriptions.get_mut(source_id) {
                    set.remove(&conn);
                    if set.is_empty() {
                        self.subscriptions.remove(source_id);
                    }
                }
            }
            RoleBinding::Source { source_id, .. } => {
                if self.source_conns.get(source_id) == Some(&conn) {
                    self.source_conns.remove(source_id);
                    cleanup.cleared_feeds.extend(self.feeds.remove(source_id));
                    cleanup.orphaned.extend(self.listeners(source_id).into_iter().map(
                        |listener| OrphanedListener {
                            conn: listener,
                            source_id: source_id.clone(),
                        },
                    ));
                }
            }
        }
        cleanup.binding = Some(binding);
        cleanup
    }
}
