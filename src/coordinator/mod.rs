//! Signaling router and relay coordinator
//!
//! [`RelayCoordinator`] is the message-driven control plane: the embedding
//! server registers each participant connection, forwards its inbound
//! signaling messages, and drains its outbox. The coordinator mutates the
//! participant registry and session table, drives the transport adapter,
//! and emits outbound signaling messages.
//!
//! # Concurrency
//!
//! One mutex serializes all registry and session-table mutation. No
//! adapter call is awaited while it is held: handlers snapshot what they
//! need, release the lock, drive the adapter, then re-acquire to commit
//! under a generation check. A negotiation that loses a race against a
//! disconnect or a newer negotiation closes its own session and discards
//! its result. Adapter events are pumped from per-session channels onto
//! this same control path instead of running on the engine's context.

pub mod config;
mod fanout;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};

use crate::error::{Error, Result};
use crate::registry::{
    ConnId, ConnectionCleanup, ParticipantInfo, Registry, RegistryError, RoleBinding, SourceId,
};
use crate::session::{ConnectionPhase, Lane, SessionEntry, SessionTable};
use crate::signal::{ClientMessage, OutboxRegistry, ServerMessage};
use crate::stats::StatusSnapshot;
use crate::transport::{
    IceCandidate, MediaTransport, SdpKind, SessionDescription, SessionEvent, TransportError,
};

pub use config::CoordinatorConfig;

/// The signaling and relay-session coordinator
///
/// Cheap to clone; all clones share the same state.
#[derive(Clone)]
pub struct RelayCoordinator {
    shared: Arc<Shared>,
}

pub(crate) struct Shared {
    pub(crate) transport: Arc<dyn MediaTransport>,
    pub(crate) config: CoordinatorConfig,
    pub(crate) state: Mutex<State>,
    pub(crate) outboxes: OutboxRegistry,
    next_conn_id: AtomicU64,
    generation_counter: AtomicU64,
}

pub(crate) struct State {
    pub(crate) registry: Registry,
    pub(crate) sessions: SessionTable,
    pub(crate) phases: HashMap<ConnId, ConnectionPhase>,
}

/// Side effects collected under the lock, executed after it is released
#[derive(Default)]
pub(crate) struct CleanupActions {
    pub(crate) close: Vec<SessionEntry>,
    pub(crate) ended: Vec<(ConnId, SourceId)>,
}

impl State {
    /// Turn a registry cleanup report into table removals and notices
    ///
    /// Entries are taken out of the table here, under the lock, so each
    /// adapter handle is closed exactly once by whoever holds the action.
    fn collect_cleanup(&mut self, conn: ConnId, cleanup: &ConnectionCleanup) -> CleanupActions {
        let mut actions = CleanupActions::default();

        match &cleanup.binding {
            Some(RoleBinding::Listener { .. }) => {
                if let Some(entry) = self.sessions.take(Lane::Downlink, conn) {
                    actions.close.push(entry);
                }
            }
            Some(RoleBinding::Source { .. }) => {
                if let Some(entry) = self.sessions.take(Lane::Uplink, conn) {
                    actions.close.push(entry);
                }
            }
            None => {}
        }

        for orphan in &cleanup.orphaned {
            if let Some(entry) = self.sessions.take(Lane::Downlink, orphan.conn) {
                actions.close.push(entry);
            }
            if let Some(phase) = self.phases.get_mut(&orphan.conn) {
                phase.reset_listener();
            }
            actions.ended.push((orphan.conn, orphan.source_id.clone()));
        }

        if let Some(displaced) = cleanup.displaced_source {
            if let Some(entry) = self.sessions.take(Lane::Uplink, displaced) {
                actions.close.push(entry);
            }
            if let Some(phase) = self.phases.get_mut(&displaced) {
                phase.unbind();
            }
        }

        actions
    }
}

impl RelayCoordinator {
    /// Create a coordinator over the given transport with defaults
    pub fn new(transport: Arc<dyn MediaTransport>) -> Self {
        Self::with_config(transport, CoordinatorConfig::default())
    }

    /// Create a coordinator with custom configuration
    pub fn with_config(transport: Arc<dyn MediaTransport>, config: CoordinatorConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                transport,
                config,
                state: Mutex::new(State {
                    registry: Registry::new(),
                    sessions: SessionTable::new(),
                    phases: HashMap::new(),
                }),
                outboxes: OutboxRegistry::new(),
                next_conn_id: AtomicU64::new(1),
                generation_counter: AtomicU64::new(1),
            }),
        }
    }

    /// The active configuration
    pub fn config(&self) -> &CoordinatorConfig {
        &self.shared.config
    }

    /// Register a new participant connection
    ///
    /// Returns the connection identity and the receiver half of its outbox;
    /// the embedding server forwards drained messages to the peer.
    pub async fn connect(&self) -> (ConnId, mpsc::Receiver<ServerMessage>) {
        let conn = ConnId(self.shared.next_conn_id.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = mpsc::channel(self.shared.config.outbox_capacity);
        self.shared.outboxes.register(conn, tx).await;
        self.shared
            .state
            .lock()
            .await
            .phases
            .insert(conn, ConnectionPhase::new());
        tracing::info!(conn = %conn, "Connection registered");
        (conn, rx)
    }

    /// Tear down a disconnected participant
    ///
    /// Idempotent. Synchronously removes every derived entity: the role
    /// binding, subscription membership, and the connection's sessions.
    /// Listeners of a disconnected source are told the stream ended but
    /// stay subscribed.
    pub async fn disconnect(&self, conn: ConnId) {
        self.shared.outboxes.remove(conn).await;

        let (uplink, downlink, actions) = {
            let mut state = self.shared.state.lock().await;
            state.phases.remove(&conn);
            let cleanup = state.registry.remove_connection(conn);
            let actions = state.collect_cleanup(conn, &cleanup);
            // A disconnect may race an in-flight negotiation that has not
            // committed yet; whatever is in the table now is closed here,
            // the rest is discarded at commit time by the generation check.
            let uplink = state.sessions.take(Lane::Uplink, conn);
            let downlink = state.sessions.take(Lane::Downlink, conn);
            (uplink, downlink, actions)
        };

        if let Some(entry) = uplink {
            entry.session.close().await;
        }
        if let Some(entry) = downlink {
            entry.session.close().await;
        }
        self.shared.run_cleanup(actions).await;
        tracing::info!(conn = %conn, "Connection closed");
    }

    /// Handle one inbound signaling message
    ///
    /// Never fails upward: validation, role, and adapter errors become an
    /// `errorNotice` to the caller; races against concurrent teardown are
    /// dropped with a log entry and surfaced to nobody.
    pub async fn handle_message(&self, conn: ConnId, msg: ClientMessage) {
        let name = msg.name();
        tracing::debug!(conn = %conn, message = name, "Handling signaling message");

        match self.dispatch(conn, msg).await {
            Ok(()) => {}
            Err(err) if err.is_benign() => {
                tracing::debug!(
                    conn = %conn,
                    message = name,
                    reason = %err,
                    "Dropped message referencing stale state"
                );
            }
            Err(err) => {
                tracing::warn!(
                    conn = %conn,
                    message = name,
                    error = %err,
                    "Signaling operation failed"
                );
                self.shared
                    .outboxes
                    .send(
                        conn,
                        ServerMessage::ErrorNotice {
                            message: err.to_string(),
                        },
                    )
                    .await;
            }
        }
    }

    /// Handle one inbound signaling message in JSON text form
    ///
    /// Convenience for embeddings that carry messages as text frames.
    pub async fn handle_text(&self, conn: ConnId, text: &str) {
        match serde_json::from_str::<ClientMessage>(text) {
            Ok(msg) => self.handle_message(conn, msg).await,
            Err(err) => {
                tracing::warn!(conn = %conn, error = %err, "Rejected malformed signaling message");
                self.shared
                    .outboxes
                    .send(
                        conn,
                        ServerMessage::ErrorNotice {
                            message: "Invalid message".into(),
                        },
                    )
                    .await;
            }
        }
    }

    /// Read-only status snapshot: active sources, listener counts, liveness
    pub async fn status(&self) -> StatusSnapshot {
        let state = self.shared.state.lock().await;
        StatusSnapshot::capture(&state.registry)
    }

    async fn dispatch(&self, conn: ConnId, msg: ClientMessage) -> Result<()> {
        match msg {
            ClientMessage::Subscribe { source_id, info } => {
                self.shared.handle_subscribe(conn, source_id, info).await
            }
            ClientMessage::Unsubscribe { source_id } => {
                self.shared.handle_unsubscribe(conn, source_id).await
            }
            ClientMessage::AnnounceStart { source_id, info } => {
                self.shared.handle_announce_start(conn, source_id, info).await
            }
            ClientMessage::AnnounceStop => self.shared.handle_announce_stop(conn).await,
            ClientMessage::Offer { description } => {
                self.shared.handle_offer(conn, description).await
            }
            ClientMessage::Answer { description } => {
                self.shared.handle_answer(conn, description).await
            }
            ClientMessage::IceCandidate { candidate } => {
                self.shared.handle_ice_candidate(conn, candidate).await
            }
        }
    }
}

impl Shared {
    pub(crate) fn next_generation(&self) -> u64 {
        self.generation_counter.fetch_add(1, Ordering::Relaxed)
    }

    /// Bound an adapter call by the configured negotiation timeout
    pub(crate) async fn with_timeout<T>(
        &self,
        fut: impl std::future::Future<Output = std::result::Result<T, TransportError>>,
    ) -> std::result::Result<T, TransportError> {
        match tokio::time::timeout(self.config.negotiation_timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(TransportError::Timeout),
        }
    }

    /// Execute collected cleanup actions outside the state lock
    pub(crate) async fn run_cleanup(&self, actions: CleanupActions) {
        for entry in actions.close {
            entry.session.close().await;
        }
        for (listener, source_id) in actions.ended {
            self.outboxes
                .send(listener, ServerMessage::SourceEnded { source_id })
                .await;
        }
    }

    async fn handle_subscribe(
        self: &Arc<Self>,
        conn: ConnId,
        source_id: SourceId,
        info: ParticipantInfo,
    ) -> Result<()> {
        if source_id.is_empty() {
            return Err(Error::Validation("sourceId is required".into()));
        }

        let (count, actions, feed) = {
            let mut state = self.state.lock().await;
            let (count, cleanup) =
                state.registry.register_listener(conn, source_id.clone(), info)?;
            let actions = state.collect_cleanup(conn, &cleanup);
            if let Some(phase) = state.phases.get_mut(&conn) {
                if !phase.is_listener() {
                    phase.bind_listener();
                }
            }
            let feed = state.registry.feed(&source_id).cloned();
            (count, actions, feed)
        };

        self.run_cleanup(actions).await;
        self.outboxes
            .send(
                conn,
                ServerMessage::SubscriptionConfirmed {
                    source_id: source_id.clone(),
                    listener_count: count,
                },
            )
            .await;

        // A feed is already flowing: negotiate this listener's downlink now
        // instead of waiting for the source to re-announce.
        if let Some(feed) = feed {
            let shared = Arc::clone(self);
            tokio::spawn(async move {
                shared.fan_out(&source_id, &feed, vec![conn]).await;
            });
        }
        Ok(())
    }

    async fn handle_unsubscribe(&self, conn: ConnId, source_id: SourceId) -> Result<()> {
        if source_id.is_empty() {
            return Err(Error::Validation("sourceId is required".into()));
        }

        let downlink = {
            let mut state = self.state.lock().await;
            state.registry.unsubscribe(conn, &source_id);
            if let Some(phase) = state.phases.get_mut(&conn) {
                if phase.is_listener() {
                    phase.unbind();
                }
            }
            state.sessions.take(Lane::Downlink, conn)
        };

        if let Some(entry) = downlink {
            entry.session.close().await;
        }
        Ok(())
    }

    async fn handle_announce_start(
        &self,
        conn: ConnId,
        source_id: SourceId,
        info: ParticipantInfo,
    ) -> Result<()> {
        if source_id.is_empty() {
            return Err(Error::Validation("sourceId is required".into()));
        }

        let (listeners, actions) = {
            let mut state = self.state.lock().await;
            let cleanup = state
                .registry
                .register_source(conn, source_id.clone(), info.clone());
            let actions = state.collect_cleanup(conn, &cleanup);
            if let Some(phase) = state.phases.get_mut(&conn) {
                phase.bind_source();
            }
            (state.registry.listeners(&source_id), actions)
        };

        self.run_cleanup(actions).await;

        // Availability notice only; negotiation is feed-driven and starts
        // once media actually arrives on the uplink.
        for listener in listeners {
            self.outboxes
                .send(
                    listener,
                    ServerMessage::SourceAvailable {
                        source_id: source_id.clone(),
                        info: info.clone(),
                    },
                )
                .await;
        }
        self.outboxes
            .send(conn, ServerMessage::AnnounceConfirmed { source_id })
            .await;
        Ok(())
    }

    async fn handle_announce_stop(&self, conn: ConnId) -> Result<()> {
        let (source_id, uplink, actions) = {
            let mut state = self.state.lock().await;
            let source_id = match state.registry.binding(conn) {
                Some(RoleBinding::Source { source_id, .. }) => source_id.clone(),
                _ => return Err(RegistryError::NotASource.into()),
            };

            let uplink = state.sessions.take(Lane::Uplink, conn);
            state.registry.clear_feed(&source_id);

            let mut actions = CleanupActions::default();
            for listener in state.registry.listeners(&source_id) {
                if let Some(entry) = state.sessions.take(Lane::Downlink, listener) {
                    actions.close.push(entry);
                }
                if let Some(phase) = state.phases.get_mut(&listener) {
                    phase.reset_listener();
                }
                actions.ended.push((listener, source_id.clone()));
            }
            if let Some(phase) = state.phases.get_mut(&conn) {
                phase.bind_source();
            }
            (source_id, uplink, actions)
        };

        if let Some(entry) = uplink {
            entry.session.close().await;
        }
        self.run_cleanup(actions).await;
        tracing::info!(conn = %conn, source = %source_id, "Source stopped");
        Ok(())
    }

    async fn handle_offer(
        self: &Arc<Self>,
        conn: ConnId,
        description: SessionDescription,
    ) -> Result<()> {
        if description.kind != SdpKind::Offer {
            return Err(Error::Validation("description must be an offer".into()));
        }
        if description.sdp.len() > self.config.max_sdp_bytes {
            return Err(Error::Validation("SDP payload too large".into()));
        }

        let source_id = {
            let state = self.state.lock().await;
            match state.registry.binding(conn) {
                Some(RoleBinding::Source { source_id, .. }) => source_id.clone(),
                _ => return Err(RegistryError::NotASource.into()),
            }
        };

        let generation = self.next_generation();
        let (events_tx, events_rx) = mpsc::unbounded_channel::<SessionEvent>();
        let session = self.with_timeout(self.transport.create(events_tx)).await?;

        if let Err(err) = self
            .with_timeout(session.set_remote_description(description))
            .await
        {
            session.close().await;
            return Err(err.into());
        }
        let answer = match self.with_timeout(session.create_answer()).await {
            Ok(answer) => answer,
            Err(err) => {
                session.close().await;
                return Err(err.into());
            }
        };

        // Commit: the binding may have changed while the adapter ran.
        let verdict = {
            let mut state = self.state.lock().await;
            let still_bound = matches!(
                state.registry.binding(conn),
                Some(RoleBinding::Source { source_id: bound, .. }) if *bound == source_id
            );
            if !still_bound {
                Err("source unbound during uplink negotiation")
            } else {
                match state.sessions.insert_if_newer(
                    Lane::Uplink,
                    conn,
                    SessionEntry {
                        session: session.clone(),
                        generation,
                    },
                ) {
                    Ok(displaced) => {
                        if let Some(phase) = state.phases.get_mut(&conn) {
                            phase.mark_source_active();
                        }
                        Ok(displaced)
                    }
                    Err(_) => Err("a newer uplink negotiation won"),
                }
            }
        };

        let displaced = match verdict {
            Ok(displaced) => displaced,
            Err(reason) => {
                session.close().await;
                return Err(Error::Stale(reason));
            }
        };
        if let Some(entry) = displaced {
            entry.session.close().await;
        }

        self.spawn_event_pump(conn, source_id.clone(), generation, Lane::Uplink, events_rx);
        self.outboxes
            .send(conn, ServerMessage::UplinkAnswer { description: answer })
            .await;
        tracing::info!(conn = %conn, source = %source_id, generation, "Uplink negotiated");
        Ok(())
    }

    async fn handle_answer(&self, conn: ConnId, description: SessionDescription) -> Result<()> {
        if description.kind != SdpKind::Answer {
            return Err(Error::Validation("description must be an answer".into()));
        }
        if description.sdp.len() > self.config.max_sdp_bytes {
            return Err(Error::Validation("SDP payload too large".into()));
        }

        let entry = {
            let state = self.state.lock().await;
            state.sessions.get(Lane::Downlink, conn).cloned()
        };
        // Legitimate race with a disconnect or downlink replacement
        let Some(entry) = entry else {
            return Err(Error::Stale("no downlink session for answer"));
        };

        self.with_timeout(entry.session.set_remote_description(description))
            .await?;

        {
            let mut state = self.state.lock().await;
            if state.sessions.generation(Lane::Downlink, conn) == Some(entry.generation) {
                if let Some(phase) = state.phases.get_mut(&conn) {
                    phase.mark_listener_active();
                }
            }
        }
        tracing::debug!(conn = %conn, "Downlink answer applied");
        Ok(())
    }

    async fn handle_ice_candidate(&self, conn: ConnId, candidate: IceCandidate) -> Result<()> {
        if candidate.candidate.len() > self.config.max_candidate_bytes {
            return Err(Error::Validation("ICE candidate too large".into()));
        }

        let entry = {
            let state = self.state.lock().await;
            let lane = match state.registry.binding(conn) {
                Some(binding) if binding.is_source() => Lane::Uplink,
                Some(_) => Lane::Downlink,
                None => return Err(Error::Stale("candidate from unbound connection")),
            };
            state.sessions.get(lane, conn).cloned()
        };
        // Candidates may race ahead of answer processing; drop, don't queue
        let Some(entry) = entry else {
            return Err(Error::Stale("no session for candidate"));
        };

        self.with_timeout(entry.session.add_ice_candidate(candidate))
            .await?;
        Ok(())
    }
}
