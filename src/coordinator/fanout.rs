//! Relay fan-out
//!
//! When a source feed becomes available — or a listener subscribes to a
//! source whose feed already exists — every interested listener gets a
//! fresh, independently negotiated downlink session carrying a relayed
//! copy of the feed. Existing downlinks are closed and replaced rather
//! than re-pointed: a brief audio gap in exchange for never mixing feeds
//! mid-session.
//!
//! Each listener is an independent unit of work; one adapter failure or
//! dead outbox never aborts fan-out to the rest.

use std::sync::Arc;

use tokio::sync::mpsc;

use crate::error::{Error, Result};
use crate::registry::{ConnId, RoleBinding, SourceId};
use crate::session::{Lane, SessionEntry};
use crate::signal::ServerMessage;
use crate::transport::{FeedHandle, SessionEvent};

use super::Shared;

impl Shared {
    /// Feed-availability path: register the feed and renegotiate every
    /// currently subscribed listener
    ///
    /// Runs as its own unit of work, never on the adapter's context. The
    /// generation check discards reports from uplinks that were already
    /// replaced or torn down by the time the event was pumped.
    pub(crate) async fn handle_feed_available(
        self: &Arc<Self>,
        conn: ConnId,
        source_id: SourceId,
        generation: u64,
        feed: FeedHandle,
    ) {
        let listeners = {
            let mut state = self.state.lock().await;
            if state.sessions.generation(Lane::Uplink, conn) != Some(generation) {
                tracing::debug!(
                    conn = %conn,
                    source = %source_id,
                    generation,
                    "Discarding feed report from stale uplink"
                );
                return;
            }
            if state.registry.source_conn(&source_id) != Some(conn) {
                tracing::debug!(
                    conn = %conn,
                    source = %source_id,
                    "Discarding feed report from displaced source"
                );
                return;
            }
            state.registry.set_feed(source_id.clone(), feed.clone());
            state.registry.listeners(&source_id)
        };

        tracing::info!(
            source = %source_id,
            listeners = listeners.len(),
            "Feed available, fanning out"
        );
        self.fan_out(&source_id, &feed, listeners).await;
    }

    /// Establish or refresh one downlink per listed listener
    pub(crate) async fn fan_out(
        self: &Arc<Self>,
        source_id: &SourceId,
        feed: &FeedHandle,
        listeners: Vec<ConnId>,
    ) {
        for listener in listeners {
            match self.negotiate_downlink(listener, source_id, feed).await {
                Ok(()) => {}
                Err(err) if err.is_benign() => {
                    tracing::debug!(
                        listener = %listener,
                        source = %source_id,
                        reason = %err,
                        "Skipped downlink negotiation"
                    );
                }
                Err(err) => {
                    tracing::warn!(
                        listener = %listener,
                        source = %source_id,
                        error = %err,
                        "Downlink negotiation failed"
                    );
                    self.outboxes
                        .send(
                            listener,
                            ServerMessage::ErrorNotice {
                                message: err.to_string(),
                            },
                        )
                        .await;
                }
            }
        }
    }

    /// Negotiate a single listener's downlink against the given feed
    async fn negotiate_downlink(
        self: &Arc<Self>,
        listener: ConnId,
        source_id: &SourceId,
        feed: &FeedHandle,
    ) -> Result<()> {
        // Replace-not-reuse: any existing downlink goes away first.
        let old = {
            let mut state = self.state.lock().await;
            if !subscribed_to(&state.registry, listener, source_id) {
                return Err(Error::Stale("listener no longer subscribed"));
            }
            if state.registry.feed(source_id) != Some(feed) {
                return Err(Error::Stale("feed replaced before downlink negotiation"));
            }
            state.sessions.take(Lane::Downlink, listener)
        };
        if let Some(entry) = old {
            entry.session.close().await;
        }

        let generation = self.next_generation();
        let (events_tx, events_rx) = mpsc::unbounded_channel::<SessionEvent>();
        let session = self.with_timeout(self.transport.create(events_tx)).await?;

        let offer = match self
            .with_timeout(async {
                session.attach_feed(feed.clone()).await?;
                session.create_offer().await
            })
            .await
        {
            Ok(offer) => offer,
            Err(err) => {
                session.close().await;
                return Err(err.into());
            }
        };

        // Commit: subscription and feed must have survived the adapter calls.
        let verdict = {
            let mut state = self.state.lock().await;
            if !subscribed_to(&state.registry, listener, source_id) {
                Err("listener unsubscribed during downlink negotiation")
            } else if state.registry.feed(source_id) != Some(feed) {
                Err("feed replaced during downlink negotiation")
            } else {
                match state.sessions.insert_if_newer(
                    Lane::Downlink,
                    listener,
                    SessionEntry {
                        session: session.clone(),
                        generation,
                    },
                ) {
                    Ok(displaced) => {
                        if let Some(phase) = state.phases.get_mut(&listener) {
                            phase.begin_listener_negotiation();
                        }
                        Ok(displaced)
                    }
                    Err(_) => Err("a newer downlink negotiation won"),
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

        self.spawn_event_pump(
            listener,
            source_id.clone(),
            generation,
            Lane::Downlink,
            events_rx,
        );
        self.outboxes
            .send(
                listener,
                ServerMessage::DownlinkOffer {
                    source_id: source_id.clone(),
                    description: offer,
                },
            )
            .await;
        tracing::info!(
            listener = %listener,
            source = %source_id,
            generation,
            "Downlink offer sent"
        );
        Ok(())
    }

    /// Pump one session's adapter events onto the coordinator control path
    ///
    /// ICE candidates are forwarded to the owning connection as they
    /// arrive; their order relative to the initial offer message is not
    /// guaranteed. Feed reports from uplinks schedule fan-out as separate
    /// tasks. The pump stops as soon as its session is no longer current.
    pub(crate) fn spawn_event_pump(
        self: &Arc<Self>,
        conn: ConnId,
        source_id: SourceId,
        generation: u64,
        lane: Lane,
        mut events: mpsc::UnboundedReceiver<SessionEvent>,
    ) {
        let shared = Arc::clone(self);
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                let current = {
                    let state = shared.state.lock().await;
                    state.sessions.generation(lane, conn)
                };
                if current != Some(generation) {
                    tracing::debug!(
                        conn = %conn,
                        lane = %lane,
                        generation,
                        "Stopping event pump for replaced session"
                    );
                    break;
                }

                match event {
                    SessionEvent::IceCandidate(candidate) => {
                        shared
                            .outboxes
                            .send(conn, ServerMessage::IceCandidate { candidate })
                            .await;
                    }
                    SessionEvent::InboundFeed(feed) => match lane {
                        Lane::Uplink => {
                            let shared = Arc::clone(&shared);
                            let source_id = source_id.clone();
                            tokio::spawn(async move {
                                shared
                                    .handle_feed_available(conn, source_id, generation, feed)
                                    .await;
                            });
                        }
                        Lane::Downlink => {
                            tracing::debug!(
                                conn = %conn,
                                "Ignoring inbound feed on a downlink session"
                            );
                        }
                    },
                }
            }
        });
    }
}

fn subscribed_to(
    registry: &crate::registry::Registry,
    listener: ConnId,
    source_id: &SourceId,
) -> bool {
    matches!(
        registry.binding(listener),
        Some(RoleBinding::Listener { source_id: bound, .. }) if bound == source_id
    )
}
