//! End-to-end coordinator scenarios over the loopback transport
//!
//! The loopback adapter stands in for the media engine: tests drive the
//! public signaling API, then play the engine's part by pushing inbound
//! feeds and emitting candidates on the recorded sessions.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::timeout;

use fieldcast_rs::transport::{
    IceCandidate, LoopbackSession, LoopbackTransport, SessionDescription,
};
use fieldcast_rs::{
    ClientMessage, ConnId, ParticipantInfo, RelayCoordinator, ServerMessage, SourceId,
};

struct Harness {
    transport: Arc<LoopbackTransport>,
    coordinator: RelayCoordinator,
}

fn harness() -> Harness {
    let transport = Arc::new(LoopbackTransport::new());
    let coordinator = RelayCoordinator::new(transport.clone());
    Harness {
        transport,
        coordinator,
    }
}

async fn recv(rx: &mut mpsc::Receiver<ServerMessage>) -> ServerMessage {
    timeout(Duration::from_secs(1), rx.recv())
        .await
        .expect("timed out waiting for outbound message")
        .expect("outbox closed")
}

async fn assert_silent(rx: &mut mpsc::Receiver<ServerMessage>) {
    let outcome = timeout(Duration::from_millis(100), rx.recv()).await;
    assert!(outcome.is_err(), "unexpected message: {:?}", outcome);
}

fn subscribe_msg(source: &str) -> ClientMessage {
    ClientMessage::Subscribe {
        source_id: SourceId::new(source),
        info: ParticipantInfo::default(),
    }
}

fn announce_msg(source: &str) -> ClientMessage {
    ClientMessage::AnnounceStart {
        source_id: SourceId::new(source),
        info: ParticipantInfo::named("field agent"),
    }
}

fn offer_msg() -> ClientMessage {
    ClientMessage::Offer {
        description: SessionDescription::offer("v=0 uplink"),
    }
}

/// Connect, subscribe, and drain the confirmation
async fn subscribed_listener(
    h: &Harness,
    source: &str,
) -> (ConnId, mpsc::Receiver<ServerMessage>) {
    let (conn, mut rx) = h.coordinator.connect().await;
    h.coordinator.handle_message(conn, subscribe_msg(source)).await;
    match recv(&mut rx).await {
        ServerMessage::SubscriptionConfirmed { .. } => {}
        other => panic!("expected subscriptionConfirmed, got {:?}", other),
    }
    (conn, rx)
}

/// Connect, announce, and drain the confirmation
async fn announced_source(
    h: &Harness,
    source: &str,
) -> (ConnId, mpsc::Receiver<ServerMessage>) {
    let (conn, mut rx) = h.coordinator.connect().await;
    h.coordinator.handle_message(conn, announce_msg(source)).await;
    match recv(&mut rx).await {
        ServerMessage::AnnounceConfirmed { .. } => {}
        other => panic!("expected announceConfirmed, got {:?}", other),
    }
    (conn, rx)
}

/// Send the uplink offer, drain the answer, return the uplink session
async fn negotiated_uplink(
    h: &Harness,
    conn: ConnId,
    rx: &mut mpsc::Receiver<ServerMessage>,
) -> Arc<LoopbackSession> {
    h.coordinator.handle_message(conn, offer_msg()).await;
    match recv(rx).await {
        ServerMessage::UplinkAnswer { .. } => {}
        other => panic!("expected uplinkAnswer, got {:?}", other),
    }
    let sessions = h.transport.sessions();
    sessions.last().expect("uplink session created").clone()
}

#[tokio::test]
async fn subscribe_confirms_with_listener_count_and_no_offer_before_feed() {
    let h = harness();

    let (l1, mut rx1) = h.coordinator.connect().await;
    h.coordinator.handle_message(l1, subscribe_msg("s1")).await;
    match recv(&mut rx1).await {
        ServerMessage::SubscriptionConfirmed {
            source_id,
            listener_count,
        } => {
            assert_eq!(source_id.as_str(), "s1");
            assert_eq!(listener_count, 1);
        }
        other => panic!("unexpected message: {:?}", other),
    }

    let (l2, mut rx2) = h.coordinator.connect().await;
    h.coordinator.handle_message(l2, subscribe_msg("s1")).await;
    match recv(&mut rx2).await {
        ServerMessage::SubscriptionConfirmed { listener_count, .. } => {
            assert_eq!(listener_count, 2)
        }
        other => panic!("unexpected message: {:?}", other),
    }

    // No feed exists, so no downlink negotiation may start
    assert_silent(&mut rx1).await;
    assert_eq!(h.transport.created_count(), 0);
}

#[tokio::test]
async fn announce_notifies_subscribed_listeners_without_negotiating() {
    let h = harness();
    let (_l1, mut rx1) = subscribed_listener(&h, "s1").await;

    let (_source, _srx) = announced_source(&h, "s1").await;

    match recv(&mut rx1).await {
        ServerMessage::SourceAvailable { source_id, info } => {
            assert_eq!(source_id.as_str(), "s1");
            assert_eq!(info.display_name.as_deref(), Some("field agent"));
        }
        other => panic!("expected sourceAvailable, got {:?}", other),
    }

    // Availability is not negotiation; that waits for the feed
    assert_eq!(h.transport.created_count(), 0);
}

#[tokio::test]
async fn full_negotiation_source_then_listener() {
    let h = harness();
    let (l1, mut lrx) = subscribed_listener(&h, "s1").await;
    let (src, mut srx) = announced_source(&h, "s1").await;
    match recv(&mut lrx).await {
        ServerMessage::SourceAvailable { .. } => {}
        other => panic!("expected sourceAvailable, got {:?}", other),
    }

    let uplink = negotiated_uplink(&h, src, &mut srx).await;
    assert_eq!(uplink.remote_description().unwrap().sdp, "v=0 uplink");

    // No feed yet: the listener has heard nothing beyond its confirmation
    assert_silent(&mut lrx).await;

    // The engine reports inbound audio; the listener gets a downlink offer
    uplink.push_inbound_feed(fieldcast_rs::FeedHandle::new("s1-audio"));
    let offer = match recv(&mut lrx).await {
        ServerMessage::DownlinkOffer {
            source_id,
            description,
        } => {
            assert_eq!(source_id.as_str(), "s1");
            description
        }
        other => panic!("expected downlinkOffer, got {:?}", other),
    };
    assert!(offer.sdp.contains("loopback-offer"));

    // Exactly one downlink, carrying a relayed copy of the feed
    assert_eq!(h.transport.created_count(), 2);
    let downlink = h.transport.session(1);
    assert_eq!(downlink.attached_feeds().len(), 1);

    // The listener answers; negotiation completes without error notices
    h.coordinator
        .handle_message(
            l1,
            ClientMessage::Answer {
                description: SessionDescription::answer("v=0 downlink answer"),
            },
        )
        .await;
    tokio::task::yield_now().await;
    assert_eq!(
        downlink.remote_description().map(|d| d.sdp),
        Some("v=0 downlink answer".into())
    );
    assert_silent(&mut lrx).await;
    assert_silent(&mut srx).await;
}

#[tokio::test]
async fn late_subscriber_gets_offer_without_new_source_event() {
    let h = harness();
    let (src, mut srx) = announced_source(&h, "s1").await;
    let uplink = negotiated_uplink(&h, src, &mut srx).await;
    uplink.push_inbound_feed(fieldcast_rs::FeedHandle::new("s1-audio"));

    // Subscribes after the feed is already active
    let (_l2, mut lrx) = subscribed_listener(&h, "s1").await;
    match recv(&mut lrx).await {
        ServerMessage::DownlinkOffer { source_id, .. } => {
            assert_eq!(source_id.as_str(), "s1")
        }
        other => panic!("expected immediate downlinkOffer, got {:?}", other),
    }
}

#[tokio::test]
async fn feed_fan_out_creates_one_downlink_per_listener() {
    let h = harness();
    let mut listeners = Vec::new();
    for _ in 0..3 {
        listeners.push(subscribed_listener(&h, "s1").await);
    }
    let (src, mut srx) = announced_source(&h, "s1").await;
    for (_, rx) in listeners.iter_mut() {
        match recv(rx).await {
            ServerMessage::SourceAvailable { .. } => {}
            other => panic!("expected sourceAvailable, got {:?}", other),
        }
    }

    let uplink = negotiated_uplink(&h, src, &mut srx).await;
    uplink.push_inbound_feed(fieldcast_rs::FeedHandle::new("s1-audio"));

    for (_, rx) in listeners.iter_mut() {
        match recv(rx).await {
            ServerMessage::DownlinkOffer { .. } => {}
            other => panic!("expected downlinkOffer, got {:?}", other),
        }
    }

    // One uplink plus exactly one downlink per listener
    assert_eq!(h.transport.created_count(), 4);
}

#[tokio::test]
async fn source_disconnect_ends_downlinks_but_preserves_subscriptions() {
    let h = harness();
    let (_l1, mut rx1) = subscribed_listener(&h, "s1").await;
    let (_l2, mut rx2) = subscribed_listener(&h, "s1").await;
    let (src, mut srx) = announced_source(&h, "s1").await;
    for rx in [&mut rx1, &mut rx2] {
        match recv(rx).await {
            ServerMessage::SourceAvailable { .. } => {}
            other => panic!("expected sourceAvailable, got {:?}", other),
        }
    }

    let uplink = negotiated_uplink(&h, src, &mut srx).await;
    uplink.push_inbound_feed(fieldcast_rs::FeedHandle::new("s1-audio"));
    for rx in [&mut rx1, &mut rx2] {
        match recv(rx).await {
            ServerMessage::DownlinkOffer { .. } => {}
            other => panic!("expected downlinkOffer, got {:?}", other),
        }
    }

    h.coordinator.disconnect(src).await;

    for rx in [&mut rx1, &mut rx2] {
        match recv(rx).await {
            ServerMessage::SourceEnded { source_id } => assert_eq!(source_id.as_str(), "s1"),
            other => panic!("expected sourceEnded, got {:?}", other),
        }
    }

    // Every session owned by or serving the source is closed exactly once
    for session in h.transport.sessions() {
        assert!(session.is_closed());
    }

    // Listeners stay subscribed so a re-announce restores them
    let status = h.coordinator.status().await;
    assert_eq!(status.total_listeners, 2);
    assert_eq!(status.active_sources, 0);
    let s1 = &status.sources[0];
    assert_eq!(s1.listener_count, 2);
    assert!(!s1.live);
    assert!(!s1.connected);

    // A fresh source connection re-establishes both listeners automatically
    let (src2, mut srx2) = announced_source(&h, "s1").await;
    for rx in [&mut rx1, &mut rx2] {
        match recv(rx).await {
            ServerMessage::SourceAvailable { .. } => {}
            other => panic!("expected sourceAvailable, got {:?}", other),
        }
    }
    let uplink2 = negotiated_uplink(&h, src2, &mut srx2).await;
    uplink2.push_inbound_feed(fieldcast_rs::FeedHandle::new("s1-audio-2"));
    for rx in [&mut rx1, &mut rx2] {
        match recv(rx).await {
            ServerMessage::DownlinkOffer { .. } => {}
            other => panic!("expected downlinkOffer, got {:?}", other),
        }
    }
}

#[tokio::test]
async fn stop_then_start_never_reuses_the_uplink_session() {
    let h = harness();
    let (_l1, mut lrx) = subscribed_listener(&h, "s1").await;
    let (src, mut srx) = announced_source(&h, "s1").await;
    match recv(&mut lrx).await {
        ServerMessage::SourceAvailable { .. } => {}
        other => panic!("expected sourceAvailable, got {:?}", other),
    }

    let first_uplink = negotiated_uplink(&h, src, &mut srx).await;
    first_uplink.push_inbound_feed(fieldcast_rs::FeedHandle::new("take-1"));
    match recv(&mut lrx).await {
        ServerMessage::DownlinkOffer { .. } => {}
        other => panic!("expected downlinkOffer, got {:?}", other),
    }

    h.coordinator
        .handle_message(src, ClientMessage::AnnounceStop)
        .await;
    match recv(&mut lrx).await {
        ServerMessage::SourceEnded { .. } => {}
        other => panic!("expected sourceEnded, got {:?}", other),
    }
    assert!(first_uplink.is_closed());

    // Start again with a fresh offer: a brand-new session, not the old one
    h.coordinator.handle_message(src, announce_msg("s1")).await;
    match recv(&mut srx).await {
        ServerMessage::AnnounceConfirmed { .. } => {}
        other => panic!("expected announceConfirmed, got {:?}", other),
    }
    match recv(&mut lrx).await {
        ServerMessage::SourceAvailable { .. } => {}
        other => panic!("expected sourceAvailable, got {:?}", other),
    }

    let second_uplink = negotiated_uplink(&h, src, &mut srx).await;
    assert_ne!(first_uplink.id(), second_uplink.id());
    assert!(!second_uplink.is_closed());
}

#[tokio::test]
async fn unsubscribe_is_idempotent_and_closes_the_downlink() {
    let h = harness();
    let (src, mut srx) = announced_source(&h, "s1").await;
    let uplink = negotiated_uplink(&h, src, &mut srx).await;
    uplink.push_inbound_feed(fieldcast_rs::FeedHandle::new("s1-audio"));

    let (l1, mut lrx) = subscribed_listener(&h, "s1").await;
    match recv(&mut lrx).await {
        ServerMessage::DownlinkOffer { .. } => {}
        other => panic!("expected downlinkOffer, got {:?}", other),
    }
    let downlink = h.transport.session(1);

    let unsubscribe = ClientMessage::Unsubscribe {
        source_id: SourceId::new("s1"),
    };
    h.coordinator.handle_message(l1, unsubscribe.clone()).await;
    tokio::task::yield_now().await;
    assert!(downlink.is_closed());
    assert_silent(&mut lrx).await;

    // Second unsubscribe: same end state, no error
    h.coordinator.handle_message(l1, unsubscribe).await;
    assert_silent(&mut lrx).await;
    assert_eq!(h.coordinator.status().await.total_listeners, 0);
}

#[tokio::test]
async fn role_and_validation_errors_reach_only_the_caller() {
    let h = harness();
    let (src, mut srx) = announced_source(&h, "s1").await;
    let (_l1, mut lrx) = subscribed_listener(&h, "s1").await;

    // A bound source may not subscribe
    h.coordinator.handle_message(src, subscribe_msg("s2")).await;
    match recv(&mut srx).await {
        ServerMessage::ErrorNotice { message } => {
            assert!(message.contains("source"), "message: {}", message)
        }
        other => panic!("expected errorNotice, got {:?}", other),
    }

    // Empty source id is rejected before any state mutation
    let (l2, mut rx2) = h.coordinator.connect().await;
    h.coordinator.handle_message(l2, subscribe_msg("")).await;
    match recv(&mut rx2).await {
        ServerMessage::ErrorNotice { .. } => {}
        other => panic!("expected errorNotice, got {:?}", other),
    }

    // Offer from a connection that never announced
    h.coordinator.handle_message(l2, offer_msg()).await;
    match recv(&mut rx2).await {
        ServerMessage::ErrorNotice { .. } => {}
        other => panic!("expected errorNotice, got {:?}", other),
    }

    // Nothing leaked to the uninvolved listener
    assert_silent(&mut lrx).await;
    assert_eq!(h.coordinator.status().await.total_listeners, 1);
}

#[tokio::test]
async fn uplink_adapter_failure_rolls_back_and_allows_retry() {
    let h = harness();
    let (src, mut srx) = announced_source(&h, "s1").await;

    h.transport.fail_next_create();
    h.coordinator.handle_message(src, offer_msg()).await;
    match recv(&mut srx).await {
        ServerMessage::ErrorNotice { .. } => {}
        other => panic!("expected errorNotice, got {:?}", other),
    }
    assert_eq!(h.transport.created_count(), 0);
    assert_eq!(h.coordinator.status().await.active_sources, 0);

    // The same source can negotiate again afterwards
    let uplink = negotiated_uplink(&h, src, &mut srx).await;
    assert!(!uplink.is_closed());
}

#[tokio::test]
async fn downlink_adapter_failure_is_isolated_per_listener() {
    let h = harness();
    let (_l1, mut rx1) = subscribed_listener(&h, "s1").await;
    let (src, mut srx) = announced_source(&h, "s1").await;
    match recv(&mut rx1).await {
        ServerMessage::SourceAvailable { .. } => {}
        other => panic!("expected sourceAvailable, got {:?}", other),
    }

    let uplink = negotiated_uplink(&h, src, &mut srx).await;
    h.transport.fail_next_create();
    uplink.push_inbound_feed(fieldcast_rs::FeedHandle::new("s1-audio"));

    // The affected listener hears about it; the source does not
    match recv(&mut rx1).await {
        ServerMessage::ErrorNotice { .. } => {}
        other => panic!("expected errorNotice, got {:?}", other),
    }
    assert_silent(&mut srx).await;

    // A late subscriber still negotiates against the registered feed
    let (_l2, mut rx2) = subscribed_listener(&h, "s1").await;
    match recv(&mut rx2).await {
        ServerMessage::DownlinkOffer { .. } => {}
        other => panic!("expected downlinkOffer, got {:?}", other),
    }
}

#[tokio::test]
async fn stale_answer_and_candidates_are_dropped_silently() {
    let h = harness();
    let (l1, mut lrx) = subscribed_listener(&h, "s1").await;

    // Answer with no downlink session: raced a disconnect, not an error
    h.coordinator
        .handle_message(
            l1,
            ClientMessage::Answer {
                description: SessionDescription::answer("v=0 late"),
            },
        )
        .await;
    assert_silent(&mut lrx).await;

    // Candidate ahead of any session: dropped, not queued
    h.coordinator
        .handle_message(
            l1,
            ClientMessage::IceCandidate {
                candidate: IceCandidate::new("candidate:0 1 udp 1 10.0.0.1 9 typ host"),
            },
        )
        .await;
    assert_silent(&mut lrx).await;
}

#[tokio::test]
async fn ice_candidates_route_by_role_and_trickle_outward() {
    let h = harness();
    let (src, mut srx) = announced_source(&h, "s1").await;
    let uplink = negotiated_uplink(&h, src, &mut srx).await;

    // Inbound: a source candidate lands on the uplink session
    h.coordinator
        .handle_message(
            src,
            ClientMessage::IceCandidate {
                candidate: IceCandidate::new("candidate:1 1 udp 2130706431 10.0.0.1 5000 typ host"),
            },
        )
        .await;
    tokio::task::yield_now().await;
    assert_eq!(uplink.candidates().len(), 1);

    // Outbound: engine-generated candidates trickle to the connection
    uplink.emit_candidate(IceCandidate::new("candidate:2 1 udp 1 192.0.2.1 5001 typ srflx"));
    match recv(&mut srx).await {
        ServerMessage::IceCandidate { candidate } => {
            assert!(candidate.candidate.contains("srflx"))
        }
        other => panic!("expected iceCandidate, got {:?}", other),
    }

    // Listener candidates go to the downlink session, not the uplink
    uplink.push_inbound_feed(fieldcast_rs::FeedHandle::new("s1-audio"));
    let (l1, mut lrx) = subscribed_listener(&h, "s1").await;
    match recv(&mut lrx).await {
        ServerMessage::DownlinkOffer { .. } => {}
        other => panic!("expected downlinkOffer, got {:?}", other),
    }
    let downlink = h.transport.session(1);
    h.coordinator
        .handle_message(
            l1,
            ClientMessage::IceCandidate {
                candidate: IceCandidate::new("candidate:3 1 udp 1 10.0.0.2 5002 typ host"),
            },
        )
        .await;
    tokio::task::yield_now().await;
    assert_eq!(downlink.candidates().len(), 1);
    assert_eq!(uplink.candidates().len(), 1);
}

#[tokio::test]
async fn candidates_from_replaced_sessions_stop_trickling() {
    let h = harness();
    let (src, mut srx) = announced_source(&h, "s1").await;
    let first_uplink = negotiated_uplink(&h, src, &mut srx).await;

    h.coordinator
        .handle_message(src, ClientMessage::AnnounceStop)
        .await;
    assert!(first_uplink.is_closed());

    // The old session's pump notices the replacement and goes quiet
    first_uplink.emit_candidate(IceCandidate::new("candidate:9 1 udp 1 10.0.0.9 9 typ host"));
    assert_silent(&mut srx).await;
}

#[tokio::test]
async fn malformed_text_frames_get_an_error_notice() {
    let h = harness();
    let (conn, mut rx) = h.coordinator.connect().await;

    h.coordinator.handle_text(conn, "{not json").await;
    match recv(&mut rx).await {
        ServerMessage::ErrorNotice { message } => assert_eq!(message, "Invalid message"),
        other => panic!("expected errorNotice, got {:?}", other),
    }

    // A well-formed frame on the same connection still works
    h.coordinator
        .handle_text(
            conn,
            r#"{"type":"subscribe","payload":{"sourceId":"s1"}}"#,
        )
        .await;
    match recv(&mut rx).await {
        ServerMessage::SubscriptionConfirmed { listener_count, .. } => {
            assert_eq!(listener_count, 1)
        }
        other => panic!("expected subscriptionConfirmed, got {:?}", other),
    }
}

#[tokio::test]
async fn listener_disconnect_leaves_no_trace() {
    let h = harness();
    let (src, mut srx) = announced_source(&h, "s1").await;
    let uplink = negotiated_uplink(&h, src, &mut srx).await;
    uplink.push_inbound_feed(fieldcast_rs::FeedHandle::new("s1-audio"));

    let (l1, mut lrx) = subscribed_listener(&h, "s1").await;
    match recv(&mut lrx).await {
        ServerMessage::DownlinkOffer { .. } => {}
        other => panic!("expected downlinkOffer, got {:?}", other),
    }
    let downlink = h.transport.session(1);

    h.coordinator.disconnect(l1).await;
    assert!(downlink.is_closed());

    let status = h.coordinator.status().await;
    assert_eq!(status.total_listeners, 0);

    // A new feed report fans out to nobody
    uplink.push_inbound_feed(fieldcast_rs::FeedHandle::new("s1-audio-2"));
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(h.transport.created_count(), 2);
}
