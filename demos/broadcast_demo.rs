//! Broadcast coordinator walkthrough over the loopback transport
//!
//! Run with: cargo run --example broadcast_demo
//!
//! Plays a full scenario end to end without a real media engine: a
//! supervisor subscribes, a field agent announces and negotiates its
//! uplink, the (loopback) engine reports an inbound feed, and the
//! coordinator fans a relay session out to the supervisor. A second
//! supervisor then joins late and is negotiated immediately.
//!
//! Set RUST_LOG=fieldcast_rs=debug to watch the coordinator's decisions.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::timeout;

use fieldcast_rs::transport::LoopbackTransport;
use fieldcast_rs::{
    ClientMessage, FeedHandle, ParticipantInfo, RelayCoordinator, ServerMessage,
    SessionDescription, SourceId,
};

async fn next_message(rx: &mut mpsc::Receiver<ServerMessage>) -> ServerMessage {
    timeout(Duration::from_secs(1), rx.recv())
        .await
        .expect("no message within a second")
        .expect("outbox closed")
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let transport = Arc::new(LoopbackTransport::new());
    let coordinator = RelayCoordinator::new(transport.clone());
    let source_id = SourceId::new("agent-7");

    // A supervisor subscribes before the agent is even live.
    let (supervisor, mut sup_rx) = coordinator.connect().await;
    coordinator
        .handle_message(
            supervisor,
            ClientMessage::Subscribe {
                source_id: source_id.clone(),
                info: ParticipantInfo::named("supervisor-1"),
            },
        )
        .await;
    println!("supervisor <- {:?}", next_message(&mut sup_rx).await);

    // The field agent comes online and announces itself.
    let (agent, mut agent_rx) = coordinator.connect().await;
    coordinator
        .handle_message(
            agent,
            ClientMessage::AnnounceStart {
                source_id: source_id.clone(),
                info: ParticipantInfo::named("agent-7"),
            },
        )
        .await;
    println!("agent      <- {:?}", next_message(&mut agent_rx).await);
    println!("supervisor <- {:?}", next_message(&mut sup_rx).await);

    // Uplink negotiation: the agent offers, the coordinator answers.
    coordinator
        .handle_message(
            agent,
            ClientMessage::Offer {
                description: SessionDescription::offer("v=0 agent-7 uplink"),
            },
        )
        .await;
    println!("agent      <- {:?}", next_message(&mut agent_rx).await);

    // The engine reports inbound audio; fan-out reaches the supervisor.
    let uplink = transport.session(0);
    uplink.push_inbound_feed(FeedHandle::new("agent-7 microphone"));
    println!("supervisor <- {:?}", next_message(&mut sup_rx).await);

    // The supervisor answers its downlink offer.
    coordinator
        .handle_message(
            supervisor,
            ClientMessage::Answer {
                description: SessionDescription::answer("v=0 supervisor-1 answer"),
            },
        )
        .await;

    // A second supervisor joins late and is negotiated against the
    // already-registered feed, with no new event from the agent.
    let (late, mut late_rx) = coordinator.connect().await;
    coordinator
        .handle_message(
            late,
            ClientMessage::Subscribe {
                source_id: source_id.clone(),
                info: ParticipantInfo::named("supervisor-2"),
            },
        )
        .await;
    println!("late sub   <- {:?}", next_message(&mut late_rx).await);
    println!("late sub   <- {:?}", next_message(&mut late_rx).await);

    let status = coordinator.status().await;
    println!(
        "status: {} active source(s), {} listener(s), {} transport session(s)",
        status.active_sources,
        status.total_listeners,
        transport.created_count(),
    );

    // The agent signs off; both supervisors hear the stream end but stay
    // subscribed for the next broadcast.
    coordinator.disconnect(agent).await;
    println!("supervisor <- {:?}", next_message(&mut sup_rx).await);
    println!("late sub   <- {:?}", next_message(&mut late_rx).await);

    let status = coordinator.status().await;
    println!(
        "after disconnect: {} active source(s), {} listener(s) still subscribed",
        status.active_sources, status.total_listeners,
    );
}
