//! In-process loopback transport
//!
//! A [`MediaTransport`] implementation with no real media engine behind it,
//! for integration tests and the demo. Sessions record every description,
//! candidate, and feed they are given, produce deterministic SDP blobs, and
//! expose [`LoopbackSession::push_inbound_feed`] / `emit_candidate` so a
//! test can play the role of the engine.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::adapter::{
    FeedHandle, IceCandidate, MediaTransport, SessionDescription, SessionEvent, TransportError,
    TransportSession,
};

/// Loopback transport factory
///
/// Keeps a handle to every session it creates so tests can inspect them
/// after the coordinator is done.
#[derive(Default)]
pub struct LoopbackTransport {
    next_id: AtomicU64,
    fail_next_create: AtomicBool,
    sessions: Mutex<Vec<Arc<LoopbackSession>>>,
}

impl LoopbackTransport {
    /// Create a loopback transport
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `create` call fail with an engine error
    pub fn fail_next_create(&self) {
        self.fail_next_create.store(true, Ordering::SeqCst);
    }

    /// Number of sessions created so far
    pub fn created_count(&self) -> usize {
        self.sessions.lock().unwrap().len()
    }

    /// Snapshot of every session created so far, in creation order
    pub fn sessions(&self) -> Vec<Arc<LoopbackSession>> {
        self.sessions.lock().unwrap().clone()
    }

    /// The `n`-th created session
    pub fn session(&self, n: usize) -> Arc<LoopbackSession> {
        self.sessions.lock().unwrap()[n].clone()
    }
}

#[async_trait]
impl MediaTransport for LoopbackTransport {
    async fn create(
        &self,
        events: mpsc::UnboundedSender<SessionEvent>,
    ) -> Result<Arc<dyn TransportSession>, TransportError> {
        if self.fail_next_create.swap(false, Ordering::SeqCst) {
            return Err(TransportError::Engine("loopback create armed to fail".into()));
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let session = Arc::new(LoopbackSession {
            id,
            events,
            fail_next_op: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            state: Mutex::new(SessionRecord::default()),
        });
        self.sessions.lock().unwrap().push(session.clone());
        Ok(session)
    }
}

#[derive(Default)]
struct SessionRecord {
    remote: Option<SessionDescription>,
    local: Option<SessionDescription>,
    candidates: Vec<IceCandidate>,
    feeds: Vec<FeedHandle>,
}

/// One recorded loopback session
pub struct LoopbackSession {
    id: u64,
    events: mpsc::UnboundedSender<SessionEvent>,
    fail_next_op: AtomicBool,
    closed: AtomicBool,
    state: Mutex<SessionRecord>,
}

impl LoopbackSession {
    /// Session id, unique per transport
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Make the next session operation fail with an engine error
    pub fn fail_next_op(&self) {
        self.fail_next_op.store(true, Ordering::SeqCst);
    }

    /// Simulate the engine reporting an inbound audio feed
    pub fn push_inbound_feed(&self, feed: FeedHandle) {
        let _ = self.events.send(SessionEvent::InboundFeed(feed));
    }

    /// Simulate the engine generating a local ICE candidate
    pub fn emit_candidate(&self, candidate: IceCandidate) {
        let _ = self.events.send(SessionEvent::IceCandidate(candidate));
    }

    /// Whether `close` has been called
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Last remote description applied, if any
    pub fn remote_description(&self) -> Option<SessionDescription> {
        self.state.lock().unwrap().remote.clone()
    }

    /// Last local description produced, if any
    pub fn local_description(&self) -> Option<SessionDescription> {
        self.state.lock().unwrap().local.clone()
    }

    /// Remote candidates applied so far
    pub fn candidates(&self) -> Vec<IceCandidate> {
        self.state.lock().unwrap().candidates.clone()
    }

    /// Feeds attached so far
    pub fn attached_feeds(&self) -> Vec<FeedHandle> {
        self.state.lock().unwrap().feeds.clone()
    }

    fn check_open(&self) -> Result<(), TransportError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::SessionClosed);
        }
        if self.fail_next_op.swap(false, Ordering::SeqCst) {
            return Err(TransportError::Engine("loopback op armed to fail".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl TransportSession for LoopbackSession {
    async fn set_remote_description(
        &self,
        desc: SessionDescription,
    ) -> Result<(), TransportError> {
        self.check_open()?;
        self.state.lock().unwrap().remote = Some(desc);
        Ok(())
    }

    async fn create_offer(&self) -> Result<SessionDescription, TransportError> {
        self.check_open()?;
        let desc = SessionDescription::offer(format!("v=0 loopback-offer session={}", self.id));
        self.state.lock().unwrap().local = Some(desc.clone());
        Ok(desc)
    }

    async fn create_answer(&self) -> Result<SessionDescription, TransportError> {
        self.check_open()?;
        let mut state = self.state.lock().unwrap();
        if state.remote.is_none() {
            return Err(TransportError::InvalidDescription(
                "answer requested before remote offer".into(),
            ));
        }
        let desc = SessionDescription::answer(format!("v=0 loopback-answer session={}", self.id));
        state.local = Some(desc.clone());
        Ok(desc)
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), TransportError> {
        self.check_open()?;
        self.state.lock().unwrap().candidates.push(candidate);
        Ok(())
    }

    async fn attach_feed(&self, feed: FeedHandle) -> Result<(), TransportError> {
        self.check_open()?;
        self.state.lock().unwrap().feeds.push(feed);
        Ok(())
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}
