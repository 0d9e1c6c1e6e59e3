//! Hub actor - owns the session map and processes commands.
//!
//! # Panic-Free Guarantees
//!
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - Reply and event send failures are ignored; the caller may have gone away

use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::commands::{HubCommand, HubEvent, RemovalReason};
use super::reconnect::ReconnectHandle;
use super::session::{ConnectionId, Session, SessionView};

/// Default maximum number of tracked sessions.
pub const MAX_SESSIONS: usize = 1024;

/// The hub actor.
///
/// Runs in a single task; every membership change goes through its command
/// channel, so the session map is never shared.
pub struct HubActor {
    /// Command receiver
    receiver: mpsc::Receiver<HubCommand>,

    /// Tracked sessions, keyed by peer address
    sessions: HashMap<SocketAddr, Session>,

    /// Idle time after which a session is evicted
    liveness_timeout: Duration,

    /// Capacity limit
    max_sessions: usize,

    /// Where evicted or dropped outbound peers are handed for re-dialing
    reconnect: Option<ReconnectHandle>,

    /// Membership event publisher
    event_publisher: broadcast::Sender<HubEvent>,
}

impl HubActor {
    /// Creates a new hub actor.
    pub fn new(
        receiver: mpsc::Receiver<HubCommand>,
        event_publisher: broadcast::Sender<HubEvent>,
        liveness_timeout: Duration,
        max_sessions: usize,
        reconnect: Option<ReconnectHandle>,
    ) -> Self {
        Self {
            receiver,
            sessions: HashMap::new(),
            liveness_timeout,
            max_sessions,
            reconnect,
            event_publisher,
        }
    }

    /// Runs the actor loop until every sender is dropped or `shutdown` fires.
    pub async fn run(mut self, shutdown: CancellationToken) {
        info!(
            liveness_timeout_ms = self.liveness_timeout.as_millis() as u64,
            max_sessions = self.max_sessions,
            "Hub actor starting"
        );

        loop {
            let cmd = tokio::select! {
                _ = shutdown.cancelled() => break,
                cmd = self.receiver.recv() => cmd,
            };
            match cmd {
                Some(cmd) => self.handle_command(cmd),
                None => break,
            }
        }

        for session in self.sessions.values() {
            session.evict.cancel();
        }
        info!(sessions = self.sessions.len(), "Hub actor stopped");
    }

    /// Dispatches a command to its handler.
    fn handle_command(&mut self, cmd: HubCommand) {
        match cmd {
            HubCommand::AddClient { session } => self.handle_add(*session),
            HubCommand::RemoveClient { addr } => self.handle_remove(addr),
            HubCommand::Release { addr, id } => self.handle_release(addr, id),
            HubCommand::Authenticate { addr, id } => self.handle_authenticate(addr, id),
            HubCommand::Snapshot { respond_to } => {
                let _ = respond_to.send(self.snapshot());
            }
            HubCommand::Count { respond_to } => {
                let _ = respond_to.send(self.sessions.len());
            }
            HubCommand::Sweep => self.handle_sweep(Instant::now()),
        }
    }

    // ========================================================================
    // Membership
    // ========================================================================

    fn handle_add(&mut self, session: Session) {
        let addr = session.addr;
        let id = session.id;

        let replacing = self.sessions.contains_key(&addr);
        if !replacing && self.sessions.len() >= self.max_sessions {
            warn!(
                addr = %addr,
                id = %id,
                max = self.max_sessions,
                "Hub full, closing new connection"
            );
            session.evict.cancel();
            let _ = self.event_publisher.send(HubEvent::Rejected { addr, id });
            return;
        }

        let origin = session.origin.clone();
        if let Some(previous) = self.sessions.insert(addr, session) {
            previous.evict.cancel();
            debug!(addr = %addr, old_id = %previous.id, new_id = %id, "Session replaced");
            let _ = self.event_publisher.send(HubEvent::Removed {
                addr,
                id: previous.id,
                reason: RemovalReason::Replaced,
            });
        }

        info!(
            addr = %addr,
            id = %id,
            origin = ?origin,
            total = self.sessions.len(),
            "Session added"
        );
        let _ = self.event_publisher.send(HubEvent::Added { addr, id, origin });
    }

    fn handle_remove(&mut self, addr: SocketAddr) {
        match self.sessions.remove(&addr) {
            Some(session) => {
                session.evict.cancel();
                info!(addr = %addr, id = %session.id, "Session removed");
                let _ = self.event_publisher.send(HubEvent::Removed {
                    addr,
                    id: session.id,
                    reason: RemovalReason::Disconnected,
                });
            }
            None => debug!(addr = %addr, "Remove for unknown session ignored"),
        }
    }

    fn handle_release(&mut self, addr: SocketAddr, id: ConnectionId) {
        let current = self.sessions.get(&addr).map(|s| s.id);
        if current != Some(id) {
            debug!(addr = %addr, id = %id, "Release for stale connection ignored");
            return;
        }

        if let Some(session) = self.sessions.remove(&addr) {
            info!(addr = %addr, id = %id, "Session closed");
            let _ = self.event_publisher.send(HubEvent::Removed {
                addr,
                id,
                reason: RemovalReason::Disconnected,
            });
            self.request_reconnect(&session);
        }
    }

    fn handle_authenticate(&mut self, addr: SocketAddr, id: ConnectionId) {
        match self.sessions.get_mut(&addr) {
            Some(session) if session.id == id => {
                session.authenticated = true;
                debug!(addr = %addr, id = %id, "Session authenticated");
                let _ = self
                    .event_publisher
                    .send(HubEvent::Authenticated { addr, id });
            }
            _ => debug!(addr = %addr, id = %id, "Authenticate for unknown session ignored"),
        }
    }

    fn snapshot(&self) -> Vec<SessionView> {
        let now = Instant::now();
        let mut views: Vec<SessionView> = self.sessions.values().map(|s| s.view(now)).collect();
        views.sort_by_key(|v| v.addr);
        views
    }

    // ========================================================================
    // Liveness
    // ========================================================================

    /// Evicts sessions whose last activity is older than the liveness timeout.
    fn handle_sweep(&mut self, now: Instant) {
        let stale: Vec<(SocketAddr, Duration)> = self
            .sessions
            .iter()
            .filter(|(_, s)| s.liveness.is_stale(now, self.liveness_timeout))
            .map(|(addr, s)| (*addr, s.liveness.idle(now)))
            .collect();

        if stale.is_empty() {
            return;
        }

        for (addr, idle) in stale {
            let Some(session) = self.sessions.remove(&addr) else {
                continue;
            };
            session.evict.cancel();

            let reason = RemovalReason::LivenessTimeout { idle };
            warn!(
                addr = %addr,
                id = %session.id,
                reason = %reason,
                "Session evicted"
            );
            let _ = self.event_publisher.send(HubEvent::Removed {
                addr,
                id: session.id,
                reason,
            });
            self.request_reconnect(&session);
        }
    }

    /// Hands an outbound peer to the reconnect supervisor.
    fn request_reconnect(&self, session: &Session) {
        let (Some(peer), Some(reconnect)) = (session.origin.peer(), &self.reconnect) else {
            return;
        };
        reconnect.request(peer);
    }

    // ========================================================================
    // Accessors (for testing)
    // ========================================================================

    #[cfg(test)]
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hub::reconnect;

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    fn create_actor(
        max_sessions: usize,
        reconnect: Option<ReconnectHandle>,
    ) -> (HubActor, broadcast::Receiver<HubEvent>) {
        let (_cmd_tx, cmd_rx) = mpsc::channel(16);
        let (event_tx, event_rx) = broadcast::channel(16);
        let actor = HubActor::new(
            cmd_rx,
            event_tx,
            Duration::from_secs(5),
            max_sessions,
            reconnect,
        );
        (actor, event_rx)
    }

    fn add(actor: &mut HubActor, session: &Session) {
        actor.handle_command(HubCommand::AddClient {
            session: Box::new(session.clone()),
        });
    }

    #[tokio::test]
    async fn test_add_then_remove() {
        let (mut actor, mut events) = create_actor(MAX_SESSIONS, None);
        let shutdown = CancellationToken::new();
        let session = Session::inbound(addr(5000), &shutdown);

        add(&mut actor, &session);
        assert_eq!(actor.session_count(), 1);
        assert!(matches!(events.try_recv(), Ok(HubEvent::Added { .. })));

        actor.handle_command(HubCommand::RemoveClient { addr: addr(5000) });
        assert_eq!(actor.session_count(), 0);
        assert!(session.evict.is_cancelled());
        assert!(matches!(
            events.try_recv(),
            Ok(HubEvent::Removed {
                reason: RemovalReason::Disconnected,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn test_remove_unknown_is_noop() {
        let (mut actor, _events) = create_actor(MAX_SESSIONS, None);
        actor.handle_command(HubCommand::RemoveClient { addr: addr(5001) });
        assert_eq!(actor.session_count(), 0);
    }

    #[tokio::test]
    async fn test_replacing_address_evicts_previous() {
        let (mut actor, _events) = create_actor(MAX_SESSIONS, None);
        let shutdown = CancellationToken::new();
        let first = Session::inbound(addr(5002), &shutdown);
        let second = Session::inbound(addr(5002), &shutdown);

        add(&mut actor, &first);
        add(&mut actor, &second);

        assert_eq!(actor.session_count(), 1);
        assert!(first.evict.is_cancelled());
        assert!(!second.evict.is_cancelled());
    }

    #[tokio::test]
    async fn test_stale_release_does_not_remove_replacement() {
        let (mut actor, _events) = create_actor(MAX_SESSIONS, None);
        let shutdown = CancellationToken::new();
        let first = Session::inbound(addr(5003), &shutdown);
        let second = Session::inbound(addr(5003), &shutdown);

        add(&mut actor, &first);
        add(&mut actor, &second);
        actor.handle_command(HubCommand::Release {
            addr: first.addr,
            id: first.id,
        });
        assert_eq!(actor.session_count(), 1);

        actor.handle_command(HubCommand::Release {
            addr: second.addr,
            id: second.id,
        });
        assert_eq!(actor.session_count(), 0);
    }

    #[tokio::test]
    async fn test_capacity_limit_closes_new_session() {
        let (mut actor, mut events) = create_actor(2, None);
        let shutdown = CancellationToken::new();

        add(&mut actor, &Session::inbound(addr(5010), &shutdown));
        add(&mut actor, &Session::inbound(addr(5011), &shutdown));
        let overflow = Session::inbound(addr(5012), &shutdown);
        add(&mut actor, &overflow);

        assert_eq!(actor.session_count(), 2);
        assert!(overflow.evict.is_cancelled());

        let _ = events.try_recv();
        let _ = events.try_recv();
        assert!(matches!(events.try_recv(), Ok(HubEvent::Rejected { .. })));
    }

    #[tokio::test]
    async fn test_authenticate_marks_session() {
        let (mut actor, _events) = create_actor(MAX_SESSIONS, None);
        let shutdown = CancellationToken::new();
        let session = Session::inbound(addr(5020), &shutdown);

        add(&mut actor, &session);
        actor.handle_command(HubCommand::Authenticate {
            addr: session.addr,
            id: session.id,
        });

        let views = actor.snapshot();
        assert_eq!(views.len(), 1);
        assert!(views[0].authenticated);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_evicts_only_stale_sessions() {
        let (mut actor, _events) = create_actor(MAX_SESSIONS, None);
        let shutdown = CancellationToken::new();
        let quiet = Session::inbound(addr(5030), &shutdown);
        let chatty = Session::inbound(addr(5031), &shutdown);

        add(&mut actor, &quiet);
        add(&mut actor, &chatty);

        tokio::time::advance(Duration::from_secs(4)).await;
        chatty.liveness.touch();
        actor.handle_command(HubCommand::Sweep);
        assert_eq!(actor.session_count(), 2);

        tokio::time::advance(Duration::from_secs(2)).await;
        actor.handle_command(HubCommand::Sweep);

        assert_eq!(actor.session_count(), 1);
        assert!(quiet.evict.is_cancelled());
        assert!(!chatty.evict.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_hands_outbound_peer_to_reconnect() {
        let (handle, mut queue) = reconnect::channel();
        let (mut actor, _events) = create_actor(MAX_SESSIONS, Some(handle));
        let shutdown = CancellationToken::new();

        add(&mut actor, &Session::outbound(addr(5040), "peer-a:12345", &shutdown));
        add(&mut actor, &Session::inbound(addr(5041), &shutdown));

        tokio::time::advance(Duration::from_secs(6)).await;
        actor.handle_command(HubCommand::Sweep);

        assert_eq!(actor.session_count(), 0);
        assert_eq!(queue.try_next().as_deref(), Some("peer-a:12345"));
        assert_eq!(queue.try_next(), None);
    }

    #[tokio::test]
    async fn test_release_of_outbound_requests_reconnect() {
        let (handle, mut queue) = reconnect::channel();
        let (mut actor, _events) = create_actor(MAX_SESSIONS, Some(handle));
        let shutdown = CancellationToken::new();
        let session = Session::outbound(addr(5050), "peer-b:12345", &shutdown);

        add(&mut actor, &session);
        actor.handle_command(HubCommand::Release {
            addr: session.addr,
            id: session.id,
        });

        assert_eq!(queue.try_next().as_deref(), Some("peer-b:12345"));
    }
}
