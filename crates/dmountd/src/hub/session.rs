//! Session values tracked by the hub.

use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Identifies one connection, distinguishing successive connections that
/// reuse the same peer address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Allocates the next process-wide connection id.
    pub fn next() -> Self {
        Self(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Returns the numeric value.
    pub fn get(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Who opened the connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionOrigin {
    /// A client connected to one of our listeners.
    Inbound,

    /// We dialed a configured peer; the string is the dial target, used again
    /// when the connection has to be re-established.
    Outbound(String),
}

impl SessionOrigin {
    /// Returns the dial target for outbound sessions.
    pub fn peer(&self) -> Option<&str> {
        match self {
            Self::Inbound => None,
            Self::Outbound(peer) => Some(peer),
        }
    }
}

/// Last-activity clock shared by a connection handler and the liveness sweep.
///
/// Stored as milliseconds since the session's creation so that the handler
/// can refresh it without going through the hub.
#[derive(Debug)]
pub struct Liveness {
    epoch: Instant,
    last_seen_ms: AtomicU64,
}

impl Liveness {
    /// Creates a clock whose last activity is now.
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
            last_seen_ms: AtomicU64::new(0),
        }
    }

    /// Records activity now.
    pub fn touch(&self) {
        let elapsed = u64::try_from(self.epoch.elapsed().as_millis()).unwrap_or(u64::MAX);
        self.last_seen_ms.fetch_max(elapsed, Ordering::Relaxed);
    }

    /// Returns the time of the last recorded activity.
    pub fn last_seen(&self) -> Instant {
        self.epoch + Duration::from_millis(self.last_seen_ms.load(Ordering::Relaxed))
    }

    /// Time since the last recorded activity.
    pub fn idle(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_seen())
    }

    /// True once the session has been idle for longer than `timeout`.
    pub fn is_stale(&self, now: Instant, timeout: Duration) -> bool {
        self.idle(now) > timeout
    }
}

impl Default for Liveness {
    fn default() -> Self {
        Self::new()
    }
}

/// A tracked connection.
///
/// The connection itself is owned by its handler task; the hub holds the
/// eviction token, which the handler watches and closes the connection on.
#[derive(Debug, Clone)]
pub struct Session {
    /// Transport-level peer address (hub key)
    pub addr: SocketAddr,

    /// Connection id
    pub id: ConnectionId,

    /// Inbound client or outbound peer
    pub origin: SessionOrigin,

    /// Whether the shared-secret handshake has completed
    pub authenticated: bool,

    /// Activity clock
    pub liveness: Arc<Liveness>,

    /// Cancelled to close the connection
    pub evict: CancellationToken,
}

impl Session {
    /// Creates an unauthenticated session for an accepted connection.
    ///
    /// `shutdown` is the daemon-wide token; the eviction token is its child so
    /// that shutdown closes every connection.
    pub fn inbound(addr: SocketAddr, shutdown: &CancellationToken) -> Self {
        Self {
            addr,
            id: ConnectionId::next(),
            origin: SessionOrigin::Inbound,
            authenticated: false,
            liveness: Arc::new(Liveness::new()),
            evict: shutdown.child_token(),
        }
    }

    /// Creates an already authenticated session for a dialed peer.
    pub fn outbound(addr: SocketAddr, peer: impl Into<String>, shutdown: &CancellationToken) -> Self {
        Self {
            addr,
            id: ConnectionId::next(),
            origin: SessionOrigin::Outbound(peer.into()),
            authenticated: true,
            liveness: Arc::new(Liveness::new()),
            evict: shutdown.child_token(),
        }
    }

    /// Builds a point-in-time view.
    pub fn view(&self, now: Instant) -> SessionView {
        SessionView {
            addr: self.addr,
            id: self.id,
            origin: self.origin.clone(),
            authenticated: self.authenticated,
            idle: self.liveness.idle(now),
        }
    }
}

/// Read-only snapshot of a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionView {
    pub addr: SocketAddr,
    pub id: ConnectionId,
    pub origin: SessionOrigin,
    pub authenticated: bool,
    pub idle: Duration,
}
