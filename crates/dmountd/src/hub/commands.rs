//! Hub actor commands, errors, and events.
//!
//! - `HubCommand`: requests sent to the `HubActor`
//! - `HubError`: failures reported back to callers
//! - `HubEvent`: membership changes published to subscribers

use std::fmt;
use std::net::SocketAddr;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::oneshot;

use super::session::{ConnectionId, Session, SessionOrigin, SessionView};

// ============================================================================
// Hub Commands
// ============================================================================

/// Commands sent to the hub actor.
///
/// Membership changes are fire-and-forget: the caller only waits for the
/// command to be queued, never for the actor to process it. Queries carry a
/// oneshot channel for the reply.
#[derive(Debug)]
pub enum HubCommand {
    /// Track a new session, replacing any session at the same address.
    ///
    /// Sessions over the capacity limit are closed instead of tracked.
    AddClient {
        /// The session to track (boxed to keep the enum small)
        session: Box<Session>,
    },

    /// Stop tracking whatever session is registered at `addr`.
    RemoveClient {
        /// Address of the session to drop
        addr: SocketAddr,
    },

    /// Remove the session at `addr` only if it is still connection `id`.
    ///
    /// Sent by a connection handler on teardown, so that a handler which
    /// finishes late cannot remove its replacement.
    Release {
        /// Address of the closing connection
        addr: SocketAddr,
        /// Id of the closing connection
        id: ConnectionId,
    },

    /// Mark the session as having completed the handshake.
    Authenticate {
        /// Address of the session
        addr: SocketAddr,
        /// Id of the session
        id: ConnectionId,
    },

    /// Snapshot all tracked sessions.
    Snapshot {
        /// Channel to send the sessions, ordered by address
        respond_to: oneshot::Sender<Vec<SessionView>>,
    },

    /// Count tracked sessions.
    Count {
        /// Channel to send the count
        respond_to: oneshot::Sender<usize>,
    },

    /// Evict every session idle for longer than the liveness timeout.
    ///
    /// Sent periodically by the liveness monitor task.
    Sweep,
}

// ============================================================================
// Hub Errors
// ============================================================================

/// Errors from hub operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HubError {
    /// The actor has stopped
    #[error("hub channel closed")]
    ChannelClosed,
}

// ============================================================================
// Hub Events
// ============================================================================

/// Why a session left the hub.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemovalReason {
    /// The connection closed or a caller asked for removal
    Disconnected,
    /// No activity within the liveness timeout
    LivenessTimeout {
        /// Idle time observed by the sweep
        idle: Duration,
    },
    /// A new connection registered at the same address
    Replaced,
}

impl fmt::Display for RemovalReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => f.write_str("disconnected"),
            Self::LivenessTimeout { idle } => {
                write!(f, "liveness timeout (idle {}ms)", idle.as_millis())
            }
            Self::Replaced => f.write_str("replaced"),
        }
    }
}

/// Membership changes published by the hub.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HubEvent {
    /// A session started being tracked
    Added {
        addr: SocketAddr,
        id: ConnectionId,
        origin: SessionOrigin,
    },

    /// A session finished the handshake
    Authenticated { addr: SocketAddr, id: ConnectionId },

    /// A session stopped being tracked
    Removed {
        addr: SocketAddr,
        id: ConnectionId,
        reason: RemovalReason,
    },

    /// A session was refused because the hub is full
    Rejected { addr: SocketAddr, id: ConnectionId },
}
