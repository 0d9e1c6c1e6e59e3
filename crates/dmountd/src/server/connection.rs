//! Per-connection state machine for the authenticated TCP channel.
//!
//! ```text
//! Connecting ──register──▶ Authenticating ──secret ok──▶ Authenticated ──▶ Closed
//!                                │                            │
//!                                └──wrong secret / EOF────────┴──▶ Closed
//! ```
//!
//! The first line a client sends must be the shared secret. On a match the
//! handler answers `Authenticated` and then serves one command envelope per
//! line, replying with one response line each. A wrong secret closes the
//! connection without any reply. Any line, including an empty one, counts
//! as activity for the liveness sweep.
//!
//! Outbound peer links are the dialing side: they send a `ping` command on
//! every heartbeat tick, and the peer's reply lines keep the link live. Lines
//! arriving on an outbound link are replies and are never dispatched.
//!
//! The handler is generic over the byte stream so that it can run over a
//! plain `TcpStream` or a TLS-wrapped one.
//!
//! # Panic-Free Guarantees
//!
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - Connection errors are logged and result in graceful disconnect

use std::fmt;
use std::time::Duration;

use thiserror::Error;
use tokio::io::{
    split, AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader,
    BufWriter, ReadHalf, WriteHalf,
};
use tokio::time::{interval_at, timeout, Instant, Interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::hub::Session;

use super::ServerContext;

/// Acknowledgement line sent after a successful handshake.
pub const AUTH_ACK: &str = "Authenticated";

/// Maximum frame size (1 MB)
pub const MAX_FRAME_SIZE: usize = 1_048_576;

/// Write timeout (10 seconds)
const WRITE_TIMEOUT: Duration = Duration::from_secs(10);

/// Frame sent on every heartbeat tick of an outbound link.
pub const PING_FRAME: &str = r#"{"action":"ping"}"#;

/// Connection lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Accepted, not yet registered with the hub
    Connecting,
    /// Waiting for the shared secret
    Authenticating,
    /// Serving commands
    Authenticated,
    /// Finished
    Closed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Connecting => "connecting",
            Self::Authenticating => "authenticating",
            Self::Authenticated => "authenticated",
            Self::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Why a connection ended.
#[derive(Debug)]
pub enum CloseReason {
    /// The client closed the stream
    PeerClosed,
    /// The first line did not match the shared secret
    AuthRejected,
    /// The hub evicted the session, or the daemon is shutting down
    Evicted,
    /// Transport failure
    Error(ConnectionError),
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PeerClosed => f.write_str("peer closed"),
            Self::AuthRejected => f.write_str("authentication rejected"),
            Self::Evicted => f.write_str("evicted"),
            Self::Error(e) => write!(f, "{e}"),
        }
    }
}

/// Transport errors on a connection.
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Write timeout")]
    WriteTimeout,

    #[error("Frame too large (max: {max} bytes)")]
    FrameTooLarge { max: usize },

    #[error("Hub unavailable")]
    HubUnavailable,
}

/// What woke the message loop.
enum Wakeup {
    Evicted,
    Heartbeat,
    Frame(Result<Option<String>, ConnectionError>),
}

/// Handler for a single connection.
pub struct ConnectionHandler<S> {
    reader: BufReader<ReadHalf<S>>,
    writer: BufWriter<WriteHalf<S>>,
    /// Bytes of a line not yet terminated; survives a cancelled read.
    pending: Vec<u8>,
    session: Session,
    context: ServerContext,
    state: ConnectionState,
}

impl<S> ConnectionHandler<S>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    /// Creates a handler for `stream`.
    ///
    /// Sessions created with [`Session::outbound`] are already authenticated
    /// and skip the secret exchange.
    pub fn new(stream: S, session: Session, context: ServerContext) -> Self {
        let (reader, writer) = split(stream);
        Self {
            reader: BufReader::new(reader),
            writer: BufWriter::new(writer),
            pending: Vec::new(),
            session,
            context,
            state: ConnectionState::Connecting,
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Runs the connection to completion and releases it from the hub.
    pub async fn run(mut self) -> CloseReason {
        debug!(addr = %self.session.addr, id = %self.session.id, "Connection opened");

        let reason = self.drive().await;
        let last_state = self.state;
        self.state = ConnectionState::Closed;
        let _ = self.writer.shutdown().await;

        self.context
            .hub
            .release(self.session.addr, self.session.id)
            .await;

        info!(
            addr = %self.session.addr,
            id = %self.session.id,
            state = %last_state,
            reason = %reason,
            "Connection closed"
        );
        reason
    }

    async fn drive(&mut self) -> CloseReason {
        if self.context.hub.add_client(self.session.clone()).await.is_err() {
            return CloseReason::Error(ConnectionError::HubUnavailable);
        }

        if !self.session.authenticated {
            self.state = ConnectionState::Authenticating;
            if let Err(reason) = self.authenticate().await {
                return reason;
            }
            self.session.authenticated = true;
            self.context
                .hub
                .authenticate(self.session.addr, self.session.id)
                .await;
        }

        self.state = ConnectionState::Authenticated;
        self.session.liveness.touch();
        self.process_messages().await
    }

    /// Reads the first line and compares it with the shared secret.
    async fn authenticate(&mut self) -> Result<(), CloseReason> {
        let line = match self.next_frame().await {
            Ok(Some(line)) => line,
            Ok(None) => return Err(CloseReason::PeerClosed),
            Err(reason) => return Err(reason),
        };

        if !self.context.secret.matches(&line) {
            warn!(addr = %self.session.addr, "Authentication failed");
            return Err(CloseReason::AuthRejected);
        }

        self.send_line(AUTH_ACK).await.map_err(CloseReason::Error)?;
        info!(addr = %self.session.addr, id = %self.session.id, "Client authenticated");
        Ok(())
    }

    /// Serves command frames until the connection ends.
    ///
    /// On an outbound link this instead pings the peer on every heartbeat
    /// tick and counts its replies as activity.
    async fn process_messages(&mut self) -> CloseReason {
        let outbound = self.session.origin.peer().is_some();
        let mut heartbeat = outbound.then(|| heartbeat_ticker(self.context.heartbeat_interval));
        let evict = self.session.evict.clone();

        loop {
            let wakeup = tokio::select! {
                biased;
                _ = evict.cancelled() => Wakeup::Evicted,
                _ = tick(&mut heartbeat) => Wakeup::Heartbeat,
                frame = self.read_frame() => Wakeup::Frame(frame),
            };

            let frame = match wakeup {
                Wakeup::Evicted => return CloseReason::Evicted,
                Wakeup::Heartbeat => {
                    if let Err(e) = self.send_line(PING_FRAME).await {
                        return self.write_failed(e);
                    }
                    continue;
                }
                Wakeup::Frame(Ok(Some(frame))) => frame,
                Wakeup::Frame(Ok(None)) => return CloseReason::PeerClosed,
                Wakeup::Frame(Err(e)) => return CloseReason::Error(e),
            };

            self.session.liveness.touch();
            if frame.trim().is_empty() {
                continue;
            }
            if outbound {
                debug!(addr = %self.session.addr, reply = %frame, "Peer reply");
                continue;
            }

            let response = self.context.dispatcher.dispatch_frame(&frame).await;
            if let Err(e) = self.send_line(&response.to_frame()).await {
                return self.write_failed(e);
            }
        }
    }

    fn write_failed(&self, error: ConnectionError) -> CloseReason {
        if self.session.evict.is_cancelled() {
            return CloseReason::Evicted;
        }
        CloseReason::Error(error)
    }

    /// Waits for the next line, or for eviction.
    ///
    /// `Ok(None)` means the peer closed the stream.
    async fn next_frame(&mut self) -> Result<Option<String>, CloseReason> {
        let evict = self.session.evict.clone();
        tokio::select! {
            biased;
            _ = evict.cancelled() => Err(CloseReason::Evicted),
            frame = self.read_frame() => frame.map_err(CloseReason::Error),
        }
    }

    /// Reads one line, without its terminator.
    ///
    /// Partial lines are kept in `pending`, so a read dropped by `select!`
    /// loses nothing.
    async fn read_frame(&mut self) -> Result<Option<String>, ConnectionError> {
        let limit = (MAX_FRAME_SIZE + 1).saturating_sub(self.pending.len()) as u64;
        let bytes_read = (&mut self.reader)
            .take(limit)
            .read_until(b'\n', &mut self.pending)
            .await?;

        if bytes_read == 0 && self.pending.is_empty() {
            return Ok(None);
        }
        if self.pending.last() != Some(&b'\n') && self.pending.len() > MAX_FRAME_SIZE {
            return Err(ConnectionError::FrameTooLarge {
                max: MAX_FRAME_SIZE,
            });
        }

        let bytes = std::mem::take(&mut self.pending);
        let mut line = String::from_utf8(bytes)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        let trimmed = line.trim_end_matches(&['\n', '\r'][..]).len();
        line.truncate(trimmed);
        Ok(Some(line))
    }

    async fn send_line(&mut self, line: &str) -> Result<(), ConnectionError> {
        let writer = &mut self.writer;
        match timeout(WRITE_TIMEOUT, async {
            writer.write_all(line.as_bytes()).await?;
            writer.write_all(b"\n").await?;
            writer.flush().await?;
            Ok::<(), std::io::Error>(())
        })
        .await
        {
            Ok(result) => result.map_err(ConnectionError::from),
            Err(_) => Err(ConnectionError::WriteTimeout),
        }
    }
}

fn heartbeat_ticker(period: Duration) -> Interval {
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker
}

/// Next heartbeat tick; never resolves for links without a heartbeat.
async fn tick(heartbeat: &mut Option<Interval>) {
    match heartbeat {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending().await,
    }
}
