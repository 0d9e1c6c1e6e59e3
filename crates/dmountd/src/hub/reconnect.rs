//! Re-establishes connections to configured peers.
//!
//! The hub hands over an outbound peer whenever its session is evicted or
//! its connection drops. The supervisor then dials the peer on a fixed
//! backoff until the handshake succeeds, and hands the new connection to a
//! `ConnectionHandler`, which registers it with the hub again. Peers are
//! dialed over TLS when the context carries a connector.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Duration;

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};

use crate::server::tls::{self, TlsError};
use crate::server::{ConnectionHandler, ServerContext, AUTH_ACK};

use super::session::Session;

/// Delay between failed dial attempts.
pub const DEFAULT_RECONNECT_BACKOFF: Duration = Duration::from_secs(2);

/// Time allowed for connecting and receiving the handshake ack.
const DIAL_TIMEOUT: Duration = Duration::from_secs(5);

/// Longest ack line accepted from a peer.
const MAX_ACK_LEN: usize = 64;

/// Byte stream to a peer, plain or TLS.
pub trait PeerStream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> PeerStream for T {}

/// Creates the channel between the hub and the supervisor.
pub fn channel() -> (ReconnectHandle, ReconnectQueue) {
    let (sender, receiver) = mpsc::unbounded_channel();
    (ReconnectHandle { sender }, ReconnectQueue { receiver })
}

/// Sending side, held by the hub actor.
///
/// Unbounded so that the actor never waits on the supervisor.
#[derive(Debug, Clone)]
pub struct ReconnectHandle {
    sender: mpsc::UnboundedSender<String>,
}

impl ReconnectHandle {
    /// Asks for `peer` to be dialed.
    pub fn request(&self, peer: &str) {
        if self.sender.send(peer.to_string()).is_err() {
            debug!(peer = %peer, "Reconnect supervisor gone, request dropped");
        }
    }
}

/// Receiving side, consumed by the supervisor.
#[derive(Debug)]
pub struct ReconnectQueue {
    receiver: mpsc::UnboundedReceiver<String>,
}

impl ReconnectQueue {
    /// Waits for the next peer to dial.
    pub async fn next(&mut self) -> Option<String> {
        self.receiver.recv().await
    }

    /// Takes a pending peer without waiting.
    pub fn try_next(&mut self) -> Option<String> {
        self.receiver.try_recv().ok()
    }
}

/// Errors from a single dial attempt.
#[derive(Debug, Error)]
pub enum DialError {
    #[error("connect timed out")]
    Timeout,

    #[error("peer rejected handshake: {0:?}")]
    Rejected(String),

    #[error("peer closed connection during handshake")]
    Closed,

    #[error("TLS error: {0}")]
    Tls(#[from] TlsError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Dials outbound peers until each is connected.
pub struct ReconnectSupervisor {
    queue: ReconnectQueue,
    context: ServerContext,
    backoff: Duration,
    dials: HashMap<String, JoinHandle<()>>,
}

impl ReconnectSupervisor {
    /// Creates a supervisor reading requests from `queue`.
    pub fn new(queue: ReconnectQueue, context: ServerContext, backoff: Duration) -> Self {
        Self {
            queue,
            context,
            backoff,
            dials: HashMap::new(),
        }
    }

    /// Runs until shutdown.
    ///
    /// At most one dial loop runs per peer; requests for a peer that is
    /// already being dialed are dropped.
    pub async fn run(mut self) {
        info!(backoff_ms = self.backoff.as_millis() as u64, "Reconnect supervisor starting");
        let shutdown = self.context.shutdown.clone();

        loop {
            let peer = tokio::select! {
                _ = shutdown.cancelled() => break,
                peer = self.queue.next() => peer,
            };
            let Some(peer) = peer else {
                break;
            };

            self.dials.retain(|_, task| !task.is_finished());
            if self.dials.contains_key(&peer) {
                debug!(peer = %peer, "Dial already in progress");
                continue;
            }

            let task = tokio::spawn(maintain_peer(
                peer.clone(),
                self.context.clone(),
                self.backoff,
            ));
            self.dials.insert(peer, task);
        }

        for task in self.dials.values() {
            task.abort();
        }
        info!("Reconnect supervisor stopped");
    }
}

/// Dials `peer` until a handshake succeeds, then starts its handler.
async fn maintain_peer(peer: String, context: ServerContext, backoff: Duration) {
    let mut attempt: u32 = 0;

    loop {
        if context.shutdown.is_cancelled() {
            return;
        }
        attempt = attempt.saturating_add(1);

        match dial(&peer, &context).await {
            Ok((stream, addr)) => {
                info!(peer = %peer, addr = %addr, attempt, "Peer connected");

                let session = Session::outbound(addr, peer, &context.shutdown);
                let handler = ConnectionHandler::new(stream, session, context);
                tokio::spawn(handler.run());
                return;
            }
            Err(e) => {
                warn!(peer = %peer, attempt, error = %e, "Peer dial failed, retrying");
            }
        }

        tokio::select! {
            _ = context.shutdown.cancelled() => return,
            _ = sleep(backoff) => {}
        }
    }
}

/// Connects to `peer` and performs the client side of the handshake.
async fn dial(
    peer: &str,
    context: &ServerContext,
) -> Result<(Box<dyn PeerStream>, SocketAddr), DialError> {
    timeout(DIAL_TIMEOUT, async {
        let tcp = TcpStream::connect(peer).await?;
        let addr = tcp.peer_addr()?;

        let mut stream: Box<dyn PeerStream> = match &context.peer_tls {
            Some(connector) => Box::new(connector.connect(tls::server_name(peer)?, tcp).await?),
            None => Box::new(tcp),
        };

        let mut greeting = context.secret.expose().as_bytes().to_vec();
        greeting.push(b'\n');
        stream.write_all(&greeting).await?;

        // Read byte-wise so that nothing after the ack line is consumed.
        let mut ack = Vec::new();
        loop {
            let mut byte = [0u8; 1];
            if stream.read(&mut byte).await? == 0 {
                return Err(DialError::Closed);
            }
            if byte[0] == b'\n' {
                break;
            }
            ack.push(byte[0]);
            if ack.len() > MAX_ACK_LEN {
                break;
            }
        }

        let ack = String::from_utf8_lossy(&ack);
        let ack = ack.trim_end_matches('\r');
        if ack != AUTH_ACK {
            return Err(DialError::Rejected(ack.to_string()));
        }
        Ok::<_, DialError>((stream, addr))
    })
    .await
    .map_err(|_| DialError::Timeout)?
}
