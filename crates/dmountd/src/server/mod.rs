//! Network endpoints of the daemon.
//!
//! - `TcpServer`: authenticated line-delimited JSON channel, optionally TLS
//! - `HttpServer`: REST routes plus a WebSocket command channel
//! - `RowFeedServer`: unauthenticated `path index` row lookups
//!
//! All three share one `Dispatcher` (and through it one `MountRegistry`) and
//! stop accepting when the shutdown token is cancelled.
//!
//! ```text
//! ┌───────────┐ ┌────────────┐ ┌───────────────┐
//! │ TcpServer │ │ HttpServer │ │ RowFeedServer │
//! └─────┬─────┘ └─────┬──────┘ └───────┬───────┘
//!       │ accept()    │ /ws, /command  │
//!       ▼             ▼                │
//! ┌───────────────────────────┐        │
//! │ ConnectionHandler / WS    │        │
//! └─────────────┬─────────────┘        │
//!               ▼                      ▼
//!        ┌────────────┐        ┌───────────────┐
//!        │ Dispatcher │───────▶│ MountRegistry │
//!        └────────────┘        └───────────────┘
//! ```
//!
//! # Panic-Free Guarantees
//!
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - Accept errors are logged and the listener keeps running

mod connection;
mod dispatch;
pub mod http;
pub mod row_feed;
pub mod tls;

pub use connection::{
    CloseReason, ConnectionError, ConnectionHandler, ConnectionState, AUTH_ACK, MAX_FRAME_SIZE,
};
pub use dispatch::Dispatcher;
pub use http::HttpServer;
pub use row_feed::RowFeedServer;
pub use tls::TlsError;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tokio_rustls::{TlsAcceptor, TlsConnector};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::SharedSecret;
use crate::hub::{HubHandle, Session, DEFAULT_LIVENESS_TIMEOUT};

/// Ping period of outbound peer links when none is configured.
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration =
    Duration::from_millis(DEFAULT_LIVENESS_TIMEOUT.as_millis() as u64 / 3);

/// Everything a connection handler needs, cheap to clone.
#[derive(Clone)]
pub struct ServerContext {
    /// Shared command executor
    pub dispatcher: Arc<Dispatcher>,

    /// Session hub
    pub hub: HubHandle,

    /// Handshake secret
    pub secret: SharedSecret,

    /// Daemon-wide shutdown token
    pub shutdown: CancellationToken,

    /// Ping period of outbound peer links
    pub heartbeat_interval: Duration,

    /// Set when peers are dialed over TLS
    pub peer_tls: Option<TlsConnector>,
}

impl ServerContext {
    pub fn new(
        dispatcher: Arc<Dispatcher>,
        hub: HubHandle,
        secret: SharedSecret,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            dispatcher,
            hub,
            secret,
            shutdown,
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            peer_tls: None,
        }
    }

    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    /// Dials peers over TLS with `connector`.
    pub fn with_peer_tls(mut self, connector: TlsConnector) -> Self {
        self.peer_tls = Some(connector);
        self
    }
}

/// Listener errors.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Failed to bind {addr}: {error}")]
    Bind { addr: SocketAddr, error: String },

    #[error("Server error: {0}")]
    Serve(String),
}

/// Binds a TCP listener, mapping the error.
pub(crate) async fn bind(addr: SocketAddr) -> Result<TcpListener, ServerError> {
    TcpListener::bind(addr).await.map_err(|e| ServerError::Bind {
        addr,
        error: e.to_string(),
    })
}

/// Authenticated TCP endpoint.
pub struct TcpServer {
    listener: TcpListener,
    context: ServerContext,
    tls: Option<TlsAcceptor>,
}

impl TcpServer {
    /// Binds to `addr`; use port 0 for an ephemeral port.
    pub async fn bind(addr: SocketAddr, context: ServerContext) -> Result<Self, ServerError> {
        let listener = bind(addr).await?;
        Ok(Self {
            listener,
            context,
            tls: None,
        })
    }

    /// Serves every accepted connection over TLS.
    pub fn with_tls(mut self, acceptor: TlsAcceptor) -> Self {
        self.tls = Some(acceptor);
        self
    }

    pub fn is_tls(&self) -> bool {
        self.tls.is_some()
    }

    /// Returns the bound address.
    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        self.listener
            .local_addr()
            .map_err(|e| ServerError::Serve(e.to_string()))
    }

    /// Accepts connections until shutdown, one handler task per connection.
    pub async fn run(self) -> Result<(), ServerError> {
        info!(addr = %self.local_addr()?, tls = self.is_tls(), "TCP server listening");

        loop {
            tokio::select! {
                _ = self.context.shutdown.cancelled() => {
                    info!("TCP server shutdown requested");
                    break;
                }

                result = self.listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            let session = Session::inbound(addr, &self.context.shutdown);
                            let context = self.context.clone();
                            match &self.tls {
                                Some(acceptor) => {
                                    tokio::spawn(serve_tls(acceptor.clone(), stream, session, context));
                                }
                                None => {
                                    tokio::spawn(ConnectionHandler::new(stream, session, context).run());
                                }
                            }
                        }
                        Err(e) => {
                            error!(error = %e, "Failed to accept connection");
                        }
                    }
                }
            }
        }

        Ok(())
    }
}

/// Completes the TLS handshake, then runs the connection.
///
/// The session is only registered once the handshake succeeds.
async fn serve_tls(
    acceptor: TlsAcceptor,
    stream: TcpStream,
    session: Session,
    context: ServerContext,
) {
    let addr = session.addr;
    match timeout(tls::HANDSHAKE_TIMEOUT, acceptor.accept(stream)).await {
        Ok(Ok(stream)) => {
            ConnectionHandler::new(stream, session, context).run().await;
        }
        Ok(Err(e)) => warn!(addr = %addr, error = %e, "TLS handshake failed"),
        Err(_) => warn!(addr = %addr, "TLS handshake timed out"),
    }
}
