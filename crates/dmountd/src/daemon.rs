//! Wires the registry, hub and endpoints into one running daemon.

use std::net::SocketAddr;
use std::sync::Arc;

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use dmount_core::{DomainError, Sandbox};

use crate::config::{ConfigError, DaemonConfig};
use crate::host::{spawn_resource_monitor, HostIntrospector};
use crate::hub::{reconnect, spawn_hub, HubHandle, ReconnectHandle, ReconnectQueue, ReconnectSupervisor};
use crate::mounts::MountRegistry;
use crate::server::{
    tls, Dispatcher, HttpServer, RowFeedServer, ServerContext, ServerError, TcpServer, TlsError,
};

/// Errors that stop the daemon from starting or running.
#[derive(Debug, Error)]
pub enum DaemonError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error(transparent)]
    Server(#[from] ServerError),

    #[error(transparent)]
    Tls(#[from] TlsError),
}

/// A daemon with every listener bound, ready to run.
pub struct Daemon {
    registry: Arc<MountRegistry>,
    context: ServerContext,
    tcp: TcpServer,
    http: HttpServer,
    row_feed: RowFeedServer,
    reconnect: ReconnectHandle,
    reconnect_queue: ReconnectQueue,
    peers: Vec<String>,
    reconnect_backoff: std::time::Duration,
}

impl Daemon {
    /// Opens the sandbox, starts the hub and binds all listeners.
    ///
    /// Nothing is accepted until [`Self::run`] is called.
    pub async fn bind(config: &DaemonConfig, shutdown: CancellationToken) -> Result<Self, DaemonError> {
        config.validate()?;

        let acceptor = match config.tls_identity() {
            Some((cert, key)) => Some(tls::acceptor(cert, key)?),
            None => None,
        };
        let peer_tls = match &config.peer_ca {
            Some(ca) => Some(tls::connector(ca)?),
            None => None,
        };

        let sandbox = Sandbox::prepare(&config.sandbox_root)?;
        let cache_path = sandbox.root().display().to_string();
        let registry = Arc::new(MountRegistry::new(sandbox));

        let dispatcher = Arc::new(Dispatcher::new(
            Arc::clone(&registry),
            HostIntrospector::new(cache_path),
            config.dispatch_timeout(),
        ));

        let (reconnect_handle, reconnect_queue) = reconnect::channel();
        let hub = spawn_hub(
            config.hub_settings(),
            Some(reconnect_handle.clone()),
            shutdown.clone(),
        );
        let mut context = ServerContext::new(
            Arc::clone(&dispatcher),
            hub,
            config.secret.clone(),
            shutdown.clone(),
        )
        .with_heartbeat_interval(config.heartbeat_interval());
        if let Some(connector) = peer_tls {
            context = context.with_peer_tls(connector);
        }

        let mut tcp = TcpServer::bind(config.tcp_addr()?, context.clone()).await?;
        match acceptor {
            Some(acceptor) => tcp = tcp.with_tls(acceptor),
            None => warn!("TLS not configured, TCP channel is plaintext"),
        }
        let http = HttpServer::bind(config.http_addr()?, dispatcher, shutdown.clone()).await?;
        let row_feed =
            RowFeedServer::bind(config.row_feed_addr()?, Arc::clone(&registry), shutdown).await?;

        Ok(Self {
            registry,
            context,
            tcp,
            http,
            row_feed,
            reconnect: reconnect_handle,
            reconnect_queue,
            peers: config.peers.clone(),
            reconnect_backoff: config.reconnect_backoff(),
        })
    }

    pub fn registry(&self) -> &Arc<MountRegistry> {
        &self.registry
    }

    pub fn hub(&self) -> &HubHandle {
        &self.context.hub
    }

    pub fn tcp_addr(&self) -> Result<SocketAddr, ServerError> {
        self.tcp.local_addr()
    }

    pub fn http_addr(&self) -> Result<SocketAddr, ServerError> {
        self.http.local_addr()
    }

    pub fn row_feed_addr(&self) -> Result<SocketAddr, ServerError> {
        self.row_feed.local_addr()
    }

    /// Runs every endpoint until shutdown.
    pub async fn run(self) -> Result<(), DaemonError> {
        let shutdown = self.context.shutdown.clone();

        let supervisor =
            ReconnectSupervisor::new(self.reconnect_queue, self.context.clone(), self.reconnect_backoff);
        let supervisor_task = tokio::spawn(supervisor.run());
        for peer in &self.peers {
            self.reconnect.request(peer);
        }

        let monitor_task =
            spawn_resource_monitor(Arc::clone(&self.registry), self.context.hub.clone(), shutdown.clone());

        info!(
            tcp = %self.tcp.local_addr()?,
            http = %self.http.local_addr()?,
            row_feed = %self.row_feed.local_addr()?,
            peers = self.peers.len(),
            "Daemon running"
        );

        let result = tokio::try_join!(self.tcp.run(), self.http.run(), self.row_feed.run());

        // A failed endpoint takes the rest of the daemon down with it.
        shutdown.cancel();
        let _ = supervisor_task.await;
        let _ = monitor_task.await;

        result.map(|_| ()).map_err(DaemonError::from)
    }
}
