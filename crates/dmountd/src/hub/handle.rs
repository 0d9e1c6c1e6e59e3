//! Client interface for the hub actor.
//!
//! # Panic-Free Guarantees
//!
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - Channel errors are mapped to `HubError::ChannelClosed`

use std::net::SocketAddr;

use tokio::sync::{broadcast, mpsc, oneshot};

use super::commands::{HubCommand, HubError, HubEvent};
use super::session::{ConnectionId, Session, SessionView};

/// Cheap-to-clone handle for talking to the hub actor.
#[derive(Clone)]
pub struct HubHandle {
    /// Command sender to the actor
    sender: mpsc::Sender<HubCommand>,

    /// Event broadcaster for subscribers
    event_sender: broadcast::Sender<HubEvent>,
}

impl HubHandle {
    /// Creates a new hub handle.
    pub fn new(sender: mpsc::Sender<HubCommand>, event_sender: broadcast::Sender<HubEvent>) -> Self {
        Self {
            sender,
            event_sender,
        }
    }

    /// Starts tracking `session`.
    ///
    /// Returns once the request is queued; the actor applies it in order with
    /// every other membership change.
    ///
    /// # Errors
    ///
    /// `HubError::ChannelClosed` if the actor has shut down.
    pub async fn add_client(&self, session: Session) -> Result<(), HubError> {
        self.sender
            .send(HubCommand::AddClient {
                session: Box::new(session),
            })
            .await
            .map_err(|_| HubError::ChannelClosed)
    }

    /// Stops tracking the session at `addr`, closing its connection.
    ///
    /// # Errors
    ///
    /// `HubError::ChannelClosed` if the actor has shut down.
    pub async fn remove_client(&self, addr: SocketAddr) -> Result<(), HubError> {
        self.sender
            .send(HubCommand::RemoveClient { addr })
            .await
            .map_err(|_| HubError::ChannelClosed)
    }

    /// Reports that connection `id` at `addr` has closed.
    ///
    /// Fire-and-forget; a stopped actor has nothing left to release.
    pub async fn release(&self, addr: SocketAddr, id: ConnectionId) {
        let _ = self.sender.send(HubCommand::Release { addr, id }).await;
    }

    /// Marks connection `id` at `addr` as authenticated.
    pub async fn authenticate(&self, addr: SocketAddr, id: ConnectionId) {
        let _ = self.sender.send(HubCommand::Authenticate { addr, id }).await;
    }

    /// Requests an immediate liveness sweep.
    pub async fn sweep(&self) {
        let _ = self.sender.send(HubCommand::Sweep).await;
    }

    /// Returns every tracked session, ordered by address.
    ///
    /// Returns an empty list if the actor has shut down.
    pub async fn sessions(&self) -> Vec<SessionView> {
        let (tx, rx) = oneshot::channel();

        if self
            .sender
            .send(HubCommand::Snapshot { respond_to: tx })
            .await
            .is_err()
        {
            return Vec::new();
        }

        rx.await.unwrap_or_default()
    }

    /// Returns the number of tracked sessions.
    ///
    /// # Errors
    ///
    /// `HubError::ChannelClosed` if the actor has shut down.
    pub async fn count(&self) -> Result<usize, HubError> {
        let (tx, rx) = oneshot::channel();

        self.sender
            .send(HubCommand::Count { respond_to: tx })
            .await
            .map_err(|_| HubError::ChannelClosed)?;

        rx.await.map_err(|_| HubError::ChannelClosed)
    }

    /// Subscribes to membership events.
    pub fn subscribe(&self) -> broadcast::Receiver<HubEvent> {
        self.event_sender.subscribe()
    }
}
