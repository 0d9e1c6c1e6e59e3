//! Session hub using the actor pattern.
//!
//! The hub tracks every live connection, keyed by peer address. Connection
//! handlers register and release themselves through a `HubHandle`; a monitor
//! task asks the actor to sweep for idle sessions on a fixed interval.
//!
//! ```text
//! ┌───────────────────┐  HubCommand   ┌──────────────┐  peer   ┌─────────────────────┐
//! │ ConnectionHandler │──────────────▶│   HubActor   │────────▶│ ReconnectSupervisor │
//! └───────────────────┘  (mpsc)       └──────────────┘         └─────────────────────┘
//!          ▲                                 ▲  │ HubEvent                │
//!          │ evict token                     │  ▼ (broadcast)             │ dial
//!          └─────────────────────────────────┘ Sweep every interval       ▼
//!                                                                     outbound peer
//! ```
//!
//! # Panic-Free Guarantees
//!
//! - No `.unwrap()` or `.expect()` in production code
//! - Channel operations handle closure gracefully

use std::time::Duration;

use tokio::sync::{broadcast, mpsc};
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::debug;

mod actor;
mod commands;
mod handle;
pub mod reconnect;
mod session;

pub use actor::{HubActor, MAX_SESSIONS};
pub use commands::{HubCommand, HubError, HubEvent, RemovalReason};
pub use handle::HubHandle;
pub use reconnect::{ReconnectHandle, ReconnectQueue, ReconnectSupervisor};
pub use session::{ConnectionId, Liveness, Session, SessionOrigin, SessionView};

/// Channel buffer sizes
const COMMAND_BUFFER: usize = 100;
const EVENT_BUFFER: usize = 100;

/// Default interval between liveness sweeps.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(1);

/// Default idle time after which a session is evicted.
pub const DEFAULT_LIVENESS_TIMEOUT: Duration = Duration::from_secs(5);

/// Hub tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HubSettings {
    /// How often the liveness monitor runs
    pub sweep_interval: Duration,

    /// Idle time after which a session is evicted
    pub liveness_timeout: Duration,

    /// Maximum number of tracked sessions
    pub max_sessions: usize,
}

impl Default for HubSettings {
    fn default() -> Self {
        Self {
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
            liveness_timeout: DEFAULT_LIVENESS_TIMEOUT,
            max_sessions: MAX_SESSIONS,
        }
    }
}

/// Spawns the hub actor and its liveness monitor.
///
/// Both tasks stop when `shutdown` is cancelled. Outbound sessions that are
/// evicted or drop are handed to `reconnect` when one is given.
pub fn spawn_hub(
    settings: HubSettings,
    reconnect: Option<ReconnectHandle>,
    shutdown: CancellationToken,
) -> HubHandle {
    let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_BUFFER);
    let (event_tx, _) = broadcast::channel(EVENT_BUFFER);

    let actor = HubActor::new(
        cmd_rx,
        event_tx.clone(),
        settings.liveness_timeout,
        settings.max_sessions,
        reconnect,
    );
    tokio::spawn(actor.run(shutdown.clone()));

    let handle = HubHandle::new(cmd_tx.clone(), event_tx);

    spawn_liveness_monitor(cmd_tx, settings.sweep_interval, shutdown);

    handle
}

/// Spawns the task that triggers a sweep every `period`.
fn spawn_liveness_monitor(
    sender: mpsc::Sender<HubCommand>,
    period: Duration,
    shutdown: CancellationToken,
) {
    tokio::spawn(async move {
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }

            if sender.send(HubCommand::Sweep).await.is_err() {
                debug!("Liveness monitor stopping: hub channel closed");
                break;
            }
        }
    });
}
