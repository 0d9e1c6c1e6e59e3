//! Integration tests for the session hub and its liveness sweep.
//!
//! Most tests run on a paused clock so timeouts are exact.
//!
//! Tests CAN use `.unwrap()` and `.expect()`.

use std::net::SocketAddr;
use std::time::Duration;

use dmountd::hub::{spawn_hub, HubEvent, HubHandle, HubSettings, RemovalReason, Session};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

// ============================================================================
// Constants
// ============================================================================

const SWEEP_INTERVAL: Duration = Duration::from_secs(1);
const LIVENESS_TIMEOUT: Duration = Duration::from_secs(5);

// ============================================================================
// Test Helpers
// ============================================================================

fn addr(port: u16) -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], port))
}

fn start_hub(shutdown: &CancellationToken) -> HubHandle {
    let settings = HubSettings {
        sweep_interval: SWEEP_INTERVAL,
        liveness_timeout: LIVENESS_TIMEOUT,
        ..HubSettings::default()
    };
    spawn_hub(settings, None, shutdown.clone())
}

// ============================================================================
// Liveness
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_silent_session_evicted_within_one_interval() {
    let shutdown = CancellationToken::new();
    let hub = start_hub(&shutdown);

    let session = Session::inbound(addr(4000), &shutdown);
    let evict = session.evict.clone();
    hub.add_client(session).await.unwrap();

    sleep(Duration::from_millis(5_500)).await;
    assert_eq!(hub.count().await.unwrap(), 1, "evicted before the timeout");
    assert!(!evict.is_cancelled());

    sleep(Duration::from_secs(1)).await;
    assert_eq!(hub.count().await.unwrap(), 0, "not evicted after one more sweep");
    assert!(evict.is_cancelled());

    shutdown.cancel();
}

#[tokio::test(start_paused = true)]
async fn test_active_session_survives() {
    let shutdown = CancellationToken::new();
    let hub = start_hub(&shutdown);

    let session = Session::inbound(addr(4001), &shutdown);
    let liveness = session.liveness.clone();
    hub.add_client(session).await.unwrap();

    for _ in 0..10 {
        sleep(Duration::from_secs(2)).await;
        liveness.touch();
    }

    assert_eq!(hub.count().await.unwrap(), 1);
    shutdown.cancel();
}

#[tokio::test(start_paused = true)]
async fn test_eviction_events() {
    let shutdown = CancellationToken::new();
    let hub = start_hub(&shutdown);
    let mut events = hub.subscribe();

    let session = Session::inbound(addr(4002), &shutdown);
    let id = session.id;
    hub.add_client(session).await.unwrap();
    hub.authenticate(addr(4002), id).await;

    match events.recv().await.unwrap() {
        HubEvent::Added { addr: a, id: got, .. } => {
            assert_eq!(a, addr(4002));
            assert_eq!(got, id);
        }
        other => panic!("expected Added, got {other:?}"),
    }
    assert!(matches!(
        events.recv().await.unwrap(),
        HubEvent::Authenticated { .. }
    ));

    sleep(LIVENESS_TIMEOUT + SWEEP_INTERVAL * 2).await;

    match events.recv().await.unwrap() {
        HubEvent::Removed { id: got, reason, .. } => {
            assert_eq!(got, id);
            assert!(matches!(reason, RemovalReason::LivenessTimeout { .. }));
        }
        other => panic!("expected Removed, got {other:?}"),
    }

    shutdown.cancel();
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_cancels_sessions() {
    let shutdown = CancellationToken::new();
    let hub = start_hub(&shutdown);

    let session = Session::inbound(addr(4003), &shutdown);
    let evict = session.evict.clone();
    hub.add_client(session).await.unwrap();
    assert_eq!(hub.count().await.unwrap(), 1);

    shutdown.cancel();
    sleep(Duration::from_millis(10)).await;

    assert!(evict.is_cancelled());
    assert!(hub.count().await.is_err());
}

// ============================================================================
// Concurrency
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_add_remove_with_sweeps() {
    let shutdown = CancellationToken::new();
    let settings = HubSettings {
        sweep_interval: Duration::from_millis(1),
        liveness_timeout: Duration::from_millis(20),
        ..HubSettings::default()
    };
    let hub = spawn_hub(settings, None, shutdown.clone());

    let mut tasks = Vec::new();
    for task in 0..8u16 {
        let hub = hub.clone();
        let shutdown = shutdown.clone();
        tasks.push(tokio::spawn(async move {
            for i in 0..50u16 {
                let address = addr(10_000 + task * 100 + i);
                hub.add_client(Session::inbound(address, &shutdown)).await.unwrap();
                if i % 3 == 0 {
                    tokio::task::yield_now().await;
                }
                hub.remove_client(address).await.unwrap();
            }
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    assert_eq!(hub.count().await.unwrap(), 0);
    shutdown.cancel();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_snapshots() {
    let shutdown = CancellationToken::new();
    let hub = start_hub(&shutdown);

    for port in 0..20 {
        hub.add_client(Session::inbound(addr(20_000 + port), &shutdown))
            .await
            .unwrap();
    }

    let mut readers = Vec::new();
    for _ in 0..10 {
        let hub = hub.clone();
        readers.push(tokio::spawn(async move { hub.sessions().await }));
    }
    for reader in readers {
        let sessions = reader.await.unwrap();
        assert_eq!(sessions.len(), 20);
        assert!(sessions.windows(2).all(|w| w[0].addr < w[1].addr));
    }

    shutdown.cancel();
}
