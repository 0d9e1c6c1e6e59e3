//! Host introspection and daemon resource logging.
//!
//! # Panic-Free Guarantees
//!
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - Probe failures are returned as `HostError` and reported to the client

use std::process;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use sysinfo::{Pid, System};
use thiserror::Error;
use tokio::time::interval;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use dmount_protocol::HostInfo;

use crate::hub::HubHandle;
use crate::mounts::MountRegistry;

/// Role reported in `computerType`.
pub const COMPUTER_TYPE: &str = "data";

/// Memory usage warning threshold in MB.
pub const HIGH_MEMORY_THRESHOLD_MB: u64 = 512;

/// How often resource usage is logged.
pub const METRICS_INTERVAL: Duration = Duration::from_secs(60);

const BYTES_PER_GB: f64 = 1024.0 * 1024.0 * 1024.0;

/// Errors from host introspection.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HostError {
    #[error("host probe failed: {0}")]
    Probe(String),

    #[error("host memory information unavailable")]
    MemoryUnavailable,
}

/// Answers `sysinfo` and `ping` requests.
#[derive(Debug, Clone)]
pub struct HostIntrospector {
    system: Arc<Mutex<System>>,
    cache_path: String,
}

impl HostIntrospector {
    /// Creates an introspector reporting `cache_path` as the served root.
    pub fn new(cache_path: impl Into<String>) -> Self {
        Self {
            system: Arc::new(Mutex::new(System::new())),
            cache_path: cache_path.into(),
        }
    }

    /// Describes the host.
    ///
    /// Refreshes CPU and memory information on the blocking pool.
    pub async fn describe(&self) -> Result<HostInfo, HostError> {
        let system = Arc::clone(&self.system);
        let cache_path = self.cache_path.clone();

        tokio::task::spawn_blocking(move || {
            let mut system = system
                .lock()
                .map_err(|_| HostError::Probe("system state poisoned".to_string()))?;
            system.refresh_memory();
            system.refresh_cpu_all();

            let brand = system
                .cpus()
                .first()
                .map(|cpu| cpu.brand().trim().to_string())
                .unwrap_or_default();

            host_info(system.cpus().len(), &brand, system.total_memory(), cache_path)
        })
        .await
        .map_err(|e| HostError::Probe(e.to_string()))?
    }
}

/// Builds the wire description from raw probe values.
fn host_info(
    cpu_count: usize,
    brand: &str,
    total_memory_bytes: u64,
    cache_path: String,
) -> Result<HostInfo, HostError> {
    if total_memory_bytes == 0 {
        return Err(HostError::MemoryUnavailable);
    }

    let num_cpu = if cpu_count == 0 {
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
    } else {
        cpu_count
    };

    Ok(HostInfo {
        os: std::env::consts::OS.to_string(),
        arch: std::env::consts::ARCH.to_string(),
        num_cpu,
        cpu: format!("{num_cpu} cores {brand}").trim_end().to_string(),
        ram: format!("{:.2}GB", total_memory_bytes as f64 / BYTES_PER_GB),
        computer_type: COMPUTER_TYPE.to_string(),
        cache_path,
    })
}

// ============================================================================
// Resource logging
// ============================================================================

/// Samples the daemon's own memory usage.
pub struct ProcessMonitor {
    system: System,
    pid: Pid,
}

impl ProcessMonitor {
    /// Creates a monitor for the current process.
    pub fn new() -> Self {
        Self {
            system: System::new(),
            pid: Pid::from_u32(process::id()),
        }
    }

    /// Returns the current resident memory in bytes (0 if unknown).
    pub fn memory_bytes(&mut self) -> u64 {
        self.system.refresh_all();
        self.system.process(self.pid).map(|p| p.memory()).unwrap_or(0)
    }
}

impl Default for ProcessMonitor {
    fn default() -> Self {
        Self::new()
    }
}

/// Spawns the task that logs memory, dataset and session counts every
/// `METRICS_INTERVAL`.
pub fn spawn_resource_monitor(
    registry: Arc<MountRegistry>,
    hub: HubHandle,
    cancel_token: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut monitor = ProcessMonitor::new();
        let mut tick = interval(METRICS_INTERVAL);

        info!(
            interval_secs = METRICS_INTERVAL.as_secs(),
            "Resource monitor started"
        );

        loop {
            tokio::select! {
                biased;

                _ = cancel_token.cancelled() => {
                    info!("Resource monitor shutting down");
                    break;
                }

                _ = tick.tick() => {
                    let memory_mb = monitor.memory_bytes() / 1024 / 1024;
                    let datasets = registry.len().await;
                    let sessions = hub.count().await.unwrap_or(0);

                    if memory_mb > HIGH_MEMORY_THRESHOLD_MB {
                        warn!(
                            memory_mb,
                            threshold_mb = HIGH_MEMORY_THRESHOLD_MB,
                            datasets,
                            sessions,
                            "HIGH MEMORY: Daemon memory usage above threshold"
                        );
                    } else {
                        info!(memory_mb, datasets, sessions, "Daemon resource usage");
                    }
                }
            }
        }

        debug!("Resource monitor task completed");
    })
}
