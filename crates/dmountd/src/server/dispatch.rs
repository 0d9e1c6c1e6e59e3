//! Routes decoded commands to the registry and host introspection.
//!
//! Shared by every transport, so a command gets the same answer whether it
//! arrived over TCP, WebSocket or `POST /command`.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::time::timeout;
use tracing::{debug, warn};

use dmount_protocol::{Command, CommandEnvelope, Response};

use crate::host::HostIntrospector;
use crate::mounts::MountRegistry;

/// Executes commands against the shared registry.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    registry: Arc<MountRegistry>,
    host: HostIntrospector,
    timeout: Duration,
}

impl Dispatcher {
    /// Creates a dispatcher; every command must finish within `timeout`.
    pub fn new(registry: Arc<MountRegistry>, host: HostIntrospector, timeout: Duration) -> Self {
        Self {
            registry,
            host,
            timeout,
        }
    }

    /// Returns the registry commands run against.
    pub fn registry(&self) -> &Arc<MountRegistry> {
        &self.registry
    }

    /// Decodes and executes one text frame.
    ///
    /// Undecodable frames are answered with an `error` response; the caller
    /// keeps the connection open.
    pub async fn dispatch_frame(&self, frame: &str) -> Response {
        match CommandEnvelope::decode(frame) {
            Ok(request) => self.dispatch(&request).await,
            Err(e) => {
                warn!(error = %e, "Dropping undecodable frame");
                Response::undecodable(&e)
            }
        }
    }

    /// Executes one decoded envelope.
    pub async fn dispatch(&self, request: &CommandEnvelope) -> Response {
        let command = match request.command() {
            Ok(command) => command,
            Err(e) => {
                debug!(action = %request.action, error = %e, "Rejecting command");
                return Response::error(request, e.to_string());
            }
        };

        let action = command.action();
        match timeout(self.timeout, self.execute(request, command)).await {
            Ok(response) => response,
            Err(_) => {
                warn!(
                    action = %action,
                    timeout_ms = self.timeout.as_millis() as u64,
                    "Command timed out"
                );
                Response::error(
                    request,
                    format!("timeout: {action} did not complete within {}ms", self.timeout.as_millis()),
                )
            }
        }
    }

    async fn execute(&self, request: &CommandEnvelope, command: Command) -> Response {
        match command {
            Command::Mount { path } => {
                let outcome = self.registry.mount(&path).await;
                Response::mount(request, &outcome)
            }
            Command::Unmount { path } => {
                self.registry.unmount(&path).await;
                Response::ok(request, Value::String(path))
            }
            Command::Status => Response::status(request, &self.registry.status().await),
            Command::Sysinfo | Command::Ping => match self.host.describe().await {
                Ok(info) => match serde_json::to_value(info) {
                    Ok(value) => Response::ok(request, value),
                    Err(e) => Response::error(request, e.to_string()),
                },
                Err(e) => {
                    warn!(error = %e, "Host introspection failed");
                    Response::error(request, e.to_string())
                }
            },
            Command::RowLookup { path, index } => {
                match self.registry.get_row(&path, index).await {
                    Ok(row) => Response::row(request, &row),
                    Err(e) => Response::error(request, e.to_string()),
                }
            }
        }
    }
}
