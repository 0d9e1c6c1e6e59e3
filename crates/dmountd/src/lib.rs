//! dmount daemon - mount registry, session hub and network endpoints
//!
//! - `mounts` - registry of CSV datasets loaded from the sandbox
//! - `hub` - session hub actor, liveness sweep and reconnect supervisor
//! - `server` - TCP, HTTP/WebSocket and row feed endpoints
//! - `host` - host introspection and resource logging
//! - `config` - daemon configuration
//! - `daemon` - wiring of all of the above
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                         dmountd                              │
//! ├──────────────────────────────────────────────────────────────┤
//! │                                                              │
//! │  ┌──────────────────┐   register/   ┌─────────────────────┐  │
//! │  │ ConnectionHandler│──release─────▶│      HubActor       │  │
//! │  │  (per client)    │◀──evict───────│ (session map owner) │  │
//! │  └────────┬─────────┘               └──────────┬──────────┘  │
//! │           │ frames                             │ outbound    │
//! │           ▼                                    ▼ peers       │
//! │  ┌──────────────────┐               ┌─────────────────────┐  │
//! │  │    Dispatcher    │               │ ReconnectSupervisor │  │
//! │  └────────┬─────────┘               └─────────────────────┘  │
//! │           ▼                                                  │
//! │  ┌──────────────────┐                                        │
//! │  │  MountRegistry   │◀── HTTP / WebSocket / row feed         │
//! │  └──────────────────┘                                        │
//! │                                                              │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Panic-Free Guarantees
//!
//! All production code in this crate follows the panic-free policy:
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - All fallible operations return `Result` or `Option`
//! - Channel operations handle closure gracefully

pub mod config;
pub mod daemon;
pub mod host;
pub mod hub;
pub mod mounts;
pub mod server;

pub use config::{ConfigError, DaemonConfig, SharedSecret};
pub use daemon::{Daemon, DaemonError};
pub use mounts::{LookupError, MountRegistry};
