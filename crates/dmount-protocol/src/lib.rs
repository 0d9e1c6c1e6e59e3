//! dmount Protocol - Command and response envelopes
//!
//! One canonical JSON schema is shared by every transport: HTTP bodies,
//! WebSocket text frames and newline-delimited TCP frames all carry a
//! [`CommandEnvelope`] in and a [`Response`] out.

pub mod command;
pub mod error;
pub mod response;

pub use command::{Action, Command, CommandEnvelope};
pub use error::ProtocolError;
pub use response::{HostInfo, Response, ERROR_ACTION, MOUNT_SUCCESS};
