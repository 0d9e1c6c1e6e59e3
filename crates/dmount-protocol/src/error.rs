//! Protocol error types.

use thiserror::Error;

/// Errors raised while decoding a command envelope.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// The frame is not a JSON command envelope.
    #[error("malformed command: {0}")]
    Malformed(String),

    /// The discriminator names no known verb.
    #[error("unknown command: {0}")]
    UnknownCommand(String),

    /// A field required by the verb is absent.
    #[error("missing field '{field}' for {action}")]
    MissingField {
        action: &'static str,
        field: &'static str,
    },
}

impl ProtocolError {
    /// Creates a malformed-frame error from any error type.
    pub fn malformed<E: std::fmt::Display>(err: E) -> Self {
        Self::Malformed(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protocol_error_display() {
        assert_eq!(
            ProtocolError::UnknownCommand("explode".to_string()).to_string(),
            "unknown command: explode"
        );
        assert_eq!(
            ProtocolError::MissingField {
                action: "mount",
                field: "path"
            }
            .to_string(),
            "missing field 'path' for mount"
        );
        assert!(ProtocolError::malformed("EOF while parsing")
            .to_string()
            .starts_with("malformed command"));
    }
}
