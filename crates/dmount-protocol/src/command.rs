//! Command envelope and typed commands.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::ProtocolError;

/// Verbs understood by the dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    /// Load a CSV file into the registry
    Mount,
    /// Drop a dataset from the registry
    Unmount,
    /// List mounted datasets
    Status,
    /// Describe the host
    Sysinfo,
    /// Liveness probe, answered with host info
    Ping,
    /// Fetch one row of a mounted dataset
    RowLookup,
}

impl Action {
    /// All verbs, in wire order.
    pub const ALL: [Action; 6] = [
        Self::Mount,
        Self::Unmount,
        Self::Status,
        Self::Sysinfo,
        Self::Ping,
        Self::RowLookup,
    ];

    /// Returns the wire name of the verb.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Mount => "mount",
            Self::Unmount => "unmount",
            Self::Status => "status",
            Self::Sysinfo => "sysinfo",
            Self::Ping => "ping",
            Self::RowLookup => "row-lookup",
        }
    }

    /// Looks up a verb by wire name.
    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|a| a.as_str() == name)
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Raw command envelope as received from any transport.
///
/// Kept loose on purpose so that an unknown verb or a missing field can still
/// be answered with the client's correlation token. Use [`Self::command`] to
/// obtain a typed [`Command`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CommandEnvelope {
    /// Verb discriminator (`type` is accepted as an alias)
    #[serde(alias = "type")]
    pub action: String,

    /// Dataset path, for verbs that take one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,

    /// Row index, for row lookups
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index: Option<i64>,

    /// Opaque correlation token echoed back in the response
    #[serde(rename = "clientID", default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<serde_json::Value>,
}

impl CommandEnvelope {
    /// Creates an envelope for `action` with no arguments.
    pub fn new(action: Action) -> Self {
        Self {
            action: action.as_str().to_string(),
            ..Self::default()
        }
    }

    /// Sets the dataset path.
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    /// Sets the row index.
    pub fn with_index(mut self, index: i64) -> Self {
        self.index = Some(index);
        self
    }

    /// Sets the correlation token.
    pub fn with_client_id(mut self, client_id: impl Into<serde_json::Value>) -> Self {
        self.client_id = Some(client_id.into());
        self
    }

    /// Decodes an envelope from one text frame.
    ///
    /// # Errors
    ///
    /// `ProtocolError::Malformed` if the frame is not a JSON object with an
    /// `action` (or `type`) field.
    pub fn decode(frame: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(frame).map_err(ProtocolError::malformed)
    }

    /// Converts the envelope into a typed command.
    ///
    /// # Errors
    ///
    /// - `ProtocolError::UnknownCommand` if the verb is not recognised
    /// - `ProtocolError::MissingField` if the verb requires `path`/`index`
    pub fn command(&self) -> Result<Command, ProtocolError> {
        let action = Action::parse(&self.action)
            .ok_or_else(|| ProtocolError::UnknownCommand(self.action.clone()))?;

        let path = || {
            self.path.clone().ok_or(ProtocolError::MissingField {
                action: action.as_str(),
                field: "path",
            })
        };

        let command = match action {
            Action::Mount => Command::Mount { path: path()? },
            Action::Unmount => Command::Unmount { path: path()? },
            Action::Status => Command::Status,
            Action::Sysinfo => Command::Sysinfo,
            Action::Ping => Command::Ping,
            Action::RowLookup => Command::RowLookup {
                path: path()?,
                index: self.index.ok_or(ProtocolError::MissingField {
                    action: action.as_str(),
                    field: "index",
                })?,
            },
        };

        Ok(command)
    }
}

/// A decoded, validated command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Mount { path: String },
    Unmount { path: String },
    Status,
    Sysinfo,
    Ping,
    RowLookup { path: String, index: i64 },
}

impl Command {
    /// Returns the verb of this command.
    pub fn action(&self) -> Action {
        match self {
            Self::Mount { .. } => Action::Mount,
            Self::Unmount { .. } => Action::Unmount,
            Self::Status => Action::Status,
            Self::Sysinfo => Action::Sysinfo,
            Self::Ping => Action::Ping,
            Self::RowLookup { .. } => Action::RowLookup,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_action_names() {
        for action in Action::ALL {
            assert_eq!(Action::parse(action.as_str()), Some(action));
        }
        assert_eq!(Action::RowLookup.to_string(), "row-lookup");
        assert_eq!(Action::parse("mountData"), None);
    }

    #[test]
    fn test_decode_with_type_alias() {
        let env = CommandEnvelope::decode(r#"{"type":"status","clientID":7}"#).unwrap();
        assert_eq!(env.action, "status");
        assert_eq!(env.client_id, Some(json!(7)));
        assert_eq!(env.command().unwrap(), Command::Status);
    }

    #[test]
    fn test_decode_row_lookup() {
        let env =
            CommandEnvelope::decode(r#"{"action":"row-lookup","path":"a.csv","index":1}"#).unwrap();
        assert_eq!(
            env.command().unwrap(),
            Command::RowLookup {
                path: "a.csv".to_string(),
                index: 1
            }
        );
    }

    #[test]
    fn test_decode_malformed() {
        assert!(matches!(
            CommandEnvelope::decode("not json"),
            Err(ProtocolError::Malformed(_))
        ));
        assert!(matches!(
            CommandEnvelope::decode(r#"{"path":"a.csv"}"#),
            Err(ProtocolError::Malformed(_))
        ));
        assert!(matches!(
            CommandEnvelope::decode(r#"{"action":"row-lookup","index":"two"}"#),
            Err(ProtocolError::Malformed(_))
        ));
    }

    #[test]
    fn test_unknown_verb_keeps_envelope() {
        let env = CommandEnvelope::decode(r#"{"action":"explode","clientID":"c1"}"#).unwrap();
        assert_eq!(
            env.command(),
            Err(ProtocolError::UnknownCommand("explode".to_string()))
        );
        assert_eq!(env.client_id, Some(json!("c1")));
    }

    #[test]
    fn test_missing_fields() {
        let env = CommandEnvelope::new(Action::Mount);
        assert_eq!(
            env.command(),
            Err(ProtocolError::MissingField {
                action: "mount",
                field: "path"
            })
        );

        let env = CommandEnvelope::new(Action::RowLookup).with_path("a.csv");
        assert_eq!(
            env.command(),
            Err(ProtocolError::MissingField {
                action: "row-lookup",
                field: "index"
            })
        );
    }

    #[test]
    fn test_builder_serialization_skips_empty_fields() {
        let env = CommandEnvelope::new(Action::Unmount)
            .with_path("a.csv")
            .with_client_id("abc");
        let json = serde_json::to_value(&env).unwrap();
        assert_eq!(
            json,
            json!({"action": "unmount", "path": "a.csv", "clientID": "abc"})
        );
    }

    #[test]
    fn test_command_action() {
        let cmd = Command::RowLookup {
            path: "a.csv".to_string(),
            index: 0,
        };
        assert_eq!(cmd.action(), Action::RowLookup);
        assert_eq!(Command::Ping.action(), Action::Ping);
    }
}
