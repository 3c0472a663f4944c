//! Wire protocol: one JSON object per line.
//!
//! Requests are `{"type": <command>, ...params}`; responses are
//! `{"status": "success" | "error", ...payload}` with the error text under `message`.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// Failures that end a connection.
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Malformed message: {0}")]
    Malformed(String),

    #[error("Message has no string 'type' field")]
    MissingType,

    #[error("Line exceeds {limit} bytes without a delimiter")]
    LineTooLong { limit: usize },

    #[error("Failed to encode message: {0}")]
    Encode(String),

    #[error("Transport error: {0}")]
    Io(#[from] std::io::Error),
}

/// Failures answered with an error response; the connection stays open.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CommandError {
    #[error("Unknown command")]
    Unknown(String),

    #[error("Invalid parameters for {command}: {reason}")]
    InvalidParameters { command: String, reason: String },
}

/// Every command a device understands.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Command {
    /// Enable detection and actuation
    StartTracking,
    /// Disable detection; actuator to `none`
    StopTracking,
    /// Tracking and recording flags
    Status,
    /// Latest frame as a downsized base64 preview
    GetFrame,
    /// Finished recordings, newest first
    ListRecordings,
    /// One recording as base64
    DownloadRecording {
        /// Bare file name as returned by `list_recordings`
        filename: String,
    },
    /// Reboot the host after replying
    Reboot,
    /// Power off the host after replying
    PowerOff,
}

/// Wire names of all commands, in declaration order.
pub const COMMAND_NAMES: &[&str] = &[
    "start_tracking",
    "stop_tracking",
    "status",
    "get_frame",
    "list_recordings",
    "download_recording",
    "reboot",
    "power_off",
];

impl Command {
    /// Wire name of this command.
    pub fn name(&self) -> &'static str {
        match self {
            Command::StartTracking => "start_tracking",
            Command::StopTracking => "stop_tracking",
            Command::Status => "status",
            Command::GetFrame => "get_frame",
            Command::ListRecordings => "list_recordings",
            Command::DownloadRecording { .. } => "download_recording",
            Command::Reboot => "reboot",
            Command::PowerOff => "power_off",
        }
    }

    /// Decode one request line.
    ///
    /// The outer error is a [`ProtocolError`] (drop the connection); the inner one is a
    /// [`CommandError`] (answer with an error response).
    pub fn decode(line: &[u8]) -> Result<Result<Command, CommandError>, ProtocolError> {
        let value: Value =
            serde_json::from_slice(line).map_err(|e| ProtocolError::Malformed(e.to_string()))?;
        let Value::Object(object) = value else {
            return Err(ProtocolError::Malformed("expected a JSON object".to_string()));
        };
        let name = match object.get("type") {
            Some(Value::String(name)) => name.clone(),
            _ => return Err(ProtocolError::MissingType),
        };

        if !COMMAND_NAMES.contains(&name.as_str()) {
            return Ok(Err(CommandError::Unknown(name)));
        }

        Ok(
            serde_json::from_value(Value::Object(object)).map_err(|e| {
                CommandError::InvalidParameters {
                    command: name,
                    reason: e.to_string(),
                }
            }),
        )
    }
}

/// Response status tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseStatus {
    /// `"success"`
    Success,
    /// `"error"`, with a `message`
    Error,
}

/// A status tag plus a free-form payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    /// Outcome tag
    pub status: ResponseStatus,
    #[serde(flatten)]
    /// Command-specific fields, flattened beside `status`
    pub payload: Map<String, Value>,
}

impl Response {
    /// Empty success response.
    pub fn success() -> Self {
        Self {
            status: ResponseStatus::Success,
            payload: Map::new(),
        }
    }

    /// Error response carrying `message`.
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: ResponseStatus::Error,
            payload: Map::new(),
        }
        .with("message", message.into())
    }

    /// Add a payload field.
    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.payload.insert(key.to_string(), value.into());
        self
    }

    /// Whether the status is `success`.
    pub fn is_success(&self) -> bool {
        self.status == ResponseStatus::Success
    }

    /// Error text of an error response.
    pub fn message(&self) -> Option<&str> {
        self.get_str("message")
    }

    /// Raw payload field.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.payload.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.payload.get(key).and_then(Value::as_str)
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.payload.get(key).and_then(Value::as_bool)
    }

    pub fn get_u64(&self, key: &str) -> Option<u64> {
        self.payload.get(key).and_then(Value::as_u64)
    }

    /// Decode one response line.
    pub fn decode(line: &[u8]) -> Result<Self, ProtocolError> {
        serde_json::from_slice(line).map_err(|e| ProtocolError::Malformed(e.to_string()))
    }
}

impl From<CommandError> for Response {
    fn from(err: CommandError) -> Self {
        Response::error(err.to_string())
    }
}

/// Serialize a message followed by the line delimiter.
pub fn encode_line<T: Serialize>(message: &T) -> Result<Vec<u8>, ProtocolError> {
    let mut line = serde_json::to_vec(message).map_err(|e| ProtocolError::Encode(e.to_string()))?;
    line.push(b'\n');
    Ok(line)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decodes_known_commands() {
        let cmd = Command::decode(br#"{"type":"start_tracking"}"#).unwrap().unwrap();
        assert_eq!(cmd, Command::StartTracking);

        let cmd = Command::decode(br#"{"type":"download_recording","filename":"a.mp4"}"#)
            .unwrap()
            .unwrap();
        assert_eq!(
            cmd,
            Command::DownloadRecording {
                filename: "a.mp4".into()
            }
        );
    }

    #[test]
    fn unknown_type_is_command_error() {
        let err = Command::decode(br#"{"type":"self_destruct"}"#).unwrap().unwrap_err();
        assert_eq!(err, CommandError::Unknown("self_destruct".into()));
        assert_eq!(Response::from(err).message(), Some("Unknown command"));
    }

    #[test]
    fn missing_parameter_is_command_error() {
        let err = Command::decode(br#"{"type":"download_recording"}"#)
            .unwrap()
            .unwrap_err();
        assert!(matches!(err, CommandError::InvalidParameters { ref command, .. } if command == "download_recording"));
    }

    #[test]
    fn malformed_input_is_protocol_error() {
        assert!(matches!(Command::decode(b"{not json"), Err(ProtocolError::Malformed(_))));
        assert!(matches!(Command::decode(b"[1,2]"), Err(ProtocolError::Malformed(_))));
        assert!(matches!(Command::decode(br#"{"kind":"status"}"#), Err(ProtocolError::MissingType)));
        assert!(matches!(Command::decode(br#"{"type":7}"#), Err(ProtocolError::MissingType)));
    }

    #[test]
    fn command_names_match_serde_tags() {
        let all = [
            Command::StartTracking,
            Command::StopTracking,
            Command::Status,
            Command::GetFrame,
            Command::ListRecordings,
            Command::DownloadRecording { filename: "x".into() },
            Command::Reboot,
            Command::PowerOff,
        ];
        assert_eq!(all.len(), COMMAND_NAMES.len());
        for cmd in all {
            let value = serde_json::to_value(&cmd).unwrap();
            assert_eq!(value["type"], json!(cmd.name()));
            assert!(COMMAND_NAMES.contains(&cmd.name()));
        }
    }

    #[test]
    fn response_wire_shape() {
        let line = encode_line(&Response::error("No frame")).unwrap();
        assert_eq!(line.last(), Some(&b'\n'));
        let value: Value = serde_json::from_slice(&line).unwrap();
        assert_eq!(value, json!({"status": "error", "message": "No frame"}));

        let resp = Response::decode(br#"{"status":"success","tracking_status":true}"#).unwrap();
        assert!(resp.is_success());
        assert_eq!(resp.get_bool("tracking_status"), Some(true));
    }
}
