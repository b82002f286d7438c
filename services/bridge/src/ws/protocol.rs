//! Defines the WebSocket message protocol between the browser client and the relay.

use serde::{Deserialize, Serialize};

/// Transport encoding tag attached to outbound audio messages.
pub const AUDIO_ENCODING: &str = "mp3/base64";

/// Messages sent from the client (browser) to the relay.
#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "type")]
pub enum ClientMessage {
    /// Sets the system instruction for the upstream session.
    #[serde(rename = "setup", rename_all = "camelCase")]
    Setup { system_instruction: String },
    /// A text utterance for the model to respond to.
    #[serde(rename = "text")]
    Text { text: String },
    /// Asks the relay to end the session cleanly.
    #[serde(rename = "end")]
    End,
}

/// Messages sent from the relay to the client (browser).
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Session lifecycle notification.
    Status { value: StatusValue },
    /// A text chunk from the model.
    Text { text: String },
    /// An audio chunk from the model, base64-encoded.
    Audio { encoding: String, data: String },
    /// Reports an error to the client.
    Error { message: String },
}

/// Lifecycle states reported to the client.
#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StatusValue {
    Open,
    Closed,
}

impl ServerMessage {
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }

    pub fn audio(data: String) -> Self {
        Self::Audio {
            encoding: AUDIO_ENCODING.to_string(),
            data,
        }
    }
}
