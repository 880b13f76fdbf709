use serde::{Deserialize, Serialize};

use crate::types::{ClientInfo, ClientRole};

/// Errors produced while encoding or decoding a frame.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The text was not valid JSON or did not match the frame shape.
    #[error("invalid frame: {0}")]
    Decode(#[source] serde_json::Error),

    /// Well-formed JSON with a `type` this protocol does not define.
    #[error("unknown frame type: {0}")]
    UnknownType(String),

    #[error("failed to encode frame: {0}")]
    Encode(#[source] serde_json::Error),
}

/// A single wire frame.
///
/// Required fields are modelled as `Option` so that a frame missing one
/// still decodes; receivers treat such frames as no-ops instead of errors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Frame {
    /// First frame a client sends: registers its identity.
    Announce {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        role: Option<ClientRole>,
    },
    /// Application payload. `messageId` is assigned by the broker.
    Message {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        text: Option<String>,
        #[serde(
            rename = "messageId",
            default,
            skip_serializing_if = "Option::is_none"
        )]
        message_id: Option<String>,
    },
    /// Acknowledges a delivered `message`.
    Ack {
        #[serde(
            rename = "messageId",
            default,
            skip_serializing_if = "Option::is_none"
        )]
        message_id: Option<String>,
    },
    /// Current roster, sent to dispatchers only.
    ClientList {
        #[serde(default)]
        clients: Vec<ClientInfo>,
    },
}

/// Only the discriminator, used to tell unknown types from malformed JSON.
#[derive(Deserialize)]
struct FrameTag {
    #[serde(rename = "type")]
    frame_type: Option<String>,
}

const KNOWN_TYPES: [&str; 4] = ["announce", "message", "ack", "client_list"];

impl Frame {
    pub fn announce(id: impl Into<String>, role: Option<ClientRole>) -> Self {
        Self::Announce {
            id: Some(id.into()),
            role,
        }
    }

    /// A client-originated message; the broker fills in the id.
    pub fn outbound(text: impl Into<String>) -> Self {
        Self::Message {
            text: Some(text.into()),
            message_id: None,
        }
    }

    /// A broker-forwarded message carrying its delivery id.
    pub fn message(text: impl Into<String>, message_id: impl Into<String>) -> Self {
        Self::Message {
            text: Some(text.into()),
            message_id: Some(message_id.into()),
        }
    }

    pub fn ack(message_id: impl Into<String>) -> Self {
        Self::Ack {
            message_id: Some(message_id.into()),
        }
    }

    pub fn client_list(clients: Vec<ClientInfo>) -> Self {
        Self::ClientList { clients }
    }

    /// The wire name of this frame's type.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Announce { .. } => "announce",
            Self::Message { .. } => "message",
            Self::Ack { .. } => "ack",
            Self::ClientList { .. } => "client_list",
        }
    }

    /// Parses a JSON text frame.
    pub fn decode(text: &str) -> Result<Self, FrameError> {
        match serde_json::from_str(text) {
            Ok(frame) => Ok(frame),
            Err(e) => match serde_json::from_str::<FrameTag>(text) {
                Ok(FrameTag {
                    frame_type: Some(t),
                }) if !KNOWN_TYPES.contains(&t.as_str()) => Err(FrameError::UnknownType(t)),
                _ => Err(FrameError::Decode(e)),
            },
        }
    }

    /// Serializes the frame to its JSON text form.
    pub fn encode(&self) -> Result<String, FrameError> {
        serde_json::to_string(self).map_err(FrameError::Encode)
    }
}
