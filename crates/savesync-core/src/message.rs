//! Protocol messages.
//!
//! Every frame is a JSON object discriminated by its `action` field.
//! Snapshot payloads travel as opaque JSON values here; the codec turns them
//! into [`PlayerSnapshot`](crate::PlayerSnapshot)s.

use crate::CodecError;
use serde::{Deserialize, Serialize};

/// Messages sent from the game server to the persistence backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "lowercase")]
pub enum ClientMessage {
    /// Overwrite the save record with the payload (fire-and-forget).
    Save { payload: serde_json::Value },
    /// Ask for the save record of `steam_id`.
    Load {
        #[serde(rename = "steamId")]
        steam_id: String,
        #[serde(rename = "requestId")]
        request_id: String,
    },
}

impl ClientMessage {
    /// The `action` discriminator.
    pub fn action(&self) -> &'static str {
        match self {
            ClientMessage::Save { .. } => "save",
            ClientMessage::Load { .. } => "load",
        }
    }

    /// The correlation id, present only for request/response exchanges.
    pub fn request_id(&self) -> Option<&str> {
        match self {
            ClientMessage::Save { .. } => None,
            ClientMessage::Load { request_id, .. } => Some(request_id),
        }
    }
}

/// Messages sent from the persistence backend to the game server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "lowercase")]
pub enum ServerMessage {
    /// Answer to a load request.
    #[serde(rename = "loadresponse")]
    LoadResponse {
        #[serde(rename = "requestId")]
        request_id: String,
        #[serde(default)]
        found: bool,
        #[serde(default)]
        payload: Option<serde_json::Value>,
    },
    /// Error or rejection, optionally tied to a request.
    Error {
        #[serde(rename = "requestId", default)]
        request_id: Option<String>,
        #[serde(default)]
        error: String,
    },
    /// Any action this build does not know about.
    #[serde(other)]
    Unknown,
}

/// A serialized outbound message, ready for the socket.
///
/// Built once and never modified, so a retried envelope is byte-identical to
/// the original attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundEnvelope {
    action: &'static str,
    request_id: Option<String>,
    payload: String,
}

impl OutboundEnvelope {
    /// Serialize `message` into an envelope.
    pub fn encode(message: &ClientMessage) -> Result<Self, CodecError> {
        Ok(Self {
            action: message.action(),
            request_id: message.request_id().map(str::to_string),
            payload: serde_json::to_string(message)?,
        })
    }

    pub fn action(&self) -> &'static str {
        self.action
    }

    pub fn request_id(&self) -> Option<&str> {
        self.request_id.as_deref()
    }

    /// The JSON text written to the socket.
    pub fn payload(&self) -> &str {
        &self.payload
    }

    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }
}
