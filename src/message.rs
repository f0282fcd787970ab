//! Wire protocol definitions
//!
//! Every frame is a JSON object carried in one WebSocket text message.
//! The variant is selected by the `kind` field using Serde's internally
//! tagged enum; the common fields live on `TransportEntity`.

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::types::timestamp_millis;

/// One frame on the wire
///
/// `session_key` is omitted from the JSON when absent, so an empty key
/// (`""`) stays distinguishable from a missing one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransportEntity {
    /// Milliseconds since the Unix epoch at creation
    pub timestamp: u64,
    /// Session key presented (client → server) or issued (server → client)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_key: Option<String>,
    /// Variant-specific fields
    #[serde(flatten)]
    pub payload: Payload,
}

/// Frame variants
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Payload {
    /// Handshake request and reply
    Auth { username: String },
    /// Chat text, relayed to every authenticated connection
    ChatMessage {
        sender_username: String,
        body: String,
    },
}

impl TransportEntity {
    /// Build an `Auth` frame without a session key
    pub fn auth(username: impl Into<String>) -> Self {
        Self {
            timestamp: timestamp_millis(),
            session_key: None,
            payload: Payload::Auth {
                username: username.into(),
            },
        }
    }

    /// Build a `ChatMessage` frame without a session key
    pub fn chat(sender_username: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            timestamp: timestamp_millis(),
            session_key: None,
            payload: Payload::ChatMessage {
                sender_username: sender_username.into(),
                body: body.into(),
            },
        }
    }

    /// Attach a session key
    pub fn with_session_key(mut self, key: impl Into<String>) -> Self {
        self.session_key = Some(key.into());
        self
    }

    pub fn is_auth(&self) -> bool {
        matches!(self.payload, Payload::Auth { .. })
    }

    pub fn is_chat(&self) -> bool {
        matches!(self.payload, Payload::ChatMessage { .. })
    }

    /// Short name of the variant, for logging
    pub fn kind(&self) -> &'static str {
        match self.payload {
            Payload::Auth { .. } => "auth",
            Payload::ChatMessage { .. } => "chat_message",
        }
    }

    /// Serialize to the JSON text carried in one WebSocket message
    pub fn encode(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parse one WebSocket text message
    pub fn decode(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }
}
