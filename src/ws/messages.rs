//! WebSocket message envelope for calls, responses and pushes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Top-level WebSocket message envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WsMessage {
    /// Client-provided ID for calls, echoed in the reply; server-generated
    /// for pushes.
    pub id: String,
    /// Message type discriminator.
    #[serde(rename = "type")]
    pub msg_type: WsMessageType,
    /// ISO-8601 timestamp. Optional on inbound calls.
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
    /// Fully-qualified method name for calls and pushes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    /// Arguments for calls and pushes, result for responses, `{code,
    /// message}` for errors.
    #[serde(default)]
    pub payload: Value,
}

/// Discriminator for WebSocket message types.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum WsMessageType {
    /// Client → Server remote call.
    Call,
    /// Server → Client successful call result.
    Response,
    /// Server → Client fire-and-forget invocation of a client method.
    Push,
    /// Server → Client error.
    Error,
}

impl WsMessage {
    /// Builds a call envelope.
    #[must_use]
    pub fn call(id: impl Into<String>, method: impl Into<String>, args: Vec<Value>) -> Self {
        Self {
            id: id.into(),
            msg_type: WsMessageType::Call,
            timestamp: Utc::now(),
            method: Some(method.into()),
            payload: Value::Array(args),
        }
    }

    /// Builds the reply to call `id`.
    #[must_use]
    pub fn response(id: impl Into<String>, result: Value) -> Self {
        Self {
            id: id.into(),
            msg_type: WsMessageType::Response,
            timestamp: Utc::now(),
            method: None,
            payload: result,
        }
    }

    /// Builds an error envelope. `id` is empty when the request was unreadable.
    #[must_use]
    pub fn error(id: impl Into<String>, code: u32, message: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            msg_type: WsMessageType::Error,
            timestamp: Utc::now(),
            method: None,
            payload: serde_json::json!({
                "code": code,
                "message": message.into(),
            }),
        }
    }

    /// Builds a push invoking `method` on the client.
    #[must_use]
    pub fn push(method: impl Into<String>, args: Vec<Value>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            msg_type: WsMessageType::Push,
            timestamp: Utc::now(),
            method: Some(method.into()),
            payload: Value::Array(args),
        }
    }

    /// Returns the positional arguments carried by a call or push.
    ///
    /// An array payload is the argument list, `null` means no arguments and
    /// any other value is a single argument.
    #[must_use]
    pub fn arguments(&self) -> Vec<Value> {
        match &self.payload {
            Value::Array(args) => args.clone(),
            Value::Null => Vec::new(),
            other => vec![other.clone()],
        }
    }
}
