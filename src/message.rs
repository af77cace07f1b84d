//! Wire envelopes shared by every context on the bus.
//!
//! The envelope is `{ "type": string, "payload"?: any }`; sandbox commands
//! are answered with `{ "success": bool, "data"?, "message"?, "error"? }`.

use crate::content::ContentSpec;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Load a [`ContentSpec`] into the sandbox surface.
pub const LOAD_CONTENT_FOR_SCREENSHOT: &str = "LOAD_CONTENT_FOR_SCREENSHOT";
/// Capture the currently rendered surface.
pub const CAPTURE_SCREENSHOT: &str = "CAPTURE_SCREENSHOT";
/// Clear the surface.
pub const CLEANUP: &str = "CLEANUP";
/// Notification sent by a freshly attached sandbox.
pub const SANDBOX_READY: &str = "SANDBOX_READY";

/// Untyped message envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
}

impl Message {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            payload: None,
        }
    }

    pub fn with_payload(kind: impl Into<String>, payload: Value) -> Self {
        Self {
            kind: kind.into(),
            payload: Some(payload),
        }
    }
}

/// Response envelope for request-style messages.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Response {
    pub fn ok() -> Self {
        Self {
            success: true,
            ..Default::default()
        }
    }

    pub fn ok_with_message(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: Some(message.into()),
            ..Default::default()
        }
    }

    pub fn ok_with_data(data: Value) -> Self {
        Self {
            success: true,
            data: Some(data),
            ..Default::default()
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            ..Default::default()
        }
    }
}

/// Typed command vocabulary understood by the sandbox.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    LoadContent(ContentSpec),
    CaptureFrame,
    Cleanup,
}

impl Command {
    /// Wire `type` for this command.
    pub fn kind(&self) -> &'static str {
        match self {
            Command::LoadContent(_) => LOAD_CONTENT_FOR_SCREENSHOT,
            Command::CaptureFrame => CAPTURE_SCREENSHOT,
            Command::Cleanup => CLEANUP,
        }
    }

    pub fn to_message(&self) -> Result<Message> {
        Ok(match self {
            Command::LoadContent(spec) => {
                Message::with_payload(self.kind(), serde_json::to_value(spec)?)
            }
            Command::CaptureFrame | Command::Cleanup => Message::new(self.kind()),
        })
    }

    /// Decode an inbound envelope. Unknown kinds and malformed payloads are
    /// reported as errors so the receiver can answer with a failure response.
    pub fn from_message(message: &Message) -> Result<Self> {
        match message.kind.as_str() {
            LOAD_CONTENT_FOR_SCREENSHOT => {
                let payload = message
                    .payload
                    .clone()
                    .ok_or_else(|| Error::InvalidContent("No content source provided".into()))?;
                let spec: ContentSpec = serde_json::from_value(payload)
                    .map_err(|e| Error::InvalidContent(e.to_string()))?;
                Ok(Command::LoadContent(spec))
            }
            CAPTURE_SCREENSHOT => Ok(Command::CaptureFrame),
            CLEANUP => Ok(Command::Cleanup),
            _ => Err(Error::Other("Unknown message type".into())),
        }
    }
}
