//! VAD backend message types
//!
//! These types match the backend's proto definitions (see `proto/vad.proto`):
//!
//! ```protobuf
//! service VADService {
//!     rpc ProcessAudio(stream AudioChunk) returns (stream VADResponse);
//!     rpc ResetVAD(ResetRequest) returns (ResetResponse);
//! }
//! ```
//!
//! They are declared with `prost` derives directly instead of being generated
//! at build time, so the crate builds without `protoc`.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// One audio frame sent on the request side of `ProcessAudio`.
///
/// ```protobuf
/// message AudioChunk {
///     bytes audio_data = 1;
/// }
/// ```
#[derive(Clone, PartialEq, prost::Message)]
pub struct AudioChunk {
    /// Opaque frame payload, forwarded unmodified from the client
    #[prost(bytes = "bytes", tag = "1")]
    pub audio_data: Bytes,
}

impl AudioChunk {
    pub fn new(audio_data: Bytes) -> Self {
        Self { audio_data }
    }
}

/// Asynchronous event produced on the response side of `ProcessAudio`.
///
/// ```protobuf
/// message VADResponse {
///     string event = 1;
///     string message = 2;
/// }
/// ```
#[derive(Clone, PartialEq, prost::Message)]
pub struct VadEvent {
    /// Event kind: "start", "continue", "end", or any future kind
    #[prost(string, tag = "1")]
    pub event: String,
    /// Human-readable detail
    #[prost(string, tag = "2")]
    pub message: String,
}

impl VadEvent {
    pub fn new(event: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            event: event.into(),
            message: message.into(),
        }
    }

    /// Parsed event kind
    pub fn kind(&self) -> VadEventKind {
        VadEventKind::from(self.event.as_str())
    }
}

/// `ResetVAD` request (empty).
#[derive(Clone, PartialEq, prost::Message)]
pub struct ResetRequest {}

/// `ResetVAD` response.
///
/// ```protobuf
/// message ResetResponse {
///     bool success = 1;
/// }
/// ```
#[derive(Clone, PartialEq, prost::Message)]
pub struct ResetResponse {
    #[prost(bool, tag = "1")]
    pub success: bool,
}

/// Known VAD event kinds. Unknown kinds are kept verbatim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VadEventKind {
    Start,
    Continue,
    End,
    Other(String),
}

impl From<&str> for VadEventKind {
    fn from(s: &str) -> Self {
        match s {
            "start" => Self::Start,
            "continue" => Self::Continue,
            "end" => Self::End,
            other => Self::Other(other.to_string()),
        }
    }
}

impl VadEventKind {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Start => "start",
            Self::Continue => "continue",
            Self::End => "end",
            Self::Other(s) => s,
        }
    }
}

/// Event as delivered to the browser: `{"event": "...", "message": "..."}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientEvent {
    pub event: String,
    pub message: String,
}

/// Events are forwarded verbatim; the kind set is open and an empty kind
/// is passed through like any other.
impl From<VadEvent> for ClientEvent {
    fn from(value: VadEvent) -> Self {
        Self {
            event: value.event,
            message: value.message,
        }
    }
}

impl ClientEvent {
    /// Serialize to the JSON text sent over the client channel
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
