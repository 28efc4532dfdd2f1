//! Relay WebSocket endpoint
//!
//! # Protocol
//!
//! After the upgrade the client sends binary messages, each one audio frame
//! (2048 samples of 16-bit signed little-endian PCM, mono, 16 kHz). The
//! server sends a text message per VAD event:
//!
//! ```json
//! {"event": "start", "message": "Speech detected"}
//! ```
//!
//! The session ends with a close frame whose code tells why:
//! 1000 (client or backend finished), 1001 (server shutting down),
//! 1008 (client too slow), 1011 (backend stream error),
//! 1013 (backend unavailable at setup).

pub mod handler;

pub use handler::{SESSION_ID_HEADER, ws_relay_handler};
