//! HTTP and WebSocket request handlers
//!
//! - `api` - Health check and session reset endpoints
//! - `ws` - Relay WebSocket endpoint

pub mod api;
pub mod ws;

pub use ws::ws_relay_handler;
