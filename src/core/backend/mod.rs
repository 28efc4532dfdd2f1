//! VAD backend leg
//!
//! - `messages`: protobuf message types and the client-facing event shape
//! - `base`: the backend contract (`VadBackend`, `VadControl`, `BackendStream`)
//! - `grpc`: tonic implementation of the contract

pub mod base;
pub mod grpc;
pub mod messages;

pub use base::{
    AudioSender, BackendError, BackendResult, BackendStream, EventReceiver, StreamCloser,
    VadBackend, VadControl, grpc_status_to_backend_error,
};
pub use grpc::{DEFAULT_SERVICE, GrpcBackendConfig, GrpcVadBackend, create_backend_channel};
pub use messages::{
    AudioChunk, ClientEvent, ResetRequest, ResetResponse, VadEvent,
    VadEventKind,
};
