pub mod audio;
pub mod backend;
pub mod relay;

// Re-export commonly used types for convenience
pub use audio::{FRAME_BYTES, FRAME_SAMPLES, FrameAccumulator, SAMPLE_RATE};
pub use backend::{
    BackendError, BackendResult, BackendStream, ClientEvent, GrpcBackendConfig, GrpcVadBackend,
    VadBackend, VadControl, VadEvent,
};
pub use relay::{RelayError, RelaySession, RelaySettings, SessionEnd, SessionHandle, SessionState};
