pub mod connection_limit;
pub mod origin;

// Re-export middleware functions
pub use connection_limit::{ConnectionSlot, connection_limit_middleware};
pub use origin::{origin_allowed, origin_middleware};
