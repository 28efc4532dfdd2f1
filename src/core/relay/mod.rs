pub mod session;
pub mod state;

pub use session::{
    ClientCloser, RelayError, RelaySession, RelaySettings, SessionHandle, SessionReport,
    SessionStats,
};
pub use state::{SessionEnd, SessionState};
