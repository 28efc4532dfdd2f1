//! Relay session lifecycle
//!
//! ```text
//! ACTIVE ──(first pump stops)──► CLOSING ──(both legs released)──► CLOSED
//! ```
//!
//! Transitions only move forward; a late request to go back is ignored.

use std::fmt;

use axum::extract::ws::close_code;
use tokio::sync::watch;

use crate::core::backend::BackendError;

/// Lifecycle state of one relay session
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SessionState {
    /// Both pumps running
    Active,
    /// One pump has stopped, the other is being cancelled
    Closing,
    /// Both legs released
    Closed,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Closing => "closing",
            Self::Closed => "closed",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Move `state` forward to `next`. Returns whether the state changed.
pub(crate) fn advance(state: &watch::Sender<SessionState>, next: SessionState) -> bool {
    state.send_if_modified(|current| {
        if next > *current {
            *current = next;
            true
        } else {
            false
        }
    })
}

/// Why a session ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEnd {
    /// Client sent a close frame or the connection ended
    ClientClosed,
    /// Reading from the client failed
    ClientError(String),
    /// Writing to the client failed
    ClientSendFailed(String),
    /// A send to the client stayed blocked past the configured timeout
    ClientSendTimeout,
    /// Backend finished the event stream
    BackendCompleted,
    /// Backend stream failed
    BackendFailed(BackendError),
    /// Session was cancelled from outside (server shutdown)
    Shutdown,
}

impl SessionEnd {
    /// Close code and reason to send to the client, if the channel can still
    /// take a close frame
    pub fn close_frame(&self) -> Option<(u16, String)> {
        match self {
            Self::ClientClosed | Self::ClientError(_) => {
                Some((close_code::NORMAL, "client disconnected".to_string()))
            }
            Self::ClientSendFailed(_) => None,
            Self::ClientSendTimeout => Some((close_code::POLICY, "client too slow".to_string())),
            Self::BackendCompleted => {
                Some((close_code::NORMAL, "backend stream ended".to_string()))
            }
            Self::BackendFailed(e) => Some((
                close_code::ERROR,
                truncate_reason(format!("backend stream error: {}", e)),
            )),
            Self::Shutdown => Some((close_code::AWAY, "server shutting down".to_string())),
        }
    }

    /// Whether the session ended because of a fault rather than a normal close
    pub fn is_error(&self) -> bool {
        matches!(
            self,
            Self::ClientError(_)
                | Self::ClientSendFailed(_)
                | Self::ClientSendTimeout
                | Self::BackendFailed(_)
        )
    }
}

impl fmt::Display for SessionEnd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ClientClosed => write!(f, "client closed"),
            Self::ClientError(e) => write!(f, "client error: {}", e),
            Self::ClientSendFailed(e) => write!(f, "client send failed: {}", e),
            Self::ClientSendTimeout => write!(f, "client send timed out"),
            Self::BackendCompleted => write!(f, "backend completed"),
            Self::BackendFailed(e) => write!(f, "backend failed: {}", e),
            Self::Shutdown => write!(f, "shutdown"),
        }
    }
}

/// Close frame reasons are limited to 123 bytes
pub(crate) fn truncate_reason(mut reason: String) -> String {
    const MAX_REASON_BYTES: usize = 123;
    if reason.len() > MAX_REASON_BYTES {
        let mut end = MAX_REASON_BYTES;
        while !reason.is_char_boundary(end) {
            end -= 1;
        }
        reason.truncate(end);
    }
    reason
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_only_moves_forward() {
        let (tx, rx) = watch::channel(SessionState::Active);

        assert!(advance(&tx, SessionState::Closing));
        assert!(!advance(&tx, SessionState::Closing));
        assert!(!advance(&tx, SessionState::Active));
        assert_eq!(*rx.borrow(), SessionState::Closing);

        assert!(advance(&tx, SessionState::Closed));
        assert!(!advance(&tx, SessionState::Closing));
        assert_eq!(*rx.borrow(), SessionState::Closed);
    }

    #[test]
    fn test_state_can_skip_closing() {
        let (tx, rx) = watch::channel(SessionState::Active);
        assert!(advance(&tx, SessionState::Closed));
        assert_eq!(*rx.borrow(), SessionState::Closed);
    }

    #[test]
    fn test_close_frames() {
        assert_eq!(
            SessionEnd::BackendCompleted.close_frame().unwrap().0,
            close_code::NORMAL
        );
        assert_eq!(
            SessionEnd::BackendFailed(BackendError::StreamClosed)
                .close_frame()
                .unwrap()
                .0,
            close_code::ERROR
        );
        assert_eq!(SessionEnd::Shutdown.close_frame().unwrap().0, close_code::AWAY);
        assert_eq!(
            SessionEnd::ClientSendTimeout.close_frame().unwrap().0,
            close_code::POLICY
        );
        assert!(SessionEnd::ClientSendFailed("broken pipe".into()).close_frame().is_none());
    }

    #[test]
    fn test_reason_truncated_on_char_boundary() {
        let reason = truncate_reason("é".repeat(100));
        assert!(reason.len() <= 123);
        assert!(reason.chars().all(|c| c == 'é'));
    }

    #[test]
    fn test_error_classification() {
        assert!(!SessionEnd::ClientClosed.is_error());
        assert!(!SessionEnd::BackendCompleted.is_error());
        assert!(!SessionEnd::Shutdown.is_error());
        assert!(SessionEnd::BackendFailed(BackendError::StreamClosed).is_error());
    }
}
