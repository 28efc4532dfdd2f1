//! Backend VAD stream contract
//!
//! A [`VadBackend`] opens one duplex [`BackendStream`] per relay session. The
//! stream is split into three independently owned parts so the two session
//! pumps never share anything but the cancellation scope:
//!
//! ```text
//! AudioSender ──► request side ──► backend
//! backend ──► response side ──► EventReceiver
//! StreamCloser: cancels both sides exactly once
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::messages::VadEvent;

/// Result type for backend operations
pub type BackendResult<T> = Result<T, BackendError>;

/// Errors produced by the VAD backend leg
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    /// Backend could not be reached or the channel could not be established
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Invalid backend configuration (URL, service name)
    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    /// The backend rejected the call or failed mid-stream
    #[error("Stream error ({code}): {message}")]
    StreamError { code: String, message: String },

    /// Request timed out
    #[error("Timed out: {0}")]
    Timeout(String),

    /// The stream has already been closed locally
    #[error("Backend stream closed")]
    StreamClosed,
}

impl BackendError {
    /// Whether the error happened before any stream existed
    pub fn is_setup_failure(&self) -> bool {
        matches!(self, Self::ConnectionFailed(_) | Self::ConfigurationError(_))
    }
}

/// Convert a gRPC status to a backend error
pub fn grpc_status_to_backend_error(status: tonic::Status) -> BackendError {
    let code = status.code();
    let message = status.message().to_string();

    match code {
        tonic::Code::Unavailable => {
            BackendError::ConnectionFailed(format!("Service unavailable: {}", message))
        }
        tonic::Code::DeadlineExceeded => BackendError::Timeout(message),
        tonic::Code::Cancelled => BackendError::StreamClosed,
        _ => BackendError::StreamError {
            code: format!("{:?}", code),
            message,
        },
    }
}

/// Unary control operations on the backend, independent of the stream
#[async_trait]
pub trait VadControl: Send + Sync {
    /// Ask the backend to reset its VAD state. Returns the backend's
    /// `success` flag.
    async fn reset(&self) -> BackendResult<bool>;
}

/// Factory for per-session backend streams
#[async_trait]
pub trait VadBackend: Send + Sync {
    /// Establish a fresh backend connection and open the duplex stream.
    ///
    /// Failing here means no session is started.
    async fn open_stream(&self) -> BackendResult<BackendStream>;

    /// Short description used in logs
    fn describe(&self) -> String;
}

/// Request side of a backend stream.
///
/// Sending is fire-and-forget per frame: `send` only waits when the
/// transport applies backpressure, never for a backend acknowledgement.
#[derive(Debug, Clone)]
pub struct AudioSender {
    tx: mpsc::Sender<Bytes>,
    cancel: CancellationToken,
}

impl AudioSender {
    /// Forward one frame. Fails fast once the stream is closed or cancelled.
    pub async fn send(&self, frame: Bytes) -> BackendResult<()> {
        if self.cancel.is_cancelled() {
            return Err(BackendError::StreamClosed);
        }
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(BackendError::StreamClosed),
            result = self.tx.send(frame) => result.map_err(|_| BackendError::StreamClosed),
        }
    }
}

/// Response side of a backend stream
#[derive(Debug)]
pub struct EventReceiver {
    rx: mpsc::Receiver<BackendResult<VadEvent>>,
}

impl EventReceiver {
    /// Next event; `None` once the backend has completed the stream
    pub async fn recv(&mut self) -> Option<BackendResult<VadEvent>> {
        self.rx.recv().await
    }
}

/// Tears down both sides of a backend stream, at most once
#[derive(Debug, Clone)]
pub struct StreamCloser {
    cancel: CancellationToken,
    closed: Arc<AtomicBool>,
    driver: Arc<parking_lot::Mutex<Option<JoinHandle<()>>>>,
}

impl StreamCloser {
    /// Close the stream, waiting up to `grace` for the transport task to
    /// finish. Returns `true` only for the call that actually closed it.
    pub async fn close(&self, grace: Duration) -> bool {
        if self.closed.swap(true, Ordering::AcqRel) {
            debug!("Backend stream already closed");
            return false;
        }

        self.cancel.cancel();

        let driver = self.driver.lock().take();
        if let Some(handle) = driver {
            let abort = handle.abort_handle();
            if tokio::time::timeout(grace, handle).await.is_err() {
                warn!("Backend stream driver did not stop in time, aborting");
                abort.abort();
            }
        }
        true
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Token cancelled when the stream is closed
    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }
}

/// A live duplex stream to the backend plus its control channel
pub struct BackendStream {
    pub audio: AudioSender,
    pub events: EventReceiver,
    pub closer: StreamCloser,
    pub control: Arc<dyn VadControl>,
}

impl std::fmt::Debug for BackendStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendStream")
            .field("closed", &self.closer.is_closed())
            .finish_non_exhaustive()
    }
}

impl BackendStream {
    /// Assemble a stream from its transport channels.
    ///
    /// `cancel` must stop whatever drives `audio_tx`/`events_rx`; `driver`
    /// is the task doing so, if any, and is joined on close.
    pub fn from_parts(
        audio_tx: mpsc::Sender<Bytes>,
        events_rx: mpsc::Receiver<BackendResult<VadEvent>>,
        cancel: CancellationToken,
        driver: Option<JoinHandle<()>>,
        control: Arc<dyn VadControl>,
    ) -> Self {
        Self {
            audio: AudioSender {
                tx: audio_tx,
                cancel: cancel.clone(),
            },
            events: EventReceiver { rx: events_rx },
            closer: StreamCloser {
                cancel,
                closed: Arc::new(AtomicBool::new(false)),
                driver: Arc::new(parking_lot::Mutex::new(driver)),
            },
            control,
        }
    }
}
