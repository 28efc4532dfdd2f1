//! Relay session: full-duplex pump between one client channel and one
//! backend stream
//!
//! ```text
//! client ──binary frames──► inbound pump ──AudioChunk──► backend
//! client ◄──JSON events──── outbound pump ◄──VadEvent─── backend
//! ```
//!
//! Both pumps run concurrently inside [`RelaySession::run`] under one
//! cancellation scope. Whichever pump stops first records why, cancels the
//! scope and the other pump unwinds. Once both have returned, the backend
//! stream and the client channel are each closed exactly once and the
//! session reaches [`SessionState::Closed`].

use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use axum::extract::ws::{CloseFrame, Message};
use futures::{Sink, SinkExt, Stream, StreamExt};
use thiserror::Error;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::core::audio::is_full_frame;
use crate::core::backend::{
    AudioSender, BackendError, BackendStream, ClientEvent, EventReceiver, VadControl,
};

use super::state::{SessionEnd, SessionState, advance};

/// Session-level errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RelayError {
    /// A reset for this session is already in flight
    #[error("A reset is already in progress for this session")]
    ResetInProgress,

    /// The session is no longer active
    #[error("Session is closed")]
    SessionClosed,

    #[error(transparent)]
    Backend(#[from] BackendError),
}

/// Timing policy for a session
#[derive(Debug, Clone)]
pub struct RelaySettings {
    /// Bound on a single send to the client; `None` lets a slow client
    /// suspend the outbound pump indefinitely
    pub client_send_timeout: Option<Duration>,
    /// Bound on closing each leg
    pub close_timeout: Duration,
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self {
            client_send_timeout: None,
            close_timeout: Duration::from_secs(2),
        }
    }
}

/// Traffic counters for one session
#[derive(Debug, Default)]
pub struct SessionStats {
    pub frames_forwarded: AtomicU64,
    pub events_delivered: AtomicU64,
    pub events_dropped: AtomicU64,
}

/// Summary returned when a session finishes
#[derive(Debug, Clone)]
pub struct SessionReport {
    pub session_id: String,
    pub end: SessionEnd,
    pub frames_forwarded: u64,
    pub events_delivered: u64,
    pub events_dropped: u64,
    pub duration: Duration,
}

/// Cloneable handle to a running session
#[derive(Clone)]
pub struct SessionHandle {
    id: Arc<str>,
    state: watch::Receiver<SessionState>,
    cancel: CancellationToken,
    control: Arc<dyn VadControl>,
    reset_lock: Arc<tokio::sync::Mutex<()>>,
    stats: Arc<SessionStats>,
}

impl std::fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHandle")
            .field("id", &self.id)
            .field("state", &self.state())
            .finish()
    }
}

impl SessionHandle {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    pub fn stats(&self) -> &SessionStats {
        &self.stats
    }

    /// Ask the backend to reset its VAD state without touching the pumps.
    ///
    /// At most one reset is in flight per session; a concurrent call fails
    /// with [`RelayError::ResetInProgress`] instead of queueing.
    pub async fn reset(&self) -> Result<bool, RelayError> {
        if self.state() != SessionState::Active {
            return Err(RelayError::SessionClosed);
        }
        let _guard = self
            .reset_lock
            .try_lock()
            .map_err(|_| RelayError::ResetInProgress)?;

        debug!(session_id = %self.id, "Resetting backend VAD state");
        let success = tokio::select! {
            _ = self.cancel.cancelled() => return Err(RelayError::SessionClosed),
            result = self.control.reset() => result?,
        };
        info!(session_id = %self.id, success, "Backend VAD reset completed");
        Ok(success)
    }

    /// Cancel the session from outside. Both legs are closed as usual.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    /// Wait until the session reaches `Closed`
    pub async fn closed(&self) {
        let mut state = self.state.clone();
        let _ = state.wait_for(|s| *s == SessionState::Closed).await;
    }
}

/// One relay session. Consumed by [`RelaySession::run`].
pub struct RelaySession {
    id: Arc<str>,
    backend: BackendStream,
    settings: RelaySettings,
    state: watch::Sender<SessionState>,
    cancel: CancellationToken,
    handle: SessionHandle,
    stats: Arc<SessionStats>,
}

impl RelaySession {
    /// Hand a freshly opened backend stream to a new session.
    /// The session starts in [`SessionState::Active`].
    pub fn new(id: impl Into<String>, backend: BackendStream, settings: RelaySettings) -> Self {
        let id: Arc<str> = Arc::from(id.into());
        let (state, state_rx) = watch::channel(SessionState::Active);
        let cancel = CancellationToken::new();
        let stats = Arc::new(SessionStats::default());

        let handle = SessionHandle {
            id: id.clone(),
            state: state_rx,
            cancel: cancel.clone(),
            control: backend.control.clone(),
            reset_lock: Arc::new(tokio::sync::Mutex::new(())),
            stats: stats.clone(),
        };

        Self {
            id,
            backend,
            settings,
            state,
            cancel,
            handle,
            stats,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn handle(&self) -> SessionHandle {
        self.handle.clone()
    }

    /// Pump until either side terminates, then tear down both legs.
    pub async fn run<R, E, W>(self, client_rx: R, client_tx: W) -> SessionReport
    where
        R: Stream<Item = Result<Message, E>> + Unpin + Send,
        E: Display,
        W: Sink<Message> + Unpin + Send,
        W::Error: Display,
    {
        let started = Instant::now();
        let Self {
            id,
            backend,
            settings,
            state,
            cancel,
            stats,
            ..
        } = self;
        let BackendStream {
            audio,
            mut events,
            closer,
            ..
        } = backend;

        info!(session_id = %id, "Relay session active");

        let first_end: parking_lot::Mutex<Option<SessionEnd>> = parking_lot::Mutex::new(None);
        let finish = |end: SessionEnd| {
            {
                let mut slot = first_end.lock();
                if slot.is_none() {
                    debug!(session_id = %id, reason = %end, "Pump stopped, closing session");
                    *slot = Some(end);
                }
            }
            if advance(&state, SessionState::Closing) {
                debug!(session_id = %id, state = %SessionState::Closing, "Session state changed");
            }
            cancel.cancel();
        };

        let inbound = async {
            let end = inbound_pump(
                client_rx,
                &audio,
                &cancel,
                &stats,
                &id,
                settings.close_timeout,
            )
            .await;
            finish(end);
        };
        let outbound = async {
            let (end, sink) = outbound_pump(
                &mut events,
                client_tx,
                &cancel,
                &stats,
                &id,
                settings.client_send_timeout,
            )
            .await;
            finish(end);
            sink
        };

        let ((), client_tx) = tokio::join!(inbound, outbound);

        let end = first_end.into_inner().unwrap_or(SessionEnd::Shutdown);

        // Both pumps are joined; release each leg exactly once
        closer.close(settings.close_timeout).await;
        let mut client = ClientCloser::new(client_tx);
        client.close(end.close_frame(), settings.close_timeout).await;

        advance(&state, SessionState::Closed);

        let report = SessionReport {
            session_id: id.to_string(),
            frames_forwarded: stats.frames_forwarded.load(Ordering::Relaxed),
            events_delivered: stats.events_delivered.load(Ordering::Relaxed),
            events_dropped: stats.events_dropped.load(Ordering::Relaxed),
            duration: started.elapsed(),
            end,
        };

        if report.end.is_error() {
            warn!(
                session_id = %id,
                reason = %report.end,
                frames = report.frames_forwarded,
                events = report.events_delivered,
                "Relay session closed with error"
            );
        } else {
            info!(
                session_id = %id,
                reason = %report.end,
                frames = report.frames_forwarded,
                events = report.events_delivered,
                duration_ms = report.duration.as_millis() as u64,
                "Relay session closed"
            );
        }
        report
    }
}

/// Client → backend. Each binary message is one opaque frame.
async fn inbound_pump<R, E>(
    mut client_rx: R,
    audio: &AudioSender,
    cancel: &CancellationToken,
    stats: &SessionStats,
    session_id: &str,
    close_timeout: Duration,
) -> SessionEnd
where
    R: Stream<Item = Result<Message, E>> + Unpin,
    E: Display,
{
    let mut warned_frame_size = false;

    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => return SessionEnd::Shutdown,
            next = client_rx.next() => next,
        };

        let frame = match next {
            Some(Ok(Message::Binary(frame))) => frame,
            Some(Ok(Message::Text(text))) => {
                warn!(session_id = %session_id, len = text.as_str().len(), "Ignoring text message from client");
                continue;
            }
            Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => continue,
            Some(Ok(Message::Close(frame))) => {
                debug!(session_id = %session_id, ?frame, "Client sent close");
                return SessionEnd::ClientClosed;
            }
            Some(Err(e)) => return SessionEnd::ClientError(e.to_string()),
            None => return SessionEnd::ClientClosed,
        };

        if !warned_frame_size && !is_full_frame(frame.len()) {
            warn!(
                session_id = %session_id,
                len = frame.len(),
                "Client frame size differs from protocol frame size, forwarding as-is"
            );
            warned_frame_size = true;
        }

        trace!(session_id = %session_id, len = frame.len(), "Forwarding frame");
        let sent = tokio::select! {
            biased;
            _ = cancel.cancelled() => return SessionEnd::Shutdown,
            sent = audio.send(frame) => sent,
        };

        match sent {
            Ok(()) => {
                stats.frames_forwarded.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                // The request side is gone, so the response side is ending too.
                // Let the outbound pump report why; fall back after a grace period.
                debug!(session_id = %session_id, error = %e, "Backend no longer accepts frames");
                return match tokio::time::timeout(close_timeout, cancel.cancelled()).await {
                    Ok(()) => SessionEnd::Shutdown,
                    Err(_) => SessionEnd::BackendFailed(e),
                };
            }
        }
    }
}

enum SendFailure {
    Timeout,
    Sink(String),
}

async fn send_with_timeout<F, E>(send: F, timeout: Option<Duration>) -> Result<(), SendFailure>
where
    F: Future<Output = Result<(), E>>,
    E: Display,
{
    match timeout {
        Some(limit) => match tokio::time::timeout(limit, send).await {
            Ok(result) => result.map_err(|e| SendFailure::Sink(e.to_string())),
            Err(_) => Err(SendFailure::Timeout),
        },
        None => send.await.map_err(|e| SendFailure::Sink(e.to_string())),
    }
}

/// Backend → client. Each event becomes one JSON text message.
async fn outbound_pump<W>(
    events: &mut EventReceiver,
    mut client_tx: W,
    cancel: &CancellationToken,
    stats: &SessionStats,
    session_id: &str,
    send_timeout: Option<Duration>,
) -> (SessionEnd, W)
where
    W: Sink<Message> + Unpin,
    W::Error: Display,
{
    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => return (SessionEnd::Shutdown, client_tx),
            next = events.recv() => next,
        };

        let event = match next {
            Some(Ok(event)) => event,
            Some(Err(e)) => return (SessionEnd::BackendFailed(e), client_tx),
            None => return (SessionEnd::BackendCompleted, client_tx),
        };

        debug!(session_id = %session_id, event = %event.event, "Received VAD event");

        let payload = match ClientEvent::from(event).to_json() {
            Ok(json) => json,
            Err(e) => {
                warn!(session_id = %session_id, error = %e, "Failed to serialize VAD event, dropping");
                stats.events_dropped.fetch_add(1, Ordering::Relaxed);
                continue;
            }
        };

        let outcome = {
            let send = client_tx.send(Message::Text(payload.into()));
            tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                result = send_with_timeout(send, send_timeout) => Some(result),
            }
        };

        match outcome {
            None => return (SessionEnd::Shutdown, client_tx),
            Some(Ok(())) => {
                stats.events_delivered.fetch_add(1, Ordering::Relaxed);
            }
            Some(Err(SendFailure::Timeout)) => return (SessionEnd::ClientSendTimeout, client_tx),
            Some(Err(SendFailure::Sink(e))) => {
                return (SessionEnd::ClientSendFailed(e), client_tx);
            }
        }
    }
}

/// Closes the client channel at most once
pub struct ClientCloser<W> {
    sink: W,
    closed: bool,
}

impl<W> ClientCloser<W>
where
    W: Sink<Message> + Unpin,
    W::Error: Display,
{
    pub fn new(sink: W) -> Self {
        Self {
            sink,
            closed: false,
        }
    }

    /// Send the close frame (if any) and close the sink, bounded by
    /// `timeout`. Returns `true` only for the call that closed it.
    pub async fn close(&mut self, frame: Option<(u16, String)>, timeout: Duration) -> bool {
        if self.closed {
            return false;
        }
        self.closed = true;

        let sink = &mut self.sink;
        let shutdown = async move {
            if let Some((code, reason)) = frame {
                let close = Message::Close(Some(CloseFrame {
                    code,
                    reason: reason.into(),
                }));
                if let Err(e) = sink.send(close).await {
                    debug!(error = %e, "Close frame not delivered");
                }
            }
            if let Err(e) = sink.close().await {
                debug!(error = %e, "Client channel close reported an error");
            }
        };

        if tokio::time::timeout(timeout, shutdown).await.is_err() {
            warn!("Timed out closing client channel");
        }
        true
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::backend::{BackendResult, VadEvent};
    use async_trait::async_trait;
    use bytes::Bytes;
    use futures::channel::mpsc as fmpsc;
    use std::sync::atomic::AtomicUsize;
    use tokio::sync::mpsc;

    struct CountingControl {
        calls: AtomicUsize,
        delay: Duration,
    }

    #[async_trait]
    impl VadControl for CountingControl {
        async fn reset(&self) -> BackendResult<bool> {
            tokio::time::sleep(self.delay).await;
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(true)
        }
    }

    struct Harness {
        session: RelaySession,
        audio_rx: mpsc::Receiver<Bytes>,
        events_tx: mpsc::Sender<BackendResult<VadEvent>>,
        backend_cancel: CancellationToken,
        control: Arc<CountingControl>,
    }

    fn harness(settings: RelaySettings) -> Harness {
        let (audio_tx, audio_rx) = mpsc::channel(16);
        let (events_tx, events_rx) = mpsc::channel(16);
        let backend_cancel = CancellationToken::new();
        let control = Arc::new(CountingControl {
            calls: AtomicUsize::new(0),
            delay: Duration::from_millis(50),
        });
        let stream = BackendStream::from_parts(
            audio_tx,
            events_rx,
            backend_cancel.clone(),
            None,
            control.clone(),
        );
        Harness {
            session: RelaySession::new("test-session", stream, settings),
            audio_rx,
            events_tx,
            backend_cancel,
            control,
        }
    }

    type ClientIn = fmpsc::UnboundedSender<Result<Message, axum::Error>>;

    fn client_channels() -> (
        ClientIn,
        fmpsc::UnboundedReceiver<Result<Message, axum::Error>>,
        fmpsc::UnboundedSender<Message>,
        fmpsc::UnboundedReceiver<Message>,
    ) {
        let (in_tx, in_rx) = fmpsc::unbounded();
        let (out_tx, out_rx) = fmpsc::unbounded();
        (in_tx, in_rx, out_tx, out_rx)
    }

    #[tokio::test]
    async fn test_client_close_ends_session() {
        let mut h = harness(RelaySettings::default());
        let (in_tx, in_rx, out_tx, mut out_rx) = client_channels();

        in_tx
            .unbounded_send(Ok(Message::Binary(Bytes::from(vec![1u8; 4096]))))
            .unwrap();
        in_tx.unbounded_send(Ok(Message::Close(None))).unwrap();

        let report = h.session.run(in_rx, out_tx).await;

        assert_eq!(report.end, SessionEnd::ClientClosed);
        assert_eq!(report.frames_forwarded, 1);
        assert_eq!(h.audio_rx.recv().await.unwrap().len(), 4096);
        assert!(h.backend_cancel.is_cancelled());

        // Only the close frame reaches the client
        match out_rx.next().await {
            Some(Message::Close(Some(frame))) => assert_eq!(frame.code, 1000),
            other => panic!("expected close frame, got {other:?}"),
        }
        drop(h.events_tx);
    }

    #[tokio::test]
    async fn test_backend_completion_closes_client() {
        let h = harness(RelaySettings::default());
        let (_in_tx, in_rx, out_tx, mut out_rx) = client_channels();

        h.events_tx
            .send(Ok(VadEvent::new("start", "Speech detected")))
            .await
            .unwrap();
        drop(h.events_tx);

        let report = h.session.run(in_rx, out_tx).await;
        assert_eq!(report.end, SessionEnd::BackendCompleted);
        assert_eq!(report.events_delivered, 1);

        match out_rx.next().await {
            Some(Message::Text(text)) => {
                let event: ClientEvent = serde_json::from_str(text.as_str()).unwrap();
                assert_eq!(event.event, "start");
                assert_eq!(event.message, "Speech detected");
            }
            other => panic!("expected event, got {other:?}"),
        }
        match out_rx.next().await {
            Some(Message::Close(Some(frame))) => assert_eq!(frame.code, 1000),
            other => panic!("expected close frame, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_backend_error_closes_with_error_code() {
        let h = harness(RelaySettings::default());
        let (_in_tx, in_rx, out_tx, mut out_rx) = client_channels();

        h.events_tx
            .send(Err(BackendError::StreamError {
                code: "Internal".into(),
                message: "model crashed".into(),
            }))
            .await
            .unwrap();

        let report = h.session.run(in_rx, out_tx).await;
        assert!(matches!(report.end, SessionEnd::BackendFailed(_)));

        match out_rx.next().await {
            Some(Message::Close(Some(frame))) => {
                assert_eq!(frame.code, 1011);
                assert!(frame.reason.as_str().contains("model crashed"));
            }
            other => panic!("expected close frame, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_events_with_blank_kind_are_forwarded() {
        let h = harness(RelaySettings::default());
        let (_in_tx, in_rx, out_tx, mut out_rx) = client_channels();

        let sent = vec![
            VadEvent::new("", "backend said something"),
            VadEvent::new(" ", "whitespace kind"),
            VadEvent::new("end", "ok"),
        ];
        for event in &sent {
            h.events_tx.send(Ok(event.clone())).await.unwrap();
        }
        drop(h.events_tx);

        let report = h.session.run(in_rx, out_tx).await;
        assert_eq!(report.events_dropped, 0);
        assert_eq!(report.events_delivered, 3);

        for expected in sent {
            match out_rx.next().await {
                Some(Message::Text(text)) => {
                    let event: ClientEvent = serde_json::from_str(text.as_str()).unwrap();
                    assert_eq!(event.event, expected.event);
                    assert_eq!(event.message, expected.message);
                }
                other => panic!("expected event, got {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn test_text_and_ping_messages_are_not_forwarded() {
        let mut h = harness(RelaySettings::default());
        let (in_tx, in_rx, out_tx, _out_rx) = client_channels();

        in_tx
            .unbounded_send(Ok(Message::Text("hello".into())))
            .unwrap();
        in_tx
            .unbounded_send(Ok(Message::Ping(Bytes::from_static(b"p"))))
            .unwrap();
        in_tx
            .unbounded_send(Ok(Message::Binary(Bytes::from_static(b"frame"))))
            .unwrap();
        drop(in_tx);

        let report = h.session.run(in_rx, out_tx).await;
        assert_eq!(report.frames_forwarded, 1);
        assert_eq!(h.audio_rx.recv().await.unwrap(), Bytes::from_static(b"frame"));
        assert!(h.audio_rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_shutdown_from_handle() {
        let h = harness(RelaySettings::default());
        let (_in_tx, in_rx, out_tx, mut out_rx) = client_channels();
        let handle = h.session.handle();

        let task = tokio::spawn(h.session.run(in_rx, out_tx));
        assert_eq!(handle.state(), SessionState::Active);

        handle.shutdown();
        let report = tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .expect("session must stop after shutdown")
            .unwrap();

        assert_eq!(report.end, SessionEnd::Shutdown);
        assert_eq!(handle.state(), SessionState::Closed);
        match out_rx.next().await {
            Some(Message::Close(Some(frame))) => assert_eq!(frame.code, 1001),
            other => panic!("expected close frame, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_reset_rejects_concurrent_calls() {
        let h = harness(RelaySettings::default());
        let (_in_tx, in_rx, out_tx, _out_rx) = client_channels();
        let handle = h.session.handle();
        let control = h.control.clone();
        let _events_tx = h.events_tx;

        let task = tokio::spawn(h.session.run(in_rx, out_tx));

        let (first, second) = tokio::join!(handle.reset(), async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            handle.reset().await
        });
        assert_eq!(first, Ok(true));
        assert_eq!(second, Err(RelayError::ResetInProgress));
        assert_eq!(control.calls.load(Ordering::SeqCst), 1);
        assert_eq!(handle.state(), SessionState::Active);

        handle.shutdown();
        task.await.unwrap();
        assert_eq!(handle.reset().await, Err(RelayError::SessionClosed));
    }

    #[tokio::test]
    async fn test_client_send_timeout() {
        let settings = RelaySettings {
            client_send_timeout: Some(Duration::from_millis(50)),
            close_timeout: Duration::from_millis(100),
        };
        let h = harness(settings);
        let (_in_tx, in_rx, _out_tx, _out_rx) = client_channels();

        // A sink that never becomes ready
        let stuck = futures::sink::unfold((), |(), _msg: Message| async {
            futures::future::pending::<Result<(), std::io::Error>>().await
        });
        let stuck = Box::pin(stuck);

        h.events_tx.send(Ok(VadEvent::new("start", "x"))).await.unwrap();

        let report = tokio::time::timeout(Duration::from_secs(2), h.session.run(in_rx, stuck))
            .await
            .expect("send timeout must end the session");
        assert_eq!(report.end, SessionEnd::ClientSendTimeout);
    }

    #[tokio::test]
    async fn test_client_closer_is_idempotent() {
        let (tx, mut rx) = fmpsc::unbounded::<Message>();
        let mut closer = ClientCloser::new(tx);

        assert!(
            closer
                .close(Some((1000, "bye".into())), Duration::from_millis(100))
                .await
        );
        assert!(
            !closer
                .close(Some((1000, "bye".into())), Duration::from_millis(100))
                .await
        );
        assert!(closer.is_closed());

        assert!(matches!(rx.next().await, Some(Message::Close(Some(_)))));
        // Sink closed after the single close frame
        assert!(rx.next().await.is_none());
    }
}
