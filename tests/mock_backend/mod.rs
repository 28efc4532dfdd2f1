//! In-process gRPC VAD backend
//!
//! Serves `vad.VADService` on a random localhost port with a hand-written
//! tonic service (the shape tonic-build generates), so integration tests run
//! the real client code against a real HTTP/2 transport.
//!
//! Per stream the mock:
//! - records every received frame
//! - emits the scripted events, then either ends the stream, fails it with a
//!   status, or keeps it open
//! - optionally echoes one event per received frame
//!
//! It also counts `ResetVAD` calls and open streams, so tests can check that
//! a stream was cancelled.

// Not every test binary uses every helper
#![allow(dead_code)]

use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use bytes::Bytes;
use futures::Stream;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_stream::wrappers::TcpListenerStream;
use tokio_util::sync::CancellationToken;
use tonic::codec::ProstCodec;
use tonic::codegen::{Body, BoxFuture, Context, Poll, Service, StdError, empty_body, http};
use tonic::{Request, Response, Status, Streaming};

use vad_relay::core::backend::{AudioChunk, ResetRequest, ResetResponse, VadEvent};

pub const SERVICE_NAME: &str = "vad.VADService";

/// What a stream does after its scripted events
#[derive(Clone, Debug)]
pub enum AfterScript {
    /// Keep the stream open until the client ends it
    StayOpen,
    /// Complete the stream successfully
    Complete,
    /// Fail the stream with this status
    Fail(tonic::Code, String),
}

/// Scripted behavior shared by every stream the mock serves
#[derive(Clone, Debug)]
pub struct MockBehavior {
    pub script: Vec<VadEvent>,
    /// Delay before the first scripted event
    pub script_delay: Duration,
    pub after_script: AfterScript,
    /// Emit `{"event": "continue", "message": "<stream>:<n>:<first byte>"}` per frame
    pub echo: bool,
    pub reset_success: bool,
    pub reset_delay: Duration,
}

impl Default for MockBehavior {
    fn default() -> Self {
        Self {
            script: Vec::new(),
            script_delay: Duration::ZERO,
            after_script: AfterScript::StayOpen,
            echo: false,
            reset_success: true,
            reset_delay: Duration::ZERO,
        }
    }
}

#[derive(Default)]
pub struct MockState {
    behavior: Mutex<MockBehavior>,
    streams: Mutex<Vec<Arc<Mutex<Vec<Bytes>>>>>,
    active_streams: AtomicUsize,
    open_inputs: AtomicUsize,
    resets: AtomicUsize,
}

impl MockState {
    /// Frames received on the `index`th stream, in arrival order
    pub fn frames(&self, index: usize) -> Vec<Bytes> {
        self.streams
            .lock()
            .get(index)
            .map(|frames| frames.lock().clone())
            .unwrap_or_default()
    }

    pub fn all_streams(&self) -> Vec<Vec<Bytes>> {
        self.streams
            .lock()
            .iter()
            .map(|frames| frames.lock().clone())
            .collect()
    }

    pub fn stream_count(&self) -> usize {
        self.streams.lock().len()
    }

    /// Response streams not yet dropped by the server
    pub fn active_streams(&self) -> usize {
        self.active_streams.load(Ordering::SeqCst)
    }

    /// Request streams still being read
    pub fn open_inputs(&self) -> usize {
        self.open_inputs.load(Ordering::SeqCst)
    }

    pub fn resets(&self) -> usize {
        self.resets.load(Ordering::SeqCst)
    }

    pub fn set_behavior(&self, behavior: MockBehavior) {
        *self.behavior.lock() = behavior;
    }
}

/// Holds one count on a mock counter until dropped
struct OwnedCountGuard {
    state: Arc<MockState>,
    input: bool,
}

impl OwnedCountGuard {
    fn new(state: Arc<MockState>, input: bool) -> Self {
        counter(&state, input).fetch_add(1, Ordering::SeqCst);
        Self { state, input }
    }
}

fn counter(state: &MockState, input: bool) -> &AtomicUsize {
    if input {
        &state.open_inputs
    } else {
        &state.active_streams
    }
}

impl Drop for OwnedCountGuard {
    fn drop(&mut self) {
        counter(&self.state, self.input).fetch_sub(1, Ordering::SeqCst);
    }
}

type EventStream = Pin<Box<dyn Stream<Item = Result<VadEvent, Status>> + Send + 'static>>;

struct ProcessAudioSvc(Arc<MockState>);

impl tonic::server::StreamingService<AudioChunk> for ProcessAudioSvc {
    type Response = VadEvent;
    type ResponseStream = EventStream;
    type Future = BoxFuture<Response<Self::ResponseStream>, Status>;

    fn call(&mut self, request: Request<Streaming<AudioChunk>>) -> Self::Future {
        let state = self.0.clone();
        Box::pin(async move {
            let behavior = state.behavior.lock().clone();
            let frames = Arc::new(Mutex::new(Vec::new()));
            let index = {
                let mut streams = state.streams.lock();
                streams.push(frames.clone());
                streams.len() - 1
            };

            let (echo_tx, mut echo_rx) = mpsc::unbounded_channel::<VadEvent>();

            // Read the request side independently of the response side
            let mut inbound = request.into_inner();
            let input_guard = OwnedCountGuard::new(state.clone(), true);
            let echo = behavior.echo;
            tokio::spawn(async move {
                let _guard = input_guard;
                let mut n = 0usize;
                while let Ok(Some(chunk)) = inbound.message().await {
                    let first = chunk.audio_data.first().copied().unwrap_or(0);
                    frames.lock().push(chunk.audio_data);
                    if echo {
                        let _ = echo_tx.send(VadEvent::new(
                            "continue",
                            format!("{index}:{n}:{first}"),
                        ));
                    }
                    n += 1;
                }
            });

            let stream_guard = OwnedCountGuard::new(state.clone(), false);
            let output = async_stream::stream! {
                let _guard = stream_guard;
                if !behavior.script_delay.is_zero() {
                    tokio::time::sleep(behavior.script_delay).await;
                }
                for event in behavior.script {
                    yield Ok(event);
                }
                match behavior.after_script {
                    AfterScript::Complete => return,
                    AfterScript::Fail(code, message) => {
                        yield Err(Status::new(code, message));
                        return;
                    }
                    AfterScript::StayOpen => {}
                }
                while let Some(event) = echo_rx.recv().await {
                    yield Ok(event);
                }
            };

            Ok(Response::new(Box::pin(output) as EventStream))
        })
    }
}

struct ResetSvc(Arc<MockState>);

impl tonic::server::UnaryService<ResetRequest> for ResetSvc {
    type Response = ResetResponse;
    type Future = BoxFuture<Response<Self::Response>, Status>;

    fn call(&mut self, _request: Request<ResetRequest>) -> Self::Future {
        let state = self.0.clone();
        Box::pin(async move {
            let (success, delay) = {
                let behavior = state.behavior.lock();
                (behavior.reset_success, behavior.reset_delay)
            };
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            state.resets.fetch_add(1, Ordering::SeqCst);
            Ok(Response::new(ResetResponse { success }))
        })
    }
}

#[derive(Clone)]
pub struct MockVadServer {
    state: Arc<MockState>,
}

impl tonic::server::NamedService for MockVadServer {
    const NAME: &'static str = SERVICE_NAME;
}

impl<B> Service<http::Request<B>> for MockVadServer
where
    B: Body + Send + 'static,
    B::Error: Into<StdError> + Send + 'static,
{
    type Response = http::Response<tonic::body::BoxBody>;
    type Error = std::convert::Infallible;
    type Future = BoxFuture<Self::Response, Self::Error>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: http::Request<B>) -> Self::Future {
        let state = self.state.clone();
        match req.uri().path() {
            "/vad.VADService/ProcessAudio" => Box::pin(async move {
                let codec = ProstCodec::<VadEvent, AudioChunk>::default();
                let mut grpc = tonic::server::Grpc::new(codec);
                Ok(grpc.streaming(ProcessAudioSvc(state), req).await)
            }),
            "/vad.VADService/ResetVAD" => Box::pin(async move {
                let codec = ProstCodec::<ResetResponse, ResetRequest>::default();
                let mut grpc = tonic::server::Grpc::new(codec);
                Ok(grpc.unary(ResetSvc(state), req).await)
            }),
            _ => Box::pin(async move {
                let mut response = http::Response::new(empty_body());
                let headers = response.headers_mut();
                headers.insert("grpc-status", http::HeaderValue::from_static("12"));
                headers.insert(
                    "content-type",
                    http::HeaderValue::from_static("application/grpc"),
                );
                Ok(response)
            }),
        }
    }
}

/// Running mock backend. Stops serving when dropped.
pub struct MockBackend {
    pub addr: SocketAddr,
    pub state: Arc<MockState>,
    shutdown: CancellationToken,
}

impl MockBackend {
    pub async fn start(behavior: MockBehavior) -> Self {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind mock backend");
        let addr = listener.local_addr().expect("mock backend address");

        let state = Arc::new(MockState::default());
        state.set_behavior(behavior);

        let shutdown = CancellationToken::new();
        let server = MockVadServer {
            state: state.clone(),
        };
        let token = shutdown.clone();
        tokio::spawn(async move {
            let _ = tonic::transport::Server::builder()
                .add_service(server)
                .serve_with_incoming_shutdown(TcpListenerStream::new(listener), token.cancelled())
                .await;
        });

        Self {
            addr,
            state,
            shutdown,
        }
    }

    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }
}

impl Drop for MockBackend {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// Poll `condition` until it holds or `limit` elapses
pub async fn wait_until(limit: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + limit;
    loop {
        if condition() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
