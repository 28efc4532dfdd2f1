//! gRPC VAD backend client
//!
//! Implements the bidirectional `ProcessAudio` stream and the unary
//! `ResetVAD` call with tonic's low-level [`tonic::client::Grpc`] client and
//! the prost codec, so no generated stubs are needed.
//!
//! Every session dials its own channel: the backend keys VAD state by peer,
//! so a fresh connection gives a fresh VAD state, and `ResetVAD` issued on
//! the same channel reaches the same state.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;
use tonic::codec::ProstCodec;
use tonic::codegen::http::uri::PathAndQuery;
use tonic::transport::{Channel, Endpoint};
use tonic::{Request, Status, Streaming};
use tracing::{debug, info, warn};

use super::base::{
    BackendError, BackendResult, BackendStream, VadBackend, VadControl,
    grpc_status_to_backend_error,
};
use super::messages::{AudioChunk, ResetRequest, ResetResponse, VadEvent};

/// Default fully-qualified service name
pub const DEFAULT_SERVICE: &str = "vad.VADService";

/// Settings for reaching the backend
#[derive(Debug, Clone)]
pub struct GrpcBackendConfig {
    /// Backend URL, e.g. `http://localhost:50055`
    pub url: String,
    /// Fully-qualified gRPC service name
    pub service: String,
    /// Upper bound on establishing the connection
    pub connect_timeout: Duration,
    /// Upper bound on a `ResetVAD` call
    pub reset_timeout: Duration,
    /// Frames buffered between the inbound pump and the transport
    pub frame_buffer_size: usize,
    /// Events buffered between the transport and the outbound pump
    pub event_buffer_size: usize,
}

impl Default for GrpcBackendConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:50055".to_string(),
            service: DEFAULT_SERVICE.to_string(),
            connect_timeout: Duration::from_secs(5),
            reset_timeout: Duration::from_secs(5),
            frame_buffer_size: 64,
            event_buffer_size: 64,
        }
    }
}

impl GrpcBackendConfig {
    fn method_path(&self, method: &str) -> BackendResult<PathAndQuery> {
        PathAndQuery::try_from(format!("/{}/{}", self.service, method)).map_err(|e| {
            BackendError::ConfigurationError(format!("Invalid gRPC method path: {}", e))
        })
    }
}

/// Dial a new channel to the backend
pub async fn create_backend_channel(config: &GrpcBackendConfig) -> BackendResult<Channel> {
    let endpoint = Endpoint::from_shared(config.url.clone())
        .map_err(|e| BackendError::ConfigurationError(format!("Invalid backend URL: {}", e)))?
        .connect_timeout(config.connect_timeout);

    let channel = tokio::time::timeout(config.connect_timeout, endpoint.connect())
        .await
        .map_err(|_| {
            BackendError::ConnectionFailed(format!(
                "Timed out connecting to {} after {:?}",
                config.url, config.connect_timeout
            ))
        })?
        .map_err(|e| BackendError::ConnectionFailed(format!("gRPC connection failed: {}", e)))?;

    debug!(url = %config.url, "Connected to VAD backend");
    Ok(channel)
}

/// VAD backend reached over gRPC
#[derive(Debug, Clone)]
pub struct GrpcVadBackend {
    config: Arc<GrpcBackendConfig>,
}

impl GrpcVadBackend {
    pub fn new(config: GrpcBackendConfig) -> Self {
        Self {
            config: Arc::new(config),
        }
    }

    pub fn config(&self) -> &GrpcBackendConfig {
        &self.config
    }
}

#[async_trait]
impl VadBackend for GrpcVadBackend {
    async fn open_stream(&self) -> BackendResult<BackendStream> {
        let stream_path = self.config.method_path("ProcessAudio")?;
        let reset_path = self.config.method_path("ResetVAD")?;

        let channel = create_backend_channel(&self.config).await?;

        // Make sure the service is ready before handing the stream out
        let mut grpc = tonic::client::Grpc::new(channel.clone());
        grpc.ready().await.map_err(|e| {
            BackendError::ConnectionFailed(format!("Service not ready: {}", e))
        })?;

        let (audio_tx, audio_rx) = mpsc::channel::<Bytes>(self.config.frame_buffer_size);
        let (events_tx, events_rx) =
            mpsc::channel::<BackendResult<VadEvent>>(self.config.event_buffer_size);
        let cancel = CancellationToken::new();

        let driver = tokio::spawn(drive_stream(
            grpc,
            stream_path,
            audio_rx,
            events_tx,
            cancel.clone(),
        ));

        let control = Arc::new(GrpcVadControl {
            channel,
            path: reset_path,
            timeout: self.config.reset_timeout,
        });

        info!(url = %self.config.url, service = %self.config.service, "Opened VAD backend stream");
        Ok(BackendStream::from_parts(
            audio_tx,
            events_rx,
            cancel,
            Some(driver),
            control,
        ))
    }

    fn describe(&self) -> String {
        format!("grpc {} ({})", self.config.url, self.config.service)
    }
}

/// Run the `ProcessAudio` call until it completes, fails or is cancelled.
///
/// Response headers may only arrive with the first event, so the call is
/// awaited here rather than in `open_stream`. Request frames flow as soon as
/// the call is issued.
async fn drive_stream(
    mut grpc: tonic::client::Grpc<Channel>,
    path: PathAndQuery,
    audio_rx: mpsc::Receiver<Bytes>,
    events_tx: mpsc::Sender<BackendResult<VadEvent>>,
    cancel: CancellationToken,
) {
    let requests = ReceiverStream::new(audio_rx).map(AudioChunk::new);
    let codec = ProstCodec::<AudioChunk, VadEvent>::default();

    let call = grpc.streaming(Request::new(requests), path, codec);

    let response = tokio::select! {
        _ = cancel.cancelled() => {
            debug!("Backend stream cancelled before the call was established");
            return;
        }
        response = call => response,
    };

    match response {
        Ok(response) => forward_events(response.into_inner(), events_tx, cancel).await,
        Err(status) => {
            warn!(code = ?status.code(), message = %status.message(), "ProcessAudio call failed");
            let _ = events_tx.send(Err(grpc_status_to_backend_error(status))).await;
        }
    }
}

/// Move events from the gRPC response stream to the session
async fn forward_events(
    mut stream: Streaming<VadEvent>,
    events_tx: mpsc::Sender<BackendResult<VadEvent>>,
    cancel: CancellationToken,
) {
    loop {
        let next = tokio::select! {
            _ = cancel.cancelled() => {
                debug!("Backend stream cancelled");
                return;
            }
            next = stream.message() => next,
        };

        let item = match next {
            Ok(Some(event)) => Ok(event),
            Ok(None) => {
                debug!("Backend completed the event stream");
                return;
            }
            Err(status) => Err(status),
        };
        let failed = item.is_err();

        let delivered = tokio::select! {
            _ = cancel.cancelled() => false,
            sent = events_tx.send(item.map_err(grpc_status_to_backend_error)) => sent.is_ok(),
        };
        if !delivered || failed {
            return;
        }
    }
}

/// `ResetVAD` over the session's channel
struct GrpcVadControl {
    channel: Channel,
    path: PathAndQuery,
    timeout: Duration,
}

impl GrpcVadControl {
    async fn call(&self) -> Result<ResetResponse, Status> {
        let mut grpc = tonic::client::Grpc::new(self.channel.clone());
        grpc.ready()
            .await
            .map_err(|e| Status::unavailable(format!("Service not ready: {}", e)))?;
        let codec = ProstCodec::<ResetRequest, ResetResponse>::default();
        let response = grpc
            .unary(Request::new(ResetRequest {}), self.path.clone(), codec)
            .await?;
        Ok(response.into_inner())
    }
}

#[async_trait]
impl VadControl for GrpcVadControl {
    async fn reset(&self) -> BackendResult<bool> {
        let response = tokio::time::timeout(self.timeout, self.call())
            .await
            .map_err(|_| BackendError::Timeout(format!("ResetVAD after {:?}", self.timeout)))?
            .map_err(grpc_status_to_backend_error)?;
        Ok(response.success)
    }
}
