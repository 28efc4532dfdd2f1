//! Stream a WAV file through the relay as fixed-size frames and print the
//! VAD events that come back.
//!
//! ```text
//! vad-replay speech.wav --url ws://localhost:8080/ws --pad-final
//! ```

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, anyhow, bail};
use clap::Parser;
use futures::{SinkExt, StreamExt};
use hound::{SampleFormat, WavReader};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tracing::{debug, info, warn};

use vad_relay::core::audio::{FRAME_DURATION_MS, FRAME_SAMPLES, FrameAccumulator, SAMPLE_RATE};
use vad_relay::core::backend::ClientEvent;

/// Replay a 16 kHz mono WAV file against a running relay
#[derive(Parser, Debug)]
#[command(name = "vad-replay")]
#[command(version, about, long_about = None)]
struct Cli {
    /// WAV file to stream (16-bit or float, mono, 16 kHz)
    file: PathBuf,

    /// Relay WebSocket URL
    #[arg(short = 'u', long = "url", default_value = "ws://localhost:8080/ws")]
    url: String,

    /// Pad the final partial frame with zeros instead of dropping it
    #[arg(long = "pad-final")]
    pad_final: bool,

    /// Send frames as fast as possible instead of in real time
    #[arg(long = "no-pace")]
    no_pace: bool,

    /// How long to keep listening for events after the last frame
    #[arg(long = "linger-ms", default_value_t = 1500)]
    linger_ms: u64,

    /// Origin header to send with the handshake
    #[arg(long = "origin")]
    origin: Option<String>,
}

fn read_frames(cli: &Cli) -> anyhow::Result<Vec<bytes::Bytes>> {
    let mut reader = WavReader::open(&cli.file)
        .with_context(|| format!("Failed to open WAV file {}", cli.file.display()))?;
    let spec = reader.spec();

    if spec.channels != 1 || spec.sample_rate != SAMPLE_RATE {
        warn!(
            channels = spec.channels,
            sample_rate = spec.sample_rate,
            "WAV file should be mono at {SAMPLE_RATE} Hz; streaming samples as-is"
        );
    }

    let mut accumulator = FrameAccumulator::new(FRAME_SAMPLES);
    let mut frames = match (spec.sample_format, spec.bits_per_sample) {
        (SampleFormat::Int, 16) => {
            let samples = reader
                .samples::<i16>()
                .collect::<Result<Vec<_>, _>>()
                .context("Failed to read 16-bit samples")?;
            accumulator.push_i16(&samples)
        }
        (SampleFormat::Float, 32) => {
            let samples = reader
                .samples::<f32>()
                .collect::<Result<Vec<_>, _>>()
                .context("Failed to read float samples")?;
            accumulator.push_f32(&samples)
        }
        (format, bits) => bail!("Unsupported WAV sample format: {format:?} {bits}-bit"),
    };

    if cli.pad_final {
        let pending = accumulator.pending();
        if let Some(frame) = accumulator.flush_padded() {
            info!(
                from_samples = pending,
                to_samples = FRAME_SAMPLES,
                "Padded final frame"
            );
            frames.push(frame);
        }
    } else {
        let dropped = accumulator.discard();
        if dropped > 0 {
            info!(samples = dropped, "Dropped final partial frame");
        }
    }

    Ok(frames)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let frames = read_frames(&cli)?;
    info!(
        frames = frames.len(),
        frame_ms = FRAME_DURATION_MS,
        "Loaded {}",
        cli.file.display()
    );

    let mut request = cli
        .url
        .as_str()
        .into_client_request()
        .with_context(|| format!("Invalid relay URL {}", cli.url))?;
    if let Some(origin) = &cli.origin {
        let value = HeaderValue::from_str(origin).context("Invalid origin header")?;
        request.headers_mut().insert("origin", value);
    }

    let (socket, response) = connect_async(request)
        .await
        .with_context(|| format!("Failed to connect to {}", cli.url))?;
    let session_id = response
        .headers()
        .get("x-session-id")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("unknown")
        .to_string();
    info!(session_id = %session_id, "Connected to relay");

    let (mut sink, mut stream) = socket.split();

    // Print events until the relay closes the channel
    let reader = tokio::spawn(async move {
        let mut close: Option<(u16, String)> = None;
        while let Some(message) = stream.next().await {
            match message {
                Ok(Message::Text(text)) => match serde_json::from_str::<ClientEvent>(text.as_str()) {
                    Ok(event) => println!("[{}] {}", event.event, event.message),
                    Err(e) => warn!(error = %e, "Unexpected message from relay: {}", text.as_str()),
                },
                Ok(Message::Close(frame)) => {
                    close = frame.map(|f| (u16::from(f.code), f.reason.as_str().to_string()));
                    break;
                }
                Ok(other) => debug!(?other, "Ignoring message"),
                Err(e) => {
                    warn!(error = %e, "Relay connection error");
                    break;
                }
            }
        }
        close
    });

    let mut pacer = tokio::time::interval(Duration::from_millis(FRAME_DURATION_MS));
    let mut sent = 0usize;
    for frame in frames {
        if reader.is_finished() {
            warn!(sent, "Relay closed the session before the file was fully sent");
            break;
        }
        if !cli.no_pace {
            pacer.tick().await;
        }
        sink.send(Message::Binary(frame))
            .await
            .map_err(|e| anyhow!("Failed to send frame {sent}: {e}"))?;
        sent += 1;
    }
    info!(sent, "Finished streaming file");

    tokio::time::sleep(Duration::from_millis(cli.linger_ms)).await;

    let _ = sink
        .send(Message::Close(Some(CloseFrame {
            code: CloseCode::Normal,
            reason: "replay finished".into(),
        })))
        .await;

    match tokio::time::timeout(Duration::from_secs(5), reader).await {
        Ok(Ok(Some((code, reason)))) => info!(code, reason = %reason, "Relay closed the session"),
        Ok(Ok(None)) => info!("Relay connection ended"),
        Ok(Err(e)) => warn!(error = %e, "Event reader failed"),
        Err(_) => warn!("Timed out waiting for the relay to close"),
    }

    Ok(())
}
