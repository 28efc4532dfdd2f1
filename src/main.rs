use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::anyhow;
use clap::Parser;
use tokio::net::TcpListener;
use tracing::{info, warn};

use vad_relay::{ServerConfig, routes, state::AppState};

/// VAD relay - bridges browser audio frames to a streaming VAD backend
#[derive(Parser, Debug)]
#[command(name = "vad-relay")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to configuration file (YAML)
    #[arg(short = 'c', long = "config", value_name = "FILE")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if it exists (must be done before config loading)
    let _ = dotenvy::dotenv();

    // Initialize tracing
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    // Load configuration from file or environment
    let config = if let Some(config_path) = cli.config {
        info!("Loading configuration from {}", config_path.display());
        ServerConfig::from_file(&config_path).map_err(|e| anyhow!(e.to_string()))?
    } else {
        ServerConfig::from_env().map_err(|e| anyhow!(e.to_string()))?
    };

    let address = config.address();
    let close_timeout = Duration::from_millis(config.close_timeout_ms);
    info!(
        ws_path = %config.ws_path,
        static_dir = %config.static_dir.display(),
        backend = %config.backend_url,
        "Starting server on {address}"
    );

    let app_state = AppState::new(config);
    let app = routes::create_app(app_state.clone());

    let socket_addr: SocketAddr = address
        .parse()
        .map_err(|e| anyhow!("Invalid server address '{}': {}", address, e))?;

    let listener = TcpListener::bind(&socket_addr).await?;
    info!("Server listening on http://{}", socket_addr);

    let shutdown_state = app_state.clone();
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for shutdown signal");
            std::future::pending::<()>().await;
        }
        info!("Shutdown signal received");
        shutdown_state.shutdown_sessions();
    })
    .await?;

    // Sessions close both legs on their own; bound the wait
    let grace = close_timeout * 2;
    if tokio::time::timeout(grace, app_state.wait_for_sessions())
        .await
        .is_err()
    {
        warn!(
            remaining = app_state.session_count(),
            "Sessions still closing after shutdown grace period"
        );
    }

    info!("Server stopped");
    Ok(())
}
