//! Configuration module for the VAD relay server
//!
//! This module handles server configuration from various sources: .env files, YAML files,
//! and environment variables. Priority: YAML > ENV vars > .env values > defaults.
//!
//! # Modules
//! - `yaml`: YAML configuration file loading
//! - `env`: Environment variable loading
//! - `merge`: Merging YAML and environment configurations
//! - `validation`: Configuration validation logic
//!
//! # Example
//! ```rust,no_run
//! use vad_relay::config::ServerConfig;
//! use std::path::PathBuf;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // Load from environment variables only
//! let config = ServerConfig::from_env()?;
//!
//! // Load from YAML file with environment variable overrides
//! let config_path = PathBuf::from("config.yaml");
//! let config = ServerConfig::from_file(&config_path)?;
//!
//! println!("Server listening on {}", config.address());
//! # Ok(())
//! # }
//! ```

use std::path::PathBuf;
use std::time::Duration;

mod env;
mod merge;
mod validation;
mod yaml;

pub use yaml::YamlConfig;

use crate::core::backend::GrpcBackendConfig;
use crate::core::relay::RelaySettings;

/// Which browser origins may open a relay session
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum OriginPolicy {
    /// Any origin
    AllowAll,
    /// Only these origins (scheme://host[:port], compared case-insensitively)
    List(Vec<String>),
    /// The `Origin` host must match the `Host` header
    #[default]
    SameOrigin,
}

impl OriginPolicy {
    /// Parse `*`, a comma-separated origin list, or an empty value (same-origin)
    pub fn parse(value: &str) -> Self {
        let value = value.trim();
        if value.is_empty() {
            return Self::SameOrigin;
        }
        if value == "*" {
            return Self::AllowAll;
        }
        let origins: Vec<String> = value
            .split(',')
            .map(|o| o.trim().trim_end_matches('/').to_ascii_lowercase())
            .filter(|o| !o.is_empty())
            .collect();
        if origins.is_empty() {
            Self::SameOrigin
        } else {
            Self::List(origins)
        }
    }
}

/// Server configuration
///
/// Contains all configuration needed to run the relay, including:
/// - Listener settings (host, port, static directory, upgrade path)
/// - Backend settings (URL, service name, timeouts)
/// - Relay settings (buffer sizes, send and close timeouts)
/// - Security settings (origin policy, connection limits)
#[derive(Debug, Clone)]
pub struct ServerConfig {
    // Server settings
    pub host: String,
    pub port: u16,
    /// Directory served for any path that is not an API or upgrade route
    pub static_dir: PathBuf,
    /// Upgrade path for client sessions
    pub ws_path: String,

    // Backend settings
    pub backend_url: String,
    /// Fully-qualified gRPC service name
    pub backend_service: String,
    pub connect_timeout_ms: u64,
    pub reset_timeout_ms: u64,

    // Relay settings
    pub frame_buffer_size: usize,
    pub event_buffer_size: usize,
    /// Default: None (a slow client only suspends the outbound pump)
    pub client_send_timeout_ms: Option<u64>,
    pub close_timeout_ms: u64,

    // Security configuration
    pub allowed_origins: OriginPolicy,
    /// Maximum concurrent WebSocket connections
    /// Default: None (unlimited)
    pub max_websocket_connections: Option<usize>,
    /// Maximum connections per IP address
    /// Default: 100
    pub max_connections_per_ip: u32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            static_dir: PathBuf::from("./static"),
            ws_path: "/ws".to_string(),
            backend_url: "http://localhost:50055".to_string(),
            backend_service: crate::core::backend::DEFAULT_SERVICE.to_string(),
            connect_timeout_ms: 5000,
            reset_timeout_ms: 5000,
            frame_buffer_size: 64,
            event_buffer_size: 64,
            client_send_timeout_ms: None,
            close_timeout_ms: 2000,
            allowed_origins: OriginPolicy::SameOrigin,
            max_websocket_connections: None,
            max_connections_per_ip: 100,
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables (and defaults)
    ///
    /// The .env file is loaded in main.rs at startup, so its values are
    /// already visible as environment variables here.
    pub fn from_env() -> Result<Self, Box<dyn std::error::Error>> {
        let config = merge::merge_config(None)?;
        validation::validate(&config)?;
        Ok(config)
    }

    /// Load configuration from a YAML file with environment variable base
    ///
    /// Priority order (highest to lowest):
    /// 1. YAML file values
    /// 2. Environment variables (actual ENV vars override .env values)
    /// 3. .env file values
    /// 4. Default values
    ///
    /// After loading and merging, performs validation on the final configuration.
    ///
    /// # Errors
    /// Returns an error if:
    /// - The YAML file cannot be read or is malformed
    /// - Environment variables have invalid formats
    /// - Configuration validation fails
    pub fn from_file(path: &PathBuf) -> Result<Self, Box<dyn std::error::Error>> {
        let yaml_config = yaml::YamlConfig::from_file(path)?;
        let config = merge::merge_config(Some(yaml_config))?;
        validation::validate(&config)?;
        Ok(config)
    }

    /// Get the server address as a string
    ///
    /// Returns the address in the format "host:port"
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Settings for the per-session gRPC backend
    pub fn backend_config(&self) -> GrpcBackendConfig {
        GrpcBackendConfig {
            url: self.backend_url.clone(),
            service: self.backend_service.clone(),
            connect_timeout: Duration::from_millis(self.connect_timeout_ms),
            reset_timeout: Duration::from_millis(self.reset_timeout_ms),
            frame_buffer_size: self.frame_buffer_size,
            event_buffer_size: self.event_buffer_size,
        }
    }

    /// Timing policy applied to every relay session
    pub fn relay_settings(&self) -> RelaySettings {
        RelaySettings {
            client_send_timeout: self.client_send_timeout_ms.map(Duration::from_millis),
            close_timeout: Duration::from_millis(self.close_timeout_ms),
        }
    }
}
