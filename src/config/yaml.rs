use serde::Deserialize;
use std::path::PathBuf;

/// Complete YAML configuration structure
///
/// All fields are optional to allow partial configuration. Values present
/// here override environment variables.
///
/// # Example YAML structure
/// ```yaml
/// server:
///   host: "0.0.0.0"
///   port: 8080
///   static_dir: "./static"
///   ws_path: "/ws"
///
/// backend:
///   url: "http://localhost:50055"
///   service: "vad.VADService"
///   connect_timeout_ms: 5000
///   reset_timeout_ms: 5000
///
/// relay:
///   frame_buffer_size: 64
///   event_buffer_size: 64
///   client_send_timeout_ms: 2000
///   close_timeout_ms: 2000
///
/// security:
///   allowed_origins: "https://app.example.com,http://localhost:3000"
///   max_websocket_connections: 1000
///   max_connections_per_ip: 100
/// ```
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct YamlConfig {
    pub server: Option<ServerYaml>,
    pub backend: Option<BackendYaml>,
    pub relay: Option<RelayYaml>,
    pub security: Option<SecurityYaml>,
}

/// Server configuration from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct ServerYaml {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub static_dir: Option<String>,
    pub ws_path: Option<String>,
}

/// VAD backend configuration from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct BackendYaml {
    pub url: Option<String>,
    pub service: Option<String>,
    pub connect_timeout_ms: Option<u64>,
    pub reset_timeout_ms: Option<u64>,
}

/// Relay session tuning from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct RelayYaml {
    pub frame_buffer_size: Option<usize>,
    pub event_buffer_size: Option<usize>,
    pub client_send_timeout_ms: Option<u64>,
    pub close_timeout_ms: Option<u64>,
}

/// Security configuration from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct SecurityYaml {
    /// "*", a comma-separated list of origins, or absent for same-origin
    pub allowed_origins: Option<String>,
    pub max_websocket_connections: Option<usize>,
    pub max_connections_per_ip: Option<u32>,
}

impl YamlConfig {
    pub fn from_file(path: &PathBuf) -> Result<Self, Box<dyn std::error::Error>> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| format!("Failed to read config file {}: {e}", path.display()))?;

        let config: YamlConfig = serde_yaml::from_str(&contents)
            .map_err(|e| format!("Failed to parse YAML config: {e}"))?;

        Ok(config)
    }
}
