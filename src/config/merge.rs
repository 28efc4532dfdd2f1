use std::path::PathBuf;

use super::env::EnvConfig;
use super::yaml::YamlConfig;
use super::{OriginPolicy, ServerConfig};

/// Build the final configuration: defaults, then environment, then YAML.
pub fn merge_config(yaml: Option<YamlConfig>) -> Result<ServerConfig, Box<dyn std::error::Error>> {
    let env = EnvConfig::load()?;
    let yaml = yaml.unwrap_or_default();
    let defaults = ServerConfig::default();

    let server = yaml.server.unwrap_or_default();
    let backend = yaml.backend.unwrap_or_default();
    let relay = yaml.relay.unwrap_or_default();
    let security = yaml.security.unwrap_or_default();

    let allowed_origins = security
        .allowed_origins
        .or(env.allowed_origins)
        .map(|value| OriginPolicy::parse(&value))
        .unwrap_or(defaults.allowed_origins);

    Ok(ServerConfig {
        host: server.host.or(env.host).unwrap_or(defaults.host),
        port: server.port.or(env.port).unwrap_or(defaults.port),
        static_dir: server
            .static_dir
            .or(env.static_dir)
            .map(PathBuf::from)
            .unwrap_or(defaults.static_dir),
        ws_path: server.ws_path.or(env.ws_path).unwrap_or(defaults.ws_path),

        backend_url: backend
            .url
            .or(env.backend_url)
            .unwrap_or(defaults.backend_url),
        backend_service: backend
            .service
            .or(env.backend_service)
            .unwrap_or(defaults.backend_service),
        connect_timeout_ms: backend
            .connect_timeout_ms
            .or(env.connect_timeout_ms)
            .unwrap_or(defaults.connect_timeout_ms),
        reset_timeout_ms: backend
            .reset_timeout_ms
            .or(env.reset_timeout_ms)
            .unwrap_or(defaults.reset_timeout_ms),

        frame_buffer_size: relay
            .frame_buffer_size
            .or(env.frame_buffer_size)
            .unwrap_or(defaults.frame_buffer_size),
        event_buffer_size: relay
            .event_buffer_size
            .or(env.event_buffer_size)
            .unwrap_or(defaults.event_buffer_size),
        client_send_timeout_ms: relay
            .client_send_timeout_ms
            .or(env.client_send_timeout_ms)
            .or(defaults.client_send_timeout_ms),
        close_timeout_ms: relay
            .close_timeout_ms
            .or(env.close_timeout_ms)
            .unwrap_or(defaults.close_timeout_ms),

        allowed_origins,
        max_websocket_connections: security
            .max_websocket_connections
            .or(env.max_websocket_connections)
            .or(defaults.max_websocket_connections),
        max_connections_per_ip: security
            .max_connections_per_ip
            .or(env.max_connections_per_ip)
            .unwrap_or(defaults.max_connections_per_ip),
    })
}
