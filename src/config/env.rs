use std::str::FromStr;

/// Configuration values read from the process environment.
///
/// Every field is optional; unset variables fall through to defaults during
/// merging. Values from a .env file are visible here because `dotenvy` loads
/// them into the environment at startup.
#[derive(Debug, Clone, Default)]
pub struct EnvConfig {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub static_dir: Option<String>,
    pub ws_path: Option<String>,

    pub backend_url: Option<String>,
    pub backend_service: Option<String>,
    pub connect_timeout_ms: Option<u64>,
    pub reset_timeout_ms: Option<u64>,

    pub frame_buffer_size: Option<usize>,
    pub event_buffer_size: Option<usize>,
    pub client_send_timeout_ms: Option<u64>,
    pub close_timeout_ms: Option<u64>,

    pub allowed_origins: Option<String>,
    pub max_websocket_connections: Option<usize>,
    pub max_connections_per_ip: Option<u32>,
}

impl EnvConfig {
    pub fn load() -> Result<Self, Box<dyn std::error::Error>> {
        Ok(Self {
            host: env_string("HOST"),
            port: env_parse("PORT")?,
            static_dir: env_string("STATIC_DIR"),
            ws_path: env_string("WS_PATH"),

            backend_url: env_string("VAD_BACKEND_URL"),
            backend_service: env_string("VAD_BACKEND_SERVICE"),
            connect_timeout_ms: env_parse("VAD_CONNECT_TIMEOUT_MS")?,
            reset_timeout_ms: env_parse("VAD_RESET_TIMEOUT_MS")?,

            frame_buffer_size: env_parse("FRAME_BUFFER_SIZE")?,
            event_buffer_size: env_parse("EVENT_BUFFER_SIZE")?,
            client_send_timeout_ms: env_parse("CLIENT_SEND_TIMEOUT_MS")?,
            close_timeout_ms: env_parse("CLOSE_TIMEOUT_MS")?,

            allowed_origins: env_string("ALLOWED_ORIGINS"),
            max_websocket_connections: env_parse("MAX_WEBSOCKET_CONNECTIONS")?,
            max_connections_per_ip: env_parse("MAX_CONNECTIONS_PER_IP")?,
        })
    }
}

/// Non-empty, trimmed value of an environment variable
fn env_string(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn env_parse<T>(name: &str) -> Result<Option<T>, Box<dyn std::error::Error>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env_string(name) {
        Some(value) => value
            .parse::<T>()
            .map(Some)
            .map_err(|e| format!("Invalid value for {name} ({value}): {e}").into()),
        None => Ok(None),
    }
}
