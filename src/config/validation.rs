use super::ServerConfig;

/// Validate the merged configuration
pub fn validate(config: &ServerConfig) -> Result<(), Box<dyn std::error::Error>> {
    validate_server(config)?;
    validate_backend(config)?;
    validate_relay(config)?;
    Ok(())
}

fn validate_server(config: &ServerConfig) -> Result<(), Box<dyn std::error::Error>> {
    if config.port == 0 {
        return Err("port must be non-zero".into());
    }
    if !config.ws_path.starts_with('/') || config.ws_path == "/" {
        return Err(format!(
            "ws_path must start with '/' and must not be the root path (got '{}')",
            config.ws_path
        )
        .into());
    }
    Ok(())
}

fn validate_backend(config: &ServerConfig) -> Result<(), Box<dyn std::error::Error>> {
    let url = url::Url::parse(&config.backend_url)
        .map_err(|e| format!("Invalid backend URL '{}': {e}", config.backend_url))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(format!(
            "Backend URL must use http or https (got '{}')",
            url.scheme()
        )
        .into());
    }

    let service = config.backend_service.trim();
    if service.is_empty() || service.contains('/') {
        return Err(format!(
            "Backend service must be a non-empty name without '/' (got '{}')",
            config.backend_service
        )
        .into());
    }

    if config.connect_timeout_ms == 0 {
        return Err("connect_timeout_ms must be greater than zero".into());
    }
    if config.reset_timeout_ms == 0 {
        return Err("reset_timeout_ms must be greater than zero".into());
    }
    Ok(())
}

fn validate_relay(config: &ServerConfig) -> Result<(), Box<dyn std::error::Error>> {
    if config.frame_buffer_size == 0 {
        return Err("frame_buffer_size must be greater than zero".into());
    }
    if config.event_buffer_size == 0 {
        return Err("event_buffer_size must be greater than zero".into());
    }
    if config.client_send_timeout_ms == Some(0) {
        return Err("client_send_timeout_ms must be greater than zero when set".into());
    }
    if config.close_timeout_ms == 0 {
        return Err("close_timeout_ms must be greater than zero".into());
    }
    Ok(())
}
