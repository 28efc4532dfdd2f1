//! Origin policy for session upgrades
//!
//! Browsers always send `Origin` on WebSocket handshakes, so the check only
//! applies to upgrade requests. Requests without an `Origin` header (native
//! clients such as `vad-replay`) are allowed.

use axum::{
    body::Body,
    extract::State,
    http::{HeaderMap, Request, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::sync::Arc;

use crate::config::OriginPolicy;
use crate::errors::AppError;
use crate::state::AppState;

use super::connection_limit::is_websocket_upgrade;

/// Whether `origin` may connect given the policy and the request's `Host`
pub fn origin_allowed(policy: &OriginPolicy, origin: Option<&str>, host: Option<&str>) -> bool {
    let Some(origin) = origin else {
        return true;
    };

    match policy {
        OriginPolicy::AllowAll => true,
        OriginPolicy::List(allowed) => {
            let origin = origin.trim_end_matches('/').to_ascii_lowercase();
            allowed.iter().any(|a| *a == origin)
        }
        OriginPolicy::SameOrigin => {
            let (Ok(url), Some(host)) = (url::Url::parse(origin), host) else {
                return false;
            };
            let (Some(origin_host), Some(origin_port)) = (url.host_str(), url.port_or_known_default())
            else {
                return false;
            };
            let Some((host_name, host_port)) = split_authority(host) else {
                return false;
            };
            // A `Host` without a port means the default port of the origin's scheme
            let default_port = match url.scheme() {
                "http" | "ws" => Some(80),
                "https" | "wss" => Some(443),
                _ => None,
            };
            origin_host.eq_ignore_ascii_case(host_name)
                && host_port.or(default_port) == Some(origin_port)
        }
    }
}

/// Split a `Host` header value into host name and optional port.
/// IPv6 literals keep their brackets, matching `Url::host_str`.
fn split_authority(host: &str) -> Option<(&str, Option<u16>)> {
    let port_sep = match host.rfind(']') {
        Some(end) => host[end..].find(':').map(|i| end + i),
        None => host.rfind(':'),
    };
    match port_sep {
        Some(i) => Some((&host[..i], Some(host[i + 1..].parse().ok()?))),
        None => Some((host, None)),
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: header::HeaderName) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// Reject upgrade requests whose `Origin` the configured policy does not allow
pub async fn origin_middleware(
    State(state): State<Arc<AppState>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    if !is_websocket_upgrade(&request) {
        return next.run(request).await;
    }

    let headers = request.headers();
    let origin = header_str(headers, header::ORIGIN);
    let host = header_str(headers, header::HOST);

    if origin_allowed(&state.config.allowed_origins, origin, host) {
        return next.run(request).await;
    }

    let origin = origin.unwrap_or_default().to_string();
    tracing::warn!(origin = %origin, host = ?host, "Rejecting upgrade: origin not allowed");
    AppError::OriginRejected(origin).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_origin_is_allowed() {
        assert!(origin_allowed(&OriginPolicy::SameOrigin, None, Some("relay:8080")));
        assert!(origin_allowed(
            &OriginPolicy::List(vec!["https://app.example.com".into()]),
            None,
            None
        ));
    }

    #[test]
    fn test_allow_all() {
        assert!(origin_allowed(
            &OriginPolicy::AllowAll,
            Some("https://anything.example"),
            Some("relay:8080")
        ));
    }

    #[test]
    fn test_list() {
        let policy = OriginPolicy::parse("https://app.example.com, http://localhost:3000");
        assert!(origin_allowed(&policy, Some("https://APP.example.com"), None));
        assert!(origin_allowed(&policy, Some("http://localhost:3000"), None));
        assert!(!origin_allowed(&policy, Some("http://localhost:3001"), None));
        assert!(!origin_allowed(&policy, Some("null"), None));
    }

    #[test]
    fn test_same_origin() {
        let policy = OriginPolicy::SameOrigin;
        assert!(origin_allowed(
            &policy,
            Some("http://localhost:8080"),
            Some("localhost:8080")
        ));
        assert!(origin_allowed(
            &policy,
            Some("https://relay.example.com"),
            Some("relay.example.com:443")
        ));
        assert!(!origin_allowed(
            &policy,
            Some("http://evil.example:8080"),
            Some("localhost:8080")
        ));
        assert!(!origin_allowed(&policy, Some("http://localhost:8080"), None));
        assert!(!origin_allowed(&policy, Some("null"), Some("localhost:8080")));
    }

    #[test]
    fn test_same_origin_default_ports_follow_scheme() {
        let policy = OriginPolicy::SameOrigin;
        assert!(origin_allowed(&policy, Some("http://relay.local"), Some("relay.local")));
        assert!(origin_allowed(&policy, Some("http://relay.local"), Some("relay.local:80")));
        assert!(origin_allowed(&policy, Some("https://relay.local"), Some("relay.local")));
        assert!(origin_allowed(&policy, Some("https://relay.local:443"), Some("relay.local")));

        // Default port of the wrong scheme
        assert!(!origin_allowed(&policy, Some("http://relay.local"), Some("relay.local:443")));
        assert!(!origin_allowed(&policy, Some("https://relay.local"), Some("relay.local:80")));
        assert!(!origin_allowed(&policy, Some("http://relay.local:8080"), Some("relay.local")));
        assert!(!origin_allowed(&policy, Some("http://relay.local"), Some("relay.local:bad")));
    }

    #[test]
    fn test_same_origin_ipv6_host() {
        let policy = OriginPolicy::SameOrigin;
        assert!(origin_allowed(&policy, Some("http://[::1]:8080"), Some("[::1]:8080")));
        assert!(origin_allowed(&policy, Some("http://[::1]"), Some("[::1]")));
        assert!(!origin_allowed(&policy, Some("http://[::1]:8080"), Some("[::1]:9090")));
    }
}
