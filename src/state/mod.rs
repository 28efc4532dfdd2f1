//! Shared application state
//!
//! Holds the configuration, the backend factory, the registry of live relay
//! sessions and the connection counters used by the connection limit
//! middleware. Sessions never share anything through this state besides
//! these counters and their own registry entry.

use std::net::IpAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use dashmap::DashMap;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::ServerConfig;
use crate::core::backend::{GrpcVadBackend, VadBackend};
use crate::core::relay::SessionHandle;

/// Why a connection slot could not be acquired
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionLimitError {
    GlobalLimitReached,
    PerIpLimitReached,
}

/// Global and per-IP connection counters
#[derive(Debug)]
pub struct ConnectionTracker {
    max_total: Option<usize>,
    max_per_ip: u32,
    total: AtomicUsize,
    per_ip: DashMap<IpAddr, u32>,
}

impl ConnectionTracker {
    pub fn new(max_total: Option<usize>, max_per_ip: u32) -> Self {
        Self {
            max_total,
            max_per_ip,
            total: AtomicUsize::new(0),
            per_ip: DashMap::new(),
        }
    }

    fn acquire(&self, ip: IpAddr) -> Result<(), ConnectionLimitError> {
        let max_total = self.max_total;
        self.total
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| match max_total {
                Some(max) if current >= max => None,
                _ => Some(current + 1),
            })
            .map_err(|_| ConnectionLimitError::GlobalLimitReached)?;

        let mut count = self.per_ip.entry(ip).or_insert(0);
        if *count >= self.max_per_ip {
            drop(count);
            self.total.fetch_sub(1, Ordering::AcqRel);
            return Err(ConnectionLimitError::PerIpLimitReached);
        }
        *count += 1;
        Ok(())
    }

    fn release(&self, ip: IpAddr) {
        self.total.fetch_sub(1, Ordering::AcqRel);
        // Drop the entry once the last connection from this IP is gone
        self.per_ip.remove_if_mut(&ip, |_, count| {
            *count = count.saturating_sub(1);
            *count == 0
        });
    }

    pub fn total(&self) -> usize {
        self.total.load(Ordering::Acquire)
    }

    pub fn for_ip(&self, ip: &IpAddr) -> u32 {
        self.per_ip.get(ip).map(|c| *c).unwrap_or(0)
    }
}

/// An acquired connection slot, released on drop
#[derive(Debug)]
pub struct ConnectionPermit {
    tracker: Arc<ConnectionTracker>,
    ip: IpAddr,
}

impl ConnectionPermit {
    pub fn ip(&self) -> IpAddr {
        self.ip
    }
}

impl Drop for ConnectionPermit {
    fn drop(&mut self) {
        self.tracker.release(self.ip);
    }
}

/// Application state shared by all handlers
pub struct AppState {
    pub config: ServerConfig,
    backend: Arc<dyn VadBackend>,
    sessions: DashMap<String, SessionHandle>,
    connections: Arc<ConnectionTracker>,
    shutdown: CancellationToken,
}

impl AppState {
    /// State backed by the gRPC backend described in `config`
    pub fn new(config: ServerConfig) -> Arc<Self> {
        let backend = Arc::new(GrpcVadBackend::new(config.backend_config()));
        Self::with_backend(config, backend)
    }

    /// State with an explicit backend
    pub fn with_backend(config: ServerConfig, backend: Arc<dyn VadBackend>) -> Arc<Self> {
        let connections = Arc::new(ConnectionTracker::new(
            config.max_websocket_connections,
            config.max_connections_per_ip,
        ));
        Arc::new(Self {
            config,
            backend,
            sessions: DashMap::new(),
            connections,
            shutdown: CancellationToken::new(),
        })
    }

    pub fn backend(&self) -> Arc<dyn VadBackend> {
        self.backend.clone()
    }

    pub fn try_acquire_connection(
        &self,
        ip: IpAddr,
    ) -> Result<ConnectionPermit, ConnectionLimitError> {
        self.connections.acquire(ip)?;
        Ok(ConnectionPermit {
            tracker: self.connections.clone(),
            ip,
        })
    }

    pub fn ws_connection_count(&self) -> usize {
        self.connections.total()
    }

    pub fn ip_connection_count(&self, ip: &IpAddr) -> u32 {
        self.connections.for_ip(ip)
    }

    pub fn register_session(&self, handle: SessionHandle) {
        self.sessions.insert(handle.id().to_string(), handle);
    }

    pub fn unregister_session(&self, id: &str) -> Option<SessionHandle> {
        self.sessions.remove(id).map(|(_, handle)| handle)
    }

    pub fn session(&self, id: &str) -> Option<SessionHandle> {
        self.sessions.get(id).map(|entry| entry.value().clone())
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Token cancelled once shutdown has begun
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Stop accepting sessions and cancel every live one.
    /// Returns the number of sessions that were asked to close.
    pub fn shutdown_sessions(&self) -> usize {
        self.shutdown.cancel();
        let handles: Vec<SessionHandle> = self
            .sessions
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        for handle in &handles {
            handle.shutdown();
        }
        if !handles.is_empty() {
            info!(sessions = handles.len(), "Cancelling live relay sessions");
        }
        handles.len()
    }

    /// Wait for every session registered at call time to reach `Closed`
    pub async fn wait_for_sessions(&self) {
        let handles: Vec<SessionHandle> = self
            .sessions
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        for handle in handles {
            handle.closed().await;
        }
    }
}
