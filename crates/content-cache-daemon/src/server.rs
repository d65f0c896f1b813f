//! TCP server for cache tool requests
//!
//! Listens on loopback only. Each accepted connection waits for a permit from
//! the admission semaphore, reads one request frame under the read timeout,
//! dispatches it and writes one response frame.

use crate::error::Result;
use crate::protocol::{
    read_message_or_eof, write_frame, write_message, Request, Response, MAX_FRAME_BYTES,
};
use crate::tools::dispatch;
use crate::types::{DaemonConfig, ServerStats};
use chrono::{DateTime, Utc};
use file_content_cache::CacheService;
use std::future::Future;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio::time::{interval, timeout, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// Shared state for the daemon
pub struct ServerState {
    pub cache: CacheService,
    pub started_at: DateTime<Utc>,
    max_connections: usize,
    active: AtomicUsize,
    requests: AtomicU64,
    cache_hits: AtomicU64,
    errors: AtomicU64,
    response_micros: AtomicU64,
}

pub type SharedState = Arc<ServerState>;

impl ServerState {
    pub fn new(cache: CacheService, max_connections: usize) -> Self {
        Self {
            cache,
            started_at: Utc::now(),
            max_connections: max_connections.max(1),
            active: AtomicUsize::new(0),
            requests: AtomicU64::new(0),
            cache_hits: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            response_micros: AtomicU64::new(0),
        }
    }

    pub fn max_connections(&self) -> usize {
        self.max_connections
    }

    pub fn active_connections(&self) -> usize {
        self.active.load(Ordering::Relaxed)
    }

    fn enter(&self) -> ActiveConnection<'_> {
        self.active.fetch_add(1, Ordering::Relaxed);
        ActiveConnection(self)
    }

    /// Fold one answered request into the counters
    pub fn record(&self, response: &Response) {
        self.requests.fetch_add(1, Ordering::Relaxed);
        if response.cache_hit {
            self.cache_hits.fetch_add(1, Ordering::Relaxed);
        }
        if !response.success {
            self.errors.fetch_add(1, Ordering::Relaxed);
        }
        let micros = (response.execution_time * 1_000_000.0).round() as u64;
        self.response_micros.fetch_add(micros, Ordering::Relaxed);
    }

    pub fn stats(&self) -> ServerStats {
        let requests = self.requests.load(Ordering::Relaxed);
        let cache_hits = self.cache_hits.load(Ordering::Relaxed);
        let (hit_rate, avg_response_time) = if requests == 0 {
            (0.0, 0.0)
        } else {
            let total = self.response_micros.load(Ordering::Relaxed) as f64 / 1_000_000.0;
            (cache_hits as f64 / requests as f64, total / requests as f64)
        };
        ServerStats {
            active_connections: self.active_connections(),
            max_connections: self.max_connections,
            requests_served: requests,
            cache_hits,
            hit_rate,
            errors: self.errors.load(Ordering::Relaxed),
            avg_response_time,
            uptime_secs: (Utc::now() - self.started_at).num_seconds(),
        }
    }
}

/// Counts a connection as active until dropped
struct ActiveConnection<'a>(&'a ServerState);

impl Drop for ActiveConnection<'_> {
    fn drop(&mut self) {
        self.0.active.fetch_sub(1, Ordering::Relaxed);
    }
}

/// Per-connection timeouts
#[derive(Debug, Clone, Copy)]
pub struct ConnectionLimits {
    pub read_timeout: Duration,
    pub admission_timeout: Option<Duration>,
}

impl From<&DaemonConfig> for ConnectionLimits {
    fn from(config: &DaemonConfig) -> Self {
        Self {
            read_timeout: config.read_timeout,
            admission_timeout: config.admission_timeout,
        }
    }
}

/// Bind the loopback listener
pub async fn bind(port: u16) -> Result<TcpListener> {
    let addr = SocketAddr::from((Ipv4Addr::LOCALHOST, port));
    let listener = TcpListener::bind(addr).await?;
    info!("Listening on {}", addr);
    Ok(listener)
}

/// Accept connections until `shutdown` resolves
pub async fn serve<F>(
    listener: TcpListener,
    state: SharedState,
    limits: ConnectionLimits,
    shutdown: F,
) -> Result<()>
where
    F: Future<Output = ()>,
{
    let semaphore = Arc::new(Semaphore::new(state.max_connections()));
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("Shutdown signal received");
                break;
            }
            accepted = listener.accept() => {
                let (stream, peer) = match accepted {
                    Ok(conn) => conn,
                    Err(e) => {
                        warn!(error = %e, "Failed to accept connection");
                        continue;
                    }
                };
                let state = state.clone();
                let semaphore = semaphore.clone();
                tokio::spawn(async move {
                    handle_connection(stream, peer, state, semaphore, limits).await;
                });
            }
        }
    }

    semaphore.close();
    Ok(())
}

async fn handle_connection(
    mut stream: TcpStream,
    peer: SocketAddr,
    state: SharedState,
    semaphore: Arc<Semaphore>,
    limits: ConnectionLimits,
) {
    let acquired = match limits.admission_timeout {
        Some(wait) => match timeout(wait, semaphore.acquire_owned()).await {
            Ok(permit) => permit,
            Err(_) => {
                warn!(%peer, "Connection rejected, server busy");
                let response = Response::failure("server busy");
                state.record(&response);
                if let Err(e) = write_message(&mut stream, &response).await {
                    debug!(%peer, error = %e, "Failed to send busy response");
                }
                return;
            }
        },
        None => semaphore.acquire_owned().await,
    };
    // Closed only during shutdown
    let Ok(_permit) = acquired else {
        return;
    };
    let _active = state.enter();

    let read = timeout(limits.read_timeout, read_message_or_eof::<_, Request>(&mut stream));
    let response = match read.await {
        Err(_) => {
            warn!(%peer, "Timed out waiting for request");
            Response::failure(format!(
                "Timed out after {}s waiting for request",
                limits.read_timeout.as_secs()
            ))
        }
        Ok(Ok(None)) => {
            debug!(%peer, "Connection closed without a request");
            return;
        }
        Ok(Err(e)) => {
            warn!(%peer, error = %e, "Malformed request");
            Response::failure(e.to_string())
        }
        Ok(Ok(Some(request))) => {
            debug!(%peer, tool = %request.tool, "Handling request");
            dispatch(&state, request).await
        }
    };

    let (response, body) = encode_response(response);
    state.record(&response);
    if let Err(e) = write_frame(&mut stream, &body).await {
        debug!(%peer, error = %e, "Failed to send response");
    }
}

/// Serialize `response`, swapping in a failure when it cannot be framed
fn encode_response(response: Response) -> (Response, Vec<u8>) {
    let failure = match serde_json::to_vec(&response) {
        Ok(body) if body.len() <= MAX_FRAME_BYTES => return (response, body),
        Ok(body) => {
            warn!(bytes = body.len(), "Response exceeds frame limit");
            "response exceeds frame limit".to_string()
        }
        Err(e) => {
            error!(error = %e, "Failed to serialize response");
            format!("failed to serialize response: {}", e)
        }
    };

    let mut replacement = Response::failure(failure);
    replacement.execution_time = response.execution_time;
    // A bare failure is a few dozen bytes and always serializes
    let body = serde_json::to_vec(&replacement).unwrap_or_default();
    (replacement, body)
}

/// Run the memory governor every `every`
pub fn spawn_maintenance(state: SharedState, every: Duration) -> JoinHandle<()> {
    let every = every.max(Duration::from_secs(1));
    tokio::spawn(async move {
        let mut ticker = interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // First tick completes immediately
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let memory = state.cache.enforce_memory_limit();
            debug!(
                resident_bytes = memory.resident_bytes,
                memory_items = memory.memory_items,
                "Maintenance pass"
            );
        }
    })
}

/// Resolves on SIGINT, or SIGTERM on unix
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for ctrl-c: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
