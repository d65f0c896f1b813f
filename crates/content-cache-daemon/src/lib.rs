//! Daemon and client for the file content cache
//!
//! The daemon owns one `CacheService` and answers tool requests framed as
//! length-prefixed JSON over a loopback TCP socket. The client finds or
//! launches the daemon through its pid file and forwards single requests.

pub mod client;
pub mod error;
pub mod process;
pub mod protocol;
pub mod server;
pub mod tools;
pub mod types;

pub use client::CacheClient;
pub use error::{DaemonError, Result};
pub use process::{is_alive, read_pid, running_daemon, terminate, PidFile};
pub use protocol::{Request, Response, MAX_FRAME_BYTES};
pub use server::{
    bind, serve, shutdown_signal, spawn_maintenance, ConnectionLimits, ServerState, SharedState,
};
pub use tools::dispatch;
pub use types::{
    default_pid_file, DaemonConfig, HealthReport, HealthStatus, ServerStats, StatsReport,
};
