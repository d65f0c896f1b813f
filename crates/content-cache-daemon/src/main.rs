//! content-cache - file content cache daemon and command-line client
//!
//! `content-cache daemon` runs the server in the foreground. Every other
//! subcommand sends one tool request, starting the daemon first if needed.

use clap::{Parser, Subcommand};
use content_cache_daemon::{
    bind, running_daemon, serve, shutdown_signal, spawn_maintenance, CacheClient,
    ConnectionLimits, DaemonConfig, DaemonError, PidFile, Result, ServerState,
};
use file_content_cache::{CacheConfig, CacheService};
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::{prelude::*, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "content-cache", version, about = "File content cache daemon and client")]
struct Cli {
    /// Cache root directory (overrides CACHE_DIR)
    #[arg(long, global = true)]
    cache_dir: Option<PathBuf>,

    /// Loopback port of the daemon (overrides PORT)
    #[arg(long, global = true)]
    port: Option<u16>,

    /// Daemon pid file (overrides PID_FILE)
    #[arg(long, global = true)]
    pid_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the daemon in the foreground
    Daemon {
        #[arg(long)]
        max_connections: Option<usize>,
        #[arg(long)]
        read_timeout_secs: Option<u64>,
        /// Reject connections that wait longer than this for a slot
        #[arg(long)]
        admission_timeout_ms: Option<u64>,
    },
    /// Pre-populate the cache from glob patterns
    Warm {
        #[arg(required = true)]
        patterns: Vec<String>,
    },
    /// Fetch one file through the cache
    File {
        path: PathBuf,
        /// Include the file content in the response
        #[arg(long)]
        content: bool,
    },
    /// Show server, cache, compression and memory statistics
    Stats,
    /// Check daemon and storage health
    Health,
    /// Remove cached entries
    Clear {
        #[arg(long)]
        confirm: bool,
        /// Only remove entries cached longer ago than this, e.g. `7d`
        #[arg(long)]
        older_than: Option<String>,
    },
    /// Forget everything cached for one file
    Invalidate { path: PathBuf },
    /// Drop records of deleted files and unreferenced blobs
    Cleanup,
    /// Stop a running daemon
    Stop,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(matches!(cli.command, Command::Daemon { .. }))?;

    let mut config = DaemonConfig::from_env();
    if let Some(cache_dir) = cli.cache_dir {
        config.cache_dir = cache_dir;
    }
    if let Some(port) = cli.port {
        config.port = port;
    }
    if let Some(pid_file) = cli.pid_file {
        config.pid_file = pid_file;
    }

    let (tool, params) = match cli.command {
        Command::Daemon {
            max_connections,
            read_timeout_secs,
            admission_timeout_ms,
        } => {
            if let Some(n) = max_connections.filter(|n| *n > 0) {
                config.max_connections = n;
            }
            if let Some(secs) = read_timeout_secs.filter(|s| *s > 0) {
                config.read_timeout = Duration::from_secs(secs);
            }
            if let Some(ms) = admission_timeout_ms {
                config.admission_timeout = Some(Duration::from_millis(ms));
            }
            return run_daemon(config).await;
        }
        Command::Stop => {
            let client = CacheClient::new(config);
            if client.stop()? {
                println!("Daemon stopping");
            } else {
                println!("Daemon not running");
            }
            return Ok(());
        }
        Command::Warm { patterns } => {
            let cwd = std::env::current_dir()?;
            let patterns: Vec<String> = patterns
                .iter()
                .map(|p| absolute(&cwd, Path::new(p)).to_string_lossy().into_owned())
                .collect();
            ("cache_warm", json!({ "patterns": patterns }))
        }
        Command::File { path, content } => {
            let path = absolute(&std::env::current_dir()?, &path);
            (
                "cache_file",
                json!({ "file_path": path.to_string_lossy(), "include_content": content }),
            )
        }
        Command::Stats => ("cache_stats", json!({})),
        Command::Health => ("cache_health", json!({})),
        Command::Clear {
            confirm,
            older_than,
        } => {
            let mut params = json!({ "confirm": confirm });
            if let Some(age) = older_than {
                params["older_than"] = Value::String(age);
            }
            ("cache_clear", params)
        }
        Command::Invalidate { path } => {
            let path = absolute(&std::env::current_dir()?, &path);
            ("cache_invalidate", json!({ "file_path": path.to_string_lossy() }))
        }
        Command::Cleanup => ("cache_cleanup", json!({})),
    };

    let client = CacheClient::new(config);
    let response = client.call(tool, params).await?;
    println!("{}", serde_json::to_string_pretty(&response)?);
    if !response.success {
        std::process::exit(1);
    }
    Ok(())
}

fn init_logging(daemon: bool) -> Result<()> {
    let env_filter = EnvFilter::from_default_env()
        .add_directive("content_cache_daemon=info".parse()?)
        .add_directive("file_content_cache=info".parse()?);

    // Use JSON format for GCP Cloud Logging when LOG_FORMAT=json
    if std::env::var("LOG_FORMAT")
        .map(|v| v == "json")
        .unwrap_or(false)
    {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_stackdriver::layer())
            .init();
    } else if daemon {
        tracing_subscriber::fmt().with_env_filter(env_filter).init();
    } else {
        // Stdout carries the JSON response
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_writer(std::io::stderr)
            .init();
    }
    Ok(())
}

fn absolute(cwd: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        cwd.join(path)
    }
}

async fn run_daemon(config: DaemonConfig) -> Result<()> {
    info!("Starting content cache daemon...");
    info!("Port: {}", config.port);
    info!("Cache dir: {:?}", config.cache_dir);
    info!("Max connections: {}", config.max_connections);

    if let Some(pid) = running_daemon(&config.pid_file) {
        if pid != std::process::id() as i32 {
            return Err(DaemonError::Config(format!(
                "daemon already running with pid {}",
                pid
            )));
        }
    }

    let cache_config = CacheConfig::load(&config.cache_dir)?;
    let maintenance_every = cache_config.gc_interval();
    let cache = CacheService::open(cache_config).await?;
    if let Err(e) = cache.purge_expired().await {
        warn!("Failed to purge expired entries: {}", e);
    }

    let listener = bind(config.port).await?;
    let _pid_file = PidFile::create(&config.pid_file)?;

    let state = Arc::new(ServerState::new(cache, config.max_connections));
    let maintenance = spawn_maintenance(state.clone(), maintenance_every);

    serve(
        listener,
        state.clone(),
        ConnectionLimits::from(&config),
        shutdown_signal(),
    )
    .await?;

    maintenance.abort();
    state.cache.close().await;
    info!("Daemon stopped");
    Ok(())
}
