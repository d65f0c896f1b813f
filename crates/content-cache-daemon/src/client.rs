//! Client side of the daemon: locate or launch it, then send one request

use crate::error::{DaemonError, Result};
use crate::process::{running_daemon, terminate};
use crate::protocol::{read_message, write_message, Request, Response};
use crate::types::DaemonConfig;
use serde_json::Value;
use std::net::{Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::{sleep, timeout};
use tracing::{debug, info};

const START_POLL_INTERVAL: Duration = Duration::from_millis(500);
const START_POLL_ATTEMPTS: u32 = 10;

pub struct CacheClient {
    config: DaemonConfig,
    /// Binary launched as `<program> daemon`; the current executable by default
    program: Option<PathBuf>,
}

impl CacheClient {
    pub fn new(config: DaemonConfig) -> Self {
        Self {
            config,
            program: None,
        }
    }

    pub fn with_program(mut self, program: impl Into<PathBuf>) -> Self {
        self.program = Some(program.into());
        self
    }

    fn addr(&self) -> SocketAddr {
        SocketAddr::from((Ipv4Addr::LOCALHOST, self.config.port))
    }

    /// Pid of a live daemon, if the pid file names one
    pub fn daemon_pid(&self) -> Option<i32> {
        running_daemon(&self.config.pid_file)
    }

    /// Send `tool` to the daemon, starting it first if needed
    pub async fn call(&self, tool: &str, params: Value) -> Result<Response> {
        self.ensure_running().await?;
        self.request(tool, params).await
    }

    /// Send `tool` to whatever listens on the configured port
    pub async fn request(&self, tool: &str, params: Value) -> Result<Response> {
        let addr = self.addr();
        let mut stream = TcpStream::connect(addr).await.map_err(|e| {
            DaemonError::Unavailable(format!("cannot connect to {}: {}", addr, e))
        })?;

        let request = Request::new(tool, params);
        write_message(&mut stream, &request).await?;

        match timeout(self.config.read_timeout, read_message(&mut stream)).await {
            Ok(response) => response,
            Err(_) => Err(DaemonError::Unavailable(format!(
                "no response from {} within {}s",
                addr,
                self.config.read_timeout.as_secs()
            ))),
        }
    }

    /// Start the daemon unless a live one is recorded, then wait until it accepts connections
    pub async fn ensure_running(&self) -> Result<()> {
        if self.daemon_pid().is_some() && self.accepting().await {
            return Ok(());
        }

        self.spawn_daemon()?;
        for attempt in 1..=START_POLL_ATTEMPTS {
            sleep(START_POLL_INTERVAL).await;
            if self.daemon_pid().is_some() && self.accepting().await {
                debug!(attempt, "Daemon is up");
                return Ok(());
            }
        }

        Err(DaemonError::Unavailable(format!(
            "daemon did not start within {}ms",
            START_POLL_INTERVAL.as_millis() * START_POLL_ATTEMPTS as u128
        )))
    }

    /// SIGTERM the recorded daemon; false when none was running
    pub fn stop(&self) -> Result<bool> {
        let Some(pid) = self.daemon_pid() else {
            return Ok(false);
        };
        terminate(pid)?;
        info!(pid, "Sent SIGTERM to daemon");
        Ok(true)
    }

    async fn accepting(&self) -> bool {
        TcpStream::connect(self.addr()).await.is_ok()
    }

    fn spawn_daemon(&self) -> Result<()> {
        let program = match &self.program {
            Some(program) => program.clone(),
            None => std::env::current_exe()?,
        };

        let mut command = std::process::Command::new(&program);
        command
            .arg("--cache-dir")
            .arg(&self.config.cache_dir)
            .arg("--port")
            .arg(self.config.port.to_string())
            .arg("--pid-file")
            .arg(&self.config.pid_file)
            .arg("daemon")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        // Own process group, out of reach of terminal job control
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            command.process_group(0);
        }

        let child = command.spawn()?;
        info!(
            program = %program.display(),
            pid = child.id(),
            port = self.config.port,
            "Started cache daemon"
        );
        Ok(())
    }
}
