//! Pid file and signal handling for the daemon process

use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Pid file that is removed again when dropped
#[derive(Debug)]
pub struct PidFile {
    path: PathBuf,
}

impl PidFile {
    /// Record the current process id at `path`
    pub fn create(path: &Path) -> io::Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, std::process::id().to_string())?;
        debug!(path = %path.display(), pid = std::process::id(), "Wrote pid file");
        Ok(Self {
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for PidFile {
    fn drop(&mut self) {
        // Leave a file that another daemon has since claimed
        if read_pid(&self.path) != Some(std::process::id() as i32) {
            return;
        }
        if let Err(e) = std::fs::remove_file(&self.path) {
            warn!(path = %self.path.display(), error = %e, "Failed to remove pid file");
        }
    }
}

/// Pid recorded at `path`, if the file exists and parses
pub fn read_pid(path: &Path) -> Option<i32> {
    std::fs::read_to_string(path)
        .ok()
        .and_then(|s| s.trim().parse::<i32>().ok())
        .filter(|pid| *pid > 0)
}

/// Whether a process with `pid` exists
pub fn is_alive(pid: i32) -> bool {
    if pid <= 0 {
        return false;
    }
    // Signal 0 performs the permission and existence checks only
    let rc = unsafe { libc::kill(pid, 0) };
    rc == 0 || io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}

/// Ask `pid` to shut down with SIGTERM
pub fn terminate(pid: i32) -> io::Result<()> {
    if pid <= 0 {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("invalid pid {}", pid),
        ));
    }
    let rc = unsafe { libc::kill(pid, libc::SIGTERM) };
    if rc == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

/// Live daemon pid from `path`; a stale file is removed
pub fn running_daemon(path: &Path) -> Option<i32> {
    let pid = read_pid(path)?;
    if is_alive(pid) {
        return Some(pid);
    }
    debug!(path = %path.display(), pid, "Removing stale pid file");
    let _ = std::fs::remove_file(path);
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    // Above the kernel's pid_max ceiling
    const UNUSED_PID: i32 = 999_999_999;

    #[test]
    fn test_pid_file_written_and_removed() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("nested").join("daemon.pid");

        let pid_file = PidFile::create(&path).unwrap();
        assert_eq!(pid_file.path(), path.as_path());
        assert_eq!(read_pid(&path), Some(std::process::id() as i32));

        drop(pid_file);
        assert!(!path.exists());
    }

    #[test]
    fn test_pid_file_claimed_by_other_process_kept() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("daemon.pid");

        let pid_file = PidFile::create(&path).unwrap();
        std::fs::write(&path, "1").unwrap();
        drop(pid_file);
        assert_eq!(read_pid(&path), Some(1));
    }

    #[test]
    fn test_read_pid_rejects_garbage() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("daemon.pid");
        assert_eq!(read_pid(&path), None);

        std::fs::write(&path, "not a pid").unwrap();
        assert_eq!(read_pid(&path), None);

        std::fs::write(&path, " 4242\n").unwrap();
        assert_eq!(read_pid(&path), Some(4242));
    }

    #[test]
    fn test_liveness() {
        assert!(is_alive(std::process::id() as i32));
        assert!(!is_alive(UNUSED_PID));
        assert!(!is_alive(0));
        assert!(!is_alive(-1));
    }

    #[test]
    fn test_stale_pid_file_removed() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("daemon.pid");
        std::fs::write(&path, UNUSED_PID.to_string()).unwrap();

        assert_eq!(running_daemon(&path), None);
        assert!(!path.exists());
    }

    #[test]
    fn test_running_daemon_found() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("daemon.pid");
        let _pid_file = PidFile::create(&path).unwrap();
        assert_eq!(running_daemon(&path), Some(std::process::id() as i32));
    }

    #[test]
    fn test_terminate_unknown_pid_fails() {
        assert!(terminate(UNUSED_PID).is_err());
        assert!(terminate(0).is_err());
    }
}
