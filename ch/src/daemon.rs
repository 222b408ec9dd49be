//! Background daemon bookkeeping
//!
//! The running daemon is described by one JSON state file holding its pid and
//! the version it was built from. Starting spawns `chorus run-daemon`; stopping
//! sends SIGTERM and escalates to SIGKILL after a grace period.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

use eyre::{Context, Result, eyre};
use nix::errno::Errno;
use nix::sys::signal::{Signal, kill};
use nix::unistd::Pid;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// Crate version, recorded by the running daemon
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// How long `stop` waits after SIGTERM before SIGKILL
pub const STOP_GRACE: Duration = Duration::from_secs(10);

const STOP_POLL: Duration = Duration::from_millis(100);

fn runtime_dir() -> PathBuf {
    dirs::runtime_dir()
        .or_else(dirs::data_local_dir)
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join("chorus")
}

/// Contents of the daemon state file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct DaemonRecord {
    pub pid: u32,
    pub version: String,
    /// Unix seconds
    pub started_at: u64,
}

/// What `chorus daemon status` reports
#[derive(Debug)]
pub struct DaemonStatus {
    /// Set only while the recorded process is alive
    pub record: Option<DaemonRecord>,
    pub state_file: PathBuf,
}

#[derive(Debug)]
pub struct DaemonManager {
    state_file: PathBuf,
}

impl Default for DaemonManager {
    fn default() -> Self {
        Self::new()
    }
}

impl DaemonManager {
    pub fn new() -> Self {
        Self::with_state_file(runtime_dir().join("daemon.json"))
    }

    pub fn with_state_file(state_file: PathBuf) -> Self {
        debug!(?state_file, "DaemonManager::with_state_file: called");
        Self { state_file }
    }

    pub fn state_file(&self) -> &Path {
        &self.state_file
    }

    fn read(&self) -> Option<DaemonRecord> {
        let raw = fs::read_to_string(&self.state_file).ok()?;
        match serde_json::from_str(&raw) {
            Ok(record) => Some(record),
            Err(e) => {
                warn!(path = ?self.state_file, error = %e, "Ignoring unreadable daemon state file");
                None
            }
        }
    }

    fn write(&self, record: &DaemonRecord) -> Result<()> {
        if let Some(parent) = self.state_file.parent() {
            fs::create_dir_all(parent).context("Failed to create daemon state directory")?;
        }
        let json = serde_json::to_string_pretty(record)?;
        fs::write(&self.state_file, json).context("Failed to write daemon state file")?;
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        match fs::remove_file(&self.state_file) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).context("Failed to remove daemon state file"),
        }
    }

    /// Record of the daemon whose process is still alive
    pub fn running(&self) -> Option<DaemonRecord> {
        self.read().filter(|r| is_process_running(r.pid))
    }

    pub fn is_running(&self) -> bool {
        self.running().is_some()
    }

    /// Spawn `chorus run-daemon` detached from this terminal
    pub fn start(&self, config_path: Option<&Path>) -> Result<u32> {
        debug!(?config_path, "DaemonManager::start: called");
        if let Some(record) = self.running() {
            return Err(eyre!("Daemon already running with PID {}", record.pid));
        }

        let exe = std::env::current_exe().context("Failed to locate chorus executable")?;
        let mut cmd = Command::new(exe);
        cmd.arg("run-daemon");
        if let Some(path) = config_path {
            cmd.arg("--config").arg(path);
        }
        cmd.stdin(Stdio::null()).stdout(Stdio::null()).stderr(Stdio::null());
        let child = cmd.spawn().context("Failed to spawn daemon process")?;

        // The daemon overwrites this with its own record once it is up
        self.write(&DaemonRecord::new(child.id()))?;
        info!(pid = child.id(), "Daemon spawned");
        Ok(child.id())
    }

    /// SIGTERM the daemon; SIGKILL it if still alive after `grace`
    ///
    /// Job processes run in their own process groups and are not signalled.
    pub fn stop(&self, grace: Duration) -> Result<()> {
        let record = self.running().ok_or_else(|| eyre!("Daemon is not running"))?;
        let pid = record.pid;
        info!(pid, ?grace, "Stopping daemon");
        send_signal(pid, Signal::SIGTERM)?;

        let deadline = Instant::now() + grace;
        while is_process_running(pid) && Instant::now() < deadline {
            std::thread::sleep(STOP_POLL);
        }

        if is_process_running(pid) {
            warn!(pid, "Daemon ignored SIGTERM, killing it");
            send_signal(pid, Signal::SIGKILL)?;
        }

        self.clear()?;
        info!(pid, "Daemon stopped");
        Ok(())
    }

    /// Record the current process as the daemon
    pub fn register_self(&self) -> Result<()> {
        let record = DaemonRecord::new(std::process::id());
        self.write(&record)?;
        info!(pid = record.pid, version = %record.version, "Daemon registered");
        Ok(())
    }

    /// Drop the state file if it still names this process
    pub fn unregister(&self) -> Result<()> {
        match self.read() {
            Some(record) if record.pid == std::process::id() => self.clear(),
            _ => Ok(()),
        }
    }

    pub fn status(&self) -> DaemonStatus {
        DaemonStatus {
            record: self.running(),
            state_file: self.state_file.clone(),
        }
    }
}

impl DaemonRecord {
    fn new(pid: u32) -> Self {
        let started_at = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default();
        Self {
            pid,
            version: VERSION.to_string(),
            started_at,
        }
    }

    pub fn version_matches(&self) -> bool {
        self.version == VERSION
    }
}

fn send_signal(pid: u32, signal: Signal) -> Result<()> {
    match kill(Pid::from_raw(pid as i32), signal) {
        Ok(()) | Err(Errno::ESRCH) => Ok(()),
        Err(e) => Err(eyre!("Failed to send {} to {}: {}", signal, pid, e)),
    }
}

/// Whether `pid` names a live process (signal 0)
pub(crate) fn is_process_running(pid: u32) -> bool {
    kill(Pid::from_raw(pid as i32), None).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn manager(temp: &TempDir) -> DaemonManager {
        DaemonManager::with_state_file(temp.path().join("daemon.json"))
    }

    #[test]
    fn test_not_running_without_state_file() {
        let temp = TempDir::new().unwrap();
        let manager = manager(&temp);
        assert!(!manager.is_running());
        assert!(manager.status().record.is_none());
    }

    #[test]
    fn test_register_and_unregister_self() {
        let temp = TempDir::new().unwrap();
        let manager = manager(&temp);

        manager.register_self().unwrap();
        let record = manager.running().unwrap();
        assert_eq!(record.pid, std::process::id());
        assert!(record.version_matches());

        manager.unregister().unwrap();
        assert!(!manager.state_file().exists());
    }

    #[test]
    fn test_dead_pid_is_not_running() {
        let temp = TempDir::new().unwrap();
        let manager = manager(&temp);
        let mut gone = std::process::Command::new("true").spawn().unwrap();
        gone.wait().unwrap();
        manager.write(&DaemonRecord::new(gone.id())).unwrap();

        assert!(!manager.is_running());
        assert!(manager.stop(Duration::from_millis(10)).is_err());
    }

    #[test]
    fn test_unregister_leaves_other_daemons_record() {
        let temp = TempDir::new().unwrap();
        let manager = manager(&temp);
        let other = DaemonRecord {
            pid: std::process::id() + 1,
            version: "0.0.0-other".to_string(),
            started_at: 0,
        };
        manager.write(&other).unwrap();

        manager.unregister().unwrap();
        assert_eq!(manager.read(), Some(other.clone()));
        assert!(!other.version_matches());
    }

    #[test]
    fn test_corrupt_state_file_is_ignored() {
        let temp = TempDir::new().unwrap();
        let manager = manager(&temp);
        fs::write(manager.state_file(), "pid=12").unwrap();
        assert!(manager.read().is_none());
    }

    #[test]
    fn test_stop_terminates_process() {
        let temp = TempDir::new().unwrap();
        let manager = manager(&temp);
        let mut child = std::process::Command::new("sleep").arg("30").spawn().unwrap();
        manager.write(&DaemonRecord::new(child.id())).unwrap();
        let reaper = std::thread::spawn(move || child.wait());

        manager.stop(Duration::from_secs(5)).unwrap();
        assert!(!reaper.join().unwrap().unwrap().success());
        assert!(!manager.state_file().exists());
    }
}
