use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

/// A running instance of the application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessHandle {
    pub pid: u32,
}

/// Finding, stopping and starting application processes.
#[async_trait]
pub trait ProcessControl: Send + Sync {
    /// Processes running from `app_dir`. Best effort: failures yield none.
    async fn find_running_instances(&self, app_dir: &Path) -> Vec<ProcessHandle>;

    /// Ask `handle` to exit and wait up to `timeout`. Returns whether it
    /// exited.
    async fn request_exit(&self, handle: &ProcessHandle, timeout: Duration) -> bool;

    /// Start `exe` detached.
    async fn relaunch(&self, exe: &Path, args: &[String]) -> std::io::Result<()>;
}

/// Leaves processes alone.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoProcesses;

#[async_trait]
impl ProcessControl for NoProcesses {
    async fn find_running_instances(&self, _app_dir: &Path) -> Vec<ProcessHandle> {
        Vec::new()
    }

    async fn request_exit(&self, _handle: &ProcessHandle, _timeout: Duration) -> bool {
        true
    }

    async fn relaunch(&self, _exe: &Path, _args: &[String]) -> std::io::Result<()> {
        Ok(())
    }
}

/// Operating system processes: `pgrep -f` to find, `kill -TERM` to stop.
#[derive(Debug, Clone, Copy)]
pub struct SystemProcesses {
    poll_interval: Duration,
}

impl Default for SystemProcesses {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(100),
        }
    }
}

#[cfg(unix)]
async fn signal(pid: u32, sig: &str) -> bool {
    tokio::process::Command::new("kill")
        .arg(sig)
        .arg(pid.to_string())
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .status()
        .await
        .is_ok_and(|s| s.success())
}

#[async_trait]
impl ProcessControl for SystemProcesses {
    #[cfg(unix)]
    async fn find_running_instances(&self, app_dir: &Path) -> Vec<ProcessHandle> {
        let output = match tokio::process::Command::new("pgrep")
            .arg("-f")
            .arg(app_dir)
            .output()
            .await
        {
            Ok(output) => output,
            Err(e) => {
                warn!(error = %e, "pgrep unavailable, not stopping running instances");
                return Vec::new();
            }
        };
        let own = std::process::id();
        String::from_utf8_lossy(&output.stdout)
            .lines()
            .filter_map(|line| line.trim().parse::<u32>().ok())
            .filter(|pid| *pid != own)
            .map(|pid| ProcessHandle { pid })
            .collect()
    }

    #[cfg(not(unix))]
    async fn find_running_instances(&self, _app_dir: &Path) -> Vec<ProcessHandle> {
        Vec::new()
    }

    #[cfg(unix)]
    async fn request_exit(&self, handle: &ProcessHandle, timeout: Duration) -> bool {
        if !signal(handle.pid, "-TERM").await {
            // Already gone
            return true;
        }
        let deadline = tokio::time::Instant::now() + timeout;
        while tokio::time::Instant::now() < deadline {
            if !signal(handle.pid, "-0").await {
                debug!(pid = handle.pid, "process exited");
                return true;
            }
            tokio::time::sleep(self.poll_interval).await;
        }
        false
    }

    #[cfg(not(unix))]
    async fn request_exit(&self, _handle: &ProcessHandle, _timeout: Duration) -> bool {
        true
    }

    async fn relaunch(&self, exe: &Path, args: &[String]) -> std::io::Result<()> {
        let mut command = tokio::process::Command::new(exe);
        command.args(args);
        if let Some(dir) = exe.parent() {
            command.current_dir(dir);
        }
        let child = command.spawn()?;
        debug!(exe = %exe.display(), pid = child.id(), "relaunched application");
        Ok(())
    }
}
