//! Platform-specific process control.

use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt as _, BufReader};
use tokio::process::{Child, Command};

use crate::error::{ManagerError, Result};

/// Prepare a server command: piped output, own process group, no console window.
pub(crate) fn configure_command(cmd: &mut Command) {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    #[cfg(target_os = "windows")]
    {
        use windows::Win32::System::Threading::CREATE_NO_WINDOW;
        cmd.creation_flags(CREATE_NO_WINDOW.0);
    }

    #[cfg(unix)]
    {
        cmd.process_group(0);
    }
}

/// Forward the child's stdout and stderr to the log, one record per line.
pub(crate) fn forward_output(instance_id: &str, child: &mut Child) {
    if let Some(stdout) = child.stdout.take() {
        let id = instance_id.to_string();
        let mut lines = BufReader::new(stdout).lines();
        tokio::spawn(async move {
            while let Ok(Some(line)) = lines.next_line().await {
                log::debug!("[neo4j {} stdout] {}", id, line);
            }
        });
    }

    if let Some(stderr) = child.stderr.take() {
        let id = instance_id.to_string();
        let mut lines = BufReader::new(stderr).lines();
        tokio::spawn(async move {
            while let Ok(Some(line)) = lines.next_line().await {
                log::error!("[neo4j {} stderr] {}", id, line);
            }
        });
    }
}

/// Ask the process (group) to shut down.
#[cfg(not(target_os = "windows"))]
fn graceful_signal(pid: u32) -> Result<()> {
    use nix::sys::signal::{kill, killpg, Signal};
    use nix::unistd::Pid;

    let target = Pid::from_raw(pid as i32);
    // The child leads its own group, so the group id equals its pid.
    killpg(target, Signal::SIGTERM)
        .or_else(|_| kill(target, Signal::SIGTERM))
        .map_err(|e| ManagerError::process(format!("Failed to send SIGTERM to PID {pid}: {e}")))
}

#[cfg(target_os = "windows")]
fn graceful_signal(pid: u32) -> Result<()> {
    run_taskkill(pid, false)
}

#[cfg(not(target_os = "windows"))]
fn force_kill(pid: u32) -> Result<()> {
    use nix::sys::signal::{kill, killpg, Signal};
    use nix::unistd::{getpgid, Pid};

    let target = Pid::from_raw(pid as i32);
    match getpgid(Some(target)) {
        Ok(pgid) => killpg(pgid, Signal::SIGKILL).map_err(|e| {
            ManagerError::process(format!(
                "Failed to kill process group {} (from pid {}): {}",
                pgid.as_raw(),
                pid,
                e
            ))
        }),
        Err(e) => kill(target, Signal::SIGKILL).map_err(|kill_err| {
            ManagerError::process(format!(
                "Failed to kill process {pid} (getpgid failed: {e}): {kill_err}"
            ))
        }),
    }
}

#[cfg(target_os = "windows")]
fn force_kill(pid: u32) -> Result<()> {
    run_taskkill(pid, true)
}

#[cfg(target_os = "windows")]
fn run_taskkill(pid: u32, force: bool) -> Result<()> {
    use std::os::windows::process::CommandExt as _;
    use windows::Win32::System::Threading::CREATE_NO_WINDOW;

    let pid_arg = pid.to_string();
    let mut args = vec!["/PID", pid_arg.as_str(), "/T"];
    if force {
        args.push("/F");
    }
    let output = std::process::Command::new("taskkill")
        .args(&args)
        .creation_flags(CREATE_NO_WINDOW.0)
        .output()
        .map_err(|e| ManagerError::process(format!("Failed to run taskkill: {e}")))?;

    if output.status.success() {
        return Ok(());
    }
    let stderr = String::from_utf8_lossy(&output.stderr);
    let stdout = String::from_utf8_lossy(&output.stdout);
    let detail = match stderr.trim() {
        "" => stdout.trim(),
        detail => detail,
    };
    Err(ManagerError::process(format!(
        "taskkill failed for pid {}: {}",
        pid,
        if detail.is_empty() { "(no output)" } else { detail }
    )))
}

/// Stop `child`: graceful signal, wait up to `grace`, then force kill.
///
/// Never fails; problems are logged. Returns the exit status when one was observed.
pub(crate) async fn terminate(child: &mut Child, grace: Duration) -> Option<ExitStatus> {
    if let Ok(Some(status)) = child.try_wait() {
        return Some(status);
    }

    let Some(pid) = child.id() else {
        return child.wait().await.ok();
    };

    match graceful_signal(pid) {
        Ok(()) => match tokio::time::timeout(grace, child.wait()).await {
            Ok(Ok(status)) => return Some(status),
            Ok(Err(e)) => log::warn!("Failed to wait for PID {}: {}", pid, e),
            Err(_) => log::warn!(
                "PID {} did not exit within {}s, force killing",
                pid,
                grace.as_secs()
            ),
        },
        Err(e) => log::warn!("{}, will force kill immediately", e),
    }

    if let Err(e) = force_kill(pid) {
        log::warn!("{}", e);
    }
    if let Err(e) = child.kill().await {
        log::error!("Failed to kill PID {}: {}", pid, e);
    }
    child.wait().await.ok()
}
