//! Agent process lifecycle: discovery, launch, supervised shutdown.
//!
//! Only the session coordinator starts or stops the process; protocol
//! clients receive the pre-opened stdio handles and never close it
//! themselves.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tracing::{debug, info, warn};

use crate::config::{AgentConfig, paths};
use crate::error::{BridgeError, BridgeErrorKind, BridgeResult};

/// Locates the agent executable for a work directory.
///
/// Resolution order: explicit `executable` from config, then
/// `work_dir/<relative_path>`, then the same file name under the abx home
/// directory. Absence of all candidates is a discovery failure, distinct
/// from a launch failure so callers can show a different message.
///
/// # Errors
/// Returns a `Discovery` error when no candidate exists.
pub fn discover_executable(work_dir: &Path, agent: &AgentConfig) -> BridgeResult<PathBuf> {
    if let Some(explicit) = agent.executable.as_deref() {
        let path = PathBuf::from(explicit);
        if path.exists() {
            return Ok(path);
        }
        return Err(BridgeError::with_details(
            BridgeErrorKind::Discovery,
            "configured agent executable does not exist",
            path.display().to_string(),
        ));
    }

    let mut candidates = vec![work_dir.join(&agent.relative_path)];
    if let Some(file_name) = Path::new(&agent.relative_path).file_name() {
        candidates.push(paths::abx_home().join(file_name));
    }

    for candidate in &candidates {
        if candidate.exists() {
            debug!(path = %candidate.display(), "resolved agent executable");
            return Ok(candidate.clone());
        }
    }

    let searched = candidates
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ");
    Err(BridgeError::with_details(
        BridgeErrorKind::Discovery,
        "agent executable not found",
        format!("searched: {searched}"),
    ))
}

/// Stdio handles detached from a freshly spawned agent process.
///
/// Handed to exactly one protocol client.
#[derive(Debug)]
pub struct AgentIo {
    pub stdin: ChildStdin,
    pub stdout: ChildStdout,
}

/// A supervised agent subprocess.
///
/// Owned exclusively by the session coordinator and released exactly once,
/// either through [`AgentProcess::stop`] or on drop (`kill_on_drop`).
#[derive(Debug)]
pub struct AgentProcess {
    child: Child,
    work_dir: PathBuf,
}

impl AgentProcess {
    /// Launches the agent with redirected stdin/stdout.
    ///
    /// stderr is inherited so agent diagnostics stay visible in the host's
    /// terminal.
    ///
    /// # Errors
    /// Returns a `Launch` error if the OS refuses to spawn.
    pub fn spawn(
        executable: &Path,
        work_dir: &Path,
        agent: &AgentConfig,
    ) -> BridgeResult<(Self, AgentIo)> {
        let mut command = Command::new(executable);
        command
            .args(&agent.args)
            .current_dir(work_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);
        for (key, value) in &agent.env {
            command.env(key, value);
        }

        let mut child = command.spawn().map_err(|e| {
            BridgeError::with_details(
                BridgeErrorKind::Launch,
                format!("failed to launch agent '{}'", executable.display()),
                e.to_string(),
            )
        })?;

        // Both handles are piped above, so take() cannot fail.
        let stdin = child.stdin.take().ok_or_else(|| {
            BridgeError::new(BridgeErrorKind::Launch, "agent stdin was not captured")
        })?;
        let stdout = child.stdout.take().ok_or_else(|| {
            BridgeError::new(BridgeErrorKind::Launch, "agent stdout was not captured")
        })?;

        info!(pid = child.id(), path = %executable.display(), "agent process started");

        Ok((
            Self {
                child,
                work_dir: work_dir.to_path_buf(),
            },
            AgentIo { stdin, stdout },
        ))
    }

    /// OS process id, if the process has not been reaped yet.
    pub fn id(&self) -> Option<u32> {
        self.child.id()
    }

    /// Work directory the process was launched in.
    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    /// Reflects current liveness without blocking.
    pub fn is_running(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }

    /// Terminates the process: graceful signal, bounded wait, force-kill.
    ///
    /// Idempotent: calling it twice, or on an already-dead process, is a
    /// no-op and never an error.
    pub async fn stop(&mut self, grace: Duration) {
        if matches!(self.child.try_wait(), Ok(Some(_))) {
            return;
        }

        #[cfg(unix)]
        if let Some(pid) = self.child.id() {
            // SAFETY: signaling our own child by a pid we have not reaped.
            unsafe {
                libc::kill(pid as i32, libc::SIGTERM);
            }
        }
        #[cfg(not(unix))]
        {
            let _ = self.child.start_kill();
        }

        match tokio::time::timeout(grace, self.child.wait()).await {
            Ok(_) => info!("agent process stopped"),
            Err(_) => {
                warn!("agent process did not exit within grace period, force killing");
                let _ = self.child.kill().await;
            }
        }
    }
}
