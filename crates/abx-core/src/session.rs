//! Session lifecycle coordination.
//!
//! A [`Session`] owns one agent process and the protocol client attached to
//! its stdio. All process mutation happens under the runtime lock, which
//! also serializes task execution; the observable [`SessionState`] is kept
//! in a separate sync mutex so it can be read without touching the runtime.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex as StdMutex};

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::{AgentConfig, Config, ProtocolMode};
use crate::error::{BridgeError, BridgeErrorKind, BridgeResult};
use crate::process::{AgentProcess, discover_executable};
use crate::protocol::line::AgentLineClient;
use crate::protocol::rpc::AgentRpcClient;

/// Observable lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    /// No agent process. The initial state, and the state after any stop.
    Stopped,
    /// Process launch in progress.
    Starting,
    /// Process up, no task in flight.
    Ready,
    /// A task request is being executed.
    Executing,
    /// Terminal. The session accepts no further work.
    Disposed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SessionState::Stopped => "stopped",
            SessionState::Starting => "starting",
            SessionState::Ready => "ready",
            SessionState::Executing => "executing",
            SessionState::Disposed => "disposed",
        };
        f.write_str(s)
    }
}

enum ProtocolClient {
    Line(AgentLineClient),
    Rpc(AgentRpcClient),
}

#[derive(Default)]
struct Runtime {
    process: Option<AgentProcess>,
    client: Option<ProtocolClient>,
}

/// One agent session bound to a work directory.
pub struct Session {
    id: String,
    work_dir: PathBuf,
    config: AgentConfig,
    created_at: DateTime<Utc>,
    state: StdMutex<SessionState>,
    runtime: Mutex<Runtime>,
    cancel: StdMutex<CancellationToken>,
}

impl Session {
    pub fn new(work_dir: impl Into<PathBuf>, config: AgentConfig) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            work_dir: work_dir.into(),
            config,
            created_at: Utc::now(),
            state: StdMutex::new(SessionState::Stopped),
            runtime: Mutex::new(Runtime::default()),
            cancel: StdMutex::new(CancellationToken::new()),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    pub fn agent_name(&self) -> &str {
        &self.config.name
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn state(&self) -> SessionState {
        *self.state.lock().unwrap()
    }

    fn set_state(&self, next: SessionState) {
        let mut state = self.state.lock().unwrap();
        // Disposed is terminal.
        if *state != SessionState::Disposed {
            *state = next;
        }
    }

    /// Ensures the agent process is running and its client initialized.
    ///
    /// Starting an already-started session is a no-op.
    ///
    /// # Errors
    /// `Unavailable` when disposed; `Discovery`, `Launch`, `Transport` or
    /// `Protocol` when bringing the agent up fails.
    pub async fn start(&self) -> BridgeResult<()> {
        let mut runtime = self.runtime.lock().await;
        self.ensure_not_disposed()?;
        self.start_locked(&mut runtime).await
    }

    async fn start_locked(&self, runtime: &mut Runtime) -> BridgeResult<()> {
        if let Some(process) = runtime.process.as_mut() {
            if process.is_running() {
                return Ok(());
            }
            // The process died behind our back; relaunch from scratch.
            debug!(session = %self.id, "agent process is gone, restarting");
            runtime.process = None;
            runtime.client = None;
        }

        self.set_state(SessionState::Starting);
        match self.launch(runtime).await {
            Ok(()) => {
                self.set_state(SessionState::Ready);
                Ok(())
            }
            Err(err) => {
                self.teardown(runtime, SessionState::Stopped).await;
                Err(err)
            }
        }
    }

    async fn launch(&self, runtime: &mut Runtime) -> BridgeResult<()> {
        let executable = discover_executable(&self.work_dir, &self.config)?;
        let (process, io) = AgentProcess::spawn(&executable, &self.work_dir, &self.config)?;
        runtime.process = Some(process);

        // Give the agent time to finish its own startup before the first
        // request hits the pipe.
        tokio::time::sleep(self.config.launch_settle()).await;

        let client = match self.config.protocol {
            ProtocolMode::Line => ProtocolClient::Line(AgentLineClient::from_io(io)),
            ProtocolMode::Rpc => {
                let rpc = AgentRpcClient::from_io(io);
                rpc.initialize("abx", env!("CARGO_PKG_VERSION")).await?;
                ProtocolClient::Rpc(rpc)
            }
        };
        runtime.client = Some(client);
        info!(session = %self.id, "session ready");
        Ok(())
    }

    /// Runs one task to completion, streaming text through `on_chunk`.
    ///
    /// Starts the agent first when needed. Concurrent calls on the same
    /// session serialize; each call observes a complete response. Returns
    /// the concatenated response text.
    ///
    /// # Errors
    /// `Canceled` when [`cancel`](Self::cancel) fires mid-task (chunks
    /// already delivered through `on_chunk` stand), `Rpc` when the agent
    /// reports a task failure, `Transport` when the pipe breaks. Transport
    /// failures and cancellations tear the process down, leaving the
    /// session `Stopped` and restartable.
    pub async fn execute(
        &self,
        input: &str,
        mut on_chunk: impl FnMut(&str),
    ) -> BridgeResult<String> {
        let mut runtime = self.runtime.lock().await;
        self.ensure_not_disposed()?;
        self.start_locked(&mut runtime).await?;

        // The shared token is replaced only under the runtime lock, so a
        // caller queued behind an in-flight task cannot swap the token out
        // from under it; `cancel()` always fires the token of the task
        // actually executing.
        let token = {
            let mut cancel = self.cancel.lock().unwrap();
            *cancel = CancellationToken::new();
            cancel.clone()
        };
        self.set_state(SessionState::Executing);

        let work_dir = self.work_dir.display().to_string();
        let result = match runtime.client.as_ref() {
            Some(ProtocolClient::Line(line)) => {
                let mut out = String::new();
                let outcome = line
                    .execute(input, &work_dir, &token, |chunk| {
                        on_chunk(chunk);
                        out.push_str(chunk);
                    })
                    .await;
                outcome.map(|()| out)
            }
            Some(ProtocolClient::Rpc(rpc)) => {
                let args = json!({ "input": input, "workDir": work_dir });
                let call = rpc.call_tool(&self.config.task_tool, args);
                tokio::select! {
                    () = token.cancelled() => Err(BridgeError::canceled()),
                    result = call => result.and_then(|r| {
                        let text = r.text();
                        if r.is_error {
                            Err(BridgeError::new(BridgeErrorKind::Rpc, text))
                        } else {
                            on_chunk(&text);
                            Ok(text)
                        }
                    }),
                }
            }
            None => Err(BridgeError::new(
                BridgeErrorKind::Unavailable,
                "session has no protocol client",
            )),
        };

        match &result {
            // A canceled or broken pipe may hold half a response; the only
            // safe recovery is a fresh process on the next task.
            Err(err) if err.is_canceled() || err.kind == BridgeErrorKind::Transport => {
                self.teardown(&mut runtime, SessionState::Stopped).await;
            }
            _ => self.set_state(SessionState::Ready),
        }
        result
    }

    /// Runs one task and returns the full response text.
    ///
    /// Convenience over [`execute`](Self::execute) for callers that do not
    /// stream.
    ///
    /// # Errors
    /// Same as [`execute`](Self::execute).
    pub async fn execute_task(&self, input: &str) -> BridgeResult<String> {
        self.execute(input, |_| {}).await
    }

    /// Lists the tools the agent exposes. Starts the agent when needed.
    ///
    /// # Errors
    /// `Unavailable` when the session is disposed or the configured
    /// protocol has no tool listing.
    pub async fn list_tools(&self) -> BridgeResult<Vec<crate::protocol::rpc::ToolInfo>> {
        let mut runtime = self.runtime.lock().await;
        self.ensure_not_disposed()?;
        self.start_locked(&mut runtime).await?;
        match runtime.client.as_ref() {
            Some(ProtocolClient::Rpc(rpc)) => rpc.list_tools().await,
            _ => Err(BridgeError::new(
                BridgeErrorKind::Unavailable,
                "tool listing requires the rpc protocol",
            )),
        }
    }

    /// Requests cancellation of the in-flight task, if any.
    ///
    /// Returns immediately; the executing call observes the token and
    /// returns a `Canceled` error.
    pub fn cancel(&self) {
        self.cancel.lock().unwrap().cancel();
    }

    /// Stops the agent process. Idempotent; the session can be restarted.
    pub async fn stop(&self) {
        let mut runtime = self.runtime.lock().await;
        self.teardown(&mut runtime, SessionState::Stopped).await;
    }

    /// Cancels any in-flight task and stops the session for good.
    ///
    /// Idempotent; all later operations fail with `Unavailable`.
    pub async fn dispose(&self) {
        self.cancel();
        let mut runtime = self.runtime.lock().await;
        self.teardown(&mut runtime, SessionState::Disposed).await;
        // stop() must not resurrect a disposed session, so the terminal
        // state is written last and sticks.
        *self.state.lock().unwrap() = SessionState::Disposed;
    }

    async fn teardown(&self, runtime: &mut Runtime, next: SessionState) {
        runtime.client = None;
        if let Some(mut process) = runtime.process.take() {
            process.stop(self.config.stop_grace()).await;
        }
        self.set_state(next);
    }

    fn ensure_not_disposed(&self) -> BridgeResult<()> {
        if self.state() == SessionState::Disposed {
            Err(BridgeError::new(
                BridgeErrorKind::Unavailable,
                "session is disposed",
            ))
        } else {
            Ok(())
        }
    }
}

/// Creates and tracks sessions keyed by id.
pub struct SessionManager {
    config: Config,
    sessions: StdMutex<HashMap<String, Arc<Session>>>,
}

impl SessionManager {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            sessions: StdMutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Opens a new session for a work directory.
    pub fn create(&self, work_dir: impl Into<PathBuf>) -> Arc<Session> {
        let session = Arc::new(Session::new(work_dir, self.config.agent.clone()));
        self.sessions
            .lock()
            .unwrap()
            .insert(session.id().to_string(), Arc::clone(&session));
        session
    }

    pub fn get(&self, id: &str) -> Option<Arc<Session>> {
        self.sessions.lock().unwrap().get(id).cloned()
    }

    /// All tracked sessions, oldest first.
    pub fn list(&self) -> Vec<Arc<Session>> {
        let mut sessions: Vec<_> = self.sessions.lock().unwrap().values().cloned().collect();
        sessions.sort_by_key(|s| s.created_at());
        sessions
    }

    /// Cancels the in-flight task of a session. Returns false for unknown ids.
    pub fn cancel(&self, id: &str) -> bool {
        match self.get(id) {
            Some(session) => {
                session.cancel();
                true
            }
            None => false,
        }
    }

    /// Disposes a session and forgets it. Returns false for unknown ids.
    pub async fn close(&self, id: &str) -> bool {
        let session = self.sessions.lock().unwrap().remove(id);
        match session {
            Some(session) => {
                session.dispose().await;
                true
            }
            None => false,
        }
    }

    /// Disposes every tracked session.
    pub async fn close_all(&self) {
        let sessions: Vec<_> = self.sessions.lock().unwrap().drain().collect();
        for (_, session) in sessions {
            session.dispose().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> AgentConfig {
        AgentConfig {
            launch_settle_ms: 0,
            stop_grace_ms: 500,
            ..AgentConfig::default()
        }
    }

    #[tokio::test]
    async fn new_session_is_stopped() {
        let session = Session::new("/tmp", test_config());
        assert_eq!(session.state(), SessionState::Stopped);
        assert!(!session.id().is_empty());
    }

    #[tokio::test]
    async fn stop_without_start_is_a_no_op() {
        let session = Session::new("/tmp", test_config());
        session.stop().await;
        session.stop().await;
        assert_eq!(session.state(), SessionState::Stopped);
    }

    #[tokio::test]
    async fn dispose_is_terminal_and_idempotent() {
        let session = Session::new("/tmp", test_config());
        session.dispose().await;
        assert_eq!(session.state(), SessionState::Disposed);

        session.dispose().await;
        session.stop().await;
        assert_eq!(session.state(), SessionState::Disposed);

        let err = session.execute("hi", |_| {}).await.unwrap_err();
        assert_eq!(err.kind, BridgeErrorKind::Unavailable);
        let err = session.start().await.unwrap_err();
        assert_eq!(err.kind, BridgeErrorKind::Unavailable);
    }

    #[tokio::test]
    async fn cancel_without_a_task_is_harmless() {
        let session = Session::new("/tmp", test_config());
        session.cancel();
        assert_eq!(session.state(), SessionState::Stopped);
    }

    #[tokio::test]
    async fn start_failure_reports_discovery_and_stays_stopped() {
        let dir = tempfile::tempdir().unwrap();
        let config = AgentConfig {
            relative_path: "does/not/exist".to_string(),
            ..test_config()
        };
        // Explicit executable avoids consulting the shared home fallback.
        let config = AgentConfig {
            executable: Some(dir.path().join("missing").display().to_string()),
            ..config
        };

        let session = Session::new(dir.path(), config);
        let err = session.start().await.unwrap_err();
        assert_eq!(err.kind, BridgeErrorKind::Discovery);
        assert_eq!(session.state(), SessionState::Stopped);
    }

    #[tokio::test]
    async fn manager_tracks_and_closes_sessions() {
        let manager = SessionManager::new(Config {
            agent: test_config(),
            ..Config::default()
        });

        let a = manager.create("/tmp/a");
        let b = manager.create("/tmp/b");
        assert_eq!(manager.list().len(), 2);
        assert!(manager.get(a.id()).is_some());
        assert!(manager.cancel(b.id()));
        assert!(!manager.cancel("nope"));

        assert!(manager.close(a.id()).await);
        assert!(!manager.close(a.id()).await);
        assert_eq!(a.state(), SessionState::Disposed);
        assert_eq!(manager.list().len(), 1);

        manager.close_all().await;
        assert_eq!(manager.list().len(), 0);
        assert_eq!(b.state(), SessionState::Disposed);
    }
}
