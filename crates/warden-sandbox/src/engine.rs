//! The container execution engine.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use warden_core::SessionId;

use crate::error::{SandboxError, SandboxResult};
use crate::models::{ExecInput, ExecOutcome, ExitStatus, EXIT_CODE_SIGTERM};
use crate::runtime::{ContainerId, ContainerRuntime, ContainerSpec, ExecSpec, StreamChunk, StreamId};

/// How often the engine polls an ephemeral container for settlement.
const STATUS_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Pause between the first and second kill of a runaway container.
const KILL_RETRY_DELAY: Duration = Duration::from_millis(200);

/// Pause before building a replacement session container.
const RESTART_DELAY: Duration = Duration::from_millis(500);

/// Entrypoint that keeps a session container alive between execs.
const SLEEP_FOREVER_CMD: [&str; 2] = ["sleep", "infinity"];

/// Capacity of the exec output channel.
const CHUNK_CHANNEL_CAPACITY: usize = 64;

/// Per-session or per-call container settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerOptions {
    /// Image reference every container is built from.
    pub image: String,
    /// Default working directory.
    #[serde(default)]
    pub working_dir: Option<String>,
    /// Docker network mode; defaults to `"none"`.
    #[serde(default = "default_network_mode")]
    pub network_mode: String,
    /// Environment baked into every container.
    #[serde(default)]
    pub env: Vec<(String, String)>,
    /// Bind mounts shared by every container.
    #[serde(default)]
    pub binds: Vec<crate::runtime::BindMount>,
    /// Labels stamped on every container.
    #[serde(default)]
    pub labels: Vec<(String, String)>,
    /// Default user.
    #[serde(default)]
    pub user: Option<String>,
}

fn default_network_mode() -> String {
    "none".to_string()
}

impl ContainerOptions {
    /// Options for the given image with offline networking and no extras.
    #[must_use]
    pub fn new(image: impl Into<String>) -> Self {
        Self {
            image: image.into(),
            working_dir: None,
            network_mode: default_network_mode(),
            env: Vec::new(),
            binds: Vec::new(),
            labels: Vec::new(),
            user: None,
        }
    }
}

/// Container lifecycle strategy, fixed at engine construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineMode {
    /// Fresh container per call, removed after the call.
    Ephemeral,
    /// One long-lived container reused across calls.
    Session,
}

#[derive(Debug, Clone)]
struct SessionHandle {
    container: ContainerId,
    session_id: SessionId,
}

/// Executes commands in containers with timeout and recovery guarantees.
///
/// In session mode at most one container is ever considered current; a
/// timed-out call tears it down and the replacement is swapped in
/// wholesale, so concurrent calls never observe a half-rebuilt session.
pub struct ContainerEngine {
    runtime: Arc<dyn ContainerRuntime>,
    opts: ContainerOptions,
    mode: EngineMode,
    session: Mutex<Option<SessionHandle>>,
}

impl ContainerEngine {
    /// Create an engine over the given runtime.
    #[must_use]
    pub fn new(runtime: Arc<dyn ContainerRuntime>, opts: ContainerOptions, mode: EngineMode) -> Self {
        Self {
            runtime,
            opts,
            mode,
            session: Mutex::new(None),
        }
    }

    /// The engine's lifecycle mode.
    #[must_use]
    pub fn mode(&self) -> EngineMode {
        self.mode
    }

    /// Run one command to completion, honoring its timeout.
    ///
    /// # Errors
    ///
    /// Fails on invalid input or when container creation (or, in session
    /// mode, the exec transport) fails. A command that merely exits
    /// non-zero or times out is a successful `ExecOutcome`, not an error.
    pub async fn run(&self, input: &ExecInput) -> SandboxResult<ExecOutcome> {
        input.validate()?;
        match self.mode {
            EngineMode::Ephemeral => self.run_ephemeral(input).await,
            EngineMode::Session => self.run_session(input).await,
        }
    }

    /// Tear down the session container, if any.
    pub async fn shutdown(&self) {
        let handle = self.session.lock().await.take();
        if let Some(handle) = handle {
            if let Err(err) = self.runtime.remove(&handle.container).await {
                tracing::warn!(
                    container = %handle.container,
                    error = %err,
                    "failed to remove session container on shutdown"
                );
            }
        }
    }

    /// Current session container, if one exists.
    pub async fn session_container(&self) -> Option<ContainerId> {
        self.session.lock().await.as_ref().map(|h| h.container.clone())
    }

    // -----------------------------------------------------------------------
    // Ephemeral mode
    // -----------------------------------------------------------------------

    async fn run_ephemeral(&self, input: &ExecInput) -> SandboxResult<ExecOutcome> {
        let started = Instant::now();
        let spec = self.container_spec(input);
        let id = self.runtime.create_and_start(&spec).await?;
        tracing::debug!(container = %id, "ephemeral container started");

        let poll = {
            let runtime = Arc::clone(&self.runtime);
            let id = id.clone();
            tokio::spawn(async move {
                loop {
                    match runtime.status(&id).await {
                        Ok(status) if status.is_live() => {
                            tokio::time::sleep(STATUS_POLL_INTERVAL).await;
                        },
                        // Settled, or gone in a way polling cannot recover.
                        Ok(_) | Err(_) => break,
                    }
                }
            })
        };

        let window = Duration::from_millis(input.timeout_ms);
        let settled = race_with_timeout(poll, window).await.is_some();

        let status = if settled {
            match self.runtime.exit_code(&id).await {
                Ok(code) => ExitStatus::Exited { code },
                Err(err) => {
                    tracing::warn!(container = %id, error = %err, "could not read exit code");
                    ExitStatus::Exited {
                        code: EXIT_CODE_SIGTERM,
                    }
                },
            }
        } else {
            tracing::warn!(container = %id, timeout_ms = input.timeout_ms, "exec timed out, killing container");
            self.kill_with_retry(&id).await;
            ExitStatus::TimedOut
        };

        // Collect whatever the process managed to write, even after a kill.
        let (stdout, stderr) = match self.runtime.logs(&id).await {
            Ok(streams) => streams,
            Err(err) => {
                tracing::warn!(container = %id, error = %err, "could not collect container logs");
                (Vec::new(), Vec::new())
            },
        };

        if let Err(err) = self.runtime.remove(&id).await {
            tracing::warn!(container = %id, error = %err, "failed to remove ephemeral container");
        }

        Ok(ExecOutcome {
            stdout,
            stderr,
            status,
            duration_ms: elapsed_ms(started),
        })
    }

    // -----------------------------------------------------------------------
    // Session mode
    // -----------------------------------------------------------------------

    async fn run_session(&self, input: &ExecInput) -> SandboxResult<ExecOutcome> {
        let started = Instant::now();
        let handle = self.ensure_session().await?;
        let exec_spec = self.exec_spec(input);

        let (tx, mut rx) = mpsc::channel::<StreamChunk>(CHUNK_CHANNEL_CAPACITY);
        let exec_task: JoinHandle<SandboxResult<Option<i64>>> = {
            let runtime = Arc::clone(&self.runtime);
            let container = handle.container.clone();
            tokio::spawn(async move { runtime.exec(&container, &exec_spec, tx).await })
        };

        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        let deadline = tokio::time::sleep(Duration::from_millis(input.timeout_ms));
        tokio::pin!(deadline);

        let timed_out = loop {
            tokio::select! {
                () = &mut deadline => break true,
                chunk = rx.recv() => match chunk {
                    Some(chunk) => append_chunk(&mut stdout, &mut stderr, chunk),
                    // Channel closed: the exec finished streaming.
                    None => break false,
                },
            }
        };

        let status = if timed_out {
            // Cancel the loser and observe it before touching the session.
            exec_task.abort();
            let _ = exec_task.await;
            while let Ok(chunk) = rx.try_recv() {
                append_chunk(&mut stdout, &mut stderr, chunk);
            }
            tracing::warn!(
                container = %handle.container,
                session = %handle.session_id,
                timeout_ms = input.timeout_ms,
                "session exec timed out, rebuilding container"
            );
            tokio::time::sleep(KILL_RETRY_DELAY).await;
            self.rebuild_session(&handle).await?;
            ExitStatus::TimedOut
        } else {
            match exec_task.await {
                Ok(Ok(Some(code))) => ExitStatus::Exited { code },
                Ok(Ok(None)) => ExitStatus::Exited {
                    code: EXIT_CODE_SIGTERM,
                },
                Ok(Err(err)) => return Err(err),
                Err(join_err) => {
                    return Err(SandboxError::Internal(format!(
                        "exec task failed: {join_err}"
                    )));
                },
            }
        };

        Ok(ExecOutcome {
            stdout,
            stderr,
            status,
            duration_ms: elapsed_ms(started),
        })
    }

    async fn ensure_session(&self) -> SandboxResult<SessionHandle> {
        let mut guard = self.session.lock().await;
        if let Some(handle) = guard.as_ref() {
            return Ok(handle.clone());
        }
        let fresh = self.create_session_container().await?;
        *guard = Some(fresh.clone());
        Ok(fresh)
    }

    /// Replace the session container after a timeout.
    ///
    /// Concurrent timed-out calls may both arrive here; only the one whose
    /// stale handle is still current performs the rebuild.
    async fn rebuild_session(&self, stale: &SessionHandle) -> SandboxResult<()> {
        let mut guard = self.session.lock().await;
        let still_current = guard
            .as_ref()
            .is_some_and(|h| h.container == stale.container);
        if !still_current {
            return Ok(());
        }
        *guard = None;

        self.kill_with_retry(&stale.container).await;
        if let Err(err) = self.runtime.remove(&stale.container).await {
            tracing::warn!(container = %stale.container, error = %err, "failed to remove stale session container");
        }

        tokio::time::sleep(RESTART_DELAY).await;
        let fresh = self.create_session_container().await?;
        tracing::info!(
            old = %stale.container,
            new = %fresh.container,
            session = %fresh.session_id,
            "session container rebuilt"
        );
        *guard = Some(fresh);
        Ok(())
    }

    async fn create_session_container(&self) -> SandboxResult<SessionHandle> {
        let session_id = SessionId::new();
        let spec = ContainerSpec {
            name: Some(format!("warden-{}", session_id.0.simple())),
            image: self.opts.image.clone(),
            cmd: SLEEP_FOREVER_CMD.iter().map(ToString::to_string).collect(),
            working_dir: self.opts.working_dir.clone(),
            env: self.opts.env.clone(),
            labels: self.opts.labels.clone(),
            network_mode: self.opts.network_mode.clone(),
            binds: self.opts.binds.clone(),
            user: self.opts.user.clone(),
        };
        let container = self.runtime.create_and_start(&spec).await?;
        tracing::debug!(container = %container, session = %session_id, "session container started");
        Ok(SessionHandle {
            container,
            session_id,
        })
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    /// Kill twice with a grace delay; a second kill catches processes that
    /// survive the first because the runtime raced container startup.
    async fn kill_with_retry(&self, id: &ContainerId) {
        if let Err(err) = self.runtime.kill(id).await {
            tracing::warn!(container = %id, error = %err, "first kill failed");
        }
        tokio::time::sleep(KILL_RETRY_DELAY).await;
        if let Err(err) = self.runtime.kill(id).await {
            tracing::debug!(container = %id, error = %err, "second kill failed (already dead)");
        }
    }

    fn container_spec(&self, input: &ExecInput) -> ContainerSpec {
        let mut env = self.opts.env.clone();
        if let Some(extra) = &input.env {
            env.extend(extra.iter().cloned());
        }
        ContainerSpec {
            name: None,
            image: self.opts.image.clone(),
            cmd: input.prepared_command(),
            working_dir: input.cwd.clone().or_else(|| self.opts.working_dir.clone()),
            env,
            labels: self.opts.labels.clone(),
            network_mode: self.opts.network_mode.clone(),
            binds: self.opts.binds.clone(),
            user: input.user.clone().or_else(|| self.opts.user.clone()),
        }
    }

    fn exec_spec(&self, input: &ExecInput) -> ExecSpec {
        ExecSpec {
            cmd: input.prepared_command(),
            working_dir: input.cwd.clone().or_else(|| self.opts.working_dir.clone()),
            env: input.env.clone().unwrap_or_default(),
            user: input.user.clone().or_else(|| self.opts.user.clone()),
        }
    }
}

impl std::fmt::Debug for ContainerEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContainerEngine")
            .field("mode", &self.mode)
            .field("image", &self.opts.image)
            .finish_non_exhaustive()
    }
}

fn append_chunk(stdout: &mut Vec<u8>, stderr: &mut Vec<u8>, chunk: StreamChunk) {
    match chunk.stream {
        StreamId::Stdout => stdout.extend_from_slice(&chunk.bytes),
        StreamId::Stderr => stderr.extend_from_slice(&chunk.bytes),
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

/// Race a spawned task against a wall-clock window.
///
/// On timeout the task is aborted and awaited, so the loser is fully
/// cancelled before the caller proceeds.
async fn race_with_timeout<T>(mut work: JoinHandle<T>, window: Duration) -> Option<T> {
    match tokio::time::timeout(window, &mut work).await {
        Ok(Ok(value)) => Some(value),
        Ok(Err(join_err)) => {
            tracing::warn!(error = %join_err, "raced task failed");
            None
        },
        Err(_elapsed) => {
            work.abort();
            let _ = work.await;
            None
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::{ContainerStatus, StreamId};
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex as StdMutex;

    /// What a fake exec does, selected by container ordinal.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum ExecBehavior {
        /// Emit `hi\n` on stdout and exit 0.
        Complete,
        /// Emit a partial chunk, then never finish.
        Hang,
    }

    #[derive(Default)]
    struct FakeState {
        created: Vec<ContainerSpec>,
        kills: Vec<String>,
        removed: Vec<String>,
        polls: HashMap<String, usize>,
    }

    struct FakeRuntime {
        state: StdMutex<FakeState>,
        /// Polls before an ephemeral container settles; `None` never settles.
        settle_after_polls: Option<usize>,
        exit_code: i64,
        logs: (Vec<u8>, Vec<u8>),
        fail_logs: bool,
        /// Behavior per container ordinal; last entry repeats.
        exec_behaviors: Vec<ExecBehavior>,
    }

    impl FakeRuntime {
        fn completing() -> Self {
            Self {
                state: StdMutex::new(FakeState::default()),
                settle_after_polls: Some(1),
                exit_code: 0,
                logs: (b"hi\n".to_vec(), Vec::new()),
                fail_logs: false,
                exec_behaviors: vec![ExecBehavior::Complete],
            }
        }

        fn never_settling() -> Self {
            Self {
                settle_after_polls: None,
                ..Self::completing()
            }
        }

        fn ordinal(&self, id: &ContainerId) -> usize {
            id.as_str()
                .strip_prefix("fake-")
                .and_then(|n| n.parse().ok())
                .unwrap_or(0)
        }

        fn kills_of(&self, id: &str) -> usize {
            self.state
                .lock()
                .unwrap()
                .kills
                .iter()
                .filter(|k| k.as_str() == id)
                .count()
        }

        fn created_count(&self) -> usize {
            self.state.lock().unwrap().created.len()
        }
    }

    #[async_trait]
    impl ContainerRuntime for FakeRuntime {
        async fn create_and_start(&self, spec: &ContainerSpec) -> SandboxResult<ContainerId> {
            let mut state = self.state.lock().unwrap();
            let id = ContainerId(format!("fake-{}", state.created.len()));
            state.created.push(spec.clone());
            Ok(id)
        }

        async fn status(&self, id: &ContainerId) -> SandboxResult<ContainerStatus> {
            let mut state = self.state.lock().unwrap();
            let polls = state.polls.entry(id.as_str().to_string()).or_insert(0);
            *polls = polls.saturating_add(1);
            match self.settle_after_polls {
                Some(n) if *polls > n => Ok(ContainerStatus::Exited),
                _ => Ok(ContainerStatus::Running),
            }
        }

        async fn exit_code(&self, _id: &ContainerId) -> SandboxResult<i64> {
            Ok(self.exit_code)
        }

        async fn logs(&self, _id: &ContainerId) -> SandboxResult<(Vec<u8>, Vec<u8>)> {
            if self.fail_logs {
                return Err(SandboxError::Runtime("no such container".into()));
            }
            Ok(self.logs.clone())
        }

        async fn exec(
            &self,
            id: &ContainerId,
            _spec: &ExecSpec,
            tx: mpsc::Sender<StreamChunk>,
        ) -> SandboxResult<Option<i64>> {
            let ordinal = self.ordinal(id);
            let behavior = self
                .exec_behaviors
                .get(ordinal)
                .or_else(|| self.exec_behaviors.last())
                .copied()
                .unwrap_or(ExecBehavior::Complete);
            match behavior {
                ExecBehavior::Complete => {
                    let _ = tx
                        .send(StreamChunk {
                            stream: StreamId::Stdout,
                            bytes: b"hi\n".to_vec(),
                        })
                        .await;
                    drop(tx);
                    Ok(Some(self.exit_code))
                },
                ExecBehavior::Hang => {
                    let _ = tx
                        .send(StreamChunk {
                            stream: StreamId::Stdout,
                            bytes: b"partial".to_vec(),
                        })
                        .await;
                    std::future::pending::<()>().await;
                    unreachable!()
                },
            }
        }

        async fn kill(&self, id: &ContainerId) -> SandboxResult<()> {
            self.state.lock().unwrap().kills.push(id.as_str().to_string());
            Ok(())
        }

        async fn remove(&self, id: &ContainerId) -> SandboxResult<()> {
            self.state
                .lock()
                .unwrap()
                .removed
                .push(id.as_str().to_string());
            Ok(())
        }
    }

    fn engine(runtime: Arc<FakeRuntime>, mode: EngineMode) -> ContainerEngine {
        ContainerEngine::new(runtime, ContainerOptions::new("alpine:3"), mode)
    }

    #[tokio::test(start_paused = true)]
    async fn ephemeral_run_collects_logs_and_removes_container() {
        let runtime = Arc::new(FakeRuntime::completing());
        let engine = engine(Arc::clone(&runtime), EngineMode::Ephemeral);

        let outcome = engine
            .run(&ExecInput::new(vec!["echo".into(), "hi".into()]))
            .await
            .unwrap();

        assert_eq!(outcome.status, ExitStatus::Exited { code: 0 });
        assert_eq!(outcome.stdout, b"hi\n");
        assert!(!outcome.timed_out());

        let state = runtime.state.lock().unwrap();
        assert_eq!(state.created.len(), 1);
        assert_eq!(state.removed, vec!["fake-0"]);
        assert!(state.kills.is_empty());
        // Everything runs under a login shell.
        assert_eq!(state.created[0].cmd, vec!["sh", "-lc", "echo hi"]);
    }

    #[tokio::test(start_paused = true)]
    async fn ephemeral_timeout_double_kills_and_reports_no_exit_code() {
        let runtime = Arc::new(FakeRuntime::never_settling());
        let engine = engine(Arc::clone(&runtime), EngineMode::Ephemeral);

        let outcome = engine
            .run(&ExecInput::new(vec!["sleep".into(), "999".into()]).timeout_ms(100))
            .await
            .unwrap();

        assert!(outcome.timed_out());
        assert_eq!(outcome.exit_code(), None);
        assert_eq!(runtime.kills_of("fake-0"), 2);
        assert_eq!(runtime.state.lock().unwrap().removed, vec!["fake-0"]);
    }

    #[tokio::test(start_paused = true)]
    async fn ephemeral_log_failure_yields_empty_streams() {
        let runtime = Arc::new(FakeRuntime {
            fail_logs: true,
            ..FakeRuntime::completing()
        });
        let engine = engine(runtime, EngineMode::Ephemeral);

        let outcome = engine
            .run(&ExecInput::new(vec!["true".into()]))
            .await
            .unwrap();

        assert_eq!(outcome.status, ExitStatus::Exited { code: 0 });
        assert!(outcome.stdout.is_empty());
        assert!(outcome.stderr.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn session_calls_reuse_one_container() {
        let runtime = Arc::new(FakeRuntime::completing());
        let engine = engine(Arc::clone(&runtime), EngineMode::Session);

        let first = engine
            .run(&ExecInput::new(vec!["echo".into(), "hi".into()]))
            .await
            .unwrap();
        let container = engine.session_container().await.unwrap();
        let second = engine
            .run(&ExecInput::new(vec!["echo".into(), "hi".into()]))
            .await
            .unwrap();

        assert_eq!(first.status, ExitStatus::Exited { code: 0 });
        assert_eq!(second.status, ExitStatus::Exited { code: 0 });
        assert_eq!(runtime.created_count(), 1);
        assert_eq!(engine.session_container().await.unwrap(), container);
        // The session container idles on sleep, not the exec command.
        let state = runtime.state.lock().unwrap();
        assert_eq!(state.created[0].cmd, vec!["sleep", "infinity"]);
    }

    #[tokio::test(start_paused = true)]
    async fn session_timeout_keeps_partial_output_and_rebuilds() {
        let runtime = Arc::new(FakeRuntime {
            exec_behaviors: vec![ExecBehavior::Hang, ExecBehavior::Complete],
            ..FakeRuntime::completing()
        });
        let engine = engine(Arc::clone(&runtime), EngineMode::Session);

        let timed_out = engine
            .run(&ExecInput::new(vec!["sleep".into(), "999".into()]).timeout_ms(100))
            .await
            .unwrap();
        assert!(timed_out.timed_out());
        assert_eq!(timed_out.stdout, b"partial");
        assert_eq!(timed_out.exit_code(), None);

        // The hung container was killed twice, removed, and replaced.
        assert_eq!(runtime.kills_of("fake-0"), 2);
        assert_eq!(runtime.created_count(), 2);
        let fresh = engine.session_container().await.unwrap();
        assert_eq!(fresh.as_str(), "fake-1");

        // The replacement serves the next call normally.
        let next = engine
            .run(&ExecInput::new(vec!["echo".into(), "hi".into()]))
            .await
            .unwrap();
        assert_eq!(next.status, ExitStatus::Exited { code: 0 });
        assert_eq!(next.stdout, b"hi\n");
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_removes_the_session_container() {
        let runtime = Arc::new(FakeRuntime::completing());
        let engine = engine(Arc::clone(&runtime), EngineMode::Session);

        engine
            .run(&ExecInput::new(vec!["true".into()]))
            .await
            .unwrap();
        engine.shutdown().await;

        assert_eq!(runtime.state.lock().unwrap().removed, vec!["fake-0"]);
        assert!(engine.session_container().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn invalid_input_is_rejected_before_any_container_work() {
        let runtime = Arc::new(FakeRuntime::completing());
        let engine = engine(Arc::clone(&runtime), EngineMode::Ephemeral);

        let err = engine.run(&ExecInput::new(vec![])).await.unwrap_err();
        assert!(matches!(err, SandboxError::InvalidInput(_)));
        assert_eq!(runtime.created_count(), 0);
    }
}
