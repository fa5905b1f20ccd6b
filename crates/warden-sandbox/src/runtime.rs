//! The container-runtime contract.
//!
//! Everything the engine needs from a container backend, expressed as an
//! async trait so tests can substitute deterministic fakes for the real
//! Docker CLI.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::{SandboxError, SandboxResult};

/// Opaque handle to a created container.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContainerId(pub String);

impl ContainerId {
    /// Borrow the underlying identifier.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ContainerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A host path mounted into a container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BindMount {
    /// Host-side path.
    pub host: String,
    /// Container-side path.
    pub container: String,
    /// Whether the container sees the mount read-only.
    pub read_only: bool,
}

impl BindMount {
    /// Parse `host:container[:ro|:rw]` notation.
    ///
    /// # Errors
    ///
    /// Returns [`SandboxError::InvalidInput`] on malformed notation.
    pub fn parse(s: &str) -> SandboxResult<Self> {
        let parts: Vec<&str> = s.split(':').collect();
        match parts.as_slice() {
            [host, container] => Ok(Self {
                host: (*host).to_string(),
                container: (*container).to_string(),
                read_only: false,
            }),
            [host, container, mode] => {
                let read_only = match *mode {
                    "ro" => true,
                    "rw" => false,
                    other => {
                        return Err(SandboxError::InvalidInput(format!(
                            "bind mount mode must be ro or rw, got {other}"
                        )));
                    },
                };
                Ok(Self {
                    host: (*host).to_string(),
                    container: (*container).to_string(),
                    read_only,
                })
            },
            _ => Err(SandboxError::InvalidInput(format!(
                "bind mount must be host:container[:mode], got {s}"
            ))),
        }
    }

    /// Render as a Docker `-v` argument.
    #[must_use]
    pub fn to_arg(&self) -> String {
        let mode = if self.read_only { "ro" } else { "rw" };
        format!("{}:{}:{mode}", self.host, self.container)
    }
}

/// Everything needed to create and start one container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerSpec {
    /// Container name, or `None` to let the backend assign one.
    pub name: Option<String>,
    /// Image reference.
    pub image: String,
    /// Entrypoint argv.
    pub cmd: Vec<String>,
    /// Working directory inside the container.
    pub working_dir: Option<String>,
    /// Environment variables.
    pub env: Vec<(String, String)>,
    /// Labels stamped on the container.
    pub labels: Vec<(String, String)>,
    /// Docker network mode; `"none"` keeps the sandbox offline.
    pub network_mode: String,
    /// Bind mounts.
    pub binds: Vec<BindMount>,
    /// User to run as.
    pub user: Option<String>,
}

/// Container status as reported by the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerStatus {
    /// Created but not started.
    Created,
    /// Main process running.
    Running,
    /// Main process finished.
    Exited,
    /// Container is dead or being removed.
    Dead,
    /// A state this engine does not track (paused, restarting, ...).
    Other,
}

impl ContainerStatus {
    /// Parse a Docker `.State.Status` string.
    #[must_use]
    pub fn from_docker(s: &str) -> Self {
        match s {
            "created" => Self::Created,
            "running" => Self::Running,
            "exited" => Self::Exited,
            "dead" | "removing" => Self::Dead,
            _ => Self::Other,
        }
    }

    /// Whether the main process may still produce output.
    #[must_use]
    pub fn is_live(&self) -> bool {
        matches!(self, Self::Created | Self::Running)
    }
}

/// Which stream a chunk belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamId {
    /// Standard output.
    Stdout,
    /// Standard error.
    Stderr,
}

/// One chunk of process output.
#[derive(Debug, Clone)]
pub struct StreamChunk {
    /// Originating stream.
    pub stream: StreamId,
    /// Raw bytes.
    pub bytes: Vec<u8>,
}

/// One command to exec inside a running container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecSpec {
    /// Argv handed to the container.
    pub cmd: Vec<String>,
    /// Working directory for the exec.
    pub working_dir: Option<String>,
    /// Extra environment for the exec.
    pub env: Vec<(String, String)>,
    /// User to run the exec as.
    pub user: Option<String>,
}

/// Async contract between the engine and a container backend.
///
/// All operations are infallible-idempotent where Docker allows: killing a
/// dead container or removing a removed one surfaces as a `Runtime` error
/// the engine is free to suppress.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Create a container and start it. On start failure the backend must
    /// clean up the created container before returning the error.
    async fn create_and_start(&self, spec: &ContainerSpec) -> SandboxResult<ContainerId>;

    /// Report the container's current status.
    async fn status(&self, id: &ContainerId) -> SandboxResult<ContainerStatus>;

    /// Report the exit code of a settled container.
    async fn exit_code(&self, id: &ContainerId) -> SandboxResult<i64>;

    /// Collect the container's accumulated stdout and stderr.
    async fn logs(&self, id: &ContainerId) -> SandboxResult<(Vec<u8>, Vec<u8>)>;

    /// Run a command inside a running container, streaming output chunks
    /// through `tx` as they arrive. Resolves to the exit code once the
    /// command finishes, or `None` when the backend cannot report one.
    async fn exec(
        &self,
        id: &ContainerId,
        spec: &ExecSpec,
        tx: mpsc::Sender<StreamChunk>,
    ) -> SandboxResult<Option<i64>>;

    /// Force-kill the container's main process.
    async fn kill(&self, id: &ContainerId) -> SandboxResult<()>;

    /// Remove the container, killing it first if needed.
    async fn remove(&self, id: &ContainerId) -> SandboxResult<()>;
}
