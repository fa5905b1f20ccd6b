//! Warden Sandbox - container execution engine.
//!
//! Runs approved tool calls inside Docker containers with strict timeout
//! and recovery guarantees. Two operating modes:
//!
//! - **Ephemeral**: one fresh container per call, removed afterwards
//! - **Session**: one long-lived container shared by a session's calls,
//!   torn down and rebuilt whenever a call times out
//!
//! The engine talks to containers through the [`ContainerRuntime`] trait;
//! [`DockerCliRuntime`] drives the `docker` CLI, and tests substitute fakes.

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod docker;
pub mod engine;
pub mod error;
pub mod models;
pub mod runtime;

pub use docker::DockerCliRuntime;
pub use engine::{ContainerEngine, ContainerOptions, EngineMode};
pub use error::{SandboxError, SandboxResult};
pub use models::{
    ExecInput, ExecOutcome, ExecReport, ExitStatus, StreamText, EXIT_CODE_SIGTERM,
    MAX_EXEC_TIMEOUT_MS, MAX_OUTPUT_BYTES,
};
pub use runtime::{
    BindMount, ContainerId, ContainerRuntime, ContainerSpec, ContainerStatus, ExecSpec,
    StreamChunk, StreamId,
};
