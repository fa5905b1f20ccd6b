//! Sandbox error types.

/// Errors from sandbox operations.
#[derive(Debug, thiserror::Error)]
pub enum SandboxError {
    /// The exec input failed validation before anything ran.
    #[error("invalid exec input: {0}")]
    InvalidInput(String),

    /// The container runtime reported a failure.
    #[error("container runtime error: {0}")]
    Runtime(String),

    /// Spawning or talking to the runtime CLI failed at the OS level.
    #[error("container runtime io error: {0}")]
    Io(#[from] std::io::Error),

    /// Engine-internal inconsistency.
    #[error("sandbox internal error: {0}")]
    Internal(String),
}

/// Result type for sandbox operations.
pub type SandboxResult<T> = Result<T, SandboxError>;
