//! The downstream execution seam.

use std::sync::Arc;

use async_trait::async_trait;
use warden_ledger::CallOutput;
use warden_sandbox::{ContainerEngine, ExecInput};

use crate::gateway::ToolCall;

/// Opaque error from a downstream executor.
///
/// The gateway never propagates these; it captures them into an
/// `is_error` call output so the record still completes.
pub type ExecutorError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Runs an approved tool call and produces its output.
#[async_trait]
pub trait CallExecutor: Send + Sync {
    /// Execute one approved call.
    async fn execute(&self, call: &ToolCall) -> Result<CallOutput, ExecutorError>;
}

/// Executor that runs `exec`-style calls in a [`ContainerEngine`].
///
/// Tool arguments must deserialize to an [`ExecInput`]; the rendered exec
/// report becomes the call output, with timeouts and non-zero exits
/// flagged as errors.
pub struct SandboxExecutor {
    engine: Arc<ContainerEngine>,
}

impl SandboxExecutor {
    /// Create an executor over the given engine.
    #[must_use]
    pub fn new(engine: Arc<ContainerEngine>) -> Self {
        Self { engine }
    }

    /// The underlying engine.
    #[must_use]
    pub fn engine(&self) -> &Arc<ContainerEngine> {
        &self.engine
    }
}

#[async_trait]
impl CallExecutor for SandboxExecutor {
    async fn execute(&self, call: &ToolCall) -> Result<CallOutput, ExecutorError> {
        let args = call
            .args_json
            .as_deref()
            .ok_or("exec call carries no arguments")?;
        let input: ExecInput = serde_json::from_str(args)?;
        let outcome = self.engine.run(&input).await?;
        let report = outcome.render();
        let is_error = report.is_error();
        Ok(CallOutput {
            is_error,
            body: serde_json::to_value(report)?,
        })
    }
}

impl std::fmt::Debug for SandboxExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SandboxExecutor").finish_non_exhaustive()
    }
}
