//! Gateway error types.

use warden_approval::ApprovalError;
use warden_ledger::LedgerError;
use warden_sandbox::SandboxError;

/// Errors from gateway operations.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// The call was denied and the run must abort.
    ///
    /// The message prefix is the fixed wire marker
    /// [`POLICY_DENIED_ABORT_MSG`](crate::policy::POLICY_DENIED_ABORT_MSG);
    /// callers match on it to distinguish denials from execution failures.
    #[error("policy_denied: tool '{tool}': {reason}")]
    PolicyDenied {
        /// The denied tool.
        tool: String,
        /// Why it was denied.
        reason: String,
    },

    /// The policy evaluator itself failed or produced garbage.
    ///
    /// Always fails closed: the call does not run.
    #[error("policy evaluator error: {0}")]
    Evaluator(String),

    /// A candidate policy program failed validation.
    #[error("policy program rejected: {0}")]
    PolicyValidation(String),

    /// The ledger could not be written. Fatal for the affected call.
    #[error(transparent)]
    Ledger(#[from] LedgerError),

    /// The approval hub failed structurally (not a mere denial).
    #[error(transparent)]
    Approval(#[from] ApprovalError),

    /// The sandbox failed before the command could produce an outcome.
    #[error(transparent)]
    Sandbox(#[from] SandboxError),

    /// Gateway-internal inconsistency.
    #[error("gateway internal error: {0}")]
    Internal(String),
}

/// Result type for gateway operations.
pub type GatewayResult<T> = Result<T, GatewayError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::POLICY_DENIED_ABORT_MSG;

    #[test]
    fn denial_message_carries_the_wire_marker() {
        let err = GatewayError::PolicyDenied {
            tool: "exec".into(),
            reason: "rm is blocked".into(),
        };
        assert!(err.to_string().contains(POLICY_DENIED_ABORT_MSG));
        assert!(err.to_string().contains("rm is blocked"));
    }
}
