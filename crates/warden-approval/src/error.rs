//! Approval hub error types.

use warden_core::CallId;

/// Errors from approval operations.
#[derive(Debug, thiserror::Error)]
pub enum ApprovalError {
    /// Awaited a call that was never registered (or already consumed).
    #[error("no pending approval registered for {call_id}")]
    NotRegistered {
        /// The call that had no registration.
        call_id: CallId,
    },

    /// The configured decision window elapsed before anyone resolved.
    #[error("approval for {call_id} timed out after {timeout_ms}ms")]
    Timeout {
        /// The call that timed out.
        call_id: CallId,
        /// The configured window, in milliseconds.
        timeout_ms: u64,
    },

    /// The hub dropped the resolution channel without resolving.
    ///
    /// Only reachable if the hub itself is torn down while waiters exist.
    #[error("approval channel for {call_id} closed without a decision")]
    ChannelClosed {
        /// The orphaned call.
        call_id: CallId,
    },

    /// Internal state inconsistency.
    #[error("approval hub internal error: {0}")]
    Internal(String),
}

/// Result type for approval operations.
pub type ApprovalResult<T> = Result<T, ApprovalError>;
