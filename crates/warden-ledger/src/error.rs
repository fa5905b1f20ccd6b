//! Ledger error types.

/// Errors from ledger operations.
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    /// The requested record was not found.
    #[error("record not found: {0}")]
    NotFound(String),

    /// A storage operation failed.
    #[error("storage error: {0}")]
    Storage(String),

    /// Serialization or deserialization of a record failed.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// The namespace or key is invalid.
    #[error("invalid key: {0}")]
    InvalidKey(String),

    /// A write would violate the record lifecycle.
    ///
    /// Raised when an execution is attached to a record with no decision,
    /// or to a record whose decision is a terminal denial.
    #[error("lifecycle violation for {call_id}: {reason}")]
    Lifecycle {
        /// Call whose record was being written.
        call_id: String,
        /// What the write attempted.
        reason: String,
    },
}

/// Result type for ledger operations.
pub type LedgerResult<T> = Result<T, LedgerError>;

impl From<serde_json::Error> for LedgerError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}
