//! Tool-call record model.
//!
//! A [`ToolCallRecord`] tracks one intercepted tool call through its
//! lifecycle: created in the pending phase, a decision attached once policy
//! (or a human) rules on it, and an execution result attached when the call
//! completes. Denials are terminal; a denied record never gains an
//! execution.

use serde::{Deserialize, Serialize};
use warden_core::{AgentId, CallId, RunId, Timestamp};

use crate::error::{LedgerError, LedgerResult};

/// How a tool call was decided.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionOutcome {
    /// Policy allowed the call outright.
    PolicyAllow,
    /// Policy denied the call and the run must abort.
    PolicyDenyAbort,
    /// A human approved the call.
    UserApprove,
    /// A human denied the call and the run must abort.
    UserDenyAbort,
    /// A human denied the call but the run continues.
    UserDenyContinue,
}

impl DecisionOutcome {
    /// Whether this outcome permits execution.
    #[must_use]
    pub fn is_approved(&self) -> bool {
        matches!(self, Self::PolicyAllow | Self::UserApprove)
    }

    /// Whether this outcome is a terminal denial.
    #[must_use]
    pub fn is_denied(&self) -> bool {
        !self.is_approved()
    }
}

impl std::fmt::Display for DecisionOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::PolicyAllow => write!(f, "policy_allow"),
            Self::PolicyDenyAbort => write!(f, "policy_deny_abort"),
            Self::UserApprove => write!(f, "user_approve"),
            Self::UserDenyAbort => write!(f, "user_deny_abort"),
            Self::UserDenyContinue => write!(f, "user_deny_continue"),
        }
    }
}

/// The immutable identity of the intercepted call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCallSpec {
    /// Tool name as presented by the caller.
    pub name: String,
    /// Tool arguments serialized to JSON, or `None` when the call had none.
    pub args_json: Option<String>,
}

/// A decision attached to a record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Decision {
    /// The ruling.
    pub outcome: DecisionOutcome,
    /// When the ruling landed.
    pub decided_at: Timestamp,
    /// Free-form rationale, when the decider supplied one.
    pub reason: Option<String>,
}

/// The rendered result handed back to the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallOutput {
    /// Whether the result represents a failure.
    pub is_error: bool,
    /// Result body. For sandbox executions this is the rendered exec
    /// report; for captured executor failures it carries the error text.
    pub body: serde_json::Value,
}

impl CallOutput {
    /// A successful output with the given body.
    #[must_use]
    pub fn ok(body: serde_json::Value) -> Self {
        Self {
            is_error: false,
            body,
        }
    }

    /// An error output carrying the given message.
    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            is_error: true,
            body: serde_json::Value::String(message.into()),
        }
    }
}

/// An execution result attached to a record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Execution {
    /// When the call finished (successfully or not).
    pub completed_at: Timestamp,
    /// What came back.
    pub output: CallOutput,
}

/// Coarse lifecycle phase derived from which fields are populated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallPhase {
    /// Intercepted; no decision yet.
    Pending,
    /// Approved; execution result not yet recorded.
    Executing,
    /// Execution result recorded.
    Completed,
    /// Denied; terminal, no execution will ever be recorded.
    Denied,
}

/// Durable record of one intercepted tool call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCallRecord {
    /// Caller-supplied unique call ID.
    pub call_id: CallId,
    /// Run this call belongs to, when known.
    pub run_id: Option<RunId>,
    /// Agent that issued the call.
    pub agent_id: AgentId,
    /// What was called, frozen at interception time.
    pub tool_call: ToolCallSpec,
    /// When the call was intercepted.
    pub created_at: Timestamp,
    /// Decision, once one lands.
    pub decision: Option<Decision>,
    /// Execution result, once the call completes.
    pub execution: Option<Execution>,
}

impl ToolCallRecord {
    /// Create a fresh pending record for an intercepted call.
    #[must_use]
    pub fn pending(
        call_id: CallId,
        run_id: Option<RunId>,
        agent_id: AgentId,
        tool_call: ToolCallSpec,
    ) -> Self {
        Self {
            call_id,
            run_id,
            agent_id,
            tool_call,
            created_at: Timestamp::now(),
            decision: None,
            execution: None,
        }
    }

    /// Attach a decision.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::Lifecycle`] if the record already completed.
    pub fn with_decision(mut self, decision: Decision) -> LedgerResult<Self> {
        if self.execution.is_some() {
            return Err(LedgerError::Lifecycle {
                call_id: self.call_id.as_str().to_string(),
                reason: "cannot attach a decision after execution".into(),
            });
        }
        self.decision = Some(decision);
        Ok(self)
    }

    /// Attach an execution result.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::Lifecycle`] if no decision is present, or if
    /// the decision was a denial (denied records stay execution-free).
    pub fn with_execution(mut self, execution: Execution) -> LedgerResult<Self> {
        match &self.decision {
            None => Err(LedgerError::Lifecycle {
                call_id: self.call_id.as_str().to_string(),
                reason: "cannot attach an execution before a decision".into(),
            }),
            Some(decision) if decision.outcome.is_denied() => Err(LedgerError::Lifecycle {
                call_id: self.call_id.as_str().to_string(),
                reason: format!(
                    "cannot attach an execution to a record denied with {}",
                    decision.outcome
                ),
            }),
            Some(_) => {
                self.execution = Some(execution);
                Ok(self)
            },
        }
    }

    /// Derive the lifecycle phase from the populated fields.
    #[must_use]
    pub fn phase(&self) -> CallPhase {
        match (&self.decision, &self.execution) {
            (_, Some(_)) => CallPhase::Completed,
            (Some(decision), None) if decision.outcome.is_denied() => CallPhase::Denied,
            (Some(_), None) => CallPhase::Executing,
            (None, None) => CallPhase::Pending,
        }
    }

    /// Whether this record has reached a terminal phase.
    #[must_use]
    pub fn is_settled(&self) -> bool {
        matches!(self.phase(), CallPhase::Completed | CallPhase::Denied)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> ToolCallRecord {
        ToolCallRecord::pending(
            CallId::new("c1"),
            Some(RunId::new("r1")),
            AgentId::new("agent-a"),
            ToolCallSpec {
                name: "exec".into(),
                args_json: Some(r#"{"cmd":["echo","hi"]}"#.into()),
            },
        )
    }

    fn decided(outcome: DecisionOutcome) -> Decision {
        Decision {
            outcome,
            decided_at: Timestamp::now(),
            reason: None,
        }
    }

    #[test]
    fn fresh_record_is_pending() {
        let rec = record();
        assert_eq!(rec.phase(), CallPhase::Pending);
        assert!(!rec.is_settled());
    }

    #[test]
    fn approved_record_is_executing_then_completed() {
        let rec = record()
            .with_decision(decided(DecisionOutcome::PolicyAllow))
            .unwrap();
        assert_eq!(rec.phase(), CallPhase::Executing);

        let rec = rec
            .with_execution(Execution {
                completed_at: Timestamp::now(),
                output: CallOutput::ok(serde_json::json!({"stdout": "hi\n"})),
            })
            .unwrap();
        assert_eq!(rec.phase(), CallPhase::Completed);
        assert!(rec.is_settled());
    }

    #[test]
    fn denied_record_is_terminal() {
        let rec = record()
            .with_decision(decided(DecisionOutcome::PolicyDenyAbort))
            .unwrap();
        assert_eq!(rec.phase(), CallPhase::Denied);
        assert!(rec.is_settled());

        let err = rec
            .with_execution(Execution {
                completed_at: Timestamp::now(),
                output: CallOutput::ok(serde_json::Value::Null),
            })
            .unwrap_err();
        assert!(matches!(err, LedgerError::Lifecycle { .. }));
    }

    #[test]
    fn execution_requires_decision() {
        let err = record()
            .with_execution(Execution {
                completed_at: Timestamp::now(),
                output: CallOutput::ok(serde_json::Value::Null),
            })
            .unwrap_err();
        assert!(matches!(err, LedgerError::Lifecycle { .. }));
    }

    #[test]
    fn user_deny_continue_is_a_denial() {
        assert!(DecisionOutcome::UserDenyContinue.is_denied());
        assert!(DecisionOutcome::UserApprove.is_approved());
    }

    #[test]
    fn record_roundtrips_through_serde() {
        let rec = record()
            .with_decision(decided(DecisionOutcome::UserApprove))
            .unwrap();
        let json = serde_json::to_string(&rec).unwrap();
        let back: ToolCallRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(rec, back);
    }
}
