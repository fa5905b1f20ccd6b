//! The policy decision contract.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use warden_core::AgentId;

use crate::error::GatewayResult;

/// Fixed substring carried by every deny-abort error message.
///
/// Callers on the wire match on this marker to tell policy denials apart
/// from ordinary tool failures, so it must never change.
pub const POLICY_DENIED_ABORT_MSG: &str = "policy_denied";

/// What the gateway asks policy about.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyRequest {
    /// Tool being invoked.
    pub tool_name: String,
    /// Tool arguments serialized to JSON.
    pub args_json: Option<String>,
    /// Agent making the call.
    pub agent_id: AgentId,
}

/// Policy's ruling on a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyDecision {
    /// Execute without human involvement.
    Allow,
    /// Refuse and abort the run.
    DenyAbort,
    /// Escalate to a human.
    Ask,
}

/// A decision plus optional rationale.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyVerdict {
    /// The ruling.
    pub decision: PolicyDecision,
    /// Free-form rationale for logs and denial messages.
    pub rationale: Option<String>,
}

impl PolicyVerdict {
    /// A bare verdict with no rationale.
    #[must_use]
    pub fn new(decision: PolicyDecision) -> Self {
        Self {
            decision,
            rationale: None,
        }
    }
}

/// Decides whether a tool call may run.
///
/// Implementations must fail closed: any error here aborts the call.
#[async_trait]
pub trait PolicyClient: Send + Sync {
    /// Rule on one request.
    async fn decide(&self, request: &PolicyRequest) -> GatewayResult<PolicyVerdict>;
}

/// Permissive policy that allows everything. Useful for tests and for
/// deployments that gate purely on sandbox isolation.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAllPolicy;

#[async_trait]
impl PolicyClient for AllowAllPolicy {
    async fn decide(&self, _request: &PolicyRequest) -> GatewayResult<PolicyVerdict> {
        Ok(PolicyVerdict::new(PolicyDecision::Allow))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn allow_all_always_allows() {
        let verdict = AllowAllPolicy
            .decide(&PolicyRequest {
                tool_name: "exec".into(),
                args_json: None,
                agent_id: AgentId::new("a"),
            })
            .await
            .unwrap();
        assert_eq!(verdict.decision, PolicyDecision::Allow);
    }

    #[test]
    fn decisions_serialize_snake_case() {
        assert_eq!(
            serde_json::to_string(&PolicyDecision::DenyAbort).unwrap(),
            r#""deny_abort""#
        );
        assert_eq!(
            serde_json::from_str::<PolicyDecision>(r#""ask""#).unwrap(),
            PolicyDecision::Ask
        );
    }
}
