//! The policy gateway itself.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use warden_approval::{ApprovalError, ApprovalHub, ApprovalOutcome, PendingApproval};
use warden_core::{AgentId, CallId, RunId, Timestamp};
use warden_ledger::{
    CallOutput, CallPhase, Decision, DecisionOutcome, Execution, ToolCallLedger, ToolCallRecord,
    ToolCallSpec,
};

use crate::error::{GatewayError, GatewayResult};
use crate::executor::CallExecutor;
use crate::policy::{PolicyClient, PolicyDecision, PolicyRequest};

/// One intercepted tool call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolCall {
    /// Caller-supplied unique call ID.
    pub call_id: CallId,
    /// Run this call belongs to, when known.
    pub run_id: Option<RunId>,
    /// Agent making the call.
    pub agent_id: AgentId,
    /// Tool name.
    pub name: String,
    /// Tool arguments serialized to JSON.
    pub args_json: Option<String>,
}

/// How a non-aborting call concluded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallDisposition {
    /// The call ran; here is its output.
    Executed(CallOutput),
    /// A human skipped the call but let the run continue.
    DeniedContinue {
        /// Operator-supplied rationale, if any.
        reason: Option<String>,
    },
}

/// Callback fired when a call is parked for approval, so frontends can
/// surface it immediately instead of polling the hub.
pub type PendingNotifier = Arc<dyn Fn(&PendingApproval) + Send + Sync>;

/// Intercepts every tool call and drives it through record, decide,
/// (optionally) approve, execute.
///
/// Guarantees, per call:
/// - exactly one ledger record exists, created before policy runs
/// - a denial leaves the record without an execution, forever
/// - an approval always ends in an execution record, even when the
///   executor fails (the failure is captured as error output)
pub struct PolicyGateway {
    ledger: Arc<ToolCallLedger>,
    policy: Arc<dyn PolicyClient>,
    hub: Arc<ApprovalHub>,
    executor: Arc<dyn CallExecutor>,
    inflight: Mutex<HashSet<CallId>>,
    pending_notifier: Option<PendingNotifier>,
}

impl PolicyGateway {
    /// Assemble a gateway from its four collaborators.
    #[must_use]
    pub fn new(
        ledger: Arc<ToolCallLedger>,
        policy: Arc<dyn PolicyClient>,
        hub: Arc<ApprovalHub>,
        executor: Arc<dyn CallExecutor>,
    ) -> Self {
        Self {
            ledger,
            policy,
            hub,
            executor,
            inflight: Mutex::new(HashSet::new()),
            pending_notifier: None,
        }
    }

    /// Install a notifier fired whenever a call is parked for approval.
    #[must_use]
    pub fn with_pending_notifier(mut self, notifier: PendingNotifier) -> Self {
        self.pending_notifier = Some(notifier);
        self
    }

    /// The approval hub, for operator surfaces that resolve pending calls.
    #[must_use]
    pub fn hub(&self) -> &Arc<ApprovalHub> {
        &self.hub
    }

    /// The ledger, for operator surfaces that browse call history.
    #[must_use]
    pub fn ledger(&self) -> &Arc<ToolCallLedger> {
        &self.ledger
    }

    /// Calls currently executing.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Internal`] only if internal state is poisoned.
    pub fn in_flight(&self) -> GatewayResult<Vec<CallId>> {
        Ok(self.lock_inflight()?.iter().cloned().collect())
    }

    /// Drive one tool call through its full lifecycle.
    ///
    /// # Errors
    ///
    /// - [`GatewayError::PolicyDenied`] when policy, a human, or an elapsed
    ///   approval window denies the call with abort semantics
    /// - [`GatewayError::Evaluator`] when the policy evaluator fails
    ///   (fail closed: the call does not run)
    /// - [`GatewayError::Ledger`] when the record cannot be persisted
    ///
    /// Executor failures are not errors: they complete the call with
    /// `is_error` output.
    pub async fn handle_call(&self, call: ToolCall) -> GatewayResult<CallDisposition> {
        let record = ToolCallRecord::pending(
            call.call_id.clone(),
            call.run_id.clone(),
            call.agent_id.clone(),
            ToolCallSpec {
                name: call.name.clone(),
                args_json: call.args_json.clone(),
            },
        );
        self.ledger.save(&record).await?;

        let request = PolicyRequest {
            tool_name: call.name.clone(),
            args_json: call.args_json.clone(),
            agent_id: call.agent_id.clone(),
        };
        let verdict = self.policy.decide(&request).await?;
        tracing::debug!(call = %call.call_id, tool = %call.name, decision = ?verdict.decision, "policy ruled");

        let (outcome, reason) = match verdict.decision {
            PolicyDecision::Allow => (DecisionOutcome::PolicyAllow, verdict.rationale),
            PolicyDecision::DenyAbort => {
                let reason = verdict.rationale.unwrap_or_else(|| "denied by policy".into());
                self.record_denial(record, DecisionOutcome::PolicyDenyAbort, Some(reason.clone()))
                    .await?;
                return Err(GatewayError::PolicyDenied {
                    tool: call.name,
                    reason,
                });
            },
            PolicyDecision::Ask => match self.await_human(&call).await? {
                HumanRuling::Approve => (DecisionOutcome::UserApprove, None),
                HumanRuling::DenyContinue { reason } => {
                    self.record_denial(record, DecisionOutcome::UserDenyContinue, reason.clone())
                        .await?;
                    return Ok(CallDisposition::DeniedContinue { reason });
                },
                HumanRuling::DenyAbort { reason } => {
                    self.record_denial(
                        record,
                        DecisionOutcome::UserDenyAbort,
                        Some(reason.clone()),
                    )
                    .await?;
                    return Err(GatewayError::PolicyDenied {
                        tool: call.name,
                        reason,
                    });
                },
            },
        };

        let record = record.with_decision(Decision {
            outcome,
            decided_at: Timestamp::now(),
            reason,
        })?;
        self.ledger.save(&record).await?;

        self.lock_inflight()?.insert(call.call_id.clone());
        let output = match self.executor.execute(&call).await {
            Ok(output) => output,
            Err(err) => {
                tracing::warn!(call = %call.call_id, error = %err, "executor failed; captured as error output");
                CallOutput::error(err.to_string())
            },
        };
        let save_result = match record.with_execution(Execution {
            completed_at: Timestamp::now(),
            output: output.clone(),
        }) {
            Ok(completed) => self.ledger.save(&completed).await.map_err(Into::into),
            Err(err) => Err(GatewayError::from(err)),
        };
        self.lock_inflight()?.remove(&call.call_id);
        save_result?;

        Ok(CallDisposition::Executed(output))
    }

    /// Synthesize a terminal state for every unsettled call.
    ///
    /// Used on shutdown or run cancellation: parked approvals are denied
    /// with abort semantics, pending records gain a denial, and executing
    /// records gain an error execution. Returns how many records were
    /// synthesized.
    ///
    /// # Errors
    ///
    /// Returns an error if the ledger cannot be read or written.
    pub async fn abort_in_flight(&self, reason: &str) -> GatewayResult<usize> {
        // Wake parked waiters first; their handlers settle as denials.
        for pending in self.hub.pending()? {
            self.hub.resolve(
                &pending.call_id,
                ApprovalOutcome::DenyAbort {
                    reason: Some(reason.to_string()),
                },
            )?;
        }

        let mut synthesized = 0usize;
        for record in self.ledger.list(None).await? {
            let updated = match record.phase() {
                CallPhase::Pending => record.with_decision(Decision {
                    outcome: DecisionOutcome::UserDenyAbort,
                    decided_at: Timestamp::now(),
                    reason: Some(reason.to_string()),
                })?,
                CallPhase::Executing => record.with_execution(Execution {
                    completed_at: Timestamp::now(),
                    output: CallOutput::error(reason),
                })?,
                CallPhase::Completed | CallPhase::Denied => continue,
            };
            self.ledger.save(&updated).await?;
            synthesized = synthesized.saturating_add(1);
        }
        tracing::info!(count = synthesized, "synthesized terminal states for in-flight calls");
        Ok(synthesized)
    }

    async fn await_human(&self, call: &ToolCall) -> GatewayResult<HumanRuling> {
        let pending = PendingApproval::new(
            call.call_id.clone(),
            call.name.clone(),
            call.args_json.clone(),
        );
        self.hub.register(pending.clone())?;
        if let Some(notify) = &self.pending_notifier {
            notify(&pending);
        }
        tracing::info!(call = %call.call_id, tool = %call.name, "call parked for human approval");

        match self.hub.await_decision(&call.call_id).await {
            Ok(ApprovalOutcome::Approve) => Ok(HumanRuling::Approve),
            Ok(ApprovalOutcome::DenyContinue { reason }) => Ok(HumanRuling::DenyContinue { reason }),
            Ok(ApprovalOutcome::DenyAbort { reason }) => Ok(HumanRuling::DenyAbort {
                reason: reason.unwrap_or_else(|| "denied by operator".into()),
            }),
            // No ruling inside the window: fail closed.
            Err(ApprovalError::Timeout { timeout_ms, .. }) => Ok(HumanRuling::DenyAbort {
                reason: format!("no approval within {timeout_ms}ms"),
            }),
            Err(err) => Err(err.into()),
        }
    }

    async fn record_denial(
        &self,
        record: ToolCallRecord,
        outcome: DecisionOutcome,
        reason: Option<String>,
    ) -> GatewayResult<()> {
        let denied = record.with_decision(Decision {
            outcome,
            decided_at: Timestamp::now(),
            reason,
        })?;
        self.ledger.save(&denied).await?;
        Ok(())
    }

    fn lock_inflight(&self) -> GatewayResult<std::sync::MutexGuard<'_, HashSet<CallId>>> {
        self.inflight
            .lock()
            .map_err(|_| GatewayError::Internal("in-flight set poisoned".into()))
    }
}

impl std::fmt::Debug for PolicyGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PolicyGateway").finish_non_exhaustive()
    }
}

enum HumanRuling {
    Approve,
    DenyContinue { reason: Option<String> },
    DenyAbort { reason: String },
}
