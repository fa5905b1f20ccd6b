//! The approval hub.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use warden_core::{CallId, Timestamp};

use crate::error::{ApprovalError, ApprovalResult};

/// How a human resolved a pending call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum ApprovalOutcome {
    /// Let the call execute.
    Approve,
    /// Skip this call but let the run continue.
    DenyContinue {
        /// Optional rationale shown to the agent.
        reason: Option<String>,
    },
    /// Deny the call and abort the run.
    DenyAbort {
        /// Optional rationale shown to the agent.
        reason: Option<String>,
    },
}

/// A call parked in the hub awaiting a ruling.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingApproval {
    /// The parked call.
    pub call_id: CallId,
    /// Tool name, for operator display.
    pub tool_name: String,
    /// Tool arguments as JSON, for operator display.
    pub args_json: Option<String>,
    /// When the call was parked.
    pub registered_at: Timestamp,
}

impl PendingApproval {
    /// Create a pending entry for a call, stamped with the current time.
    #[must_use]
    pub fn new(call_id: CallId, tool_name: impl Into<String>, args_json: Option<String>) -> Self {
        Self {
            call_id,
            tool_name: tool_name.into(),
            args_json,
            registered_at: Timestamp::now(),
        }
    }
}

/// Hub configuration.
#[derive(Debug, Clone, Copy, Default)]
pub struct HubConfig {
    /// How long a waiter blocks before the hub gives up on a ruling.
    ///
    /// `None` waits indefinitely. Callers that cannot tolerate an
    /// unbounded suspension should set a window and treat the resulting
    /// timeout as a denial.
    pub decision_timeout: Option<Duration>,
}

struct HubState {
    waiters: HashMap<CallId, oneshot::Sender<ApprovalOutcome>>,
    receivers: HashMap<CallId, oneshot::Receiver<ApprovalOutcome>>,
    pending: HashMap<CallId, PendingApproval>,
}

/// Tracks calls suspended on human approval and routes rulings to waiters.
///
/// `resolve` is idempotent: the first ruling for a call wins, and any later
/// ruling for the same (or an unknown) call is a no-op. This lets multiple
/// operator surfaces race on the same pending call without coordination.
pub struct ApprovalHub {
    state: Mutex<HubState>,
    config: HubConfig,
}

impl ApprovalHub {
    /// Create a hub with the given configuration.
    #[must_use]
    pub fn new(config: HubConfig) -> Self {
        Self {
            state: Mutex::new(HubState {
                waiters: HashMap::new(),
                receivers: HashMap::new(),
                pending: HashMap::new(),
            }),
            config,
        }
    }

    fn lock(&self) -> ApprovalResult<std::sync::MutexGuard<'_, HubState>> {
        self.state
            .lock()
            .map_err(|_| ApprovalError::Internal("hub lock poisoned".into()))
    }

    /// Park a call and make it visible to operators.
    ///
    /// Registering the same call ID twice replaces the earlier entry; the
    /// earlier waiter (if any) observes a closed channel.
    ///
    /// # Errors
    ///
    /// Returns [`ApprovalError::Internal`] only if the hub lock is poisoned.
    pub fn register(&self, pending: PendingApproval) -> ApprovalResult<()> {
        let (tx, rx) = oneshot::channel();
        let call_id = pending.call_id.clone();
        let mut state = self.lock()?;
        if state.pending.contains_key(&call_id) {
            tracing::warn!(%call_id, "replacing existing approval registration");
        }
        state.waiters.insert(call_id.clone(), tx);
        state.receivers.insert(call_id.clone(), rx);
        state.pending.insert(call_id, pending);
        Ok(())
    }

    /// Block until someone rules on a registered call.
    ///
    /// Consumes the registration: a second await for the same call returns
    /// [`ApprovalError::NotRegistered`].
    ///
    /// # Errors
    ///
    /// - [`ApprovalError::NotRegistered`] if the call was never parked
    /// - [`ApprovalError::Timeout`] if the configured window elapses first
    /// - [`ApprovalError::ChannelClosed`] if the registration was replaced
    ///   or the hub was torn down mid-wait
    pub async fn await_decision(&self, call_id: &CallId) -> ApprovalResult<ApprovalOutcome> {
        let rx = self
            .lock()?
            .receivers
            .remove(call_id)
            .ok_or_else(|| ApprovalError::NotRegistered {
                call_id: call_id.clone(),
            })?;

        let outcome = match self.config.decision_timeout {
            Some(window) => match tokio::time::timeout(window, rx).await {
                Ok(received) => received,
                Err(_) => {
                    self.forget(call_id)?;
                    return Err(ApprovalError::Timeout {
                        call_id: call_id.clone(),
                        timeout_ms: u64::try_from(window.as_millis()).unwrap_or(u64::MAX),
                    });
                },
            },
            None => rx.await,
        };

        outcome.map_err(|_| {
            let _ = self.forget(call_id);
            ApprovalError::ChannelClosed {
                call_id: call_id.clone(),
            }
        })
    }

    /// Rule on a parked call. Returns `true` if a waiter was woken.
    ///
    /// Unknown or already-resolved call IDs are no-ops, so duplicate
    /// resolutions from racing operator surfaces are harmless.
    ///
    /// # Errors
    ///
    /// Returns [`ApprovalError::Internal`] only if the hub lock is poisoned.
    pub fn resolve(&self, call_id: &CallId, outcome: ApprovalOutcome) -> ApprovalResult<bool> {
        let sender = {
            let mut state = self.lock()?;
            state.pending.remove(call_id);
            state.waiters.remove(call_id)
        };
        match sender {
            Some(tx) => {
                // A timed-out waiter may have dropped the receiver already.
                if tx.send(outcome).is_err() {
                    tracing::debug!(%call_id, "approval resolved after waiter gave up");
                    return Ok(false);
                }
                Ok(true)
            },
            None => {
                tracing::debug!(%call_id, "ignoring resolution for unknown or settled call");
                Ok(false)
            },
        }
    }

    /// Snapshot of parked calls, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`ApprovalError::Internal`] only if the hub lock is poisoned.
    pub fn pending(&self) -> ApprovalResult<Vec<PendingApproval>> {
        let state = self.lock()?;
        let mut entries: Vec<PendingApproval> = state.pending.values().cloned().collect();
        entries.sort_by_key(|p| p.registered_at);
        Ok(entries)
    }

    /// Whether a specific call is still parked.
    ///
    /// # Errors
    ///
    /// Returns [`ApprovalError::Internal`] only if the hub lock is poisoned.
    pub fn is_pending(&self, call_id: &CallId) -> ApprovalResult<bool> {
        Ok(self.lock()?.pending.contains_key(call_id))
    }

    /// Drop all hub state for a call without waking anyone.
    fn forget(&self, call_id: &CallId) -> ApprovalResult<()> {
        let mut state = self.lock()?;
        state.waiters.remove(call_id);
        state.receivers.remove(call_id);
        state.pending.remove(call_id);
        Ok(())
    }
}

impl Default for ApprovalHub {
    fn default() -> Self {
        Self::new(HubConfig::default())
    }
}

impl std::fmt::Debug for ApprovalHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApprovalHub")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn pending(id: &str) -> PendingApproval {
        PendingApproval::new(CallId::new(id), "exec", None)
    }

    #[tokio::test]
    async fn resolve_wakes_the_waiter() {
        let hub = Arc::new(ApprovalHub::default());
        hub.register(pending("c1")).unwrap();

        let waiter = {
            let hub = Arc::clone(&hub);
            tokio::spawn(async move { hub.await_decision(&CallId::new("c1")).await })
        };
        tokio::task::yield_now().await;

        let woke = hub.resolve(&CallId::new("c1"), ApprovalOutcome::Approve).unwrap();
        assert!(woke);
        assert_eq!(waiter.await.unwrap().unwrap(), ApprovalOutcome::Approve);
        assert!(hub.pending().unwrap().is_empty());
    }

    #[tokio::test]
    async fn first_resolution_wins() {
        let hub = Arc::new(ApprovalHub::default());
        hub.register(pending("c1")).unwrap();

        let waiter = {
            let hub = Arc::clone(&hub);
            tokio::spawn(async move { hub.await_decision(&CallId::new("c1")).await })
        };
        tokio::task::yield_now().await;

        assert!(
            hub.resolve(
                &CallId::new("c1"),
                ApprovalOutcome::DenyAbort { reason: None },
            )
            .unwrap()
        );
        // Duplicate from a racing operator surface.
        assert!(
            !hub.resolve(&CallId::new("c1"), ApprovalOutcome::Approve)
                .unwrap()
        );
        assert_eq!(
            waiter.await.unwrap().unwrap(),
            ApprovalOutcome::DenyAbort { reason: None },
        );
    }

    #[tokio::test]
    async fn resolving_an_unknown_call_is_a_noop() {
        let hub = ApprovalHub::default();
        assert!(
            !hub.resolve(&CallId::new("ghost"), ApprovalOutcome::Approve)
                .unwrap()
        );
    }

    #[tokio::test]
    async fn awaiting_an_unregistered_call_fails() {
        let hub = ApprovalHub::default();
        let err = hub.await_decision(&CallId::new("c1")).await.unwrap_err();
        assert!(matches!(err, ApprovalError::NotRegistered { .. }));
    }

    #[tokio::test]
    async fn decision_window_elapsing_times_out_and_unparks() {
        let hub = ApprovalHub::new(HubConfig {
            decision_timeout: Some(Duration::from_millis(20)),
        });
        hub.register(pending("c1")).unwrap();

        let err = hub.await_decision(&CallId::new("c1")).await.unwrap_err();
        assert!(matches!(err, ApprovalError::Timeout { .. }));
        assert!(!hub.is_pending(&CallId::new("c1")).unwrap());
    }

    #[tokio::test]
    async fn pending_lists_oldest_first() {
        let hub = ApprovalHub::default();
        hub.register(pending("c1")).unwrap();
        hub.register(pending("c2")).unwrap();

        let snapshot = hub.pending().unwrap();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot[0].call_id, CallId::new("c1"));
        assert_eq!(snapshot[1].call_id, CallId::new("c2"));
        assert!(hub.is_pending(&CallId::new("c2")).unwrap());
    }

    #[tokio::test]
    async fn deny_continue_carries_its_reason() {
        let hub = Arc::new(ApprovalHub::default());
        hub.register(pending("c1")).unwrap();

        let waiter = {
            let hub = Arc::clone(&hub);
            tokio::spawn(async move { hub.await_decision(&CallId::new("c1")).await })
        };
        tokio::task::yield_now().await;

        hub.resolve(
            &CallId::new("c1"),
            ApprovalOutcome::DenyContinue {
                reason: Some("not now".into()),
            },
        )
        .unwrap();

        assert_eq!(
            waiter.await.unwrap().unwrap(),
            ApprovalOutcome::DenyContinue {
                reason: Some("not now".into()),
            },
        );
    }
}
