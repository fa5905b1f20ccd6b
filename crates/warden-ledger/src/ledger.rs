//! The tool-call ledger.

use std::sync::Arc;

use warden_core::{CallId, RunId};

use crate::error::LedgerResult;
use crate::kv::KvStore;
use crate::record::ToolCallRecord;

/// Default storage namespace for tool-call records.
const DEFAULT_NAMESPACE: &str = "tool_calls";

/// Durable ledger of tool-call records, keyed by call ID.
///
/// `save` is an upsert: the gateway writes the same record repeatedly as it
/// moves through its lifecycle, and the last write wins. The ledger does not
/// police lifecycle transitions itself; [`ToolCallRecord`](crate::record)
/// construction does.
pub struct ToolCallLedger {
    store: Arc<dyn KvStore>,
    namespace: String,
}

impl ToolCallLedger {
    /// Create a ledger over the given store with the default namespace.
    #[must_use]
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self {
            store,
            namespace: DEFAULT_NAMESPACE.to_string(),
        }
    }

    /// Create a ledger with a custom storage namespace.
    #[must_use]
    pub fn with_namespace(store: Arc<dyn KvStore>, namespace: impl Into<String>) -> Self {
        Self {
            store,
            namespace: namespace.into(),
        }
    }

    /// Persist a record, overwriting any previous version for its call ID.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or the underlying store fails.
    pub async fn save(&self, record: &ToolCallRecord) -> LedgerResult<()> {
        let bytes = serde_json::to_vec(record)?;
        self.store
            .set(&self.namespace, record.call_id.as_str(), bytes)
            .await
    }

    /// Fetch a record by call ID, or `None` if never saved.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails or the stored bytes do not parse.
    pub async fn get(&self, call_id: &CallId) -> LedgerResult<Option<ToolCallRecord>> {
        match self.store.get(&self.namespace, call_id.as_str()).await? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    /// List records, optionally filtered to one run, oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails or any stored record is corrupt.
    pub async fn list(&self, run_id: Option<&RunId>) -> LedgerResult<Vec<ToolCallRecord>> {
        let keys = self.store.list_keys(&self.namespace).await?;
        let mut records = Vec::with_capacity(keys.len());
        for key in keys {
            if let Some(bytes) = self.store.get(&self.namespace, &key).await? {
                let record: ToolCallRecord = serde_json::from_slice(&bytes)?;
                if run_id.is_none() || record.run_id.as_ref() == run_id {
                    records.push(record);
                }
            }
        }
        records.sort_by_key(|r| r.created_at);
        Ok(records)
    }
}

impl std::fmt::Debug for ToolCallLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolCallLedger")
            .field("namespace", &self.namespace)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::MemoryKvStore;
    use crate::record::{Decision, DecisionOutcome, ToolCallSpec};
    use warden_core::{AgentId, Timestamp};

    fn ledger() -> ToolCallLedger {
        ToolCallLedger::new(Arc::new(MemoryKvStore::new()))
    }

    fn record(call_id: &str, run_id: Option<&str>) -> ToolCallRecord {
        ToolCallRecord::pending(
            CallId::new(call_id),
            run_id.map(RunId::new),
            AgentId::new("agent-a"),
            ToolCallSpec {
                name: "exec".into(),
                args_json: None,
            },
        )
    }

    #[tokio::test]
    async fn save_then_get_roundtrips() {
        let ledger = ledger();
        let rec = record("c1", Some("r1"));
        ledger.save(&rec).await.unwrap();
        assert_eq!(ledger.get(&CallId::new("c1")).await.unwrap(), Some(rec));
    }

    #[tokio::test]
    async fn get_unknown_call_returns_none() {
        let ledger = ledger();
        assert_eq!(ledger.get(&CallId::new("nope")).await.unwrap(), None);
    }

    #[tokio::test]
    async fn save_is_an_upsert_keyed_by_call_id() {
        let ledger = ledger();
        let rec = record("c1", None);
        ledger.save(&rec).await.unwrap();

        let decided = rec
            .with_decision(Decision {
                outcome: DecisionOutcome::PolicyAllow,
                decided_at: Timestamp::now(),
                reason: None,
            })
            .unwrap();
        ledger.save(&decided).await.unwrap();

        let stored = ledger.get(&CallId::new("c1")).await.unwrap().unwrap();
        assert!(stored.decision.is_some());
        assert_eq!(ledger.list(None).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn list_filters_by_run_and_sorts_by_creation() {
        let ledger = ledger();
        let a = record("c1", Some("r1"));
        let b = record("c2", Some("r2"));
        let c = record("c3", Some("r1"));
        for rec in [&a, &b, &c] {
            ledger.save(rec).await.unwrap();
        }

        let run1 = ledger.list(Some(&RunId::new("r1"))).await.unwrap();
        assert_eq!(run1.len(), 2);
        assert_eq!(run1[0].call_id, CallId::new("c1"));
        assert_eq!(run1[1].call_id, CallId::new("c3"));

        let all = ledger.list(None).await.unwrap();
        assert_eq!(all.len(), 3);
    }
}
