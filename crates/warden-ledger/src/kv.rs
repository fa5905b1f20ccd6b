//! Key-value storage trait and the embedded in-memory implementation.
//!
//! The ledger treats durability as a pluggable concern: it serializes
//! records itself and only asks the backing store for namespaced byte-level
//! `get`/`set`/`delete`/`list`. [`MemoryKvStore`] is the always-available
//! backend used in tests and single-process deployments; persistent backends
//! implement the same trait.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;

use crate::error::{LedgerError, LedgerResult};

/// Validate that a namespace is safe for use as a key prefix.
///
/// Namespaces must be non-empty and must not contain the null byte
/// (used internally as the namespace/key separator).
fn validate_namespace(namespace: &str) -> LedgerResult<()> {
    if namespace.is_empty() {
        return Err(LedgerError::InvalidKey(
            "namespace must not be empty".into(),
        ));
    }
    if namespace.contains('\0') {
        return Err(LedgerError::InvalidKey(
            "namespace must not contain null bytes".into(),
        ));
    }
    Ok(())
}

/// Validate that a key is safe for storage.
fn validate_key(key: &str) -> LedgerResult<()> {
    if key.is_empty() {
        return Err(LedgerError::InvalidKey("key must not be empty".into()));
    }
    if key.contains('\0') {
        return Err(LedgerError::InvalidKey(
            "key must not contain null bytes".into(),
        ));
    }
    Ok(())
}

/// Build the composite key `"{namespace}\0{key}"`.
fn composite_key(namespace: &str, key: &str) -> String {
    format!("{namespace}\0{key}")
}

/// Namespaced byte-level key-value store.
///
/// All operations validate the namespace and key before touching the
/// backend, so implementations may assume both are well-formed.
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Get the value for a key, or `None` if absent.
    async fn get(&self, namespace: &str, key: &str) -> LedgerResult<Option<Vec<u8>>>;

    /// Set the value for a key, overwriting any previous value.
    async fn set(&self, namespace: &str, key: &str, value: Vec<u8>) -> LedgerResult<()>;

    /// Delete a key. Deleting an absent key is not an error.
    async fn delete(&self, namespace: &str, key: &str) -> LedgerResult<()>;

    /// List all keys in a namespace, in unspecified order.
    async fn list_keys(&self, namespace: &str) -> LedgerResult<Vec<String>>;
}

/// In-memory [`KvStore`] backed by a `HashMap`.
///
/// Contents are lost on drop. Cloning is not supported; share via `Arc`.
#[derive(Debug, Default)]
pub struct MemoryKvStore {
    entries: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemoryKvStore {
    /// Create an empty in-memory store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn read_guard(
        &self,
    ) -> LedgerResult<std::sync::RwLockReadGuard<'_, HashMap<String, Vec<u8>>>> {
        self.entries
            .read()
            .map_err(|_| LedgerError::Storage("kv store lock poisoned".into()))
    }

    fn write_guard(
        &self,
    ) -> LedgerResult<std::sync::RwLockWriteGuard<'_, HashMap<String, Vec<u8>>>> {
        self.entries
            .write()
            .map_err(|_| LedgerError::Storage("kv store lock poisoned".into()))
    }
}

#[async_trait]
impl KvStore for MemoryKvStore {
    async fn get(&self, namespace: &str, key: &str) -> LedgerResult<Option<Vec<u8>>> {
        validate_namespace(namespace)?;
        validate_key(key)?;
        let entries = self.read_guard()?;
        Ok(entries.get(&composite_key(namespace, key)).cloned())
    }

    async fn set(&self, namespace: &str, key: &str, value: Vec<u8>) -> LedgerResult<()> {
        validate_namespace(namespace)?;
        validate_key(key)?;
        let mut entries = self.write_guard()?;
        entries.insert(composite_key(namespace, key), value);
        Ok(())
    }

    async fn delete(&self, namespace: &str, key: &str) -> LedgerResult<()> {
        validate_namespace(namespace)?;
        validate_key(key)?;
        let mut entries = self.write_guard()?;
        entries.remove(&composite_key(namespace, key));
        Ok(())
    }

    async fn list_keys(&self, namespace: &str) -> LedgerResult<Vec<String>> {
        validate_namespace(namespace)?;
        let prefix = format!("{namespace}\0");
        let entries = self.read_guard()?;
        Ok(entries
            .keys()
            .filter_map(|k| k.strip_prefix(&prefix))
            .map(ToString::to_string)
            .collect())
    }
}
