//! In-memory document store for tests.

use super::{validate_key, DocumentStore, StoreError, StoreResult};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

/// Mock document store
#[derive(Clone, Default)]
pub struct MemoryDocumentStore {
    state: Arc<Mutex<MemoryState>>,
}

#[derive(Default)]
struct MemoryState {
    documents: BTreeMap<String, Value>,
    fail_reads: bool,
    fail_writes: bool,
    writes: u32,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every read (`get`, `exists`, `keys`) fail
    pub fn fail_reads(&self, fail: bool) {
        self.state.lock().unwrap().fail_reads = fail;
    }

    /// Make every `put` fail
    pub fn fail_writes(&self, fail: bool) {
        self.state.lock().unwrap().fail_writes = fail;
    }

    /// Number of successful writes
    pub fn writes(&self) -> u32 {
        self.state.lock().unwrap().writes
    }

    /// Direct view of a document for assertions
    pub fn document(&self, key: &str) -> Option<Value> {
        self.state.lock().unwrap().documents.get(key).cloned()
    }

    fn read_guard(&self) -> StoreResult<std::sync::MutexGuard<'_, MemoryState>> {
        let state = self.state.lock().unwrap();
        if state.fail_reads {
            return Err(StoreError::Backend("injected read failure".to_string()));
        }
        Ok(state)
    }
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn exists(&self, key: &str) -> StoreResult<bool> {
        validate_key(key)?;
        Ok(self.read_guard()?.documents.contains_key(key))
    }

    async fn get(&self, key: &str) -> StoreResult<Option<Value>> {
        validate_key(key)?;
        Ok(self.read_guard()?.documents.get(key).cloned())
    }

    async fn put(&self, key: &str, document: &Value) -> StoreResult<()> {
        validate_key(key)?;
        let mut state = self.state.lock().unwrap();
        if state.fail_writes {
            return Err(StoreError::Backend("injected write failure".to_string()));
        }
        state.documents.insert(key.to_string(), document.clone());
        state.writes += 1;
        Ok(())
    }

    async fn keys(&self) -> StoreResult<Vec<String>> {
        Ok(self.read_guard()?.documents.keys().cloned().collect())
    }
}
