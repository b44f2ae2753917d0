//! Durable per-user document storage.
//!
//! ## Storage Model
//!
//! - One JSON document per user, keyed by the user id (`"{user_id}"`)
//! - Documents hold the user's preferences: `{ "template": ..., "session": ... }`
//! - Writes merge fields into the existing document; unknown fields survive
//!
//! Backends:
//! - **File**: one `{key}.json` file per document, atomically replaced
//! - **Memory**: in-process map for tests, with failure injection

pub mod file;
pub mod memory;
pub mod preferences;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

pub use file::FileDocumentStore;
pub use memory::MemoryDocumentStore;
pub use preferences::{PreferenceStore, UserPreferences};

/// Errors that can occur during document storage operations
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid document key: {0}")]
    InvalidKey(String),

    #[error("Storage backend error: {0}")]
    Backend(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Key/value document store.
///
/// Keys are plain identifiers (no path separators). Documents are JSON
/// values; callers own their schema.
#[async_trait]
pub trait DocumentStore: Send + Sync + 'static {
    /// Whether a document exists under `key`
    async fn exists(&self, key: &str) -> StoreResult<bool>;

    /// Fetch the document under `key`, `None` if absent
    async fn get(&self, key: &str) -> StoreResult<Option<Value>>;

    /// Replace the document under `key`
    async fn put(&self, key: &str, document: &Value) -> StoreResult<()>;

    /// All keys currently present
    async fn keys(&self) -> StoreResult<Vec<String>>;
}

/// Reject keys that could escape the store's namespace
pub(crate) fn validate_key(key: &str) -> StoreResult<()> {
    let valid = !key.is_empty()
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if valid {
        Ok(())
    } else {
        Err(StoreError::InvalidKey(key.to_string()))
    }
}
