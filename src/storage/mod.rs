//! Key/value persistence consumed by the rate limiter and the message queue.
//!
//! Entries are stored as `serde_json::Value`, so any backend that can keep
//! JSON documents under string keys satisfies the contract.
use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;

use crate::error::Result;

pub mod memory;

pub use memory::MemoryStorage;

#[async_trait]
pub trait Storage: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Value>>;
    async fn set(&self, key: &str, entry: Value) -> Result<()>;
    async fn delete(&self, key: &str) -> Result<()>;
    async fn clear(&self) -> Result<()>;
    /// All keys starting with `prefix`; used by background sweepers
    async fn keys(&self, prefix: &str) -> Result<Vec<String>>;
}

/// Fetch an entry and decode it
pub async fn get_typed<T: DeserializeOwned>(storage: &dyn Storage, key: &str) -> Result<Option<T>> {
    match storage.get(key).await? {
        Some(value) => Ok(Some(serde_json::from_value(value)?)),
        None => Ok(None),
    }
}

/// Encode and store an entry
pub async fn set_typed<T: Serialize + Sync>(storage: &dyn Storage, key: &str, entry: &T) -> Result<()> {
    let value = serde_json::to_value(entry)?;
    storage.set(key, value).await
}
