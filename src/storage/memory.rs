use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;

use super::Storage;
use crate::error::Result;

/// In-process storage backed by a concurrent map
#[derive(Debug, Default)]
pub struct MemoryStorage {
    entries: DashMap<String, Value>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        Ok(self.entries.get(key).map(|entry| entry.value().clone()))
    }

    async fn set(&self, key: &str, entry: Value) -> Result<()> {
        self.entries.insert(key.to_string(), entry);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.entries.remove(key);
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        self.entries.clear();
        Ok(())
    }

    async fn keys(&self, prefix: &str) -> Result<Vec<String>> {
        Ok(self
            .entries
            .iter()
            .filter(|entry| entry.key().starts_with(prefix))
            .map(|entry| entry.key().clone())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{get_typed, set_typed};
    use serde_json::json;

    #[tokio::test]
    async fn set_get_delete() {
        let storage = MemoryStorage::new();
        storage.set("a", json!({"count": 1})).await.unwrap();
        assert_eq!(storage.get("a").await.unwrap(), Some(json!({"count": 1})));

        storage.delete("a").await.unwrap();
        assert_eq!(storage.get("a").await.unwrap(), None);
        assert!(storage.is_empty());
    }

    #[tokio::test]
    async fn keys_by_prefix_and_clear() {
        let storage = MemoryStorage::new();
        storage.set("rl:one", json!(1)).await.unwrap();
        storage.set("rl:two", json!(2)).await.unwrap();
        storage.set("queue", json!([])).await.unwrap();

        let mut keys = storage.keys("rl:").await.unwrap();
        keys.sort();
        assert_eq!(keys, vec!["rl:one".to_string(), "rl:two".to_string()]);

        storage.clear().await.unwrap();
        assert_eq!(storage.len(), 0);
    }

    #[tokio::test]
    async fn typed_helpers_round_trip() {
        let storage = MemoryStorage::new();
        set_typed(&storage, "list", &vec![1u32, 2, 3]).await.unwrap();
        let got: Option<Vec<u32>> = get_typed(&storage, "list").await.unwrap();
        assert_eq!(got, Some(vec![1, 2, 3]));
        let missing: Option<Vec<u32>> = get_typed(&storage, "nope").await.unwrap();
        assert!(missing.is_none());
    }
}
