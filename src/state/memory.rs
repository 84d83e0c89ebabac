use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;

use crate::traits::KnowledgeStore;

/// In-memory knowledge store for tests; same contract as the SQLite
/// store.
#[derive(Default)]
pub struct MemoryKnowledgeStore {
    kv: RwLock<HashMap<String, Value>>,
    lists: RwLock<HashMap<String, Vec<String>>>,
}

impl MemoryKnowledgeStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KnowledgeStore for MemoryKnowledgeStore {
    async fn get(&self, key: &str) -> anyhow::Result<Option<Value>> {
        Ok(self.kv.read().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &Value) -> anyhow::Result<()> {
        self.kv.write().await.insert(key.to_string(), value.clone());
        Ok(())
    }

    async fn list_push(&self, list: &str, item: &str) -> anyhow::Result<()> {
        self.lists
            .write()
            .await
            .entry(list.to_string())
            .or_default()
            .push(item.to_string());
        Ok(())
    }

    async fn list_range(&self, list: &str, start: i64, stop: i64) -> anyhow::Result<Vec<String>> {
        let lists = self.lists.read().await;
        let items = lists.get(list).cloned().unwrap_or_default();
        Ok(super::sqlite::slice_range(items, start, stop))
    }

    async fn list_remove(&self, list: &str, item: &str) -> anyhow::Result<()> {
        let mut lists = self.lists.write().await;
        if let Some(items) = lists.get_mut(list) {
            if let Some(pos) = items.iter().position(|i| i == item) {
                items.remove(pos);
            }
        }
        Ok(())
    }
}
