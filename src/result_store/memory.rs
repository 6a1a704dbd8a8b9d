//! In-memory Result Store provider: for tests and ephemeral
//! use. Not persisted across process restarts.

use std::collections::{HashMap, HashSet};

use parking_lot::RwLock;

use super::{Capability, FilterOptions, FilterResult, ListOptions, ResultStoreProvider, StoredResult};
use crate::error::EngineResult;

#[derive(Default)]
pub struct InMemoryResultStore {
    entries: RwLock<HashMap<String, StoredResult>>,
}

impl InMemoryResultStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ResultStoreProvider for InMemoryResultStore {
    fn capabilities(&self) -> HashSet<Capability> {
        [
            Capability::Get,
            Capability::Store,
            Capability::List,
            Capability::Delete,
            Capability::Filter,
        ]
        .into_iter()
        .collect()
    }

    fn store(&self, mut result: StoredResult) -> EngineResult<StoredResult> {
        let mut entries = self.entries.write();
        result.version = entries.get(&result.key).map(|existing| existing.version + 1).unwrap_or(1);
        entries.insert(result.key.clone(), result.clone());
        Ok(result)
    }

    fn get(&self, key: &str) -> EngineResult<Option<StoredResult>> {
        Ok(self.entries.read().get(key).cloned())
    }

    fn list(&self, opts: ListOptions) -> EngineResult<Vec<StoredResult>> {
        let entries = self.entries.read();
        let mut all: Vec<StoredResult> = entries.values().cloned().collect();
        all.sort_by_key(|r| r.stored_at);
        let offset = opts.offset.unwrap_or(0);
        let iter = all.into_iter().skip(offset);
        Ok(match opts.limit {
            Some(limit) => iter.take(limit).collect(),
            None => iter.collect(),
        })
    }

    fn delete(&self, key: &str) -> EngineResult<bool> {
        Ok(self.entries.write().remove(key).is_some())
    }

    fn filter(&self, opts: FilterOptions<'_>) -> EngineResult<FilterResult> {
        let entries = self.entries.read();
        match opts.key {
            Some(key) => {
                let collectibles = entries.get(key).map(|r| r.collectibles.clone()).unwrap_or(serde_json::Value::Null);
                super::apply_filter_semantics(&collectibles, &opts)
            }
            None => {
                let all: Vec<serde_json::Value> = entries.values().map(|r| r.collectibles.clone()).collect();
                super::apply_filter_semantics(&serde_json::Value::Array(all), &opts)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample(key: &str) -> StoredResult {
        StoredResult {
            key: key.to_string(),
            pack_id: "pack".to_string(),
            tool_name: "tool".to_string(),
            inputs: json!({}),
            collectibles: json!({"a": 1}),
            meta: json!({}),
            collectible_schema: json!({}),
            stored_at: chrono::Utc::now(),
            ran_at: chrono::Utc::now(),
            version: 0,
        }
    }

    #[test]
    fn store_upserts_and_increments_version() {
        let store = InMemoryResultStore::new();
        let first = store.store(sample("k1")).unwrap();
        assert_eq!(first.version, 1);
        let second = store.store(sample("k1")).unwrap();
        assert_eq!(second.version, 2);
    }

    #[test]
    fn get_returns_stored_value() {
        let store = InMemoryResultStore::new();
        store.store(sample("k1")).unwrap();
        let fetched = store.get("k1").unwrap();
        assert!(fetched.is_some());
        assert_eq!(fetched.unwrap().key, "k1");
    }

    #[test]
    fn delete_removes_entry() {
        let store = InMemoryResultStore::new();
        store.store(sample("k1")).unwrap();
        assert!(store.delete("k1").unwrap());
        assert!(store.get("k1").unwrap().is_none());
        assert!(!store.delete("k1").unwrap());
    }
}
