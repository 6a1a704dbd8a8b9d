//! Embedded-SQL Result Store provider: a single-file
//! SQLite database in the pack directory, one row per key, surviving
//! process restart.

use std::collections::HashSet;
use std::path::Path;

use parking_lot::Mutex;
use rusqlite::{Connection, OptionalExtension, params};

use super::{Capability, FilterOptions, FilterResult, ListOptions, ResultStoreProvider, StoredResult};
use crate::error::{EngineError, EngineResult};

pub struct SqliteResultStore {
    conn: Mutex<Connection>,
}

impl SqliteResultStore {
    pub fn open(path: &Path) -> EngineResult<Self> {
        let conn = Connection::open(path).map_err(|e| EngineError::Operational(format!("failed to open result store db: {}", e)))?;
        conn.execute_batch(
            "PRAGMA journal_mode=WAL;
             CREATE TABLE IF NOT EXISTS results (
                key TEXT PRIMARY KEY,
                pack_id TEXT NOT NULL,
                tool_name TEXT NOT NULL,
                inputs TEXT NOT NULL,
                collectibles TEXT NOT NULL,
                meta TEXT NOT NULL,
                collectible_schema TEXT NOT NULL,
                stored_at TEXT NOT NULL,
                ran_at TEXT NOT NULL,
                version INTEGER NOT NULL
             );",
        )
        .map_err(|e| EngineError::Operational(format!("failed to initialize result store schema: {}", e)))?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    fn row_to_result(row: &rusqlite::Row<'_>) -> rusqlite::Result<StoredResult> {
        let inputs: String = row.get("inputs")?;
        let collectibles: String = row.get("collectibles")?;
        let meta: String = row.get("meta")?;
        let collectible_schema: String = row.get("collectible_schema")?;
        Ok(StoredResult {
            key: row.get("key")?,
            pack_id: row.get("pack_id")?,
            tool_name: row.get("tool_name")?,
            inputs: serde_json::from_str(&inputs).unwrap_or(serde_json::Value::Null),
            collectibles: serde_json::from_str(&collectibles).unwrap_or(serde_json::Value::Null),
            meta: serde_json::from_str(&meta).unwrap_or(serde_json::Value::Null),
            collectible_schema: serde_json::from_str(&collectible_schema).unwrap_or(serde_json::Value::Null),
            stored_at: row.get("stored_at")?,
            ran_at: row.get("ran_at")?,
            version: row.get::<_, i64>("version")? as u64,
        })
    }
}

impl ResultStoreProvider for SqliteResultStore {
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
        let conn = self.conn.lock();
        let existing_version: Option<i64> = conn
            .query_row("SELECT version FROM results WHERE key = ?1", params![result.key], |row| row.get(0))
            .optional()
            .map_err(|e| EngineError::Operational(format!("result store query failed: {}", e)))?;
        result.version = existing_version.map(|v| v as u64 + 1).unwrap_or(1);

        conn.execute(
            "INSERT INTO results (key, pack_id, tool_name, inputs, collectibles, meta, collectible_schema, stored_at, ran_at, version)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
             ON CONFLICT(key) DO UPDATE SET
                pack_id = excluded.pack_id,
                tool_name = excluded.tool_name,
                inputs = excluded.inputs,
                collectibles = excluded.collectibles,
                meta = excluded.meta,
                collectible_schema = excluded.collectible_schema,
                stored_at = excluded.stored_at,
                ran_at = excluded.ran_at,
                version = excluded.version",
            params![
                result.key,
                result.pack_id,
                result.tool_name,
                serde_json::to_string(&result.inputs)?,
                serde_json::to_string(&result.collectibles)?,
                serde_json::to_string(&result.meta)?,
                serde_json::to_string(&result.collectible_schema)?,
                result.stored_at,
                result.ran_at,
                result.version as i64,
            ],
        )
        .map_err(|e| EngineError::Operational(format!("result store upsert failed: {}", e)))?;

        Ok(result)
    }

    fn get(&self, key: &str) -> EngineResult<Option<StoredResult>> {
        let conn = self.conn.lock();
        conn.query_row("SELECT * FROM results WHERE key = ?1", params![key], Self::row_to_result)
            .optional()
            .map_err(|e| EngineError::Operational(format!("result store lookup failed: {}", e)))
    }

    fn list(&self, opts: ListOptions) -> EngineResult<Vec<StoredResult>> {
        let conn = self.conn.lock();
        let limit = opts.limit.unwrap_or(usize::MAX) as i64;
        let offset = opts.offset.unwrap_or(0) as i64;
        let mut stmt = conn
            .prepare("SELECT * FROM results ORDER BY stored_at ASC LIMIT ?1 OFFSET ?2")
            .map_err(|e| EngineError::Operational(format!("result store list failed: {}", e)))?;
        let rows = stmt
            .query_map(params![limit, offset], Self::row_to_result)
            .map_err(|e| EngineError::Operational(format!("result store list failed: {}", e)))?;
        rows.collect::<Result<Vec<_>, _>>()
            .map_err(|e| EngineError::Operational(format!("result store list failed: {}", e)))
    }

    fn delete(&self, key: &str) -> EngineResult<bool> {
        let conn = self.conn.lock();
        let deleted = conn
            .execute("DELETE FROM results WHERE key = ?1", params![key])
            .map_err(|e| EngineError::Operational(format!("result store delete failed: {}", e)))?;
        Ok(deleted > 0)
    }

    fn filter(&self, opts: FilterOptions<'_>) -> EngineResult<FilterResult> {
        match opts.key {
            Some(key) => {
                let collectibles = self.get(key)?.map(|r| r.collectibles).unwrap_or(serde_json::Value::Null);
                super::apply_filter_semantics(&collectibles, &opts)
            }
            None => {
                let all = self.list(ListOptions::default())?;
                let collectibles: Vec<serde_json::Value> = all.into_iter().map(|r| r.collectibles).collect();
                super::apply_filter_semantics(&serde_json::Value::Array(collectibles), &opts)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

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
    fn store_and_get_round_trip() {
        let dir = tempdir().unwrap();
        let store = SqliteResultStore::open(&dir.path().join("results.db")).unwrap();
        let stored = store.store(sample("k1")).unwrap();
        assert_eq!(stored.version, 1);
        let fetched = store.get("k1").unwrap().unwrap();
        assert_eq!(fetched.collectibles, json!({"a": 1}));
    }

    #[test]
    fn upsert_increments_version_and_survives_reopen() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("results.db");
        {
            let store = SqliteResultStore::open(&db_path).unwrap();
            store.store(sample("k1")).unwrap();
        }
        let store2 = SqliteResultStore::open(&db_path).unwrap();
        let second = store2.store(sample("k1")).unwrap();
        assert_eq!(second.version, 2);
    }
}
