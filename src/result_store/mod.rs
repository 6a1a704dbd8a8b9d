//! Result Store: persists collectibles from successful runs, keyed by content hash.
//!
//! Content-addressed persistence of a run's collectibles, keyed by
//! `generateResultKey(packId, inputs)`. Two providers are required: an
//! in-memory map for tests/ephemeral use, and an embedded-SQLite provider
//! that survives restart.

pub mod key;
pub mod memory;
pub mod sqlite;

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{EngineError, EngineResult};

pub use key::generate_result_key;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredResult {
    pub key: String,
    pub pack_id: String,
    pub tool_name: String,
    pub inputs: Value,
    pub collectibles: Value,
    #[serde(default)]
    pub meta: Value,
    #[serde(default)]
    pub collectible_schema: Value,
    pub stored_at: chrono::DateTime<chrono::Utc>,
    pub ran_at: chrono::DateTime<chrono::Utc>,
    pub version: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    Get,
    Store,
    List,
    Delete,
    Filter,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ListOptions {
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDir {
    Asc,
    Desc,
}

#[derive(Debug, Clone)]
pub struct FilterOptions<'a> {
    pub key: Option<&'a str>,
    pub jmespath: Option<&'a str>,
    pub sort_by: Option<&'a str>,
    pub sort_dir: Option<SortDir>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

pub struct FilterResult {
    pub data: Value,
    pub total: Option<usize>,
}

/// Provider contract. `get`/`store` are mandatory; the rest
/// are feature-detected via `capabilities()`.
pub trait ResultStoreProvider: Send + Sync {
    fn capabilities(&self) -> HashSet<Capability>;

    /// UPSERT: on an existing key, increment `version`; otherwise `version = 1`.
    fn store(&self, result: StoredResult) -> EngineResult<StoredResult>;

    fn get(&self, key: &str) -> EngineResult<Option<StoredResult>>;

    fn list(&self, _opts: ListOptions) -> EngineResult<Vec<StoredResult>> {
        Err(EngineError::Operational("list is not supported by this provider".to_string()))
    }

    fn delete(&self, _key: &str) -> EngineResult<bool> {
        Err(EngineError::Operational("delete is not supported by this provider".to_string()))
    }

    fn filter(&self, _opts: FilterOptions<'_>) -> EngineResult<FilterResult> {
        Err(EngineError::Operational("filter is not supported by this provider".to_string()))
    }
}

/// Apply a JMESPath expression to JSON `data`, returning the matched value.
/// Shared by the Result Store's `filter` and the Replay Engine's
/// `response.jsonPath` extraction.
pub fn jmespath_query(data: &Value, expression: &str) -> EngineResult<Value> {
    let expr = jmespath::compile(expression)
        .map_err(|e| EngineError::Operational(format!("invalid jmespath expression '{}': {}", expression, e)))?;
    let variable = jmespath::Variable::from(data.clone());
    let result = expr
        .search(variable)
        .map_err(|e| EngineError::Operational(format!("jmespath query failed: {}", e)))?;
    serde_json::to_value(result.as_ref())
        .map_err(|e| EngineError::Operational(format!("failed to convert jmespath result: {}", e)))
}

/// Shared filter semantics: apply JMESPath to the stored
/// collectibles, then if the result is an array and `sort_by` is given,
/// sort stably with nulls sorting last regardless of direction, then
/// paginate.
pub fn apply_filter_semantics(collectibles: &Value, opts: &FilterOptions<'_>) -> EngineResult<FilterResult> {
    let queried = match opts.jmespath {
        Some(expr) => jmespath_query(collectibles, expr)?,
        None => collectibles.clone(),
    };

    let Value::Array(mut items) = queried else {
        return Ok(FilterResult { data: queried, total: None });
    };

    if let Some(sort_by) = opts.sort_by {
        let dir = opts.sort_dir.unwrap_or(SortDir::Asc);
        items.sort_by(|a, b| {
            let av = a.get(sort_by);
            let bv = b.get(sort_by);
            compare_nulls_last(av, bv, dir)
        });
    }

    let total = Some(items.len());
    let offset = opts.offset.unwrap_or(0);
    let paged: Vec<Value> = match opts.limit {
        Some(limit) => items.into_iter().skip(offset).take(limit).collect(),
        None => items.into_iter().skip(offset).collect(),
    };

    Ok(FilterResult {
        data: Value::Array(paged),
        total,
    })
}

fn compare_nulls_last(a: Option<&Value>, b: Option<&Value>, dir: SortDir) -> std::cmp::Ordering {
    use std::cmp::Ordering;
    let is_null = |v: Option<&Value>| v.is_none_or(|v| v.is_null());
    match (is_null(a), is_null(b)) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Greater,
        (false, true) => Ordering::Less,
        (false, false) => {
            let ord = compare_values(a.unwrap(), b.unwrap());
            if dir == SortDir::Desc { ord.reverse() } else { ord }
        }
    }
}

fn compare_values(a: &Value, b: &Value) -> std::cmp::Ordering {
    match (a, b) {
        (Value::Number(a), Value::Number(b)) => a
            .as_f64()
            .unwrap_or(0.0)
            .partial_cmp(&b.as_f64().unwrap_or(0.0))
            .unwrap_or(std::cmp::Ordering::Equal),
        (Value::String(a), Value::String(b)) => a.cmp(b),
        (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
        _ => std::cmp::Ordering::Equal,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn jmespath_extracts_nested_field() {
        let data = json!({"items": [{"id": 1}, {"id": 2}]});
        let result = jmespath_query(&data, "items[*].id").unwrap();
        assert_eq!(result, json!([1, 2]));
    }

    #[test]
    fn filter_sorts_with_nulls_last() {
        let collectibles = json!([{"score": 3}, {"score": null}, {"score": 1}]);
        let opts = FilterOptions {
            key: None,
            jmespath: None,
            sort_by: Some("score"),
            sort_dir: Some(SortDir::Asc),
            limit: None,
            offset: None,
        };
        let result = apply_filter_semantics(&collectibles, &opts).unwrap();
        assert_eq!(
            result.data,
            json!([{"score": 1}, {"score": 3}, {"score": null}])
        );
    }

    #[test]
    fn filter_paginates_after_sort() {
        let collectibles = json!([{"score": 3}, {"score": 1}, {"score": 2}]);
        let opts = FilterOptions {
            key: None,
            jmespath: None,
            sort_by: Some("score"),
            sort_dir: Some(SortDir::Asc),
            limit: Some(1),
            offset: Some(1),
        };
        let result = apply_filter_semantics(&collectibles, &opts).unwrap();
        assert_eq!(result.data, json!([{"score": 2}]));
        assert_eq!(result.total, Some(3));
    }
}
