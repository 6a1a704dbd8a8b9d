//! Replay Engine: re-issues a previously captured request with overrides applied.

pub mod browser_replay;
pub mod http_replay;
pub mod overrides;

use serde_json::Value;

use crate::error::{EngineError, EngineResult};

/// A replayed response, normalized across the browser-context and
/// pure-HTTP transports, before `as`/`jsonPath` extraction is applied.
pub struct ReplayedResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

/// Extract `response.as` / `response.jsonPath` from a replayed body.
pub fn extract_response(body: &str, as_kind: &str, json_path: Option<&str>) -> EngineResult<Value> {
    match as_kind {
        "json" => {
            let parsed: Value = serde_json::from_str(body)
                .map_err(|e| EngineError::Replay(format!("response is not valid JSON: {}", e)))?;
            match json_path {
                Some(path) => crate::result_store::jmespath_query(&parsed, path),
                None => Ok(parsed),
            }
        }
        "text" => match json_path {
            Some(path) => {
                let parsed: Value = serde_json::from_str(body)
                    .map_err(|e| EngineError::Replay(format!("response is not valid JSON for jsonPath query: {}", e)))?;
                let queried = crate::result_store::jmespath_query(&parsed, path)?;
                // as:"text" with jsonPath re-serializes arrays/objects as JSON strings.
                Ok(match queried {
                    Value::String(_) | Value::Null | Value::Bool(_) | Value::Number(_) => queried,
                    other => Value::String(other.to_string()),
                })
            }
            None => Ok(Value::String(body.to_string())),
        },
        other => Err(EngineError::Replay(format!("unknown response 'as' kind: {}", other))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_path_extracts_array() {
        let body = r#"{"items":["A1","A2"]}"#;
        let v = extract_response(body, "json", Some("items[*]")).unwrap();
        assert_eq!(v, serde_json::json!(["A1", "A2"]));
    }

    #[test]
    fn text_with_json_path_reserializes_objects() {
        let body = r#"{"items":["A1","A2"]}"#;
        let v = extract_response(body, "text", Some("items")).unwrap();
        assert_eq!(v, serde_json::json!("[\"A1\",\"A2\"]"));
    }

    #[test]
    fn text_without_json_path_is_passthrough() {
        let v = extract_response("hello world", "text", None).unwrap();
        assert_eq!(v, serde_json::json!("hello world"));
    }
}
