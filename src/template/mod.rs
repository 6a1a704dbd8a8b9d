//! Templating Engine: resolves `{{...}}` expressions against inputs, vars, and secrets.
//!
//! Resolves `{{ expression }}` occurrences against a three-scope context
//! (`inputs`, `vars`, `secret`) with pipe filters. Unresolved references are
//! never silently collapsed to an empty string — callers get a typed
//! diagnostic so they can surface a proper "unresolved template" error.

pub mod filters;

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use std::collections::HashMap;

use crate::error::EngineError;

/// Template evaluation context: the three scopes a `{{ }}` expression may reference.
#[derive(Debug, Clone, Default)]
pub struct TemplateContext {
    pub inputs: HashMap<String, Value>,
    pub vars: HashMap<String, Value>,
    pub secrets: HashMap<String, String>,
}

static TEMPLATE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\{\{\s*([^}]+?)\s*\}\}").unwrap());

/// Resolve every `{{ expression }}` occurrence in `input`, returning the
/// substituted string. Fails on the first unresolved reference.
pub fn resolve(input: &str, ctx: &TemplateContext) -> Result<String, EngineError> {
    let mut err: Option<EngineError> = None;
    let result = TEMPLATE_RE.replace_all(input, |caps: &regex::Captures| {
        let expr = caps.get(1).map(|m| m.as_str()).unwrap_or("");
        match eval_expression(expr, ctx) {
            Ok(v) => value_to_string(&v),
            Err(e) => {
                if err.is_none() {
                    err = Some(e);
                }
                String::new()
            }
        }
    });
    match err {
        Some(e) => Err(e),
        None => Ok(result.into_owned()),
    }
}

/// Recursively resolve templates inside a JSON value (objects/arrays/strings).
/// Required for override blobs.
pub fn resolve_value(value: &Value, ctx: &TemplateContext) -> Result<Value, EngineError> {
    match value {
        Value::String(s) => {
            if is_whole_expression(s) {
                // A string that is *entirely* one `{{ }}` expression preserves
                // the referenced value's JSON type instead of stringifying it.
                let expr = s.trim().trim_start_matches("{{").trim_end_matches("}}").trim();
                eval_expression(expr, ctx)
            } else {
                Ok(Value::String(resolve(s, ctx)?))
            }
        }
        Value::Array(arr) => {
            let mut out = Vec::with_capacity(arr.len());
            for v in arr {
                out.push(resolve_value(v, ctx)?);
            }
            Ok(Value::Array(out))
        }
        Value::Object(map) => {
            let mut out = serde_json::Map::with_capacity(map.len());
            for (k, v) in map {
                out.insert(k.clone(), resolve_value(v, ctx)?);
            }
            Ok(Value::Object(out))
        }
        other => Ok(other.clone()),
    }
}

fn is_whole_expression(s: &str) -> bool {
    let t = s.trim();
    t.starts_with("{{") && t.ends_with("}}") && t.matches("{{").count() == 1
}

/// Parses and evaluates `scope.path | filter(args) | filter2(args)`.
fn eval_expression(expr: &str, ctx: &TemplateContext) -> Result<Value, EngineError> {
    let mut parts = expr.split('|');
    let path_part = parts.next().unwrap_or("").trim();
    let mut value = resolve_path(path_part, ctx)?;

    for filter_part in parts {
        value = apply_filter(filter_part.trim(), value)?;
    }
    Ok(value)
}

fn resolve_path(path: &str, ctx: &TemplateContext) -> Result<Value, EngineError> {
    let mut segments = path.splitn(2, '.');
    let scope = segments.next().unwrap_or("");
    let rest = segments.next().unwrap_or("");

    match scope {
        "inputs" => ctx
            .inputs
            .get(rest)
            .cloned()
            .ok_or_else(|| unresolved(path)),
        "vars" => ctx.vars.get(rest).cloned().ok_or_else(|| unresolved(path)),
        "secret" => ctx
            .secrets
            .get(rest)
            .map(|s| Value::String(s.clone()))
            .ok_or_else(|| unresolved(path)),
        _ => Err(unresolved(path)),
    }
}

fn unresolved(path: &str) -> EngineError {
    EngineError::Validation(format!("unresolved template reference: '{{{{{}}}}}'", path))
}

fn apply_filter(filter_expr: &str, value: Value) -> Result<Value, EngineError> {
    let (name, args) = parse_filter_call(filter_expr);
    let s = value_to_string(&value);

    let result = match name.as_str() {
        "urlencode" => filters::urlencode(&s),
        "pctEncode" => filters::pct_encode(&s),
        "totp" => filters::totp(&s).map_err(EngineError::Validation)?,
        "replace" => {
            if args.len() != 2 {
                return Err(EngineError::Validation(
                    "replace filter requires exactly two arguments".to_string(),
                ));
            }
            filters::replace(&s, &args[0], &args[1])
        }
        other => {
            return Err(EngineError::Validation(format!("unknown template filter '{}'", other)));
        }
    };
    Ok(Value::String(result))
}

/// Parses `name('a', 'b')` or `name` (no args) into (name, args).
fn parse_filter_call(expr: &str) -> (String, Vec<String>) {
    if let Some(open) = expr.find('(') {
        let name = expr[..open].trim().to_string();
        let inner = expr[open + 1..expr.rfind(')').unwrap_or(expr.len())].trim();
        let args = if inner.is_empty() {
            vec![]
        } else {
            inner
                .split(',')
                .map(|a| a.trim().trim_matches(|c| c == '\'' || c == '"').to_string())
                .collect()
        };
        (name, args)
    } else {
        (expr.trim().to_string(), vec![])
    }
}

fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ctx() -> TemplateContext {
        let mut c = TemplateContext::default();
        c.inputs.insert("name".to_string(), json!("Ada"));
        c.vars.insert("count".to_string(), json!(3));
        c.secrets.insert("API_KEY".to_string(), "s3cr3t".to_string());
        c
    }

    #[test]
    fn resolves_simple_scopes() {
        let c = ctx();
        assert_eq!(resolve("hello {{inputs.name}}", &c).unwrap(), "hello Ada");
        assert_eq!(resolve("count={{vars.count}}", &c).unwrap(), "count=3");
    }

    #[test]
    fn unresolved_reference_errors_rather_than_collapsing() {
        let c = ctx();
        let err = resolve("{{inputs.missing}}", &c).unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
    }

    #[test]
    fn urlencode_filter_applies() {
        let mut c = ctx();
        c.inputs.insert("q".to_string(), json!("a b"));
        assert_eq!(resolve("{{inputs.q | urlencode}}", &c).unwrap(), "a%20b");
    }

    #[test]
    fn replace_filter_with_args() {
        let mut c = ctx();
        c.inputs.insert("q".to_string(), json!("a b c"));
        assert_eq!(
            resolve("{{inputs.q | replace(' ', '%20')}}", &c).unwrap(),
            "a%20b%20c"
        );
    }

    #[test]
    fn secret_scope_never_collapses_silently_when_missing() {
        let c = ctx();
        assert!(resolve("{{secret.MISSING}}", &c).is_err());
        assert_eq!(resolve("{{secret.API_KEY}}", &c).unwrap(), "s3cr3t");
    }

    #[test]
    fn resolve_value_recurses_into_objects_and_arrays() {
        let c = ctx();
        let v = json!({"a": "{{inputs.name}}", "b": ["{{vars.count}}", "plain"]});
        let resolved = resolve_value(&v, &c).unwrap();
        assert_eq!(resolved["a"], json!("Ada"));
        assert_eq!(resolved["b"][0], json!(3));
        assert_eq!(resolved["b"][1], json!("plain"));
    }
}
