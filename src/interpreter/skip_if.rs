//! `skip_if` condition evaluation.

use chromiumoxide::Page;
use serde_json::Value;

use crate::error::EngineResult;
use crate::pack::model::SkipIf;
use crate::target;

/// Evaluate a `skip_if` condition against the current page and run vars.
/// `page` is `None` in HTTP-only mode, where element-based conditions are
/// simply treated as false (there is no DOM to inspect).
pub async fn evaluate(condition: &SkipIf, page: Option<&Page>, vars: &std::collections::HashMap<String, Value>) -> EngineResult<bool> {
    Ok(match condition {
        SkipIf::UrlIncludes { url_includes } => match page {
            Some(p) => current_url(p).await.contains(url_includes.as_str()),
            None => false,
        },
        SkipIf::UrlMatches { url_matches } => match page {
            Some(p) => {
                let re = regex::Regex::new(url_matches)?;
                re.is_match(&current_url(p).await)
            }
            None => false,
        },
        SkipIf::ElementVisible { element_visible } => match page {
            Some(p) => !target::resolve(p, element_visible, None).await?.elements.is_empty(),
            None => false,
        },
        SkipIf::ElementExists { element_exists } => match page {
            Some(p) => !target::resolve(p, element_exists, None).await?.elements.is_empty(),
            None => false,
        },
        SkipIf::VarEquals { var_equals: (name, expected) } => vars.get(name) == Some(expected),
        SkipIf::VarTruthy { var_truthy } => vars.get(var_truthy).is_some_and(is_truthy),
        SkipIf::VarFalsy { var_falsy } => !vars.get(var_falsy).is_some_and(is_truthy),
        SkipIf::All { all } => {
            for c in all {
                if !Box::pin(evaluate(c, page, vars)).await? {
                    return Ok(false);
                }
            }
            true
        }
        SkipIf::Any { any } => {
            for c in any {
                if Box::pin(evaluate(c, page, vars)).await? {
                    return Ok(true);
                }
            }
            false
        }
    })
}

async fn current_url(page: &Page) -> String {
    page.url().await.ok().flatten().unwrap_or_default()
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn var_truthy_and_falsy() {
        let mut vars = std::collections::HashMap::new();
        vars.insert("flag".to_string(), json!(true));
        vars.insert("empty".to_string(), json!(""));

        assert!(evaluate(&SkipIf::VarTruthy { var_truthy: "flag".to_string() }, None, &vars).await.unwrap());
        assert!(evaluate(&SkipIf::VarFalsy { var_falsy: "empty".to_string() }, None, &vars).await.unwrap());
    }

    #[tokio::test]
    async fn all_short_circuits_on_first_false() {
        let vars = std::collections::HashMap::new();
        let condition = SkipIf::All {
            all: vec![
                SkipIf::VarTruthy { var_truthy: "missing".to_string() },
                SkipIf::VarTruthy { var_truthy: "also_missing".to_string() },
            ],
        };
        assert!(!evaluate(&condition, None, &vars).await.unwrap());
    }

    #[tokio::test]
    async fn any_matches_if_one_holds() {
        let mut vars = std::collections::HashMap::new();
        vars.insert("flag".to_string(), json!(true));
        let condition = SkipIf::Any {
            any: vec![
                SkipIf::VarTruthy { var_truthy: "missing".to_string() },
                SkipIf::VarTruthy { var_truthy: "flag".to_string() },
            ],
        };
        assert!(evaluate(&condition, None, &vars).await.unwrap());
    }
}
