//! `assert`, `set_var`, `sleep`.

use serde_json::Value;

use crate::browser::controller::BrowserController;
use crate::error::{EngineError, EngineResult};
use crate::pack::model::{AssertParams, SetVarParams, SleepParams, Target};
use crate::template::{self, TemplateContext};

pub async fn sleep(params: &SleepParams) {
    tokio::time::sleep(std::time::Duration::from_millis(params.duration_ms)).await;
}

pub fn set_var(params: &SetVarParams, vars: &mut std::collections::HashMap<String, Value>, tctx: &TemplateContext) -> EngineResult<()> {
    let resolved = template::resolve_value(&params.value, tctx)?;
    vars.insert(params.name.clone(), resolved);
    Ok(())
}

pub async fn assert(
    controller: Option<&BrowserController<'_>>,
    params: &AssertParams,
    vars: &std::collections::HashMap<String, Value>,
    step_id: &str,
) -> EngineResult<()> {
    if let Some(target) = target_of(&params.target, &params.selector) {
        let controller = controller.ok_or_else(|| {
            EngineError::Validation(format!("assert step '{}' needs a live page but is running HTTP-only", step_id))
        })?;
        let resolved = controller.resolve_target(&target, None).await?;
        let found = !resolved.elements.is_empty();

        if let Some(expect_exists) = params.exists
            && found != expect_exists
        {
            return fail(params, step_id, &format!("expected exists={}, got {}", expect_exists, found));
        }
        if let Some(expect_visible) = params.visible {
            if !found && expect_visible {
                return fail(params, step_id, "expected element visible, found none");
            }
            if found != expect_visible && params.exists.is_none() {
                return fail(params, step_id, &format!("expected visible={}, got {}", expect_visible, found));
            }
        }
    }

    if let Some(substring) = &params.url_includes {
        let controller = controller.ok_or_else(|| {
            EngineError::Validation(format!("assert step '{}' needs a live page but is running HTTP-only", step_id))
        })?;
        let current = controller.url().await?;
        if !current.contains(substring.as_str()) {
            return fail(params, step_id, &format!("url '{}' does not contain '{}'", current, substring));
        }
    }

    if let Some((name, expected)) = &params.var_equals {
        let actual = vars.get(name);
        if actual != Some(expected) {
            return fail(params, step_id, &format!("var '{}' expected {:?}, got {:?}", name, expected, actual));
        }
    }

    Ok(())
}

fn target_of(target: &Option<Target>, selector: &Option<String>) -> Option<Target> {
    target.clone().or_else(|| selector.clone().map(|s| Target::Legacy { selector: s }))
}

fn fail(params: &AssertParams, step_id: &str, reason: &str) -> EngineResult<()> {
    Err(EngineError::Assertion(
        params.message.clone().unwrap_or_else(|| format!("assert step '{}' failed: {}", step_id, reason)),
    ))
}
