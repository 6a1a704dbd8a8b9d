//! `navigate` and `wait_for`.

use crate::browser::controller::BrowserController;
use crate::error::{EngineError, EngineResult};
use crate::pack::model::{NavigateParams, WaitForParams};
use crate::template::{self, TemplateContext};

pub async fn navigate(controller: &BrowserController<'_>, params: &NavigateParams, tctx: &TemplateContext) -> EngineResult<()> {
    let url = template::resolve(&params.url, tctx)?;
    controller.goto(&url, params.wait_until).await
}

pub async fn wait_for(
    controller: &BrowserController<'_>,
    params: &WaitForParams,
    timeout_ms: u64,
    step_id: &str,
    tctx: &TemplateContext,
) -> EngineResult<()> {
    if let Some(load_state) = params.load_state {
        return controller.wait_for_load_state(load_state, timeout_ms).await;
    }
    if let Some(url) = &params.url {
        let resolved = template::resolve(url, tctx)?;
        return controller.wait_for_url(&resolved, timeout_ms).await;
    }
    if let Some(target) = &params.target {
        return wait_for_target(controller, target, timeout_ms, step_id).await;
    }
    if let Some(selector) = &params.selector {
        let target = crate::pack::model::Target::Legacy { selector: selector.clone() };
        return wait_for_target(controller, &target, timeout_ms, step_id).await;
    }
    Err(EngineError::Validation(format!(
        "wait_for step '{}' declares none of target/selector/url/loadState",
        step_id
    )))
}

async fn wait_for_target(
    controller: &BrowserController<'_>,
    target: &crate::pack::model::Target,
    timeout_ms: u64,
    step_id: &str,
) -> EngineResult<()> {
    let deadline = std::time::Duration::from_millis(timeout_ms);
    let started = tokio::time::Instant::now();
    loop {
        let resolved = controller.resolve_target(target, None).await?;
        if !resolved.elements.is_empty() {
            return Ok(());
        }
        if started.elapsed() >= deadline {
            return Err(EngineError::TargetNotFound {
                step_id: step_id.to_string(),
                reason: "no match before deadline".to_string(),
            });
        }
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    }
}
