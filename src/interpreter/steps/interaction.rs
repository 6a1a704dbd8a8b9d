//! `click` and `fill`.

use crate::browser::controller::BrowserController;
use crate::error::{EngineError, EngineResult};
use crate::pack::model::{ClickParams, FillParams, Target};
use crate::template::{self, TemplateContext};

fn target_of(target: &Option<Target>, selector: &Option<String>) -> Option<Target> {
    target.clone().or_else(|| selector.clone().map(|s| Target::Legacy { selector: s }))
}

pub async fn click(controller: &BrowserController<'_>, params: &ClickParams, step_id: &str) -> EngineResult<()> {
    let target = target_of(&params.target, &params.selector).ok_or_else(|| {
        EngineError::Validation(format!("click step '{}' declares neither target nor selector", step_id))
    })?;

    let resolved = controller.resolve_target(&target, params.scope.as_ref()).await?;
    let description = resolved.matched_description.clone();
    let elements = match &params.near {
        Some(near) => crate::target::order_by_proximity(controller.page(), resolved.elements, near).await?,
        None => resolved.elements,
    };
    if elements.is_empty() {
        return Err(EngineError::TargetNotFound {
            step_id: step_id.to_string(),
            reason: description,
        });
    }

    // `first:false` clicks every match, in resolution order, instead of
    // just the first.
    let to_click = if params.first { &elements[..1] } else { &elements[..] };
    for element in to_click {
        element
            .scroll_into_view()
            .await
            .map_err(|e| EngineError::Operational(format!("scroll into view failed: {}", e)))?;
        let point = element
            .clickable_point()
            .await
            .map_err(|e| EngineError::Operational(format!("element not clickable: {}", e)))?;
        controller
            .page()
            .click(point)
            .await
            .map_err(|e| EngineError::Operational(format!("click failed: {}", e)))?;
    }

    if params.wait_for_navigation {
        controller.wait_for_load_state(crate::pack::model::WaitUntil::Load, 30_000).await?;
    }
    Ok(())
}

pub async fn fill(controller: &BrowserController<'_>, params: &FillParams, step_id: &str, tctx: &TemplateContext) -> EngineResult<()> {
    let target = target_of(&params.target, &params.selector).ok_or_else(|| {
        EngineError::Validation(format!("fill step '{}' declares neither target nor selector", step_id))
    })?;

    let resolved = controller.resolve_target(&target, params.scope.as_ref()).await?;
    let element = resolved.elements.first().ok_or_else(|| EngineError::TargetNotFound {
        step_id: step_id.to_string(),
        reason: resolved.matched_description.clone(),
    })?;

    let value = template::resolve(&params.value, tctx)?;

    element
        .scroll_into_view()
        .await
        .map_err(|e| EngineError::Operational(format!("scroll into view failed: {}", e)))?;
    let point = element
        .clickable_point()
        .await
        .map_err(|e| EngineError::Operational(format!("element not focusable: {}", e)))?;
    controller
        .page()
        .click(point)
        .await
        .map_err(|e| EngineError::Operational(format!("focus before fill failed: {}", e)))?;

    if params.clear {
        element
            .call_js_fn("function() { this.value = ''; }", false)
            .await
            .map_err(|e| EngineError::Operational(format!("clear field failed: {}", e)))?;
    }

    element
        .type_str(value)
        .await
        .map_err(|e| EngineError::Operational(format!("fill failed: {}", e)))?;
    Ok(())
}
