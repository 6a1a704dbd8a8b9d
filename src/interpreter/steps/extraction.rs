//! `extract_text`, `extract_attribute`, `extract_title`.

use serde_json::Value;

use crate::browser::controller::BrowserController;
use crate::error::{EngineError, EngineResult};
use crate::pack::model::{ExtractAttributeParams, ExtractTextParams, ExtractTitleParams, Target};

fn target_of(target: &Option<Target>, selector: &Option<String>) -> Option<Target> {
    target.clone().or_else(|| selector.clone().map(|s| Target::Legacy { selector: s }))
}

pub async fn extract_text(controller: &BrowserController<'_>, params: &ExtractTextParams, step_id: &str) -> EngineResult<Value> {
    let target = target_of(&params.target, &params.selector).ok_or_else(|| {
        EngineError::Validation(format!("extract_text step '{}' declares neither target nor selector", step_id))
    })?;

    let resolved = controller.resolve_target(&target, params.scope.as_ref()).await?;
    if resolved.elements.is_empty() {
        return default_or_fail(&params.default, step_id, &resolved.matched_description);
    }

    let elements = if params.first { &resolved.elements[..1.min(resolved.elements.len())] } else { &resolved.elements[..] };

    let mut texts = Vec::with_capacity(elements.len());
    for el in elements {
        let raw = el
            .inner_text()
            .await
            .map_err(|e| EngineError::Operational(format!("failed to read text: {}", e)))?
            .unwrap_or_default();
        texts.push(if params.trim { raw.trim().to_string() } else { raw });
    }

    Ok(if params.first {
        Value::String(texts.into_iter().next().unwrap_or_default())
    } else {
        Value::Array(texts.into_iter().map(Value::String).collect())
    })
}

pub async fn extract_attribute(controller: &BrowserController<'_>, params: &ExtractAttributeParams, step_id: &str) -> EngineResult<Value> {
    let target = target_of(&params.target, &params.selector).ok_or_else(|| {
        EngineError::Validation(format!("extract_attribute step '{}' declares neither target nor selector", step_id))
    })?;

    let resolved = controller.resolve_target(&target, params.scope.as_ref()).await?;
    if resolved.elements.is_empty() {
        return default_or_fail(&params.default, step_id, &resolved.matched_description);
    }

    let elements = if params.first { &resolved.elements[..1.min(resolved.elements.len())] } else { &resolved.elements[..] };

    let mut values = Vec::with_capacity(elements.len());
    for el in elements {
        let attr = el
            .attribute(params.attribute.as_str())
            .await
            .map_err(|e| EngineError::Operational(format!("failed to read attribute: {}", e)))?;
        values.push(attr);
    }

    Ok(if params.first {
        match values.into_iter().next().flatten() {
            Some(v) => Value::String(v),
            None => return default_or_fail(&params.default, step_id, "attribute absent"),
        }
    } else {
        Value::Array(values.into_iter().map(|v| v.map(Value::String).unwrap_or(Value::Null)).collect())
    })
}

pub async fn extract_title(controller: &BrowserController<'_>, _params: &ExtractTitleParams) -> EngineResult<Value> {
    Ok(Value::String(controller.title().await?))
}

fn default_or_fail(default: &Option<String>, step_id: &str, reason: &str) -> EngineResult<Value> {
    match default {
        Some(d) => Ok(Value::String(d.clone())),
        None => Err(EngineError::TargetNotFound {
            step_id: step_id.to_string(),
            reason: reason.to_string(),
        }),
    }
}
