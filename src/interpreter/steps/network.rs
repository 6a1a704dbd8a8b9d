//! `network_find`, `network_replay`, `network_extract`.

use std::collections::HashMap;
use std::time::Duration;

use chromiumoxide::Page;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::auth::AuthFailureMonitor;
use crate::error::{EngineError, EngineResult};
use crate::network::{CaptureFilter, NetworkCaptureService};
use crate::pack::model::{
    HttpMethod, NetworkExtractParams, NetworkFindParams, NetworkFindWhere, NetworkReplayParams, PickStrategy, ReplayAs,
};
use crate::proxy::ResolvedProxy;
use crate::replay::{self, browser_replay, http_replay, overrides::resolve_request};
use crate::snapshot::RequestSnapshot;
use crate::template::{self, TemplateContext};

use crate::network::capture::CapturedRequest;

pub async fn network_find(
    capture: &NetworkCaptureService,
    params: &NetworkFindParams,
    vars: &mut HashMap<String, Value>,
    step_id: &str,
) -> EngineResult<()> {
    if params.r#where.response_contains.is_some() {
        let initial_wait = (4 * params.poll_interval_ms).min(2_000);
        tokio::time::sleep(Duration::from_millis(initial_wait)).await;
    }

    if let Some(found) = find_match(capture, &params.r#where, params.pick) {
        vars.insert(params.save_as.clone(), Value::String(found.id));
        return Ok(());
    }

    if params.wait_for_ms > 0 {
        let deadline = Duration::from_millis(params.wait_for_ms);
        let started = tokio::time::Instant::now();
        loop {
            tokio::time::sleep(Duration::from_millis(params.poll_interval_ms)).await;
            if let Some(found) = find_match(capture, &params.r#where, params.pick) {
                vars.insert(params.save_as.clone(), Value::String(found.id));
                return Ok(());
            }
            if started.elapsed() >= deadline {
                break;
            }
        }
    }

    Err(EngineError::NetworkFind {
        step_id: step_id.to_string(),
        waited_ms: params.wait_for_ms,
    })
}

fn find_match(capture: &NetworkCaptureService, where_clause: &NetworkFindWhere, pick: PickStrategy) -> Option<CapturedRequest> {
    let url_regex = where_clause
        .url_regex
        .as_deref()
        .and_then(|p| regex::Regex::new(p).ok());

    let candidates: Vec<CapturedRequest> = capture
        .list(CaptureFilter::All, None)
        .into_iter()
        .filter(|entry| matches_where(entry, where_clause, url_regex.as_ref()))
        .collect();

    match pick {
        PickStrategy::First => candidates.into_iter().next(),
        PickStrategy::Last => candidates.into_iter().next_back(),
    }
}

fn matches_where(entry: &CapturedRequest, w: &NetworkFindWhere, url_regex: Option<&regex::Regex>) -> bool {
    if let Some(includes) = &w.url_includes
        && !entry.url.contains(includes.as_str())
    {
        return false;
    }
    if let Some(re) = url_regex
        && !re.is_match(&entry.url)
    {
        return false;
    }
    if let Some(method) = w.method
        && !entry.method.eq_ignore_ascii_case(http_method_str(method))
    {
        return false;
    }
    if let Some(status) = w.status
        && entry.status != Some(status)
    {
        return false;
    }
    if let Some(ct) = &w.content_type_includes {
        let has_ct = entry
            .response_headers
            .as_ref()
            .map(|headers| {
                headers
                    .iter()
                    .any(|(k, v)| k.eq_ignore_ascii_case("content-type") && v.contains(ct.as_str()))
            })
            .unwrap_or(false);
        if !has_ct {
            return false;
        }
    }
    if let Some(needle) = &w.response_contains {
        let contains = entry.response_body_snippet.as_deref().is_some_and(|body| body.contains(needle.as_str()));
        if !contains {
            return false;
        }
    }
    true
}

fn http_method_str(method: HttpMethod) -> &'static str {
    match method {
        HttpMethod::Get => "GET",
        HttpMethod::Post => "POST",
        HttpMethod::Put => "PUT",
        HttpMethod::Delete => "DELETE",
        HttpMethod::Patch => "PATCH",
    }
}

/// `network_replay` via the browser's own network context (the `auth="browser_context"` path).
#[allow(clippy::too_many_arguments)]
pub async fn network_replay_browser(
    page: &Page,
    capture: &NetworkCaptureService,
    params: &NetworkReplayParams,
    vars: &mut HashMap<String, Value>,
    collectibles: &mut serde_json::Map<String, Value>,
    tctx: &TemplateContext,
    step_id: &str,
    auth_monitor: Option<&AuthFailureMonitor>,
) -> EngineResult<()> {
    let request_id = template::resolve(&params.request_id, tctx)?;
    let (summary, replay_possible) = capture.get(&request_id).ok_or_else(|| {
        EngineError::Replay(format!("step '{}': no captured request for id '{}'", step_id, request_id))
    })?;
    if !replay_possible {
        return Err(EngineError::Replay(format!(
            "step '{}': replay data for '{}' has been evicted from the capture buffer",
            step_id, request_id
        )));
    }
    let replay_data = capture.get_replay_data(&request_id).ok_or_else(|| {
        EngineError::Replay(format!("step '{}': replay data for '{}' is unavailable", step_id, request_id))
    })?;

    let resolved = resolve_request(
        &summary.method,
        &summary.url,
        replay_data.request_headers_full,
        replay_data.post_data,
        params.overrides.as_ref(),
        tctx,
    )?;

    let response = browser_replay::replay(page, &resolved).await?;
    finish_replay(
        &resolved.url,
        response.status,
        response.body,
        params,
        vars,
        collectibles,
        step_id,
        auth_monitor,
    )
}

/// `network_replay` via the engine's pure-HTTP client (HTTP-only mode).
#[allow(clippy::too_many_arguments)]
pub async fn network_replay_http(
    snapshot: &RequestSnapshot,
    params: &NetworkReplayParams,
    proxy: Option<&ResolvedProxy>,
    abort: &CancellationToken,
    vars: &mut HashMap<String, Value>,
    collectibles: &mut serde_json::Map<String, Value>,
    tctx: &TemplateContext,
    step_id: &str,
    auth_monitor: Option<&AuthFailureMonitor>,
) -> EngineResult<()> {
    let resolved = resolve_request(
        &snapshot.method,
        &snapshot.url,
        snapshot.request_headers.clone(),
        snapshot.body.clone(),
        params.overrides.as_ref(),
        tctx,
    )?;

    let response = http_replay::replay(&resolved, proxy, abort).await?;

    check_status_class_drift(snapshot.response.status, response.status, step_id)?;

    finish_replay(
        &resolved.url,
        response.status,
        response.body,
        params,
        vars,
        collectibles,
        step_id,
        auth_monitor,
    )
}

/// Compares a live HTTP-only replay's response status against the status
/// class recorded in the snapshot, raising `SnapshotDrift` on mismatch so
/// the caller can fall back to a browser-backed run.
fn check_status_class_drift(expected_status: u16, actual_status: u16, step_id: &str) -> EngineResult<()> {
    let expected_class = expected_status / 100;
    let actual_class = actual_status / 100;
    if expected_class != actual_class {
        return Err(EngineError::SnapshotDrift {
            step_id: step_id.to_string(),
            expected: format!("{}xx", expected_class),
            actual: actual_status,
        });
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn finish_replay(
    url: &str,
    status: u16,
    body: String,
    params: &NetworkReplayParams,
    vars: &mut HashMap<String, Value>,
    collectibles: &mut serde_json::Map<String, Value>,
    step_id: &str,
    auth_monitor: Option<&AuthFailureMonitor>,
) -> EngineResult<()> {
    if let Some(monitor) = auth_monitor
        && monitor.enabled()
        && monitor.is_auth_failure(url, status)
    {
        monitor.record_failure(url.to_string(), status, step_id.to_string());
        return Err(EngineError::AuthFailure(format!(
            "step '{}': replayed request to '{}' returned {}",
            step_id, url, status
        )));
    }

    if !(200..400).contains(&status) {
        return Err(EngineError::Replay(format!(
            "step '{}': replayed request returned status {}",
            step_id, status
        )));
    }

    let as_kind = match params.response.r#as {
        ReplayAs::Json => "json",
        ReplayAs::Text => "text",
    };
    let extracted = replay::extract_response(&body, as_kind, params.response.json_path.as_deref())?;

    collectibles.insert(params.out.clone(), extracted.clone());
    if let Some(save_as) = &params.save_as {
        vars.insert(save_as.clone(), Value::String(body));
    }
    Ok(())
}

pub fn network_extract(
    params: &NetworkExtractParams,
    vars: &HashMap<String, Value>,
    collectibles: &mut serde_json::Map<String, Value>,
    step_id: &str,
) -> EngineResult<()> {
    let raw = vars.get(&params.from_var).ok_or_else(|| {
        EngineError::Validation(format!("network_extract step '{}': var '{}' is not set", step_id, params.from_var))
    })?;
    let body = match raw {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };

    let as_kind = match params.r#as {
        ReplayAs::Json => "json",
        ReplayAs::Text => "text",
    };
    let mut extracted = replay::extract_response(&body, as_kind, params.json_path.as_deref())?;

    if let Some(transform) = &params.transform {
        extracted = apply_transform(extracted, transform)?;
    }

    collectibles.insert(params.out.clone(), extracted);
    Ok(())
}

fn apply_transform(value: Value, transform: &HashMap<String, String>) -> EngineResult<Value> {
    let apply_one = |item: &Value| -> EngineResult<Value> {
        let mut out = serde_json::Map::new();
        for (key, expr) in transform {
            out.insert(key.clone(), crate::result_store::jmespath_query(item, expr)?);
        }
        Ok(Value::Object(out))
    };

    match value {
        Value::Array(items) => {
            let mut out = Vec::with_capacity(items.len());
            for item in &items {
                out.push(apply_one(item)?);
            }
            Ok(Value::Array(out))
        }
        single => apply_one(&single),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_status_class_is_not_drift() {
        assert!(check_status_class_drift(200, 204, "s").is_ok());
        assert!(check_status_class_drift(301, 302, "s").is_ok());
    }

    #[test]
    fn different_status_class_raises_snapshot_drift() {
        let err = check_status_class_drift(200, 404, "s").unwrap_err();
        match err {
            EngineError::SnapshotDrift { step_id, expected, actual } => {
                assert_eq!(step_id, "s");
                assert_eq!(expected, "2xx");
                assert_eq!(actual, 404);
            }
            other => panic!("expected SnapshotDrift, got {:?}", other),
        }
    }
}
