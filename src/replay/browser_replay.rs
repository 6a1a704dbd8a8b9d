//! Browser-context replay — the authoritative replay path.
//!
//! Issues the request through the live page's own network context (via
//! in-page `fetch()`) so cookies and TLS session state apply exactly as
//! they would for a user-driven request. Response bodies are truncated to
//! a bounded size before returning to the interpreter.

use chromiumoxide::Page;
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};
use crate::replay::overrides::ResolvedRequest;

const MAX_VERBATIM_BODY: usize = 256 * 1024;
const TRUNCATED_PREFIX: usize = 2 * 1024;

pub struct BrowserReplayResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: String,
    pub truncated: bool,
}

#[derive(Serialize)]
struct FetchArgs<'a> {
    url: &'a str,
    method: &'a str,
    headers: &'a [(String, String)],
    body: Option<&'a str>,
}

#[derive(Deserialize)]
struct FetchResult {
    status: u16,
    headers: Vec<(String, String)>,
    body: String,
}

const FETCH_SCRIPT: &str = r#"
(async function(args) {
    var init = { method: args.method, credentials: 'include' };
    if (args.headers && args.headers.length) {
        init.headers = {};
        args.headers.forEach(function(pair) { init.headers[pair[0]] = pair[1]; });
    }
    if (args.body !== null && args.body !== undefined) {
        init.body = args.body;
    }
    var resp = await fetch(args.url, init);
    var text = await resp.text();
    var headers = [];
    resp.headers.forEach(function(v, k) { headers.push([k, v]); });
    return { status: resp.status, headers: headers, body: text };
})(ARGS)
"#;

/// Replay `request` through `page`'s network context.
pub async fn replay(page: &Page, request: &ResolvedRequest) -> EngineResult<BrowserReplayResponse> {
    let args = FetchArgs {
        url: &request.url,
        method: &request.method,
        headers: &request.headers,
        body: request.body.as_deref(),
    };
    let args_json = serde_json::to_string(&args)
        .map_err(|e| EngineError::Replay(format!("failed to serialize replay request: {}", e)))?;
    let script = FETCH_SCRIPT.replace("ARGS", &args_json);

    let raw: FetchResult = page
        .evaluate(script)
        .await
        .map_err(|e| EngineError::Replay(format!("browser-context replay failed: {}", e)))?
        .into_value()
        .map_err(|e| EngineError::Replay(format!("failed to parse replay response: {}", e)))?;

    let (body, truncated) = if raw.body.len() > MAX_VERBATIM_BODY {
        let mut truncated_body: String = raw.body.chars().take(TRUNCATED_PREFIX).collect();
        truncated_body.push_str("... [truncated]");
        (truncated_body, true)
    } else {
        (raw.body, false)
    };

    Ok(BrowserReplayResponse {
        status: raw.status,
        headers: raw.headers,
        body,
        truncated,
    })
}
