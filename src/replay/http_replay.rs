//! Pure-HTTP replay path, used either when a flow has been
//! promoted to HTTP-only mode (C7) or as a fallback transport.

use std::time::Duration;

use reqwest::Client;

use crate::error::{EngineError, EngineResult};
use crate::proxy::ResolvedProxy;
use crate::replay::overrides::ResolvedRequest;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

pub struct HttpReplayResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

/// Issue `request` via the engine's own HTTP client (not the browser's
/// network context). `content-length` is never forwarded; the client
/// recomputes it once overrides have changed the body length.
pub async fn replay(
    request: &ResolvedRequest,
    proxy: Option<&ResolvedProxy>,
    abort: &tokio_util::sync::CancellationToken,
) -> EngineResult<HttpReplayResponse> {
    let mut builder = Client::builder().timeout(DEFAULT_TIMEOUT);
    if let Some(p) = proxy {
        let proxy = reqwest::Proxy::all(&p.url)
            .map_err(|e| EngineError::Operational(format!("invalid proxy url: {}", e)))?
            .basic_auth(&p.username, &p.password);
        builder = builder.proxy(proxy);
    }
    let client = builder
        .build()
        .map_err(|e| EngineError::Operational(format!("failed to build http client: {}", e)))?;

    let method = reqwest::Method::from_bytes(request.method.as_bytes())
        .map_err(|e| EngineError::Replay(format!("invalid method '{}': {}", request.method, e)))?;
    let mut req = client.request(method, &request.url);
    for (k, v) in &request.headers {
        req = req.header(k, v);
    }
    if let Some(body) = &request.body {
        req = req.body(body.clone());
    }

    let fut = req.send();
    let response = tokio::select! {
        result = fut => result.map_err(EngineError::from)?,
        _ = abort.cancelled() => {
            return Err(EngineError::Operational("replay aborted".to_string()));
        }
    };

    let status = response.status().as_u16();
    let headers = response
        .headers()
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_str().unwrap_or("").to_string()))
        .collect();
    let body = response.text().await.map_err(EngineError::from)?;

    Ok(HttpReplayResponse { status, headers, body })
}
