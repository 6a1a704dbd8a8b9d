//! Wires a live `Page`'s CDP network events into a [`NetworkCaptureService`]
//! (state machine: Requested -> ResponseHeadersOnly -> Completed).
//!
//! chromiumoxide exposes CDP events as typed streams via
//! `Page::event_listener::<T>()`, so each event type gets its own spawned
//! task draining one stream for the lifetime of the page.

use std::collections::HashMap;
use std::sync::Arc;

use chromiumoxide::Page;
use chromiumoxide::cdp::browser_protocol::network::{
    EventLoadingFinished, EventRequestWillBeSent, EventResponseReceived, GetResponseBodyParams,
};
use futures::StreamExt;
use parking_lot::Mutex;
use tokio::task::JoinHandle;

use crate::error::{EngineError, EngineResult};

use super::NetworkCaptureService;

/// Maps CDP's own `requestId` (stable across the request/response/
/// loadingFinished trio for one exchange) to the internal id
/// `NetworkCaptureService::on_request` mints. The service's id space is
/// independent of CDP's so that other callers don't depend on CDP's id
/// format; this map is what lets the later events find their request again.
type IdMap = Arc<Mutex<HashMap<String, String>>>;

/// Spawns the three listener tasks (request, response headers, response
/// body) and returns their join handles so the caller can abort them when
/// the page closes.
pub async fn attach(page: &Page, capture: NetworkCaptureService) -> EngineResult<Vec<JoinHandle<()>>> {
    page.execute(chromiumoxide::cdp::browser_protocol::network::EnableParams::default())
        .await
        .map_err(|e| EngineError::Operational(format!("failed to enable network domain: {}", e)))?;

    let ids: IdMap = Arc::new(Mutex::new(HashMap::new()));
    let mut handles = Vec::with_capacity(3);

    {
        let capture = capture.clone();
        let ids = ids.clone();
        let mut stream = page
            .event_listener::<EventRequestWillBeSent>()
            .await
            .map_err(|e| EngineError::Operational(format!("failed to subscribe to request events: {}", e)))?;
        handles.push(tokio::spawn(async move {
            while let Some(event) = stream.next().await {
                let req = &event.request;
                let headers: Vec<(String, String)> = req
                    .headers
                    .inner()
                    .as_object()
                    .map(|obj| obj.iter().map(|(k, v)| (k.clone(), v.as_str().unwrap_or_default().to_string())).collect())
                    .unwrap_or_default();
                let id = capture.on_request(
                    req.method.clone(),
                    req.url.clone(),
                    event.r#type.as_ref().map(|t| format!("{:?}", t).to_ascii_lowercase()),
                    headers,
                    req.post_data.clone(),
                );
                ids.lock().insert(event.request_id.inner().to_string(), id);
            }
        }));
    }

    {
        let capture = capture.clone();
        let ids = ids.clone();
        let mut stream = page
            .event_listener::<EventResponseReceived>()
            .await
            .map_err(|e| EngineError::Operational(format!("failed to subscribe to response events: {}", e)))?;
        handles.push(tokio::spawn(async move {
            while let Some(event) = stream.next().await {
                let Some(id) = ids.lock().get(&event.request_id.inner().to_string()).cloned() else {
                    continue;
                };
                let resp = &event.response;
                let headers: Vec<(String, String)> = resp
                    .headers
                    .inner()
                    .as_object()
                    .map(|obj| obj.iter().map(|(k, v)| (k.clone(), v.as_str().unwrap_or_default().to_string())).collect())
                    .unwrap_or_default();
                // Body isn't available until loadingFinished; record headers/status now,
                // the loadingFinished listener below fills in the body snippet.
                capture.on_response(&id, resp.status as u16, headers, None);
            }
        }));
    }

    {
        let capture = capture.clone();
        let page = page.clone();
        let ids = ids.clone();
        let mut stream = page
            .event_listener::<EventLoadingFinished>()
            .await
            .map_err(|e| EngineError::Operational(format!("failed to subscribe to loading-finished events: {}", e)))?;
        handles.push(tokio::spawn(async move {
            while let Some(event) = stream.next().await {
                let request_id = event.request_id.clone();
                let Some(id) = ids.lock().remove(&request_id.inner().to_string()) else {
                    continue;
                };
                let body = page.execute(GetResponseBodyParams::new(request_id)).await.ok().map(|r| {
                    if r.result.base64_encoded {
                        base64::Engine::decode(&base64::engine::general_purpose::STANDARD, &r.result.body)
                            .ok()
                            .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
                            .unwrap_or_else(|| "[binary response, base64 decode failed]".to_string())
                    } else {
                        r.result.body.clone()
                    }
                });
                if let Some(body) = body {
                    capture.attach_response_body(&id, body);
                }
            }
        }));
    }

    Ok(handles)
}
