//! Network Capture Service: buffers request/response exchanges for later replay.
//!
//! Per-session ring buffer of requests/responses. Public summaries are
//! redacted; full headers/bodies live only in the parallel replay-data map
//! and are never exported. Buffer and replay-data evict in lock-step.

pub mod capture;
pub mod listener;

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use parking_lot::RwLock;

use capture::{
    CapturedRequest, ReplayData, cap_chars, is_likely_api, NETWORK_BUFFER_MAX, POST_DATA_CAP,
    POST_DATA_REPLAY_CAP, RESPONSE_BODY_CAPTURE_MAX,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureFilter {
    All,
    Api,
    Xhr,
}

/// Per-session capture buffer. Cheap to clone (`Arc`-backed); the session
/// owns one instance and only this service mutates it.
#[derive(Clone)]
pub struct NetworkCaptureService {
    inner: Arc<RwLock<Inner>>,
}

struct Inner {
    order: VecDeque<String>,
    entries: HashMap<String, CapturedRequest>,
    replay_data: HashMap<String, ReplayData>,
    next_id: u64,
}

impl Default for NetworkCaptureService {
    fn default() -> Self {
        Self::new()
    }
}

impl NetworkCaptureService {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(Inner {
                order: VecDeque::new(),
                entries: HashMap::new(),
                replay_data: HashMap::new(),
                next_id: 1,
            })),
        }
    }

    /// Mint an id, redact and enqueue a new request, store its full replay data.
    pub fn on_request(
        &self,
        method: String,
        url: String,
        resource_type: Option<String>,
        headers: Vec<(String, String)>,
        post_data: Option<String>,
    ) -> String {
        let mut inner = self.inner.write();
        let id = format!("req-{}", inner.next_id);
        inner.next_id += 1;

        let capped_post = post_data.as_deref().map(|b| cap_chars(b, POST_DATA_CAP));
        let replay_post = post_data.as_deref().map(|b| cap_chars(b, POST_DATA_REPLAY_CAP));

        let likely_api = is_likely_api(&url);
        let entry = CapturedRequest {
            id: id.clone(),
            ts: chrono::Utc::now(),
            method: method.clone(),
            url: url.clone(),
            resource_type,
            request_headers: CapturedRequest::redact_headers(headers.clone()),
            post_data: capped_post,
            status: None,
            response_headers: None,
            response_body_snippet: None,
            is_likely_api: likely_api,
        };

        inner.entries.insert(id.clone(), entry);
        inner.replay_data.insert(
            id.clone(),
            ReplayData {
                request_headers_full: headers,
                post_data: replay_post,
            },
        );
        inner.order.push_back(id.clone());

        Self::evict_over_capacity(&mut inner);
        id
    }

    /// Attach status + redacted response headers + a capped body snippet.
    pub fn on_response(
        &self,
        id: &str,
        status: u16,
        headers: Vec<(String, String)>,
        body: Option<String>,
    ) {
        let mut inner = self.inner.write();
        if let Some(entry) = inner.entries.get_mut(id) {
            entry.status = Some(status);
            entry.response_headers = Some(CapturedRequest::redact_headers(headers));
            // "attempt to read up to RESPONSE_BODY_CAPTURE_MAX * 4 bytes, retain first
            // RESPONSE_BODY_CAPTURE_MAX chars": the byte-read ceiling is
            // the transport's concern; here we just cap the decoded string.
            entry.response_body_snippet = body.as_deref().map(|b| cap_chars(b, RESPONSE_BODY_CAPTURE_MAX));
        }
    }

    /// Attaches a response body snippet captured after the initial headers:
    /// the body arrives once `loadingFinished` fires, separately from
    /// `on_response`'s status/headers.
    pub fn attach_response_body(&self, id: &str, body: String) {
        let mut inner = self.inner.write();
        if let Some(entry) = inner.entries.get_mut(id) {
            entry.response_body_snippet = Some(cap_chars(&body, RESPONSE_BODY_CAPTURE_MAX));
        }
    }

    fn evict_over_capacity(inner: &mut Inner) {
        while inner.order.len() > NETWORK_BUFFER_MAX {
            if let Some(oldest) = inner.order.pop_front() {
                inner.entries.remove(&oldest);
                inner.replay_data.remove(&oldest);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.inner.read().order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns redacted summaries, most-recent-last, matching the given filter.
    pub fn list(&self, filter: CaptureFilter, limit: Option<usize>) -> Vec<CapturedRequest> {
        let inner = self.inner.read();
        let iter = inner.order.iter().filter_map(|id| inner.entries.get(id)).filter(|e| match filter {
            CaptureFilter::All => true,
            CaptureFilter::Api => e.is_likely_api || matches!(e.resource_type.as_deref(), Some("xhr") | Some("fetch")),
            CaptureFilter::Xhr => matches!(e.resource_type.as_deref(), Some("xhr") | Some("fetch")),
        });
        match limit {
            Some(n) => iter.rev().take(n).rev().cloned().collect(),
            None => iter.cloned().collect(),
        }
    }

    /// Case-insensitive substring search across URL, method, resource type,
    /// status, headers (keys+values), post-data, and response-body snippet.
    pub fn search(&self, query: &str, limit: Option<usize>) -> Vec<CapturedRequest> {
        let needle = query.to_ascii_lowercase();
        let inner = self.inner.read();
        let matches = inner.order.iter().filter_map(|id| inner.entries.get(id)).filter(|e| {
            let mut haystack = format!(
                "{} {} {} {}",
                e.url,
                e.method,
                e.resource_type.clone().unwrap_or_default(),
                e.status.map(|s| s.to_string()).unwrap_or_default()
            )
            .to_ascii_lowercase();
            for (k, v) in &e.request_headers {
                haystack.push(' ');
                haystack.push_str(&k.to_ascii_lowercase());
                haystack.push(' ');
                haystack.push_str(&v.to_ascii_lowercase());
            }
            if let Some(headers) = &e.response_headers {
                for (k, v) in headers {
                    haystack.push(' ');
                    haystack.push_str(&k.to_ascii_lowercase());
                    haystack.push(' ');
                    haystack.push_str(&v.to_ascii_lowercase());
                }
            }
            if let Some(pd) = &e.post_data {
                haystack.push(' ');
                haystack.push_str(&pd.to_ascii_lowercase());
            }
            if let Some(body) = &e.response_body_snippet {
                haystack.push(' ');
                haystack.push_str(&body.to_ascii_lowercase());
            }
            haystack.contains(&needle)
        });
        match limit {
            Some(n) => matches.take(n).cloned().collect(),
            None => matches.cloned().collect(),
        }
    }

    /// Summary + whether replay is still possible (replay data not yet evicted).
    pub fn get(&self, id: &str) -> Option<(CapturedRequest, bool)> {
        let inner = self.inner.read();
        let entry = inner.entries.get(id)?.clone();
        let replay_possible = inner.replay_data.contains_key(id);
        Some((entry, replay_possible))
    }

    pub fn get_response_body(&self, id: &str, full: bool) -> Option<String> {
        let inner = self.inner.read();
        let entry = inner.entries.get(id)?;
        entry.response_body_snippet.clone().map(|body| {
            if full {
                body
            } else {
                cap_chars(&body, 500)
            }
        })
    }

    /// Internal-only accessor for the Replay Engine; never exposed to flow consumers.
    pub(crate) fn get_replay_data(&self, id: &str) -> Option<ReplayData> {
        self.inner.read().replay_data.get(id).cloned()
    }

    pub fn clear(&self) {
        let mut inner = self.inner.write();
        inner.order.clear();
        inner.entries.clear();
        inner.replay_data.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn eviction_drops_both_entry_and_replay_data_in_lockstep() {
        let svc = NetworkCaptureService::new();
        let extra = 5;
        let mut first_ids = Vec::new();
        for i in 0..(NETWORK_BUFFER_MAX + extra) {
            let id = svc.on_request(
                "GET".to_string(),
                format!("https://example.com/{}", i),
                None,
                vec![],
                None,
            );
            if i < extra {
                first_ids.push(id);
            }
        }
        assert_eq!(svc.len(), NETWORK_BUFFER_MAX);
        for id in first_ids {
            assert!(svc.get(&id).is_none());
            assert!(svc.get_replay_data(&id).is_none());
        }
    }

    #[test]
    fn sensitive_headers_redacted_in_summary() {
        let svc = NetworkCaptureService::new();
        let id = svc.on_request(
            "GET".to_string(),
            "https://example.com/api/x".to_string(),
            Some("xhr".to_string()),
            vec![("Authorization".to_string(), "Bearer secret".to_string())],
            None,
        );
        let (entry, replay_possible) = svc.get(&id).unwrap();
        assert!(replay_possible);
        let (_, value) = entry
            .request_headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case("authorization"))
            .unwrap();
        assert_eq!(value, "[REDACTED]");

        // Full headers remain available internally for replay.
        let replay = svc.get_replay_data(&id).unwrap();
        assert_eq!(replay.request_headers_full[0].1, "Bearer secret");
    }

    #[test]
    fn search_matches_response_body_snippet() {
        let svc = NetworkCaptureService::new();
        let id = svc.on_request(
            "POST".to_string(),
            "https://example.com/api/search".to_string(),
            Some("fetch".to_string()),
            vec![],
            Some("{\"q\":\"A\"}".to_string()),
        );
        svc.on_response(&id, 200, vec![], Some("{\"items\":[\"A1\",\"A2\"]}".to_string()));
        let found = svc.search("A1", None);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, id);
    }

    #[test]
    fn clear_drops_everything_atomically() {
        let svc = NetworkCaptureService::new();
        let id = svc.on_request("GET".to_string(), "https://example.com".to_string(), None, vec![], None);
        svc.clear();
        assert!(svc.get(&id).is_none());
        assert_eq!(svc.len(), 0);
    }
}
