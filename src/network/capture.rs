//! Captured-request/response types and the redaction-aware replay-data pairing.

use serde::{Deserialize, Serialize};

use crate::redact::redact_header;

/// Maximum characters retained from a captured request body.
pub const POST_DATA_CAP: usize = 8 * 1024;
/// Maximum characters retained from a captured request body for replay use.
pub const POST_DATA_REPLAY_CAP: usize = 256 * 1024;
/// Maximum characters retained of a captured response body snippet.
pub const RESPONSE_BODY_CAPTURE_MAX: usize = 4 * 1024;
/// Maximum number of in-flight/completed requests retained per session.
pub const NETWORK_BUFFER_MAX: usize = 500;

/// Public, redacted view of a captured request exposed to flow authors.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapturedRequest {
    pub id: String,
    pub ts: chrono::DateTime<chrono::Utc>,
    pub method: String,
    pub url: String,
    pub resource_type: Option<String>,
    pub request_headers: Vec<(String, String)>,
    pub post_data: Option<String>,
    pub status: Option<u16>,
    pub response_headers: Option<Vec<(String, String)>>,
    pub response_body_snippet: Option<String>,
    pub is_likely_api: bool,
}

impl CapturedRequest {
    pub fn redact_headers(pairs: Vec<(String, String)>) -> Vec<(String, String)> {
        pairs
            .into_iter()
            .map(|(k, v)| {
                let redacted = redact_header(&k, &v);
                (k, redacted)
            })
            .collect()
    }
}

/// Internal-only pairing, never exposed to flow consumers: full headers and
/// (larger-capped) body, used exclusively by the Replay Engine.
#[derive(Debug, Clone)]
pub struct ReplayData {
    pub request_headers_full: Vec<(String, String)>,
    pub post_data: Option<String>,
}

pub fn cap_chars(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        s.to_string()
    } else {
        s.chars().take(max_chars).collect()
    }
}

/// Heuristic for `isLikelyApi`: path starts `/api/`, contains
/// a `/v<digits>/` segment, or matches `graphql`.
pub fn is_likely_api(url: &str) -> bool {
    let lower = url.to_ascii_lowercase();
    if lower.contains("/api/") {
        return true;
    }
    if lower.contains("graphql") {
        return true;
    }
    let segments: Vec<&str> = lower.split('/').collect();
    segments.iter().any(|seg| {
        seg.len() >= 2
            && seg.starts_with('v')
            && seg[1..].chars().all(|c| c.is_ascii_digit())
            && seg.len() > 1
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_heuristics() {
        assert!(is_likely_api("https://example.com/api/users"));
        assert!(is_likely_api("https://example.com/v2/users"));
        assert!(is_likely_api("https://example.com/graphql"));
        assert!(!is_likely_api("https://example.com/static/app.js"));
    }

    #[test]
    fn cap_chars_respects_char_boundaries() {
        let s = "hello world";
        assert_eq!(cap_chars(s, 5), "hello");
        assert_eq!(cap_chars(s, 100), s);
    }
}
