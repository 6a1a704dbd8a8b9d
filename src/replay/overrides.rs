//! Override resolution shared by browser-context and pure-HTTP replay.
//!
//! Transformation order:
//! URL:  templating -> urlReplace regex -> explicit url override -> setQuery merge
//! Body: templating -> bodyReplace regex -> explicit body override
//! Headers: setHeaders merged last; sensitive names rejected outright.

use regex::Regex;
use url::Url;

use crate::error::{EngineError, EngineResult};
use crate::pack::model::ReplayOverrides;
use crate::redact::is_sensitive_header;
use crate::template::{self, TemplateContext};

pub struct ResolvedRequest {
    pub method: String,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<String>,
}

/// Base request (from a captured snapshot or live capture replay data) plus
/// the step's declared overrides, templated and regex-transformed.
pub fn resolve_request(
    method: &str,
    base_url: &str,
    base_headers: Vec<(String, String)>,
    base_body: Option<String>,
    overrides: Option<&ReplayOverrides>,
    ctx: &TemplateContext,
) -> EngineResult<ResolvedRequest> {
    let mut url = template::resolve(base_url, ctx)?;
    let mut body = match base_body {
        Some(b) => Some(template::resolve(&b, ctx)?),
        None => None,
    };
    let mut headers = base_headers;

    if let Some(ov) = overrides {
        if let Some(fr) = &ov.url_replace {
            let pattern = template::resolve(&fr.find, ctx)?;
            let replacement = template::resolve(&fr.replace, ctx)?;
            let re = Regex::new(&pattern)?;
            url = re.replace_all(&url, replacement.as_str()).into_owned();
        }
        if let Some(explicit_url) = &ov.url {
            url = template::resolve(explicit_url, ctx)?;
        }
        if let Some(query) = &ov.set_query {
            let mut parsed = Url::parse(&url).map_err(|e| EngineError::Replay(format!("invalid URL after overrides: {}", e)))?;
            {
                let mut pairs = parsed.query_pairs_mut();
                for (k, v) in query {
                    let resolved_v = template::resolve(v, ctx)?;
                    pairs.append_pair(k, &resolved_v);
                }
            }
            url = parsed.to_string();
        }

        if let Some(fr) = &ov.body_replace
            && let Some(b) = &body
        {
            let pattern = template::resolve(&fr.find, ctx)?;
            let replacement = template::resolve(&fr.replace, ctx)?;
            let re = Regex::new(&pattern)?;
            body = Some(re.replace_all(b, replacement.as_str()).into_owned());
        }
        if let Some(explicit_body) = &ov.body {
            body = Some(template::resolve(explicit_body, ctx)?);
        }

        if let Some(set_headers) = &ov.set_headers {
            for (name, value) in set_headers {
                if is_sensitive_header(name) {
                    return Err(EngineError::SensitiveHeader(name.clone()));
                }
                let resolved_value = template::resolve(value, ctx)?;
                if let Some(existing) = headers.iter_mut().find(|(k, _)| k.eq_ignore_ascii_case(name)) {
                    existing.1 = resolved_value;
                } else {
                    headers.push((name.clone(), resolved_value));
                }
            }
        }
    }

    // content-length becomes stale once the body changes; the HTTP client recomputes it.
    headers.retain(|(k, _)| !k.eq_ignore_ascii_case("content-length"));

    Ok(ResolvedRequest {
        method: method.to_string(),
        url,
        headers,
        body,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pack::model::FindReplace;
    use std::collections::HashMap;

    #[test]
    fn url_replace_applies_before_explicit_override() {
        let overrides = ReplayOverrides {
            url_replace: Some(FindReplace {
                find: "page=1".to_string(),
                replace: "page=2".to_string(),
            }),
            ..Default::default()
        };
        let ctx = TemplateContext::default();
        let resolved = resolve_request(
            "GET",
            "https://example.com/search?page=1",
            vec![],
            None,
            Some(&overrides),
            &ctx,
        )
        .unwrap();
        assert_eq!(resolved.url, "https://example.com/search?page=2");
    }

    #[test]
    fn sensitive_header_override_rejected() {
        let mut headers = HashMap::new();
        headers.insert("Authorization".to_string(), "Bearer x".to_string());
        let overrides = ReplayOverrides {
            set_headers: Some(headers),
            ..Default::default()
        };
        let ctx = TemplateContext::default();
        let err = resolve_request("GET", "https://example.com", vec![], None, Some(&overrides), &ctx).unwrap_err();
        assert!(matches!(err, EngineError::SensitiveHeader(_)));
    }

    #[test]
    fn content_length_is_stripped() {
        let ctx = TemplateContext::default();
        let resolved = resolve_request(
            "POST",
            "https://example.com",
            vec![("Content-Length".to_string(), "10".to_string())],
            Some("body".to_string()),
            None,
            &ctx,
        )
        .unwrap();
        assert!(resolved.headers.is_empty());
    }
}
