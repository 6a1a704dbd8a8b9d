//! Target Resolver (C3): maps a declarative `Target` (css/text/role/label/
//! placeholder/altText/testId, wrapped in `anyOf` for fallback, optionally
//! narrowed by `scope`) into live chromiumoxide `Element`s.
//!
//! chromiumoxide has no `getByRole`/`getByText` equivalent, so every
//! non-css variant resolves with the same shape the teacher uses for its
//! "clickable element hints": query a broad CSS candidate selector, then
//! filter candidates in Rust by text/attribute. `scope` narrowing reuses
//! that same broaden-then-filter shape by tagging the scope element with a
//! throwaway `data-showrun-scope` attribute (chromiumoxide has no
//! element-relative query API) and folding it into the candidate selector
//! as a CSS descendant combinator.

use chromiumoxide::Page;
use chromiumoxide::element::Element;

use crate::error::{EngineError, EngineResult};
use crate::pack::model::{AriaRole, Target, TargetVariant};

/// Result of resolving a `Target`: the matched elements (possibly empty)
/// plus a human-readable description of what was tried, used in
/// `TargetNotFoundError` diagnostics.
pub struct ResolvedTarget {
    pub elements: Vec<Element>,
    pub matched_description: String,
}

const TEXT_CANDIDATE_SELECTOR: &str =
    "a, button, span, p, div, li, td, th, h1, h2, h3, h4, h5, h6, label, [role]";

pub async fn resolve(page: &Page, target: &Target, scope: Option<&Target>) -> EngineResult<ResolvedTarget> {
    let scope_marker = match scope {
        Some(scope_target) => Some(tag_scope(page, scope_target).await?),
        None => None,
    };

    let result = resolve_inner(page, target, scope_marker.as_deref()).await;

    if let Some(marker) = scope_marker {
        untag_scope(page, &marker).await;
    }

    result
}

/// Resolve `scope`'s first matching element and mark it with a unique
/// attribute so descendant queries can be expressed as plain CSS.
async fn tag_scope(page: &Page, scope: &Target) -> EngineResult<String> {
    let resolved = Box::pin(resolve_inner(page, scope, None)).await?;
    let element = resolved.elements.into_iter().next().ok_or_else(|| EngineError::TargetNotFound {
        step_id: String::new(),
        reason: format!("scope target did not match any element: {}", resolved.matched_description),
    })?;

    let marker = uuid::Uuid::new_v4().simple().to_string();
    let script = format!("function() {{ this.setAttribute('data-showrun-scope', '{marker}'); }}");
    element
        .call_js_fn(&script, false)
        .await
        .map_err(|e| EngineError::Operational(format!("failed to tag scope element: {e}")))?;
    Ok(marker)
}

async fn untag_scope(page: &Page, marker: &str) {
    let selector = format!("[data-showrun-scope=\"{marker}\"]");
    if let Ok(elements) = page.find_elements(selector.as_str()).await {
        for el in elements {
            let _ = el
                .call_js_fn("function() { this.removeAttribute('data-showrun-scope'); }", false)
                .await;
        }
    }
}

fn scoped(selector: &str, marker: Option<&str>) -> String {
    match marker {
        Some(m) => format!("[data-showrun-scope=\"{m}\"] {selector}"),
        None => selector.to_string(),
    }
}

async fn resolve_inner(page: &Page, target: &Target, marker: Option<&str>) -> EngineResult<ResolvedTarget> {
    match target {
        Target::AnyOf { any_of } => {
            let mut descriptions = Vec::with_capacity(any_of.len());
            for variant in any_of {
                let attempt = Box::pin(resolve_inner(page, variant, marker)).await?;
                if !attempt.elements.is_empty() {
                    return Ok(attempt);
                }
                descriptions.push(attempt.matched_description);
            }
            Ok(ResolvedTarget {
                elements: Vec::new(),
                matched_description: format!("anyOf[{}] matched nothing", descriptions.join(", ")),
            })
        }
        Target::Legacy { selector } => resolve_css(page, selector, marker).await,
        Target::Variant(variant) => resolve_variant(page, variant, marker).await,
    }
}

async fn resolve_variant(page: &Page, variant: &TargetVariant, marker: Option<&str>) -> EngineResult<ResolvedTarget> {
    match variant {
        TargetVariant::Css { selector } => resolve_css(page, selector, marker).await,
        TargetVariant::TestId { id } => {
            resolve_css(page, &format!("[data-testid=\"{}\"]", escape_attr(id)), marker).await
        }
        TargetVariant::Text { text, exact } => {
            let candidates = find_elements(page, scoped(TEXT_CANDIDATE_SELECTOR, marker).as_str()).await?;
            let mut matched = Vec::new();
            for el in candidates {
                let content = el.inner_text().await.ok().flatten().unwrap_or_default();
                if matches_text(&content, text, *exact) {
                    matched.push(el);
                }
            }
            Ok(ResolvedTarget {
                matched_description: format!("text{}=\"{}\"", if *exact { "(exact)" } else { "" }, text),
                elements: matched,
            })
        }
        TargetVariant::Placeholder { text, exact } => {
            let candidates = find_elements(page, scoped("input, textarea", marker).as_str()).await?;
            filter_by_attribute(candidates, "placeholder", text, *exact, "placeholder").await
        }
        TargetVariant::AltText { text, exact } => {
            let candidates = find_elements(page, scoped("img[alt], [alt]", marker).as_str()).await?;
            filter_by_attribute(candidates, "alt", text, *exact, "altText").await
        }
        TargetVariant::Label { text, exact } => {
            let labels = find_elements(page, scoped("label", marker).as_str()).await?;
            let mut matched = Vec::new();
            for label in labels {
                let content = label.inner_text().await.ok().flatten().unwrap_or_default();
                if !matches_text(&content, text, *exact) {
                    continue;
                }
                if let Some(control) = control_for_label(page, &label).await? {
                    matched.push(control);
                }
            }
            Ok(ResolvedTarget { elements: matched, matched_description: format!("label=\"{text}\"") })
        }
        TargetVariant::Role { role, name, exact } => {
            let selector = role_selector(*role);
            let candidates = find_elements(page, scoped(selector, marker).as_str()).await?;
            let matched = match name {
                None => candidates,
                Some(name) => {
                    let mut out = Vec::new();
                    for el in candidates {
                        let accessible = accessible_name(&el).await;
                        if matches_text(&accessible, name, *exact) {
                            out.push(el);
                        }
                    }
                    out
                }
            };
            Ok(ResolvedTarget {
                matched_description: format!(
                    "role={:?}{}",
                    role,
                    name.as_ref().map(|n| format!(" name=\"{n}\"")).unwrap_or_default()
                ),
                elements: matched,
            })
        }
    }
}

async fn resolve_css(page: &Page, selector: &str, marker: Option<&str>) -> EngineResult<ResolvedTarget> {
    let full = scoped(selector, marker);
    let elements = find_elements(page, full.as_str()).await?;
    Ok(ResolvedTarget { elements, matched_description: format!("css=\"{selector}\"") })
}

async fn find_elements(page: &Page, selector: &str) -> EngineResult<Vec<Element>> {
    match page.find_elements(selector).await {
        Ok(elements) => Ok(elements),
        Err(_) => Ok(Vec::new()),
    }
}

async fn filter_by_attribute(
    candidates: Vec<Element>,
    attribute: &str,
    text: &str,
    exact: bool,
    label: &str,
) -> EngineResult<ResolvedTarget> {
    let mut matched = Vec::new();
    for el in candidates {
        let value = el.attribute(attribute).await.ok().flatten().unwrap_or_default();
        if matches_text(&value, text, exact) {
            matched.push(el);
        }
    }
    Ok(ResolvedTarget { elements: matched, matched_description: format!("{label}=\"{text}\"") })
}

async fn control_for_label(page: &Page, label: &Element) -> EngineResult<Option<Element>> {
    if let Some(for_id) = label.attribute("for").await.ok().flatten() {
        let selector = format!("#{}", escape_attr(&for_id));
        if let Ok(mut matches) = page.find_elements(selector.as_str()).await {
            if !matches.is_empty() {
                return Ok(Some(matches.remove(0)));
            }
        }
    }
    // Implicit association: the control is a descendant of the <label>. Tag
    // it with a throwaway marker so we can re-select it as a real element
    // handle (call_js_fn only returns JSON values, not object references).
    let marker = uuid::Uuid::new_v4().simple().to_string();
    let script = format!(
        "function() {{ const c = this.querySelector('input,textarea,select'); if (c) c.setAttribute('data-showrun-scope', '{marker}'); }}"
    );
    let _ = label.call_js_fn(&script, false).await;
    let selector = format!("[data-showrun-scope=\"{marker}\"]");
    let mut matches = find_elements(page, selector.as_str()).await?;
    if matches.is_empty() {
        return Ok(None);
    }
    let control = matches.remove(0);
    let _ = control
        .call_js_fn("function() { this.removeAttribute('data-showrun-scope'); }", false)
        .await;
    Ok(Some(control))
}

async fn accessible_name(el: &Element) -> String {
    if let Some(aria_label) = el.attribute("aria-label").await.ok().flatten() {
        if !aria_label.is_empty() {
            return aria_label;
        }
    }
    el.inner_text().await.ok().flatten().unwrap_or_default()
}

fn matches_text(haystack: &str, needle: &str, exact: bool) -> bool {
    let haystack = haystack.trim();
    if exact {
        haystack == needle
    } else {
        haystack.to_lowercase().contains(&needle.to_lowercase())
    }
}

fn escape_attr(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}

fn role_selector(role: AriaRole) -> &'static str {
    match role {
        AriaRole::Button => "button, [role='button'], input[type='submit'], input[type='button'], input[type='reset']",
        AriaRole::Link => "a[href], [role='link']",
        AriaRole::Textbox => "input[type='text'], input:not([type]), textarea, [role='textbox']",
        AriaRole::Checkbox => "input[type='checkbox'], [role='checkbox']",
        AriaRole::Radio => "input[type='radio'], [role='radio']",
        AriaRole::Combobox => "select, [role='combobox']",
        AriaRole::Listbox => "select[multiple], [role='listbox']",
        AriaRole::Option => "option, [role='option']",
        AriaRole::Tab => "[role='tab']",
        AriaRole::Tabpanel => "[role='tabpanel']",
        AriaRole::Menu => "[role='menu']",
        AriaRole::Menuitem => "[role='menuitem']",
        AriaRole::Dialog => "dialog, [role='dialog']",
        AriaRole::Heading => "h1, h2, h3, h4, h5, h6, [role='heading']",
        AriaRole::Img => "img, [role='img']",
        AriaRole::List => "ul, ol, [role='list']",
        AriaRole::Listitem => "li, [role='listitem']",
        AriaRole::Navigation => "nav, [role='navigation']",
        AriaRole::Row => "tr, [role='row']",
        AriaRole::Cell => "td, [role='cell']",
        AriaRole::Columnheader => "th, [role='columnheader']",
        AriaRole::Switch => "[role='switch']",
        AriaRole::Slider => "input[type='range'], [role='slider']",
        AriaRole::Searchbox => "input[type='search'], [role='searchbox']",
    }
}

/// Reorder `elements` by ascending distance of their bounding-box center to
/// `near`'s first resolved match. Used by `click`'s `near` sibling field.
pub async fn order_by_proximity(page: &Page, elements: Vec<Element>, near: &Target) -> EngineResult<Vec<Element>> {
    let near_resolved = resolve_inner(page, near, None).await?;
    let anchor = match near_resolved.elements.into_iter().next() {
        Some(el) => el,
        None => return Ok(elements),
    };
    let anchor_center = match center_of(&anchor).await {
        Some(c) => c,
        None => return Ok(elements),
    };

    let mut with_distance = Vec::with_capacity(elements.len());
    for el in elements {
        let distance = match center_of(&el).await {
            Some(center) => {
                let dx = center.0 - anchor_center.0;
                let dy = center.1 - anchor_center.1;
                (dx * dx + dy * dy).sqrt()
            }
            None => f64::MAX,
        };
        with_distance.push((distance, el));
    }
    with_distance.sort_by(|a, b| a.0.total_cmp(&b.0));
    Ok(with_distance.into_iter().map(|(_, el)| el).collect())
}

async fn center_of(el: &Element) -> Option<(f64, f64)> {
    let value: Option<serde_json::Value> = el
        .call_js_fn(
            "function() { const r = this.getBoundingClientRect(); return { x: r.left + r.width / 2, y: r.top + r.height / 2 }; }",
            false,
        )
        .await
        .ok()
        .and_then(|v| v.result.value);
    let value = value?;
    let x = value.get("x")?.as_f64()?;
    let y = value.get("y")?.as_f64()?;
    Some((x, y))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_match_is_case_insensitive_substring_by_default() {
        assert!(matches_text("  Sign In Now ", "sign in", false));
        assert!(!matches_text("Sign In Now", "sign up", false));
    }

    #[test]
    fn exact_text_match_requires_trimmed_equality() {
        assert!(matches_text("  Submit  ", "Submit", true));
        assert!(!matches_text("Submit Now", "Submit", true));
    }

    #[test]
    fn scoped_selector_prefixes_marker_attribute() {
        assert_eq!(scoped("button", None), "button");
        assert_eq!(scoped("button", Some("abc123")), "[data-showrun-scope=\"abc123\"] button");
    }

    #[test]
    fn attr_escaping_guards_against_quote_breakout() {
        assert_eq!(escape_attr("foo\"bar"), "foo\\\"bar");
    }

    #[test]
    fn role_selector_covers_every_enumerated_role() {
        for role in [
            AriaRole::Button,
            AriaRole::Link,
            AriaRole::Textbox,
            AriaRole::Checkbox,
            AriaRole::Radio,
            AriaRole::Combobox,
            AriaRole::Listbox,
            AriaRole::Option,
            AriaRole::Tab,
            AriaRole::Tabpanel,
            AriaRole::Menu,
            AriaRole::Menuitem,
            AriaRole::Dialog,
            AriaRole::Heading,
            AriaRole::Img,
            AriaRole::List,
            AriaRole::Listitem,
            AriaRole::Navigation,
            AriaRole::Row,
            AriaRole::Cell,
            AriaRole::Columnheader,
            AriaRole::Switch,
            AriaRole::Slider,
            AriaRole::Searchbox,
        ] {
            assert!(!role_selector(role).is_empty());
        }
    }
}
