//! Structural validation for task packs and flows.
//!
//! Validation collects *all* errors when given a sink,
//! or raises the first one (citing step index 0 if it's not step-scoped)
//! when called without one. Every message is prefixed
//! `Step <i> (id="<id|?>", type="<type|?>"): <reason>` for step-scoped
//! errors.

use regex::Regex;
use serde_json::Value;
use std::collections::HashSet;

use crate::error::EngineError;
use crate::pack::model::*;

/// Accumulates validation errors. When absent from `validate_flow`'s
/// caller, the first pushed error is raised immediately as a fault.
#[derive(Debug, Default)]
pub struct ErrorSink {
    errors: Vec<String>,
}

impl ErrorSink {
    pub fn push(&mut self, msg: String) {
        self.errors.push(msg);
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn into_vec(self) -> Vec<String> {
        self.errors
    }
}

fn step_prefix(index: usize, id: Option<&str>, ty: Option<&str>) -> String {
    format!(
        "Step {} (id=\"{}\", type=\"{}\")",
        index,
        id.unwrap_or("?"),
        ty.unwrap_or("?")
    )
}

/// Validate a flow, collecting every structural violation into `sink` if
/// provided; otherwise raises the first violation found as `Err`.
///
/// Equivalent to `validate_flow_raw` with no raw step JSON available, so
/// unknown-param checking (which needs the original keys serde already
/// dropped) is skipped.
pub fn validate_flow(flow: &[Step], sink: Option<&mut ErrorSink>) -> Result<(), EngineError> {
    validate_flow_raw(flow, &[], sink)
}

/// Validate a flow the same way as `validate_flow`, additionally diffing
/// each known step's raw `params` object (`raw_flow`, aligned by index with
/// `flow`) against that step type's known field set so unknown params are
/// rejected per spec.md §4.1/§8, not silently dropped at the serde layer.
pub fn validate_flow_raw(flow: &[Step], raw_flow: &[Value], sink: Option<&mut ErrorSink>) -> Result<(), EngineError> {
    let mut local = ErrorSink::default();
    let has_external_sink = sink.is_some();
    let target = sink.unwrap_or(&mut local);

    let mut seen_ids: HashSet<&str> = HashSet::new();
    for (i, step) in flow.iter().enumerate() {
        if step.id.is_empty() {
            target.push(format!("{}: step id must not be empty", step_prefix(i, None, Some(step.body.type_name()))));
        } else if !seen_ids.insert(step.id.as_str()) {
            target.push(format!(
                "{}: duplicate step id",
                step_prefix(i, Some(&step.id), Some(step.body.type_name()))
            ));
        }

        let raw_params = raw_flow.get(i).and_then(|v| v.get("params"));
        validate_step_body(i, step, raw_params, target);
    }

    if has_external_sink || target.is_empty() {
        // Caller supplied a sink (errors already written into it) or there
        // were none to report.
        Ok(())
    } else {
        Err(EngineError::Validation(target.errors.remove(0)))
    }
}

fn validate_step_body(i: usize, step: &Step, raw_params: Option<&Value>, sink: &mut ErrorSink) {
    let prefix = || step_prefix(i, Some(&step.id), Some(step.body.type_name()));

    if !matches!(step.body, StepBody::Unknown) {
        check_unknown_params(&prefix(), step.body.type_name(), raw_params, sink);
    }

    match &step.body {
        StepBody::Navigate(p) => {
            if p.url.is_empty() {
                sink.push(format!("{}: navigate.url must not be empty", prefix()));
            }
        }
        StepBody::WaitFor(p) => {
            if p.target.is_none() && p.selector.is_none() && p.url.is_none() && p.load_state.is_none() {
                sink.push(format!(
                    "{}: wait_for requires one of target/selector/url/loadState",
                    prefix()
                ));
            }
        }
        StepBody::Click(p) => {
            if p.target.is_none() && p.selector.is_none() {
                sink.push(format!("{}: click requires target or selector", prefix()));
            }
            if let Some(t) = &p.target {
                validate_target(&prefix(), t, sink);
            }
        }
        StepBody::Fill(p) => {
            if p.target.is_none() && p.selector.is_none() {
                sink.push(format!("{}: fill requires target or selector", prefix()));
            }
            if let Some(t) = &p.target {
                validate_target(&prefix(), t, sink);
            }
        }
        StepBody::ExtractText(p) => {
            if p.target.is_none() && p.selector.is_none() {
                sink.push(format!("{}: extract_text requires target or selector", prefix()));
            }
            if p.out.is_empty() {
                sink.push(format!("{}: extract_text.out must not be empty", prefix()));
            }
        }
        StepBody::ExtractAttribute(p) => {
            if p.target.is_none() && p.selector.is_none() {
                sink.push(format!("{}: extract_attribute requires target or selector", prefix()));
            }
            if p.attribute.is_empty() {
                sink.push(format!("{}: extract_attribute.attribute must not be empty", prefix()));
            }
            if p.out.is_empty() {
                sink.push(format!("{}: extract_attribute.out must not be empty", prefix()));
            }
        }
        StepBody::ExtractTitle(p) => {
            if p.out.is_empty() {
                sink.push(format!("{}: extract_title.out must not be empty", prefix()));
            }
        }
        StepBody::Sleep(_) => {}
        StepBody::Assert(p) => {
            if p.target.is_none()
                && p.selector.is_none()
                && p.visible.is_none()
                && p.exists.is_none()
                && p.url_includes.is_none()
                && p.var_equals.is_none()
            {
                sink.push(format!("{}: assert requires at least one predicate", prefix()));
            }
        }
        StepBody::SetVar(p) => {
            if p.name.is_empty() {
                sink.push(format!("{}: set_var.name must not be empty", prefix()));
            }
        }
        StepBody::NetworkFind(p) => {
            if let Some(re) = &p.r#where.url_regex
                && let Err(e) = Regex::new(re)
            {
                sink.push(format!("{}: network_find.where.urlRegex invalid: {}", prefix(), e));
            }
            if let Some(rc) = &p.r#where.response_contains
                && rc.chars().count() > 2000
            {
                sink.push(format!(
                    "{}: network_find.where.responseContains must be <= 2000 chars",
                    prefix()
                ));
            }
            if p.poll_interval_ms < 100 {
                sink.push(format!(
                    "{}: network_find.pollIntervalMs must be >= 100",
                    prefix()
                ));
            }
            if p.save_as.is_empty() {
                sink.push(format!("{}: network_find.saveAs must not be empty", prefix()));
            }
        }
        StepBody::NetworkReplay(p) => {
            if !is_template_reference(&p.request_id) {
                sink.push(format!(
                    "{}: network_replay.requestId must be a template reference, not a literal capture id",
                    prefix()
                ));
            }
            if let Some(overrides) = &p.overrides
                && let Some(headers) = &overrides.set_headers
            {
                for name in headers.keys() {
                    if crate::redact::is_sensitive_header(name) {
                        sink.push(format!(
                            "{}: network_replay.overrides.setHeaders cannot set sensitive header '{}'",
                            prefix(),
                            name
                        ));
                    }
                }
            }
            if let Some(overrides) = &p.overrides {
                if let Some(fr) = &overrides.url_replace
                    && let Err(e) = Regex::new(&fr.find)
                {
                    sink.push(format!("{}: overrides.urlReplace.find invalid regex: {}", prefix(), e));
                }
                if let Some(fr) = &overrides.body_replace
                    && let Err(e) = Regex::new(&fr.find)
                {
                    sink.push(format!("{}: overrides.bodyReplace.find invalid regex: {}", prefix(), e));
                }
            }
        }
        StepBody::NetworkExtract(p) => {
            if p.from_var.is_empty() {
                sink.push(format!("{}: network_extract.fromVar must not be empty", prefix()));
            }
            if p.out.is_empty() {
                sink.push(format!("{}: network_extract.out must not be empty", prefix()));
            }
        }
        StepBody::Unknown => {
            sink.push(format!(
                "Step {} (id=\"{}\"): unknown step type",
                i,
                if step.id.is_empty() { "?" } else { &step.id }
            ));
        }
    }
}

fn validate_target(prefix: &str, target: &Target, sink: &mut ErrorSink) {
    match target {
        Target::AnyOf { any_of } => {
            if any_of.is_empty() {
                sink.push(format!("{}: target.anyOf must not be empty", prefix));
            }
            for t in any_of {
                validate_target(prefix, t, sink);
            }
        }
        Target::Legacy { selector } => {
            if selector.is_empty() {
                sink.push(format!("{}: target selector must not be empty", prefix));
            }
        }
        Target::Variant(TargetVariant::Css { selector }) => {
            if selector.is_empty() {
                sink.push(format!("{}: target.css.selector must not be empty", prefix));
            }
        }
        Target::Variant(_) => {}
    }
}

fn is_template_reference(s: &str) -> bool {
    s.trim_start().starts_with("{{") && s.trim_end().ends_with("}}")
}

/// The field names a known step type's `params` object accepts, exactly as
/// its `serde`-derived struct names them (these structs deliberately omit
/// `deny_unknown_fields`, so this is the validator's only line of defense
/// against a typo'd or invented param silently doing nothing).
fn known_params_for(step_type: &str) -> &'static [&'static str] {
    match step_type {
        "navigate" => &["url", "wait_until"],
        "wait_for" => &["target", "selector", "url", "load_state"],
        "click" => &["target", "selector", "scope", "near", "hint", "first", "wait_for_navigation"],
        "fill" => &["target", "selector", "scope", "value", "clear"],
        "extract_text" => &["target", "selector", "scope", "out", "trim", "first", "default"],
        "extract_attribute" => &["target", "selector", "scope", "attribute", "out", "first", "default"],
        "extract_title" => &["out"],
        "sleep" => &["duration_ms"],
        "assert" => &["target", "selector", "visible", "exists", "url_includes", "var_equals", "message"],
        "set_var" => &["name", "value"],
        "network_find" => &["where", "save_as", "pick", "wait_for_ms", "poll_interval_ms"],
        "network_replay" => &["request_id", "auth", "out", "save_as", "response", "overrides"],
        "network_extract" => &["from_var", "as", "out", "json_path", "transform"],
        _ => &[],
    }
}

/// Diffs a known step's raw `params` object against its known field set and
/// pushes a `Step <i> ...: unknown param '<name>'` error per extra key
/// (steered through `unknown_param_suggestion` where applicable).
fn check_unknown_params(prefix: &str, step_type: &str, raw_params: Option<&Value>, sink: &mut ErrorSink) {
    let Some(Value::Object(map)) = raw_params else {
        return;
    };
    let known = known_params_for(step_type);
    for key in map.keys() {
        if known.contains(&key.as_str()) {
            continue;
        }
        match unknown_param_suggestion(step_type, key) {
            Some(suggestion) => sink.push(format!("{}: {}", prefix, suggestion)),
            None => sink.push(format!("{}: unknown param '{}'", prefix, key)),
        }
    }
}

/// Suggests `network_extract` with JMESPath when an unknown param on
/// `extract_text` looks like an inline-transform attempt.
fn unknown_param_suggestion(step_type: &str, param_name: &str) -> Option<String> {
    const TRANSFORM_LIKE: &[&str] = &["eval", "expression", "transform"];
    if step_type == "extract_text" && TRANSFORM_LIKE.contains(&param_name) {
        Some(format!(
            "unknown param '{}' on extract_text; use a `network_extract` step with a JMESPath expression instead",
            param_name
        ))
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn step(id: &str, body: StepBody) -> Step {
        Step {
            id: id.to_string(),
            label: None,
            timeout_ms: None,
            optional: false,
            on_error: None,
            once: None,
            skip_if: None,
            body,
        }
    }

    #[test]
    fn duplicate_ids_are_collected() {
        let flow = vec![
            step("a", StepBody::Sleep(SleepParams { duration_ms: 1 })),
            step("a", StepBody::Sleep(SleepParams { duration_ms: 1 })),
        ];
        let mut sink = ErrorSink::default();
        validate_flow(&flow, Some(&mut sink)).unwrap();
        assert_eq!(sink.into_vec().len(), 1);
    }

    #[test]
    fn no_sink_raises_first_error_citing_step_zero() {
        let flow = vec![step(
            "",
            StepBody::Navigate(NavigateParams {
                url: String::new(),
                wait_until: None,
            }),
        )];
        let err = validate_flow(&flow, None).unwrap_err();
        assert!(err.to_string().contains("Step 0"));
    }

    #[test]
    fn network_find_poll_interval_below_100_rejected() {
        let flow = vec![step(
            "f",
            StepBody::NetworkFind(NetworkFindParams {
                r#where: NetworkFindWhere::default(),
                save_as: "x".into(),
                pick: PickStrategy::First,
                wait_for_ms: 0,
                poll_interval_ms: 50,
            }),
        )];
        let mut sink = ErrorSink::default();
        validate_flow(&flow, Some(&mut sink)).unwrap();
        assert!(!sink.is_empty());
    }

    #[test]
    fn response_contains_boundary_2000_ok_2001_rejected() {
        let mk = |len: usize| {
            vec![step(
                "f",
                StepBody::NetworkFind(NetworkFindParams {
                    r#where: NetworkFindWhere {
                        response_contains: Some("a".repeat(len)),
                        ..Default::default()
                    },
                    save_as: "x".into(),
                    pick: PickStrategy::First,
                    wait_for_ms: 0,
                    poll_interval_ms: 100,
                }),
            )]
        };
        let mut sink = ErrorSink::default();
        validate_flow(&mk(2000), Some(&mut sink)).unwrap();
        assert!(sink.is_empty());

        let mut sink2 = ErrorSink::default();
        validate_flow(&mk(2001), Some(&mut sink2)).unwrap();
        assert!(!sink2.is_empty());
    }

    #[test]
    fn network_replay_requires_template_request_id() {
        let flow = vec![step(
            "r",
            StepBody::NetworkReplay(NetworkReplayParams {
                request_id: "literal-id-123".into(),
                auth: "browser_context".into(),
                out: "out".into(),
                save_as: None,
                response: ReplayResponseSpec {
                    r#as: ReplayAs::Json,
                    json_path: None,
                },
                overrides: None,
            }),
        )];
        let mut sink = ErrorSink::default();
        validate_flow(&flow, Some(&mut sink)).unwrap();
        assert!(!sink.is_empty());
    }

    #[test]
    fn unknown_param_on_known_step_type_rejected() {
        let flow = vec![step("s", StepBody::ExtractTitle(ExtractTitleParams { out: "t".into() }))];
        let raw = vec![serde_json::json!({
            "id": "s",
            "type": "extract_title",
            "params": {"out": "t", "bogus": 1},
        })];
        let mut sink = ErrorSink::default();
        validate_flow_raw(&flow, &raw, Some(&mut sink)).unwrap();
        let errors = sink.into_vec();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("unknown param 'bogus'"));
    }

    #[test]
    fn extract_text_transform_like_param_steers_to_network_extract() {
        let flow = vec![step(
            "s",
            StepBody::ExtractText(ExtractTextParams {
                target: None,
                selector: Some("h1".into()),
                scope: None,
                out: "t".into(),
                trim: true,
                first: true,
                default: None,
            }),
        )];
        let raw = vec![serde_json::json!({
            "id": "s",
            "type": "extract_text",
            "params": {"selector": "h1", "out": "t", "transform": "upper"},
        })];
        let mut sink = ErrorSink::default();
        validate_flow_raw(&flow, &raw, Some(&mut sink)).unwrap();
        let errors = sink.into_vec();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("network_extract"));
        assert!(errors[0].contains("JMESPath"));
    }

    #[test]
    fn known_params_are_not_flagged() {
        let flow = vec![step(
            "s",
            StepBody::NetworkExtract(NetworkExtractParams {
                from_var: "captured".into(),
                r#as: ReplayAs::Json,
                out: "out".into(),
                json_path: None,
                transform: None,
            }),
        )];
        let raw = vec![serde_json::json!({
            "id": "s",
            "type": "network_extract",
            "params": {"from_var": "captured", "as": "json", "out": "out"},
        })];
        let mut sink = ErrorSink::default();
        validate_flow_raw(&flow, &raw, Some(&mut sink)).unwrap();
        assert!(sink.is_empty());
    }
}
