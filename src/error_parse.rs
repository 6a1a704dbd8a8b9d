//! Playwright-shaped error-string parsing.
//!
//! chromiumoxide surfaces raw CDP/protocol error text rather than
//! Playwright's structured `TimeoutError`/`call log` format, but flows
//! authored against Playwright-style tooling still produce error strings in
//! that shape when run against a Playwright-shaped controller. This module
//! extracts `{error, hint, callLog}` out of one, purely for diagnostics —
//! hints never change control flow.

use once_cell::sync::Lazy;
use regex::Regex;

static ANSI: Lazy<Regex> = Lazy::new(|| Regex::new(r"\x1b\[[0-9;]*m").unwrap());

/// A parsed Playwright-style error, stripped of ANSI and separated into its
/// headline message, call-log lines, and (if recognized) a diagnostic hint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedError {
    pub error: String,
    pub call_log: Vec<String>,
    pub hint: Option<String>,
}

/// Strip ANSI escapes, split the headline from `- `-indented call-log lines,
/// and attach a hint for recognizable failure patterns.
pub fn parse(raw: &str) -> ParsedError {
    let clean = ANSI.replace_all(raw, "").into_owned();

    let mut headline_lines = Vec::new();
    let mut call_log = Vec::new();
    for line in clean.lines() {
        let trimmed = line.trim_start();
        if trimmed.starts_with("- ") {
            call_log.push(trimmed.trim_start_matches("- ").to_string());
        } else if !trimmed.is_empty() {
            headline_lines.push(trimmed.to_string());
        }
    }

    let error = headline_lines.join(" ").trim().to_string();
    let hint = recognize_hint(&error, &call_log);

    ParsedError {
        error: if error.is_empty() { clean.trim().to_string() } else { error },
        call_log,
        hint,
    }
}

fn recognize_hint(error: &str, call_log: &[String]) -> Option<String> {
    let haystack = format!("{} {}", error, call_log.join(" ")).to_ascii_lowercase();

    if haystack.contains("intercepts pointer events") || haystack.contains("element is not receiving pointer events") {
        return Some("another element is overlapping the target; scroll it into view or dismiss the overlay first".to_string());
    }
    if haystack.contains("strict mode violation") {
        return Some("the locator matched more than one element; narrow the target or add `first:true`".to_string());
    }
    if haystack.contains("element is not attached") || haystack.contains("detached from document") {
        return Some("the element was removed from the DOM after it was located; re-resolve the target before acting on it".to_string());
    }
    if haystack.contains("navigation") && (haystack.contains("interrupted") || haystack.contains("superseded")) {
        return Some("a navigation started before the previous one settled; add a `wait_for` between the two".to_string());
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_ansi_and_splits_call_log() {
        let raw = "\x1b[31mTimeoutError\x1b[0m: locator.click: Timeout 5000ms exceeded.\n  - waiting for element to be visible\n  - element is not receiving pointer events";
        let parsed = parse(raw);
        assert_eq!(parsed.error, "TimeoutError: locator.click: Timeout 5000ms exceeded.");
        assert_eq!(parsed.call_log.len(), 2);
        assert!(parsed.hint.unwrap().contains("overlapping"));
    }

    #[test]
    fn recognizes_strict_mode_violation() {
        let raw = "Error: strict mode violation: locator resolved to 3 elements";
        let parsed = parse(raw);
        assert!(parsed.hint.unwrap().contains("more than one element"));
    }

    #[test]
    fn no_hint_for_unrecognized_error() {
        let raw = "Error: something else entirely went wrong";
        let parsed = parse(raw);
        assert!(parsed.hint.is_none());
    }
}
