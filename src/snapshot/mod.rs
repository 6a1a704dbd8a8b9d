//! Snapshot Engine: records per-endpoint response shape to decide HTTP-only eligibility.
//!
//! Persisted request snapshots used for HTTP-only replay, plus the
//! staleness policy and HTTP-only compatibility decision.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::pack::model::{Step, StepBody};

/// A persisted capture associated with a `network_replay` step id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestSnapshot {
    pub step_id: String,
    pub captured_at: chrono::DateTime<chrono::Utc>,
    pub method: String,
    pub url: String,
    pub request_headers: Vec<(String, String)>,
    pub body: Option<String>,
    pub response: SnapshotResponse,
    /// Structural digest of the step's params at capture time, used to
    /// detect "params changed since capture".
    pub params_digest: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotResponse {
    pub status: u16,
    pub content_type: Option<String>,
    pub body_sha: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SnapshotFile {
    pub snapshots: HashMap<String, RequestSnapshot>,
    #[serde(default = "default_max_age_secs")]
    pub max_age_secs: u64,
}

fn default_max_age_secs() -> u64 {
    // Age threshold left configurable; default adopts the most conservative
    // interpretation.
    3600
}

impl SnapshotFile {
    pub fn get(&self, step_id: &str) -> Option<&RequestSnapshot> {
        self.snapshots.get(step_id)
    }
}

/// A snapshot is stale when it has aged past `max_age_secs`, or when the
/// step's current params no longer match the digest captured alongside it
/// ("any change -> stale" is the conservative reading adopted here).
pub fn is_stale(snapshot: &RequestSnapshot, current_params_digest: &str, max_age_secs: u64, now: chrono::DateTime<chrono::Utc>) -> bool {
    let age = (now - snapshot.captured_at).num_seconds().max(0) as u64;
    if age > max_age_secs {
        return true;
    }
    snapshot.params_digest != current_params_digest
}

/// Structural digest of a step's params, for staleness comparison. Not a
/// security hash — just stable enough to detect "something changed".
pub fn digest_step_params(step: &Step) -> String {
    let json = serde_json::to_string(&step.body).unwrap_or_default();
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(json.as_bytes());
    hex::encode(hasher.finalize())
}

/// HTTP-only eligibility decision.
///
/// A flow qualifies iff:
/// 1. A `SnapshotFile` exists.
/// 2. No step type is in the DOM-extraction set.
/// 3. >= 1 `network_replay` step exists and every one has a non-stale snapshot.
/// 4. No HTTP-skipped step's params contain a template expression.
pub fn is_flow_http_compatible(
    flow: &[Step],
    snapshots: Option<&SnapshotFile>,
    now: chrono::DateTime<chrono::Utc>,
) -> bool {
    let Some(snapshots) = snapshots else {
        return false;
    };

    if flow.iter().any(|s| s.body.is_dom_extraction()) {
        return false;
    }

    let replay_steps: Vec<&Step> = flow
        .iter()
        .filter(|s| matches!(s.body, StepBody::NetworkReplay(_)))
        .collect();
    if replay_steps.is_empty() {
        return false;
    }
    for step in &replay_steps {
        let Some(snap) = snapshots.get(&step.step_id_or_else()) else {
            return false;
        };
        let digest = digest_step_params(step);
        if is_stale(snap, &digest, snapshots.max_age_secs, now) {
            return false;
        }
    }

    for step in flow {
        if step.body.is_http_skipped() && step_contains_template(step) {
            return false;
        }
    }

    true
}

trait StepIdHelper {
    fn step_id_or_else(&self) -> String;
}
impl StepIdHelper for Step {
    fn step_id_or_else(&self) -> String {
        self.id.clone()
    }
}

fn step_contains_template(step: &Step) -> bool {
    let json = serde_json::to_string(&step.body).unwrap_or_default();
    json.contains("{{")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pack::model::{NavigateParams, SleepParams};
    use chrono::Utc;

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
    fn no_snapshot_file_means_not_eligible() {
        let flow = vec![step("a", StepBody::Sleep(SleepParams { duration_ms: 1 }))];
        assert!(!is_flow_http_compatible(&flow, None, Utc::now()));
    }

    #[test]
    fn dom_extraction_step_disqualifies() {
        use crate::pack::model::ExtractTitleParams;
        let flow = vec![step(
            "a",
            StepBody::ExtractTitle(ExtractTitleParams { out: "t".into() }),
        )];
        let snapshots = SnapshotFile::default();
        assert!(!is_flow_http_compatible(&flow, Some(&snapshots), Utc::now()));
    }

    #[test]
    fn templated_http_skipped_step_disqualifies() {
        use crate::pack::model::{NetworkReplayParams, ReplayAs, ReplayResponseSpec};
        let replay_step = step(
            "r",
            StepBody::NetworkReplay(NetworkReplayParams {
                request_id: "{{vars.r}}".to_string(),
                auth: "browser_context".to_string(),
                out: "out".to_string(),
                save_as: None,
                response: ReplayResponseSpec {
                    r#as: ReplayAs::Json,
                    json_path: None,
                },
                overrides: None,
            }),
        );
        let nav_step = step(
            "nav",
            StepBody::Navigate(NavigateParams {
                url: "{{inputs.url}}".to_string(),
                wait_until: None,
            }),
        );
        let digest = digest_step_params(&replay_step);
        let mut snapshots = SnapshotFile::default();
        snapshots.snapshots.insert(
            "r".to_string(),
            RequestSnapshot {
                step_id: "r".to_string(),
                captured_at: Utc::now(),
                method: "GET".to_string(),
                url: "https://example.com".to_string(),
                request_headers: vec![],
                body: None,
                response: SnapshotResponse {
                    status: 200,
                    content_type: None,
                    body_sha: None,
                },
                params_digest: digest,
            },
        );

        let flow = vec![nav_step, replay_step];
        assert!(!is_flow_http_compatible(&flow, Some(&snapshots), Utc::now()));
    }
}
