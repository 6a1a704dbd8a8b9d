//! Step Interpreter — the run loop that drives a flow's
//! steps against a live page (or, in HTTP-only mode, against persisted
//! snapshots), threading templating, target resolution, once-scoping, and
//! auth recovery through each step.

pub mod skip_if;
pub mod steps;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::Page;
use serde_json::{Map, Value};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::auth::{AuthFailureMonitor, AuthGuardChecker, OnceCache, RecoveryDriver, StepExecutor};
use crate::browser::controller::BrowserController;
use crate::error::{EngineError, EngineResult};
use crate::network::NetworkCaptureService;
use crate::orchestrator::events::EventSink;
use crate::pack::model::{FlowFile, OnError, Step, StepBody, TaskPackManifest};
use crate::pack::{apply_defaults, inputs_to_map, validate_inputs};
use crate::proxy::ResolvedProxy;
use crate::snapshot::{self, SnapshotFile};
use crate::template::TemplateContext;

/// Applies when a step declares no explicit `timeoutMs`.
const DEFAULT_STEP_TIMEOUT_MS: u64 = 30_000;

pub struct RunOptions {
    pub inputs: Map<String, Value>,
    pub secrets: HashMap<String, String>,
}

#[derive(Debug, Clone)]
pub struct RunMeta {
    pub url: Option<String>,
    pub duration_ms: u64,
    pub steps_executed: u32,
    pub steps_total: u32,
    pub notes: Option<String>,
}

#[derive(Debug, Clone)]
pub struct RunResult {
    pub collectibles: Map<String, Value>,
    pub meta: RunMeta,
}

/// Mutable run-scoped state: frozen inputs, mutable vars, mutable collectibles.
struct RunState {
    inputs: HashMap<String, Value>,
    vars: HashMap<String, Value>,
    collectibles: Map<String, Value>,
    secrets: HashMap<String, String>,
}

/// Drives one run of a flow. Borrowed references keep this cheap to
/// construct per run; interior state lives behind a `tokio::sync::Mutex`
/// since `StepExecutor::execute_step` (used by auth recovery) only gets `&self`.
pub struct StepInterpreter<'a> {
    manifest: &'a TaskPackManifest,
    flow: &'a FlowFile,
    page: Option<Page>,
    network: Option<NetworkCaptureService>,
    proxy: Option<ResolvedProxy>,
    snapshots: Option<SnapshotFile>,
    http_only: bool,
    once_cache: Option<OnceCache>,
    auth_monitor: Option<AuthFailureMonitor>,
    abort: CancellationToken,
    events: Arc<dyn EventSink>,
    state: Mutex<RunState>,
}

impl<'a> StepInterpreter<'a> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        manifest: &'a TaskPackManifest,
        flow: &'a FlowFile,
        page: Option<Page>,
        network: Option<NetworkCaptureService>,
        proxy: Option<ResolvedProxy>,
        snapshots: Option<SnapshotFile>,
        once_cache: Option<OnceCache>,
        auth_monitor: Option<AuthFailureMonitor>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        // Mode selection: only promote to HTTP-only when
        // there is no live page to begin with *and* the Snapshot Engine agrees
        // the flow qualifies.
        let http_only =
            page.is_none() && snapshot::is_flow_http_compatible(&flow.flow, snapshots.as_ref(), chrono::Utc::now());

        Self {
            manifest,
            flow,
            page,
            network,
            proxy,
            snapshots,
            http_only,
            once_cache,
            auth_monitor,
            abort: CancellationToken::new(),
            events,
            state: Mutex::new(RunState {
                inputs: HashMap::new(),
                vars: HashMap::new(),
                collectibles: Map::new(),
                secrets: HashMap::new(),
            }),
        }
    }

    pub fn is_http_only(&self) -> bool {
        self.http_only
    }

    pub fn abort_handle(&self) -> CancellationToken {
        self.abort.clone()
    }

    pub async fn run(&self, options: RunOptions) -> EngineResult<RunResult> {
        let started = tokio::time::Instant::now();

        validate_inputs(&self.flow.inputs, &options.inputs)?;
        let defaulted = apply_defaults(&options.inputs, &self.flow.inputs);

        {
            let mut state = self.state.lock().await;
            state.inputs = inputs_to_map(&defaulted);
            state.vars.clear();
            state.collectibles.clear();
            state.secrets = options.secrets.clone();
        }
        if let Some(once_cache) = &self.once_cache {
            once_cache.load_profile_scope();
        }

        let total = self.flow.flow.len() as u32;
        let mut executed = 0u32;
        let once_step_ids: Vec<String> = self.flow.flow.iter().filter(|s| s.once.is_some()).map(|s| s.id.clone()).collect();

        self.events.emit("run_started", serde_json::json!({"packId": self.manifest.id, "stepsTotal": total}));

        for step in &self.flow.flow {
            if self.abort.is_cancelled() {
                self.events.emit("run_aborted", serde_json::json!({"stepId": step.id}));
                return Err(EngineError::Operational(format!("run aborted before step '{}'", step.id)));
            }

            if let Some(once) = step.once {
                let already_ran = self.once_cache.as_ref().is_some_and(|c| c.has_run(once, &step.id));
                if already_ran {
                    self.events.emit("step_skipped", serde_json::json!({"stepId": step.id, "reason": "once"}));
                    continue;
                }
            }

            if let Some(condition) = &step.skip_if {
                let vars_snapshot = self.state.lock().await.vars.clone();
                if skip_if::evaluate(condition, self.page.as_ref(), &vars_snapshot).await? {
                    self.events.emit("step_skipped", serde_json::json!({"stepId": step.id, "reason": "skip_if"}));
                    continue;
                }
            }

            if self.http_only && step.body.is_http_skipped() {
                self.events.emit("step_skipped", serde_json::json!({"stepId": step.id, "reason": "http_mode"}));
                continue;
            }

            self.check_auth_guard().await?;

            self.events.emit("step_started", serde_json::json!({"stepId": step.id, "type": step.body.type_name()}));

            match self.run_step_with_timeout(step, &once_step_ids).await {
                Ok(()) => {
                    executed += 1;
                    self.events.emit("step_finished", serde_json::json!({"stepId": step.id}));
                    if let Some(once) = step.once
                        && let Some(cache) = &self.once_cache
                    {
                        cache.mark_run(once, &step.id).map_err(|e| EngineError::Operational(e.to_string()))?;
                    }
                }
                Err(e) => {
                    let downgrade = step.optional || matches!(step.on_error, Some(OnError::Continue));
                    let redacted = crate::redact::redact(&e.to_string());
                    let parsed = crate::error_parse::parse(&redacted);
                    self.events.emit(
                        "error",
                        serde_json::json!({
                            "stepId": step.id,
                            "message": parsed.error,
                            "callLog": parsed.call_log,
                            "hint": parsed.hint,
                            "downgraded": downgrade,
                        }),
                    );
                    if downgrade {
                        warn!("step '{}' failed, continuing (optional/onError=continue): {}", step.id, e);
                        continue;
                    }
                    self.events.emit("run_aborted", serde_json::json!({"stepId": step.id}));
                    return Err(e);
                }
            }
        }

        self.events.emit("run_finished", serde_json::json!({"stepsExecuted": executed, "stepsTotal": total}));

        let url = match &self.page {
            Some(page) => page.url().await.ok().flatten(),
            None => None,
        };

        let state = self.state.lock().await;
        let declared: Vec<&str> = self.flow.collectibles.iter().map(|c| c.name.as_str()).collect();
        let filtered: Map<String, Value> = state
            .collectibles
            .iter()
            .filter(|(k, _)| declared.is_empty() || declared.contains(&k.as_str()))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        Ok(RunResult {
            collectibles: filtered,
            meta: RunMeta {
                url,
                duration_ms: started.elapsed().as_millis() as u64,
                steps_executed: executed,
                steps_total: total,
                notes: if self.http_only {
                    Some("executed in http-only mode".to_string())
                } else {
                    None
                },
            },
        })
    }

    /// Proactive guard check: if the current page looks like
    /// a login wall and recovery is configured, run it before the step that
    /// would otherwise fail against a stale session.
    async fn check_auth_guard(&self) -> EngineResult<()> {
        let (Some(page), Some(policy)) = (&self.page, self.manifest.auth.as_ref()) else {
            return Ok(());
        };
        let Some(guard_strategy) = &policy.guard else {
            return Ok(());
        };
        let checker = AuthGuardChecker::new(guard_strategy);
        if !checker.is_guarded(page).await? {
            return Ok(());
        }
        let Some(monitor) = &self.auth_monitor else {
            return Ok(());
        };
        let once_step_ids: Vec<String> = self.flow.flow.iter().filter(|s| s.once.is_some()).map(|s| s.id.clone()).collect();
        let Some(login_step) = once_step_ids.first() else {
            return Ok(());
        };
        let driver = RecoveryDriver::new(monitor);
        driver.recover(self, &once_step_ids, login_step).await
    }

    async fn run_step_with_timeout(&self, step: &Step, once_step_ids: &[String]) -> EngineResult<()> {
        let timeout_ms = step.timeout_ms.unwrap_or(DEFAULT_STEP_TIMEOUT_MS);
        let outcome = tokio::time::timeout(Duration::from_millis(timeout_ms), self.dispatch(step)).await;

        let result = match outcome {
            Ok(r) => r,
            Err(_) => Err(EngineError::StepTimeout {
                step_id: step.id.clone(),
                timeout_ms,
            }),
        };

        match result {
            Err(EngineError::AuthFailure(reason)) => {
                let Some(monitor) = &self.auth_monitor else {
                    return Err(EngineError::AuthFailure(reason));
                };
                let driver = RecoveryDriver::new(monitor);
                driver.recover(self, once_step_ids, &step.id).await
            }
            other => other,
        }
    }

    async fn template_context(&self) -> TemplateContext {
        let state = self.state.lock().await;
        TemplateContext {
            inputs: state.inputs.clone(),
            vars: state.vars.clone(),
            secrets: state.secrets.clone(),
        }
    }

    async fn dispatch(&self, step: &Step) -> EngineResult<()> {
        use steps::{extraction, interaction, misc, navigation, network};

        match &step.body {
            StepBody::Navigate(params) => {
                let tctx = self.template_context().await;
                let page = self.require_page(&step.id)?;
                let controller = BrowserController::new(page);
                navigation::navigate(&controller, params, &tctx).await
            }
            StepBody::WaitFor(params) => {
                let tctx = self.template_context().await;
                let page = self.require_page(&step.id)?;
                let controller = BrowserController::new(page);
                let timeout_ms = step.timeout_ms.unwrap_or(DEFAULT_STEP_TIMEOUT_MS);
                navigation::wait_for(&controller, params, timeout_ms, &step.id, &tctx).await
            }
            StepBody::Click(params) => {
                let page = self.require_page(&step.id)?;
                let controller = BrowserController::new(page);
                interaction::click(&controller, params, &step.id).await
            }
            StepBody::Fill(params) => {
                let tctx = self.template_context().await;
                let page = self.require_page(&step.id)?;
                let controller = BrowserController::new(page);
                interaction::fill(&controller, params, &step.id, &tctx).await
            }
            StepBody::ExtractText(params) => {
                let page = self.require_page(&step.id)?;
                let controller = BrowserController::new(page);
                let value = extraction::extract_text(&controller, params, &step.id).await?;
                self.state.lock().await.collectibles.insert(params.out.clone(), value);
                Ok(())
            }
            StepBody::ExtractAttribute(params) => {
                let page = self.require_page(&step.id)?;
                let controller = BrowserController::new(page);
                let value = extraction::extract_attribute(&controller, params, &step.id).await?;
                self.state.lock().await.collectibles.insert(params.out.clone(), value);
                Ok(())
            }
            StepBody::ExtractTitle(params) => {
                let page = self.require_page(&step.id)?;
                let controller = BrowserController::new(page);
                let value = extraction::extract_title(&controller, params).await?;
                self.state.lock().await.collectibles.insert(params.out.clone(), value);
                Ok(())
            }
            StepBody::Sleep(params) => {
                misc::sleep(params).await;
                Ok(())
            }
            StepBody::SetVar(params) => {
                let tctx = self.template_context().await;
                let mut state = self.state.lock().await;
                misc::set_var(params, &mut state.vars, &tctx)
            }
            StepBody::Assert(params) => {
                let state = self.state.lock().await;
                let vars = state.vars.clone();
                drop(state);
                let controller = self.page.as_ref().map(BrowserController::new);
                misc::assert(controller.as_ref(), params, &vars, &step.id).await
            }
            StepBody::NetworkFind(params) => {
                let capture = self.require_network(&step.id)?;
                let mut state = self.state.lock().await;
                network::network_find(capture, params, &mut state.vars, &step.id).await
            }
            StepBody::NetworkReplay(params) => self.dispatch_network_replay(step, params).await,
            StepBody::NetworkExtract(params) => {
                let mut state = self.state.lock().await;
                let vars = state.vars.clone();
                network::network_extract(params, &vars, &mut state.collectibles, &step.id)
            }
            StepBody::Unknown => Err(EngineError::Validation(format!("step '{}' has an unrecognized type", step.id))),
        }
    }

    async fn dispatch_network_replay(&self, step: &Step, params: &crate::pack::model::NetworkReplayParams) -> EngineResult<()> {
        use steps::network;

        let tctx = self.template_context().await;

        if self.http_only {
            let snapshots = self
                .snapshots
                .as_ref()
                .ok_or_else(|| EngineError::Operational(format!("step '{}': http-only mode requires a snapshot file", step.id)))?;
            let snapshot = snapshots
                .get(&step.id)
                .ok_or_else(|| EngineError::Operational(format!("step '{}': no snapshot recorded for this step", step.id)))?;
            let mut state = self.state.lock().await;
            let (vars, collectibles) = (&mut state.vars, &mut state.collectibles);
            network::network_replay_http(
                snapshot,
                params,
                self.proxy.as_ref(),
                &self.abort,
                vars,
                collectibles,
                &tctx,
                &step.id,
                self.auth_monitor.as_ref(),
            )
            .await
        } else {
            let page = self.require_page(&step.id)?;
            let capture = self.require_network(&step.id)?;
            let mut state = self.state.lock().await;
            let (vars, collectibles) = (&mut state.vars, &mut state.collectibles);
            network::network_replay_browser(
                page,
                capture,
                params,
                vars,
                collectibles,
                &tctx,
                &step.id,
                self.auth_monitor.as_ref(),
            )
            .await
        }
    }

    fn require_page(&self, step_id: &str) -> EngineResult<&Page> {
        self.page
            .as_ref()
            .ok_or_else(|| EngineError::Validation(format!("step '{}' requires a live page but the run is http-only", step_id)))
    }

    fn require_network(&self, step_id: &str) -> EngineResult<&NetworkCaptureService> {
        self.network
            .as_ref()
            .ok_or_else(|| EngineError::Validation(format!("step '{}' requires network capture but none is attached", step_id)))
    }
}

#[async_trait]
impl<'a> StepExecutor for StepInterpreter<'a> {
    /// Re-executes a single step by id, bypassing `skip_if`/once-scoping —
    /// used by the auth recovery driver to rerun a login step and retry the
    /// step that originally failed.
    async fn execute_step(&self, step_id: &str) -> EngineResult<()> {
        let step = self
            .flow
            .flow
            .iter()
            .find(|s| s.id == step_id)
            .ok_or_else(|| EngineError::Validation(format!("unknown step id '{}'", step_id)))?;
        self.dispatch(step).await
    }
}
