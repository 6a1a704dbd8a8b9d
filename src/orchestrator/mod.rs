//! Run Orchestrator: wires together pack loading, interpretation, and persistence for one run.
//!
//! Composes every other component for one run: validates inputs, decides
//! HTTP-only vs. browser mode via the Snapshot Engine, launches (or skips)
//! the Browser Controller and attaches Network Capture, drives the Step
//! Interpreter, and on fatal error captures a screenshot + HTML dump.

pub mod events;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_json::Map;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::auth::{AuthFailureMonitor, OnceCache};
use crate::browser::BrowserManager;
use crate::error::{EngineError, EngineResult};
use crate::interpreter::{RunOptions, RunResult, StepInterpreter};
use crate::network::{listener, NetworkCaptureService};
use crate::pack::TaskPack;
use crate::proxy::{OxylabsProvider, ProxyRegistry};
use crate::result_store::{self, memory::InMemoryResultStore, sqlite::SqliteResultStore, ResultStoreProvider, StoredResult};
use crate::snapshot::SnapshotFile;
use crate::ResultStoreBackend;
use events::{EventSink, JsonlEventSink, NullEventSink};

/// Inputs to a single run.
pub struct RunTaskPackOptions {
    /// Directory the pack was loaded from (`taskpack.json`, `flow.json`,
    /// `.snapshots.json`, `.versions/`, `.browser-profile/`, `results.db`).
    pub pack_dir: PathBuf,
    /// Per-run scratch directory; `events.jsonl` and `artifacts/` are
    /// created underneath it.
    pub run_dir: PathBuf,
    pub headless: bool,
    /// Scopes the `once:"profile"` cache and the persistent browser
    /// profile directory across runs of the same pack for the same caller.
    pub profile_id: Option<String>,
    pub secrets: HashMap<String, String>,
    /// Where successful collectibles are persisted; defaults
    /// to an embedded `results.db` alongside the pack so results survive
    /// restart without any caller configuration.
    pub result_store_backend: ResultStoreBackend,
}

impl Default for RunTaskPackOptions {
    fn default() -> Self {
        Self {
            pack_dir: PathBuf::from("."),
            run_dir: PathBuf::from("."),
            headless: true,
            profile_id: None,
            secrets: HashMap::new(),
            result_store_backend: ResultStoreBackend::InMemory,
        }
    }
}

/// Full result of a run: the interpreter's `RunResult` plus the paths the
/// caller can use to inspect what happened.
pub struct RunOutcome {
    pub result: EngineResult<RunResult>,
    pub run_dir: PathBuf,
    pub events_path: PathBuf,
    pub artifacts_dir: PathBuf,
    /// `generateResultKey(packId, inputs)`; present whenever the run
    /// succeeded, regardless of whether the store write has completed yet.
    pub result_key: Option<String>,
}

/// Runs one task pack end to end.
pub async fn run_task_pack(pack: &TaskPack, inputs: Map<String, serde_json::Value>, options: RunTaskPackOptions) -> EngineResult<RunOutcome> {
    std::fs::create_dir_all(&options.run_dir)?;
    let artifacts_dir = options.run_dir.join("artifacts");
    std::fs::create_dir_all(&artifacts_dir)?;
    let events_path = options.run_dir.join("events.jsonl");
    let events: Arc<dyn EventSink> = match JsonlEventSink::create(&events_path) {
        Ok(sink) => Arc::new(sink),
        Err(e) => {
            warn!("failed to open event sink, falling back to a no-op sink: {}", e);
            Arc::new(NullEventSink)
        }
    };

    let snapshots = load_snapshots(&options.pack_dir);
    let proxy = resolve_proxy(pack).await;

    // Mode selection: try the browser first
    // and only skip it when the Snapshot Engine says the flow is eligible
    // for HTTP-only *and* no browser is otherwise required for this run.
    let http_eligible = crate::snapshot::is_flow_http_compatible(&pack.flow.flow, snapshots.as_ref(), chrono::Utc::now());

    let once_cache_dir = options
        .pack_dir
        .join(".browser-profile")
        .join(options.profile_id.as_deref().unwrap_or("default"))
        .join(".once-cache");
    let once_cache = OnceCache::new(once_cache_dir);

    let auth_monitor = match pack.manifest.auth.as_ref().and_then(|p| p.failure_monitor.clone()) {
        Some(config) => Some(AuthFailureMonitor::new(config).map_err(|e| EngineError::Validation(format!("invalid auth.failureMonitor: {}", e)))?),
        None => None,
    };

    let mut handle = RunHandle {
        events: events.clone(),
        browser: None,
        network_listeners: Vec::new(),
    };

    let (page, network) = if http_eligible {
        info!(pack_id = %pack.manifest.id, "flow is http-compatible; skipping browser launch");
        (None, None)
    } else {
        let manager = BrowserManager::new(options.headless, proxy.clone());
        manager.get_or_launch().await?;
        let page = manager.new_page("about:blank").await?;
        let capture = NetworkCaptureService::new();
        let listeners = listener::attach(&page, capture.clone()).await.unwrap_or_else(|e| {
            warn!("failed to attach network capture: {}", e);
            Vec::new()
        });
        handle.network_listeners = listeners;
        handle.browser = Some(manager);
        (Some(page), Some(capture))
    };

    let interpreter = StepInterpreter::new(
        &pack.manifest,
        &pack.flow,
        page,
        network,
        proxy,
        snapshots,
        Some(once_cache),
        auth_monitor,
        events.clone(),
    );

    let run_options = RunOptions {
        inputs,
        secrets: options.secrets.clone(),
    };

    let inputs_value = serde_json::Value::Object(run_options.inputs.clone());
    let result = interpreter.run(run_options).await;

    if let Err(e) = &result {
        capture_failure_artifacts(&handle, &artifacts_dir, e).await;
    }

    handle.shutdown().await;

    // Result Store persists collectibles on success.
    // The key is deterministic, so the caller gets it back immediately; the
    // write itself is fire-and-forget relative to the caller's response.
    let result_key = if let Ok(run_result) = &result {
        let key = result_store::generate_result_key(&pack.manifest.id, &inputs_value);
        spawn_result_store_write(&options.pack_dir, &options.result_store_backend, pack, &key, &inputs_value, run_result);
        Some(key)
    } else {
        None
    };

    Ok(RunOutcome {
        result,
        run_dir: options.run_dir,
        events_path,
        artifacts_dir,
        result_key,
    })
}

fn spawn_result_store_write(
    pack_dir: &Path,
    backend: &ResultStoreBackend,
    pack: &TaskPack,
    key: &str,
    inputs: &serde_json::Value,
    run_result: &RunResult,
) {
    let stored = StoredResult {
        key: key.to_string(),
        pack_id: pack.manifest.id.clone(),
        tool_name: pack.manifest.name.clone(),
        inputs: inputs.clone(),
        collectibles: serde_json::Value::Object(run_result.collectibles.clone()),
        meta: serde_json::json!({
            "durationMs": run_result.meta.duration_ms,
            "stepsExecuted": run_result.meta.steps_executed,
            "stepsTotal": run_result.meta.steps_total,
            "url": run_result.meta.url,
            "notes": run_result.meta.notes,
        }),
        collectible_schema: serde_json::to_value(&pack.flow.collectibles).unwrap_or(serde_json::Value::Null),
        stored_at: chrono::Utc::now(),
        ran_at: chrono::Utc::now(),
        version: 0,
    };

    let provider = match open_result_store(pack_dir, backend) {
        Ok(p) => p,
        Err(e) => {
            warn!("failed to open result store, dropping this result: {}", e);
            return;
        }
    };

    tokio::spawn(async move {
        if let Err(e) = provider.store(stored) {
            warn!("failed to persist run result: {}", e);
        }
    });
}

fn open_result_store(pack_dir: &Path, backend: &ResultStoreBackend) -> EngineResult<Arc<dyn ResultStoreProvider>> {
    match backend {
        ResultStoreBackend::InMemory => Ok(Arc::new(InMemoryResultStore::new())),
        ResultStoreBackend::Sqlite(path) => {
            let resolved = if path.is_absolute() { path.clone() } else { pack_dir.join(path) };
            Ok(Arc::new(SqliteResultStore::open(&resolved)?))
        }
    }
}

/// Owns the resources a run needs cleaned up regardless of outcome: the
/// browser (if any) and its network-listener tasks.
struct RunHandle {
    events: Arc<dyn EventSink>,
    browser: Option<BrowserManager>,
    network_listeners: Vec<JoinHandle<()>>,
}

impl RunHandle {
    async fn shutdown(self) {
        for handle in self.network_listeners {
            handle.abort();
        }
        if let Some(browser) = self.browser
            && let Err(e) = browser.shutdown().await
        {
            warn!("error shutting down browser: {}", e);
        }
        let _ = &self.events;
    }
}

async fn capture_failure_artifacts(handle: &RunHandle, artifacts_dir: &Path, error: &EngineError) {
    let Some(browser) = &handle.browser else {
        return;
    };
    let Some(page) = browser.current_page().await else {
        return;
    };
    let controller = crate::browser::controller::BrowserController::new(&page);

    match controller.screenshot_png().await {
        Ok(bytes) => {
            if let Err(e) = std::fs::write(artifacts_dir.join("error.png"), bytes) {
                warn!("failed to write error screenshot: {}", e);
            }
        }
        Err(e) => warn!("failed to capture error screenshot: {}", e),
    }

    match controller.content().await {
        Ok(html) => {
            if let Err(e) = std::fs::write(artifacts_dir.join("error.html"), html) {
                warn!("failed to write error html dump: {}", e);
            }
        }
        Err(e) => warn!("failed to capture error html dump: {}", e),
    }

    handle.events.emit(
        "error",
        serde_json::json!({"message": crate::redact::redact(&error.to_string()), "fatal": true}),
    );
}

/// Loads `.snapshots.json` from the pack directory, if present. Tolerant
/// of a missing file; malformed JSON is logged and treated as "no
/// snapshots" rather than failing the whole run.
fn load_snapshots(pack_dir: &Path) -> Option<SnapshotFile> {
    let path = pack_dir.join(".snapshots.json");
    match std::fs::read_to_string(&path) {
        Ok(contents) => match serde_json::from_str(&contents) {
            Ok(file) => Some(file),
            Err(e) => {
                warn!("malformed .snapshots.json, ignoring: {}", e);
                None
            }
        },
        Err(_) => None,
    }
}

/// Resolves `browser.proxy` from the manifest, if declared and enabled
///. Registers the built-in Oxylabs
/// provider from environment variables; an unknown provider name is a
/// typed error surfaced to the caller.
async fn resolve_proxy(pack: &TaskPack) -> Option<crate::proxy::ResolvedProxy> {
    let proxy_config = pack.manifest.browser.as_ref()?.proxy.as_ref()?;
    if !proxy_config.enabled {
        return None;
    }
    let registry = ProxyRegistry::new();
    if let Ok(provider) = OxylabsProvider::from_env() {
        registry.register("oxylabs", Box::new(provider));
    }
    match registry.resolve(proxy_config) {
        Ok(resolved) => resolved,
        Err(e) => {
            warn!("failed to resolve proxy config: {}", e);
            None
        }
    }
}
