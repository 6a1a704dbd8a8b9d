//! Typed structures for the task pack manifest, flow, steps, and targets.
//!
//! Deserialization is kept permissive
//! at the serde layer (`#[serde(deny_unknown_fields)]` is deliberately NOT
//! used here) because the validator, not serde, is responsible for
//! collecting *all* structural errors rather than failing on the first
//! unknown field.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// The unit of work: manifest + flow + optional auth/browser/snapshot config.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskPackManifest {
    pub id: String,
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub inputs: InputSchema,
    #[serde(default)]
    pub collectibles: Vec<CollectibleDecl>,
    #[serde(default)]
    pub auth: Option<AuthPolicy>,
    #[serde(default)]
    pub browser: Option<BrowserConfig>,
    #[serde(default)]
    pub secrets: Option<serde_json::Value>,
    #[serde(default)]
    pub snapshots: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowFile {
    #[serde(default)]
    pub inputs: InputSchema,
    #[serde(default)]
    pub collectibles: Vec<CollectibleDecl>,
    pub flow: Vec<Step>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectibleDecl {
    pub name: String,
    #[serde(default)]
    pub r#type: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

/// Mapping from input field name to its declared schema entry.
pub type InputSchema = HashMap<String, InputField>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputField {
    pub r#type: InputType,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub default: Option<serde_json::Value>,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InputType {
    String,
    Number,
    Boolean,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthPolicy {
    #[serde(default)]
    pub failure_monitor: Option<AuthFailureMonitorConfig>,
    #[serde(default)]
    pub guard: Option<AuthGuardStrategy>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthFailureMonitorConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_status_codes")]
    pub status_codes: Vec<u16>,
    #[serde(default)]
    pub url_includes: Option<String>,
    #[serde(default)]
    pub url_regex: Option<String>,
    #[serde(default)]
    pub login_url_includes: Option<String>,
    #[serde(default = "default_one")]
    pub max_recoveries_per_run: u32,
    #[serde(default = "default_one")]
    pub max_step_retry_after_recovery: u32,
    #[serde(default)]
    pub cooldown_ms: u64,
}

fn default_true() -> bool {
    true
}
fn default_status_codes() -> Vec<u16> {
    vec![401, 403]
}
fn default_one() -> u32 {
    1
}

impl Default for AuthFailureMonitorConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            status_codes: default_status_codes(),
            url_includes: None,
            url_regex: None,
            login_url_includes: None,
            max_recoveries_per_run: 1,
            max_step_retry_after_recovery: 1,
            cooldown_ms: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthGuardStrategy {
    #[serde(default)]
    pub visible_selector: Option<String>,
    #[serde(default)]
    pub url_includes: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BrowserConfig {
    #[serde(default)]
    pub proxy: Option<ProxyConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_proxy_mode")]
    pub mode: ProxyMode,
    #[serde(default)]
    pub country: Option<String>,
}

fn default_proxy_mode() -> ProxyMode {
    ProxyMode::Session
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProxyMode {
    Session,
    Random,
}

/// Ordered, uniquely-identified unit of execution within a flow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Step {
    pub id: String,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    #[serde(default)]
    pub optional: bool,
    #[serde(default)]
    pub on_error: Option<OnError>,
    #[serde(default)]
    pub once: Option<OnceScope>,
    #[serde(default)]
    pub skip_if: Option<SkipIf>,
    #[serde(flatten)]
    pub body: StepBody,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OnError {
    Stop,
    Continue,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OnceScope {
    Session,
    Profile,
}

/// Tagged union of step params, keyed by the `type` discriminator.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "params", rename_all = "snake_case")]
pub enum StepBody {
    Navigate(NavigateParams),
    WaitFor(WaitForParams),
    Click(ClickParams),
    Fill(FillParams),
    ExtractText(ExtractTextParams),
    ExtractAttribute(ExtractAttributeParams),
    ExtractTitle(ExtractTitleParams),
    Sleep(SleepParams),
    Assert(AssertParams),
    SetVar(SetVarParams),
    NetworkFind(NetworkFindParams),
    NetworkReplay(NetworkReplayParams),
    NetworkExtract(NetworkExtractParams),
    /// Any step type not recognized by this engine version. Preserved so
    /// the validator can report "unknown step type" without losing the
    /// rest of the document's structure.
    #[serde(other)]
    Unknown,
}

impl StepBody {
    pub fn type_name(&self) -> &'static str {
        match self {
            StepBody::Navigate(_) => "navigate",
            StepBody::WaitFor(_) => "wait_for",
            StepBody::Click(_) => "click",
            StepBody::Fill(_) => "fill",
            StepBody::ExtractText(_) => "extract_text",
            StepBody::ExtractAttribute(_) => "extract_attribute",
            StepBody::ExtractTitle(_) => "extract_title",
            StepBody::Sleep(_) => "sleep",
            StepBody::Assert(_) => "assert",
            StepBody::SetVar(_) => "set_var",
            StepBody::NetworkFind(_) => "network_find",
            StepBody::NetworkReplay(_) => "network_replay",
            StepBody::NetworkExtract(_) => "network_extract",
            StepBody::Unknown => "unknown",
        }
    }

    /// Steps skipped entirely (no-op'd) under HTTP-only execution.
    pub fn is_http_skipped(&self) -> bool {
        matches!(
            self,
            StepBody::Navigate(_)
                | StepBody::Click(_)
                | StepBody::Fill(_)
                | StepBody::WaitFor(_)
                | StepBody::Assert(_)
                | StepBody::NetworkFind(_)
        )
    }

    /// Steps that disqualify a flow from HTTP-only promotion outright.
    pub fn is_dom_extraction(&self) -> bool {
        matches!(
            self,
            StepBody::ExtractText(_) | StepBody::ExtractTitle(_) | StepBody::ExtractAttribute(_)
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NavigateParams {
    pub url: String,
    #[serde(default)]
    pub wait_until: Option<WaitUntil>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WaitUntil {
    Load,
    Domcontentloaded,
    Networkidle,
    Commit,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WaitForParams {
    #[serde(default)]
    pub target: Option<Target>,
    #[serde(default)]
    pub selector: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub load_state: Option<WaitUntil>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClickParams {
    #[serde(default)]
    pub target: Option<Target>,
    #[serde(default)]
    pub selector: Option<String>,
    #[serde(default)]
    pub scope: Option<Target>,
    #[serde(default)]
    pub near: Option<Target>,
    #[serde(default)]
    pub hint: Option<String>,
    #[serde(default = "default_true")]
    pub first: bool,
    #[serde(default)]
    pub wait_for_navigation: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FillParams {
    #[serde(default)]
    pub target: Option<Target>,
    #[serde(default)]
    pub selector: Option<String>,
    #[serde(default)]
    pub scope: Option<Target>,
    pub value: String,
    #[serde(default = "default_true")]
    pub clear: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExtractTextParams {
    #[serde(default)]
    pub target: Option<Target>,
    #[serde(default)]
    pub selector: Option<String>,
    #[serde(default)]
    pub scope: Option<Target>,
    pub out: String,
    #[serde(default = "default_true")]
    pub trim: bool,
    #[serde(default = "default_true")]
    pub first: bool,
    #[serde(default)]
    pub default: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExtractAttributeParams {
    #[serde(default)]
    pub target: Option<Target>,
    #[serde(default)]
    pub selector: Option<String>,
    #[serde(default)]
    pub scope: Option<Target>,
    pub attribute: String,
    pub out: String,
    #[serde(default = "default_true")]
    pub first: bool,
    #[serde(default)]
    pub default: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractTitleParams {
    pub out: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SleepParams {
    pub duration_ms: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AssertParams {
    #[serde(default)]
    pub target: Option<Target>,
    #[serde(default)]
    pub selector: Option<String>,
    #[serde(default)]
    pub visible: Option<bool>,
    #[serde(default)]
    pub exists: Option<bool>,
    #[serde(default)]
    pub url_includes: Option<String>,
    #[serde(default)]
    pub var_equals: Option<(String, serde_json::Value)>,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetVarParams {
    pub name: String,
    pub value: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkFindParams {
    pub r#where: NetworkFindWhere,
    pub save_as: String,
    #[serde(default = "default_pick")]
    pub pick: PickStrategy,
    #[serde(default)]
    pub wait_for_ms: u64,
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
}

fn default_pick() -> PickStrategy {
    PickStrategy::First
}
fn default_poll_interval() -> u64 {
    100
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PickStrategy {
    First,
    Last,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NetworkFindWhere {
    #[serde(default)]
    pub url_includes: Option<String>,
    #[serde(default)]
    pub url_regex: Option<String>,
    #[serde(default)]
    pub method: Option<HttpMethod>,
    #[serde(default)]
    pub status: Option<u16>,
    #[serde(default)]
    pub content_type_includes: Option<String>,
    #[serde(default)]
    pub response_contains: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Delete,
    Patch,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkReplayParams {
    pub request_id: String,
    #[serde(default = "default_auth_mode")]
    pub auth: String,
    pub out: String,
    #[serde(default)]
    pub save_as: Option<String>,
    pub response: ReplayResponseSpec,
    #[serde(default)]
    pub overrides: Option<ReplayOverrides>,
}

fn default_auth_mode() -> String {
    "browser_context".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplayResponseSpec {
    pub r#as: ReplayAs,
    #[serde(default)]
    pub json_path: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReplayAs {
    Json,
    Text,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReplayOverrides {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub url_replace: Option<FindReplace>,
    #[serde(default)]
    pub set_query: Option<HashMap<String, String>>,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub body_replace: Option<FindReplace>,
    #[serde(default)]
    pub set_headers: Option<HashMap<String, String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FindReplace {
    pub find: String,
    pub replace: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkExtractParams {
    pub from_var: String,
    pub r#as: ReplayAs,
    pub out: String,
    #[serde(default)]
    pub json_path: Option<String>,
    #[serde(default)]
    pub transform: Option<HashMap<String, String>>,
}

/// Declarative element condition consumed by the skip_if evaluator.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SkipIf {
    UrlIncludes { url_includes: String },
    UrlMatches { url_matches: String },
    ElementVisible { element_visible: Target },
    ElementExists { element_exists: Target },
    VarEquals { var_equals: (String, serde_json::Value) },
    VarTruthy { var_truthy: String },
    VarFalsy { var_falsy: String },
    All { all: Vec<SkipIf> },
    Any { any: Vec<SkipIf> },
}

/// Declarative element target — a sum type over locator strategies.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Target {
    AnyOf {
        #[serde(rename = "anyOf")]
        any_of: Vec<Target>,
    },
    // Tried before `Legacy` below: a `{kind, selector}` object must resolve
    // to its specific variant, not silently degrade to the legacy form.
    Variant(TargetVariant),
    Legacy {
        selector: String,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum TargetVariant {
    Css {
        selector: String,
    },
    Text {
        text: String,
        #[serde(default)]
        exact: bool,
    },
    Role {
        role: AriaRole,
        #[serde(default)]
        name: Option<String>,
        #[serde(default)]
        exact: bool,
    },
    Label {
        text: String,
        #[serde(default)]
        exact: bool,
    },
    Placeholder {
        text: String,
        #[serde(default)]
        exact: bool,
    },
    AltText {
        text: String,
        #[serde(default)]
        exact: bool,
    },
    TestId {
        id: String,
    },
}

/// Closed enumeration of ARIA roles accepted by `{kind:"role"}` targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AriaRole {
    Button,
    Link,
    Textbox,
    Checkbox,
    Radio,
    Combobox,
    Listbox,
    Option,
    Tab,
    Tabpanel,
    Menu,
    Menuitem,
    Dialog,
    Heading,
    Img,
    List,
    Listitem,
    Navigation,
    Row,
    Cell,
    Columnheader,
    Switch,
    Slider,
    Searchbox,
}
