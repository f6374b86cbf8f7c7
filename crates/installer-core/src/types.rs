//! Core data model: recipes, system profiles, plans, and steps (spec §3).

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Installation method, the `method` axis of `Recipe::install` (GLOSSARY).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Method {
    Apt,
    Dnf,
    Yum,
    Apk,
    Pacman,
    Zypper,
    Brew,
    Snap,
    Pip,
    Npm,
    Cargo,
    Go,
    Binary,
    CurlPipe,
    Source,
    #[serde(rename = "_default")]
    Default,
}

impl Method {
    /// True for methods backed by a host package manager (vs. language PM
    /// or ad-hoc download/build methods).
    pub fn is_system_pm(self) -> bool {
        matches!(
            self,
            Method::Apt
                | Method::Dnf
                | Method::Yum
                | Method::Apk
                | Method::Pacman
                | Method::Zypper
                | Method::Brew
                | Method::Snap
        )
    }

    pub fn is_language_pm(self) -> bool {
        matches!(self, Method::Pip | Method::Npm | Method::Cargo | Method::Go)
    }
}

/// A recipe's per-method install command/template (§3 `install`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstallCommand {
    pub command: String,
    #[serde(default)]
    pub pip_index: Option<String>,
}

/// A selectable variant under `install_variants`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstallVariant {
    pub command: String,
    #[serde(default)]
    pub method: Option<Method>,
    #[serde(default)]
    pub pip_index: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Requires {
    #[serde(default)]
    pub binaries: Vec<String>,
    #[serde(default)]
    pub packages: HashMap<String, Vec<String>>,
    #[serde(default)]
    pub runtime: Vec<String>,
}

/// `needs_sudo`: either a uniform bool or a per-method map with `_default`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum NeedsSudo {
    Uniform(bool),
    PerMethod(HashMap<String, bool>),
}

impl NeedsSudo {
    pub fn for_method(&self, method: Method) -> bool {
        match self {
            NeedsSudo::Uniform(b) => *b,
            NeedsSudo::PerMethod(map) => {
                let key = serde_json::to_value(method)
                    .ok()
                    .and_then(|v| v.as_str().map(str::to_owned))
                    .unwrap_or_default();
                map.get(&key)
                    .copied()
                    .unwrap_or_else(|| map.get("_default").copied().unwrap_or(false))
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChoiceKind {
    Single,
    Multi,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChoiceSource {
    Static,
    Dynamic,
    PackageManager,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChoiceOption {
    pub id: String,
    pub label: String,
    #[serde(default)]
    pub default: bool,
    /// Condition-DSL predicate (evaluated by `installer-condition`).
    #[serde(default)]
    pub requires: Option<serde_json::Value>,
    #[serde(default)]
    pub warning: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub estimated_time: Option<u32>,
    #[serde(default)]
    pub risk: Option<Risk>,
    #[serde(default)]
    pub disabled_reason: Option<String>,
    #[serde(default)]
    pub enable_hint: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Choice {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: ChoiceKind,
    pub label: String,
    pub source: ChoiceSource,
    #[serde(default)]
    pub options: Vec<ChoiceOption>,
    #[serde(default)]
    pub fetch_url: Option<String>,
    #[serde(default)]
    pub parse: Option<String>,
    #[serde(default)]
    pub filter: Option<String>,
    #[serde(default)]
    pub exclude: Option<String>,
    #[serde(default)]
    pub limit: Option<usize>,
    #[serde(default)]
    pub cache_ttl: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InputType {
    Select,
    Number,
    Text,
    Path,
    Boolean,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InputValidation {
    #[serde(default)]
    pub min: Option<f64>,
    #[serde(default)]
    pub max: Option<f64>,
    #[serde(default)]
    pub integer: bool,
    #[serde(default)]
    pub regex: Option<String>,
    #[serde(default)]
    pub must_be_absolute: bool,
    #[serde(default)]
    pub must_exist: bool,
    #[serde(default)]
    pub options: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputSpec {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: InputType,
    pub label: String,
    #[serde(default)]
    pub default: Option<serde_json::Value>,
    #[serde(default)]
    pub validation: Option<InputValidation>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TemplateFormat {
    Json,
    Ini,
    Yaml,
    Raw,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigTemplate {
    pub id: String,
    pub file: String,
    pub format: TemplateFormat,
    #[serde(default)]
    pub inputs: Vec<String>,
    #[serde(default)]
    pub post_command: Option<String>,
    #[serde(default)]
    pub condition: Option<serde_json::Value>,
}

/// A shell hook run after the main install (spec §4.9): group membership
/// changes, PATH injection into profile files. `modifies_path` drives the
/// shell-restart heuristic in the Restart Detector (spec §4.11).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostInstallHook {
    pub id: String,
    pub description: String,
    pub command: String,
    #[serde(default)]
    pub modifies_path: bool,
    #[serde(default)]
    pub condition: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataPack {
    pub id: String,
    pub label: String,
    pub size_bytes: u64,
    pub command: String,
    #[serde(default)]
    pub requires: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildSystem {
    Autotools,
    Cmake,
    CargoGit,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildFromSource {
    pub build_system: BuildSystem,
    pub git_repo: String,
    #[serde(default)]
    pub branch: Option<String>,
    #[serde(default)]
    pub configure_args: Vec<String>,
    #[serde(default)]
    pub cmake_args: Vec<String>,
    #[serde(default)]
    pub build_type: Option<String>,
    #[serde(default)]
    pub requires_toolchain: HashMap<String, serde_json::Value>,
    #[serde(default)]
    pub requires_packages: HashMap<String, Vec<String>>,
    #[serde(default)]
    pub disk_estimate_mb: Option<u64>,
    #[serde(default)]
    pub ram_estimate_mb: Option<u64>,
    #[serde(default)]
    pub build_dir: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Risk {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RestartKind {
    Shell,
    Service,
    Reboot,
}

/// One `repo_setup` unit: a keyring import plus a package source line
/// (spec §4.7 `repo_setup`). `marker_file` backs the idempotent
/// `file_exists` short-circuit the step performs before running.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepoSetupSpec {
    pub id: String,
    #[serde(default)]
    pub key_command: Option<String>,
    pub source_command: String,
    pub marker_file: String,
    #[serde(default)]
    pub condition: Option<serde_json::Value>,
}

/// `service` step input: which unit to start/enable via the host's
/// init-system abstraction (spec §4.7 `service`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceSpec {
    pub name: String,
    #[serde(default = "default_true")]
    pub start: bool,
    #[serde(default = "default_true")]
    pub enable: bool,
    #[serde(default)]
    pub restart_kind: Option<RestartKind>,
}

fn default_true() -> bool {
    true
}

/// The canonical declarative unit, keyed by `tool_id` (spec §3 Recipe).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Recipe {
    pub tool_id: String,
    pub label: String,
    pub category: String,
    pub verify: String,
    #[serde(default)]
    pub install: HashMap<Method, InstallCommand>,
    #[serde(default)]
    pub install_variants: HashMap<String, InstallVariant>,
    #[serde(default)]
    pub requires: Requires,
    #[serde(default = "default_needs_sudo")]
    pub needs_sudo: NeedsSudo,
    #[serde(default)]
    pub choices: Vec<Choice>,
    #[serde(default)]
    pub inputs: Vec<InputSpec>,
    #[serde(default)]
    pub config_templates: Vec<ConfigTemplate>,
    #[serde(default)]
    pub repo_setup: Vec<RepoSetupSpec>,
    #[serde(default)]
    pub service: Option<ServiceSpec>,
    #[serde(default)]
    pub post_install: Vec<PostInstallHook>,
    #[serde(default)]
    pub data_packs: Vec<DataPack>,
    #[serde(default)]
    pub build_from_source: Option<BuildFromSource>,
    #[serde(default)]
    pub remove: Option<String>,
    #[serde(default)]
    pub arch_map: HashMap<String, String>,
    #[serde(default)]
    pub cli_verify_args: Vec<String>,
    #[serde(default)]
    pub minimum_version: Option<String>,
    #[serde(default)]
    pub version_constraint: Option<serde_json::Value>,
    #[serde(default)]
    pub restart: Vec<RestartKind>,
    #[serde(default)]
    pub method_priority: Vec<Method>,
    /// True only for recipes whose self-reference represents a provider
    /// relationship rather than an actual cycle (e.g. `cargo` satisfying
    /// `rustc`); spec §4.6 and §9.
    #[serde(default)]
    pub satisfies_self: bool,
    #[serde(default)]
    pub satisfies: Vec<String>,
}

fn default_needs_sudo() -> NeedsSudo {
    NeedsSudo::Uniform(false)
}

// ---------------------------------------------------------------------
// SystemProfile (spec §3)
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Distro {
    pub id: String,
    pub family: String,
    pub version: String,
    #[serde(default)]
    pub version_tuple: Vec<u32>,
    #[serde(default)]
    pub codename: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PackageManagerInfo {
    pub primary: String,
    #[serde(default)]
    pub available: Vec<String>,
    #[serde(default)]
    pub snap_available: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Capabilities {
    #[serde(default)]
    pub has_sudo: bool,
    #[serde(default)]
    pub passwordless_sudo: bool,
    #[serde(default)]
    pub has_systemd: bool,
    #[serde(default)]
    pub is_root: bool,
    #[serde(default)]
    pub in_container: bool,
    #[serde(default)]
    pub in_wsl: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Libc {
    #[serde(rename = "type")]
    pub kind: String,
    pub version: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Hardware {
    #[serde(default)]
    pub cpu_cores: u32,
    #[serde(default)]
    pub ram_total_mb: u64,
    #[serde(default)]
    pub disk_free_gb: u64,
    #[serde(default)]
    pub cpu_features: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NvidiaGpu {
    #[serde(default)]
    pub present: bool,
    #[serde(default)]
    pub driver: Option<String>,
    #[serde(default)]
    pub cuda: Option<String>,
    #[serde(default)]
    pub compute_capability: Option<String>,
    #[serde(default)]
    pub cudnn: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AmdGpu {
    #[serde(default)]
    pub present: bool,
    #[serde(default)]
    pub rocm: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IntelGpu {
    #[serde(default)]
    pub present: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Gpu {
    #[serde(default)]
    pub nvidia: NvidiaGpu,
    #[serde(default)]
    pub amd: AmdGpu,
    #[serde(default)]
    pub intel: IntelGpu,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Kernel {
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub headers_installed: bool,
    #[serde(default)]
    pub modules_loaded: Vec<String>,
    #[serde(default)]
    pub secure_boot: bool,
    #[serde(default)]
    pub dkms_available: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BuildToolchain {
    #[serde(default)]
    pub cc: Option<String>,
    #[serde(default)]
    pub cxx: Option<String>,
    #[serde(default)]
    pub cmake: Option<String>,
    #[serde(default)]
    pub make: Option<String>,
    #[serde(default)]
    pub ninja: Option<String>,
    #[serde(default)]
    pub rustc: Option<String>,
    #[serde(default)]
    pub cargo: Option<String>,
    #[serde(default)]
    pub go: Option<String>,
    #[serde(default)]
    pub gcc_is_clang_alias: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InitSystemType {
    Systemd,
    Initd,
    Openrc,
    Launchd,
    #[default]
    None,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InitSystem {
    #[serde(rename = "type", default)]
    pub kind: InitSystemType,
    #[serde(default)]
    pub can_enable: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NetworkInfo {
    #[serde(default)]
    pub proxy: Option<String>,
    #[serde(default)]
    pub registries_reachable: HashMap<String, bool>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PythonInfo {
    #[serde(default)]
    pub default_version: Option<String>,
    #[serde(default)]
    pub pep668_enforced: bool,
}

/// Structured facts about the host (spec §3 SystemProfile).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemProfile {
    pub system: String,
    pub arch: String,
    pub distro: Distro,
    pub package_manager: PackageManagerInfo,
    pub capabilities: Capabilities,
    #[serde(default)]
    pub libc: Option<Libc>,
    #[serde(default)]
    pub libraries: Vec<String>,
    #[serde(default)]
    pub hardware: Option<Hardware>,
    #[serde(default)]
    pub gpu: Option<Gpu>,
    #[serde(default)]
    pub kernel: Option<Kernel>,
    #[serde(default)]
    pub build_toolchain: Option<BuildToolchain>,
    #[serde(default)]
    pub init_system: Option<InitSystem>,
    #[serde(default)]
    pub network: Option<NetworkInfo>,
    #[serde(default)]
    pub python: Option<PythonInfo>,
}

// ---------------------------------------------------------------------
// Choice/input bindings
// ---------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ChoiceValue {
    Single(String),
    Multi(Vec<String>),
}

pub type ChoiceBinding = HashMap<String, ChoiceValue>;
pub type InputBinding = HashMap<String, serde_json::Value>;

// ---------------------------------------------------------------------
// Plan / Step / StepResult / PlanState (spec §3)
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepType {
    RepoSetup,
    Packages,
    Tool,
    Source,
    Build,
    Install,
    ConfigTemplate,
    Service,
    PostInstall,
    DataPack,
    Verify,
    Cleanup,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max: u32,
    pub backoff_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Step {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: StepType,
    pub label: String,
    #[serde(default)]
    pub command: Option<String>,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub shell: bool,
    #[serde(default)]
    pub cwd: Option<String>,
    #[serde(default)]
    pub env_overrides: HashMap<String, String>,
    pub needs_sudo: bool,
    pub timeout_sec: u64,
    #[serde(default)]
    pub depends_on: Vec<String>,
    #[serde(default)]
    pub retry: Option<RetryPolicy>,
    pub risk: Risk,
    #[serde(default)]
    pub estimated_time_sec: Option<u32>,
    #[serde(default)]
    pub artifacts: Vec<String>,
    #[serde(default)]
    pub stream: bool,
    /// Package-manager lock this step must hold while running, if any.
    #[serde(default)]
    pub pm_lock: Option<String>,
    /// Restart hint implied if this step succeeds.
    #[serde(default)]
    pub restart_hint: Option<RestartKind>,
    #[serde(default)]
    pub batchable: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfirmationGate {
    #[default]
    None,
    Confirm,
    TypeToConfirm,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RestartSummary {
    #[serde(default)]
    pub shell_restart: bool,
    #[serde(default)]
    pub reboot_required: bool,
    #[serde(default)]
    pub service_restart: Vec<String>,
    #[serde(default)]
    pub reasons: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    pub plan_id: uuid::Uuid,
    pub tool: String,
    pub created_at: DateTime<Utc>,
    pub steps: Vec<Step>,
    pub risk_summary: Risk,
    #[serde(default)]
    pub risk_escalation: Option<String>,
    pub confirmation_gate: ConfirmationGate,
    #[serde(default)]
    pub warning: Option<String>,
    #[serde(default)]
    pub restart: RestartSummary,
    #[serde(default)]
    pub answers: ChoiceBinding,
    #[serde(default)]
    pub inputs: InputBinding,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Running,
    Success,
    Failed,
    Skipped,
    Cancelled,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepResult {
    pub step_id: String,
    pub status: StepStatus,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub ended_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub exit_code: Option<i32>,
    #[serde(default)]
    pub output_tail: String,
    #[serde(default)]
    pub error_kind: Option<String>,
    #[serde(default)]
    pub retries_used: u32,
}

impl StepResult {
    pub fn pending(step_id: impl Into<String>) -> Self {
        Self {
            step_id: step_id.into(),
            status: StepStatus::Pending,
            started_at: None,
            ended_at: None,
            exit_code: None,
            output_tail: String::new(),
            error_kind: None,
            retries_used: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanPhase {
    Queued,
    Running,
    Paused,
    Succeeded,
    Failed,
    Cancelled,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanState {
    pub plan: Plan,
    pub results: Vec<StepResult>,
    pub phase: PlanPhase,
    #[serde(default)]
    pub interruption_reason: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl PlanState {
    pub fn new_queued(plan: Plan) -> Self {
        let results = plan.steps.iter().map(|s| StepResult::pending(&s.id)).collect();
        Self {
            plan,
            results,
            phase: PlanPhase::Queued,
            interruption_reason: None,
            updated_at: Utc::now(),
        }
    }

    pub fn result_mut(&mut self, step_id: &str) -> Option<&mut StepResult> {
        self.results.iter_mut().find(|r| r.step_id == step_id)
    }
}

// ---------------------------------------------------------------------
// Resolution response (spec §6)
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PlanResponse {
    Plan { plan: Plan },
    AlreadyInstalled { version_installed: Option<String> },
    Error {
        error_kind: String,
        message: String,
        #[serde(default)]
        details: Option<serde_json::Value>,
    },
}
