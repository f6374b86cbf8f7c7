//! Plan Builder (spec §2 component H, §4.7): turns a resolved method plus
//! a dependency closure into a concrete, ordered `Plan` of typed `Step`s.

use std::collections::HashMap;

use chrono::Utc;
use installer_core::types::*;
use installer_core::{InstallError, RecipeRegistry};
use installer_deps::DependencyGraph;

/// Per-node build input the caller has already resolved: which method to
/// use and which config templates/data packs the user opted into. The
/// Plan Builder does no resolution of its own (method/choice/dependency
/// resolution are earlier pipeline stages); it only assembles steps.
pub struct NodePlan<'a> {
    pub tool_id: &'a str,
    pub method: Method,
    pub selected_data_packs: Vec<String>,
}

fn step_id(tool_id: &str, suffix: &str) -> String {
    format!("{tool_id}::{suffix}")
}

fn needs_sudo_for(recipe: &Recipe, method: Method) -> bool {
    recipe.needs_sudo.for_method(method)
}

fn default_timeout_for(kind: StepType) -> u64 {
    match kind {
        StepType::Packages => 600,
        StepType::Build => 3600,
        StepType::Source => 300,
        StepType::Tool | StepType::Install => 600,
        StepType::ConfigTemplate => 30,
        StepType::Service => 60,
        StepType::PostInstall => 30,
        StepType::DataPack => 1800,
        StepType::Verify => 30,
        StepType::Cleanup => 60,
        StepType::RepoSetup => 120,
    }
}

fn pm_lock_for(method: Method) -> Option<String> {
    method.is_system_pm().then(|| format!("{method:?}").to_lowercase())
}

/// The fixed per-PM argument shape for a batched `packages` step (spec
/// §4.7). Returns `None` for methods with no package-list install form.
fn packages_command(method: Method, packages: &[String]) -> Option<String> {
    let pkgs = packages.join(" ");
    if pkgs.is_empty() {
        return None;
    }
    Some(match method {
        Method::Apt => format!("apt-get install -y --no-install-recommends {pkgs}"),
        Method::Dnf => format!("dnf -y install {pkgs}"),
        Method::Yum => format!("yum -y install {pkgs}"),
        Method::Apk => format!("apk add --no-cache {pkgs}"),
        Method::Pacman => format!("pacman -S --noconfirm {pkgs}"),
        Method::Zypper => format!("zypper -n install {pkgs}"),
        Method::Brew => format!("brew install {pkgs}"),
        Method::Snap => format!("snap install {pkgs}"),
        _ => return None,
    })
}

/// Builds the ordered `Step` list for one dependency-graph node, not
/// including the batched cross-node `packages` step (assembled separately
/// by `build_plan`, spec §4.6). Returns the step ids in execution order so
/// the caller can wire cross-node `depends_on` edges from the dependency
/// graph.
fn build_node_steps(
    recipe: &Recipe,
    node: &NodePlan<'_>,
    vars: &HashMap<String, String>,
    profile_json: &serde_json::Value,
) -> Result<Vec<Step>, InstallError> {
    let mut steps = Vec::new();
    let mut prev_ids: Vec<String> = Vec::new();
    let method = node.method;

    for repo in &recipe.repo_setup {
        if let Some(cond) = &repo.condition {
            if !installer_condition::evaluate(cond, profile_json) {
                continue;
            }
        }
        let id = step_id(node.tool_id, &format!("repo_setup::{}", repo.id));
        let command = match &repo.key_command {
            Some(key_cmd) => format!(
                "test -f {marker} || ({key_cmd} && {src})",
                marker = repo.marker_file,
                src = repo.source_command
            ),
            None => format!(
                "test -f {marker} || ({src})",
                marker = repo.marker_file,
                src = repo.source_command
            ),
        };
        steps.push(Step {
            id: id.clone(),
            kind: StepType::RepoSetup,
            label: format!("set up {} package source", repo.id),
            command: Some(command),
            args: vec![],
            shell: true,
            cwd: None,
            env_overrides: HashMap::new(),
            needs_sudo: true,
            timeout_sec: default_timeout_for(StepType::RepoSetup),
            depends_on: prev_ids.clone(),
            retry: Some(RetryPolicy {
                max: 2,
                backoff_ms: 2000,
            }),
            risk: Risk::Medium,
            estimated_time_sec: Some(15),
            artifacts: vec![repo.marker_file.clone()],
            stream: true,
            pm_lock: pm_lock_for(method),
            restart_hint: None,
            batchable: false,
        });
        prev_ids.push(id);
    }

    if method == Method::Source {
        let build = recipe
            .build_from_source
            .as_ref()
            .ok_or_else(|| InstallError::ToolchainMissing {
                missing: vec!["build_from_source recipe section".to_string()],
            })?;

        let source_id = step_id(node.tool_id, "source");
        steps.push(Step {
            id: source_id.clone(),
            kind: StepType::Source,
            label: format!("fetch source for {}", recipe.label),
            command: Some(format!("git clone {} .", build.git_repo)),
            args: vec![],
            shell: true,
            cwd: build.build_dir.clone(),
            env_overrides: HashMap::new(),
            needs_sudo: false,
            timeout_sec: default_timeout_for(StepType::Source),
            depends_on: prev_ids.clone(),
            retry: Some(RetryPolicy {
                max: 2,
                backoff_ms: 3000,
            }),
            risk: Risk::Low,
            estimated_time_sec: Some(30),
            artifacts: vec![],
            stream: true,
            pm_lock: None,
            restart_hint: None,
            batchable: false,
        });

        let build_id = step_id(node.tool_id, "build");
        let build_cmd = match build.build_system {
            BuildSystem::Autotools => format!("./configure {} && make", build.configure_args.join(" ")),
            BuildSystem::Cmake => format!("cmake {} . && cmake --build .", build.cmake_args.join(" ")),
            BuildSystem::CargoGit => "cargo build --release".to_string(),
        };
        steps.push(Step {
            id: build_id.clone(),
            kind: StepType::Build,
            label: format!("build {} from source", recipe.label),
            command: Some(build_cmd),
            args: vec![],
            shell: true,
            cwd: build.build_dir.clone(),
            env_overrides: HashMap::new(),
            needs_sudo: false,
            timeout_sec: default_timeout_for(StepType::Build),
            depends_on: vec![source_id],
            retry: None,
            risk: Risk::Medium,
            estimated_time_sec: Some(600),
            artifacts: vec![],
            stream: true,
            pm_lock: None,
            restart_hint: None,
            batchable: false,
        });

        let install_id = step_id(node.tool_id, "install");
        steps.push(Step {
            id: install_id.clone(),
            kind: StepType::Install,
            label: format!("install built {}", recipe.label),
            command: Some("make install".to_string()),
            args: vec![],
            shell: true,
            cwd: build.build_dir.clone(),
            env_overrides: HashMap::new(),
            needs_sudo: needs_sudo_for(recipe, method),
            timeout_sec: default_timeout_for(StepType::Install),
            depends_on: vec![build_id],
            retry: None,
            risk: Risk::Medium,
            estimated_time_sec: Some(30),
            artifacts: vec![],
            stream: true,
            pm_lock: None,
            restart_hint: None,
            batchable: false,
        });
        prev_ids = vec![install_id];
    } else {
        let install_cmd = recipe
            .install
            .get(&method)
            .map(|c| c.command.clone())
            .ok_or_else(|| InstallError::NoViableMethod {
                tool: node.tool_id.to_string(),
                reasons: vec![format!("no install command declared for {method:?}")],
            })?;
        let rendered = installer_template::render(&install_cmd, vars)
            .map_err(|e| InstallError::TemplateUnresolved {
                file: node.tool_id.to_string(),
                vars: match e {
                    installer_template::TemplateError::Unresolved { vars } => vars,
                },
            })?;

        let tool_id = step_id(node.tool_id, "tool");
        steps.push(Step {
            id: tool_id.clone(),
            kind: StepType::Tool,
            label: format!("install {}", recipe.label),
            command: Some(rendered),
            args: vec![],
            shell: true,
            cwd: None,
            env_overrides: HashMap::new(),
            needs_sudo: needs_sudo_for(recipe, method),
            timeout_sec: default_timeout_for(StepType::Tool),
            depends_on: prev_ids.clone(),
            retry: Some(RetryPolicy {
                max: 2,
                backoff_ms: 2000,
            }),
            risk: Risk::Low,
            estimated_time_sec: Some(120),
            artifacts: vec![],
            stream: true,
            pm_lock: pm_lock_for(method),
            restart_hint: None,
            batchable: method.is_system_pm(),
        });
        prev_ids = vec![tool_id];
    }

    for template in &recipe.config_templates {
        if let Some(cond) = &template.condition {
            if !installer_condition::evaluate(cond, profile_json) {
                continue;
            }
        }
        let id = step_id(node.tool_id, &format!("config::{}", template.id));
        steps.push(Step {
            id: id.clone(),
            kind: StepType::ConfigTemplate,
            label: format!("write config template {}", template.id),
            command: template.post_command.clone(),
            args: vec![],
            shell: true,
            cwd: None,
            env_overrides: HashMap::new(),
            needs_sudo: false,
            timeout_sec: default_timeout_for(StepType::ConfigTemplate),
            depends_on: prev_ids.clone(),
            retry: None,
            risk: Risk::Low,
            estimated_time_sec: Some(5),
            artifacts: vec![template.file.clone()],
            stream: false,
            pm_lock: None,
            restart_hint: None,
            batchable: false,
        });
        prev_ids.push(id);
    }

    if let Some(service) = &recipe.service {
        let init_kind = profile_json
            .get("init_system")
            .and_then(|i| i.get("type"))
            .and_then(|t| t.as_str())
            .unwrap_or("none");
        if init_kind != "none" {
            let id = step_id(node.tool_id, &format!("service::{}", service.name));
            let mut actions = Vec::new();
            if service.enable {
                actions.push(format!("systemctl enable {}", service.name));
            }
            if service.start {
                actions.push(format!("systemctl restart {}", service.name));
            }
            steps.push(Step {
                id: id.clone(),
                kind: StepType::Service,
                label: format!("enable and start {}", service.name),
                command: Some(actions.join(" && ")),
                args: vec![],
                shell: true,
                cwd: None,
                env_overrides: HashMap::new(),
                needs_sudo: true,
                timeout_sec: default_timeout_for(StepType::Service),
                depends_on: prev_ids.clone(),
                retry: None,
                risk: Risk::Medium,
                estimated_time_sec: Some(10),
                artifacts: vec![],
                stream: true,
                pm_lock: None,
                restart_hint: service.restart_kind,
                batchable: false,
            });
            prev_ids.push(id);
        }
    }

    for hook in &recipe.post_install {
        if let Some(cond) = &hook.condition {
            if !installer_condition::evaluate(cond, profile_json) {
                continue;
            }
        }
        let id = step_id(node.tool_id, &format!("post_install::{}", hook.id));
        steps.push(Step {
            id: id.clone(),
            kind: StepType::PostInstall,
            label: hook.description.clone(),
            command: Some(hook.command.clone()),
            args: vec![],
            shell: true,
            cwd: None,
            env_overrides: HashMap::new(),
            needs_sudo: false,
            timeout_sec: default_timeout_for(StepType::PostInstall),
            depends_on: prev_ids.clone(),
            retry: None,
            risk: Risk::Low,
            estimated_time_sec: Some(5),
            artifacts: vec![],
            stream: false,
            pm_lock: None,
            restart_hint: hook.modifies_path.then_some(RestartKind::Shell),
            batchable: false,
        });
        prev_ids.push(id);
    }

    for pack_id in &node.selected_data_packs {
        let Some(pack) = recipe.data_packs.iter().find(|p| &p.id == pack_id) else {
            continue;
        };
        let id = step_id(node.tool_id, &format!("datapack::{}", pack.id));
        steps.push(Step {
            id: id.clone(),
            kind: StepType::DataPack,
            label: format!("download {}", pack.label),
            command: Some(pack.command.clone()),
            args: vec![],
            shell: true,
            cwd: None,
            env_overrides: HashMap::new(),
            needs_sudo: false,
            timeout_sec: 7200,
            depends_on: prev_ids.clone(),
            retry: Some(RetryPolicy {
                max: 3,
                backoff_ms: 5000,
            }),
            risk: Risk::Low,
            estimated_time_sec: Some((pack.size_bytes / (5 * 1024 * 1024)) as u32 + 10),
            artifacts: vec![],
            stream: true,
            pm_lock: None,
            restart_hint: None,
            batchable: false,
        });
        prev_ids.push(id);
    }

    let verify_id = step_id(node.tool_id, "verify");
    let mut verify_args = recipe.cli_verify_args.clone();
    if verify_args.is_empty() {
        verify_args.push(recipe.verify.clone());
    }
    steps.push(Step {
        id: verify_id.clone(),
        kind: StepType::Verify,
        label: format!("verify {}", recipe.label),
        command: Some(recipe.verify.clone()),
        args: verify_args,
        shell: true,
        cwd: None,
        env_overrides: HashMap::new(),
        needs_sudo: false,
        timeout_sec: default_timeout_for(StepType::Verify),
        depends_on: prev_ids.clone(),
        retry: None,
        risk: Risk::Low,
        estimated_time_sec: Some(5),
        artifacts: vec![],
        stream: false,
        pm_lock: None,
        restart_hint: None,
        batchable: false,
    });

    if method == Method::Source {
        let cleanup_id = step_id(node.tool_id, "cleanup");
        steps.push(Step {
            id: cleanup_id,
            kind: StepType::Cleanup,
            label: format!("clean up {} build directory", recipe.label),
            command: Some("rm -rf .".to_string()),
            args: vec![],
            shell: true,
            cwd: recipe.build_from_source.as_ref().and_then(|b| b.build_dir.clone()),
            env_overrides: HashMap::new(),
            needs_sudo: false,
            timeout_sec: default_timeout_for(StepType::Cleanup),
            depends_on: vec![verify_id],
            retry: None,
            risk: Risk::Low,
            estimated_time_sec: Some(5),
            artifacts: vec![],
            stream: false,
            pm_lock: None,
            restart_hint: None,
            batchable: false,
        });
    }

    Ok(steps)
}

fn aggregate_risk(steps: &[Step]) -> Risk {
    steps.iter().map(|s| s.risk).max().unwrap_or(Risk::Low)
}

fn confirmation_gate_for(risk: Risk) -> ConfirmationGate {
    match risk {
        Risk::Low => ConfirmationGate::None,
        Risk::Medium => ConfirmationGate::Confirm,
        Risk::High => ConfirmationGate::TypeToConfirm,
    }
}

fn aggregate_restart(steps: &[Step], recipe_restarts: &[RestartKind]) -> RestartSummary {
    let mut summary = RestartSummary::default();
    for kind in recipe_restarts {
        match kind {
            RestartKind::Shell => {
                summary.shell_restart = true;
                summary.reasons.push("shell restart required to pick up new PATH entries".to_string());
            }
            RestartKind::Service => {
                summary.reasons.push("a system service needs restarting".to_string());
            }
            RestartKind::Reboot => {
                summary.reboot_required = true;
                summary.reasons.push("kernel module or driver change requires a reboot".to_string());
            }
        }
    }
    for step in steps {
        let Some(kind) = step.restart_hint else { continue };
        match kind {
            RestartKind::Shell => {
                summary.shell_restart = true;
                summary.reasons.push(format!("{} changed PATH or shell init; restart your shell", step.label));
            }
            RestartKind::Service => {
                let service = step.label.split_whitespace().last().unwrap_or(&step.label).to_string();
                if !summary.service_restart.contains(&service) {
                    summary.service_restart.push(service.clone());
                }
                summary.reasons.push(format!("{service} service should be restarted to pick up changes"));
            }
            RestartKind::Reboot => {
                summary.reboot_required = true;
                summary.reasons.push(format!("{} requires a reboot to take effect", step.label));
            }
        }
    }
    summary
}

/// Assembles the full `Plan` for `root_tool_id` given its dependency graph
/// (already topologically validated by `installer-deps`) and the method
/// chosen for each node. `profile` feeds both `config_template`/`service`
/// conditions and the per-PM `packages` batching (spec §4.6).
pub fn build_plan(
    root_tool_id: &str,
    registry: &RecipeRegistry,
    graph: &DependencyGraph,
    order: &[String],
    nodes: &HashMap<String, NodePlan<'_>>,
    vars: &HashMap<String, String>,
    profile: &SystemProfile,
    answers: ChoiceBinding,
    inputs: InputBinding,
) -> Result<Plan, InstallError> {
    let profile_json = serde_json::to_value(profile).unwrap_or(serde_json::Value::Null);
    let family = profile.distro.family.as_str();

    let mut all_steps: Vec<Step> = Vec::new();
    let mut node_verify_id: HashMap<String, String> = HashMap::new();

    // One batched `packages` step per run of consecutive same-PM nodes in
    // topological order (spec §4.6); each batch's step gates the first
    // step of every node it covers.
    let batches = installer_deps::batch_by_package_manager(order, |id| nodes.get(id).map(|n| n.method));
    let mut batch_entry_id: HashMap<String, String> = HashMap::new();
    for (batch_idx, (method, tool_ids)) in batches.iter().enumerate() {
        let Some(method) = method else { continue };
        let mut merged_packages: Vec<String> = Vec::new();
        for tool_id in tool_ids {
            if let Some(recipe) = registry.recipe_of(tool_id) {
                if let Some(pkgs) = recipe.requires.packages.get(family) {
                    for pkg in pkgs {
                        if !merged_packages.contains(pkg) {
                            merged_packages.push(pkg.clone());
                        }
                    }
                }
            }
        }
        let Some(command) = packages_command(*method, &merged_packages) else { continue };
        let id = format!("batch::packages::{batch_idx}");
        all_steps.push(Step {
            id: id.clone(),
            kind: StepType::Packages,
            label: format!("install system packages ({method:?}) for {}", tool_ids.join(", ")),
            command: Some(command),
            args: vec![],
            shell: true,
            cwd: None,
            env_overrides: HashMap::new(),
            needs_sudo: true,
            timeout_sec: default_timeout_for(StepType::Packages),
            depends_on: vec![],
            retry: Some(RetryPolicy {
                max: 2,
                backoff_ms: 2000,
            }),
            risk: Risk::Low,
            estimated_time_sec: Some(60),
            artifacts: vec![],
            stream: true,
            pm_lock: pm_lock_for(*method),
            restart_hint: None,
            batchable: true,
        });
        for tool_id in tool_ids {
            batch_entry_id.insert(tool_id.clone(), id.clone());
        }
    }

    for tool_id in order {
        let recipe = registry
            .recipe_of(tool_id)
            .ok_or_else(|| InstallError::UnknownTool { tool: tool_id.clone() })?;
        let node = nodes
            .get(tool_id)
            .ok_or_else(|| InstallError::UnknownTool { tool: tool_id.clone() })?;

        let mut steps = build_node_steps(recipe, node, vars, &profile_json)?;

        let dep_tool_ids = graph.edges.get(tool_id).cloned().unwrap_or_default();
        let mut gating_ids: Vec<String> = dep_tool_ids
            .iter()
            .filter_map(|d| node_verify_id.get(d))
            .cloned()
            .collect();
        if let Some(batch_id) = batch_entry_id.get(tool_id) {
            gating_ids.push(batch_id.clone());
        }
        if let Some(first) = steps.first_mut() {
            for dep in gating_ids {
                if !first.depends_on.contains(&dep) {
                    first.depends_on.push(dep);
                }
            }
        }

        node_verify_id.insert(tool_id.clone(), step_id(tool_id, "verify"));
        all_steps.extend(steps.drain(..));
    }

    let risk_summary = aggregate_risk(&all_steps);
    let root_recipe = registry
        .recipe_of(root_tool_id)
        .ok_or_else(|| InstallError::UnknownTool { tool: root_tool_id.to_string() })?;

    Ok(Plan {
        plan_id: uuid::Uuid::new_v4(),
        tool: root_tool_id.to_string(),
        created_at: Utc::now(),
        confirmation_gate: confirmation_gate_for(risk_summary),
        risk_escalation: (risk_summary == Risk::High)
            .then(|| "one or more steps require elevated, irreversible changes".to_string()),
        warning: None,
        restart: aggregate_restart(&all_steps, &root_recipe.restart),
        steps: all_steps,
        risk_summary,
        answers,
        inputs,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap as Map;

    fn simple_recipe(tool_id: &str) -> Recipe {
        let mut install = Map::new();
        install.insert(
            Method::Apt,
            InstallCommand {
                command: format!("apt-get install -y {tool_id}"),
                pip_index: None,
            },
        );
        Recipe {
            tool_id: tool_id.to_string(),
            label: tool_id.to_string(),
            category: "cli".into(),
            verify: format!("{tool_id} --version"),
            install,
            install_variants: Map::new(),
            requires: Requires::default(),
            needs_sudo: NeedsSudo::Uniform(true),
            choices: vec![],
            inputs: vec![],
            config_templates: vec![],
            repo_setup: vec![],
            service: None,
            post_install: vec![],
            data_packs: vec![],
            build_from_source: None,
            remove: None,
            arch_map: Map::new(),
            cli_verify_args: vec![],
            minimum_version: None,
            version_constraint: None,
            restart: vec![],
            method_priority: vec![],
            satisfies_self: false,
            satisfies: vec![],
        }
    }

    fn test_profile() -> SystemProfile {
        SystemProfile {
            system: "linux".into(),
            arch: "amd64".into(),
            distro: Distro {
                id: "debian".into(),
                family: "debian".into(),
                version: "12".into(),
                version_tuple: vec![12],
                codename: None,
            },
            package_manager: PackageManagerInfo {
                primary: "apt".into(),
                available: vec!["apt".into()],
                snap_available: false,
            },
            capabilities: Capabilities {
                has_sudo: true,
                passwordless_sudo: false,
                has_systemd: true,
                is_root: false,
                in_container: false,
                in_wsl: false,
            },
            libc: None,
            libraries: vec![],
            hardware: None,
            gpu: None,
            kernel: None,
            build_toolchain: None,
            init_system: Some(InitSystem {
                kind: InitSystemType::Systemd,
                can_enable: true,
            }),
            network: None,
            python: None,
        }
    }

    #[test]
    fn builds_tool_and_verify_steps() {
        let registry = RecipeRegistry::new(vec![simple_recipe("docker")]).unwrap();
        let graph = DependencyGraph {
            nodes: vec!["docker".to_string()],
            edges: Map::from([("docker".to_string(), vec![])]),
        };
        let mut nodes = HashMap::new();
        nodes.insert(
            "docker".to_string(),
            NodePlan {
                tool_id: "docker",
                method: Method::Apt,
                selected_data_packs: vec![],
            },
        );
        let plan = build_plan(
            "docker",
            &registry,
            &graph,
            &["docker".to_string()],
            &nodes,
            &HashMap::new(),
            &test_profile(),
            ChoiceBinding::new(),
            InputBinding::new(),
        )
        .unwrap();

        assert_eq!(plan.tool, "docker");
        assert!(plan.steps.iter().any(|s| s.kind == StepType::Tool));
        assert!(plan.steps.iter().any(|s| s.kind == StepType::Verify));
        assert_eq!(plan.confirmation_gate, ConfirmationGate::None);
    }

    #[test]
    fn cross_node_dependency_wires_verify_into_depends_on() {
        let registry = RecipeRegistry::new(vec![simple_recipe("cuda"), simple_recipe("pytorch")]).unwrap();
        let graph = DependencyGraph {
            nodes: vec!["cuda".to_string(), "pytorch".to_string()],
            edges: Map::from([
                ("cuda".to_string(), vec![]),
                ("pytorch".to_string(), vec!["cuda".to_string()]),
            ]),
        };
        let mut nodes = HashMap::new();
        nodes.insert(
            "cuda".to_string(),
            NodePlan {
                tool_id: "cuda",
                method: Method::Apt,
                selected_data_packs: vec![],
            },
        );
        nodes.insert(
            "pytorch".to_string(),
            NodePlan {
                tool_id: "pytorch",
                method: Method::Apt,
                selected_data_packs: vec![],
            },
        );
        let plan = build_plan(
            "pytorch",
            &registry,
            &graph,
            &["cuda".to_string(), "pytorch".to_string()],
            &nodes,
            &HashMap::new(),
            &test_profile(),
            ChoiceBinding::new(),
            InputBinding::new(),
        )
        .unwrap();

        let pytorch_tool_step = plan
            .steps
            .iter()
            .find(|s| s.id == "pytorch::tool")
            .unwrap();
        assert!(pytorch_tool_step.depends_on.contains(&"cuda::verify".to_string()));
    }

    #[test]
    fn batches_system_packages_across_sibling_nodes() {
        let mut cuda = simple_recipe("cuda");
        cuda.requires.packages.insert("debian".to_string(), vec!["nvidia-cuda-toolkit".to_string()]);
        let mut pytorch = simple_recipe("pytorch");
        pytorch.requires.packages.insert("debian".to_string(), vec!["python3-torch".to_string()]);
        let registry = RecipeRegistry::new(vec![cuda, pytorch]).unwrap();
        let graph = DependencyGraph {
            nodes: vec!["cuda".to_string(), "pytorch".to_string()],
            edges: Map::from([
                ("cuda".to_string(), vec![]),
                ("pytorch".to_string(), vec!["cuda".to_string()]),
            ]),
        };
        let mut nodes = HashMap::new();
        nodes.insert("cuda".to_string(), NodePlan { tool_id: "cuda", method: Method::Apt, selected_data_packs: vec![] });
        nodes.insert("pytorch".to_string(), NodePlan { tool_id: "pytorch", method: Method::Apt, selected_data_packs: vec![] });

        let plan = build_plan(
            "pytorch",
            &registry,
            &graph,
            &["cuda".to_string(), "pytorch".to_string()],
            &nodes,
            &HashMap::new(),
            &test_profile(),
            ChoiceBinding::new(),
            InputBinding::new(),
        )
        .unwrap();

        let batch_steps: Vec<_> = plan.steps.iter().filter(|s| s.kind == StepType::Packages).collect();
        assert_eq!(batch_steps.len(), 1);
        let batch = batch_steps[0];
        assert!(batch.command.as_ref().unwrap().contains("nvidia-cuda-toolkit"));
        assert!(batch.command.as_ref().unwrap().contains("python3-torch"));

        let cuda_tool_step = plan.steps.iter().find(|s| s.id == "cuda::tool").unwrap();
        assert!(cuda_tool_step.depends_on.contains(&batch.id));
    }

    #[test]
    fn emits_repo_setup_and_service_steps() {
        let mut recipe = simple_recipe("docker");
        recipe.repo_setup.push(RepoSetupSpec {
            id: "docker-ce".to_string(),
            key_command: Some("curl -fsSL https://download.docker.com/linux/debian/gpg | gpg --dearmor -o /etc/apt/keyrings/docker.gpg".to_string()),
            source_command: "echo 'deb [...] ...' > /etc/apt/sources.list.d/docker.list".to_string(),
            marker_file: "/etc/apt/sources.list.d/docker.list".to_string(),
            condition: None,
        });
        recipe.service = Some(ServiceSpec {
            name: "docker".to_string(),
            start: true,
            enable: true,
            restart_kind: Some(RestartKind::Service),
        });
        let registry = RecipeRegistry::new(vec![recipe]).unwrap();
        let graph = DependencyGraph {
            nodes: vec!["docker".to_string()],
            edges: Map::from([("docker".to_string(), vec![])]),
        };
        let mut nodes = HashMap::new();
        nodes.insert("docker".to_string(), NodePlan { tool_id: "docker", method: Method::Apt, selected_data_packs: vec![] });

        let plan = build_plan(
            "docker",
            &registry,
            &graph,
            &["docker".to_string()],
            &nodes,
            &HashMap::new(),
            &test_profile(),
            ChoiceBinding::new(),
            InputBinding::new(),
        )
        .unwrap();

        assert!(plan.steps.iter().any(|s| s.kind == StepType::RepoSetup));
        let service_step = plan.steps.iter().find(|s| s.kind == StepType::Service).unwrap();
        assert!(service_step.command.as_ref().unwrap().contains("systemctl enable docker"));
        assert_eq!(plan.restart.service_restart, vec!["docker".to_string()]);
    }

    #[test]
    fn post_install_hook_that_modifies_path_triggers_shell_restart_not_data_pack_kind() {
        let mut recipe = simple_recipe("rustup");
        recipe.post_install.push(PostInstallHook {
            id: "path-inject".to_string(),
            description: "add cargo bin dir to shell profile".to_string(),
            command: "echo 'export PATH=\"$HOME/.cargo/bin:$PATH\"' >> ~/.profile".to_string(),
            modifies_path: true,
            condition: None,
        });
        recipe.data_packs.push(DataPack {
            id: "ml-models".to_string(),
            label: "pretrained model weights".to_string(),
            size_bytes: 50 * 1024 * 1024,
            command: "curl -fsSL https://example.invalid/weights.bin -o weights.bin".to_string(),
            requires: vec![],
        });
        let registry = RecipeRegistry::new(vec![recipe]).unwrap();
        let graph = DependencyGraph {
            nodes: vec!["rustup".to_string()],
            edges: Map::from([("rustup".to_string(), vec![])]),
        };
        let mut nodes = HashMap::new();
        nodes.insert(
            "rustup".to_string(),
            NodePlan {
                tool_id: "rustup",
                method: Method::Apt,
                selected_data_packs: vec!["ml-models".to_string()],
            },
        );

        let plan = build_plan(
            "rustup",
            &registry,
            &graph,
            &["rustup".to_string()],
            &nodes,
            &HashMap::new(),
            &test_profile(),
            ChoiceBinding::new(),
            InputBinding::new(),
        )
        .unwrap();

        let hook_step = plan.steps.iter().find(|s| s.kind == StepType::PostInstall).unwrap();
        assert_eq!(hook_step.restart_hint, Some(RestartKind::Shell));
        assert!(plan.restart.shell_restart);

        let pack_step = plan.steps.iter().find(|s| s.kind == StepType::DataPack).unwrap();
        assert!(pack_step.command.as_ref().unwrap().contains("weights.bin"));
        assert!(!plan.steps.iter().any(|s| s.kind == StepType::PostInstall && s.command.as_deref() == pack_step.command.as_deref()));
    }

    #[test]
    fn recipe_level_restart_is_not_double_counted_with_step_hints() {
        let mut recipe = simple_recipe("nvidia-driver");
        recipe.restart.push(RestartKind::Reboot);
        let registry = RecipeRegistry::new(vec![recipe]).unwrap();
        let graph = DependencyGraph {
            nodes: vec!["nvidia-driver".to_string()],
            edges: Map::from([("nvidia-driver".to_string(), vec![])]),
        };
        let mut nodes = HashMap::new();
        nodes.insert(
            "nvidia-driver".to_string(),
            NodePlan { tool_id: "nvidia-driver", method: Method::Apt, selected_data_packs: vec![] },
        );

        let plan = build_plan(
            "nvidia-driver",
            &registry,
            &graph,
            &["nvidia-driver".to_string()],
            &nodes,
            &HashMap::new(),
            &test_profile(),
            ChoiceBinding::new(),
            InputBinding::new(),
        )
        .unwrap();

        assert!(plan.restart.reboot_required);
        assert_eq!(plan.restart.reasons.len(), 1);
    }
}
