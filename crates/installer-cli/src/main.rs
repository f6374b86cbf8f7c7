//! Manual-testing harness over the install planner/executor library
//! crates. Not a product CLI: no interactive prompts, no colored output
//! (spec §1 scope). Exercises `resolve`/`execute`/`list-pending`/`archive`
//! against a JSON recipe registry and a JSON `SystemProfile` fixture.

use std::collections::HashMap;
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use installer_core::types::*;
use installer_core::RecipeRegistry;

#[derive(Parser)]
#[command(name = "installer-cli", about = "Install planner/executor manual test harness")]
struct Cli {
    /// Path to a JSON array of recipes.
    #[arg(long, default_value = "recipes.json")]
    recipes: PathBuf,
    /// Path to a JSON `SystemProfile` fixture.
    #[arg(long, default_value = "profile.json")]
    profile: PathBuf,
    /// Directory state is persisted under. Defaults to the platform state
    /// directory for `dev.installer-cli` (e.g. `~/.local/state/installer-cli`
    /// on Linux) when unset.
    #[arg(long)]
    state_dir: Option<PathBuf>,

    /// Directory rotating log files are written to, in addition to stderr.
    #[arg(long)]
    log_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Resolve a tool into a plan, or report already_installed/error.
    Resolve { tool: String },
    /// Execute a previously resolved (or freshly resolved) plan.
    Execute { tool: String },
    /// Resume the persisted state for a tool.
    Resume { tool: String },
    /// List tools with pending (non-archived) state.
    ListPending,
    /// Archive a tool's persisted state.
    Archive { tool: String },
}

fn load_registry(path: &PathBuf) -> anyhow::Result<RecipeRegistry> {
    let raw = std::fs::read_to_string(path)?;
    let recipes: Vec<Recipe> = serde_json::from_str(&raw)?;
    RecipeRegistry::new(recipes).map_err(|e| anyhow::anyhow!(e))
}

fn load_profile(path: &PathBuf) -> anyhow::Result<SystemProfile> {
    let raw = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&raw)?)
}

/// Runs `recipe.verify` on the host and, on a zero exit, returns the best
/// guess at an installed version string (spec §3 data flow: `resolve` may
/// short-circuit to `already_installed` before touching the dependency
/// resolver).
fn already_installed_version(recipe: &Recipe) -> Option<String> {
    let output = std::process::Command::new("sh").arg("-c").arg(&recipe.verify).output().ok()?;
    if !output.status.success() {
        return None;
    }
    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    Some(first_version_token(&stdout).or_else(|| first_version_token(&stderr)).unwrap_or_default())
}

fn first_version_token(text: &str) -> Option<String> {
    text.split_whitespace()
        .find(|tok| tok.trim_start_matches('v').chars().next().is_some_and(|c| c.is_ascii_digit()))
        .map(|tok| tok.trim_start_matches('v').trim_end_matches([',', ')']).to_string())
}

fn resolve(
    tool_id: &str,
    registry: &RecipeRegistry,
    profile: &SystemProfile,
) -> Result<Plan, PlanResponse> {
    if !registry.contains(tool_id) {
        return Err(PlanResponse::Error {
            error_kind: "unknown_tool".to_string(),
            message: format!("unknown tool: {tool_id}"),
            details: None,
        });
    }

    let root_recipe = registry.recipe_of(tool_id).expect("contains() checked above");
    if let Some(installed) = already_installed_version(root_recipe) {
        let meets_floor = root_recipe
            .minimum_version
            .as_ref()
            .map(|min| installer_condition::version::gte(&installed, min))
            .unwrap_or(true);
        if meets_floor {
            return Err(PlanResponse::AlreadyInstalled {
                version_installed: (!installed.is_empty()).then_some(installed),
            });
        }
    }

    let graph = installer_deps::build_closure(tool_id, registry).map_err(to_error_response)?;
    if let Some(cycle) = installer_deps::find_cycle(&graph) {
        return Err(PlanResponse::Error {
            error_kind: "dependency_cycle".to_string(),
            message: format!("dependency cycle: {cycle:?}"),
            details: None,
        });
    }
    let order = installer_deps::topological_order(&graph);

    let mut methods = HashMap::new();
    for id in &order {
        let recipe = registry.recipe_of(id).expect("graph node exists in registry");
        let method = installer_method::select(recipe, profile).map_err(|reasons| {
            PlanResponse::Error {
                error_kind: "no_viable_method".to_string(),
                message: format!("no viable method for {id}: {reasons:?}"),
                details: serde_json::to_value(&reasons).ok(),
            }
        })?;
        methods.insert(id.clone(), method);
    }

    let nodes: HashMap<String, installer_plan::NodePlan> = order
        .iter()
        .map(|id| {
            (
                id.clone(),
                installer_plan::NodePlan {
                    tool_id: id.as_str(),
                    method: methods[id],
                    selected_data_packs: vec![],
                },
            )
        })
        .collect();

    let root_method = methods[tool_id];
    let pip_index = root_recipe.install.get(&root_method).and_then(|c| c.pip_index.as_deref());
    let home_dir = std::env::var("HOME").unwrap_or_else(|_| "/root".to_string());
    let vars = installer_template::builtin_vars(
        tool_id,
        profile,
        &home_dir,
        pip_index,
        root_recipe.minimum_version.as_deref(),
    );

    installer_plan::build_plan(
        tool_id,
        registry,
        &graph,
        &order,
        &nodes,
        &vars,
        profile,
        ChoiceBinding::new(),
        InputBinding::new(),
    )
    .map_err(to_error_response)
}

fn to_error_response(err: installer_core::InstallError) -> PlanResponse {
    PlanResponse::Error {
        error_kind: err.kind().to_string(),
        message: err.to_string(),
        details: None,
    }
}

fn default_state_dir() -> PathBuf {
    directories::ProjectDirs::from("dev", "installer-cli", "installer-cli")
        .map(|dirs| dirs.data_local_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from(".state"))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let _log_guard = match &cli.log_dir {
        Some(dir) => {
            let file_appender = tracing_appender::rolling::daily(dir, "installer-cli.log");
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
            tracing_subscriber::fmt()
                .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
                .with_writer(non_blocking)
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::fmt()
                .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
                .init();
            None
        }
    };

    let state_dir = cli.state_dir.clone().unwrap_or_else(default_state_dir);
    let store = installer_state::StateStore::new(&state_dir);

    match cli.command {
        Command::Resolve { tool } => {
            let registry = load_registry(&cli.recipes)?;
            let profile = load_profile(&cli.profile)?;
            let response = match resolve(&tool, &registry, &profile) {
                Ok(plan) => PlanResponse::Plan { plan },
                Err(response) => response,
            };
            println!("{}", serde_json::to_string_pretty(&response)?);
        }
        Command::Execute { tool } => {
            let registry = load_registry(&cli.recipes)?;
            let profile = load_profile(&cli.profile)?;
            let plan = match resolve(&tool, &registry, &profile) {
                Ok(plan) => plan,
                Err(response) => {
                    println!("{}", serde_json::to_string_pretty(&response)?);
                    return Ok(());
                }
            };
            let state = PlanState::new_queued(plan);
            let engine = installer_exec::Engine::new(installer_exec::EngineConfig::default());
            let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
            let printer = tokio::spawn(async move {
                while let Some(event) = rx.recv().await {
                    tracing::info!(?event, "execution event");
                }
            });
            let persist = |state: &PlanState| {
                if let Err(err) = store.save(state) {
                    tracing::warn!(%err, "failed to persist plan state transition");
                }
            };
            let final_state = engine
                .execute(state, tx, installer_exec::CancelToken::new(), Some(&persist))
                .await;
            drop(printer);
            store.save(&final_state)?;
            println!("{}", serde_json::to_string_pretty(&final_state)?);
        }
        Command::Resume { tool } => match store.load(&tool)? {
            Some(state) => println!("{}", serde_json::to_string_pretty(&state)?),
            None => println!("no pending state for {tool}"),
        },
        Command::ListPending => {
            for tool in store.list_pending()? {
                println!("{tool}");
            }
        }
        Command::Archive { tool } => {
            let path = store.archive(&tool, chrono::Utc::now())?;
            println!("archived to {}", path.display());
        }
    }

    Ok(())
}
