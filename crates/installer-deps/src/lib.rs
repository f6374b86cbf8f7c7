//! Dependency Resolver (spec §2 component G, §4.6): expands a recipe's
//! `requires.binaries` into a full dependency closure over the recipe
//! registry, detects cycles, and produces both a topological order and a
//! per-package-manager batching hint for the Plan Builder.
//!
//! Resolution of a required binary name to a graph node is three-tiered
//! (spec §9): (1) an exact recipe `tool_id` match, (2) a recipe whose
//! `satisfies` list names the binary, (3) no recipe covers it, in which
//! case it is assumed to be satisfied by the dependent recipe's own
//! `requires.packages` system-package list and never becomes a graph node.

use std::collections::{HashMap, HashSet};

use installer_core::{InstallError, RecipeRegistry};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependencyGraph {
    /// Topologically-irrelevant node set; `root` is always present.
    pub nodes: Vec<String>,
    /// `tool_id -> [tool_ids it requires]`, edges point from dependent to
    /// dependency.
    pub edges: HashMap<String, Vec<String>>,
}

/// Resolves one `requires.binaries` entry to a graph node, or `None` if it
/// falls through to tier 3 (satisfied by system packages, no new node).
fn resolve_binary<'a>(binary: &str, registry: &'a RecipeRegistry) -> Option<&'a str> {
    if let Some(recipe) = registry.recipe_of(binary) {
        return Some(&recipe.tool_id);
    }
    registry
        .iter()
        .find(|r| r.satisfies.iter().any(|s| s == binary))
        .map(|r| r.tool_id.as_str())
}

/// Builds the full dependency closure reachable from `root` via recursive
/// expansion of `requires.binaries` (spec §4.6).
pub fn build_closure(root: &str, registry: &RecipeRegistry) -> Result<DependencyGraph, InstallError> {
    let mut nodes = Vec::new();
    let mut edges: HashMap<String, Vec<String>> = HashMap::new();
    let mut visited = HashSet::new();
    let mut stack = vec![root.to_string()];

    while let Some(tool_id) = stack.pop() {
        if !visited.insert(tool_id.clone()) {
            continue;
        }
        let recipe = registry
            .recipe_of(&tool_id)
            .ok_or_else(|| InstallError::UnknownTool { tool: tool_id.clone() })?;
        nodes.push(tool_id.clone());

        let mut deps = Vec::new();
        for binary in &recipe.requires.binaries {
            let Some(dep_id) = resolve_binary(binary, registry) else {
                continue;
            };
            if dep_id == tool_id && !recipe.satisfies_self {
                return Err(InstallError::DependencyCycle {
                    cycle: vec![tool_id.clone()],
                });
            }
            if dep_id == tool_id && recipe.satisfies_self {
                continue;
            }
            deps.push(dep_id.to_string());
            if !visited.contains(dep_id) {
                stack.push(dep_id.to_string());
            }
        }
        edges.insert(tool_id, deps);
    }

    Ok(DependencyGraph { nodes, edges })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mark {
    Visiting,
    Done,
}

/// Iterative DFS cycle detection (spec §9: recursion depth must not track
/// the dependency graph's depth). Returns the first cycle found, expressed
/// as the ordered path from the start of the cycle back to itself.
pub fn find_cycle(graph: &DependencyGraph) -> Option<Vec<String>> {
    let mut marks: HashMap<&str, Mark> = HashMap::new();
    let mut path: Vec<String> = Vec::new();
    let empty: Vec<String> = Vec::new();

    for start in &graph.nodes {
        if marks.contains_key(start.as_str()) {
            continue;
        }
        // (node, next edge index to visit)
        let mut stack: Vec<(&str, usize)> = vec![(start.as_str(), 0)];
        marks.insert(start, Mark::Visiting);
        path.push(start.clone());

        while let Some((node, idx)) = stack.pop() {
            let deps = graph.edges.get(node).unwrap_or(&empty);
            if idx < deps.len() {
                let next = deps[idx].as_str();
                stack.push((node, idx + 1));
                match marks.get(next) {
                    Some(Mark::Visiting) => {
                        let cycle_start = path.iter().position(|n| n == next).unwrap_or(0);
                        let mut cycle: Vec<String> = path[cycle_start..].to_vec();
                        cycle.push(next.to_string());
                        return Some(cycle);
                    }
                    Some(Mark::Done) => {}
                    None => {
                        marks.insert(next, Mark::Visiting);
                        path.push(next.to_string());
                        stack.push((next, 0));
                    }
                }
            } else {
                marks.insert(node, Mark::Done);
                path.pop();
            }
        }
    }
    None
}

/// Kahn's-algorithm topological sort, dependencies before dependents.
/// Assumes the graph is acyclic; call `find_cycle` first.
pub fn topological_order(graph: &DependencyGraph) -> Vec<String> {
    // An edge `tool -> dep` means "tool depends on dep", i.e. dep must run
    // first, so in-degree here counts each node's unresolved dependencies.
    let mut in_degree: HashMap<&str, usize> = graph.nodes.iter().map(|n| (n.as_str(), 0)).collect();
    for node in &graph.nodes {
        let count = graph.edges.get(node).map(|d| d.len()).unwrap_or(0);
        in_degree.insert(node.as_str(), count);
    }

    let mut ready: Vec<String> = graph
        .nodes
        .iter()
        .filter(|n| in_degree.get(n.as_str()).copied().unwrap_or(0) == 0)
        .cloned()
        .collect();
    ready.sort();

    let mut order = Vec::with_capacity(graph.nodes.len());
    let mut queue = ready;

    while let Some(node) = queue.pop() {
        order.push(node.clone());
        let mut newly_ready = Vec::new();
        for (candidate, deps) in &graph.edges {
            if order.contains(candidate) || queue.contains(candidate) {
                continue;
            }
            if deps.contains(&node) {
                let remaining = deps.iter().filter(|d| !order.contains(*d)).count();
                if remaining == 0 {
                    newly_ready.push(candidate.clone());
                }
            }
        }
        newly_ready.sort();
        queue.extend(newly_ready);
    }

    order
}

/// Groups tool_ids by the system package manager their chosen method uses,
/// so the Plan Builder can emit one batched `packages` step per PM instead
/// of N sequential single-package steps (spec §4.6).
pub fn batch_by_package_manager(
    order: &[String],
    method_of: impl Fn(&str) -> Option<installer_core::types::Method>,
) -> Vec<(Option<installer_core::types::Method>, Vec<String>)> {
    let mut batches: Vec<(Option<installer_core::types::Method>, Vec<String>)> = Vec::new();
    for tool_id in order {
        let method = method_of(tool_id).filter(|m| m.is_system_pm());
        match batches.last_mut() {
            Some((last_method, ids)) if *last_method == method && method.is_some() => {
                ids.push(tool_id.clone());
            }
            _ => batches.push((method, vec![tool_id.clone()])),
        }
    }
    batches
}
