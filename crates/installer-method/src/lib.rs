//! Method Selector (spec §2 component F, §4.5): picks the installation
//! method for a recipe on a given host, from a fixed preference ranking
//! that a recipe may override via `method_priority`.

use installer_core::types::{Method, Recipe, SystemProfile};

/// Default preference order when a recipe doesn't declare `method_priority`:
/// prefer the host's native package manager, then other system package
/// managers, then language package managers, then binary/curl-pipe
/// installs, with building from source last (it is the slowest and
/// riskiest path).
const DEFAULT_RANKING: &[Method] = &[
    Method::Apt,
    Method::Dnf,
    Method::Yum,
    Method::Apk,
    Method::Pacman,
    Method::Zypper,
    Method::Brew,
    Method::Snap,
    Method::Cargo,
    Method::Go,
    Method::Pip,
    Method::Npm,
    Method::Binary,
    Method::CurlPipe,
    Method::Source,
];

#[derive(Debug, Clone)]
pub struct Candidate {
    pub method: Method,
    pub available: bool,
    pub reason: Option<String>,
}

/// Returns `Err(reason)` describing why `method` isn't viable on `profile`,
/// or `Ok(())` if it is.
fn availability_reason(method: Method, profile: &SystemProfile) -> Result<(), String> {
    match method {
        Method::Apt | Method::Dnf | Method::Yum | Method::Apk | Method::Pacman | Method::Zypper => {
            let pm_name = pm_binary_name(method);
            if profile.package_manager.available.iter().any(|p| p == pm_name) {
                Ok(())
            } else {
                Err(format!("{pm_name} is not available on this host"))
            }
        }
        Method::Brew => {
            if profile.package_manager.available.iter().any(|p| p == "brew") {
                Ok(())
            } else {
                Err("Homebrew is not installed".to_string())
            }
        }
        Method::Snap => {
            if profile.capabilities.has_systemd || profile.package_manager.snap_available {
                Ok(())
            } else {
                Err("snapd is not available on this host".to_string())
            }
        }
        Method::Pip => {
            if profile.python.is_some() {
                Ok(())
            } else {
                Err("python/pip is not available on this host".to_string())
            }
        }
        // npm's presence is environment-probed upstream (outside SystemProfile's
        // scope); assume available and let the execution engine surface a
        // runtime `exit_nonzero` if it isn't.
        Method::Npm => Ok(()),
        Method::Cargo => match &profile.build_toolchain {
            Some(t) if t.cargo.is_some() => Ok(()),
            _ => Err("cargo is not available on this host".to_string()),
        },
        Method::Go => match &profile.build_toolchain {
            Some(t) if t.go.is_some() => Ok(()),
            _ => Err("go is not available on this host".to_string()),
        },
        Method::Binary | Method::CurlPipe => Ok(()),
        Method::Source => match &profile.build_toolchain {
            Some(t) if t.cc.is_some() || t.cmake.is_some() => Ok(()),
            _ => Err("no build toolchain available for building from source".to_string()),
        },
        Method::Default => Ok(()),
    }
}

fn pm_binary_name(method: Method) -> &'static str {
    match method {
        Method::Apt => "apt",
        Method::Dnf => "dnf",
        Method::Yum => "yum",
        Method::Apk => "apk",
        Method::Pacman => "pacman",
        Method::Zypper => "zypper",
        _ => "",
    }
}

fn candidate_methods(recipe: &Recipe) -> Vec<Method> {
    let mut methods: Vec<Method> = recipe.install.keys().copied().collect();
    for variant in recipe.install_variants.values() {
        if let Some(m) = variant.method {
            if !methods.contains(&m) {
                methods.push(m);
            }
        }
    }
    if recipe.build_from_source.is_some() && !methods.contains(&Method::Source) {
        methods.push(Method::Source);
    }
    methods
}

fn rank_index(method: Method, priority: &[Method]) -> usize {
    if let Some(idx) = priority.iter().position(|m| *m == method) {
        return idx;
    }
    DEFAULT_RANKING
        .iter()
        .position(|m| *m == method)
        .unwrap_or(DEFAULT_RANKING.len())
}

/// Enumerates every declared method with its availability verdict, ordered
/// by preference (recipe override, else the default ranking).
pub fn candidates(recipe: &Recipe, profile: &SystemProfile) -> Vec<Candidate> {
    let mut methods = candidate_methods(recipe);
    let priority = &recipe.method_priority;
    methods.sort_by_key(|m| rank_index(*m, priority));

    methods
        .into_iter()
        .map(|method| match availability_reason(method, profile) {
            Ok(()) => Candidate {
                method,
                available: true,
                reason: None,
            },
            Err(reason) => Candidate {
                method,
                available: false,
                reason: Some(reason),
            },
        })
        .collect()
}

/// Selects the highest-ranked available method, or all disqualification
/// reasons if none is viable (spec §4.5: `no_viable_method`).
pub fn select(recipe: &Recipe, profile: &SystemProfile) -> Result<Method, Vec<String>> {
    let candidates = candidates(recipe, profile);
    if let Some(chosen) = candidates.iter().find(|c| c.available) {
        return Ok(chosen.method);
    }
    Err(candidates
        .into_iter()
        .map(|c| format!("{:?}: {}", c.method, c.reason.unwrap_or_default()))
        .collect())
}
