// src/core/resolve.rs

use std::collections::BTreeMap;

use thiserror::Error;

use crate::constants::PATH_ENV;
use crate::core::aliases;
use crate::core::environment::{self, ComposeError, EnvSource};
use crate::core::loader::Forests;
use crate::core::platform::{self, Platform};
use crate::core::reducer::{self, ReduceError};
use crate::core::site::Site;
use crate::core::solver::{Solver, SolvedDistro, SolverError};
use crate::core::uri::{self, Uri, UriError};
use crate::models::FlatConfig;

#[derive(Error, Debug)]
pub enum ResolveError {
    #[error(transparent)]
    Uri(#[from] UriError),
    #[error(transparent)]
    Reduce(#[from] ReduceError),
    #[error(transparent)]
    Solver(#[from] SolverError),
    #[error(transparent)]
    Compose(#[from] ComposeError),
}

type ResolveResult<T> = Result<T, ResolveError>;

/// Runs the full pipeline for one URI: resolve, reduce, solve, then compose
/// the environment and aliases for every supported platform.
///
/// `forced` holds extra requirement strings from the command line (`-r`),
/// appended after the flattened config's own. `verbosity` is the active
/// verbosity level: aliases gated behind a higher `min_verbosity` are
/// dropped from the composed result.
pub fn resolve_flat(
    site: &Site,
    forests: &Forests,
    raw_uri: &str,
    forced: &[String],
    verbosity: u8,
) -> ResolveResult<FlatConfig> {
    let parsed: Uri = raw_uri.parse()?;
    let hit = uri::resolve(&forests.configs, &parsed)?;
    let mut flat = reducer::reduce(&forests.configs, &hit)?;

    let mut requirements = flat.distros.clone();
    requirements.extend(forced.iter().cloned());

    // Names stubbed by the flattened config satisfy requirements without
    // contributing anything; the table's own `unset` key opts back out.
    let stubs: Vec<String> = flat
        .stub_distros
        .set
        .iter()
        .filter(|name| !flat.stub_distros.unset.contains(name))
        .cloned()
        .collect();
    let solver = Solver::new(
        &forests.distros,
        platform::current(),
        site.prereleases,
        &stubs,
    );
    let solved = solver.solve(&requirements)?;
    flat.distro_versions = solved
        .iter()
        .map(|s| (s.name.clone(), s.version.clone()))
        .collect();

    let config_root = flat.relative_root().to_path_buf();
    let current_name = platform::current().name();

    for target in platforms_for(site) {
        let composed = compose_for_platform(&flat, &solved, target)?;
        let mut composed_aliases =
            aliases::compose(target, &solved, &flat.alias_mods, &config_root);
        aliases::filter_by_verbosity(
            &mut composed_aliases,
            &flat.min_verbosity,
            "hab",
            i32::from(verbosity),
        );

        if target.name() == current_name {
            flat.environment = composed.clone();
            flat.aliases = composed_aliases.clone();
        }
        flat.environments
            .insert(target.name().to_string(), composed);
        flat.aliases_per_platform
            .insert(target.name().to_string(), composed_aliases);
    }

    Ok(flat)
}

/// The platforms to compose for: the site's list, plus the platform hab is
/// actually running on.
fn platforms_for(site: &Site) -> Vec<&'static dyn Platform> {
    let mut targets: Vec<&'static dyn Platform> = site
        .platforms
        .iter()
        .filter_map(|name| platform::from_name(name))
        .collect();
    let current = platform::current();
    if !site.supports_platform(current.name()) {
        targets.push(current);
    }
    targets
}

fn compose_for_platform(
    flat: &FlatConfig,
    solved: &[SolvedDistro<'_>],
    target: &dyn Platform,
) -> Result<BTreeMap<String, String>, ComposeError> {
    let mut sources = Vec::new();
    if let Some(environment) = &flat.environment_ops {
        sources.push(EnvSource {
            origin: flat.uri_matched.clone(),
            environment,
            relative_root: flat.relative_root(),
        });
    }
    for distro in solved {
        if let Some(environment) = &distro.node.environment {
            sources.push(EnvSource {
                origin: format!("{}=={}", distro.name, distro.version),
                environment,
                relative_root: distro.node.relative_root(),
            });
        }
    }

    // Only the live platform knows its real PATH; foreign platforms get a
    // shell reference the target host expands itself.
    let inherited_path = if target.name() == platform::current().name() {
        std::env::var(PATH_ENV).ok()
    } else {
        None
    };
    environment::compose(&sources, target, &flat.variables, inherited_path.as_deref())
}

/// Formats a resolve failure the way the CLI reports it, and the way
/// `dump --type all-uris` lists broken URIs.
pub fn error_line(uri: &str, err: &ResolveError) -> String {
    format!("Error resolving {}: {}", uri, err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::loader::DistroForest;
    use crate::models::{ConfigNode, DistroNode};
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;

    fn config(raw: serde_json::Value) -> (String, ConfigNode) {
        let node: ConfigNode = serde_json::from_value(raw).unwrap();
        (node.uri(), node)
    }

    fn distro(raw: serde_json::Value) -> DistroNode {
        let mut node: DistroNode = serde_json::from_value(raw).unwrap();
        let version = node.version.clone().unwrap();
        node.resolved_version = Some(version.parse().unwrap());
        node
    }

    fn forests(configs: Vec<serde_json::Value>, distros: Vec<serde_json::Value>) -> Forests {
        let configs: HashMap<String, ConfigNode> =
            configs.into_iter().map(config).collect();
        let mut forest = DistroForest::new();
        for raw in distros {
            let node = distro(raw);
            forest
                .entry(node.name.clone())
                .or_default()
                .insert(node.resolved_version.clone().unwrap(), node);
        }
        Forests {
            configs,
            distros: forest,
        }
    }

    fn test_site() -> Site {
        Site {
            platforms: vec!["windows".to_string(), "linux".to_string(), "osx".to_string()],
            ..Site::default()
        }
    }

    #[test]
    fn test_end_to_end_solve_and_compose() {
        let forests = forests(
            vec![serde_json::json!({
                "name": "aliased", "context": ["app"],
                "distros": ["aliased"]
            })],
            vec![serde_json::json!({
                "name": "aliased", "version": "2.0",
                "environment": {"set": {"ALIASED_GLOBAL_A": "Global A"}},
                "aliases": {"linux": [[
                    "as_dict",
                    {"cmd": "python", "environment": {"prepend": {"ALIASED_GLOBAL_A": "Local A Prepend"}}}
                ]]}
            })],
        );
        let flat = resolve_flat(&test_site(), &forests, "app/aliased", &[], 0).unwrap();

        assert_eq!(flat.uri_requested, "app/aliased");
        assert_eq!(flat.uri_matched, "app/aliased");
        let versions: Vec<(String, String)> = flat
            .distro_versions
            .iter()
            .map(|(n, v)| (n.clone(), v.to_string()))
            .collect();
        assert_eq!(versions, vec![("aliased".to_string(), "2.0".to_string())]);
        assert_eq!(flat.environments["linux"]["ALIASED_GLOBAL_A"], "Global A");
        assert!(flat.aliases_per_platform["linux"].contains_key("as_dict"));
        // No aliases were declared for windows.
        assert!(flat.aliases_per_platform["windows"].is_empty());
    }

    #[test]
    fn test_child_uri_adds_second_distro() {
        let forests = forests(
            vec![
                serde_json::json!({
                    "name": "aliased", "context": ["app"],
                    "distros": ["aliased"]
                }),
                serde_json::json!({
                    "name": "mod", "context": ["app", "aliased"],
                    "distros": ["aliased", "aliased_mod"]
                }),
            ],
            vec![
                serde_json::json!({"name": "aliased", "version": "2.0"}),
                serde_json::json!({"name": "aliased_mod", "version": "1.0"}),
            ],
        );
        let flat = resolve_flat(&test_site(), &forests, "app/aliased", &[], 0).unwrap();
        let versions: Vec<(String, String)> = flat
            .distro_versions
            .iter()
            .map(|(n, v)| (n.clone(), v.to_string()))
            .collect();
        assert_eq!(versions, vec![("aliased".to_string(), "2.0".to_string())]);

        let flat = resolve_flat(&test_site(), &forests, "app/aliased/mod", &[], 0).unwrap();
        let versions: Vec<(String, String)> = flat
            .distro_versions
            .iter()
            .map(|(n, v)| (n.clone(), v.to_string()))
            .collect();
        assert_eq!(
            versions,
            vec![
                ("aliased".to_string(), "2.0".to_string()),
                ("aliased_mod".to_string(), "1.0".to_string()),
            ]
        );
    }

    #[test]
    fn test_forced_requirements_extend_config() {
        let forests = forests(
            vec![serde_json::json!({"name": "app", "distros": ["base"]})],
            vec![
                serde_json::json!({"name": "base", "version": "1.0"}),
                serde_json::json!({"name": "extra", "version": "0.3"}),
            ],
        );
        let flat = resolve_flat(
            &test_site(),
            &forests,
            "app",
            &["extra".to_string()],
            0,
        )
        .unwrap();
        let names: Vec<&str> = flat
            .distro_versions
            .iter()
            .map(|(n, _)| n.as_str())
            .collect();
        assert_eq!(names, vec!["base", "extra"]);
    }

    #[test]
    fn test_stub_distros_satisfy_missing_requirement() {
        let forests = forests(
            vec![serde_json::json!({
                "name": "app", "distros": ["real", "ghost"],
                "stub_distros": {"set": ["ghost"]}
            })],
            vec![serde_json::json!({"name": "real", "version": "1.0"})],
        );
        let flat = resolve_flat(&test_site(), &forests, "app", &[], 0).unwrap();
        let names: Vec<&str> = flat
            .distro_versions
            .iter()
            .map(|(n, _)| n.as_str())
            .collect();
        assert_eq!(names, vec!["real"]);
    }

    #[test]
    fn test_verbosity_gates_composed_aliases() {
        let forests = forests(
            vec![serde_json::json!({"name": "app", "distros": ["tool"]})],
            vec![serde_json::json!({
                "name": "tool", "version": "1.0",
                "aliases": {"linux": [
                    ["tool", "tool"],
                    ["tool-debug", {"cmd": "tool", "min_verbosity": {"hab": 2}}]
                ]}
            })],
        );

        let flat = resolve_flat(&test_site(), &forests, "app", &[], 0).unwrap();
        let linux = &flat.aliases_per_platform["linux"];
        assert!(linux.contains_key("tool"));
        assert!(!linux.contains_key("tool-debug"));

        let flat = resolve_flat(&test_site(), &forests, "app", &[], 2).unwrap();
        assert!(flat.aliases_per_platform["linux"].contains_key("tool-debug"));
    }

    #[test]
    fn test_config_min_verbosity_hides_plain_aliases() {
        let forests = forests(
            vec![serde_json::json!({
                "name": "app", "distros": ["tool"],
                "min_verbosity": {"hab": 1}
            })],
            vec![serde_json::json!({
                "name": "tool", "version": "1.0",
                "aliases": {"linux": [["tool", "tool"]]}
            })],
        );

        let flat = resolve_flat(&test_site(), &forests, "app", &[], 0).unwrap();
        assert!(flat.aliases_per_platform["linux"].is_empty());

        let flat = resolve_flat(&test_site(), &forests, "app", &[], 1).unwrap();
        assert!(flat.aliases_per_platform["linux"].contains_key("tool"));
    }

    #[test]
    fn test_error_line_format() {
        let forests = forests(
            vec![serde_json::json!({
                "name": "app",
                "environment": {"set": {"HAB_URI": "x"}}
            })],
            vec![],
        );
        let err = resolve_flat(&test_site(), &forests, "app", &[], 0).unwrap_err();
        assert_eq!(
            error_line("app", &err),
            "Error resolving app: \"HAB_URI\" is a reserved environment variable"
        );
    }
}
