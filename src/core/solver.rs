// src/core/solver.rs

use std::collections::{HashMap, HashSet, VecDeque};

use pep440_rs::Version;
use pep508_rs::{MarkerEnvironment, Requirement, VersionOrUrl};
use thiserror::Error;

use crate::core::loader::DistroForest;
use crate::core::platform::Platform;
use crate::models::DistroNode;

// Upper bound on processed requirements. Real forests stay far below this;
// it only exists to turn a pathological re-pick cycle into an error.
const MAX_REQUIREMENTS: usize = 10_000;

#[derive(Error, Debug)]
pub enum SolverError {
    #[error("\"{requirement}\" is not a valid requirement: {message}")]
    InvalidRequirement {
        requirement: String,
        message: String,
    },
    #[error("Unable to find a distro named '{0}'. It is not stubbed and no versions are loaded.")]
    UnknownDistro(String),
    #[error(
        "Unable to find a version of '{name}' satisfying '{specifiers}'. Available versions: {available}."
    )]
    NoMatchingVersion {
        name: String,
        specifiers: String,
        available: String,
    },
    #[error("Requirement processing exceeded {MAX_REQUIREMENTS} steps; aborting a re-pick cycle.")]
    RequirementCycle,
}

type SolverResult<T> = Result<T, SolverError>;

/// One selected distro, in solve order.
#[derive(Debug, Clone)]
pub struct SolvedDistro<'a> {
    pub name: String,
    pub version: Version,
    pub node: &'a DistroNode,
}

/// Picks the newest acceptable version of every required distro,
/// recursively, with deterministic breadth-first ordering.
pub struct Solver<'a> {
    distros: &'a DistroForest,
    marker_env: MarkerEnvironment,
    prereleases: bool,
    stubs: HashSet<String>,
}

impl<'a> Solver<'a> {
    pub fn new(
        distros: &'a DistroForest,
        platform: &dyn Platform,
        prereleases: bool,
        stubs: &[String],
    ) -> Self {
        Self {
            distros,
            marker_env: platform.marker_environment(),
            prereleases,
            stubs: stubs.iter().cloned().collect(),
        }
    }

    /// Solves a root set of requirement strings.
    ///
    /// Requirements are processed breadth-first in the order given, with
    /// each selected distro's own requirements enqueued in declaration
    /// order. The returned ordering seeds environment and alias
    /// composition.
    pub fn solve(&self, requirements: &[String]) -> SolverResult<Vec<SolvedDistro<'a>>> {
        let mut queue: VecDeque<Requirement> = VecDeque::new();
        for raw in requirements {
            queue.push_back(parse_requirement(raw)?);
        }

        let mut order: Vec<String> = Vec::new();
        let mut selected: HashMap<String, SolvedDistro<'a>> = HashMap::new();
        let mut accumulated: HashMap<String, Vec<pep440_rs::VersionSpecifiers>> = HashMap::new();
        let mut processed = 0usize;

        while let Some(requirement) = queue.pop_front() {
            processed += 1;
            if processed > MAX_REQUIREMENTS {
                return Err(SolverError::RequirementCycle);
            }

            if !requirement.evaluate_markers(&self.marker_env, vec![]) {
                log::debug!(
                    "Skipping requirement '{}': markers evaluate false on this host.",
                    requirement.name
                );
                continue;
            }
            let name = requirement.name.clone();

            if self.stubs.contains(&name) {
                log::debug!("Requirement '{}' satisfied by a stub distro.", name);
                continue;
            }

            if let Some(VersionOrUrl::VersionSpecifier(specifiers)) = &requirement.version_or_url {
                accumulated
                    .entry(name.clone())
                    .or_default()
                    .push(specifiers.clone());
            }
            let specifiers = accumulated.get(&name).cloned().unwrap_or_default();

            if let Some(existing) = selected.get(&name) {
                if specifiers
                    .iter()
                    .all(|specs| specs.contains(&existing.version))
                {
                    continue;
                }
                // The accumulated constraints no longer allow the committed
                // version; re-pick against the full union and re-walk the
                // new pick's requirements.
                let repick = self.pick(&name, &specifiers)?;
                log::debug!(
                    "Re-picking '{}': {} no longer satisfies new constraints, using {}.",
                    name,
                    existing.version,
                    repick.version
                );
                for raw in repick.node.distros.iter().flatten() {
                    queue.push_back(parse_requirement(raw)?);
                }
                selected.insert(name, repick);
                continue;
            }

            let pick = self.pick(&name, &specifiers)?;
            for raw in pick.node.distros.iter().flatten() {
                queue.push_back(parse_requirement(raw)?);
            }
            order.push(name.clone());
            selected.insert(name, pick);
        }

        Ok(order
            .into_iter()
            .map(|name| selected.remove(&name).expect("selected follows order"))
            .collect())
    }

    /// The newest version of `name` that satisfies every accumulated
    /// specifier, honoring the site's prerelease policy.
    fn pick(
        &self,
        name: &str,
        specifiers: &[pep440_rs::VersionSpecifiers],
    ) -> SolverResult<SolvedDistro<'a>> {
        let versions = self
            .distros
            .get(name)
            .ok_or_else(|| SolverError::UnknownDistro(name.to_string()))?;

        for (version, node) in versions.iter().rev() {
            if version.any_prerelease() && !self.prereleases {
                continue;
            }
            if specifiers.iter().all(|specs| specs.contains(version)) {
                return Ok(SolvedDistro {
                    name: name.to_string(),
                    version: version.clone(),
                    node,
                });
            }
        }

        Err(SolverError::NoMatchingVersion {
            name: name.to_string(),
            specifiers: specifiers
                .iter()
                .map(|s| s.to_string())
                .collect::<Vec<_>>()
                .join(", "),
            available: versions
                .keys()
                .map(|v| v.to_string())
                .collect::<Vec<_>>()
                .join(", "),
        })
    }
}

fn parse_requirement(raw: &str) -> SolverResult<Requirement> {
    raw.parse::<Requirement>()
        .map_err(|err| SolverError::InvalidRequirement {
            requirement: raw.to_string(),
            message: err.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::platform;
    use pretty_assertions::assert_eq;

    fn distro(name: &str, version: &str, deps: &[&str]) -> DistroNode {
        let raw = serde_json::json!({
            "name": name,
            "version": version,
            "distros": deps,
        });
        let mut node: DistroNode = serde_json::from_value(raw).unwrap();
        node.resolved_version = Some(version.parse().unwrap());
        node
    }

    fn forest(entries: &[(&str, &str, &[&str])]) -> DistroForest {
        let mut forest = DistroForest::new();
        for (name, version, deps) in entries {
            let node = distro(name, version, deps);
            forest
                .entry(name.to_string())
                .or_default()
                .insert(version.parse().unwrap(), node);
        }
        forest
    }

    fn names_and_versions(solved: &[SolvedDistro<'_>]) -> Vec<(String, String)> {
        solved
            .iter()
            .map(|s| (s.name.clone(), s.version.to_string()))
            .collect()
    }

    #[test]
    fn test_picks_newest_version() {
        let forest = forest(&[
            ("maya2024", "2024.0", &[]),
            ("maya2024", "2024.2", &[]),
            ("maya2024", "2024.1", &[]),
        ]);
        let solver = Solver::new(&forest, platform::current(), false, &[]);
        let solved = solver.solve(&["maya2024".to_string()]).unwrap();
        assert_eq!(
            names_and_versions(&solved),
            vec![("maya2024".to_string(), "2024.2".to_string())]
        );
    }

    #[test]
    fn test_specifier_restricts_selection() {
        let forest = forest(&[("aliased", "1.5", &[]), ("aliased", "2.0", &[])]);
        let solver = Solver::new(&forest, platform::current(), false, &[]);
        let solved = solver.solve(&["aliased<2.0".to_string()]).unwrap();
        assert_eq!(
            names_and_versions(&solved),
            vec![("aliased".to_string(), "1.5".to_string())]
        );
    }

    #[test]
    fn test_transitive_requirements_in_declaration_order() {
        let forest = forest(&[
            ("aliased", "2.0", &[]),
            ("aliased_mod", "1.0", &["aliased"]),
            ("the_dcc", "1.2", &["aliased", "aliased_mod"]),
        ]);
        let solver = Solver::new(&forest, platform::current(), false, &[]);
        let solved = solver.solve(&["the_dcc".to_string()]).unwrap();
        assert_eq!(
            names_and_versions(&solved),
            vec![
                ("the_dcc".to_string(), "1.2".to_string()),
                ("aliased".to_string(), "2.0".to_string()),
                ("aliased_mod".to_string(), "1.0".to_string()),
            ]
        );
    }

    #[test]
    fn test_false_marker_skips_transitive_pull() {
        let forest = forest(&[("winOnly", "1.0", &["helper"]), ("helper", "1.0", &[])]);
        // Evaluate against linux so a windows marker is false.
        let linux = platform::from_name("linux").unwrap();
        let solver = Solver::new(&forest, linux, false, &[]);
        let solved = solver
            .solve(&["winOnly; platform_system == 'Windows'".to_string()])
            .unwrap();
        assert!(solved.is_empty());
    }

    #[test]
    fn test_prereleases_excluded_by_default() {
        let forest = forest(&[("tool", "1.0", &[]), ("tool", "2.0b1", &[])]);
        let solver = Solver::new(&forest, platform::current(), false, &[]);
        let solved = solver.solve(&["tool".to_string()]).unwrap();
        assert_eq!(solved[0].version.to_string(), "1.0");

        let solver = Solver::new(&forest, platform::current(), true, &[]);
        let solved = solver.solve(&["tool".to_string()]).unwrap();
        assert_eq!(solved[0].version.to_string(), "2.0b1");
    }

    #[test]
    fn test_stubbed_name_satisfies_without_content() {
        let forest = forest(&[("real", "1.0", &["ghost"])]);
        let stubs = vec!["ghost".to_string()];
        let solver = Solver::new(&forest, platform::current(), false, &stubs);
        let solved = solver.solve(&["real".to_string()]).unwrap();
        assert_eq!(
            names_and_versions(&solved),
            vec![("real".to_string(), "1.0".to_string())]
        );
    }

    #[test]
    fn test_unknown_distro_fails() {
        let forest = forest(&[]);
        let solver = Solver::new(&forest, platform::current(), false, &[]);
        let err = solver.solve(&["missing".to_string()]).unwrap_err();
        assert!(matches!(err, SolverError::UnknownDistro(_)));
    }

    #[test]
    fn test_conflicting_specifiers_fail_with_conflict() {
        let forest = forest(&[("tool", "1.0", &[]), ("tool", "2.0", &[])]);
        let solver = Solver::new(&forest, platform::current(), false, &[]);
        let err = solver
            .solve(&["tool>=1.0".to_string(), "tool>9000".to_string()])
            .unwrap_err();
        match err {
            SolverError::NoMatchingVersion { name, .. } => assert_eq!(name, "tool"),
            other => unreachable!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_already_satisfied_requirement_is_skipped() {
        let forest = forest(&[("tool", "1.5", &[]), ("dep", "1.0", &["tool>=1.0"])]);
        let solver = Solver::new(&forest, platform::current(), false, &[]);
        let solved = solver
            .solve(&["tool".to_string(), "dep".to_string()])
            .unwrap();
        assert_eq!(
            names_and_versions(&solved),
            vec![
                ("tool".to_string(), "1.5".to_string()),
                ("dep".to_string(), "1.0".to_string()),
            ]
        );
    }

    #[test]
    fn test_solve_is_deterministic() {
        let forest = forest(&[
            ("a", "1.0", &["c", "b"]),
            ("b", "1.0", &[]),
            ("c", "1.0", &["b"]),
        ]);
        let solver = Solver::new(&forest, platform::current(), false, &[]);
        let first = names_and_versions(&solver.solve(&["a".to_string()]).unwrap());
        let second = names_and_versions(&solver.solve(&["a".to_string()]).unwrap());
        assert_eq!(first, second);
        assert_eq!(
            first,
            vec![
                ("a".to_string(), "1.0".to_string()),
                ("c".to_string(), "1.0".to_string()),
                ("b".to_string(), "1.0".to_string()),
            ]
        );
    }
}
