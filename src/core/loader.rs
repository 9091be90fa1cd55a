// src/core/loader.rs

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command as StdCommand;

use pep440_rs::Version;
use serde_json::Value;
use thiserror::Error;

use crate::constants::{DISTRO_CONFIG_FILENAME, DISTRO_VERSION_FILENAME};
use crate::core::site::Site;
use crate::models::{ConfigNode, DistroNode};

#[derive(Error, Debug)]
pub enum LoaderError {
    #[error("Filesystem Error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Invalid glob pattern '{pattern}': {message}")]
    BadPattern { pattern: String, message: String },
    #[error("Invalid JSON in '{path}': {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error(
        "Duplicate config for URI '{uri}' found in '{duplicate}'; already defined by '{original}'."
    )]
    DuplicateConfig {
        uri: String,
        original: PathBuf,
        duplicate: PathBuf,
    },
    #[error(
        "Duplicate distro '{name}=={version}' found in '{duplicate}'; already defined by '{original}'."
    )]
    DuplicateDistro {
        name: String,
        version: String,
        original: PathBuf,
        duplicate: PathBuf,
    },
    #[error("Config file '{path}' is missing the required field '{field}'.")]
    MissingField { path: PathBuf, field: &'static str },
}

type LoaderResult<T> = Result<T, LoaderError>;

/// Distros keyed by name, then by version in natural PEP 440 order.
pub type DistroForest = HashMap<String, BTreeMap<Version, DistroNode>>;

/// The two forests discovered from a site.
#[derive(Debug, Default)]
pub struct Forests {
    /// Config nodes keyed by URI string. The `default` tree shares the map;
    /// its URIs start with the reserved `default` segment.
    pub configs: HashMap<String, ConfigNode>,
    pub distros: DistroForest,
}

impl Forests {
    /// Every URI with an actual config document, sorted for stable output.
    pub fn all_uris(&self) -> Vec<String> {
        let mut uris: Vec<String> = self.configs.keys().cloned().collect();
        uris.sort();
        uris
    }

    pub fn distro_versions(&self, name: &str) -> Option<&BTreeMap<Version, DistroNode>> {
        self.distros.get(name)
    }
}

/// The documents one glob pattern matched, in glob order.
#[derive(Debug, Clone)]
pub struct GlobDocs {
    pub pattern: String,
    pub files: Vec<(PathBuf, Value)>,
}

/// Scans the site's globs and builds both forests.
pub fn load(site: &Site) -> LoaderResult<Forests> {
    let config_docs = scan_config_paths(site)?;
    let distro_docs = scan_distro_paths(site)?;
    build_forests(&config_docs, &distro_docs)
}

/// Scans every config glob. Invalid JSON in a config file is fatal.
pub fn scan_config_paths(site: &Site) -> LoaderResult<Vec<GlobDocs>> {
    let mut out = Vec::new();
    for pattern in &site.config_paths {
        let mut files = Vec::new();
        for path in glob_paths(pattern)? {
            if !path.is_file() || path.extension().map(|e| e != "json").unwrap_or(true) {
                continue;
            }
            let doc = read_json(&path)?;
            files.push((path, doc));
        }
        out.push(GlobDocs {
            pattern: pattern.clone(),
            files,
        });
    }
    Ok(out)
}

/// Scans every distro glob. Each pattern is augmented with
/// `/*/.hab.json`, so a pattern matching distro directories finds each
/// release below them. Broken documents are dropped with a warning.
pub fn scan_distro_paths(site: &Site) -> LoaderResult<Vec<GlobDocs>> {
    let mut out = Vec::new();
    for pattern in &site.distro_paths {
        let augmented = format!(
            "{}/*/{}",
            pattern.trim_end_matches('/'),
            DISTRO_CONFIG_FILENAME
        );
        let mut files = Vec::new();
        for path in glob_paths(&augmented)? {
            if !path.is_file() {
                continue;
            }
            if let Some(version_dir) = parent_dir_name(&path) {
                if site.ignored_distros.iter().any(|v| *v == version_dir) {
                    log::debug!("Skipping ignored distro directory '{}'.", path.display());
                    continue;
                }
            }
            let mut doc = match read_json(&path) {
                Ok(doc) => doc,
                Err(err) => {
                    log::warn!("Dropping unreadable distro file: {}", err);
                    continue;
                }
            };
            match resolve_distro_version(&doc, &path) {
                Some(version) => {
                    if site.ignored_distros.iter().any(|v| *v == version) {
                        log::debug!(
                            "Skipping distro '{}' with ignored version '{}'.",
                            path.display(),
                            version
                        );
                        continue;
                    }
                    if let Value::Object(map) = &mut doc {
                        map.insert("version".to_string(), Value::String(version));
                    }
                }
                None => {
                    log::warn!(
                        "Dropping distro '{}': no valid version could be determined.",
                        path.display()
                    );
                    continue;
                }
            }
            files.push((path, doc));
        }
        out.push(GlobDocs {
            pattern: augmented,
            files,
        });
    }
    Ok(out)
}

/// Builds both forests from per-glob documents, applying the duplicate
/// policy: a duplicate inside one glob is fatal, a duplicate across globs
/// keeps the first occurrence with a warning.
pub fn build_forests(config_docs: &[GlobDocs], distro_docs: &[GlobDocs]) -> LoaderResult<Forests> {
    let mut forests = Forests::default();

    for glob_docs in config_docs {
        let mut seen_this_glob: HashMap<String, PathBuf> = HashMap::new();
        for (path, doc) in &glob_docs.files {
            let node = parse_config(doc, path)?;
            let uri = node.uri();
            if let Some(original) = seen_this_glob.get(&uri) {
                return Err(LoaderError::DuplicateConfig {
                    uri,
                    original: original.clone(),
                    duplicate: path.clone(),
                });
            }
            seen_this_glob.insert(uri.clone(), path.clone());
            if let Some(existing) = forests.configs.get(&uri) {
                log::warn!(
                    "Ignoring config '{}' for URI '{}'; already loaded from '{}'.",
                    path.display(),
                    uri,
                    existing.filename.display()
                );
                continue;
            }
            forests.configs.insert(uri, node);
        }
    }

    for glob_docs in distro_docs {
        let mut seen_this_glob: HashMap<(String, Version), PathBuf> = HashMap::new();
        for (path, doc) in &glob_docs.files {
            let node = match parse_distro(doc, path) {
                Some(node) => node,
                None => continue,
            };
            let version = match node.resolved_version.clone() {
                Some(version) => version,
                None => continue,
            };
            let key = (node.name.clone(), version.clone());
            if let Some(original) = seen_this_glob.get(&key) {
                return Err(LoaderError::DuplicateDistro {
                    name: key.0,
                    version: key.1.to_string(),
                    original: original.clone(),
                    duplicate: path.clone(),
                });
            }
            seen_this_glob.insert(key.clone(), path.clone());

            let versions = forests.distros.entry(node.name.clone()).or_default();
            if let Some(existing) = versions.get(&version) {
                log::warn!(
                    "Ignoring distro '{}=={}' from '{}'; already loaded from '{}'.",
                    node.name,
                    version,
                    path.display(),
                    existing.filename.display()
                );
                continue;
            }
            versions.insert(version, node);
        }
    }

    mark_error_nodes(&mut forests);
    Ok(forests)
}

/// Parses a config document, which must at minimum carry a `name`.
pub fn parse_config(doc: &Value, path: &Path) -> LoaderResult<ConfigNode> {
    if doc.get("name").and_then(Value::as_str).is_none() {
        return Err(LoaderError::MissingField {
            path: path.to_path_buf(),
            field: "name",
        });
    }
    let mut node: ConfigNode =
        serde_json::from_value(doc.clone()).map_err(|source| LoaderError::Json {
            path: path.to_path_buf(),
            source,
        })?;
    node.filename = path.to_path_buf();
    Ok(node)
}

/// Parses a distro document. Broken documents return `None` after warning;
/// the rest of the forest still loads.
pub fn parse_distro(doc: &Value, path: &Path) -> Option<DistroNode> {
    if doc.get("name").and_then(Value::as_str).is_none() {
        log::warn!(
            "Dropping distro '{}': missing required field 'name'.",
            path.display()
        );
        return None;
    }
    let mut node: DistroNode = match serde_json::from_value(doc.clone()) {
        Ok(node) => node,
        Err(err) => {
            log::warn!("Dropping distro '{}': {}", path.display(), err);
            return None;
        }
    };
    let raw_version = node.version.clone()?;
    match raw_version.parse::<Version>() {
        Ok(version) => node.resolved_version = Some(version),
        Err(err) => {
            log::warn!(
                "Dropping distro '{}': invalid version '{}': {}",
                path.display(),
                raw_version,
                err
            );
            return None;
        }
    }
    node.filename = path.to_path_buf();
    Some(node)
}

/// Determines a distro's version string: the `version` field, a sidecar
/// version file, the parent directory name, then an SCM tag.
fn resolve_distro_version(doc: &Value, path: &Path) -> Option<String> {
    if let Some(version) = doc.get("version").and_then(Value::as_str) {
        return Some(version.to_string());
    }

    let sidecar = path.with_file_name(DISTRO_VERSION_FILENAME);
    if sidecar.is_file() {
        if let Ok(contents) = fs::read_to_string(&sidecar) {
            let contents = contents.trim();
            if !contents.is_empty() {
                return Some(contents.to_string());
            }
        }
    }

    if let Some(dir_name) = parent_dir_name(path) {
        if dir_name.parse::<Version>().is_ok() {
            return Some(dir_name);
        }
    }

    scm_version(path.parent()?)
}

fn parent_dir_name(path: &Path) -> Option<String> {
    path.parent()
        .and_then(Path::file_name)
        .map(|n| n.to_string_lossy().to_string())
}

/// Asks git for a describe-based version when the distro lives in a checkout.
fn scm_version(dir: &Path) -> Option<String> {
    let mut probe = Some(dir);
    let mut in_checkout = false;
    while let Some(current) = probe {
        if current.join(".git").exists() {
            in_checkout = true;
            break;
        }
        probe = current.parent();
    }
    if !in_checkout {
        return None;
    }

    let output = StdCommand::new("git")
        .args(["describe", "--tags", "--always"])
        .current_dir(dir)
        .output()
        .ok()?;
    if !output.status.success() {
        return None;
    }
    let described = String::from_utf8(output.stdout).ok()?;
    let described = described.trim().trim_start_matches('v').to_string();
    if described.is_empty() {
        None
    } else {
        Some(described)
    }
}

/// Records load-time resolve failures on their node so they surface only
/// when that URI is requested.
fn mark_error_nodes(forests: &mut Forests) {
    for node in forests.configs.values_mut() {
        let Some(distros) = &node.distros else {
            continue;
        };
        for requirement in distros {
            if let Err(err) = requirement.parse::<pep508_rs::Requirement>() {
                node.error = Some(format!(
                    "\"{}\" is not a valid requirement: {}",
                    requirement, err
                ));
                break;
            }
        }
    }
}

fn glob_paths(pattern: &str) -> LoaderResult<Vec<PathBuf>> {
    let entries = glob::glob(pattern).map_err(|err| LoaderError::BadPattern {
        pattern: pattern.to_string(),
        message: err.to_string(),
    })?;
    let mut paths = Vec::new();
    for entry in entries {
        match entry {
            Ok(path) => paths.push(path),
            Err(err) => log::warn!("Skipping unreadable glob match: {}", err),
        }
    }
    paths.sort();
    Ok(paths)
}

fn read_json(path: &Path) -> LoaderResult<Value> {
    let text = fs::read_to_string(path)?;
    serde_json::from_str(&text).map_err(|source| LoaderError::Json {
        path: path.to_path_buf(),
        source,
    })
}
