// src/core/site.rs

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde_json::{Map, Value};
use thiserror::Error;

use crate::constants::{
    ADD_PATHS_ENTRY_POINT, DEFAULT_SITE_CACHE_FILE_TEMPLATE, KNOWN_PLATFORMS,
};

#[derive(Error, Debug)]
pub enum SiteError {
    #[error("Site file '{0}' does not exist.")]
    MissingFile(PathBuf),
    #[error("Filesystem Error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Invalid JSON in site file '{path}': {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("Site setting '{setting}' expects {expected}.")]
    InvalidSetting {
        setting: String,
        expected: &'static str,
    },
    #[error("No site files were provided. Set HAB_PATHS or pass --site.")]
    NoSiteFiles,
}

type SiteResult<T> = Result<T, SiteError>;

/// The effective site: every site file merged into one set of settings.
#[derive(Debug, Clone, Default)]
pub struct Site {
    /// Contributing site files, highest priority first.
    pub paths: Vec<PathBuf>,
    /// Glob patterns locating config JSON files.
    pub config_paths: Vec<String>,
    /// Glob patterns locating distro directories.
    pub distro_paths: Vec<String>,
    /// Platforms this site supports.
    pub platforms: Vec<String>,
    /// Mapping name to (platform to leading directory).
    pub platform_path_maps: BTreeMap<String, BTreeMap<String, String>>,
    /// Allow pre-release distro versions during solving.
    pub prereleases: bool,
    /// Version strings whose distro directories are skipped entirely.
    pub ignored_distros: Vec<String>,
    pub freeze_version: Option<u32>,
    /// Opaque extension hooks. A JSON null disables the name.
    pub entry_points: BTreeMap<String, Value>,
    pub prefs_default: bool,
    /// Minutes before a saved URI expires. `None` means never.
    pub prefs_uri_timeout: Option<u64>,
    pub colorize: Option<bool>,
    pub site_cache_file_template: String,
    /// Settings the engine does not recognize, merged and preserved.
    pub other: BTreeMap<String, Value>,
}

impl Site {
    /// The habcache sidecar path for one of this site's files.
    pub fn cache_path(&self, site_file: &Path) -> PathBuf {
        let stem = site_file
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| "site".to_string());
        let name = self.site_cache_file_template.replace("{stem}", &stem);
        site_file.with_file_name(name)
    }

    /// Whether the named platform is supported by this site.
    pub fn supports_platform(&self, name: &str) -> bool {
        self.platforms.iter().any(|p| p == name)
    }
}

/// Loads and merges an ordered list of site files, highest priority first.
///
/// After the initial merge the `hab.site.add_paths` entry point is consulted
/// once: any site files it lists are merged as left-most. The files returned
/// that way do not re-trigger the entry point.
pub fn load(paths: &[PathBuf]) -> SiteResult<Site> {
    if paths.is_empty() {
        return Err(SiteError::NoSiteFiles);
    }
    let files = dedup_paths(paths);
    let merged = merge_files(&files)?;

    if let Some((origin, value)) = merged.entry_point(ADD_PATHS_ENTRY_POINT) {
        let added = parse_add_paths(value, &origin)?;
        if !added.is_empty() {
            log::debug!(
                "{} merging {} additional site file(s)",
                ADD_PATHS_ENTRY_POINT,
                added.len()
            );
            let mut combined = added;
            combined.extend(files);
            let final_files = dedup_paths(&combined);
            return finalize(merge_files(&final_files)?, final_files);
        }
    }
    finalize(merged, files)
}

fn dedup_paths(paths: &[PathBuf]) -> Vec<PathBuf> {
    let mut seen = Vec::new();
    for path in paths {
        let clean = dunce::simplified(path).to_path_buf();
        if !seen.contains(&clean) {
            seen.push(clean);
        }
    }
    seen
}

fn parse_add_paths(value: &Value, origin: &Path) -> SiteResult<Vec<PathBuf>> {
    let list = value.as_array().ok_or_else(|| SiteError::InvalidSetting {
        setting: ADD_PATHS_ENTRY_POINT.to_string(),
        expected: "a list of site file paths",
    })?;
    let origin_dir = origin.parent().unwrap_or_else(|| Path::new("."));
    let mut out = Vec::new();
    for item in list {
        let raw = item.as_str().ok_or_else(|| SiteError::InvalidSetting {
            setting: ADD_PATHS_ENTRY_POINT.to_string(),
            expected: "a list of site file paths",
        })?;
        out.push(PathBuf::from(expand_path_value(raw, origin_dir)));
    }
    Ok(out)
}

// --- Merge machinery ---

/// The merge operations a single site file may apply to one setting.
#[derive(Debug, Clone)]
enum CoreOp {
    Set(Value),
    Unset,
}

#[derive(Debug, Default)]
struct PendingSetting {
    /// The winning `set`/`unset`, from the left-most file that declared one.
    core: Option<CoreOp>,
    /// Accumulated prepends: the left-most file's entries sit first.
    prepend: Vec<Value>,
    /// Accumulated appends: the left-most file's entries sit last.
    append: Vec<Value>,
}

impl PendingSetting {
    /// Flattens the operations into the effective list value.
    fn effective_list(&self) -> Vec<Value> {
        let mut out = self.prepend.clone();
        if let Some(CoreOp::Set(value)) = &self.core {
            match value {
                Value::Array(items) => out.extend(items.iter().cloned()),
                other => out.push(other.clone()),
            }
        }
        out.extend(self.append.iter().cloned());
        out
    }

    fn effective_scalar(&self) -> Option<Value> {
        match &self.core {
            Some(CoreOp::Set(value)) => Some(value.clone()),
            Some(CoreOp::Unset) | None => None,
        }
    }

    fn is_list_like(&self) -> bool {
        !self.prepend.is_empty()
            || !self.append.is_empty()
            || matches!(&self.core, Some(CoreOp::Set(Value::Array(_))))
    }
}

#[derive(Debug, Default)]
struct MergedSite {
    settings: BTreeMap<String, PendingSetting>,
    /// Mapping-valued settings merge at entry level; first file wins per key.
    platform_path_maps: BTreeMap<String, Value>,
    entry_points: BTreeMap<String, (PathBuf, Value)>,
}

impl MergedSite {
    fn entry_point(&self, name: &str) -> Option<(PathBuf, &Value)> {
        self.entry_points
            .get(name)
            .filter(|(_, value)| !value.is_null())
            .map(|(origin, value)| (origin.clone(), value))
    }
}

fn merge_files(files: &[PathBuf]) -> SiteResult<MergedSite> {
    let mut merged = MergedSite::default();
    for path in files {
        if !path.is_file() {
            return Err(SiteError::MissingFile(path.clone()));
        }
        let text = fs::read_to_string(path)?;
        let doc: Map<String, Value> =
            serde_json::from_str(&text).map_err(|source| SiteError::Json {
                path: path.clone(),
                source,
            })?;
        merge_document(&mut merged, path, doc);
    }
    Ok(merged)
}

fn merge_document(merged: &mut MergedSite, path: &Path, doc: Map<String, Value>) {
    for (op, settings) in doc {
        match op.as_str() {
            "set" | "prepend" | "append" => {
                let Some(settings) = settings.as_object() else {
                    log::warn!(
                        "Site file '{}': '{}' must map settings to values; ignored.",
                        path.display(),
                        op
                    );
                    continue;
                };
                for (name, value) in settings {
                    merge_setting(merged, path, &op, name, value.clone());
                }
            }
            "unset" => {
                for name in unset_names(&settings) {
                    let pending = merged.settings.entry(name).or_default();
                    if pending.core.is_none() {
                        pending.core = Some(CoreOp::Unset);
                    }
                }
            }
            other => {
                log::warn!(
                    "Site file '{}': unknown top-level key '{}'; ignored.",
                    path.display(),
                    other
                );
            }
        }
    }
}

fn unset_names(value: &Value) -> Vec<String> {
    match value {
        Value::Array(items) => items
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect(),
        Value::Object(map) => map.keys().cloned().collect(),
        Value::String(name) => vec![name.clone()],
        _ => Vec::new(),
    }
}

fn merge_setting(merged: &mut MergedSite, path: &Path, op: &str, name: &str, value: Value) {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    // Path-valued settings expand ~, $VARS and {relative_root} against the
    // directory of the file that declared them, before merging.
    let value = if is_path_setting(name) {
        expand_path_values(value, dir)
    } else {
        value
    };

    match name {
        "platform_path_maps" => {
            if let Value::Object(map) = value {
                for (map_name, platforms) in map {
                    merged
                        .platform_path_maps
                        .entry(map_name)
                        .or_insert(platforms);
                }
            }
        }
        "entry_points" => {
            if let Value::Object(map) = value {
                for (entry, target) in map {
                    merged
                        .entry_points
                        .entry(entry)
                        .or_insert_with(|| (path.to_path_buf(), target));
                }
            }
        }
        _ => {
            let pending = merged.settings.entry(name.to_string()).or_default();
            match op {
                "set" => {
                    if pending.core.is_none() {
                        pending.core = Some(CoreOp::Set(value));
                    }
                }
                "prepend" => match value {
                    Value::Array(items) => pending.prepend.extend(items),
                    other => pending.prepend.push(other),
                },
                "append" => match value {
                    // Appends from higher priority files end up further right.
                    Value::Array(items) => {
                        let mut combined = items;
                        combined.append(&mut pending.append);
                        pending.append = combined;
                    }
                    other => {
                        let mut combined = vec![other];
                        combined.append(&mut pending.append);
                        pending.append = combined;
                    }
                },
                _ => {}
            }
        }
    }
}

fn is_path_setting(name: &str) -> bool {
    matches!(name, "config_paths" | "distro_paths" | "platform_path_maps")
}

fn expand_path_values(value: Value, dir: &Path) -> Value {
    match value {
        Value::String(s) => Value::String(expand_path_value(&s, dir)),
        Value::Array(items) => Value::Array(
            items
                .into_iter()
                .map(|item| expand_path_values(item, dir))
                .collect(),
        ),
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(k, v)| (k, expand_path_values(v, dir)))
                .collect(),
        ),
        other => other,
    }
}

fn expand_path_value(raw: &str, dir: &Path) -> String {
    let replaced = raw.replace("{relative_root}", &dir.to_string_lossy());
    match shellexpand::full(&replaced) {
        Ok(expanded) => expanded.into_owned(),
        Err(err) => {
            log::warn!("Could not expand path '{}': {}", raw, err);
            replaced
        }
    }
}

// --- Finalization ---

fn finalize(merged: MergedSite, files: Vec<PathBuf>) -> SiteResult<Site> {
    let mut site = Site {
        paths: files,
        platforms: KNOWN_PLATFORMS.iter().map(|p| p.to_string()).collect(),
        site_cache_file_template: DEFAULT_SITE_CACHE_FILE_TEMPLATE.to_string(),
        ..Site::default()
    };

    for (name, pending) in &merged.settings {
        match name.as_str() {
            "config_paths" => site.config_paths = string_list(name, pending)?,
            "distro_paths" => site.distro_paths = string_list(name, pending)?,
            "ignored_distros" => site.ignored_distros = string_list(name, pending)?,
            "platforms" => {
                let mut platforms = Vec::new();
                for platform in string_list(name, pending)? {
                    if KNOWN_PLATFORMS.contains(&platform.as_str()) {
                        if !platforms.contains(&platform) {
                            platforms.push(platform);
                        }
                    } else {
                        log::warn!("Ignoring unknown platform '{}' in site files.", platform);
                    }
                }
                site.platforms = platforms;
            }
            "prereleases" => site.prereleases = scalar_bool(name, pending)?.unwrap_or(false),
            "colorize" => site.colorize = scalar_bool(name, pending)?,
            "prefs_default" => site.prefs_default = scalar_bool(name, pending)?.unwrap_or(false),
            "prefs_uri_timeout" => {
                site.prefs_uri_timeout = scalar_u64(name, pending)?;
            }
            "freeze_version" => {
                site.freeze_version = scalar_u64(name, pending)?.map(|v| v as u32);
            }
            "site_cache_file_template" => {
                if let Some(template) = scalar_string(name, pending)? {
                    site.site_cache_file_template = template;
                }
            }
            _ => {
                let value = if pending.is_list_like() {
                    Value::Array(pending.effective_list())
                } else {
                    pending.effective_scalar().unwrap_or(Value::Null)
                };
                site.other.insert(name.clone(), value);
            }
        }
    }

    for (map_name, platforms) in merged.platform_path_maps {
        let Value::Object(platforms) = platforms else {
            return Err(SiteError::InvalidSetting {
                setting: format!("platform_path_maps.{}", map_name),
                expected: "a mapping of platform to directory",
            });
        };
        let mut by_platform = BTreeMap::new();
        for (platform, root) in platforms {
            let Value::String(root) = root else {
                return Err(SiteError::InvalidSetting {
                    setting: format!("platform_path_maps.{}.{}", map_name, platform),
                    expected: "a directory string",
                });
            };
            by_platform.insert(platform, root);
        }
        site.platform_path_maps.insert(map_name, by_platform);
    }

    for (entry, (_, target)) in merged.entry_points {
        if target.is_null() {
            log::debug!("Entry point '{}' explicitly disabled by site.", entry);
            continue;
        }
        site.entry_points.insert(entry, target);
    }

    Ok(site)
}

fn string_list(name: &str, pending: &PendingSetting) -> SiteResult<Vec<String>> {
    pending
        .effective_list()
        .into_iter()
        .map(|value| match value {
            Value::String(s) => Ok(s),
            _ => Err(SiteError::InvalidSetting {
                setting: name.to_string(),
                expected: "a list of strings",
            }),
        })
        .collect()
}

fn scalar_bool(name: &str, pending: &PendingSetting) -> SiteResult<Option<bool>> {
    match pending.effective_scalar() {
        None => Ok(None),
        Some(Value::Bool(b)) => Ok(Some(b)),
        Some(_) => Err(SiteError::InvalidSetting {
            setting: name.to_string(),
            expected: "a boolean",
        }),
    }
}

fn scalar_u64(name: &str, pending: &PendingSetting) -> SiteResult<Option<u64>> {
    match pending.effective_scalar() {
        None => Ok(None),
        Some(Value::Number(n)) => Ok(n.as_u64()),
        Some(_) => Err(SiteError::InvalidSetting {
            setting: name.to_string(),
            expected: "an integer",
        }),
    }
}

fn scalar_string(name: &str, pending: &PendingSetting) -> SiteResult<Option<String>> {
    match pending.effective_scalar() {
        None => Ok(None),
        Some(Value::String(s)) => Ok(Some(s)),
        Some(_) => Err(SiteError::InvalidSetting {
            setting: name.to_string(),
            expected: "a string",
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::fs;
    use tempfile::TempDir;

    fn write_site(dir: &TempDir, name: &str, body: &str) -> PathBuf {
        let path = dir.path().join(name);
        fs::write(&path, body).unwrap();
        path
    }

    #[test]
    fn test_left_most_scalar_wins() {
        let dir = TempDir::new().unwrap();
        let left = write_site(&dir, "left.json", r#"{"set": {"prereleases": true}}"#);
        let right = write_site(&dir, "right.json", r#"{"set": {"prereleases": false}}"#);
        let site = load(&[left, right]).unwrap();
        assert!(site.prereleases);
    }

    #[test]
    fn test_list_merge_ordering_across_three_files() {
        let dir = TempDir::new().unwrap();
        let left = write_site(
            &dir,
            "left.json",
            r#"{"prepend": {"test_paths": ["left_prepend"]},
                "append": {"test_paths": ["left_append"]}}"#,
        );
        let middle = write_site(
            &dir,
            "middle.json",
            r#"{"prepend": {"test_paths": ["middle_prepend"]},
                "append": {"test_paths": ["middle_append"]}}"#,
        );
        let right = write_site(
            &dir,
            "right.json",
            r#"{"prepend": {"test_paths": ["right_prepend"]},
                "append": {"test_paths": ["right_append"]}}"#,
        );
        let site = load(&[left, middle, right]).unwrap();
        let merged: Vec<&str> = site.other["test_paths"]
            .as_array()
            .unwrap()
            .iter()
            .map(|v| v.as_str().unwrap())
            .collect();
        assert_eq!(
            merged,
            vec![
                "left_prepend",
                "middle_prepend",
                "right_prepend",
                "right_append",
                "middle_append",
                "left_append",
            ]
        );
    }

    #[test]
    fn test_platform_path_maps_entry_first_wins() {
        let dir = TempDir::new().unwrap();
        let left = write_site(
            &dir,
            "left.json",
            r#"{"set": {"platform_path_maps": {
                "net-share": {"linux": "/mnt/share", "windows": "\\\\server\\share"}}}}"#,
        );
        let right = write_site(
            &dir,
            "right.json",
            r#"{"set": {"platform_path_maps": {
                "net-share": {"linux": "/other", "windows": "Z:\\"},
                "projects": {"linux": "/mnt/projects", "windows": "P:\\"}}}}"#,
        );
        let site = load(&[left, right]).unwrap();
        assert_eq!(site.platform_path_maps["net-share"]["linux"], "/mnt/share");
        assert_eq!(
            site.platform_path_maps["projects"]["linux"],
            "/mnt/projects"
        );
    }

    #[test]
    fn test_entry_point_null_disables() {
        let dir = TempDir::new().unwrap();
        let left = write_site(
            &dir,
            "left.json",
            r#"{"set": {"entry_points": {"hab.launch_cls": null}}}"#,
        );
        let right = write_site(
            &dir,
            "right.json",
            r#"{"set": {"entry_points": {"hab.launch_cls": "shipped.Launcher"}}}"#,
        );
        let site = load(&[left, right]).unwrap();
        assert!(!site.entry_points.contains_key("hab.launch_cls"));
    }

    #[test]
    fn test_add_paths_entry_point_merges_left_most() {
        let dir = TempDir::new().unwrap();
        let added = write_site(
            &dir,
            "added.json",
            r#"{"set": {"prereleases": true, "colorize": false}}"#,
        );
        let main = write_site(
            &dir,
            "main.json",
            &format!(
                r#"{{"set": {{
                    "prereleases": false,
                    "entry_points": {{"hab.site.add_paths": ["{}"]}}}}}}"#,
                added.display()
            ),
        );
        let site = load(&[main.clone()]).unwrap();
        // The added file merges left-most, so its values win.
        assert!(site.prereleases);
        assert_eq!(site.colorize, Some(false));
        assert_eq!(site.paths[0], added);
        assert_eq!(site.paths[1], main);
    }

    #[test]
    fn test_missing_site_file_is_fatal() {
        let result = load(&[PathBuf::from("/definitely/not/here/site.json")]);
        assert!(matches!(result, Err(SiteError::MissingFile(_))));
    }

    #[test]
    fn test_cache_path_uses_template() {
        let dir = TempDir::new().unwrap();
        let main = write_site(&dir, "studio.json", r#"{"set": {}}"#);
        let site = load(&[main.clone()]).unwrap();
        assert_eq!(
            site.cache_path(&main),
            main.with_file_name("studio.habcache")
        );
    }
}
