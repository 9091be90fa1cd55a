// src/core/cache.rs

use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tempfile::NamedTempFile;
use thiserror::Error;

use crate::constants::{HAB_TEST_UNCACHED_ONLY_ENV, HABCACHE_VERSION};
use crate::core::freeze;
use crate::core::loader::{self, Forests, GlobDocs, LoaderError};
use crate::core::platform;
use crate::core::site::Site;

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Filesystem Error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Invalid JSON in habcache '{path}': {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error(transparent)]
    Loader(#[from] LoaderError),
    #[error("Habcache '{0}' does not match the on-disk state.")]
    Stale(PathBuf),
    #[error("Habcache '{path}' has unsupported version {version}.")]
    Version { path: PathBuf, version: u32 },
}

type CacheResult<T> = Result<T, CacheError>;

/// One cached document: the source file's mtime and its parsed contents.
#[derive(Serialize, Deserialize, Debug, Clone)]
struct CachedFile {
    mtime: u64,
    document: Value,
}

/// The habcache file: a memoized forest scan for one site.
///
/// Paths are stored through `platform_path_maps` sigils so the same cache
/// file is usable from every platform that mounts the site.
#[derive(Serialize, Deserialize, Debug, Default)]
pub struct HabCache {
    version: u32,
    /// Contributing site files and their mtimes at write time.
    site_files: BTreeMap<String, u64>,
    /// Site glob pattern to (file path to cached document).
    config_paths: BTreeMap<String, BTreeMap<String, CachedFile>>,
    distro_paths: BTreeMap<String, BTreeMap<String, CachedFile>>,
}

/// Loads the forests for a site, going through a habcache when a valid one
/// exists. A stale or unreadable cache falls back to a live scan with a
/// warning; it is never fatal.
pub fn load_forests(site: &Site) -> CacheResult<Forests> {
    if env::var_os(HAB_TEST_UNCACHED_ONLY_ENV).is_some() {
        log::debug!("{} is set; skipping habcache.", HAB_TEST_UNCACHED_ONLY_ENV);
        return Ok(loader::load(site)?);
    }

    for site_file in &site.paths {
        let cache_path = site.cache_path(site_file);
        if !cache_path.is_file() {
            continue;
        }
        match read_cache(&cache_path, site) {
            Ok(forests) => {
                log::debug!("Loaded forests from habcache '{}'.", cache_path.display());
                return Ok(forests);
            }
            Err(err) => {
                log::warn!(
                    "Ignoring habcache '{}' ({}); falling back to a live scan.",
                    cache_path.display(),
                    err
                );
                break;
            }
        }
    }
    Ok(loader::load(site)?)
}

/// Scans the site and writes its habcache next to `site_file`, atomically.
/// This is the only way a habcache is ever (re)written.
pub fn write_cache(site: &Site, site_file: &Path) -> CacheResult<PathBuf> {
    let config_docs = loader::scan_config_paths(site)?;
    let distro_docs = loader::scan_distro_paths(site)?;

    let mut cache = HabCache {
        version: HABCACHE_VERSION,
        ..HabCache::default()
    };
    for path in &site.paths {
        cache
            .site_files
            .insert(portable(path, site), file_mtime(path)?);
    }
    cache.config_paths = glob_map(&site.config_paths, &config_docs, site)?;
    cache.distro_paths = glob_map(&site.distro_paths, &distro_docs, site)?;

    let cache_path = site.cache_path(site_file);
    let payload = serde_json::to_vec(&cache).map_err(|source| CacheError::Json {
        path: cache_path.clone(),
        source,
    })?;

    // Concurrent readers must never observe a partial write, so the cache
    // lands via a temp file in the same directory and an atomic rename.
    let dir = cache_path.parent().unwrap_or_else(|| Path::new("."));
    let mut temp = NamedTempFile::new_in(dir)?;
    temp.write_all(&payload)?;
    temp.persist(&cache_path).map_err(|err| err.error)?;
    log::debug!("Wrote habcache '{}'.", cache_path.display());
    Ok(cache_path)
}

fn glob_map(
    patterns: &[String],
    docs: &[GlobDocs],
    site: &Site,
) -> CacheResult<BTreeMap<String, BTreeMap<String, CachedFile>>> {
    let mut out = BTreeMap::new();
    for (pattern, glob_docs) in patterns.iter().zip(docs) {
        let mut files = BTreeMap::new();
        for (path, document) in &glob_docs.files {
            files.insert(
                portable(path, site),
                CachedFile {
                    mtime: file_mtime(path)?,
                    document: document.clone(),
                },
            );
        }
        out.insert(portable_pattern(pattern, site), files);
    }
    Ok(out)
}

fn read_cache(cache_path: &Path, site: &Site) -> CacheResult<Forests> {
    let bytes = fs::read(cache_path)?;
    // Plain JSON first; tolerate the lz4 compressed variant.
    let cache: HabCache = match serde_json::from_slice(&bytes) {
        Ok(cache) => cache,
        Err(_) => {
            let decompressed = lz4_flex::decompress_size_prepended(&bytes)
                .map_err(|_| CacheError::Stale(cache_path.to_path_buf()))?;
            serde_json::from_slice(&decompressed).map_err(|source| CacheError::Json {
                path: cache_path.to_path_buf(),
                source,
            })?
        }
    };
    if cache.version != HABCACHE_VERSION {
        return Err(CacheError::Version {
            path: cache_path.to_path_buf(),
            version: cache.version,
        });
    }

    validate(&cache, cache_path, site)?;

    let config_docs = rebuild(&site.config_paths, &cache.config_paths, site, cache_path)?;
    let distro_docs = rebuild(&site.distro_paths, &cache.distro_paths, site, cache_path)?;
    Ok(loader::build_forests(&config_docs, &distro_docs)?)
}

/// A cache is valid while every recorded mtime (site files and globbed
/// files) still matches the filesystem.
fn validate(cache: &HabCache, cache_path: &Path, site: &Site) -> CacheResult<()> {
    let mut recorded: BTreeMap<String, u64> = BTreeMap::new();
    for path in &site.paths {
        recorded.insert(portable(path, site), file_mtime(path)?);
    }
    if recorded != cache.site_files {
        return Err(CacheError::Stale(cache_path.to_path_buf()));
    }

    for files in cache.config_paths.values().chain(cache.distro_paths.values()) {
        for (portable_path, cached) in files {
            let path = expand_portable(portable_path, site);
            match file_mtime(&path) {
                Ok(mtime) if mtime == cached.mtime => {}
                _ => return Err(CacheError::Stale(cache_path.to_path_buf())),
            }
        }
    }
    Ok(())
}

fn rebuild(
    patterns: &[String],
    cached: &BTreeMap<String, BTreeMap<String, CachedFile>>,
    site: &Site,
    cache_path: &Path,
) -> CacheResult<Vec<GlobDocs>> {
    let mut out = Vec::new();
    for pattern in patterns {
        let key = portable_pattern(pattern, site);
        let Some(files) = cached.get(&key) else {
            // The site gained a glob the cache has never seen.
            return Err(CacheError::Stale(cache_path.to_path_buf()));
        };
        out.push(GlobDocs {
            pattern: pattern.clone(),
            files: files
                .iter()
                .map(|(path, file)| (expand_portable(path, site), file.document.clone()))
                .collect(),
        });
    }
    Ok(out)
}

fn portable(path: &Path, site: &Site) -> String {
    portable_pattern(&path.to_string_lossy(), site)
}

fn portable_pattern(text: &str, site: &Site) -> String {
    freeze::compress_path(text, platform::current().name(), site)
        .unwrap_or_else(|| text.to_string())
}

fn expand_portable(text: &str, site: &Site) -> PathBuf {
    PathBuf::from(
        freeze::expand_path(text, platform::current().name(), site)
            .unwrap_or_else(|| text.to_string()),
    )
}

fn file_mtime(path: &Path) -> CacheResult<u64> {
    let modified = fs::metadata(path)?.modified()?;
    Ok(modified
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn write_file(root: &Path, rel: &str, body: &str) -> PathBuf {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, body).unwrap();
        path
    }

    fn test_site(root: &Path) -> (Site, PathBuf) {
        let site_file = write_file(root, "site.json", r#"{"set": {}}"#);
        let site = Site {
            paths: vec![site_file.clone()],
            config_paths: vec![root.join("configs/*.json").to_string_lossy().to_string()],
            distro_paths: vec![root.join("distros/*").to_string_lossy().to_string()],
            site_cache_file_template: "{stem}.habcache".to_string(),
            ..Site::default()
        };
        (site, site_file)
    }

    #[test]
    fn test_cache_round_trip_matches_live_scan() {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        write_file(root, "configs/app.json", r#"{"name": "app"}"#);
        write_file(root, "distros/tool/1.0/.hab.json", r#"{"name": "tool"}"#);
        let (site, site_file) = test_site(root);

        let live = loader::load(&site).unwrap();
        let cache_path = write_cache(&site, &site_file).unwrap();
        assert!(cache_path.is_file());

        let cached = load_forests(&site).unwrap();
        assert_eq!(cached.all_uris(), live.all_uris());
        assert!(cached.distro_versions("tool").is_some());
    }

    #[test]
    fn test_modified_file_invalidates_cache() {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        let config = write_file(root, "configs/app.json", r#"{"name": "app"}"#);
        let (site, site_file) = test_site(root);
        let cache_path = write_cache(&site, &site_file).unwrap();

        // Rewrite with a different mtime; the direct read must report stale.
        let old = fs::metadata(&config).unwrap().modified().unwrap();
        fs::write(&config, r#"{"name": "app", "inherits": true}"#).unwrap();
        filetime_bump(&config, old);

        let result = read_cache(&cache_path, &site);
        assert!(matches!(result, Err(CacheError::Stale(_))));

        // And the public entry point falls back to the live scan.
        let forests = load_forests(&site).unwrap();
        assert_eq!(forests.configs["app"].inherits, Some(true));
    }

    // Ensures the rewritten file carries a different mtime even on coarse
    // filesystem clocks.
    fn filetime_bump(path: &Path, old: std::time::SystemTime) {
        for _ in 0..50 {
            if fs::metadata(path).unwrap().modified().unwrap() != old {
                return;
            }
            fs::write(path, fs::read(path).unwrap()).unwrap();
            std::thread::sleep(std::time::Duration::from_millis(5));
        }
    }

    #[test]
    fn test_missing_cache_falls_back_to_scan() {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        write_file(root, "configs/app.json", r#"{"name": "app"}"#);
        let (site, _) = test_site(root);
        let forests = load_forests(&site).unwrap();
        assert!(forests.configs.contains_key("app"));
    }

    #[test]
    fn test_new_glob_invalidates_cache() {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        write_file(root, "configs/app.json", r#"{"name": "app"}"#);
        let (mut site, site_file) = test_site(root);
        let cache_path = write_cache(&site, &site_file).unwrap();

        site.config_paths.push(
            root.join("more_configs/*.json")
                .to_string_lossy()
                .to_string(),
        );
        let result = read_cache(&cache_path, &site);
        assert!(matches!(result, Err(CacheError::Stale(_))));
    }

    #[test]
    fn test_paths_stored_through_sigils() {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        write_file(root, "configs/app.json", r#"{"name": "app"}"#);
        let (mut site, site_file) = test_site(root);
        let mut roots = BTreeMap::new();
        roots.insert(
            platform::current().name().to_string(),
            root.to_string_lossy().to_string(),
        );
        site.platform_path_maps.insert("site-root".to_string(), roots);

        let cache_path = write_cache(&site, &site_file).unwrap();
        let raw = fs::read_to_string(&cache_path).unwrap();
        assert!(raw.contains("{site-root}"));

        let forests = load_forests(&site).unwrap();
        assert!(forests.configs.contains_key("app"));
    }
}
