// src/cli/handlers/commons.rs
// Shared plumbing used by every subcommand handler.

use anyhow::{Context, Result};
use std::env;
use std::path::PathBuf;

use crate::cli::Cli;
use crate::constants::HAB_PATHS_ENV;
use crate::core::cache;
use crate::core::freeze::{self, Freeze};
use crate::core::loader::Forests;
use crate::core::prefs;
use crate::core::resolve::{self, ResolveError};
use crate::core::site::{self, Site};
use crate::models::FlatConfig;

/// The site file list: `--site` flags win, else `HAB_PATHS` split with the
/// platform's path-list separator.
pub fn site_paths(cli: &Cli) -> Vec<PathBuf> {
    if !cli.site.is_empty() {
        return cli.site.clone();
    }
    match env::var_os(HAB_PATHS_ENV) {
        Some(paths) => env::split_paths(&paths)
            .filter(|p| !p.as_os_str().is_empty())
            .collect(),
        None => Vec::new(),
    }
}

/// Loads and merges the site files, then applies the site's color policy.
pub fn load_site(cli: &Cli) -> Result<Site> {
    let site = site::load(&site_paths(cli))?;
    if let Some(colorize) = site.colorize {
        colored::control::set_override(colorize);
    }
    Ok(site)
}

/// Loads both forests, going through the habcache when one is valid.
pub fn load_forests(site: &Site) -> Result<Forests> {
    Ok(cache::load_forests(site)?)
}

/// Whether user preferences are active for this invocation.
pub fn prefs_enabled(cli: &Cli, site: &Site) -> bool {
    if cli.no_prefs {
        return false;
    }
    cli.prefs || site.prefs_default
}

/// Expands the URI argument. The single-character URI `-` means "use the
/// saved URI" and requires prefs to be enabled.
pub fn expand_uri(cli: &Cli, site: &Site, raw: &str) -> Result<String> {
    if raw != "-" {
        return Ok(raw.to_string());
    }
    if !prefs_enabled(cli, site) {
        anyhow::bail!("The URI '-' requires user prefs. Pass --prefs or enable prefs_default.");
    }
    Ok(prefs::last_uri(site.prefs_uri_timeout)?)
}

/// Resolves a URI to a flattened config, wrapping failures in the standard
/// `Error resolving <uri>` message.
pub fn resolve_flat(
    cli: &Cli,
    site: &Site,
    forests: &Forests,
    uri: &str,
) -> Result<FlatConfig> {
    let flat = resolve::resolve_flat(site, forests, uri, &cli.requirements, cli.verbosity)
        .map_err(|err| anyhow::Error::new(err).context(format!("Error resolving {}", uri)))?;

    if cli.save_prefs {
        prefs::save_uri(uri)?;
    }
    Ok(flat)
}

/// Encodes the freeze of a flattened config.
pub fn encode_freeze(flat: &FlatConfig, site: &Site) -> Result<String> {
    let frozen = Freeze::from_flat(flat, site);
    freeze::encode(&frozen, site).context("Failed to encode the freeze")
}

/// A short human summary of a resolved config, for `env`/`activate`.
pub fn summarize(flat: &FlatConfig) -> String {
    use colored::Colorize;
    let versions = flat
        .distro_versions
        .iter()
        .map(|(name, version)| format!("{}=={}", name, version))
        .collect::<Vec<_>>()
        .join(", ");
    let aliases = flat.aliases.keys().cloned().collect::<Vec<_>>().join(", ");
    format!(
        "{} {}\n{} {}\n{} {}\n{} {}",
        "URI requested:".bold(),
        flat.uri_requested,
        "URI matched:".bold(),
        flat.uri_matched.yellow(),
        "Distros:".bold(),
        versions,
        "Aliases:".bold(),
        aliases
    )
}

/// Maps error kinds to distinct process exit codes.
pub fn exit_code_for(err: &anyhow::Error) -> i32 {
    use crate::core::cache::CacheError;
    use crate::core::environment::ComposeError;
    use crate::core::freeze::FreezeError;
    use crate::core::loader::LoaderError;
    use crate::core::prefs::PrefsError;
    use crate::core::reducer::ReduceError;
    use crate::core::site::SiteError;
    use crate::system::executor::ExecutionError;

    if let Some(resolve_err) = err.downcast_ref::<ResolveError>() {
        return match resolve_err {
            ResolveError::Uri(_) => 5,
            ResolveError::Solver(_) => 6,
            ResolveError::Reduce(ReduceError::ReservedVariableName(_)) => 7,
            ResolveError::Compose(ComposeError::ReservedEnvVar(_)) => 7,
            ResolveError::Compose(ComposeError::PathNotReplaceable) => 7,
            ResolveError::Reduce(ReduceError::ErrorNode { .. }) => 8,
            ResolveError::Compose(_) => 7,
        };
    }
    if err.downcast_ref::<SiteError>().is_some() {
        return 3;
    }
    if err.downcast_ref::<LoaderError>().is_some() {
        return 4;
    }
    if err.downcast_ref::<FreezeError>().is_some() {
        return 9;
    }
    if err.downcast_ref::<PrefsError>().is_some() {
        return 10;
    }
    if err.downcast_ref::<CacheError>().is_some() {
        return 11;
    }
    if err.downcast_ref::<ExecutionError>().is_some() {
        return 12;
    }
    1
}
