// src/cli/handlers/dump.rs

use anyhow::{Context, Result, bail};
use colored::Colorize;
use serde_json::{Map, Value, json};
use std::fs;
use std::path::Path;

use crate::cli::args::{DumpArgs, DumpFormat, DumpType};
use crate::cli::handlers::commons;
use crate::cli::Cli;
use crate::core::freeze::{self, Freeze};
use crate::core::resolve;
use crate::core::site::Site;
use crate::models::FlatConfig;

/// `hab dump`: inspect the resolved config, the effective site, an encoded
/// freeze, or every URI the forest knows about.
pub fn handle(cli: &Cli, args: &DumpArgs) -> Result<i32> {
    let site = commons::load_site(cli)?;

    if let Some(raw) = &args.unfreeze {
        return unfreeze(raw, &site);
    }

    match args.dump_type {
        DumpType::Site => dump_site(&site, args.format),
        DumpType::AllUris => dump_all_uris(cli, &site, args.format),
        DumpType::Cfg | DumpType::Freeze => {
            let Some(raw_uri) = &args.uri else {
                bail!("A URI is required for --type cfg|freeze.");
            };
            let forests = commons::load_forests(&site)?;
            let uri = commons::expand_uri(cli, &site, raw_uri)?;
            let flat = commons::resolve_flat(cli, &site, &forests, &uri)?;

            if args.dump_type == DumpType::Freeze || args.format == DumpFormat::Freeze {
                println!("{}", commons::encode_freeze(&flat, &site)?);
            } else if args.format == DumpFormat::Json {
                let frozen = Freeze::from_flat(&flat, &site);
                let mut value = serde_json::to_value(&frozen)?;
                if let Value::Object(map) = &mut value {
                    map.insert("uri_matched".to_string(), json!(flat.uri_matched));
                    map.insert(
                        "inherits_applied_from".to_string(),
                        json!(flat.inherits_applied_from),
                    );
                }
                println!("{}", serde_json::to_string_pretty(&value)?);
            } else {
                print_cfg_text(&flat);
            }
            Ok(0)
        }
    }
}

fn unfreeze(raw: &str, site: &Site) -> Result<i32> {
    // The argument may be the freeze string itself or a file holding one.
    let text = if Path::new(raw).is_file() {
        fs::read_to_string(raw).with_context(|| format!("Could not read '{}'", raw))?
    } else {
        raw.to_string()
    };
    let frozen = freeze::decode(text.trim(), site)?;
    println!("{}", serde_json::to_string_pretty(&frozen)?);
    Ok(0)
}

fn dump_site(site: &Site, format: DumpFormat) -> Result<i32> {
    let value = site_as_json(site);
    match format {
        DumpFormat::Json | DumpFormat::Freeze => {
            println!("{}", serde_json::to_string_pretty(&value)?);
        }
        DumpFormat::Text => {
            println!("{}", "Effective site".bold());
            for path in &site.paths {
                println!("  {} {}", "site file:".bold(), path.display());
            }
            println!("  {} {:?}", "platforms:".bold(), site.platforms);
            println!("  {} {:?}", "config_paths:".bold(), site.config_paths);
            println!("  {} {:?}", "distro_paths:".bold(), site.distro_paths);
            println!("  {} {}", "prereleases:".bold(), site.prereleases);
            if !site.platform_path_maps.is_empty() {
                println!(
                    "  {} {:?}",
                    "platform_path_maps:".bold(),
                    site.platform_path_maps
                );
            }
        }
    }
    Ok(0)
}

fn site_as_json(site: &Site) -> Value {
    json!({
        "paths": site.paths.iter().map(|p| p.display().to_string()).collect::<Vec<_>>(),
        "config_paths": site.config_paths,
        "distro_paths": site.distro_paths,
        "platforms": site.platforms,
        "platform_path_maps": site.platform_path_maps,
        "prereleases": site.prereleases,
        "ignored_distros": site.ignored_distros,
        "freeze_version": site.freeze_version,
        "prefs_default": site.prefs_default,
        "prefs_uri_timeout": site.prefs_uri_timeout,
        "colorize": site.colorize,
        "site_cache_file_template": site.site_cache_file_template,
    })
}

/// Lists every URI with an actual config document. URIs whose resolve
/// fails list the error text instead of aborting the whole dump.
fn dump_all_uris(cli: &Cli, site: &Site, format: DumpFormat) -> Result<i32> {
    let forests = commons::load_forests(site)?;
    let mut report: Map<String, Value> = Map::new();

    for uri in forests.all_uris() {
        match resolve::resolve_flat(site, &forests, &uri, &cli.requirements, cli.verbosity) {
            Ok(flat) => {
                report.insert(uri, json!({ "matched": flat.uri_matched }));
            }
            Err(err) => {
                report.insert(uri.clone(), json!(resolve::error_line(&uri, &err)));
            }
        }
    }

    match format {
        DumpFormat::Json | DumpFormat::Freeze => {
            println!("{}", serde_json::to_string_pretty(&Value::Object(report))?);
        }
        DumpFormat::Text => {
            for (uri, value) in &report {
                match value {
                    Value::String(error) => println!("{}  {}", uri.red(), error),
                    _ => println!("{}", uri),
                }
            }
        }
    }
    Ok(0)
}

fn print_cfg_text(flat: &FlatConfig) {
    println!("{}", commons::summarize(flat));
    if !flat.inherits_applied_from.is_empty() {
        println!(
            "{} {}",
            "Inherited from:".bold(),
            flat.inherits_applied_from.join(", ")
        );
    }
    println!("{}", "Environment:".bold());
    for (name, value) in &flat.environment {
        if value.is_empty() {
            println!("  {} {}", "unset".dimmed(), name);
        } else {
            println!("  {}={}", name, value);
        }
    }

    // Aliases hidden behind min_verbosity were already dropped during
    // composition; -v / -vv raise the level and reveal them.
    if !flat.aliases.is_empty() {
        println!("{}", "Alias commands:".bold());
        for (name, entry) in &flat.aliases {
            let provenance = entry
                .distro
                .as_ref()
                .map(|(n, v)| format!(" ({}=={})", n, v))
                .unwrap_or_default();
            println!("  {}{}", name, provenance.dimmed());
        }
    }
}
