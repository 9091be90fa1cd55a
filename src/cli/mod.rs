// src/cli/mod.rs

use clap::{Parser, Subcommand};
use std::path::PathBuf;

pub mod args;
pub mod handlers;

/// hab: resolve per-task environments and launch applications inside them.
///
/// A URI like `projectDummy/Sc001/animation` selects a config from the
/// site's config tree; hab solves the required distro versions, composes
/// the environment and aliases, and emits shell scripts (or launches a
/// program) for the result.
#[derive(Parser, Debug)]
#[command(name = "hab", author, version, about, long_about = None)]
pub struct Cli {
    /// Site file(s) to use instead of HAB_PATHS. Repeatable; the first has
    /// the highest priority.
    #[arg(long, global = true)]
    pub site: Vec<PathBuf>,

    /// Extra distro requirement(s) added to the chosen config's own.
    #[arg(short = 'r', long = "requirement", global = true)]
    pub requirements: Vec<String>,

    /// Increase log output (-v info, -vv debug).
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count, global = true)]
    pub verbosity: u8,

    /// Enable user preferences (required for the `-` URI).
    #[arg(long, global = true, overrides_with = "no_prefs")]
    pub prefs: bool,

    /// Disable user preferences.
    #[arg(long, global = true, overrides_with = "prefs")]
    pub no_prefs: bool,

    /// Save the resolved URI as the user preference.
    #[arg(long, global = true)]
    pub save_prefs: bool,

    /// Logging configuration file raising the log level.
    #[arg(long, global = true)]
    pub logging_config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Write the scripts that configure a sub-shell for a URI.
    Env(args::EnvArgs),
    /// Write the script that activates a URI in the current shell.
    Activate(args::ActivateArgs),
    /// Launch an alias inside the resolved environment.
    Launch(args::LaunchArgs),
    /// Print the resolved config, site, freeze, or the URI list.
    Dump(args::DumpArgs),
    /// Write the habcache for a site file.
    Cache(args::CacheArgs),
    /// Save (or show) the preferred URI.
    #[command(name = "set-uri")]
    SetUri(args::SetUriArgs),
}
