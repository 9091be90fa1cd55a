// src/cli/args.rs

use clap::{Args, ValueEnum};
use std::path::PathBuf;

#[derive(Args, Debug, Default)]
pub struct EnvArgs {
    /// The URI to resolve. `-` reuses the saved URI (requires prefs).
    pub uri: String,

    /// Also write a launch script invoking this alias.
    #[arg(long)]
    pub launch: Option<String>,

    /// Directory to write the scripts into. Defaults to a fresh scratch
    /// directory.
    #[arg(long)]
    pub script_dir: Option<PathBuf>,

    /// Extension (and thereby shell flavor) of the generated scripts.
    #[arg(long)]
    pub script_ext: Option<String>,

    /// Print the generated scripts to stdout instead of summarizing.
    #[arg(long)]
    pub dump_scripts: bool,
}

#[derive(Args, Debug, Default)]
pub struct ActivateArgs {
    /// The URI to resolve. `-` reuses the saved URI (requires prefs).
    pub uri: String,

    #[arg(long)]
    pub script_dir: Option<PathBuf>,

    #[arg(long)]
    pub script_ext: Option<String>,

    #[arg(long)]
    pub dump_scripts: bool,
}

#[derive(Args, Debug)]
pub struct LaunchArgs {
    /// The URI to resolve. `-` reuses the saved URI (requires prefs).
    pub uri: String,

    /// The alias to launch.
    pub alias: String,

    /// Arguments forwarded to the launched program.
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    pub args: Vec<String>,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DumpType {
    /// The resolved config for the URI.
    #[default]
    Cfg,
    /// The effective merged site.
    Site,
    /// The encoded freeze for the URI.
    Freeze,
    /// Every URI in the forest, with resolve errors inline.
    AllUris,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DumpFormat {
    #[default]
    Text,
    Json,
    Freeze,
}

#[derive(Args, Debug, Default)]
pub struct DumpArgs {
    /// The URI to resolve. Not required for `--type site|all-uris` or
    /// `--unfreeze`.
    pub uri: Option<String>,

    #[arg(short = 't', long = "type", value_enum, default_value_t = DumpType::Cfg)]
    pub dump_type: DumpType,

    #[arg(short = 'f', long = "format", value_enum, default_value_t = DumpFormat::Text)]
    pub format: DumpFormat,

    /// Decode a freeze string, or a file containing one, and dump it.
    #[arg(long)]
    pub unfreeze: Option<String>,
}

#[derive(Args, Debug)]
pub struct CacheArgs {
    /// The site file to (re)write the habcache for.
    pub site_file: PathBuf,

    /// Remove the habcache instead of writing it.
    #[arg(long)]
    pub no_cache: bool,
}

#[derive(Args, Debug, Default)]
pub struct SetUriArgs {
    /// The URI to save. Prints the current saved URI when omitted.
    pub uri: Option<String>,
}
