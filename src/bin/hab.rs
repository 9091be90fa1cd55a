// src/bin/hab.rs

use anyhow::Result;
use clap::Parser;
use colored::Colorize;
use log::LevelFilter;
use std::fs;

use hab::cli::handlers::{self, commons};
use hab::cli::{Cli, Commands};

/// The main entry point of the application.
///
/// One invocation loads the site, builds (or reads) the forests, resolves
/// a URI, and either writes scripts or launches a program. There is no
/// server loop; process exit is the only teardown.
fn main() {
    let cli = Cli::parse();
    init_logging(&cli);
    log::debug!("CLI args parsed: {:?}", cli);

    let code = match run(&cli) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{}: {:#}", "Error".red().bold(), e);
            commons::exit_code_for(&e)
        }
    };
    std::process::exit(code);
}

/// Routes the parsed subcommand to its handler. Every handler returns the
/// process exit code; `launch` forwards the child's code unchanged.
fn run(cli: &Cli) -> Result<i32> {
    match &cli.command {
        Commands::Env(args) => handlers::env::handle(cli, args),
        Commands::Activate(args) => handlers::activate::handle(cli, args),
        Commands::Launch(args) => handlers::launch::handle(cli, args),
        Commands::Dump(args) => handlers::dump::handle(cli, args),
        Commands::Cache(args) => handlers::cache::handle(cli, args),
        Commands::SetUri(args) => handlers::set_uri::handle(cli, args),
    }
}

/// `-v` raises the level to info, `-vv` to debug. `--logging-config` points
/// at a file holding an env_logger filter spec (e.g. `hab=trace`), which
/// wins over the flags.
fn init_logging(cli: &Cli) {
    let level = match cli.verbosity {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        _ => LevelFilter::Debug,
    };
    let mut builder = env_logger::Builder::new();
    builder.filter_level(level);
    if let Some(path) = &cli.logging_config {
        match fs::read_to_string(path) {
            Ok(filters) => {
                builder.parse_filters(filters.trim());
            }
            Err(e) => eprintln!(
                "{}: could not read logging config '{}': {}",
                "Warning".yellow(),
                path.display(),
                e
            ),
        }
    }
    builder.parse_default_env();
    builder.init();
}
