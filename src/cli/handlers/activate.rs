// src/cli/handlers/activate.rs

use anyhow::{Context, Result};
use std::fs;

use crate::cli::args::ActivateArgs;
use crate::cli::handlers::{commons, env};
use crate::cli::Cli;
use crate::constants::CONFIG_SCRIPT_NAME;
use crate::core::platform;
use crate::system::renderer;

/// `hab activate <URI>`: write the script that applies the resolved
/// environment to the caller's current shell.
pub fn handle(cli: &Cli, args: &ActivateArgs) -> Result<i32> {
    let site = commons::load_site(cli)?;
    let forests = commons::load_forests(&site)?;
    let uri = commons::expand_uri(cli, &site, &args.uri)?;
    let flat = commons::resolve_flat(cli, &site, &forests, &uri)?;
    let frozen = commons::encode_freeze(&flat, &site)?;

    let current = platform::current();
    let shell = env::shell_for(args.script_ext.as_deref())?;
    let dir = env::script_dir(args.script_dir.clone())?;

    let config_path = dir.join(format!("{}.{}", CONFIG_SCRIPT_NAME, shell.extension()));
    renderer::write_config_script(&config_path, &flat, current, Some(&frozen), shell)?;

    if args.dump_scripts {
        let body = fs::read_to_string(&config_path)
            .with_context(|| format!("Could not re-read '{}'", config_path.display()))?;
        println!("# --- {} ---\n{}", config_path.display(), body);
    } else {
        println!("{}", commons::summarize(&flat));
        log::info!("Wrote '{}'.", config_path.display());
    }
    Ok(0)
}
