// src/cli/handlers/env.rs

use anyhow::{Context, Result};
use std::fs;
use std::path::PathBuf;

use crate::cli::args::EnvArgs;
use crate::cli::handlers::commons;
use crate::cli::Cli;
use crate::constants::{CONFIG_SCRIPT_NAME, LAUNCH_SCRIPT_NAME};
use crate::core::platform;
use crate::system::executor;
use crate::system::renderer::{self, RenderError, Shell};

/// `hab env <URI>`: resolve the URI and write the scripts a wrapper sources
/// to spawn a configured sub-shell.
pub fn handle(cli: &Cli, args: &EnvArgs) -> Result<i32> {
    let site = commons::load_site(cli)?;
    let forests = commons::load_forests(&site)?;
    let uri = commons::expand_uri(cli, &site, &args.uri)?;
    let flat = commons::resolve_flat(cli, &site, &forests, &uri)?;
    let frozen = commons::encode_freeze(&flat, &site)?;

    let current = platform::current();
    let shell = shell_for(args.script_ext.as_deref())?;
    let dir = script_dir(args.script_dir.clone())?;

    let config_path = dir.join(format!("{}.{}", CONFIG_SCRIPT_NAME, shell.extension()));
    renderer::write_config_script(&config_path, &flat, current, Some(&frozen), shell)?;

    let mut written = vec![config_path];
    if let Some(alias) = &args.launch {
        let launch_path = dir.join(format!("{}.{}", LAUNCH_SCRIPT_NAME, shell.extension()));
        renderer::write_launch_script(
            &launch_path,
            &flat,
            current,
            Some(&frozen),
            shell,
            alias,
            &[],
        )?;
        written.push(launch_path);
    }

    if args.dump_scripts {
        for path in &written {
            let body = fs::read_to_string(path)
                .with_context(|| format!("Could not re-read '{}'", path.display()))?;
            println!("# --- {} ---\n{}", path.display(), body);
        }
    } else {
        println!("{}", commons::summarize(&flat));
        for path in &written {
            log::info!("Wrote '{}'.", path.display());
        }
    }
    Ok(0)
}

pub(crate) fn shell_for(ext: Option<&str>) -> Result<Shell, RenderError> {
    match ext {
        Some(ext) => {
            Shell::from_extension(ext).ok_or_else(|| RenderError::UnknownExtension(ext.to_string()))
        }
        None => Ok(Shell::default_for(platform::current())),
    }
}

pub(crate) fn script_dir(requested: Option<PathBuf>) -> Result<PathBuf> {
    match requested {
        Some(dir) => {
            if !dir.exists() {
                fs::create_dir_all(&dir)
                    .with_context(|| format!("Could not create '{}'", dir.display()))?;
            }
            Ok(dir)
        }
        None => Ok(executor::scratch_dir()?),
    }
}
