// src/system/executor.rs

use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::process::{Command as StdCommand, Stdio};

use thiserror::Error;
use uuid::Uuid;

use crate::constants::{HAB_FREEZE_ENV, HAB_RANDOM_ENV, HAB_URI_ENV};
use crate::core::platform;
use crate::models::{AliasCmd, FlatConfig};
use crate::system::renderer::{self, RenderError};

#[derive(Error, Debug)]
pub enum ExecutionError {
    #[error("Filesystem Error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Alias '{0}' is not defined for this URI.")]
    UnknownAlias(String),
    #[error("Alias '{0}' has a command that could not be parsed.")]
    CommandParse(String),
    #[error("Alias '{0}' has an empty command.")]
    EmptyCommand(String),
    #[error("Command '{0}' could not be executed: {1}")]
    CommandFailed(String, std::io::Error),
    #[error(transparent)]
    Render(#[from] RenderError),
}

type ExecutionResult<T> = Result<T, ExecutionError>;

/// Launches an alias with the resolved environment applied and returns the
/// child's exit code.
///
/// stdin/stdout/stderr are inherited; hab does not supervise the child
/// beyond waiting for it and forwarding its exit code.
pub fn launch(
    flat: &FlatConfig,
    alias_name: &str,
    args: &[String],
    freeze: Option<&str>,
) -> ExecutionResult<i32> {
    let current = platform::current();
    let rendered = renderer::iter_aliases(flat, current)?;
    let alias = rendered
        .iter()
        .find(|a| a.name == alias_name)
        .ok_or_else(|| ExecutionError::UnknownAlias(alias_name.to_string()))?;

    let mut argv = match &alias.cmd {
        AliasCmd::Single(line) => shlex::split(line)
            .ok_or_else(|| ExecutionError::CommandParse(alias_name.to_string()))?,
        AliasCmd::Argv(argv) => argv.clone(),
    };
    if argv.is_empty() {
        return Err(ExecutionError::EmptyCommand(alias_name.to_string()));
    }
    argv.extend(args.iter().cloned());

    let env_vars = launch_environment(env::vars().collect(), flat, &alias.scoped_env, freeze);
    let program = argv[0].clone();
    let program_args = &argv[1..];

    log::debug!("Launching '{}' via alias '{}'.", program, alias_name);
    let mut command = StdCommand::new(&program);
    command
        .args(program_args)
        .env_clear()
        .envs(&env_vars)
        .stdin(Stdio::inherit())
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit());

    // Windows built-ins like `echo` only exist inside cmd.exe.
    let mut child = match command.spawn() {
        Ok(child) => child,
        Err(e) if e.kind() == ErrorKind::NotFound && cfg!(target_os = "windows") => {
            log::debug!("Command '{}' not found. Retrying with cmd /C.", program);
            let mut fallback = StdCommand::new("cmd");
            fallback
                .arg("/C")
                .args(&argv)
                .env_clear()
                .envs(&env_vars)
                .stdin(Stdio::inherit())
                .stdout(Stdio::inherit())
                .stderr(Stdio::inherit());
            fallback
                .spawn()
                .map_err(|e| ExecutionError::CommandFailed(program.clone(), e))?
        }
        Err(e) => return Err(ExecutionError::CommandFailed(program.clone(), e)),
    };

    let status = child.wait()?;
    Ok(status.code().unwrap_or(1))
}

/// The process environment for a launch: the parent's variables overlaid
/// with the resolved environment (empty string removes), the alias's scoped
/// block, and the reserved hab variables.
fn launch_environment(
    base: BTreeMap<String, String>,
    flat: &FlatConfig,
    scoped: &BTreeMap<String, String>,
    freeze: Option<&str>,
) -> BTreeMap<String, String> {
    let mut env_vars = base;
    for (name, value) in flat.environment.iter().chain(scoped.iter()) {
        if value.is_empty() {
            env_vars.remove(name);
        } else {
            env_vars.insert(name.clone(), value.clone());
        }
    }
    env_vars.insert(HAB_URI_ENV.to_string(), flat.uri_requested.clone());
    if let Some(freeze) = freeze {
        env_vars.insert(HAB_FREEZE_ENV.to_string(), freeze.to_string());
    }
    env_vars
}

/// Allocates this invocation's scratch directory for generated scripts.
///
/// The naming strategy follows `HAB_RANDOM`: `fast` uses the tempfile
/// default, `safe` a cryptographic UUID, and anything else is run as a
/// command whose output names the directory. Only the windows batch wrapper
/// needs more than `fast`; its built-in %RANDOM% is too weak when a farm
/// starts many habs in the same second.
pub fn scratch_dir() -> ExecutionResult<PathBuf> {
    let strategy = env::var(HAB_RANDOM_ENV).unwrap_or_default();
    let dir = match strategy.as_str() {
        "" | "fast" => tempfile::Builder::new()
            .prefix("hab-")
            .tempdir()?
            .keep(),
        "safe" => {
            let dir = env::temp_dir().join(format!("hab-{}", Uuid::new_v4()));
            fs::create_dir_all(&dir)?;
            dir
        }
        command => {
            let name = name_from_command(command)?;
            let dir = env::temp_dir().join(format!("hab-{}", name));
            fs::create_dir_all(&dir)?;
            dir
        }
    };
    log::debug!("Using scratch directory '{}'.", dir.display());
    Ok(dir)
}

fn name_from_command(command: &str) -> ExecutionResult<String> {
    let parts = shlex::split(command)
        .ok_or_else(|| ExecutionError::CommandParse(command.to_string()))?;
    let Some((program, args)) = parts.split_first() else {
        return Err(ExecutionError::EmptyCommand(command.to_string()));
    };
    let output = StdCommand::new(program)
        .args(args)
        .stdin(Stdio::null())
        .output()
        .map_err(|e| ExecutionError::CommandFailed(command.to_string(), e))?;
    let name = String::from_utf8_lossy(&output.stdout).trim().to_string();
    if name.is_empty() {
        return Err(ExecutionError::EmptyCommand(command.to_string()));
    }
    Ok(name)
}
