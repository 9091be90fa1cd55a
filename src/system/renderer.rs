// src/system/renderer.rs

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use thiserror::Error;

use crate::constants::{HAB_FREEZE_ENV, HAB_URI_ENV};
use crate::core::environment::{self, ComposeError};
use crate::core::platform::Platform;
use crate::models::{AliasCmd, FlatConfig};

#[derive(Error, Debug)]
pub enum RenderError {
    #[error("Filesystem Error: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Compose(#[from] ComposeError),
    #[error("Unknown script extension '{0}'. Known: sh, ps1, bat, cmd.")]
    UnknownExtension(String),
}

type RenderResult<T> = Result<T, RenderError>;

/// The shell families hab can render scripts for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shell {
    Bash,
    PowerShell,
    Batch,
}

impl Shell {
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.trim_start_matches('.') {
            "sh" | "bash" => Some(Self::Bash),
            "ps1" => Some(Self::PowerShell),
            "bat" | "cmd" => Some(Self::Batch),
            _ => None,
        }
    }

    /// The default shell family for a platform's wrapper scripts.
    pub fn default_for(platform: &dyn Platform) -> Self {
        if platform.name() == "windows" {
            Self::PowerShell
        } else {
            Self::Bash
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            Self::Bash => "sh",
            Self::PowerShell => "ps1",
            Self::Batch => "bat",
        }
    }
}

/// One flattened environment write. Prepends and appends were folded into
/// final strings during composition; renderers only ever see set or unset.
#[derive(Debug, Clone, PartialEq)]
pub enum EnvOp {
    Set { name: String, value: String },
    Unset { name: String },
}

/// The ordered environment operations of a resolved config, including the
/// reserved `HAB_URI`/`HAB_FREEZE` writes which always come first.
pub fn iter_env_ops(flat: &FlatConfig, freeze: Option<&str>) -> Vec<EnvOp> {
    let mut ops = vec![EnvOp::Set {
        name: HAB_URI_ENV.to_string(),
        value: flat.uri_requested.clone(),
    }];
    if let Some(freeze) = freeze {
        ops.push(EnvOp::Set {
            name: HAB_FREEZE_ENV.to_string(),
            value: freeze.to_string(),
        });
    }
    for (name, value) in &flat.environment {
        if value.is_empty() {
            ops.push(EnvOp::Unset { name: name.clone() });
        } else {
            ops.push(EnvOp::Set {
                name: name.clone(),
                value: value.clone(),
            });
        }
    }
    ops
}

/// An alias ready to render: its command and the scoped environment diff
/// the wrapper must apply around the invocation.
#[derive(Debug, Clone)]
pub struct RenderedAlias {
    pub name: String,
    pub cmd: AliasCmd,
    pub scoped_env: BTreeMap<String, String>,
}

/// The ordered aliases of a resolved config for one platform, with each
/// alias's scoped environment composed against the global environment.
pub fn iter_aliases(
    flat: &FlatConfig,
    platform: &dyn Platform,
) -> RenderResult<Vec<RenderedAlias>> {
    let empty = BTreeMap::new();
    let base = flat
        .environments
        .get(platform.name())
        .unwrap_or(&empty);
    let aliases = flat
        .aliases_per_platform
        .get(platform.name())
        .unwrap_or(&flat.aliases);

    let mut out = Vec::new();
    for (name, entry) in aliases {
        let scoped_env = match &entry.environment {
            Some(environment) => environment::compose_scoped(
                base,
                environment,
                platform,
                &flat.variables,
                flat.relative_root(),
                name,
            )?,
            None => BTreeMap::new(),
        };
        out.push(RenderedAlias {
            name: name.clone(),
            cmd: entry.cmd.clone(),
            scoped_env,
        });
    }
    Ok(out)
}

/// Quotes a value so the target shell treats it as a single word.
pub fn escape(value: &str, shell: Shell) -> String {
    match shell {
        Shell::Bash => format!("'{}'", value.replace('\'', "'\\''")),
        Shell::PowerShell => format!("'{}'", value.replace('\'', "''")),
        Shell::Batch => format!("\"{}\"", value.replace('"', "\"\"")),
    }
}

/// Joins an argv into a single shell-safe command line.
pub fn join_argv(argv: &[String], shell: Shell) -> String {
    argv.iter()
        .map(|arg| escape(arg, shell))
        .collect::<Vec<_>>()
        .join(" ")
}

fn cmd_line(cmd: &AliasCmd, shell: Shell) -> String {
    match cmd {
        // A string command is already a shell line; it is trusted as-is.
        AliasCmd::Single(line) => line.clone(),
        AliasCmd::Argv(argv) => join_argv(argv, shell),
    }
}

/// Writes the environment-configuration script the wrapper sources to
/// activate the resolved environment in the current shell.
pub fn write_config_script(
    path: &Path,
    flat: &FlatConfig,
    platform: &dyn Platform,
    freeze: Option<&str>,
    shell: Shell,
) -> RenderResult<()> {
    fs::write(path, render_config(flat, platform, freeze, shell)?)?;
    log::debug!("Wrote config script '{}'.", path.display());
    Ok(())
}

/// Writes the launch script: the config body plus one alias invocation with
/// forwarded arguments. The wrapper prefers this file when it exists.
pub fn write_launch_script(
    path: &Path,
    flat: &FlatConfig,
    platform: &dyn Platform,
    freeze: Option<&str>,
    shell: Shell,
    alias: &str,
    args: &[String],
) -> RenderResult<()> {
    let mut script = render_config(flat, platform, freeze, shell)?;
    let invocation = match shell {
        Shell::Bash => format!("{} {}\nexit $?\n", alias, join_argv(args, shell)),
        Shell::PowerShell => format!("{} {}\nexit $LASTEXITCODE\n", alias, join_argv(args, shell)),
        Shell::Batch => {
            // doskey macros are unusable from inside a script, so the alias
            // command is inlined with its scoped environment applied.
            let rendered = iter_aliases(flat, platform)?;
            let mut inv = String::new();
            if let Some(target) = rendered.iter().find(|a| a.name == alias) {
                for (name, value) in &target.scoped_env {
                    inv.push_str(&format!("set \"{}={}\"\n", name, value));
                }
                inv.push_str(&format!(
                    "{} {}\nexit /b %ERRORLEVEL%\n",
                    cmd_line(&target.cmd, shell),
                    join_argv(args, shell)
                ));
            }
            inv
        }
    };
    script.push_str(&invocation);
    fs::write(path, script)?;
    log::debug!("Wrote launch script '{}'.", path.display());
    Ok(())
}

pub fn render_config(
    flat: &FlatConfig,
    platform: &dyn Platform,
    freeze: Option<&str>,
    shell: Shell,
) -> RenderResult<String> {
    let ops = iter_env_ops(flat, freeze);
    let aliases = iter_aliases(flat, platform)?;
    let mut out = String::new();

    match shell {
        Shell::Bash => {
            out.push_str("# Generated by hab. Do not edit.\n");
            for op in &ops {
                match op {
                    EnvOp::Set { name, value } => {
                        out.push_str(&format!("export {}={}\n", name, escape(value, shell)));
                    }
                    EnvOp::Unset { name } => out.push_str(&format!("unset {}\n", name)),
                }
            }
            for alias in &aliases {
                out.push_str(&render_bash_alias(alias));
            }
        }
        Shell::PowerShell => {
            out.push_str("# Generated by hab. Do not edit.\n");
            for op in &ops {
                match op {
                    EnvOp::Set { name, value } => {
                        out.push_str(&format!("$env:{} = {}\n", name, escape(value, shell)));
                    }
                    EnvOp::Unset { name } => out.push_str(&format!(
                        "Remove-Item Env:\\{} -ErrorAction SilentlyContinue\n",
                        name
                    )),
                }
            }
            for alias in &aliases {
                out.push_str(&render_powershell_alias(alias));
            }
        }
        Shell::Batch => {
            out.push_str("@echo off\nrem Generated by hab. Do not edit.\n");
            for op in &ops {
                match op {
                    EnvOp::Set { name, value } => {
                        out.push_str(&format!("set \"{}={}\"\n", name, value));
                    }
                    EnvOp::Unset { name } => out.push_str(&format!("set \"{}=\"\n", name)),
                }
            }
            for alias in &aliases {
                out.push_str(&render_batch_alias(alias));
            }
        }
    }
    Ok(out)
}

/// A bash alias becomes a function. Scoped environment rides on an `env`
/// prefix so the previous environment is fully restored when the command
/// exits, including variables the alias unsets.
fn render_bash_alias(alias: &RenderedAlias) -> String {
    let line = cmd_line(&alias.cmd, Shell::Bash);
    if alias.scoped_env.is_empty() {
        return format!("{}() {{ {} \"$@\"; }}\n", alias.name, line);
    }
    let mut prefix = String::from("env");
    for (name, value) in &alias.scoped_env {
        if value.is_empty() {
            prefix.push_str(&format!(" -u {}", name));
        } else {
            prefix.push_str(&format!(" {}={}", name, escape(value, Shell::Bash)));
        }
    }
    format!(
        "{}() {{ {} {} \"$@\"; }}\n",
        alias.name, prefix, line
    )
}

/// A powershell alias becomes a function that snapshots the variables it
/// touches, applies the scoped values, and restores the snapshot in a
/// `finally` block.
fn render_powershell_alias(alias: &RenderedAlias) -> String {
    let line = cmd_line(&alias.cmd, Shell::PowerShell);
    if alias.scoped_env.is_empty() {
        return format!(
            "function {} {{ & {} @args; exit $LASTEXITCODE }}\n",
            alias.name, line
        );
    }
    let mut body = String::new();
    body.push_str(&format!("function {} {{\n", alias.name));
    body.push_str("    $hab_saved = @{}\n");
    for (name, value) in &alias.scoped_env {
        body.push_str(&format!(
            "    $hab_saved['{0}'] = $env:{0}\n",
            name
        ));
        if value.is_empty() {
            body.push_str(&format!(
                "    Remove-Item Env:\\{} -ErrorAction SilentlyContinue\n",
                name
            ));
        } else {
            body.push_str(&format!(
                "    $env:{} = {}\n",
                name,
                escape(value, Shell::PowerShell)
            ));
        }
    }
    body.push_str(&format!("    try {{ & {} @args }}\n", line));
    body.push_str("    finally {\n");
    body.push_str("        foreach ($k in $hab_saved.Keys) {\n");
    body.push_str("            if ($null -eq $hab_saved[$k]) { Remove-Item \"Env:\\$k\" -ErrorAction SilentlyContinue }\n");
    body.push_str("            else { Set-Item \"Env:\\$k\" $hab_saved[$k] }\n");
    body.push_str("        }\n");
    body.push_str("    }\n");
    body.push_str("}\n");
    body
}

/// Batch aliases are doskey macros. Scoped environment is applied inside a
/// `cmd /c` so the caller's environment is untouched afterwards.
fn render_batch_alias(alias: &RenderedAlias) -> String {
    let line = cmd_line(&alias.cmd, Shell::Batch);
    if alias.scoped_env.is_empty() {
        return format!("doskey {}={} $*\n", alias.name, line);
    }
    let mut sets = String::new();
    for (name, value) in &alias.scoped_env {
        sets.push_str(&format!("set \"{}={}\" ^&^& ", name, value));
    }
    format!("doskey {}=cmd /c \"{}{} $*\"\n", alias.name, sets, line)
}
