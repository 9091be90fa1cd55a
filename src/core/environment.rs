// src/core/environment.rs

use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use thiserror::Error;

use crate::constants::{PATH_ENV, RESERVED_ENV_VARS};
use crate::core::formatter::{FormatError, Formatter};
use crate::core::platform::Platform;
use crate::models::{Environment, EnvironmentOps, StringOrList};

#[derive(Error, Debug)]
pub enum ComposeError {
    #[error("\"{0}\" is a reserved environment variable")]
    ReservedEnvVar(String),
    #[error("\"PATH\" cannot be set or unset; prepend or append to it instead.")]
    PathNotReplaceable,
    #[error("set/unset of \"{name}\" after its first write (from {origin}).")]
    SetAfterFirstWrite { name: String, origin: String },
    #[error(transparent)]
    Format(#[from] FormatError),
}

type ComposeResult<T> = Result<T, ComposeError>;

/// One contributor of environment operations, in traversal order: the
/// flattened config first, then each selected distro.
pub struct EnvSource<'a> {
    /// URI or `name==version`, for error messages.
    pub origin: String,
    pub environment: &'a Environment,
    /// Directory `{relative_root}` expands to for this source's values.
    pub relative_root: &'a Path,
}

/// Per-variable composition state. A variable is owned from its first
/// operation; later operations may only extend it. When `scope` is present
/// the walk composes one alias's scoped block: first-write tracking moves
/// to the scope, and `scope` records every name the alias touched.
struct VarState {
    values: BTreeMap<String, String>,
    owned: HashSet<String>,
    path_touched: bool,
    scope: Option<HashSet<String>>,
}

impl VarState {
    /// Registers a set/unset. Returns false when the variable was already
    /// written in the active first-write scope.
    fn mark_write(&mut self, name: &str) -> bool {
        match &mut self.scope {
            Some(written) => written.insert(name.to_string()),
            None => self.owned.insert(name.to_string()),
        }
    }

    /// Registers a prepend/append touch without ownership semantics.
    fn mark_touch(&mut self, name: &str) {
        if let Some(written) = &mut self.scope {
            written.insert(name.to_string());
        }
    }
}

/// Combines `unset`/`set`/`prepend`/`append` dictionaries across the config
/// and the selected distros with first-write-wins semantics.
///
/// `inherited_path` is the shell's `PATH` when composing for the platform
/// hab is running on. For foreign platforms the composed value falls back
/// to a reference (`%PATH%`, `$PATH`) the target shell resolves itself.
pub fn compose(
    sources: &[EnvSource<'_>],
    platform: &dyn Platform,
    variables: &BTreeMap<String, String>,
    inherited_path: Option<&str>,
) -> ComposeResult<BTreeMap<String, String>> {
    let mut state = VarState {
        values: BTreeMap::new(),
        owned: HashSet::new(),
        path_touched: false,
        scope: None,
    };

    // PATH keeps its shell-inherited value as the seed; the first prepend
    // or append extends it instead of discarding it.
    let seed = inherited_path
        .map(str::to_string)
        .unwrap_or_else(|| platform.env_ref(PATH_ENV));
    state.values.insert(PATH_ENV.to_string(), seed);
    state.owned.insert(PATH_ENV.to_string());

    for source in sources {
        let Some(ops) = source.environment.for_platform(platform.name()) else {
            continue;
        };
        let formatter = Formatter::new(platform, source.relative_root, variables);
        apply_ops(&mut state, ops, &formatter, platform, &source.origin)?;
    }

    if !state.path_touched {
        state.values.remove(PATH_ENV);
    }
    Ok(state.values)
}

/// Applies one alias's scoped operations on top of an already composed
/// environment. Variables from the base environment are treated as owned
/// seeds, so a scoped prepend extends the global value, while first-write
/// tracking restarts for the alias itself.
///
/// Returns only the variables the alias touched.
pub fn compose_scoped(
    base: &BTreeMap<String, String>,
    environment: &Environment,
    platform: &dyn Platform,
    variables: &BTreeMap<String, String>,
    relative_root: &Path,
    origin: &str,
) -> ComposeResult<BTreeMap<String, String>> {
    let Some(ops) = environment.for_platform(platform.name()) else {
        return Ok(BTreeMap::new());
    };

    let mut state = VarState {
        values: base.clone(),
        owned: base.keys().cloned().collect(),
        path_touched: false,
        scope: Some(HashSet::new()),
    };
    // A scoped prepend to an untouched PATH still extends the live value.
    if !state.values.contains_key(PATH_ENV) {
        state
            .values
            .insert(PATH_ENV.to_string(), platform.env_ref(PATH_ENV));
        state.owned.insert(PATH_ENV.to_string());
    }

    let formatter = Formatter::new(platform, relative_root, variables);
    apply_ops(&mut state, ops, &formatter, platform, origin)?;

    let touched = state.scope.take().unwrap_or_default();
    let mut values = state.values;
    values.retain(|name, _| touched.contains(name));
    Ok(values)
}

fn apply_ops(
    state: &mut VarState,
    ops: &EnvironmentOps,
    formatter: &Formatter<'_>,
    platform: &dyn Platform,
    origin: &str,
) -> ComposeResult<()> {
    for name in ops.unset_names() {
        check_reserved(&name)?;
        if name == PATH_ENV {
            return Err(ComposeError::PathNotReplaceable);
        }
        if !state.mark_write(&name) {
            return Err(ComposeError::SetAfterFirstWrite {
                name,
                origin: origin.to_string(),
            });
        }
        // An empty value renders as an unset.
        state.values.insert(name, String::new());
    }

    for (name, value) in &ops.set {
        check_reserved(name)?;
        if name == PATH_ENV {
            return Err(ComposeError::PathNotReplaceable);
        }
        if !state.mark_write(name) {
            return Err(ComposeError::SetAfterFirstWrite {
                name: name.clone(),
                origin: origin.to_string(),
            });
        }
        state
            .values
            .insert(name.clone(), join_values(value, formatter, platform)?);
    }

    for (name, value) in &ops.prepend {
        extend(state, name, value, formatter, platform, true)?;
    }
    for (name, value) in &ops.append {
        extend(state, name, value, formatter, platform, false)?;
    }

    Ok(())
}

fn extend(
    state: &mut VarState,
    name: &str,
    value: &StringOrList,
    formatter: &Formatter<'_>,
    platform: &dyn Platform,
    front: bool,
) -> ComposeResult<()> {
    check_reserved(name)?;
    if name == PATH_ENV {
        state.path_touched = true;
    }
    state.mark_touch(name);

    let addition = join_values(value, formatter, platform)?;
    let sep = platform.list_sep();
    let first_write = state.owned.insert(name.to_string());
    let entry = state.values.entry(name.to_string()).or_default();

    if first_write || entry.is_empty() {
        // The first prepend or append owns the variable; any inherited
        // shell value is discarded.
        *entry = addition;
    } else if front {
        *entry = format!("{}{}{}", addition, sep, entry);
    } else {
        *entry = format!("{}{}{}", entry, sep, addition);
    }
    Ok(())
}

fn join_values(
    value: &StringOrList,
    formatter: &Formatter<'_>,
    platform: &dyn Platform,
) -> ComposeResult<String> {
    let parts = value.as_vec();
    let mut formatted = Vec::with_capacity(parts.len());
    for part in parts {
        formatted.push(formatter.format(&part)?);
    }
    Ok(formatted.join(platform.list_sep()))
}

fn check_reserved(name: &str) -> ComposeResult<()> {
    if RESERVED_ENV_VARS.contains(&name) {
        return Err(ComposeError::ReservedEnvVar(name.to_string()));
    }
    Ok(())
}
