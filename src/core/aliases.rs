// src/core/aliases.rs

use std::collections::BTreeMap;
use std::path::Path;

use serde_json::Value;

use crate::core::platform::Platform;
use crate::core::solver::SolvedDistro;
use crate::models::{AliasEntry, AliasMod, Environment, EnvironmentOps, StringOrList};

/// Collects the current platform's aliases from every selected distro in
/// solve order, then applies alias mods.
///
/// The first distro to define an alias name wins; later duplicates are
/// dropped. Mods merge into the alias's scoped environment: distro mods in
/// solve order first, the config's own mods last, so the config wins on
/// conflicting keys.
pub fn compose(
    platform: &dyn Platform,
    solved: &[SolvedDistro<'_>],
    config_mods: &BTreeMap<String, AliasMod>,
    config_root: &Path,
) -> BTreeMap<String, AliasEntry> {
    let mut aliases: BTreeMap<String, AliasEntry> = BTreeMap::new();

    for distro in solved {
        let Some(platform_aliases) = &distro.node.aliases else {
            continue;
        };
        let Some(defs) = platform_aliases.get(platform.name()) else {
            continue;
        };
        for def in defs {
            if aliases.contains_key(&def.name) {
                log::debug!(
                    "Dropping duplicate alias '{}' from '{}=={}'; an earlier distro owns it.",
                    def.name,
                    distro.name,
                    distro.version
                );
                continue;
            }
            let mut entry = def.entry.clone();
            entry.distro = Some((distro.name.clone(), distro.version.clone()));
            if let Some(environment) = entry.environment.take() {
                // Scoped values resolve {relative_root} against the distro
                // that declared the alias, so it is baked in here.
                entry.environment = Some(resolve_relative_root(
                    environment,
                    distro.node.relative_root(),
                ));
            }
            aliases.insert(def.name.clone(), entry);
        }
    }

    // Distro mods first, in solve order.
    for distro in solved {
        let Some(mods) = &distro.node.alias_mods else {
            continue;
        };
        for (alias_name, alias_mod) in mods {
            apply_mod(
                &mut aliases,
                platform,
                alias_name,
                alias_mod,
                distro.node.relative_root(),
            );
        }
    }
    // The config's mods apply last and win on conflicts.
    for (alias_name, alias_mod) in config_mods {
        apply_mod(&mut aliases, platform, alias_name, alias_mod, config_root);
    }

    aliases
}

/// Drops aliases whose `min_verbosity` for the target (falling back to
/// `global`) exceeds the active verbosity level.
///
/// An alias without its own `min_verbosity` table falls back to the
/// flattened config's table, so a config can hide all of its aliases
/// behind one threshold.
pub fn filter_by_verbosity(
    aliases: &mut BTreeMap<String, AliasEntry>,
    defaults: &BTreeMap<String, i32>,
    target: &str,
    level: i32,
) {
    aliases.retain(|name, entry| {
        let required = match entry.extra.get("min_verbosity").and_then(Value::as_object) {
            Some(table) => table
                .get(target)
                .or_else(|| table.get("global"))
                .and_then(Value::as_i64)
                .unwrap_or(0),
            None => i64::from(
                defaults
                    .get(target)
                    .or_else(|| defaults.get("global"))
                    .copied()
                    .unwrap_or(0),
            ),
        };
        let visible = required <= i64::from(level);
        if !visible {
            log::debug!(
                "Hiding alias '{}': min_verbosity {} exceeds active level {}.",
                name,
                required,
                level
            );
        }
        visible
    });
}

fn apply_mod(
    aliases: &mut BTreeMap<String, AliasEntry>,
    platform: &dyn Platform,
    alias_name: &str,
    alias_mod: &AliasMod,
    mod_root: &Path,
) {
    let Some(entry) = aliases.get_mut(alias_name) else {
        log::debug!("Alias mod targets unknown alias '{}'; skipped.", alias_name);
        return;
    };
    let Some(mod_ops) = alias_mod.environment.for_platform(platform.name()) else {
        return;
    };
    let mod_ops = resolve_relative_root_ops(mod_ops.clone(), mod_root);

    let mut ops = entry
        .environment
        .take()
        .and_then(|environment| environment.for_platform(platform.name()).cloned())
        .unwrap_or_default();
    merge_ops(&mut ops, &mod_ops);

    if !ops.is_empty() {
        entry.environment = Some(Environment::Flat(ops));
    }
}

/// Merges a mod's operations into an alias's existing scoped operations.
/// A later merge sits "outside" for prepends, "after" for appends, and
/// overwrites on `set`.
fn merge_ops(ops: &mut EnvironmentOps, incoming: &EnvironmentOps) {
    let mut unset = ops.unset_names();
    for name in incoming.unset_names() {
        if !unset.contains(&name) {
            unset.push(name);
        }
    }
    ops.unset = if unset.is_empty() {
        None
    } else {
        Some(StringOrList::List(unset))
    };

    for (name, value) in &incoming.set {
        ops.set.insert(name.clone(), value.clone());
    }
    for (name, value) in &incoming.prepend {
        let combined = match ops.prepend.remove(name) {
            Some(existing) => {
                let mut items = value.as_vec();
                items.extend(existing.as_vec());
                StringOrList::List(items)
            }
            None => value.clone(),
        };
        ops.prepend.insert(name.clone(), combined);
    }
    for (name, value) in &incoming.append {
        let combined = match ops.append.remove(name) {
            Some(existing) => {
                let mut items = existing.as_vec();
                items.extend(value.as_vec());
                StringOrList::List(items)
            }
            None => value.clone(),
        };
        ops.append.insert(name.clone(), combined);
    }
}

fn resolve_relative_root(environment: Environment, root: &Path) -> Environment {
    match environment {
        Environment::Flat(ops) => Environment::Flat(resolve_relative_root_ops(ops, root)),
        Environment::OsSpecific(map) => Environment::OsSpecific(
            map.into_iter()
                .map(|(platform, ops)| (platform, resolve_relative_root_ops(ops, root)))
                .collect(),
        ),
    }
}

fn resolve_relative_root_ops(mut ops: EnvironmentOps, root: &Path) -> EnvironmentOps {
    let root = dunce::simplified(root).to_string_lossy().to_string();
    let fix = |value: &mut StringOrList| match value {
        StringOrList::Single(s) => *s = s.replace("{relative_root}", &root),
        StringOrList::List(items) => {
            for item in items.iter_mut() {
                *item = item.replace("{relative_root}", &root);
            }
        }
    };
    for value in ops.set.values_mut() {
        fix(value);
    }
    for value in ops.prepend.values_mut() {
        fix(value);
    }
    for value in ops.append.values_mut() {
        fix(value);
    }
    ops
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::platform;
    use crate::models::{AliasCmd, DistroNode};
    use pretty_assertions::assert_eq;

    fn distro(raw: serde_json::Value) -> DistroNode {
        let mut node: DistroNode = serde_json::from_value(raw).unwrap();
        let version = node.version.clone().unwrap();
        node.resolved_version = Some(version.parse().unwrap());
        node
    }

    fn solved(node: &DistroNode) -> SolvedDistro<'_> {
        SolvedDistro {
            name: node.name.clone(),
            version: node.resolved_version.clone().unwrap(),
            node,
        }
    }

    #[test]
    fn test_first_distro_wins_per_alias_name() {
        let older = distro(serde_json::json!({
            "name": "houdini18.5", "version": "18.5.568",
            "aliases": {"linux": [
                ["houdini", "/opt/hfs18.5/bin/houdini"],
                ["houdini18.5", "/opt/hfs18.5/bin/houdini"]
            ]}
        }));
        let newer = distro(serde_json::json!({
            "name": "houdini19.5", "version": "19.5.493",
            "aliases": {"linux": [
                ["houdini", "/opt/hfs19.5/bin/houdini"],
                ["houdini19.5", "/opt/hfs19.5/bin/houdini"]
            ]}
        }));
        let linux = platform::from_name("linux").unwrap();
        let mods = BTreeMap::new();
        let root = Path::new("/cfg");

        // houdini18.5 listed first: the shared name points at 18.5.
        let first = [solved(&older), solved(&newer)];
        let aliases = compose(linux, &first, &mods, root);
        assert_eq!(
            aliases["houdini"].cmd,
            AliasCmd::Single("/opt/hfs18.5/bin/houdini".to_string())
        );
        // Both versioned aliases survive.
        assert!(aliases.contains_key("houdini18.5"));
        assert!(aliases.contains_key("houdini19.5"));

        // Opposite order: the shared name points at 19.5.
        let second = [solved(&newer), solved(&older)];
        let aliases = compose(linux, &second, &mods, root);
        assert_eq!(
            aliases["houdini"].cmd,
            AliasCmd::Single("/opt/hfs19.5/bin/houdini".to_string())
        );
    }

    #[test]
    fn test_distro_provenance_injected() {
        let node = distro(serde_json::json!({
            "name": "aliased", "version": "2.0",
            "aliases": {"linux": [["as_str", "python"]]}
        }));
        let linux = platform::from_name("linux").unwrap();
        let aliases = compose(linux, &[solved(&node)], &BTreeMap::new(), Path::new("/cfg"));
        let (name, version) = aliases["as_str"].distro.clone().unwrap();
        assert_eq!(name, "aliased");
        assert_eq!(version.to_string(), "2.0");
    }

    #[test]
    fn test_platform_selection() {
        let node = distro(serde_json::json!({
            "name": "tool", "version": "1.0",
            "aliases": {
                "windows": [["tool", "tool.exe"]],
                "linux": [["tool", "tool"]]
            }
        }));
        let windows = platform::from_name("windows").unwrap();
        let aliases = compose(
            windows,
            &[solved(&node)],
            &BTreeMap::new(),
            Path::new("/cfg"),
        );
        assert_eq!(aliases["tool"].cmd, AliasCmd::Single("tool.exe".to_string()));
    }

    #[test]
    fn test_config_mods_apply_after_distro_mods() {
        let node = distro(serde_json::json!({
            "name": "aliased", "version": "2.0",
            "aliases": {"linux": [["as_dict", {"cmd": "python"}]]},
            "alias_mods": {
                "as_dict": {"environment": {"set": {"WHO": "distro"}, "prepend": {"CHAIN": "distro"}}}
            }
        }));
        let mut config_mods = BTreeMap::new();
        config_mods.insert(
            "as_dict".to_string(),
            serde_json::from_value::<AliasMod>(serde_json::json!({
                "environment": {"set": {"WHO": "config"}, "prepend": {"CHAIN": "config"}}
            }))
            .unwrap(),
        );
        let linux = platform::from_name("linux").unwrap();
        let aliases = compose(linux, &[solved(&node)], &config_mods, Path::new("/cfg"));
        let ops = aliases["as_dict"]
            .environment
            .as_ref()
            .unwrap()
            .for_platform("linux")
            .unwrap();
        // The config's set wins; its prepend lands outermost.
        assert_eq!(ops.set["WHO"], StringOrList::Single("config".to_string()));
        assert_eq!(
            ops.prepend["CHAIN"],
            StringOrList::List(vec!["config".to_string(), "distro".to_string()])
        );
    }

    #[test]
    fn test_mod_for_unknown_alias_is_ignored() {
        let node = distro(serde_json::json!({
            "name": "aliased", "version": "2.0",
            "aliases": {"linux": [["as_str", "python"]]}
        }));
        let mut config_mods = BTreeMap::new();
        config_mods.insert(
            "missing".to_string(),
            serde_json::from_value::<AliasMod>(serde_json::json!({
                "environment": {"set": {"X": "1"}}
            }))
            .unwrap(),
        );
        let linux = platform::from_name("linux").unwrap();
        let aliases = compose(linux, &[solved(&node)], &config_mods, Path::new("/cfg"));
        assert!(aliases["as_str"].environment.is_none());
    }

    #[test]
    fn test_scoped_relative_root_resolves_to_distro_dir() {
        let mut node = distro(serde_json::json!({
            "name": "aliased", "version": "2.0",
            "aliases": {"linux": [[
                "as_dict",
                {"cmd": "python", "environment": {"prepend": {"TOOLS": "{relative_root}/bin"}}}
            ]]}
        }));
        node.filename = std::path::PathBuf::from("/distros/aliased/2.0/.hab.json");
        let linux = platform::from_name("linux").unwrap();
        let aliases = compose(linux, &[solved(&node)], &BTreeMap::new(), Path::new("/cfg"));
        let ops = aliases["as_dict"]
            .environment
            .as_ref()
            .unwrap()
            .for_platform("linux")
            .unwrap();
        assert_eq!(
            ops.prepend["TOOLS"],
            StringOrList::Single("/distros/aliased/2.0/bin".to_string())
        );
    }

    #[test]
    fn test_verbosity_filter_drops_hidden_aliases() {
        let node = distro(serde_json::json!({
            "name": "tool", "version": "1.0",
            "aliases": {"linux": [
                ["always", "tool"],
                ["debuggy", {"cmd": "tool-debug", "min_verbosity": {"hab": 2}}],
                ["gui_only", {"cmd": "tool-gui", "min_verbosity": {"global": 1, "hab-gui": 0}}]
            ]}
        }));
        let linux = platform::from_name("linux").unwrap();
        let mut aliases = compose(linux, &[solved(&node)], &BTreeMap::new(), Path::new("/cfg"));
        let defaults = BTreeMap::new();

        let mut for_cli = aliases.clone();
        filter_by_verbosity(&mut for_cli, &defaults, "hab", 0);
        assert!(for_cli.contains_key("always"));
        assert!(!for_cli.contains_key("debuggy"));
        // Falls back to "global" when the target has no entry.
        assert!(!for_cli.contains_key("gui_only"));

        filter_by_verbosity(&mut aliases, &defaults, "hab", 2);
        assert!(aliases.contains_key("debuggy"));
    }

    #[test]
    fn test_verbosity_filter_uses_config_table_as_default() {
        let node = distro(serde_json::json!({
            "name": "tool", "version": "1.0",
            "aliases": {"linux": [
                ["plain", "tool"],
                ["shown", {"cmd": "tool-show", "min_verbosity": {"hab": 0}}]
            ]}
        }));
        let linux = platform::from_name("linux").unwrap();
        let aliases = compose(linux, &[solved(&node)], &BTreeMap::new(), Path::new("/cfg"));

        // The config hides everything below -v; an alias carrying its own
        // table is unaffected by the default.
        let mut defaults = BTreeMap::new();
        defaults.insert("hab".to_string(), 1);

        let mut filtered = aliases.clone();
        filter_by_verbosity(&mut filtered, &defaults, "hab", 0);
        assert!(!filtered.contains_key("plain"));
        assert!(filtered.contains_key("shown"));

        let mut filtered = aliases;
        filter_by_verbosity(&mut filtered, &defaults, "hab", 1);
        assert!(filtered.contains_key("plain"));
    }
}
