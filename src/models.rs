// src/models.rs

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use pep440_rs::Version;
use serde::de::Error as DeError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};

// =========================================================================
// === 1. JSON CONFIGURATION MODELS (User-Facing)
// =========================================================================
// These types define the flexible syntax a user can write in a `.hab.json`
// file. Flexible forms are normalized during deserialization; the rest of
// the engine only ever sees the canonical shapes.

/// One or many strings. Most list-valued keys accept both forms.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
#[serde(untagged)]
pub enum StringOrList {
    Single(String),
    List(Vec<String>),
}

impl StringOrList {
    pub fn as_vec(&self) -> Vec<String> {
        match self {
            Self::Single(s) => vec![s.clone()],
            Self::List(l) => l.clone(),
        }
    }
}

/// The four environment operations of one scope, in canonical flat form.
#[derive(Deserialize, Serialize, Debug, Clone, Default, PartialEq)]
pub struct EnvironmentOps {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unset: Option<StringOrList>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub set: BTreeMap<String, StringOrList>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub prepend: BTreeMap<String, StringOrList>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub append: BTreeMap<String, StringOrList>,
}

impl EnvironmentOps {
    pub fn unset_names(&self) -> Vec<String> {
        self.unset.as_ref().map(StringOrList::as_vec).unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.unset.is_none()
            && self.set.is_empty()
            && self.prepend.is_empty()
            && self.append.is_empty()
    }
}

/// An environment block: either one flat operations dict, or one dict per
/// platform behind an `os_specific` marker.
#[derive(Debug, Clone, PartialEq)]
pub enum Environment {
    Flat(EnvironmentOps),
    OsSpecific(BTreeMap<String, EnvironmentOps>),
}

impl Environment {
    /// The operations that apply on the named platform, if any.
    pub fn for_platform(&self, platform: &str) -> Option<&EnvironmentOps> {
        match self {
            Self::Flat(ops) => Some(ops),
            Self::OsSpecific(map) => map.get(platform),
        }
    }
}

impl<'de> Deserialize<'de> for Environment {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let mut map = Map::deserialize(deserializer)?;
        let os_specific = matches!(map.remove("os_specific"), Some(Value::Bool(true)));
        if os_specific {
            let mut per_platform = BTreeMap::new();
            for (platform, ops) in map {
                let ops: EnvironmentOps =
                    serde_json::from_value(ops).map_err(DeError::custom)?;
                per_platform.insert(platform, ops);
            }
            Ok(Self::OsSpecific(per_platform))
        } else {
            let ops: EnvironmentOps =
                serde_json::from_value(Value::Object(map)).map_err(DeError::custom)?;
            Ok(Self::Flat(ops))
        }
    }
}

impl Serialize for Environment {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            Self::Flat(ops) => ops.serialize(serializer),
            Self::OsSpecific(map) => {
                let mut out = Map::new();
                out.insert("os_specific".to_string(), Value::Bool(true));
                for (platform, ops) in map {
                    let value =
                        serde_json::to_value(ops).map_err(serde::ser::Error::custom)?;
                    out.insert(platform.clone(), value);
                }
                out.serialize(serializer)
            }
        }
    }
}

/// The command of an alias: one shell string, or a pre-split argv.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
#[serde(untagged)]
pub enum AliasCmd {
    Single(String),
    Argv(Vec<String>),
}

/// A normalized alias entry.
///
/// The JSON forms `"cmd"`, `["cmd", "arg"]` and `{"cmd": ..., ...}` all
/// deserialize into this struct. Keys the engine does not understand (icon,
/// label, launcher hints) are preserved in `extra` for plugins.
#[derive(Debug, Clone, PartialEq)]
pub struct AliasEntry {
    pub cmd: AliasCmd,
    pub environment: Option<Environment>,
    /// `(name, version)` of the distro that defined the alias. Injected by
    /// the loader, never read from user JSON directly.
    pub distro: Option<(String, Version)>,
    pub extra: Map<String, Value>,
}

impl AliasEntry {
    pub fn from_cmd(cmd: AliasCmd) -> Self {
        Self {
            cmd,
            environment: None,
            distro: None,
            extra: Map::new(),
        }
    }
}

impl<'de> Deserialize<'de> for AliasEntry {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = Value::deserialize(deserializer)?;
        match value {
            Value::String(s) => Ok(Self::from_cmd(AliasCmd::Single(s))),
            Value::Array(_) => {
                let argv: Vec<String> =
                    serde_json::from_value(value).map_err(DeError::custom)?;
                Ok(Self::from_cmd(AliasCmd::Argv(argv)))
            }
            Value::Object(mut map) => {
                let cmd = map
                    .remove("cmd")
                    .ok_or_else(|| DeError::custom("alias entry is missing \"cmd\""))?;
                let cmd: AliasCmd = serde_json::from_value(cmd).map_err(DeError::custom)?;
                let environment = match map.remove("environment") {
                    Some(env) => {
                        Some(serde_json::from_value::<Environment>(env).map_err(DeError::custom)?)
                    }
                    None => None,
                };
                let distro = match map.remove("distro") {
                    Some(pair) => Some(parse_distro_pair(&pair).map_err(DeError::custom)?),
                    None => None,
                };
                Ok(Self {
                    cmd,
                    environment,
                    distro,
                    extra: map,
                })
            }
            other => Err(DeError::custom(format!(
                "alias entry must be a string, list or dict, got {}",
                other
            ))),
        }
    }
}

impl Serialize for AliasEntry {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut map = Map::new();
        let cmd = serde_json::to_value(&self.cmd).map_err(serde::ser::Error::custom)?;
        map.insert("cmd".to_string(), cmd);
        if let Some(environment) = &self.environment {
            let value = serde_json::to_value(environment).map_err(serde::ser::Error::custom)?;
            map.insert("environment".to_string(), value);
        }
        if let Some((name, version)) = &self.distro {
            map.insert(
                "distro".to_string(),
                Value::Array(vec![
                    Value::String(name.clone()),
                    Value::String(version.to_string()),
                ]),
            );
        }
        for (key, value) in &self.extra {
            map.insert(key.clone(), value.clone());
        }
        map.serialize(serializer)
    }
}

fn parse_distro_pair(value: &Value) -> Result<(String, Version), String> {
    let pair = value
        .as_array()
        .filter(|a| a.len() == 2)
        .ok_or_else(|| "\"distro\" must be a [name, version] pair".to_string())?;
    let name = pair[0]
        .as_str()
        .ok_or_else(|| "distro name must be a string".to_string())?;
    let version = pair[1]
        .as_str()
        .ok_or_else(|| "distro version must be a string".to_string())?;
    let version: Version = version
        .parse()
        .map_err(|err| format!("invalid distro version \"{}\": {}", version, err))?;
    Ok((name.to_string(), version))
}

/// One `[alias_name, spec]` pair as written in a distro's `aliases` table.
#[derive(Debug, Clone, PartialEq)]
pub struct AliasDef {
    pub name: String,
    pub entry: AliasEntry,
}

impl<'de> Deserialize<'de> for AliasDef {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let mut parts = Vec::<Value>::deserialize(deserializer)?;
        if parts.len() != 2 {
            return Err(DeError::custom(
                "alias definition must be an [name, spec] pair",
            ));
        }
        let entry = parts.pop().map(|v| serde_json::from_value::<AliasEntry>(v));
        let name = parts.pop().and_then(|v| v.as_str().map(str::to_string));
        match (name, entry) {
            (Some(name), Some(Ok(entry))) => Ok(Self { name, entry }),
            (None, _) => Err(DeError::custom("alias name must be a string")),
            (_, Some(Err(err))) => Err(DeError::custom(err)),
            _ => Err(DeError::custom("malformed alias definition")),
        }
    }
}

impl Serialize for AliasDef {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let entry = serde_json::to_value(&self.entry).map_err(serde::ser::Error::custom)?;
        vec![Value::String(self.name.clone()), entry].serialize(serializer)
    }
}

/// An optional distro: `[description]` or `[description, default_on]`.
#[derive(Debug, Clone, PartialEq)]
pub struct OptionalDistro {
    pub description: String,
    pub default_on: bool,
}

impl<'de> Deserialize<'de> for OptionalDistro {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let parts = Vec::<Value>::deserialize(deserializer)?;
        let description = parts
            .first()
            .and_then(Value::as_str)
            .ok_or_else(|| DeError::custom("optional distro entry needs a description"))?
            .to_string();
        let default_on = parts.get(1).and_then(Value::as_bool).unwrap_or(false);
        Ok(Self {
            description,
            default_on,
        })
    }
}

impl Serialize for OptionalDistro {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut parts = vec![Value::String(self.description.clone())];
        if self.default_on {
            parts.push(Value::Bool(true));
        }
        parts.serialize(serializer)
    }
}

/// Per-URI overrides of which distro names resolve as empty stubs.
#[derive(Deserialize, Serialize, Debug, Clone, Default, PartialEq)]
pub struct StubDistros {
    #[serde(default)]
    pub set: Vec<String>,
    #[serde(default)]
    pub unset: Vec<String>,
}

/// A partial alias override. Only the environment block is mergeable.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct AliasMod {
    pub environment: Environment,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

// =========================================================================
// === 2. FOREST NODES
// =========================================================================

/// A config document, keyed by its URI (`context + [name]`).
#[derive(Deserialize, Debug, Clone)]
pub struct ConfigNode {
    pub name: String,
    #[serde(default)]
    pub context: Vec<String>,
    #[serde(default)]
    pub inherits: Option<bool>,
    #[serde(default)]
    pub distros: Option<Vec<String>>,
    #[serde(default)]
    pub optional_distros: Option<BTreeMap<String, OptionalDistro>>,
    #[serde(default)]
    pub stub_distros: Option<StubDistros>,
    #[serde(default)]
    pub environment: Option<Environment>,
    #[serde(default)]
    pub alias_mods: Option<BTreeMap<String, AliasMod>>,
    #[serde(default)]
    pub min_verbosity: Option<BTreeMap<String, i32>>,
    #[serde(default)]
    pub variables: Option<BTreeMap<String, String>>,
    /// Plugin payload: keys the engine ignores but carries along.
    #[serde(flatten)]
    pub extra: Map<String, Value>,

    /// Source file, injected by the loader.
    #[serde(skip)]
    pub filename: PathBuf,
    /// Load-time resolve failure, surfaced only when this URI is requested.
    #[serde(skip)]
    pub error: Option<String>,
}

impl ConfigNode {
    /// The URI string this node answers to.
    pub fn uri(&self) -> String {
        let mut parts = self.context.clone();
        parts.push(self.name.clone());
        parts.join("/")
    }

    /// Directory `{relative_root}` expands to for values of this node.
    pub fn relative_root(&self) -> &Path {
        self.filename.parent().unwrap_or_else(|| Path::new("."))
    }
}

/// A distro document, keyed by `(name, version)`.
#[derive(Deserialize, Debug, Clone)]
pub struct DistroNode {
    pub name: String,
    /// The version as written in the JSON, when present. The loader resolves
    /// the effective version (field, sidecar file, directory name, SCM).
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub distros: Option<Vec<String>>,
    #[serde(default)]
    pub environment: Option<Environment>,
    /// Platform name to the ordered alias definitions for that platform.
    #[serde(default)]
    pub aliases: Option<BTreeMap<String, Vec<AliasDef>>>,
    #[serde(default)]
    pub alias_mods: Option<BTreeMap<String, AliasMod>>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,

    #[serde(skip)]
    pub filename: PathBuf,
    /// Effective version, injected by the loader's version provider.
    #[serde(skip)]
    pub resolved_version: Option<Version>,
}

impl DistroNode {
    pub fn relative_root(&self) -> &Path {
        self.filename.parent().unwrap_or_else(|| Path::new("."))
    }
}

// =========================================================================
// === 3. RESOLVED MODELS
// =========================================================================

/// A fully reduced, solved and composed configuration, ready to render.
///
/// Every field holds a concrete value; the `NotSet` state of raw nodes never
/// escapes the reducer.
#[derive(Debug, Clone, Default)]
pub struct FlatConfig {
    pub uri_requested: String,
    pub uri_matched: String,
    pub name: String,
    pub filename: PathBuf,
    pub inherits: bool,

    pub distros: Vec<String>,
    pub optional_distros: BTreeMap<String, OptionalDistro>,
    pub stub_distros: StubDistros,
    /// The matched node's own (unmerged) environment operations.
    pub environment_ops: Option<Environment>,
    pub alias_mods: BTreeMap<String, AliasMod>,
    pub min_verbosity: BTreeMap<String, i32>,
    pub variables: BTreeMap<String, String>,
    /// URIs (and the `default` tree nodes) that contributed a field.
    pub inherits_applied_from: Vec<String>,

    /// Selected distros in solve order.
    pub distro_versions: Vec<(String, Version)>,
    /// Resolved environment for the current platform. An empty string means
    /// the variable is unset.
    pub environment: BTreeMap<String, String>,
    /// Resolved environment per supported platform, for freezing.
    pub environments: BTreeMap<String, BTreeMap<String, String>>,
    /// Composed aliases for the current platform.
    pub aliases: BTreeMap<String, AliasEntry>,
    /// Composed aliases per supported platform, for freezing.
    pub aliases_per_platform: BTreeMap<String, BTreeMap<String, AliasEntry>>,
}

impl FlatConfig {
    pub fn relative_root(&self) -> &Path {
        self.filename.parent().unwrap_or_else(|| Path::new("."))
    }
}
