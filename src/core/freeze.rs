// src/core/freeze.rs

use std::collections::BTreeMap;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::constants::DEFAULT_FREEZE_VERSION;
use crate::core::site::Site;
use crate::models::{AliasEntry, FlatConfig};

#[derive(Error, Debug)]
pub enum FreezeError {
    #[error("Freeze string is missing its 'vN:' version prefix.")]
    MissingPrefix,
    #[error("Freeze payload is not valid base64: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("Freeze payload failed to decompress: {0}")]
    Decompress(#[from] lz4_flex::block::DecompressError),
    #[error("Freeze payload is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

type FreezeResult<T> = Result<T, FreezeError>;

/// A self-contained snapshot of a resolved config for every supported
/// platform, built to round-trip losslessly through [`encode`]/[`decode`].
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Freeze {
    pub version: u32,
    pub uri: String,
    pub name: String,
    /// Selected distros in solve order, versions as strings.
    pub versions: Vec<(String, String)>,
    /// Platform name to resolved environment.
    pub environment: BTreeMap<String, BTreeMap<String, String>>,
    /// Platform name to composed aliases.
    pub aliases: BTreeMap<String, BTreeMap<String, AliasEntry>>,
}

impl Freeze {
    pub fn from_flat(flat: &FlatConfig, site: &Site) -> Self {
        Self {
            version: site.freeze_version.unwrap_or(DEFAULT_FREEZE_VERSION),
            uri: flat.uri_requested.clone(),
            name: flat.name.clone(),
            versions: flat
                .distro_versions
                .iter()
                .map(|(name, version)| (name.clone(), version.to_string()))
                .collect(),
            environment: flat.environments.clone(),
            aliases: flat.aliases_per_platform.clone(),
        }
    }
}

/// Encodes a freeze as an opaque `vN:<base64>` string.
///
/// Paths under a `platform_path_maps` root are replaced with a reversible
/// `{mapping-name}` sigil before compression, per platform section, so a
/// freeze written on one platform rehydrates with correct roots on another.
pub fn encode(freeze: &Freeze, site: &Site) -> FreezeResult<String> {
    let mut value = serde_json::to_value(freeze)?;
    map_platform_strings(&mut value, &|text, platform| {
        compress_path(text, platform, site)
    });
    let payload = serde_json::to_vec(&value)?;
    let compressed = lz4_flex::compress_prepend_size(&payload);
    Ok(format!("v{}:{}", freeze.version, BASE64.encode(compressed)))
}

/// Decodes an encoded freeze, expanding path sigils for each platform
/// section using the decoding site's `platform_path_maps`.
pub fn decode(encoded: &str, site: &Site) -> FreezeResult<Freeze> {
    let rest = encoded
        .trim()
        .strip_prefix('v')
        .ok_or(FreezeError::MissingPrefix)?;
    let (version, payload) = rest.split_once(':').ok_or(FreezeError::MissingPrefix)?;
    if version.parse::<u32>().is_err() {
        return Err(FreezeError::MissingPrefix);
    }

    let compressed = BASE64.decode(payload.trim())?;
    let payload = lz4_flex::decompress_size_prepended(&compressed)?;
    let mut value: Value = serde_json::from_slice(&payload)?;
    map_platform_strings(&mut value, &|text, platform| {
        expand_path(text, platform, site)
    });
    Ok(serde_json::from_value(value)?)
}

/// Walks the per-platform sections of a freeze document, rewriting every
/// string through `rewrite(text, platform)`.
fn map_platform_strings(value: &mut Value, rewrite: &dyn Fn(&str, &str) -> Option<String>) {
    for section in ["environment", "aliases"] {
        let Some(Value::Object(platforms)) = value.get_mut(section) else {
            continue;
        };
        for (platform, subtree) in platforms.iter_mut() {
            let platform = platform.clone();
            rewrite_strings(subtree, &mut |text| rewrite(text, &platform));
        }
    }
}

fn rewrite_strings(value: &mut Value, rewrite: &mut dyn FnMut(&str) -> Option<String>) {
    match value {
        Value::String(text) => {
            if let Some(replaced) = rewrite(text) {
                *text = replaced;
            }
        }
        Value::Array(items) => {
            for item in items {
                rewrite_strings(item, rewrite);
            }
        }
        Value::Object(map) => {
            for item in map.values_mut() {
                rewrite_strings(item, rewrite);
            }
        }
        _ => {}
    }
}

/// Replaces a leading `platform_path_maps` root with its `{name}` sigil.
pub(crate) fn compress_path(text: &str, platform: &str, site: &Site) -> Option<String> {
    for (name, roots) in &site.platform_path_maps {
        let Some(root) = roots.get(platform) else {
            continue;
        };
        if let Some(tail) = text.strip_prefix(root.as_str()) {
            return Some(format!("{{{}}}{}", name, tail));
        }
    }
    None
}

/// Expands a leading `{name}` sigil back to the platform's mapped root.
pub(crate) fn expand_path(text: &str, platform: &str, site: &Site) -> Option<String> {
    if !text.starts_with('{') {
        return None;
    }
    let end = text.find('}')?;
    let name = &text[1..end];
    let roots = site.platform_path_maps.get(name)?;
    let root = roots.get(platform)?;
    Some(format!("{}{}", root, &text[end + 1..]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn site_with_maps() -> Site {
        let mut site = Site::default();
        let mut roots = BTreeMap::new();
        roots.insert("linux".to_string(), "/mnt/shared".to_string());
        roots.insert("windows".to_string(), "\\\\server\\shared".to_string());
        site.platform_path_maps
            .insert("net-share".to_string(), roots);
        site
    }

    fn sample_freeze() -> Freeze {
        let mut linux_env = BTreeMap::new();
        linux_env.insert("TOOLS".to_string(), "/mnt/shared/tools".to_string());
        let mut windows_env = BTreeMap::new();
        windows_env.insert("TOOLS".to_string(), "\\\\server\\shared\\tools".to_string());
        let mut environment = BTreeMap::new();
        environment.insert("linux".to_string(), linux_env);
        environment.insert("windows".to_string(), windows_env);

        let mut linux_aliases = BTreeMap::new();
        linux_aliases.insert(
            "tool".to_string(),
            serde_json::from_value::<AliasEntry>(serde_json::json!({
                "cmd": "/mnt/shared/tools/bin/tool",
                "distro": ["tool", "1.0"]
            }))
            .unwrap(),
        );
        let mut aliases = BTreeMap::new();
        aliases.insert("linux".to_string(), linux_aliases);
        aliases.insert("windows".to_string(), BTreeMap::new());

        Freeze {
            version: 1,
            uri: "app/tool".to_string(),
            name: "tool".to_string(),
            versions: vec![("tool".to_string(), "1.0".to_string())],
            environment,
            aliases,
        }
    }

    #[test]
    fn test_encode_prefix_carries_version() {
        let site = site_with_maps();
        let mut freeze = sample_freeze();
        freeze.version = 3;
        let encoded = encode(&freeze, &site).unwrap();
        assert!(encoded.starts_with("v3:"));
    }

    #[test]
    fn test_round_trip_is_identity() {
        let site = site_with_maps();
        let freeze = sample_freeze();
        let encoded = encode(&freeze, &site).unwrap();
        let decoded = decode(&encoded, &site).unwrap();
        assert_eq!(freeze, decoded);
    }

    #[test]
    fn test_sigils_replace_platform_roots() {
        let site = site_with_maps();
        let freeze = sample_freeze();
        let mut value = serde_json::to_value(&freeze).unwrap();
        map_platform_strings(&mut value, &|text, platform| {
            compress_path(text, platform, &site)
        });
        // Both platform sections collapse onto the same sigil.
        assert_eq!(
            value["environment"]["linux"]["TOOLS"],
            "{net-share}/tools"
        );
        assert_eq!(
            value["environment"]["windows"]["TOOLS"],
            "{net-share}\\tools"
        );
    }

    #[test]
    fn test_unknown_sigil_left_untouched() {
        let site = site_with_maps();
        assert_eq!(expand_path("{mystery}/x", "linux", &site), None);
        assert_eq!(expand_path("/plain/path", "linux", &site), None);
    }

    #[test]
    fn test_decode_rejects_garbage() {
        let site = Site::default();
        assert!(matches!(
            decode("not-a-freeze", &site),
            Err(FreezeError::MissingPrefix)
        ));
        assert!(matches!(
            decode("v1:!!!!", &site),
            Err(FreezeError::Base64(_))
        ));
    }

    #[test]
    fn test_sigil_expansion_follows_decoder_platform_maps() {
        let site = site_with_maps();
        let freeze = sample_freeze();
        let encoded = encode(&freeze, &site).unwrap();

        // A decoder with a different linux root rehydrates paths under it.
        let mut other = site_with_maps();
        other
            .platform_path_maps
            .get_mut("net-share")
            .unwrap()
            .insert("linux".to_string(), "/Volumes/shared".to_string());
        let decoded = decode(&encoded, &other).unwrap();
        assert_eq!(
            decoded.environment["linux"]["TOOLS"],
            "/Volumes/shared/tools"
        );
    }
}
