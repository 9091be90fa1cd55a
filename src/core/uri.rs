// src/core/uri.rs

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use thiserror::Error;

use crate::constants::DEFAULT_URI;
use crate::models::ConfigNode;

#[derive(Error, Debug)]
pub enum UriError {
    #[error("URI cannot be empty.")]
    Empty,
    #[error("URI '{0}' contains an empty segment.")]
    EmptySegment(String),
    #[error("Could not find a config for URI '{0}', and no default config exists.")]
    Unresolved(String),
}

type UriResult<T> = Result<T, UriError>;

/// An ordered, non-empty sequence of case-sensitive identifier segments.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Uri(Vec<String>);

impl Uri {
    pub fn segments(&self) -> &[String] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The URI truncated to its first `depth` segments.
    pub fn prefix(&self, depth: usize) -> String {
        self.0[..depth].join("/")
    }
}

impl fmt::Display for Uri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.join("/"))
    }
}

impl FromStr for Uri {
    type Err = UriError;

    fn from_str(raw: &str) -> UriResult<Self> {
        let trimmed = raw.trim_matches('/');
        if trimmed.is_empty() {
            return Err(UriError::Empty);
        }
        let segments: Vec<String> = trimmed.split('/').map(str::to_string).collect();
        if segments.iter().any(String::is_empty) {
            return Err(UriError::EmptySegment(raw.to_string()));
        }
        Ok(Self(segments))
    }
}

/// The outcome of mapping a requested URI onto the config forest.
#[derive(Debug)]
pub struct UriMatch<'a> {
    pub requested: String,
    pub matched: String,
    pub node: &'a ConfigNode,
}

/// Maps a requested URI to a concrete config node.
///
/// Tries an exact match first, then walks up the user tree one segment at a
/// time, then falls back to the `default` tree using per-segment
/// longest-prefix descent.
pub fn resolve<'a>(
    configs: &'a HashMap<String, ConfigNode>,
    uri: &Uri,
) -> UriResult<UriMatch<'a>> {
    // Exact match and walk-up share one loop: try the deepest prefix first.
    for depth in (1..=uri.len()).rev() {
        let candidate = uri.prefix(depth);
        if let Some(node) = configs.get(&candidate) {
            if depth < uri.len() {
                log::debug!(
                    "URI '{}' matched ancestor config '{}'.",
                    uri,
                    candidate
                );
            }
            return Ok(UriMatch {
                requested: uri.to_string(),
                matched: candidate,
                node,
            });
        }
    }

    match default_descend(configs, uri) {
        Some(node) => {
            let matched = node.uri();
            log::debug!("URI '{}' matched default config '{}'.", uri, matched);
            Ok(UriMatch {
                requested: uri.to_string(),
                matched,
                node,
            })
        }
        None => Err(UriError::Unresolved(uri.to_string())),
    }
}

/// Descends the `default` tree for a requested URI.
///
/// The first segment is consumed by the `default` root itself. For each
/// following segment, the child whose name is the longest prefix of that
/// segment is entered; the descent stops at the first level without a
/// prefix match.
pub fn default_descend<'a>(
    configs: &'a HashMap<String, ConfigNode>,
    uri: &Uri,
) -> Option<&'a ConfigNode> {
    let mut current_uri = DEFAULT_URI.to_string();
    let mut current = configs.get(&current_uri)?;

    for segment in &uri.segments()[1..] {
        let mut best: Option<&str> = None;
        for child in children_of(configs, &current_uri) {
            if segment.starts_with(child) {
                // Child names within a node are unique, so two candidates
                // can never tie on length.
                if best.map(|b| child.len() > b.len()).unwrap_or(true) {
                    best = Some(child);
                }
            }
        }
        match best {
            Some(child) => {
                current_uri = format!("{}/{}", current_uri, child);
                current = configs.get(&current_uri)?;
            }
            None => break,
        }
    }
    Some(current)
}

/// The direct child segment names below a URI in the forest.
fn children_of<'a>(configs: &'a HashMap<String, ConfigNode>, uri: &str) -> Vec<&'a str> {
    let prefix = format!("{}/", uri);
    configs
        .keys()
        .filter_map(|key| {
            let tail = key.strip_prefix(&prefix)?;
            if tail.contains('/') { None } else { Some(tail) }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn node(uri: &str) -> (String, ConfigNode) {
        let segments: Vec<&str> = uri.split('/').collect();
        let (name, context) = segments.split_last().unwrap();
        let raw = serde_json::json!({
            "name": name,
            "context": context,
        });
        (uri.to_string(), serde_json::from_value(raw).unwrap())
    }

    fn forest(uris: &[&str]) -> HashMap<String, ConfigNode> {
        uris.iter().map(|uri| node(uri)).collect()
    }

    fn matched(configs: &HashMap<String, ConfigNode>, raw: &str) -> String {
        let uri: Uri = raw.parse().unwrap();
        resolve(configs, &uri).unwrap().matched
    }

    #[test]
    fn test_uri_parsing() {
        let uri: Uri = "app/maya/2024".parse().unwrap();
        assert_eq!(uri.segments().len(), 3);
        assert_eq!(uri.to_string(), "app/maya/2024");
        assert!("".parse::<Uri>().is_err());
        assert!("app//maya".parse::<Uri>().is_err());
    }

    #[test]
    fn test_exact_match_wins() {
        let configs = forest(&["app", "app/maya"]);
        assert_eq!(matched(&configs, "app/maya"), "app/maya");
    }

    #[test]
    fn test_walk_up_to_nearest_ancestor() {
        let configs = forest(&["app", "app/maya"]);
        assert_eq!(matched(&configs, "app/maya/2024/lighting"), "app/maya");
        assert_eq!(matched(&configs, "app/nuke"), "app");
    }

    #[test]
    fn test_default_fallback_longest_prefix() {
        // Scenario: default tree has `default`, `default/Sc1`, `default/Sc11`.
        let configs = forest(&["default", "default/Sc1", "default/Sc11"]);
        assert_eq!(matched(&configs, "not_a_project/Sc101"), "default/Sc1");
        assert_eq!(matched(&configs, "not_a_project/Sc110"), "default/Sc11");
        assert_eq!(matched(&configs, "not_a_project/Sc200"), "default");
    }

    #[test]
    fn test_default_descent_stops_at_first_miss() {
        let configs = forest(&["default", "default/Sc1", "default/Sc1/rigging"]);
        assert_eq!(
            matched(&configs, "proj/Sc100/rigging/task"),
            "default/Sc1/rigging"
        );
        assert_eq!(matched(&configs, "proj/Sc100/layout"), "default/Sc1");
    }

    #[test]
    fn test_single_segment_uri() {
        let configs = forest(&["default", "app"]);
        assert_eq!(matched(&configs, "app"), "app");
        assert_eq!(matched(&configs, "unknown"), "default");
    }

    #[test]
    fn test_unresolved_without_default_tree() {
        let configs = forest(&["app"]);
        let uri: Uri = "missing/thing".parse().unwrap();
        assert!(matches!(
            resolve(&configs, &uri),
            Err(UriError::Unresolved(_))
        ));
    }

    #[test]
    fn test_requested_and_matched_recorded() {
        let configs = forest(&["app"]);
        let uri: Uri = "app/houdini/19.5".parse().unwrap();
        let hit = resolve(&configs, &uri).unwrap();
        assert_eq!(hit.requested, "app/houdini/19.5");
        assert_eq!(hit.matched, "app");
    }
}
