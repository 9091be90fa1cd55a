// src/core/reducer.rs

use std::collections::{HashMap, HashSet};

use thiserror::Error;

use crate::constants::RESERVED_VARIABLE_NAMES;
use crate::core::uri::{self, Uri, UriMatch};
use crate::models::{ConfigNode, FlatConfig};

#[derive(Error, Debug)]
pub enum ReduceError {
    /// The matched node recorded a load-time failure; it surfaces only when
    /// this URI is requested.
    #[error("{message}")]
    ErrorNode { message: String },
    #[error("\"{0}\" is a reserved variable name and cannot be redefined.")]
    ReservedVariableName(String),
}

type ReduceResult<T> = Result<T, ReduceError>;

/// Flattens the matched config by filling unset fields from its ancestors
/// and, past the user-tree root, from the `default` tree.
///
/// Environment operations are *not* merged here; the composer applies them
/// in traversal order later. Reduction only decides which node supplies each
/// field.
pub fn reduce(
    configs: &HashMap<String, ConfigNode>,
    hit: &UriMatch<'_>,
) -> ReduceResult<FlatConfig> {
    if let Some(message) = &hit.node.error {
        return Err(ReduceError::ErrorNode {
            message: message.clone(),
        });
    }

    let inherits = effective_inherits(configs, hit.node);
    let chain = inheritance_chain(configs, hit, inherits);

    let mut flat = FlatConfig {
        uri_requested: hit.requested.clone(),
        uri_matched: hit.matched.clone(),
        name: hit.node.name.clone(),
        filename: hit.node.filename.clone(),
        inherits,
        ..FlatConfig::default()
    };

    let mut applied: Vec<String> = Vec::new();

    if let Some((node, distros)) = adopt(&chain, |n| n.distros.clone()) {
        flat.distros = distros;
        record(&mut applied, node);
    }
    if let Some((node, optional)) = adopt(&chain, |n| n.optional_distros.clone()) {
        flat.optional_distros = optional;
        record(&mut applied, node);
    }
    if let Some((node, environment)) = adopt(&chain, |n| n.environment.clone()) {
        flat.environment_ops = Some(environment);
        // The environment itself may come from an ancestor, and its
        // relative_root must follow the file that declared it.
        flat.filename = node.filename.clone();
        record(&mut applied, node);
    }
    if let Some((node, mods)) = adopt(&chain, |n| n.alias_mods.clone()) {
        flat.alias_mods = mods;
        record(&mut applied, node);
    }
    if let Some((node, verbosity)) = adopt(&chain, |n| n.min_verbosity.clone()) {
        flat.min_verbosity = verbosity;
        record(&mut applied, node);
    }
    if let Some((node, variables)) = adopt(&chain, |n| n.variables.clone()) {
        flat.variables = variables;
        record(&mut applied, node);
    }
    if let Some((node, stubs)) = adopt(&chain, |n| n.stub_distros.clone()) {
        flat.stub_distros = stubs;
        record(&mut applied, node);
    }

    for name in flat.variables.keys() {
        if RESERVED_VARIABLE_NAMES.contains(&name.as_str()) {
            return Err(ReduceError::ReservedVariableName(name.clone()));
        }
    }

    flat.inherits_applied_from = applied;
    Ok(flat)
}

/// The `inherits` flag itself bootstraps from the user tree: the matched
/// node's own value, else the first ancestor that sets one, else false.
fn effective_inherits(configs: &HashMap<String, ConfigNode>, node: &ConfigNode) -> bool {
    if let Some(inherits) = node.inherits {
        return inherits;
    }
    for ancestor in user_ancestors(configs, &node.uri()) {
        if let Some(inherits) = ancestor.inherits {
            return inherits;
        }
    }
    false
}

/// Builds the ordered list of nodes a field may be adopted from: the node
/// itself, then user-tree ancestors, then the `default`-tree descent for the
/// requested URI from its deepest hit upward. A visited set keyed by URI
/// keeps the double fallback from looping when the matched node already
/// lives in the `default` tree.
fn inheritance_chain<'a>(
    configs: &'a HashMap<String, ConfigNode>,
    hit: &UriMatch<'a>,
    inherits: bool,
) -> Vec<&'a ConfigNode> {
    let mut chain: Vec<&ConfigNode> = Vec::new();
    let mut visited: HashSet<String> = HashSet::new();

    let mut push = |chain: &mut Vec<&'a ConfigNode>, node: &'a ConfigNode| {
        if visited.insert(node.uri()) {
            chain.push(node);
        }
    };

    push(&mut chain, hit.node);
    if !inherits {
        return chain;
    }

    for ancestor in user_ancestors(configs, &hit.matched) {
        push(&mut chain, ancestor);
    }

    if let Ok(requested) = hit.requested.parse::<Uri>() {
        if let Some(deepest) = uri::default_descend(configs, &requested) {
            let deepest_uri = deepest.uri();
            push(&mut chain, deepest);
            for ancestor in user_ancestors(configs, &deepest_uri) {
                push(&mut chain, ancestor);
            }
        }
    }

    chain
}

/// Ancestors of a URI that actually exist in the forest, nearest first.
fn user_ancestors<'a>(
    configs: &'a HashMap<String, ConfigNode>,
    uri: &str,
) -> Vec<&'a ConfigNode> {
    let segments: Vec<&str> = uri.split('/').collect();
    let mut out = Vec::new();
    for depth in (1..segments.len()).rev() {
        let candidate = segments[..depth].join("/");
        if let Some(node) = configs.get(&candidate) {
            out.push(node);
        }
    }
    out
}

fn adopt<'a, T, F>(chain: &[&'a ConfigNode], get: F) -> Option<(&'a ConfigNode, T)>
where
    F: Fn(&ConfigNode) -> Option<T>,
{
    for &node in chain {
        if let Some(value) = get(node) {
            return Some((node, value));
        }
    }
    None
}

fn record(applied: &mut Vec<String>, node: &ConfigNode) {
    let uri = node.uri();
    if !applied.contains(&uri) {
        applied.push(uri);
    }
}
