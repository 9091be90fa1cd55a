// src/core/formatter.rs

use std::collections::BTreeMap;
use std::path::Path;

use lazy_static::lazy_static;
use regex::Regex;
use thiserror::Error;

use crate::core::platform::Platform;

// Nested variable expansion is bounded; config variables referencing each
// other deeper than this are treated as a cycle.
const MAX_EXPANSION_DEPTH: u32 = 8;

lazy_static! {
    static ref TOKEN_RE: Regex = Regex::new(r"\{([^{}]+)\}").unwrap();
}

#[derive(Error, Debug)]
pub enum FormatError {
    #[error("Unknown format variable '{{{0}}}'.")]
    UnknownVariable(String),
    #[error("Variable expansion exceeded {MAX_EXPANSION_DEPTH} levels while formatting '{0}'.")]
    ExpansionCycle(String),
}

type FormatResult<T> = Result<T, FormatError>;

/// Expands the format tokens hab supports inside config values:
///
/// - `{;}`: the platform's list separator.
/// - `{relative_root}`: the directory of the JSON file the value came from.
/// - `{NAME!e}`: a platform-style reference to the environment variable.
/// - `{key}`: a user variable from the flattened config.
pub struct Formatter<'a> {
    platform: &'a dyn Platform,
    relative_root: &'a Path,
    variables: &'a BTreeMap<String, String>,
}

impl<'a> Formatter<'a> {
    pub fn new(
        platform: &'a dyn Platform,
        relative_root: &'a Path,
        variables: &'a BTreeMap<String, String>,
    ) -> Self {
        Self {
            platform,
            relative_root,
            variables,
        }
    }

    pub fn format(&self, template: &str) -> FormatResult<String> {
        self.format_depth(template, 0)
    }

    fn format_depth(&self, template: &str, depth: u32) -> FormatResult<String> {
        if depth >= MAX_EXPANSION_DEPTH {
            return Err(FormatError::ExpansionCycle(template.to_string()));
        }
        let mut out = String::new();
        let mut last = 0;
        for caps in TOKEN_RE.captures_iter(template) {
            let all = caps.get(0).expect("capture 0 always exists");
            let token = &caps[1];
            out.push_str(&template[last..all.start()]);
            out.push_str(&self.expand(token, depth)?);
            last = all.end();
        }
        out.push_str(&template[last..]);
        Ok(out)
    }

    fn expand(&self, token: &str, depth: u32) -> FormatResult<String> {
        if token == ";" {
            return Ok(self.platform.list_sep().to_string());
        }
        if token == "relative_root" {
            return Ok(dunce::simplified(self.relative_root)
                .to_string_lossy()
                .to_string());
        }
        if let Some(name) = token.strip_suffix("!e") {
            return Ok(self.platform.env_ref(name));
        }
        if let Some(value) = self.variables.get(token) {
            // User variables may themselves contain tokens.
            return self.format_depth(value, depth + 1);
        }
        Err(FormatError::UnknownVariable(token.to_string()))
    }
}
