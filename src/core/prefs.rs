// src/core/prefs.rs

use std::fs;
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::constants::PREFS_FILENAME;

#[derive(Error, Debug)]
pub enum PrefsError {
    #[error("Filesystem Error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Could not find the user config directory.")]
    ConfigDirNotFound,
    #[error("No saved URI. Run `hab set-uri <URI>` first, or pass a URI.")]
    NoSavedUri,
    #[error("The saved URI expired {minutes} minute(s) ago. Run `hab set-uri` again.")]
    Expired { minutes: u64 },
}

type PrefsResult<T> = Result<T, PrefsError>;

/// Saved user preferences: the last URI and when it was saved.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct Prefs {
    pub uri: Option<String>,
    /// Seconds since the epoch at the time `uri` was saved.
    #[serde(default)]
    pub timestamp: u64,
}

/// The prefs file under the user's config directory (`~/.config/hab`).
pub fn prefs_path() -> PrefsResult<PathBuf> {
    let dir = dirs::config_dir()
        .ok_or(PrefsError::ConfigDirNotFound)?
        .join("hab");
    Ok(dir.join(PREFS_FILENAME))
}

/// Persists the URI for later `hab <cmd> -` invocations.
pub fn save_uri(uri: &str) -> PrefsResult<()> {
    let path = prefs_path()?;
    if let Some(dir) = path.parent() {
        if !dir.exists() {
            fs::create_dir_all(dir)?;
        }
    }
    let prefs = Prefs {
        uri: Some(uri.to_string()),
        timestamp: now_secs(),
    };
    let payload = serde_json::to_string_pretty(&prefs).unwrap_or_default();
    fs::write(&path, payload)?;
    log::debug!("Saved URI '{}' to '{}'.", uri, path.display());
    Ok(())
}

/// The saved URI, honoring the site's `prefs_uri_timeout` in minutes.
pub fn last_uri(timeout_minutes: Option<u64>) -> PrefsResult<String> {
    let prefs = read_prefs()?;
    let uri = prefs.uri.ok_or(PrefsError::NoSavedUri)?;

    if let Some(timeout) = timeout_minutes {
        let age_secs = now_secs().saturating_sub(prefs.timestamp);
        if age_secs > timeout * 60 {
            return Err(PrefsError::Expired {
                minutes: (age_secs - timeout * 60) / 60 + 1,
            });
        }
    }
    Ok(uri)
}

fn read_prefs() -> PrefsResult<Prefs> {
    let path = prefs_path()?;
    if !path.exists() {
        return Err(PrefsError::NoSavedUri);
    }
    let text = fs::read_to_string(&path)?;
    match serde_json::from_str(&text) {
        Ok(prefs) => Ok(prefs),
        Err(err) => {
            // A corrupt prefs file is regenerated on the next save.
            log::warn!(
                "Prefs file '{}' is corrupt and will be ignored. (Error: {})",
                path.display(),
                err
            );
            let _ = fs::remove_file(&path);
            Err(PrefsError::NoSavedUri)
        }
    }
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
