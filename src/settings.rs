//! Persisted credentials and rate-limit settings.
//!
//! The CLI remembers the API key and requests-per-minute ceiling between runs
//! in a small JSON file. The library itself never reads this file on its own:
//! the binary loads it once at start-up and passes the resolved values into
//! [`crate::config::BatchConfig`] and [`crate::client::ClientConfig`].

use crate::error::BatchError;
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Environment variable overriding the settings file location.
pub const SETTINGS_PATH_ENV: &str = "DOC2X_SETTINGS_PATH";

/// Requests per minute allowed for `sk-` (paid) keys.
pub const PAID_KEY_RPM: u32 = 10;

/// Requests per minute allowed for personal keys.
pub const PERSONAL_KEY_RPM: u32 = 4;

/// Values remembered between CLI runs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rpm: Option<u32>,
}

impl Settings {
    /// Default settings file: `$DOC2X_SETTINGS_PATH`, else
    /// `<config dir>/edgequake-doc2x/settings.json`.
    pub fn default_path() -> Result<PathBuf, BatchError> {
        if let Ok(p) = std::env::var(SETTINGS_PATH_ENV) {
            if !p.is_empty() {
                return Ok(PathBuf::from(p));
            }
        }
        dirs::config_dir()
            .map(|d| d.join("edgequake-doc2x").join("settings.json"))
            .ok_or_else(|| BatchError::Settings {
                path: PathBuf::from("<config dir>"),
                detail: format!(
                    "could not determine a configuration directory; set {SETTINGS_PATH_ENV}"
                ),
            })
    }

    /// Load settings from `path`. A missing file yields empty settings.
    pub fn load(path: &Path) -> Result<Self, BatchError> {
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No settings file at {}", path.display());
                return Ok(Self::default());
            }
            Err(e) => return Err(settings_err(path, e)),
        };
        serde_json::from_str(&text).map_err(|e| settings_err(path, e))
    }

    /// Write settings to `path` atomically, creating parent directories.
    pub fn save(&self, path: &Path) -> Result<(), BatchError> {
        let json = serde_json::to_vec_pretty(self).map_err(|e| settings_err(path, e))?;
        let parent = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        std::fs::create_dir_all(parent).map_err(|e| settings_err(path, e))?;

        let mut tmp = tempfile::NamedTempFile::new_in(parent).map_err(|e| settings_err(path, e))?;
        tmp.write_all(&json).map_err(|e| settings_err(path, e))?;
        tmp.persist(path).map_err(|e| settings_err(path, e.error))?;
        debug!("Saved settings to {}", path.display());
        Ok(())
    }

    /// Remove the settings file. Removing a missing file is not an error.
    pub fn clear(path: &Path) -> Result<(), BatchError> {
        match std::fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(settings_err(path, e)),
        }
    }
}

fn settings_err(path: &Path, e: impl std::fmt::Display) -> BatchError {
    BatchError::Settings {
        path: path.to_path_buf(),
        detail: e.to_string(),
    }
}

/// Requests-per-minute ceiling to assume for `api_key` when none is
/// configured: paid `sk-` keys get 10, personal keys 4.
pub fn default_rpm(api_key: &str) -> u32 {
    if api_key.starts_with("sk-") {
        PAID_KEY_RPM
    } else {
        PERSONAL_KEY_RPM
    }
}

/// Mask all but the first and last five characters of a key for display.
pub fn mask_key(api_key: &str) -> String {
    let chars: Vec<char> = api_key.chars().collect();
    if chars.len() <= 10 {
        return "*".repeat(chars.len());
    }
    let head: String = chars[..5].iter().collect();
    let tail: String = chars[chars.len() - 5..].iter().collect();
    format!("{}{}{}", head, "*".repeat(chars.len() - 10), tail)
}
