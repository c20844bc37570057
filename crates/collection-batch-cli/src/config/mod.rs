//! Saved user defaults.
//!
//! A small JSON file remembering the last collection, folders and endpoint so
//! the next run can offer them as defaults.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

pub const CONFIG_ENV: &str = "COLLECTION_BATCH_CONFIG";
pub const DEFAULT_CONFIG_FILE: &str = "collection-batch.json";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserDefaults {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collection_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub downloads_dir: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub install_dir: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cdp_url: Option<String>,
}

/// Resolve the defaults file path: explicit flag, then env var, then the
/// working directory.
pub fn resolve_config_path(explicit: Option<&Path>) -> PathBuf {
    if let Some(path) = explicit {
        return path.to_path_buf();
    }
    if let Ok(env_path) = std::env::var(CONFIG_ENV) {
        if !env_path.trim().is_empty() {
            return PathBuf::from(env_path);
        }
    }
    PathBuf::from(DEFAULT_CONFIG_FILE)
}

impl UserDefaults {
    /// Load defaults. Missing, unreadable or malformed files give empty
    /// defaults.
    pub fn load(path: &Path) -> Self {
        let raw = match std::fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(e) => {
                debug!("no saved defaults at {}: {e}", path.display());
                return Self::default();
            }
        };
        match serde_json::from_str(&raw) {
            Ok(defaults) => defaults,
            Err(e) => {
                warn!("ignoring malformed defaults file {}: {e}", path.display());
                Self::default()
            }
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display()))?;
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json).with_context(|| format!("writing {}", path.display()))?;
        Ok(())
    }
}
