//! Browser profile preferences for unattended downloads.
//!
//! The click flow relies on the browser saving files without a "Save as"
//! prompt. This edits a Chromium-family `Preferences` file so downloads land
//! in a fixed folder. The browser must be closed while this runs or it will
//! overwrite the file on exit.

use std::path::{Path, PathBuf};

/// Errors editing a preferences file.
#[derive(thiserror::Error, Debug)]
pub enum ProfileError {
    #[error("preferences file not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("could not parse preferences JSON: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("preferences root is not a JSON object")]
    NotAnObject,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Default `Preferences` path of the Brave "Default" profile.
pub fn default_brave_preferences() -> Option<PathBuf> {
    let base = if cfg!(target_os = "windows") {
        dirs::data_local_dir()?.join("BraveSoftware/Brave-Browser/User Data")
    } else if cfg!(target_os = "macos") {
        dirs::data_dir()?.join("BraveSoftware/Brave-Browser")
    } else {
        dirs::config_dir()?.join("BraveSoftware/Brave-Browser")
    };
    Some(base.join("Default").join("Preferences"))
}

/// Set `download.prompt_for_download = false`, `savefile.type = 0` and
/// `savefile.default_directory = downloads_dir`, preserving every other key.
pub fn apply_download_preferences(path: &Path, downloads_dir: &Path) -> Result<(), ProfileError> {
    if !path.exists() {
        return Err(ProfileError::NotFound(path.to_path_buf()));
    }

    let raw = std::fs::read_to_string(path)?;
    let mut prefs: serde_json::Value = serde_json::from_str(&raw)?;
    let root = prefs.as_object_mut().ok_or(ProfileError::NotAnObject)?;

    let download = root
        .entry("download")
        .or_insert_with(|| serde_json::json!({}));
    if !download.is_object() {
        *download = serde_json::json!({});
    }
    download["prompt_for_download"] = serde_json::Value::Bool(false);

    let savefile = root
        .entry("savefile")
        .or_insert_with(|| serde_json::json!({}));
    if !savefile.is_object() {
        *savefile = serde_json::json!({});
    }
    savefile["type"] = serde_json::json!(0);
    savefile["default_directory"] = serde_json::json!(downloads_dir.display().to_string());

    // Chromium writes this file compact; keep it that way.
    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, serde_json::to_string(&prefs)?)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}
