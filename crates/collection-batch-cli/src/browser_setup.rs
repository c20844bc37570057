//! `configure-browser`: point a profile's downloads at one folder, no prompt.

use anyhow::{bail, Context, Result};
use collection_batch::session::profile::{apply_download_preferences, default_brave_preferences};
use std::path::{Path, PathBuf};

/// Resolve the preferences file and rewrite its download settings.
/// Returns the file that was changed.
pub fn configure(preferences: Option<&Path>, downloads_dir: &Path) -> Result<PathBuf> {
    let path = match preferences {
        Some(p) => p.to_path_buf(),
        None => match default_brave_preferences() {
            Some(p) => p,
            None => bail!("could not locate a browser profile; pass --preferences"),
        },
    };
    std::fs::create_dir_all(downloads_dir)
        .with_context(|| format!("creating {}", downloads_dir.display()))?;
    let downloads_dir = downloads_dir
        .canonicalize()
        .with_context(|| format!("resolving {}", downloads_dir.display()))?;

    apply_download_preferences(&path, &downloads_dir)
        .with_context(|| format!("updating {}", path.display()))?;
    Ok(path)
}
