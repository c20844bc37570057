//! Install stager: copy completed archives into the run's staging folder,
//! extract them there, and merge the contents into the install folder.
//!
//! The downloads-folder file is never touched; staging always works on a
//! copy. Re-staging an archive overwrites the earlier copy.

use crate::error::{error_chain, InstallError};
use crate::types::{AcquisitionResult, InstallRecord, InstallStatus};
use std::collections::HashSet;
use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::{debug, info, warn};

const ARCHIVES_DIR: &str = "archives";
const EXTRACTED_DIR: &str = "extracted";

/// Filesystem-safe folder name for an archive.
pub fn safe_stem(name: &str) -> String {
    let kept: String = name
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let trimmed = kept.trim_matches(|c| c == '.' || c == '_');
    if trimmed.is_empty() {
        "archive".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Locate a 7-Zip command line binary.
pub fn find_seven_zip() -> Option<PathBuf> {
    for name in ["7z", "7za", "7zz"] {
        if let Ok(path) = which::which(name) {
            return Some(path);
        }
    }
    if cfg!(target_os = "windows") {
        let default = PathBuf::from(r"C:\Program Files\7-Zip\7z.exe");
        if default.exists() {
            return Some(default);
        }
    }
    None
}

pub struct InstallStager {
    install_dir: PathBuf,
    staging_dir: PathBuf,
    skip_install: bool,
    /// Archives installed so far in this run, by file name.
    installed: HashSet<String>,
}

impl InstallStager {
    pub fn new(install_dir: PathBuf, staging_dir: PathBuf, skip_install: bool) -> Self {
        Self {
            install_dir,
            staging_dir,
            skip_install,
            installed: HashSet::new(),
        }
    }

    pub fn staging_dir(&self) -> &Path {
        &self.staging_dir
    }

    pub fn install_dir(&self) -> &Path {
        &self.install_dir
    }

    /// Stage (and unless skipping, install) a completed acquisition.
    /// Returns `None` for anything that did not complete.
    pub fn stage_and_install(&mut self, acquisition: &AcquisitionResult) -> Option<InstallRecord> {
        if !acquisition.is_completed() {
            return None;
        }
        let archive = acquisition.file.clone()?;
        let mut record = InstallRecord::new(archive.clone());

        if let Err(e) = self.process(&archive, &mut record) {
            let detail = error_chain(&e);
            warn!("install of {} failed: {detail}", archive.display());
            record.status = InstallStatus::Failed;
            record.detail = Some(detail);
        }
        Some(record)
    }

    fn process(&mut self, archive: &Path, record: &mut InstallRecord) -> Result<(), InstallError> {
        if !archive.is_file() {
            return Err(InstallError::MissingArchive(archive.to_path_buf()));
        }
        let file_name = archive
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| InstallError::MissingArchive(archive.to_path_buf()))?;

        if self.installed.contains(&file_name) {
            record.status = InstallStatus::Skipped;
            record.detail = Some("already installed earlier in this run".to_string());
            return Ok(());
        }

        let archives = self.staging_dir.join(ARCHIVES_DIR);
        fs::create_dir_all(&archives)?;
        let staged = archives.join(&file_name);
        fs::copy(archive, &staged).map_err(|source| InstallError::Copy {
            path: staged.clone(),
            source,
        })?;
        record.staging_path = Some(staged.clone());
        debug!("staged {}", staged.display());

        if self.skip_install {
            record.status = InstallStatus::Staged;
            return Ok(());
        }

        let extract_dir = self.staging_dir.join(EXTRACTED_DIR).join(safe_stem(&file_name));
        if extract_dir.exists() {
            fs::remove_dir_all(&extract_dir)?;
        }
        fs::create_dir_all(&extract_dir)?;
        let method = extract_archive(&staged, &extract_dir)?;
        record.extracted_path = Some(extract_dir.clone());
        record.method = Some(method.to_string());

        fs::create_dir_all(&self.install_dir)?;
        let copied = merge_tree(&extract_dir, &self.install_dir)?;
        record.install_path = Some(self.install_dir.clone());
        record.files_copied = copied;
        record.status = InstallStatus::Installed;
        self.installed.insert(file_name);
        info!("installed {} ({copied} files via {method})", archive.display());
        Ok(())
    }
}

fn looks_like_zip(path: &Path) -> bool {
    let by_ext = path
        .extension()
        .is_some_and(|e| e.eq_ignore_ascii_case("zip"));
    let mut magic = [0u8; 4];
    let by_magic = File::open(path)
        .and_then(|mut f| f.read_exact(&mut magic))
        .map(|_| magic == *b"PK\x03\x04")
        .unwrap_or(false);
    by_ext || by_magic
}

/// Extract `archive` into `target`, returning the method used.
pub fn extract_archive(archive: &Path, target: &Path) -> Result<&'static str, InstallError> {
    if looks_like_zip(archive) {
        extract_zip(archive, target)?;
        return Ok("zip");
    }

    let seven_zip = find_seven_zip().ok_or_else(|| {
        InstallError::Unsupported(
            archive
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
        )
    })?;
    let output = Command::new(&seven_zip)
        .arg("x")
        .arg("-y")
        .arg(format!("-o{}", target.display()))
        .arg(archive)
        .output()?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        let trimmed: String = stderr.trim().chars().take(200).collect();
        return Err(InstallError::Extract(format!("7z exited with {}: {trimmed}", output.status)));
    }
    Ok("7z")
}

/// Extract a zip, skipping entries whose names would escape `target`.
pub fn extract_zip(archive: &Path, target: &Path) -> Result<usize, InstallError> {
    let file = File::open(archive)?;
    let mut zip = zip::ZipArchive::new(file)?;
    let mut written = 0;

    for i in 0..zip.len() {
        let mut entry = zip.by_index(i)?;
        let Some(relative) = entry.enclosed_name() else {
            warn!("skipping unsafe zip entry {:?} in {}", entry.name(), archive.display());
            continue;
        };
        let out = target.join(relative);

        if entry.is_dir() {
            fs::create_dir_all(&out)?;
            continue;
        }
        if let Some(parent) = out.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut dest = File::create(&out)?;
        io::copy(&mut entry, &mut dest)?;
        written += 1;
    }
    Ok(written)
}

/// Copy every file under `source` into `target`, keeping relative paths and
/// overwriting existing files. Returns the number of files copied.
pub fn merge_tree(source: &Path, target: &Path) -> Result<usize, InstallError> {
    let mut copied = 0;
    let mut stack = vec![source.to_path_buf()];

    while let Some(dir) = stack.pop() {
        for entry in fs::read_dir(&dir)? {
            let entry = entry?;
            let path = entry.path();
            if entry.file_type()?.is_dir() {
                stack.push(path);
                continue;
            }
            let relative = path.strip_prefix(source).unwrap_or(&path);
            let dest = target.join(relative);
            if let Some(parent) = dest.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::copy(&path, &dest).map_err(|err| InstallError::Copy {
                path: dest.clone(),
                source: err,
            })?;
            copied += 1;
        }
    }
    Ok(copied)
}
