//! Download reconciler: correlate files landing in the downloads folder with
//! the entry that triggered them and decide when a download is finished.
//!
//! Completion is an explicit poll with a timeout. A file counts as complete
//! once its size is non-zero and unchanged for the stability window and it
//! no longer carries a browser temporary extension.

use crate::config::Timing;
use crate::error::AcquisitionError;
use crate::types::QueueEntry;
use regex::Regex;
use std::collections::HashSet;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tracing::{debug, info};

/// Extensions browsers use while a transfer is in progress.
pub const TEMP_EXTENSIONS: &[&str] = &["crdownload", "part", "tmp"];

const ARCHIVE_EXTENSIONS: &[&str] = &["zip", "7z", "rar", "tar", "gz", "xz", "bz2"];

/// Files modified slightly before the trigger still qualify (clock skew,
/// coarse mtime resolution).
const MTIME_SLACK: Duration = Duration::from_secs(2);

/// Bonus when the mod id appears as its own token in the filename.
const MOD_ID_BONUS: usize = 16;

/// Shortest name overlap that ties a file to an entry without the mod id.
/// Names shorter than this must match in full.
const MIN_NAME_OVERLAP: usize = 5;

fn uuid_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)^[0-9a-f]{8}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{12}$")
            .expect("uuid pattern is valid")
    })
}

/// Names present in the downloads folder before a download was triggered.
#[derive(Debug, Clone, Default)]
pub struct Baseline {
    names: HashSet<OsString>,
}

impl Baseline {
    /// Snapshot `dir`. A missing folder yields an empty baseline.
    pub fn snapshot(dir: &Path) -> std::io::Result<Self> {
        let mut names = HashSet::new();
        match std::fs::read_dir(dir) {
            Ok(entries) => {
                for entry in entries {
                    names.insert(entry?.file_name());
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }
        Ok(Self { names })
    }

    pub fn contains(&self, name: &std::ffi::OsStr) -> bool {
        self.names.contains(name)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

/// Verdict of [`Reconciler::await_completion`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    Completed { path: PathBuf, bytes: u64 },
    /// Nothing stable arrived in time. `partial` is the in-progress file
    /// seen last, if any.
    TimedOut { partial: Option<PathBuf> },
    Corrupt { path: PathBuf, reason: String },
}

#[derive(Debug, Clone)]
struct Candidate {
    path: PathBuf,
    size: u64,
    modified: SystemTime,
    temporary: bool,
}

/// Watches one downloads folder.
#[derive(Debug, Clone)]
pub struct Reconciler {
    poll_interval: Duration,
    stability_window: Duration,
}

impl Reconciler {
    pub fn new(poll_interval: Duration, stability_window: Duration) -> Self {
        Self {
            poll_interval,
            stability_window,
        }
    }

    pub fn from_timing(timing: &Timing) -> Self {
        Self::new(timing.poll_interval, timing.stability_window)
    }

    pub fn stability_window(&self) -> Duration {
        self.stability_window
    }

    /// Poll `downloads_dir` until a file for `entry` is complete, corrupt,
    /// or `timeout` elapses.
    pub async fn await_completion(
        &self,
        downloads_dir: &Path,
        entry: &QueueEntry,
        baseline: &Baseline,
        started_at: SystemTime,
        timeout: Duration,
    ) -> ReconcileOutcome {
        let deadline = Instant::now() + timeout;
        let not_before = started_at.checked_sub(MTIME_SLACK).unwrap_or(UNIX_EPOCH);
        let mut partial: Option<PathBuf> = None;
        let mut tracked: Option<(PathBuf, u64, Instant)> = None;

        loop {
            let candidates = scan_candidates(downloads_dir, baseline, not_before);
            let (temps, finals): (Vec<_>, Vec<_>) =
                candidates.into_iter().partition(|c| c.temporary);

            if let Some(temp) = best_candidate(entry, &temps) {
                if partial.as_ref() != Some(&temp.path) {
                    debug!("{}: in progress as {}", entry.identifier, temp.path.display());
                }
                partial = Some(temp.path.clone());
            }

            let finals: Vec<Candidate> = finals
                .into_iter()
                .filter(|c| belongs_to(entry, &c.path))
                .collect();
            match best_candidate(entry, &finals) {
                Some(best) if best.size > 0 => {
                    let unchanged_since = match &tracked {
                        Some((path, size, since)) if *path == best.path && *size == best.size => {
                            Some(*since)
                        }
                        _ => None,
                    };
                    match unchanged_since {
                        Some(since) if since.elapsed() >= self.stability_window => {
                            let path = best.path.clone();
                            if let Some(reason) = corrupt_reason(&path) {
                                return ReconcileOutcome::Corrupt { path, reason };
                            }
                            info!(
                                "{}: completed {} ({} bytes)",
                                entry.identifier,
                                path.display(),
                                best.size
                            );
                            return ReconcileOutcome::Completed {
                                path,
                                bytes: best.size,
                            };
                        }
                        Some(_) => {}
                        None => tracked = Some((best.path.clone(), best.size, Instant::now())),
                    }
                }
                _ => tracked = None,
            }

            if Instant::now() >= deadline {
                let partial = partial.or(tracked.map(|(path, _, _)| path));
                debug!("{}: no stable file after {:?}", entry.identifier, timeout);
                return ReconcileOutcome::TimedOut { partial };
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    /// Confirm a file written by the direct strategy: non-zero and unchanged
    /// for the stability window, within `timeout`.
    pub async fn confirm_stable(
        &self,
        path: &Path,
        timeout: Duration,
    ) -> Result<u64, AcquisitionError> {
        let deadline = Instant::now() + timeout;
        let mut last: Option<(u64, Instant)> = None;

        loop {
            let size = tokio::fs::metadata(path).await?.len();
            match last {
                Some((prev, since)) if prev == size && size > 0 => {
                    if since.elapsed() >= self.stability_window {
                        if let Some(reason) = corrupt_reason(path) {
                            return Err(AcquisitionError::Corrupt(reason));
                        }
                        return Ok(size);
                    }
                }
                _ => last = Some((size, Instant::now())),
            }

            if Instant::now() >= deadline {
                return Err(AcquisitionError::Timeout {
                    stage: "file stability".to_string(),
                    after_ms: timeout.as_millis() as u64,
                });
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }
}

fn scan_candidates(dir: &Path, baseline: &Baseline, not_before: SystemTime) -> Vec<Candidate> {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return Vec::new();
    };

    entries
        .filter_map(Result::ok)
        .filter(|e| !baseline.contains(&e.file_name()))
        .filter_map(|e| {
            let meta = e.metadata().ok()?;
            if !meta.is_file() {
                return None;
            }
            let modified = meta.modified().ok()?;
            if modified < not_before {
                return None;
            }
            let path = e.path();
            Some(Candidate {
                temporary: is_temp_download(&path),
                size: meta.len(),
                modified,
                path,
            })
        })
        .collect()
}

fn best_candidate<'a>(entry: &QueueEntry, candidates: &'a [Candidate]) -> Option<&'a Candidate> {
    candidates.iter().max_by(|a, b| {
        let sa = match_score(entry, &a.path);
        let sb = match_score(entry, &b.path);
        sa.cmp(&sb).then(a.modified.cmp(&b.modified))
    })
}

/// Whether a finished file may complete `entry`: the mod id appears as a
/// token, or the name overlap reaches [`MIN_NAME_OVERLAP`]. Unnamed aborted
/// transfers always qualify so they surface as corrupt.
pub fn belongs_to(entry: &QueueEntry, path: &Path) -> bool {
    if corrupt_reason(path).is_some() || has_mod_id_token(entry, &file_stem(path)) {
        return true;
    }
    let name = normalize(&entry.display_name);
    if name.is_empty() {
        return false;
    }
    let overlap = longest_common_substring(&name, &normalize(&file_stem(path)));
    overlap >= MIN_NAME_OVERLAP.min(name.len())
}

/// Whether `path` carries a browser in-progress extension.
pub fn is_temp_download(path: &Path) -> bool {
    path.extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
        .is_some_and(|e| TEMP_EXTENSIONS.contains(&e.as_str()))
}

/// How well a filename matches an entry: longest common substring of the
/// normalized display name and stem, plus a bonus when the mod id appears as
/// a token.
pub fn match_score(entry: &QueueEntry, path: &Path) -> usize {
    let stem = file_stem(path);
    let mut score = longest_common_substring(&normalize(&entry.display_name), &normalize(&stem));
    if has_mod_id_token(entry, &stem) {
        score += MOD_ID_BONUS;
    }
    score
}

/// File stem with any browser temporary suffix removed.
fn file_stem(path: &Path) -> String {
    let mut file = path.to_path_buf();
    while is_temp_download(&file) {
        file.set_extension("");
    }
    file.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn has_mod_id_token(entry: &QueueEntry, stem: &str) -> bool {
    let id = entry.mod_id.to_string();
    stem.split(|c: char| !c.is_ascii_alphanumeric())
        .any(|token| token == id)
}

fn normalize(s: &str) -> Vec<char> {
    s.chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(char::to_lowercase)
        .collect()
}

fn longest_common_substring(a: &[char], b: &[char]) -> usize {
    if a.is_empty() || b.is_empty() {
        return 0;
    }
    let mut prev = vec![0usize; b.len() + 1];
    let mut best = 0;
    for ca in a {
        let mut cur = vec![0usize; b.len() + 1];
        for (j, cb) in b.iter().enumerate() {
            if ca == cb {
                cur[j + 1] = prev[j] + 1;
                best = best.max(cur[j + 1]);
            }
        }
        prev = cur;
    }
    best
}

/// A bare UUID name without an archive extension is what Chromium leaves
/// behind for an aborted transfer.
fn corrupt_reason(path: &Path) -> Option<String> {
    let name = path.file_name()?.to_string_lossy();
    let (stem, ext) = match name.rsplit_once('.') {
        Some((stem, ext)) => (stem, Some(ext.to_ascii_lowercase())),
        None => (name.as_ref(), None),
    };
    let archive = ext
        .as_deref()
        .is_some_and(|e| ARCHIVE_EXTENSIONS.contains(&e));
    if !archive && (uuid_re().is_match(stem) || uuid_re().is_match(&name)) {
        return Some(format!("{name} looks like an unnamed aborted transfer"));
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collection::ModLink;

    fn entry(name: &str, mod_id: u64) -> QueueEntry {
        let link = ModLink {
            domain: "skyrimspecialedition".to_string(),
            mod_id,
            file_id: None,
        };
        QueueEntry::from_link(&link, name, 1)
    }

    fn fast() -> Reconciler {
        Reconciler::new(Duration::from_millis(20), Duration::from_millis(100))
    }

    #[test]
    fn test_temp_extensions() {
        assert!(is_temp_download(Path::new("a.zip.crdownload")));
        assert!(is_temp_download(Path::new("a.PART")));
        assert!(is_temp_download(Path::new("x.tmp")));
        assert!(!is_temp_download(Path::new("a.zip")));
        assert!(!is_temp_download(Path::new("noext")));
    }

    #[test]
    fn test_match_score_prefers_name_and_id() {
        let e = entry("SkyUI", 12604);
        let good = match_score(&e, Path::new("SkyUI_5_2_SE-12604-5-2SE.7z"));
        let name_only = match_score(&e, Path::new("SkyUI.7z"));
        let other = match_score(&e, Path::new("Unofficial Patch-266-4-3.zip"));
        assert!(good > name_only);
        assert!(name_only > other);
        assert_eq!(name_only, 5);
        assert_eq!(good, 5 + MOD_ID_BONUS);
        // Temp suffixes are ignored for scoring.
        assert_eq!(match_score(&e, Path::new("SkyUI.7z.crdownload")), name_only);
    }

    #[test]
    fn test_corrupt_reason() {
        assert!(corrupt_reason(Path::new("6f1c2b9a-9a0e-4c3e-8f0a-1b2c3d4e5f60")).is_some());
        assert!(corrupt_reason(Path::new("6F1C2B9A-9A0E-4C3E-8F0A-1B2C3D4E5F60.bin")).is_some());
        assert!(corrupt_reason(Path::new("6f1c2b9a-9a0e-4c3e-8f0a-1b2c3d4e5f60.zip")).is_none());
        assert!(corrupt_reason(Path::new("SkyUI.7z")).is_none());
    }

    #[test]
    fn test_baseline_of_missing_dir_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let baseline = Baseline::snapshot(&dir.path().join("missing")).unwrap();
        assert!(baseline.is_empty());
    }

    #[tokio::test]
    async fn test_new_file_completes_after_stability_window() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("old.zip"), b"old").unwrap();
        let baseline = Baseline::snapshot(dir.path()).unwrap();
        let started = SystemTime::now();

        let target = dir.path().join("SkyUI-12604.7z");
        let writer = target.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(60)).await;
            std::fs::write(writer, vec![1u8; 2048]).unwrap();
        });

        let outcome = fast()
            .await_completion(
                dir.path(),
                &entry("SkyUI", 12604),
                &baseline,
                started,
                Duration::from_secs(3),
            )
            .await;
        assert_eq!(
            outcome,
            ReconcileOutcome::Completed {
                path: target,
                bytes: 2048
            }
        );
    }

    #[tokio::test]
    async fn test_baseline_files_never_match() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("SkyUI-12604.7z"), b"already here").unwrap();
        let baseline = Baseline::snapshot(dir.path()).unwrap();

        let outcome = fast()
            .await_completion(
                dir.path(),
                &entry("SkyUI", 12604),
                &baseline,
                SystemTime::now(),
                Duration::from_millis(300),
            )
            .await;
        assert_eq!(outcome, ReconcileOutcome::TimedOut { partial: None });
    }

    #[tokio::test]
    async fn test_in_progress_file_times_out_with_partial() {
        let dir = tempfile::tempdir().unwrap();
        let baseline = Baseline::snapshot(dir.path()).unwrap();
        let temp = dir.path().join("SkyUI.7z.crdownload");
        std::fs::write(&temp, vec![0u8; 512]).unwrap();

        let outcome = fast()
            .await_completion(
                dir.path(),
                &entry("SkyUI", 12604),
                &baseline,
                SystemTime::now(),
                Duration::from_millis(300),
            )
            .await;
        assert_eq!(outcome, ReconcileOutcome::TimedOut { partial: Some(temp) });
    }

    #[tokio::test]
    async fn test_zero_byte_file_never_completes() {
        let dir = tempfile::tempdir().unwrap();
        let baseline = Baseline::snapshot(dir.path()).unwrap();
        std::fs::write(dir.path().join("SkyUI.7z"), b"").unwrap();

        let outcome = fast()
            .await_completion(
                dir.path(),
                &entry("SkyUI", 12604),
                &baseline,
                SystemTime::now(),
                Duration::from_millis(300),
            )
            .await;
        assert!(matches!(outcome, ReconcileOutcome::TimedOut { .. }));
    }

    #[tokio::test]
    async fn test_uuid_file_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let baseline = Baseline::snapshot(dir.path()).unwrap();
        let bad = dir.path().join("6f1c2b9a-9a0e-4c3e-8f0a-1b2c3d4e5f60");
        std::fs::write(&bad, vec![1u8; 64]).unwrap();

        let outcome = fast()
            .await_completion(
                dir.path(),
                &entry("SkyUI", 12604),
                &baseline,
                SystemTime::now(),
                Duration::from_secs(2),
            )
            .await;
        assert!(matches!(outcome, ReconcileOutcome::Corrupt { path, .. } if path == bad));
    }

    #[tokio::test]
    async fn test_best_match_wins_among_candidates() {
        let dir = tempfile::tempdir().unwrap();
        let baseline = Baseline::snapshot(dir.path()).unwrap();
        std::fs::write(dir.path().join("Unrelated-1.zip"), vec![1u8; 10]).unwrap();
        let wanted = dir.path().join("SkyUI-12604.7z");
        std::fs::write(&wanted, vec![1u8; 10]).unwrap();

        let outcome = fast()
            .await_completion(
                dir.path(),
                &entry("SkyUI", 12604),
                &baseline,
                SystemTime::now(),
                Duration::from_secs(2),
            )
            .await;
        assert!(matches!(outcome, ReconcileOutcome::Completed { path, .. } if path == wanted));
    }

    #[test]
    fn test_belongs_to_requires_id_or_name_overlap() {
        let patch = entry("Unofficial Patch", 266);
        assert!(!belongs_to(&patch, Path::new("SkyUI-12604-5-2.7z")));
        assert!(belongs_to(&patch, Path::new("USSEP-266-4-3-2.7z")));
        assert!(belongs_to(&patch, Path::new("Unofficial Skyrim Patch.zip")));
        // Short names must match in full.
        let ui = entry("UI", 9);
        assert!(belongs_to(&ui, Path::new("UI.zip")));
        assert!(!belongs_to(&ui, Path::new("Other.zip")));
    }

    #[tokio::test]
    async fn test_foreign_download_finishing_late_is_not_claimed() {
        let dir = tempfile::tempdir().unwrap();
        // The previous entry's transfer is still running when this one starts.
        let leftover = dir.path().join("SkyUI-12604-5-2.7z.crdownload");
        std::fs::write(&leftover, vec![1u8; 7]).unwrap();
        let baseline = Baseline::snapshot(dir.path()).unwrap();
        let started = SystemTime::now();

        let renamed = dir.path().join("SkyUI-12604-5-2.7z");
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(40)).await;
            std::fs::rename(leftover, renamed).unwrap();
        });

        let outcome = fast()
            .await_completion(
                dir.path(),
                &entry("Unofficial Patch", 266),
                &baseline,
                started,
                Duration::from_millis(400),
            )
            .await;
        assert!(matches!(outcome, ReconcileOutcome::TimedOut { .. }), "{outcome:?}");
    }

    #[tokio::test]
    async fn test_confirm_stable() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("a.zip");
        std::fs::write(&file, vec![1u8; 100]).unwrap();
        assert_eq!(fast().confirm_stable(&file, Duration::from_secs(2)).await.unwrap(), 100);

        let empty = dir.path().join("b.zip");
        std::fs::write(&empty, b"").unwrap();
        let err = fast().confirm_stable(&empty, Duration::from_millis(200)).await.unwrap_err();
        assert!(err.is_timeout());
    }
}
