//! Core data types for queue entries, acquisition outcomes, and installs.

use crate::collection::ModLink;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// One mod awaiting acquisition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueEntry {
    /// Stable identifier, `<domain>/<mod_id>`.
    pub identifier: String,
    /// Display name as listed on the collection page.
    pub display_name: String,
    /// Canonical mod page URL.
    pub detail_url: String,
    /// 1-based position in page order.
    pub position: usize,
    pub domain: String,
    pub mod_id: u64,
    pub file_id: Option<u64>,
}

impl QueueEntry {
    pub fn from_link(link: &ModLink, display_name: &str, position: usize) -> Self {
        let display_name = if display_name.trim().is_empty() {
            link.identifier()
        } else {
            display_name.trim().to_string()
        };
        Self {
            identifier: link.identifier(),
            display_name,
            detail_url: link.url(),
            position,
            domain: link.domain.clone(),
            mod_id: link.mod_id,
            file_id: link.file_id,
        }
    }

    pub fn link(&self) -> ModLink {
        ModLink {
            domain: self.domain.clone(),
            mod_id: self.mod_id,
            file_id: self.file_id,
        }
    }

    /// URL of the files tab for the click flow.
    pub fn files_url(&self) -> String {
        self.link().files_url()
    }
}

/// Lifecycle of an acquisition. Only moves forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AcquisitionStatus {
    Pending,
    Downloading,
    Completed,
    TimedOut,
    Failed,
}

impl AcquisitionStatus {
    fn rank(self) -> u8 {
        match self {
            Self::Pending => 0,
            Self::Downloading => 1,
            Self::Completed | Self::TimedOut | Self::Failed => 2,
        }
    }

    pub fn is_terminal(self) -> bool {
        self.rank() == 2
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Downloading => "downloading",
            Self::Completed => "completed",
            Self::TimedOut => "timed_out",
            Self::Failed => "failed",
        }
    }
}

impl std::fmt::Display for AcquisitionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How one strategy attempt ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptOutcome {
    Completed,
    NotApplicable,
    TimedOut,
    Failed,
}

/// Record of one strategy attempt for an entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StrategyAttempt {
    pub strategy: String,
    pub outcome: AttemptOutcome,
    pub detail: Option<String>,
    pub elapsed_ms: u64,
}

/// Outcome of acquiring one queue entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AcquisitionResult {
    /// Strategy that produced the file, or the last one tried.
    pub strategy: Option<String>,
    pub file: Option<PathBuf>,
    pub bytes: Option<u64>,
    pub status: AcquisitionStatus,
    pub error: Option<String>,
    #[serde(default)]
    pub attempts: Vec<StrategyAttempt>,
}

impl Default for AcquisitionResult {
    fn default() -> Self {
        Self::pending()
    }
}

impl AcquisitionResult {
    pub fn pending() -> Self {
        Self {
            strategy: None,
            file: None,
            bytes: None,
            status: AcquisitionStatus::Pending,
            error: None,
            attempts: Vec::new(),
        }
    }

    /// Move the status forward. Returns `false` (and changes nothing) when
    /// the transition would go backwards or leave a terminal state.
    pub fn advance(&mut self, next: AcquisitionStatus) -> bool {
        if self.status.is_terminal() || next.rank() < self.status.rank() {
            return false;
        }
        self.status = next;
        true
    }

    pub fn complete(&mut self, strategy: &str, file: PathBuf, bytes: u64) -> bool {
        if !self.advance(AcquisitionStatus::Completed) {
            return false;
        }
        self.strategy = Some(strategy.to_string());
        self.file = Some(file);
        self.bytes = Some(bytes);
        self.error = None;
        true
    }

    pub fn fail(
        &mut self,
        status: AcquisitionStatus,
        strategy: Option<&str>,
        error: String,
    ) -> bool {
        debug_assert!(matches!(status, AcquisitionStatus::Failed | AcquisitionStatus::TimedOut));
        if !self.advance(status) {
            return false;
        }
        self.strategy = strategy.map(String::from);
        self.error = Some(error);
        true
    }

    pub fn is_completed(&self) -> bool {
        self.status == AcquisitionStatus::Completed
    }
}

/// Outcome of staging/installing one archive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstallStatus {
    Staged,
    Installed,
    Skipped,
    Failed,
}

impl std::fmt::Display for InstallStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Staged => "staged",
            Self::Installed => "installed",
            Self::Skipped => "skipped",
            Self::Failed => "failed",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallRecord {
    pub source_archive: PathBuf,
    pub staging_path: Option<PathBuf>,
    pub extracted_path: Option<PathBuf>,
    pub install_path: Option<PathBuf>,
    pub files_copied: usize,
    pub method: Option<String>,
    pub status: InstallStatus,
    pub detail: Option<String>,
}

impl InstallRecord {
    pub fn new(source_archive: PathBuf) -> Self {
        Self {
            source_archive,
            staging_path: None,
            extracted_path: None,
            install_path: None,
            files_copied: 0,
            method: None,
            status: InstallStatus::Failed,
            detail: None,
        }
    }
}

/// One row of the run report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunEntry {
    pub entry: QueueEntry,
    pub acquisition: AcquisitionResult,
    pub install: Option<InstallRecord>,
}

/// Aggregate counts, always derived from the entry list.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub queue_count: usize,
    pub pending: usize,
    pub downloading: usize,
    pub completed: usize,
    pub timed_out: usize,
    pub failed: usize,
    pub installed: usize,
    pub staged: usize,
    pub install_skipped: usize,
    pub install_failed: usize,
}

impl RunSummary {
    pub fn from_entries(entries: &[RunEntry]) -> Self {
        let mut summary = RunSummary {
            queue_count: entries.len(),
            ..Default::default()
        };
        for row in entries {
            match row.acquisition.status {
                AcquisitionStatus::Pending => summary.pending += 1,
                AcquisitionStatus::Downloading => summary.downloading += 1,
                AcquisitionStatus::Completed => summary.completed += 1,
                AcquisitionStatus::TimedOut => summary.timed_out += 1,
                AcquisitionStatus::Failed => summary.failed += 1,
            }
            if let Some(install) = &row.install {
                match install.status {
                    InstallStatus::Installed => summary.installed += 1,
                    InstallStatus::Staged => summary.staged += 1,
                    InstallStatus::Skipped => summary.install_skipped += 1,
                    InstallStatus::Failed => summary.install_failed += 1,
                }
            }
        }
        summary
    }

    /// Entries that need a human to look at them.
    pub fn needing_attention(&self) -> usize {
        self.timed_out + self.failed + self.downloading + self.install_failed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_moves_forward_only() {
        let mut result = AcquisitionResult::pending();
        assert!(result.advance(AcquisitionStatus::Downloading));
        assert!(!result.advance(AcquisitionStatus::Pending));
        assert!(result.complete("click_flow", PathBuf::from("/dl/a.zip"), 10));
        assert_eq!(result.status, AcquisitionStatus::Completed);

        // Terminal states are final.
        assert!(!result.advance(AcquisitionStatus::Failed));
        assert!(!result.fail(AcquisitionStatus::TimedOut, None, "late".to_string()));
        assert_eq!(result.status, AcquisitionStatus::Completed);
        assert_eq!(result.error, None);
    }

    #[test]
    fn test_pending_can_jump_to_terminal() {
        let mut result = AcquisitionResult::pending();
        assert!(result.fail(
            AcquisitionStatus::TimedOut,
            Some("click_flow"),
            "no file".to_string()
        ));
        assert_eq!(result.status, AcquisitionStatus::TimedOut);
        assert_eq!(result.strategy.as_deref(), Some("click_flow"));
    }

    #[test]
    fn test_status_serializes_snake_case() {
        let json = serde_json::to_string(&AcquisitionStatus::TimedOut).unwrap();
        assert_eq!(json, "\"timed_out\"");
        assert_eq!(AcquisitionStatus::TimedOut.to_string(), "timed_out");
    }

    #[test]
    fn test_summary_counts_match_entries() {
        let link = ModLink {
            domain: "skyrim".to_string(),
            mod_id: 1,
            file_id: None,
        };
        let mut completed = AcquisitionResult::pending();
        completed.complete("direct_request", PathBuf::from("a.zip"), 5);
        let mut install = InstallRecord::new(PathBuf::from("a.zip"));
        install.status = InstallStatus::Installed;

        let rows = vec![
            RunEntry {
                entry: QueueEntry::from_link(&link, "A", 1),
                acquisition: completed,
                install: Some(install),
            },
            RunEntry {
                entry: QueueEntry::from_link(&link, "", 2),
                acquisition: AcquisitionResult::pending(),
                install: None,
            },
        ];
        let summary = RunSummary::from_entries(&rows);
        assert_eq!(summary.queue_count, 2);
        assert_eq!(summary.completed, 1);
        assert_eq!(summary.pending, 1);
        assert_eq!(summary.installed, 1);
        assert_eq!(summary.needing_attention(), 0);
        assert_eq!(rows[1].entry.display_name, "skyrim/1");
    }
}
