//! Run reporter: the auditable record of a run.
//!
//! The report is additive. It is rewritten atomically after every entry, at
//! the end of the run, and (if the run never finalized) when the reporter is
//! dropped, so a partial log on disk is always complete, parseable JSON.
//!
//! Files, all under the log directory:
//! - `collection-batch-<run_id>.json`: the full report plus a summary
//!   derived from the entries at write time
//! - `collection-batch-<run_id>.txt`: human-readable rendering
//! - `collection-batch-install-<run_id>.json`: install records only
//! - `collection-batch-install-<run_id>/`: the run's staging directory

use crate::collection::CollectionRef;
use crate::config::RunConfig;
use crate::error::BatchError;
use crate::queue::ExtractionDetails;
use crate::session::SessionInfo;
use crate::types::{InstallRecord, InstallStatus, RunEntry, RunSummary};
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

pub const REPORT_PREFIX: &str = "collection-batch";

/// Local timestamp identifying a run, `YYYYMMDD-HHMMSS`.
pub fn new_run_id() -> String {
    Local::now().format("%Y%m%d-%H%M%S").to_string()
}

/// Settings snapshot recorded with the report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSettings {
    pub cdp_url: String,
    pub downloads_dir: PathBuf,
    pub install_dir: PathBuf,
    pub log_dir: PathBuf,
    pub dry_run: bool,
    pub max_mods: usize,
    pub skip_install: bool,
    pub direct_strategy: bool,
    pub insecure_tls_fallback: bool,
}

impl From<&RunConfig> for RunSettings {
    fn from(config: &RunConfig) -> Self {
        Self {
            cdp_url: config.cdp_url.clone(),
            downloads_dir: config.downloads_dir.clone(),
            install_dir: config.install_dir.clone(),
            log_dir: config.log_dir.clone(),
            dry_run: config.dry_run,
            max_mods: config.max_mods,
            skip_install: config.skip_install,
            direct_strategy: config.direct_strategy,
            insecure_tls_fallback: config.insecure_tls_fallback,
        }
    }
}

/// Everything that happened in one run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: String,
    pub collection: CollectionRef,
    pub settings: RunSettings,
    pub session: Option<SessionInfo>,
    pub started_at: DateTime<Local>,
    pub ended_at: Option<DateTime<Local>>,
    pub game_id: Option<u64>,
    /// Entries found on the page before `max_mods` truncation.
    pub extracted_count: usize,
    pub extraction: Option<ExtractionDetails>,
    pub entries: Vec<RunEntry>,
    pub fatal_error: Option<String>,
    #[serde(default)]
    pub interrupted: bool,
}

impl RunReport {
    pub fn new(run_id: &str, config: &RunConfig) -> Self {
        Self {
            run_id: run_id.to_string(),
            collection: config.collection.clone(),
            settings: RunSettings::from(config),
            session: None,
            started_at: Local::now(),
            ended_at: None,
            game_id: None,
            extracted_count: 0,
            extraction: None,
            entries: Vec::new(),
            fatal_error: None,
            interrupted: false,
        }
    }

    /// Counts derived from the entry list.
    pub fn summary(&self) -> RunSummary {
        RunSummary::from_entries(&self.entries)
    }

    pub fn install_records(&self) -> impl Iterator<Item = (&RunEntry, &InstallRecord)> {
        self.entries
            .iter()
            .filter_map(|row| row.install.as_ref().map(|install| (row, install)))
    }
}

#[derive(Serialize)]
struct ReportDocument<'a> {
    #[serde(flatten)]
    report: &'a RunReport,
    summary: RunSummary,
}

#[derive(Serialize)]
struct InstallLogItem<'a> {
    identifier: &'a str,
    #[serde(flatten)]
    record: &'a InstallRecord,
}

#[derive(Serialize)]
struct InstallLog<'a> {
    run_id: &'a str,
    install_dir: &'a Path,
    staging_dir: &'a Path,
    skip_install: bool,
    installed: usize,
    staged: usize,
    skipped: usize,
    failed: usize,
    results: Vec<InstallLogItem<'a>>,
}

/// Paths of one run's artifacts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportPaths {
    pub json: PathBuf,
    pub text: PathBuf,
    pub install_json: PathBuf,
    pub staging_dir: PathBuf,
}

impl ReportPaths {
    pub fn new(log_dir: &Path, run_id: &str) -> Self {
        Self {
            json: log_dir.join(format!("{REPORT_PREFIX}-{run_id}.json")),
            text: log_dir.join(format!("{REPORT_PREFIX}-{run_id}.txt")),
            install_json: log_dir.join(format!("{REPORT_PREFIX}-install-{run_id}.json")),
            staging_dir: log_dir.join(format!("{REPORT_PREFIX}-install-{run_id}")),
        }
    }

    /// Prefix for zero-queue diagnostics, `collection-batch-<run_id>`.
    pub fn diagnostics_stem(run_id: &str) -> String {
        format!("{REPORT_PREFIX}-{run_id}")
    }
}

/// Owns the report while the run is in progress and keeps it on disk.
pub struct RunReporter {
    report: RunReport,
    paths: ReportPaths,
    finalized: bool,
}

impl RunReporter {
    pub fn new(report: RunReport) -> Result<Self, BatchError> {
        let log_dir = report.settings.log_dir.clone();
        std::fs::create_dir_all(&log_dir)?;
        let paths = ReportPaths::new(&log_dir, &report.run_id);
        Ok(Self {
            report,
            paths,
            finalized: false,
        })
    }

    pub fn report(&self) -> &RunReport {
        &self.report
    }

    pub fn report_mut(&mut self) -> &mut RunReport {
        &mut self.report
    }

    pub fn paths(&self) -> &ReportPaths {
        &self.paths
    }

    /// Append one finished entry and persist.
    pub fn record(&mut self, entry: RunEntry) -> Result<(), BatchError> {
        self.report.entries.push(entry);
        self.flush()
    }

    /// Write every artifact from the current state.
    pub fn flush(&self) -> Result<(), BatchError> {
        let document = ReportDocument {
            report: &self.report,
            summary: self.report.summary(),
        };
        write_atomic(&self.paths.json, &serde_json::to_vec_pretty(&document)?)?;
        write_atomic(&self.paths.text, render_text(&self.report, &self.paths).as_bytes())?;

        if self.report.install_records().next().is_some() {
            let log = serde_json::to_vec_pretty(&self.install_log())?;
            write_atomic(&self.paths.install_json, &log)?;
        }
        debug!("report flushed ({} entries)", self.report.entries.len());
        Ok(())
    }

    fn install_log(&self) -> InstallLog<'_> {
        let results: Vec<_> = self
            .report
            .install_records()
            .map(|(row, record)| InstallLogItem {
                identifier: &row.entry.identifier,
                record,
            })
            .collect();
        let count = |status: InstallStatus| {
            results
                .iter()
                .filter(|r| r.record.status == status)
                .count()
        };
        InstallLog {
            run_id: &self.report.run_id,
            install_dir: &self.report.settings.install_dir,
            staging_dir: &self.paths.staging_dir,
            skip_install: self.report.settings.skip_install,
            installed: count(InstallStatus::Installed),
            staged: count(InstallStatus::Staged),
            skipped: count(InstallStatus::Skipped),
            failed: count(InstallStatus::Failed),
            results,
        }
    }

    /// Stamp the end time and write the final artifacts.
    pub fn finalize(&mut self) -> Result<(), BatchError> {
        self.report.ended_at = Some(Local::now());
        self.finalized = true;
        self.flush()
    }
}

impl Drop for RunReporter {
    fn drop(&mut self) {
        if self.finalized {
            return;
        }
        if self.report.ended_at.is_none() {
            self.report.ended_at = Some(Local::now());
        }
        if self.report.fatal_error.is_none() {
            self.report.fatal_error = Some("run ended before finalizing".to_string());
        }
        if let Err(e) = self.flush() {
            warn!("could not flush run report on drop: {e}");
        }
    }
}

/// Write to a sibling temp file, then rename over `path`.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    std::fs::write(&tmp, bytes)?;
    std::fs::rename(&tmp, path)
}

/// Human-readable rendering of the report.
pub fn render_text(report: &RunReport, paths: &ReportPaths) -> String {
    let summary = report.summary();
    let mut out = String::new();
    let ts = |t: &DateTime<Local>| t.format("%Y-%m-%d %H:%M:%S").to_string();

    let _ = writeln!(out, "run_id: {}", report.run_id);
    let _ = writeln!(out, "collection_url: {}", report.collection.mods_url);
    let _ = writeln!(out, "started_at: {}", ts(&report.started_at));
    if let Some(ended) = &report.ended_at {
        let _ = writeln!(out, "ended_at: {}", ts(ended));
    }
    if let Some(session) = &report.session {
        let _ = writeln!(
            out,
            "session: {} ({}{})",
            session.endpoint,
            session.browser.as_deref().unwrap_or("unknown browser"),
            if session.launched { ", launched by this run" } else { "" }
        );
    }
    let _ = writeln!(out, "dry_run: {}", report.settings.dry_run);
    let _ = writeln!(out, "skip_install: {}", report.settings.skip_install);
    let _ = writeln!(out, "downloads_dir: {}", report.settings.downloads_dir.display());
    let _ = writeln!(out, "install_dir: {}", report.settings.install_dir.display());
    if let Some(game_id) = report.game_id {
        let _ = writeln!(out, "game_id: {game_id}");
    }
    let _ = writeln!(out, "extracted_count: {}", report.extracted_count);
    let _ = writeln!(out, "queue_count: {}", summary.queue_count);
    let _ = writeln!(out, "completed: {}", summary.completed);
    let _ = writeln!(out, "timed_out: {}", summary.timed_out);
    let _ = writeln!(out, "failed: {}", summary.failed);
    let _ = writeln!(out, "downloading: {}", summary.downloading);
    let _ = writeln!(out, "pending: {}", summary.pending);
    let _ = writeln!(out, "installed: {}", summary.installed);
    let _ = writeln!(out, "staged: {}", summary.staged);
    let _ = writeln!(out, "install_skipped: {}", summary.install_skipped);
    let _ = writeln!(out, "install_failed: {}", summary.install_failed);

    if report.interrupted {
        let _ = writeln!(out, "interrupted: true (stopped by the user between entries)");
    }
    if let Some(fatal) = &report.fatal_error {
        let _ = writeln!(out, "fatal_error: {fatal}");
        let _ = writeln!(out, "explanation: {}", explain(fatal));
    }
    if let Some(extraction) = &report.extraction {
        let _ = writeln!(out, "extraction_strategy: {}", extraction.strategy.as_str());
        for (kind, value) in &extraction.artifacts {
            let _ = writeln!(out, "diagnostic_{kind}: {value}");
        }
    }
    let _ = writeln!(out, "json_log: {}", paths.json.display());
    let _ = writeln!(out, "staging_dir: {}", paths.staging_dir.display());

    if !report.entries.is_empty() {
        let _ = writeln!(out);
        let _ = writeln!(out, "entries:");
    }
    for row in &report.entries {
        let acq = &row.acquisition;
        let mut line = format!(
            "  [{:>3}] {:<11} {}  {}",
            row.entry.position, acq.status, row.entry.identifier, row.entry.display_name
        );
        if let Some(strategy) = &acq.strategy {
            let _ = write!(line, "  via {strategy}");
        }
        if let Some(file) = &acq.file {
            let _ = write!(line, "  -> {}", file.display());
            if let Some(bytes) = acq.bytes {
                let _ = write!(line, " ({bytes} bytes)");
            }
        }
        if let Some(install) = &row.install {
            let _ = write!(line, "  | install: {}", install.status);
            if let Some(detail) = &install.detail {
                let _ = write!(line, " ({detail})");
            }
        }
        let _ = writeln!(out, "{line}");
        if let Some(error) = &acq.error {
            let _ = writeln!(out, "        error: {error}");
        }
    }
    out
}

fn explain(fatal: &str) -> &'static str {
    let lower = fatal.to_ascii_lowercase();
    if lower.contains("session unavailable") || lower.contains("cdp endpoint") {
        "no browser answered on the remote-debugging endpoint; start Brave/Chrome with \
         --remote-debugging-port (or run `collection-batch doctor`) and retry"
    } else if lower.contains("no mod entries") {
        "the collection page showed no mods; check the diagnostics files, that the URL is \
         right, and that the browser is logged in"
    } else if lower.contains("interrupted") {
        "the run was stopped early; entries not reached are absent from this report"
    } else {
        "the run stopped before processing every entry; see the JSON log for details"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collection::ModLink;
    use crate::types::{AcquisitionResult, AcquisitionStatus, QueueEntry};

    fn config(log_dir: &Path) -> RunConfig {
        let collection = CollectionRef::parse(
            "https://www.nexusmods.com/games/skyrimspecialedition/collections/abc123",
        )
        .unwrap();
        let mut config = RunConfig::new(collection, log_dir.join("dl"), log_dir.join("mods"));
        config.log_dir = log_dir.to_path_buf();
        config
    }

    fn row(mod_id: u64, status: AcquisitionStatus) -> RunEntry {
        let link = ModLink {
            domain: "skyrimspecialedition".to_string(),
            mod_id,
            file_id: None,
        };
        let mut acquisition = AcquisitionResult::pending();
        match status {
            AcquisitionStatus::Completed => {
                acquisition.complete("click_flow", PathBuf::from(format!("/dl/{mod_id}.zip")), 42);
            }
            AcquisitionStatus::Pending => {}
            other => {
                acquisition.fail(other, Some("click_flow"), "no file".to_string());
            }
        }
        RunEntry {
            entry: QueueEntry::from_link(&link, &format!("Mod {mod_id}"), mod_id as usize),
            acquisition,
            install: None,
        }
    }

    #[test]
    fn test_report_paths() {
        let paths = ReportPaths::new(Path::new("logs"), "20260101-120000");
        assert_eq!(paths.json, Path::new("logs/collection-batch-20260101-120000.json"));
        assert_eq!(paths.text, Path::new("logs/collection-batch-20260101-120000.txt"));
        assert_eq!(
            paths.install_json,
            Path::new("logs/collection-batch-install-20260101-120000.json")
        );
        assert_eq!(paths.staging_dir, Path::new("logs/collection-batch-install-20260101-120000"));
    }

    #[test]
    fn test_run_id_format() {
        let id = new_run_id();
        assert_eq!(id.len(), 15);
        assert_eq!(&id[8..9], "-");
        assert!(id.chars().filter(|c| *c != '-').all(|c| c.is_ascii_digit()));
    }

    #[test]
    fn test_record_persists_after_each_entry() {
        let dir = tempfile::tempdir().unwrap();
        let mut reporter =
            RunReporter::new(RunReport::new("20260101-120000", &config(dir.path()))).unwrap();

        reporter.record(row(1, AcquisitionStatus::Completed)).unwrap();
        let json: serde_json::Value =
            serde_json::from_slice(&std::fs::read(&reporter.paths().json).unwrap()).unwrap();
        assert_eq!(json["entries"].as_array().unwrap().len(), 1);
        assert_eq!(json["summary"]["completed"], 1);

        reporter.record(row(2, AcquisitionStatus::TimedOut)).unwrap();
        reporter.finalize().unwrap();
        let text = std::fs::read_to_string(&reporter.paths().text).unwrap();
        assert!(text.contains("queue_count: 2"));
        assert!(text.contains("timed_out: 1"));
        assert!(text.contains("error: no file"));

        let parsed: RunReport =
            serde_json::from_slice(&std::fs::read(&reporter.paths().json).unwrap()).unwrap();
        assert_eq!(parsed.entries.len(), 2);
        assert!(parsed.ended_at.is_some());
        assert!(!reporter.paths().json.with_extension("json.tmp").exists());
    }

    #[test]
    fn test_summary_always_matches_entries() {
        let dir = tempfile::tempdir().unwrap();
        let mut report = RunReport::new("r", &config(dir.path()));
        report.entries = vec![
            row(1, AcquisitionStatus::Completed),
            row(2, AcquisitionStatus::Failed),
            row(3, AcquisitionStatus::Pending),
        ];
        let summary = report.summary();
        assert_eq!(summary.queue_count, report.entries.len());
        assert_eq!(summary.completed + summary.failed + summary.pending, 3);
    }

    #[test]
    fn test_drop_flushes_unfinalized_report() {
        let dir = tempfile::tempdir().unwrap();
        let json_path = {
            let mut reporter =
                RunReporter::new(RunReport::new("20260101-120001", &config(dir.path()))).unwrap();
            reporter.report_mut().entries.push(row(7, AcquisitionStatus::Pending));
            reporter.paths().json.clone()
        };

        let parsed: RunReport =
            serde_json::from_slice(&std::fs::read(&json_path).unwrap()).unwrap();
        assert_eq!(parsed.entries.len(), 1);
        assert!(parsed.ended_at.is_some());
        assert!(parsed.fatal_error.is_some());
    }

    #[test]
    fn test_install_log_written_when_records_exist() {
        let dir = tempfile::tempdir().unwrap();
        let mut reporter =
            RunReporter::new(RunReport::new("20260101-120002", &config(dir.path()))).unwrap();
        reporter.record(row(1, AcquisitionStatus::Pending)).unwrap();
        assert!(!reporter.paths().install_json.exists());

        let mut done = row(2, AcquisitionStatus::Completed);
        let mut install = InstallRecord::new(PathBuf::from("/dl/2.zip"));
        install.status = InstallStatus::Staged;
        done.install = Some(install);
        reporter.record(done).unwrap();

        let log_bytes = std::fs::read(&reporter.paths().install_json).unwrap();
        let log: serde_json::Value = serde_json::from_slice(&log_bytes).unwrap();
        assert_eq!(log["staged"], 1);
        assert_eq!(log["results"][0]["identifier"], "skyrimspecialedition/2");
        assert_eq!(log["results"][0]["status"], "staged");
        reporter.finalize().unwrap();
    }

    #[test]
    fn test_fatal_error_is_explained() {
        let dir = tempfile::tempdir().unwrap();
        let mut report = RunReport::new("r", &config(dir.path()));
        report.fatal_error = Some("collection page yielded no mod entries".to_string());
        let text = render_text(&report, &ReportPaths::new(dir.path(), "r"));
        assert!(text.contains("fatal_error: collection page yielded no mod entries"));
        assert!(text.contains("explanation: the collection page showed no mods"));
    }
}
