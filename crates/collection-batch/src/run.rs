//! The run loop: one sequential pass over a collection.
//!
//! Session -> queue -> (per entry) strategy chain -> install stager ->
//! reporter. Per-entry failures are recorded and the loop moves on. Only
//! run-level failures (no session, empty queue, report I/O) end the run
//! early, and even then the report is finalized.

use crate::acquisition::{AcquisitionContext, StrategyChain};
use crate::config::RunConfig;
use crate::error::{error_chain, BatchError, ExtractionError};
use crate::install::InstallStager;
use crate::progress::{self, ProgressEventKind, ProgressSender};
use crate::queue::{extract_queue, DiagnosticsTarget};
use crate::report::{new_run_id, ReportPaths, RunReport, RunReporter};
use crate::session::{cookie_header, BrowserSession, SessionSource};
use crate::types::{AcquisitionResult, AttemptOutcome, QueueEntry, RunEntry, RunSummary};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Notify;
use tracing::{error, info, warn};

/// Cooperative cancellation. A stop is honored between entries; an abort
/// also abandons the entry in flight.
#[derive(Debug, Clone, Default)]
pub struct StopFlag {
    stopped: Arc<AtomicBool>,
    aborted: Arc<AtomicBool>,
    abort_notify: Arc<Notify>,
}

impl StopFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /// Stop now, without waiting for the current entry.
    pub fn abort(&self) {
        self.stop();
        self.aborted.store(true, Ordering::SeqCst);
        self.abort_notify.notify_waiters();
    }

    pub fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::SeqCst)
    }

    /// Resolves once [`StopFlag::abort`] has been called.
    pub async fn aborted(&self) {
        loop {
            let notified = self.abort_notify.notified();
            if self.is_aborted() {
                return;
            }
            notified.await;
        }
    }
}

/// What a finished run hands back to the caller.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub report: RunReport,
    pub paths: ReportPaths,
    pub summary: RunSummary,
}

impl RunOutcome {
    /// `0` when the run itself succeeded (whatever happened per entry),
    /// `130` when interrupted, `1` on a run-level failure.
    pub fn exit_code(&self) -> i32 {
        if self.report.interrupted {
            130
        } else if self.report.fatal_error.is_some() {
            1
        } else {
            0
        }
    }

    pub fn is_success(&self) -> bool {
        self.exit_code() == 0
    }
}

pub struct Runner {
    source: Arc<dyn SessionSource>,
    config: RunConfig,
    run_id: String,
    progress: Option<ProgressSender>,
    stop: StopFlag,
    chain: Option<StrategyChain>,
}

impl Runner {
    pub fn new(source: Arc<dyn SessionSource>, config: RunConfig) -> Self {
        Self {
            source,
            config,
            run_id: new_run_id(),
            progress: None,
            stop: StopFlag::new(),
            chain: None,
        }
    }

    pub fn with_progress(mut self, tx: ProgressSender) -> Self {
        self.progress = Some(tx);
        self
    }

    pub fn with_stop_flag(mut self, stop: StopFlag) -> Self {
        self.stop = stop;
        self
    }

    /// Replace the standard strategy chain.
    pub fn with_chain(mut self, chain: StrategyChain) -> Self {
        self.chain = Some(chain);
        self
    }

    pub fn with_run_id(mut self, run_id: impl Into<String>) -> Self {
        self.run_id = run_id.into();
        self
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Execute the run. Returns `Err` only when the report itself cannot be
    /// created; every other failure is recorded in the outcome.
    pub async fn run(mut self) -> Result<RunOutcome, BatchError> {
        let started = Instant::now();
        let chain = self
            .chain
            .take()
            .unwrap_or_else(|| StrategyChain::standard(&self.config));
        let mut reporter = RunReporter::new(RunReport::new(&self.run_id, &self.config))?;
        let mut seq = 0u64;

        info!(
            "run {} starting: {} (dry_run={}, max_mods={}, strategies={:?})",
            self.run_id,
            self.config.collection.mods_url,
            self.config.dry_run,
            self.config.max_mods,
            chain.names()
        );

        if let Err(e) = self.drive(&chain, &mut reporter, &mut seq).await {
            let detail = error_chain(&e);
            error!("run {} failed: {detail}", self.run_id);
            reporter.report_mut().fatal_error = Some(detail);
        }
        reporter.finalize()?;

        let report = reporter.report().clone();
        let summary = report.summary();
        self.emit(
            &mut seq,
            ProgressEventKind::RunFinished {
                completed: summary.completed,
                needing_attention: summary.needing_attention(),
                elapsed_ms: started.elapsed().as_millis() as u64,
            },
        );
        info!(
            "run {} finished: {} entries, {} completed, {} need attention",
            self.run_id,
            summary.queue_count,
            summary.completed,
            summary.needing_attention()
        );

        Ok(RunOutcome {
            paths: reporter.paths().clone(),
            report,
            summary,
        })
    }

    fn emit(&self, seq: &mut u64, kind: ProgressEventKind) {
        progress::emit(&self.progress, &self.run_id, seq, kind);
    }

    async fn drive(
        &self,
        chain: &StrategyChain,
        reporter: &mut RunReporter,
        seq: &mut u64,
    ) -> Result<(), BatchError> {
        let session = self.source.acquire().await?;
        let info = session.info();
        info!("attached to {} ({})", info.endpoint, info.browser.as_deref().unwrap_or("unknown"));
        self.emit(
            seq,
            ProgressEventKind::SessionReady {
                endpoint: info.endpoint.clone(),
                browser: info.browser.clone(),
                launched: info.launched,
            },
        );
        reporter.report_mut().session = Some(info);

        let result = self.process(session.as_ref(), chain, reporter, seq).await;
        if let Err(e) = session.close().await {
            warn!("could not close page: {e}");
        }
        result
    }

    async fn process(
        &self,
        session: &dyn BrowserSession,
        chain: &StrategyChain,
        reporter: &mut RunReporter,
        seq: &mut u64,
    ) -> Result<(), BatchError> {
        let config = &self.config;

        if !config.dry_run {
            std::fs::create_dir_all(&config.downloads_dir)?;
            if let Err(e) = session.set_download_dir(&config.downloads_dir).await {
                let message = format!("could not steer browser downloads: {e}");
                warn!("{message}");
                self.emit(seq, ProgressEventKind::Warning { message });
            }
        }

        let stem = ReportPaths::diagnostics_stem(&self.run_id);
        let extraction = extract_queue(
            session,
            &config.collection,
            &config.timing,
            DiagnosticsTarget {
                dir: &config.log_dir,
                stem: &stem,
            },
        )
        .await?;

        let found = extraction.entries.len();
        {
            let report = reporter.report_mut();
            report.game_id = extraction.details.game_id;
            report.extracted_count = found;
            report.extraction = Some(extraction.details);
        }
        if found == 0 {
            return Err(ExtractionError::EmptyQueue.into());
        }

        let mut entries = extraction.entries;
        if config.max_mods > 0 && entries.len() > config.max_mods {
            entries.truncate(config.max_mods);
        }
        let total = entries.len();
        info!("processing {total} of {found} entries");
        self.emit(
            seq,
            ProgressEventKind::QueueExtracted {
                total: found,
                processing: total,
            },
        );
        reporter.flush()?;

        let origin = config.collection.origin();
        let cookie_header = if config.dry_run || !config.direct_strategy {
            None
        } else {
            match session.cookies(&origin).await {
                Ok(cookies) if !cookies.is_empty() => Some(cookie_header(&cookies)),
                Ok(_) => None,
                Err(e) => {
                    warn!("could not read session cookies: {e}");
                    None
                }
            }
        };
        let ctx = AcquisitionContext {
            downloads_dir: config.downloads_dir.clone(),
            origin,
            game_id: reporter.report().game_id,
            cookie_header,
            timing: config.timing.clone(),
        };
        let mut stager = InstallStager::new(
            config.install_dir.clone(),
            reporter.paths().staging_dir.clone(),
            config.skip_install,
        );

        let mut queue = entries.into_iter().enumerate();
        while let Some((index, entry)) = queue.next() {
            if index > 0 && !config.dry_run && !config.timing.delay_between_entries.is_zero() {
                tokio::select! {
                    () = tokio::time::sleep(config.timing.delay_between_entries) => {}
                    () = self.stop.aborted() => {}
                }
            }
            if self.stop.is_stopped() {
                warn!("stop requested; {} entries not processed", total - index);
                let rest = std::iter::once(entry).chain(queue.by_ref().map(|(_, rest)| rest));
                record_unprocessed(reporter, rest)?;
                break;
            }

            self.emit(
                seq,
                ProgressEventKind::EntryStarted {
                    position: index + 1,
                    total,
                    identifier: entry.identifier.clone(),
                    display_name: entry.display_name.clone(),
                },
            );
            let started = Instant::now();

            let acquired = if config.dry_run {
                info!("[{}/{total}] {} (dry run, not acquired)", index + 1, entry.identifier);
                Some(AcquisitionResult::pending())
            } else {
                info!("[{}/{total}] {}", index + 1, entry.identifier);
                tokio::select! {
                    result = chain.acquire(session, &entry, &ctx) => Some(result),
                    () = self.stop.aborted() => None,
                }
            };
            let Some(acquisition) = acquired else {
                warn!(
                    "aborted during {}; {} entries not processed",
                    entry.identifier,
                    total - index
                );
                let rest = std::iter::once(entry).chain(queue.by_ref().map(|(_, rest)| rest));
                record_unprocessed(reporter, rest)?;
                break;
            };

            for attempt in &acquisition.attempts {
                if attempt.outcome != AttemptOutcome::Completed {
                    self.emit(
                        seq,
                        ProgressEventKind::StrategyFailed {
                            identifier: entry.identifier.clone(),
                            strategy: attempt.strategy.clone(),
                            detail: attempt.detail.clone().unwrap_or_default(),
                        },
                    );
                }
            }
            self.emit(
                seq,
                ProgressEventKind::EntryAcquired {
                    identifier: entry.identifier.clone(),
                    status: acquisition.status,
                    strategy: acquisition.strategy.clone(),
                    elapsed_ms: started.elapsed().as_millis() as u64,
                },
            );

            let install = stager.stage_and_install(&acquisition);
            if let Some(record) = &install {
                self.emit(
                    seq,
                    ProgressEventKind::EntryInstalled {
                        identifier: entry.identifier.clone(),
                        status: record.status,
                        files_copied: record.files_copied,
                    },
                );
            }

            reporter.record(RunEntry {
                entry,
                acquisition,
                install,
            })?;
        }
        Ok(())
    }
}

/// Mark the run interrupted and keep every entry it never finished in the
/// report as pending.
fn record_unprocessed(
    reporter: &mut RunReporter,
    rest: impl Iterator<Item = QueueEntry>,
) -> Result<(), BatchError> {
    reporter.report_mut().interrupted = true;
    for entry in rest {
        reporter.record(RunEntry {
            entry,
            acquisition: AcquisitionResult::pending(),
            install: None,
        })?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collection::CollectionRef;
    use std::path::Path;

    fn outcome(dir: &Path) -> RunOutcome {
        let collection = CollectionRef::parse(
            "https://www.nexusmods.com/games/skyrimspecialedition/collections/abc123",
        )
        .unwrap();
        let mut config = RunConfig::new(collection, dir.join("dl"), dir.join("mods"));
        config.log_dir = dir.to_path_buf();
        let report = RunReport::new("r", &config);
        RunOutcome {
            summary: report.summary(),
            paths: ReportPaths::new(dir, "r"),
            report,
        }
    }

    #[test]
    fn test_stop_flag_shared_between_clones() {
        let flag = StopFlag::new();
        let handle = flag.clone();
        assert!(!flag.is_stopped());
        handle.stop();
        assert!(flag.is_stopped());
    }

    #[tokio::test]
    async fn test_abort_wakes_waiters_and_implies_stop() {
        let flag = StopFlag::new();
        let waiter = flag.clone();
        let waiting = tokio::spawn(async move { waiter.aborted().await });

        flag.stop();
        assert!(!flag.is_aborted());
        flag.abort();
        assert!(flag.is_stopped());
        tokio::time::timeout(std::time::Duration::from_secs(1), waiting)
            .await
            .unwrap()
            .unwrap();
        // Already aborted: resolves immediately.
        flag.aborted().await;
    }

    #[test]
    fn test_exit_codes() {
        let dir = tempfile::tempdir().unwrap();
        let mut out = outcome(dir.path());
        assert_eq!(out.exit_code(), 0);
        assert!(out.is_success());

        out.report.fatal_error = Some("browser session unavailable: nothing listening".to_string());
        assert_eq!(out.exit_code(), 1);

        out.report.interrupted = true;
        assert_eq!(out.exit_code(), 130);
    }
}
