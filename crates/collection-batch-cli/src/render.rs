//! Console rendering of live progress and the end-of-run summary.

use collection_batch::progress::{ProgressEvent, ProgressEventKind, ProgressReceiver};
use collection_batch::{AcquisitionStatus, InstallStatus, RunOutcome};
use indicatif::{ProgressBar, ProgressStyle};
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;

/// Draws one bar over the queue, fed by the run's progress events.
pub struct ConsoleRenderer {
    bar: ProgressBar,
}

impl Default for ConsoleRenderer {
    fn default() -> Self {
        Self::new()
    }
}

impl ConsoleRenderer {
    pub fn new() -> Self {
        let bar = ProgressBar::new_spinner();
        bar.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.green} [{elapsed_precise}] {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        bar.set_message("connecting to browser");
        Self { bar }
    }

    /// A renderer that draws nothing, for non-interactive output.
    pub fn hidden() -> Self {
        Self {
            bar: ProgressBar::hidden(),
        }
    }

    fn switch_to_queue(&self, total: usize) {
        self.bar.set_length(total as u64);
        self.bar.set_position(0);
        self.bar.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{bar:30.cyan/blue}] {pos}/{len} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("█▓░"),
        );
    }

    /// Update the display for one event.
    pub fn handle(&self, event: &ProgressEvent) {
        match &event.event {
            ProgressEventKind::SessionReady {
                endpoint,
                browser,
                launched,
            } => {
                let how = if *launched { "launched" } else { "attached" };
                self.bar.println(format!(
                    "  {how} {} at {endpoint}",
                    browser.as_deref().unwrap_or("browser")
                ));
                self.bar.set_message("reading collection");
            }
            ProgressEventKind::QueueExtracted { total, processing } => {
                if processing < total {
                    self.bar.println(format!("  {total} mods found, processing {processing}"));
                } else {
                    self.bar.println(format!("  {total} mods found"));
                }
                self.switch_to_queue(*processing);
            }
            ProgressEventKind::EntryStarted { display_name, .. } => {
                self.bar.set_message(display_name.clone());
            }
            ProgressEventKind::StrategyFailed {
                identifier,
                strategy,
                detail,
            } => {
                self.bar.println(format!("  {identifier}: {strategy} gave up ({detail})"));
            }
            ProgressEventKind::EntryAcquired {
                identifier, status, ..
            } => {
                self.bar.inc(1);
                if matches!(status, AcquisitionStatus::TimedOut | AcquisitionStatus::Failed) {
                    self.bar.println(format!("  [!!] {identifier}: {status}"));
                }
            }
            ProgressEventKind::EntryInstalled {
                identifier, status, ..
            } => {
                if *status == InstallStatus::Failed {
                    self.bar.println(format!("  [!!] {identifier}: install failed"));
                }
            }
            ProgressEventKind::RunFinished { .. } => {
                self.bar.finish_and_clear();
            }
            ProgressEventKind::Warning { message } => {
                self.bar.println(format!("  warning: {message}"));
            }
        }
    }

    /// Consume events until the channel closes.
    pub fn spawn(self, mut rx: ProgressReceiver) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => self.handle(&event),
                    Err(RecvError::Lagged(_)) => continue,
                    Err(RecvError::Closed) => break,
                }
            }
            self.bar.finish_and_clear();
        })
    }
}

/// End-of-run summary lines.
pub fn summary_lines(outcome: &RunOutcome) -> Vec<String> {
    let s = &outcome.summary;
    let report = &outcome.report;
    let mut lines = vec![
        format!("Queue size:        {}", s.queue_count),
        format!("Downloaded:        {}", s.completed),
        format!("Need attention:    {}", s.needing_attention()),
    ];
    if !report.settings.dry_run {
        lines.push(format!("Installed:         {}", s.installed));
        if s.staged > 0 {
            lines.push(format!("Staged only:       {}", s.staged));
        }
        lines.push(format!("Install failures:  {}", s.install_failed));
    }
    if report.interrupted {
        lines.push("Interrupted:       yes".to_string());
    }
    if let Some(fatal) = &report.fatal_error {
        lines.push(format!("Run failed:        {fatal}"));
    }
    lines.push(format!("Log (json):        {}", outcome.paths.json.display()));
    lines.push(format!("Log (text):        {}", outcome.paths.text.display()));
    if report.entries.iter().any(|r| r.install.is_some()) {
        lines.push(format!("Install log:       {}", outcome.paths.install_json.display()));
    }
    lines
}

pub fn print_summary(outcome: &RunOutcome) {
    println!();
    for line in summary_lines(outcome) {
        println!("  {line}");
    }
    for row in outcome.report.entries.iter().filter(|r| {
        matches!(
            r.acquisition.status,
            AcquisitionStatus::TimedOut | AcquisitionStatus::Failed | AcquisitionStatus::Downloading
        )
    }) {
        println!(
            "    [!!] {} ({}): {}",
            row.entry.display_name,
            row.acquisition.status,
            row.acquisition.error.as_deref().unwrap_or("no detail")
        );
    }
}
