//! Turn flags, saved defaults and (optionally) interactive answers into one
//! immutable [`RunConfig`].

use crate::args::RunArgs;
use crate::config::UserDefaults;
use collection_batch::config::DEFAULT_CDP_URL;
use collection_batch::{CollectionRef, ExtractionError, RunConfig, Timing};
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_INSTALL_DIR: &str = "mods";
pub const DEFAULT_LOG_DIR: &str = "logs";

/// Problems with what the user asked for. These map to exit status 2.
#[derive(thiserror::Error, Debug)]
pub enum InputError {
    #[error("no collection URL given (pass --collection or run without --no-prompt once)")]
    MissingCollection,

    #[error("no install folder given (pass --install-dir or run without --no-prompt once)")]
    MissingInstallDir,

    #[error(transparent)]
    InvalidCollection(#[from] ExtractionError),

    #[error("--{flag} must be a non-negative number of seconds, got {value}")]
    InvalidSeconds { flag: &'static str, value: f64 },

    #[error("run cancelled")]
    Declined,

    #[error("prompt failed: {0}")]
    Prompt(String),
}

/// Asks the user for values.
pub trait Prompter {
    /// Ask for a value. An empty answer keeps `default`.
    fn ask(&mut self, label: &str, default: Option<&str>) -> Result<String, InputError>;
    /// Show the summary and ask whether to go ahead.
    fn confirm(&mut self, summary: &str) -> Result<bool, InputError>;
}

/// Line-editing prompts on the terminal.
pub struct ReadlinePrompter {
    editor: DefaultEditor,
}

impl ReadlinePrompter {
    pub fn new() -> Result<Self, InputError> {
        let editor = DefaultEditor::new().map_err(|e| InputError::Prompt(e.to_string()))?;
        Ok(Self { editor })
    }

    fn readline(&mut self, prompt: &str, initial: &str) -> Result<String, InputError> {
        match self.editor.readline_with_initial(prompt, (initial, "")) {
            Ok(line) => Ok(line.trim().to_string()),
            Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => Err(InputError::Declined),
            Err(e) => Err(InputError::Prompt(e.to_string())),
        }
    }
}

impl Prompter for ReadlinePrompter {
    fn ask(&mut self, label: &str, default: Option<&str>) -> Result<String, InputError> {
        let answer = self.readline(&format!("  {label}: "), default.unwrap_or(""))?;
        Ok(if answer.is_empty() {
            default.unwrap_or_default().to_string()
        } else {
            answer
        })
    }

    fn confirm(&mut self, summary: &str) -> Result<bool, InputError> {
        eprintln!();
        eprintln!("{summary}");
        let answer = self.readline("  Start? [Y/n] ", "")?;
        Ok(matches!(answer.to_ascii_lowercase().as_str(), "" | "y" | "yes"))
    }
}

fn seconds(
    flag: &'static str,
    value: Option<f64>,
    fallback: Duration,
) -> Result<Duration, InputError> {
    match value {
        None => Ok(fallback),
        Some(v) if v.is_finite() && v >= 0.0 => Ok(Duration::from_secs_f64(v)),
        Some(v) => Err(InputError::InvalidSeconds { flag, value: v }),
    }
}

/// The user's downloads folder, falling back to `~/Downloads`.
pub fn default_downloads_dir() -> PathBuf {
    dirs::download_dir()
        .or_else(|| dirs::home_dir().map(|h| h.join("Downloads")))
        .unwrap_or_else(|| PathBuf::from("Downloads"))
}

fn timing_from(args: &RunArgs) -> Result<Timing, InputError> {
    let base = Timing::default();
    Ok(Timing {
        click_timeout: seconds("click-timeout", args.click_timeout, base.click_timeout)?,
        download_timeout: seconds(
            "download-timeout",
            args.download_timeout,
            base.download_timeout,
        )?,
        direct_request_timeout: seconds(
            "direct-timeout",
            args.direct_timeout,
            base.direct_request_timeout,
        )?,
        delay_between_entries: seconds("delay", args.delay, base.delay_between_entries)?,
        ..base
    }
    .clamped())
}

/// Human-readable summary shown before a run starts.
pub fn describe(config: &RunConfig) -> String {
    let mut lines = vec![
        format!("  Collection:  {}", config.collection.mods_url),
        format!("  Downloads:   {}", config.downloads_dir.display()),
        format!("  Install to:  {}", config.install_dir.display()),
        format!("  Logs:        {}", config.log_dir.display()),
        format!("  Browser:     {}", config.cdp_url),
    ];
    let mut mode = Vec::new();
    if config.dry_run {
        mode.push("dry run".to_string());
    }
    if config.skip_install {
        mode.push("skip install".to_string());
    }
    if config.max_mods > 0 {
        mode.push(format!("first {} mods", config.max_mods));
    }
    if !config.direct_strategy {
        mode.push("click flow only".to_string());
    }
    if !mode.is_empty() {
        lines.push(format!("  Mode:        {}", mode.join(", ")));
    }
    lines.join("\n")
}

/// Resolve the run settings. With a prompter, every value is confirmed
/// interactively; without one, missing required values are errors.
/// Returns the config and the defaults to save for next time.
pub fn resolve(
    args: &RunArgs,
    saved: &UserDefaults,
    mut prompter: Option<&mut dyn Prompter>,
) -> Result<(RunConfig, UserDefaults), InputError> {
    let mut collection_url = args.collection.clone().or_else(|| saved.collection_url.clone());
    let mut downloads_dir = args
        .downloads_dir
        .clone()
        .or_else(|| saved.downloads_dir.clone())
        .unwrap_or_else(default_downloads_dir);
    let mut install_dir = args.install_dir.clone().or_else(|| saved.install_dir.clone());

    if let Some(p) = prompter.as_deref_mut() {
        let answer = p.ask("Collection URL", collection_url.as_deref())?;
        collection_url = Some(answer).filter(|a| !a.is_empty());

        let shown = downloads_dir.display().to_string();
        downloads_dir = PathBuf::from(p.ask("Downloads folder", Some(&shown))?);

        let shown = install_dir
            .as_ref()
            .map(|d| d.display().to_string())
            .unwrap_or_else(|| DEFAULT_INSTALL_DIR.to_string());
        install_dir = Some(PathBuf::from(p.ask("Install folder", Some(&shown))?));
    }

    let collection = CollectionRef::parse(&collection_url.ok_or(InputError::MissingCollection)?)?;
    let install_dir = install_dir.ok_or(InputError::MissingInstallDir)?;

    let mut config = RunConfig::new(collection, downloads_dir, install_dir);
    config.log_dir = args
        .log_dir
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_LOG_DIR));
    config.cdp_url = args
        .cdp_url
        .clone()
        .or_else(|| saved.cdp_url.clone())
        .unwrap_or_else(|| DEFAULT_CDP_URL.to_string());
    config.dry_run = args.dry_run;
    config.max_mods = args.max_mods;
    config.skip_install = args.skip_install;
    config.direct_strategy = !args.no_direct;
    config.insecure_tls_fallback = args.insecure_tls;
    config.timing = timing_from(args)?;

    if let Some(p) = prompter {
        if !p.confirm(&describe(&config))? {
            return Err(InputError::Declined);
        }
    }

    let defaults = UserDefaults {
        collection_url: Some(config.collection.mods_url.clone()),
        downloads_dir: Some(config.downloads_dir.clone()),
        install_dir: Some(config.install_dir.clone()),
        cdp_url: Some(config.cdp_url.clone()),
    };
    Ok((config, defaults))
}
