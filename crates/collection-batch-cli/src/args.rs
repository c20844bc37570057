//! Command-line arguments.

use clap::{Args, Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "collection-batch",
    about = "Download and install every mod in a collection through your logged-in browser",
    version,
    after_help = "Run 'collection-batch <command> --help' for details on each command.\nWith no command, 'run' is assumed."
)]
pub struct Cli {
    /// Log level (trace, debug, info, warn, error). RUST_LOG takes precedence.
    #[arg(long, global = true, default_value = "info")]
    pub log_level: String,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    pub json_logs: bool,

    /// Path to the saved defaults file.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,

    #[command(flatten)]
    pub run: RunArgs,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Process a collection (the default).
    Run(RunArgs),
    /// Check the browser, endpoint, folders and 7-Zip.
    Doctor {
        #[arg(long)]
        cdp_url: Option<String>,
        #[arg(long)]
        downloads_dir: Option<PathBuf>,
    },
    /// Make a browser profile save downloads without prompting.
    ConfigureBrowser {
        /// Folder downloads should land in.
        #[arg(long)]
        downloads_dir: Option<PathBuf>,
        /// Profile `Preferences` file (defaults to Brave's Default profile).
        #[arg(long)]
        preferences: Option<PathBuf>,
    },
    /// Generate shell completion scripts.
    Completions {
        /// Shell type (bash, zsh, fish, powershell, elvish).
        shell: Shell,
    },
}

#[derive(Args, Debug, Clone, Default)]
pub struct RunArgs {
    /// Collection URL, e.g. https://www.nexusmods.com/games/<game>/collections/<slug>
    #[arg(long)]
    pub collection: Option<String>,

    #[arg(long)]
    pub downloads_dir: Option<PathBuf>,

    #[arg(long)]
    pub install_dir: Option<PathBuf>,

    /// Where run reports and diagnostics are written.
    #[arg(long)]
    pub log_dir: Option<PathBuf>,

    /// Remote-debugging endpoint of the browser.
    #[arg(long)]
    pub cdp_url: Option<String>,

    /// Browser executable to launch when the endpoint is down.
    #[arg(long)]
    pub browser: Option<PathBuf>,

    /// Never launch a browser; fail if the endpoint is down.
    #[arg(long)]
    pub no_launch: bool,

    /// Extract the queue and report it without downloading or installing.
    #[arg(long)]
    pub dry_run: bool,

    /// Process at most N entries (0 = all).
    #[arg(long, default_value_t = 0)]
    pub max_mods: usize,

    /// Stage archives but leave the install folder untouched.
    #[arg(long)]
    pub skip_install: bool,

    /// Skip the session-authenticated direct request; use only the click flow.
    #[arg(long)]
    pub no_direct: bool,

    /// Retry a direct request once without certificate checks after a TLS failure.
    #[arg(long)]
    pub insecure_tls: bool,

    /// Seconds to wait for each download control.
    #[arg(long)]
    pub click_timeout: Option<f64>,

    /// Seconds to wait for a triggered download to land (minimum 5).
    #[arg(long)]
    pub download_timeout: Option<f64>,

    /// Seconds allowed for a direct request.
    #[arg(long)]
    pub direct_timeout: Option<f64>,

    /// Seconds to pause between entries.
    #[arg(long)]
    pub delay: Option<f64>,

    /// Do not ask questions; everything comes from flags and saved defaults.
    #[arg(long)]
    pub no_prompt: bool,
}
