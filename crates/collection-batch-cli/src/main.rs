//! collection-batch command-line entry point.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{CommandFactory, Parser};
use tracing::warn;

use collection_batch::config::DEFAULT_CDP_URL;
use collection_batch::progress;
use collection_batch::session::connector::{ChromiumConnector, ConnectOptions};
use collection_batch::{Runner, StopFlag};
use collection_batch_cli::args::{Cli, Commands, RunArgs};
use collection_batch_cli::config::{resolve_config_path, UserDefaults};
use collection_batch_cli::render::{self, ConsoleRenderer};
use collection_batch_cli::settings::{self, default_downloads_dir, InputError, ReadlinePrompter};
use collection_batch_cli::{browser_setup, doctor, logging};

/// How long an aborted run gets to write its report before the process exits.
const ABORT_GRACE: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    logging::init(&cli.log_level, cli.json_logs);

    let code = match dispatch(cli).await {
        Ok(code) => code,
        Err(e) => match e.downcast_ref::<InputError>() {
            Some(InputError::Declined) => {
                eprintln!("  Cancelled.");
                130
            }
            Some(_) => {
                eprintln!("  Error: {e:#}");
                2
            }
            None => {
                eprintln!("  Error: {e:#}");
                1
            }
        },
    };
    std::process::exit(code);
}

async fn dispatch(cli: Cli) -> Result<i32> {
    let config_path = resolve_config_path(cli.config.as_deref());
    match cli.command {
        None => run(cli.run, &config_path, cli.json_logs).await,
        Some(Commands::Run(args)) => run(args, &config_path, cli.json_logs).await,
        Some(Commands::Doctor {
            cdp_url,
            downloads_dir,
        }) => {
            let saved = UserDefaults::load(&config_path);
            let cdp_url = cdp_url
                .or(saved.cdp_url)
                .unwrap_or_else(|| DEFAULT_CDP_URL.to_string());
            let downloads_dir = downloads_dir
                .or(saved.downloads_dir)
                .unwrap_or_else(default_downloads_dir);
            Ok(if doctor::run(&cdp_url, &downloads_dir).await { 0 } else { 1 })
        }
        Some(Commands::ConfigureBrowser {
            downloads_dir,
            preferences,
        }) => {
            let saved = UserDefaults::load(&config_path);
            let downloads_dir = downloads_dir
                .or(saved.downloads_dir)
                .unwrap_or_else(default_downloads_dir);
            let changed = browser_setup::configure(preferences.as_deref(), &downloads_dir)?;
            println!(
                "  Updated {}: downloads go to {} without prompting.",
                changed.display(),
                downloads_dir.display()
            );
            println!("  Restart the browser for the change to take effect.");
            Ok(0)
        }
        Some(Commands::Completions { shell }) => {
            let mut cmd = Cli::command();
            clap_complete::generate(shell, &mut cmd, "collection-batch", &mut std::io::stdout());
            Ok(0)
        }
    }
}

async fn run(args: RunArgs, config_path: &Path, quiet_console: bool) -> Result<i32> {
    let saved = UserDefaults::load(config_path);
    let (config, defaults) = if args.no_prompt {
        settings::resolve(&args, &saved, None)?
    } else {
        let mut prompter = ReadlinePrompter::new()?;
        settings::resolve(&args, &saved, Some(&mut prompter))?
    };
    if let Err(e) = defaults.save(config_path) {
        warn!("could not save defaults: {e:#}");
    }

    let mut options = ConnectOptions::from_config(&config);
    options.browser_executable = args.browser.clone();
    options.launch = !args.no_launch;
    let source = Arc::new(ChromiumConnector::new(options));

    let stop = StopFlag::new();
    let on_interrupt = stop.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_err() {
            return;
        }
        warn!(
            "interrupt received; stopping after the current entry \
             (press Ctrl-C again to quit now)"
        );
        on_interrupt.stop();
        if tokio::signal::ctrl_c().await.is_err() {
            return;
        }
        warn!("abandoning the current entry and writing the report");
        on_interrupt.abort();
        // A third interrupt, or the grace period running out, ends the process.
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            () = tokio::time::sleep(ABORT_GRACE) => {}
        }
        std::process::exit(130);
    });

    let (tx, rx) = progress::channel();
    let renderer = if quiet_console {
        ConsoleRenderer::hidden()
    } else {
        ConsoleRenderer::new()
    };
    let rendering = renderer.spawn(rx);

    let outcome = Runner::new(source, config)
        .with_progress(tx)
        .with_stop_flag(stop)
        .run()
        .await
        .context("could not write the run report")?;
    let _ = rendering.await;

    render::print_summary(&outcome);
    Ok(outcome.exit_code())
}
