//! Saved defaults carry over between invocations.

use clap::Parser;
use std::path::PathBuf;

use collection_batch_cli::args::Cli;
use collection_batch_cli::config::{resolve_config_path, UserDefaults};
use collection_batch_cli::settings::{self, InputError};

const URL: &str = "https://www.nexusmods.com/games/skyrimspecialedition/collections/qdurkx/mods";

#[test]
fn test_second_run_reuses_saved_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let config_file = dir.path().join("collection-batch.json");
    let config_arg = config_file.display().to_string();

    // First run: everything on the command line.
    let cli = Cli::try_parse_from([
        "collection-batch",
        "--config",
        &config_arg,
        "--collection",
        URL,
        "--downloads-dir",
        "/data/dl",
        "--install-dir",
        "/data/mods",
        "--no-prompt",
    ])
    .unwrap();
    let path = resolve_config_path(cli.config.as_deref());
    assert_eq!(path, config_file);
    let (_, defaults) = settings::resolve(&cli.run, &UserDefaults::load(&path), None).unwrap();
    defaults.save(&path).unwrap();

    // Second run: only mode flags.
    let cli = Cli::try_parse_from([
        "collection-batch",
        "--config",
        &config_arg,
        "--no-prompt",
        "--skip-install",
    ])
    .unwrap();
    let (config, _) = settings::resolve(&cli.run, &UserDefaults::load(&path), None).unwrap();
    assert_eq!(config.collection.mods_url, URL);
    assert_eq!(config.downloads_dir, PathBuf::from("/data/dl"));
    assert_eq!(config.install_dir, PathBuf::from("/data/mods"));
    assert!(config.skip_install);
}

#[test]
fn test_no_prompt_without_defaults_is_an_input_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("absent.json");
    let cli = Cli::try_parse_from(["collection-batch", "--no-prompt", "--dry-run"]).unwrap();

    let err = settings::resolve(&cli.run, &UserDefaults::load(&path), None).unwrap_err();
    assert!(matches!(err, InputError::MissingCollection));

    // The binary maps input errors to exit status 2 through anyhow.
    let wrapped = anyhow::Error::from(err);
    assert!(wrapped.downcast_ref::<InputError>().is_some());
}
