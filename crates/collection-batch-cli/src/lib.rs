//! Command-line front end for the collection-batch engine: argument parsing,
//! saved defaults, interactive prompts, console output and the helper
//! subcommands.

pub mod args;
pub mod browser_setup;
pub mod config;
pub mod doctor;
pub mod logging;
pub mod render;
pub mod settings;
