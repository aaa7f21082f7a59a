//! CLI module for jobrunner
//!
//! This module provides command-line interface functionality including:
//! - Argument parsing with clap
//! - Configuration loading with CLI overrides
//! - Command execution through the handlers

pub mod executor;
pub mod handlers;
pub mod parser;
pub mod validation;

pub use executor::execute_command;
pub use parser::{Cli, Commands, Environment, JobCommand};

use crate::config::{ConfigLoader, Settings};
use crate::logger::init_logger;

/// Load settings, applying `--config`, `--env` and the verbosity flags
///
/// # Errors
/// Returns error if configuration loading or validation fails
pub fn load_config(cli: &Cli) -> anyhow::Result<Settings> {
    let mut loader = ConfigLoader::from_env()?;
    if let Some(path) = &cli.config {
        loader = loader.with_config_file(path);
    }
    if let Some(env) = cli.env {
        loader = loader.with_environment(env.into());
    }

    let mut settings = loader.load()?;
    settings.logger.apply_verbosity(cli.verbose, cli.quiet);
    Ok(settings)
}

/// Initialize the global subscriber from settings
///
/// # Errors
/// Returns error if the log file cannot be opened or a subscriber is already set
pub fn init_logger_from_settings(settings: &Settings) -> anyhow::Result<()> {
    init_logger(&settings.logger)?;
    Ok(())
}
