//! Command executor for dispatching CLI commands
//!
//! This module provides the main entry point for executing CLI commands
//! after parsing and configuration loading.

use super::handlers::{JobCommandHandler, MigrateCommandHandler, RunCommandHandler};
use super::parser::{Cli, Commands};
use crate::config::Settings;
use crate::error::AppResult;

/// Execute a CLI command with the given settings
///
/// No subcommand means `run`.
pub async fn execute_command(cli: &Cli, settings: Settings) -> AppResult<()> {
    match &cli.command {
        None => RunCommandHandler::new(settings).execute(false).await,
        Some(Commands::Run { dry_run }) => RunCommandHandler::new(settings).execute(*dry_run).await,
        Some(Commands::Migrate { dry_run, rollback }) => {
            MigrateCommandHandler::new(settings)
                .execute(*dry_run, *rollback)
                .await
        }
        Some(Commands::Jobs(command)) => {
            let handler = JobCommandHandler::connect(&settings).await?;
            let mut stdout = std::io::stdout().lock();
            handler.execute(command, &mut stdout).await
        }
    }
}
