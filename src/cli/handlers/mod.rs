//! Command handlers for CLI operations
//!
//! This module contains handlers for different CLI commands,
//! separating command execution logic from parsing and validation.

pub mod jobs;
pub mod migrate;
pub mod run;

pub use jobs::JobCommandHandler;
pub use migrate::MigrateCommandHandler;
pub use run::RunCommandHandler;
