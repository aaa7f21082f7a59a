//! CLI argument parsing with clap
//!
//! This module defines the command-line interface structure using clap,
//! including all commands, arguments, and their documentation.

use chrono::{DateTime, Utc};
use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use serde_json::Value;
use std::path::PathBuf;

use super::validation::{
    validate_config_file_path, validate_job_id, validate_payload, validate_rollback_steps,
    validate_status, validate_timestamp,
};
use crate::jobs::JobStatus;

/// Scheduled job runner
#[derive(Parser, Debug)]
#[command(name = "jobrunner")]
#[command(about = "Run scheduled jobs and manage the job store")]
#[command(long_about = "
jobrunner claims due jobs from the job store, dispatches them to a bounded
worker pool and retries failed attempts with exponential backoff.

EXAMPLES:
    # Start the engine with default configuration
    jobrunner run

    # Check configuration without starting the engine
    jobrunner run --dry-run

    # Apply pending database migrations
    jobrunner migrate

    # Schedule a folder to be created in five minutes
    jobrunner submit --kind create_folder --payload '{\"path\": \"/tmp/out\"}' --in 300

    # List failed jobs, then retry two of them
    jobrunner list --status failed
    jobrunner retry 12 15
")]
#[command(version = crate::clap_long_version())]
pub struct Cli {
    /// Subcommand to execute (defaults to `run`)
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Configuration file path
    ///
    /// Load this single TOML file instead of the layered `config/` directory.
    /// `JOBRUNNER_*` environment variables still apply on top of it.
    #[arg(short, long, value_name = "FILE", value_parser = validate_config_file_path)]
    pub config: Option<PathBuf>,

    /// Override environment detection
    ///
    /// Selects which `{env}.toml` layer is loaded.
    #[arg(short, long, value_enum)]
    pub env: Option<Environment>,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = ArgAction::Count)]
    pub verbose: u8,

    /// Only log errors
    #[arg(short, long, conflicts_with = "verbose")]
    pub quiet: bool,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the scheduler, workers and recovery sweep (default)
    ///
    /// Runs until Ctrl+C or SIGTERM, then drains in-flight jobs.
    Run {
        /// Validate configuration and exit
        #[arg(long)]
        dry_run: bool,
    },
    /// Database migration operations
    ///
    /// Examples:
    ///   jobrunner migrate                    # Apply all pending migrations
    ///   jobrunner migrate --dry-run          # Show pending migrations without applying
    ///   jobrunner migrate --rollback 3       # Rollback the last 3 migrations
    Migrate {
        /// Show pending migrations without applying
        #[arg(long, conflicts_with = "rollback")]
        dry_run: bool,

        /// Number of migrations to rollback (1-100)
        #[arg(long, value_name = "STEPS", value_parser = validate_rollback_steps)]
        rollback: Option<u32>,
    },
    #[command(flatten)]
    Jobs(JobCommand),
}

/// Job store operations
#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum JobCommand {
    /// Submit a new job
    ///
    /// A schedule time is required, either absolute (`--at`) or relative (`--in`).
    Submit {
        /// Task kind, e.g. create_folder or http_request
        #[arg(short, long)]
        kind: String,

        /// Task payload as a JSON object
        #[arg(short, long, value_parser = validate_payload)]
        payload: Value,

        /// Schedule time (RFC 3339)
        #[arg(long, value_name = "TIMESTAMP", value_parser = validate_timestamp, conflicts_with = "in_secs")]
        at: Option<DateTime<Utc>>,

        /// Schedule this many seconds from now
        #[arg(long = "in", value_name = "SECS")]
        in_secs: Option<u64>,
    },
    /// List jobs, newest first
    List {
        #[arg(long, value_parser = validate_status)]
        status: Option<JobStatus>,

        #[arg(long)]
        kind: Option<String>,

        /// Case-insensitive substring of the payload
        #[arg(long)]
        search: Option<String>,

        #[arg(long, default_value_t = 1)]
        page: u32,

        #[arg(long, default_value_t = 20)]
        page_size: u32,
    },
    /// Show one job
    Show {
        #[arg(value_parser = validate_job_id)]
        id: i64,
    },
    /// Cancel pending or claimed jobs
    Cancel {
        #[arg(required = true, value_parser = validate_job_id)]
        ids: Vec<i64>,
    },
    /// Move failed or cancelled jobs back to pending
    Retry {
        #[arg(required = true, value_parser = validate_job_id)]
        ids: Vec<i64>,
    },
    /// Copy a job's task into a new pending job
    Duplicate {
        #[arg(value_parser = validate_job_id)]
        id: i64,

        /// Schedule time (RFC 3339); defaults to one minute from now
        #[arg(long, value_name = "TIMESTAMP", value_parser = validate_timestamp)]
        at: Option<DateTime<Utc>>,
    },
}

/// Environment options
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum Environment {
    #[value(name = "development", alias = "dev")]
    Development,
    #[value(name = "test")]
    Test,
    #[value(name = "staging", alias = "stage")]
    Staging,
    #[value(name = "production", alias = "prod")]
    Production,
}

impl From<Environment> for crate::config::Environment {
    fn from(env: Environment) -> Self {
        match env {
            Environment::Development => crate::config::Environment::Development,
            Environment::Test => crate::config::Environment::Test,
            Environment::Staging => crate::config::Environment::Staging,
            Environment::Production => crate::config::Environment::Production,
        }
    }
}
