//! Configuration settings structures for jobrunner
//!
//! This module defines all configuration structures that can be loaded from
//! TOML files and environment variables.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::error::ConfigError;
use crate::jobs::{BackoffPolicy, DispatchOptions};
use crate::logger::LoggerConfig;

// ============================================================================
// Default value functions
// ============================================================================

fn default_app_name() -> String {
    "jobrunner".to_string()
}

fn default_app_version() -> String {
    crate::pkg_version().to_string()
}

fn default_max_connections() -> u32 {
    10
}

fn default_min_connections() -> u32 {
    1
}

fn default_connection_timeout() -> u64 {
    30
}

fn default_true() -> bool {
    true
}

fn default_tick_interval_ms() -> u64 {
    2000
}

fn default_claim_batch_size() -> u32 {
    10
}

fn default_max_attempts() -> u32 {
    3
}

fn default_buffer_size() -> usize {
    256
}

fn default_backoff_strategy() -> String {
    "exponential".to_string()
}

fn default_base_delay_ms() -> u64 {
    2000
}

fn default_concurrency() -> usize {
    5
}

fn default_job_timeout_secs() -> u64 {
    300
}

fn default_recovery_interval_secs() -> u64 {
    60
}

fn default_stale_after_secs() -> u64 {
    300
}

fn default_recovery_batch_size() -> u32 {
    100
}

fn default_http_timeout_secs() -> u64 {
    30
}

fn default_mail_from() -> String {
    "jobrunner@localhost".to_string()
}

fn default_shell() -> String {
    "sh".to_string()
}

// ============================================================================
// Application Configuration
// ============================================================================

/// Application basic information configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplicationConfig {
    /// Application name
    #[serde(default = "default_app_name")]
    pub name: String,

    /// Application version
    #[serde(default = "default_app_version")]
    pub version: String,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: default_app_name(),
            version: default_app_version(),
        }
    }
}

// ============================================================================
// Database / Store Configuration
// ============================================================================

/// Diesel database connection configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Database connection URL
    #[serde(default)]
    pub url: String,

    /// Maximum number of connections in the pool
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Minimum number of connections in the pool
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,

    /// Connection timeout in seconds
    #[serde(default = "default_connection_timeout")]
    pub connection_timeout: u64,

    /// Whether to automatically run pending migrations on startup
    #[serde(default)]
    pub auto_migrate: bool,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            max_connections: default_max_connections(),
            min_connections: default_min_connections(),
            connection_timeout: default_connection_timeout(),
            auto_migrate: false,
        }
    }
}

/// Job store backend type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    Postgres,
    Memory,
}

/// Job store selection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct StoreConfig {
    /// Backend holding job records
    #[serde(default)]
    pub backend: StoreBackend,
}

// ============================================================================
// Engine Configuration
// ============================================================================

/// Claim scheduler configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Whether this process runs a claim scheduler
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Interval between claim ticks in milliseconds
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,

    /// Maximum number of jobs claimed per tick
    #[serde(default = "default_claim_batch_size")]
    pub batch_size: u32,
}

impl SchedulerConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            tick_interval_ms: default_tick_interval_ms(),
            batch_size: default_claim_batch_size(),
        }
    }
}

/// Backoff settings for redelivery
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackoffSettings {
    /// Backoff strategy: "exponential" or "fixed"
    #[serde(default = "default_backoff_strategy")]
    pub strategy: String,

    /// Base delay in milliseconds
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
}

impl Default for BackoffSettings {
    fn default() -> Self {
        Self {
            strategy: default_backoff_strategy(),
            base_delay_ms: default_base_delay_ms(),
        }
    }
}

impl BackoffSettings {
    /// Convert BackoffSettings to a BackoffPolicy
    pub fn into_policy(&self) -> Result<BackoffPolicy, ConfigError> {
        let base = Duration::from_millis(self.base_delay_ms);
        match self.strategy.to_lowercase().as_str() {
            "exponential" => Ok(BackoffPolicy::Exponential { base }),
            "fixed" => Ok(BackoffPolicy::Fixed { delay: base }),
            _ => Err(ConfigError::ValidationError {
                field: "dispatch.backoff.strategy".to_string(),
                message: format!(
                    "Invalid backoff strategy '{}'. Valid strategies are: exponential, fixed",
                    self.strategy
                ),
            }),
        }
    }
}

/// Dispatch queue configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// Delivery attempts per dispatch before a job is left failed
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Capacity of the in-process delivery buffer
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,

    /// Redelivery backoff
    #[serde(default)]
    pub backoff: BackoffSettings,
}

impl DispatchConfig {
    /// Default options applied to every enqueued job
    pub fn options(&self) -> Result<DispatchOptions, ConfigError> {
        Ok(DispatchOptions {
            max_attempts: self.max_attempts,
            backoff: self.backoff.into_policy()?,
        })
    }
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            buffer_size: default_buffer_size(),
            backoff: BackoffSettings::default(),
        }
    }
}

/// Worker pool configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Maximum number of jobs executing at once
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Execution timeout per attempt in seconds (0 disables the timeout)
    #[serde(default = "default_job_timeout_secs")]
    pub job_timeout_secs: u64,
}

impl WorkerConfig {
    pub fn job_timeout(&self) -> Option<Duration> {
        (self.job_timeout_secs > 0).then(|| Duration::from_secs(self.job_timeout_secs))
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            job_timeout_secs: default_job_timeout_secs(),
        }
    }
}

/// Stale claim recovery configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecoveryConfig {
    /// Whether the recovery sweep runs in this process
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Interval between sweeps in seconds
    #[serde(default = "default_recovery_interval_secs")]
    pub interval_secs: u64,

    /// Age of a claim, in seconds, after which it is considered stale
    #[serde(default = "default_stale_after_secs")]
    pub stale_after_secs: u64,

    /// Maximum number of stale jobs handled per sweep
    #[serde(default = "default_recovery_batch_size")]
    pub batch_size: u32,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: default_recovery_interval_secs(),
            stale_after_secs: default_stale_after_secs(),
            batch_size: default_recovery_batch_size(),
        }
    }
}

// ============================================================================
// Task Configuration
// ============================================================================

/// `http_request` task settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpTaskConfig {
    /// Request timeout in seconds
    #[serde(default = "default_http_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for HttpTaskConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_http_timeout_secs(),
        }
    }
}

/// `send_email` task settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmailTaskConfig {
    /// Mail relay endpoint receiving JSON messages
    #[serde(default)]
    pub relay_url: Option<String>,

    /// Bearer token for the relay
    #[serde(default)]
    pub api_key: Option<String>,

    /// Sender address
    #[serde(default = "default_mail_from")]
    pub from: String,
}

impl Default for EmailTaskConfig {
    fn default() -> Self {
        Self {
            relay_url: None,
            api_key: None,
            from: default_mail_from(),
        }
    }
}

/// `run_script` task settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScriptTaskConfig {
    /// Shell used to interpret commands (invoked as `<shell> -c <command>`)
    #[serde(default = "default_shell")]
    pub shell: String,
}

impl Default for ScriptTaskConfig {
    fn default() -> Self {
        Self {
            shell: default_shell(),
        }
    }
}

/// Task executor settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct TasksConfig {
    #[serde(default)]
    pub http: HttpTaskConfig,

    #[serde(default)]
    pub email: EmailTaskConfig,

    #[serde(default)]
    pub script: ScriptTaskConfig,
}

// ============================================================================
// Main Settings Structure
// ============================================================================

/// Complete application settings
///
/// This structure represents the entire configuration that can be loaded
/// from TOML files and environment variables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Settings {
    /// Application information
    #[serde(default)]
    pub application: ApplicationConfig,

    /// Database configuration
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Job store configuration
    #[serde(default)]
    pub store: StoreConfig,

    /// Logger configuration
    #[serde(default)]
    pub logger: LoggerConfig,

    /// Claim scheduler configuration
    #[serde(default)]
    pub scheduler: SchedulerConfig,

    /// Dispatch queue configuration
    #[serde(default)]
    pub dispatch: DispatchConfig,

    /// Worker pool configuration
    #[serde(default)]
    pub worker: WorkerConfig,

    /// Stale claim recovery configuration
    #[serde(default)]
    pub recovery: RecoveryConfig,

    /// Task executor configuration
    #[serde(default)]
    pub tasks: TasksConfig,
}
