//! Configuration validation logic
//!
//! Each section validates itself; [`Settings::validate`] runs them all
//! after loading.

use crate::config::error::ConfigError;
use crate::config::settings::{
    DatabaseConfig, DispatchConfig, RecoveryConfig, SchedulerConfig, Settings, StoreBackend,
    TasksConfig, WorkerConfig,
};

/// Upper bound on the dispatch buffer
const MAX_BUFFER_SIZE: usize = 65_536;

/// Upper bound on recovery intervals and claim ages: one year
const MAX_RECOVERY_SECS: u64 = 365 * 24 * 60 * 60;

impl DatabaseConfig {
    /// Validate database configuration
    ///
    /// # Validation Rules
    /// - URL must be a `postgres://` or `postgresql://` URL
    /// - Connection counts must be positive, with min <= max
    /// - Connection timeout must be positive
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.url.is_empty() {
            return Err(ConfigError::validation(
                "database.url",
                "Database URL is required when store.backend = \"postgres\".",
            ));
        }

        if !(self.url.starts_with("postgres://") || self.url.starts_with("postgresql://")) {
            return Err(ConfigError::validation(
                "database.url",
                "Invalid database URL format. Expected postgres://[user:password@]host[:port]/database",
            ));
        }

        if self.max_connections == 0 {
            return Err(ConfigError::validation(
                "database.max_connections",
                "Max connections must be greater than 0.",
            ));
        }

        if self.min_connections > self.max_connections {
            return Err(ConfigError::validation(
                "database.min_connections",
                format!(
                    "Min connections ({}) cannot exceed max connections ({}).",
                    self.min_connections, self.max_connections
                ),
            ));
        }

        if self.connection_timeout == 0 {
            return Err(ConfigError::validation(
                "database.connection_timeout",
                "Connection timeout must be greater than 0 seconds.",
            ));
        }

        Ok(())
    }
}

impl SchedulerConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tick_interval_ms == 0 {
            return Err(ConfigError::validation(
                "scheduler.tick_interval_ms",
                "Tick interval must be greater than 0.",
            ));
        }
        if self.batch_size == 0 {
            return Err(ConfigError::validation(
                "scheduler.batch_size",
                "Batch size must be greater than 0.",
            ));
        }
        Ok(())
    }
}

impl DispatchConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_attempts == 0 {
            return Err(ConfigError::validation(
                "dispatch.max_attempts",
                "Max attempts must be at least 1.",
            ));
        }
        if self.buffer_size == 0 || self.buffer_size > MAX_BUFFER_SIZE {
            return Err(ConfigError::validation(
                "dispatch.buffer_size",
                format!("Buffer size must be between 1 and {}.", MAX_BUFFER_SIZE),
            ));
        }
        self.backoff.into_policy()?;
        Ok(())
    }
}

impl WorkerConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.concurrency == 0 {
            return Err(ConfigError::validation(
                "worker.concurrency",
                "Worker concurrency must be at least 1.",
            ));
        }
        Ok(())
    }
}

impl RecoveryConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.enabled {
            return Ok(());
        }
        if self.interval_secs == 0 {
            return Err(ConfigError::validation(
                "recovery.interval_secs",
                "Recovery interval must be greater than 0 seconds.",
            ));
        }
        if self.interval_secs > MAX_RECOVERY_SECS {
            return Err(ConfigError::validation(
                "recovery.interval_secs",
                format!("Recovery interval must not exceed {MAX_RECOVERY_SECS} seconds."),
            ));
        }
        if self.stale_after_secs > MAX_RECOVERY_SECS {
            return Err(ConfigError::validation(
                "recovery.stale_after_secs",
                format!("Stale claim age must not exceed {MAX_RECOVERY_SECS} seconds."),
            ));
        }
        if self.batch_size == 0 {
            return Err(ConfigError::validation(
                "recovery.batch_size",
                "Recovery batch size must be greater than 0.",
            ));
        }
        Ok(())
    }
}

impl TasksConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.http.timeout_secs == 0 {
            return Err(ConfigError::validation(
                "tasks.http.timeout_secs",
                "HTTP timeout must be greater than 0 seconds.",
            ));
        }
        if let Some(url) = &self.email.relay_url
            && !(url.starts_with("http://") || url.starts_with("https://"))
        {
            return Err(ConfigError::validation(
                "tasks.email.relay_url",
                "Mail relay URL must start with http:// or https://",
            ));
        }
        if self.script.shell.trim().is_empty() {
            return Err(ConfigError::validation(
                "tasks.script.shell",
                "Script shell must not be empty.",
            ));
        }
        Ok(())
    }
}

impl Settings {
    /// Validate every section
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.store.backend == StoreBackend::Postgres {
            self.database.validate()?;
        }
        self.logger
            .validate()
            .map_err(|e| ConfigError::validation("logger", e.to_string()))?;
        self.scheduler.validate()?;
        self.dispatch.validate()?;
        self.worker.validate()?;
        self.recovery.validate()?;
        self.tasks.validate()?;
        Ok(())
    }
}
