//! Configuration management
//!
//! Layered loading (see [`ConfigLoader`]):
//! 1. `default.toml`
//! 2. `{environment}.toml`
//! 3. `local.toml`
//! 4. `JOBRUNNER_*` environment variables

pub mod environment;
pub mod error;
pub mod loader;
pub mod settings;
pub mod validation;

pub use environment::Environment;
pub use error::ConfigError;
pub use loader::ConfigLoader;
pub use settings::{
    ApplicationConfig, BackoffSettings, DatabaseConfig, DispatchConfig, EmailTaskConfig,
    HttpTaskConfig, RecoveryConfig, SchedulerConfig, ScriptTaskConfig, Settings, StoreBackend,
    StoreConfig, TasksConfig, WorkerConfig,
};
