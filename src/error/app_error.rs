use crate::error::DatabaseErrorConverter;
use thiserror::Error;

/// Application-wide error type covering intake, store, dispatch and execution failures.
///
/// Variants map onto the job lifecycle: intake rejects with `Validation`,
/// guarded store writes fail with `Conflict` or `InvalidTransition`, the
/// handoff from claiming to dispatch fails with `ClaimHandoff`, and task
/// execution reports `Execution` or `UnknownTaskKind`.
#[derive(Error, Debug)]
pub enum AppError {
    /// Resource not found error with entity, field, and value information
    #[error("Resource not found: {entity} with {field}={value}")]
    NotFound {
        entity: String,
        field: String,
        value: String,
    },

    /// Validation error with field-specific details
    #[error("Validation failed for {field}: {reason}")]
    Validation { field: String, reason: String },

    /// The stored status did not match the status the caller observed
    #[error("Conflict on job {id}: expected status {expected}, found {actual}")]
    Conflict {
        id: i64,
        expected: String,
        actual: String,
    },

    /// The requested status change is not an edge of the job state machine
    #[error("Invalid transition for job {id}: {from} -> {to}")]
    InvalidTransition { id: i64, from: String, to: String },

    /// A claimed job could not be handed to the dispatch queue
    #[error("Claimed job {id} could not be dispatched: {reason}")]
    ClaimHandoff { id: i64, reason: String },

    /// A task executor reported a failure
    #[error("Task '{kind}' failed: {message}")]
    Execution { kind: String, message: String },

    /// No executor is registered for the task kind
    #[error("Unknown task kind: {kind}")]
    UnknownTaskKind { kind: String },

    /// Database operation error with operation context
    #[error("Database operation failed: {operation}")]
    Database {
        operation: String,
        #[source]
        source: anyhow::Error,
    },

    /// Configuration error with key information
    #[error("Configuration error: {key}")]
    Configuration {
        key: String,
        #[source]
        source: anyhow::Error,
    },

    /// Connection pool error
    #[error("Connection pool error")]
    ConnectionPool {
        #[source]
        source: anyhow::Error,
    },

    /// Internal error for unexpected failures
    #[error("Internal error")]
    Internal {
        #[source]
        source: anyhow::Error,
    },
}

impl AppError {
    /// Shorthand for a task execution failure.
    pub fn execution(kind: impl Into<String>, message: impl Into<String>) -> Self {
        AppError::Execution {
            kind: kind.into(),
            message: message.into(),
        }
    }

    /// Shorthand for a validation failure.
    pub fn validation(field: impl Into<String>, reason: impl Into<String>) -> Self {
        AppError::Validation {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Whether the dispatch queue may redeliver a job that failed with this error.
    ///
    /// Transient infrastructure failures and executor failures are retried.
    /// Everything describing a request that can never succeed is terminal.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AppError::Execution { .. }
                | AppError::Database { .. }
                | AppError::ConnectionPool { .. }
                | AppError::Internal { .. }
        )
    }
}

impl From<anyhow::Error> for AppError {
    fn from(error: anyhow::Error) -> Self {
        AppError::Internal { source: error }
    }
}

impl From<diesel::result::Error> for AppError {
    fn from(error: diesel::result::Error) -> Self {
        DatabaseErrorConverter::convert_diesel_error(error, "database operation")
    }
}

impl From<crate::config::error::ConfigError> for AppError {
    fn from(error: crate::config::error::ConfigError) -> Self {
        AppError::Configuration {
            key: "settings".to_string(),
            source: anyhow::Error::from(error),
        }
    }
}

/// Type alias for Result with AppError to simplify function signatures
pub type AppResult<T> = Result<T, AppError>;
