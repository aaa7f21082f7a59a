//! CLI argument validation functions
//!
//! Value parsers for arguments clap cannot check on its own.

use std::fs;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::jobs::JobStatus;

/// Validate that a file path is accessible (exists and is readable)
pub fn validate_config_file_path(path_str: &str) -> Result<PathBuf, String> {
    let path = PathBuf::from(path_str);

    if !path.exists() {
        return Err(format!("Configuration file does not exist: '{}'", path_str));
    }

    if !path.is_file() {
        return Err(format!("Configuration path is not a file: '{}'", path_str));
    }

    match fs::File::open(&path) {
        Ok(_) => Ok(path),
        Err(e) => Err(format!("Cannot read configuration file '{}': {}", path_str, e)),
    }
}

/// Validate rollback steps is a positive number
pub fn validate_rollback_steps(steps_str: &str) -> Result<u32, String> {
    let steps: u32 = steps_str.parse().map_err(|_| {
        format!("Rollback steps must be a valid positive number, got: '{}'", steps_str)
    })?;

    if steps == 0 {
        return Err("Rollback steps must be greater than 0".to_string());
    }

    if steps > 100 {
        return Err("Rollback steps cannot exceed 100 for safety reasons".to_string());
    }

    Ok(steps)
}

/// Validate a job id is a positive integer
pub fn validate_job_id(id_str: &str) -> Result<i64, String> {
    let id: i64 = id_str
        .trim()
        .parse()
        .map_err(|_| format!("Job id must be a positive integer, got: '{}'", id_str))?;

    if id <= 0 {
        return Err(format!("Job id must be a positive integer, got: '{}'", id_str));
    }

    Ok(id)
}

/// Parse a task payload; it must be a JSON object
pub fn validate_payload(payload_str: &str) -> Result<Value, String> {
    let value: Value =
        serde_json::from_str(payload_str).map_err(|e| format!("Payload is not valid JSON: {}", e))?;

    if !value.is_object() {
        return Err("Payload must be a JSON object".to_string());
    }

    Ok(value)
}

/// Parse an RFC 3339 timestamp into UTC
pub fn validate_timestamp(value: &str) -> Result<DateTime<Utc>, String> {
    DateTime::parse_from_rfc3339(value.trim())
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| {
            format!(
                "Expected an RFC 3339 timestamp such as 2026-01-01T09:00:00Z, got '{}': {}",
                value, e
            )
        })
}

/// Parse a job status name, case-insensitively
pub fn validate_status(value: &str) -> Result<JobStatus, String> {
    value.parse::<JobStatus>().map_err(|_| {
        let known: Vec<&str> = JobStatus::ALL.iter().map(|s| s.as_str()).collect();
        format!("Unknown job status '{}'; expected one of {}", value, known.join(", "))
    })
}
