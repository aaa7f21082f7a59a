//! jobrunner library
//!
//! Scheduled job engine: job store, claim scheduler, dispatch queue,
//! worker pool and the task kinds they execute.

use shadow_rs::shadow;
shadow!(build);

pub mod cli;
pub mod config;
pub mod db;
pub mod engine;
pub mod error;
pub mod jobs;
pub mod logger;
pub mod repositories;
pub mod schema;
pub mod services;

pub fn pkg_version() -> &'static str {
    build::PKG_VERSION
}

pub fn clap_long_version() -> &'static str {
    build::CLAP_LONG_VERSION
}
