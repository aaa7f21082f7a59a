//! Service layer for intake and operator actions.
//!
//! Services validate requests and coordinate the job store; the engine
//! itself never goes through them.

mod job_service;

pub use job_service::{DUPLICATE_DELAY_SECS, JobService};
