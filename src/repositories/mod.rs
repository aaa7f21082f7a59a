//! Job Store backends.
//!
//! [`JobStore`] is the persistence boundary of the engine; every status
//! change goes through a conditional transition.

mod job_repo;
mod memory_job_repo;
mod traits;

#[cfg(test)]
pub(crate) mod testing;

pub use job_repo::PgJobStore;
pub use memory_job_repo::MemoryJobStore;
pub use traits::JobStore;
