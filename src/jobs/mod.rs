pub mod backoff;
pub mod context;
pub mod models;
pub mod queue;
pub mod recovery;
pub mod registry;
pub mod scheduler;
pub mod tasks;
pub mod types;
pub mod worker;

#[cfg(test)]
mod tests;

pub use backoff::BackoffPolicy;
pub use context::EngineContext;
pub use models::{Job, JobFilter, NewJob, Page, PageRequest, TransitionFields};
pub use queue::{Delivery, DispatchOptions, DispatchQueue, DispatchReceiver};
pub use recovery::RecoverySweeper;
pub use registry::TaskRegistry;
pub use scheduler::ClaimScheduler;
pub use types::{JobContext, JobStatus, JobTask, Task};
pub use worker::WorkerPool;
