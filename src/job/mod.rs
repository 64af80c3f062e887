pub mod manager;
pub mod store;
mod worker;

pub use manager::{JobManager, JobRequest};
pub use store::{InMemoryJobStore, Job, JobFailure, JobId, JobState, JobStore};
