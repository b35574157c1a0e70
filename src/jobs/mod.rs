//! Asynchronous clustering jobs: records, storage, orchestration.

mod job;
mod orchestrator;
mod store;

pub use job::{Job, JobId};
pub use orchestrator::{JobOrchestrator, SubmitRequest, SubmitResponse};
pub use store::{InMemoryJobStore, JobStore};
