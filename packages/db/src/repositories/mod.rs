//! SurrealDB implementations of the job store.

mod batch_repo;
mod job_repo;

pub use job_repo::SurrealJobStore;
