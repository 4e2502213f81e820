//! Sequential job queue with merge and retry semantics.

pub mod job;
pub mod queue;

pub use job::{JobCallback, JobId, JobOutput, JobPayload, JobRecord, JobSpec, JobStatus, MergePolicy};
pub use queue::{JobQueue, JobQueueBuilder};
