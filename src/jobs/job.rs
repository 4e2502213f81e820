//! Job specs, payloads and the records the queue keeps about them.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use crate::BoxFuture;

/// Typed job data. Implement this on an enum with one variant per job kind
/// so every `execute` sees a concrete payload.
pub trait JobPayload: Clone + Send + Sync + 'static {
    /// What a successful execution hands to the job's callbacks.
    type Output: Send + Sync + 'static;

    /// Discriminant used together with the tag to find merge candidates.
    fn kind(&self) -> &'static str;

    /// Fold a newer payload of the same kind into this one when two pending
    /// jobs are merged. List-like payloads should concatenate; the default
    /// keeps the newer payload.
    fn merge(&mut self, newer: Self) {
        *self = newer;
    }
}

/// Identifier handed out by [`JobQueue::add_job`](super::JobQueue::add_job).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct JobId(pub(crate) u64);

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "job-{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Pending,
    Active,
    Completed,
    Failed,
    Canceled,
}

/// How a new job treats pending jobs with the same kind and tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergePolicy {
    /// Fold into the earliest pending match, keeping its queue position.
    First,
    /// Cancel every pending match and append one combined job at the tail.
    Last,
}

/// Result of a successful execution.
pub struct JobOutput<P: JobPayload, C> {
    pub data: Option<P::Output>,
    /// Follow-up jobs, appended to the tail in order.
    pub jobs: Vec<JobSpec<P, C>>,
}

impl<P: JobPayload, C> JobOutput<P, C> {
    pub fn empty() -> Self {
        Self {
            data: None,
            jobs: Vec::new(),
        }
    }

    pub fn with_data(data: P::Output) -> Self {
        Self {
            data: Some(data),
            jobs: Vec::new(),
        }
    }

    /// Schedule `spec` after this job completes.
    pub fn then(mut self, spec: JobSpec<P, C>) -> Self {
        self.jobs.push(spec);
        self
    }
}

pub type ExecuteFn<P, C> =
    Arc<dyn Fn(P, Arc<C>) -> BoxFuture<anyhow::Result<JobOutput<P, C>>> + Send + Sync>;

/// Called with the output data on success and with the error after every
/// failed attempt.
pub type JobCallback<P> =
    Arc<dyn Fn(Result<Option<&<P as JobPayload>::Output>, &anyhow::Error>) + Send + Sync>;

/// Everything needed to enqueue a job.
pub struct JobSpec<P: JobPayload, C> {
    pub(crate) payload: P,
    pub(crate) tag: Option<String>,
    pub(crate) merge: Option<MergePolicy>,
    pub(crate) retries: Option<u32>,
    pub(crate) execute: ExecuteFn<P, C>,
    pub(crate) callback: Option<JobCallback<P>>,
}

impl<P, C> JobSpec<P, C>
where
    P: JobPayload,
    C: Send + Sync + 'static,
{
    pub fn new<F, Fut>(payload: P, execute: F) -> Self
    where
        F: Fn(P, Arc<C>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<JobOutput<P, C>>> + Send + 'static,
    {
        let execute: ExecuteFn<P, C> = Arc::new(move |payload: P, container: Arc<C>| {
            let fut: BoxFuture<anyhow::Result<JobOutput<P, C>>> =
                Box::pin(execute(payload, container));
            fut
        });
        Self {
            payload,
            tag: None,
            merge: None,
            retries: None,
            execute,
            callback: None,
        }
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = Some(tag.into());
        self
    }

    pub fn with_merge(mut self, merge: MergePolicy) -> Self {
        self.merge = Some(merge);
        self
    }

    /// Re-run a failed job up to `retries` more times.
    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = Some(retries);
        self
    }

    pub fn on_complete<F>(mut self, callback: F) -> Self
    where
        F: Fn(Result<Option<&P::Output>, &anyhow::Error>) + Send + Sync + 'static,
    {
        self.callback = Some(Arc::new(callback));
        self
    }

    pub fn kind(&self) -> &'static str {
        self.payload.kind()
    }

    pub fn payload(&self) -> &P {
        &self.payload
    }
}

impl<P: JobPayload + fmt::Debug, C> fmt::Debug for JobSpec<P, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobSpec")
            .field("payload", &self.payload)
            .field("tag", &self.tag)
            .field("merge", &self.merge)
            .field("retries", &self.retries)
            .finish_non_exhaustive()
    }
}

/// A queued job.
pub(crate) struct Job<P: JobPayload, C> {
    pub(crate) id: JobId,
    pub(crate) payload: P,
    pub(crate) tag: Option<String>,
    pub(crate) retries: u32,
    pub(crate) execute: ExecuteFn<P, C>,
    pub(crate) callbacks: Vec<JobCallback<P>>,
    pub(crate) status: JobStatus,
    pub(crate) attempts: u32,
    /// Message of the most recent failed attempt.
    pub(crate) error: Option<String>,
}

impl<P: JobPayload, C> Job<P, C> {
    pub(crate) fn from_spec(id: JobId, spec: JobSpec<P, C>, default_retries: u32) -> Self {
        Self {
            id,
            payload: spec.payload,
            tag: spec.tag,
            retries: spec.retries.unwrap_or(default_retries),
            execute: spec.execute,
            callbacks: spec.callback.into_iter().collect(),
            status: JobStatus::Pending,
            attempts: 0,
            error: None,
        }
    }

    pub(crate) fn kind(&self) -> &'static str {
        self.payload.kind()
    }

    /// Pending job with the same kind and tag.
    pub(crate) fn is_merge_candidate(&self, kind: &str, tag: Option<&str>) -> bool {
        self.status == JobStatus::Pending && self.kind() == kind && self.tag.as_deref() == tag
    }

    pub(crate) fn record(&self) -> JobRecord {
        JobRecord {
            kind: self.kind(),
            tag: self.tag.clone(),
            status: self.status,
            attempts: self.attempts,
            last_error: self.error.clone(),
        }
    }
}

/// What the queue remembers about a job after it leaves the list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobRecord {
    pub kind: &'static str,
    pub tag: Option<String>,
    pub status: JobStatus,
    pub attempts: u32,
    pub last_error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    enum Payload {
        Scan(Vec<u32>),
        Index,
    }

    impl JobPayload for Payload {
        type Output = usize;

        fn kind(&self) -> &'static str {
            match self {
                Payload::Scan(_) => "scan",
                Payload::Index => "index",
            }
        }

        fn merge(&mut self, newer: Self) {
            match (self, newer) {
                (Payload::Scan(existing), Payload::Scan(more)) => existing.extend(more),
                (this, newer) => *this = newer,
            }
        }
    }

    fn spec(payload: Payload) -> JobSpec<Payload, ()> {
        JobSpec::new(payload, |_, _| async { Ok::<_, anyhow::Error>(JobOutput::empty()) })
    }

    #[test]
    fn test_spec_builders() {
        let spec = spec(Payload::Scan(vec![1]))
            .with_tag("folder-a")
            .with_merge(MergePolicy::First)
            .with_retries(3);

        assert_eq!(spec.kind(), "scan");
        assert_eq!(spec.tag.as_deref(), Some("folder-a"));
        assert_eq!(spec.merge, Some(MergePolicy::First));
        assert_eq!(spec.retries, Some(3));
        assert!(spec.callback.is_none());
    }

    #[test]
    fn test_job_from_spec_uses_default_retries() {
        let job = Job::from_spec(JobId(7), spec(Payload::Index), 2);
        assert_eq!(job.retries, 2);
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.attempts, 0);
        assert_eq!(job.id.to_string(), "job-7");

        let job = Job::from_spec(JobId(8), spec(Payload::Index).with_retries(0), 2);
        assert_eq!(job.retries, 0);
    }

    #[test]
    fn test_merge_candidate_matches_kind_and_tag() {
        let job = Job::from_spec(JobId(1), spec(Payload::Scan(vec![])).with_tag("t1"), 0);
        assert!(job.is_merge_candidate("scan", Some("t1")));
        assert!(!job.is_merge_candidate("scan", Some("t2")));
        assert!(!job.is_merge_candidate("scan", None));
        assert!(!job.is_merge_candidate("index", Some("t1")));
    }

    #[test]
    fn test_payload_merge_concatenates_lists() {
        let mut payload = Payload::Scan(vec![1, 2]);
        payload.merge(Payload::Scan(vec![3]));
        assert_eq!(payload, Payload::Scan(vec![1, 2, 3]));

        let mut payload = Payload::Index;
        payload.merge(Payload::Scan(vec![9]));
        assert_eq!(payload, Payload::Scan(vec![9]));
    }

    #[test]
    fn test_output_chaining() {
        let output: JobOutput<Payload, ()> = JobOutput::with_data(4).then(spec(Payload::Index));
        assert_eq!(output.data, Some(4));
        assert_eq!(output.jobs.len(), 1);
    }
}
