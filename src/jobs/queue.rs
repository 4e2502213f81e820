//! Sequential background job queue.
//!
//! - Strictly one job executing at a time per queue
//! - FIFO, with optional insertion at the front
//! - Merge-first / merge-last de-duplication keyed by kind + tag
//! - Failed jobs retry by rejoining the tail, so they never block the rest
//! - Follow-up jobs returned by an execution are appended in order

use std::collections::VecDeque;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use lru::LruCache;
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tracing::{debug, error, trace, warn};

use super::job::{Job, JobId, JobOutput, JobPayload, JobRecord, JobSpec, JobStatus, MergePolicy};
use crate::config::QueueConfig;
use crate::error::QueueError;

struct QueueState<P: JobPayload, C> {
    /// Waiting jobs in run order. Canceled entries stay until dequeued.
    jobs: VecDeque<Job<P, C>>,
    /// A runner loop owns the queue. Only flipped under the state lock.
    running: bool,
    /// Last known record of every recent job, bounded by `history_capacity`.
    history: LruCache<JobId, JobRecord>,
}

struct QueueInner<P: JobPayload, C> {
    /// Shared context handed to every `execute`.
    container: Arc<C>,
    config: QueueConfig,
    state: Mutex<QueueState<P, C>>,
    /// Source of `JobId`s, starting at 1.
    next_id: AtomicU64,
    /// Mirrors `QueueState::running` for `wait_idle`.
    busy: watch::Sender<bool>,
    /// Set once by `dispose`; checked by `add_job` and at every dequeue.
    disposed: AtomicBool,
}

/// Releases the queue if the runner unwinds out of an `execute` or a
/// callback, so later jobs can start a new runner.
struct RunnerGuard<'a, P: JobPayload, C> {
    inner: &'a QueueInner<P, C>,
    armed: bool,
}

impl<P: JobPayload, C> Drop for RunnerGuard<'_, P, C> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let mut state = self.inner.state.lock();
        state.running = false;
        self.inner.busy.send_replace(false);
        warn!("Job runner exited abnormally, queue released");
    }
}

/// Handle to a sequential job queue. Clones share the same queue.
pub struct JobQueue<P: JobPayload, C> {
    inner: Arc<QueueInner<P, C>>,
}

impl<P: JobPayload, C> Clone for JobQueue<P, C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<P, C> JobQueue<P, C>
where
    P: JobPayload,
    C: Send + Sync + 'static,
{
    /// Create a queue with default settings. `container` is handed to every
    /// job's `execute`.
    pub fn new(container: Arc<C>) -> Self {
        JobQueueBuilder::new().build(container)
    }

    fn with_config(container: Arc<C>, config: QueueConfig) -> Self {
        let capacity = NonZeroUsize::new(config.history_capacity).unwrap_or(NonZeroUsize::MIN);
        let (busy, _) = watch::channel(false);
        debug!(
            default_retries = config.default_retries,
            history_capacity = capacity.get(),
            "Created job queue"
        );
        Self {
            inner: Arc::new(QueueInner {
                container,
                config,
                state: Mutex::new(QueueState {
                    jobs: VecDeque::new(),
                    running: false,
                    history: LruCache::new(capacity),
                }),
                next_id: AtomicU64::new(1),
                busy,
                disposed: AtomicBool::new(false),
            }),
        }
    }

    pub fn container(&self) -> &Arc<C> {
        &self.inner.container
    }

    /// Enqueue a job, applying its merge policy, and start the runner on the
    /// current tokio runtime if it is idle.
    ///
    /// Returns the id that will report the job's outcome. For a merge-first
    /// hit that is the id of the earlier job it was folded into.
    ///
    /// Outside a runtime the job is only queued; drive it with [`start`].
    ///
    /// [`start`]: Self::start
    pub fn add_job(&self, spec: JobSpec<P, C>, add_to_front: bool) -> Result<JobId, QueueError> {
        if self.is_disposed() {
            return Err(QueueError::Disposed);
        }
        let runtime = Handle::try_current().ok();

        let (id, spawn) = {
            let mut state = self.inner.state.lock();
            let id = self.insert(&mut state, spec, add_to_front);
            let spawn = !state.running && runtime.is_some();
            if spawn {
                self.set_running(&mut state, true);
            }
            (id, spawn)
        };

        match runtime {
            Some(handle) if spawn => {
                let queue = self.clone();
                handle.spawn(async move {
                    if let Err(e) = queue.run_loop().await {
                        debug!(error = %e, "Job runner stopped");
                    }
                });
            }
            None => trace!(job = %id, "No runtime, job waits for start()"),
            _ => {}
        }
        Ok(id)
    }

    /// Run queued jobs until the queue is empty. Returns immediately if a
    /// runner is already active.
    pub async fn start(&self) -> Result<(), QueueError> {
        if self.is_disposed() {
            return Err(QueueError::Disposed);
        }
        {
            let mut state = self.inner.state.lock();
            if state.running {
                trace!("Job runner already active");
                return Ok(());
            }
            self.set_running(&mut state, true);
        }
        self.run_loop().await
    }

    /// Wait until no runner is active.
    pub async fn wait_idle(&self) {
        let mut busy = self.inner.busy.subscribe();
        let _ = busy.wait_for(|busy| !*busy).await;
    }

    pub fn is_busy(&self) -> bool {
        self.inner.state.lock().running
    }

    /// Jobs waiting to run (canceled entries excluded).
    pub fn pending_count(&self) -> usize {
        self.inner
            .state
            .lock()
            .jobs
            .iter()
            .filter(|job| job.status == JobStatus::Pending)
            .count()
    }

    pub fn status(&self, id: JobId) -> Option<JobStatus> {
        self.inner.state.lock().history.peek(&id).map(|record| record.status)
    }

    /// Failed attempts so far.
    pub fn attempts(&self, id: JobId) -> Option<u32> {
        self.inner.state.lock().history.peek(&id).map(|record| record.attempts)
    }

    pub fn record(&self, id: JobId) -> Option<JobRecord> {
        self.inner.state.lock().history.peek(&id).cloned()
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.load(Ordering::SeqCst)
    }

    /// Cancel everything pending and refuse new jobs. A job already executing
    /// is allowed to settle; the runner stops right after it.
    pub fn dispose(&self) {
        if self.inner.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        let mut state = self.inner.state.lock();
        let QueueState { jobs, history, .. } = &mut *state;
        let mut canceled = 0;
        for mut job in jobs.drain(..) {
            if job.status == JobStatus::Pending {
                job.status = JobStatus::Canceled;
                history.put(job.id, job.record());
                canceled += 1;
            }
        }
        debug!(canceled, "Disposed job queue");
    }

    fn next_id(&self) -> JobId {
        JobId(self.inner.next_id.fetch_add(1, Ordering::Relaxed))
    }

    fn set_running(&self, state: &mut QueueState<P, C>, running: bool) {
        state.running = running;
        self.inner.busy.send_replace(running);
    }

    fn insert(&self, state: &mut QueueState<P, C>, spec: JobSpec<P, C>, add_to_front: bool) -> JobId {
        let kind = spec.kind();
        let merge = spec.merge;
        match merge {
            Some(MergePolicy::First) => {
                if let Some(existing) = state
                    .jobs
                    .iter_mut()
                    .find(|job| job.is_merge_candidate(kind, spec.tag.as_deref()))
                {
                    existing.payload.merge(spec.payload);
                    existing.callbacks.extend(spec.callback);
                    debug!(job = %existing.id, kind, "Merged into earlier pending job");
                    return existing.id;
                }
            }
            Some(MergePolicy::Last) => return self.insert_merge_last(state, spec),
            None => {}
        }

        let job = Job::from_spec(self.next_id(), spec, self.inner.config.default_retries);
        let id = job.id;
        state.history.put(id, job.record());
        trace!(job = %id, kind, add_to_front, "Queued job");
        if add_to_front {
            state.jobs.push_front(job);
        } else {
            state.jobs.push_back(job);
        }
        id
    }

    /// Cancel every pending job with the same kind and tag and append one job
    /// carrying their combined payload (oldest first) and callbacks.
    fn insert_merge_last(&self, state: &mut QueueState<P, C>, spec: JobSpec<P, C>) -> JobId {
        let kind = spec.kind();
        let tag = spec.tag.clone();
        let mut combined: Option<P> = None;
        let mut callbacks = Vec::new();
        let mut canceled = 0;

        for job in state
            .jobs
            .iter_mut()
            .filter(|job| job.is_merge_candidate(kind, tag.as_deref()))
        {
            job.status = JobStatus::Canceled;
            callbacks.append(&mut job.callbacks);
            match combined.as_mut() {
                Some(payload) => payload.merge(job.payload.clone()),
                None => combined = Some(job.payload.clone()),
            }
            state.history.put(job.id, job.record());
            canceled += 1;
        }

        let mut job = Job::from_spec(self.next_id(), spec, self.inner.config.default_retries);
        if let Some(mut payload) = combined {
            payload.merge(job.payload);
            job.payload = payload;
        }
        callbacks.append(&mut job.callbacks);
        job.callbacks = callbacks;

        let id = job.id;
        state.history.put(id, job.record());
        debug!(job = %id, kind, canceled, "Queued merged job at tail");
        state.jobs.push_back(job);
        id
    }

    async fn run_loop(&self) -> Result<(), QueueError> {
        debug!("Job runner started");
        let mut runner = RunnerGuard {
            inner: &self.inner,
            armed: true,
        };
        loop {
            let job = {
                let mut state = self.inner.state.lock();
                if self.is_disposed() {
                    runner.armed = false;
                    self.set_running(&mut state, false);
                    return Err(QueueError::Disposed);
                }
                match state.jobs.pop_front() {
                    Some(job) => job,
                    None => {
                        runner.armed = false;
                        self.set_running(&mut state, false);
                        break;
                    }
                }
            };

            if job.status == JobStatus::Canceled {
                trace!(job = %job.id, "Skipping canceled job");
                continue;
            }
            self.run_job(job).await;
        }
        debug!("Job runner idle");
        Ok(())
    }

    async fn run_job(&self, mut job: Job<P, C>) {
        job.status = JobStatus::Active;
        self.inner.state.lock().history.put(job.id, job.record());
        debug!(job = %job.id, kind = job.kind(), attempt = job.attempts + 1, "Running job");

        let result = (job.execute)(job.payload.clone(), Arc::clone(&self.inner.container)).await;

        match result {
            Ok(JobOutput { data, jobs }) => {
                job.status = JobStatus::Completed;
                let follow_ups = jobs.len();
                {
                    let mut state = self.inner.state.lock();
                    state.history.put(job.id, job.record());
                    if self.is_disposed() {
                        debug!(job = %job.id, follow_ups, "Queue disposed, dropping follow-up jobs");
                    } else {
                        for spec in jobs {
                            self.insert(&mut state, spec, false);
                        }
                    }
                }
                for callback in &job.callbacks {
                    callback(Ok(data.as_ref()));
                }
                debug!(job = %job.id, follow_ups, "Job completed");
            }
            Err(err) => {
                job.status = JobStatus::Failed;
                job.attempts += 1;
                job.error = Some(format!("{err:#}"));
                for callback in &job.callbacks {
                    callback(Err(&err));
                }

                let mut state = self.inner.state.lock();
                if self.is_disposed() {
                    debug!(job = %job.id, attempts = job.attempts, "Queue disposed, not retrying");
                    job.status = JobStatus::Canceled;
                    state.history.put(job.id, job.record());
                } else if job.attempts <= job.retries {
                    warn!(
                        job = %job.id,
                        attempts = job.attempts,
                        retries = job.retries,
                        error = %err,
                        "Job failed, requeueing"
                    );
                    job.status = JobStatus::Pending;
                    state.history.put(job.id, job.record());
                    state.jobs.push_back(job);
                } else {
                    error!(
                        job = %job.id,
                        kind = job.kind(),
                        attempts = job.attempts,
                        error = ?err,
                        "Job failed"
                    );
                    state.history.put(job.id, job.record());
                }
            }
        }
    }
}

/// Builder for [`JobQueue`] with configuration options.
#[derive(Debug, Clone, Default)]
pub struct JobQueueBuilder {
    config: QueueConfig,
}

impl JobQueueBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Retries for specs that don't call `with_retries`.
    pub fn default_retries(mut self, retries: u32) -> Self {
        self.config.default_retries = retries;
        self
    }

    pub fn history_capacity(mut self, capacity: usize) -> Self {
        self.config.history_capacity = capacity;
        self
    }

    pub fn config(mut self, config: QueueConfig) -> Self {
        self.config = config;
        self
    }

    pub fn build<P, C>(self, container: Arc<C>) -> JobQueue<P, C>
    where
        P: JobPayload,
        C: Send + Sync + 'static,
    {
        JobQueue::with_config(container, self.config)
    }
}
