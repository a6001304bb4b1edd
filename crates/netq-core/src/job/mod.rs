//! A single fetch job and its state machine.
//!
//! Created -> Enqueued -> Processing -> Completed, or Created -> Enqueued ->
//! canceled while still pending. A job canceled after a worker dequeued it
//! still completes, with a `Canceled` status if the worker saw the flag
//! before starting the transfer, or with the transfer's outcome otherwise.

mod request;
mod result;

pub use request::{FormData, Request};
pub use result::{JobResult, JobStatus};

use std::any::Any;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock, Weak};
use std::time::Duration;

use crate::dispatcher::DispatcherInner;
use crate::error::{Error, Result};
use crate::group::{GroupInner, JobGroup, Reporting};
use crate::notify::{AsyncNotifier, Subscribers, SubscriptionId};
use crate::sync::Latch;
use crate::tag::{Tag, TagSlot};

/// Payload of a job completion event.
#[derive(Debug, Clone)]
pub struct JobCompletion {
    pub job: Job,
    pub result: Arc<JobResult>,
}

/// Handle to a submitted (or submittable) fetch. Cheap to clone; clones
/// refer to the same job and compare equal.
#[derive(Clone)]
pub struct Job {
    inner: Arc<JobInner>,
}

struct JobInner {
    request: Request,
    dispatcher: Weak<DispatcherInner>,
    enqueued: AtomicBool,
    started: AtomicBool,
    canceled: AtomicBool,
    completed: AtomicBool,
    group: OnceLock<Weak<GroupInner>>,
    tag: TagSlot,
    result: OnceLock<Arc<JobResult>>,
    done: Latch,
    on_started: Subscribers<Job>,
    on_completed: Subscribers<JobCompletion>,
}

impl Job {
    pub(crate) fn new(request: Request, dispatcher: Weak<DispatcherInner>) -> Self {
        Self {
            inner: Arc::new(JobInner {
                request,
                dispatcher,
                enqueued: AtomicBool::new(false),
                started: AtomicBool::new(false),
                canceled: AtomicBool::new(false),
                completed: AtomicBool::new(false),
                group: OnceLock::new(),
                tag: TagSlot::default(),
                result: OnceLock::new(),
                done: Latch::new(),
                on_started: Subscribers::new(),
                on_completed: Subscribers::new(),
            }),
        }
    }

    pub fn request(&self) -> &Request {
        &self.inner.request
    }

    pub fn url(&self) -> &str {
        self.inner.request.url()
    }

    pub fn is_enqueued(&self) -> bool {
        self.inner.enqueued.load(Ordering::Acquire)
    }

    /// True once a worker has picked the job up.
    pub fn is_started(&self) -> bool {
        self.inner.started.load(Ordering::Acquire)
    }

    pub fn is_canceled(&self) -> bool {
        self.inner.canceled.load(Ordering::Acquire)
    }

    pub fn is_completed(&self) -> bool {
        self.inner.completed.load(Ordering::Acquire)
    }

    pub fn result(&self) -> Option<Arc<JobResult>> {
        self.inner.result.get().cloned()
    }

    pub fn group(&self) -> Option<JobGroup> {
        self.group_inner().map(JobGroup::from_inner)
    }

    /// Caller-supplied payload, if any.
    pub fn tag(&self) -> Option<Tag> {
        self.inner.tag.get()
    }

    /// The payload downcast to `T`; None if unset or of another type.
    pub fn tag_as<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        self.inner.tag.get_as()
    }

    /// Attach a payload, returning the previous one.
    pub fn set_tag<T: Any + Send + Sync>(&self, value: T) -> Option<Tag> {
        self.inner.tag.set(Some(Arc::new(value)))
    }

    pub fn clear_tag(&self) -> Option<Tag> {
        self.inner.tag.set(None)
    }

    /// Runs when a worker begins processing the job.
    pub fn on_started<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(Job) + Send + Sync + 'static,
    {
        self.inner.on_started.subscribe(callback)
    }

    /// Runs after the result is recorded. Subscribers run concurrently on
    /// their own threads.
    pub fn on_completed<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(JobCompletion) + Send + Sync + 'static,
    {
        self.inner.on_completed.subscribe(callback)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.inner.on_started.unsubscribe(id) || self.inner.on_completed.unsubscribe(id)
    }

    /// Submit the job to its dispatcher. No-op if already enqueued.
    pub fn start(&self) -> Result<()> {
        if self.inner.enqueued.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let submitted = match self.inner.dispatcher.upgrade() {
            Some(dispatcher) => dispatcher.submit(self.clone()),
            None => Err(Error::DispatcherShutDown),
        };
        if submitted.is_err() {
            self.inner.enqueued.store(false, Ordering::Release);
        }
        submitted
    }

    /// Cooperative cancellation. A job still pending is withdrawn and gets a
    /// `Canceled` result immediately; a job a worker already claimed is only
    /// flagged, and a transfer already in flight runs to completion.
    pub fn cancel(&self) {
        if !self.is_enqueued() || self.is_completed() {
            return;
        }
        self.inner.canceled.store(true, Ordering::Release);
        let withdrawn = match self.inner.dispatcher.upgrade() {
            Some(dispatcher) => dispatcher.withdraw(self),
            None => true,
        };
        if withdrawn {
            self.complete(JobResult::canceled(Duration::ZERO));
        }
    }

    /// Block until the job completes. Any number of threads may wait.
    pub fn wait(&self) {
        if !self.is_completed() {
            self.inner.done.wait();
        }
    }

    /// Returns true if the job completed within `timeout`.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        self.is_completed() || self.inner.done.wait_timeout(timeout)
    }

    fn group_inner(&self) -> Option<Arc<GroupInner>> {
        self.inner.group.get().and_then(Weak::upgrade)
    }

    /// A job may join a group only while free-standing and not yet submitted.
    pub(crate) fn check_joinable(&self) -> Result<()> {
        if self.inner.group.get().is_some() {
            return Err(Error::JobOwned);
        }
        if self.is_enqueued() {
            return Err(Error::JobAlreadyStarted);
        }
        Ok(())
    }

    pub(crate) fn attach(&self, group: &Arc<GroupInner>) -> Result<()> {
        self.inner
            .group
            .set(Arc::downgrade(group))
            .map_err(|_| Error::JobOwned)
    }

    /// Worker side: the job left the queue and is about to run.
    pub(crate) fn begin_processing(&self) {
        self.inner.started.store(true, Ordering::Release);
        if let Some(group) = self.group_inner() {
            group.member_engaged();
        }
        let subscribers = self.inner.on_started.snapshot();
        if !subscribers.is_empty() {
            AsyncNotifier::notify(&subscribers, self.clone());
        }
    }

    /// Flag and complete a job that will never run (dispatcher shutdown).
    pub(crate) fn abandon(&self) {
        self.inner.canceled.store(true, Ordering::Release);
        self.complete(JobResult::canceled(Duration::ZERO));
    }

    /// Record the result (first call wins), release waiters, then dispatch
    /// completion subscribers, through the group's accounting if grouped.
    pub(crate) fn complete(&self, result: JobResult) {
        // Taken before the completed flag flips so a synchronized group
        // cannot fire in between.
        let reporting = self.group_inner().map(Reporting::begin);

        let result = Arc::new(result);
        if self.inner.result.set(Arc::clone(&result)).is_err() {
            return;
        }
        self.inner.completed.store(true, Ordering::Release);
        self.inner.done.set();

        let subscribers = self.inner.on_completed.snapshot();
        let completion = JobCompletion {
            job: self.clone(),
            result,
        };
        match reporting {
            Some(reporting) => reporting.finish(completion, self.is_started(), subscribers),
            None => AsyncNotifier::notify(&subscribers, completion),
        }
    }
}

impl PartialEq for Job {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for Job {}

impl std::fmt::Debug for Job {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Job")
            .field("url", &self.url())
            .field("enqueued", &self.is_enqueued())
            .field("started", &self.is_started())
            .field("canceled", &self.is_canceled())
            .field("completed", &self.is_completed())
            .finish()
    }
}
