//! Job groups: many jobs behind one aggregate completion signal.
//!
//! A member counts as outstanding until it completes, and a member that
//! completes without ever being picked up by a worker (canceled while
//! pending) is no longer counted at all. `processed` counts completions of
//! members that did start, so the group is complete once
//! `processed >= outstanding`.
//!
//! In synchronized mode (the default) the aggregate signal additionally
//! waits for `in_use_handlers` to reach zero: every member completion
//! dispatch holds one reference while it records itself and hands off its
//! subscribers, and each subscriber invocation holds one more until it
//! returns. The check is re-run whenever a reference is released.

use std::any::Any;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use crate::error::{Error, Result};
use crate::job::{Job, JobCompletion};
use crate::notify::{AsyncNotifier, DispatchHooks, Subscriber, Subscribers, SubscriptionId};
use crate::sync::{lock, read_lock, write_lock, Latch};
use crate::tag::{Tag, TagSlot};

/// Handle to a group of jobs. Cheap to clone.
#[derive(Clone)]
pub struct JobGroup {
    inner: Arc<GroupInner>,
}

pub(crate) struct GroupInner {
    members: RwLock<Vec<Job>>,
    synchronized: AtomicBool,
    enqueued: AtomicBool,
    started: AtomicBool,
    canceled: AtomicBool,
    fired: AtomicBool,
    tag: TagSlot,
    processing: AtomicUsize,
    processed: AtomicUsize,
    in_use_handlers: AtomicUsize,
    /// Self reference held from `start` until the aggregate signal fires, so
    /// a started group outlives its handles. Members only hold weak links.
    keep_alive: Mutex<Option<Arc<GroupInner>>>,
    done: Latch,
    on_started: Subscribers<JobGroup>,
    on_member_completed: Subscribers<JobCompletion>,
    on_completed: Subscribers<JobGroup>,
}

impl JobGroup {
    /// Group free-standing jobs that have not been started. Fails on an
    /// empty set, or if any job is already owned or started.
    pub fn new<I>(jobs: I) -> Result<Self>
    where
        I: IntoIterator<Item = Job>,
    {
        let jobs: Vec<Job> = jobs.into_iter().collect();
        if jobs.is_empty() {
            return Err(Error::EmptyGroup);
        }
        for job in &jobs {
            job.check_joinable()?;
        }
        let inner = Arc::new(GroupInner {
            members: RwLock::new(Vec::with_capacity(jobs.len())),
            synchronized: AtomicBool::new(true),
            enqueued: AtomicBool::new(false),
            started: AtomicBool::new(false),
            canceled: AtomicBool::new(false),
            fired: AtomicBool::new(false),
            tag: TagSlot::default(),
            processing: AtomicUsize::new(0),
            processed: AtomicUsize::new(0),
            in_use_handlers: AtomicUsize::new(0),
            keep_alive: Mutex::new(None),
            done: Latch::new(),
            on_started: Subscribers::new(),
            on_member_completed: Subscribers::new(),
            on_completed: Subscribers::new(),
        });
        {
            let mut members = write_lock(&inner.members);
            for job in jobs {
                job.attach(&inner)?;
                members.push(job);
            }
        }
        Ok(Self { inner })
    }

    pub(crate) fn from_inner(inner: Arc<GroupInner>) -> Self {
        Self { inner }
    }

    /// Caller-supplied payload, if any.
    pub fn tag(&self) -> Option<Tag> {
        self.inner.tag.get()
    }

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

    /// Current members, in insertion order.
    pub fn jobs(&self) -> Vec<Job> {
        read_lock(&self.inner.members).clone()
    }

    pub fn len(&self) -> usize {
        read_lock(&self.inner.members).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Members a worker is currently processing.
    pub fn processing(&self) -> usize {
        self.inner.processing.load(Ordering::SeqCst)
    }

    /// Members that started and then completed, whatever the outcome.
    pub fn processed(&self) -> usize {
        self.inner.processed.load(Ordering::SeqCst)
    }

    /// Member completion dispatches and subscriber invocations in flight.
    pub fn in_use_handlers(&self) -> usize {
        self.inner.in_use_handlers.load(Ordering::SeqCst)
    }

    /// Every member has finished, regardless of handler activity.
    pub fn is_completed(&self) -> bool {
        let members = read_lock(&self.inner.members);
        self.inner.completed_in(&members)
    }

    /// The aggregate completion signal has fired.
    pub fn is_done(&self) -> bool {
        self.inner.fired.load(Ordering::Acquire)
    }

    pub fn is_enqueued(&self) -> bool {
        self.inner.enqueued.load(Ordering::Acquire)
    }

    /// True once any member has begun processing.
    pub fn is_started(&self) -> bool {
        self.inner.started.load(Ordering::Acquire)
    }

    pub fn is_canceled(&self) -> bool {
        self.inner.canceled.load(Ordering::Acquire)
    }

    pub fn synchronized_completion(&self) -> bool {
        self.inner.synchronized()
    }

    /// Choose whether the aggregate signal waits for member subscribers.
    /// Fixed once the group has been started.
    pub fn set_synchronized_completion(&self, synchronized: bool) -> Result<()> {
        if self.is_enqueued() {
            return Err(Error::GroupAlreadyStarted);
        }
        self.inner.synchronized.store(synchronized, Ordering::Release);
        Ok(())
    }

    /// Submit every member. No-op if already started. If the dispatcher is
    /// gone, members that could not be submitted complete as canceled and
    /// the error is returned.
    pub fn start(&self) -> Result<()> {
        if self.inner.enqueued.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        *lock(&self.inner.keep_alive) = Some(Arc::clone(&self.inner));

        let mut failure = None;
        for job in self.jobs() {
            if let Err(e) = job.start() {
                job.abandon();
                failure.get_or_insert(e);
            }
        }
        // Members may all have finished before the group was started.
        self.inner.try_fire();
        failure.map_or(Ok(()), Err)
    }

    /// Add a job to a group that can still accept members. A started group
    /// starts the job immediately.
    pub fn add_job(&self, job: Job) -> Result<()> {
        {
            let mut members = write_lock(&self.inner.members);
            if self.inner.fired.load(Ordering::Acquire) {
                return Err(Error::GroupClosed);
            }
            let completed = self.inner.completed_in(&members);
            let handlers = self.inner.in_use_handlers.load(Ordering::SeqCst);
            if completed && (!self.inner.synchronized() || handlers == 0) {
                return Err(Error::GroupClosed);
            }
            job.check_joinable()?;
            job.attach(&self.inner)?;
            members.push(job.clone());
        }
        if self.is_enqueued() {
            if let Err(e) = job.start() {
                job.abandon();
                return Err(e);
            }
        }
        Ok(())
    }

    /// Cancel every member. Effective once, and only while the group is
    /// started and not yet complete.
    pub fn cancel(&self) {
        if !self.is_enqueued() || self.is_completed() {
            return;
        }
        if self.inner.canceled.swap(true, Ordering::AcqRel) {
            return;
        }
        tracing::debug!("canceling group of {} jobs", self.len());
        for job in self.jobs() {
            job.cancel();
        }
    }

    /// Block until the aggregate signal fires. Returns at once if the group
    /// was never started.
    pub fn wait(&self) {
        if self.is_enqueued() {
            self.inner.done.wait();
        }
    }

    /// Returns true if the aggregate signal fired within `timeout`.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        self.is_enqueued() && self.inner.done.wait_timeout(timeout)
    }

    /// Runs when the first member begins processing.
    pub fn on_started<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(JobGroup) + Send + Sync + 'static,
    {
        self.inner.on_started.subscribe(callback)
    }

    /// Runs for every member completion, alongside the member's own
    /// subscribers and counted by synchronized completion.
    pub fn on_member_completed<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(JobCompletion) + Send + Sync + 'static,
    {
        self.inner.on_member_completed.subscribe(callback)
    }

    /// Runs once, when the aggregate signal fires.
    pub fn on_completed<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(JobGroup) + Send + Sync + 'static,
    {
        self.inner.on_completed.subscribe(callback)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.inner.on_started.unsubscribe(id)
            || self.inner.on_member_completed.unsubscribe(id)
            || self.inner.on_completed.unsubscribe(id)
    }
}

impl PartialEq for JobGroup {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for JobGroup {}

impl std::fmt::Debug for JobGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobGroup")
            .field("len", &self.len())
            .field("processing", &self.processing())
            .field("processed", &self.processed())
            .field("in_use_handlers", &self.in_use_handlers())
            .field("synchronized", &self.synchronized_completion())
            .field("done", &self.is_done())
            .finish()
    }
}

impl GroupInner {
    fn synchronized(&self) -> bool {
        self.synchronized.load(Ordering::Acquire)
    }

    fn completed_in(&self, members: &[Job]) -> bool {
        let outstanding = members
            .iter()
            .filter(|job| job.is_started() || !job.is_canceled() || !job.is_completed())
            .count();
        self.processed.load(Ordering::SeqCst) >= outstanding
    }

    /// A member left the queue and is about to run.
    pub(crate) fn member_engaged(self: &Arc<Self>) {
        self.processing.fetch_add(1, Ordering::SeqCst);
        if !self.started.swap(true, Ordering::AcqRel) {
            let subscribers = self.on_started.snapshot();
            if !subscribers.is_empty() {
                AsyncNotifier::notify(&subscribers, JobGroup::from_inner(Arc::clone(self)));
            }
        }
    }

    /// Account for a member's completion and dispatch its subscribers
    /// together with the group's member subscribers.
    fn member_completed(
        self: &Arc<Self>,
        completion: JobCompletion,
        started: bool,
        mut subscribers: Vec<Subscriber<JobCompletion>>,
    ) {
        if started {
            self.processing.fetch_sub(1, Ordering::SeqCst);
            self.processed.fetch_add(1, Ordering::SeqCst);
        }
        subscribers.extend(self.on_member_completed.snapshot());

        if self.synchronized() {
            let entered = Arc::clone(self);
            let exited = Arc::clone(self);
            let hooks = DispatchHooks {
                on_enter: Some(Arc::new(move || entered.handler_entered())),
                on_exit: Some(Arc::new(move || exited.handler_released())),
            };
            AsyncNotifier::notify_with(&subscribers, completion, &hooks);
        } else {
            AsyncNotifier::notify(&subscribers, completion);
            self.try_fire();
        }
    }

    fn handler_entered(&self) {
        self.in_use_handlers.fetch_add(1, Ordering::SeqCst);
    }

    fn handler_released(self: &Arc<Self>) {
        self.in_use_handlers.fetch_sub(1, Ordering::SeqCst);
        self.try_fire();
    }

    /// Fire the aggregate signal if the group is started, complete and (in
    /// synchronized mode) idle. Fires at most once.
    fn try_fire(self: &Arc<Self>) {
        let fire = {
            let members = read_lock(&self.members);
            self.enqueued.load(Ordering::Acquire)
                && self.completed_in(&members)
                && (!self.synchronized() || self.in_use_handlers.load(Ordering::SeqCst) == 0)
                && !self.fired.swap(true, Ordering::AcqRel)
        };
        if !fire {
            return;
        }
        tracing::debug!(
            "job group complete: {} members, {} processed",
            read_lock(&self.members).len(),
            self.processed.load(Ordering::SeqCst)
        );
        self.done.set();
        let subscribers = self.on_completed.snapshot();
        if !subscribers.is_empty() {
            AsyncNotifier::notify(&subscribers, JobGroup::from_inner(Arc::clone(self)));
        }
        let released = lock(&self.keep_alive).take();
        drop(released);
    }
}

/// Reference a completing member holds on its group from before its
/// completed flag is set until its subscribers have been handed off.
pub(crate) struct Reporting {
    group: Arc<GroupInner>,
    counted: bool,
}

impl Reporting {
    pub(crate) fn begin(group: Arc<GroupInner>) -> Self {
        let counted = group.synchronized();
        if counted {
            group.handler_entered();
        }
        Self { group, counted }
    }

    pub(crate) fn finish(
        self,
        completion: JobCompletion,
        started: bool,
        subscribers: Vec<Subscriber<JobCompletion>>,
    ) {
        self.group.member_completed(completion, started, subscribers);
    }
}

impl Drop for Reporting {
    fn drop(&mut self) {
        if self.counted {
            self.group.handler_released();
        }
    }
}
