//! Job dispatcher: one pending queue drained by a demand-activated pool.
//!
//! Every `Added` notification from the queue tries to activate one more
//! worker, up to `worker_capacity` running at once. Workers are ephemeral:
//! each drains the queue and gives its slot back once it finds the queue
//! empty. Slot allocation and slot release share one short critical
//! section, and a worker re-checks the queue inside it before leaving, so an
//! item enqueued while the pool looked full is never stranded.
//!
//! Jobs only hold a weak link to their dispatcher. Once the last handle and
//! the last worker are gone, jobs still queued complete as canceled.

mod worker;

use std::any::Any;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::config::NetqConfig;
use crate::error::{Error, Result};
use crate::fetch::{CurlFetcher, Fetch};
use crate::group::JobGroup;
use crate::job::{Job, Request};
use crate::queue::SegmentedQueue;
use crate::sync::lock;

/// Runtime settings of a dispatcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatcherConfig {
    /// Maximum number of concurrently running workers (at least 1).
    pub worker_capacity: usize,
    /// Total time allowed per transfer.
    pub request_timeout: Duration,
    /// Whether `download` and `download_many` submit right away.
    pub auto_start: bool,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self::from(&NetqConfig::default())
    }
}

impl From<&NetqConfig> for DispatcherConfig {
    fn from(cfg: &NetqConfig) -> Self {
        Self {
            worker_capacity: cfg.workers.max(1),
            request_timeout: Duration::from_secs(cfg.request_timeout_secs),
            auto_start: cfg.auto_start,
        }
    }
}

/// Handle to a dispatcher service. Clones share the same queue and pool;
/// instances are independent of each other.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

pub(crate) struct DispatcherInner {
    queue: SegmentedQueue<Job>,
    fetcher: Box<dyn Fetch>,
    config: DispatcherConfig,
    workers: Mutex<WorkerTable>,
    draining: AtomicBool,
}

#[derive(Default)]
struct WorkerSlot {
    live: bool,
    handle: Option<JoinHandle<()>>,
}

struct WorkerTable {
    slots: Vec<WorkerSlot>,
    live: usize,
}

impl Dispatcher {
    pub fn new<F>(config: DispatcherConfig, fetcher: F) -> Self
    where
        F: Fetch + 'static,
    {
        let inner = DispatcherInner::new(config, Box::new(fetcher));
        let weak = Arc::downgrade(&inner);
        inner.queue.subscribe_added(move |_| {
            if let Some(inner) = weak.upgrade() {
                inner.activate_worker();
            }
        });

        Self { inner }
    }

    /// Dispatcher backed by `CurlFetcher`, both built from `cfg`.
    pub fn with_curl(cfg: &NetqConfig) -> Self {
        Self::new(DispatcherConfig::from(cfg), CurlFetcher::from_config(cfg))
    }

    pub fn config(&self) -> &DispatcherConfig {
        &self.inner.config
    }

    pub fn worker_capacity(&self) -> usize {
        self.inner.config.worker_capacity
    }

    /// Workers currently holding a slot.
    pub fn live_workers(&self) -> usize {
        lock(&self.inner.workers).live
    }

    /// Jobs waiting in the queue.
    pub fn pending(&self) -> usize {
        self.inner.queue.len()
    }

    pub fn is_shut_down(&self) -> bool {
        self.inner.is_draining()
    }

    /// A new job bound to this dispatcher, not yet submitted.
    pub fn create_job(&self, request: impl Into<Request>) -> Job {
        Job::new(request.into(), Arc::downgrade(&self.inner))
    }

    /// `create_job` with a payload attached.
    pub fn create_job_tagged<T>(&self, request: impl Into<Request>, tag: T) -> Job
    where
        T: Any + Send + Sync,
    {
        let job = self.create_job(request);
        job.set_tag(tag);
        job
    }

    /// Create a job and, with `auto_start`, submit it.
    pub fn download(&self, request: impl Into<Request>) -> Result<Job> {
        self.submit_new(self.create_job(request))
    }

    /// `download` with a payload attached before submission, so completion
    /// subscribers always see it.
    pub fn download_tagged<T>(&self, request: impl Into<Request>, tag: T) -> Result<Job>
    where
        T: Any + Send + Sync,
    {
        self.submit_new(self.create_job_tagged(request, tag))
    }

    fn submit_new(&self, job: Job) -> Result<Job> {
        if self.inner.config.auto_start {
            job.start()?;
        }
        Ok(job)
    }

    /// Create one job per request under a new group and, with `auto_start`,
    /// start the group.
    pub fn download_many<I, R>(&self, requests: I) -> Result<JobGroup>
    where
        I: IntoIterator<Item = R>,
        R: Into<Request>,
    {
        let jobs = requests.into_iter().map(|r| self.create_job(r));
        let group = JobGroup::new(jobs)?;
        if self.inner.config.auto_start {
            group.start()?;
        }
        Ok(group)
    }

    /// Stop taking work: running workers finish their current job and exit,
    /// jobs still pending complete as canceled. Blocks until the workers
    /// have been joined. Idempotent.
    pub fn shutdown(&self) {
        if self.inner.draining.swap(true, Ordering::SeqCst) {
            return;
        }
        tracing::info!("dispatcher shutting down");

        let handles: Vec<JoinHandle<()>> = {
            let mut table = lock(&self.inner.workers);
            table
                .slots
                .iter_mut()
                .filter_map(|slot| slot.handle.take())
                .collect()
        };
        let current = thread::current().id();
        for handle in handles {
            // A completion subscriber may call shutdown from a worker.
            if handle.thread().id() == current {
                continue;
            }
            if handle.join().is_err() {
                tracing::warn!("dispatcher worker panicked");
            }
        }

        let pending = self.inner.queue.drain();
        for job in &pending {
            job.abandon();
        }
        tracing::info!("dispatcher shut down, {} pending jobs canceled", pending.len());
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("config", &self.inner.config)
            .field("live_workers", &self.live_workers())
            .field("pending", &self.pending())
            .field("shut_down", &self.is_shut_down())
            .finish()
    }
}

impl DispatcherInner {
    fn new(config: DispatcherConfig, fetcher: Box<dyn Fetch>) -> Arc<Self> {
        let config = DispatcherConfig {
            worker_capacity: config.worker_capacity.max(1),
            ..config
        };
        let slots = (0..config.worker_capacity)
            .map(|_| WorkerSlot::default())
            .collect();
        Arc::new(Self {
            queue: SegmentedQueue::new(),
            fetcher,
            config,
            workers: Mutex::new(WorkerTable { slots, live: 0 }),
            draining: AtomicBool::new(false),
        })
    }

    fn is_draining(&self) -> bool {
        self.draining.load(Ordering::SeqCst)
    }

    /// Enqueue a job. Fails once shutdown has begun.
    pub(crate) fn submit(&self, job: Job) -> Result<()> {
        if self.is_draining() {
            return Err(Error::DispatcherShutDown);
        }
        self.queue.enqueue(job.clone());
        // Shutdown may have drained the queue before our item landed.
        if self.is_draining() && self.queue.try_remove(&job) {
            return Err(Error::DispatcherShutDown);
        }
        Ok(())
    }

    /// Take a job back out of the queue. False if a worker (or shutdown)
    /// already claimed it.
    pub(crate) fn withdraw(&self, job: &Job) -> bool {
        self.queue.contains(job) && self.queue.try_remove(job)
    }

    /// Start one more worker if a slot is free.
    fn activate_worker(self: &Arc<Self>) {
        let mut table = lock(&self.workers);
        if self.is_draining() || table.live >= self.config.worker_capacity {
            return;
        }
        let Some(slot) = table.slots.iter().position(|s| !s.live) else {
            return;
        };

        let inner = Arc::clone(self);
        let spawned = thread::Builder::new()
            .name(format!("netq-worker-{}", slot))
            .spawn(move || worker::run(inner, slot));
        match spawned {
            Ok(handle) => {
                // Any previous handle in this slot belongs to a worker that
                // already released it and is exiting; detach it.
                table.slots[slot] = WorkerSlot {
                    live: true,
                    handle: Some(handle),
                };
                table.live += 1;
                tracing::debug!("activated worker {} ({} live)", slot, table.live);
            }
            Err(e) => tracing::warn!("could not spawn worker thread: {}", e),
        }
    }

    /// Called by a worker that found nothing to do. Gives the slot back
    /// unless work arrived in the meantime; returns whether the worker
    /// should exit.
    fn release_worker(&self, slot: usize) -> bool {
        let mut table = lock(&self.workers);
        if !self.is_draining() && !self.queue.is_empty() {
            return false;
        }
        table.slots[slot].live = false;
        table.live -= 1;
        true
    }
}

impl Drop for DispatcherInner {
    fn drop(&mut self) {
        let stranded = self.queue.drain();
        if stranded.is_empty() {
            return;
        }
        tracing::info!("dispatcher dropped, {} pending jobs canceled", stranded.len());
        for job in &stranded {
            job.abandon();
        }
    }
}
