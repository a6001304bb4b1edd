//! Fire-and-forget event dispatch.
//!
//! Subscriber invocations are handed to a shared pool of dispatch threads,
//! so the notifying thread (a queue producer, a download worker) never waits
//! for user code. The pool reuses idle threads and starts another whenever
//! every thread is busy, so a blocking subscriber never delays the others.
//! Threads retire after sitting idle for a while. Panics inside a
//! subscriber are caught and logged; they never reach the caller or stop
//! other subscribers from running.
//!
//! Optional enter/exit hooks give callers per-invocation accounting. The
//! enter hook runs on the notifying thread before the invocation is handed
//! off, so the accounting is visible as soon as `notify_with` returns; the
//! exit hook runs after the subscriber returns or panics.

use std::collections::VecDeque;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, OnceLock, PoisonError, RwLock};
use std::thread;
use std::time::Duration;

use crate::sync::{lock, read_lock, write_lock};

/// A registered event callback.
pub type Subscriber<A> = Arc<dyn Fn(A) + Send + Sync>;

/// Accounting hook run around each subscriber invocation.
pub type Hook = Arc<dyn Fn() + Send + Sync>;

static NEXT_SUBSCRIPTION: AtomicU64 = AtomicU64::new(1);

/// Handle returned by `subscribe`, used to unsubscribe later.
/// Ids are unique across the whole process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

impl SubscriptionId {
    fn next() -> Self {
        Self(NEXT_SUBSCRIPTION.fetch_add(1, Ordering::Relaxed))
    }
}

/// Thread-safe list of subscribers for one event.
pub struct Subscribers<A> {
    entries: RwLock<Vec<(SubscriptionId, Subscriber<A>)>>,
}

impl<A> Default for Subscribers<A> {
    fn default() -> Self {
        Self {
            entries: RwLock::new(Vec::new()),
        }
    }
}

impl<A> Subscribers<A> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(A) + Send + Sync + 'static,
    {
        let id = SubscriptionId::next();
        write_lock(&self.entries).push((id, Arc::new(callback)));
        id
    }

    /// Remove a subscriber. Returns false if the id is not registered here.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut entries = write_lock(&self.entries);
        match entries.iter().position(|(entry, _)| *entry == id) {
            Some(pos) => {
                entries.remove(pos);
                true
            }
            None => false,
        }
    }

    /// Current subscribers, in registration order.
    pub fn snapshot(&self) -> Vec<Subscriber<A>> {
        read_lock(&self.entries)
            .iter()
            .map(|(_, callback)| Arc::clone(callback))
            .collect()
    }

    pub fn len(&self) -> usize {
        read_lock(&self.entries).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<A> std::fmt::Debug for Subscribers<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscribers").field("len", &self.len()).finish()
    }
}

/// Per-invocation accounting hooks for `AsyncNotifier::notify_with`.
#[derive(Clone, Default)]
pub struct DispatchHooks {
    pub on_enter: Option<Hook>,
    pub on_exit: Option<Hook>,
}

/// Dispatches an event to every subscriber without blocking the caller.
pub struct AsyncNotifier;

impl AsyncNotifier {
    pub fn notify<A>(subscribers: &[Subscriber<A>], args: A)
    where
        A: Clone + Send + 'static,
    {
        Self::notify_with(subscribers, args, &DispatchHooks::default());
    }

    pub fn notify_with<A>(subscribers: &[Subscriber<A>], args: A, hooks: &DispatchHooks)
    where
        A: Clone + Send + 'static,
    {
        dispatch_on(DispatchPool::shared(), subscribers, args, hooks);
    }
}

fn dispatch_on<A>(
    pool: &Arc<DispatchPool>,
    subscribers: &[Subscriber<A>],
    args: A,
    hooks: &DispatchHooks,
) where
    A: Clone + Send + 'static,
{
    for subscriber in subscribers {
        if let Some(enter) = &hooks.on_enter {
            enter();
        }
        let subscriber = Arc::clone(subscriber);
        let args = args.clone();
        let on_exit = hooks.on_exit.clone();
        let task: Task = Box::new(move || {
            invoke(&subscriber, args);
            if let Some(exit) = on_exit {
                exit();
            }
        });
        if let Some(task) = pool.execute(task) {
            // No dispatch thread exists and none could be started. Running
            // here beats losing the event.
            tracing::warn!("no dispatch thread available, running subscriber inline");
            task();
        }
    }
}

fn invoke<A>(subscriber: &Subscriber<A>, args: A) {
    if panic::catch_unwind(AssertUnwindSafe(|| subscriber(args))).is_err() {
        tracing::warn!("event subscriber panicked; fault discarded");
    }
}

type Task = Box<dyn FnOnce() + Send>;

type SpawnFn = fn(Task) -> io::Result<()>;

/// How long a dispatch thread waits for work before it exits.
const IDLE_TIMEOUT: Duration = Duration::from_secs(10);

/// Elastic pool of dispatch threads fed from one task queue.
struct DispatchPool {
    state: Mutex<PoolState>,
    ready: Condvar,
    idle_timeout: Duration,
    spawn: SpawnFn,
}

#[derive(Default)]
struct PoolState {
    tasks: VecDeque<Task>,
    idle: usize,
    threads: usize,
}

fn spawn_dispatch_thread(body: Task) -> io::Result<()> {
    thread::Builder::new()
        .name("netq-notify".to_string())
        .spawn(body)
        .map(drop)
}

impl DispatchPool {
    fn new(idle_timeout: Duration, spawn: SpawnFn) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(PoolState::default()),
            ready: Condvar::new(),
            idle_timeout,
            spawn,
        })
    }

    /// Process-wide pool used by `AsyncNotifier`.
    fn shared() -> &'static Arc<Self> {
        static SHARED: OnceLock<Arc<DispatchPool>> = OnceLock::new();
        SHARED.get_or_init(|| Self::new(IDLE_TIMEOUT, spawn_dispatch_thread))
    }

    /// Queue a task for a dispatch thread. Wakes an idle thread when one is
    /// free and starts a new one otherwise. Hands a task back only when no
    /// thread is alive to run it and none could be started.
    fn execute(self: &Arc<Self>, task: Task) -> Option<Task> {
        let mut state = lock(&self.state);
        state.tasks.push_back(task);
        if state.idle >= state.tasks.len() {
            self.ready.notify_one();
            return None;
        }
        state.threads += 1;
        drop(state);

        let pool = Arc::clone(self);
        let err = match (self.spawn)(Box::new(move || pool.run())) {
            Ok(()) => return None,
            Err(e) => e,
        };
        let mut state = lock(&self.state);
        state.threads -= 1;
        tracing::warn!("could not spawn dispatch thread ({} alive): {}", state.threads, err);
        if state.threads > 0 {
            return None;
        }
        state.tasks.pop_back()
    }

    fn run(&self) {
        let mut state = lock(&self.state);
        loop {
            if let Some(task) = state.tasks.pop_front() {
                drop(state);
                task();
                state = lock(&self.state);
                continue;
            }
            state.idle += 1;
            let (next, wait) = self
                .ready
                .wait_timeout(state, self.idle_timeout)
                .unwrap_or_else(PoisonError::into_inner);
            state = next;
            state.idle -= 1;
            if wait.timed_out() && state.tasks.is_empty() {
                state.threads -= 1;
                return;
            }
        }
    }

    /// Dispatch threads currently alive.
    #[cfg(test)]
    fn threads(&self) -> usize {
        lock(&self.state).threads
    }

    /// Dispatch threads waiting for work.
    #[cfg(test)]
    fn idle_threads(&self) -> usize {
        lock(&self.state).idle
    }
}
