//! Unbounded multi-producer / multi-consumer FIFO queue.
//!
//! Items live in a singly linked chain of fixed-capacity segments. Producers
//! claim a slot with an atomic increment of the tail segment's append
//! cursor; consumers claim with a compare-and-swap on the head segment's take
//! cursor. A claimed slot is readable only once its value is published. The
//! producer that claims the last slot of a segment links the successor and
//! moves the tail, so concurrent producers only spin briefly on a full tail.
//!
//! `len` and `snapshot` work from a consistent sample of the head and tail
//! positions, re-read until two consecutive samples agree.
//!
//! Removal by value rebuilds the chain from a filtered snapshot. Ordinary
//! operations hold the structural gate shared; rebuilds hold it exclusively,
//! so a rebuild never drops an enqueue that is still in flight.
//!
//! Slot claims are lock-free. The gate and the `head`/`tail` pointers are
//! read locks on the hot path. Only a rebuild or an end advance takes one
//! exclusively.
//!
//! Structural changes are announced to listeners through `AsyncNotifier`.
//! Changes with no interested listener are not dispatched.

mod segment;


use std::sync::{Arc, RwLock};

use crate::notify::{AsyncNotifier, Subscribers, SubscriptionId};
use crate::sync::{read_lock, write_lock, Backoff};
use segment::Segment;

/// Slots per segment.
pub const SEGMENT_CAPACITY: usize = 32;

/// Structural change announced to queue listeners.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueChange {
    /// One item was appended.
    Added,
    /// This many items were removed (dequeue or removal by value).
    Removed(usize),
    /// The queue was cleared.
    Reset,
}

pub struct SegmentedQueue<T> {
    head: RwLock<Arc<Segment<T>>>,
    tail: RwLock<Arc<Segment<T>>>,
    gate: RwLock<()>,
    listeners: Subscribers<QueueChange>,
    added_listeners: Subscribers<QueueChange>,
}

/// Consistent view of the live range: `[low, SEGMENT_CAPACITY)` of `head`,
/// every slot of the segments in between, and `[0, high)` of `tail`.
struct Positions<T> {
    head: Arc<Segment<T>>,
    tail: Arc<Segment<T>>,
    low: usize,
    high: usize,
}

impl<T> Default for SegmentedQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> FromIterator<T> for SegmentedQueue<T> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        let (head, tail) = Segment::chain(iter.into_iter().collect());
        Self {
            head: RwLock::new(head),
            tail: RwLock::new(tail),
            gate: RwLock::new(()),
            listeners: Subscribers::new(),
            added_listeners: Subscribers::new(),
        }
    }
}

impl<T> SegmentedQueue<T> {
    pub fn new() -> Self {
        let first = Arc::new(Segment::new(0));
        Self {
            head: RwLock::new(Arc::clone(&first)),
            tail: RwLock::new(first),
            gate: RwLock::new(()),
            listeners: Subscribers::new(),
            added_listeners: Subscribers::new(),
        }
    }

    /// Register a change listener. Listeners run asynchronously and never
    /// block the thread that mutated the queue.
    pub fn subscribe<F>(&self, listener: F) -> SubscriptionId
    where
        F: Fn(QueueChange) + Send + Sync + 'static,
    {
        self.listeners.subscribe(listener)
    }

    /// Register a listener for `Added` only.
    pub fn subscribe_added<F>(&self, listener: F) -> SubscriptionId
    where
        F: Fn(QueueChange) + Send + Sync + 'static,
    {
        self.added_listeners.subscribe(listener)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.listeners.unsubscribe(id) || self.added_listeners.unsubscribe(id)
    }

    /// Append an item. Always succeeds.
    pub fn enqueue(&self, item: T) {
        {
            let _gate = read_lock(&self.gate);
            self.append(item);
        }
        self.announce(QueueChange::Added);
    }

    /// Remove and return the oldest item, or None if the queue is empty.
    pub fn try_dequeue(&self) -> Option<T> {
        let item = {
            let _gate = read_lock(&self.gate);
            self.take_front()?
        };
        self.announce(QueueChange::Removed(1));
        Some(item)
    }

    /// Best-effort emptiness check. A head segment that is exhausted but
    /// already linked to a successor means a head advance is in flight, so
    /// the check waits for it instead of reporting empty.
    pub fn is_empty(&self) -> bool {
        let _gate = read_lock(&self.gate);
        self.is_empty_inner()
    }

    /// Number of items, computed from a consistent head/tail sample. O(1)
    /// in the segment count but not free: it may spin while the ends move.
    pub fn len(&self) -> usize {
        let _gate = read_lock(&self.gate);
        let Positions { head, tail, low, high } = self.positions();
        if Arc::ptr_eq(&head, &tail) {
            return high.saturating_sub(low);
        }
        let between = (tail.index - head.index - 1) as usize;
        (SEGMENT_CAPACITY - low) + SEGMENT_CAPACITY * between + high
    }

    /// Remove every item and return them in FIFO order. Emits a single
    /// `Reset` instead of per-item notifications.
    pub fn drain(&self) -> Vec<T> {
        let mut items = Vec::new();
        {
            let _gate = read_lock(&self.gate);
            while let Some(item) = self.take_front() {
                items.push(item);
            }
        }
        self.announce(QueueChange::Reset);
        items
    }

    /// Remove and drop every item. Emits a single `Reset`.
    pub fn clear(&self) {
        drop(self.drain());
    }

    fn head(&self) -> Arc<Segment<T>> {
        Arc::clone(&read_lock(&self.head))
    }

    fn tail(&self) -> Arc<Segment<T>> {
        Arc::clone(&read_lock(&self.tail))
    }

    fn append(&self, mut item: T) {
        let mut backoff = Backoff::new();
        loop {
            let tail = self.tail();
            match tail.try_append(item) {
                Ok(filled) => {
                    if filled {
                        let next = tail.grow();
                        *write_lock(&self.tail) = next;
                    }
                    return;
                }
                Err(rejected) => {
                    item = rejected;
                    backoff.snooze();
                }
            }
        }
    }

    fn take_front(&self) -> Option<T> {
        while !self.is_empty_inner() {
            let head = self.head();
            if let Some((item, exhausted)) = head.try_take() {
                if exhausted {
                    self.advance_head(&head);
                }
                return Some(item);
            }
        }
        None
    }

    fn advance_head(&self, exhausted: &Arc<Segment<T>>) {
        let next = exhausted.wait_next();
        let mut head = write_lock(&self.head);
        if Arc::ptr_eq(&head, exhausted) {
            *head = next;
        }
    }

    fn is_empty_inner(&self) -> bool {
        let mut head = self.head();
        if !head.is_empty() {
            return false;
        }
        if head.next().is_none() {
            return true;
        }
        let mut backoff = Backoff::new();
        while head.is_empty() {
            if head.next().is_none() {
                return true;
            }
            backoff.snooze();
            head = self.head();
        }
        false
    }

    fn positions(&self) -> Positions<T> {
        let mut backoff = Backoff::new();
        loop {
            let head = self.head();
            let tail = self.tail();
            let low = head.low();
            let high = tail.high();
            let stable = Arc::ptr_eq(&head, &read_lock(&self.head))
                && Arc::ptr_eq(&tail, &read_lock(&self.tail))
                && low == head.low()
                && high == tail.high()
                && head.index <= tail.index;
            if stable {
                return Positions { head, tail, low, high };
            }
            backoff.snooze();
        }
    }

    /// Replace the whole chain. Caller holds the gate exclusively.
    fn rebuild(&self, items: Vec<T>) {
        let (head, tail) = Segment::chain(items);
        *write_lock(&self.head) = head;
        *write_lock(&self.tail) = tail;
    }

    fn announce(&self, change: QueueChange) {
        let mut listeners = self.listeners.snapshot();
        if change == QueueChange::Added {
            listeners.extend(self.added_listeners.snapshot());
        }
        if !listeners.is_empty() {
            AsyncNotifier::notify(&listeners, change);
        }
    }
}

impl<T: Clone> SegmentedQueue<T> {
    /// Clone of the oldest item without removing it.
    pub fn try_peek(&self) -> Option<T> {
        let _gate = read_lock(&self.gate);
        while !self.is_empty_inner() {
            if let Some(item) = self.head().peek() {
                return Some(item);
            }
        }
        None
    }

    /// Clones of all items in FIFO order. Taken concurrently with producers
    /// and consumers it returns each item at most once, and every item in
    /// it was present at some instant during the call.
    pub fn snapshot(&self) -> Vec<T> {
        let _gate = read_lock(&self.gate);
        self.snapshot_inner()
    }

    fn snapshot_inner(&self) -> Vec<T> {
        let Positions { head, tail, low, high } = self.positions();
        let mut items = Vec::new();
        if Arc::ptr_eq(&head, &tail) {
            head.collect_into(low..high, &mut items);
            return items;
        }
        head.collect_into(low..SEGMENT_CAPACITY, &mut items);
        let mut segment = head.wait_next();
        while !Arc::ptr_eq(&segment, &tail) {
            segment.collect_into(0..SEGMENT_CAPACITY, &mut items);
            segment = segment.wait_next();
        }
        tail.collect_into(0..high, &mut items);
        items
    }
}

impl<T: Clone + PartialEq> SegmentedQueue<T> {
    pub fn contains(&self, item: &T) -> bool {
        self.snapshot().iter().any(|x| x == item)
    }

    /// Remove the first occurrence of `item`, keeping the order of the rest.
    pub fn try_remove(&self, item: &T) -> bool {
        self.try_remove_many(std::slice::from_ref(item)) == 1
    }

    /// Remove the first occurrence of each of `items`. Returns how many were
    /// found and removed; emits one aggregated `Removed` when non-zero.
    pub fn try_remove_many(&self, items: &[T]) -> usize {
        let removed = {
            let _gate = write_lock(&self.gate);
            let mut remaining = self.snapshot_inner();
            let mut removed = 0;
            for item in items {
                if let Some(pos) = remaining.iter().position(|x| x == item) {
                    remaining.remove(pos);
                    removed += 1;
                }
            }
            if removed > 0 {
                self.rebuild(remaining);
            }
            removed
        };
        if removed > 0 {
            self.announce(QueueChange::Removed(removed));
        }
        removed
    }
}

impl<T> std::fmt::Debug for SegmentedQueue<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SegmentedQueue")
            .field("len", &self.len())
            .finish()
    }
}
