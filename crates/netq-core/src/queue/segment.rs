//! One fixed-capacity block of the queue's backing chain.
//!
//! Slot life cycle: EMPTY (claimed or not yet claimed) -> READY (value
//! written, readable) -> TAKEN (moved out by the consumer that claimed it).
//! Snapshot readers pin a slot while cloning; a consumer flips the slot to
//! TAKEN and then waits for pins to drain before moving the value out.

use std::cell::UnsafeCell;
use std::mem::MaybeUninit;
use std::ops::Range;
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};

use super::SEGMENT_CAPACITY;
use crate::sync::Backoff;

const EMPTY: u8 = 0;
const READY: u8 = 1;
const TAKEN: u8 = 2;

struct Slot<T> {
    state: AtomicU8,
    readers: AtomicUsize,
    value: UnsafeCell<MaybeUninit<T>>,
}

impl<T> Slot<T> {
    fn new() -> Self {
        Self {
            state: AtomicU8::new(EMPTY),
            readers: AtomicUsize::new(0),
            value: UnsafeCell::new(MaybeUninit::uninit()),
        }
    }

    /// # Safety
    /// The caller must own the append claim on this slot.
    unsafe fn publish(&self, value: T) {
        (*self.value.get()).write(value);
        self.state.store(READY, Ordering::Release);
    }

    /// # Safety
    /// The caller must own the take claim on this slot.
    unsafe fn take(&self) -> T {
        let mut backoff = Backoff::new();
        while self.state.load(Ordering::Acquire) != READY {
            backoff.snooze();
        }
        self.state.store(TAKEN, Ordering::SeqCst);
        backoff.reset();
        while self.readers.load(Ordering::SeqCst) != 0 {
            backoff.snooze();
        }
        (*self.value.get()).assume_init_read()
    }

    /// Clone the value once published. None if a consumer already took it.
    fn read_cloned(&self) -> Option<T>
    where
        T: Clone,
    {
        let mut backoff = Backoff::new();
        while self.state.load(Ordering::Acquire) == EMPTY {
            backoff.snooze();
        }
        let _pin = Pin::new(&self.readers);
        if self.state.load(Ordering::SeqCst) != READY {
            return None;
        }
        // SAFETY: READY was observed after pinning; `take` marks the slot
        // TAKEN before checking pins, so it cannot move the value out until
        // this pin is released.
        Some(unsafe { (*self.value.get()).assume_init_ref().clone() })
    }
}

struct Pin<'a>(&'a AtomicUsize);

impl<'a> Pin<'a> {
    fn new(readers: &'a AtomicUsize) -> Self {
        readers.fetch_add(1, Ordering::SeqCst);
        Pin(readers)
    }
}

impl Drop for Pin<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

pub(super) struct Segment<T> {
    /// Position of this segment in its chain (head's index <= tail's index).
    pub(super) index: u64,
    slots: Box<[Slot<T>]>,
    /// Next free slot; grows past capacity on over-claims.
    append: AtomicUsize,
    /// Next slot to remove; never exceeds capacity.
    take: AtomicUsize,
    next: OnceLock<Arc<Segment<T>>>,
}

// SAFETY: slot values are only written by the unique append claimer, moved
// out by the unique take claimer, and shared as `&T` with pinned readers.
unsafe impl<T: Send + Sync> Sync for Segment<T> {}

impl<T> Segment<T> {
    pub(super) fn new(index: u64) -> Self {
        Self {
            index,
            slots: (0..SEGMENT_CAPACITY).map(|_| Slot::new()).collect(),
            append: AtomicUsize::new(0),
            take: AtomicUsize::new(0),
            next: OnceLock::new(),
        }
    }

    /// Build a freshly linked chain holding `items` in order.
    /// Returns (head, tail). A full last segment gets an empty successor so
    /// that taking its final slot finds a link to advance to.
    pub(super) fn chain(items: Vec<T>) -> (Arc<Self>, Arc<Self>) {
        let mut segments = vec![Segment::new(0)];
        for item in items {
            let mut current = segments.len() - 1;
            if *segments[current].append.get_mut() == SEGMENT_CAPACITY {
                segments.push(Segment::new(current as u64 + 1));
                current += 1;
            }
            let segment = &mut segments[current];
            let at = *segment.append.get_mut();
            let slot = &mut segment.slots[at];
            slot.value.get_mut().write(item);
            *slot.state.get_mut() = READY;
            *segment.append.get_mut() += 1;
        }
        let last_full = segments
            .last_mut()
            .map_or(false, |last| *last.append.get_mut() == SEGMENT_CAPACITY);
        if last_full {
            let index = segments.len() as u64;
            segments.push(Segment::new(index));
        }

        let mut iter = segments.into_iter().rev();
        let tail = Arc::new(iter.next().unwrap_or_else(|| Segment::new(0)));
        let mut head = Arc::clone(&tail);
        for segment in iter {
            let _ = segment.next.set(head);
            head = Arc::new(segment);
        }
        (head, tail)
    }

    /// Take cursor clamped to capacity.
    pub(super) fn low(&self) -> usize {
        self.take.load(Ordering::Acquire).min(SEGMENT_CAPACITY)
    }

    /// Exclusive end of the claimed slots, clamped to capacity.
    pub(super) fn high(&self) -> usize {
        self.append.load(Ordering::Acquire).min(SEGMENT_CAPACITY)
    }

    pub(super) fn is_empty(&self) -> bool {
        self.low() >= self.high()
    }

    pub(super) fn next(&self) -> Option<&Arc<Segment<T>>> {
        self.next.get()
    }

    /// Spin until the producer that filled this segment links its successor.
    pub(super) fn wait_next(&self) -> Arc<Segment<T>> {
        let mut backoff = Backoff::new();
        loop {
            if let Some(next) = self.next.get() {
                return Arc::clone(next);
            }
            backoff.snooze();
        }
    }

    /// Claim the next slot and publish `value` into it.
    ///
    /// `Ok(true)` means the caller claimed the last slot and must link a
    /// successor with `grow`. `Err` hands the value back when the segment is
    /// full.
    pub(super) fn try_append(&self, value: T) -> Result<bool, T> {
        if self.append.load(Ordering::Relaxed) >= SEGMENT_CAPACITY {
            return Err(value);
        }
        let at = self.append.fetch_add(1, Ordering::SeqCst);
        if at >= SEGMENT_CAPACITY {
            return Err(value);
        }
        // SAFETY: fetch_add handed out `at` to this thread only.
        unsafe { self.slots[at].publish(value) };
        Ok(at == SEGMENT_CAPACITY - 1)
    }

    /// Link and return a new successor. Only the claimer of the last slot
    /// calls this, so the link is installed exactly once.
    pub(super) fn grow(&self) -> Arc<Segment<T>> {
        let next = Arc::new(Segment::new(self.index + 1));
        let _ = self.next.set(Arc::clone(&next));
        next
    }

    /// Remove the oldest value. The flag is true when the last slot of the
    /// segment was taken and the caller must advance the queue head.
    pub(super) fn try_take(&self) -> Option<(T, bool)> {
        let mut backoff = Backoff::new();
        loop {
            let low = self.low();
            if low >= self.high() {
                return None;
            }
            if self
                .take
                .compare_exchange_weak(low, low + 1, Ordering::SeqCst, Ordering::Relaxed)
                .is_ok()
            {
                // SAFETY: the successful CAS gave this thread the take claim on `low`.
                let value = unsafe { self.slots[low].take() };
                return Some((value, low + 1 == SEGMENT_CAPACITY));
            }
            backoff.spin();
        }
    }

    pub(super) fn peek(&self) -> Option<T>
    where
        T: Clone,
    {
        loop {
            let low = self.low();
            if low >= self.high() {
                return None;
            }
            if let Some(value) = self.slots[low].read_cloned() {
                return Some(value);
            }
        }
    }

    /// Append clones of the values in `range` to `out`, skipping slots a
    /// consumer took in the meantime.
    pub(super) fn collect_into(&self, range: Range<usize>, out: &mut Vec<T>)
    where
        T: Clone,
    {
        for at in range {
            if let Some(value) = self.slots[at].read_cloned() {
                out.push(value);
            }
        }
    }
}

impl<T> Drop for Segment<T> {
    fn drop(&mut self) {
        for slot in self.slots.iter_mut() {
            if *slot.state.get_mut() == READY {
                // SAFETY: READY slots hold an initialised value nobody moved out.
                unsafe { slot.value.get_mut().assume_init_drop() };
            }
        }
        // Unlink iteratively so a long chain does not recurse on drop.
        let mut next = self.next.take();
        while let Some(segment) = next {
            next = match Arc::try_unwrap(segment) {
                Ok(mut segment) => segment.next.take(),
                Err(_) => None,
            };
        }
    }
}
