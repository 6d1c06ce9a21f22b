// ===============================
// src/queue.rs
// ===============================
//
// Bounded lock-free SPSC ring buffer.
//
// - Storage has capacity + 1 slots: one slot stays free so that
//   "full"  = (head + 1) % size == tail
//   "empty" = head == tail
//   never alias, without a separate count.
// - `head` is written only by the producer, `tail` only by the consumer.
//   The release store of an index pairs with the acquire load on the other
//   side; that edge is what publishes the slot contents.
// - `Queue::split` hands out exactly one `Producer` and one `Consumer`.
//   Neither is `Clone` and both need `&mut self`, so a second writer or
//   reader cannot exist in safe code.
//

use std::cell::UnsafeCell;
use std::fmt;
use std::mem::MaybeUninit;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crossbeam_utils::CachePadded;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum QueueError {
    #[error("queue capacity must be > 0")]
    ZeroCapacity,
    #[error("queue capacity {0} is too large")]
    CapacityOverflow(usize),
}

struct Ring<T> {
    slots: Box<[UnsafeCell<MaybeUninit<T>>]>,
    head: CachePadded<AtomicUsize>, // next write
    tail: CachePadded<AtomicUsize>, // next read
}

// Slots are only touched by the single producer (between tail and head is
// free space) or the single consumer (between tail and head is data).
unsafe impl<T: Send> Send for Ring<T> {}
unsafe impl<T: Send> Sync for Ring<T> {}

impl<T> Ring<T> {
    fn with_capacity(capacity: usize) -> Result<Self, QueueError> {
        if capacity == 0 {
            return Err(QueueError::ZeroCapacity);
        }
        let size = capacity
            .checked_add(1)
            .ok_or(QueueError::CapacityOverflow(capacity))?;
        let slots = (0..size)
            .map(|_| UnsafeCell::new(MaybeUninit::uninit()))
            .collect::<Vec<_>>()
            .into_boxed_slice();
        Ok(Self {
            slots,
            head: CachePadded::new(AtomicUsize::new(0)),
            tail: CachePadded::new(AtomicUsize::new(0)),
        })
    }

    #[inline]
    fn size(&self) -> usize {
        self.slots.len()
    }

    #[inline]
    fn advance(&self, idx: usize) -> usize {
        let next = idx + 1;
        if next == self.size() { 0 } else { next }
    }

    /// # Safety
    /// At most one thread may be inside `push` at any time.
    #[inline]
    unsafe fn push(&self, item: T) -> Result<(), T> {
        let head = self.head.load(Ordering::Relaxed);
        let next = self.advance(head);
        if next == self.tail.load(Ordering::Acquire) {
            return Err(item);
        }
        // SAFETY: slot `head` is outside [tail, head) so the consumer will not
        // read it until the release store below.
        unsafe { (*self.slots[head].get()).write(item) };
        self.head.store(next, Ordering::Release);
        Ok(())
    }

    /// # Safety
    /// At most one thread may be inside `pop` at any time.
    #[inline]
    unsafe fn pop(&self) -> Option<T> {
        let tail = self.tail.load(Ordering::Relaxed);
        if tail == self.head.load(Ordering::Acquire) {
            return None;
        }
        // SAFETY: the acquire load above observed a head past `tail`, so the
        // producer's write to this slot happened-before this read.
        let item = unsafe { (*self.slots[tail].get()).assume_init_read() };
        self.tail.store(self.advance(tail), Ordering::Release);
        Some(item)
    }

    fn len(&self) -> usize {
        let head = self.head.load(Ordering::Acquire);
        let tail = self.tail.load(Ordering::Acquire);
        (head + self.size() - tail) % self.size()
    }
}

impl<T> Drop for Ring<T> {
    fn drop(&mut self) {
        let head = *self.head.get_mut();
        let mut tail = *self.tail.get_mut();
        while tail != head {
            // SAFETY: [tail, head) holds initialised items never popped.
            unsafe { self.slots[tail].get_mut().assume_init_drop() };
            tail = self.advance(tail);
        }
    }
}

/// Bounded SPSC queue with exclusive ownership of both ends.
///
/// Use it directly from one thread, or [`split`](Queue::split) it into a
/// [`Producer`] and a [`Consumer`] to move across threads.
pub struct Queue<T> {
    ring: Arc<Ring<T>>,
}

impl<T> Queue<T> {
    pub fn new(capacity: usize) -> Result<Self, QueueError> {
        Ok(Self { ring: Arc::new(Ring::with_capacity(capacity)?) })
    }

    /// Non-blocking push. Hands the item back if the queue is full.
    pub fn push(&mut self, item: T) -> Result<(), T> {
        // SAFETY: `&mut self` on the only handle.
        unsafe { self.ring.push(item) }
    }

    /// Non-blocking pop. `None` if empty.
    pub fn pop(&mut self) -> Option<T> {
        // SAFETY: `&mut self` on the only handle.
        unsafe { self.ring.pop() }
    }

    pub fn capacity(&self) -> usize { self.ring.size() - 1 }
    pub fn len(&self) -> usize { self.ring.len() }
    pub fn is_empty(&self) -> bool { self.len() == 0 }
    pub fn is_full(&self) -> bool { self.len() == self.capacity() }

    /// Read-only depth view that stays valid after `split`.
    pub fn probe(&self) -> DepthProbe<T> {
        DepthProbe { ring: Arc::clone(&self.ring) }
    }

    pub fn split(self) -> (Producer<T>, Consumer<T>) {
        let producer = Producer { ring: Arc::clone(&self.ring) };
        let consumer = Consumer { ring: self.ring };
        (producer, consumer)
    }
}

/// Write end. One per queue.
pub struct Producer<T> {
    ring: Arc<Ring<T>>,
}

impl<T> Producer<T> {
    pub fn push(&mut self, item: T) -> Result<(), T> {
        // SAFETY: split() created exactly one Producer, and it is not Clone.
        unsafe { self.ring.push(item) }
    }

    pub fn capacity(&self) -> usize { self.ring.size() - 1 }
    /// Approximate while the consumer is running.
    pub fn len(&self) -> usize { self.ring.len() }
    pub fn is_empty(&self) -> bool { self.len() == 0 }
    pub fn is_full(&self) -> bool { self.len() == self.capacity() }
}

/// Read end. One per queue.
pub struct Consumer<T> {
    ring: Arc<Ring<T>>,
}

impl<T> Consumer<T> {
    pub fn pop(&mut self) -> Option<T> {
        // SAFETY: split() created exactly one Consumer, and it is not Clone.
        unsafe { self.ring.pop() }
    }

    pub fn capacity(&self) -> usize { self.ring.size() - 1 }
    /// Approximate while the producer is running.
    pub fn len(&self) -> usize { self.ring.len() }
    pub fn is_empty(&self) -> bool { self.len() == 0 }
    pub fn is_full(&self) -> bool { self.len() == self.capacity() }
}

/// Observes occupancy only; cannot push or pop.
pub struct DepthProbe<T> {
    ring: Arc<Ring<T>>,
}

impl<T> DepthProbe<T> {
    pub fn capacity(&self) -> usize { self.ring.size() - 1 }
    pub fn len(&self) -> usize { self.ring.len() }
    pub fn is_empty(&self) -> bool { self.len() == 0 }
}

impl<T> Clone for DepthProbe<T> {
    fn clone(&self) -> Self {
        Self { ring: Arc::clone(&self.ring) }
    }
}

impl<T> fmt::Debug for Queue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Queue").field("capacity", &self.capacity()).field("len", &self.len()).finish()
    }
}

impl<T> fmt::Debug for Producer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Producer").field("capacity", &self.capacity()).field("len", &self.len()).finish()
    }
}

impl<T> fmt::Debug for Consumer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Consumer").field("capacity", &self.capacity()).field("len", &self.len()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn zero_capacity_is_rejected() {
        assert_eq!(Queue::<u32>::new(0).unwrap_err(), QueueError::ZeroCapacity);
        assert_eq!(
            Queue::<u32>::new(usize::MAX).unwrap_err(),
            QueueError::CapacityOverflow(usize::MAX)
        );
    }

    #[test]
    fn pops_in_push_order() {
        let mut q = Queue::new(8).unwrap();
        for i in 0..8 {
            assert!(q.push(i).is_ok());
        }
        let out: Vec<_> = std::iter::from_fn(|| q.pop()).collect();
        assert_eq!(out, (0..8).collect::<Vec<_>>());
    }

    #[test]
    fn accepts_exactly_capacity_then_one_more_after_pop() {
        let mut q = Queue::new(3).unwrap();
        assert!(q.push(1).is_ok());
        assert!(q.push(2).is_ok());
        assert!(q.push(3).is_ok());
        assert!(q.is_full());
        assert_eq!(q.push(4), Err(4));

        assert_eq!(q.pop(), Some(1));
        assert!(q.push(4).is_ok());
        assert_eq!(q.push(5), Err(5));
        assert_eq!(q.len(), 3);
    }

    #[test]
    fn full_push_and_empty_pop_leave_state_untouched() {
        let mut q = Queue::new(2).unwrap();
        assert_eq!(q.pop(), None);
        assert!(q.is_empty());

        q.push("a").unwrap();
        q.push("b").unwrap();
        assert_eq!(q.push("c"), Err("c"));
        assert_eq!(q.len(), 2);
        assert_eq!(q.pop(), Some("a"));
        assert_eq!(q.pop(), Some("b"));
        assert_eq!(q.pop(), None);
        assert_eq!(q.len(), 0);
    }

    #[test]
    fn indices_wrap_around() {
        let mut q = Queue::new(2).unwrap();
        for round in 0..10 {
            q.push(round * 2).unwrap();
            q.push(round * 2 + 1).unwrap();
            assert_eq!(q.pop(), Some(round * 2));
            assert_eq!(q.pop(), Some(round * 2 + 1));
        }
        assert!(q.is_empty());
    }

    #[test]
    fn split_handles_share_the_ring() {
        let (mut tx, mut rx) = Queue::new(4).unwrap().split();
        assert_eq!(tx.capacity(), 4);
        tx.push(10u64).unwrap();
        tx.push(11).unwrap();
        assert_eq!(rx.len(), 2);
        assert_eq!(rx.pop(), Some(10));
        assert_eq!(tx.len(), 1);
        assert_eq!(rx.pop(), Some(11));
        assert!(rx.is_empty());
    }

    #[test]
    fn probe_tracks_depth_across_split() {
        let q = Queue::new(4).unwrap();
        let probe = q.probe();
        let (mut tx, mut rx) = q.split();
        tx.push(1).unwrap();
        tx.push(2).unwrap();
        assert_eq!(probe.len(), 2);
        rx.pop();
        assert_eq!(probe.len(), 1);
        assert_eq!(probe.capacity(), 4);
    }

    struct Counted(Arc<AtomicUsize>);
    impl Drop for Counted {
        fn drop(&mut self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn leftover_items_are_dropped_once() {
        let drops = Arc::new(AtomicUsize::new(0));
        {
            let (mut tx, mut rx) = Queue::new(4).unwrap().split();
            for _ in 0..3 {
                assert!(tx.push(Counted(drops.clone())).is_ok());
            }
            drop(rx.pop());
            assert_eq!(drops.load(Ordering::SeqCst), 1);
            drop(tx);
        }
        assert_eq!(drops.load(Ordering::SeqCst), 3);
    }
}
