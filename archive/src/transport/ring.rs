//! Bounded lock-free SPSC ring for in-process fragment queues.
//!
//! Head and tail are free-running counters; a slot index is the counter modulo
//! capacity. Each handle keeps a cached copy of the other side's counter so the
//! shared atomic is only read when the ring looks full (producer) or empty
//! (consumer).
//!
//! ```text
//! ┌──────────────────────┐
//! │ head   (64-aligned)  │  written by producer
//! ├──────────────────────┤
//! │ tail   (64-aligned)  │  written by consumer
//! ├──────────────────────┤
//! │ closed               │  set when either handle drops
//! ├──────────────────────┤
//! │ slots: [T; capacity] │
//! └──────────────────────┘
//! ```

use std::cell::{Cell, UnsafeCell};
use std::marker::PhantomData;
use std::mem::MaybeUninit;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// Counter on its own cache line.
#[repr(align(64))]
struct Counter(AtomicUsize);

struct Shared<T> {
    head: Counter,
    tail: Counter,
    closed: AtomicBool,
    slots: Box<[UnsafeCell<MaybeUninit<T>>]>,
}

// SAFETY: a slot is written only by the producer while outside [tail, head)
// and read only by the consumer while inside it; the Release store of a
// counter followed by the Acquire load on the other side orders the slot
// access with the index update.
unsafe impl<T: Send> Send for Shared<T> {}
unsafe impl<T: Send> Sync for Shared<T> {}

impl<T> Shared<T> {
    fn capacity(&self) -> usize {
        self.slots.len()
    }
}

impl<T> Drop for Shared<T> {
    fn drop(&mut self) {
        let head = *self.head.0.get_mut();
        let mut tail = *self.tail.0.get_mut();
        while tail != head {
            let index = tail % self.slots.len();
            // SAFETY: both handles are gone, and every slot in [tail, head)
            // was written by the producer and never read.
            unsafe { self.slots[index].get_mut().assume_init_drop() };
            tail = tail.wrapping_add(1);
        }
    }
}

/// Marker type to opt-out of `Sync` while remaining `Send`.
type PhantomUnsync = PhantomData<Cell<&'static ()>>;

/// Write end. `Send` but not `Sync`.
pub(crate) struct RingProducer<T> {
    shared: Arc<Shared<T>>,
    head: usize,
    cached_tail: usize,
    _unsync: PhantomUnsync,
}

/// Read end. `Send` but not `Sync`.
pub(crate) struct RingConsumer<T> {
    shared: Arc<Shared<T>>,
    tail: usize,
    cached_head: usize,
    _unsync: PhantomUnsync,
}

/// Creates a ring holding at most `capacity` items.
///
/// # Panics
///
/// Panics if `capacity == 0`.
pub(crate) fn ring<T: Send>(capacity: usize) -> (RingProducer<T>, RingConsumer<T>) {
    assert!(capacity > 0, "ring capacity must be greater than 0");

    let slots = (0..capacity)
        .map(|_| UnsafeCell::new(MaybeUninit::uninit()))
        .collect();
    let shared = Arc::new(Shared {
        head: Counter(AtomicUsize::new(0)),
        tail: Counter(AtomicUsize::new(0)),
        closed: AtomicBool::new(false),
        slots,
    });

    let producer = RingProducer {
        shared: Arc::clone(&shared),
        head: 0,
        cached_tail: 0,
        _unsync: PhantomData,
    };
    let consumer = RingConsumer {
        shared,
        tail: 0,
        cached_head: 0,
        _unsync: PhantomData,
    };
    (producer, consumer)
}

impl<T: Send> RingProducer<T> {
    /// Pushes without waiting.
    ///
    /// # Errors
    ///
    /// Returns `Err(item)` if the ring is full.
    #[inline]
    pub(crate) fn push(&mut self, item: T) -> Result<(), T> {
        let capacity = self.shared.capacity();
        if self.head.wrapping_sub(self.cached_tail) >= capacity {
            self.cached_tail = self.shared.tail.0.load(Ordering::Acquire);
            if self.head.wrapping_sub(self.cached_tail) >= capacity {
                return Err(item);
            }
        }

        let index = self.head % capacity;
        // SAFETY: head - tail < capacity, so the consumer is not reading this
        // slot, and it stays ours until the new head is published below.
        unsafe { (*self.shared.slots[index].get()).write(item) };

        self.head = self.head.wrapping_add(1);
        self.shared.head.0.store(self.head, Ordering::Release);
        Ok(())
    }

    /// True once the consumer has been dropped.
    pub(crate) fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }
}

impl<T> Drop for RingProducer<T> {
    fn drop(&mut self) {
        self.shared.closed.store(true, Ordering::Release);
    }
}

impl<T: Send> RingConsumer<T> {
    /// Pops without waiting; `None` if the ring is empty.
    #[inline]
    pub(crate) fn pop(&mut self) -> Option<T> {
        if self.tail == self.cached_head {
            self.cached_head = self.shared.head.0.load(Ordering::Acquire);
            if self.tail == self.cached_head {
                return None;
            }
        }

        let index = self.tail % self.shared.capacity();
        // SAFETY: tail != head, so the producer initialised this slot and
        // published it with the Release store we just observed.
        let item = unsafe { (*self.shared.slots[index].get()).assume_init_read() };

        self.tail = self.tail.wrapping_add(1);
        self.shared.tail.0.store(self.tail, Ordering::Release);
        Some(item)
    }

    /// True once the producer has been dropped.
    pub(crate) fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }
}

impl<T> Drop for RingConsumer<T> {
    fn drop(&mut self) {
        self.shared.closed.store(true, Ordering::Release);
    }
}
