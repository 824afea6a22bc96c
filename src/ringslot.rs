//! Fixed-size circular hand-off of raw interface-counter frames between the
//! sampler thread and the compute thread (C2).
//!
//! Capacity 3 gives one slot of mandatory separation between producer and
//! consumer cursors: the sampler can be filling slot N+1 while the compute
//! thread is still reading slot N, and the slot the compute thread just
//! vacated becomes available for the sampler's *next* frame after that.
//! Failure here is a programmer error, not a runtime condition: if the two
//! threads are meeting their deadlines the consumer can never fall more than
//! one frame behind, so `produce_next` deliberately panics rather than
//! returning a "full" error that no correct caller could recover from.

use std::sync::Mutex;

/// Number of slots in the ring. One more than the minimum working set of
/// "one being written, one being read" so a slow wakeup of either side never
/// causes the two cursors to collide mid-step.
pub const SLOT_COUNT: usize = 3;

struct Inner<T> {
    slots: [T; SLOT_COUNT],
    producer: usize,
    consumer: usize,
}

/// Single-producer, single-consumer ring of `T` slots.
pub struct RingSlots<T> {
    inner: Mutex<Inner<T>>,
}

impl<T: Default + Copy> RingSlots<T> {
    /// Creates a new ring with all slots default-initialised.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                slots: [T::default(); SLOT_COUNT],
                producer: 0,
                consumer: 0,
            }),
        }
    }
}

impl<T> RingSlots<T> {
    /// Returns the index of the next slot the producer may write into, and
    /// advances the producer cursor.
    ///
    /// # Panics
    ///
    /// Panics if the next slot is the one the consumer currently points at.
    /// Under the documented cadence contract this can only happen if the
    /// compute thread has stalled for more than one whole sample period,
    /// which is a programmer/deployment error (see module docs).
    pub fn produce_next(&self) -> usize {
        let mut inner = self.inner.lock().expect("ring-slots mutex poisoned");
        let next = (inner.producer + 1) % SLOT_COUNT;
        assert_ne!(
            next, inner.consumer,
            "sample ring overrun: compute thread fell behind by a full frame"
        );
        inner.producer = next;
        next
    }

    /// Returns the index of the next slot the consumer may read, or `None`
    /// if the consumer has caught up with the producer (nothing new yet).
    pub fn consume_next(&self) -> Option<usize> {
        let mut inner = self.inner.lock().expect("ring-slots mutex poisoned");
        if inner.consumer == inner.producer {
            return None;
        }
        let next = (inner.consumer + 1) % SLOT_COUNT;
        inner.consumer = next;
        Some(next)
    }

    /// Runs `f` against the slot at `index` under the ring's mutex, for
    /// writing a freshly produced frame or reading a freshly consumed one.
    pub fn with_slot<R>(&self, index: usize, f: impl FnOnce(&mut T) -> R) -> R
    where
        T: Copy,
    {
        let mut inner = self.inner.lock().expect("ring-slots mutex poisoned");
        f(&mut inner.slots[index])
    }
}

impl<T: Default + Copy> Default for RingSlots<T> {
    fn default() -> Self {
        Self::new()
    }
}
