//! Generic bounded single-producer / multi-consumer message queue (C3).
//!
//! A [`Queue<T, CAP>`] is a fixed-capacity ring of `T` slots shared by one
//! producer and an arbitrary (but bounded) number of consumers, each with
//! its own read cursor. It backs the stats queue, the top-talkers queue and
//! every tier of the WebSocket bus (C8) — the same generic type, just
//! instantiated over a different slot type and capacity, replacing the
//! source's namespaced C-macro queue generation.
//!
//! Producer policy is drop-slow-consumer, never block producer: writing
//! never waits on a consumer's cursor. A consumer that is sitting on the
//! slot about to be overwritten is forced one slot forward and charged a
//! drop, rather than stalling the producer.

use std::collections::HashMap;
use std::sync::Mutex;

use derive_more::{Display, From};

/// Maximum number of simultaneous consumers a single [`Queue`] will track.
pub const MAX_CONSUMERS: usize = 256;

/// Opaque handle identifying one consumer's read cursor within a [`Queue`].
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub struct ConsumerId(u64);

/// Errors returned by [`Queue::produce`] and [`Queue::consume`].
///
/// These mirror the source's negative-return-value error codes; a bad
/// [`ConsumerId`] is a programmer error and panics instead (see
/// [`Queue::unsubscribe`]), matching the source's "uninitialised queue
/// aborts" rule.
#[derive(Clone, Copy, Debug, Display, Eq, PartialEq, From)]
pub enum QueueError {
    /// `produce` was called with no live consumers subscribed.
    #[display(fmt = "no consumers subscribed")]
    NoConsumers,

    /// `consume` found nothing new for this consumer.
    #[display(fmt = "queue is empty for this consumer")]
    Empty,

    /// The writer/reader callback passed to `produce`/`consume` failed.
    #[display(fmt = "slot callback returned an error")]
    #[from(ignore)]
    CallbackFailed,

    /// `subscribe` was called when [`MAX_CONSUMERS`] is already reached.
    #[display(fmt = "consumer limit reached")]
    ConsumerLimit,
}

struct Consumer {
    cursor: u64,
    dropped_total: u64,
    delivered_total: u64,
    dropped_since_query: u64,
    delivered_since_query: u64,
}

impl Consumer {
    fn new(cursor: u64) -> Self {
        Self {
            cursor,
            dropped_total: 0,
            delivered_total: 0,
            dropped_since_query: 0,
            delivered_since_query: 0,
        }
    }
}

/// Snapshot of a consumer's drop/delivery counters since the last call to
/// [`Queue::drain_counters`].
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct ConsumerCounters {
    pub dropped: u64,
    pub delivered: u64,
}

struct Inner<T, const CAP: usize> {
    slots: Vec<T>,
    producer_cursor: u64,
    consumers: HashMap<ConsumerId, Consumer>,
    next_consumer_id: u64,
}

impl<T: Clone, const CAP: usize> Inner<T, CAP> {
    fn index(cursor: u64) -> usize {
        (cursor as usize) % CAP
    }
}

/// A bounded SPMC queue, generic over slot type `T` and capacity `CAP`.
///
/// This is the idiomatic-Rust analogue of the source's namespaced C-macro
/// queue instantiation: rather than generating one copy of the queue code
/// per concrete type via macros, callers simply instantiate this generic
/// type with the slot type and capacity they need.
pub struct Queue<T, const CAP: usize> {
    inner: Mutex<Inner<T, CAP>>,
}

impl<T: Clone + Default, const CAP: usize> Queue<T, CAP> {
    /// Creates an empty queue with no subscribed consumers.
    #[must_use]
    pub fn new() -> Self {
        assert!(CAP > 0, "queue capacity must be non-zero");
        Self {
            inner: Mutex::new(Inner {
                slots: vec![T::default(); CAP],
                producer_cursor: 0,
                consumers: HashMap::new(),
                next_consumer_id: 0,
            }),
        }
    }
}

impl<T: Clone, const CAP: usize> Queue<T, CAP> {
    /// Subscribes a new consumer, positioned to see only future productions.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::ConsumerLimit`] if [`MAX_CONSUMERS`] consumers
    /// are already subscribed.
    pub fn subscribe(&self) -> Result<ConsumerId, QueueError> {
        let mut inner = self.inner.lock().expect("queue mutex poisoned");
        if inner.consumers.len() >= MAX_CONSUMERS {
            return Err(QueueError::ConsumerLimit);
        }
        let id = ConsumerId(inner.next_consumer_id);
        inner.next_consumer_id += 1;
        let cursor = inner.producer_cursor;
        inner.consumers.insert(id, Consumer::new(cursor));
        Ok(id)
    }

    /// Removes a consumer's bookkeeping entirely.
    ///
    /// # Panics
    ///
    /// Panics if `id` is not a live consumer of this queue: unsubscribing an
    /// id you were not handed by [`Queue::subscribe`] is a programmer error.
    pub fn unsubscribe(&self, id: ConsumerId) {
        let mut inner = self.inner.lock().expect("queue mutex poisoned");
        assert!(
            inner.consumers.remove(&id).is_some(),
            "unsubscribe of unknown consumer id"
        );
    }

    /// `true` if at least one consumer is currently subscribed.
    #[must_use]
    pub fn has_consumers(&self) -> bool {
        !self.inner.lock().expect("queue mutex poisoned").consumers.is_empty()
    }

    /// Writes one new slot via `writer`, applying drop-slow-consumer policy
    /// to every consumer that was sitting on the slot about to be
    /// overwritten.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::NoConsumers`] without calling `writer` if no
    /// consumer is subscribed — callers use this to pause production
    /// upstream. Returns [`QueueError::CallbackFailed`] if `writer` itself
    /// fails; in that case no consumer bookkeeping is mutated.
    pub fn produce<F, E>(&self, writer: F) -> Result<(), QueueError>
    where
        F: FnOnce(&mut T) -> Result<(), E>,
    {
        let mut inner = self.inner.lock().expect("queue mutex poisoned");
        if inner.consumers.is_empty() {
            return Err(QueueError::NoConsumers);
        }

        let next_cursor = inner.producer_cursor + 1;
        let idx = Inner::<T, CAP>::index(next_cursor);

        if writer(&mut inner.slots[idx]).is_err() {
            return Err(QueueError::CallbackFailed);
        }

        // Any consumer still parked on the slot we just overwrote has, by
        // definition, not read it: bump it past and charge the drop. A
        // consumer that was already fully caught up also has
        // `index(cursor + 1) == idx` (that next slot is the one we just
        // wrote), but `cursor + 1 == next_cursor` in that case, which is the
        // legitimate "about to read the newest message" state, not a drop.
        for consumer in inner.consumers.values_mut() {
            if Inner::<T, CAP>::index(consumer.cursor + 1) == idx
                && consumer.cursor + 1 != next_cursor
            {
                consumer.cursor += 1;
                consumer.dropped_total += 1;
                consumer.dropped_since_query += 1;
            }
        }
        inner.producer_cursor = next_cursor;
        Ok(())
    }

    /// Reads the next unread slot for `id` via `reader`.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::Empty`] if `id` has already caught up with the
    /// producer. Returns [`QueueError::CallbackFailed`] if `reader` fails;
    /// the consumer's cursor is not advanced in that case.
    ///
    /// # Panics
    ///
    /// Panics if `id` is not a live consumer of this queue.
    pub fn consume<F, R, E>(&self, id: ConsumerId, reader: F) -> Result<R, QueueError>
    where
        F: FnOnce(&T) -> Result<R, E>,
    {
        let mut inner = self.inner.lock().expect("queue mutex poisoned");
        let producer_cursor = inner.producer_cursor;
        let consumer = inner
            .consumers
            .get_mut(&id)
            .expect("consume on unknown consumer id");

        if consumer.cursor == producer_cursor {
            return Err(QueueError::Empty);
        }

        let next_cursor = consumer.cursor + 1;
        let idx = Inner::<T, CAP>::index(next_cursor);
        let result = match reader(&inner.slots[idx]) {
            Ok(r) => r,
            Err(_) => return Err(QueueError::CallbackFailed),
        };

        let consumer = inner.consumers.get_mut(&id).expect("checked above");
        consumer.cursor = next_cursor;
        consumer.delivered_total += 1;
        consumer.delivered_since_query += 1;
        if consumer.cursor == producer_cursor && consumer.dropped_total > 0 {
            consumer.dropped_total = 0;
        }
        Ok(result)
    }

    /// Reads and clears the pending-since-last-query drop/delivery counters
    /// for `id`, used by the rate adaptor (C10) to compute a drop ratio.
    ///
    /// # Panics
    ///
    /// Panics if `id` is not a live consumer of this queue.
    pub fn drain_counters(&self, id: ConsumerId) -> ConsumerCounters {
        let mut inner = self.inner.lock().expect("queue mutex poisoned");
        let consumer = inner
            .consumers
            .get_mut(&id)
            .expect("drain_counters on unknown consumer id");
        let counters = ConsumerCounters {
            dropped: consumer.dropped_since_query,
            delivered: consumer.delivered_since_query,
        };
        consumer.dropped_since_query = 0;
        consumer.delivered_since_query = 0;
        counters
    }

    /// Total (never-reset) dropped count for `id`, used by tests.
    #[must_use]
    pub fn total_dropped(&self, id: ConsumerId) -> u64 {
        let inner = self.inner.lock().expect("queue mutex poisoned");
        inner.consumers[&id].dropped_total
    }

    /// Total (never-reset) delivered count for `id`, used by tests.
    #[must_use]
    pub fn total_delivered(&self, id: ConsumerId) -> u64 {
        let inner = self.inner.lock().expect("queue mutex poisoned");
        inner.consumers[&id].delivered_total
    }
}

impl<T: Clone + Default, const CAP: usize> Default for Queue<T, CAP> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::convert::Infallible;

    #[test]
    fn produce_without_consumers_errors() {
        let q: Queue<u32, 4> = Queue::new();
        assert_eq!(produce_to(&q, 1), Err(QueueError::NoConsumers));
    }

    fn produce_to<const CAP: usize>(
        q: &Queue<u32, CAP>,
        v: u32,
    ) -> Result<(), QueueError> {
        q.produce(|slot| -> Result<(), Infallible> {
            *slot = v;
            Ok(())
        })
    }

    #[test]
    fn fast_consumer_sees_every_message_in_order() {
        let q: Queue<u32, 8> = Queue::new();
        let c = q.subscribe().unwrap();
        for i in 0..100u32 {
            produce_to(&q, i).unwrap();
        }
        let mut seen = Vec::new();
        loop {
            match q.consume(c, |slot| -> Result<u32, Infallible> { Ok(*slot) }) {
                Ok(v) => seen.push(v),
                Err(QueueError::Empty) => break,
                Err(e) => panic!("unexpected error: {:?}", e),
            }
        }
        // Capacity 8 vs 100 messages with no interleaved reads means the
        // consumer necessarily falls behind; what's guaranteed is strict
        // ordering among whatever it does see, and a dropped count that
        // makes up the difference.
        assert!(seen.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(seen.len() as u64 + q.total_dropped(c), 100);
    }

    #[test]
    fn interleaved_consume_never_drops() {
        let q: Queue<u32, 4> = Queue::new();
        let c = q.subscribe().unwrap();
        for i in 0..1000u32 {
            produce_to(&q, i).unwrap();
            let v = q
                .consume(c, |slot| -> Result<u32, Infallible> { Ok(*slot) })
                .unwrap();
            assert_eq!(v, i);
        }
        assert_eq!(q.total_dropped(c), 0);
        assert_eq!(q.total_delivered(c), 1000);
    }

    #[test]
    fn slow_consumer_is_dropped_not_blocking() {
        let q: Queue<u32, 4> = Queue::new();
        let slow = q.subscribe().unwrap();
        let fast = q.subscribe().unwrap();
        for i in 0..1000u32 {
            produce_to(&q, i).unwrap();
            if i % 5 == 0 {
                let _ = q.consume(slow, |slot| -> Result<u32, Infallible> { Ok(*slot) });
            }
            q.consume(fast, |slot| -> Result<u32, Infallible> { Ok(*slot) })
                .unwrap();
        }
        assert_eq!(q.total_delivered(fast), 1000);
        assert_eq!(q.total_dropped(fast), 0);
        assert!(q.total_dropped(slow) > 0);
    }

    #[test]
    fn drop_counter_resets_once_consumer_catches_up() {
        let q: Queue<u32, 4> = Queue::new();
        let c = q.subscribe().unwrap();
        // Fall behind enough to force drops.
        for i in 0..20u32 {
            produce_to(&q, i).unwrap();
        }
        assert!(q.total_dropped(c) > 0);
        // Drain until empty: the consumer catches up with the producer.
        loop {
            match q.consume(c, |slot| -> Result<u32, Infallible> { Ok(*slot) }) {
                Ok(_) => {}
                Err(QueueError::Empty) => break,
                Err(e) => panic!("unexpected error: {:?}", e),
            }
        }
        assert_eq!(q.total_dropped(c), 0);
    }

    #[test]
    fn unsubscribe_then_produce_reports_no_consumers() {
        let q: Queue<u32, 4> = Queue::new();
        let c = q.subscribe().unwrap();
        q.unsubscribe(c);
        assert_eq!(produce_to(&q, 1), Err(QueueError::NoConsumers));
    }

    #[test]
    fn callback_failure_does_not_mutate_cursor() {
        let q: Queue<u32, 4> = Queue::new();
        let c = q.subscribe().unwrap();
        let result = q.produce(|_slot| -> Result<(), ()> { Err(()) });
        assert_eq!(result, Err(QueueError::CallbackFailed));
        assert_eq!(
            q.consume(c, |slot| -> Result<u32, Infallible> { Ok(*slot) }),
            Err(QueueError::Empty)
        );
    }

    #[test]
    fn drain_counters_clears_pending_but_not_totals() {
        let q: Queue<u32, 4> = Queue::new();
        let slow = q.subscribe().unwrap();
        for i in 0..20u32 {
            produce_to(&q, i).unwrap();
        }
        let counters = q.drain_counters(slow);
        assert_eq!(counters.dropped + counters.delivered, 0);
        // force a drop, then re-drain
        for i in 0..20u32 {
            produce_to(&q, i).unwrap();
        }
        let counters = q.drain_counters(slow);
        assert!(counters.dropped > 0);
        let counters_again = q.drain_counters(slow);
        assert_eq!(counters_again.dropped, 0);
        assert_eq!(counters_again.delivered, 0);
    }

    #[test]
    fn scenario_s1_queue_drop() {
        // S1 from the spec: capacity 64, 1 producer, 2 consumers; producer
        // sends 1_000_000 messages; consumer B drains every message, A does
        // not. A.delivered + A.dropped == total; B has zero drops.
        const TOTAL: u32 = 1_000_000;
        let q: Queue<u32, 64> = Queue::new();
        let a = q.subscribe().unwrap();
        let b = q.subscribe().unwrap();
        for i in 0..TOTAL {
            produce_to(&q, i).unwrap();
            // B drains fully every time (models "runs full tilt").
            q.consume(b, |slot| -> Result<u32, Infallible> { Ok(*slot) })
                .unwrap();
            // A only drains occasionally (models "sleeps between consumes").
            if i % 97 == 0 {
                let _ = q.consume(a, |slot| -> Result<u32, Infallible> { Ok(*slot) });
            }
        }
        // The property `delivered + dropped == total` only holds at
        // quiescence: drain whatever A still has in flight before checking
        // it, otherwise slots still sitting unread in the ring are counted
        // as neither delivered nor dropped.
        while q
            .consume(a, |slot| -> Result<u32, Infallible> { Ok(*slot) })
            .is_ok()
        {}
        assert_eq!(
            q.total_delivered(a) + q.total_dropped(a),
            u64::from(TOTAL)
        );
        assert_eq!(q.total_delivered(b), u64::from(TOTAL));
        assert_eq!(q.total_dropped(b), 0);
    }
}
