//! Tiered WebSocket message bus (C8).
//!
//! Five parallel instances of [`Queue`], one per latency [`Tier`]. Every
//! producer (the compute thread, the flow tracker, the message handler)
//! writes into exactly one tier, chosen from the message's `interval_ns` via
//! [`Tier::for_interval_ns`] — an explicit enum rather than an inline
//! integer comparison scattered through call sites, per the redesign note
//! in `SPEC_FULL.md` §9.

use crate::queue::{ConsumerId, Queue, QueueError};

/// Capacity of each tier's queue, in slots. Fast tiers see many small
/// messages per second; this is generous enough that a session draining
/// every callback never drops under normal load.
pub const TIER_QUEUE_CAPACITY: usize = 256;

/// A latency class of telemetry, each served by an independent queue.
///
/// Ordered fastest-to-slowest; [`Tier::Five`] is the guaranteed minimum
/// subscription every session must always carry (configuration messages and
/// anything slower than 50ms land here).
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum Tier {
    One,
    Two,
    Three,
    Four,
    Five,
}

impl Tier {
    /// All tiers, fastest first.
    pub const ALL: [Tier; 5] = [Tier::One, Tier::Two, Tier::Three, Tier::Four, Tier::Five];

    /// Maps a message's `interval_ns` to the tier it is published into.
    ///
    /// `interval_ns == 0` is reserved for configuration messages and always
    /// routes to [`Tier::Five`].
    #[must_use]
    pub fn for_interval_ns(interval_ns: u64) -> Tier {
        const MS: u64 = 1_000_000;
        match interval_ns {
            0 => Tier::Five,
            ns if ns <= 5 * MS => Tier::One,
            ns if ns <= 10 * MS => Tier::Two,
            ns if ns <= 20 * MS => Tier::Three,
            ns if ns <= 50 * MS => Tier::Four,
            _ => Tier::Five,
        }
    }

    /// 1-based index matching the wire/`resolution` message numbering.
    #[must_use]
    pub fn number(self) -> u8 {
        match self {
            Tier::One => 1,
            Tier::Two => 2,
            Tier::Three => 3,
            Tier::Four => 4,
            Tier::Five => 5,
        }
    }

    /// Builds a [`Tier`] from its 1-based wire number, clamped to `[1,5]`.
    #[must_use]
    pub fn from_number(n: u8) -> Tier {
        match n {
            0..=1 => Tier::One,
            2 => Tier::Two,
            3 => Tier::Three,
            4 => Tier::Four,
            _ => Tier::Five,
        }
    }

    fn index(self) -> usize {
        self.number() as usize - 1
    }
}

/// Five parallel [`Queue`] instances of JSON-text slots, one per [`Tier`].
pub struct MessageBus {
    tiers: [Queue<String, TIER_QUEUE_CAPACITY>; 5],
}

impl MessageBus {
    #[must_use]
    pub fn new() -> Self {
        Self {
            tiers: [
                Queue::new(),
                Queue::new(),
                Queue::new(),
                Queue::new(),
                Queue::new(),
            ],
        }
    }

    /// Returns the queue backing `tier`.
    #[must_use]
    pub fn queue(&self, tier: Tier) -> &Queue<String, TIER_QUEUE_CAPACITY> {
        &self.tiers[tier.index()]
    }

    /// Publishes `payload` (already-serialized JSON) into the tier implied
    /// by `interval_ns`.
    ///
    /// # Errors
    ///
    /// Propagates [`QueueError::NoConsumers`] if nobody is subscribed to
    /// that tier; this is the normal, expected state when no session has
    /// asked for that cadence.
    pub fn publish(&self, interval_ns: u64, payload: String) -> Result<(), QueueError> {
        let tier = Tier::for_interval_ns(interval_ns);
        self.queue(tier).produce(move |slot| -> Result<(), std::convert::Infallible> {
            *slot = payload;
            Ok(())
        })
    }

    /// Subscribes to every tier at once, returning one [`ConsumerId`] per
    /// tier in [`Tier::ALL`] order. Used by a freshly connected session,
    /// which always starts subscribed everywhere and then degrades via
    /// C10.
    pub fn subscribe_all(&self) -> Result<[ConsumerId; 5], QueueError> {
        let mut ids = Vec::with_capacity(5);
        for tier in Tier::ALL {
            ids.push(self.queue(tier).subscribe()?);
        }
        Ok([ids[0], ids[1], ids[2], ids[3], ids[4]])
    }
}

impl Default for MessageBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interval_boundaries_are_inclusive() {
        assert_eq!(Tier::for_interval_ns(5_000_000), Tier::One);
        assert_eq!(Tier::for_interval_ns(5_000_001), Tier::Two);
        assert_eq!(Tier::for_interval_ns(10_000_000), Tier::Two);
        assert_eq!(Tier::for_interval_ns(20_000_000), Tier::Three);
        assert_eq!(Tier::for_interval_ns(50_000_000), Tier::Four);
        assert_eq!(Tier::for_interval_ns(50_000_001), Tier::Five);
        assert_eq!(Tier::for_interval_ns(1_000_000_000), Tier::Five);
    }

    #[test]
    fn zero_interval_is_configuration_and_routes_to_tier_five() {
        assert_eq!(Tier::for_interval_ns(0), Tier::Five);
    }

    #[test]
    fn publish_and_consume_round_trip_per_tier() {
        let bus = MessageBus::new();
        let ids = bus.subscribe_all().unwrap();
        bus.publish(5_000_000, "{\"msg\":\"stats\"}".into()).unwrap();
        let got = bus
            .queue(Tier::One)
            .consume(ids[0], |s| -> Result<String, std::convert::Infallible> {
                Ok(s.clone())
            })
            .unwrap();
        assert_eq!(got, "{\"msg\":\"stats\"}");
    }

    #[test]
    fn tier_five_number_round_trips() {
        for tier in Tier::ALL {
            assert_eq!(Tier::from_number(tier.number()), tier);
        }
    }
}
