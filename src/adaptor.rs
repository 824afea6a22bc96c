//! Per-session rate adaptor (C10).
//!
//! Watches a session's drop percentage across its subscribed tiers over a
//! sliding window and degrades (subscribes to a slower minimum tier) or
//! upgrades (re-subscribes to a faster one) accordingly. Tier 5 is the
//! guaranteed minimum and is never unsubscribed.

use std::time::{Duration, Instant};

use crate::bus::{MessageBus, Tier};
use crate::proto::Resolution;
use crate::queue::{ConsumerId, QueueError};

/// Window over which drop percentage is evaluated.
pub const TIER_WINDOW: Duration = Duration::from_secs(5);
/// Degrade threshold: drop percentage above this demotes the session.
pub const TIER_HIGH_WATERMARK: f64 = 0.10;
/// Upgrade threshold: drop percentage below this promotes the session.
pub const TIER_LOW_WATERMARK: f64 = 0.02;

fn tier_interval_ms(tier: Tier) -> u32 {
    match tier {
        Tier::One => 5,
        Tier::Two => 10,
        Tier::Three => 20,
        Tier::Four => 50,
        Tier::Five => 1000,
    }
}

/// Per-session subscription state and drop-window accounting.
pub struct SessionAdaptor {
    current_min_tier: u8,
    subscriptions: [Option<ConsumerId>; 5],
    window_start: Instant,
    drops_window: u64,
    delivered_window: u64,
}

impl SessionAdaptor {
    /// Subscribes a fresh session to tiers `[initial_min_tier, 5]`,
    /// `initial_min_tier` defaulting to 3 per the spec.
    ///
    /// # Errors
    ///
    /// Propagates [`QueueError::ConsumerLimit`] if any tier's queue is at
    /// capacity.
    pub fn new(bus: &MessageBus) -> Result<Self, QueueError> {
        Self::with_initial_tier(bus, 3)
    }

    pub fn with_initial_tier(bus: &MessageBus, initial_min_tier: u8) -> Result<Self, QueueError> {
        let mut subscriptions = [None; 5];
        for tier in Tier::ALL {
            if tier.number() >= initial_min_tier {
                subscriptions[tier.number() as usize - 1] = Some(bus.queue(tier).subscribe()?);
            }
        }
        Ok(Self {
            current_min_tier: initial_min_tier,
            subscriptions,
            window_start: Instant::now(),
            drops_window: 0,
            delivered_window: 0,
        })
    }

    #[must_use]
    pub fn current_min_tier(&self) -> u8 {
        self.current_min_tier
    }

    /// Consumer id for `tier`, if currently subscribed.
    #[must_use]
    pub fn consumer_for(&self, tier: Tier) -> Option<ConsumerId> {
        self.subscriptions[tier.number() as usize - 1]
    }

    /// Called once per `TIER_WINDOW`: folds in drop/delivery counters from
    /// every subscribed tier and degrades/upgrades as needed. Returns a
    /// [`Resolution`] to push to the client if the tier membership changed.
    pub fn on_window_tick(&mut self, bus: &MessageBus) -> Option<Resolution> {
        if self.window_start.elapsed() < TIER_WINDOW {
            return None;
        }

        for tier in Tier::ALL {
            if let Some(id) = self.subscriptions[tier.number() as usize - 1] {
                let counters = bus.queue(tier).drain_counters(id);
                self.drops_window += counters.dropped;
                self.delivered_window += counters.delivered;
            }
        }

        let denom = self.drops_window + self.delivered_window;
        let p = if denom == 0 {
            0.0
        } else {
            self.drops_window as f64 / denom as f64
        };

        let mut changed = false;
        if p > TIER_HIGH_WATERMARK && self.current_min_tier < 5 {
            let fastest = Tier::from_number(self.current_min_tier);
            if let Some(id) = self.subscriptions[fastest.number() as usize - 1].take() {
                bus.queue(fastest).unsubscribe(id);
            }
            self.current_min_tier += 1;
            changed = true;
        } else if p < TIER_LOW_WATERMARK && self.current_min_tier > 1 {
            let candidate = Tier::from_number(self.current_min_tier - 1);
            if let Ok(id) = bus.queue(candidate).subscribe() {
                self.subscriptions[candidate.number() as usize - 1] = Some(id);
                self.current_min_tier -= 1;
                changed = true;
            }
        }

        self.drops_window = 0;
        self.delivered_window = 0;
        self.window_start = Instant::now();

        if changed {
            Some(Resolution {
                min_interval_ms: tier_interval_ms(Tier::from_number(self.current_min_tier)),
            })
        } else {
            None
        }
    }

    /// Drains every subscribed tier from 5 down to `current_min_tier`,
    /// invoking `on_message` with each payload in turn. Stops draining a
    /// tier as soon as it reports empty or a callback asks to stop (the
    /// back-pressure re-arm point in a real transport).
    pub fn drain_into(&self, bus: &MessageBus, mut on_message: impl FnMut(String) -> bool) {
        for tier in Tier::ALL.iter().rev() {
            if tier.number() < self.current_min_tier {
                break;
            }
            let Some(id) = self.subscriptions[tier.number() as usize - 1] else {
                continue;
            };
            loop {
                let result = bus
                    .queue(*tier)
                    .consume(id, |s| -> Result<String, std::convert::Infallible> { Ok(s.clone()) });
                match result {
                    Ok(payload) => {
                        if !on_message(payload) {
                            break;
                        }
                    }
                    Err(_) => break,
                }
            }
        }
    }

    /// Unsubscribes from every tier. Must be called when the session closes.
    pub fn unsubscribe_all(&mut self, bus: &MessageBus) {
        for tier in Tier::ALL {
            if let Some(id) = self.subscriptions[tier.number() as usize - 1].take() {
                bus.queue(tier).unsubscribe(id);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_subscribed_to_tier_three_through_five() {
        let bus = MessageBus::new();
        let adaptor = SessionAdaptor::new(&bus).unwrap();
        assert_eq!(adaptor.current_min_tier(), 3);
        assert!(adaptor.consumer_for(Tier::One).is_none());
        assert!(adaptor.consumer_for(Tier::Three).is_some());
        assert!(adaptor.consumer_for(Tier::Five).is_some());
    }

    #[test]
    fn scenario_s5_high_drop_rate_degrades_and_emits_resolution() {
        let bus = MessageBus::new();
        let mut adaptor = SessionAdaptor::with_initial_tier(&bus, 1).unwrap();

        // Tier 1's queue holds `TIER_QUEUE_CAPACITY` (256) slots; producing
        // well past that before the consumer reads anything forces the
        // producer to lap it, charging drops for every overwritten slot.
        for _ in 0..400 {
            let _ = bus.publish(4_000_000, "{}".into());
        }
        // The consumer then reads only 50 of what's left; the rest stay
        // dropped by the queue's drop-slow-consumer policy.
        let id = adaptor.consumer_for(Tier::One).unwrap();
        for _ in 0..50 {
            let _ = bus
                .queue(Tier::One)
                .consume(id, |s| -> Result<String, std::convert::Infallible> { Ok(s.clone()) });
        }

        adaptor.window_start = Instant::now() - TIER_WINDOW - Duration::from_millis(1);
        let resolution = adaptor.on_window_tick(&bus).expect("expected a degrade");
        assert_eq!(adaptor.current_min_tier(), 2);
        assert_eq!(resolution.min_interval_ms, 10);
    }

    /// `interval_ns` that routes to the given tier, used to overwhelm
    /// whichever tier is currently the session's fastest subscription.
    fn interval_ns_for(tier: Tier) -> u64 {
        match tier {
            Tier::One => 4_000_000,
            Tier::Two => 8_000_000,
            Tier::Three => 15_000_000,
            Tier::Four => 40_000_000,
            Tier::Five => 100_000_000,
        }
    }

    #[test]
    fn tier_five_is_never_unsubscribed_during_degrade() {
        let bus = MessageBus::new();
        let mut adaptor = SessionAdaptor::with_initial_tier(&bus, 1).unwrap();

        // Repeatedly overwhelm whatever the current fastest tier is, so the
        // adaptor is forced to degrade one step at a time until it bottoms
        // out at tier 5 — checking tier 5 stays subscribed the whole way.
        for _ in 0..4 {
            let fastest = Tier::from_number(adaptor.current_min_tier());
            for _ in 0..400 {
                let _ = bus.publish(interval_ns_for(fastest), "{}".into());
            }
            assert!(adaptor.consumer_for(Tier::Five).is_some());
            adaptor.window_start = Instant::now() - TIER_WINDOW - Duration::from_millis(1);
            adaptor.on_window_tick(&bus);
        }
        assert!(adaptor.consumer_for(Tier::Five).is_some());
        assert_eq!(adaptor.current_min_tier(), 5);
    }
}
