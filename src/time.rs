//! Monotonic time helpers used by every deadline-driven loop in the engine.
//!
//! Every component expresses timing as an absolute monotonic instant and
//! sleeps to a deadline rather than for a relative duration, so that drift
//! introduced by scheduling jitter never accumulates across iterations.

use std::thread;
use std::time::{Duration, Instant};

/// Nanoseconds in one second, used throughout for fixed-point conversions.
pub const NANOS_PER_SEC: u64 = 1_000_000_000;

/// Absolute difference between two instants, in nanoseconds.
///
/// `Instant` has no public nanosecond-carry representation of its own; this
/// just normalises `checked_duration_since` in both directions so callers
/// never have to reason about which instant came first.
#[must_use]
pub fn absdiff_ns(t1: Instant, t2: Instant) -> u64 {
    match t1.checked_duration_since(t2) {
        Some(d) => duration_to_nanos(d),
        None => duration_to_nanos(t2.duration_since(t1)),
    }
}

/// Adds a nanosecond offset to an instant, saturating rather than panicking
/// on overflow (an engine that has been up long enough to overflow should
/// degrade, not crash).
#[must_use]
pub fn add_ns(t: Instant, ns: u64) -> Instant {
    t + Duration::from_nanos(ns)
}

#[must_use]
fn duration_to_nanos(d: Duration) -> u64 {
    d.as_secs().saturating_mul(NANOS_PER_SEC) + u64::from(d.subsec_nanos())
}

/// Blocks the calling thread until the given monotonic deadline.
///
/// If `deadline` has already passed, returns immediately; the caller is
/// expected to inspect the resulting whoosh error itself via
/// [`absdiff_ns`] against the instant it observes after waking.
pub fn sleep_until(deadline: Instant) {
    let now = Instant::now();
    if let Some(remaining) = deadline.checked_duration_since(now) {
        thread::sleep(remaining);
    }
}
