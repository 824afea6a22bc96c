//! Statistics compute thread (C5).
//!
//! Drains [`SampleFrame`]s handed off by the sampler (C4) through the
//! [`RingSlots`] (C2), maintains a rolling window of the most recent 1000
//! [`Sample`]s, and on every new sample checks whether any configured
//! decimation boundary has been crossed — if so it aggregates the most
//! recent `D` samples into a [`StatsMessage`] and publishes it into the
//! tiered bus (C8).

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use slog::{debug, o, Logger};

use crate::bus::MessageBus;
use crate::proto::{Milli, ServerMsg, StatsMessage};
use crate::ringslot::RingSlots;
use crate::rt;
use crate::sampler::{Sample, SampleFrame};
use crate::time::{add_ns, sleep_until};

/// Upper bound on the rolling window the compute thread keeps in memory.
pub const WINDOW_CAPACITY: usize = 1000;

/// Decimation boundaries, in samples (== milliseconds, at the engine's
/// default 1ms sample cadence). `interval_ns` published is `D * 1_000_000`.
pub const DECIMATIONS: [u64; 8] = [5, 10, 20, 50, 100, 200, 500, 1000];

fn now_ns() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos() as u64
}

/// Rolling window of recent samples plus the running count used to decide
/// decimation boundaries.
pub struct ComputeState {
    window: VecDeque<Sample>,
    total_samples_received: u64,
    iface: String,
}

impl ComputeState {
    #[must_use]
    pub fn new() -> Self {
        Self {
            window: VecDeque::with_capacity(WINDOW_CAPACITY),
            total_samples_received: 0,
            iface: String::new(),
        }
    }

    fn push(&mut self, sample: Sample) {
        if self.window.len() == WINDOW_CAPACITY {
            self.window.pop_front();
        }
        self.window.push_back(sample);
        self.total_samples_received += 1;
    }

    /// Aggregates the most recent `d` samples into a [`StatsMessage`], or
    /// `None` if the window doesn't yet hold `d` samples.
    #[must_use]
    pub fn aggregate(&self, d: u64) -> Option<StatsMessage> {
        let d = d as usize;
        if self.window.len() < d {
            return None;
        }
        let recent: Vec<&Sample> = self.window.iter().rev().take(d).collect();

        let (mut rx_b_min, mut rx_b_max, mut rx_b_sum) = (u64::MAX, 0u64, 0i64);
        let (mut tx_b_min, mut tx_b_max, mut tx_b_sum) = (u64::MAX, 0u64, 0i64);
        let (mut rx_p_min, mut rx_p_max, mut rx_p_sum) = (u64::MAX, 0u64, 0i64);
        let (mut tx_p_min, mut tx_p_max, mut tx_p_sum) = (u64::MAX, 0u64, 0i64);
        let (mut wh_max, mut wh_sum, mut wh_sumsq) = (0u64, 0i64, 0u128);

        let mut rx_gap_run = 0u64;
        let mut tx_gap_run = 0u64;
        let mut rx_gaps: Vec<u64> = Vec::new();
        let mut tx_gaps: Vec<u64> = Vec::new();

        for s in recent.iter().rev() {
            rx_b_min = rx_b_min.min(s.rx_bytes_delta);
            rx_b_max = rx_b_max.max(s.rx_bytes_delta);
            rx_b_sum += s.rx_bytes_delta as i64;
            tx_b_min = tx_b_min.min(s.tx_bytes_delta);
            tx_b_max = tx_b_max.max(s.tx_bytes_delta);
            tx_b_sum += s.tx_bytes_delta as i64;
            rx_p_min = rx_p_min.min(s.rx_packets_delta);
            rx_p_max = rx_p_max.max(s.rx_packets_delta);
            rx_p_sum += s.rx_packets_delta as i64;
            tx_p_min = tx_p_min.min(s.tx_packets_delta);
            tx_p_max = tx_p_max.max(s.tx_packets_delta);
            tx_p_sum += s.tx_packets_delta as i64;

            wh_max = wh_max.max(s.whoosh_error_ns);
            wh_sum += s.whoosh_error_ns as i64;
            wh_sumsq += u128::from(s.whoosh_error_ns) * u128::from(s.whoosh_error_ns);

            if s.rx_packets_delta == 0 {
                rx_gap_run += 1;
            } else if rx_gap_run > 0 {
                rx_gaps.push(rx_gap_run);
                rx_gap_run = 0;
            }
            if s.tx_packets_delta == 0 {
                tx_gap_run += 1;
            } else if tx_gap_run > 0 {
                tx_gaps.push(tx_gap_run);
                tx_gap_run = 0;
            }
        }
        if rx_gap_run > 0 {
            rx_gaps.push(rx_gap_run);
        }
        if tx_gap_run > 0 {
            tx_gaps.push(tx_gap_run);
        }

        let n = recent.len() as i64;
        let whoosh_std_ns = ((wh_sumsq / n.max(1) as u128) as f64).sqrt() as u64;

        let gap_stats = |gaps: &[u64]| -> (Milli, Milli, Milli) {
            if gaps.is_empty() {
                return (Milli(0), Milli(0), Milli(0));
            }
            let min = *gaps.iter().min().unwrap();
            let max = *gaps.iter().max().unwrap();
            let sum: i64 = gaps.iter().map(|g| *g as i64).sum();
            (
                Milli(min as i64 * 1000),
                Milli(max as i64 * 1000),
                Milli::from_mean(sum, gaps.len() as i64),
            )
        };
        let (rx_gap_min, rx_gap_max, rx_gap_mean) = gap_stats(&rx_gaps);
        let (tx_gap_min, tx_gap_max, tx_gap_mean) = gap_stats(&tx_gaps);

        Some(StatsMessage {
            iface: self.iface.clone(),
            interval_ns: d as u64 * 1_000_000,
            timestamp_ns: now_ns(),
            rx_bytes_mean: Milli::from_mean(rx_b_sum, n),
            rx_bytes_min: rx_b_min,
            rx_bytes_max: rx_b_max,
            tx_bytes_mean: Milli::from_mean(tx_b_sum, n),
            tx_bytes_min: tx_b_min,
            tx_bytes_max: tx_b_max,
            rx_packets_mean: Milli::from_mean(rx_p_sum, n),
            rx_packets_min: rx_p_min,
            rx_packets_max: rx_p_max,
            tx_packets_mean: Milli::from_mean(tx_p_sum, n),
            tx_packets_min: tx_p_min,
            tx_packets_max: tx_p_max,
            whoosh_mean_ns: Milli::from_mean(wh_sum, n),
            whoosh_max_ns: wh_max,
            whoosh_std_ns,
            rx_gap_min,
            rx_gap_max,
            rx_gap_mean,
            tx_gap_min,
            tx_gap_max,
            tx_gap_mean,
        })
    }
}

impl Default for ComputeState {
    fn default() -> Self {
        Self::new()
    }
}

/// Runs the compute loop at 1ms cadence until `shutdown` is set.
pub fn run(
    log: &Logger,
    ring: &RingSlots<SampleFrame>,
    bus: &MessageBus,
    shutdown: &AtomicBool,
) {
    let log = log.new(o!("component" => "compute"));
    let mut state = ComputeState::new();
    let mut deadline = std::time::Instant::now();

    while !shutdown.load(Ordering::Relaxed) {
        while let Some(idx) = ring.consume_next() {
            let mut frame = SampleFrame::default();
            ring.with_slot(idx, |slot| {
                std::mem::swap(slot, &mut frame);
            });
            state.iface = frame.iface.clone();
            for sample in frame.samples.drain(..) {
                state.push(sample);
                for d in DECIMATIONS {
                    if state.total_samples_received % d == 0 {
                        if let Some(stats) = state.aggregate(d) {
                            publish_stats(&log, bus, stats);
                        }
                    }
                }
            }
        }

        deadline = add_ns(deadline, 1_000_000);
        sleep_until(deadline);
    }
    debug!(log, "compute loop exiting");
}

fn publish_stats(log: &Logger, bus: &MessageBus, stats: StatsMessage) {
    let interval_ns = stats.interval_ns;
    let payload = match serde_json::to_string(&ServerMsg::Stats(stats)) {
        Ok(p) => p,
        Err(e) => {
            debug!(log, "failed to serialize stats message"; "error" => %e);
            return;
        }
    };
    if let Err(e) = bus.publish(interval_ns, payload) {
        debug!(log, "no subscribers for stats tier"; "error" => %e, "interval_ns" => interval_ns);
    }
}

/// Spawns [`run`] on a dedicated thread, best-effort real-time scheduled.
pub fn spawn_pinned(
    log: Logger,
    ring: Arc<RingSlots<SampleFrame>>,
    bus: Arc<MessageBus>,
    shutdown: Arc<AtomicBool>,
) -> thread::JoinHandle<()> {
    thread::Builder::new()
        .name("jt-compute".into())
        .spawn(move || {
            rt::apply_realtime_policy(&log, "compute", 1);
            run(&log, &ring, &bus, &shutdown);
        })
        .expect("failed to spawn compute thread")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(rx: u64, tx: u64) -> Sample {
        Sample {
            rx_bytes: rx,
            tx_bytes: tx,
            rx_packets: if rx > 0 { 1 } else { 0 },
            tx_packets: if tx > 0 { 1 } else { 0 },
            rx_bytes_delta: rx,
            tx_bytes_delta: tx,
            rx_packets_delta: if rx > 0 { 1 } else { 0 },
            tx_packets_delta: if tx > 0 { 1 } else { 0 },
            whoosh_error_ns: 100,
        }
    }

    #[test]
    fn window_evicts_oldest_past_capacity() {
        let mut state = ComputeState::new();
        for i in 0..(WINDOW_CAPACITY + 10) {
            state.push(sample(i as u64, i as u64));
        }
        assert_eq!(state.window.len(), WINDOW_CAPACITY);
        assert_eq!(state.total_samples_received, (WINDOW_CAPACITY + 10) as u64);
    }

    #[test]
    fn aggregate_none_below_decimation_size() {
        let mut state = ComputeState::new();
        for _ in 0..4 {
            state.push(sample(100, 50));
        }
        assert!(state.aggregate(5).is_none());
    }

    #[test]
    fn aggregate_computes_mean_over_most_recent_d() {
        let mut state = ComputeState::new();
        for _ in 0..5 {
            state.push(sample(100, 50));
        }
        let stats = state.aggregate(5).unwrap();
        assert_eq!(stats.interval_ns, 5_000_000);
        assert_eq!(stats.rx_bytes_mean, Milli(100_000));
        assert_eq!(stats.rx_bytes_min, 100);
        assert_eq!(stats.rx_bytes_max, 100);
    }

    #[test]
    fn gap_run_is_tracked_in_packets() {
        let mut state = ComputeState::new();
        state.push(sample(100, 50));
        state.push(sample(0, 0));
        state.push(sample(0, 0));
        state.push(sample(100, 50));
        state.push(sample(100, 50));
        let stats = state.aggregate(5).unwrap();
        assert_eq!(stats.rx_gap_max, Milli(2000));
    }
}
