//! Fixed-cadence interface-counter sampler (C4).
//!
//! Runs on a dedicated thread that (best-effort) asks the OS for real-time
//! scheduling priority and a pinned core, reads counters from the
//! [`LinkStats`](crate::link::LinkStats) collaborator at a fixed microsecond
//! cadence, and hands completed [`SampleFrame`]s to the compute thread via
//! the [`RingSlots`] (C2). Deadlines are absolute: each iteration computes
//! `whoosh_error_ns`, the distance between when it woke and when it meant
//! to, and sleeps to the *next* absolute deadline rather than a relative
//! duration, so jitter never compounds across iterations.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Instant;

use slog::{debug, o, warn, Logger};

use crate::link::{LinkStats, RawCounters};
use crate::ringslot::RingSlots;
use crate::rt;
use crate::time::{absdiff_ns, add_ns, sleep_until};

/// One observation at a sample instant.
#[derive(Clone, Copy, Debug, Default)]
pub struct Sample {
    pub rx_bytes: u64,
    pub tx_bytes: u64,
    pub rx_packets: u64,
    pub tx_packets: u64,
    pub rx_bytes_delta: u64,
    pub tx_bytes_delta: u64,
    pub rx_packets_delta: u64,
    pub tx_packets_delta: u64,
    pub whoosh_error_ns: u64,
}

/// A batch of `N` consecutive [`Sample`]s covering `1/messages_per_second`
/// of a second, the unit handed between C4 and C5.
#[derive(Clone, Debug, Default)]
pub struct SampleFrame {
    pub iface: String,
    pub sample_period_us: u32,
    pub samples: Vec<Sample>,
}

/// Number of stale readings discarded immediately after an interface switch,
/// to protect against counters that have not yet settled after re-binding.
pub const DISCARD_COUNTDOWN_AFTER_SWITCH: u32 = 50;

/// Whoosh-error thresholds above which a warning (not a halt) is logged.
const WHOOSH_MAX_WARN_MULTIPLE: u64 = 500;
const WHOOSH_STD_WARN_MULTIPLE: u64 = 200;

struct Baseline {
    iface: String,
    previous: Option<RawCounters>,
    discard_countdown: u32,
}

/// Shared, mutex-protected selection of "which interface am I sampling".
pub struct InterfaceSelector {
    state: Mutex<Baseline>,
}

impl InterfaceSelector {
    #[must_use]
    pub fn new(initial_iface: String) -> Self {
        Self {
            state: Mutex::new(Baseline {
                iface: initial_iface,
                previous: None,
                discard_countdown: DISCARD_COUNTDOWN_AFTER_SWITCH,
            }),
        }
    }

    /// Atomically switches the sampled interface, resetting the baseline so
    /// the first `DISCARD_COUNTDOWN_AFTER_SWITCH` samples report zero
    /// deltas rather than a spurious jump from the old interface's counters.
    pub fn switch_to(&self, iface: String) {
        let mut state = self.state.lock().expect("interface selector poisoned");
        state.iface = iface;
        state.previous = None;
        state.discard_countdown = DISCARD_COUNTDOWN_AFTER_SWITCH;
    }

    #[must_use]
    pub fn current(&self) -> String {
        self.state.lock().expect("interface selector poisoned").iface.clone()
    }
}

/// Configuration for one sampler run.
#[derive(Clone, Copy, Debug)]
pub struct SamplerConfig {
    pub sample_period_us: u32,
    pub messages_per_second: u32,
}

impl SamplerConfig {
    /// Number of samples per [`SampleFrame`], enforced to divide evenly per
    /// the spec's invariant `N * sample_period_us * messages_per_second ==
    /// 1_000_000`.
    #[must_use]
    pub fn samples_per_frame(&self) -> u32 {
        1_000_000 / self.sample_period_us / self.messages_per_second
    }
}

/// Runs the sampler loop until `shutdown` is set, handing completed frames
/// to `ring`.
///
/// Intended to be spawned on a dedicated [`std::thread`]; see
/// [`spawn_pinned`] for the real-time-priority variant used by the engine.
pub fn run(
    log: &Logger,
    link: &dyn LinkStats,
    selector: &InterfaceSelector,
    config: SamplerConfig,
    ring: &RingSlots<SampleFrame>,
    shutdown: &AtomicBool,
) {
    let log = log.new(o!("component" => "sampler"));
    let samples_per_frame = config.samples_per_frame() as usize;
    assert!(samples_per_frame > 0, "sample_period_us/messages_per_second misconfigured");

    let mut frame = SampleFrame {
        iface: selector.current(),
        sample_period_us: config.sample_period_us,
        samples: Vec::with_capacity(samples_per_frame),
    };
    let mut baseline: Option<RawCounters> = None;
    let mut discard_countdown = DISCARD_COUNTDOWN_AFTER_SWITCH;
    let mut current_iface = frame.iface.clone();

    let mut deadline = Instant::now();
    while !shutdown.load(Ordering::Relaxed) {
        let iface_now = selector.current();
        if iface_now != current_iface {
            current_iface = iface_now.clone();
            frame.iface = iface_now;
            baseline = None;
            discard_countdown = DISCARD_COUNTDOWN_AFTER_SWITCH;
            frame.samples.clear();
        }

        let now = Instant::now();
        let whoosh_error_ns = absdiff_ns(now, deadline);

        let counters = match link.read_counters(&current_iface) {
            Ok(c) => c,
            Err(e) => {
                warn!(log, "interface absent, holding previous values"; "error" => %e);
                baseline.unwrap_or_default()
            }
        };

        let regressed = baseline.map_or(false, |b| {
            counters.rx_bytes < b.rx_bytes || counters.tx_bytes < b.tx_bytes
        });
        let use_deltas = baseline.is_some() && !regressed && discard_countdown == 0;
        let prev = baseline.unwrap_or(counters);

        let sample = Sample {
            rx_bytes: counters.rx_bytes,
            tx_bytes: counters.tx_bytes,
            rx_packets: counters.rx_packets,
            tx_packets: counters.tx_packets,
            rx_bytes_delta: if use_deltas {
                counters.rx_bytes.saturating_sub(prev.rx_bytes)
            } else {
                0
            },
            tx_bytes_delta: if use_deltas {
                counters.tx_bytes.saturating_sub(prev.tx_bytes)
            } else {
                0
            },
            rx_packets_delta: if use_deltas {
                counters.rx_packets.saturating_sub(prev.rx_packets)
            } else {
                0
            },
            tx_packets_delta: if use_deltas {
                counters.tx_packets.saturating_sub(prev.tx_packets)
            } else {
                0
            },
            whoosh_error_ns,
        };

        baseline = Some(counters);
        if discard_countdown > 0 {
            discard_countdown -= 1;
        }

        frame.samples.push(sample);
        if frame.samples.len() == samples_per_frame {
            check_jitter(&log, &frame, config);
            let idx = ring.produce_next();
            ring.with_slot(idx, |slot| {
                std::mem::swap(slot, &mut frame);
            });
            frame = SampleFrame {
                iface: current_iface.clone(),
                sample_period_us: config.sample_period_us,
                samples: Vec::with_capacity(samples_per_frame),
            };
        }

        deadline = add_ns(deadline, u64::from(config.sample_period_us) * 1_000);
        sleep_until(deadline);
    }
    debug!(log, "sampler loop exiting");
}

fn check_jitter(log: &Logger, frame: &SampleFrame, config: SamplerConfig) {
    if frame.samples.is_empty() {
        return;
    }
    let period_ns = u64::from(config.sample_period_us) * 1_000;
    let max = frame.samples.iter().map(|s| s.whoosh_error_ns).max().unwrap_or(0);
    let n = frame.samples.len() as u64;
    let sum_sq: u128 = frame
        .samples
        .iter()
        .map(|s| u128::from(s.whoosh_error_ns) * u128::from(s.whoosh_error_ns))
        .sum();
    let std = ((sum_sq / u128::from(n)) as f64).sqrt() as u64;

    if max >= WHOOSH_MAX_WARN_MULTIPLE * period_ns || std >= WHOOSH_STD_WARN_MULTIPLE * period_ns {
        warn!(log, "sampling jitter above threshold";
            "max_ns" => max, "std_ns" => std, "period_ns" => period_ns);
    }
}

/// Spawns [`run`] on a dedicated thread, attempting real-time scheduling
/// priority 2 and core pinning via [`crate::rt`]; failures to acquire
/// either are logged and the sampler proceeds at normal priority.
pub fn spawn_pinned(
    log: Logger,
    link: Arc<dyn LinkStats>,
    selector: Arc<InterfaceSelector>,
    config: SamplerConfig,
    ring: Arc<RingSlots<SampleFrame>>,
    shutdown: Arc<AtomicBool>,
) -> thread::JoinHandle<()> {
    thread::Builder::new()
        .name("jt-sampler".into())
        .spawn(move || {
            rt::apply_realtime_policy(&log, "sampler", 2);
            run(&log, link.as_ref(), &selector, config, &ring, &shutdown);
        })
        .expect("failed to spawn sampler thread")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::SyntheticLink;
    use slog::Discard;

    fn test_logger() -> Logger {
        Logger::root(Discard, o!())
    }

    #[test]
    fn warmup_discards_first_n_deltas() {
        let link = SyntheticLink::new(vec!["eth0".into()]);
        let selector = InterfaceSelector::new("eth0".into());
        let ring: RingSlots<SampleFrame> = RingSlots::new();
        let shutdown = AtomicBool::new(false);
        let config = SamplerConfig {
            sample_period_us: 1000,
            messages_per_second: 100,
        };

        // samples_per_frame = 1_000_000 / 1000 / 100 = 10; run for 6 frames
        // (60 samples) so we can inspect samples 1..50 (discard) and 51+ .
        let log = test_logger();
        let samples_per_frame = config.samples_per_frame() as usize;
        assert_eq!(samples_per_frame, 10);

        thread::scope(|scope| {
            scope.spawn(|| {
                run(&log, &link, &selector, config, &ring, &shutdown);
            });
            // Drain 6 frames (60 samples), then stop.
            let mut all_samples = Vec::new();
            while all_samples.len() < 60 {
                if let Some(idx) = ring.consume_next() {
                    ring.with_slot(idx, |frame| {
                        all_samples.extend(frame.samples.iter().copied());
                    });
                }
            }
            shutdown.store(true, Ordering::Relaxed);

            for s in &all_samples[0..50] {
                assert_eq!(s.rx_bytes_delta, 0);
                assert_eq!(s.tx_bytes_delta, 0);
            }
            assert!(all_samples[50].rx_bytes_delta > 0 || all_samples[50].tx_bytes_delta > 0);
        });
    }

    #[test]
    fn samples_per_frame_matches_invariant() {
        let config = SamplerConfig {
            sample_period_us: 2000,
            messages_per_second: 50,
        };
        let n = config.samples_per_frame();
        assert_eq!(
            u64::from(n) * u64::from(config.sample_period_us) * u64::from(config.messages_per_second),
            1_000_000
        );
    }
}
