//! Top-talkers flow tracker (C6): packet decoding, canonical flow keying,
//! per-flow TCP/RTP substate, and periodic top-N emission.

pub mod audio;
pub mod decode;
pub mod key;
pub mod rtp;
pub mod tcp;
pub mod tracker;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use slog::{debug, o, Logger};

use crate::bus::MessageBus;
use crate::capture::PacketSource;
use crate::pcap::{self, PcapBuffer};
use crate::proto::ServerMsg;
pub use tracker::FlowTracker;

/// How often the tracker selects and publishes top talkers.
pub const EMISSION_INTERVAL: Duration = Duration::from_secs(1);

/// Runs the capture→decode→track→emit loop until `shutdown` is set. Every
/// captured frame is handed to both the flow tracker (C6) and the rolling
/// pcap buffer (C7), per the data flow's "each packet feeds both" rule.
pub fn run(
    log: &Logger,
    source: &dyn PacketSource,
    tracker: &FlowTracker,
    pcap_buffer: &PcapBuffer,
    bus: &MessageBus,
    shutdown: &AtomicBool,
) {
    let log = log.new(o!("component" => "flow_tracker"));
    let mut last_emit = Instant::now();

    while !shutdown.load(Ordering::Relaxed) {
        match source.next_packet() {
            Some(frame) => {
                tracker.ingest(&log, &frame);
                pcap_buffer.insert(pcap::wall_now(), frame);
            }
            None => thread::sleep(Duration::from_millis(1)),
        }

        if last_emit.elapsed() >= EMISSION_INTERVAL {
            let msg = tracker.snapshot_top_talkers(EMISSION_INTERVAL.as_nanos() as u64);
            match serde_json::to_string(&ServerMsg::Toptalk(msg)) {
                Ok(payload) => {
                    if let Err(e) = bus.publish(EMISSION_INTERVAL.as_nanos() as u64, payload) {
                        debug!(log, "no subscribers for top-talkers tier"; "error" => %e);
                    }
                }
                Err(e) => debug!(log, "failed to serialize top-talkers message"; "error" => %e),
            }
            last_emit = Instant::now();
        }
    }
    debug!(log, "flow tracker loop exiting");
}

/// Spawns [`run`] on a dedicated thread at default scheduling priority.
pub fn spawn(
    log: Logger,
    source: Arc<dyn PacketSource>,
    tracker: Arc<FlowTracker>,
    pcap_buffer: Arc<PcapBuffer>,
    bus: Arc<MessageBus>,
    shutdown: Arc<AtomicBool>,
) -> thread::JoinHandle<()> {
    thread::Builder::new()
        .name("jt-flow-tracker".into())
        .spawn(move || {
            run(&log, source.as_ref(), &tracker, &pcap_buffer, &bus, &shutdown);
        })
        .expect("failed to spawn flow tracker thread")
}
