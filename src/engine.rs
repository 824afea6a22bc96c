//! Server message handler (C9): wires C4–C8 together and exposes the
//! control surface [`WsSession`](crate::session::WsSession) drives.
//!
//! Modelled on the teacher's `AppContext`/`Context` pattern in
//! `mock/control-api/src/server/mod.rs`: one struct, owned by the main
//! task, handed to every worker as a non-owning `Arc`.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use slog::{info, o, Logger};

use crate::bus::MessageBus;
use crate::capture::PacketSource;
use crate::compute;
use crate::flow::{self, FlowTracker};
use crate::link::{LinkStats, NetemControl, NetemParams};
use crate::pcap::{PcapBuffer, PcapConfig};
use crate::proto::{DevSelect, IfaceList, SamplePeriod, ServerMsg, SetNetem};
use crate::ringslot::RingSlots;
use crate::sampler::{self, InterfaceSelector, SampleFrame, SamplerConfig};

/// The engine's overall lifecycle state, independent of any one session.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum EngineState {
    Starting,
    Running,
    Paused,
    Stopping,
    Stopped,
}

/// Owns every shared collaborator and worker thread. One instance per
/// running appliance.
pub struct Engine {
    pub log: Logger,
    pub bus: Arc<MessageBus>,
    pub ring: Arc<RingSlots<SampleFrame>>,
    pub selector: Arc<InterfaceSelector>,
    pub link: Arc<dyn LinkStats>,
    pub netem: Arc<dyn NetemControl>,
    pub flow_tracker: Arc<FlowTracker>,
    pub pcap: Arc<PcapBuffer>,
    pub shutdown: Arc<AtomicBool>,
    pub sampler_config: SamplerConfig,
    state: std::sync::Mutex<EngineState>,
    active_sessions: AtomicUsize,
}

impl Engine {
    #[must_use]
    pub fn new(
        log: Logger,
        link: Arc<dyn LinkStats>,
        netem: Arc<dyn NetemControl>,
        capture_source: Arc<dyn PacketSource>,
        initial_iface: String,
        sampler_config: SamplerConfig,
        pcap_output_dir: PathBuf,
        pcap_config: PcapConfig,
    ) -> Arc<Self> {
        let shutdown = Arc::new(AtomicBool::new(false));
        let bus = Arc::new(MessageBus::new());
        let ring = Arc::new(RingSlots::new());
        let selector = Arc::new(InterfaceSelector::new(initial_iface));
        let flow_tracker = Arc::new(FlowTracker::new());
        let pcap = Arc::new(PcapBuffer::new(pcap_output_dir, pcap_config));
        pcap.enable();

        let engine = Arc::new(Self {
            log: log.clone(),
            bus: Arc::clone(&bus),
            ring: Arc::clone(&ring),
            selector: Arc::clone(&selector),
            link: Arc::clone(&link),
            netem,
            flow_tracker: Arc::clone(&flow_tracker),
            pcap: Arc::clone(&pcap),
            shutdown: Arc::clone(&shutdown),
            sampler_config,
            state: std::sync::Mutex::new(EngineState::Starting),
            active_sessions: AtomicUsize::new(0),
        });

        sampler::spawn_pinned(
            log.new(o!()),
            Arc::clone(&link),
            Arc::clone(&selector),
            sampler_config,
            Arc::clone(&ring),
            Arc::clone(&shutdown),
        );
        compute::spawn_pinned(log.new(o!()), Arc::clone(&ring), Arc::clone(&bus), Arc::clone(&shutdown));
        flow::spawn(
            log.new(o!()),
            capture_source,
            Arc::clone(&flow_tracker),
            Arc::clone(&pcap),
            Arc::clone(&bus),
            Arc::clone(&shutdown),
        );

        *engine.state.lock().expect("engine state poisoned") = EngineState::Paused;
        info!(engine.log, "engine started"; "state" => "paused");
        engine
    }

    #[must_use]
    pub fn state(&self) -> EngineState {
        *self.state.lock().expect("engine state poisoned")
    }

    /// Called when a new session attaches; transitions `Paused → Running`.
    pub fn session_connected(&self) {
        let count = self.active_sessions.fetch_add(1, Ordering::SeqCst) + 1;
        if count == 1 {
            *self.state.lock().expect("engine state poisoned") = EngineState::Running;
            info!(self.log, "first session connected, resuming"; "state" => "running");
        }
    }

    /// Called when a session detaches; transitions `Running → Paused` once
    /// the last session has gone.
    pub fn session_disconnected(&self) {
        let count = self.active_sessions.fetch_sub(1, Ordering::SeqCst) - 1;
        if count == 0 {
            *self.state.lock().expect("engine state poisoned") = EngineState::Paused;
            info!(self.log, "last session disconnected, pausing"; "state" => "paused");
        }
    }

    pub fn shutdown(&self) {
        *self.state.lock().expect("engine state poisoned") = EngineState::Stopping;
        self.shutdown.store(true, Ordering::SeqCst);
        *self.state.lock().expect("engine state poisoned") = EngineState::Stopped;
    }

    /// Messages a freshly connected session should see immediately:
    /// interface list, selected interface, netem params, sample period,
    /// pcap config and status.
    #[must_use]
    pub fn initial_messages(&self) -> Vec<ServerMsg> {
        let iface = self.selector.current();
        let netem = self.netem.current(&iface);
        let stats = self.pcap.stats();
        let pcap_config = self.pcap.config();
        vec![
            ServerMsg::IfaceList(IfaceList {
                ifaces: self.link.interfaces(),
            }),
            ServerMsg::DevSelect(DevSelect { iface: iface.clone() }),
            ServerMsg::NetemParams(SetNetem {
                iface,
                delay: netem.delay_ms,
                jitter: netem.jitter_ms,
                loss: netem.loss_pct,
            }),
            ServerMsg::SamplePeriod(SamplePeriod {
                period: self.sampler_config.sample_period_us,
            }),
            ServerMsg::PcapConfig(crate::proto::PcapConfigMsg {
                max_memory_bytes: pcap_config.max_memory_bytes,
                duration_sec: pcap_config.duration.as_secs() as u32,
                pre_trigger_sec: pcap_config.pre_trigger.as_secs() as u32,
                post_trigger_sec: pcap_config.post_trigger.as_secs() as u32,
            }),
            ServerMsg::PcapStatus(crate::proto::PcapStatus {
                enabled: self.pcap.state() != crate::pcap::PcapState::Disabled,
                total_packets: stats.total_packets,
                total_bytes: stats.total_bytes,
                dropped_packets: stats.dropped_packets,
                current_memory: stats.current_memory,
            }),
        ]
    }

    /// Applies a `dev_select` mutation, returning the echo message.
    pub fn select_interface(&self, iface: String) -> ServerMsg {
        self.selector.switch_to(iface.clone());
        ServerMsg::DevSelect(DevSelect { iface })
    }

    /// Applies a `set_netem` mutation, returning the echo message (or an
    /// error message if the interface is unknown).
    pub fn apply_netem(&self, msg: SetNetem) -> ServerMsg {
        let params = NetemParams {
            delay_ms: msg.delay,
            jitter_ms: msg.jitter,
            loss_pct: msg.loss,
        };
        match self.netem.apply(&msg.iface, params) {
            Ok(()) => ServerMsg::NetemParams(msg),
            Err(e) => ServerMsg::Error(crate::proto::ErrorMsg {
                code: "unknown_interface".into(),
                message: e.to_string(),
            }),
        }
    }
}
