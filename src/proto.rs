//! Wire protocol: the tagged `{"msg":"<type>","p":{...}}` envelope exchanged
//! with browser clients, mirroring the teacher's `ServerMsg`/`ClientMsg`
//! tagged-enum style in `proto/client-api/src/lib.rs`.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A mean/aggregate value scaled by 1000 so the wire carries a fixed-point
/// integer rather than a float. The scale factor is visible at the type
/// level rather than an implicit unit on a bare `i64`.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Milli(pub i64);

impl Milli {
    #[must_use]
    pub fn from_mean(sum: i64, count: i64) -> Milli {
        if count == 0 {
            Milli(0)
        } else {
            Milli(sum * 1000 / count)
        }
    }
}

impl fmt::Display for Milli {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:03}", self.0 / 1000, (self.0 % 1000).abs())
    }
}

/// Envelope for every message exchanged over the control-plane WebSocket.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "msg", content = "p", rename_all = "snake_case")]
pub enum ClientMsg {
    Hello(Hello),
    DevSelect(DevSelect),
    SetNetem(SetNetem),
    PcapConfig(PcapConfigMsg),
    PcapTrigger(PcapTrigger),
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "msg", content = "p", rename_all = "snake_case")]
pub enum ServerMsg {
    IfaceList(IfaceList),
    DevSelect(DevSelect),
    NetemParams(SetNetem),
    SamplePeriod(SamplePeriod),
    Stats(StatsMessage),
    Toptalk(TopTalkersMessage),
    PcapConfig(PcapConfigMsg),
    PcapStatus(PcapStatus),
    PcapTrigger(PcapTrigger),
    PcapReady(PcapReady),
    Resolution(Resolution),
    Hello(Hello),
    Error(ErrorMsg),
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Hello {
    #[serde(default)]
    pub client: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct IfaceList {
    pub ifaces: Vec<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DevSelect {
    pub iface: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SetNetem {
    pub iface: String,
    pub delay: u32,
    pub jitter: u32,
    pub loss: u32,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SamplePeriod {
    pub period: u32,
}

/// Per §3 `StatsMessage`: aggregate over one decimation window.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct StatsMessage {
    pub iface: String,
    pub interval_ns: u64,
    pub timestamp_ns: u64,
    pub rx_bytes_mean: Milli,
    pub rx_bytes_min: u64,
    pub rx_bytes_max: u64,
    pub tx_bytes_mean: Milli,
    pub tx_bytes_min: u64,
    pub tx_bytes_max: u64,
    pub rx_packets_mean: Milli,
    pub rx_packets_min: u64,
    pub rx_packets_max: u64,
    pub tx_packets_mean: Milli,
    pub tx_packets_min: u64,
    pub tx_packets_max: u64,
    pub whoosh_mean_ns: Milli,
    pub whoosh_max_ns: u64,
    pub whoosh_std_ns: u64,
    pub rx_gap_min: Milli,
    pub rx_gap_max: Milli,
    pub rx_gap_mean: Milli,
    pub tx_gap_min: Milli,
    pub tx_gap_max: Milli,
    pub tx_gap_mean: Milli,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct FlowRecord {
    pub key: String,
    pub is_forward: bool,
    pub bytes: u64,
    pub packets: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ipg_histogram: Option<Vec<u32>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frame_size_histogram: Option<Vec<u32>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pps_histogram: Option<Vec<u32>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tcp: Option<TcpSubstateMsg>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub video: Option<VideoSubstateMsg>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio: Option<AudioSubstateMsg>,
}

/// Wire shape of a flow's TCP health substate; `rtt_histogram` is omitted
/// entirely when no RTT sample has been observed yet.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct TcpSubstateMsg {
    pub state: String,
    pub rtt_us: u32,
    pub retransmits: u32,
    pub dup_acks: u32,
    pub zero_window_events: u32,
    pub ece_count: u32,
    pub saw_syn: bool,
    pub window_scale: u8,
    pub rwnd: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rtt_histogram: Option<Vec<u32>>,
}

/// Wire shape of a flow's video RTP substate.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct VideoSubstateMsg {
    pub ssrc: u32,
    #[serde(default)]
    pub codec: Option<String>,
    pub width: u16,
    pub height: u16,
    pub fps_x100: u32,
    pub bitrate_kbps: u32,
    pub keyframes: u32,
    pub cc_errors: u32,
    pub seq_loss: u32,
    pub jitter_us: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub jitter_histogram: Option<Vec<u32>>,
}

/// Wire shape of a flow's audio RTP substate.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct AudioSubstateMsg {
    pub ssrc: u32,
    #[serde(default)]
    pub codec: Option<String>,
    pub sample_rate: u32,
    pub bitrate_kbps: u32,
    pub seq_loss: u32,
    pub jitter_us: u32,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct TopTalkersMessage {
    pub tflows: u64,
    pub tbytes: u64,
    pub tpackets: u64,
    pub interval_ns: u64,
    pub timestamp_ns: u64,
    pub flows: Vec<FlowRecord>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct PcapConfigMsg {
    pub max_memory_bytes: u64,
    pub duration_sec: u32,
    pub pre_trigger_sec: u32,
    pub post_trigger_sec: u32,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct PcapStatus {
    pub enabled: bool,
    pub total_packets: u64,
    pub total_bytes: u64,
    pub dropped_packets: u64,
    pub current_memory: u64,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct PcapTrigger {
    #[serde(default)]
    pub reason: String,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct PcapReady {
    pub filepath: String,
    pub file_size: u64,
    pub packet_count: u64,
    pub duration_sec: u32,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Resolution {
    pub min_interval_ms: u32,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ErrorMsg {
    pub code: String,
    pub message: String,
}
