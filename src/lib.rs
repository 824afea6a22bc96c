//! JitterTrap: a live network telemetry appliance.
//!
//! Measures short-timescale interface throughput and per-flow behaviour,
//! optionally impairs the link, and fans out telemetry to browser clients
//! over a tiered WebSocket message bus. See `SPEC_FULL.md` for the full
//! component design.

pub mod adaptor;
pub mod bus;
pub mod capture;
pub mod cli;
pub mod compute;
pub mod config;
pub mod engine;
pub mod error;
pub mod flow;
pub mod http;
pub mod link;
pub mod logging;
pub mod pcap;
pub mod proto;
pub mod queue;
pub mod ringslot;
pub mod rt;
pub mod sampler;
pub mod session;
pub mod time;
pub mod webrtc;
