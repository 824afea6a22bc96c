//! Narrow trait boundary to the kernel-counter / impairment collaborator.
//!
//! In production this wraps a netlink socket: reading `rtnl_link` counters
//! for RX/TX bytes and packets, and installing a `netem` qdisc for delay,
//! jitter and loss. Both concerns are out of scope for this engine (see
//! `SPEC_FULL.md` §1); what's in scope is the boundary the sampler and
//! control-message handler talk to, expressed the way the teacher narrows
//! its own gRPC Control API behind `ControlClient`.

use derive_more::{Display, From};
use std::collections::HashMap;
use std::sync::Mutex;

/// Raw interface counters as read from the kernel at one instant.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct RawCounters {
    pub rx_bytes: u64,
    pub tx_bytes: u64,
    pub rx_packets: u64,
    pub tx_packets: u64,
}

/// Delay/jitter/loss impairment parameters for one interface.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct NetemParams {
    pub delay_ms: u32,
    pub jitter_ms: u32,
    pub loss_pct: u32,
}

/// Errors surfaced by the link collaborator.
#[derive(Clone, Debug, Display, Eq, PartialEq, From)]
pub enum LinkError {
    /// The named interface is not known to the collaborator.
    #[display(fmt = "unknown interface: {}", _0)]
    #[from(ignore)]
    UnknownInterface(String),
}

/// Reads kernel link counters for a chosen interface.
pub trait LinkStats: Send + Sync {
    /// Lists interfaces the engine is permitted to select.
    fn interfaces(&self) -> Vec<String>;

    /// Reads the current absolute counters for `iface`.
    ///
    /// # Errors
    ///
    /// Returns [`LinkError::UnknownInterface`] if `iface` isn't in
    /// [`LinkStats::interfaces`].
    fn read_counters(&self, iface: &str) -> Result<RawCounters, LinkError>;
}

/// Installs network impairments on a chosen interface.
pub trait NetemControl: Send + Sync {
    /// Applies `params` to `iface`, replacing any previous impairment.
    ///
    /// # Errors
    ///
    /// Returns [`LinkError::UnknownInterface`] if `iface` isn't permitted.
    fn apply(&self, iface: &str, params: NetemParams) -> Result<(), LinkError>;

    /// Returns the impairment currently applied to `iface`, defaulting to
    /// all-zero (no impairment) if none has been applied yet.
    fn current(&self, iface: &str) -> NetemParams;
}

/// Deterministic, root-free stand-in for a real netlink collaborator.
///
/// Counters grow monotonically each call by a pseudo-random increment so
/// the sampler's delta/jitter logic can be exercised without a real NIC or
/// elevated privileges.
pub struct SyntheticLink {
    allowed: Vec<String>,
    state: Mutex<HashMap<String, SyntheticState>>,
}

struct SyntheticState {
    counters: RawCounters,
    netem: NetemParams,
    seed: u64,
}

impl SyntheticLink {
    /// Creates a collaborator permitting exactly `allowed` interface names.
    #[must_use]
    pub fn new(allowed: Vec<String>) -> Self {
        Self {
            allowed,
            state: Mutex::new(HashMap::new()),
        }
    }

    fn next_rand(seed: &mut u64) -> u64 {
        // xorshift64*, adequate for generating plausible-looking traffic;
        // not used anywhere security-sensitive.
        *seed ^= *seed << 13;
        *seed ^= *seed >> 7;
        *seed ^= *seed << 17;
        seed.wrapping_mul(0x2545_f491_4f6c_dd1d)
    }
}

impl LinkStats for SyntheticLink {
    fn interfaces(&self) -> Vec<String> {
        self.allowed.clone()
    }

    fn read_counters(&self, iface: &str) -> Result<RawCounters, LinkError> {
        if !self.allowed.iter().any(|a| a == iface) {
            return Err(LinkError::UnknownInterface(iface.to_owned()));
        }
        let mut state = self.state.lock().expect("synthetic link mutex poisoned");
        let entry = state.entry(iface.to_owned()).or_insert_with(|| SyntheticState {
            counters: RawCounters::default(),
            netem: NetemParams::default(),
            seed: 0x9e37_79b9_7f4a_7c15 ^ iface.len() as u64,
        });
        let rx_inc = 800 + (Self::next_rand(&mut entry.seed) % 400);
        let tx_inc = 600 + (Self::next_rand(&mut entry.seed) % 300);
        entry.counters.rx_bytes += rx_inc;
        entry.counters.tx_bytes += tx_inc;
        entry.counters.rx_packets += 1 + (rx_inc % 3);
        entry.counters.tx_packets += 1 + (tx_inc % 2);
        Ok(entry.counters)
    }
}

impl NetemControl for SyntheticLink {
    fn apply(&self, iface: &str, params: NetemParams) -> Result<(), LinkError> {
        if !self.allowed.iter().any(|a| a == iface) {
            return Err(LinkError::UnknownInterface(iface.to_owned()));
        }
        let mut state = self.state.lock().expect("synthetic link mutex poisoned");
        let entry = state.entry(iface.to_owned()).or_insert_with(|| SyntheticState {
            counters: RawCounters::default(),
            netem: NetemParams::default(),
            seed: 0x9e37_79b9_7f4a_7c15 ^ iface.len() as u64,
        });
        entry.netem = params;
        Ok(())
    }

    fn current(&self, iface: &str) -> NetemParams {
        let state = self.state.lock().expect("synthetic link mutex poisoned");
        state.get(iface).map_or_else(NetemParams::default, |e| e.netem)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_interface_errors() {
        let link = SyntheticLink::new(vec!["eth0".into()]);
        assert!(matches!(
            link.read_counters("eth1"),
            Err(LinkError::UnknownInterface(_))
        ));
    }

    #[test]
    fn counters_are_monotonic() {
        let link = SyntheticLink::new(vec!["eth0".into()]);
        let a = link.read_counters("eth0").unwrap();
        let b = link.read_counters("eth0").unwrap();
        assert!(b.rx_bytes > a.rx_bytes);
        assert!(b.tx_bytes > a.tx_bytes);
    }

    #[test]
    fn netem_round_trips() {
        let link = SyntheticLink::new(vec!["eth0".into()]);
        let params = NetemParams {
            delay_ms: 50,
            jitter_ms: 5,
            loss_pct: 1,
        };
        link.apply("eth0", params).unwrap();
        assert_eq!(link.current("eth0"), params);
    }
}
