//! Narrow trait boundary to the packet-capture collaborator.
//!
//! In production this wraps a libpcap FFI binding bound to the selected
//! interface. That binding is out of scope (see `SPEC_FULL.md` §1); what's
//! in scope is the boundary the flow tracker (C6) and rolling pcap buffer
//! (C7) both read from, modelled the same way [`crate::link`] narrows the
//! netlink collaborator.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

/// Supplies raw Ethernet frames to the capture pipeline.
pub trait PacketSource: Send + Sync {
    /// Returns the next captured frame, or `None` if none is currently
    /// available (callers should back off briefly rather than busy-spin).
    fn next_packet(&self) -> Option<Vec<u8>>;
}

/// Deterministic, root-free stand-in for a real libpcap-backed source.
///
/// Synthesizes a small, varied stream of Ethernet/IPv4 UDP and TCP frames
/// so the flow tracker and pcap buffer can be exercised without a NIC or
/// elevated privileges.
pub struct SyntheticPacketSource {
    seed: AtomicU64,
    emitted: Mutex<u64>,
}

impl SyntheticPacketSource {
    #[must_use]
    pub fn new(seed: u64) -> Self {
        Self {
            seed: AtomicU64::new(seed),
            emitted: Mutex::new(0),
        }
    }

    fn next_rand(&self) -> u64 {
        let mut x = self.seed.load(Ordering::Relaxed);
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.seed.store(x, Ordering::Relaxed);
        x.wrapping_mul(0x2545_f491_4f6c_dd1d)
    }

    fn build_frame(&self) -> Vec<u8> {
        let r = self.next_rand();
        let is_tcp = r % 2 == 0;
        let mut frame = vec![0u8; 14 + 20 + 20];
        frame[12] = 0x08;
        frame[13] = 0x00;
        frame[14] = 0x45;
        frame[14 + 9] = if is_tcp { 6 } else { 17 };
        frame[14 + 12..14 + 16].copy_from_slice(&[10, 0, 0, (1 + r % 4) as u8]);
        frame[14 + 16..14 + 20].copy_from_slice(&[10, 0, 0, (5 + r % 4) as u8]);
        let xport_off = 14 + 20;
        let sport = (1024 + r % 4000) as u16;
        let dport: u16 = if is_tcp { 80 } else { 5004 };
        frame[xport_off..xport_off + 2].copy_from_slice(&sport.to_be_bytes());
        frame[xport_off + 2..xport_off + 4].copy_from_slice(&dport.to_be_bytes());
        frame
    }
}

impl PacketSource for SyntheticPacketSource {
    fn next_packet(&self) -> Option<Vec<u8>> {
        let mut emitted = self.emitted.lock().expect("synthetic source mutex poisoned");
        *emitted += 1;
        Some(self.build_frame())
    }
}
