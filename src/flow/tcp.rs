//! Per-flow TCP state tracking: SYN/SYN-ACK/FIN/RST transitions, a running
//! RTT estimate, and the counters feeding the 14-bin RTT-health histogram.

/// Number of buckets in the RTT-health histogram.
pub const RTT_HISTOGRAM_BINS: usize = 14;

/// TCP flags bitmask, as laid out in the TCP header's flags byte.
pub mod flags {
    pub const FIN: u8 = 0x01;
    pub const SYN: u8 = 0x02;
    pub const RST: u8 = 0x04;
    pub const ACK: u8 = 0x10;
    pub const ECE: u8 = 0x40;
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TcpState {
    Closed,
    SynSent,
    SynReceived,
    Established,
    Closing,
    Reset,
}

/// Observed TCP health for one canonical flow.
#[derive(Clone, Debug)]
pub struct TcpSubstate {
    pub state: TcpState,
    pub rtt_us: u32,
    pub retransmits: u32,
    pub dup_acks: u32,
    pub zero_window_events: u32,
    pub ece_count: u32,
    pub saw_syn: bool,
    pub window_scale: u8,
    pub rwnd: u32,
    pub rtt_histogram: [u32; RTT_HISTOGRAM_BINS],
    last_seq: Option<u32>,
    last_ack: Option<u32>,
}

impl Default for TcpSubstate {
    fn default() -> Self {
        Self {
            state: TcpState::Closed,
            rtt_us: 0,
            retransmits: 0,
            dup_acks: 0,
            zero_window_events: 0,
            ece_count: 0,
            saw_syn: false,
            window_scale: 0,
            rwnd: 0,
            rtt_histogram: [0; RTT_HISTOGRAM_BINS],
            last_seq: None,
            last_ack: None,
        }
    }
}

impl TcpSubstate {
    /// Feeds one observed segment's flags/seq/ack/window into the state
    /// machine. `rtt_sample_us`, when `Some`, is a timestamp-derived RTT
    /// estimate to fold into the histogram.
    pub fn observe(&mut self, tcp_flags: u8, seq: u32, ack: u32, window: u32, rtt_sample_us: Option<u32>) {
        if tcp_flags & flags::RST != 0 {
            self.state = TcpState::Reset;
            return;
        }
        if tcp_flags & flags::SYN != 0 {
            self.saw_syn = true;
            self.state = if tcp_flags & flags::ACK != 0 {
                TcpState::SynReceived
            } else {
                TcpState::SynSent
            };
        } else if tcp_flags & flags::FIN != 0 {
            self.state = TcpState::Closing;
        } else if self.state == TcpState::SynReceived || self.state == TcpState::SynSent {
            self.state = TcpState::Established;
        }

        if tcp_flags & flags::ECE != 0 {
            self.ece_count += 1;
        }
        if window == 0 {
            self.zero_window_events += 1;
        }
        self.rwnd = window;

        if let Some(prev_seq) = self.last_seq {
            if seq == prev_seq && seq != 0 {
                self.retransmits += 1;
            }
        }
        if let Some(prev_ack) = self.last_ack {
            if ack == prev_ack {
                self.dup_acks += 1;
            }
        }
        self.last_seq = Some(seq);
        self.last_ack = Some(ack);

        if let Some(rtt) = rtt_sample_us {
            self.rtt_us = rtt;
            let bin = rtt_bucket(rtt);
            self.rtt_histogram[bin] += 1;
        }
    }
}

/// Logarithmic-ish bucketing of an RTT sample (microseconds) into one of
/// [`RTT_HISTOGRAM_BINS`] health buckets; lower bins are healthier.
fn rtt_bucket(rtt_us: u32) -> usize {
    let thresholds_ms: [u32; RTT_HISTOGRAM_BINS - 1] =
        [1, 2, 5, 10, 20, 40, 80, 150, 300, 600, 1200, 2400, 5000];
    let rtt_ms = rtt_us / 1000;
    for (i, t) in thresholds_ms.iter().enumerate() {
        if rtt_ms <= *t {
            return i;
        }
    }
    RTT_HISTOGRAM_BINS - 1
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn syn_then_syn_ack_then_data_reaches_established() {
        let mut s = TcpSubstate::default();
        s.observe(flags::SYN, 0, 0, 65535, None);
        assert_eq!(s.state, TcpState::SynSent);
        s.observe(flags::SYN | flags::ACK, 0, 1, 65535, None);
        assert_eq!(s.state, TcpState::SynReceived);
        s.observe(flags::ACK, 1, 1, 65535, Some(1500));
        assert_eq!(s.state, TcpState::Established);
        assert_eq!(s.rtt_us, 1500);
    }

    #[test]
    fn rst_overrides_everything() {
        let mut s = TcpSubstate::default();
        s.observe(flags::SYN, 0, 0, 65535, None);
        s.observe(flags::RST, 1, 1, 0, None);
        assert_eq!(s.state, TcpState::Reset);
    }

    #[test]
    fn repeated_seq_counts_as_retransmit() {
        let mut s = TcpSubstate::default();
        s.observe(flags::ACK, 100, 1, 1000, None);
        s.observe(flags::ACK, 100, 1, 1000, None);
        assert_eq!(s.retransmits, 1);
    }

    #[test]
    fn zero_window_is_counted() {
        let mut s = TcpSubstate::default();
        s.observe(flags::ACK, 1, 1, 0, None);
        assert_eq!(s.zero_window_events, 1);
    }
}
