//! Per-SSRC RTP substate: codec/dimensions metadata carried alongside an
//! RFC 3550 §6.4.1 interarrival jitter estimate, bucketed into a 12-bin
//! histogram.

pub const JITTER_HISTOGRAM_BINS: usize = 12;
/// Sequence-number gap beyond which a loss event also counts as a
/// continuity-count error rather than ordinary packet loss.
const CC_ERROR_THRESHOLD: u32 = 16;

#[derive(Clone, Debug, Default)]
pub struct RtpSubstate {
    pub ssrc: u32,
    pub codec: Option<String>,
    pub width: u16,
    pub height: u16,
    pub fps_x100: u32,
    pub bitrate_kbps: u32,
    pub keyframes: u32,
    pub cc_errors: u32,
    pub seq_loss: u32,
    pub jitter_us: u32,
    pub jitter_histogram: [u32; JITTER_HISTOGRAM_BINS],
    last_seq: Option<u16>,
    last_arrival_us: Option<i64>,
    last_rtp_ts: Option<u32>,
    first_seen_us: Option<i64>,
    bytes_since_first: u64,
}

impl RtpSubstate {
    #[must_use]
    pub fn new(ssrc: u32) -> Self {
        Self {
            ssrc,
            ..Self::default()
        }
    }

    /// Folds in one received packet: `seq` is the RTP sequence number,
    /// `rtp_ts` its RTP timestamp (in the stream's clock rate units), and
    /// `arrival_us` the local monotonic arrival time in microseconds.
    /// `payload_len` feeds the running bitrate estimate; a gap larger than
    /// [`CC_ERROR_THRESHOLD`] is also counted as a continuity-count error.
    pub fn observe(&mut self, seq: u16, rtp_ts: u32, arrival_us: i64, clock_rate: u32, payload_len: u32) {
        if let Some(prev) = self.last_seq {
            let expected = prev.wrapping_add(1);
            if seq != expected {
                // Wrapping-aware gap count; treats any non-sequential jump as loss.
                let gap = seq.wrapping_sub(expected);
                self.seq_loss += gap as u32;
                if gap as u32 > CC_ERROR_THRESHOLD {
                    self.cc_errors += 1;
                }
            }
        }
        self.last_seq = Some(seq);

        if let (Some(prev_arrival), Some(prev_ts)) = (self.last_arrival_us, self.last_rtp_ts) {
            let arrival_delta_units =
                ((arrival_us - prev_arrival) as i64 * i64::from(clock_rate)) / 1_000_000;
            let ts_delta = i64::from(rtp_ts.wrapping_sub(prev_ts));
            let d = (arrival_delta_units - ts_delta).unsigned_abs() as u32;
            // RFC 3550 §6.4.1 exponential estimator: J += (|D| - J) / 16.
            self.jitter_us = self.jitter_us + (d.saturating_sub(self.jitter_us)) / 16;
            let bin = (self.jitter_us as usize / 5).min(JITTER_HISTOGRAM_BINS - 1);
            self.jitter_histogram[bin] += 1;
        }
        self.last_arrival_us = Some(arrival_us);
        self.last_rtp_ts = Some(rtp_ts);

        let first = *self.first_seen_us.get_or_insert(arrival_us);
        self.bytes_since_first += u64::from(payload_len);
        let elapsed_us = (arrival_us - first).max(1) as u64;
        self.bitrate_kbps = ((self.bytes_since_first * 8 * 1_000_000) / (elapsed_us * 1000)) as u32;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn in_order_sequence_has_no_loss() {
        let mut s = RtpSubstate::new(1234);
        s.observe(1, 0, 0, 90_000, 1200);
        s.observe(2, 3000, 1000, 90_000, 1200);
        s.observe(3, 6000, 2000, 90_000, 1200);
        assert_eq!(s.seq_loss, 0);
        assert_eq!(s.cc_errors, 0);
    }

    #[test]
    fn gap_in_sequence_counts_as_loss() {
        let mut s = RtpSubstate::new(1234);
        s.observe(1, 0, 0, 90_000, 1200);
        s.observe(5, 12000, 4000, 90_000, 1200);
        assert_eq!(s.seq_loss, 3);
        assert_eq!(s.cc_errors, 0);
    }

    #[test]
    fn large_gap_also_counts_as_cc_error() {
        let mut s = RtpSubstate::new(1234);
        s.observe(1, 0, 0, 90_000, 1200);
        s.observe(100, 297_000, 99_000, 90_000, 1200);
        assert!(s.cc_errors > 0);
    }

    #[test]
    fn perfectly_regular_arrivals_keep_jitter_at_zero() {
        let mut s = RtpSubstate::new(1234);
        for i in 0..10u16 {
            s.observe(i, u32::from(i) * 3000, i64::from(i) * 33_333, 90_000, 1200);
        }
        assert_eq!(s.jitter_us, 0);
    }

    #[test]
    fn bitrate_estimate_is_nonzero_after_a_few_packets() {
        let mut s = RtpSubstate::new(1234);
        for i in 0..10u16 {
            s.observe(i, u32::from(i) * 3000, i64::from(i) * 33_333, 90_000, 1200);
        }
        assert!(s.bitrate_kbps > 0);
    }
}
